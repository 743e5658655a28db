//! The error kinds of the engine and how they propagate.
//! Parse and validation failures only ever travel back to the client
//! that caused them; state errors are engine-internal and either roll a
//! turn back or refuse startup.

use protocol::{FleetId, WorldId};
use thiserror::Error;

/// A command line that does not match the grammar. Shape only, the
/// parser never consults game state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
    #[error("Expected a number after '{0}'")]
    MissingNumber(String),
    #[error("Number out of range in '{0}'")]
    NumberOutOfRange(String),
    #[error("Unexpected trailing input '{0}'")]
    TrailingInput(String),
    #[error("Missing target in '{0}'")]
    MissingTarget(String),
    #[error("Player names are 3 to 20 characters")]
    BadPlayerName,
    #[error("Unknown character type '{0}'")]
    UnknownCharacter(String),
    #[error("Turn preference must be between 5 and 1440 minutes")]
    BadTurnPreference,
}

/// A well-formed command that is not legal against the current state.
/// The messages are the stable, user-facing texts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Fleet {0} does not exist")]
    NoSuchFleet(FleetId),
    #[error("You do not own fleet {0}")]
    NotYourFleet(FleetId),
    #[error("Fleet {0} has no ships")]
    EmptyFleet(FleetId),
    #[error("World {0} does not exist")]
    NoSuchWorld(WorldId),
    #[error("You do not own world {0}")]
    NotYourWorld(WorldId),
    #[error("World {0} is not connected to {1}")]
    NotConnected(WorldId, WorldId),
    #[error("Fleet {0} is not at world {1}")]
    NotAtWorld(FleetId, WorldId),
    #[error("Fleet {0} is in transit")]
    FleetInTransit(FleetId),
    #[error("Fleet {0} already has a movement or fire order")]
    ExclusiveOrderClash(FleetId),
    #[error("World {0} does not have enough {1}")]
    InsufficientResource(WorldId, &'static str),
    #[error("Fleet {0} does not have enough cargo space")]
    InsufficientCapacity(FleetId),
    #[error("Fleet {0} does not carry enough cargo")]
    InsufficientCargo(FleetId),
    #[error("Only a {0} may do that")]
    WrongCharacter(&'static str),
    #[error("No such player '{0}'")]
    NoSuchPlayer(String),
    #[error("Artifact {0} is not there")]
    NoSuchArtifact(u16),
    #[error("A homeworld cannot be targeted by that order")]
    HomeworldProtected,
    #[error("Fleet {0} needs at least {1} ships for a planet buster")]
    TooFewShipsForPbb(FleetId, u32),
    #[error("Fleet {0} already carries a planet buster")]
    AlreadyHasPbb(FleetId),
    #[error("Fleet {0} carries no planet buster")]
    NoPbb(FleetId),
    #[error("World {0} does not host a robot population")]
    NoRobotPopulation(WorldId),
    #[error("You cannot target yourself")]
    SelfTarget,
    #[error("{0}")]
    Other(String),
}

/// Engine-internal inconsistencies.
#[derive(Error, Debug)]
pub enum StateError {
    /// An invariant was violated during a mutation. The turn rolls back
    /// to its pre-turn snapshot and the game keeps running.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// A loaded snapshot failed verification. The server refuses to start.
    #[error("corrupt game state: {0}")]
    CorruptState(String),
}

/// Configuration problems at load time. Fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(String),
    #[error("malformed configuration: {0}")]
    Malformed(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Snapshot save/load problems.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    State(#[from] StateError),
}
