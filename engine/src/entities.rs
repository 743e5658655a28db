//! The value types the game is made of. These are plain records, all
//! cross-references go by id or name and get resolved through the
//! authoritative state. Mutation only ever happens inside the engine
//! task, so none of this carries any locking.

use protocol::{CharacterType, FleetId, PlayerName, PopulationKind, WorldId, WorldView};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::order::OrderQueue;

/// Artifact ids are unique across the whole map, worlds and fleets.
pub type ArtifactId = u16;

/// One world of the map. Worlds are created at map init and never
/// destroyed; black holes persist as hazards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct World {
    pub id: WorldId,
    /// Homeworlds carry a key string, all other worlds none.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    pub population: u32,
    pub industry: u32,
    pub mines: u32,
    pub metal: u32,
    /// Population ceiling. The sum of populations can never exceed the sum of limits.
    pub limit: u32,
    /// Industry-defending garrison ships.
    pub iships: u32,
    /// Population-defending garrison ships.
    pub pships: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner: Option<PlayerName>,
    /// Symmetric neighbor set.
    pub connections: BTreeSet<WorldId>,
    pub is_black_hole: bool,
    pub artifacts: BTreeSet<ArtifactId>,
    pub population_kind: PopulationKind,
    /// Converts among the population, maintained by Apostle mechanics.
    pub converts: u32,
}

impl World {
    pub fn new(id: WorldId) -> World {
        World {
            id,
            key: None,
            population: 0,
            industry: 0,
            mines: 0,
            metal: 0,
            limit: 0,
            iships: 0,
            pships: 0,
            owner: None,
            connections: BTreeSet::new(),
            is_black_hole: false,
            artifacts: BTreeSet::new(),
            population_kind: PopulationKind::Human,
            converts: 0,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_homeworld(&self) -> bool {
        self.key.is_some()
    }

    /// True when `player` owns this world.
    pub fn owned_by(&self, player: &str) -> bool {
        self.owner.as_deref() == Some(player)
    }
}

/// Where a fleet currently is.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FleetLocation {
    AtWorld(WorldId),
    /// Only observable mid-movement-phase; fleets always end a turn at a world.
    InTransit,
}

impl FleetLocation {
    pub fn world(&self) -> Option<WorldId> {
        match self {
            FleetLocation::AtWorld(id) => Some(*id),
            FleetLocation::InTransit => None,
        }
    }
}

/// The scope of a standing no-ambush request.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub enum AmbushExemption {
    /// The fleet triggers ambushes normally.
    #[default]
    None,
    /// The fleet never triggers its owner's hostile arrivals anywhere this turn.
    Everywhere,
    /// The fleet does not trigger at the listed worlds.
    AtWorlds(BTreeSet<WorldId>),
}

impl AmbushExemption {
    /// Whether an ambush at `world` is suppressed for this fleet.
    pub fn covers(&self, world: WorldId) -> bool {
        match self {
            AmbushExemption::None => false,
            AmbushExemption::Everywhere => true,
            AmbushExemption::AtWorlds(worlds) => worlds.contains(&world),
        }
    }
}

/// A fleet key. All keys exist from map init on; a "destroyed" fleet is
/// one with zero ships whose key respawns elsewhere.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Fleet {
    pub id: FleetId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner: Option<PlayerName>,
    pub location: FleetLocation,
    pub ships: u32,
    pub cargo: u32,
    pub artifacts: BTreeSet<ArtifactId>,
    pub has_pbb: bool,
    // Per-turn state.
    pub moved: bool,
    pub ambushing: bool,
    pub at_peace: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conditional_target: Option<crate::order::FireTarget>,
    #[serde(default)]
    pub no_ambush: AmbushExemption,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_path: Vec<WorldId>,
    /// Set while resolving the fire phase, read by conditional fire.
    #[serde(default)]
    pub took_fire: bool,
}

impl Fleet {
    pub fn new(id: FleetId, location: WorldId) -> Fleet {
        Fleet {
            id,
            owner: None,
            location: FleetLocation::AtWorld(location),
            ships: 0,
            cargo: 0,
            artifacts: BTreeSet::new(),
            has_pbb: false,
            moved: false,
            ambushing: false,
            at_peace: false,
            conditional_target: None,
            no_ambush: AmbushExemption::None,
            pending_path: Vec::new(),
            took_fire: false,
        }
    }

    pub fn owned_by(&self, player: &str) -> bool {
        self.owner.as_deref() == Some(player)
    }

    /// Cargo units this fleet can carry in total.
    pub fn cargo_capacity(&self, cargo_per_ship: u32) -> u32 {
        self.ships * cargo_per_ship
    }

    /// Clears everything that only lives for one turn.
    pub fn reset_turn_flags(&mut self) {
        self.moved = false;
        self.ambushing = false;
        self.conditional_target = None;
        self.no_ambush = AmbushExemption::None;
        self.pending_path.clear();
        self.took_fire = false;
    }
}

/// An artifact. The `effect` tag is reserved metadata and never feeds
/// into mechanics.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub name: String,
    pub points: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub effect: Option<String>,
}

/// Diplomatic stance towards one other player.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelationFlags {
    pub ally: bool,
    /// The named player may load cargo at our worlds.
    pub loader: bool,
    pub jihad: bool,
}

impl RelationFlags {
    pub fn is_default(&self) -> bool {
        *self == RelationFlags::default()
    }
}

/// The last snapshot a player took of a world that since dropped out of sight.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RememberedWorld {
    pub turn: u64,
    pub view: WorldView,
}

/// One scoring event. `score` is always the sum over the ledger, so a
/// replay from turn zero reproduces it exactly.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub turn: u64,
    pub points: i64,
    pub reason: ScoreReason,
}

/// Why points were awarded. The variants mirror the per-character
/// scoring rules.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ScoreReason {
    /// EmpireBuilder per-turn holdings scan.
    Holdings,
    /// Merchant metal delivery to another player's world.
    CargoDelivery { world: WorldId },
    /// Merchant consumer goods unloading, staged by delivery count.
    ConsumerGoods { world: WorldId },
    /// Pirate plunder, staged by per-world plunder count.
    Plunder { world: WorldId },
    /// Pirate per-turn fleet count.
    FleetsOwned,
    /// ArtifactCollector per-turn artifact points.
    ArtifactHoldings,
    /// ArtifactCollector museum world bonus.
    MuseumWorld { world: WorldId },
    /// Berserker kills (combat, robot attack or robot migration).
    PopulationKilled,
    /// Berserker per-turn robot world count.
    RobotWorlds,
    /// Berserker destroyed enemy ships.
    ShipsDestroyed,
    /// Berserker planet buster strike.
    PbbDropped { world: WorldId },
    /// Apostle per-turn owned world count.
    WorldsOwned,
    /// Apostle converts in the universe.
    ConvertsInUniverse,
    /// Apostle fully-convert owned worlds.
    FullyConvertWorlds,
    /// Apostle martyrs (converts killed by others).
    Martyrs,
}

/// One player. Created on first JOIN, retained over disconnects and
/// found again by case-insensitive name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Player {
    /// Case-preserved display name. Uniqueness is case-insensitive.
    pub name: PlayerName,
    pub character: CharacterType,
    pub score: i64,
    pub ready: bool,
    pub turn_preference_minutes: u64,
    pub connected: bool,
    pub orders: OrderQueue,
    pub known_worlds: BTreeMap<WorldId, RememberedWorld>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<PlayerName, RelationFlags>,
    /// Plunder count per target world over game history.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plunder_counts: BTreeMap<WorldId, u32>,
    /// Consumer-goods deliveries per recipient world over game history.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub consumer_deliveries: BTreeMap<WorldId, u32>,
    pub ledger: Vec<LedgerEntry>,
    /// Home world id, fixed at join.
    pub homeworld: WorldId,
    /// Turn the score first crossed the target, for tie breaking.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub victory_turn: Option<u64>,
}

impl Player {
    pub fn new(
        name: PlayerName,
        character: CharacterType,
        homeworld: WorldId,
        turn_preference_minutes: u64,
    ) -> Player {
        Player {
            name,
            character,
            score: 0,
            ready: false,
            turn_preference_minutes,
            connected: true,
            orders: OrderQueue::default(),
            known_worlds: BTreeMap::new(),
            relations: BTreeMap::new(),
            plunder_counts: BTreeMap::new(),
            consumer_deliveries: BTreeMap::new(),
            ledger: Vec::new(),
            homeworld,
            victory_turn: None,
        }
    }

    /// Appends a ledger entry and keeps `score` in sync with it.
    pub fn award(&mut self, turn: u64, points: i64, reason: ScoreReason) {
        if points == 0 {
            return;
        }
        self.ledger.push(LedgerEntry { turn, points, reason });
        self.score += points;
    }

    /// The stance towards another player, default when never declared.
    pub fn relation(&self, other: &str) -> RelationFlags {
        self.relations.get(other).copied().unwrap_or_default()
    }

    pub fn is_ally(&self, other: &str) -> bool {
        self.relation(other).ally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn award_keeps_score_and_ledger_in_sync() {
        let mut player = Player::new("Alice".into(), CharacterType::Pirate, 1, 60);
        player.award(1, 50, ScoreReason::Plunder { world: 3 });
        player.award(2, 3, ScoreReason::FleetsOwned);
        player.award(2, 0, ScoreReason::FleetsOwned);
        assert_eq!(player.score, 53);
        let replayed: i64 = player.ledger.iter().map(|e| e.points).sum();
        assert_eq!(replayed, player.score);
        // Zero awards leave no ledger noise.
        assert_eq!(player.ledger.len(), 2);
    }

    #[test]
    fn ambush_exemption_scopes() {
        assert!(!AmbushExemption::None.covers(4));
        assert!(AmbushExemption::Everywhere.covers(4));
        let scoped = AmbushExemption::AtWorlds([4u16].into_iter().collect());
        assert!(scoped.covers(4));
        assert!(!scoped.covers(5));
    }

    #[test]
    fn fleet_turn_reset_keeps_peace_standing() {
        let mut fleet = Fleet::new(1, 10);
        fleet.moved = true;
        fleet.ambushing = true;
        fleet.at_peace = true;
        fleet.pending_path = vec![2, 3];
        fleet.reset_turn_flags();
        assert!(!fleet.moved);
        assert!(!fleet.ambushing);
        assert!(fleet.pending_path.is_empty());
        // Peace is a standing declaration, only NotPeace lifts it.
        assert!(fleet.at_peace);
    }
}
