//! The wire types shared between the game server and its clients.
//! Every frame travels as one JSON text message over the web socket,
//! tagged with a `type` field. Also contains the per-player projection
//! records the server builds when it syncs or diffs client state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The buffer size for the bounded channels between connection tasks and the engine.
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// World ids run from 1 to the configured map size.
pub type WorldId = u16;
/// Fleet ids (keys) run from 1 to the configured key count.
pub type FleetId = u16;
/// Players are addressed by their case-preserved name.
pub type PlayerName = String;

/// The six playable character classes. The class decides scoring and
/// a handful of mechanical bonuses (cargo capacity, build discounts,
/// capture ratio, robot and convert handling).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacterType {
    EmpireBuilder,
    Merchant,
    Pirate,
    ArtifactCollector,
    Berserker,
    Apostle,
}

impl CharacterType {
    /// Parses the character from user input, case-insensitive.
    pub fn from_user_input(input: &str) -> Option<CharacterType> {
        match input.to_ascii_lowercase().as_str() {
            "empirebuilder" | "empire_builder" | "empire" => Some(CharacterType::EmpireBuilder),
            "merchant" => Some(CharacterType::Merchant),
            "pirate" => Some(CharacterType::Pirate),
            "artifactcollector" | "artifact_collector" | "collector" => {
                Some(CharacterType::ArtifactCollector)
            }
            "berserker" => Some(CharacterType::Berserker),
            "apostle" => Some(CharacterType::Apostle),
            _ => None,
        }
    }
}

/// What kind of population lives on a world.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PopulationKind {
    #[default]
    Human,
    Robot,
    Convert,
}

// Client -> Server frames.

/// Everything a client may send. Unknown `type` tags are rejected with
/// an `error` frame by the router.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// The primary channel: one command line in the compact order grammar.
    Command { text: String },
    /// Chat to a single player or to everyone (`to` = "all").
    Chat { to: String, message: String },
    /// A bug report that gets appended to the report journal on disk.
    BugReport {
        description: String,
        game_turn: u64,
        player_name: String,
        timestamp: String,
    },
}

// Server -> Client frames.

/// Everything the server may send.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every connection, carries the transport-level client id.
    Welcome { id: String },
    /// A full per-player projection. Sent after JOIN, on reconnect and
    /// whenever the client has to be hard-set to a known state.
    Update { state: PlayerProjection },
    /// The minimal change set since the last projection the client got.
    Delta { changes: StateDelta },
    /// The once-a-second clock frame. Deliberately tiny, bypasses the delta engine.
    Timer {
        time_remaining: u64,
        players_ready: usize,
        total_players: usize,
        game_turn: u64,
    },
    /// A game event visible to this player (combat reports, captures, ...).
    Event { text: String, event_type: EventClass },
    /// Neutral feedback for the player's own actions.
    Info { text: String },
    /// A rejected command or transport-level problem, human readable.
    Error { text: String },
    /// Movement animation hint for the front end.
    AnimateMovement {
        fleet_id: FleetId,
        from_world: WorldId,
        to_world: WorldId,
        path: Vec<WorldId>,
        duration: u64,
    },
    /// Relayed chat.
    Chat {
        from: String,
        message: String,
        channel: ChatChannel,
    },
}

/// Coarse classification for event frames so the front end can style them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    Combat,
    Capture,
    Production,
    Info,
    Help,
}

/// Whether a chat message went to everyone or just to the recipient.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatChannel {
    Private,
    All,
}

// Projection records.

/// One world as a single player is allowed to see it. For currently
/// visible worlds `turn_last_seen` is absent; remembered worlds carry
/// the turn their snapshot was taken.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorldView {
    pub id: WorldId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub population: u32,
    pub industry: u32,
    pub mines: u32,
    pub metal: u32,
    pub limit: u32,
    pub iships: u32,
    pub pships: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerName>,
    pub connections: Vec<WorldId>,
    pub is_black_hole: bool,
    pub population_kind: PopulationKind,
    pub converts: u32,
    /// Artifact ids, only filled in for currently visible worlds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_last_seen: Option<u64>,
}

/// One fleet as a single player is allowed to see it. Artifacts are
/// only listed on the player's own fleets.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FleetView {
    pub id: FleetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerName>,
    /// Absent while the fleet is between worlds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world: Option<WorldId>,
    pub ships: u32,
    pub cargo: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<u16>,
    pub has_pbb: bool,
    pub moved: bool,
    pub at_peace: bool,
}

/// One line of the player roster every client can see.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RosterEntry {
    pub name: PlayerName,
    pub character_type: CharacterType,
    pub score: i64,
    pub ready: bool,
}

/// The complete state one player is allowed to see. Unknown worlds are
/// simply absent from `worlds`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlayerProjection {
    pub player_name: PlayerName,
    pub character_type: CharacterType,
    pub score: i64,
    pub game_turn: u64,
    pub time_remaining: u64,
    pub players_ready: usize,
    pub total_players: usize,
    pub worlds: BTreeMap<WorldId, WorldView>,
    pub fleets: Vec<FleetView>,
    /// The normalized text of the player's queued orders, in queue order.
    pub orders: Vec<String>,
    pub players: Vec<RosterEntry>,
}

/// The minimal change set between two projections of the same player.
/// Empty collections and absent scalars mean "unchanged"; an entirely
/// empty delta is never sent.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StateDelta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub worlds: BTreeMap<WorldId, WorldView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_worlds: Vec<WorldId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fleets: Vec<FleetView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_fleets: Vec<FleetId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_turn: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<RosterEntry>>,
}

impl StateDelta {
    /// True when nothing changed and the frame can be skipped.
    pub fn is_empty(&self) -> bool {
        self.worlds.is_empty()
            && self.removed_worlds.is_empty()
            && self.fleets.is_empty()
            && self.removed_fleets.is_empty()
            && self.score.is_none()
            && self.game_turn.is_none()
            && self.orders.is_none()
            && self.players.is_none()
    }
}

impl PlayerProjection {
    /// Applies a delta in place. The result equals the projection the
    /// delta was computed from.
    pub fn apply_delta(&mut self, delta: &StateDelta) {
        for (id, world) in &delta.worlds {
            self.worlds.insert(*id, world.clone());
        }
        for id in &delta.removed_worlds {
            self.worlds.remove(id);
        }
        for fleet in &delta.fleets {
            match self.fleets.iter_mut().find(|f| f.id == fleet.id) {
                Some(existing) => *existing = fleet.clone(),
                None => self.fleets.push(fleet.clone()),
            }
        }
        self.fleets.retain(|f| !delta.removed_fleets.contains(&f.id));
        self.fleets.sort_by_key(|f| f.id);
        if let Some(score) = delta.score {
            self.score = score;
        }
        if let Some(turn) = delta.game_turn {
            self.game_turn = turn;
        }
        if let Some(orders) = &delta.orders {
            self.orders = orders.clone();
        }
        if let Some(players) = &delta.players {
            self.players = players.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_round_trip_the_documented_shape() {
        let json = r#"{"type":"command","text":"F1W2"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, ClientFrame::Command { ref text } if text == "F1W2"));

        let json = r#"{"type":"chat","to":"all","message":"hi"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, ClientFrame::Chat { ref to, .. } if to == "all"));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let json = r#"{"type":"warp_core_breach","text":"boom"}"#;
        assert!(serde_json::from_str::<ClientFrame>(json).is_err());
    }

    #[test]
    fn server_frame_uses_snake_case_tags() {
        let frame = ServerFrame::Timer {
            time_remaining: 42,
            players_ready: 1,
            total_players: 3,
            game_turn: 7,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"timer""#));
        assert!(json.contains(r#""time_remaining":42"#));
    }

    #[test]
    fn empty_delta_is_detected() {
        assert!(StateDelta::default().is_empty());
        let delta = StateDelta {
            score: Some(10),
            ..StateDelta::default()
        };
        assert!(!delta.is_empty());
    }
}
