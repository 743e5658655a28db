//! Per-player change tracking. The engine remembers a digest of the
//! last projection each client received and emits only what actually
//! changed. Clock ticks never come through here; the timer frame is
//! its own tiny thing.

use protocol::{FleetId, PlayerName, PlayerProjection, StateDelta, WorldId};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn digest_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// What we remember about the last projection a player got.
#[derive(Clone, Debug, Default)]
struct PlayerDigest {
    worlds: BTreeMap<WorldId, u64>,
    fleets: BTreeMap<FleetId, u64>,
    score: i64,
    game_turn: u64,
    orders: u64,
    roster: u64,
}

impl PlayerDigest {
    fn of(projection: &PlayerProjection) -> PlayerDigest {
        PlayerDigest {
            worlds: projection
                .worlds
                .iter()
                .map(|(id, world)| (*id, digest_of(world)))
                .collect(),
            fleets: projection
                .fleets
                .iter()
                .map(|fleet| (fleet.id, digest_of(fleet)))
                .collect(),
            score: projection.score,
            game_turn: projection.game_turn,
            orders: digest_of(&projection.orders),
            roster: digest_of(&projection.players),
        }
    }
}

/// Holds one digest per player and diffs fresh projections against it.
#[derive(Default)]
pub struct DeltaEngine {
    digests: BTreeMap<PlayerName, PlayerDigest>,
}

impl DeltaEngine {
    /// Records that the player just received this full projection.
    pub fn record_full_sync(&mut self, projection: &PlayerProjection) {
        self.digests
            .insert(projection.player_name.clone(), PlayerDigest::of(projection));
    }

    /// Drops the stored digest so the next contact starts with a full sync.
    pub fn forget(&mut self, player: &str) {
        self.digests.remove(player);
    }

    /// Whether a full sync was ever recorded for the player.
    pub fn knows(&self, player: &str) -> bool {
        self.digests.contains_key(player)
    }

    /// Diffs the projection against the stored digest. Returns `None`
    /// when nothing changed or when no baseline exists (the caller has
    /// to full-sync first). The digest advances to the new projection.
    pub fn compute_delta(&mut self, projection: &PlayerProjection) -> Option<StateDelta> {
        let previous = self.digests.get(&projection.player_name)?;
        let next = PlayerDigest::of(projection);

        let mut delta = StateDelta::default();
        for (id, world) in &projection.worlds {
            if previous.worlds.get(id) != Some(&next.worlds[id]) {
                delta.worlds.insert(*id, world.clone());
            }
        }
        delta.removed_worlds = previous
            .worlds
            .keys()
            .filter(|id| !next.worlds.contains_key(id))
            .copied()
            .collect();
        for fleet in &projection.fleets {
            if previous.fleets.get(&fleet.id) != Some(&next.fleets[&fleet.id]) {
                delta.fleets.push(fleet.clone());
            }
        }
        delta.removed_fleets = previous
            .fleets
            .keys()
            .filter(|id| !next.fleets.contains_key(id))
            .copied()
            .collect();
        if previous.score != next.score {
            delta.score = Some(projection.score);
        }
        if previous.game_turn != next.game_turn {
            delta.game_turn = Some(projection.game_turn);
        }
        if previous.orders != next.orders {
            delta.orders = Some(projection.orders.clone());
        }
        if previous.roster != next.roster {
            delta.players = Some(projection.players.clone());
        }

        self.digests
            .insert(projection.player_name.clone(), next);
        if delta.is_empty() { None } else { Some(delta) }
    }
}
