//! The authoritative game state. One instance lives inside the engine
//! task; every mutation happens there and nowhere else. The maps are
//! all ordered so snapshot serialization and turn traversal are
//! canonical.

use crate::config::GameConfig;
use crate::entities::{Artifact, ArtifactId, Fleet, FleetLocation, Player, World};
use crate::errors::StateError;
use protocol::{CharacterType, FleetId, PlayerName, PopulationKind, WorldId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// The complete authoritative world. Serializable as is; the on-disk
/// snapshot is exactly this struct.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GameState {
    /// Completed turn count, starts at 0.
    pub turn: u64,
    pub worlds: BTreeMap<WorldId, World>,
    pub fleets: BTreeMap<FleetId, Fleet>,
    /// Keyed by the case-preserved name; lookups go through
    /// [`GameState::canonical_name`] for case-insensitive matching.
    pub players: BTreeMap<PlayerName, Player>,
    /// The artifact catalogue. Placement lives on worlds and fleets.
    pub artifacts: BTreeMap<ArtifactId, Artifact>,
    /// Total amount of fleet keys, fixed at map init.
    pub num_keys: u16,
    pub target_score: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub winner: Option<PlayerName>,
    /// Evolving seed for all in-game randomness. Advancing it on every
    /// draw keeps saves reproducible.
    pub rng_seed: u64,
    /// Worlds each player additionally sighted this turn (migration
    /// arrivals and probes). Cleared when the turn completes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_sightings: BTreeMap<PlayerName, BTreeSet<WorldId>>,
}

impl GameState {
    /// Generates a fresh map from the configuration. Homeworlds are not
    /// allocated here; that happens per player on JOIN.
    pub fn generate(config: &GameConfig) -> GameState {
        let mut rng = StdRng::seed_from_u64(config.game.rng_seed);
        let map_size = config.game.map_size;

        let mut worlds: BTreeMap<WorldId, World> = (1..=map_size)
            .map(|id| {
                let mut world = World::new(id);
                world.industry = range_sample(&mut rng, config.worlds.industry_range);
                world.mines = range_sample(&mut rng, config.worlds.mines_range);
                world.limit = range_sample(&mut rng, config.worlds.limit_range);
                world.population =
                    range_sample(&mut rng, config.worlds.population_range).min(world.limit);
                (id, world)
            })
            .collect();

        connect_worlds(
            &mut worlds,
            &mut rng,
            config.worlds.min_connections,
            config.worlds.max_connections,
        );

        // Flag black holes. They keep their topology but hold nothing.
        let black_hole_count =
            ((map_size as f64) * config.game.black_hole_fraction).floor() as usize;
        let mut ids: Vec<WorldId> = worlds.keys().copied().collect();
        ids.shuffle(&mut rng);
        for id in ids.iter().take(black_hole_count) {
            let world = worlds.get_mut(id).unwrap();
            world.is_black_hole = true;
            world.population = 0;
            world.industry = 0;
            world.mines = 0;
            world.metal = 0;
            world.limit = 0;
        }

        let artifacts = place_artifacts(&mut worlds, &mut rng, config);

        // All keys exist from the start, parked empty on ordinary worlds.
        let normal_ids: Vec<WorldId> = worlds
            .values()
            .filter(|w| !w.is_black_hole)
            .map(|w| w.id)
            .collect();
        let fleets: BTreeMap<FleetId, Fleet> = (1..=config.game.num_keys)
            .map(|id| {
                let home = normal_ids[rng.gen_range(0..normal_ids.len())];
                (id, Fleet::new(id, home))
            })
            .collect();

        GameState {
            turn: 0,
            worlds,
            fleets,
            players: BTreeMap::new(),
            artifacts,
            num_keys: config.game.num_keys,
            target_score: config.game.default_target_score,
            winner: None,
            rng_seed: rng.r#gen(),
            extra_sightings: BTreeMap::new(),
        }
    }

    /// A fresh RNG for one decision, advancing the stored seed so the
    /// sequence continues deterministically across saves.
    pub fn draw_rng(&mut self) -> StdRng {
        let rng = StdRng::seed_from_u64(self.rng_seed);
        self.rng_seed = self.rng_seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        rng
    }

    /// The case-preserved name of the player matching `name`
    /// case-insensitively, if any.
    pub fn canonical_name(&self, name: &str) -> Option<PlayerName> {
        self.players
            .keys()
            .find(|known| known.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    pub fn player_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.get_mut(name)
    }

    /// All fleets currently at the world, in id order.
    pub fn fleets_at(&self, world: WorldId) -> Vec<FleetId> {
        self.fleets
            .values()
            .filter(|f| f.location == FleetLocation::AtWorld(world))
            .map(|f| f.id)
            .collect()
    }

    /// Whether two worlds share an edge.
    pub fn connected(&self, a: WorldId, b: WorldId) -> bool {
        self.worlds
            .get(&a)
            .map(|world| world.connections.contains(&b))
            .unwrap_or(false)
    }

    /// Hop distance between two worlds, None when unreachable.
    pub fn distance(&self, from: WorldId, to: WorldId) -> Option<usize> {
        if from == to {
            return Some(0);
        }
        let mut seen: BTreeSet<WorldId> = BTreeSet::from([from]);
        let mut queue: VecDeque<(WorldId, usize)> = VecDeque::from([(from, 0)]);
        while let Some((current, dist)) = queue.pop_front() {
            for &next in &self.worlds[&current].connections {
                if next == to {
                    return Some(dist + 1);
                }
                if seen.insert(next) {
                    queue.push_back((next, dist + 1));
                }
            }
        }
        None
    }

    /// Picks a homeworld for a joining player: an ordinary world with no
    /// black-hole neighbor, no artifacts and at least two hops away from
    /// every existing homeworld. Seeds it and the starting fleets.
    pub fn allocate_homeworld(
        &mut self,
        name: &PlayerName,
        config: &GameConfig,
    ) -> Result<WorldId, StateError> {
        let taken_homes: Vec<WorldId> = self
            .worlds
            .values()
            .filter(|w| w.is_homeworld())
            .map(|w| w.id)
            .collect();
        let mut candidates: Vec<WorldId> = self
            .worlds
            .values()
            .filter(|w| {
                !w.is_black_hole
                    && !w.is_homeworld()
                    && w.owner.is_none()
                    && w.artifacts.is_empty()
                    && w.connections
                        .iter()
                        .all(|n| !self.worlds[n].is_black_hole)
            })
            .map(|w| w.id)
            .collect();
        candidates.retain(|&id| {
            taken_homes
                .iter()
                .all(|&home| self.distance(id, home).map(|d| d > 2).unwrap_or(true))
        });
        if candidates.is_empty() {
            return Err(StateError::Invariant(
                "no world left that qualifies as a homeworld".into(),
            ));
        }
        let mut rng = self.draw_rng();
        let home_id = candidates[rng.gen_range(0..candidates.len())];

        let hw = &config.game.homeworld;
        let world = self.worlds.get_mut(&home_id).unwrap();
        world.key = Some(name.clone());
        world.owner = Some(name.clone());
        world.population = hw.population;
        world.industry = hw.industry;
        world.mines = hw.mines;
        world.metal = hw.metal;
        world.limit = hw.limit;

        // Hand out the lowest free keys as the starting fleets.
        let free_keys: Vec<FleetId> = self
            .fleets
            .values()
            .filter(|f| f.owner.is_none())
            .map(|f| f.id)
            .take(hw.num_fleets as usize)
            .collect();
        if free_keys.len() < hw.num_fleets as usize {
            return Err(StateError::Invariant("ran out of fleet keys".into()));
        }
        for key in free_keys {
            let fleet = self.fleets.get_mut(&key).unwrap();
            fleet.owner = Some(name.clone());
            fleet.location = FleetLocation::AtWorld(home_id);
            fleet.ships = hw.ships_per_fleet;
        }
        Ok(home_id)
    }

    /// Moves a destroyed key to a random ordinary world, keeping its
    /// artifacts and owner but nothing else.
    pub fn respawn_key(&mut self, fleet_id: FleetId) -> WorldId {
        let normal_ids: Vec<WorldId> = self
            .worlds
            .values()
            .filter(|w| !w.is_black_hole)
            .map(|w| w.id)
            .collect();
        let mut rng = self.draw_rng();
        let target = normal_ids[rng.gen_range(0..normal_ids.len())];
        let fleet = self.fleets.get_mut(&fleet_id).unwrap();
        fleet.ships = 0;
        fleet.cargo = 0;
        fleet.has_pbb = false;
        fleet.location = FleetLocation::AtWorld(target);
        fleet.pending_path.clear();
        target
    }

    /// Records that `player` gained sight of `world` this turn.
    pub fn add_sighting(&mut self, player: &str, world: WorldId) {
        self.extra_sightings
            .entry(player.to_string())
            .or_default()
            .insert(world);
    }

    /// Clears everything that only lives for one turn.
    pub fn reset_turn_state(&mut self) {
        for fleet in self.fleets.values_mut() {
            fleet.reset_turn_flags();
        }
        self.extra_sightings.clear();
    }

    /// Verifies every structural invariant. Called after load and after
    /// every turn resolution.
    pub fn check_invariants(&self) -> Result<(), StateError> {
        if self.fleets.len() != self.num_keys as usize {
            return Err(StateError::Invariant(format!(
                "fleet key count {} does not match configured {}",
                self.fleets.len(),
                self.num_keys
            )));
        }
        for world in self.worlds.values() {
            if world.population > world.limit {
                return Err(StateError::Invariant(format!(
                    "world {} population {} above limit {}",
                    world.id, world.population, world.limit
                )));
            }
            if world.converts > world.population {
                return Err(StateError::Invariant(format!(
                    "world {} has more converts than population",
                    world.id
                )));
            }
            if let Some(owner) = &world.owner {
                if !self.players.contains_key(owner) {
                    return Err(StateError::Invariant(format!(
                        "world {} owned by unknown player {owner}",
                        world.id
                    )));
                }
                // Ownership needs a claim on the ground: population, a
                // garrison, or the owner's fleets holding position.
                let fleet_hold = self.fleets.values().any(|f| {
                    f.owner.as_deref() == Some(owner)
                        && f.location == FleetLocation::AtWorld(world.id)
                });
                if world.population == 0
                    && world.iships == 0
                    && world.pships == 0
                    && !fleet_hold
                {
                    return Err(StateError::Invariant(format!(
                        "world {} owned but has neither population, garrison nor fleets",
                        world.id
                    )));
                }
            }
            for neighbor in &world.connections {
                let back = self
                    .worlds
                    .get(neighbor)
                    .map(|n| n.connections.contains(&world.id))
                    .unwrap_or(false);
                if !back {
                    return Err(StateError::Invariant(format!(
                        "connection {} -> {neighbor} is not symmetric",
                        world.id
                    )));
                }
            }
        }
        for fleet in self.fleets.values() {
            if let FleetLocation::AtWorld(world) = fleet.location
                && !self.worlds.contains_key(&world)
            {
                return Err(StateError::Invariant(format!(
                    "fleet {} sits at unknown world {world}",
                    fleet.id
                )));
            }
            if let Some(owner) = &fleet.owner
                && !self.players.contains_key(owner)
            {
                return Err(StateError::Invariant(format!(
                    "fleet {} owned by unknown player {owner}",
                    fleet.id
                )));
            }
        }
        // Every artifact exists exactly once, across worlds and fleets.
        let mut seen: BTreeSet<ArtifactId> = BTreeSet::new();
        let placements = self
            .worlds
            .values()
            .flat_map(|w| w.artifacts.iter().copied())
            .chain(self.fleets.values().flat_map(|f| f.artifacts.iter().copied()));
        for id in placements {
            if !self.artifacts.contains_key(&id) {
                return Err(StateError::Invariant(format!(
                    "placed artifact {id} missing from catalogue"
                )));
            }
            if !seen.insert(id) {
                return Err(StateError::Invariant(format!(
                    "artifact {id} placed more than once"
                )));
            }
        }
        if seen.len() != self.artifacts.len() {
            return Err(StateError::Invariant(format!(
                "{} artifacts in catalogue but {} placed",
                self.artifacts.len(),
                seen.len()
            )));
        }
        for player in self.players.values() {
            let replayed: i64 = player.ledger.iter().map(|e| e.points).sum();
            if replayed != player.score {
                return Err(StateError::Invariant(format!(
                    "player {} score {} does not match ledger sum {replayed}",
                    player.name, player.score
                )));
            }
        }
        Ok(())
    }
}

fn range_sample(rng: &mut StdRng, (min, max): (u32, u32)) -> u32 {
    rng.gen_range(min..=max)
}

/// Wires the map: a shuffled chain guarantees global connectivity, then
/// random extra edges lift every world to the minimum degree without
/// breaking the maximum.
fn connect_worlds(
    worlds: &mut BTreeMap<WorldId, World>,
    rng: &mut StdRng,
    min_connections: usize,
    max_connections: usize,
) {
    let mut ids: Vec<WorldId> = worlds.keys().copied().collect();
    ids.shuffle(rng);
    for pair in ids.windows(2) {
        add_edge(worlds, pair[0], pair[1]);
    }

    let all_ids = ids.clone();
    let mut attempts = 0usize;
    loop {
        let Some(&needy) = all_ids
            .iter()
            .find(|id| worlds[*id].connections.len() < min_connections)
        else {
            break;
        };
        // Bounded retries; a pathological config may leave a world below
        // the minimum, which is tolerable for play.
        attempts += 1;
        if attempts > all_ids.len() * 16 {
            tracing::warn!(world = needy, "Could not reach minimum connection count.");
            break;
        }
        let candidate = all_ids[rng.gen_range(0..all_ids.len())];
        if candidate == needy
            || worlds[&candidate].connections.len() >= max_connections
            || worlds[&needy].connections.contains(&candidate)
        {
            continue;
        }
        add_edge(worlds, needy, candidate);
    }
}

fn add_edge(worlds: &mut BTreeMap<WorldId, World>, a: WorldId, b: WorldId) {
    worlds.get_mut(&a).unwrap().connections.insert(b);
    worlds.get_mut(&b).unwrap().connections.insert(a);
}

/// Builds the artifact catalogue and scatters it over ordinary worlds.
fn place_artifacts(
    worlds: &mut BTreeMap<WorldId, World>,
    rng: &mut StdRng,
    config: &GameConfig,
) -> BTreeMap<ArtifactId, Artifact> {
    let mut catalogue: BTreeMap<ArtifactId, Artifact> = BTreeMap::new();
    let mut next_id: ArtifactId = 1;
    for special in &config.artifacts.special_artifacts {
        catalogue.insert(
            next_id,
            Artifact {
                id: next_id,
                name: special.name.clone(),
                points: special.points,
                effect: special.effect.clone(),
            },
        );
        next_id += 1;
    }
    for kind in &config.artifacts.types {
        for item in &config.artifacts.items {
            catalogue.insert(
                next_id,
                Artifact {
                    id: next_id,
                    name: format!("{kind} {item}"),
                    points: config.artifacts.default_points,
                    effect: None,
                },
            );
            next_id += 1;
        }
    }

    let mut hosts: Vec<WorldId> = worlds
        .values()
        .filter(|w| !w.is_black_hole)
        .map(|w| w.id)
        .collect();
    hosts.shuffle(rng);
    if catalogue.len() > hosts.len() {
        tracing::warn!(
            artifacts = catalogue.len(),
            worlds = hosts.len(),
            "More artifacts configured than worlds available, skipping the rest."
        );
    }
    let placed: Vec<ArtifactId> = catalogue.keys().copied().collect();
    let mut kept: BTreeMap<ArtifactId, Artifact> = BTreeMap::new();
    for (artifact_id, world_id) in placed.into_iter().zip(hosts) {
        worlds.get_mut(&world_id).unwrap().artifacts.insert(artifact_id);
        kept.insert(artifact_id, catalogue.remove(&artifact_id).unwrap());
    }
    kept
}

/// Registers a brand-new player: homeworld, fleets, record. The caller
/// has already ruled out name collisions.
pub fn create_player(
    state: &mut GameState,
    name: PlayerName,
    character: CharacterType,
    turn_preference_minutes: u64,
    config: &GameConfig,
) -> Result<WorldId, StateError> {
    let home = state.allocate_homeworld(&name, config)?;
    let player = Player::new(name.clone(), character, home, turn_preference_minutes);
    state.players.insert(name, player);
    Ok(home)
}

/// True when the world hosts a robot population.
pub fn is_robot_world(world: &World) -> bool {
    world.population > 0 && world.population_kind == PopulationKind::Robot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> GameConfig {
        let mut config = GameConfig::default();
        config.game.map_size = 40;
        config.game.num_keys = 40;
        config.game.black_hole_fraction = 0.1;
        config
    }

    #[test]
    fn generated_map_is_connected_and_degree_bounded() {
        let config = small_config();
        let state = GameState::generate(&config);
        assert_eq!(state.worlds.len(), 40);
        assert_eq!(state.fleets.len(), 40);
        // Reachability from world 1 covers the whole map.
        for id in state.worlds.keys() {
            assert!(
                state.distance(1, *id).is_some(),
                "world {id} unreachable from world 1"
            );
        }
        for world in state.worlds.values() {
            assert!(world.connections.len() >= config.worlds.min_connections);
            assert!(!world.connections.contains(&world.id));
        }
        state.check_invariants().unwrap();
    }

    #[test]
    fn generation_is_reproducible_from_the_seed() {
        let config = small_config();
        assert_eq!(GameState::generate(&config), GameState::generate(&config));
    }

    #[test]
    fn black_holes_hold_nothing() {
        let state = GameState::generate(&small_config());
        let holes: Vec<&World> = state.worlds.values().filter(|w| w.is_black_hole).collect();
        assert_eq!(holes.len(), 4);
        for hole in holes {
            assert_eq!(hole.population, 0);
            assert_eq!(hole.limit, 0);
            assert!(hole.artifacts.is_empty());
        }
    }

    #[test]
    fn homeworld_allocation_respects_the_placement_rules() {
        let config = small_config();
        let mut state = GameState::generate(&config);
        let home_a =
            create_player(&mut state, "Alice".into(), CharacterType::Merchant, 60, &config)
                .unwrap();
        let home_b =
            create_player(&mut state, "Bob".into(), CharacterType::Pirate, 60, &config).unwrap();
        assert_ne!(home_a, home_b);
        assert!(state.distance(home_a, home_b).unwrap() > 2);
        for home in [home_a, home_b] {
            let world = &state.worlds[&home];
            assert!(!world.is_black_hole);
            assert!(world.is_homeworld());
            assert!(world
                .connections
                .iter()
                .all(|n| !state.worlds[n].is_black_hole));
        }
        // Starting fleets sit at the homeworld.
        let alice_fleets: Vec<&Fleet> = state
            .fleets
            .values()
            .filter(|f| f.owned_by("Alice"))
            .collect();
        assert_eq!(alice_fleets.len(), config.game.homeworld.num_fleets as usize);
        for fleet in alice_fleets {
            assert_eq!(fleet.location, FleetLocation::AtWorld(home_a));
            assert_eq!(fleet.ships, config.game.homeworld.ships_per_fleet);
        }
        state.check_invariants().unwrap();
    }

    #[test]
    fn canonical_name_is_case_insensitive() {
        let config = small_config();
        let mut state = GameState::generate(&config);
        create_player(&mut state, "Alice".into(), CharacterType::Apostle, 60, &config).unwrap();
        assert_eq!(state.canonical_name("aLiCe"), Some("Alice".to_string()));
        assert_eq!(state.canonical_name("Bob"), None);
    }

    #[test]
    fn respawned_key_keeps_artifacts_but_nothing_else() {
        let config = small_config();
        let mut state = GameState::generate(&config);
        let fleet_id = 1;
        {
            let fleet = state.fleets.get_mut(&fleet_id).unwrap();
            fleet.ships = 12;
            fleet.cargo = 5;
            fleet.has_pbb = true;
            fleet.artifacts.insert(999);
        }
        let target = state.respawn_key(fleet_id);
        let fleet = &state.fleets[&fleet_id];
        assert_eq!(fleet.ships, 0);
        assert_eq!(fleet.cargo, 0);
        assert!(!fleet.has_pbb);
        assert!(fleet.artifacts.contains(&999));
        assert!(!state.worlds[&target].is_black_hole);
    }

    #[test]
    fn invariant_check_catches_overpopulation() {
        let config = small_config();
        let mut state = GameState::generate(&config);
        let world = state.worlds.values_mut().find(|w| !w.is_black_hole).unwrap();
        world.limit = 5;
        world.population = 9;
        assert!(matches!(
            state.check_invariants(),
            Err(StateError::Invariant(_))
        ));
    }
}
