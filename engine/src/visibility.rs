//! Fog of war. Computes what one player may see right now and keeps
//! their remembered-world snapshots up to date. Everything here reads
//! the authoritative state; the only mutation is the explicit
//! remember step at the end of a turn.

use crate::entities::{RememberedWorld, World};
use crate::state::GameState;
use protocol::{FleetView, PlayerProjection, RosterEntry, WorldId, WorldView};
use std::collections::BTreeSet;

/// The clock values stamped onto projections and timer frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClockSnapshot {
    pub time_remaining: u64,
    pub players_ready: usize,
    pub total_players: usize,
}

/// The worlds `player` can currently see: owned worlds, worlds hosting
/// one of their fleets, and worlds sighted this turn by migration or probe.
pub fn visible_worlds(state: &GameState, player: &str) -> BTreeSet<WorldId> {
    let mut visible: BTreeSet<WorldId> = state
        .worlds
        .values()
        .filter(|world| world.owned_by(player))
        .map(|world| world.id)
        .collect();
    for fleet in state.fleets.values() {
        if fleet.owned_by(player)
            && let Some(world) = fleet.location.world()
        {
            visible.insert(world);
        }
    }
    if let Some(sighted) = state.extra_sightings.get(player) {
        visible.extend(sighted.iter().copied());
    }
    visible
}

/// Renders one world for an observer with full sight of it.
fn world_view(world: &World) -> WorldView {
    WorldView {
        id: world.id,
        key: world.key.clone(),
        population: world.population,
        industry: world.industry,
        mines: world.mines,
        metal: world.metal,
        limit: world.limit,
        iships: world.iships,
        pships: world.pships,
        owner: world.owner.clone(),
        connections: world.connections.iter().copied().collect(),
        is_black_hole: world.is_black_hole,
        population_kind: world.population_kind,
        converts: world.converts,
        artifacts: world.artifacts.iter().copied().collect(),
        turn_last_seen: None,
    }
}

/// Builds the full projection for one player: visible worlds in full,
/// remembered worlds as their last snapshot, fleets per the
/// co-location rule, plus roster and queued orders.
pub fn project(state: &GameState, player_name: &str, clock: ClockSnapshot) -> PlayerProjection {
    let player = &state.players[player_name];
    let visible = visible_worlds(state, player_name);

    let mut worlds = std::collections::BTreeMap::new();
    for id in &visible {
        worlds.insert(*id, world_view(&state.worlds[id]));
    }
    for (id, remembered) in &player.known_worlds {
        if !visible.contains(id) {
            let mut view = remembered.view.clone();
            view.turn_last_seen = Some(remembered.turn);
            worlds.insert(*id, view);
        }
    }

    let mut fleets: Vec<FleetView> = Vec::new();
    for fleet in state.fleets.values() {
        let own = fleet.owned_by(player_name);
        let co_located = fleet
            .location
            .world()
            .map(|world| visible.contains(&world))
            .unwrap_or(false);
        if !own && !co_located {
            continue;
        }
        // Hide parked, empty keys of nobody.
        if fleet.owner.is_none() && fleet.ships == 0 {
            continue;
        }
        fleets.push(FleetView {
            id: fleet.id,
            owner: fleet.owner.clone(),
            world: fleet.location.world(),
            ships: fleet.ships,
            cargo: fleet.cargo,
            // Cargo manifests of other players stay private.
            artifacts: if own {
                fleet.artifacts.iter().copied().collect()
            } else {
                Vec::new()
            },
            has_pbb: if own { fleet.has_pbb } else { false },
            moved: fleet.moved,
            at_peace: fleet.at_peace,
        });
    }

    let players: Vec<RosterEntry> = state
        .players
        .values()
        .map(|p| RosterEntry {
            name: p.name.clone(),
            character_type: p.character,
            score: p.score,
            ready: p.ready,
        })
        .collect();

    PlayerProjection {
        player_name: player.name.clone(),
        character_type: player.character,
        score: player.score,
        game_turn: state.turn,
        time_remaining: clock.time_remaining,
        players_ready: clock.players_ready,
        total_players: clock.total_players,
        worlds,
        fleets,
        orders: player.orders.texts(),
        players,
    }
}

/// Stores the current view of every visible world as the player's
/// remembered snapshot. Runs once per player at the end of a turn.
pub fn remember_visible(state: &mut GameState, player_name: &str) {
    let visible = visible_worlds(state, player_name);
    let turn = state.turn;
    let snapshots: Vec<(WorldId, RememberedWorld)> = visible
        .iter()
        .map(|id| {
            (
                *id,
                RememberedWorld { turn, view: world_view(&state.worlds[id]) },
            )
        })
        .collect();
    if let Some(player) = state.players.get_mut(player_name) {
        for (id, snapshot) in snapshots {
            player.known_worlds.insert(id, snapshot);
        }
    }
}
