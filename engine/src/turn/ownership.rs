//! Phase 11: ownership resolution. Worlds change hands when force on
//! the ground says so: abandoned worlds go neutral, unopposed fleets
//! claim, empty keys are captured, and Pirates press their numbers.

use crate::config::GameConfig;
use crate::events::{EventBus, GameEvent};
use crate::state::GameState;
use crate::turn::considers_ally;
use protocol::{CharacterType, FleetId, PlayerName, WorldId};
use std::collections::BTreeMap;

pub fn resolve(state: &mut GameState, config: &GameConfig, bus: &mut EventBus) {
    let world_ids: Vec<WorldId> = state.worlds.keys().copied().collect();
    for world_id in world_ids {
        resolve_world(state, bus, world_id);
        pirate_pressure(state, config, world_id);
        capture_empty_fleets(state, world_id);
    }
}

/// Ships each player currently has present at the world, name ascending.
fn forces_at(state: &GameState, world: WorldId) -> BTreeMap<PlayerName, u32> {
    let mut forces: BTreeMap<PlayerName, u32> = BTreeMap::new();
    for fleet in state.fleets.values() {
        if fleet.location.world() != Some(world) || fleet.ships == 0 {
            continue;
        }
        if let Some(owner) = &fleet.owner {
            *forces.entry(owner.clone()).or_default() += fleet.ships;
        }
    }
    forces
}

fn resolve_world(state: &mut GameState, bus: &mut EventBus, world_id: WorldId) {
    let world = &state.worlds[&world_id];
    let owner = world.owner.clone();
    let garrison = world.iships + world.pships;
    let population = world.population;
    let forces = forces_at(state, world_id);

    // An owner with nothing on the ground loses the world.
    if let Some(current) = &owner {
        let holds = population > 0
            || garrison > 0
            || forces.get(current).copied().unwrap_or(0) > 0;
        if !holds {
            state.worlds.get_mut(&world_id).unwrap().owner = None;
            bus.publish(GameEvent::WorldCaptured {
                world: world_id,
                new_owner: None,
                old_owner: owner.clone(),
            });
            return;
        }
    }

    // Capture: the first present, hostile, non-peaceful player takes the
    // world when the defense is gone.
    for (candidate, _) in forces.iter().filter(|(_, ships)| **ships > 0) {
        if Some(candidate) == owner.as_ref() {
            continue;
        }
        let aggressive = state.fleets.values().any(|f| {
            f.owner.as_deref() == Some(candidate.as_str())
                && f.location.world() == Some(world_id)
                && f.ships > 0
                && !f.at_peace
        });
        if !aggressive {
            continue;
        }
        if garrison > 0 {
            // Hostile garrison still stands.
            continue;
        }
        match &owner {
            None => {
                // Unclaimed: presence is enough, populated or not.
            }
            Some(current) => {
                if population == 0 {
                    continue;
                }
                // The sitting owner's fleets keep the flag up.
                if forces.get(current).copied().unwrap_or(0) > 0 {
                    continue;
                }
            }
        }
        state.worlds.get_mut(&world_id).unwrap().owner = Some(candidate.clone());
        bus.publish(GameEvent::WorldCaptured {
            world: world_id,
            new_owner: Some(candidate.clone()),
            old_owner: owner,
        });
        return;
    }
}

/// Pirate auto-capture: when a Pirate outnumbers a victim at the
/// configured ratio, the victim's fleets strike their colors.
fn pirate_pressure(state: &mut GameState, config: &GameConfig, world_id: WorldId) {
    let forces = forces_at(state, world_id);
    let pirates: Vec<PlayerName> = forces
        .keys()
        .filter(|name| state.players[*name].character == CharacterType::Pirate)
        .cloned()
        .collect();
    for pirate in pirates {
        let ratio = config.character_mods(CharacterType::Pirate).capture_ratio;
        if ratio == 0 {
            continue;
        }
        let own = forces[&pirate];
        let victims: Vec<PlayerName> = forces
            .iter()
            .filter(|(name, ships)| {
                **ships > 0
                    && **name != pirate
                    && !considers_ally(state, &pirate, name)
                    && own >= ratio * **ships
            })
            .map(|(name, _)| name.clone())
            .collect();
        for victim in victims {
            let fleet_ids: Vec<FleetId> = state
                .fleets
                .values()
                .filter(|f| {
                    f.owner.as_deref() == Some(victim.as_str())
                        && f.location.world() == Some(world_id)
                })
                .map(|f| f.id)
                .collect();
            for id in fleet_ids {
                state.fleets.get_mut(&id).unwrap().owner = Some(pirate.clone());
            }
            tracing::debug!(world = world_id, %pirate, %victim, "Pirate auto-capture.");
        }
    }
}

/// Derelict and defeated keys fall to whoever holds the field.
fn capture_empty_fleets(state: &mut GameState, world_id: WorldId) {
    let forces = forces_at(state, world_id);
    let Some(captor) = forces
        .iter()
        .find(|(_, ships)| **ships > 0)
        .map(|(name, _)| name.clone())
    else {
        return;
    };
    let prey: Vec<FleetId> = state
        .fleets
        .values()
        .filter(|f| f.location.world() == Some(world_id) && f.ships == 0)
        .filter(|f| match f.owner.as_deref() {
            None => true,
            Some(owner) => {
                owner != captor && !considers_ally(state, owner, &captor)
            }
        })
        .map(|f| f.id)
        .collect();
    for id in prey {
        let fleet = state.fleets.get_mut(&id).unwrap();
        fleet.owner = Some(captor.clone());
        fleet.cargo = 0;
        fleet.has_pbb = false;
    }
}
