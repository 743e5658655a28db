//! Phase 8: movement. Pending paths are walked hop by hop; black holes
//! swallow ships and cargo (the key respawns with its artifacts), and
//! ambushes truncate the remaining path. At-peace fleets neither
//! trigger ambushes nor get hit by them, they just stop.

use crate::events::{Combatant, CombatReport, EventBus, GameEvent};
use crate::order::Order;
use crate::state::GameState;
use crate::turn::{TurnOrders, TurnTally, considers_ally, volley};
use protocol::{FleetId, WorldId};

pub fn run(state: &mut GameState, bus: &mut EventBus, orders: &TurnOrders, tally: &mut TurnTally) {
    for (player, queued) in orders {
        for entry in queued {
            let Order::Move { fleet, path } = &entry.order else { continue };
            let Some(fleet_ref) = state.fleets.get(fleet) else { continue };
            if !fleet_ref.owned_by(player) || fleet_ref.ships == 0 {
                continue;
            }
            let Some(start) = fleet_ref.location.world() else { continue };
            move_fleet(state, bus, player, *fleet, start, path, tally);
        }
    }
}

fn move_fleet(
    state: &mut GameState,
    bus: &mut EventBus,
    player: &str,
    fleet: FleetId,
    start: WorldId,
    path: &[WorldId],
    tally: &mut TurnTally,
) {
    let mut current = start;
    let mut traveled: Vec<WorldId> = Vec::new();

    for &hop in path {
        if !state.connected(current, hop) {
            break;
        }
        if state.worlds[&hop].is_black_hole {
            bus.publish(GameEvent::BlackHoleDestruction {
                fleet,
                owner: player.to_string(),
                world: hop,
            });
            // Ships and cargo are gone; the key and its artifacts come
            // back somewhere else.
            state.respawn_key(fleet);
            state.fleets.get_mut(&fleet).unwrap().moved = true;
            return;
        }

        {
            let fleet_ref = state.fleets.get_mut(&fleet).unwrap();
            fleet_ref.location = crate::entities::FleetLocation::AtWorld(hop);
            fleet_ref.moved = true;
        }
        traveled.push(hop);
        current = hop;

        if ambush_stops_here(state, bus, player, fleet, hop, tally) {
            break;
        }
        if state.fleets[&fleet].ships == 0 {
            break;
        }
    }

    if !traveled.is_empty() {
        bus.publish(GameEvent::FleetMoved {
            fleet,
            owner: player.to_string(),
            from: start,
            to: current,
            path: traveled,
        });
    }
}

/// Resolves ambushes at the arrival world. Returns true when the
/// remaining path has to be discarded.
fn ambush_stops_here(
    state: &mut GameState,
    bus: &mut EventBus,
    player: &str,
    fleet: FleetId,
    world: WorldId,
    tally: &mut TurnTally,
) -> bool {
    let ambushers: Vec<FleetId> = state
        .fleets
        .values()
        .filter(|f| f.ambushing && !f.at_peace && f.ships > 0)
        .filter(|f| f.location.world() == Some(world))
        .filter(|f| {
            let Some(owner) = f.owner.as_deref() else { return false };
            owner != player
                && !considers_ally(state, owner, player)
                && !f.no_ambush.covers(world)
        })
        .map(|f| f.id)
        .collect();
    if ambushers.is_empty() {
        return false;
    }

    // At-peace arrivals are exempt from the trap, but still stop here.
    if state.fleets[&fleet].at_peace {
        return true;
    }

    let before = state.fleets[&fleet].ships;
    let mut remaining = before;
    let mut report_attackers = Vec::new();
    for ambusher_id in &ambushers {
        if remaining == 0 {
            break;
        }
        // The trap strikes with double effect and takes no return fire.
        let damage = (2 * volley(remaining)).min(remaining);
        remaining -= damage;
        let ambusher = &state.fleets[ambusher_id];
        let owner = ambusher.owner.clone().unwrap_or_default();
        tally.add_ships_destroyed(&owner, damage);
        report_attackers.push(Combatant {
            fleet: *ambusher_id,
            owner,
            ships_before: ambusher.ships,
            losses: 0,
        });
    }
    let destroyed = before - remaining;
    {
        let fleet_ref = state.fleets.get_mut(&fleet).unwrap();
        fleet_ref.ships = remaining;
        fleet_ref.took_fire = true;
    }
    bus.publish(GameEvent::Combat(CombatReport {
        world,
        attackers: report_attackers,
        defenders: vec![Combatant {
            fleet,
            owner: player.to_string(),
            ships_before: before,
            losses: destroyed,
        }],
        summary: format!("ambush destroyed {destroyed} arriving ships"),
    }));
    true
}
