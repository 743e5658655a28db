//! Phase 7 and 9: stance flags, the fire phase and planet-buster
//! strikes. Fleet-versus-fleet fire is simultaneous: every volley is
//! computed from the ship counts at the start of the phase, then all
//! damage lands at once. Conditional fire and robot assaults resolve
//! afterwards on the surviving ships.

use crate::entities::AmbushExemption;
use crate::events::{Combatant, CombatReport, EventBus, GameEvent};
use crate::order::{FireTarget, Order};
use crate::state::GameState;
use crate::turn::{TurnOrders, TurnTally, kill_population, volley};
use protocol::{FleetId, PlayerName};
use std::collections::BTreeMap;

/// Applies the stance orders: peace, ambush, no-ambush scopes and
/// conditional-fire arming. Runs right before the fire phase.
pub fn stances(state: &mut GameState, orders: &TurnOrders) {
    for (player, queued) in orders {
        for entry in queued {
            match &entry.order {
                Order::Peace { fleet } => {
                    if let Some(f) = state.fleets.get_mut(fleet)
                        && f.owned_by(player)
                    {
                        f.at_peace = true;
                    }
                }
                Order::NotPeace { fleet } => {
                    if let Some(f) = state.fleets.get_mut(fleet)
                        && f.owned_by(player)
                    {
                        f.at_peace = false;
                    }
                }
                Order::Ambush { fleet } => {
                    if let Some(f) = state.fleets.get_mut(fleet)
                        && f.owned_by(player)
                        && f.ships > 0
                    {
                        f.ambushing = true;
                    }
                }
                Order::ConditionalFire { fleet, target } => {
                    if let Some(f) = state.fleets.get_mut(fleet)
                        && f.owned_by(player)
                        && f.ships > 0
                    {
                        f.conditional_target = Some(*target);
                    }
                }
                Order::NoAmbush { world } => {
                    // The scope covers every fleet of the player.
                    for f in state.fleets.values_mut() {
                        if !f.owned_by(player) {
                            continue;
                        }
                        match world {
                            None => f.no_ambush = AmbushExemption::Everywhere,
                            Some(world) => match &mut f.no_ambush {
                                AmbushExemption::Everywhere => {}
                                AmbushExemption::AtWorlds(set) => {
                                    set.insert(*world);
                                }
                                spot @ AmbushExemption::None => {
                                    *spot =
                                        AmbushExemption::AtWorlds([*world].into_iter().collect());
                                }
                            },
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Phase 7 proper: direct fire, then conditional triggers, then robot
/// assaults.
pub fn fire_phase(
    state: &mut GameState,
    bus: &mut EventBus,
    orders: &TurnOrders,
    tally: &mut TurnTally,
) {
    // Ship counts at the start of the phase decide every first volley.
    let opening: BTreeMap<FleetId, u32> =
        state.fleets.values().map(|f| (f.id, f.ships)).collect();

    // Incoming fleet damage, attackers in traversal order.
    let mut incoming: BTreeMap<FleetId, Vec<(PlayerName, FleetId, u32)>> = BTreeMap::new();
    let mut world_fire: Vec<(PlayerName, FleetId, FireTarget)> = Vec::new();

    for (player, queued) in orders {
        for entry in queued {
            match &entry.order {
                Order::FireAtFleet { fleet, target } => {
                    let Some(attacker) = state.fleets.get(fleet) else { continue };
                    if !attacker.owned_by(player) || attacker.ships == 0 {
                        continue;
                    }
                    let Some(here) = attacker.location.world() else { continue };
                    let Some(victim) = state.fleets.get(target) else { continue };
                    if victim.location.world() != Some(here) || victim.owned_by(player) {
                        continue;
                    }
                    incoming.entry(*target).or_default().push((
                        player.clone(),
                        *fleet,
                        volley(opening[fleet]),
                    ));
                }
                Order::FireAtTarget { fleet, target } => {
                    world_fire.push((player.clone(), *fleet, *target));
                }
                _ => {}
            }
        }
    }

    apply_fleet_damage(state, bus, &incoming, tally);

    for (player, fleet, target) in world_fire {
        let shots = {
            let Some(attacker) = state.fleets.get(&fleet) else { continue };
            if !attacker.owned_by(&player) || opening.get(&fleet).copied().unwrap_or(0) == 0 {
                continue;
            }
            volley(opening[&fleet])
        };
        resolve_world_fire(state, bus, &player, fleet, target, shots, tally);
    }

    // Conditional fire: armed fleets that took fire answer with their
    // surviving ships.
    let armed: Vec<(PlayerName, FleetId, FireTarget)> = state
        .fleets
        .values()
        .filter(|f| f.took_fire && f.ships > 0)
        .filter_map(|f| {
            let owner = f.owner.clone()?;
            let target = f.conditional_target?;
            Some((owner, f.id, target))
        })
        .collect();
    for (player, fleet, target) in armed {
        let ships = state.fleets[&fleet].ships;
        if ships == 0 {
            continue;
        }
        match target {
            FireTarget::Fleet(victim) => {
                let here = state.fleets[&fleet].location.world();
                let valid = state
                    .fleets
                    .get(&victim)
                    .map(|v| v.location.world() == here && !v.owned_by(&player))
                    .unwrap_or(false);
                if !valid {
                    continue;
                }
                let hits: BTreeMap<FleetId, Vec<(PlayerName, FleetId, u32)>> =
                    [(victim, vec![(player.clone(), fleet, volley(ships))])]
                        .into_iter()
                        .collect();
                apply_fleet_damage(state, bus, &hits, tally);
            }
            other => {
                resolve_world_fire(state, bus, &player, fleet, other, volley(ships), tally);
            }
        }
    }

    robot_assaults(state, bus, orders, tally);
}

/// Lands all collected fleet-vs-fleet damage at once.
fn apply_fleet_damage(
    state: &mut GameState,
    bus: &mut EventBus,
    incoming: &BTreeMap<FleetId, Vec<(PlayerName, FleetId, u32)>>,
    tally: &mut TurnTally,
) {
    for (victim_id, hits) in incoming {
        let Some(victim) = state.fleets.get(victim_id) else { continue };
        let victim_owner = victim.owner.clone().unwrap_or_default();
        let before = victim.ships;
        let total: u32 = hits.iter().map(|(_, _, dmg)| dmg).sum();
        let destroyed = total.min(before);
        {
            let victim = state.fleets.get_mut(victim_id).unwrap();
            victim.ships -= destroyed;
            victim.took_fire = true;
        }
        // Attribute destroyed ships to the attackers in volley order.
        let mut pool = destroyed;
        let mut attackers = Vec::new();
        for (player, fleet, damage) in hits {
            let credited = pool.min(*damage);
            pool -= credited;
            tally.add_ships_destroyed(player, credited);
            attackers.push(Combatant {
                fleet: *fleet,
                owner: player.clone(),
                ships_before: state.fleets[fleet].ships,
                losses: 0,
            });
        }
        let world = state.fleets[victim_id].location.world().unwrap_or_default();
        bus.publish(GameEvent::Combat(CombatReport {
            world,
            attackers,
            defenders: vec![Combatant {
                fleet: *victim_id,
                owner: victim_owner,
                ships_before: before,
                losses: destroyed,
            }],
            summary: format!("fleet {victim_id} lost {destroyed} ships"),
        }));
    }
}

/// One fleet firing at a world-side target: the matching garrison
/// soaks the volley first, the rest reaches the stated target.
fn resolve_world_fire(
    state: &mut GameState,
    bus: &mut EventBus,
    player: &str,
    fleet: FleetId,
    target: FireTarget,
    shots: u32,
    tally: &mut TurnTally,
) {
    let Some(attacker) = state.fleets.get(&fleet) else { return };
    let Some(here) = attacker.location.world() else { return };
    let world = &state.worlds[&here];
    if world.owned_by(player) {
        return;
    }
    let ships_before = attacker.ships;

    let summary = match target {
        FireTarget::Industry => {
            let world = state.worlds.get_mut(&here).unwrap();
            let garrison = shots.min(world.iships);
            world.iships -= garrison;
            let damage = (shots - garrison).min(world.industry);
            world.industry -= damage;
            tally.add_ships_destroyed(player, garrison);
            format!("{garrison} iships and {damage} industry destroyed")
        }
        FireTarget::Population => {
            let garrison = {
                let world = state.worlds.get_mut(&here).unwrap();
                let garrison = shots.min(world.pships);
                world.pships -= garrison;
                garrison
            };
            tally.add_ships_destroyed(player, garrison);
            let killed = kill_population(state, here, shots - garrison, player, tally);
            format!("{garrison} pships destroyed, {killed} population killed")
        }
        FireTarget::Converts => {
            let convert_pool = state.worlds[&here].converts;
            let killed = kill_population(state, here, shots.min(convert_pool), player, tally);
            format!("{killed} converts killed")
        }
        FireTarget::Homeworld => {
            if !state.worlds[&here].is_homeworld() {
                return;
            }
            let Some(owner) = state.worlds[&here].owner.clone() else { return };
            let defending: Vec<FleetId> = state
                .fleets
                .values()
                .filter(|f| f.owner.as_deref() == Some(owner.as_str()))
                .filter(|f| f.location.world() == Some(here) && f.ships > 0)
                .map(|f| f.id)
                .collect();
            let mut remaining = shots;
            let mut destroyed = 0;
            for id in defending {
                if remaining == 0 {
                    break;
                }
                let defender = state.fleets.get_mut(&id).unwrap();
                let hit = remaining.min(defender.ships);
                defender.ships -= hit;
                defender.took_fire = true;
                remaining -= hit;
                destroyed += hit;
            }
            tally.add_ships_destroyed(player, destroyed);
            format!("{destroyed} homeworld defenders destroyed")
        }
        FireTarget::Fleet(_) => return,
    };

    bus.publish(GameEvent::Combat(CombatReport {
        world: here,
        attackers: vec![Combatant {
            fleet,
            owner: player.to_string(),
            ships_before,
            losses: 0,
        }],
        defenders: Vec::new(),
        summary,
    }));
}

/// Berserker robot assaults: cargo robots thrown at the local organic
/// population.
fn robot_assaults(
    state: &mut GameState,
    bus: &mut EventBus,
    orders: &TurnOrders,
    tally: &mut TurnTally,
) {
    for (player, queued) in orders {
        for entry in queued {
            let Order::RobotAttack { fleet, amount } = &entry.order else { continue };
            let Some(fleet_ref) = state.fleets.get(fleet) else { continue };
            if !fleet_ref.owned_by(player) {
                continue;
            }
            let Some(here) = fleet_ref.location.world() else { continue };
            let world = &state.worlds[&here];
            if world.owned_by(player)
                || world.population_kind == protocol::PopulationKind::Robot
            {
                continue;
            }
            let robots = (*amount).min(fleet_ref.cargo);
            if robots == 0 {
                continue;
            }
            state.fleets.get_mut(fleet).unwrap().cargo -= robots;
            let killed = kill_population(state, here, robots, player, tally);
            bus.publish(GameEvent::Combat(CombatReport {
                world: here,
                attackers: vec![Combatant {
                    fleet: *fleet,
                    owner: player.clone(),
                    ships_before: state.fleets[fleet].ships,
                    losses: 0,
                }],
                defenders: Vec::new(),
                summary: format!("robot assault killed {killed} population"),
            }));
        }
    }
}

/// Phase 9: planet-buster strikes wipe population, industry and mines
/// of a non-homeworld target.
pub fn pbb_drops(
    state: &mut GameState,
    bus: &mut EventBus,
    orders: &TurnOrders,
    tally: &mut TurnTally,
) {
    for (player, queued) in orders {
        for entry in queued {
            let Order::DropPbb { fleet } = &entry.order else { continue };
            let Some(fleet_ref) = state.fleets.get(fleet) else { continue };
            if !fleet_ref.owned_by(player) || !fleet_ref.has_pbb {
                continue;
            }
            let Some(here) = fleet_ref.location.world() else { continue };
            if state.worlds[&here].is_homeworld() {
                continue;
            }
            state.fleets.get_mut(fleet).unwrap().has_pbb = false;
            let population = state.worlds[&here].population;
            kill_population(state, here, population, player, tally);
            {
                let world = state.worlds.get_mut(&here).unwrap();
                world.industry = 0;
                world.mines = 0;
            }
            tally.pbb_drops.push((player.clone(), here));
            bus.publish(GameEvent::PbbDropped { world: here, by: player.clone() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::FleetLocation;
    use crate::turn::testkit::*;
    use protocol::{CharacterType, WorldId};

    fn face_off(state: &mut GameState) -> (WorldId, FleetId, FleetId) {
        let arena = state.players["Alice"].homeworld;
        let f1 = fleet_of(state, "Alice");
        let f2 = fleet_of(state, "Bob");
        state.fleets.get_mut(&f2).unwrap().location = FleetLocation::AtWorld(arena);
        (arena, f1, f2)
    }

    #[test]
    fn mutual_fleet_fire_is_simultaneous() {
        let (mut state, config) = game(&[
            ("Alice", CharacterType::Merchant),
            ("Bob", CharacterType::Pirate),
        ]);
        let (_, f1, f2) = face_off(&mut state);
        state.fleets.get_mut(&f1).unwrap().ships = 10;
        state.fleets.get_mut(&f2).unwrap().ships = 6;
        queue(&mut state, "Alice", Order::FireAtFleet { fleet: f1, target: f2 });
        queue(&mut state, "Bob", Order::FireAtFleet { fleet: f2, target: f1 });
        run_turn(&mut state, &config);
        // Both volleys use the opening counts: 10-ceil(6/2) and 6-ceil(10/2).
        assert_eq!(state.fleets[&f1].ships, 7);
        assert_eq!(state.fleets[&f2].ships, 1);
    }

    #[test]
    fn world_fire_hits_the_matching_garrison_first() {
        let (mut state, config) = game(&[
            ("Alice", CharacterType::Merchant),
            ("Bob", CharacterType::Pirate),
        ]);
        let bob_home = state.players["Bob"].homeworld;
        let f1 = fleet_of(&state, "Alice");
        {
            let fleet = state.fleets.get_mut(&f1).unwrap();
            fleet.ships = 12;
            fleet.location = FleetLocation::AtWorld(bob_home);
        }
        // Park Bob's defenders elsewhere so only the garrison answers.
        let spare = state.players["Alice"].homeworld;
        let bob_fleets: Vec<FleetId> = state
            .fleets
            .values()
            .filter(|f| f.owned_by("Bob"))
            .map(|f| f.id)
            .collect();
        for id in bob_fleets {
            state.fleets.get_mut(&id).unwrap().location = FleetLocation::AtWorld(spare);
        }
        {
            let world = state.worlds.get_mut(&bob_home).unwrap();
            world.iships = 4;
            world.industry = 10;
        }
        queue(
            &mut state,
            "Alice",
            Order::FireAtTarget { fleet: f1, target: FireTarget::Industry },
        );
        run_turn(&mut state, &config);
        let world = &state.worlds[&bob_home];
        // ceil(12/2) = 6 shots: 4 into the garrison, 2 into industry.
        assert_eq!(world.iships, 0);
        assert_eq!(world.industry, 8);
    }

    #[test]
    fn conditional_fire_only_answers_when_hit() {
        let (mut state, config) = game(&[
            ("Alice", CharacterType::Merchant),
            ("Bob", CharacterType::Pirate),
        ]);
        let (_, f1, f2) = face_off(&mut state);
        state.fleets.get_mut(&f1).unwrap().ships = 10;
        state.fleets.get_mut(&f2).unwrap().ships = 8;

        // Armed but never hit: nothing happens.
        queue(
            &mut state,
            "Bob",
            Order::ConditionalFire { fleet: f2, target: FireTarget::Fleet(f1) },
        );
        run_turn(&mut state, &config);
        assert_eq!(state.fleets[&f1].ships, 10);
        assert_eq!(state.fleets[&f2].ships, 8);

        // Armed and hit: the survivor answers with its remaining ships.
        queue(&mut state, "Alice", Order::FireAtFleet { fleet: f1, target: f2 });
        queue(
            &mut state,
            "Bob",
            Order::ConditionalFire { fleet: f2, target: FireTarget::Fleet(f1) },
        );
        run_turn(&mut state, &config);
        // f2 drops to 8 - ceil(10/2) = 3, answers with ceil(3/2) = 2.
        assert_eq!(state.fleets[&f2].ships, 3);
        assert_eq!(state.fleets[&f1].ships, 8);
    }

    #[test]
    fn pbb_wipes_everything_but_spares_homeworlds() {
        let (mut state, config) = game(&[
            ("Alice", CharacterType::Berserker),
            ("Bob", CharacterType::Pirate),
        ]);
        let target = state
            .worlds
            .values()
            .find(|w| w.owner.is_none() && !w.is_black_hole && w.population > 0)
            .unwrap()
            .id;
        let f1 = fleet_of(&state, "Alice");
        {
            let fleet = state.fleets.get_mut(&f1).unwrap();
            fleet.has_pbb = true;
            fleet.location = FleetLocation::AtWorld(target);
        }
        queue(&mut state, "Alice", Order::DropPbb { fleet: f1 });
        let outcome = run_turn(&mut state, &config);
        let world = &state.worlds[&target];
        assert_eq!(world.population, 0);
        assert_eq!(world.industry, 0);
        assert_eq!(world.mines, 0);
        assert!(!state.fleets[&f1].has_pbb);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::PbbDropped { .. })));
        // Berserker scoring: 200 per drop plus 2 per kill.
        assert!(state.players["Alice"].score >= 200);
    }
}
