//! The resource-moving phases: ship transfers, cargo handling,
//! migration and production. Everything re-checks its preconditions
//! against the live state, because earlier phases may have changed
//! ownership or positions since the order was validated.

use crate::config::GameConfig;
use crate::events::{EventBus, GameEvent};
use crate::order::{ArtifactPlace, Order, TransferTarget};
use crate::state::GameState;
use crate::turn::{TurnOrders, TurnTally};
use protocol::{CharacterType, PopulationKind, WorldId};

/// Phase 3: ship transfers between fleets or into a garrison. Cargo
/// follows the ships proportionally and spills overboard where the
/// destination cannot hold it.
pub fn ship_transfers(
    state: &mut GameState,
    config: &GameConfig,
    bus: &mut EventBus,
    orders: &TurnOrders,
) {
    for (player, queued) in orders {
        for entry in queued {
            let Order::TransferShips { fleet, amount, target } = &entry.order else {
                continue;
            };
            let Some(src) = state.fleets.get(fleet) else { continue };
            if !src.owned_by(player) || src.ships == 0 {
                continue;
            }
            let Some(here) = src.location.world() else { continue };
            let moved = (*amount).min(src.ships);
            let carried =
                (src.cargo as u64 * moved as u64 / src.ships as u64) as u32;

            match target {
                TransferTarget::Fleet(other) => {
                    let Some(dst) = state.fleets.get(other) else { continue };
                    if !dst.owned_by(player) || dst.location.world() != Some(here) {
                        continue;
                    }
                    let per_ship = config.cargo_per_ship(state.players[player].character);
                    {
                        let src = state.fleets.get_mut(fleet).unwrap();
                        src.ships -= moved;
                        src.cargo -= carried;
                    }
                    let dst = state.fleets.get_mut(other).unwrap();
                    dst.ships += moved;
                    dst.cargo += carried;
                    let spill = dst.cargo.saturating_sub(dst.cargo_capacity(per_ship));
                    if spill > 0 {
                        dst.cargo -= spill;
                        bus.publish(GameEvent::CargoJettisoned {
                            fleet: *other,
                            owner: player.clone(),
                            world: here,
                            amount: spill,
                        });
                    }
                }
                TransferTarget::IShips | TransferTarget::PShips => {
                    let Some(world) = state.worlds.get_mut(&here) else { continue };
                    if !world.owned_by(player) {
                        continue;
                    }
                    match target {
                        TransferTarget::IShips => world.iships += moved,
                        _ => world.pships += moved,
                    }
                    let src = state.fleets.get_mut(fleet).unwrap();
                    src.ships -= moved;
                    src.cargo -= carried;
                    if carried > 0 {
                        // Garrisons carry no cargo.
                        bus.publish(GameEvent::CargoJettisoned {
                            fleet: *fleet,
                            owner: player.clone(),
                            world: here,
                            amount: carried,
                        });
                    }
                }
            }

            // The source may have shrunk below its own cargo capacity.
            let per_ship = config.cargo_per_ship(state.players[player].character);
            let src = state.fleets.get_mut(fleet).unwrap();
            let spill = src.cargo.saturating_sub(src.cargo_capacity(per_ship));
            if spill > 0 {
                src.cargo -= spill;
                bus.publish(GameEvent::CargoJettisoned {
                    fleet: *fleet,
                    owner: player.clone(),
                    world: here,
                    amount: spill,
                });
            }
        }
    }
}

/// Phase 5: cargo loading, unloading, jettison, consumer goods, plunder
/// and artifact transfers, in queue order per player.
pub fn cargo(
    state: &mut GameState,
    config: &GameConfig,
    bus: &mut EventBus,
    orders: &TurnOrders,
    tally: &mut TurnTally,
) {
    for (player, queued) in orders {
        for entry in queued {
            match &entry.order {
                Order::LoadCargo { fleet, amount } => {
                    load_cargo(state, config, player, *fleet, *amount);
                }
                Order::UnloadCargo { fleet, amount } => {
                    unload_cargo(state, player, *fleet, *amount, tally);
                }
                Order::JettisonCargo { fleet, amount } => {
                    let Some(fleet_ref) = state.fleets.get_mut(fleet) else { continue };
                    if !fleet_ref.owned_by(player) {
                        continue;
                    }
                    let Some(here) = fleet_ref.location.world() else { continue };
                    let dumped = amount.unwrap_or(fleet_ref.cargo).min(fleet_ref.cargo);
                    if dumped == 0 {
                        continue;
                    }
                    fleet_ref.cargo -= dumped;
                    bus.publish(GameEvent::CargoJettisoned {
                        fleet: *fleet,
                        owner: player.clone(),
                        world: here,
                        amount: dumped,
                    });
                }
                Order::UnloadConsumerGoods { fleet, amount } => {
                    let Some(fleet_ref) = state.fleets.get(fleet) else { continue };
                    if !fleet_ref.owned_by(player) {
                        continue;
                    }
                    let Some(here) = fleet_ref.location.world() else { continue };
                    let world = &state.worlds[&here];
                    let foreign = matches!(&world.owner, Some(owner) if owner != player);
                    if !foreign {
                        continue;
                    }
                    let delivered = amount
                        .unwrap_or(fleet_ref.cargo)
                        .min(fleet_ref.cargo)
                        .min(world.industry * 2);
                    if delivered == 0 {
                        continue;
                    }
                    state.fleets.get_mut(fleet).unwrap().cargo -= delivered;
                    tally.consumer_unloads.push((player.clone(), here));
                }
                Order::Plunder { fleet, amount } => {
                    let Some(fleet_ref) = state.fleets.get(fleet) else { continue };
                    if !fleet_ref.owned_by(player) || fleet_ref.ships == 0 {
                        continue;
                    }
                    let Some(here) = fleet_ref.location.world() else { continue };
                    let per_ship = config.cargo_per_ship(state.players[player].character);
                    let free = fleet_ref
                        .cargo_capacity(per_ship)
                        .saturating_sub(fleet_ref.cargo);
                    let world = state.worlds.get_mut(&here).unwrap();
                    if !matches!(&world.owner, Some(owner) if owner != player) {
                        continue;
                    }
                    let taken = (*amount).min(world.metal).min(free);
                    if taken == 0 {
                        continue;
                    }
                    world.metal -= taken;
                    state.fleets.get_mut(fleet).unwrap().cargo += taken;
                    bus.publish(GameEvent::PlunderOccurred {
                        world: here,
                        by: player.clone(),
                        amount: taken,
                    });
                    tally.plunders.push((player.clone(), here));
                }
                Order::TransferArtifact { from, from_world, artifact, to } => {
                    transfer_artifact(state, bus, player, from, *from_world, *artifact, to);
                }
                _ => {}
            }
        }
    }
}

fn load_cargo(
    state: &mut GameState,
    config: &GameConfig,
    player: &str,
    fleet: protocol::FleetId,
    amount: Option<u32>,
) {
    let Some(fleet_ref) = state.fleets.get(&fleet) else { return };
    if !fleet_ref.owned_by(player) || fleet_ref.ships == 0 {
        return;
    }
    let Some(here) = fleet_ref.location.world() else { return };
    let world = &state.worlds[&here];
    if let Some(owner) = &world.owner
        && owner != player
        && !state.players[owner].relation(player).loader
    {
        return;
    }
    let per_ship = config.cargo_per_ship(state.players[player].character);
    let free = fleet_ref
        .cargo_capacity(per_ship)
        .saturating_sub(fleet_ref.cargo);
    let loaded = amount.unwrap_or(free).min(free).min(world.population);
    if loaded == 0 {
        return;
    }
    let world = state.worlds.get_mut(&here).unwrap();
    world.population -= loaded;
    world.converts = world.converts.min(world.population);
    state.fleets.get_mut(&fleet).unwrap().cargo += loaded;
}

fn unload_cargo(
    state: &mut GameState,
    player: &str,
    fleet: protocol::FleetId,
    amount: Option<u32>,
    tally: &mut TurnTally,
) {
    let Some(fleet_ref) = state.fleets.get(&fleet) else { return };
    if !fleet_ref.owned_by(player) {
        return;
    }
    let Some(here) = fleet_ref.location.world() else { return };
    let world = &state.worlds[&here];
    let room = world.limit.saturating_sub(world.population);
    let unloaded = amount.unwrap_or(fleet_ref.cargo).min(fleet_ref.cargo).min(room);
    if unloaded == 0 {
        return;
    }
    let foreign_owner = world.owner.clone().filter(|owner| owner != player);
    let industry_cap = world.industry * 2;
    state.fleets.get_mut(&fleet).unwrap().cargo -= unloaded;
    let world = state.worlds.get_mut(&here).unwrap();
    world.population += unloaded;

    // Deliveries to another player's world count for Merchant scoring,
    // capped per turn by the recipient's industry.
    if foreign_owner.is_some() && state.players[player].character == CharacterType::Merchant {
        let scored_so_far = tally
            .deliveries
            .get(&(player.to_string(), here))
            .copied()
            .unwrap_or(0);
        let scored = unloaded.min(industry_cap.saturating_sub(scored_so_far));
        if scored > 0 {
            *tally
                .deliveries
                .entry((player.to_string(), here))
                .or_default() += scored;
        }
    }
}

fn transfer_artifact(
    state: &mut GameState,
    bus: &mut EventBus,
    player: &str,
    from: &ArtifactPlace,
    from_world: Option<WorldId>,
    artifact: u16,
    to: &ArtifactPlace,
) {
    // Resolve and detach from the source first.
    let here = match from {
        ArtifactPlace::Fleet(src) => {
            let Some(fleet_ref) = state.fleets.get(src) else { return };
            if !fleet_ref.owned_by(player) || !fleet_ref.artifacts.contains(&artifact) {
                return;
            }
            let Some(here) = fleet_ref.location.world() else { return };
            here
        }
        ArtifactPlace::LocalWorld => {
            let Some(world) = from_world else { return };
            let Some(world_ref) = state.worlds.get(&world) else { return };
            if !world_ref.owned_by(player) || !world_ref.artifacts.contains(&artifact) {
                return;
            }
            world
        }
    };
    let attached = match to {
        ArtifactPlace::Fleet(dst) => {
            let Some(dst_ref) = state.fleets.get_mut(dst) else { return };
            if dst_ref.location.world() != Some(here) {
                return;
            }
            dst_ref.artifacts.insert(artifact)
        }
        ArtifactPlace::LocalWorld => state
            .worlds
            .get_mut(&here)
            .unwrap()
            .artifacts
            .insert(artifact),
    };
    if !attached {
        return;
    }
    match from {
        ArtifactPlace::Fleet(src) => {
            state.fleets.get_mut(src).unwrap().artifacts.remove(&artifact);
        }
        ArtifactPlace::LocalWorld => {
            state
                .worlds
                .get_mut(&from_world.unwrap())
                .unwrap()
                .artifacts
                .remove(&artifact);
        }
    }
    let name = state.artifacts[&artifact].name.clone();
    bus.publish(GameEvent::ArtifactTransferred {
        artifact,
        name,
        owner: player.to_string(),
        world: here,
    });
}

/// Phase 6: population migration along one outbound edge per source
/// world. Robots kill on arrival, converts travel as converts, and the
/// mover gains sight of the destination.
pub fn migration(
    state: &mut GameState,
    config: &GameConfig,
    orders: &TurnOrders,
    tally: &mut TurnTally,
) {
    for (player, queued) in orders {
        for entry in queued {
            let (world, amount, target, converts_only) = match &entry.order {
                Order::Migrate { world, amount, target } => (*world, *amount, *target, false),
                Order::MigrateConverts { world, amount, target } => {
                    (*world, *amount, *target, true)
                }
                _ => continue,
            };
            if !state.connected(world, target) {
                continue;
            }
            let Some(src) = state.worlds.get(&world) else { continue };
            if !src.owned_by(player) {
                continue;
            }
            let cost = config.game.costs.migration;
            let affordable = [
                (src.industry, cost.industry),
                (src.metal, cost.metal),
            ]
            .iter()
            .map(|(have, per)| if *per == 0 { u32::MAX } else { have / per })
            .min()
            .unwrap_or(u32::MAX);
            let pool = if converts_only { src.converts } else { src.population };
            let dst = &state.worlds[&target];
            if dst.is_black_hole {
                continue;
            }
            let room = dst.limit.saturating_sub(dst.population);
            let migrants = amount.min(pool).min(affordable).min(room);
            if migrants == 0 {
                continue;
            }
            let robots = state.worlds[&world].population_kind == PopulationKind::Robot
                && state.players[player].character == CharacterType::Berserker;

            {
                let src = state.worlds.get_mut(&world).unwrap();
                src.industry -= cost.industry * migrants;
                src.metal -= cost.metal * migrants;
                src.population -= migrants;
                if converts_only {
                    src.converts -= migrants;
                }
                src.converts = src.converts.min(src.population);
            }

            if robots {
                // Robot arrivals wipe the organic population they meet.
                let organic = {
                    let dst = &state.worlds[&target];
                    if dst.population_kind == PopulationKind::Robot { 0 } else { dst.population }
                };
                super::kill_population(state, target, organic, player, tally);
                let dst = state.worlds.get_mut(&target).unwrap();
                dst.population += migrants;
                dst.population_kind = PopulationKind::Robot;
                dst.converts = 0;
            } else {
                let dst = state.worlds.get_mut(&target).unwrap();
                dst.population += migrants;
                if converts_only {
                    dst.converts += migrants;
                }
            }
            state.add_sighting(player, target);
        }
    }
}

/// Probes ride with the migration phase: an owned neighbor world spends
/// one industry and one metal, the target becomes visible this turn.
pub fn probes(state: &mut GameState, orders: &TurnOrders) {
    for (player, queued) in orders {
        for entry in queued {
            let Order::Probe { world } = &entry.order else { continue };
            if !state.worlds.contains_key(world) {
                continue;
            }
            let launch_site = state
                .worlds
                .values()
                .find(|w| {
                    w.owned_by(player)
                        && w.connections.contains(world)
                        && w.industry >= 1
                        && w.metal >= 1
                })
                .map(|w| w.id);
            let Some(site) = launch_site else { continue };
            let site = state.worlds.get_mut(&site).unwrap();
            site.industry -= 1;
            site.metal -= 1;
            state.add_sighting(player, *world);
        }
    }
}

/// Phase 10: production on every owned world: metal from effective
/// mines, growth towards the limit, Apostle conversion drift.
pub fn production(state: &mut GameState, config: &GameConfig, bus: &mut EventBus) {
    let ids: Vec<WorldId> = state.worlds.keys().copied().collect();
    for id in ids {
        let Some(owner) = state.worlds[&id].owner.clone() else { continue };
        let apostle = state.players[&owner].character == CharacterType::Apostle;
        let world = state.worlds.get_mut(&id).unwrap();

        let effective_industry = world.industry.min(world.population);
        let effective_mines = world.mines.min(effective_industry);
        let metal = effective_mines * config.game.metal_per_mine;
        world.metal += metal;

        // Robots do not breed.
        let grown = if world.population_kind == PopulationKind::Robot {
            0
        } else {
            let grown = (world.population as f64 * config.game.growth_rate).floor() as u32;
            let grown = grown.min(world.limit.saturating_sub(world.population));
            world.population += grown;
            grown
        };

        if apostle && world.population > 0 && world.population_kind != PopulationKind::Robot {
            let drift = (world.population / 10).max(1);
            let converted = drift.min(world.population - world.converts);
            if converted > 0 {
                world.converts += converted;
                if world.converts == world.population {
                    world.population_kind = PopulationKind::Convert;
                }
                bus.publish(GameEvent::ConversionOccurred { world: id, converts: converted });
            }
        }

        if metal > 0 || grown > 0 {
            bus.publish(GameEvent::Production { world: id, owner, metal, grown });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::FleetLocation;
    use crate::turn::testkit::*;
    use protocol::CharacterType;

    #[test]
    fn transfer_moves_cargo_proportionally_and_spills_the_rest() {
        let (mut state, config) = game(&[("Alice", CharacterType::Merchant)]);
        let home = state.players["Alice"].homeworld;
        let fleets: Vec<_> = state
            .fleets
            .values()
            .filter(|f| f.owned_by("Alice"))
            .map(|f| f.id)
            .collect();
        let (src, dst) = (fleets[0], fleets[1]);
        {
            let fleet = state.fleets.get_mut(&src).unwrap();
            fleet.ships = 10;
            fleet.cargo = 9;
            let fleet = state.fleets.get_mut(&dst).unwrap();
            fleet.ships = 1;
            fleet.cargo = 2; // merchant capacity per ship is 2
        }
        queue(
            &mut state,
            "Alice",
            Order::TransferShips { fleet: src, amount: 4, target: TransferTarget::Fleet(dst) },
        );
        run_turn(&mut state, &config);
        // floor(9 * 4 / 10) = 3 cargo follow the four ships.
        assert_eq!(state.fleets[&src].ships, 6);
        assert_eq!(state.fleets[&src].cargo, 6);
        let dst_ref = &state.fleets[&dst];
        assert_eq!(dst_ref.ships, 5);
        // 2 + 3 = 5 fits into 5 ships * 2.
        assert_eq!(dst_ref.cargo, 5);
        assert_eq!(state.worlds[&home].iships, 0);
    }

    #[test]
    fn garrison_transfer_claims_no_cargo() {
        let (mut state, config) = game(&[("Alice", CharacterType::Merchant)]);
        let home = state.players["Alice"].homeworld;
        let fleet = fleet_of(&state, "Alice");
        {
            let fleet_ref = state.fleets.get_mut(&fleet).unwrap();
            fleet_ref.ships = 10;
            fleet_ref.cargo = 10;
        }
        queue(
            &mut state,
            "Alice",
            Order::TransferShips { fleet, amount: 10, target: TransferTarget::PShips },
        );
        let outcome = run_turn(&mut state, &config);
        assert_eq!(state.worlds[&home].pships, 10);
        let fleet_ref = &state.fleets[&fleet];
        assert_eq!(fleet_ref.ships, 0);
        // All cargo went overboard with the ships.
        assert_eq!(fleet_ref.cargo, 0);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::CargoJettisoned { .. })));
    }

    #[test]
    fn load_caps_at_capacity_and_population() {
        let (mut state, config) = game(&[("Alice", CharacterType::Pirate)]);
        let home = state.players["Alice"].homeworld;
        let fleet = fleet_of(&state, "Alice");
        state.fleets.get_mut(&fleet).unwrap().ships = 5; // pirate: capacity 5
        state.worlds.get_mut(&home).unwrap().population = 3;
        queue(&mut state, "Alice", Order::LoadCargo { fleet, amount: None });
        run_turn(&mut state, &config);
        assert_eq!(state.fleets[&fleet].cargo, 3);
        assert_eq!(state.worlds[&home].population, 0);
    }

    #[test]
    fn unload_caps_at_the_population_limit() {
        let (mut state, config) = game(&[("Alice", CharacterType::Pirate)]);
        let home = state.players["Alice"].homeworld;
        let fleet = fleet_of(&state, "Alice");
        {
            let fleet_ref = state.fleets.get_mut(&fleet).unwrap();
            fleet_ref.ships = 20;
            fleet_ref.cargo = 20;
        }
        {
            let world = state.worlds.get_mut(&home).unwrap();
            world.population = 45;
            world.limit = 50;
        }
        queue(&mut state, "Alice", Order::UnloadCargo { fleet, amount: None });
        run_turn(&mut state, &config);
        assert_eq!(state.worlds[&home].population, 50);
        assert_eq!(state.fleets[&fleet].cargo, 15);
    }

    #[test]
    fn plunder_fills_free_cargo_space_from_foreign_metal() {
        let (mut state, config) = game(&[
            ("Alice", CharacterType::Pirate),
            ("Bob", CharacterType::Merchant),
        ]);
        let bob_home = state.players["Bob"].homeworld;
        let fleet = fleet_of(&state, "Alice");
        {
            let fleet_ref = state.fleets.get_mut(&fleet).unwrap();
            fleet_ref.ships = 4;
            fleet_ref.cargo = 0;
            fleet_ref.location = FleetLocation::AtWorld(bob_home);
        }
        state.worlds.get_mut(&bob_home).unwrap().metal = 50;
        queue(&mut state, "Alice", Order::Plunder { fleet, amount: 10 });
        let outcome = run_turn(&mut state, &config);
        // Capacity 4 bounds the haul.
        assert_eq!(state.fleets[&fleet].cargo, 4);
        assert_eq!(state.worlds[&bob_home].metal, 46);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::PlunderOccurred { amount: 4, .. })));
    }

    #[test]
    fn migration_costs_resources_and_grants_sight() {
        let (mut state, config) = game(&[("Alice", CharacterType::Merchant)]);
        let home = state.players["Alice"].homeworld;
        let neighbor = *state.worlds[&home].connections.iter().next().unwrap();
        {
            let world = state.worlds.get_mut(&home).unwrap();
            world.population = 20;
            world.industry = 10;
            world.metal = 4;
        }
        let before_target = state.worlds[&neighbor].population;
        queue(&mut state, "Alice", Order::Migrate { world: home, amount: 10, target: neighbor });
        run_turn(&mut state, &config);
        // Metal is the binding constraint: four migrants.
        let room = state.worlds[&neighbor].limit - before_target;
        let expected = 4.min(room);
        assert_eq!(state.worlds[&neighbor].population, before_target + expected);
        assert_eq!(state.worlds[&home].population, 20 - expected);
        // The destination was seen this turn, so it is in the remembered set.
        assert!(state.players["Alice"].known_worlds.contains_key(&neighbor));
    }

    #[test]
    fn a_probe_buys_one_turn_of_sight() {
        let (mut state, config) = game(&[("Alice", CharacterType::Merchant)]);
        let home = state.players["Alice"].homeworld;
        let target = *state.worlds[&home].connections.iter().next().unwrap();
        {
            let world = state.worlds.get_mut(&home).unwrap();
            world.industry = 5;
            world.metal = 5;
            world.mines = 0;
        }
        queue(&mut state, "Alice", Order::Probe { world: target });
        run_turn(&mut state, &config);
        // The launch site paid for it, and the target was seen this turn.
        assert_eq!(state.worlds[&home].industry, 4);
        assert!(state.players["Alice"].known_worlds.contains_key(&target));
        // The sighting does not persist into the next turn.
        assert!(state.extra_sightings.is_empty());
    }

    #[test]
    fn production_uses_effective_industry_and_respects_the_limit() {
        let (mut state, config) = game(&[("Alice", CharacterType::Merchant)]);
        let home = state.players["Alice"].homeworld;
        {
            let world = state.worlds.get_mut(&home).unwrap();
            world.population = 4;
            world.industry = 10;
            world.mines = 7;
            world.metal = 0;
            world.limit = 50;
        }
        let mut bus = crate::events::EventBus::default();
        production(&mut state, &config, &mut bus);
        let world = &state.worlds[&home];
        // Effective industry 4 bounds the mines.
        assert_eq!(world.metal, 4 * config.game.metal_per_mine);
        // 10% growth of 4 floors to zero.
        assert_eq!(world.population, 4);
    }
}
