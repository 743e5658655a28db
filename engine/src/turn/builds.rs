//! Phase 4: builds. Every build is capped by the scarcest required
//! resource; garrison builds on neutral worlds are the claim mechanic.
//! Ship scrapping and planet-buster assembly also resolve here.

use crate::config::{GameConfig, ResourceCost};
use crate::entities::World;
use crate::events::{EventBus, GameEvent};
use crate::order::{BuildProduct, Order};
use crate::state::GameState;
use crate::turn::TurnOrders;
use protocol::PopulationKind;

pub fn run(state: &mut GameState, config: &GameConfig, bus: &mut EventBus, orders: &TurnOrders) {
    for (player, queued) in orders {
        for entry in queued {
            match &entry.order {
                Order::Build { world, amount, product } => {
                    build(state, config, bus, player, *world, *amount, *product);
                }
                Order::ScrapShips { world, amount } => {
                    let Some(world_ref) = state.worlds.get_mut(world) else { continue };
                    if !world_ref.owned_by(player) {
                        continue;
                    }
                    let scrapped = scrap(world_ref, *amount, config.game.costs.scrap_metal_per_ship);
                    if scrapped > 0 {
                        bus.publish(GameEvent::Build {
                            world: *world,
                            owner: player.clone(),
                            what: "metal from scrapped ships".into(),
                            amount: scrapped,
                        });
                    }
                }
                Order::BuildPbb { fleet } => {
                    let Some(fleet_ref) = state.fleets.get_mut(fleet) else { continue };
                    if !fleet_ref.owned_by(player)
                        || fleet_ref.has_pbb
                        || fleet_ref.ships < config.game.costs.pbb_min_ships
                    {
                        continue;
                    }
                    fleet_ref.has_pbb = true;
                    if let Some(world) = fleet_ref.location.world() {
                        bus.publish(GameEvent::Build {
                            world,
                            owner: player.clone(),
                            what: "planet buster".into(),
                            amount: 1,
                        });
                    }
                }
                _ => {}
            }
        }
    }
}

/// How many units of `cost` the world can pay for, at most `wanted`.
fn affordable(world: &World, cost: ResourceCost, wanted: u32) -> u32 {
    let mut units = wanted;
    for (have, per) in [
        (world.industry, cost.industry),
        (world.metal, cost.metal),
        (world.population, cost.population),
    ] {
        if per > 0 {
            units = units.min(have / per);
        }
    }
    units
}

fn pay(world: &mut World, cost: ResourceCost, units: u32) {
    world.industry -= cost.industry * units;
    world.metal -= cost.metal * units;
    world.population -= cost.population * units;
    world.converts = world.converts.min(world.population);
}

fn build(
    state: &mut GameState,
    config: &GameConfig,
    bus: &mut EventBus,
    player: &str,
    world: protocol::WorldId,
    amount: u32,
    product: BuildProduct,
) {
    let Some(world_ref) = state.worlds.get(&world) else { return };
    // The site must still be the player's, or unclaimed.
    if matches!(&world_ref.owner, Some(owner) if owner != player) {
        return;
    }
    let mods = config.character_mods(state.players[player].character);
    let costs = config.game.costs;

    let (cost, what) = match product {
        BuildProduct::IShips => (costs.ship, "iships"),
        BuildProduct::PShips => (costs.ship, "pships"),
        BuildProduct::ToFleet(_) => (costs.ship, "ships"),
        BuildProduct::Industry => (costs.industry_unit.discounted(mods.industry_bonus), "industry"),
        BuildProduct::Limit => (costs.limit_unit.discounted(mods.industry_bonus), "limit"),
        BuildProduct::Robots => (costs.robot_unit, "robots"),
    };

    // Per-product preconditions that may have changed since validation.
    match product {
        BuildProduct::ToFleet(target) => {
            let ok = state
                .fleets
                .get(&target)
                .map(|f| f.owned_by(player) && f.location.world() == Some(world))
                .unwrap_or(false);
            if !ok {
                return;
            }
        }
        BuildProduct::Robots => {
            if world_ref.population > 0 && world_ref.population_kind != PopulationKind::Robot {
                return;
            }
        }
        _ => {}
    }

    let units = affordable(world_ref, cost, amount);
    if units == 0 {
        return;
    }
    let was_neutral = world_ref.owner.is_none();
    let world_mut = state.worlds.get_mut(&world).unwrap();
    pay(world_mut, cost, units);

    let built = match product {
        BuildProduct::IShips => {
            world_mut.iships += units;
            units
        }
        BuildProduct::PShips => {
            world_mut.pships += units;
            units
        }
        BuildProduct::ToFleet(target) => {
            state.fleets.get_mut(&target).unwrap().ships += units;
            units
        }
        BuildProduct::Industry => {
            world_mut.industry += units;
            units
        }
        BuildProduct::Limit => {
            world_mut.limit += units;
            units
        }
        BuildProduct::Robots => {
            let robots = (units * config.game.costs.robot_yield)
                .min(world_mut.limit.saturating_sub(world_mut.population));
            world_mut.population += robots;
            world_mut.population_kind = PopulationKind::Robot;
            world_mut.converts = 0;
            robots
        }
    };

    // A garrison on a neutral world claims it.
    if was_neutral && matches!(product, BuildProduct::IShips | BuildProduct::PShips) {
        state.worlds.get_mut(&world).unwrap().owner = Some(player.to_string());
        bus.publish(GameEvent::WorldCaptured {
            world,
            new_owner: Some(player.to_string()),
            old_owner: None,
        });
    }

    bus.publish(GameEvent::Build {
        world,
        owner: player.to_string(),
        what: what.into(),
        amount: built,
    });
}

fn scrap(world: &mut World, amount: u32, metal_per_ship: u32) -> u32 {
    let from_iships = amount.min(world.iships);
    world.iships -= from_iships;
    let from_pships = (amount - from_iships).min(world.pships);
    world.pships -= from_pships;
    let scrapped = from_iships + from_pships;
    world.metal += scrapped * metal_per_ship;
    scrapped
}
