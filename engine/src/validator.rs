//! Semantic validation of parsed orders against the current state.
//! Every check goes through the shared predicates below so the error
//! texts stay uniform. On success the normalized order text is
//! returned, which is what the queued-order list shows.

use crate::config::{GameConfig, ResourceCost};
use crate::entities::{Fleet, World};
use crate::order::{ArtifactPlace, BuildProduct, FireTarget, Order, RelationChange, TransferTarget};
use crate::state::GameState;
use crate::errors::ValidationError;
use protocol::{CharacterType, FleetId, PopulationKind, WorldId};

type Check<T> = Result<T, ValidationError>;

fn fleet_exists(state: &GameState, id: FleetId) -> Check<&Fleet> {
    state
        .fleets
        .get(&id)
        .ok_or(ValidationError::NoSuchFleet(id))
}

fn owned_fleet<'a>(state: &'a GameState, player: &str, id: FleetId) -> Check<&'a Fleet> {
    let fleet = fleet_exists(state, id)?;
    if !fleet.owned_by(player) {
        return Err(ValidationError::NotYourFleet(id));
    }
    Ok(fleet)
}

fn fleet_nonempty(fleet: &Fleet) -> Check<()> {
    if fleet.ships == 0 {
        return Err(ValidationError::EmptyFleet(fleet.id));
    }
    Ok(())
}

fn fleet_world(fleet: &Fleet) -> Check<WorldId> {
    fleet
        .location
        .world()
        .ok_or(ValidationError::FleetInTransit(fleet.id))
}

fn world_exists(state: &GameState, id: WorldId) -> Check<&World> {
    state
        .worlds
        .get(&id)
        .ok_or(ValidationError::NoSuchWorld(id))
}

fn owned_world<'a>(state: &'a GameState, player: &str, id: WorldId) -> Check<&'a World> {
    let world = world_exists(state, id)?;
    if !world.owned_by(player) {
        return Err(ValidationError::NotYourWorld(id));
    }
    Ok(world)
}

fn worlds_connected(state: &GameState, from: WorldId, to: WorldId) -> Check<()> {
    world_exists(state, to)?;
    if !state.connected(from, to) {
        return Err(ValidationError::NotConnected(from, to));
    }
    Ok(())
}

fn same_location(state: &GameState, fleet: &Fleet, world: WorldId) -> Check<()> {
    if fleet_world(fleet)? != world {
        return Err(ValidationError::NotAtWorld(fleet.id, world));
    }
    world_exists(state, world)?;
    Ok(())
}

fn known_player(state: &GameState, player: &str, name: &str) -> Check<String> {
    let canonical = state
        .canonical_name(name)
        .ok_or_else(|| ValidationError::NoSuchPlayer(name.to_string()))?;
    if canonical.eq_ignore_ascii_case(player) {
        return Err(ValidationError::SelfTarget);
    }
    Ok(canonical)
}

fn requires_character(
    state: &GameState,
    player: &str,
    wanted: CharacterType,
    label: &'static str,
) -> Check<()> {
    let actual = state.players[player].character;
    if actual != wanted {
        return Err(ValidationError::WrongCharacter(label));
    }
    Ok(())
}

fn no_exclusive_clash(state: &GameState, player: &str, fleet: FleetId) -> Check<()> {
    if state.players[player].orders.has_exclusive_order(fleet) {
        return Err(ValidationError::ExclusiveOrderClash(fleet));
    }
    Ok(())
}

/// Checks one order against the current state for `player`. Returns the
/// normalized order text on success.
pub fn validate(
    state: &GameState,
    config: &GameConfig,
    player: &str,
    order: &Order,
) -> Check<String> {
    match order {
        Order::Move { fleet, path } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_nonempty(fleet_ref)?;
            no_exclusive_clash(state, player, *fleet)?;
            if path.is_empty() {
                return Err(ValidationError::Other("Empty movement path".into()));
            }
            let mut from = fleet_world(fleet_ref)?;
            for &hop in path {
                worlds_connected(state, from, hop)?;
                from = hop;
            }
        }
        Order::Build { world, amount, product } => {
            let world_ref = validate_build_site(state, player, *world)?;
            if *amount == 0 {
                return Err(ValidationError::Other("Nothing to build".into()));
            }
            match product {
                BuildProduct::ToFleet(target) => {
                    let target_ref = owned_fleet(state, player, *target)?;
                    same_location(state, target_ref, *world)?;
                    affordable_unit(world_ref, config.game.costs.ship)?;
                }
                BuildProduct::IShips | BuildProduct::PShips => {
                    affordable_unit(world_ref, config.game.costs.ship)?;
                }
                BuildProduct::Industry => {
                    // The character discount applies in the build phase; one
                    // undiscounted unit has to fit here.
                    affordable_unit(world_ref, config.game.costs.industry_unit)?;
                }
                BuildProduct::Limit => {
                    affordable_unit(world_ref, config.game.costs.limit_unit)?;
                }
                BuildProduct::Robots => {
                    requires_character(state, player, CharacterType::Berserker, "Berserker")?;
                    if world_ref.population > 0
                        && world_ref.population_kind != PopulationKind::Robot
                    {
                        return Err(ValidationError::NoRobotPopulation(*world));
                    }
                    affordable_unit(world_ref, config.game.costs.robot_unit)?;
                }
            }
        }
        Order::TransferShips { fleet, amount, target } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_nonempty(fleet_ref)?;
            if *amount == 0 {
                return Err(ValidationError::Other("Nothing to transfer".into()));
            }
            let here = fleet_world(fleet_ref)?;
            match target {
                TransferTarget::Fleet(other) => {
                    let other_ref = owned_fleet(state, player, *other)?;
                    same_location(state, other_ref, here)?;
                    if other == fleet {
                        return Err(ValidationError::SelfTarget);
                    }
                }
                TransferTarget::IShips | TransferTarget::PShips => {
                    owned_world(state, player, here)?;
                }
            }
        }
        Order::LoadCargo { fleet, .. } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_nonempty(fleet_ref)?;
            let here = fleet_world(fleet_ref)?;
            let world = world_exists(state, here)?;
            match &world.owner {
                Some(owner) if owner != player => {
                    // Loading at a foreign world needs loader permission.
                    let permitted = state.players[owner].relation(player).loader;
                    if !permitted {
                        return Err(ValidationError::NotYourWorld(here));
                    }
                }
                _ => {}
            }
            if world.population == 0 {
                return Err(ValidationError::InsufficientResource(here, "population"));
            }
            let capacity = fleet_ref
                .cargo_capacity(config.cargo_per_ship(state.players[player].character));
            if fleet_ref.cargo >= capacity {
                return Err(ValidationError::InsufficientCapacity(*fleet));
            }
        }
        Order::UnloadCargo { fleet, .. } | Order::JettisonCargo { fleet, .. } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_world(fleet_ref)?;
            if fleet_ref.cargo == 0 {
                return Err(ValidationError::InsufficientCargo(*fleet));
            }
        }
        Order::UnloadConsumerGoods { fleet, .. } => {
            requires_character(state, player, CharacterType::Merchant, "Merchant")?;
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            let here = fleet_world(fleet_ref)?;
            if fleet_ref.cargo == 0 {
                return Err(ValidationError::InsufficientCargo(*fleet));
            }
            let world = world_exists(state, here)?;
            match &world.owner {
                Some(owner) if owner != player => {}
                _ => {
                    return Err(ValidationError::Other(
                        "Consumer goods need another player's world".into(),
                    ));
                }
            }
        }
        Order::Migrate { world, amount, target } => {
            let world_ref = owned_world(state, player, *world)?;
            if *amount == 0 {
                return Err(ValidationError::Other("Nothing to migrate".into()));
            }
            worlds_connected(state, *world, *target)?;
            if world_ref.population == 0 {
                return Err(ValidationError::InsufficientResource(*world, "population"));
            }
            affordable_unit(world_ref, config.game.costs.migration)?;
            // One outbound migration edge per source world and turn.
            let already = state.players[player]
                .orders
                .matching(|o| matches!(o, Order::Migrate { world: w, .. } | Order::MigrateConverts { world: w, .. } if w == world))
                .next()
                .is_some();
            if already {
                return Err(ValidationError::Other(format!(
                    "World {world} already migrates this turn"
                )));
            }
        }
        Order::MigrateConverts { world, amount, target } => {
            requires_character(state, player, CharacterType::Apostle, "Apostle")?;
            let world_ref = owned_world(state, player, *world)?;
            if *amount == 0 {
                return Err(ValidationError::Other("Nothing to migrate".into()));
            }
            worlds_connected(state, *world, *target)?;
            if world_ref.converts == 0 {
                return Err(ValidationError::InsufficientResource(*world, "converts"));
            }
            affordable_unit(world_ref, config.game.costs.migration)?;
            let already = state.players[player]
                .orders
                .matching(|o| matches!(o, Order::Migrate { world: w, .. } | Order::MigrateConverts { world: w, .. } if w == world))
                .next()
                .is_some();
            if already {
                return Err(ValidationError::Other(format!(
                    "World {world} already migrates this turn"
                )));
            }
        }
        Order::FireAtFleet { fleet, target } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_nonempty(fleet_ref)?;
            no_exclusive_clash(state, player, *fleet)?;
            let here = fleet_world(fleet_ref)?;
            let target_ref = fleet_exists(state, *target)?;
            if target_ref.owned_by(player) {
                return Err(ValidationError::SelfTarget);
            }
            same_location(state, target_ref, here)?;
        }
        Order::FireAtTarget { fleet, target } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_nonempty(fleet_ref)?;
            no_exclusive_clash(state, player, *fleet)?;
            let here = fleet_world(fleet_ref)?;
            let world = world_exists(state, here)?;
            if world.owned_by(player) {
                return Err(ValidationError::SelfTarget);
            }
            validate_world_target(world, *target)?;
        }
        Order::Ambush { fleet } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_nonempty(fleet_ref)?;
            no_exclusive_clash(state, player, *fleet)?;
            fleet_world(fleet_ref)?;
        }
        Order::NoAmbush { world } => {
            if let Some(world) = world {
                world_exists(state, *world)?;
            }
        }
        Order::ConditionalFire { fleet, target } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_nonempty(fleet_ref)?;
            no_exclusive_clash(state, player, *fleet)?;
            let here = fleet_world(fleet_ref)?;
            match target {
                FireTarget::Fleet(other) => {
                    let other_ref = fleet_exists(state, *other)?;
                    if other_ref.owned_by(player) {
                        return Err(ValidationError::SelfTarget);
                    }
                    same_location(state, other_ref, here)?;
                }
                other => {
                    let world = world_exists(state, here)?;
                    if world.owned_by(player) {
                        return Err(ValidationError::SelfTarget);
                    }
                    validate_world_target(world, *other)?;
                }
            }
        }
        Order::Peace { fleet } | Order::NotPeace { fleet } => {
            owned_fleet(state, player, *fleet)?;
        }
        Order::GiftFleet { fleet, to } => {
            owned_fleet(state, player, *fleet)?;
            known_player(state, player, to)?;
        }
        Order::GiftWorld { world, to } => {
            let world_ref = owned_world(state, player, *world)?;
            if world_ref.is_homeworld() {
                return Err(ValidationError::HomeworldProtected);
            }
            known_player(state, player, to)?;
        }
        Order::BuildPbb { fleet } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            let needed = config.game.costs.pbb_min_ships;
            if fleet_ref.ships < needed {
                return Err(ValidationError::TooFewShipsForPbb(*fleet, needed));
            }
            if fleet_ref.has_pbb {
                return Err(ValidationError::AlreadyHasPbb(*fleet));
            }
        }
        Order::DropPbb { fleet } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            if !fleet_ref.has_pbb {
                return Err(ValidationError::NoPbb(*fleet));
            }
            let here = fleet_world(fleet_ref)?;
            let world = world_exists(state, here)?;
            if world.is_homeworld() {
                return Err(ValidationError::HomeworldProtected);
            }
        }
        Order::RobotAttack { fleet, amount } => {
            requires_character(state, player, CharacterType::Berserker, "Berserker")?;
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            if *amount == 0 {
                return Err(ValidationError::Other("No robots to deploy".into()));
            }
            if fleet_ref.cargo == 0 {
                return Err(ValidationError::InsufficientCargo(*fleet));
            }
            let here = fleet_world(fleet_ref)?;
            let world = world_exists(state, here)?;
            if world.owned_by(player) {
                return Err(ValidationError::SelfTarget);
            }
            if world.population == 0 || world.population_kind == PopulationKind::Robot {
                return Err(ValidationError::InsufficientResource(here, "population"));
            }
        }
        Order::TransferArtifact { from, from_world, artifact, to } => {
            let here = match (from, from_world) {
                (ArtifactPlace::Fleet(fleet), _) => {
                    let fleet_ref = owned_fleet(state, player, *fleet)?;
                    if !fleet_ref.artifacts.contains(artifact) {
                        return Err(ValidationError::NoSuchArtifact(*artifact));
                    }
                    fleet_world(fleet_ref)?
                }
                (ArtifactPlace::LocalWorld, Some(world)) => {
                    let world_ref = owned_world(state, player, *world)?;
                    if !world_ref.artifacts.contains(artifact) {
                        return Err(ValidationError::NoSuchArtifact(*artifact));
                    }
                    *world
                }
                (ArtifactPlace::LocalWorld, None) => {
                    return Err(ValidationError::Other("Unknown artifact source".into()));
                }
            };
            match to {
                ArtifactPlace::Fleet(target) => {
                    let target_ref = fleet_exists(state, *target)?;
                    same_location(state, target_ref, here)?;
                    if matches!(from, ArtifactPlace::Fleet(f) if f == target) {
                        return Err(ValidationError::SelfTarget);
                    }
                }
                ArtifactPlace::LocalWorld => {
                    if matches!(from, ArtifactPlace::LocalWorld) {
                        return Err(ValidationError::SelfTarget);
                    }
                }
            }
        }
        Order::DeclareRelation { change, player: target } => {
            known_player(state, player, target)?;
            if *change == RelationChange::Jihad {
                requires_character(state, player, CharacterType::Apostle, "Apostle")?;
            }
        }
        Order::Plunder { fleet, amount } => {
            let fleet_ref = owned_fleet(state, player, *fleet)?;
            fleet_nonempty(fleet_ref)?;
            if *amount == 0 {
                return Err(ValidationError::Other("Nothing to plunder".into()));
            }
            let here = fleet_world(fleet_ref)?;
            let world = world_exists(state, here)?;
            match &world.owner {
                Some(owner) if owner != player => {}
                _ => {
                    return Err(ValidationError::Other(
                        "Plunder needs another player's world".into(),
                    ));
                }
            }
            if world.metal == 0 {
                return Err(ValidationError::InsufficientResource(here, "metal"));
            }
        }
        Order::ScrapShips { world, amount } => {
            let world_ref = owned_world(state, player, *world)?;
            if *amount == 0 {
                return Err(ValidationError::Other("Nothing to scrap".into()));
            }
            if world_ref.iships == 0 && world_ref.pships == 0 {
                return Err(ValidationError::InsufficientResource(*world, "garrison ships"));
            }
        }
        Order::Probe { world } => {
            world_exists(state, *world)?;
            let launch_site = state.worlds.values().find(|w| {
                w.owned_by(player)
                    && w.connections.contains(world)
                    && w.industry >= 1
                    && w.metal >= 1
            });
            if launch_site.is_none() {
                return Err(ValidationError::Other(format!(
                    "No owned world next to {world} can launch a probe"
                )));
            }
        }
    }
    Ok(order.normalized())
}

/// A build site must be owned by the player, or neutral: garrison
/// builds on a neutral world are the claim mechanic.
fn validate_build_site<'a>(
    state: &'a GameState,
    player: &str,
    world: WorldId,
) -> Check<&'a World> {
    let world_ref = world_exists(state, world)?;
    match &world_ref.owner {
        Some(owner) if owner != player => Err(ValidationError::NotYourWorld(world)),
        _ => Ok(world_ref),
    }
}

/// At least one unit of the given cost is affordable.
fn affordable_unit(world: &World, cost: ResourceCost) -> Check<()> {
    if world.industry < cost.industry {
        return Err(ValidationError::InsufficientResource(world.id, "industry"));
    }
    if world.metal < cost.metal {
        return Err(ValidationError::InsufficientResource(world.id, "metal"));
    }
    if world.population < cost.population {
        return Err(ValidationError::InsufficientResource(world.id, "population"));
    }
    Ok(())
}

/// Shape of a world-directed fire target against the actual world.
fn validate_world_target(world: &World, target: FireTarget) -> Check<()> {
    match target {
        FireTarget::Homeworld if !world.is_homeworld() => Err(ValidationError::Other(format!(
            "World {} is not a homeworld",
            world.id
        ))),
        FireTarget::Converts if world.converts == 0 => {
            Err(ValidationError::InsufficientResource(world.id, "converts"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::entities::FleetLocation;
    use crate::state::create_player;

    fn playground() -> (GameState, GameConfig) {
        let mut config = GameConfig::default();
        config.game.map_size = 40;
        config.game.num_keys = 40;
        config.game.black_hole_fraction = 0.0;
        let mut state = GameState::generate(&config);
        create_player(&mut state, "Alice".into(), CharacterType::Merchant, 60, &config).unwrap();
        create_player(&mut state, "Bob".into(), CharacterType::Pirate, 60, &config).unwrap();
        (state, config)
    }

    fn fleet_of(state: &GameState, player: &str) -> FleetId {
        state
            .fleets
            .values()
            .find(|f| f.owned_by(player))
            .unwrap()
            .id
    }

    #[test]
    fn movement_needs_ownership_and_connectivity() {
        let (state, config) = playground();
        let fleet = fleet_of(&state, "Alice");
        let home = state.players["Alice"].homeworld;
        let neighbor = *state.worlds[&home].connections.iter().next().unwrap();

        let text =
            validate(&state, &config, "Alice", &Order::Move { fleet, path: vec![neighbor] }).unwrap();
        assert_eq!(text, format!("F{fleet}W{neighbor}"));

        assert_eq!(
            validate(&state, &config, "Bob", &Order::Move { fleet, path: vec![neighbor] }),
            Err(ValidationError::NotYourFleet(fleet))
        );
        let disconnected = state
            .worlds
            .keys()
            .copied()
            .find(|id| *id != home && !state.connected(home, *id))
            .unwrap();
        assert_eq!(
            validate(&state, &config, "Alice", &Order::Move { fleet, path: vec![disconnected] }),
            Err(ValidationError::NotConnected(home, disconnected))
        );
    }

    #[test]
    fn exclusivity_is_checked_against_the_queue() {
        let (mut state, config) = playground();
        let fleet = fleet_of(&state, "Alice");
        let home = state.players["Alice"].homeworld;
        let neighbor = *state.worlds[&home].connections.iter().next().unwrap();
        state
            .players
            .get_mut("Alice")
            .unwrap()
            .orders
            .append(Order::Move { fleet, path: vec![neighbor] })
            .unwrap();
        assert_eq!(
            validate(&state, &config, "Alice", &Order::Ambush { fleet }),
            Err(ValidationError::ExclusiveOrderClash(fleet))
        );
        // Cargo orders are unaffected.
        validate(&state, &config, "Alice", &Order::LoadCargo { fleet, amount: None }).unwrap();
    }

    #[test]
    fn character_gating() {
        let (state, config) = playground();
        let home = state.players["Alice"].homeworld;
        let neighbor = *state.worlds[&home].connections.iter().next().unwrap();
        // Alice is a Merchant, not a Berserker.
        assert_eq!(
            validate(
                &state,
                &config,
                "Alice",
                &Order::Build { world: home, amount: 2, product: BuildProduct::Robots }
            ),
            Err(ValidationError::WrongCharacter("Berserker"))
        );
        assert_eq!(
            validate(
                &state,
                &config,
                "Alice",
                &Order::MigrateConverts { world: home, amount: 2, target: neighbor }
            ),
            Err(ValidationError::WrongCharacter("Apostle"))
        );
        assert_eq!(
            validate(
                &state,
                &config,
                "Alice",
                &Order::DeclareRelation { change: RelationChange::Jihad, player: "Bob".into() }
            ),
            Err(ValidationError::WrongCharacter("Apostle"))
        );
        // Ally declarations are open to everyone.
        validate(
            &state,
            &config,
            "Alice",
            &Order::DeclareRelation { change: RelationChange::Ally, player: "bob".into() },
        )
        .unwrap();
    }

    #[test]
    fn gifting_the_homeworld_is_refused() {
        let (state, config) = playground();
        let home = state.players["Alice"].homeworld;
        assert_eq!(
            validate(&state, &config, "Alice", &Order::GiftWorld { world: home, to: "Bob".into() }),
            Err(ValidationError::HomeworldProtected)
        );
    }

    #[test]
    fn pbb_preconditions() {
        let (mut state, config) = playground();
        let fleet = fleet_of(&state, "Alice");
        assert_eq!(
            validate(&state, &config, "Alice", &Order::BuildPbb { fleet }),
            Err(ValidationError::TooFewShipsForPbb(fleet, config.game.costs.pbb_min_ships))
        );
        state.fleets.get_mut(&fleet).unwrap().ships = 30;
        validate(&state, &config, "Alice", &Order::BuildPbb { fleet }).unwrap();
        state.fleets.get_mut(&fleet).unwrap().has_pbb = true;
        assert_eq!(
            validate(&state, &config, "Alice", &Order::BuildPbb { fleet }),
            Err(ValidationError::AlreadyHasPbb(fleet))
        );
        // Dropping on the own homeworld is impossible anyway, but any
        // homeworld is protected.
        assert_eq!(
            validate(&state, &config, "Alice", &Order::DropPbb { fleet }),
            Err(ValidationError::HomeworldProtected)
        );
    }

    #[test]
    fn loading_at_foreign_worlds_needs_loader_permission() {
        let (mut state, config) = playground();
        let fleet = fleet_of(&state, "Alice");
        let bob_home = state.players["Bob"].homeworld;
        state.fleets.get_mut(&fleet).unwrap().location = FleetLocation::AtWorld(bob_home);
        assert_eq!(
            validate(&state, &config, "Alice", &Order::LoadCargo { fleet, amount: Some(3) }),
            Err(ValidationError::NotYourWorld(bob_home))
        );
        state
            .players
            .get_mut("Bob")
            .unwrap()
            .relations
            .entry("Alice".into())
            .or_default()
            .loader = true;
        validate(&state, &config, "Alice", &Order::LoadCargo { fleet, amount: Some(3) }).unwrap();
    }

    #[test]
    fn one_migration_edge_per_source_world() {
        let (mut state, config) = playground();
        let home = state.players["Alice"].homeworld;
        let mut neighbors = state.worlds[&home].connections.iter().copied();
        let first = neighbors.next().unwrap();
        let order = Order::Migrate { world: home, amount: 3, target: first };
        validate(&state, &config, "Alice", &order).unwrap();
        state.players.get_mut("Alice").unwrap().orders.append(order).unwrap();
        let second = neighbors.next().unwrap_or(first);
        assert!(matches!(
            validate(
                &state,
                &config,
                "Alice",
                &Order::Migrate { world: home, amount: 2, target: second }
            ),
            Err(ValidationError::Other(_))
        ));
    }
}
