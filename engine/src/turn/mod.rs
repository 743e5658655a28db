//! Turn resolution. All queued orders execute here in thirteen ordered
//! phases; each phase is fully applied across all players before the
//! next begins, and within a phase traversal is deterministic: player
//! name ascending, order index ascending. Events are buffered on the
//! bus and only dispatched once the world has stopped moving. An
//! invariant failure rolls the whole turn back to its pre-turn
//! snapshot; the game never crashes over a bad turn.

mod builds;
mod combat;
mod economy;
mod movement;
mod ownership;
mod scoring;

use crate::config::GameConfig;
use crate::events::{EventBus, GameEvent};
use crate::order::{Order, QueuedOrder, RelationChange};
use crate::state::GameState;
use crate::visibility;
use protocol::{PlayerName, WorldId};
use std::collections::BTreeMap;

/// All orders of one turn, keyed by player name. The BTreeMap gives the
/// per-phase traversal its player-name ordering for free.
pub type TurnOrders = BTreeMap<PlayerName, Vec<QueuedOrder>>;

/// Score-relevant happenings collected while the phases run; the
/// scoring phase turns them into ledger entries.
#[derive(Default, Debug)]
pub struct TurnTally {
    /// Population killed per player (combat, robot attacks, robot migration).
    pub kills: BTreeMap<PlayerName, u32>,
    /// Enemy ships destroyed per player.
    pub ships_destroyed: BTreeMap<PlayerName, u32>,
    /// Converts killed by the keyed player's enemies: owner -> martyrs.
    pub martyrs: BTreeMap<PlayerName, u32>,
    /// Scored metal deliveries: (merchant, world) -> units this turn.
    pub deliveries: BTreeMap<(PlayerName, WorldId), u32>,
    /// Consumer-goods unload events in execution order.
    pub consumer_unloads: Vec<(PlayerName, WorldId)>,
    /// Plunder events in execution order.
    pub plunders: Vec<(PlayerName, WorldId)>,
    /// Planet buster strikes in execution order.
    pub pbb_drops: Vec<(PlayerName, WorldId)>,
}

impl TurnTally {
    pub fn add_kills(&mut self, player: &str, amount: u32) {
        if amount > 0 {
            *self.kills.entry(player.to_string()).or_default() += amount;
        }
    }

    pub fn add_ships_destroyed(&mut self, player: &str, amount: u32) {
        if amount > 0 {
            *self.ships_destroyed.entry(player.to_string()).or_default() += amount;
        }
    }

    pub fn add_martyrs(&mut self, owner: &str, amount: u32) {
        if amount > 0 {
            *self.martyrs.entry(owner.to_string()).or_default() += amount;
        }
    }
}

/// What a completed turn resolution hands back to the transport layer.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The dispatched events, in publish order.
    pub events: Vec<GameEvent>,
    /// True when an invariant failure restored the pre-turn snapshot.
    pub rolled_back: bool,
    /// Set once somebody crossed the target score.
    pub winner: Option<PlayerName>,
}

/// Resolves one turn over the queued orders of all players.
pub fn process_turn(
    state: &mut GameState,
    config: &GameConfig,
    bus: &mut EventBus,
) -> TurnOutcome {
    let snapshot = state.clone();
    state.turn += 1;
    let turn = state.turn;

    // Drain every queue up front; the phases own the orders from here on.
    let orders: TurnOrders = state
        .players
        .iter_mut()
        .map(|(name, player)| (name.clone(), player.orders.take_all()))
        .collect();

    let mut tally = TurnTally::default();
    let result = run_phases(state, config, bus, &orders, &mut tally);

    if let Err(error) = result.and_then(|_| state.check_invariants()) {
        tracing::error!(%error, turn, "Turn resolution failed, rolling back.");
        *state = snapshot;
        bus.discard();
        return TurnOutcome { events: Vec::new(), rolled_back: true, winner: None };
    }

    scoring::apply(state, config, &tally);
    let winner = scoring::check_victory(state);

    bus.publish(GameEvent::TurnProcessed { turn });
    let events = bus.dispatch();

    // Remember what everyone saw before the per-turn flags go away.
    let names: Vec<PlayerName> = state.players.keys().cloned().collect();
    for name in &names {
        visibility::remember_visible(state, name);
    }
    state.reset_turn_state();

    TurnOutcome { events, rolled_back: false, winner }
}

fn run_phases(
    state: &mut GameState,
    config: &GameConfig,
    bus: &mut EventBus,
    orders: &TurnOrders,
    tally: &mut TurnTally,
) -> Result<(), crate::errors::StateError> {
    diplomacy(state, orders);
    gifts(state, config, bus, orders);
    economy::ship_transfers(state, config, bus, orders);
    builds::run(state, config, bus, orders);
    economy::cargo(state, config, bus, orders, tally);
    economy::migration(state, config, orders, tally);
    economy::probes(state, orders);
    combat::stances(state, orders);
    combat::fire_phase(state, bus, orders, tally);
    movement::run(state, bus, orders, tally);
    combat::pbb_drops(state, bus, orders, tally);
    economy::production(state, config, bus);
    ownership::resolve(state, config, bus);
    Ok(())
}

/// Phase 1: relation declarations.
fn diplomacy(state: &mut GameState, orders: &TurnOrders) {
    for (player, queued) in orders {
        for entry in queued {
            let Order::DeclareRelation { change, player: target } = &entry.order else {
                continue;
            };
            let Some(target) = state.canonical_name(target) else {
                continue;
            };
            let Some(record) = state.players.get_mut(player) else {
                continue;
            };
            let flags = record.relations.entry(target.clone()).or_default();
            match change {
                RelationChange::Ally => flags.ally = true,
                RelationChange::Loader => flags.loader = true,
                RelationChange::Unloader => flags.loader = false,
                RelationChange::Jihad => {
                    flags.jihad = true;
                    flags.ally = false;
                }
                RelationChange::Neutral => {
                    flags.ally = false;
                    flags.jihad = false;
                }
            }
            // Fully-neutral entries do not need to stay around.
            if flags.is_default() {
                record.relations.remove(&target);
            }
        }
    }
}

/// Phase 2: fleet and world gifts. Homeworlds and self-targets were
/// already refused at queue time; ownership may have changed since, so
/// everything is re-checked.
fn gifts(state: &mut GameState, config: &GameConfig, bus: &mut EventBus, orders: &TurnOrders) {
    for (player, queued) in orders {
        for entry in queued {
            match &entry.order {
                Order::GiftFleet { fleet, to } => {
                    let Some(recipient) = state.canonical_name(to) else { continue };
                    let Some(fleet_ref) = state.fleets.get_mut(fleet) else { continue };
                    if !fleet_ref.owned_by(player) || recipient == *player {
                        continue;
                    }
                    fleet_ref.owner = Some(recipient.clone());
                    // The new owner's character may carry less cargo.
                    let capacity = fleet_ref
                        .cargo_capacity(config.cargo_per_ship(state.players[&recipient].character));
                    if fleet_ref.cargo > capacity {
                        let spilled = fleet_ref.cargo - capacity;
                        fleet_ref.cargo = capacity;
                        if let Some(world) = fleet_ref.location.world() {
                            bus.publish(GameEvent::CargoJettisoned {
                                fleet: *fleet,
                                owner: recipient.clone(),
                                world,
                                amount: spilled,
                            });
                        }
                    }
                }
                Order::GiftWorld { world, to } => {
                    let Some(recipient) = state.canonical_name(to) else { continue };
                    let Some(world_ref) = state.worlds.get_mut(world) else { continue };
                    if !world_ref.owned_by(player)
                        || world_ref.is_homeworld()
                        || recipient == *player
                    {
                        continue;
                    }
                    let old = world_ref.owner.replace(recipient.clone());
                    bus.publish(GameEvent::WorldCaptured {
                        world: *world,
                        new_owner: Some(recipient),
                        old_owner: old,
                    });
                }
                _ => {}
            }
        }
    }
}

/// Whether `a` regards `b` as an ally. Used by ambush and capture code.
pub(crate) fn considers_ally(state: &GameState, a: &str, b: &str) -> bool {
    state
        .players
        .get(a)
        .map(|p| p.relation(b).ally)
        .unwrap_or(false)
}

/// Ceil-half casualty rule used by every direct exchange of fire.
pub(crate) fn volley(ships: u32) -> u32 {
    ships.div_ceil(2)
}

/// Kills up to `amount` population at a world, keeping the convert pool
/// consistent. Kills are credited to `killer`; converts dying to
/// another player count as martyrs for an Apostle owner.
pub(crate) fn kill_population(
    state: &mut GameState,
    world: WorldId,
    amount: u32,
    killer: &str,
    tally: &mut TurnTally,
) -> u32 {
    let owner = state.worlds[&world].owner.clone();
    let world_ref = state.worlds.get_mut(&world).unwrap();
    let killed = amount.min(world_ref.population);
    if killed == 0 {
        return 0;
    }
    world_ref.population -= killed;
    let converts_killed = world_ref.converts.saturating_sub(world_ref.population);
    world_ref.converts -= converts_killed;
    tally.add_kills(killer, killed);
    if converts_killed > 0
        && let Some(owner) = owner
        && owner != killer
        && state.players[&owner].character == protocol::CharacterType::Apostle
    {
        tally.add_martyrs(&owner, converts_killed);
    }
    killed
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared scaffolding for the phase tests.

    use super::*;
    use crate::state::create_player;
    use protocol::CharacterType;

    /// A small deterministic map with two joined players.
    pub fn game(characters: &[(&str, CharacterType)]) -> (GameState, GameConfig) {
        let mut config = GameConfig::default();
        config.game.map_size = 40;
        config.game.num_keys = 40;
        config.game.black_hole_fraction = 0.0;
        let mut state = GameState::generate(&config);
        for (name, character) in characters {
            create_player(&mut state, (*name).to_string(), *character, 60, &config).unwrap();
        }
        (state, config)
    }

    /// Queues one order for a player, bypassing validation.
    pub fn queue(state: &mut GameState, player: &str, order: Order) {
        state
            .players
            .get_mut(player)
            .unwrap()
            .orders
            .append(order)
            .unwrap();
    }

    /// Runs a full turn with a throwaway bus.
    pub fn run_turn(state: &mut GameState, config: &GameConfig) -> TurnOutcome {
        let mut bus = EventBus::default();
        process_turn(state, config, &mut bus)
    }

    /// First fleet id owned by the player.
    pub fn fleet_of(state: &GameState, player: &str) -> protocol::FleetId {
        state
            .fleets
            .values()
            .find(|f| f.owned_by(player))
            .unwrap()
            .id
    }
}

#[cfg(test)]
mod tests {
    use super::testkit::*;
    use super::*;
    use crate::entities::FleetLocation;
    use protocol::CharacterType;

    #[test]
    fn diplomacy_updates_relations_both_ways_independently() {
        let (mut state, config) = game(&[
            ("Alice", CharacterType::Merchant),
            ("Bob", CharacterType::Pirate),
        ]);
        queue(
            &mut state,
            "Alice",
            Order::DeclareRelation { change: RelationChange::Ally, player: "Bob".into() },
        );
        run_turn(&mut state, &config);
        assert!(state.players["Alice"].is_ally("Bob"));
        assert!(!state.players["Bob"].is_ally("Alice"));
    }

    #[test]
    fn gifting_a_fleet_respects_the_recipients_cargo_capacity() {
        let (mut state, config) = game(&[
            ("Alice", CharacterType::Merchant),
            ("Bob", CharacterType::Pirate),
        ]);
        let fleet = fleet_of(&state, "Alice");
        {
            let fleet_ref = state.fleets.get_mut(&fleet).unwrap();
            // A merchant fleet carries two per ship; Bob only one.
            fleet_ref.ships = 4;
            fleet_ref.cargo = 8;
        }
        queue(&mut state, "Alice", Order::GiftFleet { fleet, to: "bob".into() });
        let outcome = run_turn(&mut state, &config);
        assert!(!outcome.rolled_back);
        let fleet_ref = &state.fleets[&fleet];
        assert_eq!(fleet_ref.owner.as_deref(), Some("Bob"));
        assert_eq!(fleet_ref.cargo, 4);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::CargoJettisoned { amount: 4, .. })));
    }

    #[test]
    fn turn_counter_advances_and_queues_drain() {
        let (mut state, config) = game(&[("Alice", CharacterType::Merchant)]);
        let fleet = fleet_of(&state, "Alice");
        let home = state.players["Alice"].homeworld;
        let neighbor = *state.worlds[&home].connections.iter().next().unwrap();
        queue(&mut state, "Alice", Order::Move { fleet, path: vec![neighbor] });
        assert_eq!(state.players["Alice"].orders.len(), 1);
        let outcome = run_turn(&mut state, &config);
        assert!(!outcome.rolled_back);
        assert_eq!(state.turn, 1);
        assert!(state.players["Alice"].orders.is_empty());
        assert_eq!(
            state.fleets[&fleet].location,
            FleetLocation::AtWorld(neighbor)
        );
    }

    #[test]
    fn a_poisoned_phase_rolls_the_turn_back() {
        let (mut state, config) = game(&[("Alice", CharacterType::Merchant)]);
        // Sabotage: an artifact placed twice will trip the invariant
        // check after the phases ran.
        let first_artifact = *state.artifacts.keys().next().unwrap();
        let fleet = fleet_of(&state, "Alice");
        state
            .fleets
            .get_mut(&fleet)
            .unwrap()
            .artifacts
            .insert(first_artifact);
        let before_turn = state.turn;
        let outcome = run_turn(&mut state, &config);
        assert!(outcome.rolled_back);
        assert!(outcome.events.is_empty());
        assert_eq!(state.turn, before_turn);
        // The rollback also restored the duplicated artifact state, and
        // with it the queued orders.
        assert!(state.fleets[&fleet].artifacts.contains(&first_artifact));
    }
}
