//! End-to-end turn scenarios driven through the public pipeline:
//! parse, validate, queue, process. These complement the per-phase
//! unit tests by checking the conserved quantities a whole game
//! session relies on.

use engine::config::GameConfig;
use engine::events::EventBus;
use engine::parser::{Command, parse};
use engine::state::{GameState, create_player};
use engine::turn::process_turn;
use engine::validator::validate;
use protocol::CharacterType;
use std::collections::BTreeSet;

fn new_game(players: &[(&str, CharacterType)]) -> (GameState, GameConfig) {
    let mut config = GameConfig::default();
    config.game.map_size = 50;
    config.game.num_keys = 50;
    config.game.black_hole_fraction = 0.05;
    let mut state = GameState::generate(&config);
    for (name, character) in players {
        create_player(&mut state, (*name).to_string(), *character, 60, &config).unwrap();
    }
    (state, config)
}

/// Parses, validates and queues one command line for a player.
fn submit(state: &mut GameState, config: &GameConfig, player: &str, line: &str) {
    let command = parse(line).unwrap_or_else(|e| panic!("parse {line}: {e}"));
    let Command::Order(order) = command else {
        panic!("expected a game order for {line}");
    };
    validate(state, config, player, &order).unwrap_or_else(|e| panic!("validate {line}: {e}"));
    state
        .players
        .get_mut(player)
        .unwrap()
        .orders
        .append(order)
        .unwrap_or_else(|f| panic!("queue {line}: fleet {f} clash"));
}

fn run(state: &mut GameState, config: &GameConfig) {
    let mut bus = EventBus::default();
    let outcome = process_turn(state, config, &mut bus);
    assert!(!outcome.rolled_back, "turn rolled back unexpectedly");
}

fn artifact_placements(state: &GameState) -> BTreeSet<u16> {
    state
        .worlds
        .values()
        .flat_map(|w| w.artifacts.iter().copied())
        .chain(state.fleets.values().flat_map(|f| f.artifacts.iter().copied()))
        .collect()
}

#[test]
fn move_and_arrive_grants_sight_and_ownership() {
    let (mut state, config) = new_game(&[("Alice", CharacterType::Merchant)]);
    let home = state.players["Alice"].homeworld;
    let fleet = state
        .fleets
        .values()
        .find(|f| f.owned_by("Alice"))
        .unwrap()
        .id;
    let target = *state.worlds[&home]
        .connections
        .iter()
        .find(|id| !state.worlds[id].is_black_hole && state.worlds[id].owner.is_none())
        .expect("homeworld needs an ordinary neighbor");
    {
        let world = state.worlds.get_mut(&target).unwrap();
        world.population = 0;
        world.converts = 0;
        world.iships = 0;
        world.pships = 0;
    }

    submit(&mut state, &config, "Alice", &format!("F{fleet}W{target}"));
    run(&mut state, &config);

    assert_eq!(
        state.fleets[&fleet].location,
        engine::entities::FleetLocation::AtWorld(target)
    );
    // Neutral, empty, undefended: the arrival claims it.
    assert_eq!(state.worlds[&target].owner.as_deref(), Some("Alice"));
    // And the player remembers what they saw there.
    assert!(state.players["Alice"].known_worlds.contains_key(&target));
}

#[test]
fn conserved_quantities_hold_over_many_turns() {
    let (mut state, config) = new_game(&[
        ("Alice", CharacterType::Merchant),
        ("Bob", CharacterType::Pirate),
        ("Cleo", CharacterType::Apostle),
    ]);
    let artifacts_before = artifact_placements(&state);
    let keys_before = state.fleets.len();

    for round in 0..6 {
        // Everybody pushes their fleets around and builds at home.
        for player in ["Alice", "Bob", "Cleo"] {
            let home = state.players[player].homeworld;
            let roaming = state
                .fleets
                .values()
                .find(|f| f.owned_by(player) && f.ships > 0 && f.location.world().is_some())
                .map(|f| (f.id, f.location.world().unwrap()));
            if let Some((fleet_id, at)) = roaming {
                let next = state.worlds[&at]
                    .connections
                    .iter()
                    .find(|id| !state.worlds[id].is_black_hole)
                    .copied();
                if let Some(next) = next {
                    let line = format!("F{fleet_id}W{next}");
                    if let Command::Order(order) = parse(&line).unwrap()
                        && validate(&state, &config, player, &order).is_ok()
                    {
                        let _ = state.players.get_mut(player).unwrap().orders.append(order);
                    }
                }
            }
            let world = &state.worlds[&home];
            if world.owned_by(player) && world.industry >= 1 && world.metal >= 1 && world.population >= 1 {
                submit(&mut state, &config, player, &format!("W{home}B1I"));
            }
        }
        run(&mut state, &config);

        // The §8-style conserved quantities, after every resolution.
        assert_eq!(state.fleets.len(), keys_before, "round {round}: key count drifted");
        assert_eq!(
            artifact_placements(&state),
            artifacts_before,
            "round {round}: artifacts not conserved"
        );
        state.check_invariants().unwrap();
        for player in state.players.values() {
            let replayed: i64 = player.ledger.iter().map(|e| e.points).sum();
            assert_eq!(replayed, player.score, "round {round}: ledger drifted");
        }
    }
    assert_eq!(state.turn, 6);
}

#[test]
fn normalized_orders_survive_a_reparse() {
    let (mut state, config) = new_game(&[("Alice", CharacterType::Merchant)]);
    let home = state.players["Alice"].homeworld;
    let fleet = state
        .fleets
        .values()
        .find(|f| f.owned_by("Alice"))
        .unwrap()
        .id;
    let neighbor = *state.worlds[&home]
        .connections
        .iter()
        .find(|id| !state.worlds[id].is_black_hole)
        .unwrap();

    // Mixed-case input normalizes into the queue text, and the queue
    // text parses back to the identical order.
    let line = format!("f{fleet}w{neighbor}");
    let Command::Order(order) = parse(&line).unwrap() else { panic!() };
    let normalized = validate(&state, &config, "Alice", &order).unwrap();
    let Command::Order(reparsed) = parse(&normalized).unwrap() else { panic!() };
    assert_eq!(order, reparsed);

    state
        .players
        .get_mut("Alice")
        .unwrap()
        .orders
        .append(order)
        .unwrap();
    assert_eq!(state.players["Alice"].orders.texts(), vec![normalized]);
}
