//! Player-facing help. Topic texts are static; fleet and world help is
//! rendered from the asking player's own view, never from hidden state.

use crate::parser::HelpQuery;
use crate::state::GameState;
use crate::visibility;
use itertools::Itertools;
use protocol::{FleetId, WorldId};

/// Answers a HELP request. Always returns something readable.
pub fn answer(state: &GameState, player: &str, query: Option<&HelpQuery>) -> String {
    match query {
        None => general().to_string(),
        Some(HelpQuery::Topic(topic)) => topic_text(topic).to_string(),
        Some(HelpQuery::Fleet(id)) => fleet_help(state, player, *id),
        Some(HelpQuery::World(id)) => world_help(state, player, *id),
    }
}

fn general() -> &'static str {
    "Commands (case-insensitive):\n\
     F1W2W3        move fleet 1 via world 2 to world 3\n\
     W3B10I        build 10 iships at world 3 (P pships, F4 into fleet 4, IND, LIMIT, ROBOT)\n\
     F1T5F2        transfer 5 ships to fleet 2 (I/P for the garrison)\n\
     F1L / F1U     load / unload cargo (F1UC consumer goods, F1J jettison)\n\
     W3M10W5       migrate 10 population to world 5 (C3M10W5 for converts)\n\
     F1AF2         fire at fleet 2 (AI/AP/AH/AC for world targets, bare A to ambush)\n\
     F1CF2         conditional fire, Z / Z5 no-ambush, F1Q peace, F1X end peace\n\
     F1G=Bob       gift a fleet (W3G=Bob a world)\n\
     F1B / F1D     build / drop a planet buster, F1R5 robot attack, F1P5 plunder\n\
     W3S5          scrap garrison ships, W3X probe, F1TA7W move artifact 7\n\
     A=/L=/X=/J=/N=name   declare ally / loader / unloader / jihad / neutral\n\
     V7            inspect artifact 7, CANCEL 2 drop queued order 2\n\
     TURN          toggle ready, HELP <topic|F1|W1> for more\n\
     Topics: combat movement building cargo diplomacy scoring characters"
}

fn topic_text(topic: &str) -> &'static str {
    match topic {
        "combat" => {
            "Fleets exchange fire simultaneously, each side losing half the\n\
             attacker's ships rounded up. Fire at worlds hits the matching\n\
             garrison first (AI iships, AP pships), the rest reaches the\n\
             target. Ambushing fleets strike arrivals with doubled effect and\n\
             take no return fire; at-peace fleets neither trigger nor suffer\n\
             ambushes. Conditional fire only answers when fired upon."
        }
        "movement" => {
            "F1W2W3 queues a path; fleets walk it hop by hop at turn end.\n\
             Moves stop where an ambush springs. Entering a black hole\n\
             destroys ships and cargo; the key reappears elsewhere with its\n\
             artifacts."
        }
        "building" => {
            "Builds spend industry, metal and population and cap at the\n\
             scarcest resource. Ships cost 1/1/1, industry and limit 5/5\n\
             (EmpireBuilders pay less). Garrison builds on a neutral world\n\
             claim it. ROBOT builds are Berserker-only. A planet buster\n\
             needs a fleet of 25 ships."
        }
        "cargo" => {
            "Loading draws population aboard, capped by ship capacity;\n\
             unloading settles cargo up to the world's limit. Consumer\n\
             goods (Merchants) sell to another player's world. Plunder\n\
             steals metal from a hostile world into free cargo space."
        }
        "diplomacy" => {
            "A=name allies, N=name returns to neutral. L=name lets the\n\
             named player load cargo at your worlds, X=name revokes it.\n\
             J=name declares jihad (Apostles). Gifts hand over fleets and\n\
             worlds, but never a homeworld."
        }
        "scoring" => {
            "Each character scores its own way: EmpireBuilders on holdings,\n\
             Merchants on deliveries, Pirates on plunder and fleets,\n\
             Collectors on artifacts and museums, Berserkers on destruction,\n\
             Apostles on converts. First across the target score wins."
        }
        "characters" => {
            "EmpireBuilder: cheaper industry and limits. Merchant: double\n\
             cargo capacity, delivery points. Pirate: plunder bonuses and\n\
             3:1 auto-capture. ArtifactCollector: artifact and museum\n\
             points. Berserker: robots and kill points. Apostle: converts,\n\
             jihad and martyrs."
        }
        _ => "No such help topic. Try: combat movement building cargo diplomacy scoring characters",
    }
}

fn fleet_help(state: &GameState, player: &str, id: FleetId) -> String {
    let Some(fleet) = state.fleets.get(&id) else {
        return format!("Fleet {id} does not exist");
    };
    let own = fleet.owned_by(player);
    let visible_world = fleet
        .location
        .world()
        .map(|w| visibility::visible_worlds(state, player).contains(&w))
        .unwrap_or(false);
    if !own && !visible_world {
        return format!("Fleet {id} is not in sight");
    }
    let location = match fleet.location.world() {
        Some(world) => format!("at world {world}"),
        None => "in transit".to_string(),
    };
    let owner = fleet.owner.as_deref().unwrap_or("nobody");
    let mut text = format!(
        "Fleet {id} ({owner}) {location}: {} ships, {} cargo",
        fleet.ships, fleet.cargo
    );
    if own {
        if !fleet.artifacts.is_empty() {
            let names = fleet
                .artifacts
                .iter()
                .filter_map(|a| state.artifacts.get(a).map(|art| art.name.as_str()))
                .join(", ");
            text.push_str(&format!(", carrying {names}"));
        }
        if fleet.has_pbb {
            text.push_str(", planet buster armed");
        }
        if fleet.at_peace {
            text.push_str(", at peace");
        }
    }
    text
}

fn world_help(state: &GameState, player: &str, id: WorldId) -> String {
    let Some(world) = state.worlds.get(&id) else {
        return format!("World {id} does not exist");
    };
    if visibility::visible_worlds(state, player).contains(&id) {
        let owner = world.owner.as_deref().unwrap_or("neutral");
        let mut text = format!(
            "World {id} ({owner}): pop {}/{} ind {} mines {} metal {} garrison {}I/{}P",
            world.population,
            world.limit,
            world.industry,
            world.mines,
            world.metal,
            world.iships,
            world.pships
        );
        if world.is_black_hole {
            text.push_str(", BLACK HOLE");
        }
        if !world.artifacts.is_empty() {
            text.push_str(&format!(", {} artifacts", world.artifacts.len()));
        }
        let neighbors = world.connections.iter().join(" ");
        text.push_str(&format!(", connects to {neighbors}"));
        return text;
    }
    if let Some(player_record) = state.players.get(player)
        && let Some(remembered) = player_record.known_worlds.get(&id)
    {
        let view = &remembered.view;
        let owner = view.owner.as_deref().unwrap_or("neutral");
        return format!(
            "World {id} as of turn {} ({owner}): pop {}/{} ind {} metal {}",
            remembered.turn, view.population, view.limit, view.industry, view.metal
        );
    }
    format!("World {id} is uncharted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::state::create_player;
    use protocol::CharacterType;

    fn setup() -> GameState {
        let mut config = GameConfig::default();
        config.game.map_size = 30;
        config.game.num_keys = 30;
        config.game.black_hole_fraction = 0.0;
        let mut state = GameState::generate(&config);
        create_player(&mut state, "Alice".into(), CharacterType::Merchant, 60, &config).unwrap();
        create_player(&mut state, "Bob".into(), CharacterType::Pirate, 60, &config).unwrap();
        state
    }

    #[test]
    fn topics_and_fallback() {
        let state = setup();
        assert!(answer(&state, "Alice", None).contains("TURN"));
        let query = HelpQuery::Topic("combat".into());
        assert!(answer(&state, "Alice", Some(&query)).contains("simultaneously"));
        let query = HelpQuery::Topic("quantum".into());
        assert!(answer(&state, "Alice", Some(&query)).contains("No such help topic"));
    }

    #[test]
    fn fleet_help_respects_visibility() {
        let state = setup();
        let own = state
            .fleets
            .values()
            .find(|f| f.owned_by("Alice"))
            .unwrap()
            .id;
        let foreign = state
            .fleets
            .values()
            .find(|f| f.owned_by("Bob"))
            .unwrap()
            .id;
        let text = answer(&state, "Alice", Some(&HelpQuery::Fleet(own)));
        assert!(text.contains("Alice"));
        let text = answer(&state, "Alice", Some(&HelpQuery::Fleet(foreign)));
        assert!(text.contains("not in sight"));
    }

    #[test]
    fn world_help_distinguishes_live_and_uncharted() {
        let state = setup();
        let home = state.players["Alice"].homeworld;
        let text = answer(&state, "Alice", Some(&HelpQuery::World(home)));
        assert!(text.contains("Alice"));
        let hidden = state.players["Bob"].homeworld;
        let text = answer(&state, "Alice", Some(&HelpQuery::World(hidden)));
        assert!(text.contains("uncharted"));
    }
}
