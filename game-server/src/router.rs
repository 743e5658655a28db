//! Inbound frame dispatch. Commands run through parser and validator,
//! chat is relayed, bug reports go to the journal. Parse and validation
//! failures only ever travel back to the client that caused them.

use crate::bug_reports::{self, BugReport};
use crate::engine_task::Engine;
use crate::registry::ClientId;
use engine::events::GameEvent;
use engine::order::Order;
use engine::parser::{Command, parse};
use engine::state::create_player;
use engine::{help, validator, visibility};
use protocol::{CharacterType, ChatChannel, ClientFrame, EventClass, ServerFrame};

/// Character handed to joiners who do not name one.
const DEFAULT_CHARACTER: CharacterType = CharacterType::EmpireBuilder;

impl Engine {
    pub(crate) async fn handle_frame(&mut self, client: ClientId, frame: ClientFrame) {
        match frame {
            ClientFrame::Command { text } => self.handle_command(client, &text),
            ClientFrame::Chat { to, message } => self.handle_chat(client, &to, message),
            ClientFrame::BugReport { description, game_turn, player_name, timestamp } => {
                bug_reports::append(
                    &self.data_dir,
                    BugReport {
                        description: &description,
                        game_turn,
                        player_name: &player_name,
                        timestamp: &timestamp,
                        received_at: chrono::Utc::now().to_rfc3339(),
                    },
                )
                .await;
                self.clients.send_to_client(
                    client,
                    ServerFrame::Info { text: "Bug report recorded, thank you.".into() },
                );
            }
        }
    }

    fn handle_command(&mut self, client: ClientId, text: &str) {
        let command = match parse(text) {
            Ok(command) => command,
            Err(e) => {
                self.error(client, e.to_string());
                return;
            }
        };

        let command = match command {
            Command::Join { name, minutes, character } => {
                self.handle_join(client, name, minutes, character);
                return;
            }
            other => other,
        };

        // Everything else needs an identity.
        let Some(player) = self.clients.player_of(client).cloned() else {
            self.error(client, "Join the game first: JOIN <name> [minutes] [character]");
            return;
        };

        match command {
            Command::Turn => {
                let record = self.state.player_mut(&player).unwrap();
                record.ready = !record.ready;
                let text = if record.ready {
                    "Ready for the turn. It fires when everyone is."
                } else {
                    "No longer ready."
                };
                self.info(client, text);
                self.fire_if_everyone_ready();
            }
            Command::Help(query) => {
                let text = help::answer(&self.state, &player, query.as_ref());
                self.clients.send_to_client(
                    client,
                    ServerFrame::Event { text, event_type: EventClass::Help },
                );
            }
            Command::Cancel(index) => {
                let record = self.state.player_mut(&player).unwrap();
                match record.orders.cancel(index) {
                    Some(cancelled) => {
                        self.info(client, format!("Cancelled {}", cancelled.text));
                        self.sync_player(&player);
                    }
                    None => self.error(client, format!("No order at index {index}")),
                }
            }
            Command::ViewArtifact { artifact } => {
                self.view_artifact(client, &player, artifact);
            }
            Command::Order(order) => self.queue_order(client, &player, order),
            Command::Join { .. } => {}
        }
    }

    fn queue_order(&mut self, client: ClientId, player: &str, order: Order) {
        let normalized = match validator::validate(&self.state, &self.config, player, &order) {
            Ok(normalized) => normalized,
            Err(e) => {
                self.error(client, e.to_string());
                return;
            }
        };
        let record = self.state.player_mut(player).unwrap();
        match record.orders.append(order) {
            Ok(_) => {
                self.info(client, format!("Queued: {normalized}"));
                self.sync_player(&player.to_string());
            }
            Err(fleet) => {
                self.error(
                    client,
                    format!("Fleet {fleet} already has a movement or fire order"),
                );
            }
        }
    }

    fn handle_join(
        &mut self,
        client: ClientId,
        name: String,
        minutes: Option<u64>,
        character: Option<CharacterType>,
    ) {
        if name.eq_ignore_ascii_case("all") {
            self.error(client, "That name is reserved");
            return;
        }

        if let Some(existing) = self.state.canonical_name(&name) {
            // Reconnect: the saved player record comes back as is; a
            // second live connection replaces the first.
            if let Some(displaced) = self.clients.bind_player(client, &existing) {
                self.clients.send_to_client(
                    displaced,
                    ServerFrame::Error {
                        text: "This player reconnected from another client.".into(),
                    },
                );
            }
            let record = self.state.player_mut(&existing).unwrap();
            record.connected = true;
            if let Some(minutes) = minutes {
                record.turn_preference_minutes = minutes;
                self.recompute_turn_duration();
            }
            tracing::info!(player = %existing, "Player reconnected.");
            self.deltas.forget(&existing);
            self.full_sync(&existing);
            return;
        }

        let character = character.unwrap_or(DEFAULT_CHARACTER);
        let minutes = minutes.unwrap_or(60);
        match create_player(&mut self.state, name.clone(), character, minutes, &self.config) {
            Ok(homeworld) => {
                self.clients.bind_player(client, &name);
                self.recompute_turn_duration();
                self.bus.publish(GameEvent::PlayerJoined { name: name.clone(), homeworld });
                let events = self.bus.dispatch();
                self.fan_out_events(&events);
                self.full_sync(&name);
                // Everyone else sees the roster change right away.
                for other in self.clients.connected_players() {
                    if other != name {
                        self.sync_player(&other);
                    }
                }
                self.request_save();
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not seat a new player.");
                self.error(client, "The galaxy is full, no homeworld left");
            }
        }
    }

    fn handle_chat(&mut self, client: ClientId, to: &str, message: String) {
        let Some(from) = self.clients.player_of(client).cloned() else {
            self.error(client, "Join the game first: JOIN <name> [minutes] [character]");
            return;
        };
        if to.eq_ignore_ascii_case("all") {
            self.clients.broadcast(&ServerFrame::Chat {
                from,
                message,
                channel: ChatChannel::All,
            });
            return;
        }
        let Some(target) = self.state.canonical_name(to) else {
            self.error(client, format!("No such player '{to}'"));
            return;
        };
        if !self.clients.is_player_connected(&target) {
            self.error(client, format!("Player '{target}' is not connected"));
            return;
        }
        self.clients.send_to_player(
            &target,
            ServerFrame::Chat { from, message, channel: ChatChannel::Private },
        );
    }

    fn view_artifact(&mut self, client: ClientId, player: &str, artifact: u16) {
        let Some(record) = self.state.artifacts.get(&artifact) else {
            self.error(client, format!("Artifact {artifact} is not there"));
            return;
        };
        let visible_worlds = visibility::visible_worlds(&self.state, player);
        let in_sight = self
            .state
            .worlds
            .values()
            .any(|w| visible_worlds.contains(&w.id) && w.artifacts.contains(&artifact))
            || self
                .state
                .fleets
                .values()
                .any(|f| f.owned_by(player) && f.artifacts.contains(&artifact));
        if !in_sight {
            self.error(client, format!("Artifact {artifact} is not in sight"));
            return;
        }
        let mut text = format!(
            "Artifact {artifact}: '{}', {} points",
            record.name, record.points
        );
        if let Some(effect) = &record.effect {
            text.push_str(&format!(" ({effect})"));
        }
        self.info(client, text);
    }

    fn info(&self, client: ClientId, text: impl Into<String>) {
        self.clients
            .send_to_client(client, ServerFrame::Info { text: text.into() });
    }

    fn error(&self, client: ClientId, text: impl Into<String>) {
        self.clients
            .send_to_client(client, ServerFrame::Error { text: text.into() });
    }
}
