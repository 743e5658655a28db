//! The engine task. One task owns the authoritative [`GameState`] and
//! everything around it: connection tasks forward typed messages into a
//! bounded queue, the loop drains a small batch per iteration, advances
//! the clock, fires turns and streams results back out through the
//! registry. Nothing else ever mutates game state.

use crate::registry::{ClientId, ClientRegistry};
use engine::config::GameConfig;
use engine::delta::DeltaEngine;
use engine::events::{EventBus, GameEvent};
use engine::persistence;
use engine::scheduler::TurnScheduler;
use engine::state::GameState;
use engine::turn::process_turn;
use engine::visibility;
use protocol::{ClientFrame, PlayerName, ServerFrame};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// How many inbound messages the loop drains per iteration before it
/// lets the clock advance again.
const INBOUND_BATCH: usize = 32;

/// Everything the connection tasks and admin handlers can ask of the engine.
pub enum EngineMessage {
    /// A new transport connection with its outbound queue.
    Connect {
        client: ClientId,
        outbound: mpsc::Sender<ServerFrame>,
    },
    /// One inbound frame from a client.
    Frame { client: ClientId, frame: ClientFrame },
    /// The connection closed; the player record stays.
    Disconnect { client: ClientId },
    /// Admin: a human-readable status page.
    Status { reply: oneshot::Sender<String> },
    /// Graceful shutdown: save, then acknowledge.
    Shutdown { done: oneshot::Sender<()> },
}

/// The engine-owned world plus everything needed to talk back.
pub struct Engine {
    pub(crate) state: GameState,
    pub(crate) config: GameConfig,
    pub(crate) scheduler: TurnScheduler,
    pub(crate) deltas: DeltaEngine,
    pub(crate) bus: EventBus,
    pub(crate) clients: ClientRegistry,
    save_slot: SaveSlot,
    pub(crate) data_dir: PathBuf,
    winner_announced: bool,
}

impl Engine {
    pub fn new(state: GameState, config: GameConfig, data_dir: PathBuf) -> Engine {
        let mut scheduler = TurnScheduler::new(&config);
        let preferences: Vec<u64> = state
            .players
            .values()
            .map(|p| p.turn_preference_minutes)
            .collect();
        scheduler.recompute_duration(&preferences);
        let mut bus = EventBus::default();
        bus.subscribe(Box::new(|event| {
            tracing::debug!(?event, "Game event.");
        }));
        let winner_announced = state.winner.is_some();
        Engine {
            state,
            config,
            scheduler,
            deltas: DeltaEngine::default(),
            bus,
            clients: ClientRegistry::default(),
            save_slot: SaveSlot::spawn(data_dir.clone()),
            data_dir,
            winner_announced,
        }
    }

    /// The main loop: drain a batch of inbound messages, then let the
    /// clock tick. Returns on shutdown.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<EngineMessage>) {
        let mut clock = tokio::time::interval(std::time::Duration::from_secs(1));
        clock.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                message = inbox.recv() => {
                    let Some(message) = message else {
                        tracing::info!("Engine inbox closed, stopping.");
                        return;
                    };
                    if self.handle_message(message).await {
                        return;
                    }
                    // Drain a bounded batch so a chatty client cannot
                    // starve the clock.
                    for _ in 1..INBOUND_BATCH {
                        match inbox.try_recv() {
                            Ok(message) => {
                                if self.handle_message(message).await {
                                    return;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    self.fire_if_everyone_ready();
                }
                _ = clock.tick() => {
                    self.advance_clock();
                }
            }
        }
    }

    /// Handles one message; true means shut down.
    async fn handle_message(&mut self, message: EngineMessage) -> bool {
        match message {
            EngineMessage::Connect { client, outbound } => {
                self.clients.insert(client, outbound);
                self.clients.send_to_client(
                    client,
                    ServerFrame::Welcome { id: format!("client-{client}") },
                );
            }
            EngineMessage::Frame { client, frame } => {
                self.handle_frame(client, frame).await;
            }
            EngineMessage::Disconnect { client } => {
                if let Some(player) = self.clients.remove(client) {
                    if let Some(record) = self.state.player_mut(&player) {
                        record.connected = false;
                    }
                    tracing::info!(%player, "Player disconnected, orders retained.");
                    // The rest of the table may be unanimous now.
                    self.fire_if_everyone_ready();
                }
            }
            EngineMessage::Status { reply } => {
                let _ = reply.send(self.status_page());
            }
            EngineMessage::Shutdown { done } => {
                if let Err(e) = persistence::save_snapshot(&self.state, &self.data_dir).await {
                    tracing::error!(error = %e, "Final save failed.");
                }
                let _ = done.send(());
                return true;
            }
        }
        false
    }

    /// One second of wall clock: either the turn fires or a timer frame
    /// goes out.
    fn advance_clock(&mut self) {
        if self.scheduler.tick() {
            if self.state.players.is_empty() {
                // An empty galaxy has no turns to resolve.
                self.scheduler.reset();
                return;
            }
            self.fire_turn("clock ran out");
        } else {
            let clock = self.scheduler.clock_snapshot(&self.state);
            self.clients.broadcast(&ServerFrame::Timer {
                time_remaining: clock.time_remaining,
                players_ready: clock.players_ready,
                total_players: clock.total_players,
                game_turn: self.state.turn,
            });
        }
    }

    pub(crate) fn fire_if_everyone_ready(&mut self) {
        if TurnScheduler::all_ready(&self.state) {
            self.fire_turn("all players ready");
        }
    }

    /// Resolves a turn and streams the results.
    fn fire_turn(&mut self, trigger: &str) {
        tracing::info!(turn = self.state.turn + 1, trigger, "Resolving turn.");
        let outcome = process_turn(&mut self.state, &self.config, &mut self.bus);

        for player in self.state.players.values_mut() {
            player.ready = false;
        }
        self.scheduler.reset();

        if outcome.rolled_back {
            self.clients.broadcast(&ServerFrame::Info {
                text: "The turn could not be resolved and was rolled back.".into(),
            });
            return;
        }

        self.fan_out_events(&outcome.events);
        self.sync_connected_players();

        if let Some(winner) = outcome.winner
            && !self.winner_announced
        {
            self.winner_announced = true;
            self.clients.broadcast(&ServerFrame::Info {
                text: format!("{winner} has won the game!"),
            });
        }

        self.save_slot.request(self.state.clone());
    }

    /// Sends each event to every observer: players with sight of its
    /// world, plus the directly involved, plus everyone for the global ones.
    pub(crate) fn fan_out_events(&mut self, events: &[GameEvent]) {
        for event in events {
            let (text, event_type) = event.render();
            let involved = event.involved();
            let location = event.location();
            for player in self.clients.connected_players() {
                let observes = match location {
                    None => true,
                    Some(world) => {
                        involved.contains(&player)
                            || visibility::visible_worlds(&self.state, &player).contains(&world)
                    }
                };
                if !observes {
                    continue;
                }
                self.clients.send_to_player(
                    &player,
                    ServerFrame::Event { text: text.clone(), event_type },
                );
                // Movement additionally drives the front-end animation.
                if let GameEvent::FleetMoved { fleet, from, to, path, .. } = event {
                    self.clients.send_to_player(
                        &player,
                        ServerFrame::AnimateMovement {
                            fleet_id: *fleet,
                            from_world: *from,
                            to_world: *to,
                            path: path.clone(),
                            duration: path.len() as u64 * 500,
                        },
                    );
                }
            }
        }
    }

    /// Delta (or nothing) for every synced player; a full projection for
    /// anyone the delta engine has no baseline for.
    pub(crate) fn sync_connected_players(&mut self) {
        for player in self.clients.connected_players() {
            self.sync_player(&player);
        }
    }

    /// Sends the minimal update for one player.
    pub(crate) fn sync_player(&mut self, player: &PlayerName) {
        if self.state.player(player).is_none() {
            return;
        }
        let clock = self.scheduler.clock_snapshot(&self.state);
        let projection = visibility::project(&self.state, player, clock);
        if self.deltas.knows(player) {
            if let Some(changes) = self.deltas.compute_delta(&projection) {
                self.clients
                    .send_to_player(player, ServerFrame::Delta { changes });
            }
        } else {
            self.deltas.record_full_sync(&projection);
            self.clients
                .send_to_player(player, ServerFrame::Update { state: projection });
        }
    }

    /// Hard-syncs one player with a full projection.
    pub(crate) fn full_sync(&mut self, player: &PlayerName) {
        if self.state.player(player).is_none() {
            return;
        }
        let clock = self.scheduler.clock_snapshot(&self.state);
        let projection = visibility::project(&self.state, player, clock);
        self.deltas.record_full_sync(&projection);
        self.clients
            .send_to_player(player, ServerFrame::Update { state: projection });
    }

    /// Hands the current state to the write-behind saver.
    pub(crate) fn request_save(&self) {
        self.save_slot.request(self.state.clone());
    }

    /// Re-derives the turn duration from the current player set.
    pub(crate) fn recompute_turn_duration(&mut self) {
        let preferences: Vec<u64> = self
            .state
            .players
            .values()
            .map(|p| p.turn_preference_minutes)
            .collect();
        self.scheduler.recompute_duration(&preferences);
    }

    /// The admin status page, one line per player.
    fn status_page(&self) -> String {
        let clock = self.scheduler.clock_snapshot(&self.state);
        let mut lines = vec![format!(
            "Turn {:>4}  {}s remaining  {}/{} ready",
            self.state.turn, clock.time_remaining, clock.players_ready, clock.total_players
        )];
        for player in self.state.players.values() {
            lines.push(format!(
                "Player: {:<20} {:<18} Score: {:>6} ready: {:<5} connected: {}",
                player.name,
                format!("{:?}", player.character),
                player.score,
                player.ready,
                player.connected
            ));
        }
        if let Some(winner) = &self.state.winner {
            lines.push(format!("Winner: {winner}"));
        }
        lines.join("\n")
    }
}

/// The write-behind save slot: the engine drops a state clone in and
/// keeps running; the saver task always writes the newest one it can
/// see, so back-to-back requests coalesce.
struct SaveSlot {
    tx: mpsc::Sender<GameState>,
}

impl SaveSlot {
    fn spawn(data_dir: PathBuf) -> SaveSlot {
        let (tx, mut rx) = mpsc::channel::<GameState>(8);
        tokio::spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                // Requests that piled up collapse into the newest state.
                while let Ok(newer) = rx.try_recv() {
                    latest = newer;
                }
                if let Err(e) = persistence::save_snapshot(&latest, &data_dir).await {
                    tracing::error!(error = %e, "Snapshot save failed.");
                }
            }
        });
        SaveSlot { tx }
    }

    fn request(&self, state: GameState) {
        if self.tx.try_send(state).is_err() {
            tracing::warn!("Save slot backed up, skipping one snapshot request.");
        }
    }
}
