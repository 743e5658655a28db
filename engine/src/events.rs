//! The in-process event bus. Phase code publishes into a buffer; once
//! the mutating phases of a turn are done the buffer is dispatched to
//! the subscribers in publish order. Subscribers only enqueue outbound
//! messages, they never touch game state, and a failing subscriber is
//! logged and skipped.

use protocol::{EventClass, FleetId, PlayerName, WorldId};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// One combat participant as reported to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Combatant {
    pub fleet: FleetId,
    pub owner: PlayerName,
    pub ships_before: u32,
    pub losses: u32,
}

/// Everything that happened in one exchange of fire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombatReport {
    pub world: WorldId,
    pub attackers: Vec<Combatant>,
    pub defenders: Vec<Combatant>,
    /// Garrison and surface damage, already applied.
    pub summary: String,
}

/// Every side effect the turn pipeline can fan out.
#[derive(Clone, Debug, PartialEq)]
pub enum GameEvent {
    FleetMoved {
        fleet: FleetId,
        owner: PlayerName,
        from: WorldId,
        to: WorldId,
        path: Vec<WorldId>,
    },
    Combat(CombatReport),
    WorldCaptured {
        world: WorldId,
        new_owner: Option<PlayerName>,
        old_owner: Option<PlayerName>,
    },
    Production {
        world: WorldId,
        owner: PlayerName,
        metal: u32,
        grown: u32,
    },
    Build {
        world: WorldId,
        owner: PlayerName,
        what: String,
        amount: u32,
    },
    PlayerJoined {
        name: PlayerName,
        homeworld: WorldId,
    },
    TurnProcessed {
        turn: u64,
    },
    CargoJettisoned {
        fleet: FleetId,
        owner: PlayerName,
        world: WorldId,
        amount: u32,
    },
    ArtifactTransferred {
        artifact: u16,
        name: String,
        owner: PlayerName,
        world: WorldId,
    },
    PbbDropped {
        world: WorldId,
        by: PlayerName,
    },
    BlackHoleDestruction {
        fleet: FleetId,
        owner: PlayerName,
        world: WorldId,
    },
    ConversionOccurred {
        world: WorldId,
        converts: u32,
    },
    PlunderOccurred {
        world: WorldId,
        by: PlayerName,
        amount: u32,
    },
}

impl GameEvent {
    /// The world the event is anchored at, used for visibility-based fan-out.
    pub fn location(&self) -> Option<WorldId> {
        match self {
            GameEvent::FleetMoved { to, .. } => Some(*to),
            GameEvent::Combat(report) => Some(report.world),
            GameEvent::WorldCaptured { world, .. }
            | GameEvent::Production { world, .. }
            | GameEvent::Build { world, .. }
            | GameEvent::CargoJettisoned { world, .. }
            | GameEvent::ArtifactTransferred { world, .. }
            | GameEvent::PbbDropped { world, .. }
            | GameEvent::BlackHoleDestruction { world, .. }
            | GameEvent::ConversionOccurred { world, .. }
            | GameEvent::PlunderOccurred { world, .. } => Some(*world),
            GameEvent::PlayerJoined { .. } | GameEvent::TurnProcessed { .. } => None,
        }
    }

    /// Players directly involved; they observe the event even without
    /// sight of its world.
    pub fn involved(&self) -> Vec<PlayerName> {
        match self {
            GameEvent::FleetMoved { owner, .. }
            | GameEvent::Production { owner, .. }
            | GameEvent::Build { owner, .. }
            | GameEvent::CargoJettisoned { owner, .. }
            | GameEvent::ArtifactTransferred { owner, .. }
            | GameEvent::BlackHoleDestruction { owner, .. } => vec![owner.clone()],
            GameEvent::Combat(report) => report
                .attackers
                .iter()
                .chain(report.defenders.iter())
                .map(|c| c.owner.clone())
                .collect(),
            GameEvent::WorldCaptured { new_owner, old_owner, .. } => new_owner
                .iter()
                .chain(old_owner.iter())
                .cloned()
                .collect(),
            GameEvent::PbbDropped { by, .. } | GameEvent::PlunderOccurred { by, .. } => {
                vec![by.clone()]
            }
            GameEvent::PlayerJoined { name, .. } => vec![name.clone()],
            GameEvent::TurnProcessed { .. } | GameEvent::ConversionOccurred { .. } => Vec::new(),
        }
    }

    /// The observer-facing text and its display class.
    pub fn render(&self) -> (String, EventClass) {
        match self {
            GameEvent::FleetMoved { fleet, owner, to, .. } => {
                (format!("Fleet {fleet} ({owner}) arrived at world {to}"), EventClass::Info)
            }
            GameEvent::Combat(report) => (
                format!("Combat at world {}: {}", report.world, report.summary),
                EventClass::Combat,
            ),
            GameEvent::WorldCaptured { world, new_owner, old_owner } => {
                let text = match (new_owner, old_owner) {
                    (Some(new), Some(old)) => {
                        format!("World {world} fell from {old} to {new}")
                    }
                    (Some(new), None) => format!("World {world} is now owned by {new}"),
                    (None, Some(old)) => format!("World {world} slipped from {old} to neutral"),
                    (None, None) => format!("World {world} changed hands"),
                };
                (text, EventClass::Capture)
            }
            GameEvent::Production { world, metal, grown, .. } => (
                format!("World {world} produced {metal} metal, population grew by {grown}"),
                EventClass::Production,
            ),
            GameEvent::Build { world, what, amount, .. } => (
                format!("World {world} built {amount} {what}"),
                EventClass::Production,
            ),
            GameEvent::PlayerJoined { name, .. } => {
                (format!("{name} joined the game"), EventClass::Info)
            }
            GameEvent::TurnProcessed { turn } => {
                (format!("Turn {turn} complete"), EventClass::Info)
            }
            GameEvent::CargoJettisoned { fleet, amount, .. } => (
                format!("Fleet {fleet} jettisoned {amount} cargo"),
                EventClass::Info,
            ),
            GameEvent::ArtifactTransferred { name, owner, .. } => {
                (format!("{owner} moved the artifact '{name}'"), EventClass::Info)
            }
            GameEvent::PbbDropped { world, by } => (
                format!("A planet buster from {by} devastated world {world}"),
                EventClass::Combat,
            ),
            GameEvent::BlackHoleDestruction { fleet, world, .. } => (
                format!("Fleet {fleet} was swallowed by the black hole at world {world}"),
                EventClass::Combat,
            ),
            GameEvent::ConversionOccurred { world, converts } => (
                format!("{converts} souls at world {world} joined the faith"),
                EventClass::Info,
            ),
            GameEvent::PlunderOccurred { world, by, amount } => (
                format!("{by} plundered {amount} metal from world {world}"),
                EventClass::Combat,
            ),
        }
    }
}

/// A subscriber callback. Gets every event once, in publish order.
pub type Subscriber = Box<dyn FnMut(&GameEvent) + Send>;

/// Buffering publish/subscribe. Publishing never blocks and never
/// invokes handlers; dispatch happens explicitly once the world has
/// stopped moving.
#[derive(Default)]
pub struct EventBus {
    buffer: Vec<GameEvent>,
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn subscribe(&mut self, subscriber: Subscriber) {
        self.subscribers.push(subscriber);
    }

    /// Buffers an event for the post-phase dispatch.
    pub fn publish(&mut self, event: GameEvent) {
        self.buffer.push(event);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Delivers all buffered events to every subscriber. A panicking
    /// subscriber is logged and does not stop dispatch.
    pub fn dispatch(&mut self) -> Vec<GameEvent> {
        let events = std::mem::take(&mut self.buffer);
        for event in &events {
            for subscriber in self.subscribers.iter_mut() {
                let outcome = catch_unwind(AssertUnwindSafe(|| subscriber(event)));
                if outcome.is_err() {
                    tracing::error!(?event, "Event subscriber panicked, skipping it.");
                }
            }
        }
        events
    }

    /// Drops buffered events without delivery, used when a turn rolls back.
    pub fn discard(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_delivers_in_publish_order_and_drains() {
        let mut bus = EventBus::default();
        let seen: Arc<std::sync::Mutex<Vec<u64>>> = Arc::default();
        let sink = seen.clone();
        bus.subscribe(Box::new(move |event| {
            if let GameEvent::TurnProcessed { turn } = event {
                sink.lock().unwrap().push(*turn);
            }
        }));
        bus.publish(GameEvent::TurnProcessed { turn: 1 });
        bus.publish(GameEvent::TurnProcessed { turn: 2 });
        assert_eq!(bus.pending(), 2);
        bus.dispatch();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_dispatch() {
        let mut bus = EventBus::default();
        let delivered = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Box::new(|_| panic!("subscriber bug")));
        let counter = delivered.clone();
        bus.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        bus.publish(GameEvent::TurnProcessed { turn: 1 });
        bus.dispatch();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn discard_supports_rollback() {
        let mut bus = EventBus::default();
        bus.publish(GameEvent::TurnProcessed { turn: 1 });
        bus.discard();
        assert_eq!(bus.pending(), 0);
    }
}
