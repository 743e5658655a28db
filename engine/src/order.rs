//! The typed orders players queue, plus the per-player queue with its
//! exclusivity rules. Orders are produced by the parser, checked by the
//! validator and consumed by the turn processor.

use protocol::{FleetId, PlayerName, WorldId};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// What a build order produces.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildProduct {
    IShips,
    PShips,
    /// Ships built straight into a fleet at the world.
    ToFleet(FleetId),
    Industry,
    Limit,
    Robots,
}

/// Where transferred ships go.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferTarget {
    IShips,
    PShips,
    Fleet(FleetId),
}

/// What a fire order aims at.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireTarget {
    Fleet(FleetId),
    /// The industry garrison, then industry.
    Industry,
    /// The population garrison, then population.
    Population,
    /// Every fleet defending a homeworld, until it is neutralized.
    Homeworld,
    /// The convert part of the population.
    Converts,
}

/// Relation changes a player can declare.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationChange {
    Ally,
    Loader,
    Unloader,
    Jihad,
    /// Back to neutral: clears ally and jihad.
    Neutral,
}

/// Source or destination of an artifact transfer.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactPlace {
    Fleet(FleetId),
    /// The world the carrying fleet is at.
    LocalWorld,
}

/// A queued game order. One tagged variant per operation; dispatch in
/// the turn phases is a plain pattern match.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Order {
    Move {
        fleet: FleetId,
        path: Vec<WorldId>,
    },
    Build {
        world: WorldId,
        amount: u32,
        product: BuildProduct,
    },
    TransferShips {
        fleet: FleetId,
        amount: u32,
        target: TransferTarget,
    },
    /// `amount` of None means "as much as fits".
    LoadCargo {
        fleet: FleetId,
        amount: Option<u32>,
    },
    UnloadCargo {
        fleet: FleetId,
        amount: Option<u32>,
    },
    JettisonCargo {
        fleet: FleetId,
        amount: Option<u32>,
    },
    /// Deliver cargo as consumer goods to another player's world.
    UnloadConsumerGoods {
        fleet: FleetId,
        amount: Option<u32>,
    },
    Migrate {
        world: WorldId,
        amount: u32,
        target: WorldId,
    },
    MigrateConverts {
        world: WorldId,
        amount: u32,
        target: WorldId,
    },
    FireAtFleet {
        fleet: FleetId,
        target: FleetId,
    },
    FireAtTarget {
        fleet: FleetId,
        target: FireTarget,
    },
    Ambush {
        fleet: FleetId,
    },
    /// Scope of None suppresses ambushing everywhere this turn.
    NoAmbush {
        world: Option<WorldId>,
    },
    ConditionalFire {
        fleet: FleetId,
        target: FireTarget,
    },
    Peace {
        fleet: FleetId,
    },
    NotPeace {
        fleet: FleetId,
    },
    GiftFleet {
        fleet: FleetId,
        to: PlayerName,
    },
    GiftWorld {
        world: WorldId,
        to: PlayerName,
    },
    BuildPbb {
        fleet: FleetId,
    },
    DropPbb {
        fleet: FleetId,
    },
    RobotAttack {
        fleet: FleetId,
        amount: u32,
    },
    TransferArtifact {
        from: ArtifactPlace,
        from_world: Option<WorldId>,
        artifact: u16,
        to: ArtifactPlace,
    },
    DeclareRelation {
        change: RelationChange,
        player: PlayerName,
    },
    Plunder {
        fleet: FleetId,
        amount: u32,
    },
    ScrapShips {
        world: WorldId,
        amount: u32,
    },
    Probe {
        world: WorldId,
    },
}

impl Order {
    /// The fleet bound by the one-exclusive-order-per-fleet rule, if any.
    /// Covers movement, all fire variants, ambush and conditional fire.
    pub fn exclusive_fleet(&self) -> Option<FleetId> {
        match self {
            Order::Move { fleet, .. }
            | Order::FireAtFleet { fleet, .. }
            | Order::FireAtTarget { fleet, .. }
            | Order::Ambush { fleet }
            | Order::ConditionalFire { fleet, .. } => Some(*fleet),
            _ => None,
        }
    }

    /// The canonical textual form, stable across parser generations.
    /// This is what queued-order lists show and what `CANCEL` indexes.
    pub fn normalized(&self) -> String {
        match self {
            Order::Move { fleet, path } => {
                let mut out = format!("F{fleet}");
                for world in path {
                    let _ = write!(out, "W{world}");
                }
                out
            }
            Order::Build { world, amount, product } => {
                let suffix = match product {
                    BuildProduct::IShips => "I".to_string(),
                    BuildProduct::PShips => "P".to_string(),
                    BuildProduct::ToFleet(fleet) => format!("F{fleet}"),
                    BuildProduct::Industry => "IND".to_string(),
                    BuildProduct::Limit => "LIMIT".to_string(),
                    BuildProduct::Robots => "ROBOT".to_string(),
                };
                format!("W{world}B{amount}{suffix}")
            }
            Order::TransferShips { fleet, amount, target } => {
                let suffix = match target {
                    TransferTarget::IShips => "I".to_string(),
                    TransferTarget::PShips => "P".to_string(),
                    TransferTarget::Fleet(other) => format!("F{other}"),
                };
                format!("F{fleet}T{amount}{suffix}")
            }
            Order::LoadCargo { fleet, amount } => match amount {
                Some(n) => format!("F{fleet}L{n}"),
                None => format!("F{fleet}L"),
            },
            Order::UnloadCargo { fleet, amount } => match amount {
                Some(n) => format!("F{fleet}U{n}"),
                None => format!("F{fleet}U"),
            },
            Order::UnloadConsumerGoods { fleet, amount } => match amount {
                Some(n) => format!("F{fleet}UC{n}"),
                None => format!("F{fleet}UC"),
            },
            Order::JettisonCargo { fleet, amount } => match amount {
                Some(n) => format!("F{fleet}J{n}"),
                None => format!("F{fleet}J"),
            },
            Order::Migrate { world, amount, target } => format!("W{world}M{amount}W{target}"),
            Order::MigrateConverts { world, amount, target } => {
                format!("C{world}M{amount}W{target}")
            }
            Order::FireAtFleet { fleet, target } => format!("F{fleet}AF{target}"),
            Order::FireAtTarget { fleet, target } => {
                format!("F{fleet}A{}", fire_target_letter(*target))
            }
            Order::Ambush { fleet } => format!("F{fleet}A"),
            Order::NoAmbush { world } => match world {
                Some(world) => format!("Z{world}"),
                None => "Z".to_string(),
            },
            Order::ConditionalFire { fleet, target } => match target {
                FireTarget::Fleet(other) => format!("F{fleet}CF{other}"),
                other => format!("F{fleet}C{}", fire_target_letter(*other)),
            },
            Order::Peace { fleet } => format!("F{fleet}Q"),
            Order::NotPeace { fleet } => format!("F{fleet}X"),
            Order::GiftFleet { fleet, to } => format!("F{fleet}G={to}"),
            Order::GiftWorld { world, to } => format!("W{world}G={to}"),
            Order::BuildPbb { fleet } => format!("F{fleet}B"),
            Order::DropPbb { fleet } => format!("F{fleet}D"),
            Order::RobotAttack { fleet, amount } => format!("F{fleet}R{amount}"),
            Order::TransferArtifact { from, from_world, artifact, to } => {
                let src = match (from, from_world) {
                    (ArtifactPlace::Fleet(fleet), _) => format!("F{fleet}"),
                    (ArtifactPlace::LocalWorld, Some(world)) => format!("W{world}"),
                    (ArtifactPlace::LocalWorld, None) => "W".to_string(),
                };
                let dst = match to {
                    ArtifactPlace::Fleet(fleet) => format!("F{fleet}"),
                    ArtifactPlace::LocalWorld => "W".to_string(),
                };
                format!("{src}TA{artifact}{dst}")
            }
            Order::DeclareRelation { change, player } => {
                let letter = match change {
                    RelationChange::Ally => 'A',
                    RelationChange::Loader => 'L',
                    RelationChange::Unloader => 'X',
                    RelationChange::Jihad => 'J',
                    RelationChange::Neutral => 'N',
                };
                format!("{letter}={player}")
            }
            Order::Plunder { fleet, amount } => format!("F{fleet}P{amount}"),
            Order::ScrapShips { world, amount } => format!("W{world}S{amount}"),
            Order::Probe { world } => format!("W{world}X"),
        }
    }
}

fn fire_target_letter(target: FireTarget) -> char {
    match target {
        FireTarget::Industry => 'I',
        FireTarget::Population => 'P',
        FireTarget::Homeworld => 'H',
        FireTarget::Converts => 'C',
        FireTarget::Fleet(_) => 'F',
    }
}

/// One entry of a player's order list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueuedOrder {
    pub order: Order,
    /// The normalized text shown in order lists.
    pub text: String,
}

/// The ordered per-player order list. Appending enforces the
/// exclusivity rule; the processor walks it by order index.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderQueue {
    entries: Vec<QueuedOrder>,
}

impl OrderQueue {
    /// Appends an order. Fails when the fleet already holds an exclusive
    /// order this turn.
    pub fn append(&mut self, order: Order) -> Result<&QueuedOrder, FleetId> {
        if let Some(fleet) = order.exclusive_fleet()
            && self.has_exclusive_order(fleet)
        {
            return Err(fleet);
        }
        let text = order.normalized();
        self.entries.push(QueuedOrder { order, text });
        Ok(self.entries.last().unwrap())
    }

    /// Whether the fleet already queued a movement or fire order.
    pub fn has_exclusive_order(&self, fleet: FleetId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.order.exclusive_fleet() == Some(fleet))
    }

    /// Removes the order at the (zero-based) index, returning it.
    pub fn cancel(&mut self, index: usize) -> Option<QueuedOrder> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedOrder> {
        self.entries.iter()
    }

    /// The orders matching a selector, with their queue index, in queue order.
    pub fn matching<'a, F>(&'a self, mut pred: F) -> impl Iterator<Item = (usize, &'a Order)>
    where
        F: FnMut(&Order) -> bool + 'a,
    {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, entry)| pred(&entry.order))
            .map(|(index, entry)| (index, &entry.order))
    }

    pub fn texts(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains all orders for turn processing.
    pub fn take_all(&mut self) -> Vec<QueuedOrder> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_orders_clash_per_fleet() {
        let mut queue = OrderQueue::default();
        queue
            .append(Order::Move { fleet: 1, path: vec![2, 3] })
            .unwrap();
        // A second exclusive order for fleet 1 is refused.
        assert_eq!(queue.append(Order::Ambush { fleet: 1 }), Err(1));
        assert_eq!(
            queue.append(Order::ConditionalFire { fleet: 1, target: FireTarget::Industry }),
            Err(1)
        );
        // Another fleet is free to ambush, and non-exclusive orders pass.
        queue.append(Order::Ambush { fleet: 2 }).unwrap();
        queue
            .append(Order::LoadCargo { fleet: 1, amount: None })
            .unwrap();
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn cancel_by_index_preserves_order() {
        let mut queue = OrderQueue::default();
        queue.append(Order::Peace { fleet: 1 }).unwrap();
        queue.append(Order::Peace { fleet: 2 }).unwrap();
        queue.append(Order::Peace { fleet: 3 }).unwrap();
        let removed = queue.cancel(1).unwrap();
        assert_eq!(removed.text, "F2Q");
        assert_eq!(queue.texts(), vec!["F1Q", "F3Q"]);
        assert!(queue.cancel(7).is_none());
    }

    #[test]
    fn normalized_text_matches_the_compact_grammar() {
        let cases = [
            (Order::Move { fleet: 1, path: vec![2, 3] }, "F1W2W3"),
            (
                Order::Build { world: 3, amount: 10, product: BuildProduct::IShips },
                "W3B10I",
            ),
            (
                Order::Build { world: 3, amount: 2, product: BuildProduct::ToFleet(4) },
                "W3B2F4",
            ),
            (
                Order::TransferShips { fleet: 2, amount: 5, target: TransferTarget::PShips },
                "F2T5P",
            ),
            (Order::LoadCargo { fleet: 2, amount: None }, "F2L"),
            (Order::UnloadConsumerGoods { fleet: 2, amount: Some(4) }, "F2UC4"),
            (Order::Migrate { world: 1, amount: 10, target: 2 }, "W1M10W2"),
            (Order::MigrateConverts { world: 1, amount: 10, target: 2 }, "C1M10W2"),
            (Order::FireAtFleet { fleet: 5, target: 6 }, "F5AF6"),
            (
                Order::FireAtTarget { fleet: 5, target: FireTarget::Homeworld },
                "F5AH",
            ),
            (Order::Ambush { fleet: 5 }, "F5A"),
            (Order::NoAmbush { world: Some(9) }, "Z9"),
            (Order::NoAmbush { world: None }, "Z"),
            (
                Order::ConditionalFire { fleet: 5, target: FireTarget::Fleet(6) },
                "F5CF6",
            ),
            (Order::GiftFleet { fleet: 1, to: "Bob".into() }, "F1G=Bob"),
            (Order::BuildPbb { fleet: 7 }, "F7B"),
            (Order::DropPbb { fleet: 7 }, "F7D"),
            (
                Order::TransferArtifact {
                    from: ArtifactPlace::Fleet(3),
                    from_world: None,
                    artifact: 7,
                    to: ArtifactPlace::LocalWorld,
                },
                "F3TA7W",
            ),
            (
                Order::DeclareRelation { change: RelationChange::Jihad, player: "Bob".into() },
                "J=Bob",
            ),
            (Order::ScrapShips { world: 4, amount: 3 }, "W4S3"),
            (Order::Probe { world: 4 }, "W4X"),
        ];
        for (order, expected) in cases {
            assert_eq!(order.normalized(), expected);
        }
    }
}
