//! Player orders and the per-unit order queue
//!
//! Orders arrive as messages. The decision system reads the front of the
//! queue when no higher-priority concern (survival, engagement) applies.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::battle::state::MovePace;
use crate::battle::store::IndexRemap;
use crate::core::types::{UnitRef, Vec2};

/// A standing instruction from the player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Order {
    MoveTo(Vec2),
    MoveFastTo(Vec2),
    SneakTo(Vec2),
    /// Hold and watch an angle (radians)
    Defend(f32),
    /// Go to ground facing an angle (radians)
    Hide(f32),
    Engage(UnitRef),
    SuppressArea(Vec2),
    /// Clear the queue and go idle
    Stop,
}

impl Order {
    /// Destination and pace for movement orders
    pub fn movement(&self) -> Option<(Vec2, MovePace)> {
        match self {
            Order::MoveTo(dest) => Some((*dest, MovePace::Walk)),
            Order::MoveFastTo(dest) => Some((*dest, MovePace::Run)),
            Order::SneakTo(dest) => Some((*dest, MovePace::Sneak)),
            _ => None,
        }
    }

    /// Same movement order aimed at another point; other orders unchanged
    pub fn with_destination(self, dest: Vec2) -> Order {
        match self {
            Order::MoveTo(_) => Order::MoveTo(dest),
            Order::MoveFastTo(_) => Order::MoveFastTo(dest),
            Order::SneakTo(_) => Order::SneakTo(dest),
            other => other,
        }
    }
}

/// How a new order combines with the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderMode {
    #[default]
    Replace,
    Append,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderQueue {
    orders: VecDeque<Order>,
}

impl OrderQueue {
    pub fn current(&self) -> Option<&Order> {
        self.orders.front()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    pub fn issue(&mut self, order: Order, mode: OrderMode) {
        if order == Order::Stop {
            self.orders.clear();
            return;
        }
        if mode == OrderMode::Replace {
            self.orders.clear();
        }
        self.orders.push_back(order);
    }

    /// Drop the front order; returns it
    pub fn complete(&mut self) -> Option<Order> {
        self.orders.pop_front()
    }

    pub fn clear(&mut self) {
        self.orders.clear();
    }

    /// Engage orders on a removed unit are dropped
    pub fn apply_remap(&mut self, remap: &IndexRemap) {
        self.orders.retain_mut(|order| match order {
            Order::Engage(target) => match remap.remap(*target) {
                Some(moved) => {
                    *target = moved;
                    true
                }
                None => false,
            },
            _ => true,
        });
    }
}
