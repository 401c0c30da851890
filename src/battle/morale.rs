//! Morale and suppression
//!
//! Suppression decays every tick. Morale recovers when a unit is not
//! suppressed, drains while its squad is leaderless and drops sharply
//! when squad mates go down. Low morale bands can override decisions.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::battle::constants::{
    BROKEN_THRESHOLD, CAUTIOUS_THRESHOLD, SHAKEN_THRESHOLD, STEADY_THRESHOLD,
};
use crate::battle::messages::{Casualty, Message};
use crate::battle::units::Unit;
use crate::battle::world::BattleWorld;
use crate::core::config::SimulationConfig;
use crate::core::rng::{roll_rng, RngStream};
use crate::core::types::{Tick, UnitRef};

/// Named morale level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MoraleBand {
    Steady,
    Cautious,
    Shaken,
    Broken,
    Panicked,
}

impl MoraleBand {
    /// Band for a morale value on a 0..=max scale
    pub fn from_morale(morale: f32, max: f32) -> Self {
        let fraction = if max > 0.0 { morale / max } else { 0.0 };
        if fraction >= STEADY_THRESHOLD {
            MoraleBand::Steady
        } else if fraction >= CAUTIOUS_THRESHOLD {
            MoraleBand::Cautious
        } else if fraction >= SHAKEN_THRESHOLD {
            MoraleBand::Shaken
        } else if fraction >= BROKEN_THRESHOLD {
            MoraleBand::Broken
        } else {
            MoraleBand::Panicked
        }
    }

    pub fn of(unit: &Unit, config: &SimulationConfig) -> Self {
        Self::from_morale(unit.morale, config.morale_max)
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, MoraleBand::Broken | MoraleBand::Panicked)
    }
}

/// How a broken unit deviates from its normal decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoraleOverride {
    /// Run away from the nearest threat
    Flee,
    /// Ignore queued orders this decision
    RefuseOrders,
}

/// Roll whether low morale takes over this decision
///
/// Draws from the unit's morale stream for this tick, so the result does
/// not depend on evaluation order.
pub fn override_roll(
    unit_ref: UnitRef,
    unit: &Unit,
    seed: u64,
    tick: Tick,
    config: &SimulationConfig,
) -> Option<MoraleOverride> {
    let (chance, outcome) = match MoraleBand::of(unit, config) {
        MoraleBand::Panicked => (config.panicked_override_chance, MoraleOverride::Flee),
        MoraleBand::Broken => (config.broken_override_chance, MoraleOverride::RefuseOrders),
        _ => return None,
    };
    let mut rng = roll_rng(seed, tick, unit_ref.stream_key(), RngStream::Morale);
    if rng.gen::<f32>() < chance {
        Some(outcome)
    } else {
        None
    }
}

/// Per-tick upkeep for one unit: suppression decay, recovery, leaderless drain
pub fn tick(
    unit_ref: UnitRef,
    unit: &Unit,
    leader_alive: bool,
    config: &SimulationConfig,
) -> Vec<Message> {
    let mut messages = Vec::new();
    if !unit.is_active() {
        return messages;
    }
    let dt = config.dt();

    if unit.suppression > 0.0 {
        messages.push(Message::AdjustSuppression {
            unit: unit_ref,
            delta: -config.suppression_decay_per_second * dt,
        });
    }

    let mut morale_delta = 0.0;
    if !unit.is_suppressed(config.suppressed_threshold) && unit.morale < config.morale_max {
        morale_delta += config.morale_recovery_per_second * dt;
    }
    if !leader_alive {
        morale_delta -= config.leaderless_drain_per_second * dt;
    }
    if morale_delta != 0.0 {
        messages.push(Message::AdjustMorale {
            unit: unit_ref,
            delta: morale_delta,
        });
    }

    messages
}

/// Morale hit to the victim's squad mates
///
/// A unit that was already unconscious has been counted once; finishing
/// it off costs nothing further.
pub fn on_casualty(
    world: &BattleWorld,
    casualty: &Casualty,
    config: &SimulationConfig,
) -> Vec<Message> {
    if casualty.was_incapacitated {
        return Vec::new();
    }
    let Some(squad) = casualty.squad.and_then(|id| world.squads.get(id)) else {
        return Vec::new();
    };

    let mut loss = config.casualty_morale_loss;
    if casualty.was_leader {
        loss += config.leader_loss_morale_loss;
    }

    squad
        .members
        .iter()
        .filter(|member| **member != casualty.unit)
        .filter(|member| world.unit(**member).is_some_and(|u| u.is_active()))
        .map(|member| Message::AdjustMorale {
            unit: *member,
            delta: -loss,
        })
        .collect()
}
