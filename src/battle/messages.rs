//! Message engine: the single place world state is mutated
//!
//! Systems propose messages during a stage; `apply_all` sorts them by
//! (target, proposal sequence), runs every guard in the state module,
//! applies survivors, performs deferred despawns and finally recomputes
//! capabilities for every unit.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::battle::combat::ShotReport;
use crate::battle::orders::{Order, OrderMode};
use crate::battle::pathfinding::PathPlan;
use crate::battle::perception::SensoryMemory;
use crate::battle::state::{
    check_alive, check_behavior, check_complete_gesture, check_gesture, check_move, check_posture,
    derive_capabilities, implied_posture, Behavior, Gesture, GuardError, Phase,
};
use crate::battle::store::IndexRemap;
use crate::battle::units::Unit;
use crate::battle::weapons::WeaponCatalog;
use crate::battle::world::BattleWorld;
use crate::core::config::SimulationConfig;
use crate::core::types::{Posture, SoldierIndex, SquadId, Tick, UnitKind, UnitRef, Vec2};

/// A shot drawn for presentation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectileEvent {
    pub from: Vec2,
    pub to: Vec2,
    pub hit: bool,
    pub tick: Tick,
}

/// What a message mutates; primary sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageTarget {
    Battle,
    Squad(SquadId),
    Unit(UnitRef),
}

/// A proposed state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    SetPhase { phase: Phase },
    SpawnProjectile(ProjectileEvent),
    PromoteLeader { squad: SquadId, leader: SoldierIndex },
    DissolveSquad { squad: SquadId },
    SetBehavior { unit: UnitRef, behavior: Behavior },
    SetGesture { unit: UnitRef, gesture: Gesture },
    CompleteGesture { unit: UnitRef },
    SetPosture { unit: UnitRef, posture: Posture },
    SetPath { unit: UnitRef, path: PathPlan },
    Move { unit: UnitRef, position: Vec2, heading: f32, cursor: usize },
    ApplyDamage { unit: UnitRef, amount: f32, source: Option<UnitRef> },
    SetHealth { unit: UnitRef, value: f32 },
    AdjustSuppression { unit: UnitRef, delta: f32 },
    AdjustMorale { unit: UnitRef, delta: f32 },
    NearMiss { unit: UnitRef, intensity: f32 },
    UpdateSensory { unit: UnitRef, memory: SensoryMemory },
    IssueOrder { unit: UnitRef, order: Order, mode: OrderMode },
    CompleteOrder { unit: UnitRef },
    Despawn { unit: UnitRef },
}

impl Message {
    pub fn target(&self) -> MessageTarget {
        match self {
            Message::SetPhase { .. } | Message::SpawnProjectile(_) => MessageTarget::Battle,
            Message::PromoteLeader { squad, .. } | Message::DissolveSquad { squad } => {
                MessageTarget::Squad(*squad)
            }
            Message::SetBehavior { unit, .. }
            | Message::SetGesture { unit, .. }
            | Message::CompleteGesture { unit }
            | Message::SetPosture { unit, .. }
            | Message::SetPath { unit, .. }
            | Message::Move { unit, .. }
            | Message::ApplyDamage { unit, .. }
            | Message::SetHealth { unit, .. }
            | Message::AdjustSuppression { unit, .. }
            | Message::AdjustMorale { unit, .. }
            | Message::NearMiss { unit, .. }
            | Message::UpdateSensory { unit, .. }
            | Message::IssueOrder { unit, .. }
            | Message::CompleteOrder { unit }
            | Message::Despawn { unit } => MessageTarget::Unit(*unit),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::SetPhase { .. } => "SetPhase",
            Message::SpawnProjectile(_) => "SpawnProjectile",
            Message::PromoteLeader { .. } => "PromoteLeader",
            Message::DissolveSquad { .. } => "DissolveSquad",
            Message::SetBehavior { .. } => "SetBehavior",
            Message::SetGesture { .. } => "SetGesture",
            Message::CompleteGesture { .. } => "CompleteGesture",
            Message::SetPosture { .. } => "SetPosture",
            Message::SetPath { .. } => "SetPath",
            Message::Move { .. } => "Move",
            Message::ApplyDamage { .. } => "ApplyDamage",
            Message::SetHealth { .. } => "SetHealth",
            Message::AdjustSuppression { .. } => "AdjustSuppression",
            Message::AdjustMorale { .. } => "AdjustMorale",
            Message::NearMiss { .. } => "NearMiss",
            Message::UpdateSensory { .. } => "UpdateSensory",
            Message::IssueOrder { .. } => "IssueOrder",
            Message::CompleteOrder { .. } => "CompleteOrder",
            Message::Despawn { .. } => "Despawn",
        }
    }

    /// Rewrite unit references after a swap-removal; `None` drops the message
    pub(crate) fn remapped(mut self, remap: &IndexRemap) -> Option<Message> {
        if let MessageTarget::Unit(unit) = self.target() {
            let moved = remap.remap(unit)?;
            match &mut self {
                Message::SetBehavior { unit, .. }
                | Message::SetGesture { unit, .. }
                | Message::CompleteGesture { unit }
                | Message::SetPosture { unit, .. }
                | Message::SetPath { unit, .. }
                | Message::Move { unit, .. }
                | Message::ApplyDamage { unit, .. }
                | Message::SetHealth { unit, .. }
                | Message::AdjustSuppression { unit, .. }
                | Message::AdjustMorale { unit, .. }
                | Message::NearMiss { unit, .. }
                | Message::UpdateSensory { unit, .. }
                | Message::IssueOrder { unit, .. }
                | Message::CompleteOrder { unit }
                | Message::Despawn { unit } => *unit = moved,
                _ => {}
            }
        }
        match &mut self {
            Message::SetBehavior {
                behavior: Behavior::EngageTarget(target),
                ..
            } => {
                *target = remap.remap(*target)?;
            }
            Message::ApplyDamage { source, .. } => {
                *source = source.and_then(|s| remap.remap(s));
            }
            Message::IssueOrder {
                order: Order::Engage(target),
                ..
            } => {
                *target = remap.remap(*target)?;
            }
            Message::UpdateSensory { memory, .. } => memory.apply_remap(remap),
            _ => {}
        }
        Some(self)
    }
}

/// Which apply batch of a tick a message belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApplyStage {
    /// Gesture completion, leadership, cleanup, battle end, external input
    Upkeep,
    /// Perception, decisions, movement, combat, morale
    Action,
}

/// Why a message was dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("invalid index {0}")]
    InvalidIndex(UnitRef),

    #[error("unknown squad {0:?}")]
    UnknownSquad(SquadId),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub tick: Tick,
    pub seq: u64,
    pub target: MessageTarget,
    pub kind: &'static str,
    pub reason: RejectReason,
}

/// A unit that went down during a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Casualty {
    pub unit: UnitRef,
    pub squad: Option<SquadId>,
    pub was_leader: bool,
    pub killed: bool,
    /// Already unconscious before this batch; morale has been paid for
    pub was_incapacitated: bool,
}

impl Casualty {
    pub(crate) fn remapped(mut self, remap: &IndexRemap) -> Option<Casualty> {
        self.unit = remap.remap(self.unit)?;
        Some(self)
    }
}

/// Results of one `apply_all` batch
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub applied: usize,
    pub rejected: Vec<Rejection>,
    /// Rounds fired by completed Firing gestures
    pub shots: Vec<ShotReport>,
    pub casualties: Vec<Casualty>,
    pub remaps: Vec<IndexRemap>,
}

/// An applied message as recorded for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub tick: Tick,
    pub stage: ApplyStage,
    pub seq: u64,
    pub message: Message,
}

/// Append-only record of every applied message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageLog {
    entries: Vec<LoggedMessage>,
}

impl MessageLog {
    pub fn entries(&self) -> &[LoggedMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: LoggedMessage) {
        self.entries.push(entry);
    }

    /// Consecutive runs of entries sharing (tick, stage)
    pub fn batches(&self) -> impl Iterator<Item = &[LoggedMessage]> {
        self.entries
            .chunk_by(|a, b| a.tick == b.tick && a.stage == b.stage)
    }

    pub fn to_json(&self) -> crate::core::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(content: &str) -> crate::core::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Read-only inputs for applying a batch
pub struct ApplyContext<'a> {
    pub stage: ApplyStage,
    pub weapons: &'a WeaponCatalog,
    pub config: &'a SimulationConfig,
}

/// Collects proposals and applies them in deterministic order
#[derive(Debug, Default)]
pub struct MessageEngine {
    pending: Vec<(u64, Message)>,
    next_seq: u64,
    log: Option<MessageLog>,
}

impl MessageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that records every applied message
    pub fn with_log() -> Self {
        Self {
            log: Some(MessageLog::default()),
            ..Self::default()
        }
    }

    /// Queue a message; returns its sequence number
    pub fn propose(&mut self, message: Message) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push((seq, message));
        seq
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn log(&self) -> Option<&MessageLog> {
        self.log.as_ref()
    }

    /// Apply every pending message to the world
    pub fn apply_all(&mut self, world: &mut BattleWorld, ctx: &ApplyContext<'_>) -> ApplyReport {
        let batch = std::mem::take(&mut self.pending);
        let log = self.log.as_mut();
        apply_batch(world, batch, ctx, log)
    }

    /// Re-run a logged batch; sequence numbers come from the log
    pub fn apply_logged(
        world: &mut BattleWorld,
        entries: &[LoggedMessage],
        ctx: &ApplyContext<'_>,
    ) -> ApplyReport {
        let batch = entries
            .iter()
            .map(|e| (e.seq, e.message.clone()))
            .collect();
        apply_batch(world, batch, ctx, None)
    }
}

fn apply_batch(
    world: &mut BattleWorld,
    mut batch: Vec<(u64, Message)>,
    ctx: &ApplyContext<'_>,
    mut log: Option<&mut MessageLog>,
) -> ApplyReport {
    batch.sort_by_key(|(seq, msg)| (msg.target(), *seq));

    let mut report = ApplyReport::default();
    let mut despawns: Vec<UnitRef> = Vec::new();
    let tick = world.tick;

    for (seq, message) in batch {
        match apply_one(world, &message, ctx, &mut report, &mut despawns) {
            Ok(()) => {
                report.applied += 1;
                debug!(tick, seq, kind = message.kind(), "applied");
                if let Some(log) = log.as_deref_mut() {
                    log.push(LoggedMessage {
                        tick,
                        stage: ctx.stage,
                        seq,
                        message,
                    });
                }
            }
            Err(reason) => {
                warn!(
                    tick,
                    seq,
                    kind = message.kind(),
                    target = ?message.target(),
                    %reason,
                    "message rejected"
                );
                report.rejected.push(Rejection {
                    tick,
                    seq,
                    target: message.target(),
                    kind: message.kind(),
                    reason,
                });
            }
        }
    }

    // Highest slots first so earlier removals never move a pending one
    despawns.sort_unstable();
    despawns.dedup();
    while let Some(unit) = despawns.pop() {
        match world.store.remove(unit) {
            Ok(remap) => {
                info!(tick, unit = %unit, moved_from = ?remap.moved_from, "unit despawned");
                world.apply_remap(&remap);
                report.shots = std::mem::take(&mut report.shots)
                    .into_iter()
                    .filter_map(|s| s.remapped(&remap))
                    .collect();
                report.casualties = std::mem::take(&mut report.casualties)
                    .into_iter()
                    .filter_map(|c| c.remapped(&remap))
                    .collect();
                despawns = despawns.into_iter().filter_map(|d| remap.remap(d)).collect();
                report.remaps.push(remap);
            }
            Err(err) => warn!(tick, %err, "despawn failed"),
        }
    }

    for unit in world.store.iter_mut() {
        let caps = derive_capabilities(unit);
        unit.state.capabilities = caps;
    }

    report
}

fn unit_mut(world: &mut BattleWorld, unit: UnitRef) -> Result<&mut Unit, RejectReason> {
    world
        .store
        .get_mut(unit)
        .map_err(|_| RejectReason::InvalidIndex(unit))
}

fn reject_dead(unit: &Unit) -> Result<(), RejectReason> {
    if unit.is_dead() {
        Err(GuardError::Dead.into())
    } else {
        Ok(())
    }
}

fn finite(value: f32, what: &str) -> Result<f32, RejectReason> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(GuardError::OutOfRange(format!("{} = {}", what, value)).into())
    }
}

fn apply_one(
    world: &mut BattleWorld,
    message: &Message,
    ctx: &ApplyContext<'_>,
    report: &mut ApplyReport,
    despawns: &mut Vec<UnitRef>,
) -> Result<(), RejectReason> {
    let tick = world.tick;
    let config = ctx.config;

    match message {
        Message::SetPhase { phase } => {
            if !world.phase.can_advance_to(phase) {
                return Err(GuardError::PhaseOrder {
                    from: world.phase,
                    to: *phase,
                }
                .into());
            }
            info!(tick, from = ?world.phase, to = ?phase, "phase change");
            world.phase = *phase;
            for unit in world.store.iter_mut() {
                unit.state.phase = *phase;
            }
        }

        Message::SpawnProjectile(event) => {
            world.projectiles.push(*event);
        }

        Message::PromoteLeader { squad, leader } => {
            let leader_ref = UnitRef::Soldier(*leader);
            let active = world.unit(leader_ref).map(|u| u.is_active());
            match active {
                None => return Err(RejectReason::InvalidIndex(leader_ref)),
                Some(false) => return Err(GuardError::Incapacitated.into()),
                Some(true) => {}
            }
            let squad_state = world
                .squads
                .get_mut(*squad)
                .ok_or(RejectReason::UnknownSquad(*squad))?;
            if !squad_state.is_member(leader_ref) {
                return Err(RejectReason::Invalid(format!("{} is not a member", leader_ref)));
            }
            squad_state.leader = Some(*leader);
            squad_state.leader_alive = true;
            info!(tick, squad = squad.0, leader = %leader_ref, "leader promoted");
        }

        Message::DissolveSquad { squad } => {
            let removed = world
                .squads
                .remove(*squad)
                .ok_or(RejectReason::UnknownSquad(*squad))?;
            for member in &removed.members {
                if let Ok(unit) = world.store.get_mut(*member) {
                    unit.squad = None;
                }
            }
            info!(tick, squad = squad.0, "squad dissolved");
        }

        Message::SetBehavior { unit, behavior } => {
            if let Behavior::EngageTarget(target) = behavior {
                if world.unit(*target).is_none() {
                    return Err(RejectReason::InvalidIndex(*target));
                }
            }
            let u = unit_mut(world, *unit)?;
            check_behavior(u, behavior)?;
            match behavior {
                Behavior::Dead => {
                    u.health.set(0.0);
                    record_casualty(world, *unit, tick, config, report, false)?;
                }
                Behavior::Unconscious => {
                    record_casualty(world, *unit, tick, config, report, true)?;
                }
                _ => {
                    if u.state.behavior.fire_target() != behavior.fire_target() {
                        u.aim = None;
                    }
                    if u.kind == UnitKind::Soldier {
                        if let Some(posture) = implied_posture(behavior) {
                            u.posture = posture;
                        }
                    }
                    u.state.behavior = behavior.clone();
                }
            }
        }

        Message::SetGesture { unit, gesture } => {
            let u = unit_mut(world, *unit)?;
            check_gesture(u, gesture, tick)?;
            u.state.gesture = *gesture;
        }

        Message::CompleteGesture { unit } => {
            let u = unit_mut(world, *unit)?;
            check_complete_gesture(u, tick)?;
            match u.state.gesture {
                Gesture::Firing { .. } => {
                    let loadout = u
                        .loadout
                        .as_mut()
                        .filter(|l| l.rounds > 0)
                        .ok_or_else(|| RejectReason::Invalid("no round to fire".into()))?;
                    loadout.rounds -= 1;
                    let weapon = loadout.weapon;
                    if let Some(target) = u.state.behavior.fire_target() {
                        report.shots.push(ShotReport {
                            shooter: *unit,
                            target,
                            weapon,
                        });
                    }
                }
                Gesture::Aiming { .. } => {
                    u.aim = u.state.behavior.fire_target();
                }
                Gesture::Reloading { .. } => {
                    if let Some(loadout) = u.loadout.as_mut() {
                        if loadout.spare_magazines > 0 {
                            loadout.spare_magazines -= 1;
                            loadout.rounds = loadout.magazine_size;
                        }
                    }
                }
                Gesture::Idle => {}
            }
            u.state.gesture = Gesture::Idle;
        }

        Message::SetPosture { unit, posture } => {
            let u = unit_mut(world, *unit)?;
            check_posture(u, *posture)?;
            u.posture = *posture;
            if *posture == Posture::Prone && matches!(u.state.behavior, Behavior::MoveTo(_)) {
                u.state.behavior = Behavior::Idle(Posture::Prone);
            }
        }

        Message::SetPath { unit, path } => {
            let u = unit_mut(world, *unit)?;
            check_alive(u)?;
            let tag = u.state.behavior.tag();
            let plan = u
                .state
                .behavior
                .move_plan_mut()
                .ok_or(GuardError::WrongBehavior(tag))?;
            plan.path = path.clone();
        }

        Message::Move {
            unit,
            position,
            heading,
            cursor,
        } => {
            if !position.is_finite() {
                return Err(GuardError::OutOfRange(format!("position {:?}", position)).into());
            }
            let heading = finite(*heading, "heading")?;
            let u = unit_mut(world, *unit)?;
            check_move(u)?;
            u.position = *position;
            u.heading = heading;
            if let Some(plan) = u.state.behavior.move_plan_mut() {
                plan.path.cursor = *cursor;
            }
        }

        Message::ApplyDamage { unit, amount, .. } => {
            let amount = finite(*amount, "damage")?;
            if amount < 0.0 {
                return Err(GuardError::OutOfRange(format!("damage = {}", amount)).into());
            }
            let u = unit_mut(world, *unit)?;
            reject_dead(u)?;
            u.health.apply_damage(amount);
            record_casualty(world, *unit, tick, config, report, false)?;
        }

        Message::SetHealth { unit, value } => {
            let value = finite(*value, "health")?;
            let u = unit_mut(world, *unit)?;
            reject_dead(u)?;
            u.health.set(value);
            record_casualty(world, *unit, tick, config, report, false)?;
        }

        Message::AdjustSuppression { unit, delta } => {
            let delta = finite(*delta, "suppression delta")?;
            let u = unit_mut(world, *unit)?;
            reject_dead(u)?;
            u.suppression = (u.suppression + delta).clamp(0.0, 1.0);
        }

        Message::AdjustMorale { unit, delta } => {
            let delta = finite(*delta, "morale delta")?;
            let u = unit_mut(world, *unit)?;
            reject_dead(u)?;
            u.morale = (u.morale + delta).clamp(0.0, config.morale_max);
        }

        Message::NearMiss { unit, intensity } => {
            let intensity = finite(*intensity, "intensity")?;
            let u = unit_mut(world, *unit)?;
            reject_dead(u)?;
            u.memory.under_fire = (u.memory.under_fire + intensity).clamp(0.0, 1.0);
        }

        Message::UpdateSensory { unit, memory } => {
            let u = unit_mut(world, *unit)?;
            reject_dead(u)?;
            u.memory = memory.clone();
        }

        Message::IssueOrder { unit, order, mode } => {
            let u = unit_mut(world, *unit)?;
            check_alive(u)?;
            if *order == Order::Stop {
                u.orders.clear();
                if !matches!(u.state.behavior, Behavior::Idle(_)) {
                    u.aim = None;
                    u.state.behavior = Behavior::Idle(u.posture);
                }
            } else {
                u.orders.issue(*order, *mode);
            }
        }

        Message::CompleteOrder { unit } => {
            let u = unit_mut(world, *unit)?;
            u.orders
                .complete()
                .ok_or_else(|| RejectReason::Invalid("no order to complete".into()))?;
        }

        Message::Despawn { unit } => {
            if world.unit(*unit).is_none() {
                return Err(RejectReason::InvalidIndex(*unit));
            }
            despawns.push(*unit);
        }
    }

    Ok(())
}

fn incapacitate(unit: &mut Unit, behavior: Behavior, tick: Tick) {
    if behavior.is_dead() {
        unit.died_at = Some(tick);
    }
    unit.state.behavior = behavior;
    unit.state.gesture = Gesture::Idle;
    unit.posture = Posture::Prone;
    unit.aim = None;
    unit.orders.clear();
}

/// Move a damaged unit to Unconscious or Dead as its health requires,
/// reporting the casualty and flagging a downed squad leader
fn record_casualty(
    world: &mut BattleWorld,
    unit_ref: UnitRef,
    tick: Tick,
    config: &SimulationConfig,
    report: &mut ApplyReport,
    knock_out: bool,
) -> Result<(), RejectReason> {
    let u = unit_mut(world, unit_ref)?;
    let was_incapacitated = u.state.behavior.is_incapacitated();
    let killed = if !u.health.is_alive() {
        if u.is_dead() {
            return Ok(());
        }
        incapacitate(u, Behavior::Dead, tick);
        info!(tick, unit = %unit_ref, id = %u.id, "unit killed");
        true
    } else if !was_incapacitated
        && (knock_out
            || (u.kind == UnitKind::Soldier
                && u.health.fraction() < config.unconscious_health_fraction))
    {
        incapacitate(u, Behavior::Unconscious, tick);
        info!(tick, unit = %unit_ref, id = %u.id, "unit unconscious");
        false
    } else {
        return Ok(());
    };

    let squad = u.squad;
    let mut was_leader = false;
    if let Some(squad_id) = squad {
        if let Some(squad) = world.squads.get_mut(squad_id) {
            if squad.leader_ref() == Some(unit_ref) && !was_incapacitated {
                was_leader = true;
                squad.leader_alive = false;
                info!(tick, squad = squad_id.0, "squad leader down");
            }
        }
    }

    report.casualties.push(Casualty {
        unit: unit_ref,
        squad,
        was_leader,
        killed,
        was_incapacitated,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::squads::Squad;
    use crate::battle::state::{Capabilities, FireTarget};
    use crate::battle::units::Loadout;
    use crate::battle::weapons::WeaponId;
    use crate::core::types::Side;

    fn world_with_soldiers(n: usize) -> BattleWorld {
        let mut world = BattleWorld::new();
        for i in 0..n {
            let mut unit = Unit::new(
                format!("s{}", i),
                UnitKind::Soldier,
                if i % 2 == 0 { Side::Attacker } else { Side::Defender },
                Vec2::new(i as f32 * 10.0, 0.0),
            );
            unit.loadout = Some(Loadout {
                weapon: WeaponId(0),
                rounds: 10,
                magazine_size: 10,
                spare_magazines: 2,
            });
            world.store.create(UnitKind::Soldier, unit);
        }
        world.phase = Phase::Battle;
        for unit in world.store.iter_mut() {
            unit.state.phase = Phase::Battle;
            let caps = derive_capabilities(unit);
            unit.state.capabilities = caps;
        }
        world
    }

    fn apply(engine: &mut MessageEngine, world: &mut BattleWorld) -> ApplyReport {
        let weapons = WeaponCatalog::standard();
        let config = SimulationConfig::default();
        let ctx = ApplyContext {
            stage: ApplyStage::Action,
            weapons: &weapons,
            config: &config,
        };
        engine.apply_all(world, &ctx)
    }

    #[test]
    fn test_sort_by_target_then_seq() {
        let mut engine = MessageEngine::with_log();
        let mut world = world_with_soldiers(3);
        engine.propose(Message::AdjustMorale { unit: UnitRef::soldier(2), delta: -1.0 });
        engine.propose(Message::AdjustMorale { unit: UnitRef::soldier(0), delta: -1.0 });
        engine.propose(Message::AdjustMorale { unit: UnitRef::soldier(0), delta: -2.0 });
        apply(&mut engine, &mut world);

        let log = engine.log().unwrap();
        let order: Vec<(MessageTarget, u64)> =
            log.entries().iter().map(|e| (e.message.target(), e.seq)).collect();
        assert_eq!(
            order,
            vec![
                (MessageTarget::Unit(UnitRef::soldier(0)), 1),
                (MessageTarget::Unit(UnitRef::soldier(0)), 2),
                (MessageTarget::Unit(UnitRef::soldier(2)), 0),
            ]
        );
    }

    #[test]
    fn test_invalid_index_is_rejected_not_panicking() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(1);
        engine.propose(Message::ApplyDamage {
            unit: UnitRef::soldier(9),
            amount: 10.0,
            source: None,
        });
        let report = apply(&mut engine, &mut world);
        assert_eq!(report.applied, 0);
        assert_eq!(
            report.rejected[0].reason,
            RejectReason::InvalidIndex(UnitRef::soldier(9))
        );
    }

    #[test]
    fn test_lethal_damage_kills_and_reports() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(2);
        engine.propose(Message::ApplyDamage {
            unit: UnitRef::soldier(1),
            amount: 500.0,
            source: Some(UnitRef::soldier(0)),
        });
        let report = apply(&mut engine, &mut world);
        let unit = world.store.get(UnitRef::soldier(1)).unwrap();
        assert_eq!(unit.health.current(), 0.0);
        assert!(unit.is_dead());
        assert!(unit.state.capabilities.is_empty());
        assert_eq!(report.casualties.len(), 1);
        assert!(report.casualties[0].killed);
    }

    #[test]
    fn test_heavy_damage_knocks_unconscious() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(1);
        engine.propose(Message::ApplyDamage {
            unit: UnitRef::soldier(0),
            amount: 90.0,
            source: None,
        });
        let report = apply(&mut engine, &mut world);
        let unit = world.store.get(UnitRef::soldier(0)).unwrap();
        assert_eq!(unit.state.behavior, Behavior::Unconscious);
        assert!(!report.casualties[0].killed);

        // Unconscious -> Dead is allowed and does not count as a fresh casualty
        engine.propose(Message::ApplyDamage {
            unit: UnitRef::soldier(0),
            amount: 50.0,
            source: None,
        });
        let report = apply(&mut engine, &mut world);
        assert!(world.store.get(UnitRef::soldier(0)).unwrap().is_dead());
        assert!(report.casualties[0].was_incapacitated);
    }

    #[test]
    fn test_dead_cannot_be_revived() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(1);
        engine.propose(Message::ApplyDamage {
            unit: UnitRef::soldier(0),
            amount: 500.0,
            source: None,
        });
        engine.propose(Message::SetHealth { unit: UnitRef::soldier(0), value: 100.0 });
        engine.propose(Message::SetBehavior {
            unit: UnitRef::soldier(0),
            behavior: Behavior::Idle(Posture::Standing),
        });
        let report = apply(&mut engine, &mut world);
        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected.len(), 2);
        assert!(world.store.get(UnitRef::soldier(0)).unwrap().is_dead());
    }

    #[test]
    fn test_firing_completion_reports_shot() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(2);
        world.tick = 5;
        engine.propose(Message::SetBehavior {
            unit: UnitRef::soldier(0),
            behavior: Behavior::EngageTarget(UnitRef::soldier(1)),
        });
        engine.propose(Message::SetGesture {
            unit: UnitRef::soldier(0),
            gesture: Gesture::Firing { end_tick: 6 },
        });
        apply(&mut engine, &mut world);

        world.tick = 6;
        engine.propose(Message::CompleteGesture { unit: UnitRef::soldier(0) });
        let report = apply(&mut engine, &mut world);
        assert_eq!(report.shots.len(), 1);
        assert_eq!(report.shots[0].target, FireTarget::Unit(UnitRef::soldier(1)));
        let unit = world.store.get(UnitRef::soldier(0)).unwrap();
        assert_eq!(unit.loadout.unwrap().rounds, 9);
        assert_eq!(unit.state.gesture, Gesture::Idle);
    }

    #[test]
    fn test_capabilities_recomputed_after_batch() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(1);
        engine.propose(Message::SetPosture { unit: UnitRef::soldier(0), posture: Posture::Prone });
        apply(&mut engine, &mut world);
        let unit = world.store.get(UnitRef::soldier(0)).unwrap();
        assert!(!unit.can(Capabilities::CAN_MOVE));
        assert_eq!(unit.state.capabilities, derive_capabilities(unit));
    }

    #[test]
    fn test_despawn_publishes_remap() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(4);
        let squad = world.squads.create(Side::Attacker);
        if let Some(s) = world.squads.get_mut(squad) {
            s.members = vec![UnitRef::soldier(1), UnitRef::soldier(3)];
            s.leader = Some(SoldierIndex(3));
        }
        engine.propose(Message::Despawn { unit: UnitRef::soldier(1) });
        let report = apply(&mut engine, &mut world);

        assert_eq!(world.store.soldier_count(), 3);
        assert_eq!(
            report.remaps,
            vec![IndexRemap {
                removed: UnitRef::soldier(1),
                moved_from: Some(UnitRef::soldier(3)),
            }]
        );
        let s: &Squad = world.squads.get(squad).unwrap();
        assert_eq!(s.members, vec![UnitRef::soldier(1)]);
        assert_eq!(s.leader, Some(SoldierIndex(1)));
        assert_eq!(world.store.get(UnitRef::soldier(1)).unwrap().id, "s3");
    }

    #[test]
    fn test_multiple_despawns_in_one_batch() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(5);
        engine.propose(Message::Despawn { unit: UnitRef::soldier(0) });
        engine.propose(Message::Despawn { unit: UnitRef::soldier(3) });
        engine.propose(Message::Despawn { unit: UnitRef::soldier(4) });
        apply(&mut engine, &mut world);

        let mut ids: Vec<String> = world.store.iter().map(|(_, u)| u.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_phase_cannot_go_back() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(1);
        engine.propose(Message::SetPhase { phase: Phase::Deployment });
        let report = apply(&mut engine, &mut world);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(world.phase, Phase::Battle);
    }

    #[test]
    fn test_leader_death_clears_flag() {
        let mut engine = MessageEngine::new();
        let mut world = world_with_soldiers(2);
        let squad = world.squads.create(Side::Attacker);
        if let Some(s) = world.squads.get_mut(squad) {
            s.members = vec![UnitRef::soldier(0), UnitRef::soldier(1)];
            s.leader = Some(SoldierIndex(0));
        }
        if let Ok(u) = world.store.get_mut(UnitRef::soldier(0)) {
            u.squad = Some(squad);
        }
        engine.propose(Message::ApplyDamage {
            unit: UnitRef::soldier(0),
            amount: 500.0,
            source: None,
        });
        let report = apply(&mut engine, &mut world);
        assert!(report.casualties[0].was_leader);
        assert!(!world.squads.get(squad).unwrap().leader_alive);
    }

    #[test]
    fn test_log_batches_group_by_tick_and_stage() {
        let mut log = MessageLog::default();
        let keys = [
            (1, ApplyStage::Upkeep),
            (1, ApplyStage::Upkeep),
            (1, ApplyStage::Action),
            (2, ApplyStage::Upkeep),
        ];
        for (tick, stage) in keys {
            log.push(LoggedMessage {
                tick,
                stage,
                seq: 0,
                message: Message::CompleteOrder { unit: UnitRef::soldier(0) },
            });
        }
        let sizes: Vec<usize> = log.batches().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }
}
