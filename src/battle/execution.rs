//! Battle execution loop
//!
//! Each tick: upkeep (gesture completion, leadership, corpse cleanup,
//! battle end, player input) -> apply -> perception, decisions, movement,
//! combat, morale -> apply. Systems only read the world and propose
//! messages; the engine is the single writer.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::battle::ai::{decide, gesture_step, DecisionContext};
use crate::battle::combat::{outcome_messages, resolve_fire, CombatContext, ShotReport};
use crate::battle::constants::FORMATION_SPACING;
use crate::battle::deployment::{deploy, DeploymentRecord};
use crate::battle::messages::{
    ApplyContext, ApplyReport, ApplyStage, Casualty, Message, MessageEngine, MessageLog,
};
use crate::battle::morale;
use crate::battle::movement::{self, MovementContext};
use crate::battle::orders::{Order, OrderMode};
use crate::battle::perception::{self, PerceptionContext};
use crate::battle::replay::replay;
use crate::battle::snapshot::RenderSnapshot;
use crate::battle::squads::Squad;
use crate::battle::state::Phase;
use crate::battle::units::Unit;
use crate::battle::weapons::WeaponCatalog;
use crate::battle::world::BattleWorld;
use crate::core::config::SimulationConfig;
use crate::core::error::{Result, SimError};
use crate::core::types::{Side, SquadId, Tick, UnitRef};
use crate::spatial::sparse_hash::SpatialIndex;
use crate::spatial::terrain::TerrainQuery;

/// Summary of one `run_tick`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: Tick,
    pub phase: Phase,
    pub applied: usize,
    pub rejected: usize,
    /// Rounds resolved this tick
    pub shots: usize,
    pub hits: usize,
    /// Units killed or knocked out this tick
    pub casualties: Vec<Casualty>,
    /// Units despawned this tick
    pub removed: usize,
}

impl TickReport {
    fn absorb(&mut self, report: &ApplyReport) {
        self.applied += report.applied;
        self.rejected += report.rejected.len();
        self.casualties.extend(report.casualties.iter().copied());
        self.removed += report.remaps.len();
    }
}

/// A running battle: world, engine and the read-only inputs that drive it
pub struct Battle<T: TerrainQuery> {
    world: BattleWorld,
    /// World as deployed, kept for replay
    initial: BattleWorld,
    engine: MessageEngine,
    weapons: WeaponCatalog,
    terrain: T,
    config: SimulationConfig,
    seed: u64,
    spatial: SpatialIndex,
    /// Rounds fired by the previous action batch
    pending_shots: Vec<ShotReport>,
    /// Casualties of the previous action batch, not yet felt by morale
    pending_casualties: Vec<Casualty>,
}

impl<T: TerrainQuery> Battle<T> {
    /// Validate the configuration and deployment, then build the battle
    pub fn new(
        records: &[DeploymentRecord],
        weapons: WeaponCatalog,
        terrain: T,
        config: SimulationConfig,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        let world = deploy(records, &weapons, &terrain, &config)?;
        Self::from_world(world, weapons, terrain, config, seed)
    }

    /// Wrap an already built world
    pub fn from_world(
        world: BattleWorld,
        weapons: WeaponCatalog,
        terrain: T,
        config: SimulationConfig,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        let mut spatial = SpatialIndex::new(config.grid_cell_size);
        spatial.rebuild(world.store.iter().map(|(r, u)| (r, u.position)));
        info!(
            seed,
            units = world.store.len(),
            squads = world.squads.len(),
            "battle created"
        );
        Ok(Self {
            initial: world.clone(),
            world,
            engine: MessageEngine::with_log(),
            weapons,
            terrain,
            config,
            seed,
            spatial,
            pending_shots: Vec::new(),
            pending_casualties: Vec::new(),
        })
    }

    /// Leave deployment and begin fighting
    pub fn start(&mut self) -> Result<()> {
        if self.world.phase != Phase::Deployment {
            return Err(SimError::PhaseViolation(format!(
                "cannot start a battle in phase {:?}",
                self.world.phase
            )));
        }
        self.engine.propose(Message::SetPhase {
            phase: Phase::Battle,
        });
        self.apply(ApplyStage::Upkeep);
        info!(tick = self.world.tick, "battle started");
        Ok(())
    }

    /// Queue an external message for the next tick's upkeep batch
    pub fn propose(&mut self, message: Message) -> u64 {
        self.engine.propose(message)
    }

    /// Give one unit an order; takes effect next tick
    pub fn issue_order(&mut self, unit: UnitRef, order: Order, mode: OrderMode) -> Result<u64> {
        self.world.store.get(unit)?;
        Ok(self.engine.propose(Message::IssueOrder { unit, order, mode }))
    }

    /// Give every active squad member the order
    ///
    /// Movement orders are spread over the squad's formation, anchored on
    /// the destination and facing the direction of travel. Returns the
    /// number of members ordered.
    pub fn issue_squad_order(
        &mut self,
        squad: SquadId,
        order: Order,
        mode: OrderMode,
    ) -> Result<usize> {
        let squad_state = self
            .world
            .squads
            .get(squad)
            .ok_or(SimError::UnknownSquad(squad))?;
        let members = formation_order(&self.world, squad_state);

        let proposals: Vec<Message> = match order.movement() {
            Some((dest, _)) => {
                let anchor = members
                    .first()
                    .and_then(|r| self.world.unit(*r))
                    .map(|u| u.position)
                    .unwrap_or(dest);
                let heading = anchor.heading_to(&dest);
                members
                    .iter()
                    .enumerate()
                    .map(|(slot, unit)| {
                        let offset = squad_state
                            .formation
                            .slot_offset(slot, heading, FORMATION_SPACING);
                        Message::IssueOrder {
                            unit: *unit,
                            order: order.with_destination(dest + offset),
                            mode,
                        }
                    })
                    .collect()
            }
            None => members
                .iter()
                .map(|unit| Message::IssueOrder {
                    unit: *unit,
                    order,
                    mode,
                })
                .collect(),
        };

        let count = proposals.len();
        for message in proposals {
            self.engine.propose(message);
        }
        debug!(squad = squad.0, members = count, ?order, "squad order issued");
        Ok(count)
    }

    /// Advance the simulation by one tick
    pub fn run_tick(&mut self) -> TickReport {
        self.world.tick += 1;
        self.world.projectiles.clear();
        let tick = self.world.tick;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        for message in upkeep_proposals(&self.world, &self.config) {
            self.engine.propose(message);
        }
        let upkeep = self.apply(ApplyStage::Upkeep);
        report.absorb(&upkeep);

        let mut shots = std::mem::take(&mut self.pending_shots);
        shots.extend(upkeep.shots.iter().copied());
        let mut casualties = std::mem::take(&mut self.pending_casualties);
        casualties.extend(upkeep.casualties.iter().copied());

        if self.world.phase == Phase::Battle {
            let (messages, hits) = action_proposals(
                &self.world,
                &self.spatial,
                &self.terrain,
                &self.weapons,
                &self.config,
                self.seed,
                &shots,
                &casualties,
            );
            report.shots = shots.len();
            report.hits = hits;
            for message in messages {
                self.engine.propose(message);
            }
        }

        let action = self.apply(ApplyStage::Action);
        report.absorb(&action);
        self.pending_shots = action.shots;
        self.pending_casualties = action.casualties;

        self.spatial
            .rebuild(self.world.store.iter().map(|(r, u)| (r, u.position)));

        report.phase = self.world.phase;
        debug!(
            tick,
            applied = report.applied,
            rejected = report.rejected,
            shots = report.shots,
            hits = report.hits,
            "tick complete"
        );
        report
    }

    /// Run until the battle ends or `limit` more ticks have passed
    pub fn run_until_finished(&mut self, limit: Tick) -> Vec<TickReport> {
        let mut reports = Vec::new();
        for _ in 0..limit {
            if self.world.phase.is_ended() {
                break;
            }
            reports.push(self.run_tick());
        }
        if let Phase::Ended(winner) = self.world.phase {
            info!(tick = self.world.tick, ?winner, "battle over");
        }
        reports
    }

    fn apply(&mut self, stage: ApplyStage) -> ApplyReport {
        let ctx = ApplyContext {
            stage,
            weapons: &self.weapons,
            config: &self.config,
        };
        let report = self.engine.apply_all(&mut self.world, &ctx);
        for remap in &report.remaps {
            self.spatial.apply_remap(remap);
            self.pending_shots = std::mem::take(&mut self.pending_shots)
                .into_iter()
                .filter_map(|s| s.remapped(remap))
                .collect();
            self.pending_casualties = std::mem::take(&mut self.pending_casualties)
                .into_iter()
                .filter_map(|c| c.remapped(remap))
                .collect();
        }
        report
    }

    pub fn state_hash(&self) -> u64 {
        self.world.state_hash()
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot::capture(&self.world, &self.config)
    }

    /// Rebuild the current state from the deployed world and the log
    pub fn replay(&self) -> BattleWorld {
        let empty = MessageLog::default();
        let log = self.engine.log().unwrap_or(&empty);
        replay(&self.initial, log, self.world.tick, &self.weapons, &self.config)
    }

    pub fn world(&self) -> &BattleWorld {
        &self.world
    }

    pub fn initial_world(&self) -> &BattleWorld {
        &self.initial
    }

    pub fn message_log(&self) -> Option<&MessageLog> {
        self.engine.log()
    }

    pub fn tick(&self) -> Tick {
        self.world.tick
    }

    pub fn phase(&self) -> Phase {
        self.world.phase
    }

    pub fn is_finished(&self) -> bool {
        self.world.phase.is_ended()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn weapons(&self) -> &WeaponCatalog {
        &self.weapons
    }

    pub fn terrain(&self) -> &T {
        &self.terrain
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }
}

/// Decide whether the battle is over
///
/// A side with no living, conscious units has lost; if both sides are gone,
/// or the clock runs out, it is a draw.
pub fn check_battle_end(world: &BattleWorld, config: &SimulationConfig) -> Option<Phase> {
    if world.phase != Phase::Battle {
        return None;
    }
    let attackers = world.active_count(Side::Attacker) > 0;
    let defenders = world.active_count(Side::Defender) > 0;
    match (attackers, defenders) {
        (true, true) => (world.tick >= config.max_ticks).then_some(Phase::Ended(None)),
        (true, false) => Some(Phase::Ended(Some(Side::Attacker))),
        (false, true) => Some(Phase::Ended(Some(Side::Defender))),
        (false, false) => Some(Phase::Ended(None)),
    }
}

/// Active members, leader first, in the order formation slots are handed out
fn formation_order(world: &BattleWorld, squad: &Squad) -> Vec<UnitRef> {
    let leader = squad.leader_ref();
    let active = |r: &UnitRef| world.unit(*r).is_some_and(|u| u.is_active());
    leader
        .filter(active)
        .into_iter()
        .chain(
            squad
                .members
                .iter()
                .copied()
                .filter(|r| Some(*r) != leader)
                .filter(active),
        )
        .collect()
}

/// Next leader for a squad whose leader is gone, or dissolution if nobody is left
fn succession(world: &BattleWorld, squad: &Squad) -> Option<Message> {
    let leader_active = squad
        .leader_ref()
        .and_then(|r| world.unit(r))
        .is_some_and(|u| u.is_active());
    if leader_active {
        return None;
    }
    let successor = squad.members.iter().find_map(|member| match member {
        UnitRef::Soldier(index) if world.unit(*member).is_some_and(|u| u.is_active()) => {
            Some(*index)
        }
        _ => None,
    });
    Some(match successor {
        Some(leader) => Message::PromoteLeader {
            squad: squad.id,
            leader,
        },
        None => Message::DissolveSquad { squad: squad.id },
    })
}

fn upkeep_proposals(world: &BattleWorld, config: &SimulationConfig) -> Vec<Message> {
    let tick = world.tick;
    let mut messages = Vec::new();

    if let Some(phase) = check_battle_end(world, config) {
        messages.push(Message::SetPhase { phase });
    }

    for (unit_ref, unit) in world.store.iter() {
        if unit.is_active() && unit.state.gesture.is_expired(tick) {
            messages.push(Message::CompleteGesture { unit: unit_ref });
        }
        if let (Some(died_at), Some(delay)) = (unit.died_at, config.corpse_cleanup_ticks) {
            if unit.is_dead() && died_at + delay <= tick {
                messages.push(Message::Despawn { unit: unit_ref });
            }
        }
    }

    messages.extend(world.squads.iter().filter_map(|squad| succession(world, squad)));
    messages
}

/// Read-only views one unit's turn is computed from
struct Minds<'a> {
    perception: PerceptionContext<'a>,
    decision: DecisionContext<'a>,
    movement: MovementContext<'a>,
}

/// One unit's proposals: refreshed memory, then a decision or the
/// continuation of what it is already doing
fn think(minds: &Minds<'_>, unit_ref: UnitRef, unit: &Unit) -> Vec<Message> {
    let mut messages = Vec::new();
    let sensory = perception::update(&minds.perception, unit);
    if sensory.memory != unit.memory {
        messages.push(Message::UpdateSensory {
            unit: unit_ref,
            memory: sensory.memory.clone(),
        });
    }

    let decision = if minds.decision.is_decision_tick(unit_ref, &sensory) {
        decide(&minds.decision, unit_ref, unit, &sensory)
    } else {
        None
    };
    match decision {
        Some(message) => messages.push(message),
        None => {
            messages.extend(gesture_step(&minds.decision, unit_ref, unit));
            messages.extend(movement::step(&minds.movement, unit_ref, unit));
        }
    }
    messages
}

/// Everything the action batch proposes, in deterministic order, plus the hit count
#[allow(clippy::too_many_arguments)]
fn action_proposals(
    world: &BattleWorld,
    spatial: &SpatialIndex,
    terrain: &dyn TerrainQuery,
    weapons: &WeaponCatalog,
    config: &SimulationConfig,
    seed: u64,
    shots: &[ShotReport],
    casualties: &[Casualty],
) -> (Vec<Message>, usize) {
    let tick = world.tick;
    let store = &world.store;
    let minds = Minds {
        perception: PerceptionContext {
            store,
            spatial,
            terrain,
            config,
            tick,
        },
        decision: DecisionContext {
            store,
            terrain,
            weapons,
            config,
            seed,
            tick,
        },
        movement: MovementContext {
            terrain,
            config,
            tick,
        },
    };

    let thinkers: Vec<(UnitRef, &Unit)> = store.iter().filter(|(_, u)| u.is_active()).collect();
    let proposals: Vec<Vec<Message>> = if thinkers.len() >= config.parallel_threshold {
        thinkers
            .par_iter()
            .map(|(r, u)| think(&minds, *r, u))
            .collect()
    } else {
        thinkers.iter().map(|(r, u)| think(&minds, *r, u)).collect()
    };
    let mut messages: Vec<Message> = proposals.into_iter().flatten().collect();

    let combat = CombatContext {
        store,
        spatial,
        terrain,
        weapons,
        config,
        seed,
        tick,
    };
    let mut hits = 0;
    for shot in shots {
        if let Some(outcome) = resolve_fire(&combat, shot) {
            if outcome.hit.is_some() {
                hits += 1;
            }
            messages.extend(outcome_messages(&combat, &outcome));
        }
    }

    for (unit_ref, unit) in store.iter() {
        let leader_alive = world.squad_of(unit).map_or(true, |s| s.leader_alive);
        messages.extend(morale::tick(unit_ref, unit, leader_alive, config));
    }
    for casualty in casualties {
        messages.extend(morale::on_casualty(world, casualty, config));
    }

    (messages, hits)
}
