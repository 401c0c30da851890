//! Rebuild a battle from its initial state and message log
//!
//! Only applied messages are logged, and the engine's handlers are pure
//! functions of (world, message), so re-applying the log batch by batch
//! reproduces the recorded state exactly.

use tracing::debug;

use crate::battle::messages::{ApplyContext, MessageEngine, MessageLog};
use crate::battle::weapons::WeaponCatalog;
use crate::battle::world::BattleWorld;
use crate::core::config::SimulationConfig;
use crate::core::types::Tick;

/// Re-apply `log` on top of `initial` and advance the clock to `final_tick`
pub fn replay(
    initial: &BattleWorld,
    log: &MessageLog,
    final_tick: Tick,
    weapons: &WeaponCatalog,
    config: &SimulationConfig,
) -> BattleWorld {
    let mut world = initial.clone();
    let mut batches = 0usize;

    for batch in log.batches() {
        let Some(first) = batch.first() else {
            continue;
        };
        if first.tick != world.tick {
            world.tick = first.tick;
            world.projectiles.clear();
        }
        let ctx = ApplyContext {
            stage: first.stage,
            weapons,
            config,
        };
        MessageEngine::apply_logged(&mut world, batch, &ctx);
        batches += 1;
    }

    // Quiet trailing ticks leave no log entries
    if world.tick != final_tick {
        world.tick = final_tick;
        world.projectiles.clear();
    }

    debug!(batches, messages = log.len(), tick = final_tick, "replay finished");
    world
}
