//! Battle system - squad-level firefights on a tile map
//!
//! State lives in a `BattleWorld` owned by `Battle`. Systems read it and
//! propose messages; the message engine applies them in a fixed order, so a
//! seed plus a deployment always yields the same battle.
//!
//! Key pieces:
//! - Units are stored in dense per-kind arrays addressed by `UnitRef`
//! - Each unit carries phase, behavior and gesture state plus derived capabilities
//! - Orders sit in a per-unit queue below survival and engagement concerns
//! - Every applied message is logged and can be replayed

pub mod ai;
pub mod combat;
pub mod constants;
pub mod deployment;
pub mod execution;
pub mod messages;
pub mod morale;
pub mod movement;
pub mod orders;
pub mod pathfinding;
pub mod perception;
pub mod replay;
pub mod snapshot;
pub mod squads;
pub mod state;
pub mod store;
pub mod units;
pub mod weapons;
pub mod world;

// Re-exports for convenient access
pub use ai::{decide, gesture_step, DecisionContext};
pub use combat::{hit_chance, resolve_fire, CombatContext, FireOutcome, HitChance, ShotReport};
pub use deployment::{deploy, load_records, records_from_json_str, DeploymentRecord};
pub use execution::{check_battle_end, Battle, TickReport};
pub use messages::{
    ApplyReport, ApplyStage, Casualty, LoggedMessage, Message, MessageEngine, MessageLog,
    MessageTarget, ProjectileEvent, RejectReason, Rejection,
};
pub use morale::{MoraleBand, MoraleOverride};
pub use orders::{Order, OrderMode, OrderQueue};
pub use pathfinding::{plan_path, PathPlan};
pub use perception::{SensoryData, SensoryMemory};
pub use replay::replay;
pub use snapshot::{RenderSnapshot, UnitView};
pub use squads::{Formation, Squad, SquadRegistry};
pub use state::{Behavior, Capabilities, FireTarget, Gesture, MovePace, Phase};
pub use store::{EntityStore, IndexRemap};
pub use units::{Health, Loadout, Unit};
pub use weapons::{WeaponCatalog, WeaponDefinition, WeaponId};
pub use world::BattleWorld;
