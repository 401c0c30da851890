//! Keyed deterministic random streams
//!
//! Every random draw in the simulation comes from a `ChaCha8Rng` seeded by
//! (battle seed, tick, actor, stream). Two runs with the same inputs draw
//! the same numbers regardless of evaluation order or thread count.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::core::types::Tick;

/// Independent random streams so one system's draws never shift another's
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum RngStream {
    Fire = 0x46495245,
    Morale = 0x4d4f5241,
    Decision = 0x44454349,
}

/// SplitMix64 finalizer; spreads nearby keys across the seed space
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Derive the 64-bit seed for one (seed, tick, actor, stream) key
pub fn stream_seed(battle_seed: u64, tick: Tick, actor: u64, stream: RngStream) -> u64 {
    let mut h = mix(battle_seed);
    h = mix(h ^ tick);
    h = mix(h ^ actor);
    mix(h ^ stream as u64)
}

/// Build the generator for one keyed draw sequence
pub fn roll_rng(battle_seed: u64, tick: Tick, actor: u64, stream: RngStream) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(stream_seed(battle_seed, tick, actor, stream))
}
