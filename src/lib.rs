//! Fireteam - deterministic squad-level tactical combat simulation

pub mod battle;
pub mod core;
pub mod spatial;
