use thiserror::Error;

use crate::core::types::{SquadId, UnitRef};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Invalid index: {0} no longer exists")]
    InvalidIndex(UnitRef),

    #[error("Unknown squad: {0:?}")]
    UnknownSquad(SquadId),

    #[error("Unknown weapon: {0}")]
    UnknownWeapon(String),

    #[error("Invalid deployment record '{record}': {reason}")]
    InvalidDeployment { record: String, reason: String },

    #[error("Invalid definition '{id}': {reason}")]
    InvalidDefinition { id: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("No path from {from:?} to {to:?}")]
    NoPath {
        from: crate::spatial::terrain::TileCoord,
        to: crate::spatial::terrain::TileCoord,
    },

    #[error("Phase violation: {0}")]
    PhaseViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
