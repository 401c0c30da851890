//! Weapon definitions and the id-keyed catalog loaded at startup
//!
//! Definitions are immutable once loaded. Units refer to them through a
//! compact [`WeaponId`] assigned in load order.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{Result, SimError};

/// Index into the weapon catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WeaponId(pub u16);

/// Static weapon stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponDefinition {
    pub id: String,
    /// Maximum effective range (world units)
    pub range: f32,
    /// Base damage per hit
    pub damage: f32,
    pub rounds_per_minute: f32,
    pub magazine_size: u32,
    pub reload_seconds: f32,
    /// Base hit probability before modifiers, in `0..=1`
    pub accuracy: f32,
    /// Suppression added to the target per shot, hit or miss
    #[serde(default = "default_suppression_per_shot")]
    pub suppression_per_shot: f32,
}

fn default_suppression_per_shot() -> f32 {
    0.1
}

impl WeaponDefinition {
    /// Ticks between shots, never less than one
    pub fn fire_interval_ticks(&self, ticks_per_second: u32) -> u64 {
        let ticks = (ticks_per_second as f32 * 60.0 / self.rounds_per_minute).round();
        (ticks as u64).max(1)
    }

    pub fn reload_ticks(&self, ticks_per_second: u32) -> u64 {
        ((self.reload_seconds * ticks_per_second as f32).round() as u64).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(SimError::InvalidDefinition {
                id: self.id.clone(),
                reason: reason.to_string(),
            })
        };
        if self.id.is_empty() {
            return fail("empty id");
        }
        if !(self.range.is_finite() && self.range > 0.0) {
            return fail("range must be positive");
        }
        if !(self.damage.is_finite() && self.damage >= 0.0) {
            return fail("damage must be non-negative");
        }
        if !(self.rounds_per_minute.is_finite() && self.rounds_per_minute > 0.0) {
            return fail("rounds_per_minute must be positive");
        }
        if self.magazine_size == 0 {
            return fail("magazine_size must be at least 1");
        }
        if !(self.reload_seconds.is_finite() && self.reload_seconds >= 0.0) {
            return fail("reload_seconds must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.accuracy) {
            return fail("accuracy must be within 0..=1");
        }
        if !(0.0..=1.0).contains(&self.suppression_per_shot) {
            return fail("suppression_per_shot must be within 0..=1");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WeaponFile {
    #[serde(rename = "weapon", default)]
    weapons: Vec<WeaponDefinition>,
}

/// All weapon definitions for a battle
#[derive(Debug, Clone, Default)]
pub struct WeaponCatalog {
    definitions: Vec<WeaponDefinition>,
    by_name: AHashMap<String, WeaponId>,
}

impl WeaponCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from definitions, validating each; duplicate ids are rejected
    pub fn from_definitions(definitions: Vec<WeaponDefinition>) -> Result<Self> {
        let mut catalog = Self::new();
        for def in definitions {
            catalog.add(def)?;
        }
        Ok(catalog)
    }

    pub fn add(&mut self, definition: WeaponDefinition) -> Result<WeaponId> {
        definition.validate()?;
        if self.by_name.contains_key(&definition.id) {
            return Err(SimError::InvalidDefinition {
                id: definition.id,
                reason: "duplicate weapon id".to_string(),
            });
        }
        let index = u16::try_from(self.definitions.len()).map_err(|_| SimError::InvalidDefinition {
            id: definition.id.clone(),
            reason: "too many weapon definitions".to_string(),
        })?;
        let id = WeaponId(index);
        self.by_name.insert(definition.id.clone(), id);
        self.definitions.push(definition);
        Ok(id)
    }

    /// Parse a JSON array of definitions
    pub fn from_json_str(content: &str) -> Result<Self> {
        let definitions: Vec<WeaponDefinition> = serde_json::from_str(content)?;
        Self::from_definitions(definitions)
    }

    /// Parse a TOML document of `[[weapon]]` tables
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: WeaponFile = toml::from_str(content)?;
        Self::from_definitions(file.weapons)
    }

    /// Load from a `.json` or `.toml` file, chosen by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn get(&self, id: WeaponId) -> Result<&WeaponDefinition> {
        self.definitions
            .get(id.0 as usize)
            .ok_or_else(|| SimError::UnknownWeapon(format!("#{}", id.0)))
    }

    pub fn lookup(&self, name: &str) -> Result<WeaponId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownWeapon(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Small built-in set used by the runner and tests
    pub fn standard() -> Self {
        let defs = vec![
            WeaponDefinition {
                id: "rifle".to_string(),
                range: 400.0,
                damage: 40.0,
                rounds_per_minute: 60.0,
                magazine_size: 10,
                reload_seconds: 3.0,
                accuracy: 0.85,
                suppression_per_shot: 0.1,
            },
            WeaponDefinition {
                id: "smg".to_string(),
                range: 150.0,
                damage: 25.0,
                rounds_per_minute: 600.0,
                magazine_size: 30,
                reload_seconds: 2.5,
                accuracy: 0.6,
                suppression_per_shot: 0.08,
            },
            WeaponDefinition {
                id: "lmg".to_string(),
                range: 600.0,
                damage: 35.0,
                rounds_per_minute: 500.0,
                magazine_size: 50,
                reload_seconds: 6.0,
                accuracy: 0.55,
                suppression_per_shot: 0.2,
            },
            WeaponDefinition {
                id: "autocannon".to_string(),
                range: 800.0,
                damage: 120.0,
                rounds_per_minute: 120.0,
                magazine_size: 20,
                reload_seconds: 8.0,
                accuracy: 0.7,
                suppression_per_shot: 0.35,
            },
        ];
        // Built-in definitions are known-valid
        let mut catalog = Self::new();
        for def in defs {
            let id = WeaponId(catalog.definitions.len() as u16);
            catalog.by_name.insert(def.id.clone(), id);
            catalog.definitions.push(def);
        }
        catalog
    }
}
