//! Ability definitions and per-participant cooldown tracking

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Static description of an ability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityDefinition {
    pub id: u32,
    pub name: String,
    pub base_cooldown_secs: f32,
    /// Cooldowns that replace the base value at specific ability levels
    #[serde(default)]
    pub level_cooldowns: HashMap<u8, f32>,
    /// Base damage when aimed at an entity (0 for utility abilities)
    #[serde(default)]
    pub damage: f32,
    /// Maximum distance to the target
    #[serde(default)]
    pub range: f32,
}

/// Lookup of ability definitions by id, loaded once at startup
#[derive(Debug, Clone)]
pub struct AbilityCatalog {
    abilities: HashMap<u32, AbilityDefinition>,
}

impl AbilityCatalog {
    pub fn new(definitions: Vec<AbilityDefinition>) -> Self {
        Self {
            abilities: definitions.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Load a JSON array of definitions
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(CatalogError::Io)?;
        let definitions: Vec<AbilityDefinition> =
            serde_json::from_str(&raw).map_err(CatalogError::Parse)?;
        Ok(Self::new(definitions))
    }

    pub fn get(&self, ability_id: u32) -> Option<&AbilityDefinition> {
        self.abilities.get(&ability_id)
    }

    /// Cooldown for an ability at a level; a level override wins over the base value
    pub fn cooldown_secs(&self, ability_id: u32, level: u8) -> Option<f32> {
        let def = self.abilities.get(&ability_id)?;
        Some(
            def.level_cooldowns
                .get(&level)
                .copied()
                .unwrap_or(def.base_cooldown_secs),
        )
    }

    pub fn display_name(&self, ability_id: u32) -> Option<&str> {
        self.abilities.get(&ability_id).map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.abilities.len()
    }
}

impl Default for AbilityCatalog {
    fn default() -> Self {
        Self::new(vec![
            AbilityDefinition {
                id: 1,
                name: "Strike".to_string(),
                base_cooldown_secs: 1.5,
                level_cooldowns: HashMap::new(),
                damage: 12.0,
                range: 3.5,
            },
            AbilityDefinition {
                id: 2,
                name: "Fireball".to_string(),
                base_cooldown_secs: 6.0,
                level_cooldowns: HashMap::from([(3, 5.0), (5, 4.0)]),
                damage: 30.0,
                range: 25.0,
            },
            AbilityDefinition {
                id: 3,
                name: "Mend".to_string(),
                base_cooldown_secs: 12.0,
                level_cooldowns: HashMap::new(),
                damage: 0.0,
                range: 0.0,
            },
            AbilityDefinition {
                id: 4,
                name: "Dash".to_string(),
                base_cooldown_secs: 20.0,
                level_cooldowns: HashMap::from([(5, 15.0)]),
                damage: 0.0,
                range: 0.0,
            },
        ])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read ability catalog: {0}")]
    Io(std::io::Error),

    #[error("Invalid ability catalog: {0}")]
    Parse(serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownEntry {
    pub ability_id: u32,
    pub last_used_at: u64,
    pub cooldown_ms: u64,
    pub next_available_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownCheck {
    Accepted,
    Rejected { remaining_ms: u64 },
}

/// Cooldown clocks for one participant. Times are server milliseconds.
#[derive(Debug, Default)]
pub struct AbilityCooldownTracker {
    entries: HashMap<u32, CooldownEntry>,
}

impl AbilityCooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self, ability_id: u32, now: u64) -> bool {
        match self.entries.get(&ability_id) {
            Some(entry) => now >= entry.next_available_at,
            None => true,
        }
    }

    /// Accept and start the cooldown, or reject without touching the clock
    pub fn validate_and_track(&mut self, ability_id: u32, cooldown_secs: f32, now: u64) -> CooldownCheck {
        if !self.is_ready(ability_id, now) {
            return CooldownCheck::Rejected {
                remaining_ms: self.remaining(ability_id, now),
            };
        }

        let cooldown_ms = (cooldown_secs.max(0.0) * 1000.0).round() as u64;
        self.entries.insert(
            ability_id,
            CooldownEntry {
                ability_id,
                last_used_at: now,
                cooldown_ms,
                next_available_at: now + cooldown_ms,
            },
        );
        CooldownCheck::Accepted
    }

    /// Milliseconds until the ability is ready, never negative
    pub fn remaining(&self, ability_id: u32, now: u64) -> u64 {
        self.entries
            .get(&ability_id)
            .map(|e| e.next_available_at.saturating_sub(now))
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn entry(&self, ability_id: u32) -> Option<&CooldownEntry> {
        self.entries.get(&ability_id)
    }
}
