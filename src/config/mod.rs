//! Configuration module - environment variable parsing
//!
//! Tunables are loaded once at startup and injected into the services that
//! use them; nothing rebuilds these tables per call.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::game::kinematics::Vector3;
use crate::integrity::ViolationCategory;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// HS256 secret used to verify connection and admin tokens
    pub jwt_secret: String,

    /// Append-only violation audit log
    pub audit_log_path: PathBuf,
    /// External ban service base URL (bans stay local when unset)
    pub ban_service_url: Option<String>,
    /// Bearer key for the ban service
    pub ban_service_key: Option<String>,
    /// Optional JSON ability catalog
    pub ability_catalog_path: Option<PathBuf>,

    pub toggles: IntegrityToggles,
    pub validation: ValidationConfig,
    pub thresholds: BanThresholds,
    pub creatures: CreatureConfig,
    pub world: WorldConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let validation_defaults = ValidationConfig::default();
        let validation = ValidationConfig {
            speed_tolerance: env_or("SPEED_TOLERANCE", validation_defaults.speed_tolerance)?,
            direction_tolerance: env_or(
                "DIRECTION_TOLERANCE",
                validation_defaults.direction_tolerance,
            )?,
            max_teleport_distance: env_or(
                "MAX_TELEPORT_DISTANCE",
                validation_defaults.max_teleport_distance,
            )?,
            max_tick_delta: env_or("MAX_TICK_DELTA_MS", validation_defaults.max_tick_delta)?,
            max_jump_height: env_or("MAX_JUMP_HEIGHT", validation_defaults.max_jump_height)?,
            terrain_step_tolerance: env_or(
                "TERRAIN_STEP_TOLERANCE",
                validation_defaults.terrain_step_tolerance,
            )?,
            ..validation_defaults
        };

        let creature_defaults = CreatureConfig::default();
        let creatures = CreatureConfig {
            aggro_radius: env_or("CREATURE_AGGRO_RADIUS", creature_defaults.aggro_radius)?,
            attack_range: env_or("CREATURE_ATTACK_RANGE", creature_defaults.attack_range)?,
            attack_interval_ms: env_or(
                "CREATURE_ATTACK_INTERVAL_MS",
                creature_defaults.attack_interval_ms,
            )?,
            ..creature_defaults
        };

        let world_defaults = WorldConfig::default();
        let world = WorldConfig {
            update_distance: env_or("UPDATE_DISTANCE", world_defaults.update_distance)?,
            creature_count: env_or("CREATURE_COUNT", world_defaults.creature_count)?,
            seed: env_or("WORLD_SEED", world_defaults.seed)?,
            ..world_defaults
        };

        let threshold_defaults = BanThresholds::default();
        let thresholds = BanThresholds {
            speed_hack: env_or("BAN_THRESHOLD_SPEED_HACK", threshold_defaults.speed_hack)?,
            teleport: env_or("BAN_THRESHOLD_TELEPORT", threshold_defaults.teleport)?,
            fly_hack: env_or("BAN_THRESHOLD_FLY_HACK", threshold_defaults.fly_hack)?,
            ..threshold_defaults
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,

            audit_log_path: env::var("AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("violations.log")),
            ban_service_url: env::var("BAN_SERVICE_URL").ok(),
            ban_service_key: env::var("BAN_SERVICE_KEY").ok(),
            ability_catalog_path: env::var("ABILITY_CATALOG_PATH").ok().map(PathBuf::from),

            toggles: IntegrityToggles {
                auto_ban_enabled: env_or("AUTO_BAN_ENABLED", true)?,
                enforcement_enabled: env_or("ENFORCEMENT_ENABLED", true)?,
            },
            validation,
            thresholds,
            creatures,
            world,
        })
    }
}

/// Read and parse an optional variable, falling back to `default` when unset
fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Rollout switches for the integrity layer
#[derive(Debug, Clone, Copy)]
pub struct IntegrityToggles {
    /// Request bans from the ban store once a threshold is reached
    pub auto_ban_enabled: bool,
    /// Rubber-band and drop offending packets. When off, violations are only logged.
    pub enforcement_enabled: bool,
}

impl Default for IntegrityToggles {
    fn default() -> Self {
        Self {
            auto_ban_enabled: true,
            enforcement_enabled: true,
        }
    }
}

/// Axis-aligned playable region
#[derive(Debug, Clone, Copy)]
pub struct MapBounds {
    pub min: Vector3,
    pub max: Vector3,
}

impl MapBounds {
    pub fn contains(&self, p: Vector3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

impl Default for MapBounds {
    fn default() -> Self {
        Self {
            min: Vector3::new(-10_000.0, -10_000.0, -500.0),
            max: Vector3::new(10_000.0, 10_000.0, 2_000.0),
        }
    }
}

/// Motion validation tunables
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Multiplier (> 1) applied to the max speed to absorb jitter
    pub speed_tolerance: f32,
    /// Allowed deviation of a direction vector's length from 1
    pub direction_tolerance: f32,
    /// Distance between consecutive samples that always counts as a teleport
    pub max_teleport_distance: f32,
    /// Largest accepted client tick advance, milliseconds
    pub max_tick_delta: u64,
    /// Largest upward step per sample while jumping
    pub max_jump_height: f32,
    /// Largest upward step per sample while grounded (stairs, slopes)
    pub terrain_step_tolerance: f32,
    /// How long after a jump upward motion stays excused, milliseconds
    pub max_jump_duration_ms: u64,
    /// Samples closer together than this (seconds) cannot be verified
    pub min_verifiable_delta_secs: f32,
    pub map_bounds: MapBounds,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            speed_tolerance: 1.2,
            direction_tolerance: 0.01,
            max_teleport_distance: 50.0,
            max_tick_delta: 10_000,
            max_jump_height: 12.0,
            terrain_step_tolerance: 2.0,
            max_jump_duration_ms: 2_000,
            min_verifiable_delta_secs: 0.001,
            map_bounds: MapBounds::default(),
        }
    }
}

/// Number of recorded violations per category that triggers a ban
#[derive(Debug, Clone)]
pub struct BanThresholds {
    pub speed_hack: u32,
    pub teleport: u32,
    pub fly_hack: u32,
    pub out_of_bounds: u32,
    pub tick_manipulation: u32,
    pub cooldown: u32,
    /// Zero tolerance
    pub item_duplication: u32,
}

impl BanThresholds {
    pub fn threshold_for(&self, category: ViolationCategory) -> u32 {
        match category {
            ViolationCategory::SpeedHack => self.speed_hack,
            ViolationCategory::Teleport => self.teleport,
            ViolationCategory::FlyHack => self.fly_hack,
            ViolationCategory::OutOfBounds => self.out_of_bounds,
            ViolationCategory::TickManipulation => self.tick_manipulation,
            ViolationCategory::CooldownViolation => self.cooldown,
            ViolationCategory::ItemDuplication => self.item_duplication,
        }
    }

    /// Categories that escalate on their first occurrence
    pub fn is_zero_tolerance(&self, category: ViolationCategory) -> bool {
        self.threshold_for(category) <= 1
    }
}

impl Default for BanThresholds {
    fn default() -> Self {
        Self {
            speed_hack: 5,
            teleport: 3,
            fly_hack: 5,
            out_of_bounds: 3,
            tick_manipulation: 3,
            cooldown: 10,
            item_duplication: 1,
        }
    }
}

/// Creature behavior tunables shared by every creature in the world
#[derive(Debug, Clone)]
pub struct CreatureConfig {
    /// Distance at which a roaming creature notices a participant
    pub aggro_radius: f32,
    pub attack_range: f32,
    pub attack_interval_ms: u64,
    /// Roaming destinations are picked within this radius of the spawn point
    pub roam_radius: f32,
    pub roam_interval_min_ms: u64,
    pub roam_interval_max_ms: u64,
    /// Minimum simulated time between two updates of the same creature
    pub update_interval_ms: u64,
    /// Delay between death and despawn
    pub despawn_delay_ms: u64,
    /// Delay between despawn and respawn
    pub respawn_delay_ms: u64,
    /// Attempts at finding a roam destination different from the current position
    pub destination_retries: u32,
    /// Smallest acceptance radius when arriving at a destination
    pub min_arrival_threshold: f32,
}

impl Default for CreatureConfig {
    fn default() -> Self {
        Self {
            aggro_radius: 15.0,
            attack_range: 3.0,
            attack_interval_ms: 2_000,
            roam_radius: 20.0,
            roam_interval_min_ms: 500,
            roam_interval_max_ms: 2_500,
            update_interval_ms: 100,
            despawn_delay_ms: 5_000,
            respawn_delay_ms: 30_000,
            destination_retries: 10,
            min_arrival_threshold: 0.5,
        }
    }
}

/// World-level settings
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Events are only sent to participants within this distance of their source
    pub update_distance: f32,
    pub creature_count: usize,
    /// Seed for deterministic creature placement
    pub seed: u64,
    /// Creatures spawn within this radius of the world origin
    pub spawn_area_radius: f32,
    /// Where new participants enter the world
    pub participant_spawn: Vector3,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            update_distance: 100.0,
            creature_count: 32,
            seed: 0x5EED,
            spawn_area_radius: 400.0,
            participant_spawn: Vector3::ZERO,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
