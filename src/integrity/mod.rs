//! Integrity enforcement: violation accounting, audit trail and bans

pub mod audit;
pub mod ban;
pub mod ledger;

pub use audit::AuditLog;
pub use ban::{BanStore, RemoteBanStore};
pub use ledger::{ParticipantIdentity, ViolationLedger, ViolationRecord};

use serde::{Deserialize, Serialize};

/// Kinds of cheating the server tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    SpeedHack,
    Teleport,
    FlyHack,
    OutOfBounds,
    TickManipulation,
    CooldownViolation,
    ItemDuplication,
}

impl ViolationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCategory::SpeedHack => "speed_hack",
            ViolationCategory::Teleport => "teleport",
            ViolationCategory::FlyHack => "fly_hack",
            ViolationCategory::OutOfBounds => "out_of_bounds",
            ViolationCategory::TickManipulation => "tick_manipulation",
            ViolationCategory::CooldownViolation => "cooldown_violation",
            ViolationCategory::ItemDuplication => "item_duplication",
        }
    }
}

impl std::fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
