//! WebSocket protocol message definitions
//! These are the payload types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::kinematics::Vector3;

/// Anything with a position that other participants can see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityId {
    Participant(Uuid),
    Creature(u64),
}

/// Movement modes, each with its own speed ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    Walk,
    Run,
    Sprint,
    Swim,
    Mounted,
}

impl Default for MoveType {
    fn default() -> Self {
        Self::Run
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    /// Player released movement input
    Halt,
    /// Reached a destination
    Arrival,
    /// Server moved the entity back to its last trusted position
    Correction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Attack,
    Cast,
    Death,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Continuous movement sample
    Move {
        position: Vector3,
        direction: Vector3,
        /// Client time in milliseconds
        tick: u64,
        #[serde(default)]
        move_type: MoveType,
        speed: f32,
        #[serde(default)]
        acceleration: f32,
    },

    /// Movement ended
    Stop {
        position: Vector3,
        direction: Vector3,
        tick: u64,
        stop_type: StopType,
    },

    /// Jump started
    Jump {
        position: Vector3,
        direction: Vector3,
        tick: u64,
        vertical_speed: f32,
    },

    /// Ability activation, optionally aimed at an entity
    UseAbility {
        ability_id: u32,
        #[serde(default)]
        level: u8,
        target: Option<EntityId>,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        participant_id: Uuid,
        server_time: u64,
        position: Vector3,
    },

    MoveUpdate {
        id: EntityId,
        position: Vector3,
        direction: Vector3,
        tick: u64,
        move_type: MoveType,
        speed: f32,
        acceleration: f32,
    },

    Stop {
        id: EntityId,
        position: Vector3,
        direction: Vector3,
        tick: u64,
        stop_type: StopType,
    },

    Jump {
        id: EntityId,
        position: Vector3,
        direction: Vector3,
        tick: u64,
        vertical_speed: f32,
    },

    /// Rubber-band: the server rejected the reported motion
    Correction {
        position: Vector3,
        direction: Vector3,
        tick: u64,
    },

    CombatStart {
        id: EntityId,
    },

    Action {
        id: EntityId,
        action_type: ActionType,
        loop_count: u8,
    },

    Damage {
        source: EntityId,
        target: EntityId,
        amount: f32,
        is_ranged: bool,
        remaining_health: f32,
    },

    EnterVisibility {
        id: EntityId,
        position: Vector3,
        direction: Vector3,
    },

    LeaveVisibility {
        id: EntityId,
    },

    Dead {
        id: EntityId,
    },

    Despawn {
        id: EntityId,
    },

    Respawn {
        id: EntityId,
        position: Vector3,
    },

    AbilityRejected {
        ability_id: u32,
        remaining_ms: u64,
    },

    /// Connection is about to be closed by the server
    Kicked {
        reason: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}
