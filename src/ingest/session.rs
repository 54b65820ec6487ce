//! Per-connection state owned by the packet-processing task

use std::collections::{HashMap, HashSet};

use crate::game::abilities::AbilityCooldownTracker;
use crate::game::kinematics::Vector3;
use crate::game::validator::MotionSample;
use crate::integrity::ParticipantIdentity;
use crate::ws::protocol::{EntityId, MoveType};

/// Default speed ceilings in units per second, before tolerance
pub fn default_max_speeds() -> HashMap<MoveType, f32> {
    HashMap::from([
        (MoveType::Walk, 4.0),
        (MoveType::Run, 8.0),
        (MoveType::Sprint, 12.0),
        (MoveType::Swim, 3.0),
        (MoveType::Mounted, 16.0),
    ])
}

/// Last authoritative motion of one participant
#[derive(Debug, Clone)]
pub struct ParticipantMotionState {
    pub last_position: Vector3,
    pub last_direction: Vector3,
    /// `None` until the first motion packet arrives
    pub last_client_tick: Option<u64>,
    pub move_type: MoveType,
    pub is_jumping: bool,
    /// Server milliseconds
    pub jump_started_at: Option<u64>,
    pub move_packet_count: u64,
    pub max_speed_by_move_type: HashMap<MoveType, f32>,
}

impl ParticipantMotionState {
    pub fn new(spawn: Vector3) -> Self {
        Self {
            last_position: spawn,
            last_direction: Vector3::new(1.0, 0.0, 0.0),
            last_client_tick: None,
            move_type: MoveType::default(),
            is_jumping: false,
            jump_started_at: None,
            move_packet_count: 0,
            max_speed_by_move_type: default_max_speeds(),
        }
    }

    pub fn max_speed(&self, move_type: MoveType) -> f32 {
        self.max_speed_by_move_type
            .get(&move_type)
            .copied()
            .unwrap_or(0.0)
    }

    /// The trusted sample new packets are compared against
    pub fn last_sample(&self) -> Option<MotionSample> {
        self.last_client_tick.map(|tick| MotionSample {
            position: self.last_position,
            direction: self.last_direction,
            tick,
        })
    }

    pub fn start_jump(&mut self, now: u64) {
        self.is_jumping = true;
        self.jump_started_at = Some(now);
    }

    /// Upward motion stops being excused once the jump is older than `cap_ms`
    pub fn expire_jump(&mut self, now: u64, cap_ms: u64) {
        if !self.is_jumping {
            return;
        }
        let started = self.jump_started_at.unwrap_or(now);
        if now.saturating_sub(started) > cap_ms {
            self.is_jumping = false;
            self.jump_started_at = None;
        }
    }

    pub fn accept(&mut self, position: Vector3, direction: Vector3, tick: u64) {
        self.last_position = position;
        self.last_direction = direction;
        self.last_client_tick = Some(tick);
    }
}

/// Everything a connection owns; dropped on disconnect
#[derive(Debug)]
pub struct ParticipantSession {
    pub identity: ParticipantIdentity,
    pub level: u8,
    pub motion: ParticipantMotionState,
    pub cooldowns: AbilityCooldownTracker,
    /// Entities this participant has been told about
    pub visible: HashSet<EntityId>,
}

impl ParticipantSession {
    pub fn new(identity: ParticipantIdentity, level: u8, spawn: Vector3) -> Self {
        Self {
            identity,
            level,
            motion: ParticipantMotionState::new(spawn),
            cooldowns: AbilityCooldownTracker::new(),
            visible: HashSet::new(),
        }
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::Participant(self.identity.participant_id)
    }
}
