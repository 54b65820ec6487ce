//! Packet ingestion - validate, correct, commit, broadcast
//!
//! Each connection drives its own session through these handlers one packet
//! at a time. Motion packets are compared against the last trusted sample;
//! soft violations are rubber-banded, tick manipulation drops the packet.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::abilities::{AbilityCatalog, CooldownCheck};
use crate::game::combat::Combatant;
use crate::game::kinematics::Vector3;
use crate::game::validator::{MotionContext, MotionSample, MotionValidator, ValidationReport};
use crate::game::world::{deliver, ParticipantEntry, World, PARTICIPANT_MAX_HEALTH};
use crate::integrity::{ParticipantIdentity, ViolationCategory, ViolationLedger};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, EntityId, MoveType, ServerMsg, StopType};

use super::session::ParticipantSession;

/// What happened to one inbound packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Committed and broadcast
    Accepted,
    /// Replaced by the last trusted sample
    Corrected,
    /// Discarded without any state change
    Dropped,
    CooldownRejected { remaining_ms: u64 },
    /// Nothing to do (dead participant, unknown ability, ...)
    Ignored,
}

enum MotionVerdict {
    Commit {
        direction: Vector3,
        /// Speed measured against the last trusted sample
        measured_speed: Option<f32>,
    },
    Corrected,
    Dropped,
}

/// Shared services used by every connection's packet handlers
#[derive(Clone)]
pub struct IngestionPipeline {
    validator: Arc<MotionValidator>,
    ledger: Arc<ViolationLedger>,
    world: Arc<World>,
    catalog: Arc<AbilityCatalog>,
}

impl IngestionPipeline {
    pub fn new(
        validator: Arc<MotionValidator>,
        ledger: Arc<ViolationLedger>,
        world: Arc<World>,
        catalog: Arc<AbilityCatalog>,
    ) -> Self {
        Self {
            validator,
            ledger,
            world,
            catalog,
        }
    }

    /// Register a new connection with the world and greet it
    pub fn open_session(
        &self,
        identity: ParticipantIdentity,
        level: u8,
        outbound: mpsc::Sender<ServerMsg>,
        kick: Arc<Notify>,
    ) -> ParticipantSession {
        let spawn = self.world.config().participant_spawn;
        let participant_id = identity.participant_id;

        deliver(
            participant_id,
            &outbound,
            ServerMsg::Welcome {
                participant_id,
                server_time: unix_millis(),
                position: spawn,
            },
        );

        self.world.roster().join(ParticipantEntry {
            id: participant_id,
            account_id: identity.account_id,
            position: spawn,
            direction: Vector3::new(1.0, 0.0, 0.0),
            level,
            health: PARTICIPANT_MAX_HEALTH,
            alive: true,
            outbound,
            kick,
        });

        let mut session = ParticipantSession::new(identity, level, spawn);
        self.refresh_visibility(&mut session);
        self.world.broadcast_near(
            spawn,
            &[ServerMsg::EnterVisibility {
                id: session.entity_id(),
                position: spawn,
                direction: session.motion.last_direction,
            }],
            Some(participant_id),
        );

        info!(
            participant_id = %participant_id,
            account_id = %session.identity.account_id,
            "Participant joined world"
        );
        session
    }

    /// Remove the connection from the world. Violation history is kept.
    pub fn close_session(&self, session: ParticipantSession) {
        let participant_id = session.identity.participant_id;
        self.world.roster().leave(participant_id);
        self.world.broadcast_near(
            session.motion.last_position,
            &[ServerMsg::LeaveVisibility {
                id: session.entity_id(),
            }],
            Some(participant_id),
        );
        info!(
            participant_id = %participant_id,
            packets = session.motion.move_packet_count,
            "Participant left world"
        );
    }

    pub fn handle(&self, session: &mut ParticipantSession, msg: ClientMsg, now: u64) -> PacketOutcome {
        match msg {
            ClientMsg::Move {
                position,
                direction,
                tick,
                move_type,
                speed,
                acceleration,
            } => self.handle_move(session, position, direction, tick, move_type, speed, acceleration, now),
            ClientMsg::Stop {
                position,
                direction,
                tick,
                stop_type,
            } => self.handle_stop(session, position, direction, tick, stop_type, now),
            ClientMsg::Jump {
                position,
                direction,
                tick,
                vertical_speed,
            } => self.handle_jump(session, position, direction, tick, vertical_speed, now),
            ClientMsg::UseAbility {
                ability_id,
                level,
                target,
            } => self.handle_ability(session, ability_id, level, target, now),
            ClientMsg::Ping { t } => {
                self.world
                    .roster()
                    .send_to(session.identity.participant_id, ServerMsg::Pong { t });
                PacketOutcome::Accepted
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn handle_move(
        &self,
        session: &mut ParticipantSession,
        position: Vector3,
        direction: Vector3,
        tick: u64,
        move_type: MoveType,
        speed: f32,
        acceleration: f32,
        now: u64,
    ) -> PacketOutcome {
        session.motion.move_packet_count += 1;
        let sample = MotionSample {
            position,
            direction,
            tick,
        };

        match self.check_motion(session, &sample, move_type, now) {
            Some(MotionVerdict::Commit {
                direction,
                measured_speed,
            }) => {
                let id = session.entity_id();
                let limit =
                    session.motion.max_speed(move_type) * self.validator.config().speed_tolerance;
                let (speed, acceleration) =
                    bounded_motion(measured_speed.unwrap_or(speed), acceleration, limit);
                session.motion.move_type = move_type;
                self.commit(
                    session,
                    position,
                    direction,
                    tick,
                    ServerMsg::MoveUpdate {
                        id,
                        position,
                        direction,
                        tick,
                        move_type,
                        speed,
                        acceleration,
                    },
                );
                PacketOutcome::Accepted
            }
            Some(MotionVerdict::Corrected) => PacketOutcome::Corrected,
            Some(MotionVerdict::Dropped) => PacketOutcome::Dropped,
            None => PacketOutcome::Ignored,
        }
    }

    pub fn handle_stop(
        &self,
        session: &mut ParticipantSession,
        position: Vector3,
        direction: Vector3,
        tick: u64,
        stop_type: StopType,
        now: u64,
    ) -> PacketOutcome {
        let sample = MotionSample {
            position,
            direction,
            tick,
        };
        let move_type = session.motion.move_type;

        match self.check_motion(session, &sample, move_type, now) {
            Some(MotionVerdict::Commit { direction, .. }) => {
                let id = session.entity_id();
                self.commit(
                    session,
                    position,
                    direction,
                    tick,
                    ServerMsg::Stop {
                        id,
                        position,
                        direction,
                        tick,
                        stop_type,
                    },
                );
                PacketOutcome::Accepted
            }
            Some(MotionVerdict::Corrected) => PacketOutcome::Corrected,
            Some(MotionVerdict::Dropped) => PacketOutcome::Dropped,
            None => PacketOutcome::Ignored,
        }
    }

    pub fn handle_jump(
        &self,
        session: &mut ParticipantSession,
        position: Vector3,
        direction: Vector3,
        tick: u64,
        vertical_speed: f32,
        now: u64,
    ) -> PacketOutcome {
        let sample = MotionSample {
            position,
            direction,
            tick,
        };
        let move_type = session.motion.move_type;

        match self.check_motion(session, &sample, move_type, now) {
            Some(MotionVerdict::Commit { direction, .. }) => {
                let id = session.entity_id();
                session.motion.start_jump(now);
                self.commit(
                    session,
                    position,
                    direction,
                    tick,
                    ServerMsg::Jump {
                        id,
                        position,
                        direction,
                        tick,
                        vertical_speed,
                    },
                );
                PacketOutcome::Accepted
            }
            Some(MotionVerdict::Corrected) => PacketOutcome::Corrected,
            Some(MotionVerdict::Dropped) => PacketOutcome::Dropped,
            None => PacketOutcome::Ignored,
        }
    }

    pub fn handle_ability(
        &self,
        session: &mut ParticipantSession,
        ability_id: u32,
        level: u8,
        target: Option<EntityId>,
        now: u64,
    ) -> PacketOutcome {
        let participant_id = session.identity.participant_id;
        if !self.is_alive(participant_id) {
            return PacketOutcome::Ignored;
        }

        let Some(cooldown_secs) = self.catalog.cooldown_secs(ability_id, level) else {
            self.world.roster().send_to(
                participant_id,
                ServerMsg::Error {
                    code: "unknown_ability".to_string(),
                    message: format!("Unknown ability {}", ability_id),
                },
            );
            return PacketOutcome::Ignored;
        };

        if let CooldownCheck::Rejected { remaining_ms } =
            session.cooldowns.validate_and_track(ability_id, cooldown_secs, now)
        {
            let name = self.catalog.display_name(ability_id).unwrap_or("unknown");
            self.ledger.record(
                &session.identity,
                ViolationCategory::CooldownViolation,
                &format!("{} (id {}) used {}ms early", name, ability_id, remaining_ms),
            );
            if self.ledger.enforcement_enabled() {
                self.world.roster().send_to(
                    participant_id,
                    ServerMsg::AbilityRejected {
                        ability_id,
                        remaining_ms,
                    },
                );
                return PacketOutcome::CooldownRejected { remaining_ms };
            }
        }

        if let Some(EntityId::Creature(creature_id)) = target {
            self.strike_creature(session, ability_id, creature_id, now);
        }
        PacketOutcome::Accepted
    }

    fn strike_creature(&self, session: &ParticipantSession, ability_id: u32, creature_id: u64, now: u64) {
        let Some(def) = self.catalog.get(ability_id) else {
            return;
        };
        if def.damage <= 0.0 {
            return;
        }

        let attacker = Combatant {
            id: session.entity_id(),
            position: session.motion.last_position,
            level: session.level,
            power: def.damage,
            attack_range: def.range,
        };
        match self
            .world
            .strike_creature(&attacker, session.identity.participant_id, creature_id, now)
        {
            Some((origin, events)) => self.world.broadcast_near(origin, &events, None),
            None => debug!(
                participant_id = %session.identity.participant_id,
                creature_id,
                "Ability target unavailable or out of reach"
            ),
        }
    }

    /// Participants killed in the world stay dead until they reconnect
    fn is_alive(&self, participant_id: Uuid) -> bool {
        self.world
            .roster()
            .view(participant_id)
            .map_or(false, |v| v.alive)
    }

    /// Validate a motion sample and apply the correction policy.
    /// `None` means the participant cannot move right now.
    fn check_motion(
        &self,
        session: &mut ParticipantSession,
        sample: &MotionSample,
        move_type: MoveType,
        now: u64,
    ) -> Option<MotionVerdict> {
        if !self.is_alive(session.identity.participant_id) {
            return None;
        }

        let config = self.validator.config();
        session.motion.expire_jump(now, config.max_jump_duration_ms);

        let ctx = MotionContext {
            max_speed: session.motion.max_speed(move_type),
            is_jumping: session.motion.is_jumping,
        };
        let report = match session.motion.last_sample() {
            Some(last) => self.validator.validate(&last, sample, ctx),
            None => self
                .validator
                .validate_initial(session.motion.last_position, sample, ctx),
        };

        Some(self.apply_policy(session, sample, &report))
    }

    fn apply_policy(
        &self,
        session: &mut ParticipantSession,
        sample: &MotionSample,
        report: &ValidationReport,
    ) -> MotionVerdict {
        for violation in &report.violations {
            self.ledger
                .record(&session.identity, violation.category, &violation.detail);
        }

        let commit = MotionVerdict::Commit {
            direction: report.direction.or_fallback(session.motion.last_direction),
            measured_speed: report.speed.measured(),
        };

        if !self.ledger.enforcement_enabled() {
            return commit;
        }

        if report.has_hard_violation() {
            debug!(
                participant_id = %session.identity.participant_id,
                tick = sample.tick,
                "Packet dropped"
            );
            return MotionVerdict::Dropped;
        }

        if report.soft_violations().next().is_some() {
            self.rubber_band(session, sample.tick);
            return MotionVerdict::Corrected;
        }

        commit
    }

    /// Put the participant back on its last trusted sample. Position,
    /// direction and tick are left untouched, so the next packet is measured
    /// from that sample.
    fn rubber_band(&self, session: &ParticipantSession, rejected_tick: u64) {
        let participant_id = session.identity.participant_id;
        let position = session.motion.last_position;
        let direction = session.motion.last_direction;
        let tick = session.motion.last_client_tick.unwrap_or(rejected_tick);

        self.world.roster().send_to(
            participant_id,
            ServerMsg::Correction {
                position,
                direction,
                tick,
            },
        );
        self.world.broadcast_near(
            position,
            &[ServerMsg::Stop {
                id: session.entity_id(),
                position,
                direction,
                tick,
                stop_type: StopType::Correction,
            }],
            Some(participant_id),
        );
    }

    fn commit(
        &self,
        session: &mut ParticipantSession,
        position: Vector3,
        direction: Vector3,
        tick: u64,
        broadcast: ServerMsg,
    ) {
        let participant_id = session.identity.participant_id;
        session.motion.accept(position, direction, tick);
        self.world
            .roster()
            .update_position(participant_id, position, direction);
        self.world
            .broadcast_near(position, &[broadcast], Some(participant_id));
        self.refresh_visibility(session);
    }

    /// Diff what the participant can see now against what it was told about
    fn refresh_visibility(&self, session: &mut ParticipantSession) {
        let participant_id = session.identity.participant_id;
        let visible = self
            .world
            .visible_from(session.motion.last_position, participant_id);
        let current: HashSet<EntityId> = visible.iter().map(|v| v.id).collect();

        for entity in visible.iter().filter(|v| !session.visible.contains(&v.id)) {
            self.world.roster().send_to(
                participant_id,
                ServerMsg::EnterVisibility {
                    id: entity.id,
                    position: entity.position,
                    direction: entity.direction,
                },
            );
        }
        for gone in session.visible.difference(&current) {
            self.world
                .roster()
                .send_to(participant_id, ServerMsg::LeaveVisibility { id: *gone });
        }

        session.visible = current;
    }
}

/// Client-reported speed and acceleration are relayed to others only within
/// what the move type allows
fn bounded_motion(speed: f32, acceleration: f32, limit: f32) -> (f32, f32) {
    (speed.max(0.0).min(limit), acceleration.max(-limit).min(limit))
}
