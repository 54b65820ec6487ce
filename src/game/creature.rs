//! Autonomous creature controller
//!
//! Creatures roam around their spawn point, chase participants that come
//! within aggro range, attack once in reach, and go through a
//! death → despawn → respawn cycle when killed. Their motion uses the same
//! snapshot kinematics as participant validation, and they never pass
//! through the motion validator.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use uuid::Uuid;

use crate::config::CreatureConfig;
use crate::game::combat::Combatant;
use crate::game::kinematics::{
    current_position, direction_between, distance_3d, MotionSnapshot, Vector3,
};
use crate::ws::protocol::{ActionType, EntityId, MoveType, ServerMsg, StopType};

pub type CreatureId = u64;

/// Per-kind creature stats
#[derive(Debug, Clone)]
pub struct CreatureTemplate {
    pub name: String,
    pub level: u8,
    pub max_health: f32,
    /// Units per second
    pub speed: f32,
    pub acceleration: f32,
    pub attack_power: f32,
}

impl Default for CreatureTemplate {
    fn default() -> Self {
        Self {
            name: "Gray Wolf".to_string(),
            level: 3,
            max_health: 60.0,
            speed: 5.0,
            acceleration: 0.0,
            attack_power: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorState {
    Roaming,
    Chasing,
    Attacking,
}

/// Death cycle, orthogonal to the combat states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Alive,
    Dead { died_at: u64 },
    Despawned { despawned_at: u64 },
}

/// What a creature can see of a participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticipantView {
    pub id: Uuid,
    pub position: Vector3,
    pub level: u8,
}

/// Outcome of a creature attacking a participant
#[derive(Debug, Clone, Default)]
pub struct StrikeResult {
    pub events: Vec<ServerMsg>,
    pub killed: bool,
}

/// The creature's window onto the live world.
///
/// Lookups only return participants that are connected and alive, so a
/// `None` is how a creature learns its target is gone.
pub trait CreatureWorld {
    fn nearest_participant(&self, origin: Vector3, radius: f32) -> Option<ParticipantView>;

    fn resolve_participant(&self, id: Uuid) -> Option<ParticipantView>;

    fn strike(&self, attacker: &Combatant, target: &ParticipantView) -> StrikeResult;
}

#[derive(Debug, Clone)]
pub struct Creature {
    pub id: CreatureId,
    pub template: CreatureTemplate,
    pub spawn_point: Vector3,
    pub position: Vector3,
    pub direction: Vector3,
    pub destination: Option<Vector3>,
    pub state: BehaviorState,
    pub motion: Option<MotionSnapshot>,
    pub health: f32,
    /// Weak reference, re-resolved against the roster every update
    pub target: Option<Uuid>,
    pub last_action_tick: Option<u64>,
    pub lifecycle: Lifecycle,
    last_update: Option<u64>,
    next_roam_at: u64,
    rng: ChaCha8Rng,
}

impl Creature {
    pub fn new(id: CreatureId, template: CreatureTemplate, spawn_point: Vector3, seed: u64) -> Self {
        Self {
            id,
            health: template.max_health,
            template,
            spawn_point,
            position: spawn_point,
            direction: Vector3::new(1.0, 0.0, 0.0),
            destination: None,
            state: BehaviorState::Roaming,
            motion: None,
            target: None,
            last_action_tick: None,
            lifecycle: Lifecycle::Alive,
            last_update: None,
            next_roam_at: 0,
            rng: ChaCha8Rng::seed_from_u64(seed ^ id.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        }
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::Creature(self.id)
    }

    pub fn is_alive(&self) -> bool {
        self.lifecycle == Lifecycle::Alive
    }

    /// Despawned creatures are invisible to everyone
    pub fn is_visible(&self) -> bool {
        !matches!(self.lifecycle, Lifecycle::Despawned { .. })
    }

    pub fn combatant(&self, cfg: &CreatureConfig) -> Combatant {
        Combatant {
            id: self.entity_id(),
            position: self.position,
            level: self.template.level,
            power: self.template.attack_power,
            attack_range: cfg.attack_range,
        }
    }

    /// Advance the controller. Runs at most once per `update_interval_ms`;
    /// returns the events to broadcast around the creature.
    pub fn update(&mut self, now: u64, cfg: &CreatureConfig, world: &dyn CreatureWorld) -> Vec<ServerMsg> {
        if let Some(last) = self.last_update {
            if now < last + cfg.update_interval_ms {
                return Vec::new();
            }
        }
        self.last_update = Some(now);

        let mut events = Vec::new();

        match self.lifecycle {
            Lifecycle::Dead { died_at } => {
                if now >= died_at + cfg.despawn_delay_ms {
                    self.lifecycle = Lifecycle::Despawned { despawned_at: now };
                    events.push(ServerMsg::Despawn {
                        id: self.entity_id(),
                    });
                    debug!(creature_id = self.id, "Creature despawned");
                }
                return events;
            }
            Lifecycle::Despawned { despawned_at } => {
                if now >= despawned_at + cfg.respawn_delay_ms {
                    self.respawn(now, cfg, &mut events);
                }
                return events;
            }
            Lifecycle::Alive => {}
        }

        if self.health <= 0.0 {
            self.die(now, &mut events);
            return events;
        }

        self.sync_position(now);

        match self.state {
            BehaviorState::Roaming => self.roam(now, cfg, world, &mut events),
            BehaviorState::Chasing => self.chase(now, cfg, world, &mut events),
            BehaviorState::Attacking => self.attack(now, cfg, world, &mut events),
        }

        events
    }

    /// Begin moving towards `destination`, replacing any current motion
    pub fn move_to(&mut self, destination: Vector3, now: u64, events: &mut Vec<ServerMsg>) {
        self.sync_position(now);
        let snapshot = MotionSnapshot::towards(
            self.position,
            destination,
            self.template.speed,
            self.template.acceleration,
            now,
        );
        if snapshot.direction != Vector3::ZERO {
            self.direction = snapshot.direction;
        }
        self.motion = Some(snapshot);
        self.destination = Some(destination);

        events.push(ServerMsg::MoveUpdate {
            id: self.entity_id(),
            position: self.position,
            direction: self.direction,
            tick: now,
            move_type: MoveType::Run,
            speed: snapshot.velocity,
            acceleration: snapshot.acceleration,
        });
    }

    /// Apply damage already resolved by the combat resolver
    pub fn receive_damage(
        &mut self,
        remaining_health: f32,
        attacker: Option<Uuid>,
        now: u64,
    ) -> Vec<ServerMsg> {
        let mut events = Vec::new();
        if !self.is_alive() {
            return events;
        }

        self.health = remaining_health;
        if self.health <= 0.0 {
            self.die(now, &mut events);
        } else if self.state == BehaviorState::Roaming {
            if let Some(attacker) = attacker {
                self.target = Some(attacker);
                self.transition(BehaviorState::Chasing);
            }
        }
        events
    }

    fn sync_position(&mut self, now: u64) {
        if let Some(snapshot) = &self.motion {
            if let Some(pos) = current_position(snapshot, now) {
                self.position = pos;
            }
        }
    }

    fn transition(&mut self, next: BehaviorState) {
        if self.state != next {
            debug!(
                creature_id = self.id,
                from = ?self.state,
                to = ?next,
                "Creature state change"
            );
            self.state = next;
        }
    }

    fn roam(&mut self, now: u64, cfg: &CreatureConfig, world: &dyn CreatureWorld, events: &mut Vec<ServerMsg>) {
        if let Some(found) = world.nearest_participant(self.position, cfg.aggro_radius) {
            self.target = Some(found.id);
            self.transition(BehaviorState::Chasing);
            return;
        }

        if self.motion.is_some() {
            self.step_movement(now, cfg, events);
            return;
        }

        if now < self.next_roam_at {
            return;
        }

        if let Some(destination) = self.pick_roam_destination(cfg) {
            self.move_to(destination, now, events);
        }
        self.next_roam_at = now
            + self
                .rng
                .gen_range(cfg.roam_interval_min_ms..=cfg.roam_interval_max_ms);
    }

    fn chase(&mut self, now: u64, cfg: &CreatureConfig, world: &dyn CreatureWorld, events: &mut Vec<ServerMsg>) {
        let Some(target) = self.target.and_then(|id| world.resolve_participant(id)) else {
            self.lose_target(now, events);
            return;
        };

        if distance_3d(self.position, target.position) <= cfg.attack_range {
            self.halt(now, StopType::Halt, events);
            self.face(target.position);
            self.transition(BehaviorState::Attacking);
            return;
        }

        let stale = match self.destination {
            Some(dest) => distance_3d(dest, target.position) > cfg.attack_range * 0.5,
            None => true,
        };
        if stale {
            // A fresh snapshot has nothing to step yet
            self.move_to(target.position, now, events);
            return;
        }
        self.step_movement(now, cfg, events);
    }

    fn attack(&mut self, now: u64, cfg: &CreatureConfig, world: &dyn CreatureWorld, events: &mut Vec<ServerMsg>) {
        let Some(target) = self.target.and_then(|id| world.resolve_participant(id)) else {
            self.lose_target(now, events);
            return;
        };

        if distance_3d(self.position, target.position) > cfg.attack_range {
            self.transition(BehaviorState::Chasing);
            return;
        }

        let ready = self
            .last_action_tick
            .map_or(true, |last| now >= last + cfg.attack_interval_ms);
        if !ready {
            return;
        }

        self.last_action_tick = Some(now);
        self.face(target.position);
        events.push(ServerMsg::CombatStart {
            id: self.entity_id(),
        });
        events.push(ServerMsg::Action {
            id: self.entity_id(),
            action_type: ActionType::Attack,
            loop_count: 1,
        });

        let result = world.strike(&self.combatant(cfg), &target);
        events.extend(result.events);

        if result.killed {
            debug!(creature_id = self.id, participant_id = %target.id, "Creature killed its target");
            self.lose_target(now, events);
        }
    }

    /// Shared movement step: interpolate, then either arrive or report progress
    fn step_movement(&mut self, now: u64, cfg: &CreatureConfig, events: &mut Vec<ServerMsg>) {
        let Some(snapshot) = self.motion else {
            return;
        };

        if let Some(pos) = current_position(&snapshot, now) {
            self.position = pos;
        }

        // Faster creatures cover more ground per update, so they accept a wider radius
        let threshold = (self.template.speed * cfg.update_interval_ms as f32 / 1000.0)
            .max(cfg.min_arrival_threshold);

        if distance_3d(self.position, snapshot.destination) <= threshold {
            self.position = snapshot.destination;
            self.halt(now, StopType::Arrival, events);
            return;
        }

        let facing = direction_between(self.position, snapshot.destination);
        if facing != Vector3::ZERO {
            self.direction = facing;
        }
        events.push(ServerMsg::MoveUpdate {
            id: self.entity_id(),
            position: self.position,
            direction: self.direction,
            tick: now,
            move_type: MoveType::Run,
            speed: snapshot.velocity,
            acceleration: snapshot.acceleration,
        });
    }

    fn halt(&mut self, now: u64, stop_type: StopType, events: &mut Vec<ServerMsg>) {
        if self.motion.take().is_none() {
            return;
        }
        self.destination = None;
        events.push(ServerMsg::Stop {
            id: self.entity_id(),
            position: self.position,
            direction: self.direction,
            tick: now,
            stop_type,
        });
    }

    fn face(&mut self, point: Vector3) {
        let dir = direction_between(self.position, point);
        if dir != Vector3::ZERO {
            self.direction = dir;
        }
    }

    /// Drop the target and walk back to the spawn point
    fn lose_target(&mut self, now: u64, events: &mut Vec<ServerMsg>) {
        self.target = None;
        self.transition(BehaviorState::Roaming);
        if self.position != self.spawn_point {
            self.move_to(self.spawn_point, now, events);
        }
    }

    fn pick_roam_destination(&mut self, cfg: &CreatureConfig) -> Option<Vector3> {
        for _ in 0..cfg.destination_retries {
            let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
            let distance = self.rng.gen_range(0.0..=cfg.roam_radius);
            let candidate = Vector3::new(
                self.spawn_point.x + angle.cos() * distance,
                self.spawn_point.y + angle.sin() * distance,
                self.spawn_point.z,
            );
            if candidate != self.position {
                return Some(candidate);
            }
        }
        None
    }

    fn die(&mut self, now: u64, events: &mut Vec<ServerMsg>) {
        self.health = 0.0;
        self.motion = None;
        self.destination = None;
        self.target = None;
        self.state = BehaviorState::Roaming;
        self.lifecycle = Lifecycle::Dead { died_at: now };

        events.push(ServerMsg::Action {
            id: self.entity_id(),
            action_type: ActionType::Death,
            loop_count: 1,
        });
        events.push(ServerMsg::Dead {
            id: self.entity_id(),
        });
        debug!(creature_id = self.id, name = %self.template.name, "Creature died");
    }

    fn respawn(&mut self, now: u64, cfg: &CreatureConfig, events: &mut Vec<ServerMsg>) {
        self.health = self.template.max_health;
        self.position = self.spawn_point;
        self.direction = Vector3::new(1.0, 0.0, 0.0);
        self.destination = None;
        self.motion = None;
        self.target = None;
        self.last_action_tick = None;
        self.state = BehaviorState::Roaming;
        self.lifecycle = Lifecycle::Alive;
        self.next_roam_at = now
            + self
                .rng
                .gen_range(cfg.roam_interval_min_ms..=cfg.roam_interval_max_ms);

        events.push(ServerMsg::Respawn {
            id: self.entity_id(),
            position: self.position,
        });
        debug!(creature_id = self.id, "Creature respawned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeWorld {
        participants: RefCell<HashMap<Uuid, ParticipantView>>,
        strikes: Cell<u32>,
        kill_on_strike: Cell<bool>,
    }

    impl FakeWorld {
        fn put(&self, id: Uuid, position: Vector3) {
            self.participants.borrow_mut().insert(
                id,
                ParticipantView {
                    id,
                    position,
                    level: 1,
                },
            );
        }

        fn remove(&self, id: Uuid) {
            self.participants.borrow_mut().remove(&id);
        }
    }

    impl CreatureWorld for FakeWorld {
        fn nearest_participant(&self, origin: Vector3, radius: f32) -> Option<ParticipantView> {
            self.participants
                .borrow()
                .values()
                .filter(|p| distance_3d(origin, p.position) <= radius)
                .min_by(|a, b| {
                    distance_3d(origin, a.position)
                        .total_cmp(&distance_3d(origin, b.position))
                })
                .copied()
        }

        fn resolve_participant(&self, id: Uuid) -> Option<ParticipantView> {
            self.participants.borrow().get(&id).copied()
        }

        fn strike(&self, _attacker: &Combatant, _target: &ParticipantView) -> StrikeResult {
            self.strikes.set(self.strikes.get() + 1);
            StrikeResult {
                events: Vec::new(),
                killed: self.kill_on_strike.get(),
            }
        }
    }

    fn creature() -> Creature {
        Creature::new(7, CreatureTemplate::default(), Vector3::ZERO, 42)
    }

    #[test]
    fn test_reaches_assigned_destination() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        let mut c = creature();
        let dest = Vector3::new(12.0, -7.0, 0.0);

        let mut events = Vec::new();
        c.move_to(dest, 1_000, &mut events);
        assert!(matches!(events[0], ServerMsg::MoveUpdate { .. }));

        let mut now = 1_000;
        let mut arrived = false;
        for _ in 0..200 {
            now += 100;
            let events = c.update(now, &cfg, &world);
            if events
                .iter()
                .any(|e| matches!(e, ServerMsg::Stop { stop_type: StopType::Arrival, .. }))
            {
                arrived = true;
                break;
            }
        }

        assert!(arrived);
        assert_eq!(c.position, dest);
        assert!(c.motion.is_none());
    }

    #[test]
    fn test_update_is_rate_limited() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        let mut c = creature();
        let mut events = Vec::new();
        c.move_to(Vector3::new(50.0, 0.0, 0.0), 0, &mut events);

        assert!(!c.update(1_000, &cfg, &world).is_empty());
        assert!(c.update(1_050, &cfg, &world).is_empty());
        assert!(!c.update(1_100, &cfg, &world).is_empty());
    }

    #[test]
    fn test_roaming_picks_destination_near_spawn() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        let mut c = creature();

        let events = c.update(0, &cfg, &world);
        let dest = c.destination.expect("roaming creature should pick a destination");
        assert!(distance_3d(dest, c.spawn_point) <= cfg.roam_radius + 1e-3);
        assert!(matches!(events[0], ServerMsg::MoveUpdate { .. }));
    }

    #[test]
    fn test_full_combat_cycle() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        let mut c = creature();
        let player = Uuid::new_v4();
        world.put(player, Vector3::new(8.0, 0.0, 0.0));

        // Roaming -> Chasing once the participant is inside the aggro radius
        c.update(0, &cfg, &world);
        assert_eq!(c.state, BehaviorState::Chasing);
        assert_eq!(c.target, Some(player));

        // Chasing -> Attacking once in range
        let mut now = 0;
        for _ in 0..100 {
            now += 100;
            c.update(now, &cfg, &world);
            if c.state == BehaviorState::Attacking {
                break;
            }
        }
        assert_eq!(c.state, BehaviorState::Attacking);
        assert!(distance_3d(c.position, Vector3::new(8.0, 0.0, 0.0)) <= cfg.attack_range);

        // First attack fires immediately, the next waits for the interval
        now += 100;
        let events = c.update(now, &cfg, &world);
        assert!(events.iter().any(|e| matches!(e, ServerMsg::CombatStart { .. })));
        assert_eq!(world.strikes.get(), 1);
        now += 100;
        c.update(now, &cfg, &world);
        assert_eq!(world.strikes.get(), 1);

        // Attacking -> Roaming when the target no longer resolves
        world.remove(player);
        now += 100;
        c.update(now, &cfg, &world);
        assert_eq!(c.state, BehaviorState::Roaming);
        assert_eq!(c.target, None);
        assert_eq!(c.destination, Some(c.spawn_point));
    }

    #[test]
    fn test_retargeting_sends_one_update_per_tick() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        let mut c = creature();
        let player = Uuid::new_v4();
        world.put(player, Vector3::new(30.0, 0.0, 0.0));
        c.target = Some(player);
        c.state = BehaviorState::Chasing;

        let moves = |events: &[ServerMsg]| {
            events
                .iter()
                .filter(|e| matches!(e, ServerMsg::MoveUpdate { .. }))
                .count()
        };

        assert_eq!(moves(&c.update(0, &cfg, &world)), 1);
        assert_eq!(moves(&c.update(100, &cfg, &world)), 1);

        // Target moved far from the current destination
        world.put(player, Vector3::new(30.0, 20.0, 0.0));
        let events = c.update(200, &cfg, &world);
        assert_eq!(moves(&events), 1);
        assert_eq!(c.destination, Some(Vector3::new(30.0, 20.0, 0.0)));
    }

    #[test]
    fn test_target_out_of_range_resumes_chase() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        let mut c = creature();
        let player = Uuid::new_v4();
        world.put(player, Vector3::new(2.0, 0.0, 0.0));

        c.update(0, &cfg, &world);
        c.update(100, &cfg, &world);
        assert_eq!(c.state, BehaviorState::Attacking);

        world.put(player, Vector3::new(14.0, 0.0, 0.0));
        c.update(200, &cfg, &world);
        assert_eq!(c.state, BehaviorState::Chasing);
    }

    #[test]
    fn test_kill_returns_creature_home() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        world.kill_on_strike.set(true);
        let mut c = creature();
        let player = Uuid::new_v4();
        world.put(player, Vector3::new(1.0, 0.0, 0.0));

        c.update(0, &cfg, &world);
        c.update(100, &cfg, &world);
        c.update(200, &cfg, &world);

        assert_eq!(world.strikes.get(), 1);
        assert_eq!(c.state, BehaviorState::Roaming);
        assert_eq!(c.target, None);
    }

    #[test]
    fn test_chasing_without_target_goes_home() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        let mut c = creature();
        c.position = Vector3::new(10.0, 0.0, 0.0);
        c.target = Some(Uuid::new_v4());
        c.state = BehaviorState::Chasing;

        c.update(0, &cfg, &world);
        assert_eq!(c.state, BehaviorState::Roaming);
        assert_eq!(c.destination, Some(Vector3::ZERO));
    }

    #[test]
    fn test_death_despawn_respawn_cycle() {
        let cfg = CreatureConfig::default();
        let world = FakeWorld::default();
        let mut c = creature();
        c.position = Vector3::new(3.0, 3.0, 0.0);

        let events = c.receive_damage(0.0, None, 1_000);
        assert!(events.iter().any(|e| matches!(e, ServerMsg::Dead { .. })));
        assert_eq!(c.lifecycle, Lifecycle::Dead { died_at: 1_000 });

        assert!(c.update(1_000 + cfg.despawn_delay_ms - 100, &cfg, &world).is_empty());
        let despawn_at = 1_000 + cfg.despawn_delay_ms;
        let events = c.update(despawn_at, &cfg, &world);
        assert!(matches!(events[0], ServerMsg::Despawn { .. }));
        assert!(!c.is_visible());

        let events = c.update(despawn_at + cfg.respawn_delay_ms, &cfg, &world);
        assert!(matches!(events[0], ServerMsg::Respawn { .. }));
        assert!(c.is_alive());
        assert_eq!(c.health, c.template.max_health);
        assert_eq!(c.position, c.spawn_point);
        assert_eq!(c.state, BehaviorState::Roaming);
    }

    #[test]
    fn test_damage_aggroes_roaming_creature() {
        let mut c = creature();
        let attacker = Uuid::new_v4();
        let events = c.receive_damage(30.0, Some(attacker), 0);
        assert!(events.is_empty());
        assert_eq!(c.state, BehaviorState::Chasing);
        assert_eq!(c.target, Some(attacker));
    }
}
