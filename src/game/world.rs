//! Shared world state: participant roster, creature table, proximity broadcast

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, Notify};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CreatureConfig, WorldConfig};
use crate::util::time::server_millis;
use crate::ws::protocol::{EntityId, ServerMsg};

use super::combat::{Combatant, CombatResolver, DamageOutcome};
use super::creature::{Creature, CreatureId, CreatureTemplate, CreatureWorld, ParticipantView, StrikeResult};
use super::kinematics::{distance_2d, distance_3d, Vector3};

/// Default participant health pool
pub const PARTICIPANT_MAX_HEALTH: f32 = 100.0;

/// A live connection as seen by the rest of the world
#[derive(Debug)]
pub struct ParticipantEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub position: Vector3,
    pub direction: Vector3,
    pub level: u8,
    pub health: f32,
    pub alive: bool,
    pub outbound: mpsc::Sender<ServerMsg>,
    pub kick: Arc<Notify>,
}

/// Stable copy of a roster entry, safe to use without holding any lock
#[derive(Debug, Clone)]
pub struct RosterView {
    pub id: Uuid,
    pub position: Vector3,
    pub direction: Vector3,
    pub alive: bool,
    pub outbound: mpsc::Sender<ServerMsg>,
}

/// Queue a message without waiting. A slow connection loses messages instead
/// of stalling the sender.
pub fn deliver(id: Uuid, outbound: &mpsc::Sender<ServerMsg>, msg: ServerMsg) {
    match outbound.try_send(msg) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(participant_id = %id, "Outbound queue full, dropping message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(participant_id = %id, "Outbound queue closed");
        }
    }
}

/// Live participants, keyed by participant id
pub struct Roster {
    participants: DashMap<Uuid, ParticipantEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            participants: DashMap::new(),
        }
    }

    pub fn join(&self, entry: ParticipantEntry) {
        self.participants.insert(entry.id, entry);
    }

    pub fn leave(&self, id: Uuid) -> Option<ParticipantEntry> {
        self.participants.remove(&id).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn update_position(&self, id: Uuid, position: Vector3, direction: Vector3) {
        if let Some(mut entry) = self.participants.get_mut(&id) {
            entry.position = position;
            entry.direction = direction;
        }
    }

    pub fn view(&self, id: Uuid) -> Option<RosterView> {
        self.participants.get(&id).map(|e| Self::to_view(&e))
    }

    /// Copy of every entry, for iterating without holding shard locks
    pub fn snapshot(&self) -> Vec<RosterView> {
        self.participants.iter().map(|e| Self::to_view(&e)).collect()
    }

    /// Re-resolve a weak reference; dead participants do not resolve
    pub fn resolve(&self, id: Uuid) -> Option<ParticipantView> {
        self.participants
            .get(&id)
            .filter(|e| e.alive)
            .map(|e| ParticipantView {
                id: e.id,
                position: e.position,
                level: e.level,
            })
    }

    /// Closest live participant within `radius` of `origin`
    pub fn nearest_within(&self, origin: Vector3, radius: f32) -> Option<ParticipantView> {
        self.participants
            .iter()
            .filter(|e| e.alive)
            .map(|e| (distance_3d(origin, e.position), e.id, e.position, e.level))
            .filter(|(d, ..)| *d <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id, position, level)| ParticipantView { id, position, level })
    }

    pub fn send_to(&self, id: Uuid, msg: ServerMsg) {
        let outbound = self.participants.get(&id).map(|e| e.outbound.clone());
        if let Some(outbound) = outbound {
            deliver(id, &outbound, msg);
        }
    }

    /// Tell the participant why, then signal its connection to close
    pub fn kick(&self, id: Uuid, reason: &str) {
        let handles = self
            .participants
            .get(&id)
            .map(|e| (e.account_id, e.outbound.clone(), e.kick.clone()));

        match handles {
            Some((account_id, outbound, kick)) => {
                deliver(
                    id,
                    &outbound,
                    ServerMsg::Kicked {
                        reason: reason.to_string(),
                    },
                );
                kick.notify_one();
                info!(participant_id = %id, account_id = %account_id, reason, "Participant kicked");
            }
            None => debug!(participant_id = %id, "Kick for unknown participant ignored"),
        }
    }

    /// Apply already-resolved damage; `None` if the participant is gone or dead
    pub fn apply_damage(
        &self,
        id: Uuid,
        resolve: impl FnOnce(f32) -> DamageOutcome,
    ) -> Option<DamageOutcome> {
        let mut entry = self.participants.get_mut(&id)?;
        if !entry.alive {
            return None;
        }
        let outcome = resolve(entry.health);
        entry.health = outcome.remaining_health;
        if outcome.killed {
            entry.alive = false;
        }
        Some(outcome)
    }

    fn to_view(e: &ParticipantEntry) -> RosterView {
        RosterView {
            id: e.id,
            position: e.position,
            direction: e.direction,
            alive: e.alive,
            outbound: e.outbound.clone(),
        }
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

/// Roster-backed lookups handed to creatures during a simulation tick
struct RosterLookup<'a> {
    roster: &'a Roster,
    combat: &'a dyn CombatResolver,
}

impl CreatureWorld for RosterLookup<'_> {
    fn nearest_participant(&self, origin: Vector3, radius: f32) -> Option<ParticipantView> {
        self.roster.nearest_within(origin, radius)
    }

    fn resolve_participant(&self, id: Uuid) -> Option<ParticipantView> {
        self.roster.resolve(id)
    }

    fn strike(&self, attacker: &Combatant, target: &ParticipantView) -> StrikeResult {
        let defender = Combatant {
            id: EntityId::Participant(target.id),
            position: target.position,
            level: target.level,
            power: 0.0,
            attack_range: 0.0,
        };
        let hit = self.combat.resolve_weapon_hit(attacker, &defender);

        let Some(outcome) = self
            .roster
            .apply_damage(target.id, |health| self.combat.apply_damage(&defender, health, hit.damage))
        else {
            return StrikeResult::default();
        };

        let mut events = hit.visual_events;
        events.push(ServerMsg::Damage {
            source: attacker.id,
            target: defender.id,
            amount: hit.damage,
            is_ranged: hit.is_ranged,
            remaining_health: outcome.remaining_health,
        });
        if outcome.killed {
            events.push(ServerMsg::Dead { id: defender.id });
        }

        StrikeResult {
            events,
            killed: outcome.killed,
        }
    }
}

/// Something visible from a given point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleEntity {
    pub id: EntityId,
    pub position: Vector3,
    pub direction: Vector3,
}

/// The shared world: roster, creatures and the combat rules between them
pub struct World {
    roster: Arc<Roster>,
    creatures: Mutex<HashMap<CreatureId, Creature>>,
    creature_config: CreatureConfig,
    config: WorldConfig,
    combat: Arc<dyn CombatResolver>,
}

impl World {
    pub fn new(
        roster: Arc<Roster>,
        config: WorldConfig,
        creature_config: CreatureConfig,
        combat: Arc<dyn CombatResolver>,
    ) -> Self {
        Self {
            roster,
            creatures: Mutex::new(HashMap::new()),
            creature_config,
            config,
            combat,
        }
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn creature_count(&self) -> usize {
        self.creatures.lock().len()
    }

    pub fn insert_creature(&self, creature: Creature) {
        self.creatures.lock().insert(creature.id, creature);
    }

    #[cfg(test)]
    pub fn creature(&self, id: CreatureId) -> Option<Creature> {
        self.creatures.lock().get(&id).cloned()
    }

    /// Deterministically scatter creatures around the world origin
    pub fn spawn_creatures(&self, template: &CreatureTemplate) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        for i in 0..self.config.creature_count {
            let id = i as CreatureId + 1;
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let distance = rng.gen_range(0.0..=self.config.spawn_area_radius);
            let spawn = Vector3::new(angle.cos() * distance, angle.sin() * distance, 0.0);
            self.insert_creature(Creature::new(id, template.clone(), spawn, self.config.seed));
        }

        info!(count = self.creature_count(), "Creatures spawned");
    }

    /// Run the creature simulation on its own cadence, independent of packet ingestion
    pub async fn run_simulation(self: Arc<Self>) {
        let period = Duration::from_millis(self.creature_config.update_interval_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(period_ms = period.as_millis() as u64, "Creature simulation started");
        loop {
            ticker.tick().await;
            self.simulate(server_millis());
        }
    }

    /// One simulation step for every creature
    pub fn simulate(&self, now: u64) {
        let pending: Vec<(Vector3, Vec<ServerMsg>)> = {
            let lookup = RosterLookup {
                roster: &self.roster,
                combat: self.combat.as_ref(),
            };
            let mut creatures = self.creatures.lock();
            creatures
                .values_mut()
                .filter_map(|c| {
                    let events = c.update(now, &self.creature_config, &lookup);
                    (!events.is_empty()).then_some((c.position, events))
                })
                .collect()
        };

        if pending.is_empty() {
            return;
        }

        let recipients = self.roster.snapshot();
        for (origin, events) in pending {
            self.fan_out(&recipients, origin, &events, None);
        }
    }

    /// Send to every participant within the horizontal update distance of `origin`
    pub fn broadcast_near(&self, origin: Vector3, events: &[ServerMsg], exclude: Option<Uuid>) {
        let recipients = self.roster.snapshot();
        self.fan_out(&recipients, origin, events, exclude);
    }

    fn fan_out(&self, recipients: &[RosterView], origin: Vector3, events: &[ServerMsg], exclude: Option<Uuid>) {
        for r in recipients {
            if Some(r.id) == exclude {
                continue;
            }
            if distance_2d(origin, r.position) > self.config.update_distance {
                continue;
            }
            for event in events {
                deliver(r.id, &r.outbound, event.clone());
            }
        }
    }

    /// Everything within the update distance of `origin`, excluding one participant
    pub fn visible_from(&self, origin: Vector3, exclude: Uuid) -> Vec<VisibleEntity> {
        let range = self.config.update_distance;
        let mut visible: Vec<VisibleEntity> = self
            .roster
            .snapshot()
            .into_iter()
            .filter(|r| r.id != exclude && distance_2d(origin, r.position) <= range)
            .map(|r| VisibleEntity {
                id: EntityId::Participant(r.id),
                position: r.position,
                direction: r.direction,
            })
            .collect();

        let creatures = self.creatures.lock();
        visible.extend(
            creatures
                .values()
                .filter(|c| c.is_visible() && distance_2d(origin, c.position) <= range)
                .map(|c| VisibleEntity {
                    id: c.entity_id(),
                    position: c.position,
                    direction: c.direction,
                }),
        );
        visible
    }

    /// A participant hits a creature. Returns the creature position and the
    /// resulting events, or `None` when the creature is dead, unknown or out of reach.
    pub fn strike_creature(
        &self,
        attacker: &Combatant,
        attacker_id: Uuid,
        creature_id: CreatureId,
        now: u64,
    ) -> Option<(Vector3, Vec<ServerMsg>)> {
        let mut creatures = self.creatures.lock();
        let creature = creatures.get_mut(&creature_id)?;
        if !creature.is_alive() {
            return None;
        }
        if distance_3d(attacker.position, creature.position) > attacker.attack_range {
            return None;
        }

        let defender = creature.combatant(&self.creature_config);
        let hit = self.combat.resolve_weapon_hit(attacker, &defender);
        let outcome = self.combat.apply_damage(&defender, creature.health, hit.damage);

        let mut events = hit.visual_events;
        events.push(ServerMsg::Damage {
            source: attacker.id,
            target: defender.id,
            amount: hit.damage,
            is_ranged: hit.is_ranged,
            remaining_health: outcome.remaining_health,
        });
        events.extend(creature.receive_damage(outcome.remaining_health, Some(attacker_id), now));

        if outcome.killed {
            info!(creature_id, participant_id = %attacker_id, experience = outcome.experience, "Creature slain");
        }

        Some((creature.position, events))
    }
}
