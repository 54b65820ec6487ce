//! Combat resolution - damage, hit classification, kills

use crate::game::kinematics::Vector3;
use crate::ws::protocol::{ActionType, EntityId, ServerMsg};

/// Anything beyond this reach counts as a ranged attack
pub const MELEE_RANGE: f32 = 5.0;

/// Combat-relevant view of an attacker or target
#[derive(Debug, Clone, Copy)]
pub struct Combatant {
    pub id: EntityId,
    pub position: Vector3,
    pub level: u8,
    /// Base damage per hit
    pub power: f32,
    pub attack_range: f32,
}

/// Result of resolving a weapon swing or projectile
#[derive(Debug, Clone)]
pub struct WeaponHit {
    pub damage: f32,
    pub is_ranged: bool,
    /// Extra effects the clients should play
    pub visual_events: Vec<ServerMsg>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageOutcome {
    pub remaining_health: f32,
    pub killed: bool,
    /// Experience granted to the attacker on a kill
    pub experience: u32,
}

/// Damage rules consumed by the creature controller and the ability handler
pub trait CombatResolver: Send + Sync {
    fn resolve_weapon_hit(&self, attacker: &Combatant, target: &Combatant) -> WeaponHit;

    fn apply_damage(&self, target: &Combatant, current_health: f32, amount: f32) -> DamageOutcome;
}

/// Stat-based resolver: power scaled by level difference
#[derive(Debug, Clone, Default)]
pub struct StatCombatResolver;

impl StatCombatResolver {
    /// 5% per level of difference, clamped to half/one-and-a-half
    pub fn level_modifier(attacker_level: u8, target_level: u8) -> f32 {
        let diff = attacker_level as f32 - target_level as f32;
        (1.0 + diff * 0.05).clamp(0.5, 1.5)
    }
}

impl CombatResolver for StatCombatResolver {
    fn resolve_weapon_hit(&self, attacker: &Combatant, target: &Combatant) -> WeaponHit {
        let damage = attacker.power * Self::level_modifier(attacker.level, target.level);
        let is_ranged = attacker.attack_range > MELEE_RANGE;

        let visual_events = if is_ranged {
            vec![ServerMsg::Action {
                id: attacker.id,
                action_type: ActionType::Cast,
                loop_count: 1,
            }]
        } else {
            Vec::new()
        };

        WeaponHit {
            damage,
            is_ranged,
            visual_events,
        }
    }

    fn apply_damage(&self, target: &Combatant, current_health: f32, amount: f32) -> DamageOutcome {
        let remaining_health = (current_health - amount.max(0.0)).max(0.0);
        let killed = remaining_health <= 0.0;
        DamageOutcome {
            remaining_health,
            killed,
            experience: if killed { target.level as u32 * 10 } else { 0 },
        }
    }
}
