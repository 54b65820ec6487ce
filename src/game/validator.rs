//! Motion validation - stateless plausibility checks between two samples
//!
//! Every check is independent. A single packet can fail several of them and
//! each failure is reported on its own; deciding what to do about it is the
//! caller's job.

use crate::config::ValidationConfig;
use crate::game::kinematics::{distance_3d, Vector3};
use crate::integrity::ViolationCategory;

/// One position report, either trusted history or fresh client input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub position: Vector3,
    pub direction: Vector3,
    /// Milliseconds
    pub tick: u64,
}

/// Per-participant facts the checks depend on
#[derive(Debug, Clone, Copy)]
pub struct MotionContext {
    /// Speed ceiling for the reported move type, before tolerance
    pub max_speed: f32,
    /// Whether upward motion is currently excused by a jump
    pub is_jumping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedCheck {
    /// Too little time elapsed to measure a speed
    Unverifiable,
    Checked { speed: f32, limit: f32, valid: bool },
}

impl SpeedCheck {
    /// Speed actually covered between the two samples, when measurable
    pub fn measured(&self) -> Option<f32> {
        match self {
            SpeedCheck::Unverifiable => None,
            SpeedCheck::Checked { speed, .. } => Some(*speed),
        }
    }

    #[cfg(test)]
    pub fn is_valid(&self) -> bool {
        match self {
            SpeedCheck::Unverifiable => true,
            SpeedCheck::Checked { valid, .. } => *valid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionCheck {
    pub valid: bool,
    /// The reported direction, or its re-normalized form when invalid
    pub direction: Vector3,
}

impl DirectionCheck {
    /// The checked direction, or `fallback` when the report was too short to normalize
    pub fn or_fallback(&self, fallback: Vector3) -> Vector3 {
        if self.direction == Vector3::ZERO {
            fallback
        } else {
            self.direction
        }
    }
}

/// A single failed check
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub category: ViolationCategory,
    pub detail: String,
}

/// Outcome of validating one sample against the previous one
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub tick_valid: bool,
    pub speed: SpeedCheck,
    pub direction: DirectionCheck,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    #[cfg(test)]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Tick manipulation: the packet must be discarded entirely
    pub fn has_hard_violation(&self) -> bool {
        !self.tick_valid
    }

    /// Violations corrected by rubber-banding
    pub fn soft_violations(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.category != ViolationCategory::TickManipulation)
    }
}

/// Stateless motion checks configured once at startup
#[derive(Debug, Clone)]
pub struct MotionValidator {
    config: ValidationConfig,
}

impl MotionValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Speed between two samples against `max_speed × tolerance`
    pub fn check_speed(&self, old: &MotionSample, new: &MotionSample, max_speed: f32) -> SpeedCheck {
        let delta_ms = new.tick.saturating_sub(old.tick);
        let delta_secs = delta_ms as f32 / 1000.0;
        if delta_secs <= self.config.min_verifiable_delta_secs {
            return SpeedCheck::Unverifiable;
        }

        let speed = distance_3d(old.position, new.position) / delta_secs;
        let limit = max_speed * self.config.speed_tolerance;
        SpeedCheck::Checked {
            speed,
            limit,
            valid: speed <= limit,
        }
    }

    /// Direction vectors must be unit length; bad ones are re-normalized, never rejected
    pub fn check_direction(&self, direction: Vector3) -> DirectionCheck {
        if (direction.length() - 1.0).abs() < self.config.direction_tolerance {
            DirectionCheck {
                valid: true,
                direction,
            }
        } else {
            DirectionCheck {
                valid: false,
                direction: direction.normalize(),
            }
        }
    }

    /// Distance check independent of elapsed time
    pub fn is_teleport(&self, old: Vector3, new: Vector3) -> bool {
        distance_3d(old, new) > self.config.max_teleport_distance
    }

    /// Ticks must strictly advance, and by no more than the configured maximum
    pub fn check_tick(&self, old_tick: u64, new_tick: u64) -> bool {
        let delta = new_tick as i128 - old_tick as i128;
        delta > 0 && delta <= self.config.max_tick_delta as i128
    }

    /// Upward motion is only excused by a jump or by a small terrain step
    pub fn check_vertical(&self, height_delta: f32, is_jumping: bool) -> bool {
        if height_delta <= 0.0 {
            return true;
        }
        if is_jumping {
            height_delta <= self.config.max_jump_height
        } else {
            height_delta < self.config.terrain_step_tolerance
        }
    }

    pub fn within_bounds(&self, position: Vector3) -> bool {
        self.config.map_bounds.contains(position)
    }

    /// Run every check and collect each failure separately
    pub fn validate(
        &self,
        old: &MotionSample,
        new: &MotionSample,
        ctx: MotionContext,
    ) -> ValidationReport {
        let mut violations = Vec::new();

        let tick_valid = self.check_tick(old.tick, new.tick);
        if !tick_valid {
            violations.push(Violation {
                category: ViolationCategory::TickManipulation,
                detail: format!("tick {} -> {}", old.tick, new.tick),
            });
        }

        let direction = self.check_direction(new.direction);

        let speed = self.check_speed(old, new, ctx.max_speed);
        if let SpeedCheck::Checked {
            speed,
            limit,
            valid: false,
        } = speed
        {
            violations.push(Violation {
                category: ViolationCategory::SpeedHack,
                detail: format!("speed {:.2} exceeds limit {:.2}", speed, limit),
            });
        }

        self.spatial_checks(old.position, new, ctx, &mut violations);

        ValidationReport {
            tick_valid,
            speed,
            direction,
            violations,
        }
    }

    /// First sample of a connection: there is no previous tick, so only the
    /// checks that compare positions run, against the trusted spawn point.
    pub fn validate_initial(
        &self,
        anchor: Vector3,
        new: &MotionSample,
        ctx: MotionContext,
    ) -> ValidationReport {
        let mut violations = Vec::new();
        self.spatial_checks(anchor, new, ctx, &mut violations);

        ValidationReport {
            tick_valid: true,
            speed: SpeedCheck::Unverifiable,
            direction: self.check_direction(new.direction),
            violations,
        }
    }

    fn spatial_checks(
        &self,
        anchor: Vector3,
        new: &MotionSample,
        ctx: MotionContext,
        violations: &mut Vec<Violation>,
    ) {
        if self.is_teleport(anchor, new.position) {
            violations.push(Violation {
                category: ViolationCategory::Teleport,
                detail: format!(
                    "moved {:.2} units in one sample",
                    distance_3d(anchor, new.position)
                ),
            });
        }

        let height_delta = new.position.z - anchor.z;
        if !self.check_vertical(height_delta, ctx.is_jumping) {
            violations.push(Violation {
                category: ViolationCategory::FlyHack,
                detail: format!(
                    "rose {:.2} units (jumping: {})",
                    height_delta, ctx.is_jumping
                ),
            });
        }

        if !self.within_bounds(new.position) {
            violations.push(Violation {
                category: ViolationCategory::OutOfBounds,
                detail: format!(
                    "position ({:.1}, {:.1}, {:.1}) outside map",
                    new.position.x, new.position.y, new.position.z
                ),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> MotionValidator {
        MotionValidator::new(ValidationConfig {
            speed_tolerance: 1.5,
            ..ValidationConfig::default()
        })
    }

    fn sample(x: f32, z: f32, tick: u64) -> MotionSample {
        MotionSample {
            position: Vector3::new(x, 0.0, z),
            direction: Vector3::new(1.0, 0.0, 0.0),
            tick,
        }
    }

    #[test]
    fn test_speed_is_distance_over_time() {
        let v = validator();
        let check = v.check_speed(&sample(0.0, 0.0, 1_000), &sample(30.0, 0.0, 3_000), 100.0);
        match check {
            SpeedCheck::Checked { speed, .. } => assert!((speed - 15.0).abs() < 1e-4),
            other => panic!("expected a checked speed, got {:?}", other),
        }
    }

    #[test]
    fn test_speed_boundary_is_inclusive() {
        let v = validator();
        // limit = 10 * 1.5 = 15
        let at_limit = v.check_speed(&sample(0.0, 0.0, 0), &sample(15.0, 0.0, 1_000), 10.0);
        assert!(at_limit.is_valid());

        let above = v.check_speed(&sample(0.0, 0.0, 0), &sample(15.01, 0.0, 1_000), 10.0);
        assert!(!above.is_valid());
    }

    #[test]
    fn test_speed_unverifiable_when_no_time_elapsed() {
        let v = validator();
        let check = v.check_speed(&sample(0.0, 0.0, 500), &sample(40.0, 0.0, 501), 1.0);
        assert_eq!(check, SpeedCheck::Unverifiable);
        assert!(check.is_valid());
        assert_eq!(check.measured(), None);
    }

    #[test]
    fn test_direction_renormalized_when_invalid() {
        let v = validator();
        let ok = v.check_direction(Vector3::new(0.0, 1.0, 0.0));
        assert!(ok.valid);

        let bad = v.check_direction(Vector3::new(0.0, 3.0, 0.0));
        assert!(!bad.valid);
        assert!((bad.direction.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_direction_falls_back() {
        let v = validator();
        let previous = Vector3::new(0.0, 1.0, 0.0);

        let tiny = v.check_direction(Vector3::new(0.0, 0.00001, 0.0));
        assert!(!tiny.valid);
        assert_eq!(tiny.or_fallback(previous), previous);

        let long = v.check_direction(Vector3::new(2.0, 0.0, 0.0));
        assert_eq!(long.or_fallback(previous), Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_teleport_ignores_elapsed_time() {
        let v = validator();
        assert!(v.is_teleport(Vector3::ZERO, Vector3::new(50.5, 0.0, 0.0)));
        assert!(!v.is_teleport(Vector3::ZERO, Vector3::new(49.0, 0.0, 0.0)));
    }

    #[test]
    fn test_tick_progression() {
        let v = validator();
        assert!(!v.check_tick(100, 100));
        assert!(!v.check_tick(100, 50));
        assert!(!v.check_tick(100, 10_101));
        assert!(v.check_tick(100, 5_000));
        assert!(v.check_tick(100, 10_100));
    }

    #[test]
    fn test_vertical_checks() {
        let v = validator();
        assert!(v.check_vertical(-5.0, false));
        assert!(v.check_vertical(1.5, false));
        assert!(!v.check_vertical(2.5, false));
        assert!(v.check_vertical(10.0, true));
        assert!(!v.check_vertical(15.0, true));
    }

    #[test]
    fn test_validate_reports_each_failure() {
        let v = validator();
        let old = sample(0.0, 0.0, 1_000);
        // 200 units up and across in 100ms: speed, teleport and fly at once
        let new = sample(200.0, 200.0, 1_100);
        let report = v.validate(
            &old,
            &new,
            MotionContext {
                max_speed: 8.0,
                is_jumping: false,
            },
        );

        let categories: Vec<_> = report.violations.iter().map(|v| v.category).collect();
        assert!(categories.contains(&ViolationCategory::SpeedHack));
        assert!(categories.contains(&ViolationCategory::Teleport));
        assert!(categories.contains(&ViolationCategory::FlyHack));
        assert!(!report.has_hard_violation());
    }

    #[test]
    fn test_validate_flags_out_of_bounds_and_tick() {
        let v = validator();
        let old = sample(9_999.0, 0.0, 1_000);
        let new = sample(10_001.0, 0.0, 900);
        let report = v.validate(
            &old,
            &new,
            MotionContext {
                max_speed: 8.0,
                is_jumping: false,
            },
        );

        assert!(report.has_hard_violation());
        assert!(report
            .violations
            .iter()
            .any(|v| v.category == ViolationCategory::OutOfBounds));
        assert_eq!(report.soft_violations().count(), 1);
    }

    #[test]
    fn test_validate_clean_walk() {
        let v = validator();
        let report = v.validate(
            &sample(0.0, 0.0, 1_000),
            &sample(4.0, 0.5, 2_000),
            MotionContext {
                max_speed: 5.0,
                is_jumping: false,
            },
        );
        assert!(report.is_clean());
    }

    #[test]
    fn test_initial_sample_checked_against_anchor() {
        let v = validator();
        let ctx = MotionContext {
            max_speed: 8.0,
            is_jumping: false,
        };

        let near = v.validate_initial(Vector3::ZERO, &sample(3.0, 0.0, 42), ctx);
        assert!(near.is_clean());
        assert_eq!(near.speed, SpeedCheck::Unverifiable);

        let far = v.validate_initial(Vector3::ZERO, &sample(80.0, 0.0, 42), ctx);
        assert_eq!(far.violations[0].category, ViolationCategory::Teleport);
        assert!(!far.has_hard_violation());
    }
}
