//! World simulation modules

pub mod abilities;
pub mod combat;
pub mod creature;
pub mod kinematics;
pub mod validator;
pub mod world;

pub use abilities::AbilityCatalog;
pub use combat::StatCombatResolver;
pub use creature::CreatureTemplate;
pub use validator::MotionValidator;
pub use world::{Roster, World};
