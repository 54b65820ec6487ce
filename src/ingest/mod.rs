//! Inbound packet handling for connected participants

pub mod pipeline;
pub mod session;

pub use pipeline::{IngestionPipeline, PacketOutcome};
pub use session::ParticipantSession;
