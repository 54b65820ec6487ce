//! Application state shared across routes and connections

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::game::abilities::CatalogError;
use crate::game::{AbilityCatalog, CreatureTemplate, MotionValidator, Roster, StatCombatResolver, World};
use crate::ingest::IngestionPipeline;
use crate::integrity::audit::AuditWriter;
use crate::integrity::ban::{BanApiClient, BanDispatcher};
use crate::integrity::{AuditLog, BanStore, RemoteBanStore, ViolationLedger};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub world: Arc<World>,
    pub ledger: Arc<ViolationLedger>,
    pub bans: Arc<dyn BanStore>,
    pub pipeline: IngestionPipeline,
}

/// Background tasks `main` spawns next to the server
pub struct Workers {
    pub audit_writer: AuditWriter,
    /// Only present when a remote ban service is configured
    pub ban_dispatcher: Option<BanDispatcher>,
}

impl AppState {
    /// Build every service once. The returned workers must be spawned so
    /// audit lines reach disk and bans reach the remote service.
    pub fn new(config: Config) -> Result<(Self, Workers), CatalogError> {
        let config = Arc::new(config);

        let roster = Arc::new(Roster::new());

        // Initialize world and creatures
        let world = Arc::new(World::new(
            roster.clone(),
            config.world.clone(),
            config.creatures.clone(),
            Arc::new(StatCombatResolver),
        ));
        world.spawn_creatures(&CreatureTemplate::default());

        // Initialize ban store, remote when configured
        let client = config
            .ban_service_url
            .clone()
            .map(|url| BanApiClient::new(url, config.ban_service_key.clone()));
        if client.is_none() {
            warn!("BAN_SERVICE_URL not set, bans are kept in memory only");
        }
        let (bans, ban_dispatcher) = RemoteBanStore::new(roster, config.thresholds.clone(), client);
        let bans: Arc<dyn BanStore> = Arc::new(bans);

        let (audit, audit_writer) = AuditLog::new(config.audit_log_path.clone());
        let ledger = Arc::new(ViolationLedger::new(
            config.thresholds.clone(),
            config.toggles,
            audit,
            bans.clone(),
        ));

        let catalog = match &config.ability_catalog_path {
            Some(path) => AbilityCatalog::from_file(path)?,
            None => AbilityCatalog::default(),
        };
        info!(abilities = catalog.len(), "Ability catalog loaded");

        let pipeline = IngestionPipeline::new(
            Arc::new(MotionValidator::new(config.validation.clone())),
            ledger.clone(),
            world.clone(),
            Arc::new(catalog),
        );

        let state = Self {
            config,
            world,
            ledger,
            bans,
            pipeline,
        };
        let workers = Workers {
            audit_writer,
            ban_dispatcher,
        };
        Ok((state, workers))
    }
}
