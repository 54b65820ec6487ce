//! Ban store integration
//!
//! The durable ban system of record lives in an external service. This
//! module keeps a local cache of issued bans and ships requests to that
//! service from a background worker so the packet path never waits on HTTP.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::BanThresholds;
use crate::game::world::Roster;

use super::ViolationCategory;

const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanDuration {
    Timed(Duration),
    Permanent,
}

impl BanDuration {
    /// Seconds, or `None` for a permanent ban
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            BanDuration::Timed(d) => Some(d.as_secs()),
            BanDuration::Permanent => None,
        }
    }

    /// When a ban issued at `issued_at` lifts, `None` if never
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            BanDuration::Timed(d) => chrono::Duration::from_std(*d)
                .ok()
                .and_then(|d| issued_at.checked_add_signed(d)),
            BanDuration::Permanent => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BanRequest {
    pub account_id: Uuid,
    pub participant_id: Uuid,
    pub reason: String,
    pub category: ViolationCategory,
    pub ip_address: String,
    #[serde(rename = "duration_secs", serialize_with = "serialize_duration")]
    pub duration: BanDuration,
    pub issuer: String,
    pub details: String,
}

fn serialize_duration<S: serde::Serializer>(d: &BanDuration, s: S) -> Result<S::Ok, S::Error> {
    d.as_secs().serialize(s)
}

/// Operations the integrity layer needs from the ban system
pub trait BanStore: Send + Sync {
    fn is_banned(&self, account_id: Uuid) -> bool;

    /// Record a ban. Must not block on I/O.
    fn ban_account(&self, request: BanRequest);

    /// Disconnect a live participant
    fn kick(&self, participant_id: Uuid, reason: &str);

    fn ban_duration(&self, category: ViolationCategory, offense_count: u32) -> BanDuration;
}

/// Escalating duration: zero-tolerance categories are permanent, otherwise
/// one day, a week, a month, then permanent
pub fn escalating_duration(
    thresholds: &BanThresholds,
    category: ViolationCategory,
    offense_count: u32,
) -> BanDuration {
    if thresholds.is_zero_tolerance(category) {
        return BanDuration::Permanent;
    }
    match offense_count {
        0 | 1 => BanDuration::Timed(Duration::from_secs(DAY)),
        2 => BanDuration::Timed(Duration::from_secs(7 * DAY)),
        3 => BanDuration::Timed(Duration::from_secs(30 * DAY)),
        _ => BanDuration::Permanent,
    }
}

/// Ban store backed by the external ban service
pub struct RemoteBanStore {
    /// Account id to expiry; `None` is permanent
    banned: DashMap<Uuid, Option<DateTime<Utc>>>,
    dispatch: Option<mpsc::UnboundedSender<BanRequest>>,
    roster: Arc<Roster>,
    thresholds: BanThresholds,
}

impl RemoteBanStore {
    /// Create the store. When a client is given, the returned worker must be
    /// spawned to deliver bans to the remote service.
    pub fn new(
        roster: Arc<Roster>,
        thresholds: BanThresholds,
        client: Option<BanApiClient>,
    ) -> (Self, Option<BanDispatcher>) {
        let (dispatch, worker) = match client {
            Some(client) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(BanDispatcher { rx, client }))
            }
            None => (None, None),
        };

        let store = Self {
            banned: DashMap::new(),
            dispatch,
            roster,
            thresholds,
        };
        (store, worker)
    }
}

impl BanStore for RemoteBanStore {
    fn is_banned(&self, account_id: Uuid) -> bool {
        let expiry = match self.banned.get(&account_id) {
            Some(entry) => *entry,
            None => return false,
        };
        match expiry {
            Some(expires_at) if expires_at <= Utc::now() => {
                self.banned.remove(&account_id);
                false
            }
            _ => true,
        }
    }

    fn ban_account(&self, request: BanRequest) {
        info!(
            account_id = %request.account_id,
            category = %request.category,
            duration_secs = ?request.duration.as_secs(),
            "Account banned"
        );

        if let Some(tx) = &self.dispatch {
            if tx.send(request.clone()).is_err() {
                warn!(account_id = %request.account_id, "Ban dispatcher stopped, ban kept locally");
            }
        }
        self.banned
            .insert(request.account_id, request.duration.expires_at(Utc::now()));
    }

    fn kick(&self, participant_id: Uuid, reason: &str) {
        self.roster.kick(participant_id, reason);
    }

    fn ban_duration(&self, category: ViolationCategory, offense_count: u32) -> BanDuration {
        escalating_duration(&self.thresholds, category, offense_count)
    }
}

/// REST client for the external ban service
#[derive(Clone)]
pub struct BanApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BanApiClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub async fn post_ban(&self, request: &BanRequest) -> Result<(), BanServiceError> {
        let url = format!("{}/bans", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(BanServiceError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BanServiceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Background worker delivering bans to the remote service
pub struct BanDispatcher {
    rx: mpsc::UnboundedReceiver<BanRequest>,
    client: BanApiClient,
}

impl BanDispatcher {
    pub async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            if let Err(e) = self.client.post_ban(&request).await {
                error!(
                    account_id = %request.account_id,
                    error = %e,
                    "Failed to deliver ban to ban service"
                );
            }
        }
        info!("Ban dispatcher stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BanServiceError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Ban service error {status}: {body}")]
    Api { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(account_id: Uuid) -> BanRequest {
        BanRequest {
            account_id,
            participant_id: Uuid::new_v4(),
            reason: "teleport".to_string(),
            category: ViolationCategory::Teleport,
            ip_address: "127.0.0.1".to_string(),
            duration: BanDuration::Timed(Duration::from_secs(DAY)),
            issuer: "test".to_string(),
            details: String::new(),
        }
    }

    #[test]
    fn test_escalating_duration() {
        let t = BanThresholds::default();
        assert_eq!(
            escalating_duration(&t, ViolationCategory::SpeedHack, 1),
            BanDuration::Timed(Duration::from_secs(DAY))
        );
        assert_eq!(
            escalating_duration(&t, ViolationCategory::SpeedHack, 3),
            BanDuration::Timed(Duration::from_secs(30 * DAY))
        );
        assert_eq!(
            escalating_duration(&t, ViolationCategory::SpeedHack, 4),
            BanDuration::Permanent
        );
        assert_eq!(
            escalating_duration(&t, ViolationCategory::ItemDuplication, 1),
            BanDuration::Permanent
        );
    }

    #[test]
    fn test_request_serializes_duration_as_seconds() {
        let json = serde_json::to_value(request(Uuid::nil())).unwrap();
        assert_eq!(json["duration_secs"], DAY);
        assert_eq!(json["category"], "teleport");

        let mut permanent = request(Uuid::nil());
        permanent.duration = BanDuration::Permanent;
        let json = serde_json::to_value(permanent).unwrap();
        assert!(json["duration_secs"].is_null());
    }

    #[test]
    fn test_expired_local_ban_lifts() {
        let (store, worker) = RemoteBanStore::new(Arc::new(Roster::new()), BanThresholds::default(), None);
        assert!(worker.is_none());

        let account = Uuid::new_v4();
        let mut expired = request(account);
        expired.duration = BanDuration::Timed(Duration::ZERO);
        store.ban_account(expired);
        assert!(!store.is_banned(account));

        let mut permanent = request(account);
        permanent.duration = BanDuration::Permanent;
        store.ban_account(permanent);
        assert!(store.is_banned(account));
    }

    #[tokio::test]
    async fn test_local_store_caches_bans_and_dispatches() {
        let roster = Arc::new(Roster::new());
        let (store, worker) = RemoteBanStore::new(
            roster,
            BanThresholds::default(),
            Some(BanApiClient::new("http://127.0.0.1:9".to_string(), None)),
        );
        let mut worker = worker.unwrap();

        let account = Uuid::new_v4();
        assert!(!store.is_banned(account));
        store.ban_account(request(account));
        assert!(store.is_banned(account));

        let queued = worker.rx.recv().await.unwrap();
        assert_eq!(queued.account_id, account);
    }
}
