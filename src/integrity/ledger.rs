//! Violation ledger - per-account violation history and escalation
//!
//! Histories are keyed by account so they outlive any single connection.
//! Counters live in process memory and are authoritative on their own; the
//! audit log is a best-effort trail and the ban store is the system of record
//! for bans.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{BanThresholds, IntegrityToggles};

use super::audit::{AuditEntry, AuditLog};
use super::ban::{BanRequest, BanStore};
use super::ViolationCategory;

const BAN_ISSUER: &str = "world-guard";

/// Who a violation is attributed to
#[derive(Debug, Clone)]
pub struct ParticipantIdentity {
    pub participant_id: Uuid,
    pub account_id: Uuid,
    pub ip_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub category: ViolationCategory,
    pub count: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub account_id: Uuid,
    pub ip_address: String,
    /// Bans issued to the account so far, across all categories
    pub total_ban_count: u32,
    /// Count at which the next ban is requested
    #[serde(skip)]
    next_ban_at: u32,
}

#[derive(Debug)]
struct AccountHistory {
    records: HashMap<ViolationCategory, ViolationRecord>,
}

/// Result of a single `record` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub count: u32,
    pub banned: bool,
}

pub struct ViolationLedger {
    /// Keyed by account id
    histories: DashMap<Uuid, Arc<Mutex<AccountHistory>>>,
    /// Historical ban counts per account, kept across connections
    ban_counts: DashMap<Uuid, u32>,
    thresholds: BanThresholds,
    toggles: IntegrityToggles,
    audit: AuditLog,
    bans: Arc<dyn BanStore>,
}

impl ViolationLedger {
    pub fn new(
        thresholds: BanThresholds,
        toggles: IntegrityToggles,
        audit: AuditLog,
        bans: Arc<dyn BanStore>,
    ) -> Self {
        Self {
            histories: DashMap::new(),
            ban_counts: DashMap::new(),
            thresholds,
            toggles,
            audit,
            bans,
        }
    }

    pub fn enforcement_enabled(&self) -> bool {
        self.toggles.enforcement_enabled
    }

    /// Count a violation, write it to the audit trail and escalate if needed
    pub fn record(
        &self,
        identity: &ParticipantIdentity,
        category: ViolationCategory,
        details: &str,
    ) -> RecordOutcome {
        let history = self
            .histories
            .entry(identity.account_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(AccountHistory {
                    records: HashMap::new(),
                }))
            })
            .value()
            .clone();

        let now = Utc::now();
        let prior_bans = self
            .ban_counts
            .get(&identity.account_id)
            .map(|c| *c)
            .unwrap_or(0);

        let threshold = self.thresholds.threshold_for(category).max(1);
        let (count, should_ban) = {
            let mut history = history.lock();
            let record = history
                .records
                .entry(category)
                .or_insert_with(|| ViolationRecord {
                    category,
                    count: 0,
                    first_seen_at: now,
                    last_seen_at: now,
                    account_id: identity.account_id,
                    ip_address: identity.ip_address.clone(),
                    total_ban_count: prior_bans,
                    next_ban_at: threshold,
                });
            record.count += 1;
            record.last_seen_at = now;
            record.ip_address.clone_from(&identity.ip_address);

            let should_ban = self.toggles.auto_ban_enabled && record.count >= record.next_ban_at;
            if should_ban {
                // Another full threshold is needed before the next ban
                record.next_ban_at = record.count + threshold;
                record.total_ban_count = prior_bans + 1;
            }
            (record.count, should_ban)
        };

        warn!(
            participant_id = %identity.participant_id,
            account_id = %identity.account_id,
            category = %category,
            count,
            details,
            "Violation recorded"
        );

        let entry = AuditEntry {
            timestamp: now,
            participant_id: identity.participant_id,
            account_id: identity.account_id,
            ip_address: &identity.ip_address,
            category,
            count,
            details,
        };
        if let Err(e) = self.audit.append(&entry) {
            debug!(error = %e, "Audit log write failed");
        }

        if should_ban {
            self.escalate(identity, category, count, details);
        }

        RecordOutcome {
            count,
            banned: should_ban,
        }
    }

    fn escalate(
        &self,
        identity: &ParticipantIdentity,
        category: ViolationCategory,
        count: u32,
        details: &str,
    ) {
        let offense_count = {
            let mut bans = self.ban_counts.entry(identity.account_id).or_insert(0);
            *bans += 1;
            *bans
        };
        let duration = self.bans.ban_duration(category, offense_count);

        error!(
            participant_id = %identity.participant_id,
            account_id = %identity.account_id,
            category = %category,
            count,
            offense_count,
            "Violation threshold reached, banning"
        );

        let reason = format!("{} ({} violations)", category, count);
        self.bans.ban_account(BanRequest {
            account_id: identity.account_id,
            participant_id: identity.participant_id,
            reason: reason.clone(),
            category,
            ip_address: identity.ip_address.clone(),
            duration,
            issuer: BAN_ISSUER.to_string(),
            details: details.to_string(),
        });
        self.bans.kick(identity.participant_id, &reason);
    }

    /// Live counters for admin tooling
    pub fn violations_for(&self, account_id: Uuid) -> Vec<ViolationRecord> {
        let Some(history) = self.histories.get(&account_id).map(|h| h.value().clone()) else {
            return Vec::new();
        };
        let history = history.lock();
        let mut records: Vec<ViolationRecord> = history.records.values().cloned().collect();
        records.sort_by_key(|r| r.category);
        records
    }

    /// Administrative reset. Returns whether any history existed.
    pub fn clear(&self, account_id: Uuid) -> bool {
        self.histories.remove(&account_id).is_some()
    }

    pub fn tracked_accounts(&self) -> usize {
        self.histories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::ban::{escalating_duration, BanDuration};

    #[derive(Default)]
    struct RecordingBans {
        bans: Mutex<Vec<BanRequest>>,
        kicks: Mutex<Vec<Uuid>>,
    }

    impl BanStore for RecordingBans {
        fn is_banned(&self, account_id: Uuid) -> bool {
            self.bans.lock().iter().any(|b| b.account_id == account_id)
        }

        fn ban_account(&self, request: BanRequest) {
            self.bans.lock().push(request);
        }

        fn kick(&self, participant_id: Uuid, _reason: &str) {
            self.kicks.lock().push(participant_id);
        }

        fn ban_duration(&self, category: ViolationCategory, offense_count: u32) -> BanDuration {
            escalating_duration(&BanThresholds::default(), category, offense_count)
        }
    }

    fn identity() -> ParticipantIdentity {
        ParticipantIdentity {
            participant_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            ip_address: "192.168.1.20".to_string(),
        }
    }

    fn ledger(auto_ban: bool, bans: Arc<RecordingBans>) -> ViolationLedger {
        ViolationLedger::new(
            BanThresholds::default(),
            IntegrityToggles {
                auto_ban_enabled: auto_ban,
                enforcement_enabled: true,
            },
            AuditLog::disabled(),
            bans,
        )
    }

    #[test]
    fn test_teleport_bans_exactly_on_third_record() {
        let bans = Arc::new(RecordingBans::default());
        let ledger = ledger(true, bans.clone());
        let who = identity();

        assert!(!ledger.record(&who, ViolationCategory::Teleport, "a").banned);
        assert!(!ledger.record(&who, ViolationCategory::Teleport, "b").banned);
        assert_eq!(bans.bans.lock().len(), 0);

        let third = ledger.record(&who, ViolationCategory::Teleport, "c");
        assert!(third.banned);
        assert_eq!(third.count, 3);
        assert_eq!(bans.bans.lock().len(), 1);
        assert_eq!(bans.kicks.lock().as_slice(), &[who.participant_id]);

        // The next ban needs another full threshold
        ledger.record(&who, ViolationCategory::Teleport, "d");
        ledger.record(&who, ViolationCategory::Teleport, "e");
        assert_eq!(bans.bans.lock().len(), 1);
        assert!(ledger.record(&who, ViolationCategory::Teleport, "f").banned);
        assert_eq!(bans.bans.lock().len(), 2);
    }

    #[test]
    fn test_auto_ban_disabled_still_counts() {
        let bans = Arc::new(RecordingBans::default());
        let ledger = ledger(false, bans.clone());
        let who = identity();

        for _ in 0..100 {
            ledger.record(&who, ViolationCategory::Teleport, "jump");
        }

        assert!(bans.bans.lock().is_empty());
        let records = ledger.violations_for(who.account_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].count, 100);
    }

    #[test]
    fn test_zero_tolerance_bans_on_first_occurrence() {
        let bans = Arc::new(RecordingBans::default());
        let ledger = ledger(true, bans.clone());
        let who = identity();

        let outcome = ledger.record(&who, ViolationCategory::ItemDuplication, "dup");
        assert!(outcome.banned);
        assert_eq!(bans.bans.lock()[0].duration, BanDuration::Permanent);
    }

    #[test]
    fn test_ban_duration_grows_with_account_history() {
        let bans = Arc::new(RecordingBans::default());
        let ledger = ledger(true, bans.clone());
        let first = identity();
        let second = ParticipantIdentity {
            participant_id: Uuid::new_v4(),
            ..first.clone()
        };

        for _ in 0..3 {
            ledger.record(&first, ViolationCategory::Teleport, "x");
        }
        for _ in 0..3 {
            ledger.record(&second, ViolationCategory::Teleport, "x");
        }

        let issued = bans.bans.lock();
        assert_eq!(issued.len(), 2);
        assert!(issued[1].duration.as_secs() > issued[0].duration.as_secs());
        assert_eq!(bans.kicks.lock().as_slice(), &[first.participant_id, second.participant_id]);

        let records = ledger.violations_for(first.account_id);
        assert_eq!(records[0].count, 6);
        assert_eq!(records[0].total_ban_count, 2);
    }

    #[test]
    fn test_history_survives_reconnect() {
        let bans = Arc::new(RecordingBans::default());
        let ledger = ledger(true, bans.clone());
        let first = identity();

        ledger.record(&first, ViolationCategory::Teleport, "x");
        ledger.record(&first, ViolationCategory::Teleport, "x");

        // Same account, new connection
        let second = ParticipantIdentity {
            participant_id: Uuid::new_v4(),
            ip_address: "192.168.1.21".to_string(),
            ..first.clone()
        };
        let outcome = ledger.record(&second, ViolationCategory::Teleport, "x");

        assert!(outcome.banned);
        assert_eq!(outcome.count, 3);
        assert_eq!(bans.kicks.lock().as_slice(), &[second.participant_id]);
        assert_eq!(ledger.violations_for(first.account_id)[0].ip_address, "192.168.1.21");
        assert_eq!(ledger.tracked_accounts(), 1);
    }

    #[test]
    fn test_categories_are_independent() {
        let bans = Arc::new(RecordingBans::default());
        let ledger = ledger(true, bans.clone());
        let who = identity();

        ledger.record(&who, ViolationCategory::SpeedHack, "fast");
        ledger.record(&who, ViolationCategory::FlyHack, "high");
        ledger.record(&who, ViolationCategory::SpeedHack, "fast");

        let records = ledger.violations_for(who.account_id);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category, ViolationCategory::SpeedHack);
        assert_eq!(records[0].count, 2);
        assert_eq!(records[1].count, 1);
    }

    #[test]
    fn test_clear_resets_history() {
        let bans = Arc::new(RecordingBans::default());
        let ledger = ledger(true, bans);
        let who = identity();

        ledger.record(&who, ViolationCategory::SpeedHack, "fast");
        assert_eq!(ledger.tracked_accounts(), 1);
        assert!(ledger.clear(who.account_id));
        assert!(ledger.violations_for(who.account_id).is_empty());
        assert!(!ledger.clear(who.account_id));
    }

    #[test]
    fn test_audit_failure_does_not_affect_counters() {
        let bans = Arc::new(RecordingBans::default());
        // No writer running, so every append fails
        let (audit, writer) = AuditLog::new(std::env::temp_dir().join("unused-audit.log"));
        drop(writer);
        let ledger = ViolationLedger::new(
            BanThresholds::default(),
            IntegrityToggles::default(),
            audit,
            bans.clone(),
        );
        let who = identity();

        for _ in 0..3 {
            ledger.record(&who, ViolationCategory::Teleport, "x");
        }
        assert_eq!(ledger.violations_for(who.account_id)[0].count, 3);
        assert_eq!(bans.bans.lock().len(), 1);
    }
}
