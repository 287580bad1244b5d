//! Credential pool with usage-proportional selection and cooldown
//!
//! The pool owns every API key together with its cumulative daily usage and
//! cooldown state. Callers ask for the best credential for an operation and
//! report back what happened; nothing outside this module mutates the
//! per-credential counters.
//!
//! # Selection
//!
//! 1. Credentials whose cooldown has not lapsed are excluded.
//! 2. Among the rest the one with the smallest used fraction of its daily
//!    limit wins; ties go to the round-robin pointer.
//! 3. A credential handed out `max_consecutive_uses` times in a row is passed
//!    over when another candidate exists.
//! 4. With no candidate at all the pool waits briefly, then hands out the
//!    round-robin credential as a best-effort last resort.
//!
//! Independently of the daily budget, a credential is never handed out twice
//! within `min_gap`.

pub mod quota;

pub use quota::{ApiOperation, QuotaCostTable, TickBudget};

use crate::error::{Error, Result};
use crate::utils::mask_key;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// Credential
// ============================================================================

/// One API key and its position in the pool
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    key: String,
}

impl Credential {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw key, for building requests only
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn masked(&self) -> String {
        mask_key(&self.key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("key", &self.masked())
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.index, self.masked())
    }
}

// ============================================================================
// Settings and state
// ============================================================================

/// Tuning knobs for the pool
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Daily quota units per credential
    pub daily_limit: u64,
    /// Cooldown applied after a quota failure
    pub cooldown: Duration,
    /// Minimum gap between two hand-outs of the same credential
    pub min_gap: Duration,
    /// How long to wait when every credential is cooling down
    pub exhausted_wait: Duration,
    /// Rotate away after this many consecutive picks (0 disables)
    pub max_consecutive_uses: u32,
    /// UTC hour at which the external quota resets
    pub reset_hour_utc: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            daily_limit: 10_000,
            cooldown: Duration::from_secs(60 * 60),
            min_gap: Duration::from_millis(300),
            exhausted_wait: Duration::from_secs(5),
            max_consecutive_uses: 25,
            reset_hour_utc: 8,
        }
    }
}

#[derive(Debug, Default)]
struct CredentialState {
    used_units: u64,
    cooldown_until: Option<DateTime<Utc>>,
    last_used: Option<DateTime<Utc>>,
    handed_out_at: Option<Instant>,
    quota_failures: u64,
    successes: u64,
    failures: u64,
}

impl CredentialState {
    fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug)]
struct PoolState {
    entries: Vec<CredentialState>,
    rr_pointer: usize,
    last_pick: Option<usize>,
    consecutive: u32,
    last_reset: DateTime<Utc>,
}

/// Point-in-time view of one credential, safe to expose
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSnapshot {
    pub index: usize,
    pub key: String,
    pub used_units: u64,
    pub used_percent: f64,
    pub cooling_until: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub quota_failures: u64,
    pub successes: u64,
    pub failures: u64,
}

// ============================================================================
// Pool
// ============================================================================

/// Rotating pool of API credentials
pub struct CredentialPool {
    credentials: Vec<Credential>,
    costs: QuotaCostTable,
    settings: PoolSettings,
    state: Mutex<PoolState>,
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("credentials", &self.credentials)
            .field("settings", &self.settings)
            .finish()
    }
}

impl CredentialPool {
    /// Build a pool from raw keys; blank keys are ignored
    pub fn new(
        keys: impl IntoIterator<Item = String>,
        costs: QuotaCostTable,
        settings: PoolSettings,
    ) -> Result<Self> {
        let credentials: Vec<Credential> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .enumerate()
            .map(|(index, key)| Credential { index, key })
            .collect();

        if credentials.is_empty() {
            return Err(Error::config("no API credentials configured"));
        }
        if settings.daily_limit == 0 {
            return Err(Error::config("daily quota limit must be greater than 0"));
        }

        let entries = credentials.iter().map(|_| CredentialState::default()).collect();

        info!(
            credentials = credentials.len(),
            daily_limit = settings.daily_limit,
            "Credential pool initialized"
        );

        Ok(Self {
            credentials,
            costs,
            settings,
            state: Mutex::new(PoolState {
                entries,
                rr_pointer: 0,
                last_pick: None,
                consecutive: 0,
                last_reset: Utc::now(),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn costs(&self) -> &QuotaCostTable {
        &self.costs
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Counters stay meaningful even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Select the best credential for `op`, waiting out the per-key gap
    ///
    /// Never fails: with every credential cooling down it returns the
    /// round-robin credential after a bounded wait, and the next real call
    /// is expected to fail.
    pub async fn select(&self, op: ApiOperation) -> Credential {
        let credential = match self.choose_at(op, Utc::now()) {
            Some(c) => c,
            None => {
                warn!(
                    operation = %op,
                    wait_ms = self.settings.exhausted_wait.as_millis() as u64,
                    "All credentials cooling down, waiting"
                );
                tokio::time::sleep(self.settings.exhausted_wait).await;

                match self.choose_at(op, Utc::now()) {
                    Some(c) => c,
                    None => {
                        let fallback = self.last_resort();
                        warn!(
                            operation = %op,
                            credential = %fallback,
                            "No credential available, using best-effort fallback"
                        );
                        fallback
                    }
                }
            }
        };

        let wait = self.reserve_gap(credential.index);
        if !wait.is_zero() {
            debug!(
                credential = credential.index,
                wait_ms = wait.as_millis() as u64,
                "Waiting for per-key gap"
            );
            tokio::time::sleep(wait).await;
        }

        credential
    }

    /// Synchronous selection at a given instant
    ///
    /// Returns `None` when every credential is cooling down. Advances the
    /// round-robin pointer on success.
    pub fn choose_at(&self, op: ApiOperation, now: DateTime<Utc>) -> Option<Credential> {
        let mut state = self.lock();
        self.reset_if_due(&mut state, now);

        let n = self.credentials.len();
        let cost = self.costs.cost(op);
        let limit = self.settings.daily_limit;

        let available: Vec<usize> = (0..n)
            .map(|i| (state.rr_pointer + i) % n)
            .filter(|&idx| !state.entries[idx].is_cooling(now))
            .collect();

        // Affordable credentials first, then lowest usage; the scan starts
        // at the round-robin pointer so the first minimum wins ties.
        let rank = |idx: usize| {
            let used = state.entries[idx].used_units;
            (used.saturating_add(cost) > limit, used)
        };

        let best = |exclude: Option<usize>| {
            available
                .iter()
                .copied()
                .filter(|&idx| Some(idx) != exclude)
                .fold(None, |best: Option<usize>, idx| match best {
                    Some(b) if rank(b) <= rank(idx) => Some(b),
                    _ => Some(idx),
                })
        };

        let mut chosen = best(None)?;

        let max = self.settings.max_consecutive_uses;
        if max > 0 && state.last_pick == Some(chosen) && state.consecutive >= max {
            if let Some(other) = best(Some(chosen)) {
                debug!(
                    from = chosen,
                    to = other,
                    consecutive = state.consecutive,
                    "Rotating early after consecutive uses"
                );
                chosen = other;
            }
        }

        if state.last_pick == Some(chosen) {
            state.consecutive += 1;
        } else {
            state.last_pick = Some(chosen);
            state.consecutive = 1;
        }
        state.rr_pointer = (chosen + 1) % n;

        Some(self.credentials[chosen].clone())
    }

    fn last_resort(&self) -> Credential {
        let mut state = self.lock();
        let n = self.credentials.len();
        let idx = state.rr_pointer % n;
        state.rr_pointer = (idx + 1) % n;
        state.last_pick = Some(idx);
        state.consecutive = 1;
        self.credentials[idx].clone()
    }

    /// Claim the next hand-out slot of a credential, returning how long the
    /// caller must wait for it
    fn reserve_gap(&self, index: usize) -> Duration {
        let mut state = self.lock();
        let now = Instant::now();
        let ready_at = state.entries[index]
            .handed_out_at
            .map(|last| last + self.settings.min_gap)
            .filter(|ready| *ready > now)
            .unwrap_or(now);

        state.entries[index].handed_out_at = Some(ready_at);
        ready_at.saturating_duration_since(now)
    }

    /// Add the cost of `op` to the credential's daily usage
    ///
    /// The cost is charged whether or not the call succeeded.
    pub fn record_usage(&self, credential: &Credential, op: ApiOperation, success: bool) {
        let cost = self.costs.cost(op);
        {
            let mut state = self.lock();
            let entry = &mut state.entries[credential.index];
            entry.used_units = entry.used_units.saturating_add(cost);
            entry.last_used = Some(Utc::now());
            if success {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
        }

        crate::metrics::record_quota_units(op.as_str(), cost);
    }

    /// Put a credential into cooldown after a quota failure
    ///
    /// The credential stays in the pool and becomes eligible again once the
    /// cooldown lapses.
    pub fn record_quota_failure(&self, credential: &Credential, cooldown: Duration) {
        self.record_quota_failure_at(credential, cooldown, Utc::now());
    }

    pub fn record_quota_failure_at(
        &self,
        credential: &Credential,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) {
        let until = now + ChronoDuration::from_std(cooldown).unwrap_or(ChronoDuration::hours(1));
        {
            let mut state = self.lock();
            let entry = &mut state.entries[credential.index];
            entry.cooldown_until = Some(until);
            entry.quota_failures += 1;
        }

        warn!(
            credential = %credential,
            cooldown_until = %until,
            "Credential quota exceeded, cooling down"
        );
        crate::metrics::record_quota_failure();
    }

    /// Zero all usage and clear all cooldowns
    pub fn reset_daily(&self) {
        let mut state = self.lock();
        Self::reset_locked(&mut state, Utc::now());
        info!(credentials = self.credentials.len(), "Credential usage reset");
    }

    fn reset_locked(state: &mut PoolState, now: DateTime<Utc>) {
        for entry in &mut state.entries {
            entry.used_units = 0;
            entry.cooldown_until = None;
        }
        state.consecutive = 0;
        state.last_reset = now;
    }

    /// Most recent quota reset boundary at or before `now`
    fn reset_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let hour = self.settings.reset_hour_utc.min(23);
        let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
        let today = now.date_naive().and_time(time).and_utc();
        if today <= now {
            today
        } else {
            today - ChronoDuration::days(1)
        }
    }

    fn reset_if_due(&self, state: &mut PoolState, now: DateTime<Utc>) -> bool {
        if state.last_reset < self.reset_boundary(now) {
            Self::reset_locked(state, now);
            info!("Daily quota boundary passed, credential usage reset");
            true
        } else {
            false
        }
    }

    /// Reset usage if the daily quota boundary passed since the last reset
    pub fn maybe_reset_daily(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        self.reset_if_due(&mut state, now)
    }

    /// Every credential is cooling down or cannot afford `op` today
    pub fn is_depleted(&self, op: ApiOperation) -> bool {
        self.is_depleted_at(op, Utc::now())
    }

    pub fn is_depleted_at(&self, op: ApiOperation, now: DateTime<Utc>) -> bool {
        let cost = self.costs.cost(op);
        let limit = self.settings.daily_limit;
        let state = self.lock();
        state
            .entries
            .iter()
            .all(|e| e.is_cooling(now) || e.used_units.saturating_add(cost) > limit)
    }

    /// Number of credentials currently cooling down
    pub fn cooling_count(&self) -> usize {
        let now = Utc::now();
        self.lock().entries.iter().filter(|e| e.is_cooling(now)).count()
    }

    pub fn snapshot(&self) -> Vec<CredentialSnapshot> {
        let now = Utc::now();
        let limit = self.settings.daily_limit as f64;
        let state = self.lock();

        self.credentials
            .iter()
            .zip(state.entries.iter())
            .map(|(cred, entry)| CredentialSnapshot {
                index: cred.index,
                key: cred.masked(),
                used_units: entry.used_units,
                used_percent: entry.used_units as f64 / limit * 100.0,
                cooling_until: entry.cooldown_until.filter(|until| *until > now),
                last_used: entry.last_used,
                quota_failures: entry.quota_failures,
                successes: entry.successes,
                failures: entry.failures,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pool(keys: &[&str], limit: u64) -> CredentialPool {
        CredentialPool::new(
            keys.iter().map(|k| k.to_string()),
            QuotaCostTable::default(),
            PoolSettings {
                daily_limit: limit,
                min_gap: Duration::ZERO,
                exhausted_wait: Duration::from_millis(1),
                max_consecutive_uses: 0,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        let result = CredentialPool::new(
            vec!["  ".to_string(), String::new()],
            QuotaCostTable::default(),
            PoolSettings::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_round_robin_on_ties() {
        let pool = pool(&["key-aaaa-0001", "key-bbbb-0002", "key-cccc-0003"], 1000);
        let now = Utc::now();

        let picks: Vec<usize> = (0..6)
            .map(|_| pool.choose_at(ApiOperation::ListPlaylists, now).unwrap().index())
            .collect();

        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_least_used_wins() {
        let pool = pool(&["key-aaaa-0001", "key-bbbb-0002"], 1000);
        let now = Utc::now();

        let a = pool.choose_at(ApiOperation::Search, now).unwrap();
        pool.record_usage(&a, ApiOperation::Search, true);
        pool.record_usage(&a, ApiOperation::Search, true);

        let b = pool.choose_at(ApiOperation::Search, now).unwrap();
        assert_eq!(b.index(), 1);
        pool.record_usage(&b, ApiOperation::Search, true);

        // B has 100 used, A has 200: B again even though the pointer is on A.
        let next = pool.choose_at(ApiOperation::Search, now).unwrap();
        assert_eq!(next.index(), 1);
    }

    #[test]
    fn test_cooling_credential_excluded_until_lapsed() {
        let pool = pool(&["key-aaaa-0001", "key-bbbb-0002"], 1000);
        let now = Utc::now();

        let a = pool.choose_at(ApiOperation::Search, now).unwrap();
        pool.record_quota_failure_at(&a, Duration::from_secs(600), now);

        for _ in 0..3 {
            assert_eq!(pool.choose_at(ApiOperation::Search, now).unwrap().index(), 1);
        }

        let later = now + ChronoDuration::minutes(11);
        let picks: Vec<usize> = (0..2)
            .map(|_| pool.choose_at(ApiOperation::Search, later).unwrap().index())
            .collect();
        assert!(picks.contains(&0));
    }

    #[test]
    fn test_all_cooling_returns_none() {
        let pool = pool(&["key-aaaa-0001"], 1000);
        let now = Utc::now();
        let a = pool.choose_at(ApiOperation::Search, now).unwrap();
        pool.record_quota_failure_at(&a, Duration::from_secs(60), now);

        assert!(pool.choose_at(ApiOperation::Search, now).is_none());
        assert!(pool.is_depleted_at(ApiOperation::Search, now));
    }

    #[tokio::test]
    async fn test_select_falls_back_when_all_cooling() {
        let pool = pool(&["key-aaaa-0001", "key-bbbb-0002"], 1000);
        let now = Utc::now();
        for i in 0..2 {
            let c = pool.choose_at(ApiOperation::Search, now).unwrap();
            assert_eq!(c.index(), i);
            pool.record_quota_failure_at(&c, Duration::from_secs(3600), now);
        }

        let fallback = pool.select(ApiOperation::Search).await;
        assert_eq!(fallback.index(), 0);
    }

    #[test]
    fn test_consecutive_use_rotation() {
        let pool = CredentialPool::new(
            vec!["key-aaaa-0001".to_string(), "key-bbbb-0002".to_string()],
            QuotaCostTable::default(),
            PoolSettings {
                daily_limit: 100_000,
                min_gap: Duration::ZERO,
                max_consecutive_uses: 3,
                ..Default::default()
            },
        )
        .unwrap();
        let now = Utc::now();

        // Keep B expensive so plain selection would always prefer A.
        let first = pool.choose_at(ApiOperation::Search, now).unwrap();
        let b = pool.choose_at(ApiOperation::Search, now).unwrap();
        assert_eq!((first.index(), b.index()), (0, 1));
        for _ in 0..10 {
            pool.record_usage(&b, ApiOperation::Search, true);
        }

        let picks: Vec<usize> = (0..4)
            .map(|_| pool.choose_at(ApiOperation::ListPlaylists, now).unwrap().index())
            .collect();
        assert_eq!(picks, vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_depleted_when_nothing_affordable() {
        let pool = pool(&["key-aaaa-0001", "key-bbbb-0002"], 150);
        let now = Utc::now();
        assert!(!pool.is_depleted_at(ApiOperation::Search, now));

        for _ in 0..2 {
            let c = pool.choose_at(ApiOperation::Search, now).unwrap();
            pool.record_usage(&c, ApiOperation::Search, true);
        }

        assert!(pool.is_depleted_at(ApiOperation::Search, now));
        assert!(!pool.is_depleted_at(ApiOperation::ListPlaylists, now));
    }

    #[test]
    fn test_reset_daily_clears_usage_and_cooldowns() {
        let pool = pool(&["key-aaaa-0001"], 100);
        let now = Utc::now();
        let a = pool.choose_at(ApiOperation::Search, now).unwrap();
        pool.record_usage(&a, ApiOperation::Search, false);
        pool.record_quota_failure_at(&a, Duration::from_secs(3600), now);

        pool.reset_daily();

        let snap = &pool.snapshot()[0];
        assert_eq!(snap.used_units, 0);
        assert!(snap.cooling_until.is_none());
        assert_eq!(snap.quota_failures, 1);
        assert_eq!(snap.failures, 1);
    }

    #[test]
    fn test_maybe_reset_daily_at_boundary() {
        let pool = pool(&["key-aaaa-0001"], 1000);
        let a = pool.choose_at(ApiOperation::Search, Utc::now()).unwrap();
        pool.record_usage(&a, ApiOperation::Search, true);

        let boundary_far_future = Utc.with_ymd_and_hms(2100, 1, 2, 9, 0, 0).unwrap();
        assert!(pool.maybe_reset_daily(boundary_far_future));
        assert_eq!(pool.snapshot()[0].used_units, 0);
        assert!(!pool.maybe_reset_daily(boundary_far_future));
    }

    #[test]
    fn test_snapshot_masks_keys() {
        let pool = pool(&["AIzaSyExampleKey0000xQk9"], 100);
        let snap = pool.snapshot();
        assert_eq!(snap[0].key, "AIza…xQk9");
        assert!(!format!("{:?}", pool).contains("SyExample"));
    }
}
