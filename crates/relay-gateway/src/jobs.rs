//! Component I: Scheduled Jobs.
//!
//! Three periodic tasks not owned by any single component: the
//! distributed-locked monthly counter reset, the cross-replica
//! pending-handshake-redemption poller, and (spawned here for
//! discoverability even though the Session Controller owns its own
//! loop) process startup wiring (spec.md §4.I).

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use relay_store::{CoordinationStore, DistributedLock};
use tracing::{error, info, warn};

use crate::auth::{UserStore, run_monthly_reset};
use crate::session::SessionController;

/// Key guarding the monthly reset against concurrent replicas
/// (spec.md §3).
pub const MONTHLY_RESET_LOCK_KEY: &str = "monthly_reset_lock";

/// Lock TTL (spec.md §3, §5 "monthly-reset lock caps at 5 minutes").
pub const MONTHLY_RESET_LOCK_TTL: Duration = Duration::from_secs(300);

/// Marker key recording the last successful reset (spec.md §3).
pub const LAST_MONTHLY_RESET_KEY: &str = "last_monthly_reset";

const LAST_MONTHLY_RESET_TTL: Duration = Duration::from_secs(32 * 24 * 3600);

/// Single retry delay on a failed monthly reset (spec.md §7 "Retries
/// are only applied by the monthly-reset job").
pub const MONTHLY_RESET_RETRY_DELAY: Duration = Duration::from_secs(300);

/// How often the pending-redemption poller checks this replica's own
/// minted handshakes for a forwarded redemption (spec.md §4.G step 2).
pub const PENDING_SESSION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How often the scheduler wakes to check whether it's time for the
/// monthly reset. Coarser than the reset's own cadence; the date check
/// inside the loop is what actually gates the work.
const MONTHLY_RESET_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn all scheduled jobs. Returns immediately; the jobs run for the
/// life of the process.
pub fn spawn_all(user_store: Arc<dyn UserStore>, store: Arc<dyn CoordinationStore>, sessions: Arc<SessionController>) {
    tokio::spawn(run_monthly_reset_job(user_store, store));
    tokio::spawn(run_pending_session_poller(sessions));
}

async fn run_monthly_reset_job(user_store: Arc<dyn UserStore>, store: Arc<dyn CoordinationStore>) {
    // Opportunistic trigger: if the process starts on the 1st and no
    // reset has run yet today, run one right away instead of waiting
    // for the next hourly check (spec.md §4.E).
    if Utc::now().day() == 1 {
        maybe_run_monthly_reset(&user_store, &store).await;
    }

    let mut interval = tokio::time::interval(MONTHLY_RESET_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if Utc::now().day() == 1 {
            maybe_run_monthly_reset(&user_store, &store).await;
        }
    }
}

async fn maybe_run_monthly_reset(user_store: &Arc<dyn UserStore>, store: &Arc<dyn CoordinationStore>) {
    let today = Utc::now().date_naive();
    if let Ok(Some(last)) = store.get(LAST_MONTHLY_RESET_KEY).await {
        if let Ok(last_date) = chrono::DateTime::parse_from_rfc3339(&last) {
            if last_date.with_timezone(&Utc).date_naive() == today {
                return;
            }
        }
    }

    let Ok(Some(lock)) = DistributedLock::try_acquire(store.clone(), MONTHLY_RESET_LOCK_KEY, MONTHLY_RESET_LOCK_TTL).await
    else {
        return;
    };

    let mut result = run_monthly_reset(user_store).await;
    if result.is_err() {
        tokio::time::sleep(MONTHLY_RESET_RETRY_DELAY).await;
        result = run_monthly_reset(user_store).await;
    }

    match result {
        Ok(()) => {
            info!("monthly usage counters reset");
            if let Err(e) = store.set(LAST_MONTHLY_RESET_KEY, &Utc::now().to_rfc3339(), LAST_MONTHLY_RESET_TTL).await {
                warn!(error = %e, "failed to record last_monthly_reset marker");
            }
        },
        Err(e) => error!(error = %e, "monthly reset failed after retry"),
    }

    if let Err(e) = lock.release().await {
        warn!(error = %e, "failed to release monthly_reset_lock");
    }
}

async fn run_pending_session_poller(sessions: Arc<SessionController>) {
    let mut interval = tokio::time::interval(PENDING_SESSION_POLL_INTERVAL);
    loop {
        interval.tick().await;
        for token in sessions.pending_tokens() {
            if let Err(e) = sessions.service_pending(&token).await {
                warn!(token, error = %e, "pending-redemption poller failed to service token");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_reset_lock_ttl_matches_spec() {
        assert_eq!(MONTHLY_RESET_LOCK_TTL, Duration::from_secs(300));
    }

    #[test]
    fn monthly_reset_retry_delay_matches_spec() {
        assert_eq!(MONTHLY_RESET_RETRY_DELAY, Duration::from_secs(300));
    }

    #[test]
    fn lock_key_names_match_spec() {
        assert_eq!(MONTHLY_RESET_LOCK_KEY, "monthly_reset_lock");
        assert_eq!(LAST_MONTHLY_RESET_KEY, "last_monthly_reset");
    }
}
