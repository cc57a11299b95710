//! Component E: Auth & Usage Accounting.
//!
//! Resolves credential → user, enforces per-period quotas, increments
//! counters, rolls daily/monthly windows (spec.md §4.E). The user
//! record itself is an external collaborator per spec.md §1; this
//! module defines the minimal schema and a pluggable [`UserStore`] so
//! the core is runnable and testable end-to-end (SPEC_FULL.md §3).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use relay_config::{QuotaTable, Tier};
use relay_core::{Credential, RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::Row;

/// The external user record's fields relevant to the core (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// The user's API key.
    pub credential: String,
    /// The user's registered email.
    pub email: String,
    /// `free | active | past_due | canceled`.
    pub subscription_status: String,
    /// Rolling monthly request count.
    pub requests_this_month: u64,
    /// Rolling daily request count, reset when `last_request_date`
    /// rolls to a new UTC day.
    pub requests_today: u64,
    /// The UTC date `requests_today` was last incremented on.
    pub last_request_date: Option<NaiveDate>,
}

impl UserRecord {
    /// This user's resolved quota tier.
    #[must_use]
    pub fn tier(&self) -> Tier {
        Tier::from_status(&self.subscription_status)
    }
}

/// Pluggable backing store for [`UserRecord`]s.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by credential.
    async fn find_by_credential(&self, credential: &Credential) -> RelayResult<Option<UserRecord>>;

    /// Create a new user for `email`, minting a fresh 16-byte hex
    /// credential. Fails with [`RelayError::Conflict`] if `email` is
    /// already registered.
    async fn create(&self, email: &str) -> RelayResult<UserRecord>;

    /// Roll `requests_today` to 0 if `today` is a new UTC day
    /// relative to the stored `last_request_date`, then increment
    /// both counters, returning the post-increment record. The
    /// increment is never rolled back on quota failure (spec.md
    /// §4.E "approximate accounting is accepted").
    async fn increment_usage(&self, credential: &Credential, today: NaiveDate) -> RelayResult<UserRecord>;

    /// Every registered credential, for the per-record reset
    /// fallback.
    async fn all_credentials(&self) -> RelayResult<Vec<Credential>>;

    /// Zero `requests_this_month`, `requests_today`, and
    /// `last_request_date` for every user in one operation.
    async fn bulk_reset_monthly(&self) -> RelayResult<()>;

    /// Zero counters for one user; the fallback path when
    /// `bulk_reset_monthly` fails (spec.md §4.E).
    async fn reset_single(&self, credential: &Credential) -> RelayResult<()>;
}

/// An in-process [`UserStore`], used for `DB_TYPE=memory` and tests.
#[derive(Default)]
pub struct MemoryUserStore {
    by_credential: DashMap<String, UserRecord>,
    emails: DashMap<String, ()>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_credential(&self, credential: &Credential) -> RelayResult<Option<UserRecord>> {
        Ok(self.by_credential.get(credential.as_str()).map(|r| r.clone()))
    }

    async fn create(&self, email: &str) -> RelayResult<UserRecord> {
        if self.emails.contains_key(email) {
            return Err(RelayError::Conflict(format!("email {email} already registered")));
        }
        let credential = Credential::generate();
        let record = UserRecord {
            credential: credential.as_str().to_string(),
            email: email.to_string(),
            subscription_status: "free".to_string(),
            requests_this_month: 0,
            requests_today: 0,
            last_request_date: None,
        };
        self.emails.insert(email.to_string(), ());
        self.by_credential.insert(credential.as_str().to_string(), record.clone());
        Ok(record)
    }

    async fn increment_usage(&self, credential: &Credential, today: NaiveDate) -> RelayResult<UserRecord> {
        let mut entry = self
            .by_credential
            .get_mut(credential.as_str())
            .ok_or(RelayError::Unauthenticated)?;
        if entry.last_request_date != Some(today) {
            entry.requests_today = 0;
            entry.last_request_date = Some(today);
        }
        entry.requests_today += 1;
        entry.requests_this_month += 1;
        Ok(entry.clone())
    }

    async fn all_credentials(&self) -> RelayResult<Vec<Credential>> {
        Ok(self.by_credential.iter().map(|e| Credential::from(e.key().clone())).collect())
    }

    async fn bulk_reset_monthly(&self) -> RelayResult<()> {
        for mut entry in self.by_credential.iter_mut() {
            entry.requests_this_month = 0;
            entry.requests_today = 0;
            entry.last_request_date = None;
        }
        Ok(())
    }

    async fn reset_single(&self, credential: &Credential) -> RelayResult<()> {
        if let Some(mut entry) = self.by_credential.get_mut(credential.as_str()) {
            entry.requests_this_month = 0;
            entry.requests_today = 0;
            entry.last_request_date = None;
        }
        Ok(())
    }
}

/// A Postgres-backed [`UserStore`], used when `DATABASE_URL` is set
/// and `DB_TYPE != memory`.
///
/// Schema (SPEC_FULL.md §3):
/// ```sql
/// CREATE TABLE users (
///     credential TEXT PRIMARY KEY,
///     email TEXT UNIQUE NOT NULL,
///     subscription_status TEXT NOT NULL DEFAULT 'free',
///     requests_this_month BIGINT NOT NULL DEFAULT 0,
///     requests_today BIGINT NOT NULL DEFAULT 0,
///     last_request_date DATE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// ```
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    /// Connect to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] if the connection pool can't
    /// be established.
    pub async fn connect(database_url: &str) -> RelayResult<Self> {
        let pool = PgPool::connect(database_url).await.map_err(|e| RelayError::Internal(e.into()))?;
        Ok(Self { pool })
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<UserRecord, sqlx::Error> {
        Ok(UserRecord {
            credential: row.try_get("credential")?,
            email: row.try_get("email")?,
            subscription_status: row.try_get("subscription_status")?,
            requests_this_month: u64::try_from(row.try_get::<i64, _>("requests_this_month")?).unwrap_or(0),
            requests_today: u64::try_from(row.try_get::<i64, _>("requests_today")?).unwrap_or(0),
            last_request_date: row.try_get("last_request_date")?,
        })
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn find_by_credential(&self, credential: &Credential) -> RelayResult<Option<UserRecord>> {
        let row = sqlx::query("SELECT * FROM users WHERE credential = $1")
            .bind(credential.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RelayError::Internal(e.into()))?;
        row.as_ref().map(Self::row_to_record).transpose().map_err(|e| RelayError::Internal(e.into()))
    }

    async fn create(&self, email: &str) -> RelayResult<UserRecord> {
        let credential = Credential::generate();
        let row = sqlx::query(
            "INSERT INTO users (credential, email) VALUES ($1, $2) \
             ON CONFLICT (email) DO NOTHING RETURNING *",
        )
        .bind(credential.as_str())
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(e.into()))?;
        match row {
            Some(row) => Self::row_to_record(&row).map_err(|e| RelayError::Internal(e.into())),
            None => Err(RelayError::Conflict(format!("email {email} already registered"))),
        }
    }

    async fn increment_usage(&self, credential: &Credential, today: NaiveDate) -> RelayResult<UserRecord> {
        let row = sqlx::query(
            "UPDATE users SET \
                requests_today = CASE WHEN last_request_date = $2 THEN requests_today + 1 ELSE 1 END, \
                requests_this_month = requests_this_month + 1, \
                last_request_date = $2 \
             WHERE credential = $1 RETURNING *",
        )
        .bind(credential.as_str())
        .bind(today)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(e.into()))?
        .ok_or(RelayError::Unauthenticated)?;
        Self::row_to_record(&row).map_err(|e| RelayError::Internal(e.into()))
    }

    async fn all_credentials(&self) -> RelayResult<Vec<Credential>> {
        let rows = sqlx::query("SELECT credential FROM users")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RelayError::Internal(e.into()))?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("credential").map(Credential::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RelayError::Internal(e.into()))
    }

    async fn bulk_reset_monthly(&self) -> RelayResult<()> {
        sqlx::query(
            "UPDATE users SET requests_this_month = 0, requests_today = 0, last_request_date = NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(e.into()))?;
        Ok(())
    }

    async fn reset_single(&self, credential: &Credential) -> RelayResult<()> {
        sqlx::query(
            "UPDATE users SET requests_this_month = 0, requests_today = 0, last_request_date = NULL \
             WHERE credential = $1",
        )
        .bind(credential.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(e.into()))?;
        Ok(())
    }
}

/// Auth & usage accounting surface (spec.md §4.E).
pub struct AuthService {
    store: Arc<dyn UserStore>,
    quotas: QuotaTable,
}

impl AuthService {
    /// Build the service from a backing store and the resolved quota
    /// table.
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, quotas: QuotaTable) -> Self {
        Self { store, quotas }
    }

    /// Resolve `credential` to a user, or [`RelayError::Unauthenticated`]
    /// when absent (spec.md §4.E).
    pub async fn authenticate(&self, credential: &Credential) -> RelayResult<UserRecord> {
        self.store.find_by_credential(credential).await?.ok_or(RelayError::Unauthenticated)
    }

    /// Increment usage and enforce the daily/monthly quota for
    /// `credential`. The increment is applied even on quota failure
    /// (spec.md §4.E "approximate accounting is accepted").
    pub async fn charge(&self, credential: &Credential, today: NaiveDate) -> RelayResult<()> {
        let record = self.store.increment_usage(credential, today).await?;
        let limits = self.quotas.limits_for(record.tier());
        if record.requests_today > limits.daily || record.requests_this_month > limits.monthly {
            return Err(RelayError::QuotaExceeded);
        }
        Ok(())
    }

    /// Register a new user, minting a credential.
    pub async fn register(&self, email: &str) -> RelayResult<UserRecord> {
        self.store.create(email).await
    }

    /// Access to the backing store, e.g. for the monthly-reset job.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }
}

/// Run the monthly counter reset: try a bulk update, falling back to
/// per-record updates on failure (spec.md §4.E).
pub async fn run_monthly_reset(store: &Arc<dyn UserStore>) -> RelayResult<()> {
    if store.bulk_reset_monthly().await.is_ok() {
        return Ok(());
    }
    let credentials = store.all_credentials().await?;
    let mut failures: HashMap<String, RelayError> = HashMap::new();
    for credential in credentials {
        if let Err(e) = store.reset_single(&credential).await {
            failures.insert(credential.as_str().to_string(), e);
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(RelayError::Internal(anyhow::anyhow!("{} user(s) failed monthly reset", failures.len())))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn charge_rolls_daily_counter_on_new_utc_day() {
        let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::default());
        let user = store.create("a@example.com").await.unwrap();
        let credential = Credential::from(user.credential.clone());

        let auth = AuthService::new(store.clone(), QuotaTable::from_free_monthly_limit(1000));
        auth.charge(&credential, date(2026, 1, 1)).await.unwrap();
        auth.charge(&credential, date(2026, 1, 1)).await.unwrap();
        let record = store.find_by_credential(&credential).await.unwrap().unwrap();
        assert_eq!(record.requests_today, 2);

        auth.charge(&credential, date(2026, 1, 2)).await.unwrap();
        let record = store.find_by_credential(&credential).await.unwrap().unwrap();
        assert_eq!(record.requests_today, 1, "new UTC day resets the daily counter");
        assert_eq!(record.requests_this_month, 3);
    }

    #[tokio::test]
    async fn charge_fails_over_quota_but_still_increments() {
        let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::default());
        let user = store.create("b@example.com").await.unwrap();
        let credential = Credential::from(user.credential.clone());

        let auth = AuthService::new(store.clone(), QuotaTable::from_free_monthly_limit(1));
        auth.charge(&credential, date(2026, 1, 1)).await.unwrap();
        let result = auth.charge(&credential, date(2026, 1, 1)).await;
        assert!(matches!(result, Err(RelayError::QuotaExceeded)));

        let record = store.find_by_credential(&credential).await.unwrap().unwrap();
        assert_eq!(record.requests_this_month, 2, "increment is not rolled back on quota failure");
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::default());
        let auth = AuthService::new(store, QuotaTable::from_free_monthly_limit(100));
        auth.register("dup@example.com").await.unwrap();
        let second = auth.register("dup@example.com").await;
        assert!(matches!(second, Err(RelayError::Conflict(_))));
    }

    #[tokio::test]
    async fn monthly_reset_zeroes_all_counters() {
        let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::default());
        let user = store.create("c@example.com").await.unwrap();
        let credential = Credential::from(user.credential.clone());
        store.increment_usage(&credential, date(2026, 1, 1)).await.unwrap();

        run_monthly_reset(&store).await.unwrap();
        let record = store.find_by_credential(&credential).await.unwrap().unwrap();
        assert_eq!(record.requests_this_month, 0);
        assert_eq!(record.requests_today, 0);
        assert!(record.last_request_date.is_none());
    }
}
