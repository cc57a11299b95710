//! Per-tier daily/monthly quota limits.
//!
//! spec.md §9 names this an Open Question ("Daily and monthly quota
//! *limits* are not encoded in the source; only
//! `FREE_API_REQUESTS_LIMIT` for the monthly free tier is named").
//! Resolved in DESIGN.md: a config-overridable table keyed by
//! `subscriptionStatus`, seeded from `FREE_API_REQUESTS_LIMIT`.

use serde::{Deserialize, Serialize};

/// A user's subscription tier, as recorded on the external user
/// record (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// No paid subscription.
    Free,
    /// Paying, in good standing.
    Active,
    /// Payment failed, grace period.
    PastDue,
    /// Subscription cancelled.
    Canceled,
}

impl Tier {
    /// Parse the external `subscriptionStatus` string, defaulting
    /// unknown values to [`Tier::Free`].
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            _ => Self::Free,
        }
    }
}

/// The daily and monthly request ceilings for one tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Maximum requests per UTC calendar day.
    pub daily: u64,
    /// Maximum requests per calendar month.
    pub monthly: u64,
}

/// The full per-tier quota table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaTable {
    free: QuotaLimits,
    active: QuotaLimits,
    past_due: QuotaLimits,
    canceled: QuotaLimits,
}

impl QuotaTable {
    /// Build the default table, seeded from `FREE_API_REQUESTS_LIMIT`
    /// (the free tier's monthly ceiling) per spec.md §6/§9.
    #[must_use]
    pub fn from_free_monthly_limit(free_monthly: u64) -> Self {
        let free_daily = (free_monthly / 30).max(10);
        Self {
            free: QuotaLimits { daily: free_daily, monthly: free_monthly },
            active: QuotaLimits { daily: 10_000, monthly: 300_000 },
            past_due: QuotaLimits { daily: free_daily, monthly: free_monthly },
            canceled: QuotaLimits { daily: 0, monthly: 0 },
        }
    }

    /// Look up the limits for a tier.
    #[must_use]
    pub fn limits_for(&self, tier: Tier) -> QuotaLimits {
        match tier {
            Tier::Free => self.free,
            Tier::Active => self.active,
            Tier::PastDue => self.past_due,
            Tier::Canceled => self.canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_daily_is_never_below_the_floor() {
        let table = QuotaTable::from_free_monthly_limit(100);
        let limits = table.limits_for(Tier::Free);
        assert_eq!(limits.monthly, 100);
        assert_eq!(limits.daily, 10);
    }

    #[test]
    fn canceled_tier_has_zero_allowance() {
        let table = QuotaTable::from_free_monthly_limit(500);
        let limits = table.limits_for(Tier::Canceled);
        assert_eq!(limits.daily, 0);
        assert_eq!(limits.monthly, 0);
    }

    #[test]
    fn status_parsing_defaults_unknown_to_free() {
        assert_eq!(Tier::from_status("active"), Tier::Active);
        assert_eq!(Tier::from_status("bogus"), Tier::Free);
    }
}
