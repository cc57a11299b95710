//! Per-operation reply deadlines (spec.md §4.F, §6 endpoint catalogue).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deadlines for each class of relay operation, as milliseconds so
/// they round-trip cleanly through config files and env overrides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OperationDeadlines {
    /// Dice endpoints: 5s.
    pub quick_ms: u64,
    /// Search/CRUD/combat/entity endpoints: 10s (the default).
    pub default_ms: u64,
    /// Macro execution: 15s.
    pub macros_ms: u64,
    /// File-system listing: 15s.
    pub file_system_ms: u64,
    /// `execute-js`: 10s (same as default, named separately per the catalogue).
    pub execute_js_ms: u64,
    /// File download: 20s.
    pub download_ms: u64,
    /// File upload: 30s.
    pub upload_ms: u64,
    /// Asset proxy: 30s.
    pub proxy_asset_ms: u64,
}

impl Default for OperationDeadlines {
    fn default() -> Self {
        Self {
            quick_ms: 5_000,
            default_ms: 10_000,
            macros_ms: 15_000,
            file_system_ms: 15_000,
            execute_js_ms: 10_000,
            download_ms: 20_000,
            upload_ms: 30_000,
            proxy_asset_ms: 30_000,
        }
    }
}

impl OperationDeadlines {
    /// `quick_ms` as a [`Duration`].
    #[must_use]
    pub fn quick(&self) -> Duration {
        Duration::from_millis(self.quick_ms)
    }

    /// `default_ms` as a [`Duration`].
    #[must_use]
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_ms)
    }

    /// `macros_ms` as a [`Duration`].
    #[must_use]
    pub fn macros(&self) -> Duration {
        Duration::from_millis(self.macros_ms)
    }

    /// `file_system_ms` as a [`Duration`].
    #[must_use]
    pub fn file_system(&self) -> Duration {
        Duration::from_millis(self.file_system_ms)
    }

    /// `execute_js_ms` as a [`Duration`].
    #[must_use]
    pub fn execute_js(&self) -> Duration {
        Duration::from_millis(self.execute_js_ms)
    }

    /// `download_ms` as a [`Duration`].
    #[must_use]
    pub fn download(&self) -> Duration {
        Duration::from_millis(self.download_ms)
    }

    /// `upload_ms` as a [`Duration`].
    #[must_use]
    pub fn upload(&self) -> Duration {
        Duration::from_millis(self.upload_ms)
    }

    /// `proxy_asset_ms` as a [`Duration`].
    #[must_use]
    pub fn proxy_asset(&self) -> Duration {
        Duration::from_millis(self.proxy_asset_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_deadlines() {
        let d = OperationDeadlines::default();
        assert_eq!(d.quick(), Duration::from_secs(5));
        assert_eq!(d.default_deadline(), Duration::from_secs(10));
        assert_eq!(d.macros(), Duration::from_secs(15));
        assert_eq!(d.download(), Duration::from_secs(20));
        assert_eq!(d.upload(), Duration::from_secs(30));
    }
}
