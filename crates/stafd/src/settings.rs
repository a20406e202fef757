//! Operational settings shared by every connection worker.
//!
//! Values start from the loaded configuration and can be changed at runtime
//! through the `MISC` service. Each [`Settings`] is self-contained so tests
//! build isolated instances.

use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use stafd_config::Config;

const BYTES_PER_MEGABYTE: u64 = 1_048_576;

/// Point-in-time copy of every setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SettingsSnapshot {
    pub(crate) connect_attempts: u32,
    pub(crate) connect_retry_delay_ms: u64,
    pub(crate) result_warning_size: u32,
    pub(crate) strict_fs_copy_trust: bool,
    pub(crate) codepage: String,
    pub(crate) text_eol: String,
    pub(crate) max_workers: usize,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Settings::from_config(&Config::default()).snapshot()
    }
}

#[derive(Debug)]
pub(crate) struct Settings {
    values: RwLock<SettingsSnapshot>,
}

impl Settings {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self::new(SettingsSnapshot {
            connect_attempts: config.connect_attempts.max(1),
            connect_retry_delay_ms: config.connect_retry_delay_ms,
            result_warning_size: config.result_warning_size,
            strict_fs_copy_trust: config.strict_fs_copy_trust,
            codepage: config.codepage.clone(),
            text_eol: config.text_eol.clone(),
            max_workers: config.max_workers.max(1),
        })
    }

    pub(crate) fn new(values: SettingsSnapshot) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub(crate) fn snapshot(&self) -> SettingsSnapshot {
        self.values.read().clone()
    }

    pub(crate) fn connect_attempts(&self) -> u32 {
        self.values.read().connect_attempts
    }

    /// Sets the attempts per interface; zero is rejected.
    pub(crate) fn set_connect_attempts(&self, attempts: u32) -> bool {
        if attempts == 0 {
            return false;
        }
        self.values.write().connect_attempts = attempts;
        true
    }

    pub(crate) fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.values.read().connect_retry_delay_ms)
    }

    pub(crate) fn set_connect_retry_delay_ms(&self, delay_ms: u64) {
        self.values.write().connect_retry_delay_ms = delay_ms;
    }

    /// Warning threshold in megabytes.
    pub(crate) fn result_warning_size(&self) -> u32 {
        self.values.read().result_warning_size
    }

    /// Warning threshold in bytes, or `None` when warnings are off.
    pub(crate) fn result_warning_bytes(&self) -> Option<u64> {
        match self.result_warning_size() {
            0 => None,
            megabytes => Some(u64::from(megabytes) * BYTES_PER_MEGABYTE),
        }
    }

    /// Whether a result of `len` bytes crosses the warning threshold.
    pub(crate) fn result_is_large(&self, len: u64) -> bool {
        self.result_warning_bytes().is_some_and(|limit| len > limit)
    }

    pub(crate) fn set_result_warning_size(&self, size: u32) {
        self.values.write().result_warning_size = size;
    }

    pub(crate) fn strict_fs_copy_trust(&self) -> bool {
        self.values.read().strict_fs_copy_trust
    }

    pub(crate) fn set_strict_fs_copy_trust(&self, strict: bool) {
        self.values.write().strict_fs_copy_trust = strict;
    }

    pub(crate) fn codepage(&self) -> String {
        self.values.read().codepage.clone()
    }

    pub(crate) fn text_eol(&self) -> String {
        self.values.read().text_eol.clone()
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.values.read().max_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_from_configuration() {
        let config = Config {
            connect_attempts: 0,
            result_warning_size: 512,
            ..Config::default()
        };
        let settings = Settings::from_config(&config);
        assert_eq!(settings.connect_attempts(), 1);
        assert_eq!(settings.result_warning_size(), 512);
        assert_eq!(settings.connect_retry_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn warning_size_is_counted_in_megabytes() {
        let settings = Settings::from_config(&Config::default());
        assert_eq!(settings.result_warning_bytes(), None);
        assert!(!settings.result_is_large(u64::MAX));

        settings.set_result_warning_size(2);
        assert_eq!(settings.result_warning_bytes(), Some(2 * 1_048_576));
        assert!(!settings.result_is_large(2 * 1_048_576));
        assert!(settings.result_is_large(2 * 1_048_576 + 1));

        settings.set_result_warning_size(u32::MAX);
        assert_eq!(
            settings.result_warning_bytes(),
            Some(u64::from(u32::MAX) * 1_048_576)
        );
    }

    #[test]
    fn rejects_zero_attempts() {
        let settings = Settings::from_config(&Config::default());
        assert!(!settings.set_connect_attempts(0));
        assert!(settings.set_connect_attempts(5));
        assert_eq!(settings.snapshot().connect_attempts, 5);
    }
}
