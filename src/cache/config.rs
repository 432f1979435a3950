//! Response cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::CacheSettings;

const DEFAULT_TTL_SECS: u64 = 20;
const DEFAULT_MAX_ENTRIES: usize = 512;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false, the middleware passes every request straight through.
    pub enabled: bool,
    /// How long a stored response is served before the handler runs again.
    pub ttl: Duration,
    pub max_entries: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_entries: NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: settings.ttl,
            max_entries: settings.max_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl, Duration::from_secs(20));
        assert_eq!(config.max_entries.get(), 512);
    }

    #[test]
    fn settings_are_carried_over() {
        let settings = CacheSettings {
            enabled: false,
            ttl: Duration::from_secs(5),
            max_entries: NonZeroUsize::new(3).expect("non-zero"),
        };
        let config = CacheConfig::from(&settings);
        assert!(!config.enabled);
        assert_eq!(config.ttl, Duration::from_secs(5));
        assert_eq!(config.max_entries.get(), 3);
    }
}
