//! Engine configuration.

use std::time::Duration;

use ktn_sync::SyncConfig;

/// Settings key the device identity record is stored under.
pub const IDENTITY_SETTING_KEY: &str = "device_identity";

/// Configuration for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Sync configuration handed to every session.
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// Smaller QR fragments and data-channel chunks, for older cameras and
    /// constrained links.
    pub fn low_bandwidth() -> Self {
        let mut config = Self::default();
        config.sync.fragment_size = 500;
        config.sync.channel.chunk_size = 4 * 1024;
        config.sync.channel.high_water_mark = 16 * 1024;
        config
    }

    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.sync.negotiation.ice_servers = servers;
        self
    }

    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.sync.fragment_size = size.max(1);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.sync.channel.chunk_size = size.max(1);
        self
    }

    pub fn with_gather_timeout(mut self, timeout: Duration) -> Self {
        self.sync.negotiation.gather_timeout = timeout;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.sync.negotiation.open_timeout = timeout;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.sync.message_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktn_core::DEFAULT_FRAGMENT_SIZE;
    use ktn_sync::limits;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sync.fragment_size, DEFAULT_FRAGMENT_SIZE);
        assert_eq!(config.sync.channel.chunk_size, limits::CHUNK_SIZE);
        assert_eq!(config.sync.negotiation.gather_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_low_bandwidth_shrinks_units() {
        let config = EngineConfig::low_bandwidth();
        assert!(config.sync.fragment_size < DEFAULT_FRAGMENT_SIZE);
        assert!(config.sync.channel.chunk_size < limits::CHUNK_SIZE);
        assert!(config.sync.channel.high_water_mark >= config.sync.channel.chunk_size);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_ice_servers(vec![])
            .with_fragment_size(0)
            .with_message_timeout(Duration::from_secs(2));
        assert!(config.sync.negotiation.ice_servers.is_empty());
        assert_eq!(config.sync.fragment_size, 1);
        assert_eq!(config.sync.message_timeout, Duration::from_secs(2));
    }
}
