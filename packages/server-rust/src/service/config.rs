use std::time::Duration;

use relay_core::WireFormat;

/// Node-level configuration shared by the caller bridge, the reply listener,
/// and the responder.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Identifier used in log output.
    pub node_id: String,
    /// Topic carrying requests (caller -> responder).
    pub request_topic: String,
    /// Topic carrying replies (responder -> caller).
    pub reply_topic: String,
    /// Consumer group of the reply listener.
    pub caller_group: String,
    /// Consumer group of the responder.
    pub responder_group: String,
    pub default_call_timeout_ms: u64,
    /// Tick interval of the deadline sweeper.
    pub sweep_interval_ms: u64,
    /// Upper bound on a single domain operation.
    pub dispatch_timeout_ms: u64,
    /// Extra attempts after a failed reply publish.
    pub reply_publish_retries: u32,
    /// Base backoff between reply publish attempts; grows linearly.
    pub reply_publish_backoff_ms: u64,
    /// Cap on the reply publish backoff, also the longest pause before a
    /// held request is handled again.
    pub reply_publish_backoff_max_ms: u64,
    /// Replies remembered for answering redelivered requests.
    pub reply_cache_capacity: usize,
    /// Partitions per topic on the in-memory bus.
    pub partitions: u32,
    pub wire_format: WireFormat,
    /// How long shutdown waits for in-flight calls.
    pub drain_timeout_ms: u64,
}

impl RelayConfig {
    #[must_use]
    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.default_call_timeout_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based), capped at
    /// `reply_publish_backoff_max_ms`.
    #[must_use]
    pub fn reply_publish_backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .reply_publish_backoff_ms
            .saturating_mul(u64::from(attempt))
            .min(self.reply_publish_backoff_max_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            node_id: "relay-node".to_string(),
            request_topic: "requests".to_string(),
            reply_topic: "replies".to_string(),
            caller_group: "publisher".to_string(),
            responder_group: "discussion".to_string(),
            default_call_timeout_ms: 2_000,
            sweep_interval_ms: 250,
            dispatch_timeout_ms: 1_500,
            reply_publish_retries: 3,
            reply_publish_backoff_ms: 50,
            reply_publish_backoff_max_ms: 1_000,
            reply_cache_capacity: 1_024,
            partitions: 4,
            wire_format: WireFormat::Json,
            drain_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.request_topic, "requests");
        assert_eq!(config.reply_topic, "replies");
        assert_eq!(config.caller_group, "publisher");
        assert_eq!(config.responder_group, "discussion");
        assert_eq!(config.default_call_timeout(), Duration::from_secs(2));
        assert_eq!(config.sweep_interval(), Duration::from_millis(250));
        assert_eq!(config.dispatch_timeout(), Duration::from_millis(1_500));
        assert_eq!(config.reply_publish_retries, 3);
        assert_eq!(config.reply_cache_capacity, 1_024);
        assert_eq!(config.partitions, 4);
        assert_eq!(config.wire_format, WireFormat::Json);
    }

    #[test]
    fn backoff_grows_linearly() {
        let config = RelayConfig::default();
        assert_eq!(config.reply_publish_backoff(1), Duration::from_millis(50));
        assert_eq!(config.reply_publish_backoff(3), Duration::from_millis(150));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RelayConfig::default();
        assert_eq!(config.reply_publish_backoff(20), Duration::from_millis(1_000));
        assert_eq!(config.reply_publish_backoff(u32::MAX), Duration::from_millis(1_000));
    }
}
