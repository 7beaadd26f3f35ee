//! Prometheus metrics for RCS

use crate::protocol::Verb;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Server-wide metrics shared by every interface
pub struct Metrics {
    registry: Registry,

    // Command counters
    pub cmd_set: IntCounter,
    pub cmd_get: IntCounter,
    pub cmd_delete: IntCounter,
    pub cmd_purge: IntCounter,
    pub cmd_length: IntCounter,
    pub cmd_keys: IntCounter,
    pub cmd_ping: IntCounter,
    pub cmd_close: IntCounter,

    // Hit/miss counters
    pub get_hits: IntCounter,
    pub get_misses: IntCounter,

    // Connection metrics
    pub active_connections: IntGauge,
    pub total_connections: IntCounter,

    // Bytes counters
    pub bytes_read: IntCounter,
    pub bytes_written: IntCounter,

    // Latency histograms
    pub cmd_latency: Histogram,

    // Error counters
    pub protocol_errors: IntCounter,
    pub invalid_commands: IntCounter,

    // Expiry
    pub expired_keys_removed: IntCounter,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            let c = IntCounter::new(name, help).expect("static metric definition");
            registry
                .register(Box::new(c.clone()))
                .expect("metric registered once");
            c
        };

        let cmd_set = counter("rcs_cmd_set_total", "Total SET commands");
        let cmd_get = counter("rcs_cmd_get_total", "Total GET commands");
        let cmd_delete = counter("rcs_cmd_delete_total", "Total DELETE commands");
        let cmd_purge = counter("rcs_cmd_purge_total", "Total PURGE commands");
        let cmd_length = counter("rcs_cmd_length_total", "Total LENGTH commands");
        let cmd_keys = counter("rcs_cmd_keys_total", "Total KEYS commands");
        let cmd_ping = counter("rcs_cmd_ping_total", "Total PING commands");
        let cmd_close = counter("rcs_cmd_close_total", "Total CLOSE commands");

        let get_hits = counter("rcs_get_hits_total", "Total GET hits");
        let get_misses = counter("rcs_get_misses_total", "Total GET misses");

        let total_connections = counter("rcs_connections_total", "Total connections accepted");
        let bytes_read = counter("rcs_bytes_read_total", "Total bytes read");
        let bytes_written = counter("rcs_bytes_written_total", "Total bytes written");
        let protocol_errors = counter("rcs_protocol_errors_total", "Total protocol errors");
        let invalid_commands = counter(
            "rcs_invalid_commands_total",
            "Total requests naming an unknown verb",
        );
        let expired_keys_removed = counter(
            "rcs_expired_keys_removed_total",
            "Keys removed by the background expiry sweep",
        );

        let active_connections =
            IntGauge::new("rcs_active_connections", "Current active connections")
                .expect("static metric definition");
        registry
            .register(Box::new(active_connections.clone()))
            .expect("metric registered once");

        let cmd_latency = Histogram::with_opts(
            HistogramOpts::new("rcs_cmd_latency_seconds", "Command latency in seconds").buckets(
                vec![
                    0.000_01, 0.000_05, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5,
                ],
            ),
        )
        .expect("static metric definition");
        registry
            .register(Box::new(cmd_latency.clone()))
            .expect("metric registered once");

        Self {
            registry,
            cmd_set,
            cmd_get,
            cmd_delete,
            cmd_purge,
            cmd_length,
            cmd_keys,
            cmd_ping,
            cmd_close,
            get_hits,
            get_misses,
            active_connections,
            total_connections,
            bytes_read,
            bytes_written,
            cmd_latency,
            protocol_errors,
            invalid_commands,
            expired_keys_removed,
        }
    }

    /// Counter for a given verb
    pub fn command(&self, verb: Verb) -> &IntCounter {
        match verb {
            Verb::Set => &self.cmd_set,
            Verb::Get => &self.cmd_get,
            Verb::Delete => &self.cmd_delete,
            Verb::Purge => &self.cmd_purge,
            Verb::Length => &self.cmd_length,
            Verb::Keys => &self.cmd_keys,
            Verb::Ping => &self.cmd_ping,
            Verb::Close => &self.cmd_close,
        }
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
