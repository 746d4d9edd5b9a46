//! Player settings
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Client name registered with the MIDI system
    pub client_name: String,
    /// Case-insensitive part of the output port name; first port if unset
    pub port: Option<String>,
    /// Messages the transport can hold before writes block
    pub buffer_size: usize,
    /// Added to every timestamp before delivery
    pub latency_ms: u64,
    pub poll_interval: Duration,
    /// Extra time to keep the transport open after the last event
    pub drain: Duration,
}

impl PlayerConfig {
    pub fn new() -> Self {
        Self {
            client_name: "seqplay".to_string(),
            port: None,
            buffer_size: 256,
            latency_ms: 100,
            poll_interval: Duration::from_millis(1),
            drain: Duration::from_secs(1),
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.drain = drain;
        self
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self::new()
    }
}
