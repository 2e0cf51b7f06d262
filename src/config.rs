//! Configuration for the H5 transport

use crate::error::{H5Error, Result};
use std::time::Duration;

/// H5 transport configuration.
///
/// Only the retransmission interval is tunable; the remaining protocol
/// timings (retry count, negotiation timeout, open wait, reset wait) are
/// fixed by the Three-Wire profile and live in
/// [`constants`](crate::common::constants).
#[derive(Debug, Clone)]
pub struct H5Config {
    /// How long a reliable packet waits for its acknowledgement before it
    /// is retransmitted.
    pub retransmission_interval: Duration,
}

impl Default for H5Config {
    fn default() -> Self {
        Self {
            retransmission_interval: Duration::from_millis(250),
        }
    }
}

impl H5Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reliable-packet retransmission interval
    pub fn retransmission_interval(mut self, interval: Duration) -> Self {
        self.retransmission_interval = interval;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.retransmission_interval.is_zero() {
            return Err(H5Error::config(
                "retransmission interval must be greater than 0",
            ));
        }

        Ok(())
    }
}
