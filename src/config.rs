//! Tunables for the session coordinator and the session client.
//!
//! Every field has a sensible LAN default,
//! so `Default::default()` is a working configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Session coordinator settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to. The port is always ephemeral.
    pub bind_addr: IpAddr,
    /// Pause between a reveal and the next question in automatic mode.
    pub grace_interval: Duration,
    /// How often each connection is pinged.
    pub ping_interval: Duration,
    /// A connection that stays silent this long is torn down.
    pub idle_timeout: Duration,
    /// Time given to queued frames on shutdown before connections are dropped.
    pub shutdown_flush: Duration,
    /// How long a player who disconnects mid-game keeps their roster slot.
    /// `None` keeps them until the game ends or is cancelled.
    pub reconnect_window: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            grace_interval: Duration::from_millis(1500),
            ping_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(30),
            shutdown_flush: Duration::from_millis(500),
            reconnect_window: None,
        }
    }
}

/// Session client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnect delay is `backoff_step * attempt`.
    pub backoff_step: Duration,
    /// Upper bound for `attempt` in the backoff formula.
    pub max_backoff_multiplier: u32,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl ClientConfig {
    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt.clamp(1, self.max_backoff_multiplier.max(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff_step: Duration::from_millis(400),
            max_backoff_multiplier: 8,
            ping_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(30),
        }
    }
}
