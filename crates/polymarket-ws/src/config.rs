//! Connection configuration
//!
//! Immutable once handed to a [`Connection`](crate::Connection). Built from a
//! preset, a URL, or host + resource, then tuned with the `with_*` methods.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::{CLOB_WSS_ENDPOINT, CLOB_WSS_USER_ENDPOINT, RTDS_WSS_ENDPOINT};

/// Initial reconnection backoff interval
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum reconnection backoff interval
const MAX_BACKOFF_SECS: u64 = 60;

/// Default keepalive ping interval
const PING_INTERVAL_SECS: u64 = 30;

/// RTDS expects pings far more often than the CLOB channels
const RTDS_PING_INTERVAL_SECS: u64 = 5;

/// Outward channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    /// Default 443
    pub port: u16,
    /// Request target for the upgrade, e.g. `/ws/market`
    pub resource: String,
    /// Wrap the TCP stream in TLS (`wss://`)
    pub tls: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub ping_interval: Duration,
    /// Longest wait for a single inbound frame before the session is dropped
    pub read_timeout: Duration,
    /// Bound on TCP/TLS connect plus handshake
    pub connect_timeout: Duration,
    /// Largest accepted inbound payload
    pub max_frame_size: usize,
    /// Capacity of the outward payload channel
    pub channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            resource: "/".to_string(),
            tls: true,
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            read_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    /// TLS endpoint on port 443
    pub fn new(host: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { host: host.into(), resource: normalize_resource(resource.into()), ..Self::default() }
    }

    /// Parse a `ws://` or `wss://` URL. Query strings stay part of the resource.
    pub fn from_url(endpoint: &str) -> Result<Self> {
        let url =
            Url::parse(endpoint).map_err(|e| Error::InvalidUrl(format!("{}: {}", endpoint, e)))?;

        let tls = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => return Err(Error::InvalidUrl(format!("unsupported scheme: {}", other))),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidUrl(format!("missing host: {}", endpoint)))?
            .to_string();

        let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });

        let mut resource = url.path().to_string();
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }

        Ok(Self { host, port, tls, resource: normalize_resource(resource), ..Self::default() })
    }

    /// CLOB market channel (public)
    pub fn market() -> Self {
        Self::from_url(CLOB_WSS_ENDPOINT)
            .unwrap_or_else(|_| Self::new("ws-subscriptions-clob.polymarket.com", "/ws/market"))
    }

    /// CLOB user channel (authenticated via the subscription message)
    pub fn user() -> Self {
        Self::from_url(CLOB_WSS_USER_ENDPOINT)
            .unwrap_or_else(|_| Self::new("ws-subscriptions-clob.polymarket.com", "/ws/user"))
    }

    /// Real-Time Data Stream, pinged every 5 seconds
    pub fn rtds() -> Self {
        Self::from_url(RTDS_WSS_ENDPOINT)
            .unwrap_or_else(|_| Self::new("ws-live-data.polymarket.com", "/"))
            .with_ping_interval(Duration::from_secs(RTDS_PING_INTERVAL_SECS))
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Clamped to at least 1
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// `wss://host[:port]/resource`, for logging
    pub fn endpoint(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            format!("{}://{}{}", scheme, self.host, self.resource)
        } else {
            format!("{}://{}:{}{}", scheme, self.host, self.port, self.resource)
        }
    }
}

fn normalize_resource(resource: String) -> String {
    if resource.starts_with('/') {
        resource
    } else {
        format!("/{}", resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("example.com", "ws");
        assert_eq!(config.port, 443);
        assert_eq!(config.resource, "/ws");
        assert!(config.tls);
        assert_eq!(config.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.channel_capacity, 1000);
    }

    #[test]
    fn test_presets() {
        let market = ConnectionConfig::market();
        assert_eq!(market.host, "ws-subscriptions-clob.polymarket.com");
        assert_eq!(market.resource, "/ws/market");
        assert_eq!(market.port, 443);

        assert_eq!(ConnectionConfig::user().resource, "/ws/user");

        let rtds = ConnectionConfig::rtds();
        assert_eq!(rtds.host, "ws-live-data.polymarket.com");
        assert_eq!(rtds.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_from_url_plain_with_port_and_query() {
        let config = ConnectionConfig::from_url("ws://127.0.0.1:9001/feed?x=1").unwrap();
        assert!(!config.tls);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9001);
        assert_eq!(config.resource, "/feed?x=1");
        assert_eq!(config.endpoint(), "ws://127.0.0.1:9001/feed?x=1");
    }

    #[test]
    fn test_from_url_rejects_http() {
        let err = ConnectionConfig::from_url("https://clob.polymarket.com").unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert!(ConnectionConfig::from_url("not a url").is_err());
    }

    #[test]
    fn test_channel_capacity_clamped() {
        let config = ConnectionConfig::market().with_channel_capacity(0);
        assert_eq!(config.channel_capacity, 1);
    }
}
