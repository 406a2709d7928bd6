//! Polymarket WebSocket transport
//!
//! A self-contained RFC 6455 client built for Polymarket's streaming
//! endpoints:
//! - `frame`: frame codec (encode with client masking, decode from a stream)
//! - `handshake`: HTTP/1.1 Upgrade with `Sec-WebSocket-Accept` verification
//! - `transport`: TCP / TLS connectors behind a `Transport` trait object
//! - `connection`: reconnecting connection with keepalive pings, exponential
//!   backoff, automatic resubscription and a bounded outward channel
//! - `subscription`: CLOB / RTDS subscription message builders
//!
//! # Usage
//! ```no_run
//! use polymarket_ws::{Connection, ConnectionConfig, SubscribeRequest};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Connection::new(ConnectionConfig::market())?;
//! conn.set_subscription(SubscribeRequest::market(vec!["<token_id>".into()], true).to_message()?);
//! let mut stream = conn.stream().expect("stream taken once");
//! conn.start();
//!
//! while let Some(payload) = stream.recv().await {
//!     println!("{}", payload);
//! }
//! conn.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Official Documentation
//! - WSS Overview: https://docs.polymarket.com/developers/CLOB/websocket/wss-overview
//! - Market Channel: https://docs.polymarket.com/developers/CLOB/websocket/market-channel
//! - User Channel: https://docs.polymarket.com/developers/CLOB/websocket/user-channel

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod subscription;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{Error, HandshakeError, Result};
pub use frame::{CloseCode, Frame, Opcode};
pub use subscription::{RtdsSubscribe, SubscribeRequest, SubscriptionChange, WsAuth};

/// Official CLOB WebSocket endpoint for the Market Channel
/// Source: https://docs.polymarket.com/developers/CLOB/websocket/market-channel
pub const CLOB_WSS_ENDPOINT: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Official CLOB WebSocket endpoint for the User Channel
/// Source: https://docs.polymarket.com/developers/CLOB/websocket/user-channel
pub const CLOB_WSS_USER_ENDPOINT: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/user";

/// Official Real-Time Data Stream endpoint
/// Source: https://docs.polymarket.com/quickstart/reference/endpoints
pub const RTDS_WSS_ENDPOINT: &str = "wss://ws-live-data.polymarket.com";
