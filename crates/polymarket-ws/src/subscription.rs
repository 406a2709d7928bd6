//! Subscription messages for Polymarket WebSocket endpoints
//!
//! The transport treats these as opaque strings: build one, serialize it with
//! [`to_message`](SubscribeRequest::to_message) and hand it to
//! [`Connection::set_subscription`](crate::Connection::set_subscription),
//! which replays it after every (re)connect.
//!
//! # Source
//! - WSS Overview: https://docs.polymarket.com/developers/CLOB/websocket/wss-overview
//! - WSS Auth: https://docs.polymarket.com/developers/CLOB/websocket/wss-auth
//! - RTDS: https://docs.polymarket.com/developers/RTDS/RTDS-overview

use serde::{Deserialize, Serialize};

/// Channel type for a CLOB subscription
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelType {
    Market,
    User,
}

/// Authentication object for the user channel
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsAuth {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for WsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsAuth")
            .field("api_key", &format!("{}...", &self.api_key.chars().take(8).collect::<String>()))
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

impl WsAuth {
    /// Load L2 credentials from `POLY_API_KEY`, `POLY_API_SECRET` and
    /// `POLY_API_PASSPHRASE`
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("POLY_API_KEY").ok()?;
        let secret = std::env::var("POLY_API_SECRET").ok()?;
        let passphrase = std::env::var("POLY_API_PASSPHRASE").ok()?;

        Some(Self { api_key, secret, passphrase })
    }

    /// All three fields present
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty() && !self.passphrase.is_empty()
    }
}

/// Initial CLOB subscription (the full desired state for the socket)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Required for the user channel only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<WsAuth>,

    /// Condition IDs (user channel)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markets: Option<Vec<String>>,

    /// Token IDs (market channel)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_ids: Option<Vec<String>>,

    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    /// Enables best_bid_ask, new_market and market_resolved events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_feature_enabled: Option<bool>,
}

impl SubscribeRequest {
    pub fn market(asset_ids: Vec<String>, enable_features: bool) -> Self {
        Self {
            auth: None,
            markets: None,
            assets_ids: Some(asset_ids),
            channel_type: ChannelType::Market,
            custom_feature_enabled: if enable_features { Some(true) } else { None },
        }
    }

    pub fn user(auth: WsAuth, markets: Vec<String>) -> Self {
        Self {
            auth: Some(auth),
            markets: Some(markets),
            assets_ids: None,
            channel_type: ChannelType::User,
            custom_feature_enabled: None,
        }
    }

    /// JSON text to hand to the connection
    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Incremental change sent on a live socket with
/// [`Connection::send`](crate::Connection::send). Not replayed on reconnect:
/// callers fold it into their next full [`SubscribeRequest`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_ids: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub markets: Option<Vec<String>>,

    /// "subscribe" or "unsubscribe"
    pub operation: String,
}

impl SubscriptionChange {
    pub fn subscribe_assets(asset_ids: Vec<String>) -> Self {
        Self { assets_ids: Some(asset_ids), markets: None, operation: "subscribe".to_string() }
    }

    pub fn unsubscribe_assets(asset_ids: Vec<String>) -> Self {
        Self { assets_ids: Some(asset_ids), markets: None, operation: "unsubscribe".to_string() }
    }
}

/// One RTDS topic subscription
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RtdsTopic {
    pub topic: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
}

/// RTDS subscribe message
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RtdsSubscribe {
    pub action: String,
    pub subscriptions: Vec<RtdsTopic>,
}

impl RtdsSubscribe {
    /// Subscribe to `topic` for messages of `message_type` (`"*"` for all)
    pub fn topic(topic: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            action: "subscribe".to_string(),
            subscriptions: vec![RtdsTopic {
                topic: topic.into(),
                message_type: message_type.into(),
                filters: None,
            }],
        }
    }

    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_market_subscription() {
        let json = SubscribeRequest::market(vec!["asset1".to_string()], true).to_message().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "MARKET");
        assert_eq!(value["assets_ids"][0], "asset1");
        assert_eq!(value["custom_feature_enabled"], true);
        assert!(value.get("auth").is_none());
    }

    #[test]
    fn test_user_subscription_uses_camel_case_auth() {
        let auth = WsAuth {
            api_key: "key".to_string(),
            secret: "secret".to_string(),
            passphrase: "pass".to_string(),
        };
        let json = SubscribeRequest::user(auth, vec!["market1".to_string()]).to_message().unwrap();
        assert!(json.contains("USER"));
        assert!(json.contains("apiKey"));
        assert!(json.contains("market1"));
    }

    #[test]
    fn test_auth_debug_redacts_secrets() {
        let auth = WsAuth {
            api_key: "test_api_key_12345".to_string(),
            secret: "super_secret".to_string(),
            passphrase: "my_passphrase".to_string(),
        };
        let debug_str = format!("{:?}", auth);
        assert!(!debug_str.contains("super_secret"));
        assert!(!debug_str.contains("my_passphrase"));
        assert!(debug_str.contains("test_api"));
        assert!(auth.is_valid());
    }

    #[test]
    fn test_subscription_change() {
        let change = SubscriptionChange::unsubscribe_assets(vec!["a".to_string()]);
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["operation"], "unsubscribe");
        assert!(value.get("markets").is_none());
    }

    #[test]
    fn test_rtds_subscribe() {
        let json = RtdsSubscribe::topic("crypto_prices", "update").to_message().unwrap();
        assert_eq!(
            json,
            r#"{"action":"subscribe","subscriptions":[{"topic":"crypto_prices","type":"update"}]}"#
        );
    }
}
