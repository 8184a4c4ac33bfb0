//! Handshake JSON bodies

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use pn_core::config::ClientConfig;

/// Client -> server handshake body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub sys: ClientSys,
    pub user: Map<String, Value>,
}

/// Identification of this client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSys {
    #[serde(rename = "type")]
    pub client_type: String,
    pub version: String,
}

impl HandshakeRequest {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            sys: ClientSys {
                client_type: config.client_type.clone(),
                version: config.client_version.clone(),
            },
            user: config.handshake_user.clone(),
        }
    }
}

/// Server -> client handshake body
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandshakeResponse {
    pub code: i64,
    /// Absent and `null` both mean no session parameters
    #[serde(default)]
    pub sys: Option<ServerSys>,
    #[serde(default)]
    pub user: Value,
}

/// Session parameters chosen by the server
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSys {
    /// Heartbeat interval in seconds; absent or zero disables heartbeats
    pub heartbeat: Option<f64>,
    /// Route compression dictionary
    pub dict: Option<HashMap<String, u64>>,
    /// Payload schemas, `{client, server}`
    pub protos: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let mut config = ClientConfig::default();
        config.client_type = "js-websocket".to_string();
        config.client_version = "0.0.1".to_string();

        let body = serde_json::to_value(HandshakeRequest::from_config(&config)).unwrap();
        assert_eq!(
            body,
            json!({"sys": {"type": "js-websocket", "version": "0.0.1"}, "user": {}})
        );
    }

    #[test]
    fn test_response_minimal() {
        let resp: HandshakeResponse = serde_json::from_value(json!({"code": 501})).unwrap();
        assert_eq!(resp.code, 501);
        assert_eq!(resp.sys, None);
        assert_eq!(resp.user, Value::Null);
    }

    #[test]
    fn test_response_null_sys() {
        let resp: HandshakeResponse =
            serde_json::from_value(json!({"code": 200, "sys": null, "user": null})).unwrap();
        assert_eq!(resp.code, 200);
        assert_eq!(resp.sys.unwrap_or_default(), ServerSys::default());
    }

    #[test]
    fn test_response_full() {
        let resp: HandshakeResponse = serde_json::from_value(json!({
            "code": 200,
            "sys": {"heartbeat": 5, "dict": {"chat.say": 1}, "protos": {"client": {}, "server": {}}},
            "user": {"id": 7}
        }))
        .unwrap();
        let sys = resp.sys.unwrap();
        assert_eq!(sys.heartbeat, Some(5.0));
        assert_eq!(sys.dict.unwrap()["chat.say"], 1);
        assert!(sys.protos.is_some());
        assert_eq!(resp.user, json!({"id": 7}));
    }
}
