//! Wire types for the two relay surfaces: the push channel the tab agent
//! opens toward the server, and the request/result HTTP surface controllers
//! poll. Every push-channel message carries a `type` discriminator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata the tab agent reports about itself and the page it lives in.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Install kind, e.g. "extension" or "userscript".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Messages pushed from the tab agent to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TabMessage {
    /// Outcome of a previously dispatched `execute`, matched by request id.
    Result {
        request_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    BrowserInfo(BrowserInfo),
    /// Keepalive. Answered with `pong`; never counts as routing traffic.
    Ping,
    /// Out-of-band tab event, queued for the next controller poll.
    RefocusNotification {
        success: bool,
        #[serde(default)]
        message: String,
    },
    /// The tab asks the server to synthesize a fresh initialization payload
    /// after navigation wiped its in-page state.
    ReinitControl {
        #[serde(default)]
        config: Value,
    },
}

/// Messages pushed from the relay to the tab agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Execute { request_id: String, code: String },
    Pong,
}

/// Queued out-of-band tab event, drained by `GET /notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub success: bool,
    pub message: String,
    pub timestamp_ms: i64,
}

/// Body of `POST /run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub code: String,
}

/// Response to `GET /result`. `status` is set while the outcome is not yet a
/// completed result: "pending" or "no_browser".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Response to `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPayload {
    pub ok: bool,
    pub timestamp: i64,
    pub connected_browsers: usize,
    pub pending: usize,
    pub completed: usize,
    #[serde(default)]
    pub browsers: Vec<BrowserInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_wire_shape() {
        let msg = ServerMessage::Execute {
            request_id: "abc".to_string(),
            code: "1+1".to_string(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v, json!({"type": "execute", "request_id": "abc", "code": "1+1"}));
    }

    #[test]
    fn test_pong_wire_shape() {
        let v = serde_json::to_value(&ServerMessage::Pong).unwrap();
        assert_eq!(v, json!({"type": "pong"}));
    }

    #[test]
    fn test_result_message_parses() {
        let raw = r#"{"type":"result","request_id":"r1","ok":true,"result":2,"url":"https://x.test","title":"X"}"#;
        let msg: TabMessage = serde_json::from_str(raw).unwrap();
        match msg {
            TabMessage::Result { request_id, ok, result, error, .. } => {
                assert_eq!(request_id, "r1");
                assert!(ok);
                assert_eq!(result, Some(json!(2)));
                assert!(error.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_browser_info_camel_case() {
        let raw = r#"{"type":"browser_info","userAgent":"Mozilla/5.0","browserName":"Chrome","version":"0.1.0","kind":"extension"}"#;
        let msg: TabMessage = serde_json::from_str(raw).unwrap();
        match msg {
            TabMessage::BrowserInfo(info) => {
                assert_eq!(info.user_agent.as_deref(), Some("Mozilla/5.0"));
                assert_eq!(info.browser_name.as_deref(), Some("Chrome"));
                assert_eq!(info.kind.as_deref(), Some("extension"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_ping_parses_with_empty_body() {
        let msg: TabMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, TabMessage::Ping));
    }

    #[test]
    fn test_refocus_notification_parses() {
        let raw = r#"{"type":"refocus_notification","success":true,"message":"focus restored"}"#;
        let msg: TabMessage = serde_json::from_str(raw).unwrap();
        match msg {
            TabMessage::RefocusNotification { success, message } => {
                assert!(success);
                assert_eq!(message, "focus restored");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
