//! Inbound messages from the sandbox.
//!
//! Every callback the generated scripts make lands here as one JSON object
//! tagged by `kind`.

use serde::{Deserialize, Serialize};
use viewer_types::RawValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InboundMessage {
    /// A correlated call completed.
    Result {
        target: String,
        key: String,
        #[serde(default)]
        value: RawValue,
    },
    /// A correlated call failed because the requested resource is missing.
    NotFound {
        target: String,
        key: String,
        #[serde(default)]
        message: String,
    },
    /// An event fired on a target.
    Event {
        target: String,
        event: String,
        #[serde(default)]
        payload: RawValue,
    },
}

impl InboundMessage {
    pub fn result(target: impl Into<String>, key: impl Into<String>, value: RawValue) -> Self {
        InboundMessage::Result {
            target: target.into(),
            key: key.into(),
            value,
        }
    }

    pub fn not_found(
        target: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        InboundMessage::NotFound {
            target: target.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn event(target: impl Into<String>, event: impl Into<String>, payload: RawValue) -> Self {
        InboundMessage::Event {
            target: target.into(),
            event: event.into(),
            payload,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            InboundMessage::Result { target, .. }
            | InboundMessage::NotFound { target, .. }
            | InboundMessage::Event { target, .. } => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_each_kind() {
        let result: InboundMessage = serde_json::from_str(
            r#"{"kind":"result","target":"V1","key":"GetId0","value":"abc"}"#,
        )
        .unwrap();
        assert_eq!(result, InboundMessage::result("V1", "GetId0", json!("abc")));

        let not_found: InboundMessage = serde_json::from_str(
            r#"{"kind":"notFound","target":"V1","key":"OpenByAddress3","message":"no match"}"#,
        )
        .unwrap();
        assert_eq!(
            not_found,
            InboundMessage::not_found("V1", "OpenByAddress3", "no match")
        );

        let event: InboundMessage = serde_json::from_str(
            r#"{"kind":"event","target":"V1","event":"VIEW_CHANGE","payload":{"detail":{"yaw":3}}}"#,
        )
        .unwrap();
        assert_eq!(event.target(), "V1");
        assert_eq!(
            event,
            InboundMessage::event("V1", "VIEW_CHANGE", json!({"detail": {"yaw": 3}}))
        );
    }

    #[test]
    fn test_missing_value_is_null() {
        let message: InboundMessage =
            serde_json::from_str(r#"{"kind":"result","target":"V1","key":"GetId0"}"#).unwrap();
        assert_eq!(message, InboundMessage::result("V1", "GetId0", RawValue::Null));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(serde_json::from_str::<InboundMessage>(r#"{"kind":"ping"}"#).is_err());
    }
}
