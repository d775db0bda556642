//! Messages exchanged between host and worker.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{PolicyConfig, WorkItem, WorkResult};

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NetworkMessage {
    /// Worker opens the handshake
    Hello {
        password_hash: String,
        client_id: Option<String>,
    },
    /// Host accepted the worker under this identity
    Welcome { client_id: String },
    /// Host refused the handshake
    Rejected { reason: String },
    /// Liveness probe
    StatusCheck,
    /// Orderly shutdown of the connection
    Disconnect,
    /// Admission and content rules the worker must apply
    ConfigUpdate(PolicyConfig),
    /// Maximum items the worker may hold
    WorkLimitUpdate(usize),
    /// Leased items for the worker
    Work(Vec<WorkItem>),
    /// Worker asks for more work
    WorkRequest,
    /// Worker finished one item
    WorkResult(WorkResult),
}

impl NetworkMessage {
    /// Short name for logs; never includes the payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::Welcome { .. } => "Welcome",
            Self::Rejected { .. } => "Rejected",
            Self::StatusCheck => "StatusCheck",
            Self::Disconnect => "Disconnect",
            Self::ConfigUpdate(_) => "ConfigUpdate",
            Self::WorkLimitUpdate(_) => "WorkLimitUpdate",
            Self::Work(_) => "Work",
            Self::WorkRequest => "WorkRequest",
            Self::WorkResult(_) => "WorkResult",
        }
    }

    pub fn is_status_check(&self) -> bool {
        matches!(self, Self::StatusCheck)
    }

    /// Configuration messages are delivered even before a connection settles.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ConfigUpdate(_) | Self::WorkLimitUpdate(_))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| AppError::protocol(format!("undecodable message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkSource;

    #[test]
    fn test_unit_variant_wire_shape() {
        let bytes = NetworkMessage::StatusCheck.encode().unwrap();
        assert_eq!(bytes, br#"{"type":"status_check"}"#);
    }

    #[test]
    fn test_work_message_decodes() {
        let json = br#"{"type":"work","data":[{"url":"http://a.com/","depth":1,"source":"discovered"}]}"#;
        let message = NetworkMessage::decode(json).unwrap();
        assert_eq!(
            message,
            NetworkMessage::Work(vec![WorkItem::new("http://a.com/", 1, WorkSource::Discovered)])
        );
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = NetworkMessage::decode(br#"{"type":"launch_missiles"}"#).unwrap_err();
        assert!(matches!(err, AppError::Protocol(_)));
    }

    #[test]
    fn test_kind_hides_payload() {
        let hello = NetworkMessage::Hello {
            password_hash: "secret-hash".to_string(),
            client_id: None,
        };
        assert_eq!(hello.kind(), "Hello");
        assert!(NetworkMessage::WorkLimitUpdate(5).is_configuration());
        assert!(!NetworkMessage::WorkRequest.is_configuration());
    }
}
