//! Inbound message envelope
//!
//! Every payload pushed by the server carries `rt_cd` ("0" on success) and a
//! kind-specific payload field (`output` or `reits_list`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LivingError, LivingResult};
use crate::topic::TopicKind;

/// Result code for a successful response
pub const SUCCESS_CODE: &str = "0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub rt_cd: String,
    #[serde(default)]
    pub msg_cd: Option<String>,
    #[serde(default)]
    pub msg1: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub reits_list: Option<Value>,
}

impl Envelope {
    /// Parse a raw frame body
    pub fn parse(body: &str) -> LivingResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn is_success(&self) -> bool {
        self.rt_cd == SUCCESS_CODE
    }

    /// Extract the payload field for the given topic kind
    ///
    /// Fails on a non-success result code or a missing payload field.
    pub fn into_payload(self, kind: TopicKind) -> LivingResult<Value> {
        if !self.is_success() {
            return Err(LivingError::rejected(
                self.rt_cd,
                self.msg1.unwrap_or_default(),
            ));
        }

        let payload = match kind {
            TopicKind::Market => self.reits_list,
            _ => self.output,
        };

        match payload {
            Some(Value::Null) | None => Err(LivingError::parse(format!(
                "missing payload for {} message",
                kind
            ))),
            Some(value) => Ok(value),
        }
    }
}

/// Body of a server-pushed error notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub msg1: String,
}

impl ServerError {
    pub fn parse(body: &str) -> LivingResult<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_payload() {
        let env = Envelope::parse(r#"{"rt_cd":"0","output":{"stck_prpr":"5000"}}"#).unwrap();
        let payload = env.into_payload(TopicKind::Price).unwrap();
        assert_eq!(payload["stck_prpr"], "5000");
    }

    #[test]
    fn test_market_uses_reits_list() {
        let env = Envelope::parse(r#"{"rt_cd":"0","reits_list":[],"output":{}}"#).unwrap();
        let payload = env.into_payload(TopicKind::Market).unwrap();
        assert!(payload.is_array());
    }

    #[test]
    fn test_rejected_code() {
        let env = Envelope::parse(r#"{"rt_cd":"1","msg1":"bad","output":{}}"#).unwrap();
        let err = env.into_payload(TopicKind::Price).unwrap_err();
        assert_eq!(err, LivingError::rejected("1", "bad"));
    }

    #[test]
    fn test_missing_payload() {
        let env = Envelope::parse(r#"{"rt_cd":"0"}"#).unwrap();
        assert!(matches!(
            env.into_payload(TopicKind::Quote),
            Err(LivingError::Parse(_))
        ));
    }

    #[test]
    fn test_not_json() {
        assert!(Envelope::parse("PONG").is_err());
        assert!(Envelope::parse(r#"{"output":{}}"#).is_err());
    }

    #[test]
    fn test_server_error() {
        let err = ServerError::parse(r#"{"msg1":"market closed"}"#).unwrap();
        assert_eq!(err.msg1, "market closed");
    }
}
