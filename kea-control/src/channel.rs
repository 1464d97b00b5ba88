//! The control-channel contract shared by every Kea transport.
//!
//! A control channel sends one command and returns the decoded command
//! responses. HTTP endpoints answer with an array (one entry per targeted
//! service); the local UNIX socket answers with a single object. Both shapes
//! decode to a `Vec<CommandResponse>`.

use async_trait::async_trait;
use kea_common::Module;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ControlError, ProtocolError};

/// A Kea management command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRequest {
    /// Command name, e.g. `statistic-get-all`.
    pub command: String,

    /// Target service names. Omitted when empty.
    #[serde(rename = "service", skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,

    /// Command arguments. Omitted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            services: Vec::new(),
            arguments: None,
        }
    }

    /// Target the given modules, using their wire service names.
    pub fn with_services(mut self, modules: &[Module]) -> Self {
        self.services = modules.iter().map(|m| m.service_name().to_string()).collect();
        self
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// The same command without service routing.
    ///
    /// A local control socket belongs to exactly one daemon and rejects the
    /// `service` field.
    pub fn without_services(&self) -> Self {
        Self {
            command: self.command.clone(),
            services: Vec::new(),
            arguments: self.arguments.clone(),
        }
    }
}

/// One entry of a Kea command response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandResponse {
    /// Zero on success.
    pub result: i64,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub arguments: Option<Value>,
}

impl CommandResponse {
    /// Fail with [`ProtocolError::NonZeroResult`] unless `result` is zero.
    pub fn check(&self) -> Result<(), ProtocolError> {
        if self.result == 0 {
            Ok(())
        } else {
            Err(ProtocolError::NonZeroResult {
                code: self.result,
                text: self.text.clone().unwrap_or_default(),
            })
        }
    }

    /// The `arguments` member as a JSON object.
    pub fn arguments_object(&self) -> Result<&Map<String, Value>, ProtocolError> {
        match &self.arguments {
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(ProtocolError::UnexpectedShape(format!(
                "arguments is not an object: {}",
                json_kind(other)
            ))),
            None => Err(ProtocolError::UnexpectedShape(
                "response has no arguments".to_string(),
            )),
        }
    }
}

/// Decode a raw response body into command responses.
///
/// Accepts either an array of responses or a single response object.
pub fn decode_responses(body: &[u8]) -> Result<Vec<CommandResponse>, ProtocolError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ProtocolError::MalformedResponse(e.to_string()))?;

    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|e| ProtocolError::MalformedResponse(e.to_string()))
            })
            .collect(),
        Value::Object(_) => serde_json::from_value(value)
            .map(|r| vec![r])
            .map_err(|e| ProtocolError::MalformedResponse(e.to_string())),
        other => Err(ProtocolError::UnexpectedShape(format!(
            "expected an array or object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A connection to one Kea endpoint.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Stable identity used as the `server` label. Never contains credentials.
    fn identity(&self) -> &str;

    /// Check that the endpoint is reachable before first use.
    async fn connect(&self) -> Result<(), ControlError> {
        Ok(())
    }

    /// Send a command and decode the responses without inspecting `result`.
    async fn exchange(&self, request: &CommandRequest)
    -> Result<Vec<CommandResponse>, ControlError>;

    /// Send a command, failing if any response carries a non-zero `result`.
    async fn send_command(
        &self,
        request: &CommandRequest,
    ) -> Result<Vec<CommandResponse>, ControlError> {
        let responses = self.exchange(request).await?;
        if responses.is_empty() {
            return Err(ProtocolError::UnexpectedShape("empty response".to_string()).into());
        }
        for response in &responses {
            response.check()?;
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = CommandRequest::new("statistic-get-all")
            .with_services(&[Module::Dhcp4, Module::Ddns])
            .with_arguments(json!({}));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "command": "statistic-get-all",
                "service": ["dhcp4", "d2"],
                "arguments": {}
            })
        );
    }

    #[test]
    fn test_request_without_services() {
        let request = CommandRequest::new("config-get").with_services(&[Module::Dhcp6]);
        let value = serde_json::to_value(request.without_services()).unwrap();
        assert_eq!(value, json!({ "command": "config-get" }));
    }

    #[test]
    fn test_decode_array() {
        let body = br#"[{"result": 0, "arguments": {"a": 1}}, {"result": 1, "text": "down"}]"#;
        let responses = decode_responses(body).unwrap();
        assert_eq!(responses.len(), 2);
        assert!(responses[0].check().is_ok());
        assert!(matches!(
            responses[1].check(),
            Err(ProtocolError::NonZeroResult { code: 1, .. })
        ));
    }

    #[test]
    fn test_decode_single_object() {
        let body = br#"{"result": 0, "text": "ok", "arguments": {}}"#;
        let responses = decode_responses(body).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].text.as_deref(), Some("ok"));
        assert!(responses[0].arguments_object().unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_responses(b"not json"),
            Err(ProtocolError::MalformedResponse(_))
        ));
        assert!(matches!(
            decode_responses(b"42"),
            Err(ProtocolError::UnexpectedShape(_))
        ));
        assert!(matches!(
            decode_responses(br#"[{"text": "no result"}]"#),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_missing_arguments() {
        let response = CommandResponse {
            result: 0,
            text: None,
            arguments: None,
        };
        assert!(matches!(
            response.arguments_object(),
            Err(ProtocolError::UnexpectedShape(_))
        ));
    }
}
