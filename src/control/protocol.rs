//! Control protocol carried in-band on a worker channel.
//!
//! A worker asks its owner for the session secret and the owner answers on the
//! same channel:
//! ```text
//! Worker → Owner: {"type": "control_secret_request", "request_id": 7}
//! Owner → Worker: {"type": "control_secret_response", "value": "tok123", "request_id": 7}
//! ```
//! `request_id` is an opaque token echoed back verbatim, or `null` when the
//! request carried none. `value` is `null` when no secret is stored.

use serde::Deserialize;
use serde_json::Value;

/// Discriminant of a secret request
pub const SECRET_REQUEST_TYPE: &str = "control_secret_request";

/// Discriminant of a secret response
pub const SECRET_RESPONSE_TYPE: &str = "control_secret_response";

/// Store key the secret is kept under
pub const SECRET_KEY: &str = "control_secret";

const REQUEST_SUFFIX: &str = "_request";
const RESPONSE_SUFFIX: &str = "_response";

/// A control message recognised on the channel
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    /// Ask for the session secret
    Secret { request_id: Option<Value> },
}

impl ControlRequest {
    pub fn discriminant(&self) -> &'static str {
        match self {
            ControlRequest::Secret { .. } => SECRET_REQUEST_TYPE,
        }
    }

    /// Correlation token to echo, `null` when absent
    pub fn correlation(&self) -> Value {
        match self {
            ControlRequest::Secret { request_id } => request_id.clone().unwrap_or(Value::Null),
        }
    }

    /// Encode as it travels on the channel
    pub fn to_message(&self) -> Value {
        let mut message = serde_json::Map::new();
        message.insert("type".to_string(), Value::from(self.discriminant()));
        match self {
            ControlRequest::Secret {
                request_id: Some(request_id),
            } => {
                message.insert("request_id".to_string(), request_id.clone());
            }
            ControlRequest::Secret { request_id: None } => {}
        }
        Value::Object(message)
    }
}

/// Response discriminant paired with a request discriminant
pub fn response_type(request_type: &str) -> String {
    match request_type.strip_suffix(REQUEST_SUFFIX) {
        Some(base) => format!("{}{}", base, RESPONSE_SUFFIX),
        None => format!("{}{}", request_type, RESPONSE_SUFFIX),
    }
}

/// Reply to a [`ControlRequest::Secret`]
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SecretReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Option<String>,
    pub request_id: Value,
}

impl SecretReply {
    pub fn answering(request: &ControlRequest, value: Option<String>) -> Self {
        Self {
            kind: response_type(request.discriminant()),
            value,
            request_id: request.correlation(),
        }
    }

    pub fn to_message(&self) -> Value {
        serde_json::json!({
            "type": self.kind,
            "value": self.value,
            "request_id": self.request_id,
        })
    }

    /// Decode a channel message if it is a secret reply
    pub fn from_message(message: &Value) -> Option<Self> {
        if message.get("type").and_then(Value::as_str) != Some(SECRET_RESPONSE_TYPE) {
            return None;
        }
        serde_json::from_value(message.clone()).ok()
    }
}

/// Classification of an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ControlRequest),
    Ordinary,
}

/// Sort an inbound payload into control or ordinary traffic.
///
/// Anything that is not an object with the exact request discriminant is
/// ordinary, including objects with a non-string `type`.
pub fn classify(message: &Value) -> Inbound {
    let Some(object) = message.as_object() else {
        return Inbound::Ordinary;
    };

    match object.get("type").and_then(Value::as_str) {
        Some(SECRET_REQUEST_TYPE) => Inbound::Control(ControlRequest::Secret {
            request_id: object.get("request_id").filter(|id| !id.is_null()).cloned(),
        }),
        _ => Inbound::Ordinary,
    }
}
