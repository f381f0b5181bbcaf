//! Request and reply envelopes carried as encrypted event content.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{RpcError, INVALID_JSON, MISSING_METHOD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outbound request: `{method, params, id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    pub id: Value,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

impl RpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, id: CorrelationId) -> Self {
        Self {
            method: method.into(),
            params: normalize_params(params),
            id: id.into(),
        }
    }

    /// Parse a decrypted payload the way the server sees it.
    ///
    /// Returns the reply text and the id to echo when the payload is not a
    /// usable request.
    pub fn parse(payload: &str) -> Result<Self, (RpcError, Value)> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|_| (RpcError::MalformedRequest(INVALID_JSON.into()), Value::Null))?;

        let Value::Object(mut fields) = value else {
            return Err((RpcError::MalformedRequest(MISSING_METHOD.into()), Value::Null));
        };

        let method = match fields.remove("method") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(name)) if name.is_empty() => None,
            Some(Value::String(name)) => Some(name),
            Some(other) => Some(other.to_string()),
        };
        let Some(method) = method else {
            return Err((RpcError::MalformedRequest(MISSING_METHOD.into()), Value::Null));
        };

        let params = fields.remove("params").unwrap_or(Value::Null);
        Ok(Self {
            method,
            params: normalize_params(params),
            id: fields.remove("id").unwrap_or(Value::Null),
        })
    }
}

fn normalize_params(params: Value) -> Value {
    if params.is_null() {
        empty_params()
    } else {
        params
    }
}

/// Reply: `{id, result, error}`; exactly one of `result`/`error` is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl RpcResponse {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Value, error: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error.into()),
        }
    }

    /// The error text, if the reply reports one. Empty text counts as none.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|msg| !msg.is_empty())
    }

    /// Convert into the caller-facing outcome.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error_message() {
            Some(msg) => Err(RpcError::RemoteError(msg.to_string())),
            None => Ok(self.result),
        }
    }
}
