//! Error types for the service client.
//!
//! # Design
//! Each failure class gets its own variant so callers can decide whether to
//! retry or abort the surrounding operation — the client itself never does
//! either. `Http` carries the raw status and body, `Rpc` carries the fault
//! object reported by the server (code, message, optional SQL diagnostic),
//! and `Rest` keeps the raw response body for debugging malformed payloads.

use serde::Deserialize;

/// Errors surfaced by the session, RPC, and REST layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced a usable response (DNS, connect, TLS,
    /// or a body read that failed mid-transfer).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a status other than canonical 200 OK.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A JSON body was required but the response declared another type.
    #[error("wrong content type: {observed}")]
    ContentType { observed: String },

    /// The JSON-RPC reply violated the protocol (id mismatch, malformed
    /// reply shape, non-array batch reply, missing batch reply).
    #[error("{0}")]
    Protocol(String),

    /// An application-level fault reported inside a JSON-RPC reply.
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(RpcFault),

    /// A REST response body that could not be interpreted; keeps the raw
    /// body for diagnostics.
    #[error("rest error: {message}")]
    Rest { message: String, body: String },

    /// A request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialize(String),

    /// A response payload did not deserialize into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

impl Error {
    /// Best-effort copy used to reject every pending batch call with the
    /// same commit failure. Variants owning non-clonable state (transport
    /// errors) degrade to `Protocol` with the rendered message.
    pub(crate) fn replicate(&self) -> Error {
        match self {
            Error::Http { status, body } => Error::Http {
                status: *status,
                body: body.clone(),
            },
            Error::ContentType { observed } => Error::ContentType {
                observed: observed.clone(),
            },
            Error::Protocol(message) => Error::Protocol(message.clone()),
            Error::Rpc(fault) => Error::Rpc(fault.clone()),
            Error::Rest { message, body } => Error::Rest {
                message: message.clone(),
                body: body.clone(),
            },
            Error::Serialize(message) => Error::Serialize(message.clone()),
            Error::Deserialize(message) => Error::Deserialize(message.clone()),
            other => Error::Protocol(format!("batch commit failed: {other}")),
        }
    }
}

/// The `error` member of a JSON-RPC reply.
///
/// A missing `code` defaults to -1, matching what the backend omits on
/// generic faults. `sql` is a backend-specific diagnostic and rarely present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcFault {
    #[serde(default = "fault_code_default")]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sql: Option<String>,
}

fn fault_code_default() -> i64 {
    -1
}
