//! JSON-RPC 2.0 layer: single calls, batched calls, and the SMD document.
//!
//! # Design
//! `RpcClient` owns its correlation id counter — an `AtomicU64` per instance,
//! never a process-wide global — so id sequences are independent between
//! clients and testable in isolation. Replies are modelled as a tagged
//! `Outcome` (`result` or `error`) instead of shape-checking JSON at every
//! call site. `RpcBatch` accumulates envelopes with batch-local ids starting
//! at 1 and fans the single reply array back out to per-call oneshot
//! channels; `commit(&mut self)` is exclusive by construction, so enqueueing
//! during an in-flight commit is rejected at compile time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, RpcFault};
use crate::response::{fetch_as_json, fetch_response};
use crate::session::Session;

const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request envelope. Built per call, discarded after send.
#[derive(Debug, Serialize)]
struct Envelope {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: Vec<Value>,
}

impl Envelope {
    fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC reply: echoed id plus either a result or a fault.
#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(deserialize_with = "id_from_wire")]
    id: u64,
    #[serde(flatten)]
    outcome: Outcome,
}

/// Tagged reply payload. `error` is tried first so a reply carrying both
/// members (which the protocol forbids) surfaces as the fault.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Outcome {
    Fault { error: RpcFault },
    Success { result: Value },
}

/// Accept the id as a JSON number or a numeric string; some backends quote
/// it in batch replies.
fn id_from_wire<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    struct IdVisitor;

    impl serde::de::Visitor<'_> for IdVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a non-negative integer or numeric string")
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("negative jsonrpc id"))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

/// Unwrap a single-call reply: validate the echoed id, then surface the
/// result or the server-reported fault.
fn unwrap_reply(raw: Value, id: u64, method: &str) -> Result<Value, Error> {
    let reply: Reply = serde_json::from_value(raw)
        .map_err(|_| Error::Protocol(format!("malformed jsonrpc reply for method {method}")))?;
    if reply.id != id {
        tracing::warn!(%method, sent = id, received = reply.id, "jsonrpc id mismatch");
        return Err(Error::Protocol(format!(
            "jsonrpc sequence mismatch in method {method}"
        )));
    }
    match reply.outcome {
        Outcome::Fault { error } => Err(Error::Rpc(error)),
        Outcome::Success { result } => Ok(result),
    }
}

/// Single-call JSON-RPC client over a shared session.
pub struct RpcClient {
    sess: Arc<Session>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(sess: Arc<Session>) -> Self {
        Self {
            sess,
            next_id: AtomicU64::new(0),
        }
    }

    /// Call `method` with positional `params` and deserialize the result.
    ///
    /// # Errors
    /// `Error::Rpc` for a server-reported fault, `Error::Protocol` when the
    /// reply id does not match the sent id or the reply carries neither
    /// result nor error, plus the shared transport/HTTP/content-type errors.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::new(id, method, params);
        tracing::debug!(%method, id, "rpc call");

        let response = self
            .sess
            .request(Method::POST, &self.sess.rpc_url_get())
            .json(&envelope)
            .send()
            .await?;
        let response = fetch_response(&self.sess, response).await?;
        let raw = fetch_as_json(response).await?;

        let result = unwrap_reply(raw, id, method)?;
        serde_json::from_value(result).map_err(|e| Error::Deserialize(e.to_string()))
    }

    /// Fetch the service-method-description document: a map from method name
    /// to its parameter list and return type.
    pub async fn fetch_smd(&self) -> Result<HashMap<String, SmdMethod>, Error> {
        let url = self.sess.service_url_get("/service.smd");
        let response = self.sess.request(Method::GET, &url).send().await?;
        let response = fetch_response(&self.sess, response).await?;
        let raw = fetch_as_json(response).await?;

        let doc: SmdDocument =
            serde_json::from_value(raw).map_err(|e| Error::Deserialize(e.to_string()))?;
        Ok(doc.services)
    }

    /// The names of the methods the service advertises, sorted.
    pub async fn rpc_names(&self) -> Result<Vec<String>, Error> {
        let mut names: Vec<String> = self.fetch_smd().await?.into_keys().collect();
        names.sort();
        Ok(names)
    }
}

/// One method entry in the SMD document.
#[derive(Debug, Clone, Deserialize)]
pub struct SmdMethod {
    #[serde(default)]
    pub parameters: Vec<SmdParam>,
    #[serde(rename = "return", default)]
    pub return_type: String,
}

/// One parameter of an SMD method entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SmdParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Deserialize)]
struct SmdDocument {
    #[serde(default)]
    services: HashMap<String, SmdMethod>,
}

/// Pending handle for one call enqueued in an `RpcBatch`. Resolved when the
/// batch reply array is dispatched.
pub struct BatchCall {
    rx: oneshot::Receiver<Result<Value, Error>>,
}

impl BatchCall {
    /// Wait for this call's slot in the batch reply and deserialize it.
    ///
    /// # Errors
    /// The per-element fault or protocol error, `Error::Protocol` when the
    /// reply array carried no element for this call's id, or the replicated
    /// commit failure when the whole batch failed at the HTTP layer.
    pub async fn recv<T: DeserializeOwned>(self) -> Result<T, Error> {
        match self.rx.await {
            Ok(Ok(result)) => {
                serde_json::from_value(result).map_err(|e| Error::Deserialize(e.to_string()))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Protocol(
                "no reply received for batched rpc call".to_string(),
            )),
        }
    }
}

/// Accumulates JSON-RPC calls and sends them as one multi-envelope POST.
///
/// Ids are batch-local, starting at 1 for each round. After `commit` the
/// internal state is cleared so the same instance can run a fresh round.
pub struct RpcBatch {
    sess: Arc<Session>,
    payload: Vec<Envelope>,
    pending: HashMap<u64, oneshot::Sender<Result<Value, Error>>>,
    last_id: u64,
}

impl RpcBatch {
    pub fn new(sess: Arc<Session>) -> Self {
        Self {
            sess,
            payload: Vec::new(),
            pending: HashMap::new(),
            last_id: 0,
        }
    }

    /// Enqueue a call without sending it. The returned handle resolves when
    /// `commit` dispatches the reply array.
    pub fn rpc(&mut self, method: &str, params: Vec<Value>) -> BatchCall {
        self.last_id += 1;
        let id = self.last_id;
        self.payload.push(Envelope::new(id, method, params));

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        BatchCall { rx }
    }

    /// Number of calls waiting for the next commit.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Send every enqueued envelope in one POST and resolve or reject each
    /// pending call from the reply array.
    ///
    /// An HTTP-layer failure rejects every pending call in the round
    /// uniformly and is also returned here. Reply elements with unknown ids
    /// are ignored; pending calls with no reply element are rejected with
    /// `Error::Protocol` when their senders drop at the end of the round.
    ///
    /// # Errors
    /// The shared transport/HTTP/content-type errors, or `Error::Protocol`
    /// when the reply is not a JSON array.
    pub async fn commit(&mut self) -> Result<(), Error> {
        if self.payload.is_empty() {
            return Ok(());
        }

        let payload = std::mem::take(&mut self.payload);
        let mut pending = std::mem::take(&mut self.pending);
        self.last_id = 0;
        tracing::debug!(calls = payload.len(), "rpc batch commit");

        let replies = match self.post_batch(&payload).await {
            Ok(replies) => replies,
            Err(e) => {
                for (_, tx) in pending.drain() {
                    let _ = tx.send(Err(e.replicate()));
                }
                return Err(e);
            }
        };

        for raw in replies {
            let Some(id) = reply_id(&raw) else { continue };
            let Some(tx) = pending.remove(&id) else {
                continue;
            };
            let _ = tx.send(unwrap_batch_reply(raw));
        }
        // Senders for unanswered calls drop here; their handles observe it
        // as a missing-reply protocol error.
        Ok(())
    }

    async fn post_batch(&self, payload: &[Envelope]) -> Result<Vec<Value>, Error> {
        let response = self
            .sess
            .request(Method::POST, &self.sess.rpc_url_get())
            .json(payload)
            .send()
            .await?;
        let response = fetch_response(&self.sess, response).await?;
        match fetch_as_json(response).await? {
            Value::Array(replies) => Ok(replies),
            other => Err(Error::Protocol(format!(
                "expected jsonrpc batch reply array, got {other}"
            ))),
        }
    }
}

/// Correlation id of a batch reply element, if it carries a usable one.
fn reply_id(raw: &Value) -> Option<u64> {
    match raw.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn unwrap_batch_reply(raw: Value) -> Result<Value, Error> {
    let reply: Reply = serde_json::from_value(raw)
        .map_err(|_| Error::Protocol("malformed jsonrpc reply in batch".to_string()))?;
    match reply.outcome {
        Outcome::Fault { error } => Err(Error::Rpc(error)),
        Outcome::Success { result } => Ok(result),
    }
}
