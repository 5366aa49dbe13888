//! Test backend implementing the `/service` protocol surface: the JSON-RPC
//! endpoint, the SMD document, and REST entity collections with
//! `Range`/`Content-Range` paging.
//!
//! Every response carries `Content-Language: en`; requests arriving without
//! a `Cookie` header get `Set-Cookie` back, so clients can prove cookie
//! propagation. Success responses are always 200 — the client protocol
//! accepts only canonical 200 OK.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Entity collections keyed by name, each an ordered key -> object map so
/// paged listings are deterministic.
pub type Db = Arc<RwLock<HashMap<String, BTreeMap<String, Value>>>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/service/service.smd", get(smd))
        .route("/service/json", post(rpc))
        .route(
            "/service/entity/{name}",
            get(list_entities).post(create_entity),
        )
        .route(
            "/service/entity/{name}/{key}",
            get(get_entity).put(put_entity).delete(delete_entity),
        )
        .layer(middleware::from_fn(service_headers))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Stamp `Content-Language` on every response and hand out a session cookie
/// to requests that do not present one yet.
async fn service_headers(req: Request, next: Next) -> Response {
    let has_cookie = req.headers().contains_key(header::COOKIE);
    let mut res = next.run(req).await;
    res.headers_mut()
        .insert(header::CONTENT_LANGUAGE, HeaderValue::from_static("en"));
    if !has_cookie {
        res.headers_mut().insert(
            header::SET_COOKIE,
            HeaderValue::from_static("sid=abc123; Path=/; HttpOnly"),
        );
    }
    res
}

// --- JSON-RPC ---

async fn rpc(headers: HeaderMap, Json(payload): Json<Value>) -> Response {
    if wants_http_failure(&payload) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "kaboom").into_response();
    }
    match payload {
        Value::Array(envelopes) => {
            let replies: Vec<Value> = envelopes
                .into_iter()
                .filter_map(|env| dispatch(&headers, &env))
                .collect();
            Json(Value::Array(replies)).into_response()
        }
        envelope => match dispatch(&headers, &envelope) {
            Some(reply) => Json(reply).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
    }
}

fn wants_http_failure(payload: &Value) -> bool {
    let is_http_fail = |env: &Value| env["method"] == "http_fail";
    match payload {
        Value::Array(envelopes) => envelopes.iter().any(is_http_fail),
        envelope => is_http_fail(envelope),
    }
}

/// Answer one envelope, or `None` for methods that deliberately go
/// unanswered in a batch.
fn dispatch(headers: &HeaderMap, envelope: &Value) -> Option<Value> {
    let id = envelope.get("id").cloned().unwrap_or(Value::Null);
    let method = envelope["method"].as_str().unwrap_or("");
    let params: Vec<Value> = envelope
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let reply = match method {
        "sum" => result_reply(id, json!(params.iter().filter_map(Value::as_i64).sum::<i64>())),
        "echo" => result_reply(id, params.first().cloned().unwrap_or(Value::Null)),
        "id_echo" => {
            let echoed = id.clone();
            result_reply(id, echoed)
        }
        "cookie" => {
            let cookie = headers
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .map_or(Value::Null, |v| json!(v));
            result_reply(id, cookie)
        }
        "fail" => error_reply(id, json!({"code": 42, "message": "boom", "sql": "SELECT 1"})),
        "misreply" => {
            let bumped = id.as_u64().map_or(Value::Null, |n| json!(n + 1));
            result_reply(bumped, json!(true))
        }
        "drop_reply" => return None,
        other => error_reply(
            id,
            json!({"code": -32601, "message": format!("method not found: {other}")}),
        ),
    };
    Some(reply)
}

fn result_reply(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_reply(id: Value, error: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": error})
}

async fn smd() -> Json<Value> {
    Json(json!({
        "services": {
            "sum": {
                "parameters": [
                    {"name": "a", "type": "integer", "optional": false},
                    {"name": "b", "type": "integer", "optional": false}
                ],
                "return": "integer"
            },
            "echo": {
                "parameters": [{"name": "value", "type": "any", "optional": false}],
                "return": "any"
            },
            "fail": {"parameters": [], "return": "null"}
        }
    }))
}

// --- REST entities ---

async fn list_entities(
    State(db): State<Db>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let db = db.read().await;
    let items: Vec<Value> = db
        .get(&name)
        .map(|collection| collection.values().cloned().collect())
        .unwrap_or_default();
    let total = items.len();

    let (begin, end) = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_items_range)
        .unwrap_or((0, total.saturating_sub(1)));

    let page: Vec<Value> = items.into_iter().skip(begin).take(end + 1 - begin).collect();
    let last = if page.is_empty() {
        begin
    } else {
        begin + page.len() - 1
    };
    let content_range = format!("items {begin}-{last}/{total}");

    ([(header::CONTENT_RANGE, content_range)], Json(page)).into_response()
}

/// Parse `items=<begin>-<end>` from a request `Range` header.
fn parse_items_range(raw: &str) -> Option<(usize, usize)> {
    let (begin, end) = raw.strip_prefix("items=")?.split_once('-')?;
    let begin = begin.parse().ok()?;
    let end = end.parse().ok()?;
    (begin <= end).then_some((begin, end))
}

async fn create_entity(
    State(db): State<Db>,
    Path(name): Path<String>,
    Json(mut input): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let Some(fields) = input.as_object_mut() else {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    };
    let key = Uuid::new_v4().to_string();
    fields.insert("id".to_string(), json!(key.clone()));

    db.write()
        .await
        .entry(name)
        .or_default()
        .insert(key, input.clone());
    Ok(Json(input))
}

async fn get_entity(
    State(db): State<Db>,
    Path((name, key)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let db = db.read().await;
    db.get(&name)
        .and_then(|collection| collection.get(&key))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_entity(
    State(db): State<Db>,
    Path((name, key)): Path<(String, String)>,
    Json(mut input): Json<Value>,
) -> Result<Json<bool>, StatusCode> {
    let Some(fields) = input.as_object_mut() else {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    };
    fields.insert("id".to_string(), json!(key.clone()));

    db.write().await.entry(name).or_default().insert(key, input);
    Ok(Json(true))
}

async fn delete_entity(
    State(db): State<Db>,
    Path((name, key)): Path<(String, String)>,
) -> Result<Json<bool>, StatusCode> {
    let mut db = db.write().await;
    db.get_mut(&name)
        .and_then(|collection| collection.remove(&key))
        .map(|_| Json(true))
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_range_parses_window() {
        assert_eq!(parse_items_range("items=0-23"), Some((0, 23)));
        assert_eq!(parse_items_range("items=24-47"), Some((24, 47)));
    }

    #[test]
    fn items_range_rejects_other_units_and_inverted_windows() {
        assert_eq!(parse_items_range("bytes=0-23"), None);
        assert_eq!(parse_items_range("items=9-3"), None);
        assert_eq!(parse_items_range("items=a-b"), None);
    }

    #[test]
    fn dispatch_sums_integer_params() {
        let reply = dispatch(
            &HeaderMap::new(),
            &json!({"id": 1, "method": "sum", "params": [2, 3]}),
        )
        .unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"], 5);
    }

    #[test]
    fn dispatch_unknown_method_reports_error() {
        let reply = dispatch(
            &HeaderMap::new(),
            &json!({"id": 1, "method": "nope", "params": []}),
        )
        .unwrap();
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[test]
    fn dispatch_drop_reply_goes_unanswered() {
        let reply = dispatch(
            &HeaderMap::new(),
            &json!({"id": 1, "method": "drop_reply", "params": []}),
        );
        assert!(reply.is_none());
    }

    #[test]
    fn dispatch_misreply_bumps_id() {
        let reply = dispatch(
            &HeaderMap::new(),
            &json!({"id": 7, "method": "misreply", "params": []}),
        )
        .unwrap();
        assert_eq!(reply["id"], 8);
    }
}
