use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::app;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

fn get_request(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

// --- rpc ---

#[tokio::test]
async fn rpc_sum_single_envelope() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/service/json",
            r#"{"jsonrpc":"2.0","id":0,"method":"sum","params":[2,3]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let reply = body_json(resp).await;
    assert_eq!(reply["id"], 0);
    assert_eq!(reply["result"], 5);
}

#[tokio::test]
async fn rpc_batch_returns_reply_array_without_dropped_entries() {
    let body = json!([
        {"jsonrpc": "2.0", "id": 1, "method": "sum", "params": [1, 2]},
        {"jsonrpc": "2.0", "id": 2, "method": "drop_reply", "params": []},
        {"jsonrpc": "2.0", "id": 3, "method": "fail", "params": []}
    ]);
    let resp = app()
        .oneshot(json_request("POST", "/service/json", &body.to_string()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let replies = body_json(resp).await;
    let replies = replies.as_array().unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], 1);
    assert_eq!(replies[0]["result"], 3);
    assert_eq!(replies[1]["id"], 3);
    assert_eq!(replies[1]["error"]["code"], 42);
    assert_eq!(replies[1]["error"]["sql"], "SELECT 1");
}

#[tokio::test]
async fn rpc_http_fail_turns_into_500() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/service/json",
            r#"{"jsonrpc":"2.0","id":0,"method":"http_fail","params":[]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body_bytes(resp).await[..], b"kaboom");
}

#[tokio::test]
async fn smd_lists_services() {
    let resp = app()
        .oneshot(get_request("/service/service.smd"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let doc = body_json(resp).await;
    assert_eq!(doc["services"]["sum"]["return"], "integer");
    assert!(doc["services"]["echo"].is_object());
}

// --- entities ---

#[tokio::test]
async fn entity_create_then_get() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/service/entity/users",
            r#"{"name":"ada"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    assert_eq!(created["name"], "ada");
    let key = created["id"].as_str().unwrap().to_string();

    let resp = app
        .oneshot(get_request(&format!("/service/entity/users/{key}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched = body_json(resp).await;
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn entity_list_honors_range_and_reports_total() {
    let app = app();
    for i in 0..3 {
        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/service/entity/users",
                &json!({"name": format!("user-{i}")}).to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let req = Request::builder()
        .uri("/service/entity/users")
        .header(http::header::RANGE, "items=0-1")
        .body(String::new())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(http::header::CONTENT_RANGE).unwrap(),
        "items 0-1/3"
    );
    let page = body_json(resp).await;
    assert_eq!(page.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn entity_list_empty_collection_reports_zero_total() {
    let req = Request::builder()
        .uri("/service/entity/ghosts")
        .header(http::header::RANGE, "items=0-23")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(http::header::CONTENT_RANGE).unwrap(),
        "items 0-0/0"
    );
    let page = body_json(resp).await;
    assert!(page.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn entity_put_and_delete_acknowledge_with_true() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/service/entity/users/k1",
            r#"{"name":"ada"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!(true));

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/service/entity/users/k1")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!(true));

    let resp = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/service/entity/users/k1")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- response headers ---

#[tokio::test]
async fn responses_carry_locale_and_session_cookie() {
    let resp = app()
        .oneshot(get_request("/service/entity/users/missing"))
        .await
        .unwrap();

    assert_eq!(
        resp.headers().get(http::header::CONTENT_LANGUAGE).unwrap(),
        "en"
    );
    assert_eq!(
        resp.headers().get(http::header::SET_COOKIE).unwrap(),
        "sid=abc123; Path=/; HttpOnly"
    );
}

#[tokio::test]
async fn presenting_a_cookie_suppresses_set_cookie() {
    let req = Request::builder()
        .uri("/service/entity/users")
        .header(http::header::COOKIE, "sid=abc123")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    assert!(resp.headers().get(http::header::SET_COOKIE).is_none());
    assert_eq!(
        resp.headers().get(http::header::CONTENT_LANGUAGE).unwrap(),
        "en"
    );
}
