mod common;

use aura::api::router;
use aura::prompts;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{test_state, MockGateway, MockStore};
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn authed_json_req(method: &str, uri: &str, body: serde_json::Value, token: &str) -> Request<Body> {
    let mut req = json_req(method, uri, body);
    req.headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    req
}

fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(t) = token {
        b = b.header("authorization", format!("Bearer {t}"));
    }
    b.body(Body::empty()).unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
}

fn upload_req(session: &str, filename: &str, content_type: &str, data: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/sessions/{session}/document?filename={filename}"))
        .header("content-type", content_type)
        .body(Body::from(data))
        .unwrap()
}

fn shop() -> serde_json::Value {
    serde_json::json!({
        "business_name": "Mwananchi Shop",
        "business_field": "Retail",
        "ai_role": "Sales assistant",
    })
}

// --- Auth ---

#[tokio::test]
async fn auth_rejects_no_token() {
    let app = router(test_state(None, None, Some("secret123")));
    let resp = app.oneshot(get_req("/personas", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn auth_rejects_wrong_token() {
    let app = router(test_state(None, None, Some("secret123")));
    let resp = app
        .oneshot(get_req("/personas", Some("wrongtoken")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_accepts_correct_token() {
    let app = router(test_state(None, None, Some("secret123")));
    let resp = app
        .oneshot(get_req("/personas", Some("secret123")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_guards_uploads() {
    let app = router(test_state(None, None, Some("secret123")));
    let resp = app
        .oneshot(upload_req("abc", "menu.txt", "text/plain", b"menu".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_skips_auth() {
    let app = router(test_state(None, None, Some("secret123")));
    let resp = app.oneshot(get_req("/health", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "live");
    assert_eq!(body["ai_enabled"], false);
    assert_eq!(body["auth"], true);
    assert_eq!(body["session"]["finalize_policy"], "retry");
}

#[tokio::test]
async fn index_lists_endpoints() {
    let app = router(test_state(None, None, None));
    let resp = app.oneshot(get_req("/", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert!(body["endpoints"]["POST /sessions/:id/turns"].is_string());
}

// --- Personas ---

#[tokio::test]
async fn create_persona_without_backend_is_503() {
    let app = router(test_state(None, None, None));
    let resp = app.oneshot(json_req("POST", "/personas", shop())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn create_persona_validates_first() {
    let app = router(test_state(None, None, None));
    let resp = app
        .oneshot(json_req("POST", "/personas", serde_json::json!({"business_name": "X"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("business_field"));
}

#[tokio::test]
async fn create_and_fetch_persona() {
    let gw = MockGateway::new();
    gw.push_ok("You are the sales assistant for Mwananchi Shop.");
    let state = test_state(Some(gw.clone()), None, None);
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(json_req("POST", "/personas", shop()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    let id = body["id"].as_i64().unwrap();
    assert_eq!(body["share_link"], format!("http://aura.test/personas/{id}/chat"));
    assert_eq!(gw.call_count(), 1);

    let resp = app
        .clone()
        .oneshot(get_req(&format!("/personas/{id}"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["business_name"], "Mwananchi Shop");
    assert_eq!(body["generated_prompt"], "You are the sales assistant for Mwananchi Shop.");

    let resp = app.oneshot(get_req("/personas", None)).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn create_persona_gateway_failure_is_502() {
    let gw = MockGateway::failing();
    let state = test_state(Some(gw), None, None);
    let app = router(state.clone());
    let resp = app.oneshot(json_req("POST", "/personas", shop())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(state.db.count().unwrap(), 0);
}

#[tokio::test]
async fn missing_persona_is_404() {
    let app = router(test_state(None, None, None));
    let resp = app.oneshot(get_req("/personas/99", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn persona_chat_round_trip() {
    let gw = MockGateway::new();
    gw.push_ok("PERSONA");
    gw.push_ok("We open at 8am.");
    let app = router(test_state(Some(gw), None, None));

    let resp = app.clone().oneshot(json_req("POST", "/personas", shop())).await.unwrap();
    let id = body_json(resp).await["id"].as_i64().unwrap();

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            &format!("/personas/{id}/chat"),
            serde_json::json!({"prompt": "When do you open?"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["response"], "We open at 8am.");
    assert_eq!(body["failed"], false);

    let resp = app
        .oneshot(json_req("POST", &format!("/personas/{id}/chat"), serde_json::json!({"prompt": " "})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_json_body_rejected() {
    let app = router(test_state(None, None, None));
    let big = "x".repeat(70 * 1024);
    let resp = app
        .oneshot(json_req("POST", "/personas", serde_json::json!({"business_name": big})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("65536"));
}

// --- Sessions ---

async fn new_session(app: &axum::Router) -> String {
    let resp = app.clone().oneshot(post_empty("/sessions")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["phase"], "intro");
    body["id"].as_str().unwrap().to_string()
}

async fn turn(app: &axum::Router, id: &str, text: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .clone()
        .oneshot(json_req("POST", &format!("/sessions/{id}/turns"), serde_json::json!({"text": text})))
        .await
        .unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

#[tokio::test]
async fn unknown_session_is_404() {
    let app = router(test_state(Some(MockGateway::new()), None, None));
    let (status, _) = turn(&app, "nope", "hi").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let resp = app.oneshot(get_req("/sessions/nope", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn turn_without_backend_is_503() {
    let app = router(test_state(None, None, None));
    let id = new_session(&app).await;
    let (status, _) = turn(&app, &id, "hi").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn full_build_flow() {
    let gw = MockGateway::new();
    let store = MockStore::new();
    let state = test_state(Some(gw.clone()), Some(store.clone()), None);
    let app = router(state.clone());
    let id = new_session(&app).await;

    for q in ["We sell phones", "In Nairobi"] {
        let (status, body) = turn(&app, &id, q).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "intro");
    }
    let (_, body) = turn(&app, &id, "Students mostly").await;
    assert_eq!(body["phase"], "awaiting_document");
    assert_eq!(body["transition"], prompts::TO_DOCUMENT_NOTICE);

    // chatting is not allowed until the document arrives
    let (status, _) = turn(&app, &id, "hello?").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let resp = app
        .clone()
        .oneshot(upload_req(&id, "prices.txt", "text/plain", b"phone 10000 KES".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["phase"], "document_qa");
    assert_eq!(body["attachment"]["mime_type"], "text/plain");
    assert_eq!(store.call_count(), 1);

    for q in ["q1", "q2", "q3"] {
        let (_, body) = turn(&app, &id, q).await;
        assert_eq!(body["phase"], "document_qa");
    }
    gw.push_ok("a4");
    gw.push_ok("FINAL PERSONA PROMPT");
    let (_, body) = turn(&app, &id, "q4").await;
    assert_eq!(body["phase"], "done");
    assert_eq!(body["transition"], prompts::DONE_NOTICE);

    let resp = app.clone().oneshot(get_req(&format!("/sessions/{id}"), None)).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["final_artifact"], "FINAL PERSONA PROMPT");

    let calls = gw.call_count();
    let resp = app.clone().oneshot(post_empty(&format!("/sessions/{id}/finalize"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["final_prompt"], "FINAL PERSONA PROMPT");
    assert_eq!(gw.call_count(), calls);

    let resp = app
        .clone()
        .oneshot(json_req("POST", &format!("/sessions/{id}/publish"), shop()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    let pid = body["id"].as_i64().unwrap();
    assert_eq!(body["share_link"], format!("http://aura.test/personas/{pid}/chat"));
    let rec = state.db.get(pid).unwrap().unwrap();
    assert_eq!(rec.generated_prompt, "FINAL PERSONA PROMPT");
}

#[tokio::test]
async fn oversized_document_rejected_before_store() {
    let gw = MockGateway::new();
    let store = MockStore::new();
    let mut state = test_state(Some(gw), Some(store.clone()), None);
    state.session_config.intro_questions = 1;
    state.session_config.max_upload_bytes = 1024;
    let app = router(state);
    let id = new_session(&app).await;
    turn(&app, &id, "We bake bread").await;

    let resp = app
        .clone()
        .oneshot(upload_req(&id, "menu.pdf", "application/pdf", vec![0u8; 4096]))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body_json(resp).await["error"].as_str().unwrap().contains("4096"));
    assert_eq!(store.call_count(), 0);

    let resp = app.oneshot(get_req(&format!("/sessions/{id}"), None)).await.unwrap();
    assert_eq!(body_json(resp).await["phase"], "awaiting_document");
}

#[tokio::test]
async fn upload_over_route_limit_has_json_error() {
    let store = MockStore::new();
    let mut state = test_state(Some(MockGateway::new()), Some(store.clone()), None);
    state.session_config.intro_questions = 1;
    state.session_config.max_upload_bytes = 1024;
    let app = router(state);
    let id = new_session(&app).await;
    turn(&app, &id, "We bake bread").await;

    // past the ceiling plus the 1MB headroom, so the route limit trips first
    let resp = app
        .clone()
        .oneshot(upload_req(&id, "menu.pdf", "application/pdf", vec![0u8; 1024 * 1024 + 4096]))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let limit = (1024 + 1024 * 1024).to_string();
    assert!(body_json(resp).await["error"].as_str().unwrap().contains(&limit));
    assert_eq!(store.call_count(), 0);

    let resp = app.oneshot(get_req(&format!("/sessions/{id}"), None)).await.unwrap();
    assert_eq!(body_json(resp).await["phase"], "awaiting_document");
}

#[tokio::test]
async fn upload_store_failure_is_502() {
    let gw = MockGateway::new();
    let store = MockStore::failing_first(1);
    let mut state = test_state(Some(gw), Some(store), None);
    state.session_config.intro_questions = 1;
    let app = router(state);
    let id = new_session(&app).await;
    turn(&app, &id, "We bake bread").await;

    let resp = app
        .oneshot(upload_req(&id, "menu.txt", "text/plain", b"bread".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn finalize_before_threshold_is_409() {
    let app = router(test_state(None, None, None));
    let id = new_session(&app).await;
    let resp = app.oneshot(post_empty(&format!("/sessions/{id}/finalize"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn publish_before_done_is_409() {
    let app = router(test_state(None, None, None));
    let id = new_session(&app).await;
    let resp = app
        .oneshot(json_req("POST", &format!("/sessions/{id}/publish"), shop()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn failed_turn_reports_sentinel() {
    let gw = MockGateway::failing();
    let app = router(test_state(Some(gw), None, None));
    let id = new_session(&app).await;
    let (status, body) = turn(&app, &id, "hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["failed"], true);
    assert_eq!(body["reply"], prompts::FAILURE_SENTINEL);
}

#[tokio::test]
async fn reset_returns_to_intro() {
    let gw = MockGateway::new();
    let app = router(test_state(Some(gw), None, None));
    let id = new_session(&app).await;
    turn(&app, &id, "We sell phones").await;

    let resp = app.clone().oneshot(post_empty(&format!("/sessions/{id}/reset"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["phase"], "intro");
    assert_eq!(body["history"].as_array().unwrap().len(), 0);
    assert_eq!(body["intro_question_count"], 0);
}

#[tokio::test]
async fn delete_session() {
    let app = router(test_state(None, None, None));
    let id = new_session(&app).await;
    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = app.oneshot(get_req(&format!("/sessions/{id}"), None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_session_chats_with_persona() {
    let gw = MockGateway::new();
    gw.push_ok("STORED PERSONA");
    let app = router(test_state(Some(gw.clone()), None, Some("k")));

    let resp = app
        .clone()
        .oneshot(authed_json_req("POST", "/personas", shop(), "k"))
        .await
        .unwrap();
    let pid = body_json(resp).await["id"].as_i64().unwrap();

    let resp = app
        .clone()
        .oneshot(authed_json_req(
            "POST",
            "/sessions/standalone",
            serde_json::json!({"persona_id": pid}),
            "k",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["phase"], "standalone_chat");
    let id = body["id"].as_str().unwrap().to_string();

    gw.push_ok("Karibu!");
    let resp = app
        .oneshot(authed_json_req(
            "POST",
            &format!("/sessions/{id}/turns"),
            serde_json::json!({"text": "Habari"}),
            "k",
        ))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["reply"], "Karibu!");
    assert_eq!(gw.last_call().unwrap().system.as_deref(), Some("STORED PERSONA"));
}

#[tokio::test]
async fn standalone_session_unknown_persona() {
    let app = router(test_state(None, None, None));
    let resp = app
        .oneshot(json_req("POST", "/sessions/standalone", serde_json::json!({"persona_id": 5})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
