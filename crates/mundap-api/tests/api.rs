use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use mundap_api::{AppState, AppStateInner, Settings, TokenIssuer, build_router};
use mundap_crypto::PhoneVault;
use mundap_db::{Database, Store};
use mundap_notify::{LogQueue, NotificationQueue, NullNotifier};
use mundap_types::models::PairStatus;

const ADMIN_KEY: &str = "test-admin-key";

struct TestApp {
    router: Router,
    state: AppState,
}

impl TestApp {
    fn new() -> Self {
        Self::with_settings(Settings {
            admin_api_key: Some(ADMIN_KEY.to_string()),
            ..Settings::default()
        })
    }

    fn with_settings(settings: Settings) -> Self {
        let store: Arc<dyn Store> = Arc::new(Database::open_in_memory().unwrap());
        let queue: Arc<dyn NotificationQueue> = Arc::new(LogQueue::new(Arc::new(NullNotifier)));
        let tokens = TokenIssuer::new(
            "test-access-secret",
            "test-refresh-secret",
            Duration::minutes(60),
            Duration::days(30),
        );
        let state = AppStateInner::new(store, tokens, PhoneVault::new([7u8; 32]), queue, settings);
        Self {
            router: build_router(state.clone()),
            state,
        }
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, bytes) = self.raw(method, uri, token, body, &[]).await;
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, bytes)
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    async fn register(&self, name: &str, role: &str, phone: &str, invite: Option<&str>) -> (StatusCode, Value) {
        let mut body = json!({ "name": name, "role": role, "phone": phone });
        if let Some(code) = invite {
            body["invite_code"] = json!(code);
        }
        self.post("/api/auth/register", None, body).await
    }

    /// Registers a user and returns their access token.
    async fn user(&self, name: &str, role: &str, phone: &str) -> String {
        let (status, body) = self.register(name, role, phone, None).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        token(&body)
    }

    async fn invite(&self, token: &str) -> String {
        let (status, body) = self.post("/api/auth/invite", Some(token), json!({})).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["invite_code"].as_str().unwrap().to_string()
    }

    /// A parent and child in an active pair.
    async fn pair(&self) -> (String, String) {
        let parent = self.user("김엄마", "parent", "+82-10-1234-5678").await;
        let code = self.invite(&parent).await;
        let (status, body) = self
            .register("김민지", "child", "010-8765-4321", Some(&code))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (parent, token(&body))
    }

    async fn today_id(&self, token: &str) -> i64 {
        let (status, body) = self.get("/api/questions/today", token).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["question"]["id"].as_i64().unwrap()
    }
}

fn token(body: &Value) -> String {
    body["data"]["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn kim_family_answers_todays_question() {
    let app = TestApp::new();

    let (status, body) = app.register("김엄마", "parent", "+82-10-1234-5678", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["user"]["phone"], "010-****-5678");
    assert!(body["data"]["pair"].is_null());
    let parent = token(&body);

    let code = app.invite(&parent).await;
    let (status, body) = app
        .register("김민지", "child", "010-8765-4321", Some(&code.to_lowercase()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["pair"]["status"], "active");
    assert_eq!(body["data"]["pair"]["partner"]["name"], "김엄마");
    let child = token(&body);

    let question_id = app.today_id(&child).await;
    let (status, body) = app
        .post(
            "/api/answers",
            Some(&child),
            json!({ "question_id": question_id, "content": "엄마랑 떡볶이 먹은 거!" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (_, body) = app.get("/api/questions/today", &parent).await;
    let today = &body["data"];
    assert_eq!(today["question"]["id"], question_id);
    assert_eq!(today["answers"].as_array().unwrap().len(), 1);
    assert!(today["my_answer"].is_null());
    assert_eq!(today["partner_answer"]["author_name"], "김민지");
    assert_eq!(today["both_answered"], false);

    let (status, _) = app
        .post(
            "/api/answers",
            Some(&parent),
            json!({ "question_id": question_id, "content": "나도 즐거웠어" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = app.get("/api/questions/today", &child).await;
    assert_eq!(body["data"]["both_answered"], true);

    let (_, body) = app.get("/api/answers/stats", &child).await;
    assert_eq!(body["data"]["total_answers"], 2);
    assert_eq!(body["data"]["my_answers"], 1);
    assert_eq!(body["data"]["both_answered_questions"], 1);
    assert_eq!(body["data"]["current_streak"], 1);
}

#[tokio::test]
async fn todays_question_is_stable() {
    let app = TestApp::new();
    let user = app.user("민지", "child", "01011112222").await;
    let first = app.today_id(&user).await;
    let second = app.today_id(&user).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn wrong_role_cannot_join_and_leaves_nothing_behind() {
    let app = TestApp::new();
    let parent = app.user("엄마", "parent", "01012345678").await;
    let code = app.invite(&parent).await;

    let (status, body) = app.register("아빠", "parent", "01099998888", Some(&code)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["success"], false);

    // the phone is still free, so the failed join created no user
    let (status, _) = app.register("아빠", "parent", "01099998888", None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = app.get(&format!("/api/auth/verify/{code}"), &parent).await;
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["required_role"], "child");
}

#[tokio::test]
async fn expired_invitation_is_rejected() {
    let app = TestApp::new();
    let parent = app.user("엄마", "parent", "01012345678").await;
    let code = app.invite(&parent).await;

    let pair = app.state.store.find_pair_by_invitation(&code).await.unwrap().unwrap();
    let past = Utc::now() - Duration::hours(1);
    assert!(app.state.store.refresh_invitation(pair.id, &code, past, Utc::now()).await.unwrap());

    let (status, _) = app.register("민지", "child", "01087654321", Some(&code)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get(&format!("/api/auth/verify/{code}"), &parent).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], false);

    let (status, _) = app.get("/api/auth/verify/ZZZZ2345", &parent).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registered_user_accepts_invitation() {
    let app = TestApp::new();
    let parent = app.user("엄마", "parent", "01012345678").await;
    let child = app.user("민지", "child", "01087654321").await;
    let code = app.invite(&parent).await;

    let (status, _) = app
        .post("/api/auth/accept", Some(&parent), json!({ "invite_code": code }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post("/api/auth/accept", Some(&child), json!({ "invite_code": code }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "active");

    let (status, _) = app.post("/api/auth/invite", Some(&child), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = app.get("/api/auth/profile", &parent).await;
    assert_eq!(body["data"]["pair"]["partner"]["name"], "민지");
}

#[tokio::test]
async fn accept_rejects_role_clash_and_expired_code() {
    let app = TestApp::new();
    let parent = app.user("엄마", "parent", "01012345678").await;
    let other_parent = app.user("아빠", "parent", "01055556666").await;
    let child = app.user("민지", "child", "01087654321").await;
    let code = app.invite(&parent).await;

    let (status, body) = app
        .post("/api/auth/accept", Some(&other_parent), json!({ "invite_code": code }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("for a child"), "{body}");

    let pair = app.state.store.find_pair_by_invitation(&code).await.unwrap().unwrap();
    let past = Utc::now() - Duration::hours(1);
    assert!(app.state.store.refresh_invitation(pair.id, &code, past, Utc::now()).await.unwrap());

    let (status, body) = app
        .post("/api/auth/accept", Some(&child), json!({ "invite_code": code }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("expired"), "{body}");

    let pair = app.state.store.find_pair(pair.id).await.unwrap().unwrap();
    assert_eq!(pair.status, PairStatus::Pending);
}

#[tokio::test]
async fn second_answer_conflicts() {
    let app = TestApp::new();
    let (_, child) = app.pair().await;
    let question_id = app.today_id(&child).await;
    let answer = json!({ "question_id": question_id, "content": "첫 번째" });

    let (status, _) = app.post("/api/answers", Some(&child), answer.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app.post("/api/answers", Some(&child), answer).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn answers_need_an_active_pair() {
    let app = TestApp::new();
    let alone = app.user("엄마", "parent", "01012345678").await;
    let (status, body) = app.get("/api/answers/stats", &alone).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn only_the_author_edits_and_partner_reacts() {
    let app = TestApp::new();
    let (parent, child) = app.pair().await;
    let question_id = app.today_id(&child).await;

    let (_, body) = app
        .post("/api/answers", Some(&child), json!({ "question_id": question_id, "content": "원래 답" }))
        .await;
    let answer_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/answers/{answer_id}"),
            Some(&parent),
            Some(json!({ "content": "남의 답" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/answers/{answer_id}"),
            Some(&child),
            Some(json!({ "content": "고친 답" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content"], "고친 답");

    let reactions = format!("/api/answers/{answer_id}/reactions");
    let (status, _) = app.post(&reactions, Some(&parent), json!({ "emoji": "not-an-emoji" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.post(&reactions, Some(&parent), json!({ "emoji": "😂" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.post(&reactions, Some(&parent), json!({ "emoji": "❤️" })).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get(&format!("/api/answers/question/{question_id}"), &child).await;
    let reactions_seen = &body["data"]["my_answer"]["reactions"];
    assert_eq!(reactions_seen.as_array().unwrap().len(), 1);
    assert_eq!(reactions_seen[0]["emoji"], "❤️");

    let (_, body) = app.get("/api/answers/stats", &child).await;
    assert_eq!(body["data"]["reactions_received"], 1);

    let (status, _) = app
        .request(Method::DELETE, &reactions, Some(&parent), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .request(Method::DELETE, &reactions, Some(&parent), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_and_pair_listing_are_paginated() {
    let app = TestApp::new();
    let (parent, child) = app.pair().await;
    for (token, id) in [(&child, 1), (&parent, 1), (&child, 2)] {
        let (status, body) = app
            .post("/api/answers", Some(token), json!({ "question_id": id, "content": "답변" }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (status, body) = app.get("/api/answers/history?limit=1", &child).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["pagination"]["has_next"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = app.get("/api/answers/pair?page=1&limit=20", &parent).await;
    assert_eq!(body["pagination"]["total"], 3);

    let (status, body) = app.get("/api/answers/pair?limit=500", &parent).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"][0]["field"], "limit");
}

#[tokio::test]
async fn export_is_csv_with_bom() {
    let app = TestApp::new();
    let (_, child) = app.pair().await;
    app.post("/api/answers", Some(&child), json!({ "question_id": 1, "content": "안녕, \"엄마\"" }))
        .await;

    let (status, headers, bytes) = app
        .raw(Method::GET, "/api/answers/export", Some(&child), None, &[])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    assert!(headers[header::CONTENT_DISPOSITION].to_str().unwrap().contains("attachment"));

    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with('\u{feff}'));
    assert!(text.contains("\"안녕, \"\"엄마\"\"\""));
    assert_eq!(text.lines().count(), 2);
}

#[tokio::test]
async fn refresh_tokens_rotate_and_cannot_authenticate() {
    let app = TestApp::new();
    let (_, body) = app.register("민지", "child", "01087654321", None).await;
    let refresh = body["data"]["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = app.get("/api/auth/profile", &refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    let (status, body) = app
        .post("/api/auth/refresh", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["data"]["access_token"].as_str().unwrap().to_string();
    let (status, _) = app.get("/api/auth/profile", &access).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/auth/refresh", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_token_is_redeemed_once() {
    let app = TestApp::new();
    let (_, body) = app.register("민지", "child", "01087654321", None).await;
    let refresh = json!({ "refresh_token": body["data"]["refresh_token"] });

    let (first, second) = tokio::join!(
        app.post("/api/auth/refresh", None, refresh.clone()),
        app.post("/api/auth/refresh", None, refresh.clone()),
    );
    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);

    let (status, body) = app.post("/api/auth/refresh", None, refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token has been revoked");
}

#[tokio::test]
async fn logout_and_account_deletion_revoke_access() {
    let app = TestApp::new();
    let first = app.user("민지", "child", "01087654321").await;
    let (status, _) = app.request(Method::POST, "/api/auth/logout", Some(&first), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/api/auth/profile", &first).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = app
        .post("/api/auth/login", None, json!({ "phone": "010-8765-4321", "name": "민지" }))
        .await;
    let second = token(&body);
    let (status, _) = app
        .request(Method::DELETE, "/api/auth/account", Some(&second), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/auth/login", None, json!({ "phone": "01087654321", "name": "민지" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_checks_name_and_duplicate_phone_conflicts() {
    let app = TestApp::new();
    app.user("민지", "child", "01087654321").await;

    let (status, _) = app
        .post("/api/auth/login", None, json!({ "phone": "01087654321", "name": "다른사람" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.register("민지", "child", "+82 10 8765 4321", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn credential_routes_are_rate_limited() {
    let app = TestApp::with_settings(Settings {
        auth_rate_limit_per_minute: 2,
        ..Settings::default()
    });

    let login = json!({ "phone": "010-1111-2222", "name": "없는사람" });
    for _ in 0..2 {
        let (status, _) = app.post("/api/auth/login", None, login.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = app.post("/api/auth/login", None, login).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
    assert_eq!(body["success"], false);

    // verify is public but not throttled
    let (status, _) = app
        .request(Method::GET, "/api/auth/verify/ABCD2345", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validation_errors_list_fields() {
    let app = TestApp::new();
    let (status, body) = app.register("", "child", "12345", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = body["error"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["name", "phone"]);
}

#[tokio::test]
async fn admin_routes_need_the_key() {
    let app = TestApp::new();
    let user = app.user("민지", "child", "01087654321").await;
    let question = json!({ "content": "가장 좋아하는 계절은?", "category": "fun" });

    let (status, _) = app
        .post("/api/questions", Some(&user), question.clone())
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, bytes) = app
        .raw(Method::POST, "/api/questions", None, Some(question), &[("x-admin-key", ADMIN_KEY)])
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, _, _) = app
        .raw(Method::DELETE, &format!("/api/questions/{id}"), None, None, &[("x-admin-key", ADMIN_KEY)])
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get(&format!("/api/questions/{id}"), &user).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn question_browsing() {
    let app = TestApp::new();
    let user = app.user("민지", "child", "01087654321").await;

    let (_, body) = app.get("/api/questions/categories", &user).await;
    assert!(!body["data"].as_array().unwrap().is_empty());

    let (_, body) = app.get("/api/questions/stats", &user).await;
    assert_eq!(body["data"]["total"], body["data"]["active"]);

    let (status, body) = app.get("/api/questions/category/daily?limit=2", &user).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().len() <= 2);

    let (status, _) = app.get("/api/questions/search", &user).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/questions/category/Not-Valid", &user).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_fallback() {
    let app = TestApp::new();
    let (status, _, _) = app.raw(Method::GET, "/api/health/ready", None, None, &[]).await;
    assert_eq!(status, StatusCode::OK);

    app.user("민지", "child", "01087654321").await;
    let (status, _, bytes) = app.raw(Method::GET, "/api/health/metrics", None, None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["users"], 1);
    assert_eq!(body["queue"]["pending"], 0);

    let (status, body) = app.request(Method::GET, "/api/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn deactivated_pair_stops_answers() {
    let app = TestApp::new();
    let (parent, child) = app.pair().await;
    let (_, body) = app.get("/api/auth/pairs", &parent).await;
    let pair_id: Uuid = body["data"][0]["id"].as_str().unwrap().parse().unwrap();

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/auth/pairs/{pair_id}"), Some(&parent), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/api/answers/pair", &child).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
