use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use safecampus_api::session::{self, CookieSigner};
use safecampus_api::state::{AppState, AppStateInner, Settings};
use safecampus_api::auth::hash_password;
use safecampus_api::error::AppError;
use safecampus_db::{Database, NewUser, UserUpdate};
use safecampus_gateway::dispatcher::Dispatcher;
use safecampus_types::models::{Department, Role, User};

struct Harness {
    state: AppState,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_session_ttl(chrono::Duration::hours(1))
    }

    fn with_session_ttl(session_ttl: chrono::Duration) -> Self {
        let settings = Settings {
            signer: CookieSigner::new(b"test-secret-test-secret-test-secret!").unwrap(),
            session_ttl,
            email_domain: None,
            secure_cookies: false,
        };
        let state = AppStateInner::new(Database::open_in_memory().unwrap(), Dispatcher::new(), settings);
        let app = safecampus_api::router(state.clone());
        Self { state, app }
    }

    /// Insert a user directly; password hashing is skipped since these
    /// accounts log in through `cookie_for`.
    fn user(&self, role: Role, department: Option<Department>) -> User {
        self.state
            .db
            .create_user(&NewUser {
                email: format!("{}@campus.edu", Uuid::new_v4().simple()),
                password_hash: "unused".into(),
                full_name: "Test User".into(),
                phone_number: None,
                role,
                department,
            })
            .unwrap()
    }

    async fn cookie_for(&self, user: &User) -> String {
        let cookie = session::start_session(&self.state, user.id).await.unwrap();
        format!("{}={}", cookie.name(), cookie.value())
    }

    async fn send(&self, method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let h = Harness::new();

    let (status, body) = h.send("GET", "/api/alerts/my-alerts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");

    let (status, _) = h.send("GET", "/api/alerts/my-alerts", Some("sc_session=forged.value"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = h.send("GET", "/ws", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_login_and_logout() {
    let h = Harness::new();
    let signup = json!({
        "email": "Ana@Campus.edu",
        "password": "hunter22",
        "fullName": "Ana",
    });

    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(signup.to_string()))
        .unwrap();
    let res = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let set_cookie = res.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.contains("HttpOnly"));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    let (status, body) = h.send("GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "ana@campus.edu");
    assert_eq!(body["user"]["role"], "student");

    // Same email again
    let (status, body) = h.send("POST", "/api/auth/register", None, Some(signup)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");

    let (status, _) = h
        .send("POST", "/api/auth/login", None, Some(json!({ "email": "ana@campus.edu", "password": "wrong-pass" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = h
        .send("POST", "/api/auth/login", None, Some(json!({ "email": "ana@campus.edu", "password": "hunter22" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["fullName"], "Ana");

    let (status, _) = h.send("POST", "/api/auth/logout", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.send("GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn alert_acknowledge_flow() {
    let h = Harness::new();
    let student = h.user(Role::Student, None);
    let medic = h.user(Role::Staff, Some(Department::Medical));
    let student_cookie = h.cookie_for(&student).await;
    let medic_cookie = h.cookie_for(&medic).await;

    let (conn_id, mut medic_rx) = h.state.dispatcher.register_connection(medic.id).await;

    let (status, alert) = h
        .send(
            "POST",
            "/api/alerts",
            Some(&student_cookie),
            Some(json!({
                "department": "medical",
                "latitude": 40.1,
                "longitude": -73.2,
                "situationData": { "conscious": "yes" },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(alert["status"], "pending");
    let alert_id = alert["id"].as_str().unwrap().to_string();

    let pushed: Value = serde_json::from_str(&medic_rx.try_recv().unwrap()).unwrap();
    assert_eq!(pushed["type"], "new_alert");
    assert_eq!(pushed["alertId"], alert_id.as_str());
    h.state.dispatcher.unregister_connection(medic.id, conn_id).await;

    let (_, mut student_rx) = h.state.dispatcher.register_connection(student.id).await;

    // Students cannot change status
    let (status, _) = h
        .send("PATCH", &format!("/api/alerts/{alert_id}"), Some(&student_cookie), Some(json!({ "status": "acknowledged" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, acked) = h
        .send(
            "PATCH",
            &format!("/api/alerts/{alert_id}"),
            Some(&medic_cookie),
            Some(json!({ "status": "acknowledged", "responseNotes": "on our way" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["status"], "acknowledged");
    assert_eq!(acked["acknowledgedBy"], medic.id.to_string());
    assert!(acked["acknowledgedAt"].is_string());
    assert_eq!(acked["responseNotes"], "on our way");

    let pushed: Value = serde_json::from_str(&student_rx.try_recv().unwrap()).unwrap();
    assert_eq!(pushed["type"], "alert_updated");
    assert_eq!(pushed["alertId"], alert_id.as_str());
    assert_eq!(pushed["status"], "acknowledged");

    let (status, body) = h
        .send("PATCH", &format!("/api/alerts/{alert_id}"), Some(&medic_cookie), Some(json!({ "status": "pending" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, mine) = h.send("GET", "/api/alerts/my-alerts", Some(&student_cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["status"], "acknowledged");
}

#[tokio::test]
async fn alert_lifecycle_ends_at_resolved() {
    let h = Harness::new();
    let student = h.user(Role::Student, None);
    let guard = h.user(Role::Staff, Some(Department::Security));
    let student_cookie = h.cookie_for(&student).await;
    let guard_cookie = h.cookie_for(&guard).await;

    let (_, alert) = h
        .send("POST", "/api/alerts", Some(&student_cookie), Some(json!({ "department": "security" })))
        .await;
    let uri = format!("/api/alerts/{}", alert["id"].as_str().unwrap());
    let (_, mut student_rx) = h.state.dispatcher.register_connection(student.id).await;

    // Pending can skip straight to dispatched
    let (status, dispatched) = h.send("PATCH", &uri, Some(&guard_cookie), Some(json!({ "status": "dispatched" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dispatched["status"], "dispatched");

    let (status, resolved) = h.send("PATCH", &uri, Some(&guard_cookie), Some(json!({ "status": "resolved" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");
    assert!(resolved["resolvedAt"].is_string());

    for expected in ["dispatched", "resolved"] {
        let pushed: Value = serde_json::from_str(&student_rx.try_recv().unwrap()).unwrap();
        assert_eq!(pushed["type"], "alert_updated");
        assert_eq!(pushed["status"], expected);
    }

    for next in ["acknowledged", "pending", "dispatched", "resolved"] {
        let (status, body) = h.send("PATCH", &uri, Some(&guard_cookie), Some(json!({ "status": next }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "resolved -> {next} accepted");
        assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
    }
    assert!(student_rx.try_recv().is_err());
}

#[tokio::test]
async fn guidance_alerts_are_rejected() {
    let h = Harness::new();
    let student = h.user(Role::Student, None);
    let counselor = h.user(Role::Staff, Some(Department::Guidance));
    let cookie = h.cookie_for(&student).await;
    let counselor_cookie = h.cookie_for(&counselor).await;

    let (status, _) = h
        .send("POST", "/api/alerts", Some(&cookie), Some(json!({ "department": "guidance" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h.send("GET", "/api/alerts/department/guidance", Some(&counselor_cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");
}

#[tokio::test]
async fn disabled_accounts_cannot_log_in() {
    let h = Harness::new();
    let user = h
        .state
        .db
        .create_user(&NewUser {
            email: "ben@campus.edu".into(),
            password_hash: hash_password("hunter22").unwrap(),
            full_name: "Ben".into(),
            phone_number: None,
            role: Role::Student,
            department: None,
        })
        .unwrap();
    h.state
        .db
        .update_user(user.id, &UserUpdate { is_active: Some(false), ..Default::default() })
        .unwrap();

    let (status, body) = h
        .send("POST", "/api/auth/login", None, Some(json!({ "email": "ben@campus.edu", "password": "hunter22" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");

    let stored = h.state.db.get_user_by_id(user.id).unwrap().unwrap();
    assert!(stored.last_login_at.is_none());
}

#[tokio::test]
async fn session_expiry_past_the_clock_is_an_error() {
    let h = Harness::with_session_ttl(chrono::Duration::hours(10_000_000_000));
    let student = h.user(Role::Student, None);

    let err = session::start_session(&h.state, student.id).await.unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));
}

#[tokio::test]
async fn staff_are_scoped_to_their_department() {
    let h = Harness::new();
    let student = h.user(Role::Student, None);
    let guard = h.user(Role::Staff, Some(Department::Security));
    let student_cookie = h.cookie_for(&student).await;
    let guard_cookie = h.cookie_for(&guard).await;

    let (_, alert) = h
        .send("POST", "/api/alerts", Some(&student_cookie), Some(json!({ "department": "medical" })))
        .await;
    let alert_id = alert["id"].as_str().unwrap();

    let (status, body) = h
        .send("PATCH", &format!("/api/alerts/{alert_id}"), Some(&guard_cookie), Some(json!({ "status": "acknowledged" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = h.send("GET", "/api/alerts/department/medical", Some(&guard_cookie), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, queue) = h.send("GET", "/api/alerts/department/security", Some(&guard_cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(queue.as_array().unwrap().is_empty());

    let (status, _) = h.send("GET", "/api/alerts/department/medical", Some(&student_cookie), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, chat) = h
        .send("POST", "/api/chats/sessions", Some(&student_cookie), Some(json!({ "department": "guidance" })))
        .await;
    let (status, _) = h
        .send("GET", &format!("/api/chats/messages/{}", chat["id"].as_str().unwrap()), Some(&guard_cookie), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn anonymous_chat_conversation() {
    let h = Harness::new();
    let student = h.user(Role::Student, None);
    let counselor = h.user(Role::Staff, Some(Department::Guidance));
    let student_cookie = h.cookie_for(&student).await;
    let counselor_cookie = h.cookie_for(&counselor).await;

    let (status, session) = h
        .send("POST", "/api/chats/sessions", Some(&student_cookie), Some(json!({ "department": "guidance" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(session["anonymousId"].as_str().unwrap().starts_with("Anon-"));
    let session_id = session["id"].as_str().unwrap().to_string();

    let (_, mut counselor_rx) = h.state.dispatcher.register_connection(counselor.id).await;

    let (status, _) = h
        .send(
            "POST",
            "/api/chats/messages",
            Some(&student_cookie),
            Some(json!({ "sessionId": session_id, "content": "I need to talk" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let pushed: Value = serde_json::from_str(&counselor_rx.try_recv().unwrap()).unwrap();
    assert_eq!(pushed["type"], "chat_message");
    assert!(pushed["message"].get("senderId").is_none());

    let (_, mut student_rx) = h.state.dispatcher.register_connection(student.id).await;

    let (status, _) = h
        .send(
            "POST",
            "/api/chats/messages",
            Some(&counselor_cookie),
            Some(json!({ "sessionId": session_id, "content": "I'm here" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // The student sees who answered
    let pushed: Value = serde_json::from_str(&student_rx.try_recv().unwrap()).unwrap();
    assert_eq!(pushed["type"], "chat_message");
    assert_eq!(pushed["sessionId"], session_id.as_str());
    assert_eq!(pushed["message"]["content"], "I'm here");
    assert_eq!(pushed["message"]["senderId"], counselor.id.to_string());

    let (status, blank) = h
        .send("POST", "/api/chats/messages", Some(&counselor_cookie), Some(json!({ "sessionId": session_id, "content": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(blank["error"]["code"], "VALIDATION");

    let (status, messages) = h
        .send("GET", &format!("/api/chats/messages/{session_id}"), Some(&counselor_cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "I need to talk");
    assert_eq!(messages[0]["senderRole"], "student");
    assert!(messages[0].get("senderId").is_none());
    assert_eq!(messages[1]["senderRole"], "staff");
    assert_eq!(messages[1]["senderId"], counselor.id.to_string());

    let (_, seen_by_staff) = h
        .send("GET", &format!("/api/chats/sessions/{session_id}"), Some(&counselor_cookie), None)
        .await;
    assert!(seen_by_staff.get("userId").is_none());

    let (status, read) = h
        .send("POST", &format!("/api/chats/sessions/{session_id}/read"), Some(&student_cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["updated"], 1);

    let (status, closed) = h
        .send("PATCH", &format!("/api/chats/sessions/{session_id}"), Some(&counselor_cookie), Some(json!({ "status": "closed" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "closed");

    let (status, _) = h
        .send("POST", "/api/chats/messages", Some(&student_cookie), Some(json!({ "sessionId": session_id, "content": "hello?" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_management() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, None);
    let student = h.user(Role::Student, None);
    let cookie = h.cookie_for(&admin).await;
    let student_cookie = h.cookie_for(&student).await;

    let (status, _) = h.send("GET", "/api/admin/stats", Some(&student_cookie), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h.send("DELETE", &format!("/api/admin/users/{}", admin.id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");
    assert!(h.state.db.get_user_by_id(admin.id).unwrap().is_some());

    let (status, _) = h
        .send("PATCH", &format!("/api/admin/users/{}", admin.id), Some(&cookie), Some(json!({ "isActive": false })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .send(
            "POST",
            "/api/admin/users",
            Some(&cookie),
            Some(json!({ "email": "nurse@campus.edu", "password": "password1", "fullName": "Nurse", "role": "staff" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let nurse = json!({
        "email": "nurse@campus.edu",
        "password": "password1",
        "fullName": "Nurse",
        "role": "staff",
        "department": "medical",
    });
    let (status, created) = h.send("POST", "/api/admin/users", Some(&cookie), Some(nurse.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["department"], "medical");
    let (status, _) = h.send("POST", "/api/admin/users", Some(&cookie), Some(nurse)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, stats) = h.send("GET", "/api/admin/stats", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["users"]["total"], 3);
    assert_eq!(stats["alerts"]["byStatus"]["pending"], 0);

    let (status, _) = h.send("DELETE", &format!("/api/admin/users/{}", student.id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.send("DELETE", &format!("/api/admin/users/{}", student.id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Deleting the user cascades to their sessions
    let (status, _) = h.send("GET", "/api/auth/me", Some(&student_cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, logs) = h.send("GET", "/api/admin/audit-logs", Some(&cookie), None).await;
    let actions: Vec<&str> = logs.as_array().unwrap().iter().map(|l| l["action"].as_str().unwrap()).collect();
    assert_eq!(actions, ["user_deleted", "user_created"]);
}

#[tokio::test]
async fn locations_and_health() {
    let h = Harness::new();
    let student = h.user(Role::Student, None);
    let cookie = h.cookie_for(&student).await;

    let (status, body) = h.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, locations) = h.send("GET", "/api/locations", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(locations.as_array().unwrap().len(), 5);
}
