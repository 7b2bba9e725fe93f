//! End-to-end tests for the caseboard HTTP API.
//!
//! Each test builds the full router over an in-memory database and a
//! temporary blob store, then drives it with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use tokio::sync::broadcast;
use tower::ServiceExt;

use caseboard::api::AppState;
use caseboard::db::{CaseDb, DbHandle};
use caseboard::notify::Notifier;
use caseboard::server::build_router;
use caseboard::storage::BlobStore;

struct TestApp {
    router: Router,
    ws_rx: broadcast::Receiver<String>,
    blob_root: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let blob_root = dir.path().join("voice-notes");
    let db = DbHandle::new(CaseDb::new_in_memory().unwrap());
    let (ws_tx, ws_rx) = broadcast::channel(64);
    let notifier = Notifier::new(db.clone(), ws_tx.clone());
    let state = Arc::new(AppState {
        db,
        ws_tx,
        notifier,
        blobs: BlobStore::new(&blob_root).unwrap(),
        admin_token: Some("test-admin".to_string()),
    });
    TestApp {
        router: build_router(state),
        ws_rx,
        blob_root,
        _dir: dir,
    }
}

async fn send(router: &Router, req: Request<Body>) -> Response<Body> {
    router.clone().oneshot(req).await.unwrap()
}

async fn request_json(
    router: &Router,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = send(router, req).await;
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = send(router, req).await;
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Build `project -> epic -> features -> tasks`, returning (project_id, epic_id).
async fn seed_epic_with_tasks(router: &Router) -> (i64, i64) {
    let (status, project) = request_json(
        router,
        "POST",
        "/api/projects",
        serde_json::json!({"name": "Platform"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let project_id = project["id"].as_i64().unwrap();

    let (status, epic) = request_json(
        router,
        "POST",
        "/api/epics",
        serde_json::json!({"project_id": project_id, "name": "Auth"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let epic_id = epic["id"].as_i64().unwrap();

    for feature_name in ["Login", "Signup"] {
        let (status, feature) = request_json(
            router,
            "POST",
            "/api/features",
            serde_json::json!({"epic_id": epic_id, "name": feature_name}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let feature_id = feature["id"].as_i64().unwrap();

        for (title, task_status) in [("done task", "done"), ("open task", "in_progress")] {
            let (status, _) = request_json(
                router,
                "POST",
                "/api/tasks",
                serde_json::json!({
                    "feature_id": feature_id,
                    "title": title,
                    "status": task_status,
                }),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
    }
    (project_id, epic_id)
}

// ── Metrics roll-up ──────────────────────────────────────────────────

#[tokio::test]
async fn test_epic_metrics_roll_up_tasks_across_features() {
    let app = test_app();
    let (_, epic_id) = seed_epic_with_tasks(&app.router).await;

    let (status, epic) = get_json(&app.router, &format!("/api/epics/{}", epic_id)).await;
    assert_eq!(status, StatusCode::OK);
    let metrics = &epic["metrics"];
    assert_eq!(metrics["totalFeatures"], 2);
    assert_eq!(metrics["completedFeatures"], 0);
    assert_eq!(metrics["totalTasks"], 4);
    assert_eq!(metrics["completedTasks"], 2);
    assert_eq!(metrics["taskCompletionRate"], 50);
}

#[tokio::test]
async fn test_project_metrics_match_epic_totals() {
    let app = test_app();
    let (project_id, _) = seed_epic_with_tasks(&app.router).await;

    let (status, project) = get_json(&app.router, &format!("/api/projects/{}", project_id)).await;
    assert_eq!(status, StatusCode::OK);
    let metrics = &project["metrics"];
    assert_eq!(metrics["totalEpics"], 1);
    assert_eq!(metrics["completedEpics"], 0);
    assert_eq!(metrics["totalTasks"], 4);
    assert_eq!(metrics["completedTasks"], 2);
    assert_eq!(metrics["taskCompletionRate"], 50);
    // No stories or points were seeded.
    assert_eq!(metrics["velocity"], 0.0);
}

#[tokio::test]
async fn test_epic_completed_literal_counts_at_project_level() {
    let app = test_app();
    let (project_id, epic_id) = seed_epic_with_tasks(&app.router).await;

    // "done" is not terminal for epics; only "completed" is.
    let (status, _) = request_json(
        &app.router,
        "PUT",
        &format!("/api/epics/{}", epic_id),
        serde_json::json!({"status": "done"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, project) = get_json(&app.router, &format!("/api/projects/{}", project_id)).await;
    assert_eq!(project["metrics"]["completedEpics"], 0);

    let (status, _) = request_json(
        &app.router,
        "PUT",
        &format!("/api/epics/{}", epic_id),
        serde_json::json!({"status": "completed"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, project) = get_json(&app.router, &format!("/api/projects/{}", project_id)).await;
    assert_eq!(project["metrics"]["completedEpics"], 1);
    assert_eq!(project["metrics"]["epicCompletionRate"], 100);
}

#[tokio::test]
async fn test_empty_project_metrics_are_zero() {
    let app = test_app();
    let (_, project) = request_json(
        &app.router,
        "POST",
        "/api/projects",
        serde_json::json!({"name": "Empty"}),
    )
    .await;
    let id = project["id"].as_i64().unwrap();
    let (_, view) = get_json(&app.router, &format!("/api/projects/{}", id)).await;
    let metrics = &view["metrics"];
    assert_eq!(metrics["totalEpics"], 0);
    assert_eq!(metrics["epicCompletionRate"], 0);
    assert_eq!(metrics["taskCompletionRate"], 0);
}

// ── Tickets ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_ticket_defaults_to_open() {
    let app = test_app();
    let (status, ticket) = request_json(
        &app.router,
        "POST",
        "/api/tickets",
        serde_json::json!({"subject": "Login broken", "description": "Cannot log in"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(ticket["id"].as_i64().unwrap() > 0);
    assert_eq!(ticket["status"], "Open");
    assert_eq!(ticket["priority"], "Medium");
    assert_eq!(ticket["type"], "Question");
    assert!(ticket["warnings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_ticket_requires_subject() {
    let app = test_app();
    let (_, ticket) = request_json(
        &app.router,
        "POST",
        "/api/tickets",
        serde_json::json!({"subject": "s", "description": "d"}),
    )
    .await;
    let id = ticket["id"].as_i64().unwrap();

    let (status, body) = request_json(
        &app.router,
        "PUT",
        &format!("/api/tickets/{}", id),
        serde_json::json!({"subject": "", "description": "d"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Subject"));
}

#[tokio::test]
async fn test_update_ticket_ignores_server_managed_fields() {
    let app = test_app();
    let (_, ticket) = request_json(
        &app.router,
        "POST",
        "/api/tickets",
        serde_json::json!({"subject": "s", "description": "d"}),
    )
    .await;
    let id = ticket["id"].as_i64().unwrap();
    let created_at = ticket["created_at"].as_str().unwrap().to_string();

    // id and created_at in the body are stripped, not applied.
    let (status, updated) = request_json(
        &app.router,
        "PUT",
        &format!("/api/tickets/{}", id),
        serde_json::json!({
            "subject": "s2",
            "description": "d",
            "id": 9999,
            "created_at": "1970-01-01",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["id"].as_i64().unwrap(), id);
    assert_eq!(updated["created_at"], created_at.as_str());
    assert_eq!(updated["subject"], "s2");
}

#[tokio::test]
async fn test_status_change_emits_notification_only_on_transition() {
    let mut app = test_app();
    let (_, ticket) = request_json(
        &app.router,
        "POST",
        "/api/tickets",
        serde_json::json!({"subject": "s", "description": "d"}),
    )
    .await;
    let id = ticket["id"].as_i64().unwrap();
    // Drain the create fan-out.
    while app.ws_rx.try_recv().is_ok() {}

    // Same status: a TicketUpdated event, no status-change notification.
    let (status, _) = request_json(
        &app.router,
        "PUT",
        &format!("/api/tickets/{}", id),
        serde_json::json!({"subject": "s", "description": "d", "status": "Open"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let event = app.ws_rx.try_recv().unwrap();
    assert!(event.contains("TicketUpdated"));
    assert!(app.ws_rx.try_recv().is_err());

    // Real transition: notification plus TicketStatusChanged.
    let (status, _) = request_json(
        &app.router,
        "PUT",
        &format!("/api/tickets/{}", id),
        serde_json::json!({"subject": "s", "description": "d", "status": "Closed"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let first = app.ws_rx.try_recv().unwrap();
    assert!(first.contains("NotificationCreated"));
    let second = app.ws_rx.try_recv().unwrap();
    assert!(second.contains("TicketStatusChanged"));
    assert!(second.contains("\"to_status\":\"Closed\""));

    let (_, notifications) = get_json(&app.router, "/api/notifications").await;
    let kinds: Vec<&str> = notifications
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["type"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"ticket_status_changed"));
}

#[tokio::test]
async fn test_rapid_distinct_transitions_each_notify() {
    let mut app = test_app();
    let (_, ticket) = request_json(
        &app.router,
        "POST",
        "/api/tickets",
        serde_json::json!({"subject": "s", "description": "d"}),
    )
    .await;
    let id = ticket["id"].as_i64().unwrap();
    while app.ws_rx.try_recv().is_ok() {}

    // Two different transitions back to back, well inside the dedup window.
    for to in ["In Progress", "Closed"] {
        let (status, _) = request_json(
            &app.router,
            "PUT",
            &format!("/api/tickets/{}", id),
            serde_json::json!({"subject": "s", "description": "d", "status": to}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, notifications) = get_json(&app.router, "/api/notifications").await;
    let status_changes: Vec<&serde_json::Value> = notifications
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["type"] == "ticket_status_changed")
        .collect();
    assert_eq!(status_changes.len(), 2);

    let mut broadcasts = Vec::new();
    while let Ok(msg) = app.ws_rx.try_recv() {
        broadcasts.push(msg);
    }
    assert!(
        broadcasts
            .iter()
            .any(|m| m.contains("TicketStatusChanged") && m.contains("\"to_status\":\"In Progress\""))
    );
    assert!(
        broadcasts
            .iter()
            .any(|m| m.contains("TicketStatusChanged") && m.contains("\"to_status\":\"Closed\""))
    );
}

#[tokio::test]
async fn test_multipart_ticket_with_voice_notes_and_delete_cleanup() {
    let app = test_app();
    let boundary = "caseboard-test-boundary";
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"subject\"\r\n\r\n\
         Crash report\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"description\"\r\n\r\n\
         Crashes on open\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"priority\"\r\n\r\n\
         High\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"voice_note_0\"; filename=\"a.wav\"\r\n\
         Content-Type: audio/wav\r\n\r\n\
         RIFFAAAA\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"voice_note_1\"; filename=\"b.wav\"\r\n\
         Content-Type: audio/wav\r\n\r\n\
         RIFFBBBB\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"attachment_0\"; filename=\"log.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         panic at line 1\r\n\
         --{b}--\r\n",
        b = boundary
    );
    let req = Request::builder()
        .method("POST")
        .uri("/api/tickets")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();
    let resp = send(&app.router, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let ticket: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let id = ticket["id"].as_i64().unwrap();
    assert_eq!(ticket["priority"], "High");
    assert_eq!(ticket["voice_notes"].as_array().unwrap().len(), 2);
    assert_eq!(ticket["attachments"].as_array().unwrap().len(), 1);
    assert!(ticket["warnings"].as_array().unwrap().is_empty());

    // Voice note blobs are on disk and served back.
    let note_url = ticket["voice_notes"][0]["file_url"].as_str().unwrap();
    let req = Request::builder()
        .uri(note_url)
        .body(Body::empty())
        .unwrap();
    let resp = send(&app.router, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let audio = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&audio[..], b"RIFFAAAA");
    let blob_dir = app.blob_root.join(id.to_string());
    assert_eq!(std::fs::read_dir(&blob_dir).unwrap().count(), 2);

    // Attachment is served with its stored mime type.
    let attachment_id = ticket["attachments"][0]["id"].as_i64().unwrap();
    let req = Request::builder()
        .uri(format!("/api/attachments/{}", attachment_id))
        .body(Body::empty())
        .unwrap();
    let resp = send(&app.router, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );

    // Delete removes the blobs and the ticket.
    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/tickets/{}", id))
        .body(Body::empty())
        .unwrap();
    let resp = send(&app.router, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(std::fs::read_dir(&blob_dir).unwrap().count(), 0);

    let (status, _) = get_json(&app.router, &format!("/api/tickets/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ticket_filters_and_admin_listing() {
    let app = test_app();
    for (subject, priority) in [("a", "High"), ("b", "Low")] {
        request_json(
            &app.router,
            "POST",
            "/api/tickets",
            serde_json::json!({"subject": subject, "description": "d", "priority": priority}),
        )
        .await;
    }

    let (status, tickets) = get_json(&app.router, "/api/tickets?priority=High").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tickets.as_array().unwrap().len(), 1);
    assert_eq!(tickets[0]["subject"], "a");

    let (status, _) = get_json(&app.router, "/api/tickets?bogus=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .uri("/api/admin/tickets")
        .header(header::AUTHORIZATION, "Bearer test-admin")
        .body(Body::empty())
        .unwrap();
    let resp = send(&app.router, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let all: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);
}

// ── Notifications ────────────────────────────────────────────────────

#[tokio::test]
async fn test_notifications_bulk_lifecycle() {
    let mut app = test_app();
    let mut ids = Vec::new();
    for i in 0..3 {
        let (status, n) = request_json(
            &app.router,
            "POST",
            "/api/notifications",
            serde_json::json!({
                "title": format!("n{}", i),
                "message": "m",
                "user_identifier": "u-1",
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        ids.push(n["id"].as_i64().unwrap());
    }

    let (status, updated) = request_json(
        &app.router,
        "PUT",
        "/api/notifications",
        serde_json::json!({"ids": [ids[0], ids[1]], "action": "mark_read"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(updated.as_array().unwrap().iter().all(|n| n["read"] == true));

    let (_, unread) = get_json(&app.router, "/api/notifications?unread_only=true").await;
    assert_eq!(unread.as_array().unwrap().len(), 1);

    while app.ws_rx.try_recv().is_ok() {}
    let (status, result) = request_json(
        &app.router,
        "DELETE",
        "/api/notifications",
        serde_json::json!({"ids": [ids[2]]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["deleted"], 1);
    let event = app.ws_rx.try_recv().unwrap();
    assert!(event.contains("NotificationsDeleted"));
    assert!(event.contains(&format!("[{}]", ids[2])));

    let (status, result) = request_json(
        &app.router,
        "DELETE",
        "/api/notifications",
        serde_json::json!({"clear_all": true, "user_identifier": "u-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["deleted"], 2);
    let event = app.ws_rx.try_recv().unwrap();
    assert!(event.contains("NotificationsCleared"));
    assert!(event.contains("u-1"));

    let (_, remaining) = get_json(&app.router, "/api/notifications").await;
    assert!(remaining.as_array().unwrap().is_empty());
}

// ── Hierarchy CRUD edges ─────────────────────────────────────────────

#[tokio::test]
async fn test_orphan_epic_is_rejected() {
    let app = test_app();
    let (status, body) = request_json(
        &app.router,
        "POST",
        "/api/epics",
        serde_json::json!({"project_id": 999, "name": "orphan"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_delete_project_cascades() {
    let app = test_app();
    let (project_id, epic_id) = seed_epic_with_tasks(&app.router).await;

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/projects/{}", project_id))
        .body(Body::empty())
        .unwrap();
    let resp = send(&app.router, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let (status, _) = get_json(&app.router, &format!("/api/epics/{}", epic_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_resources_return_404() {
    let app = test_app();
    for uri in [
        "/api/projects/999",
        "/api/epics/999",
        "/api/features/999",
        "/api/tasks/999",
        "/api/sub-tasks/999",
        "/api/tickets/999",
        "/api/attachments/999",
        "/api/candidates/999",
        "/api/drafts/999",
    ] {
        let (status, body) = get_json(&app.router, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert!(body["error"].is_string(), "{}", uri);
    }
}

// ── HR surfaces ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_candidate_posting_draft_crud() {
    let app = test_app();
    let (status, candidate) = request_json(
        &app.router,
        "POST",
        "/api/candidates",
        serde_json::json!({"name": "Alex", "role": "Backend"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(candidate["status"], "applied");

    let (status, posting) = request_json(
        &app.router,
        "POST",
        "/api/interview-postings",
        serde_json::json!({"title": "Backend engineer"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(posting["status"], "open");

    let (status, draft) = request_json(
        &app.router,
        "POST",
        "/api/drafts",
        serde_json::json!({"kind": "ticket", "payload": {"subject": "wip"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let draft_id = draft["id"].as_i64().unwrap();

    let (status, draft) = request_json(
        &app.router,
        "PUT",
        &format!("/api/drafts/{}", draft_id),
        serde_json::json!({"payload": {"subject": "v2"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(draft["payload"]["subject"], "v2");

    let (status, drafts) = get_json(&app.router, "/api/drafts?kind=ticket").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(drafts.as_array().unwrap().len(), 1);
}
