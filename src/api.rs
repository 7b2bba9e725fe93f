use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::db::{
    CandidatePatch, DbHandle, DraftPatch, EpicPatch, FeaturePatch, NewAttachment, NewCandidate,
    NewDraft, NewEpic, NewFeature, NewNotification, NewPosting, NewProject, NewSubTask, NewTask,
    NewTicket, PostingPatch, ProjectPatch, SubTaskPatch, TaskPatch, TicketFilter, TicketPatch,
};
use crate::errors::ApiError;
use crate::metrics::{EpicView, FeatureView, ProjectView, TaskView};
use crate::models::{Ticket, TicketPriority, TicketStatus};
use crate::notify::Notifier;
use crate::storage::{BlobStore, VOICE_NOTE_URL_PREFIX};
use crate::ws::{WsMessage, broadcast_message};

/// Largest attachment accepted inline, in bytes.
const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_NOTIFICATION_LIMIT: i64 = 50;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub notifier: Notifier,
    pub blobs: BlobStore,
    pub admin_token: Option<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub description: String,
    pub priority: Option<TicketPriority>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub user_identifier: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateTicketRequest {
    pub subject: String,
    pub description: String,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub user_identifier: Option<String>,
}

#[derive(Deserialize)]
pub struct MarkNotificationsRequest {
    pub ids: Vec<i64>,
    pub action: String,
}

#[derive(Deserialize)]
pub struct DeleteNotificationsRequest {
    pub ids: Option<Vec<i64>>,
    #[serde(default)]
    pub clear_all: bool,
    pub user_identifier: Option<String>,
}

// ── Filter query types ────────────────────────────────────────────────
//
// Unknown filter keys are a client error, not something to silently
// ignore; `deny_unknown_fields` turns them into a 400 at extraction.

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EpicListQuery {
    pub project_id: Option<i64>,
    pub status: Option<String>,
    pub priority: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FeatureListQuery {
    pub epic_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TaskListQuery {
    pub feature_id: Option<i64>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SubTaskListQuery {
    pub task_id: Option<i64>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TicketListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub user_identifier: Option<String>,
}

impl TicketListQuery {
    fn into_filter(self) -> Result<TicketFilter, ApiError> {
        let status = self
            .status
            .map(|s| s.parse::<TicketStatus>())
            .transpose()
            .map_err(ApiError::BadRequest)?;
        let priority = self
            .priority
            .map(|p| p.parse::<TicketPriority>())
            .transpose()
            .map_err(ApiError::BadRequest)?;
        Ok(TicketFilter {
            status,
            priority,
            ticket_type: self.ticket_type,
            user_identifier: self.user_identifier,
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NotificationListQuery {
    pub user_identifier: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CandidateListQuery {
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PostingListQuery {
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DraftListQuery {
    pub kind: Option<String>,
    pub user_identifier: Option<String>,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/epics", get(list_epics).post(create_epic))
        .route(
            "/api/epics/{id}",
            get(get_epic).put(update_epic).delete(delete_epic),
        )
        .route("/api/features", get(list_features).post(create_feature))
        .route(
            "/api/features/{id}",
            get(get_feature).put(update_feature).delete(delete_feature),
        )
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/sub-tasks", get(list_sub_tasks).post(create_sub_task))
        .route(
            "/api/sub-tasks/{id}",
            get(get_sub_task)
                .put(update_sub_task)
                .delete(delete_sub_task),
        )
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route(
            "/api/tickets/{id}",
            get(get_ticket).put(update_ticket).delete(delete_ticket),
        )
        .route("/api/attachments/{id}", get(serve_attachment))
        .route("/api/voice-notes/{*path}", get(serve_voice_note))
        .route(
            "/api/notifications",
            get(list_notifications)
                .post(create_notification)
                .put(mark_notifications)
                .delete(delete_notifications),
        )
        .route("/api/candidates", get(list_candidates).post(create_candidate))
        .route(
            "/api/candidates/{id}",
            get(get_candidate)
                .put(update_candidate)
                .delete(delete_candidate),
        )
        .route(
            "/api/interview-postings",
            get(list_postings).post(create_posting),
        )
        .route(
            "/api/interview-postings/{id}",
            get(get_posting).put(update_posting).delete(delete_posting),
        )
        .route("/api/drafts", get(list_drafts).post(create_draft))
        .route(
            "/api/drafts/{id}",
            get(get_draft).put(update_draft).delete(delete_draft),
        )
        .route("/api/admin/tickets", get(admin_list_tickets))
        .route("/health", get(health_check))
}

// ── Projects ──────────────────────────────────────────────────────────

async fn list_projects(
    State(state): State<SharedState>,
    Query(q): Query<ProjectListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let projects = state
        .db
        .call(move |db| db.list_projects(q.status, q.priority))
        .await
        .map_err(ApiError::from_store)?;
    let views: Vec<ProjectView> = projects.into_iter().map(ProjectView::from).collect();
    Ok(Json(views))
}

async fn create_project(
    State(state): State<SharedState>,
    Json(req): Json<NewProject>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Project name is required".into()));
    }
    let project = state
        .db
        .call(move |db| db.create_project(req))
        .await
        .map_err(ApiError::from_store)?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ProjectCreated {
            project_id: project.id,
            name: project.name.clone(),
        },
    );
    Ok(Json(project))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.get_project(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", id)))?;
    Ok(Json(ProjectView::from(project)))
}

async fn update_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<ProjectPatch>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("Project name cannot be empty".into()));
        }
    }
    let project = state
        .db
        .call(move |db| db.update_project(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", id)))?;
    Ok(Json(ProjectView::from(project)))
}

async fn delete_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_project(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Project {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Epics ─────────────────────────────────────────────────────────────

async fn list_epics(
    State(state): State<SharedState>,
    Query(q): Query<EpicListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let epics = state
        .db
        .call(move |db| db.list_epics(q.project_id, q.status, q.priority))
        .await
        .map_err(ApiError::from_store)?;
    let views: Vec<EpicView> = epics.into_iter().map(EpicView::from).collect();
    Ok(Json(views))
}

async fn create_epic(
    State(state): State<SharedState>,
    Json(req): Json<NewEpic>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Epic name is required".into()));
    }
    let epic = state
        .db
        .call(move |db| db.create_epic(req))
        .await
        .map_err(ApiError::from_store)?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::EpicCreated {
            epic_id: epic.id,
            project_id: epic.project_id,
            name: epic.name.clone(),
        },
    );
    Ok(Json(epic))
}

async fn get_epic(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let epic = state
        .db
        .call(move |db| db.get_epic(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Epic {} not found", id)))?;
    Ok(Json(EpicView::from(epic)))
}

async fn update_epic(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<EpicPatch>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("Epic name cannot be empty".into()));
        }
    }
    let epic = state
        .db
        .call(move |db| db.update_epic(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Epic {} not found", id)))?;
    Ok(Json(EpicView::from(epic)))
}

async fn delete_epic(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_epic(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Epic {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Features ──────────────────────────────────────────────────────────

async fn list_features(
    State(state): State<SharedState>,
    Query(q): Query<FeatureListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let features = state
        .db
        .call(move |db| db.list_features(q.epic_id, q.status))
        .await
        .map_err(ApiError::from_store)?;
    let views: Vec<FeatureView> = features.into_iter().map(FeatureView::from).collect();
    Ok(Json(views))
}

async fn create_feature(
    State(state): State<SharedState>,
    Json(req): Json<NewFeature>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Feature name is required".into()));
    }
    let feature = state
        .db
        .call(move |db| db.create_feature(req))
        .await
        .map_err(ApiError::from_store)?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::FeatureCreated {
            feature_id: feature.id,
            epic_id: feature.epic_id,
            name: feature.name.clone(),
        },
    );
    Ok(Json(feature))
}

async fn get_feature(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let feature = state
        .db
        .call(move |db| db.get_feature(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Feature {} not found", id)))?;
    Ok(Json(FeatureView::from(feature)))
}

async fn update_feature(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<FeaturePatch>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("Feature name cannot be empty".into()));
        }
    }
    let feature = state
        .db
        .call(move |db| db.update_feature(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Feature {} not found", id)))?;
    Ok(Json(FeatureView::from(feature)))
}

async fn delete_feature(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_feature(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Feature {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Tasks ─────────────────────────────────────────────────────────────

async fn list_tasks(
    State(state): State<SharedState>,
    Query(q): Query<TaskListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .db
        .call(move |db| db.list_tasks(q.feature_id, q.status, q.assigned_to))
        .await
        .map_err(ApiError::from_store)?;
    let views: Vec<TaskView> = tasks.into_iter().map(TaskView::from).collect();
    Ok(Json(views))
}

async fn create_task(
    State(state): State<SharedState>,
    Json(req): Json<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Task title is required".into()));
    }
    let task = state
        .db
        .call(move |db| db.create_task(req))
        .await
        .map_err(ApiError::from_store)?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskCreated {
            task_id: task.id,
            feature_id: task.feature_id,
            title: task.title.clone(),
        },
    );
    Ok(Json(task))
}

async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| db.get_task(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", id)))?;
    Ok(Json(TaskView::from(task)))
}

async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<TaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(ApiError::BadRequest("Task title cannot be empty".into()));
        }
    }
    let task = state
        .db
        .call(move |db| db.update_task(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", id)))?;
    Ok(Json(TaskView::from(task)))
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_task(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Task {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Sub-tasks ─────────────────────────────────────────────────────────

async fn list_sub_tasks(
    State(state): State<SharedState>,
    Query(q): Query<SubTaskListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sub_tasks = state
        .db
        .call(move |db| db.list_sub_tasks(q.task_id, q.status, q.assigned_to))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(sub_tasks))
}

async fn create_sub_task(
    State(state): State<SharedState>,
    Json(req): Json<NewSubTask>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Sub-task title is required".into()));
    }
    let sub_task = state
        .db
        .call(move |db| db.create_sub_task(req))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(sub_task))
}

async fn get_sub_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let sub_task = state
        .db
        .call(move |db| db.get_sub_task(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Sub-task {} not found", id)))?;
    Ok(Json(sub_task))
}

async fn update_sub_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<SubTaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(ApiError::BadRequest("Sub-task title cannot be empty".into()));
        }
    }
    let sub_task = state
        .db
        .call(move |db| db.update_sub_task(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Sub-task {} not found", id)))?;
    Ok(Json(sub_task))
}

async fn delete_sub_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_sub_task(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Sub-task {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Tickets ───────────────────────────────────────────────────────────

async fn list_tickets(
    State(state): State<SharedState>,
    Query(q): Query<TicketListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = q.into_filter()?;
    let tickets = state
        .db
        .call(move |db| db.list_tickets(filter))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(tickets))
}

/// Create a ticket from either a JSON body or a multipart form carrying
/// voice notes (`voice_note_*` fields) and attachments (`attachment_*`
/// fields) alongside the text fields.
async fn create_ticket(
    State(state): State<SharedState>,
    req: Request,
) -> Result<Response, ApiError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?;
        create_ticket_multipart(state, multipart).await
    } else {
        let Json(body) = Json::<CreateTicketRequest>::from_request(req, &())
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
        create_ticket_json(state, body).await
    }
}

async fn create_ticket_json(
    state: SharedState,
    req: CreateTicketRequest,
) -> Result<Response, ApiError> {
    let payload = ticket_payload(
        req.subject,
        req.description,
        req.priority,
        req.ticket_type,
        req.user_identifier,
    )?;
    let ticket = state
        .db
        .call(move |db| db.create_ticket(payload))
        .await
        .map_err(ApiError::from_store)?;
    let warnings = state.notifier.ticket_created(&ticket).await;
    Ok(ticket_response(ticket, warnings))
}

async fn create_ticket_multipart(
    state: SharedState,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut subject = String::new();
    let mut description = String::new();
    let mut priority = None;
    let mut ticket_type = None;
    let mut user_identifier = None;
    // (field name, bytes)
    let mut voice_notes: Vec<(String, Vec<u8>)> = Vec::new();
    // (field name, original file name, content type, bytes)
    let mut attachments: Vec<(String, String, String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "subject" => subject = read_text_field(field).await?,
            "description" => description = read_text_field(field).await?,
            "priority" => {
                let raw = read_text_field(field).await?;
                priority = Some(
                    raw.parse::<TicketPriority>()
                        .map_err(ApiError::BadRequest)?,
                );
            }
            "type" => ticket_type = Some(read_text_field(field).await?),
            "user_identifier" => user_identifier = Some(read_text_field(field).await?),
            _ if name.starts_with("voice_note") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", name, e)))?;
                voice_notes.push((name, bytes.to_vec()));
            }
            _ if name.starts_with("attachment") => {
                let file_name = field.file_name().unwrap_or(&name).to_string();
                let content_type = field
                    .content_type()
                    .map(|ct| ct.to_string())
                    .unwrap_or_else(|| {
                        mime_guess::from_path(&file_name)
                            .first_or_octet_stream()
                            .to_string()
                    });
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", name, e)))?;
                attachments.push((name, file_name, content_type, bytes.to_vec()));
            }
            _ => {
                // Unknown form fields are dropped, matching the JSON path.
            }
        }
    }

    let payload = ticket_payload(subject, description, priority, ticket_type, user_identifier)?;
    let user = payload.user_identifier.clone();
    let ticket = state
        .db
        .call(move |db| db.create_ticket(payload))
        .await
        .map_err(ApiError::from_store)?;
    let ticket_id = ticket.id;

    // Media persistence is best-effort: the ticket stands even when a blob
    // or attachment fails, and each failure becomes a response warning.
    let mut warnings = Vec::new();
    for (field_name, bytes) in voice_notes {
        match state.blobs.store_voice_note(ticket_id, &field_name, &bytes) {
            Ok(blob) => {
                let url = blob.url.clone();
                if let Err(e) = state
                    .db
                    .call(move |db| db.add_voice_note(ticket_id, &url, 0))
                    .await
                {
                    tracing::warn!(ticket_id, "failed to record voice note: {}", e);
                    warnings.push(format!("Failed to save voice note {}: {}", field_name, e));
                }
            }
            Err(e) => {
                tracing::warn!(ticket_id, "failed to store voice note: {}", e);
                warnings.push(format!("Failed to save voice note {}: {}", field_name, e));
            }
        }
    }
    for (field_name, file_name, content_type, bytes) in attachments {
        if bytes.len() > MAX_ATTACHMENT_BYTES {
            warnings.push(format!(
                "Attachment {} exceeds the {} MiB limit and was skipped",
                file_name,
                MAX_ATTACHMENT_BYTES / (1024 * 1024)
            ));
            continue;
        }
        let new_attachment = NewAttachment {
            ticket_id,
            original_name: file_name.clone(),
            mime_type: content_type,
            file_data: bytes,
            user_identifier: user.clone(),
        };
        if let Err(e) = state
            .db
            .call(move |db| db.add_attachment(new_attachment))
            .await
        {
            tracing::warn!(ticket_id, "failed to store attachment: {}", e);
            warnings.push(format!("Failed to save attachment {}: {}", field_name, e));
        }
    }

    // Re-read so the response carries the recorded media.
    let ticket = state
        .db
        .call(move |db| db.get_ticket(ticket_id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::Internal(format!("Ticket {} vanished after create", ticket_id)))?;
    warnings.extend(state.notifier.ticket_created(&ticket).await);
    Ok(ticket_response(ticket, warnings))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid form field: {}", e)))
}

fn ticket_payload(
    subject: String,
    description: String,
    priority: Option<TicketPriority>,
    ticket_type: Option<String>,
    user_identifier: Option<String>,
) -> Result<NewTicket, ApiError> {
    if subject.trim().is_empty() {
        return Err(ApiError::BadRequest("Subject is required".into()));
    }
    if description.trim().is_empty() {
        return Err(ApiError::BadRequest("Description is required".into()));
    }
    Ok(NewTicket {
        subject,
        description,
        status: TicketStatus::Open,
        priority: priority.unwrap_or(TicketPriority::Medium),
        ticket_type: ticket_type.unwrap_or_else(|| "Question".to_string()),
        user_identifier,
    })
}

/// Serialize a ticket with the `warnings` array appended.
fn ticket_response(ticket: Ticket, warnings: Vec<String>) -> Response {
    let mut body = match serde_json::to_value(&ticket) {
        Ok(v) => v,
        Err(e) => return ApiError::Internal(e.to_string()).into_response(),
    };
    body["warnings"] = serde_json::Value::from(warnings);
    Json(body).into_response()
}

async fn get_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .db
        .call(move |db| db.get_ticket(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Ticket {} not found", id)))?;
    Ok(Json(ticket))
}

async fn update_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.subject.trim().is_empty() {
        return Err(ApiError::BadRequest("Subject is required".into()));
    }
    if req.description.trim().is_empty() {
        return Err(ApiError::BadRequest("Description is required".into()));
    }

    let before = state
        .db
        .call(move |db| db.get_ticket(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Ticket {} not found", id)))?;

    let patch = TicketPatch {
        subject: req.subject,
        description: req.description,
        status: req.status,
        priority: req.priority,
        ticket_type: req.ticket_type,
        user_identifier: req.user_identifier,
    };
    let ticket = state
        .db
        .call(move |db| db.update_ticket(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Ticket {} not found", id)))?;

    // Only a real transition fans out as a status change.
    let warnings = if ticket.status != before.status {
        state
            .notifier
            .ticket_status_changed(&ticket, before.status.as_str(), ticket.status.as_str())
            .await
    } else {
        broadcast_message(
            &state.ws_tx,
            &WsMessage::TicketUpdated {
                ticket: ticket.clone(),
            },
        );
        Vec::new()
    };
    Ok(ticket_response(ticket, warnings))
}

async fn delete_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .db
        .call(move |db| db.get_ticket(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Ticket {} not found", id)))?;

    // Blob cleanup is best-effort; a missing file never blocks the delete.
    for note in &ticket.voice_notes {
        if let Some(rel) = note
            .file_url
            .strip_prefix(&format!("{}/{}/", VOICE_NOTE_URL_PREFIX, id))
        {
            if let Err(e) = state.blobs.remove(id, rel) {
                tracing::warn!(ticket_id = id, "failed to remove voice note blob: {}", e);
            }
        }
    }

    let deleted = state
        .db
        .call(move |db| db.delete_ticket(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Ticket {} not found", id)));
    }
    state.notifier.ticket_deleted(id, &ticket.subject).await;
    Ok(StatusCode::NO_CONTENT)
}

// ── Media serving ─────────────────────────────────────────────────────

async fn serve_attachment(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let attachment = state
        .db
        .call(move |db| db.get_attachment(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Attachment {} not found", id)))?;
    let disposition = format!(
        "inline; filename=\"{}\"",
        attachment.original_name.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, attachment.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(attachment.file_data),
    )
        .into_response())
}

async fn serve_voice_note(
    State(state): State<SharedState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let file = state
        .blobs
        .resolve(&path)
        .ok_or_else(|| ApiError::NotFound(format!("Voice note {} not found", path)))?;
    let bytes = tokio::fs::read(&file)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read voice note: {}", e)))?;
    let mime = mime_guess::from_path(&file).first_or_octet_stream();
    Ok((
        [(header::CONTENT_TYPE, mime.to_string())],
        Body::from(bytes),
    )
        .into_response())
}

// ── Notifications ─────────────────────────────────────────────────────

async fn list_notifications(
    State(state): State<SharedState>,
    Query(q): Query<NotificationListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT);
    if limit <= 0 {
        return Err(ApiError::BadRequest("limit must be positive".into()));
    }
    let notifications = state
        .db
        .call(move |db| db.list_notifications(q.user_identifier, q.unread_only, limit))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(notifications))
}

async fn create_notification(
    State(state): State<SharedState>,
    Json(req): Json<NewNotification>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Title is required".into()));
    }
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message is required".into()));
    }
    let notification = state
        .db
        .call(move |db| db.create_notification(req))
        .await
        .map_err(ApiError::from_store)?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::NotificationCreated {
            notification: notification.clone(),
        },
    );
    Ok(Json(notification))
}

async fn mark_notifications(
    State(state): State<SharedState>,
    Json(req): Json<MarkNotificationsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let read = match req.action.as_str() {
        "mark_read" => true,
        "mark_unread" => false,
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unknown action: {} (expected mark_read or mark_unread)",
                other
            )));
        }
    };
    let ids = req.ids.clone();
    let updated = state
        .db
        .call(move |db| db.mark_notifications(&ids, read))
        .await
        .map_err(ApiError::from_store)?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::NotificationsRead { ids: req.ids, read },
    );
    Ok(Json(updated))
}

async fn delete_notifications(
    State(state): State<SharedState>,
    Json(req): Json<DeleteNotificationsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = if req.clear_all {
        let user = req.user_identifier.ok_or_else(|| {
            ApiError::BadRequest("clear_all requires a user_identifier".into())
        })?;
        let for_db = user.clone();
        let deleted = state
            .db
            .call(move |db| db.clear_notifications(&for_db))
            .await
            .map_err(ApiError::from_store)?;
        broadcast_message(
            &state.ws_tx,
            &WsMessage::NotificationsCleared {
                user_identifier: user,
            },
        );
        deleted
    } else {
        let ids = req
            .ids
            .ok_or_else(|| ApiError::BadRequest("ids or clear_all is required".into()))?;
        let for_db = ids.clone();
        let deleted = state
            .db
            .call(move |db| db.delete_notifications(&for_db))
            .await
            .map_err(ApiError::from_store)?;
        broadcast_message(&state.ws_tx, &WsMessage::NotificationsDeleted { ids });
        deleted
    };
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

// ── Candidates ────────────────────────────────────────────────────────

async fn list_candidates(
    State(state): State<SharedState>,
    Query(q): Query<CandidateListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let candidates = state
        .db
        .call(move |db| db.list_candidates(q.status))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(candidates))
}

async fn create_candidate(
    State(state): State<SharedState>,
    Json(req): Json<NewCandidate>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Candidate name is required".into()));
    }
    let candidate = state
        .db
        .call(move |db| db.create_candidate(req))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(candidate))
}

async fn get_candidate(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let candidate = state
        .db
        .call(move |db| db.get_candidate(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Candidate {} not found", id)))?;
    Ok(Json(candidate))
}

async fn update_candidate(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<CandidatePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let candidate = state
        .db
        .call(move |db| db.update_candidate(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Candidate {} not found", id)))?;
    Ok(Json(candidate))
}

async fn delete_candidate(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_candidate(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Candidate {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Interview postings ────────────────────────────────────────────────

async fn list_postings(
    State(state): State<SharedState>,
    Query(q): Query<PostingListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let postings = state
        .db
        .call(move |db| db.list_postings(q.status))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(postings))
}

async fn create_posting(
    State(state): State<SharedState>,
    Json(req): Json<NewPosting>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Posting title is required".into()));
    }
    let posting = state
        .db
        .call(move |db| db.create_posting(req))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(posting))
}

async fn get_posting(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let posting = state
        .db
        .call(move |db| db.get_posting(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Posting {} not found", id)))?;
    Ok(Json(posting))
}

async fn update_posting(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<PostingPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let posting = state
        .db
        .call(move |db| db.update_posting(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Posting {} not found", id)))?;
    Ok(Json(posting))
}

async fn delete_posting(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_posting(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Posting {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Drafts ────────────────────────────────────────────────────────────

async fn list_drafts(
    State(state): State<SharedState>,
    Query(q): Query<DraftListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let drafts = state
        .db
        .call(move |db| db.list_drafts(q.kind, q.user_identifier))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(drafts))
}

async fn create_draft(
    State(state): State<SharedState>,
    Json(req): Json<NewDraft>,
) -> Result<impl IntoResponse, ApiError> {
    if req.kind.trim().is_empty() {
        return Err(ApiError::BadRequest("Draft kind is required".into()));
    }
    let draft = state
        .db
        .call(move |db| db.create_draft(req))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(draft))
}

async fn get_draft(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let draft = state
        .db
        .call(move |db| db.get_draft(id))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Draft {} not found", id)))?;
    Ok(Json(draft))
}

async fn update_draft(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(patch): Json<DraftPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let draft = state
        .db
        .call(move |db| db.update_draft(id, patch))
        .await
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::NotFound(format!("Draft {} not found", id)))?;
    Ok(Json(draft))
}

async fn delete_draft(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_draft(id))
        .await
        .map_err(ApiError::from_store)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Draft {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Admin ─────────────────────────────────────────────────────────────

async fn admin_list_tickets(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = state
        .admin_token
        .as_deref()
        .ok_or_else(|| ApiError::Forbidden("Admin access is not configured".into()))?;
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;
    let presented = auth
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Expected a Bearer token".into()))?;
    if presented != token {
        return Err(ApiError::Forbidden("Invalid admin token".into()));
    }
    let tickets = state
        .db
        .call(move |db| db.list_tickets(TicketFilter::default()))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(tickets))
}

// ── Health ────────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

// ── Tests ─────────────────────────────────────────────────────────────
