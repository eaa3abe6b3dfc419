use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use safecampus_db::{NewMessage, is_unique_violation};
use safecampus_types::api::{
    ChatSessionResponse, CreateChatSessionRequest, MarkReadResponse, MessageResponse,
    SendMessageRequest, UpdateChatSessionRequest,
};
use safecampus_types::events::GatewayEvent;
use safecampus_types::models::{ChatSession, ChatStatus, Department, Message, SenderRole, User};

use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath};
use crate::policy::{self, Action, Resource};
use crate::state::AppState;

const HANDLE_PREFIX: &str = "Anon-";
const HANDLE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const HANDLE_LEN: usize = 6;
const HANDLE_ATTEMPTS: usize = 5;
const MAX_MESSAGE_LEN: usize = 4000;
const MAX_ATTACHMENT_URL_LEN: usize = 2048;

pub fn generate_handle() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..HANDLE_LEN)
        .map(|_| HANDLE_CHARSET[rng.random_range(0..HANDLE_CHARSET.len())] as char)
        .collect();
    format!("{HANDLE_PREFIX}{suffix}")
}

/// Student senders stay anonymous unless the viewer is the student or an admin.
fn reveal_sender(viewer: &User, session: &ChatSession, message: &Message) -> bool {
    message.sender_id != session.user_id || policy::may_see_identity(viewer, session.user_id)
}

fn message_view(viewer: &User, session: &ChatSession, message: Message) -> MessageResponse {
    let reveal = reveal_sender(viewer, session, &message);
    MessageResponse::new(message, reveal)
}

fn session_view(viewer: &User, session: ChatSession) -> ChatSessionResponse {
    let reveal = policy::may_see_identity(viewer, session.user_id);
    ChatSessionResponse::new(session, reveal)
}

/// Load a session and check `actor` may perform `action` on it.
async fn load_session(
    state: &AppState,
    actor: &User,
    action: Action,
    session_id: Uuid,
) -> Result<ChatSession, AppError> {
    let session = state
        .run_db(move |db| db.get_chat_session(session_id))
        .await?
        .ok_or(AppError::NotFound("Chat session"))?;
    policy::authorize(actor, action, Resource::ChatSession(&session)).ensure()?;
    Ok(session)
}

/// POST /api/chats/sessions — students only (enforced by the route layer).
pub async fn create_session(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiJson(req): ApiJson<CreateChatSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let department = req.department;
    let owner = actor.id;

    let session = state
        .run_db(move |db| {
            for attempt in 1..=HANDLE_ATTEMPTS {
                let handle = generate_handle();
                match db.create_chat_session(owner, &handle, department) {
                    Ok(session) => return Ok(session),
                    Err(e) if is_unique_violation(&e) => {
                        warn!("Anonymous handle {} taken (attempt {})", handle, attempt);
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(anyhow::anyhow!(
                "no free anonymous handle after {} attempts",
                HANDLE_ATTEMPTS
            ))
        })
        .await?;

    info!("Chat session {} opened with {} as {}", session.id, department, session.anonymous_id);
    Ok((StatusCode::CREATED, Json(session_view(&actor, session))))
}

pub async fn list_my_sessions(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
) -> Result<Json<Vec<ChatSessionResponse>>, AppError> {
    let owner = actor.id;
    let sessions = state
        .run_db(move |db| db.list_chat_sessions_for_user(owner))
        .await?;
    Ok(Json(sessions.into_iter().map(|s| session_view(&actor, s)).collect()))
}

pub async fn list_department_sessions(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiPath(department): ApiPath<Department>,
) -> Result<Json<Vec<ChatSessionResponse>>, AppError> {
    policy::authorize(&actor, Action::View, Resource::DepartmentQueue(department)).ensure()?;

    let sessions = state
        .run_db(move |db| db.list_chat_sessions_for_department(department))
        .await?;
    Ok(Json(sessions.into_iter().map(|s| session_view(&actor, s)).collect()))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiPath(session_id): ApiPath<Uuid>,
) -> Result<Json<ChatSessionResponse>, AppError> {
    let session = load_session(&state, &actor, Action::View, session_id).await?;
    Ok(Json(session_view(&actor, session)))
}

/// PATCH /api/chats/sessions/{id}. A closed session stays closed.
pub async fn update_session_status(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiPath(session_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateChatSessionRequest>,
) -> Result<Json<ChatSessionResponse>, AppError> {
    let session = load_session(&state, &actor, Action::Respond, session_id).await?;

    if session.status == ChatStatus::Closed && req.status != ChatStatus::Closed {
        return Err(AppError::validation("Chat session is closed"));
    }

    let status = req.status;
    let updated = state
        .run_db(move |db| db.set_chat_status(session_id, status))
        .await?
        .ok_or(AppError::NotFound("Chat session"))?;

    info!("Chat session {} -> {} by {}", session_id, status, actor.id);
    Ok(Json(session_view(&actor, updated)))
}

/// Mark the other side's messages as read.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiPath(session_id): ApiPath<Uuid>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let session = load_session(&state, &actor, Action::Respond, session_id).await?;
    let reader = sender_role_for(&actor, &session);

    let updated = state
        .run_db(move |db| db.mark_messages_read(session_id, reader))
        .await?;
    Ok(Json(MarkReadResponse { updated }))
}

fn sender_role_for(actor: &User, session: &ChatSession) -> SenderRole {
    if actor.id == session.user_id {
        SenderRole::Student
    } else {
        SenderRole::Staff
    }
}

fn validate_message(req: &SendMessageRequest) -> Result<(), AppError> {
    if req.content.trim().is_empty() {
        return Err(AppError::validation("Message content cannot be empty"));
    }
    if req.content.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::validation(format!(
            "Message content cannot exceed {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    if req.attachment_url.as_ref().is_some_and(|u| u.len() > MAX_ATTACHMENT_URL_LEN) {
        return Err(AppError::validation("Attachment URL is too long"));
    }
    Ok(())
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = load_session(&state, &actor, Action::Respond, req.session_id).await?;
    validate_message(&req)?;
    if session.status == ChatStatus::Closed {
        return Err(AppError::validation("Chat session is closed"));
    }

    let new = NewMessage {
        session_id: session.id,
        sender_id: actor.id,
        sender_role: sender_role_for(&actor, &session),
        content: req.content,
        attachment_url: req.attachment_url.filter(|u| !u.trim().is_empty()),
    };
    // A close racing with this post is caught inside the insert transaction
    let message = state
        .run_db(move |db| db.insert_message(&new))
        .await?
        .ok_or_else(|| AppError::validation("Chat session is closed"))?;
    debug!("Message {} stored in session {}", message.id, session.id);

    broadcast_message(&state, &session, &message).await;

    Ok((StatusCode::CREATED, Json(message_view(&actor, &session, message))))
}

/// The owner receives the full message; department staff receive the
/// anonymized one.
async fn broadcast_message(state: &AppState, session: &ChatSession, message: &Message) {
    let owner_event = GatewayEvent::ChatMessage {
        session_id: session.id,
        message: MessageResponse::new(message.clone(), true),
    };
    state.dispatcher.push_to_user(session.user_id, &owner_event).await;

    let department = session.department;
    let staff = match state.run_db(move |db| db.active_staff_ids(department)).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Could not look up {} staff for session {}: {}", department, session.id, e);
            return;
        }
    };

    let staff_event = GatewayEvent::ChatMessage {
        session_id: session.id,
        message: MessageResponse::new(message.clone(), message.sender_id != session.user_id),
    };
    let owner = session.user_id;
    state
        .dispatcher
        .push_to_users(staff.into_iter().filter(|id| *id != owner), &staff_event)
        .await;
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiPath(session_id): ApiPath<Uuid>,
) -> Result<Json<Vec<MessageResponse>>, AppError> {
    let session = load_session(&state, &actor, Action::View, session_id).await?;

    let messages = state.run_db(move |db| db.list_messages(session_id)).await?;
    Ok(Json(
        messages
            .into_iter()
            .map(|m| message_view(&actor, &session, m))
            .collect(),
    ))
}
