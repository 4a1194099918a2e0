// API handlers. Database work happens inside `AppState::with_db` so the
// connection lock is released before any upstream call is awaited.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{ApiError, ApiResponse, AppState};
use crate::chat::{save_message, save_new_replies, assign_thread, AssistantApi, ChatMessage, ChatRole, RunStatus};
use crate::entities::{
    self, buyers_for_realtor, complete_buyer_step, find_realtor_by_email, get_realtor,
    BuyerAccount, BuyerProgress, BuyerStep,
};
use crate::invites::{InviteRegistry, InviteCode, InviteValidation};
use crate::relay::ContactForm;
use crate::schema::{describe, is_valid_email, validate_email};
use crate::signup::{sign_up_buyer, SignupRequest};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn payload<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn assistant(state: &AppState) -> Result<Arc<dyn AssistantApi>, ApiError> {
    state.assistant.clone().ok_or(ApiError::Upstream("Assistant"))
}

fn require(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("Missing required field: {}", field)));
    }
    Ok(())
}

// ============================================================================
// Health
// ============================================================================

/// GET /api/health - Health check
pub async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

// ============================================================================
// Realtors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateRealtorRequest {
    pub name: String,
    pub email: String,
}

/// POST /api/realtors
pub async fn create_realtor(
    State(state): State<AppState>,
    body: Result<Json<CreateRealtorRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload(body)?;
    require(&request.name, "name")?;
    validate_email(&request.email).map_err(|errors| ApiError::BadRequest(describe(&errors)))?;

    let realtor = state.with_db(|conn| {
        if find_realtor_by_email(conn, &request.email)?.is_some() {
            return Err(ApiError::Conflict(format!(
                "A realtor with email {} already exists",
                request.email.trim().to_lowercase()
            )));
        }
        Ok(entities::create_realtor(conn, &request.name, &request.email)?)
    })?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(realtor))))
}

/// GET /api/realtors/:id/buyers
pub async fn realtor_buyers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<BuyerAccount>> {
    let buyers = state.with_db(|conn| {
        if get_realtor(conn, &id)?.is_none() {
            return Err(ApiError::NotFound(format!("Realtor not found: {}", id)));
        }
        Ok(buyers_for_realtor(conn, &id)?)
    })?;

    Ok(Json(ApiResponse::ok(buyers)))
}

/// GET /api/realtors/:id/invites - pending invites only
pub async fn realtor_invites(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<InviteCode>> {
    let invites = state.with_db(|conn| {
        if get_realtor(conn, &id)?.is_none() {
            return Err(ApiError::NotFound(format!("Realtor not found: {}", id)));
        }
        Ok(InviteRegistry::new(conn).pending_invites_for_realtor(&id)?)
    })?;

    Ok(Json(ApiResponse::ok(invites)))
}

// ============================================================================
// Invites
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
    pub realtor_id: String,
}

/// POST /api/invites
pub async fn create_invite(
    State(state): State<AppState>,
    body: Result<Json<CreateInviteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload(body)?;
    require(&request.realtor_id, "realtor_id")?;
    validate_email(&request.email).map_err(|errors| ApiError::BadRequest(describe(&errors)))?;

    let invite = state.with_db(|conn| {
        if get_realtor(conn, &request.realtor_id)?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Realtor not found: {}",
                request.realtor_id
            )));
        }
        let registry = InviteRegistry::with_policy(conn, state.config.invite_policy());
        Ok(registry.create_invite_code(&request.email, &request.realtor_id)?)
    })?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(invite))))
}

/// GET /api/invites/:code - validate a code (always 200; see `valid`)
pub async fn validate_invite(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<InviteValidation> {
    let validation = state.with_db(|conn| {
        Ok(InviteRegistry::with_policy(conn, state.config.invite_policy()).validate_invite_code(&code))
    })?;

    Ok(Json(ApiResponse::ok(validation)))
}

/// DELETE /api/invites/:code - revoke a pending code
pub async fn revoke_invite(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<String> {
    let revoked = state.with_db(|conn| Ok(InviteRegistry::new(conn).revoke(&code)?))?;

    if !revoked {
        return Err(ApiError::NotFound(format!(
            "No pending invite with code {}",
            code.trim().to_uppercase()
        )));
    }
    Ok(Json(ApiResponse::ok(code.trim().to_uppercase())))
}

// ============================================================================
// Signup and buyers
// ============================================================================

/// POST /api/signup
pub async fn signup(
    State(state): State<AppState>,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload(body)?;
    let policy = state.config.invite_policy();

    let buyer = state.with_db(|conn| Ok(sign_up_buyer(conn, &policy, &request)?))?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(buyer))))
}

#[derive(Debug, Serialize)]
pub struct BuyerView {
    pub buyer: BuyerAccount,
    pub progress: BuyerProgress,
}

impl From<BuyerAccount> for BuyerView {
    fn from(buyer: BuyerAccount) -> Self {
        BuyerView {
            progress: buyer.progress(),
            buyer,
        }
    }
}

/// GET /api/buyers/:id
pub async fn get_buyer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BuyerView> {
    let buyer = state
        .with_db(|conn| Ok(entities::get_buyer(conn, &id)?))?
        .ok_or_else(|| ApiError::NotFound(format!("Buyer not found: {}", id)))?;

    Ok(Json(ApiResponse::ok(buyer.into())))
}

/// POST /api/buyers/:id/steps/:step
pub async fn complete_step(
    State(state): State<AppState>,
    Path((id, step)): Path<(String, u8)>,
) -> ApiResult<BuyerView> {
    let step = BuyerStep::from_number(step)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown step {}", step)))?;

    let buyer = state.with_db(|conn| {
        if entities::get_buyer(conn, &id)?.is_none() {
            return Err(ApiError::NotFound(format!("Buyer not found: {}", id)));
        }
        Ok(complete_buyer_step(conn, &id, step)?)
    })?;

    Ok(Json(ApiResponse::ok(buyer.into())))
}

// ============================================================================
// Assistant proxy
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub buyer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ThreadCreated {
    pub thread_id: String,
}

/// POST /api/chat/threads - body is optional; `buyer_id` links the thread
pub async fn create_thread(State(state): State<AppState>, body: Bytes) -> ApiResult<ThreadCreated> {
    let request: CreateThreadRequest = if body.is_empty() {
        CreateThreadRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let api = assistant(&state)?;
    let thread_id = api.create_thread().await?;

    if let Some(buyer_id) = request.buyer_id.filter(|id| !id.trim().is_empty()) {
        state.with_db(|conn| Ok(assign_thread(conn, &buyer_id, &thread_id)?))?;
    }

    info!(thread_id = %thread_id, "chat thread created");
    Ok(Json(ApiResponse::ok(ThreadCreated { thread_id })))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
}

/// POST /api/chat/threads/:thread_id/messages - posts and starts a run
pub async fn post_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Result<Json<PostMessageRequest>, JsonRejection>,
) -> ApiResult<crate::chat::Run> {
    let request = payload(body)?;
    require(&thread_id, "thread_id")?;
    require(&request.content, "content")?;

    let api = assistant(&state)?;
    api.post_message(&thread_id, &request.content).await?;
    let run = api.create_run(&thread_id).await?;

    state.with_db(|conn| {
        Ok(save_message(conn, &thread_id, &ChatMessage::new(ChatRole::User, request.content.clone()))?)
    })?;

    Ok(Json(ApiResponse::ok(run)))
}

#[derive(Debug, Serialize)]
pub struct RunStatusView {
    pub run_id: String,
    pub status: RunStatus,
    pub terminal: bool,
}

/// GET /api/chat/threads/:thread_id/runs/:run_id
pub async fn run_status(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<RunStatusView> {
    let api = assistant(&state)?;
    let status = api.run_status(&thread_id, &run_id).await?;

    Ok(Json(ApiResponse::ok(RunStatusView {
        run_id,
        status,
        terminal: status.is_terminal(),
    })))
}

/// GET /api/chat/threads/:thread_id/messages - also stores replies not seen before
pub async fn list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<Vec<ChatMessage>> {
    let api = assistant(&state)?;
    let messages = api.list_messages(&thread_id).await?;

    state.with_db(|conn| Ok(save_new_replies(conn, &thread_id, &messages)?))?;

    Ok(Json(ApiResponse::ok(messages)))
}

// ============================================================================
// Contact
// ============================================================================

/// POST /api/contact
pub async fn contact(
    State(state): State<AppState>,
    body: Result<Json<ContactForm>, JsonRejection>,
) -> ApiResult<&'static str> {
    let form = payload(body)?;
    if !is_valid_email(&form.email) {
        return Err(ApiError::BadRequest(format!("Invalid email address: {}", form.email)));
    }

    let relay = state.relay.clone().ok_or(ApiError::Upstream("Contact relay"))?;
    relay.submit(&form).await?;

    Ok(Json(ApiResponse::ok("sent")))
}

// ============================================================================
// TESTS
// ============================================================================
