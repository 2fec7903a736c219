use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use pl_core::core::{
    AuthError, Ratings, RatingOutcome, Secret, SpeakerId, ThreadId, TopicId, TurnError, UserId,
};
use serde::Deserialize;
use serde_json::json;

use crate::admin;
use crate::ping::{ping_handler, SharedUrlStatus};
use crate::service::{ChatService, LaunchRequest, NewUser, ServiceError};

/// Seconds clients are told to wait after contention.
const RETRY_AFTER_SECS: &str = "1";

// ---------------------------------------------------------------------------
// AppState — shared state for all handlers
// ---------------------------------------------------------------------------

pub struct AppState {
    pub service: ChatService,
    pub external_url: SharedUrlStatus,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/users", post(create_user))
        .route("/users/{user_id}/dashboard", get(user_dashboard))
        .route("/topics/{topic_id}/launch", post(launch_topic))
        .route("/threads/{thread_id}", get(get_thread))
        .route("/threads/{thread_id}/{user_id}/message", post(post_message))
        .route("/threads/{thread_id}/{user_id}/rating", post(post_rating))
        .route("/admin/topics", get(admin::list_topics))
        .route("/admin/topics/{topic_id}", delete(admin::delete_topic))
        .route("/admin/threads", get(admin::list_threads))
        .route("/admin/threads/{thread_id}/export", get(admin::export_thread))
        .route("/admin/super-topics", post(admin::create_super_topic))
        .route(
            "/admin/super-topics/{super_topic_id}/topics",
            post(admin::spawn_topics),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Participant handlers
// ---------------------------------------------------------------------------

async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewUser>,
) -> Result<impl IntoResponse, Response> {
    let user = state
        .service
        .create_user(body)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn user_dashboard(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    let entries = state
        .service
        .user_dashboard(&UserId::new(user_id))
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(json!({ "topics": entries })))
}

async fn launch_topic(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
    Json(body): Json<LaunchRequest>,
) -> Result<impl IntoResponse, Response> {
    let thread = state
        .service
        .launch_topic(&TopicId::new(topic_id), body)
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(thread))
}

async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    let thread = state
        .service
        .get_thread(&ThreadId::new(thread_id))
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(thread))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
    #[serde(default)]
    pub speaker_id: Option<SpeakerId>,
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Path((thread_id, user_id)): Path<(String, String)>,
    Json(body): Json<MessageRequest>,
) -> Result<impl IntoResponse, Response> {
    let thread = state
        .service
        .observe_and_reply(
            &ThreadId::new(thread_id),
            &UserId::new(user_id),
            &body.text,
            body.speaker_id,
        )
        .await
        .map_err(service_error_to_response)?;
    Ok(Json(thread))
}

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub ratings: Ratings,
}

async fn post_rating(
    State(state): State<Arc<AppState>>,
    Path((thread_id, user_id)): Path<(String, String)>,
    Json(body): Json<RatingRequest>,
) -> Result<impl IntoResponse, Response> {
    let outcome = state
        .service
        .submit_ratings(&ThreadId::new(thread_id), &UserId::new(user_id), body.ratings)
        .await
        .map_err(service_error_to_response)?;
    let body = match outcome {
        RatingOutcome::Recorded { raters, required } => {
            json!({ "status": "recorded", "raters": raters, "required": required })
        }
        RatingOutcome::Completed => json!({ "status": "completed" }),
        RatingOutcome::AlreadyComplete => json!({ "status": "already_complete" }),
    };
    Ok(Json(body))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn extract_bearer(headers: &HeaderMap) -> Result<Secret, ServiceError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::InvalidCredentials)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidCredentials)?;

    Ok(Secret::new(token))
}

// ---------------------------------------------------------------------------
// Error → Response conversion
// ---------------------------------------------------------------------------

const INTERNAL_MESSAGE: &str = "something went wrong on server side";

pub fn service_error_to_response(err: ServiceError) -> Response {
    let (status, error_type, message) = match &err {
        ServiceError::Turn(TurnError::NotInThread { .. }) => {
            (StatusCode::FORBIDDEN, "permission_error", err.to_string())
        }
        ServiceError::Turn(_) => (StatusCode::CONFLICT, "turn_error", err.to_string()),
        ServiceError::Validation(_) => (
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            err.to_string(),
        ),
        ServiceError::Limit(_) => (StatusCode::BAD_REQUEST, "limit_error", err.to_string()),
        ServiceError::Auth(_) => (
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            err.to_string(),
        ),
        ServiceError::NotFound { .. } => {
            (StatusCode::NOT_FOUND, "not_found_error", err.to_string())
        }
        ServiceError::Contention(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            err.to_string(),
        ),
        ServiceError::Config(_)
        | ServiceError::Store(_)
        | ServiceError::Export(_)
        | ServiceError::Join(_) => {
            tracing::error!(error = %err, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                INTERNAL_MESSAGE.to_owned(),
            )
        }
    };

    let body = json!({
        "error": {
            "message": message,
            "type": error_type,
            "code": status.as_u16(),
        }
    });

    let mut response = (status, Json(body)).into_response();
    if matches!(err, ServiceError::Contention(_)) {
        response.headers_mut().insert(
            header::RETRY_AFTER,
            header::HeaderValue::from_static(RETRY_AFTER_SECS),
        );
    }
    response
}
