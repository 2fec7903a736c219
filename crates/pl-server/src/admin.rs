use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pl_core::core::{SuperTopicId, ThreadId, TopicId};
use serde_json::json;

use crate::handler::{extract_bearer, service_error_to_response, AppState};
use crate::service::{NewSuperTopic, SpawnTopics};

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let secret = extract_bearer(headers).map_err(service_error_to_response)?;
    state
        .service
        .authenticate_admin(&secret)
        .await
        .map_err(service_error_to_response)
}

pub async fn list_topics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Response> {
    require_admin(&state, &headers).await?;
    let topics = state
        .service
        .list_topics_with_counts()
        .await
        .map_err(service_error_to_response)?;
    let url_status = state.external_url.read().await.clone();
    Ok(Json(json!({
        "topics": topics,
        "external_url": url_status,
        "external_url_ok": url_status.is_ok(),
    })))
}

pub async fn delete_topic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(topic_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    require_admin(&state, &headers).await?;
    state
        .service
        .delete_topic(&TopicId::new(topic_id))
        .await
        .map_err(service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_threads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Response> {
    require_admin(&state, &headers).await?;
    let threads = state
        .service
        .list_threads()
        .await
        .map_err(service_error_to_response)?;
    let rows: Vec<serde_json::Value> = threads
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "topic_id": t.topic_id,
                "topic_name": t.config.topic_name,
                "participants": t.participants,
                "messages": t.live_messages().count(),
                "current_turns": t.current_turns,
                "max_turns": t.max_turns,
                "episode_done": t.episode_done,
                "rating_done": t.rating_done,
                "updated_at": t.updated_at,
            })
        })
        .collect();
    Ok(Json(json!({ "threads": rows })))
}

pub async fn export_thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    require_admin(&state, &headers).await?;
    let body = state
        .service
        .export_thread_json(&ThreadId::new(thread_id))
        .await
        .map_err(service_error_to_response)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

pub async fn create_super_topic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewSuperTopic>,
) -> Result<impl IntoResponse, Response> {
    require_admin(&state, &headers).await?;
    let super_topic = state
        .service
        .create_super_topic(body)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(super_topic)))
}

pub async fn spawn_topics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(super_topic_id): Path<String>,
    Json(body): Json<SpawnTopics>,
) -> Result<impl IntoResponse, Response> {
    require_admin(&state, &headers).await?;
    let topics = state
        .service
        .spawn_topics(&SuperTopicId::new(super_topic_id), body)
        .await
        .map_err(service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(json!({ "topics": topics }))))
}
