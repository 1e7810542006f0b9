// Shard-to-shard HTTP endpoints.
//
// Sibling brokers call these to replicate accepted publishes and to push
// channel membership. Both apply locally and answer 200; failures are the
// caller's problem to log.
use crate::state::AppState;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use relay_channel::ReplicaPublish;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipUpdate {
    pub project_id: String,
    pub channel: String,
    pub shard_keys: Vec<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/shard/publish", post(replica_publish))
        .route("/v1/shard/membership", post(membership))
        .with_state(state)
}

async fn replica_publish(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReplicaPublish>,
) -> StatusCode {
    let actor = match state.actor_for(&request.project_id, &request.channel).await {
        Ok(actor) => actor,
        Err(err) => {
            warn!(error = %err, "replica publish: actor unavailable");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };
    match actor.publish_replica(request).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            warn!(error = %err, "replica publish failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn membership(
    State(state): State<Arc<AppState>>,
    Json(update): Json<MembershipUpdate>,
) -> StatusCode {
    let actor = match state.actor_for(&update.project_id, &update.channel).await {
        Ok(actor) => actor,
        Err(err) => {
            warn!(error = %err, "membership push: actor unavailable");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };
    match actor.set_shards(&update.shard_keys).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            warn!(error = %err, "membership push failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
