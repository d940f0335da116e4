//! HTTP 前端
//!
//! POST /ask {texte} -> {reponse}：走与聊天渠道相同的 Brain，但使用独立的
//! 会话身份（"api"），历史互不串扰。GET /health 供探活。

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::brain::Brain;
use crate::memory::ConversationStore;

/// /ask 的会话身份
const API_IDENTITY: &str = "api";

pub struct ApiState {
    pub brain: Arc<Brain>,
    pub store: Arc<ConversationStore>,
}

#[derive(Debug, Deserialize)]
pub struct Commande {
    pub texte: String,
}

#[derive(Debug, Serialize)]
pub struct Reponse {
    pub reponse: String,
}

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ask", post(poser_question))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// POST /ask - question texte, réponse texte
async fn poser_question(
    State(state): State<Arc<ApiState>>,
    Json(commande): Json<Commande>,
) -> Json<Reponse> {
    tracing::info!(texte = %commande.texte, "requête API");

    let session = state.store.entry(API_IDENTITY).await;
    let reponse = {
        let mut conversation = session.lock().await;
        state.brain.process(&commande.texte, &mut conversation).await
    };

    Json(Reponse { reponse })
}
