//! WhatsApp Cloud API 集成
//!
//! 通过 Webhook 接收消息，交给 Brain 处理后发送回复。只处理授权发送者的
//! 文本消息；回复超过渠道长度上限时按字符分段。同一会话身份的回合靠
//! ConversationStore 的每会话互斥锁串行化。

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::brain::Brain;
use crate::memory::ConversationStore;

/// WhatsApp 服务状态；access_token 缺省时仍可接收（回复只落日志）
pub struct WhatsappState {
    pub brain: Arc<Brain>,
    pub store: Arc<ConversationStore>,
    pub notifier: Arc<ChatNotifier>,
    pub verify_token: String,
    pub authorized_sender: Option<String>,
}

/// Webhook 验证参数
#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Webhook 请求体（只保留我们消费的字段）
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: Option<WebhookValue>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    messaging_product: &'static str,
    to: String,
    #[serde(rename = "type")]
    msg_type: &'static str,
    text: SendMessageText,
}

#[derive(Debug, Serialize)]
struct SendMessageText {
    body: String,
}

/// 出站消息发送器；后台任务（新番、闹钟回顾）也用它主动推送
pub struct ChatNotifier {
    http: reqwest::Client,
    access_token: Option<String>,
    phone_number_id: Option<String>,
    default_recipient: Option<String>,
    chunk_chars: usize,
}

impl ChatNotifier {
    /// 凭证取自 WHATSAPP_ACCESS_TOKEN / WHATSAPP_PHONE_NUMBER_ID
    pub fn from_env(default_recipient: Option<String>, chunk_chars: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: std::env::var("WHATSAPP_ACCESS_TOKEN").ok(),
            phone_number_id: std::env::var("WHATSAPP_PHONE_NUMBER_ID").ok(),
            default_recipient,
            chunk_chars: chunk_chars.max(1),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() && self.phone_number_id.is_some()
    }

    /// 给默认接收者（授权用户）发消息；未配置渠道时只落日志
    pub async fn notify(&self, body: &str) {
        match self.default_recipient.clone() {
            Some(to) => self.send(&to, body).await,
            None => tracing::info!(body, "notification sans destinataire configuré"),
        }
    }

    /// 发送一条消息，超长按字符分段
    pub async fn send(&self, to: &str, body: &str) {
        let (Some(token), Some(phone_id)) = (&self.access_token, &self.phone_number_id) else {
            tracing::info!(to, body, "canal WhatsApp non configuré, réponse non envoyée");
            return;
        };

        let url = format!("https://graph.facebook.com/v18.0/{phone_id}/messages");
        for chunk in chunk_message(body, self.chunk_chars) {
            let req = SendMessageRequest {
                messaging_product: "whatsapp",
                to: to.replace('+', ""),
                msg_type: "text",
                text: SendMessageText { body: chunk },
            };
            let result = self
                .http
                .post(&url)
                .bearer_auth(token)
                .json(&req)
                .send()
                .await;
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    tracing::error!(%status, text, "WhatsApp API error");
                }
                Err(e) => tracing::error!(error = %e, "envoi WhatsApp"),
                _ => {}
            }
        }
    }
}

/// 按字符数切分长回复（渠道有消息长度上限）
fn chunk_message(body: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() <= max_chars {
        return vec![body.to_string()];
    }
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

/// 创建 WhatsApp 路由
pub fn create_router(state: Arc<WhatsappState>) -> Router {
    Router::new()
        .route("/webhook", get(webhook_verify).post(webhook_receive))
        .with_state(state)
}

/// GET /webhook - Meta 验证 Webhook
async fn webhook_verify(
    State(state): State<Arc<WhatsappState>>,
    Query(query): Query<WebhookVerifyQuery>,
) -> Result<String, StatusCode> {
    if query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(&state.verify_token)
    {
        Ok(query.challenge.unwrap_or_default())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// POST /webhook - 接收消息并回复
async fn webhook_receive(
    State(state): State<Arc<WhatsappState>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    if payload.object.as_deref() != Some("whatsapp_business_account") {
        return StatusCode::OK;
    }

    for entry in payload.entry {
        for change in entry.changes {
            let Some(value) = change.value else { continue };
            for msg in value.messages {
                if msg.msg_type.as_deref() != Some("text") {
                    continue;
                }
                let Some(text) = msg.text else { continue };

                // seul l'utilisateur autorisé peut piloter la maison
                if let Some(expected) = &state.authorized_sender {
                    if &msg.from != expected {
                        tracing::warn!(from = %msg.from, "message d'un expéditeur non autorisé, ignoré");
                        continue;
                    }
                }

                tracing::info!(from = %msg.from, "message reçu");

                let identity = format!("whatsapp:{}", msg.from);
                let session = state.store.entry(&identity).await;
                let reply = {
                    // verrou tenu pendant tout le tour : deux messages du même
                    // utilisateur sont traités l'un après l'autre
                    let mut conversation = session.lock().await;
                    state.brain.process(&text.body, &mut conversation).await
                };

                if !reply.is_empty() {
                    state.notifier.send(&msg.from, &reply).await;
                }
            }
        }
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_single_chunk() {
        assert_eq!(chunk_message("salut", 2000), vec!["salut".to_string()]);
    }

    #[test]
    fn long_message_splits_on_char_boundaries() {
        // caractères multi-octets : le découpage doit rester sur des chars
        let body = "é".repeat(4100);
        let chunks = chunk_message(&body, 2000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 2000);
        assert_eq!(chunks[2].chars().count(), 100);
        assert_eq!(chunks.concat(), body);
    }
}
