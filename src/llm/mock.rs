//! Mock 模型客户端（测试与无 Key 运行）
//!
//! 可预置一串脚本化回复（依次弹出，供编排器测试还原多轮流程）；脚本耗尽或
//! 未预置时回显最后一条用户轮，便于离线跑通整条链路。

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::{ChatModel, ModelReply};
use crate::memory::Turn;
use crate::tools::ToolDefinition;

/// Mock 客户端：脚本化回复队列 + 回显兜底
#[derive(Default)]
pub struct MockModel {
    replies: Mutex<VecDeque<ModelReply>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn chat(&self, turns: &[Turn], _tools: &[ToolDefinition]) -> Result<ModelReply, String> {
        if let Some(reply) = self.replies.lock().await.pop_front() {
            return Ok(reply);
        }

        let last_user = turns
            .iter()
            .rev()
            .find(|t| t.is_user())
            .map(|t| t.content())
            .unwrap_or("(rien)");
        Ok(ModelReply::text(format!("Echo: {last_user}")))
    }
}

/// 始终失败的客户端，用于验证编排器的回滚路径
pub struct FailingModel;

#[async_trait]
impl ChatModel for FailingModel {
    async fn chat(&self, _turns: &[Turn], _tools: &[ToolDefinition]) -> Result<ModelReply, String> {
        Err("connection refused".to_string())
    }
}
