//! 模型客户端抽象
//!
//! 后端（OpenAI 兼容 / Mock）实现 ChatModel：给定轮次日志与可见工具定义，
//! 返回一条助手回复（纯文本或若干工具调用）。网络/配额类失败以字符串错误
//! 返回，由编排器统一兜底。

use async_trait::async_trait;

use crate::memory::{ToolInvocation, Turn};
use crate::tools::ToolDefinition;

/// 模型的一次回复：文本内容与请求的工具调用（可同时为空文本 + 多个调用）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub invocations: Vec<ToolInvocation>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            invocations: Vec::new(),
        }
    }

    pub fn invocations(invocations: Vec<ToolInvocation>) -> Self {
        Self {
            content: String::new(),
            invocations,
        }
    }
}

/// 模型客户端 trait；tools 为空表示本次调用不提供工具（终结轮）
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<ModelReply, String>;
}
