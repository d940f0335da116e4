//! 大脑：回合编排与模式路由
//!
//! - **router**: ModeClassifier（上下文 > 确认指令 > 关键词 > 默认）与模式定义
//! - **orchestrator**: Brain 回合状态机（记忆更新、模型调用、工具分发、回复推导）

pub mod orchestrator;
pub mod router;

use thiserror::Error;

pub use orchestrator::{Brain, REPLY_FILLER, REPLY_MEMORY_CLEARED, REPLY_NOTHING_HEARD};
pub use router::{default_modes, Mode, ModeClassifier, ModeId, ReplyPolicy};

/// 编排层错误；只有基础设施失败（模型不可达）会走到这里，
/// 工具层错误在回合内部转成文本回流给模型
#[derive(Error, Debug)]
pub enum BrainError {
    #[error("model invocation failed: {0}")]
    Model(String),
}
