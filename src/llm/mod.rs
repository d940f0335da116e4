//! 模型客户端：抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{FailingModel, MockModel};
pub use openai::OpenAiModel;
pub use traits::{ChatModel, ModelReply};

use crate::config::AppConfig;

/// 根据配置与环境变量选择模型后端；无 OPENAI_API_KEY 时退回 Mock
pub fn create_model_from_config(cfg: &AppConfig) -> Arc<dyn ChatModel> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiModel::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                cfg.llm.temperature,
                Some(&key),
            ))
        }
        Err(_) => {
            tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
            Arc::new(MockModel::new())
        }
    }
}
