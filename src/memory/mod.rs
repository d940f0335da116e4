//! 记忆层：会话轮次日志与按身份隔离的会话存储

pub mod conversation;
pub mod store;

pub use conversation::{ConversationState, ToolInvocation, Turn};
pub use store::ConversationStore;
