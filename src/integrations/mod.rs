//! 聊天渠道集成（核心只依赖其字符串进出的契约）

pub mod whatsapp;

pub use whatsapp::{ChatNotifier, WhatsappState};
