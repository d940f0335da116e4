//! Enola - Rust 家居智能助理
//!
//! 模块划分：
//! - **api**: HTTP 前端（POST /ask）
//! - **brain**: 回合编排（模式路由、记忆更新、模型调用、工具分发、回复推导）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **integrations**: 聊天渠道（WhatsApp Cloud Webhook）
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 会话轮次日志与按身份隔离的会话存储
//! - **tasks**: 后台循环（新番通知、闹钟响铃、每日回顾）
//! - **tools**: 工具注册表与各家居/追番集成

pub mod api;
pub mod brain;
pub mod config;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tasks;
pub mod tools;
