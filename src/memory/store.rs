//! 会话存储：按会话身份管理 ConversationState
//!
//! 每个身份（渠道/用户对）对应一把独立的 Mutex，单个会话内的回合严格串行，
//! 不同身份可完全并行；适配器在整个回合期间持有锁，回合结束后才释放。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::memory::ConversationState;

/// 会话身份到状态的映射；状态驻留进程内存，重启后不保留
#[derive(Default)]
pub struct ConversationStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationState>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出身份对应的会话句柄，不存在时创建空会话。
    /// 调用方对返回的 Mutex 上锁以串行化该会话的回合处理。
    pub async fn entry(&self, identity: &str) -> Arc<Mutex<ConversationState>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(state) = sessions.get(identity) {
                return state.clone();
            }
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entry_creates_then_reuses() {
        let store = ConversationStore::new();
        let a = store.entry("discord:42").await;
        let b = store.entry("discord:42").await;
        assert!(Arc::ptr_eq(&a, &b));

        let other = store.entry("api").await;
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn identities_are_independent() {
        let store = ConversationStore::new();
        let a = store.entry("u1").await;
        a.lock().await.append(crate::memory::Turn::user("salut"));

        let b = store.entry("u2").await;
        assert!(b.lock().await.is_empty());
    }
}
