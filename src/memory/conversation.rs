//! 会话记忆：轮次日志
//!
//! Turn 为带角色标签的和类型（system/user/assistant/tool），tool 轮必须携带
//! tool_call_id 与前一条 assistant 轮的调用对应；ConversationState 保存有序轮次，
//! 支持系统消息刷新与按上限截断（始终保留下标 0 的系统轮与最近轮次）。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 模型请求的一次工具调用：名称、参数表、与结果轮关联的 id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 单条对话轮次；角色决定必填字段，构造时即保证（不靠下游判别）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        /// 模型请求的工具调用；纯文本回复时为空
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        invocations: Vec<ToolInvocation>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            invocations: Vec::new(),
        }
    }

    pub fn assistant_with_invocations(
        content: impl Into<String>,
        invocations: Vec<ToolInvocation>,
    ) -> Self {
        Self::Assistant {
            content: content.into(),
            invocations,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

/// 单个会话身份下的有序轮次日志
///
/// 不变量：若非空，下标 0 始终是系统轮；截断永不丢弃下标 0 与最近轮次。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// 刷新系统指令：下标 0 为系统轮则原地替换内容，否则在最前插入一条。
    /// 同一指令重复调用不会产生第二条系统轮。
    pub fn ensure_system_message(&mut self, instruction: &str) {
        match self.turns.first_mut() {
            Some(Turn::System { content }) => *content = instruction.to_string(),
            _ => self.turns.insert(0, Turn::system(instruction)),
        }
    }

    /// 超过 max_len 时保留下标 0 加上最近 max_len-1 条，丢弃中间最旧的轮次
    pub fn truncate(&mut self, max_len: usize) {
        if self.turns.len() <= max_len || max_len == 0 {
            return;
        }
        let keep_tail = max_len.saturating_sub(1);
        let tail_start = self.turns.len() - keep_tail;
        let head = self.turns[0].clone();
        let mut kept = Vec::with_capacity(max_len);
        kept.push(head);
        kept.extend(self.turns[tail_start..].iter().cloned());
        self.turns = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_system_message_is_idempotent() {
        let mut state = ConversationState::new();
        state.ensure_system_message("consigne");
        state.ensure_system_message("consigne");

        let systems = state.turns().iter().filter(|t| t.is_system()).count();
        assert_eq!(systems, 1);
        assert_eq!(state.turns()[0].content(), "consigne");
    }

    #[test]
    fn ensure_system_message_replaces_in_place() {
        let mut state = ConversationState::new();
        state.ensure_system_message("v1");
        state.append(Turn::user("salut"));
        state.ensure_system_message("v2");

        assert_eq!(state.len(), 2);
        assert_eq!(state.turns()[0].content(), "v2");
        assert!(state.turns()[1].is_user());
    }

    #[test]
    fn truncate_keeps_system_turn_and_recent_tail() {
        let mut state = ConversationState::new();
        state.ensure_system_message("consigne");
        for i in 0..50 {
            state.append(Turn::user(format!("message {i}")));
        }

        state.truncate(40);

        assert_eq!(state.len(), 40);
        assert!(state.turns()[0].is_system());
        // 最近的 39 条用户轮保留，最旧的被丢弃
        assert_eq!(state.turns()[1].content(), "message 11");
        assert_eq!(state.turns()[39].content(), "message 49");
    }

    #[test]
    fn truncate_noop_under_limit() {
        let mut state = ConversationState::new();
        state.ensure_system_message("consigne");
        state.append(Turn::user("a"));

        let before = state.clone();
        state.truncate(40);
        assert_eq!(state, before);
    }

    #[test]
    fn tool_turn_carries_call_id() {
        let turn = Turn::tool("call_42", "Fait.");
        match turn {
            Turn::Tool { tool_call_id, content } => {
                assert_eq!(tool_call_id, "call_42");
                assert_eq!(content, "Fait.");
            }
            _ => panic!("expected tool turn"),
        }
    }
}
