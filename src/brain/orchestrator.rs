//! 回合状态机
//!
//! 一次 process 调用处理一条用户话语：判定模式 -> 刷新系统轮并截断 -> 追加用户轮
//! -> 携工具定义调用模型 -> 按请求顺序分发工具并写回 tool 轮 -> 二次调用（不带
//! 工具）收束 -> 推导唯一回复。模型调用失败时回滚记忆到回合前的快照；工具失败
//! 不中断回合，错误文本作为 tool 轮内容交还模型。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;

use crate::brain::{BrainError, Mode, ModeClassifier, ModeId, ReplyPolicy};
use crate::llm::ChatModel;
use crate::memory::{ConversationState, Turn};
use crate::tools::{ToolDefinition, ToolRegistry};

/// 空白输入的固定回复（不触碰模型也不触碰记忆）
pub const REPLY_NOTHING_HEARD: &str = "Je n'ai rien entendu.";
/// 重置指令的固定回执
pub const REPLY_MEMORY_CLEARED: &str = "🧹 Mémoire effacée.";
/// 既无工具产出也无助手文本时的兜底回复
pub const REPLY_FILLER: &str = "Ok.";

/// 重置指令集（大小写不敏感，全词匹配）
const RESET_KEYWORDS: &[&str] = &["reset", "clear", "oubli"];

/// 一个回合里积累的产出，用于推导最终回复
#[derive(Debug, Default)]
struct TurnOutcome {
    /// 本回合所有非空工具产出，按执行顺序
    tool_outputs: Vec<String>,
    /// 最近一条非空助手文本
    last_assistant_text: Option<String>,
}

/// 回合编排器；注册表与模式表启动后只读，可跨会话共享
pub struct Brain {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    classifier: ModeClassifier,
    modes: HashMap<ModeId, Mode>,
    max_turns: usize,
    recursion_limit: usize,
}

impl Brain {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: Arc<ToolRegistry>,
        modes: Vec<Mode>,
        max_turns: usize,
        recursion_limit: usize,
    ) -> Self {
        Self {
            model,
            registry,
            classifier: ModeClassifier::new(),
            modes: modes.into_iter().map(|m| (m.id, m)).collect(),
            max_turns,
            recursion_limit: recursion_limit.max(1),
        }
    }

    /// 处理一条用户话语，返回唯一的用户可见回复并就地更新会话状态。
    /// 调用方负责对同一会话身份串行调用（见 memory::ConversationStore）。
    pub async fn process(&self, user_text: &str, state: &mut ConversationState) -> String {
        let text = user_text.trim();
        if text.is_empty() {
            return REPLY_NOTHING_HEARD.to_string();
        }
        if RESET_KEYWORDS.contains(&text.to_lowercase().as_str()) {
            state.clear();
            return REPLY_MEMORY_CLEARED.to_string();
        }

        let mode_id = self.classifier.classify(text, state.turns());
        let mode = self
            .modes
            .get(&mode_id)
            .or_else(|| self.modes.get(&ModeId::Domotique))
            .expect("mode table must contain the default mode");
        tracing::debug!(mode = ?mode_id, "turn routed");

        // 模型失败时记忆必须回到回合前的状态
        let snapshot = state.clone();

        state.ensure_system_message(&mode.instruction_with_clock(Local::now()));
        state.append(Turn::user(text));
        state.truncate(self.max_turns);

        match self.drive_model(state, mode).await {
            Ok(outcome) => {
                state.truncate(self.max_turns);
                derive_reply(outcome, mode.reply_policy)
            }
            Err(BrainError::Model(e)) => {
                tracing::error!(error = %e, "model invocation failed, rolling back turn");
                *state = snapshot;
                format!("Erreur cerveau : {e}")
            }
        }
    }

    /// 模型/工具循环：首趟携带模式的工具定义；一旦执行过工具，后续调用不再
    /// 提供工具（收束为纯文本）。调用次数以 recursion_limit 兜底，超限时
    /// 尽力而为地返回已有产出而不是报错。
    async fn drive_model(
        &self,
        state: &mut ConversationState,
        mode: &Mode,
    ) -> Result<TurnOutcome, BrainError> {
        let definitions = self.registry.definitions(&mode.tools);
        let mut outcome = TurnOutcome::default();
        let mut offer_tools = true;

        for _ in 0..self.recursion_limit {
            let tools: &[ToolDefinition] = if offer_tools { &definitions } else { &[] };
            let reply = self
                .model
                .chat(state.turns(), tools)
                .await
                .map_err(BrainError::Model)?;

            if !reply.content.trim().is_empty() {
                outcome.last_assistant_text = Some(reply.content.trim().to_string());
            }

            if reply.invocations.is_empty() {
                state.append(Turn::assistant(reply.content));
                return Ok(outcome);
            }

            state.append(Turn::assistant_with_invocations(
                reply.content,
                reply.invocations.clone(),
            ));

            for invocation in &reply.invocations {
                let output = match self.registry.dispatch(invocation).await {
                    Ok(text) => text,
                    // UnknownTool / InvalidArguments 不上抛：作为工具轮内容
                    // 交还模型，让它在下一趟对话式地恢复
                    Err(e) => e.to_string(),
                };
                let trimmed = output.trim();
                if !trimmed.is_empty() {
                    outcome.tool_outputs.push(trimmed.to_string());
                }
                state.append(Turn::tool(invocation.id.clone(), output));
            }

            offer_tools = false;
        }

        tracing::warn!(
            limit = self.recursion_limit,
            "recursion limit reached, returning partial outcome"
        );
        Ok(outcome)
    }
}

/// 回复推导：ToolOutputWins 模式下工具产出（换行拼接）优先，模型的二次叙述
/// 被丢弃；否则取最近一条非空助手文本；都没有则回固定的 "Ok."。
fn derive_reply(outcome: TurnOutcome, policy: ReplyPolicy) -> String {
    let joined = if outcome.tool_outputs.is_empty() {
        None
    } else {
        Some(outcome.tool_outputs.join("\n"))
    };

    let reply = match policy {
        ReplyPolicy::ToolOutputWins => joined.or(outcome.last_assistant_text),
        ReplyPolicy::AssistantText => outcome.last_assistant_text.or(joined),
    };
    reply.unwrap_or_else(|| REPLY_FILLER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    use crate::brain::default_modes;
    use crate::llm::{FailingModel, MockModel, ModelReply};
    use crate::memory::ToolInvocation;
    use crate::tools::{ParamKind, ParamSpec, Tool};

    /// Stub météo : toujours 14°C
    struct StubMeteo;

    #[async_trait]
    impl Tool for StubMeteo {
        fn name(&self) -> &str {
            "obtenir_meteo"
        }

        fn description(&self) -> &str {
            "Donne la météo."
        }

        fn parameters(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required(
                "ville",
                ParamKind::String,
                "Nom de la ville",
            )]
        }

        async fn execute(&self, args: &Map<String, Value>) -> String {
            let ville = crate::tools::arg_str(args, "ville").unwrap_or("?");
            format!("Il fait 14°C à {ville}.")
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(StubMeteo).unwrap();
        Arc::new(registry)
    }

    fn meteo_invocation(id: &str) -> ToolInvocation {
        let mut args = Map::new();
        args.insert("ville".to_string(), Value::String("Paris".to_string()));
        ToolInvocation::new(id, "obtenir_meteo", args)
    }

    fn brain_with(model: Arc<dyn ChatModel>) -> Brain {
        Brain::new(model, registry(), default_modes(), 40, 10)
    }

    #[tokio::test]
    async fn blank_input_returns_fixed_reply_without_mutation() {
        let brain = brain_with(Arc::new(MockModel::new()));
        let mut state = ConversationState::new();

        let reply = brain.process("   ", &mut state).await;

        assert_eq!(reply, REPLY_NOTHING_HEARD);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn reset_keywords_clear_state_case_insensitively() {
        let brain = brain_with(Arc::new(MockModel::new()));
        for word in ["reset", "RESET", "Clear", "oubli"] {
            let mut state = ConversationState::new();
            state.ensure_system_message("consigne");
            state.append(Turn::user("bonjour"));

            let reply = brain.process(word, &mut state).await;

            assert_eq!(reply, REPLY_MEMORY_CLEARED);
            assert!(state.is_empty());
        }
    }

    #[tokio::test]
    async fn tool_output_wins_over_model_narrative() {
        // Scénario A : météo à Paris -> la réponse est exactement le retour du tool,
        // la synthèse du second appel modèle est jetée.
        let model = MockModel::scripted(vec![
            ModelReply::invocations(vec![meteo_invocation("call_1")]),
            ModelReply::text("D'après le tool, il fait doux à Paris aujourd'hui !"),
        ]);
        let brain = brain_with(Arc::new(model));
        let mut state = ConversationState::new();

        let reply = brain.process("obtenir la météo à Paris", &mut state).await;

        assert_eq!(reply, "Il fait 14°C à Paris.");
    }

    #[tokio::test]
    async fn plain_text_reply_passes_through() {
        // Scénario B : pas de tool demandé -> texte du modèle inchangé
        let model = MockModel::scripted(vec![ModelReply::text("Pas grand chose de neuf.")]);
        let brain = brain_with(Arc::new(model));
        let mut state = ConversationState::new();

        let reply = brain.process("quoi de neuf", &mut state).await;

        assert_eq!(reply, "Pas grand chose de neuf.");
        // système + user + assistant
        assert_eq!(state.len(), 3);
        assert!(state.turns()[0].is_system());
    }

    #[tokio::test]
    async fn filler_when_model_returns_nothing() {
        let model = MockModel::scripted(vec![ModelReply::text("   ")]);
        let brain = brain_with(Arc::new(model));
        let mut state = ConversationState::new();

        let reply = brain.process("hm", &mut state).await;

        assert_eq!(reply, REPLY_FILLER);
    }

    #[tokio::test]
    async fn tool_invocation_has_matching_tool_turn() {
        let model = MockModel::scripted(vec![
            ModelReply::invocations(vec![meteo_invocation("call_7")]),
            ModelReply::text("ok"),
        ]);
        let brain = brain_with(Arc::new(model));
        let mut state = ConversationState::new();

        brain.process("météo à Paris", &mut state).await;

        let assistant_idx = state
            .turns()
            .iter()
            .position(|t| matches!(t, Turn::Assistant { invocations, .. } if !invocations.is_empty()))
            .expect("assistant turn with invocation");
        match &state.turns()[assistant_idx + 1] {
            Turn::Tool { tool_call_id, content } => {
                assert_eq!(tool_call_id, "call_7");
                assert_eq!(content, "Il fait 14°C à Paris.");
            }
            other => panic!("expected tool turn, got {other:?}"),
        }
        // exactement une tool turn pour cet id
        let count = state
            .turns()
            .iter()
            .filter(|t| matches!(t, Turn::Tool { tool_call_id, .. } if tool_call_id == "call_7"))
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn unknown_tool_error_flows_back_as_tool_turn() {
        let inv = ToolInvocation::new("call_1", "tool_fantome", Map::new());
        let model = MockModel::scripted(vec![
            ModelReply::invocations(vec![inv]),
            ModelReply::text("je n'ai pas pu"),
        ]);
        let brain = brain_with(Arc::new(model));
        let mut state = ConversationState::new();

        let reply = brain.process("fais un truc", &mut state).await;

        // l'erreur est devenue le contenu du tool turn, donc la réponse (tool wins)
        assert_eq!(reply, "Unknown tool: tool_fantome");
        assert!(state
            .turns()
            .iter()
            .any(|t| matches!(t, Turn::Tool { content, .. } if content.contains("Unknown tool"))));
    }

    #[tokio::test]
    async fn model_failure_rolls_back_memory() {
        let brain = brain_with(Arc::new(FailingModel));
        let mut state = ConversationState::new();
        state.ensure_system_message("consigne");
        state.append(Turn::user("avant"));
        let before = state.clone();

        let reply = brain.process("allume le salon", &mut state).await;

        assert!(reply.starts_with("Erreur cerveau :"));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn turn_count_is_capped_after_processing() {
        // Scénario C : 40 tours existants, le 41e message utilisateur arrive,
        // l'état résultant reste plafonné à 40 avec le système en tête.
        let model = MockModel::scripted(vec![ModelReply::text("compris")]);
        let brain = brain_with(Arc::new(model));
        let mut state = ConversationState::new();
        state.ensure_system_message("consigne");
        for i in 0..39 {
            state.append(Turn::user(format!("tour {i}")));
        }
        assert_eq!(state.len(), 40);

        brain.process("tour 41", &mut state).await;

        assert_eq!(state.len(), 40);
        assert!(state.turns()[0].is_system());
        // le plus ancien tour non-système a été abandonné
        assert!(!state.turns().iter().any(|t| t.content() == "tour 0"));
        // les tours récents sont intacts
        assert!(state.turns().iter().any(|t| t.content() == "tour 41"));
    }

    #[tokio::test]
    async fn recursion_limit_stops_loop_with_partial_reply() {
        // le modèle ne s'arrête jamais de demander des tools : la boucle
        // s'arrête au plafond et renvoie ce qui a été produit
        let scripted: Vec<ModelReply> = (0..5)
            .map(|i| ModelReply::invocations(vec![meteo_invocation(&format!("call_{i}"))]))
            .collect();
        let model = MockModel::scripted(scripted);
        let brain = Brain::new(Arc::new(model), registry(), default_modes(), 40, 3);
        let mut state = ConversationState::new();

        let reply = brain.process("météo partout", &mut state).await;

        let lines: Vec<&str> = reply.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| *l == "Il fait 14°C à Paris."));
    }

    #[tokio::test]
    async fn second_call_runs_without_tool_schema() {
        // après exécution d'un tool, l'appel suivant ne doit plus proposer de tools
        use tokio::sync::Mutex;

        struct RecordingModel {
            calls: Mutex<Vec<usize>>,
            replies: Mutex<std::collections::VecDeque<ModelReply>>,
        }

        #[async_trait]
        impl ChatModel for RecordingModel {
            async fn chat(
                &self,
                _turns: &[Turn],
                tools: &[ToolDefinition],
            ) -> Result<ModelReply, String> {
                self.calls.lock().await.push(tools.len());
                Ok(self.replies.lock().await.pop_front().unwrap_or_default())
            }
        }

        let model = Arc::new(RecordingModel {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(
                vec![
                    ModelReply::invocations(vec![meteo_invocation("call_1")]),
                    ModelReply::text("fini"),
                ]
                .into(),
            ),
        });
        let brain = Brain::new(model.clone(), registry(), default_modes(), 40, 10);
        let mut state = ConversationState::new();

        brain.process("météo à Paris", &mut state).await;

        let calls = model.calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert!(calls[0] > 0, "first call must offer the mode's tools");
        assert_eq!(calls[1], 0, "second call must not offer tools");
    }
}
