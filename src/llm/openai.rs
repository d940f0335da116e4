//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），使用原生
//! tool calling：轮次日志映射为 chat 消息（tool 轮带 tool_call_id），工具
//! 定义映射为 function 描述，回复中的 tool_calls 解析为 ToolInvocation。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{ChatModel, ModelReply};
use crate::memory::{ToolInvocation, Turn};
use crate::tools::ToolDefinition;

/// OpenAI 兼容客户端：持有 Client、model 名与采样温度
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiModel {
    pub fn new(base_url: Option<&str>, model: &str, temperature: f32, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature,
        }
    }

    fn to_openai_messages(&self, turns: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        let mut messages = Vec::with_capacity(turns.len());
        for turn in turns {
            let message = match turn {
                Turn::System { content } => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(content.clone())
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
                Turn::User { content } => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(content.clone())
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
                Turn::Assistant { content, invocations } => {
                    let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                    builder.content(content.clone());
                    if !invocations.is_empty() {
                        builder.tool_calls(
                            invocations
                                .iter()
                                .map(|inv| {
                                    ChatCompletionMessageToolCalls::Function(
                                        ChatCompletionMessageToolCall {
                                            id: inv.id.clone(),
                                            function: FunctionCall {
                                                name: inv.name.clone(),
                                                arguments: Value::Object(inv.arguments.clone())
                                                    .to_string(),
                                            },
                                        },
                                    )
                                })
                                .collect::<Vec<_>>(),
                        );
                    }
                    ChatCompletionRequestMessage::Assistant(
                        builder.build().map_err(|e| e.to_string())?,
                    )
                }
                Turn::Tool { content, tool_call_id } => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(content.clone())
                        .tool_call_id(tool_call_id.clone())
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
            };
            messages.push(message);
        }
        Ok(messages)
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn chat(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<ModelReply, String> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .temperature(self.temperature)
            .messages(self.to_openai_messages(turns)?);

        if !tools.is_empty() {
            let mut defs = Vec::with_capacity(tools.len());
            for t in tools {
                let function = FunctionObjectArgs::default()
                    .name(t.name.clone())
                    .description(t.description.clone())
                    .parameters(t.parameters.clone())
                    .build()
                    .map_err(|e| e.to_string())?;
                defs.push(ChatCompletionTools::Function(ChatCompletionTool { function }));
            }
            builder.tools(defs);
        }

        let request = builder.build().map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "empty completion choices".to_string())?
            .message;

        let invocations = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| match tc {
                ChatCompletionMessageToolCalls::Function(tc) => {
                    let arguments = serde_json::from_str::<Value>(&tc.function.arguments)
                        .ok()
                        .and_then(|v| v.as_object().cloned())
                        .unwrap_or_default();
                    let id = if tc.id.is_empty() {
                        uuid::Uuid::new_v4().to_string()
                    } else {
                        tc.id
                    };
                    Some(ToolInvocation::new(id, tc.function.name, arguments))
                }
                _ => None,
            })
            .collect();

        Ok(ModelReply {
            content: message.content.unwrap_or_default(),
            invocations,
        })
    }
}
