//! OpenAI-compatible Chat Completions client implementing [`LlmClient`].
//!
//! Transcript mapping: `user` and `assistant` entries map straight through;
//! `tool` entries re-enter the conversation as user-text observations, which
//! keeps the wire format compatible with any OpenAI-style endpoint.

use async_trait::async_trait;
use tracing::{debug, trace};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, ChatCompletionTool,
        ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};

use crate::message::{ChatMessage, Role, ToolCall};

use super::{LlmClient, LlmError, LlmRequest, LlmResponse, LlmUsage};

pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
}

impl ChatOpenAI {
    /// API key from `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            temperature: None,
        }
    }

    /// Custom key or base URL (any OpenAI-compatible endpoint).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn to_request_messages(request: &LlmRequest) -> Vec<ChatCompletionRequestMessage> {
        let mut out = Vec::with_capacity(request.messages.len() + 1);
        out.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessage::from(request.system.as_str()),
        ));
        for message in &request.messages {
            out.push(Self::map_message(message));
        }
        out
    }

    fn map_message(message: &ChatMessage) -> ChatCompletionRequestMessage {
        match message.role {
            Role::User => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage::from(message.text.as_str()),
            ),
            Role::Assistant => {
                ChatCompletionRequestMessage::Assistant((message.text.as_str()).into())
            }
            Role::Tool => {
                let name = message.tool_result_for.as_deref().unwrap_or("tool");
                let text = format!("[tool result {}] {}", name, message.text);
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(
                    text.as_str(),
                ))
            }
        }
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(Self::to_request_messages(request));

        if !request.tools.is_empty() {
            let chat_tools: Vec<ChatCompletionTools> = request
                .tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters_schema.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
        }

        if let Some(t) = self.temperature {
            args.temperature(t);
        }

        let built = args
            .build()
            .map_err(|e| LlmError::Request(format!("request build failed: {}", e)))?;

        debug!(
            model = %self.model,
            message_count = request.messages.len(),
            tools_count = request.tools.len(),
            "chat completion"
        );
        if let Ok(js) = serde_json::to_string(&built) {
            trace!(request = %js, "chat completion request body");
        }

        let response = self
            .client
            .chat()
            .create(built)
            .await
            .map_err(|e| LlmError::Request(format!("provider error: {}", e)))?;

        let choice = response.choices.into_iter().next().ok_or(LlmError::Empty)?;
        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    Some(ToolCall {
                        id: Some(f.id),
                        name: f.function.name,
                        arguments: f.function.arguments,
                    })
                } else {
                    None
                }
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_entries_map_to_user_observations() {
        let msg = ChatMessage::tool_result(1, Some("call_9".into()), "balance: 12 TON");
        match ChatOpenAI::map_message(&msg) {
            ChatCompletionRequestMessage::User(_) => {}
            other => panic!("expected user mapping, got {:?}", other),
        }
    }

    #[test]
    fn system_goes_first() {
        let request = LlmRequest {
            system: "persona".into(),
            messages: vec![ChatMessage::user(1, "u", "hi")],
            tools: vec![],
        };
        let mapped = ChatOpenAI::to_request_messages(&request);
        assert_eq!(mapped.len(), 2);
        assert!(matches!(mapped[0], ChatCompletionRequestMessage::System(_)));
    }
}
