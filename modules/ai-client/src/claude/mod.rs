mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};

use crate::structured::StructuredOutput;
use client::ClaudeClient;
use types::{ChatRequest, ContentBlock, ToolDefinitionWire, WireMessage};

/// Anthropic Messages API client bound to one model.
#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: Option<String>,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    /// Extract a typed value. The type's schemars schema is sent as a forced
    /// tool call, so the model cannot reply with free text.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T> {
        let tool_name = "structured_response";
        let mut request = ChatRequest::new(&self.model)
            .system(system_prompt)
            .message(WireMessage::user(user_prompt))
            .temperature(0.0)
            .tool(ToolDefinitionWire {
                name: tool_name.to_string(),
                description: "Extract structured data from the input.".to_string(),
                input_schema: T::output_schema(),
            });
        request.tool_choice = Some(serde_json::json!({
            "type": "tool",
            "name": tool_name,
        }));

        let response = self.client().chat(&request).await?;

        for block in &response.content {
            if let ContentBlock::ToolUse { input, .. } = block {
                return serde_json::from_value(input.clone())
                    .map_err(|e| anyhow!("Failed to deserialize response: {}", e));
            }
        }

        Err(anyhow!("No structured output in Claude response"))
    }

    /// Plain prose completion.
    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user))
            .temperature(0.0);

        let response = self.client().chat(&request).await?;

        response
            .text()
            .ok_or_else(|| anyhow!("No text response from Claude"))
    }
}
