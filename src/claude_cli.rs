//! Claude SDK provider
//!
//! Uses claude-agent-sdk-rs to reach Claude through a locally installed
//! Claude Code CLI, so no API key is needed. Enabled by the `claude-cli`
//! feature and registered as `claude-cli`.

use crate::prompt::{SYSTEM_PROMPT, build_prompt, interpret_reply};
use crate::provider::{LlmProvider, ProviderOptions, ProviderRegistry};
use crate::types::{ColumnMetadata, FilterCondition, ParseResult};
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::warn;

/// Registry name
pub const PROVIDER_NAME: &str = "claude-cli";

/// Claude SDK provider
pub struct ClaudeCliProvider {
    model: String,
    /// Whether `claude --version` ran, checked once per provider
    available: OnceCell<bool>,
}

impl Default for ClaudeCliProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCliProvider {
    /// Create with the default model (haiku for speed)
    pub fn new() -> Self {
        Self::with_model("haiku")
    }

    /// Create with specific model
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            available: OnceCell::new(),
        }
    }

    async fn cli_available(&self) -> bool {
        if let Some(available) = self.available.get() {
            return *available;
        }
        let available = tokio::process::Command::new("claude")
            .arg("--version")
            .output()
            .await
            .is_ok();
        *self.available.get_or_init(|| available)
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        use claude_agent_sdk_rs::{
            ClaudeAgentOptions, ContentBlock, McpServers, Message, PermissionMode, SettingSource,
            query,
        };
        use std::collections::HashMap;

        let mut extra_args: HashMap<String, Option<String>> = HashMap::new();
        extra_args.insert("no-chrome".to_string(), None);
        extra_args.insert("no-session-persistence".to_string(), None);
        extra_args.insert("disable-slash-commands".to_string(), None);
        extra_args.insert("strict-mcp-config".to_string(), None);

        // Single turn, no tools, no plugins, no settings
        let options = ClaudeAgentOptions::builder()
            .model(&self.model)
            .system_prompt(SYSTEM_PROMPT.to_string())
            .max_turns(1)
            .permission_mode(PermissionMode::BypassPermissions)
            .tools(Vec::<String>::new())
            .mcp_servers(McpServers::Empty)
            .setting_sources(Vec::<SettingSource>::new())
            .plugins(Vec::new())
            .skip_version_check(true)
            .fork_session(true)
            .extra_args(extra_args)
            .build();

        let messages = query(prompt, Some(options)).await?;

        let mut output = String::new();
        for message in messages {
            if let Message::Assistant(msg) = message {
                for block in msg.message.content {
                    if let ContentBlock::Text(text) = block {
                        output.push_str(&text.text);
                    }
                }
            }
        }
        Ok(output)
    }
}

#[async_trait]
impl LlmProvider for ClaudeCliProvider {
    async fn parse_query(
        &self,
        query: &str,
        columns: &[ColumnMetadata],
        current_filters: &[FilterCondition],
    ) -> ParseResult {
        if !self.cli_available().await {
            return ParseResult::failure(
                "Claude Code CLI is required. Install it and make sure `claude` is on PATH.",
            );
        }

        let prompt = build_prompt(query, columns, current_filters);
        match self.ask(&prompt).await {
            Ok(content) => interpret_reply(&content, columns),
            Err(err) => {
                warn!(provider = PROVIDER_NAME, "{}", err);
                ParseResult::failure(err.to_string())
            }
        }
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        *self.available.get_or_init(|| {
            std::process::Command::new("claude")
                .arg("--version")
                .output()
                .is_ok()
        })
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }
}

pub(crate) fn register(registry: &ProviderRegistry) {
    registry.register(PROVIDER_NAME, |options: &ProviderOptions| {
        let provider = match options.model.as_deref() {
            Some(model) => ClaudeCliProvider::with_model(model),
            None => ClaudeCliProvider::new(),
        };
        let provider: Arc<dyn LlmProvider> = Arc::new(provider);
        Ok(provider)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_selection() {
        assert_eq!(ClaudeCliProvider::new().model(), Some("haiku"));
        assert_eq!(ClaudeCliProvider::with_model("sonnet").model(), Some("sonnet"));
        assert_eq!(ClaudeCliProvider::new().name(), "claude-cli");
    }

    #[tokio::test]
    async fn test_missing_cli_reuses_cached_check() {
        let provider = ClaudeCliProvider::new();
        provider.available.set(false).unwrap();

        assert!(!provider.is_configured());
        let result = provider.parse_query("shirts", &[], &[]).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Claude Code CLI is required"));
    }
}
