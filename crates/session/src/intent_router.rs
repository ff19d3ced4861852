//! Utterance routing
//!
//! Classifies recognized text before it reaches the LLM: exit commands,
//! wake words, the server's own farewell prompt echoing back, and
//! structured intents resolved through the tool registry.

use voiceline_providers::IntentProvider;
use voiceline_tools::{ToolAction, ToolRegistry};

/// What the connection should do with an utterance.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Exit command matched; end the session
    CloseSession,
    /// Wake word matched; arm the post-wake cool-down, no LLM turn
    WakeWord,
    /// The configured end-prompt echoed back as recognized speech
    EndPromptEcho,
    /// A structured intent was dispatched, optionally with a spoken reply
    Handled(Option<String>),
    /// Fall through to general chat
    Unhandled,
}

/// Ordered utterance classifier; first match wins.
pub struct IntentRouter {
    exit_commands: Vec<String>,
    wakeup_words: Vec<String>,
    end_prompt: Option<String>,
}

impl IntentRouter {
    pub fn new(
        exit_commands: Vec<String>,
        wakeup_words: Vec<String>,
        end_prompt: Option<String>,
    ) -> Self {
        Self {
            exit_commands,
            wakeup_words,
            end_prompt,
        }
    }

    pub async fn route(
        &self,
        text: &str,
        intent: &dyn IntentProvider,
        tools: &ToolRegistry,
    ) -> RouteOutcome {
        let trimmed = text.trim();

        if self.is_exit_command(trimmed) {
            tracing::info!("Exit command detected: {trimmed}");
            return RouteOutcome::CloseSession;
        }

        if self.is_wakeup_word(trimmed) {
            tracing::info!("Wake word detected: {trimmed}");
            return RouteOutcome::WakeWord;
        }

        if self.is_end_prompt(trimmed) {
            return RouteOutcome::EndPromptEcho;
        }

        match intent.detect_intent(trimmed).await {
            Ok(Some(result)) => {
                if !tools.has_tool(&result.name) {
                    return RouteOutcome::Unhandled;
                }
                let response = tools.execute(&result.name, &result.parameters).await;
                match response.action {
                    ToolAction::Response | ToolAction::Error | ToolAction::NotFound => {
                        RouteOutcome::Handled(response.response)
                    }
                    ToolAction::RequestLlm | ToolAction::None => RouteOutcome::Unhandled,
                }
            }
            Ok(None) => RouteOutcome::Unhandled,
            Err(e) => {
                tracing::warn!("Intent detection failed: {e}");
                RouteOutcome::Unhandled
            }
        }
    }

    /// Exit commands match exactly, case-insensitively.
    fn is_exit_command(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.exit_commands
            .iter()
            .any(|command| lowered == command.to_lowercase())
    }

    /// Wake words match as substrings, case-insensitively.
    fn is_wakeup_word(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.wakeup_words
            .iter()
            .any(|word| lowered.contains(&word.to_lowercase()))
    }

    /// The end prompt matches only on exact text.
    fn is_end_prompt(&self, text: &str) -> bool {
        self.end_prompt.as_deref() == Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use voiceline_core::IntentResult;
    use voiceline_providers::ProviderError;
    use voiceline_tools::create_default_registry;

    struct NoIntent;

    #[async_trait]
    impl IntentProvider for NoIntent {
        async fn detect_intent(
            &self,
            _text: &str,
        ) -> Result<Option<IntentResult>, ProviderError> {
            Ok(None)
        }
    }

    struct FixedIntent(IntentResult);

    #[async_trait]
    impl IntentProvider for FixedIntent {
        async fn detect_intent(
            &self,
            _text: &str,
        ) -> Result<Option<IntentResult>, ProviderError> {
            Ok(Some(self.0.clone()))
        }
    }

    fn router() -> IntentRouter {
        IntentRouter::new(
            vec!["退出".to_string(), "Exit".to_string()],
            vec!["你好小智".to_string()],
            Some("再见提示语".to_string()),
        )
    }

    #[tokio::test]
    async fn test_exit_is_exact_match() {
        let router = router();
        let tools = create_default_registry();

        let outcome = router.route("退出", &NoIntent, &tools).await;
        assert_eq!(outcome, RouteOutcome::CloseSession);

        // substring is not enough for an exit command
        let outcome = router.route("我要退出了", &NoIntent, &tools).await;
        assert_eq!(outcome, RouteOutcome::Unhandled);
    }

    #[tokio::test]
    async fn test_exit_is_case_insensitive() {
        let router = router();
        let tools = create_default_registry();
        let outcome = router.route("EXIT", &NoIntent, &tools).await;
        assert_eq!(outcome, RouteOutcome::CloseSession);
    }

    #[tokio::test]
    async fn test_wake_word_is_substring_match() {
        let router = router();
        let tools = create_default_registry();
        let outcome = router.route("喂，你好小智在吗", &NoIntent, &tools).await;
        assert_eq!(outcome, RouteOutcome::WakeWord);
    }

    #[tokio::test]
    async fn test_end_prompt_is_exact_match() {
        let router = router();
        let tools = create_default_registry();
        assert_eq!(
            router.route("再见提示语", &NoIntent, &tools).await,
            RouteOutcome::EndPromptEcho
        );
        assert_eq!(
            router.route("再见提示语啊", &NoIntent, &tools).await,
            RouteOutcome::Unhandled
        );
    }

    #[tokio::test]
    async fn test_intent_dispatches_through_registry() {
        let router = router();
        let tools = create_default_registry();
        let intent = FixedIntent(IntentResult {
            name: "get_weather".to_string(),
            confidence: 0.9,
            parameters: json!({"location": "上海"}),
        });

        match router.route("上海天气怎么样", &intent, &tools).await {
            RouteOutcome::Handled(Some(reply)) => assert!(reply.contains("上海")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_intent_falls_through() {
        let router = router();
        let tools = create_default_registry();
        let intent = FixedIntent(IntentResult {
            name: "book_flight".to_string(),
            confidence: 0.8,
            parameters: json!({}),
        });

        assert_eq!(
            router.route("帮我订机票", &intent, &tools).await,
            RouteOutcome::Unhandled
        );
    }

    #[tokio::test]
    async fn test_no_intent_falls_through() {
        let router = router();
        let tools = create_default_registry();
        assert_eq!(
            router.route("今天心情不错", &NoIntent, &tools).await,
            RouteOutcome::Unhandled
        );
    }
}
