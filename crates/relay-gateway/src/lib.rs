use std::sync::Arc;
use std::time::Duration;

use relay_common::RelayConfig;
use relay_memory::{
    ChatMessage, RateLimiter, Role, SessionStore, assemble_context, estimate_tokens,
};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_key: String,
    pub author_key: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(
        channel_key: impl Into<String>,
        author_key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_key: channel_key.into(),
            author_key: author_key.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    /// Slash command answered locally; no turn was recorded.
    Command(String),
    /// Admission denied; surface the wait to the user rather than retrying.
    RateLimited { retry_after_seconds: u64 },
    /// User turn recorded and context assembled for the generation call.
    Prompt { context: Vec<ChatMessage> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub conversations_removed: usize,
    pub rate_entries_removed: usize,
}

/// The one shared message pipeline every channel handler depends on:
/// admission check, history append, context assembly. Constructed once at
/// process start and handed to handlers; the stores behind it are
/// process-lifetime singletons with no persistence.
pub struct ChatRuntime {
    sessions: Arc<SessionStore>,
    limiter: Arc<RateLimiter>,
    context_window: usize,
    max_age: Duration,
}

impl ChatRuntime {
    pub fn new(config: &RelayConfig) -> Self {
        Self::with_stores(
            Arc::new(SessionStore::new(config.session.max_history)),
            Arc::new(RateLimiter::new(
                config.rate_limit.max_requests,
                config.rate_limit.window_seconds,
            )),
            config,
        )
    }

    pub fn with_stores(
        sessions: Arc<SessionStore>,
        limiter: Arc<RateLimiter>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            sessions,
            limiter,
            context_window: config.context.context_window,
            max_age: Duration::from_secs(config.session.max_age_hours * 3_600),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn process_chat_input(&self, inbound: &InboundMessage) -> ChatReply {
        let trimmed = inbound.text.trim();
        if let Some(command) = parse_slash_command(trimmed) {
            return ChatReply::Command(self.handle_slash_command(inbound, &command));
        }

        let decision = self.limiter.check_and_record(&inbound.author_key);
        if !decision.allowed {
            return ChatReply::RateLimited {
                retry_after_seconds: decision.retry_after_seconds,
            };
        }

        self.sessions
            .append(&inbound.channel_key, Role::User, trimmed);
        let history = self.sessions.history(&inbound.channel_key, None);
        let context = assemble_context(&history, self.context_window);
        debug!(
            channel = inbound.channel_key.as_str(),
            turns = context.len(),
            "prompt context assembled"
        );
        ChatReply::Prompt { context }
    }

    /// Records the assistant turn once the external generation call returned.
    pub fn record_reply(&self, channel_key: &str, content: &str) {
        self.sessions.append(channel_key, Role::Assistant, content);
    }

    /// One sweep pass over both stores. The caller drives the cadence; the
    /// configured `sweep_interval_minutes` is only a suggestion for it.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceReport {
            conversations_removed: self.sessions.sweep(self.max_age),
            rate_entries_removed: self.limiter.sweep(),
        }
    }

    fn handle_slash_command(&self, inbound: &InboundMessage, command: &str) -> String {
        let (head, rest) = match command.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (command, ""),
        };

        match head {
            "/help" => slash_help(),
            "/clear" => {
                self.sessions.clear(&inbound.channel_key);
                format!("conversation_cleared channel={}", inbound.channel_key)
            }
            "/stats" => {
                let stats = self.sessions.stats();
                format!(
                    "conversations={} turns={} active_last_hour={}",
                    stats.conversations, stats.turns, stats.active_last_hour
                )
            }
            "/limits" => {
                let usage = self.limiter.stats(&inbound.author_key);
                format!(
                    "used={} remaining={} reset_in_seconds={} max_requests={} window_seconds={}",
                    usage.used,
                    usage.remaining,
                    usage.reset_in_seconds,
                    self.limiter.max_requests(),
                    self.limiter.window_seconds()
                )
            }
            "/export" => match self.sessions.export(&inbound.channel_key) {
                Ok(json) => json,
                Err(err) => format!("export_failed: {err}"),
            },
            "/import" => {
                if rest.is_empty() {
                    "usage: /import <transcript json>".to_string()
                } else {
                    match self.sessions.import(&inbound.channel_key, rest) {
                        Ok(turns) => format!("transcript_imported turns={turns}"),
                        Err(err) => format!("import_failed: {err}"),
                    }
                }
            }
            _ => "unknown command. try /help".to_string(),
        }
    }
}

fn parse_slash_command(text: &str) -> Option<String> {
    if text.starts_with('/') {
        return Some(text.to_string());
    }
    None
}

fn slash_help() -> String {
    [
        "commands:",
        "/clear",
        "/stats",
        "/limits",
        "/export",
        "/import <transcript json>",
        "/help",
    ]
    .join("\n")
}

/// Rough size of an assembled context, for display and logging.
pub fn context_token_estimate(context: &[ChatMessage]) -> usize {
    context.iter().map(|m| estimate_tokens(&m.content)).sum()
}
