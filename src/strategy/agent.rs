//! Multi-turn agent conversation
//!
//! The conversation outlives individual recordings: each hold adds one
//! user turn and one reply, and the strategy stays bound until the user
//! says an exit phrase, the agent asks to stop, or something fails.
//! Ending is reported as `DONE`; the controller runs `cleanup` once it
//! knows no newer turn has taken over the conversation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::{HandleTranscriptParams, HandleTranscriptResult, StrategyContext};
use crate::native::{
    AgentMessage, AgentRole, AgentWindowMessage, AgentWindowState, MessageSender, Toast,
};
use crate::session::{OverlayPhase, OverlaySurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConversationState {
    /// No turn taken yet
    Fresh,
    /// At least one turn started
    Active,
    /// Torn down; the next turn starts over
    Terminated,
}

#[derive(Debug)]
struct Conversation {
    state: ConversationState,
    /// Bubbles shown in the agent overlay
    messages: Vec<AgentWindowMessage>,
    /// What the backend sees
    history: Vec<AgentMessage>,
}

impl Conversation {
    fn new() -> Self {
        Self {
            state: ConversationState::Fresh,
            messages: Vec::new(),
            history: Vec::new(),
        }
    }

    fn window(&self) -> AgentWindowState {
        AgentWindowState {
            messages: self.messages.clone(),
        }
    }
}

pub struct AgentStrategy {
    pub(super) ctx: Arc<StrategyContext>,
    conversation: Mutex<Conversation>,
}

impl AgentStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self {
            ctx,
            conversation: Mutex::new(Conversation::new()),
        }
    }

    fn conversation(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn emit_window(&self, state: Option<AgentWindowState>) {
        if let Err(e) = self.ctx.bridge.set_agent_window(state).await {
            warn!(error = %e, "failed to update agent window");
        }
    }

    /// Clears the agent window on the first turn only
    pub(super) async fn on_before_start(&self) {
        let first_turn = {
            let mut conversation = self.conversation();
            let first = conversation.state != ConversationState::Active;
            if first {
                *conversation = Conversation::new();
                conversation.state = ConversationState::Active;
            }
            first
        };

        if first_turn {
            debug!("starting agent conversation");
            self.emit_window(None).await;
        }
    }

    pub(super) async fn handle_transcript(
        &self,
        params: HandleTranscriptParams,
    ) -> HandleTranscriptResult {
        let ctx = &self.ctx;
        let text = params.raw_transcript.trim().to_string();

        if text.is_empty() {
            debug!(session_id = params.session_id, "empty agent turn");
            ctx.release_token(params.token);
            return HandleTranscriptResult::CONTINUE;
        }

        let exit_phrases = ctx.prefs.snapshot().agent_exit_phrases;
        if let Some(phrase) = matching_exit_phrase(&text, &exit_phrases) {
            info!(session_id = params.session_id, %phrase, "exit phrase, ending conversation");
            ctx.release_token(params.token);
            return HandleTranscriptResult::DONE;
        }

        let Some(backend) = ctx.agent.clone() else {
            warn!("no agent backend configured");
            ctx.toast(Toast::error("Agent unavailable", "No agent backend is configured."))
                .await;
            ctx.release_token(params.token);
            return HandleTranscriptResult::DONE;
        };

        let (window, history) = {
            let mut conversation = self.conversation();
            conversation.messages.push(AgentWindowMessage {
                text: text.clone(),
                sender: MessageSender::Me,
                is_error: false,
                tools: Vec::new(),
            });
            conversation.history.push(AgentMessage {
                role: AgentRole::User,
                content: text,
            });
            (conversation.window(), conversation.history.clone())
        };
        self.emit_window(Some(window)).await;

        let reply = match backend.run(&history).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, session_id = params.session_id, "agent request failed");
                ctx.toast(Toast::error("Agent request failed", e.to_string()))
                    .await;
                ctx.release_token(params.token);
                return HandleTranscriptResult::DONE;
            }
        };

        if !reply.response.is_empty() {
            let window = {
                let mut conversation = self.conversation();
                conversation.messages.push(AgentWindowMessage {
                    text: reply.response.clone(),
                    sender: MessageSender::Agent,
                    is_error: reply.is_error,
                    tools: reply.tools.clone(),
                });
                conversation.history.push(AgentMessage {
                    role: AgentRole::Assistant,
                    content: reply.response.clone(),
                });
                conversation.window()
            };
            self.emit_window(Some(window)).await;
        }

        ctx.release_token(params.token);

        if reply.stop_requested {
            info!(session_id = params.session_id, "agent requested stop");
            return HandleTranscriptResult::DONE;
        }

        HandleTranscriptResult::CONTINUE
    }

    pub(super) async fn cleanup(&self) {
        {
            let mut conversation = self.conversation();
            *conversation = Conversation::new();
            conversation.state = ConversationState::Terminated;
        }
        self.ctx
            .publish_phase(OverlaySurface::Agent, OverlayPhase::Idle)
            .await;
        self.emit_window(None).await;
    }

    #[cfg(test)]
    fn turns(&self) -> usize {
        self.conversation().history.len()
    }
}

/// Lowercase words with punctuation dropped
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First exit phrase appearing as whole words in `text`
fn matching_exit_phrase<'a>(text: &str, phrases: &'a [String]) -> Option<&'a str> {
    let haystack = format!(" {} ", normalize(text));
    phrases
        .iter()
        .find(|phrase| {
            let needle = normalize(phrase);
            !needle.is_empty() && haystack.contains(&format!(" {needle} "))
        })
        .map(String::as_str)
}
