mod intent;

pub use intent::{parse_intent, Intent, CHAT_HELP_COMMANDS};

use serde::{Deserialize, Serialize};

use crate::analysis::HairAnalysis;
use crate::plan::ColorPlan;

/// Most recent turns kept when assembling the assistant context.
const HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Bounded instruction payload plus conversation history handed to the chat
/// capability on every turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPayload {
    pub instructions: String,
    pub history: Vec<ChatMessage>,
}

/// Assembles the assistant context from the stored plan and analysis. Pure;
/// called fresh on every turn. The instructions pin the assistant to the
/// stored plan so it cannot invent steps or products the plan does not have.
pub fn build_context(
    plan: &ColorPlan,
    analysis: Option<&HairAnalysis>,
    history: &[ChatMessage],
) -> ContextPayload {
    let plan_json =
        serde_json::to_string_pretty(plan).unwrap_or_else(|_| "{}".to_string());
    let analysis_json = analysis
        .and_then(|analysis| serde_json::to_string_pretty(analysis).ok())
        .unwrap_or_else(|| "none recorded".to_string());

    let instructions = format!(
        "You are the Chromalab assistant supporting a licensed stylist who is \
executing the color plan below. Stay strictly within this plan: never \
introduce steps, products, developers, or timings that are absent from it. \
When asked for changes, explain how to adjust within the recorded steps or \
tell the stylist to regenerate the plan.\n\n\
Current color plan:\n{plan_json}\n\n\
Hair analysis:\n{analysis_json}"
    );

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    ContextPayload {
        instructions,
        history: history[start..].to_vec(),
    }
}
