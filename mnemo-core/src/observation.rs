//! Observation pipeline — turning what an agent perceives into memories.
//!
//! Perception has two halves:
//!
//! 1. [`perceive_environment`] renders a structured snapshot of the
//!    surroundings into first-person observation sentences.
//! 2. An [`Observer`] turns sentences into [`MemoryRecord`]s: it asks the
//!    [`ReasoningOracle`] how significant each one is (unless the caller
//!    already knows), embeds the text, and extracts keywords.
//!
//! Nothing here fails on a flaky collaborator: an oracle error falls back
//! to the default importance and an embedding error to a zero vector.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bank::MemoryBank;
use crate::consolidation::ReasoningOracle;
use crate::embedding::{EmbeddingProvider, embed_or_zero};
use crate::error::Result;
use crate::keywords::extract_keywords;
use crate::memory::MemoryRecord;
use crate::memory::record::{DEFAULT_IMPORTANCE, DEFAULT_SOURCE};
use crate::types::{MemoryId, Timestamp};

/// Default importance of social interaction memories.
pub const SOCIAL_IMPORTANCE: f32 = 6.0;
/// Default importance of goal activity memories.
pub const GOAL_IMPORTANCE: f32 = 8.0;
/// Source tag of social interaction memories.
pub const SOCIAL_SOURCE: &str = "social_interaction";
/// Source tag of goal activity memories.
pub const GOAL_SOURCE: &str = "goal_activity";

/// How many principles and goals are shown to the importance scorer.
const SCORING_CONTEXT_ITEMS: usize = 3;

// ---------------------------------------------------------------------------
// Environment rendering
// ---------------------------------------------------------------------------

/// Structured snapshot of an agent's surroundings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentState {
    /// Where the agent is.
    pub location: Option<String>,
    /// Time of day, free text.
    pub time: Option<String>,
    /// Weather, free text; `"clear"` is not worth mentioning.
    pub weather: Option<String>,
    /// Notable objects nearby.
    pub objects: Vec<String>,
    /// Things happening around the agent.
    pub events: Vec<String>,
}

/// Another agent in view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSighting {
    /// Their name.
    pub name: String,
    /// What they are doing, if visible.
    #[serde(default)]
    pub activity: Option<String>,
}

/// The social side of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialContext {
    /// Other agents present.
    pub other_agents: Vec<AgentSighting>,
    /// Interactions the agent took part in.
    pub interactions: Vec<String>,
    /// Social events noticed.
    pub social_events: Vec<String>,
}

/// The agent's own state, reported back as observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternalState {
    /// What the agent is working on.
    pub current_goal: Option<String>,
    /// Current mood.
    pub mood: Option<String>,
}

/// Render a snapshot into first-person observation sentences.
///
/// The environment contributes only when present; an absent location or
/// time reads as "unknown location" / "unknown time".
#[must_use]
pub fn perceive_environment(
    environment: Option<&EnvironmentState>,
    social: Option<&SocialContext>,
    internal: &InternalState,
) -> Vec<String> {
    let mut observations = Vec::new();

    if let Some(env) = environment {
        observations.push(format!(
            "I am currently at {} at {}",
            env.location.as_deref().unwrap_or("unknown location"),
            env.time.as_deref().unwrap_or("unknown time"),
        ));
        if let Some(weather) = env.weather.as_deref().filter(|w| *w != "clear") {
            observations.push(format!("The weather is {weather}"));
        }
        observations.extend(env.objects.iter().map(|o| format!("I notice {o} nearby")));
        observations.extend(env.events.iter().map(|e| format!("I observe that {e}")));
    }

    if let Some(social) = social {
        observations.extend(social.other_agents.iter().map(|a| {
            format!("I see {} {}", a.name, a.activity.as_deref().unwrap_or("here"))
        }));
        observations.extend(
            social
                .interactions
                .iter()
                .map(|i| format!("I had an interaction: {i}")),
        );
        observations.extend(
            social
                .social_events
                .iter()
                .map(|e| format!("I noticed a social event: {e}")),
        );
    }

    if let Some(goal) = &internal.current_goal {
        observations.push(format!("I am currently focused on: {goal}"));
    }
    if let Some(mood) = internal.mood.as_deref().filter(|m| !m.is_empty()) {
        observations.push(format!("I am feeling {mood}"));
    }

    observations.retain(|o| !o.trim().is_empty());
    observations
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Creates memory records on behalf of one agent.
pub struct Observer<'a> {
    agent_name: String,
    provider: &'a dyn EmbeddingProvider,
    oracle: &'a dyn ReasoningOracle,
}

impl std::fmt::Debug for Observer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("agent_name", &self.agent_name)
            .field("model", &self.provider.model_name())
            .finish_non_exhaustive()
    }
}

impl<'a> Observer<'a> {
    /// Create an observer for the named agent.
    #[must_use]
    pub fn new(
        agent_name: impl Into<String>,
        provider: &'a dyn EmbeddingProvider,
        oracle: &'a dyn ReasoningOracle,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            provider,
            oracle,
        }
    }

    /// Build a memory from an observation sentence.
    ///
    /// Without `manual_importance` the oracle scores the text against the
    /// agent's name and its first few core principles and goals (read from
    /// `bank`). A non-empty `context` becomes the associated event.
    #[must_use]
    pub fn observation(
        &self,
        bank: &MemoryBank,
        text: &str,
        context: &str,
        source: &str,
        manual_importance: Option<f32>,
        now: Timestamp,
    ) -> MemoryRecord {
        let importance = manual_importance.unwrap_or_else(|| self.score(bank, text));
        let mut builder = MemoryRecord::builder(text)
            .timestamp(now)
            .importance(importance)
            .source(source)
            .embedding(embed_or_zero(self.provider, text));
        if !context.is_empty() {
            builder = builder.associated_event(context);
        }
        builder.build()
    }

    /// Build a memory of an interaction with another agent.
    #[must_use]
    pub fn social(
        &self,
        other_agent: &str,
        interaction_type: &str,
        content: &str,
        importance: f32,
        now: Timestamp,
    ) -> MemoryRecord {
        let text = format!("I had a {interaction_type} with {other_agent}: {content}");
        let mut keywords = extract_keywords(&text);
        keywords.push(other_agent.to_string());
        keywords.push(interaction_type.to_string());

        MemoryRecord::builder(text.as_str())
            .timestamp(now)
            .importance(importance)
            .source(SOCIAL_SOURCE)
            .embedding(embed_or_zero(self.provider, &text))
            .associated_event(format!("{interaction_type}_with_{other_agent}"))
            .keywords(keywords)
            .build()
    }

    /// Build a memory of goal-related activity.
    #[must_use]
    pub fn goal(&self, goal_text: &str, goal_type: &str, importance: f32, now: Timestamp) -> MemoryRecord {
        let text = format!("Goal activity: {goal_text}");
        let mut keywords = extract_keywords(&text);
        keywords.push("goal".to_string());
        keywords.push(goal_type.to_string());

        MemoryRecord::builder(text.as_str())
            .timestamp(now)
            .importance(importance)
            .source(GOAL_SOURCE)
            .embedding(embed_or_zero(self.provider, &text))
            .associated_event(goal_type)
            .keywords(keywords)
            .build()
    }

    /// Score and store every observation; returns the ids of stored
    /// records in order. Observations identical to a stored record (same
    /// text and instant) are skipped.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub fn perceive(
        &self,
        bank: &mut MemoryBank,
        observations: &[String],
        now: Timestamp,
    ) -> Result<Vec<MemoryId>> {
        let mut stored = Vec::with_capacity(observations.len());
        for text in observations {
            // Check before scoring and embedding; both may be remote calls.
            let id = MemoryId::derive(&now, text);
            if bank.memories.contains(&id) {
                debug!(id = %id, "Observation already remembered");
                continue;
            }
            let memory = self.observation(bank, text, "", DEFAULT_SOURCE, None, now);
            stored.push(memory.id.clone());
            bank.remember(memory)?;
        }
        debug!(agent = %self.agent_name, stored = stored.len(), "Perceived observations");
        Ok(stored)
    }

    fn score(&self, bank: &MemoryBank, text: &str) -> f32 {
        let mut agent_context = format!("Agent: {}", self.agent_name);
        let principles = bank.reflections.core_principles();
        if !principles.is_empty() {
            let shown = principles.iter().take(SCORING_CONTEXT_ITEMS).cloned().collect::<Vec<_>>();
            agent_context.push_str(&format!(", Core principles: {}", shown.join(", ")));
        }
        let goals = bank.reflections.long_term_goals();
        if !goals.is_empty() {
            let shown = goals.iter().take(SCORING_CONTEXT_ITEMS).cloned().collect::<Vec<_>>();
            agent_context.push_str(&format!(", Goals: {}", shown.join(", ")));
        }

        match self.oracle.score_importance(text, &agent_context) {
            Ok(score) if score.is_finite() => score,
            Ok(_) => {
                warn!(agent = %self.agent_name, "Importance score was not finite; using default");
                DEFAULT_IMPORTANCE
            }
            Err(e) => {
                warn!(agent = %self.agent_name, error = %e, "Importance scoring failed; using default");
                DEFAULT_IMPORTANCE
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
