//! Text-driven recall: embed a context string, then retrieve.
//!
//! [`MemoryStore::retrieve_at`] works on vectors; these helpers sit one
//! level up and accept the free text an agent actually has in hand.

use std::collections::HashSet;

use crate::config::MnemoConfig;
use crate::embedding::{EmbeddingProvider, embed_or_zero};
use crate::memory::{MemoryRecord, MemoryStore};
use crate::retrieval::scoring::CompositeScorer;
use crate::retrieval::{RetrievalQuery, RetrievedMemory};
use crate::types::{Embedding, TimeRange, Timestamp};

const PLANNING_TOP_K: usize = 8;
const PLANNING_MIN_IMPORTANCE: f32 = 5.0;
const PLANNING_WINDOW_HOURS: u32 = 7 * 24;
const PLANNING_GOAL_ACTIVITY: usize = 5;
const PLANNING_REFLECTIONS: usize = 3;
const PLANNING_LIMIT: usize = 15;

const SOCIAL_TOP_K: usize = 10;
const SOCIAL_MIN_IMPORTANCE: f32 = 3.0;
const SOCIAL_LIMIT: usize = 8;

const SIMILAR_MIN_IMPORTANCE: f32 = 4.0;

const KNOWLEDGE_TOP_K: usize = 8;
const KNOWLEDGE_MIN_IMPORTANCE: f32 = 5.0;
const KNOWLEDGE_SOURCES: [&str; 4] = ["reflection", "insight", "learning", "observation"];

/// Default `k` for [`similar_experiences`].
pub const DEFAULT_SIMILAR_K: usize = 5;
/// Default character budget for [`summarize_for_context`].
pub const DEFAULT_SUMMARY_LENGTH: usize = 500;
/// Default threshold for [`filter_by_relevance`].
pub const DEFAULT_MIN_RELEVANCE: f64 = 0.1;
/// Returned by [`summarize_for_context`] when there is nothing to summarize.
pub const NO_MEMORIES_SUMMARY: &str = "No relevant memories found.";

/// Options for [`retrieve_relevant`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecallOptions {
    /// Maximum number of results.
    pub k: usize,
    /// Minimum importance; zero disables the filter.
    pub importance_threshold: f32,
    /// Restrict to the last `n` hours.
    pub window_hours: Option<u32>,
    /// Restrict to these sources.
    pub sources: Option<Vec<String>>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            k: 10,
            importance_threshold: 0.0,
            window_hours: None,
            sources: None,
        }
    }
}

impl RecallOptions {
    /// Unfiltered options returning the configured `memory.default_top_k`.
    #[must_use]
    pub fn from_config(config: &MnemoConfig) -> Self {
        Self {
            k: config.memory.default_top_k,
            ..Self::default()
        }
    }
}

/// Embed `context` with `provider` and retrieve the best matches.
///
/// An embedding failure degrades to a zero query vector, so ranking falls
/// back to importance and recency.
pub fn retrieve_relevant<'s>(
    store: &'s mut MemoryStore,
    provider: &dyn EmbeddingProvider,
    context: &str,
    options: &RecallOptions,
    now: Timestamp,
) -> Vec<RetrievedMemory<'s>> {
    let mut query = RetrievalQuery::new(options.k)
        .embedding(embed_or_zero(provider, context))
        .importance_threshold(options.importance_threshold);
    if let Some(hours) = options.window_hours {
        query = query.time_range(TimeRange::last_hours(hours, now));
    }
    if let Some(sources) = &options.sources {
        query = query.sources(sources.iter().cloned());
    }
    store.retrieve_at(&query, now)
}

/// Memories worth considering when planning: the most relevant significant
/// memories of the past week, the latest goal activity and the latest
/// reflections.
///
/// The result is deduplicated, ordered by importance then recency
/// (descending) and capped at 15 records.
pub fn memories_for_planning(
    store: &mut MemoryStore,
    provider: &dyn EmbeddingProvider,
    planning_context: &str,
    goals: &[String],
    now: Timestamp,
) -> Vec<MemoryRecord> {
    let options = RecallOptions {
        k: PLANNING_TOP_K,
        importance_threshold: PLANNING_MIN_IMPORTANCE,
        window_hours: Some(PLANNING_WINDOW_HOURS),
        sources: None,
    };
    let context = planning_query(planning_context, goals);
    let mut picked: Vec<MemoryRecord> = retrieve_relevant(store, provider, &context, &options, now)
        .into_iter()
        .map(|hit| hit.record.clone())
        .collect();

    // Latest by insertion, regardless of age.
    for (source, take) in [
        ("goal_activity", PLANNING_GOAL_ACTIVITY),
        ("reflection", PLANNING_REFLECTIONS),
    ] {
        let tagged = store.get_memories_by_source(source);
        let skip = tagged.len().saturating_sub(take);
        picked.extend(tagged.into_iter().skip(skip).cloned());
    }

    dedup_by_id(&mut picked);
    picked.sort_by(|a, b| {
        b.importance
            .total_cmp(&a.importance)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
    picked.truncate(PLANNING_LIMIT);
    picked
}

fn planning_query(planning_context: &str, goals: &[String]) -> String {
    if goals.is_empty() {
        planning_context.to_string()
    } else {
        format!("{planning_context} considering goals: {}", goals.join(" "))
    }
}

/// Memories about `other_agent`, for use before or during an interaction.
///
/// Combines the ten most relevant memories (importance at least 3) with
/// every memory naming the agent in its text or keywords, then keeps the
/// eight most recent.
pub fn memories_for_social_context(
    store: &mut MemoryStore,
    provider: &dyn EmbeddingProvider,
    other_agent: &str,
    interaction_context: &str,
    now: Timestamp,
) -> Vec<MemoryRecord> {
    let options = RecallOptions {
        k: SOCIAL_TOP_K,
        importance_threshold: SOCIAL_MIN_IMPORTANCE,
        ..RecallOptions::default()
    };
    let context = format!("interaction with {other_agent} {interaction_context}");
    let mut picked: Vec<MemoryRecord> = retrieve_relevant(store, provider, &context, &options, now)
        .into_iter()
        .map(|hit| hit.record.clone())
        .collect();

    let name = other_agent.to_lowercase();
    picked.extend(
        store
            .iter()
            .filter(|m| m.keywords.contains(&name) || m.text.to_lowercase().contains(&name))
            .cloned(),
    );

    dedup_by_id(&mut picked);
    picked.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.importance.total_cmp(&a.importance))
    });
    picked.truncate(SOCIAL_LIMIT);
    picked
}

/// Past experiences resembling `situation`: the `k` best matches with
/// importance at least 4.
pub fn similar_experiences<'s>(
    store: &'s mut MemoryStore,
    provider: &dyn EmbeddingProvider,
    situation: &str,
    k: usize,
    now: Timestamp,
) -> Vec<RetrievedMemory<'s>> {
    let options = RecallOptions {
        k,
        importance_threshold: SIMILAR_MIN_IMPORTANCE,
        ..RecallOptions::default()
    };
    retrieve_relevant(store, provider, situation, &options, now)
}

/// Knowledge about `topic` drawn from reflections, insights, learning and
/// observations with importance at least 5.
pub fn contextual_knowledge<'s>(
    store: &'s mut MemoryStore,
    provider: &dyn EmbeddingProvider,
    topic: &str,
    knowledge_type: &str,
    now: Timestamp,
) -> Vec<RetrievedMemory<'s>> {
    let options = RecallOptions {
        k: KNOWLEDGE_TOP_K,
        importance_threshold: KNOWLEDGE_MIN_IMPORTANCE,
        window_hours: None,
        sources: Some(KNOWLEDGE_SOURCES.iter().map(ToString::to_string).collect()),
    };
    let context = format!("{knowledge_type} knowledge about {topic}");
    retrieve_relevant(store, provider, &context, &options, now)
}

/// Render memories as `- text` lines for a prompt, most important first.
///
/// Lines are added while they fit in `max_length` characters (newlines not
/// counted). If not even the first fits, it is cut and ends in `...`.
#[must_use]
pub fn summarize_for_context<'a, I>(memories: I, max_length: usize) -> String
where
    I: IntoIterator<Item = &'a MemoryRecord>,
{
    let mut sorted: Vec<&MemoryRecord> = memories.into_iter().collect();
    if sorted.is_empty() {
        return NO_MEMORIES_SUMMARY.to_string();
    }
    sorted.sort_by(|a, b| {
        b.importance
            .total_cmp(&a.importance)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });

    let mut lines = Vec::new();
    let mut total = 0;
    for memory in sorted {
        let line = format!("- {}", memory.text);
        let len = line.chars().count();
        if total + len > max_length {
            if lines.is_empty() {
                let cut: String = line.chars().take(max_length.saturating_sub(3)).collect();
                lines.push(format!("{cut}..."));
            }
            break;
        }
        total += len;
        lines.push(line);
    }
    lines.join("\n")
}

/// Memories with an embedding whose composite score against `query` is at
/// least `min_relevance`, in input order.
pub fn filter_by_relevance<'a, I>(
    memories: I,
    scorer: &CompositeScorer,
    query: &Embedding,
    min_relevance: f64,
    now: Timestamp,
) -> Vec<&'a MemoryRecord>
where
    I: IntoIterator<Item = &'a MemoryRecord>,
{
    memories
        .into_iter()
        .filter(|m| m.embedding.is_some() && scorer.score(m, now, Some(query)) >= min_relevance)
        .collect()
}

fn dedup_by_id(records: &mut Vec<MemoryRecord>) {
    let mut seen = HashSet::new();
    records.retain(|m| seen.insert(m.id.clone()));
}
