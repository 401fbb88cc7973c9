//! Reflection synthesis — turning the memory stream into reflections.
//!
//! The [`Reflector`] gathers a window of significant memories, asks a
//! [`ReasoningOracle`] to synthesize them, and commits the answer twice:
//! as a [`ReflectionRecord`] (with weak ids of its sources) and, for most
//! kinds, as a mirrored [`MemoryRecord`] in the memory stream so future
//! retrieval can surface it.
//!
//! | Kind     | Window   | Importance | Mirrored as            |
//! |----------|----------|------------|------------------------|
//! | daily    | 24 h     | 8.0        | `Daily reflection: …`  |
//! | weekly   | 7 days   | 9.0        | `Weekly reflection: …` |
//! | monthly  | 30 days  | 10.0       | not mirrored           |
//! | insight  | caller   | 7.5        | `Insight: …`           |
//! | goal     | 14 days  | 7.5        | `Insight: …`           |
//!
//! Oracle failures never propagate: they are logged and the synthesis is
//! skipped (`Ok(None)`).

use chrono::{Datelike, Duration, Timelike};
use tracing::{debug, info, warn};

use crate::bank::MemoryBank;
use crate::error::Result;
use crate::memory::record::DEFAULT_IMPORTANCE;
use crate::memory::{MemoryRecord, MemoryStore};
use crate::reflection::{ReflectionRecord, ReflectionType};
use crate::types::{MemoryId, Timestamp};

/// Memories below this importance are left out of reflection windows.
pub const REFLECTION_MIN_IMPORTANCE: f32 = 4.0;
/// Importance of daily reflections.
pub const DAILY_IMPORTANCE: f32 = 8.0;
/// Importance of weekly reflections.
pub const WEEKLY_IMPORTANCE: f32 = 9.0;
/// Importance of monthly reflections.
pub const MONTHLY_IMPORTANCE: f32 = 10.0;
/// Importance of insights.
pub const INSIGHT_IMPORTANCE: f32 = 7.5;
/// Minimum group size for [`Reflector::identify_patterns`].
pub const PATTERN_MIN_GROUP: usize = 3;

const MONTHLY_MIN_IMPORTANCE: f32 = 6.0;
const MONTHLY_MAX_LINES: usize = 20;
const GOAL_LOOKBACK_DAYS: i64 = 14;

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// What the oracle is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisKind {
    /// A periodic reflection over a time window.
    Reflection,
    /// An insight tying a set of related memories together.
    Insight,
}

/// Input to [`ReasoningOracle::synthesize`].
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Reflection or insight.
    pub kind: SynthesisKind,
    /// Name of the reflecting agent.
    pub agent_name: String,
    /// Memory texts to synthesize, most significant first.
    pub memories: Vec<String>,
    /// Framing: a date, `Week of …`, `Month of …`, or an insight topic.
    pub context: String,
}

/// External reasoning service (typically an LLM).
///
/// The stores never call the oracle; only the [`Reflector`] and the
/// observation pipeline do.
pub trait ReasoningOracle: Send + Sync {
    /// Produce reflection or insight text for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::Oracle`](crate::error::MnemoError::Oracle) when
    /// the service is unavailable.
    fn synthesize(&self, request: &SynthesisRequest) -> Result<String>;

    /// Score how significant `text` is to the agent, on a 1–10 scale.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::Oracle`](crate::error::MnemoError::Oracle) when
    /// the service is unavailable.
    fn score_importance(&self, _text: &str, _agent_context: &str) -> Result<f32> {
        Ok(DEFAULT_IMPORTANCE)
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// Time-of-day bucket used for temporal pattern detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    /// 06:00–11:59.
    Morning,
    /// 12:00–16:59.
    Afternoon,
    /// 17:00–20:59.
    Evening,
    /// 21:00–05:59.
    Night,
}

impl TimePeriod {
    /// Bucket an hour of the day.
    #[must_use]
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::Night,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

/// Memories from the `hours` before `now` with importance of at least
/// [`REFLECTION_MIN_IMPORTANCE`], most important first.
#[must_use]
pub fn memories_for_reflection(store: &MemoryStore, hours: u32, now: Timestamp) -> Vec<&MemoryRecord> {
    let start = now - Duration::hours(i64::from(hours));
    let mut window: Vec<&MemoryRecord> = store
        .get_memories_by_timeframe(start, now)
        .into_iter()
        .filter(|m| m.importance >= REFLECTION_MIN_IMPORTANCE)
        .collect();
    window.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    window
}

/// Owned ids and texts of a window, so the bank can be mutated afterwards.
#[derive(Debug, Default)]
struct Window {
    ids: Vec<MemoryId>,
    texts: Vec<String>,
}

impl Window {
    fn of<'a>(records: impl IntoIterator<Item = &'a MemoryRecord>) -> Self {
        let mut window = Self::default();
        for record in records {
            window.ids.push(record.id.clone());
            window.texts.push(record.text.clone());
        }
        window
    }
}

/// How a synthesized reflection is echoed into the memory stream.
struct Mirror {
    prefix: &'static str,
    source: &'static str,
    keywords: &'static [&'static str],
}

const DAILY_MIRROR: Mirror = Mirror {
    prefix: "Daily reflection: ",
    source: "reflection",
    keywords: &["reflection", "daily", "insights"],
};

const WEEKLY_MIRROR: Mirror = Mirror {
    prefix: "Weekly reflection: ",
    source: "reflection",
    keywords: &["reflection", "weekly", "insights", "patterns"],
};

const INSIGHT_MIRROR: Mirror = Mirror {
    prefix: "Insight: ",
    source: "insight",
    keywords: &["insight", "synthesis", "pattern", "understanding"],
};

// ---------------------------------------------------------------------------
// Reflector
// ---------------------------------------------------------------------------

/// Drives oracle-backed synthesis over a [`MemoryBank`].
pub struct Reflector<'a> {
    oracle: &'a dyn ReasoningOracle,
    agent_name: String,
}

impl std::fmt::Debug for Reflector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reflector")
            .field("agent_name", &self.agent_name)
            .finish_non_exhaustive()
    }
}

impl<'a> Reflector<'a> {
    /// Create a reflector for the named agent.
    #[must_use]
    pub fn new(oracle: &'a dyn ReasoningOracle, agent_name: impl Into<String>) -> Self {
        Self {
            oracle,
            agent_name: agent_name.into(),
        }
    }

    /// Reflect on the last 24 hours.
    ///
    /// # Errors
    ///
    /// Only store errors propagate; oracle failures yield `Ok(None)`.
    pub fn daily_reflection(&self, bank: &mut MemoryBank, now: Timestamp) -> Result<Option<ReflectionRecord>> {
        let window = Window::of(memories_for_reflection(&bank.memories, 24, now));
        if window.ids.is_empty() {
            debug!(agent = %self.agent_name, "No memories to reflect on today");
            return Ok(None);
        }

        let context = now.format("%Y-%m-%d").to_string();
        let Some(text) = self.ask(SynthesisKind::Reflection, window.texts, context) else {
            return Ok(None);
        };
        self.commit(
            bank,
            text,
            window.ids,
            ReflectionType::Daily,
            DAILY_IMPORTANCE,
            Some(&DAILY_MIRROR),
            now,
        )
    }

    /// Reflect on the last 7 days, including the week's daily reflections.
    ///
    /// # Errors
    ///
    /// Only store errors propagate; oracle failures yield `Ok(None)`.
    pub fn weekly_reflection(&self, bank: &mut MemoryBank, now: Timestamp) -> Result<Option<ReflectionRecord>> {
        let window = Window::of(memories_for_reflection(&bank.memories, 7 * 24, now));
        let dailies: Vec<String> = bank
            .reflections
            .get_recent_at(7, now)
            .into_iter()
            .filter(|r| r.reflection_type == ReflectionType::Daily)
            .map(|r| format!("Daily reflection: {}", r.reflection_text))
            .collect();

        if window.ids.is_empty() && dailies.is_empty() {
            return Ok(None);
        }

        let mut lines = window.texts;
        lines.extend(dailies);
        let days_since_monday = i64::from(now.weekday().num_days_from_monday());
        let week_start = now.date_naive() - Duration::days(days_since_monday);
        let context = format!("Week of {}", week_start.format("%Y-%m-%d"));

        let Some(text) = self.ask(SynthesisKind::Reflection, lines, context) else {
            return Ok(None);
        };
        self.commit(
            bank,
            text,
            window.ids,
            ReflectionType::Weekly,
            WEEKLY_IMPORTANCE,
            Some(&WEEKLY_MIRROR),
            now,
        )
    }

    /// Deep reflection over the last 30 days: memories of importance 6 or
    /// more plus every reflection of the period, capped at 20 lines.
    ///
    /// # Errors
    ///
    /// Only store errors propagate; oracle failures yield `Ok(None)`.
    pub fn monthly_reflection(&self, bank: &mut MemoryBank, now: Timestamp) -> Result<Option<ReflectionRecord>> {
        let window = Window::of(
            memories_for_reflection(&bank.memories, 30 * 24, now)
                .into_iter()
                .filter(|m| m.importance >= MONTHLY_MIN_IMPORTANCE),
        );
        let previous: Vec<String> = bank
            .reflections
            .get_recent_at(30, now)
            .into_iter()
            .map(|r| format!("Previous reflection: {}", r.reflection_text))
            .collect();

        if window.ids.is_empty() && previous.is_empty() {
            return Ok(None);
        }

        let mut lines = window.texts;
        lines.extend(previous);
        lines.truncate(MONTHLY_MAX_LINES);
        let context = format!("Month of {}", now.format("%Y-%m"));

        let Some(text) = self.ask(SynthesisKind::Reflection, lines, context) else {
            return Ok(None);
        };
        self.commit(
            bank,
            text,
            window.ids,
            ReflectionType::Monthly,
            MONTHLY_IMPORTANCE,
            None,
            now,
        )
    }

    /// Synthesize an insight from `related` memories (ids that no longer
    /// resolve are ignored).
    ///
    /// # Errors
    ///
    /// Only store errors propagate; oracle failures yield `Ok(None)`.
    pub fn create_insight(
        &self,
        bank: &mut MemoryBank,
        related: &[MemoryId],
        context: &str,
        now: Timestamp,
    ) -> Result<Option<ReflectionRecord>> {
        self.insight_of_type(bank, related, context, ReflectionType::Insight, now)
    }

    /// Reflect on progress towards the agent's long-term goals, using
    /// `goal_activity` memories from the last 14 days.
    ///
    /// # Errors
    ///
    /// Only store errors propagate; oracle failures yield `Ok(None)`.
    pub fn goal_progress_reflection(&self, bank: &mut MemoryBank, now: Timestamp) -> Result<Option<ReflectionRecord>> {
        let goals = bank.reflections.long_term_goals();
        if goals.is_empty() {
            return Ok(None);
        }
        let context = format!("Progress towards goals: {}", goals.join("; "));

        let related: Vec<MemoryId> = bank
            .memories
            .get_memories_by_source("goal_activity")
            .into_iter()
            .filter(|m| (now - m.timestamp).num_days() <= GOAL_LOOKBACK_DAYS)
            .map(|m| m.id.clone())
            .collect();
        if related.is_empty() {
            return Ok(None);
        }

        self.insight_of_type(bank, &related, &context, ReflectionType::Goal, now)
    }

    /// Look for recurring themes in the last `days` days and create one
    /// insight per group of at least [`PATTERN_MIN_GROUP`] memories.
    ///
    /// Memories are grouped by shared keyword, then by time of day.
    ///
    /// # Errors
    ///
    /// Only store errors propagate; oracle failures skip that group.
    pub fn identify_patterns(
        &self,
        bank: &mut MemoryBank,
        days: u32,
        now: Timestamp,
    ) -> Result<Vec<ReflectionRecord>> {
        let recent = bank.memories.get_recent_memories_at(days.saturating_mul(24), now);
        if recent.len() < PATTERN_MIN_GROUP {
            return Ok(Vec::new());
        }

        let mut by_keyword: Vec<(String, Vec<MemoryId>)> = Vec::new();
        let mut by_period: Vec<(TimePeriod, Vec<MemoryId>)> = Vec::new();
        for memory in &recent {
            for keyword in &memory.keywords {
                push_grouped(&mut by_keyword, keyword.clone(), memory.id.clone());
            }
            let period = TimePeriod::from_hour(memory.timestamp.hour());
            push_grouped(&mut by_period, period, memory.id.clone());
        }

        let topics = by_keyword
            .into_iter()
            .map(|(keyword, ids)| (format!("Pattern related to {keyword}"), ids))
            .chain(
                by_period
                    .into_iter()
                    .map(|(period, ids)| (format!("Pattern in {} activities", period.as_str()), ids)),
            )
            .filter(|(_, ids)| ids.len() >= PATTERN_MIN_GROUP);

        let mut insights = Vec::new();
        for (context, ids) in topics {
            if let Some(insight) = self.create_insight(bank, &ids, &context, now)? {
                insights.push(insight);
            }
        }
        info!(agent = %self.agent_name, insights = insights.len(), "Pattern detection finished");
        Ok(insights)
    }

    fn insight_of_type(
        &self,
        bank: &mut MemoryBank,
        related: &[MemoryId],
        context: &str,
        reflection_type: ReflectionType,
        now: Timestamp,
    ) -> Result<Option<ReflectionRecord>> {
        let window = Window::of(bank.memories.resolve(related));
        if window.ids.is_empty() {
            return Ok(None);
        }
        let Some(text) = self.ask(SynthesisKind::Insight, window.texts, context.to_string()) else {
            return Ok(None);
        };
        self.commit(
            bank,
            text,
            window.ids,
            reflection_type,
            INSIGHT_IMPORTANCE,
            Some(&INSIGHT_MIRROR),
            now,
        )
    }

    fn ask(&self, kind: SynthesisKind, memories: Vec<String>, context: String) -> Option<String> {
        let request = SynthesisRequest {
            kind,
            agent_name: self.agent_name.clone(),
            memories,
            context,
        };
        match self.oracle.synthesize(&request) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                debug!(agent = %self.agent_name, kind = ?kind, "Oracle returned empty text");
                None
            }
            Err(e) => {
                warn!(agent = %self.agent_name, kind = ?kind, error = %e, "Oracle failed; skipping synthesis");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        bank: &mut MemoryBank,
        text: String,
        sources: Vec<MemoryId>,
        reflection_type: ReflectionType,
        importance: f32,
        mirror: Option<&Mirror>,
        now: Timestamp,
    ) -> Result<Option<ReflectionRecord>> {
        let reflection = ReflectionRecord::builder(text)
            .timestamp(now)
            .importance(importance)
            .reflection_type(reflection_type)
            .sources(sources)
            .build();

        if bank.reflections.contains(&reflection.id) {
            debug!(id = %reflection.id, "Identical reflection already stored");
            return Ok(None);
        }
        bank.reflections.add(reflection.clone())?;

        if let Some(mirror) = mirror {
            let memory = MemoryRecord::builder(format!("{}{}", mirror.prefix, reflection.reflection_text))
                .timestamp(now)
                .importance(importance)
                .source(mirror.source)
                .keywords(mirror.keywords.iter().copied())
                .build();
            if !bank.memories.contains(&memory.id) {
                bank.memories.add(memory)?;
            }
        }

        info!(
            agent = %self.agent_name,
            id = %reflection.id,
            reflection_type = %reflection.reflection_type,
            sources = reflection.source_memories.len(),
            "Created reflection"
        );
        Ok(Some(reflection))
    }
}

fn push_grouped<K: PartialEq>(groups: &mut Vec<(K, Vec<MemoryId>)>, key: K, id: MemoryId) {
    match groups.iter_mut().find(|(k, _)| *k == key) {
        Some((_, ids)) => ids.push(id),
        None => groups.push((key, vec![id])),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
