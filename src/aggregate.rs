//! Delta-merge aggregation.
//!
//! Each scan yields a full snapshot of one session. Only the difference to the
//! previously stored snapshot is folded into the long-lived totals, so repeated
//! or overlapping scans of the same session never double count.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::snapshot::SessionSnapshot;
use crate::store::{self, KeyValueStore, StoreMap, keys};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalStats {
    pub total_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_turns: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ModeBucket {
    pub total_tokens: i64,
    pub turns: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyBucket {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub turns: i64,
}

pub type ModeStats = BTreeMap<String, ModeBucket>;
pub type DailyStats = BTreeMap<String, DailyBucket>;
pub type SessionMap = BTreeMap<String, SessionSnapshot>;

/// Signed change of one session between two scans.
#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDelta {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub turns: i64,
}

impl SessionDelta {
    /// `next - previous`, never clamped.
    pub fn between(previous: &SessionSnapshot, next: &SessionSnapshot) -> Self {
        Self {
            input_tokens: signed_diff(next.input_tokens, previous.input_tokens),
            output_tokens: signed_diff(next.output_tokens, previous.output_tokens),
            turns: signed_diff(next.turns, previous.turns),
        }
    }

    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

fn signed_diff(next: u64, previous: u64) -> i64 {
    next as i64 - previous as i64
}

/// The incrementally maintained views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub global: GlobalStats,
    pub modes: ModeStats,
    pub daily: DailyStats,
}

impl Aggregates {
    /// Pure reducer: folds one delta into the totals, the bucket of `mode`, and
    /// the bucket of `day`. Missing buckets start at zero.
    pub fn apply(&self, delta: &SessionDelta, mode: &str, day: &str) -> Aggregates {
        let mut next = self.clone();
        let total = delta.total_tokens();

        next.global.input_tokens += delta.input_tokens;
        next.global.output_tokens += delta.output_tokens;
        next.global.total_tokens += total;
        next.global.total_turns += delta.turns;

        let mode_bucket = next.modes.entry(mode.to_string()).or_default();
        mode_bucket.total_tokens += total;
        mode_bucket.turns += delta.turns;

        let day_bucket = next.daily.entry(day.to_string()).or_default();
        day_bucket.input_tokens += delta.input_tokens;
        day_bucket.output_tokens += delta.output_tokens;
        day_bucket.total_tokens += total;
        day_bucket.turns += delta.turns;

        next
    }
}

/// Everything the aggregator reads and writes, decoded from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsState {
    pub sessions: SessionMap,
    pub aggregates: Aggregates,
}

impl StatsState {
    pub const KEYS: [&'static str; 4] = [
        keys::SESSIONS,
        keys::GLOBAL_STATS,
        keys::MODE_STATS,
        keys::DAILY_STATS,
    ];

    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let data = store.get(Some(&Self::KEYS))?;
        Self::from_items(&data)
    }

    pub fn from_items(data: &StoreMap) -> Result<Self> {
        Ok(Self {
            sessions: store::read_key(data, keys::SESSIONS)?,
            aggregates: Aggregates {
                global: store::read_key(data, keys::GLOBAL_STATS)?,
                modes: store::read_key(data, keys::MODE_STATS)?,
                daily: store::read_key(data, keys::DAILY_STATS)?,
            },
        })
    }

    /// All keys written by one merge, including the `todayTokens` mirror.
    pub fn to_items(&self) -> Result<StoreMap> {
        let mut items = StoreMap::new();
        items.insert(
            keys::SESSIONS.to_string(),
            serde_json::to_value(&self.sessions)?,
        );
        items.insert(
            keys::GLOBAL_STATS.to_string(),
            serde_json::to_value(self.aggregates.global)?,
        );
        items.insert(
            keys::MODE_STATS.to_string(),
            serde_json::to_value(&self.aggregates.modes)?,
        );
        items.insert(
            keys::DAILY_STATS.to_string(),
            serde_json::to_value(&self.aggregates.daily)?,
        );
        items.insert(
            keys::TODAY_TOKENS.to_string(),
            Value::from(self.aggregates.global.total_tokens),
        );
        Ok(items)
    }

    /// Applies one snapshot in memory and returns what changed.
    pub fn merge(&mut self, snapshot: SessionSnapshot, day: NaiveDate) -> MergeReport {
        let previous = self
            .sessions
            .get(&snapshot.id)
            .cloned()
            .unwrap_or_else(|| SessionSnapshot::empty(&snapshot.id));
        let delta = SessionDelta::between(&previous, &snapshot);
        let day_key = day_key(day);

        self.aggregates = self.aggregates.apply(&delta, &snapshot.mode, &day_key);
        let report = MergeReport {
            session_id: snapshot.id.clone(),
            mode: snapshot.mode.clone(),
            day: day_key,
            delta,
            global: self.aggregates.global,
            first_seen: !self.sessions.contains_key(&snapshot.id),
        };
        self.sessions.insert(snapshot.id.clone(), snapshot);
        report
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub session_id: String,
    pub mode: String,
    pub day: String,
    pub delta: SessionDelta,
    pub global: GlobalStats,
    pub first_seen: bool,
}

pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Local calendar day of `at`.
pub fn local_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// Reads the current state, merges `snapshot` into it and writes every touched
/// key back in a single `set`. Any failure leaves the store untouched.
pub fn merge_snapshot(
    store: &mut dyn KeyValueStore,
    snapshot: SessionSnapshot,
    day: NaiveDate,
) -> Result<MergeReport> {
    let _lock = store.writer_lock()?;
    let mut state = StatsState::load(store)?;
    let report = state.merge(snapshot, day);
    store.set(state.to_items()?)?;

    if report.delta.is_zero() {
        debug!(session = %report.session_id, "session unchanged");
    } else {
        info!(
            session = %report.session_id,
            mode = %report.mode,
            day = %report.day,
            input_delta = report.delta.input_tokens,
            output_delta = report.delta.output_tokens,
            turns_delta = report.delta.turns,
            total_tokens = report.global.total_tokens,
            "stats updated"
        );
    }
    Ok(report)
}
