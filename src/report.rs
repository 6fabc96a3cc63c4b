//! Read-only views over the persisted statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeDelta, Timelike, Utc};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

use crate::aggregate::{self, DailyBucket, DailyStats, GlobalStats, SessionMap, StatsState};
use crate::error::Result;
use crate::mode::DEFAULT_MODE;
use crate::snapshot::SessionSnapshot;
use crate::store::{self, KeyValueStore, keys};

pub const RECENT_SESSION_LIMIT: usize = 20;
const DAILY_SERIES_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TimeRange {
    #[default]
    All,
    #[value(name = "24h")]
    Day,
    #[value(name = "7d")]
    Week,
    #[value(name = "30d")]
    Month,
}

impl TimeRange {
    pub fn window(self) -> Option<TimeDelta> {
        match self {
            Self::All => None,
            Self::Day => Some(TimeDelta::hours(24)),
            Self::Week => Some(TimeDelta::days(7)),
            Self::Month => Some(TimeDelta::days(30)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sessions whose last scan falls inside `range`, boundary included.
pub fn filter_sessions(
    sessions: &SessionMap,
    range: TimeRange,
    now: DateTime<Utc>,
) -> Vec<&SessionSnapshot> {
    let cutoff = range.window().map(|window| now - window);
    sessions
        .values()
        .filter(|session| cutoff.is_none_or(|cutoff| session.timestamp >= cutoff))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub turns: u64,
    pub session_count: usize,
}

impl Overview {
    pub fn fold<'a>(sessions: impl IntoIterator<Item = &'a SessionSnapshot>) -> Self {
        sessions.into_iter().fold(Self::default(), |mut acc, session| {
            acc.total_tokens += session.total_tokens;
            acc.input_tokens += session.input_tokens;
            acc.output_tokens += session.output_tokens;
            acc.turns += session.turns;
            acc.session_count += 1;
            acc
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeShare {
    pub mode: String,
    pub tokens: u64,
    pub session_count: usize,
    /// Share of all tokens in the range, rounded to a whole percent.
    pub percent: u64,
}

/// Per-mode totals, largest first. Sessions are grouped by their current mode.
pub fn mode_breakdown(sessions: &[&SessionSnapshot]) -> Vec<ModeShare> {
    let mut grouped: BTreeMap<&str, (u64, usize)> = BTreeMap::new();
    for session in sessions {
        let mode = if session.mode.is_empty() {
            DEFAULT_MODE
        } else {
            session.mode.as_str()
        };
        let entry = grouped.entry(mode).or_default();
        entry.0 += session.total_tokens;
        entry.1 += 1;
    }

    let total: u64 = grouped.values().map(|(tokens, _)| tokens).sum();
    let mut shares: Vec<ModeShare> = grouped
        .into_iter()
        .map(|(mode, (tokens, session_count))| ModeShare {
            mode: mode.to_string(),
            tokens,
            session_count,
            percent: percent_of(tokens, total),
        })
        .collect();
    shares.sort_by(|a, b| b.tokens.cmp(&a.tokens).then_with(|| a.mode.cmp(&b.mode)));
    shares
}

fn percent_of(part: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as u64
}

/// Most recently scanned sessions first.
pub fn recent_sessions<'a>(
    sessions: &[&'a SessionSnapshot],
    limit: usize,
) -> Vec<&'a SessionSnapshot> {
    let mut recent = sessions.to_vec();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    recent.truncate(limit);
    recent
}

/// Daily buckets, newest day first.
pub fn daily_rows(daily: &DailyStats) -> Vec<(String, DailyBucket)> {
    daily
        .iter()
        .rev()
        .map(|(day, bucket)| (day.clone(), *bucket))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    pub tokens: u64,
}

/// Token usage over time: 24 hourly buckets for the last day, otherwise one
/// bucket per day (7 for the week view, 30 for everything else).
pub fn usage_series(
    sessions: &[&SessionSnapshot],
    range: TimeRange,
    now: DateTime<Local>,
) -> Vec<SeriesPoint> {
    match range {
        TimeRange::Day => {
            let slots = (0..24).rev().map(|back| {
                let at = now - TimeDelta::hours(back);
                ((at.date_naive(), at.hour()), format!("{}:00", at.hour()))
            });
            bucketize(slots, sessions, |at| (at.date_naive(), at.hour()))
        }
        TimeRange::Week | TimeRange::Month | TimeRange::All => {
            let days = if range == TimeRange::Week {
                7
            } else {
                DAILY_SERIES_DAYS
            };
            let today = now.date_naive();
            let slots = (0..days).rev().filter_map(|back| {
                let day = today.checked_sub_signed(TimeDelta::days(back))?;
                Some((day, format!("{}/{}", day.month(), day.day())))
            });
            bucketize(slots, sessions, |at| at.date_naive())
        }
    }
}

fn bucketize<K: PartialEq>(
    slots: impl Iterator<Item = (K, String)>,
    sessions: &[&SessionSnapshot],
    key_of: impl Fn(DateTime<Local>) -> K,
) -> Vec<SeriesPoint> {
    let mut buckets: Vec<(K, SeriesPoint)> = Vec::new();
    for (key, label) in slots {
        // Clocks going back repeat an hour; keep the first slot.
        if buckets.iter().all(|(existing, _)| *existing != key) {
            buckets.push((key, SeriesPoint { label, tokens: 0 }));
        }
    }
    for session in sessions {
        let key = key_of(session.timestamp.with_timezone(&Local));
        if let Some((_, point)) = buckets.iter_mut().find(|(existing, _)| *existing == key) {
            point.tokens += session.total_tokens;
        }
    }
    buckets.into_iter().map(|(_, point)| point).collect()
}

/// Everything the report screen shows for one range.
#[derive(Debug, Clone)]
pub struct ReportView {
    pub range: TimeRange,
    pub generated_at: DateTime<Local>,
    pub overview: Overview,
    pub modes: Vec<ModeShare>,
    pub recent: Vec<SessionSnapshot>,
    pub daily: Vec<(String, DailyBucket)>,
    pub series: Vec<SeriesPoint>,
}

impl ReportView {
    pub fn build(state: &StatsState, range: TimeRange, now: DateTime<Utc>) -> Self {
        let sessions = filter_sessions(&state.sessions, range, now);
        let local_now = now.with_timezone(&Local);
        Self {
            range,
            generated_at: local_now,
            overview: Overview::fold(sessions.iter().copied()),
            modes: mode_breakdown(&sessions),
            recent: recent_sessions(&sessions, RECENT_SESSION_LIMIT)
                .into_iter()
                .cloned()
                .collect(),
            daily: daily_rows(&state.aggregates.daily),
            series: usage_series(&sessions, range, local_now),
        }
    }
}

/// Compares the session fold with the stored global totals. They only diverge
/// when the store was edited by hand or a write was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyCheck {
    pub folded: Overview,
    pub global: GlobalStats,
}

impl ConsistencyCheck {
    pub fn is_consistent(&self) -> bool {
        agrees(self.folded.total_tokens, self.global.total_tokens)
            && agrees(self.folded.input_tokens, self.global.input_tokens)
            && agrees(self.folded.output_tokens, self.global.output_tokens)
            && agrees(self.folded.turns, self.global.total_turns)
    }
}

fn agrees(folded: u64, stored: i64) -> bool {
    i64::try_from(folded).is_ok_and(|folded| folded == stored)
}

pub fn verify_consistency(state: &StatsState) -> ConsistencyCheck {
    ConsistencyCheck {
        folded: Overview::fold(state.sessions.values()),
        global: state.aggregates.global,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSummary {
    pub version: Option<u64>,
    pub today_tokens: i64,
    pub session_count: usize,
    pub bytes_in_use: u64,
}

pub fn summarize(store: &dyn KeyValueStore) -> Result<StoreSummary> {
    let data = store.get(Some(&[keys::VERSION, keys::TODAY_TOKENS, keys::SESSIONS]))?;
    let sessions: SessionMap = store::read_key(&data, keys::SESSIONS)?;
    Ok(StoreSummary {
        version: store::read_key(&data, keys::VERSION)?,
        today_tokens: store::read_key(&data, keys::TODAY_TOKENS)?,
        session_count: sessions.len(),
        bytes_in_use: store.bytes_in_use(None)?,
    })
}

pub fn export_filename(day: NaiveDate) -> String {
    format!("chatgpt-token-stats-{}.json", aggregate::day_key(day))
}

/// The whole store as pretty-printed JSON.
pub fn export_json(store: &dyn KeyValueStore) -> Result<String> {
    let data = store.get(None)?;
    Ok(serde_json::to_string_pretty(&Value::Object(data))?)
}

pub fn write_export(store: &dyn KeyValueStore, dir: &Path, day: NaiveDate) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(export_filename(day));
    fs::write(&path, export_json(store)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn session(id: &str, ago: TimeDelta, total: u64, mode: &str) -> SessionSnapshot {
        SessionSnapshot::new(id, now() - ago, total / 2, total - total / 2, 1, 2, mode)
    }

    fn sessions(items: Vec<SessionSnapshot>) -> SessionMap {
        items.into_iter().map(|s| (s.id.clone(), s)).collect()
    }

    #[test]
    fn range_filter_includes_the_boundary() {
        let map = sessions(vec![
            session("edge", TimeDelta::hours(24), 10, "Default"),
            session("old", TimeDelta::hours(24) + TimeDelta::seconds(1), 10, "Default"),
            session("new", TimeDelta::minutes(5), 10, "Default"),
        ]);

        let mut day: Vec<_> = filter_sessions(&map, TimeRange::Day, now())
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        day.sort_unstable();
        assert_eq!(day, vec!["edge", "new"]);
        assert_eq!(filter_sessions(&map, TimeRange::All, now()).len(), 3);
    }

    #[test]
    fn overview_folds_filtered_sessions() {
        let map = sessions(vec![
            session("a", TimeDelta::hours(1), 100, "Default"),
            session("b", TimeDelta::days(3), 50, "gpt-4o"),
            session("c", TimeDelta::days(20), 7, "gpt-4o"),
        ]);
        let week = filter_sessions(&map, TimeRange::Week, now());
        let overview = Overview::fold(week.iter().copied());

        assert_eq!(overview.total_tokens, 150);
        assert_eq!(overview.input_tokens, 75);
        assert_eq!(overview.output_tokens, 75);
        assert_eq!(overview.turns, 2);
        assert_eq!(overview.session_count, 2);
    }

    #[test]
    fn mode_breakdown_rounds_and_sorts() {
        let map = sessions(vec![
            session("a", TimeDelta::hours(1), 200, "gpt-4o"),
            session("b", TimeDelta::hours(2), 100, "o1-preview"),
            session("c", TimeDelta::hours(3), 0, ""),
        ]);
        let all: Vec<_> = map.values().collect();
        let shares = mode_breakdown(&all);

        assert_eq!(shares.len(), 3);
        assert_eq!(shares[0].mode, "gpt-4o");
        assert_eq!(shares[0].percent, 67);
        assert_eq!(shares[1].mode, "o1-preview");
        assert_eq!(shares[1].percent, 33);
        assert_eq!(shares[2].mode, "Default");
        assert_eq!(shares[2].session_count, 1);
        assert_eq!(shares[2].percent, 0);
    }

    #[test]
    fn mode_breakdown_of_zero_tokens_has_zero_percent() {
        let map = sessions(vec![session("a", TimeDelta::hours(1), 0, "gpt-4o")]);
        let all: Vec<_> = map.values().collect();
        assert_eq!(mode_breakdown(&all)[0].percent, 0);
        assert!(mode_breakdown(&[]).is_empty());
    }

    #[test]
    fn recent_sessions_are_newest_first_and_capped() {
        let map = sessions(
            (0..25)
                .map(|i| session(&format!("s{i:02}"), TimeDelta::minutes(i), 1, "Default"))
                .collect(),
        );
        let all: Vec<_> = map.values().collect();
        let recent = recent_sessions(&all, RECENT_SESSION_LIMIT);

        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].id, "s00");
        assert_eq!(recent[19].id, "s19");
    }

    #[test]
    fn daily_rows_are_newest_first() {
        let mut daily = DailyStats::new();
        daily.insert("2025-03-01".to_string(), DailyBucket::default());
        daily.insert("2025-03-09".to_string(), DailyBucket::default());
        daily.insert("2025-02-28".to_string(), DailyBucket::default());

        let days: Vec<_> = daily_rows(&daily).into_iter().map(|(day, _)| day).collect();
        assert_eq!(days, vec!["2025-03-09", "2025-03-01", "2025-02-28"]);
    }

    #[test]
    fn hourly_series_has_24_buckets_ending_now() {
        let local_now = now().with_timezone(&Local);
        let map = sessions(vec![
            session("a", TimeDelta::minutes(10), 40, "Default"),
            session("b", TimeDelta::hours(30), 99, "Default"),
        ]);
        let all: Vec<_> = map.values().collect();
        let series = usage_series(&all, TimeRange::Day, local_now);

        assert!(series.len() == 24 || series.len() == 23);
        let last = series.last().expect("last bucket");
        assert_eq!(last.label, format!("{}:00", local_now.hour()));
        assert_eq!(series.iter().map(|p| p.tokens).sum::<u64>(), 40);
    }

    #[test]
    fn daily_series_bucket_counts() {
        let local_now = now().with_timezone(&Local);
        let map = sessions(vec![
            session("a", TimeDelta::days(2), 10, "Default"),
            session("b", TimeDelta::days(45), 5, "Default"),
        ]);
        let all: Vec<_> = map.values().collect();

        let week = usage_series(&all, TimeRange::Week, local_now);
        assert_eq!(week.len(), 7);
        let today = local_now.date_naive();
        assert_eq!(week[6].label, format!("{}/{}", today.month(), today.day()));
        assert_eq!(week.iter().map(|p| p.tokens).sum::<u64>(), 10);

        let everything = usage_series(&all, TimeRange::All, local_now);
        assert_eq!(everything.len(), 30);
        assert_eq!(everything.iter().map(|p| p.tokens).sum::<u64>(), 10);
        assert_eq!(usage_series(&all, TimeRange::Month, local_now).len(), 30);
    }

    #[test]
    fn consistency_check_detects_drift() {
        let mut state = StatsState::default();
        state.merge(session("a", TimeDelta::hours(1), 30, "Default"), now().date_naive());
        state.merge(session("b", TimeDelta::hours(2), 12, "gpt-4o"), now().date_naive());
        assert!(verify_consistency(&state).is_consistent());

        state.aggregates.global.total_tokens += 1;
        let check = verify_consistency(&state);
        assert!(!check.is_consistent());
        assert_eq!(check.folded.total_tokens, 42);
        assert_eq!(check.global.total_tokens, 43);
    }

    #[test]
    fn report_view_uses_the_selected_range() {
        let mut state = StatsState::default();
        state.merge(session("a", TimeDelta::hours(1), 30, "Default"), now().date_naive());
        state.merge(session("b", TimeDelta::days(10), 12, "gpt-4o"), now().date_naive());

        let view = ReportView::build(&state, TimeRange::Week, now());
        assert_eq!(view.overview.total_tokens, 30);
        assert_eq!(view.modes.len(), 1);
        assert_eq!(view.recent.len(), 1);
        assert_eq!(view.daily.len(), 1);
        assert_eq!(view.series.len(), 7);
    }

    #[test]
    fn summary_reads_mirror_and_counts() {
        let mut store = MemoryStore::new();
        store::init(&mut store).expect("init");
        aggregate::merge_snapshot(
            &mut store,
            session("a", TimeDelta::hours(1), 30, "Default"),
            now().date_naive(),
        )
        .expect("merge");

        let summary = summarize(&store).expect("summary");
        assert_eq!(summary.version, Some(store::STORE_SCHEMA_VERSION));
        assert_eq!(summary.today_tokens, 30);
        assert_eq!(summary.session_count, 1);
        assert!(summary.bytes_in_use > 0);
    }

    #[test]
    fn export_writes_dated_file_with_all_keys() {
        let tmp = TempDir::new().expect("temp dir");
        let mut store = MemoryStore::new();
        store::init(&mut store).expect("init");
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).expect("date");

        assert_eq!(export_filename(day), "chatgpt-token-stats-2025-03-10.json");
        let path = write_export(&store, tmp.path(), day).expect("export");
        assert_eq!(path, tmp.path().join("chatgpt-token-stats-2025-03-10.json"));

        let raw = fs::read_to_string(&path).expect("read export");
        let parsed: Value = serde_json::from_str(&raw).expect("json");
        for key in [
            keys::VERSION,
            keys::SESSIONS,
            keys::GLOBAL_STATS,
            keys::MODE_STATS,
            keys::DAILY_STATS,
            keys::TODAY_TOKENS,
        ] {
            assert!(parsed.get(key).is_some(), "missing {key}");
        }
    }
}
