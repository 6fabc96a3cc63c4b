use std::io::{IsTerminal, Write, stdout};
use std::path::Path;

use anyhow::Result;
use crossterm::style::{Color, Stylize};
use crossterm::terminal;

use crate::report::{ConsistencyCheck, ReportView, StoreSummary};
use crate::util::{format_count, format_timestamp, format_tokens, progress_bar, truncate};

const TITLE: &str = "CHATGPT TOKEN MONITOR";
const DEFAULT_WIDTH: usize = 80;
const MIN_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub width: usize,
    pub styled: bool,
}

impl RenderOptions {
    /// Terminal width and colours when stdout is a terminal, plain 80 columns
    /// otherwise.
    pub fn detect() -> Self {
        let out = stdout();
        if !out.is_terminal() {
            return Self::plain(DEFAULT_WIDTH);
        }
        let width = terminal::size()
            .map(|(cols, _)| cols as usize)
            .unwrap_or(DEFAULT_WIDTH);
        Self {
            width: width.max(MIN_WIDTH),
            styled: true,
        }
    }

    pub fn plain(width: usize) -> Self {
        Self {
            width: width.max(MIN_WIDTH),
            styled: false,
        }
    }
}

pub fn render_report(out: &mut impl Write, view: &ReportView, opts: RenderOptions) -> Result<()> {
    let width = opts.width;
    writeln!(out, "{}", center_line(TITLE, width))?;
    writeln!(out, "{}", kv_line("Range", view.range.label()))?;
    writeln!(
        out,
        "{}",
        kv_line("Generated", &view.generated_at.format("%Y-%m-%d %H:%M:%S").to_string())
    )?;
    writeln!(out)?;

    heading(out, "Overview", opts)?;
    let overview = &view.overview;
    for (label, value) in [
        ("Total", overview.total_tokens),
        ("Input", overview.input_tokens),
        ("Output", overview.output_tokens),
        ("Turns", overview.turns),
        ("Sessions", overview.session_count as u64),
    ] {
        writeln!(out, "{}", kv_line(label, &format_count(clamp_i64(value))))?;
    }
    writeln!(out)?;

    heading(out, "Usage", opts)?;
    let peak = view.series.iter().map(|point| point.tokens).max().unwrap_or(0);
    if peak == 0 {
        writeln!(out, "No usage in this range.")?;
    } else {
        let bar_width = bar_width(width);
        for point in &view.series {
            let pct = point.tokens as f64 / peak as f64 * 100.0;
            writeln!(
                out,
                "{:>5} {} {}",
                point.label,
                paint(progress_bar(pct, bar_width), Color::Cyan, opts),
                format_tokens(point.tokens)
            )?;
        }
    }
    writeln!(out)?;

    heading(out, "Modes", opts)?;
    if view.modes.is_empty() {
        writeln!(out, "No sessions in this range.")?;
    }
    for share in &view.modes {
        let bar = paint(
            progress_bar(share.percent as f64, bar_width(width) / 2),
            share_color(share.percent),
            opts,
        );
        writeln!(
            out,
            "{:<18} {} {:>3}%  {:>9} tokens  {} sessions",
            truncate(&share.mode, 18),
            bar,
            share.percent,
            format_tokens(share.tokens),
            share.session_count
        )?;
    }
    writeln!(out)?;

    heading(out, "Recent Sessions", opts)?;
    if view.recent.is_empty() {
        writeln!(out, "No sessions in this range.")?;
    } else {
        writeln!(out, "{:<12} {:<18} {:>6} {:>12}", "Time", "Mode", "Turns", "Tokens")?;
        for session in &view.recent {
            writeln!(
                out,
                "{:<12} {:<18} {:>6} {:>12}",
                format_timestamp(session.timestamp),
                truncate(&session.mode, 18),
                format_count(clamp_i64(session.turns)),
                format_count(clamp_i64(session.total_tokens))
            )?;
        }
    }
    writeln!(out)?;

    heading(out, "Daily", opts)?;
    if view.daily.is_empty() {
        writeln!(out, "No daily records yet.")?;
    } else {
        writeln!(out, "{:<12} {:>12} {:>6}", "Date", "Tokens", "Turns")?;
        for (day, bucket) in &view.daily {
            writeln!(
                out,
                "{:<12} {:>12} {:>6}",
                day,
                format_count(bucket.total_tokens),
                format_count(bucket.turns)
            )?;
        }
    }
    Ok(())
}

pub fn render_status(
    out: &mut impl Write,
    summary: &StoreSummary,
    store_path: &Path,
    check: Option<&ConsistencyCheck>,
    opts: RenderOptions,
) -> Result<()> {
    heading(out, "Status", opts)?;
    writeln!(out, "{}", kv_line("Store", &store_path.display().to_string()))?;
    let version = summary
        .version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unset".to_string());
    writeln!(out, "{}", kv_line("Version", &version))?;
    writeln!(out, "{}", kv_line("Today", &format_count(summary.today_tokens)))?;
    writeln!(out, "{}", kv_line("Sessions", &summary.session_count.to_string()))?;
    writeln!(out, "{}", kv_line("Bytes", &format_count(clamp_i64(summary.bytes_in_use))))?;

    if let Some(check) = check {
        let verdict = if check.is_consistent() {
            paint("consistent".to_string(), Color::Green, opts)
        } else {
            paint(
                format!(
                    "DRIFT (sessions {} vs global {})",
                    format_count(clamp_i64(check.folded.total_tokens)),
                    format_count(check.global.total_tokens)
                ),
                Color::Red,
                opts,
            )
        };
        writeln!(out, "{}", kv_line("Check", &verdict))?;
    }
    Ok(())
}

fn heading(out: &mut impl Write, title: &str, opts: RenderOptions) -> Result<()> {
    let rule = hr(title, opts.width);
    if opts.styled {
        writeln!(out, "{}", rule.bold())?;
    } else {
        writeln!(out, "{rule}")?;
    }
    Ok(())
}

fn paint(text: String, color: Color, opts: RenderOptions) -> String {
    if opts.styled {
        text.with(color).to_string()
    } else {
        text
    }
}

fn kv_line(label: &str, value: &str) -> String {
    format!("{label:<11}: {value}")
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn bar_width(width: usize) -> usize {
    if width >= 120 {
        40
    } else if width >= 92 {
        30
    } else if width >= 72 {
        24
    } else {
        16
    }
}

fn share_color(percent: u64) -> Color {
    if percent >= 60 {
        Color::Green
    } else if percent >= 30 {
        Color::Yellow
    } else {
        Color::DarkGrey
    }
}

fn hr(title: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }

    let core = format!(" {title} ");
    let core_len = core.chars().count();
    if core_len >= width {
        return truncate(title, width);
    }

    let side = (width - core_len) / 2;
    let right = width - core_len - side;
    format!("{}{}{}", "-".repeat(side), core, "-".repeat(right))
}

fn center_line(text: &str, width: usize) -> String {
    let clipped = truncate(text, width);
    let left_pad = width.saturating_sub(clipped.chars().count()) / 2;
    format!("{}{}", " ".repeat(left_pad), clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::StatsState;
    use crate::report::{TimeRange, verify_consistency};
    use crate::snapshot::SessionSnapshot;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn render(view: &ReportView) -> String {
        let mut out = Vec::new();
        render_report(&mut out, view, RenderOptions::plain(80)).expect("render");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn header_rule_respects_requested_width() {
        let line = hr("Test", 24);
        assert_eq!(line.len(), 24);
        assert_eq!(hr("Overview", 4), "O...");
    }

    #[test]
    fn share_color_thresholds() {
        assert_eq!(share_color(80), Color::Green);
        assert_eq!(share_color(45), Color::Yellow);
        assert_eq!(share_color(12), Color::DarkGrey);
    }

    #[test]
    fn empty_store_renders_placeholders() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let view = ReportView::build(&StatsState::default(), TimeRange::All, now);
        let text = render(&view);

        assert!(text.contains("CHATGPT TOKEN MONITOR"));
        assert!(text.contains("Range      : all"));
        assert!(text.contains("No usage in this range."));
        assert!(text.contains("No daily records yet."));
    }

    #[test]
    fn report_lists_modes_and_sessions() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut state = StatsState::default();
        state.merge(
            SessionSnapshot::new("a", now - TimeDelta::hours(1), 1_000, 234, 3, 6, "gpt-4o"),
            now.date_naive(),
        );
        let view = ReportView::build(&state, TimeRange::Day, now);
        let text = render(&view);

        assert!(text.contains("Total      : 1,234"));
        assert!(text.contains("gpt-4o"));
        assert!(text.contains("100%"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn status_reports_drift() {
        let mut state = StatsState::default();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        state.merge(
            SessionSnapshot::new("a", now, 10, 10, 1, 2, "Default"),
            now.date_naive(),
        );
        state.aggregates.global.total_tokens = 25;
        let check = verify_consistency(&state);
        let summary = StoreSummary {
            version: Some(1),
            today_tokens: 25,
            session_count: 1,
            bytes_in_use: 1_024,
        };

        let mut out = Vec::new();
        render_status(
            &mut out,
            &summary,
            Path::new("/tmp/store.json"),
            Some(&check),
            RenderOptions::plain(80),
        )
        .expect("render");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("Bytes      : 1,024"));
        assert!(text.contains("DRIFT (sessions 20 vs global 25)"));
    }
}
