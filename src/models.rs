//! Core domain models for series-reaper

use crate::error::{AppError, Result};
use crate::query::Ident;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Largest number of tag values placed in one single-tag drop statement
pub const DEFAULT_ONE_TAG_BATCH: usize = 60;

/// Largest number of tag pairs placed in one two-tag drop statement
pub const DEFAULT_TWO_TAG_BATCH: usize = 40;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Units accepted by [`parse_duration`], in nanoseconds
const DURATION_UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("μs", 1_000),
    ("ms", 1_000_000),
    ("s", NANOS_PER_SEC),
    ("m", 60 * NANOS_PER_SEC),
    ("h", 60 * 60 * NANOS_PER_SEC),
    ("d", 24 * 60 * 60 * NANOS_PER_SEC),
    ("w", 7 * 24 * 60 * 60 * NANOS_PER_SEC),
];

/// Parse a compound duration such as `24h`, `1h30m`, `1.5h` or `500ms`.
///
/// Days (`d`) and weeks (`w`) are accepted as well. Negative durations are
/// rejected since every offset in a job is measured backward from now.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = |reason: &str| {
        AppError::ValidationError(format!("Invalid duration '{}': {}", input, reason))
    };

    let mut rest = input.trim();
    if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    }
    if rest.starts_with('-') {
        return Err(invalid("negative durations are not allowed"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid("empty value"));
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let int_part = &rest[..int_end];
        rest = &rest[int_end..];

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_end = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            frac_part = &after_dot[..frac_end];
            rest = &after_dot[frac_end..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("expected a number"));
        }

        let (unit, scale) = DURATION_UNITS
            .iter()
            .filter(|(unit, _)| rest.starts_with(unit))
            .max_by_key(|(unit, _)| unit.len())
            .ok_or_else(|| invalid("missing or unknown unit"))?;
        rest = &rest[unit.len()..];

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid("number too large"))?
        };
        let mut nanos = whole.checked_mul(*scale).ok_or_else(|| invalid("overflow"))?;

        if !frac_part.is_empty() {
            let digits = &frac_part[..frac_part.len().min(18)];
            let fraction: u128 = digits.parse().map_err(|_| invalid("bad fraction"))?;
            nanos += fraction * scale / 10u128.pow(digits.len() as u32);
        }

        total = total.checked_add(nanos).ok_or_else(|| invalid("overflow"))?;
    }

    let nanos = u64::try_from(total).map_err(|_| invalid("overflow"))?;
    Ok(Duration::from_nanos(nanos))
}

/// A relative time window, both bounds measured backward from now.
///
/// `start` is the older bound, so it is never smaller than `end`. A window
/// whose bounds are both zero means "no time restriction".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: Duration,
    end: Duration,
}

impl TimeWindow {
    /// The unbounded window evaluated at the present instant
    pub const INSTANT: TimeWindow = TimeWindow {
        start: Duration::ZERO,
        end: Duration::ZERO,
    };

    /// Create a window, rejecting bounds that are not ordered older to newer
    pub fn new(start: Duration, end: Duration) -> Result<Self> {
        if start < end {
            return Err(AppError::ValidationError(format!(
                "Window start offset {:?} is newer than end offset {:?}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a window from its configured bounds.
    ///
    /// No bounds yields [`TimeWindow::INSTANT`]. Otherwise exactly two
    /// durations are required; an empty bound stands for `0s`.
    pub fn parse(bounds: &[String], label: &str) -> Result<Self> {
        match bounds {
            [] => Ok(Self::INSTANT),
            [start, end] => {
                let start = parse_bound(start, label)?;
                let end = parse_bound(end, label)?;
                Self::new(start, end).map_err(|_| {
                    AppError::ValidationError(format!(
                        "{} window relative times are not from older to newer",
                        label
                    ))
                })
            }
            _ => Err(AppError::ValidationError(format!(
                "{} window should include two durations, got {}",
                label,
                bounds.len()
            ))),
        }
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn end(&self) -> Duration {
        self.end
    }

    /// True when the window carries no time restriction
    pub fn is_instant(&self) -> bool {
        self.start.is_zero() && self.end.is_zero()
    }
}

fn parse_bound(bound: &str, label: &str) -> Result<Duration> {
    if bound.trim().is_empty() {
        return Ok(Duration::ZERO);
    }
    parse_duration(bound).map_err(|e| {
        AppError::ValidationError(format!("{} time window could not be parsed: {}", label, e))
    })
}

/// The tag dimensions a job tracks series by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDimensions {
    One { tag: Ident },
    /// Two tags read as correlated pairs from the same grouped row
    Two { first: Ident, second: Ident },
}

impl TagDimensions {
    /// Build from configured tag names; only one or two tags are allowed
    pub fn from_tags(tags: &[String]) -> Result<Self> {
        match tags {
            [tag] => Ok(Self::One {
                tag: Ident::new(tag)?,
            }),
            [first, second] => Ok(Self::Two {
                first: Ident::new(first)?,
                second: Ident::new(second)?,
            }),
            _ => Err(AppError::ValidationError(format!(
                "Only one or two tags clean jobs are possible, got {}",
                tags.len()
            ))),
        }
    }

    pub fn default_batch_size(&self) -> usize {
        match self {
            Self::One { .. } => DEFAULT_ONE_TAG_BATCH,
            Self::Two { .. } => DEFAULT_TWO_TAG_BATCH,
        }
    }
}

impl fmt::Display for TagDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One { tag } => write!(f, "{}", tag),
            Self::Two { first, second } => write!(f, "{} and {}", first, second),
        }
    }
}

/// A validated stale series job
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    /// Target databases; empty means every database on the server
    pub databases: Vec<String>,
    pub retention_policy: Option<String>,
    pub measurement: Ident,
    /// Field sampled with `first()` to detect activity
    pub field: Ident,
    pub dimensions: TagDimensions,
    /// Extra condition ANDed into the read queries
    pub filter: Option<String>,
    /// Drop matching series from every measurement, not just `measurement`
    pub drop_from_all: bool,
    /// Pause between two databases
    pub pause: Duration,
    pub history_window: TimeWindow,
    pub current_window: TimeWindow,
    /// Upper bound on keys per drop statement
    pub batch_size: usize,
}

/// Outcome of one job across all of its databases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResult {
    pub job: String,
    /// Databases that were processed, including failed ones
    pub databases: usize,
    /// Stale keys found
    pub stale_found: usize,
    /// Stale keys in drop statements that succeeded (or were skipped in dry run)
    pub dropped: usize,
    /// Most recent failure, if any
    pub last_error: Option<AppError>,
}

impl JobResult {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, err: AppError) {
        self.last_error = Some(err);
    }

    pub fn is_success(&self) -> bool {
        self.last_error.is_none()
    }
}

/// Summary of a full run over every configured connection
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub jobs: Vec<JobResult>,
    pub failed_connections: usize,
    /// Last error seen anywhere in the run
    pub last_error: Option<AppError>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            jobs: Vec::new(),
            failed_connections: 0,
            last_error: None,
        }
    }

    pub fn record_job(&mut self, result: JobResult) {
        if let Some(err) = &result.last_error {
            self.last_error = Some(err.clone());
        }
        self.jobs.push(result);
    }

    pub fn record_connection_error(&mut self, err: AppError) {
        self.failed_connections += 1;
        self.last_error = Some(err);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.last_error.is_none()
    }

    pub fn total_dropped(&self) -> usize {
        self.jobs.iter().map(|j| j.dropped).sum()
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
