//! InfluxQL statements used to find and drop stale series
//!
//! Query text only comes out of the constructors in this module. Identifiers
//! are checked against an allow-list when an [`Ident`] is built and are always
//! written double-quoted, tag values are single-quoted, and the optional filter
//! clause is trusted operator input.

use crate::error::{AppError, Result};
use crate::models::TimeWindow;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

/// Joins the two values of a two-tag record
pub const SEPARATOR: char = '#';

fn ident_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("identifier pattern is valid")
    })
}

/// A measurement, field or tag name.
///
/// Displays as a double-quoted InfluxQL identifier, so names such as
/// `jvm.memory` or `host-name` are not read as `rp.measurement` or a
/// subtraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: &str) -> Result<Self> {
        if ident_pattern().is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(AppError::ValidationError(format!(
                "'{}' is not an allowed identifier",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped = self.0.replace('\\', "\\\\").replace('"', "\\\"");
        write!(f, "\"{}\"", escaped)
    }
}

/// Shape of a statement, which also decides how its rows are read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    ShowDatabases,
    ShowTagValues,
    SelectOneTag,
    SelectTwoTags,
    DropSeries,
}

/// A complete statement together with the scope it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    kind: QueryKind,
    text: String,
    database: Option<String>,
    retention_policy: Option<String>,
}

impl Query {
    fn new(kind: QueryKind, text: String, database: Option<&str>, rp: Option<&str>) -> Self {
        Self {
            kind,
            text,
            database: database.map(str::to_string),
            retention_policy: rp.filter(|rp| !rp.is_empty()).map(str::to_string),
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn retention_policy(&self) -> Option<&str> {
        self.retention_policy.as_deref()
    }

    /// True for statements that modify the store
    pub fn is_write(&self) -> bool {
        self.kind == QueryKind::DropSeries
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// `SHOW DATABASES`
pub fn list_databases() -> Query {
    Query::new(QueryKind::ShowDatabases, "SHOW DATABASES".to_string(), None, None)
}

/// Every value `tag` has taken in `measurement`, without a time restriction
pub fn list_tag_values(
    database: &str,
    rp: Option<&str>,
    measurement: &Ident,
    tag: &Ident,
    filter: Option<&str>,
) -> Query {
    let mut text = format!("SHOW TAG VALUES FROM {} WITH KEY = {}", measurement, tag);
    if let Some(filter) = non_empty(filter) {
        text.push_str(&format!(" WHERE {}", filter));
    }
    Query::new(QueryKind::ShowTagValues, text, Some(database), rp)
}

/// Values of `tag` with data for `field` inside `window`.
///
/// An instant window has no time restriction and is answered by
/// [`list_tag_values`] instead.
pub fn windowed_one_tag(
    database: &str,
    rp: Option<&str>,
    measurement: &Ident,
    field: &Ident,
    tag: &Ident,
    filter: Option<&str>,
    window: &TimeWindow,
) -> Query {
    if window.is_instant() {
        return list_tag_values(database, rp, measurement, tag, filter);
    }

    let text = format!(
        "SELECT {tag} FROM (SELECT first({field}), {tag}::tag AS {tag} FROM {measurement}{where_clause} GROUP BY {tag})",
        where_clause = where_clause(window, filter),
    );
    Query::new(QueryKind::SelectOneTag, text, Some(database), rp)
}

/// Correlated `(first, second)` tag pairs with data for `field` inside `window`
#[allow(clippy::too_many_arguments)]
pub fn windowed_two_tags(
    database: &str,
    rp: Option<&str>,
    measurement: &Ident,
    field: &Ident,
    first: &Ident,
    second: &Ident,
    filter: Option<&str>,
    window: &TimeWindow,
) -> Query {
    let text = format!(
        "SELECT {first}, {second} FROM (SELECT first({field}), {first}::tag AS {first}, {second}::tag AS {second} FROM {measurement}{where_clause} GROUP BY {first}, {second})",
        where_clause = where_clause(window, filter),
    );
    Query::new(QueryKind::SelectTwoTags, text, Some(database), rp)
}

/// Drop every series where `tag` equals one of `values`.
///
/// Without a measurement the drop covers the whole database.
pub fn drop_by_tag_values(
    database: &str,
    measurement: Option<&Ident>,
    tag: &Ident,
    values: &[String],
) -> Result<Query> {
    if values.is_empty() {
        return Err(AppError::InternalError(
            "Drop statement needs at least one tag value".into(),
        ));
    }

    let conditions: Vec<String> = values
        .iter()
        .map(|value| format!("{}={}", tag, quote(value)))
        .collect();
    Ok(drop_series(database, measurement, &conditions))
}

/// Drop every series matching `first = firsts[i] AND second = seconds[i]` for some `i`
pub fn drop_by_tag_pair_values(
    database: &str,
    measurement: Option<&Ident>,
    first: &Ident,
    firsts: &[String],
    second: &Ident,
    seconds: &[String],
) -> Result<Query> {
    if firsts.len() != seconds.len() {
        return Err(AppError::InternalError(format!(
            "Received different size lists for the two tag values ({} and {})",
            firsts.len(),
            seconds.len()
        )));
    }
    if firsts.is_empty() {
        return Err(AppError::InternalError(
            "Drop statement needs at least one tag pair".into(),
        ));
    }

    let conditions: Vec<String> = firsts
        .iter()
        .zip(seconds)
        .map(|(a, b)| format!("({}={} AND {}={})", first, quote(a), second, quote(b)))
        .collect();
    Ok(drop_series(database, measurement, &conditions))
}

fn drop_series(database: &str, measurement: Option<&Ident>, conditions: &[String]) -> Query {
    let from = match measurement {
        Some(measurement) => format!(" FROM {}", measurement),
        None => String::new(),
    };
    let text = format!("DROP SERIES{} WHERE {}", from, conditions.join(" OR "));
    Query::new(QueryKind::DropSeries, text, Some(database), None)
}

/// Time predicate plus filter, or nothing at all
fn where_clause(window: &TimeWindow, filter: Option<&str>) -> String {
    let mut conditions = Vec::with_capacity(2);
    if !window.is_instant() {
        conditions.push(format!(
            "(time > now() - {} AND time < now() - {})",
            duration_literal(window.start()),
            duration_literal(window.end())
        ));
    }
    if let Some(filter) = non_empty(filter) {
        conditions.push(filter.to_string());
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn non_empty(filter: Option<&str>) -> Option<&str> {
    filter.map(str::trim).filter(|f| !f.is_empty())
}

/// Single-quoted InfluxQL string literal
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

const LITERAL_UNITS: &[(&str, u128)] = &[
    ("w", 604_800_000_000_000),
    ("d", 86_400_000_000_000),
    ("h", 3_600_000_000_000),
    ("m", 60_000_000_000),
    ("s", 1_000_000_000),
    ("ms", 1_000_000),
    ("u", 1_000),
    ("ns", 1),
];

/// Render a duration as an InfluxQL literal in the largest exact unit
pub fn duration_literal(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    LITERAL_UNITS
        .iter()
        .find(|(_, size)| nanos % size == 0)
        .map(|(unit, size)| format!("{}{}", nanos / size, unit))
        .unwrap_or_else(|| format!("{}ns", nanos))
}
