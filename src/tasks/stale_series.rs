//! Stale series task - drops series that stopped reporting

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{JobResult, JobSpec, TagDimensions, TimeWindow};
use crate::query::{self, Ident, Query, SEPARATOR};
use crate::sets;
use tracing::{error, info, info_span, Instrument};

/// What happened in one database
#[derive(Debug, Default)]
struct Sweep {
    stale: usize,
    dropped: usize,
    last_error: Option<AppError>,
}

/// Run one stale series job against an open connection.
///
/// Databases are processed one after the other with the job's pause in
/// between. A failing database is recorded and the next one still runs.
pub async fn run_stale_series_job(db: &Database, job: &JobSpec) -> JobResult {
    let mut result = JobResult::new(&job.name);

    let databases = match resolve_databases(db, job).await {
        Ok(databases) => databases,
        Err(e) => {
            error!(job = %job.name, error = %e, "Error listing databases");
            result.record_error(e);
            return result;
        }
    };

    for (i, database) in databases.iter().enumerate() {
        if i > 0 && !job.pause.is_zero() {
            tokio::time::sleep(job.pause).await;
        }
        result.databases += 1;

        let span = info_span!("database", database = %database);
        match sweep_database(db, job, database).instrument(span).await {
            Ok(sweep) => {
                result.stale_found += sweep.stale;
                result.dropped += sweep.dropped;
                if let Some(e) = sweep.last_error {
                    result.record_error(e);
                }
            }
            Err(e) => {
                error!(job = %job.name, database = %database, error = %e, "Error reading series");
                result.record_error(e);
            }
        }
    }

    result
}

/// Configured databases, or every database on the server when none are set
async fn resolve_databases(db: &Database, job: &JobSpec) -> Result<Vec<String>> {
    if job.databases.is_empty() {
        db.show_databases().await
    } else {
        Ok(job.databases.clone())
    }
}

async fn sweep_database(db: &Database, job: &JobSpec, database: &str) -> Result<Sweep> {
    info!("Working on database {}", database);

    let history = db
        .fetch_series(&read_query(job, database, &job.history_window))
        .await?;
    if history.is_empty() {
        info!(
            "No historic series found for stale series job {} in {} db",
            job.name, database
        );
        return Ok(Sweep::default());
    }

    let current = db
        .fetch_series(&read_query(job, database, &job.current_window))
        .await?;

    let stale = sets::difference(&history, &current);
    if stale.is_empty() {
        info!("No series were found to drop from {} db", database);
        return Ok(Sweep::default());
    }

    let measurement = if job.drop_from_all {
        info!(
            count = stale.len(),
            "About to drop series from {} db for {} {}",
            database,
            tag_label(&job.dimensions),
            job.dimensions
        );
        None
    } else {
        info!(
            count = stale.len(),
            "About to drop series from measurement {} in {} db for {} {}",
            job.measurement,
            database,
            tag_label(&job.dimensions),
            job.dimensions
        );
        Some(&job.measurement)
    };

    let mut sweep = Sweep {
        stale: stale.len(),
        ..Sweep::default()
    };

    for batch in sets::chunk(&stale, job.batch_size) {
        let outcome = match drop_query(job, database, measurement, batch) {
            Ok(query) => db.drop_series(&query).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => sweep.dropped += batch.len(),
            Err(e) => {
                error!(batch = batch.len(), error = %e, "Failed to drop series batch");
                sweep.last_error = Some(e);
            }
        }
    }

    if sweep.last_error.is_none() {
        info!(dropped = sweep.dropped, "Finished dropping series from {} db", database);
    }
    Ok(sweep)
}

fn read_query(job: &JobSpec, database: &str, window: &TimeWindow) -> Query {
    let rp = job.retention_policy.as_deref();
    let filter = job.filter.as_deref();

    match &job.dimensions {
        TagDimensions::One { tag } => query::windowed_one_tag(
            database,
            rp,
            &job.measurement,
            &job.field,
            tag,
            filter,
            window,
        ),
        TagDimensions::Two { first, second } => query::windowed_two_tags(
            database,
            rp,
            &job.measurement,
            &job.field,
            first,
            second,
            filter,
            window,
        ),
    }
}

fn drop_query(
    job: &JobSpec,
    database: &str,
    measurement: Option<&Ident>,
    batch: &[String],
) -> Result<Query> {
    match &job.dimensions {
        TagDimensions::One { tag } => query::drop_by_tag_values(database, measurement, tag, batch),
        TagDimensions::Two { first, second } => {
            let (firsts, seconds) = sets::split_pairs(batch, SEPARATOR)?;
            query::drop_by_tag_pair_values(database, measurement, first, &firsts, second, &seconds)
        }
    }
}

fn tag_label(dimensions: &TagDimensions) -> &'static str {
    match dimensions {
        TagDimensions::One { .. } => "tag",
        TagDimensions::Two { .. } => "tags",
    }
}
