//! Job runner - walks every connection and job in a configuration

use crate::config::Config;
use crate::db::Connector;
use crate::models::RunReport;
use crate::tasks::stale_series::run_stale_series_job;
use tracing::{error, info, info_span, Instrument};

/// Run every configured job, in declaration order.
///
/// A connection that cannot be opened is skipped; a failing job does not
/// stop the next one. Each opened connection is closed once its jobs are
/// done, whatever their outcome. The report keeps every job result, and its
/// `last_error` is the most recent failure of the run.
pub async fn run_jobs(config: &Config, connector: &dyn Connector, dry_run: bool) -> RunReport {
    let mut report = RunReport::new();
    let span = info_span!("run", run_id = %report.run_id, config = %config.name);

    run_connections(config, connector, dry_run, &mut report)
        .instrument(span)
        .await;

    report.finish();
    report
}

async fn run_connections(
    config: &Config,
    connector: &dyn Connector,
    dry_run: bool,
    report: &mut RunReport,
) {
    let mode = if dry_run {
        "with dry run enabled"
    } else {
        "with dry run DISABLED"
    };

    for target in &config.connections {
        info!("Connecting to influxdb1 at {} {}", target.url, mode);

        let db = match connector.connect(target, dry_run).await {
            Ok(db) => db,
            Err(e) => {
                error!(url = %target.url, error = %e, "Could not connect to influxdb1");
                report.record_connection_error(e);
                continue;
            }
        };

        for job in &target.jobs {
            info!("Stale series job {}...", job.name);

            let span = info_span!("job", job = %job.name);
            let result = run_stale_series_job(&db, job).instrument(span).await;
            if let Some(e) = &result.last_error {
                error!(job = %job.name, error = %e, "Error running stale series job");
            }
            report.record_job(result);
        }

        db.close().await;
    }

    if report.is_success() {
        info!(dropped = report.total_dropped(), "Jobs completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::testing::{ScriptedConnector, ScriptedExecutor};
    use std::sync::Arc;

    const TWO_SERVERS: &str = r#"
name = "test"

[[influxdb1]]
url = "http://down:8086"

  [[influxdb1.oldseries]]
  name = "never runs"
  databases = ["db"]
  measurement = "cpu"
  field = "usage"
  tags = ["host"]

[[influxdb1]]
url = "http://up:8086"

  [[influxdb1.oldseries]]
  name = "first"
  databases = ["db"]
  measurement = "cpu"
  field = "usage"
  tags = ["host"]
  history_window = ["24h", "1h"]
  current_window = ["1h", "0s"]

  [[influxdb1.oldseries]]
  name = "second"
  databases = ["db"]
  measurement = "mem"
  field = "used"
  tags = ["host"]
  history_window = ["24h", "1h"]
  current_window = ["1h", "0s"]
"#;

    fn config(text: &str) -> Config {
        Config::from_toml_str_with_env(text, |_| None).unwrap()
    }

    #[tokio::test]
    async fn test_connection_failure_does_not_stop_next_server() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor
            .push_rows(&["a", "b"])
            .push_rows(&["b"])
            .push_rows(&["x"])
            .push_rows(&["x"]);
        let connector = ScriptedConnector::new();
        connector.serve("http://up:8086/", executor.clone());

        let report = run_jobs(&config(TWO_SERVERS), &connector, false).await;

        assert_eq!(
            connector.attempts(),
            vec!["http://down:8086/".to_string(), "http://up:8086/".to_string()]
        );
        assert_eq!(report.failed_connections, 1);
        assert!(matches!(report.last_error, Some(AppError::ConnectionError(_))));
        assert_eq!(report.jobs.len(), 2);
        assert_eq!(report.jobs[0].job, "first");
        assert_eq!(report.jobs[0].dropped, 1);
        assert_eq!(report.jobs[1].job, "second");
        assert!(report.jobs[1].is_success());
        assert_eq!(executor.closes(), 1);
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failing_job_keeps_going_and_still_closes() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor
            .push_error(AppError::QueryError("boom".into()))
            .push_rows(&["a"])
            .push_rows(&[]);
        let connector = ScriptedConnector::new();
        connector
            .serve("http://down:8086/", Arc::new(ScriptedExecutor::new()))
            .serve("http://up:8086/", executor.clone());

        let report = run_jobs(&config(TWO_SERVERS), &connector, false).await;

        assert_eq!(report.jobs.len(), 3);
        assert!(!report.jobs[1].is_success());
        assert_eq!(report.jobs[2].dropped, 1);
        assert_eq!(report.last_error, Some(AppError::QueryError("boom".into())));
        assert_eq!(executor.closes(), 1);
    }

    #[tokio::test]
    async fn test_clean_run_succeeds() {
        let connector = ScriptedConnector::new();
        connector
            .serve("http://down:8086/", Arc::new(ScriptedExecutor::new()))
            .serve("http://up:8086/", Arc::new(ScriptedExecutor::new()));

        let report = run_jobs(&config(TWO_SERVERS), &connector, true).await;

        assert!(report.is_success());
        assert_eq!(report.jobs.len(), 3);
        assert_eq!(report.total_dropped(), 0);
    }
}
