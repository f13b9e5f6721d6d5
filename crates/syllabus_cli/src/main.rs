//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `syllabus_core` linkage and the configured store in one run.
//! - Count unreadable documents instead of aborting the report.
//! - Keep output deterministic `key=value` lines for quick local checks.

use log::{info, warn};
use std::process::ExitCode;
use syllabus_core::db::open_db;
use syllabus_core::logging::{log_field, sanitize_message};
use syllabus_core::{AggregateListQuery, AggregateRepository, CoreConfig, SqliteAggregateRepository};

fn main() -> ExitCode {
    println!("syllabus_core ping={}", syllabus_core::ping());
    println!("syllabus_core version={}", syllabus_core::core_version());

    match report_store() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("syllabus_cli error={err}");
            ExitCode::FAILURE
        }
    }
}

fn report_store() -> Result<(), Box<dyn std::error::Error>> {
    let config = CoreConfig::from_env()?;
    let logging = config.init_logging()?;
    println!("syllabus_core logging={}", if logging { "on" } else { "off" });
    println!("syllabus_core db_path={}", config.db_path.display());

    let conn = open_db(&config.db_path)?;
    let repo = SqliteAggregateRepository::try_new(&conn)?;
    let summaries = repo.list(&AggregateListQuery::default())?;

    let mut children = 0;
    let mut unreadable = 0;
    for summary in &summaries {
        match repo.find_by_id(&summary.id) {
            Ok(Some(aggregate)) => children += aggregate.child_count(),
            Ok(None) => {}
            Err(err) => {
                unreadable += 1;
                warn!(
                    "event=cli_report module=cli status=error aggregate_id={} error={}",
                    log_field(&summary.id),
                    sanitize_message(&err.to_string(), 240)
                );
            }
        }
    }

    println!("syllabus_core aggregates={}", summaries.len());
    println!("syllabus_core children={children}");
    println!("syllabus_core unreadable={unreadable}");
    info!(
        "event=cli_report module=cli status=ok aggregates={} children={children} unreadable={unreadable}",
        summaries.len()
    );
    Ok(())
}
