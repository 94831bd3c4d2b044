use std::path::Path;

use chrono::{NaiveDate, Utc};
use roost_core::models::{RunStatus, SyncType};
use roost_core::sync::{record_health_quietly, SyncEngine, SyncOptions, SyncReport};

use crate::commands::common::{connect, format_run_report, open_database, print_json};
use crate::error::CliError;

pub const SYNC_JOB: &str = "sync";

pub fn sync_options(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    full: bool,
    force: bool,
) -> SyncOptions {
    SyncOptions {
        sync_type: if full { SyncType::Full } else { SyncType::Incremental },
        start,
        end,
        force_update: force,
    }
}

fn health_result(report: &SyncReport) -> serde_json::Value {
    serde_json::json!({
        "action": report.log.status.as_str(),
        "runId": report.log.id,
        "found": report.log.found,
        "created": report.log.created,
        "updated": report.log.updated,
        "failed": report.log.failed,
        "archived": report.log.archived,
    })
}

pub async fn run_sync(options: &SyncOptions, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let (config, transport) = connect()?;
    let engine = SyncEngine::new(db.connection(), &transport, &config);

    let result = engine.run(options).await;
    let health = match &result {
        Ok(report) if report.log.status == RunStatus::Failed => Err(report
            .log
            .errors
            .first()
            .map_or_else(|| "Sync failed".to_string(), |error| error.message.clone())),
        Ok(report) => Ok(health_result(report)),
        Err(error) => Err(error.to_string()),
    };
    record_health_quietly(db.connection(), SYNC_JOB, Utc::now(), health);

    let report = result?;
    if as_json {
        print_json(&report)?;
    } else {
        for line in format_run_report(&report.log) {
            println!("{line}");
        }
        if let Some(reconcile) = report.reconcile {
            println!(
                "reconciled: {} archived, {} warnings, {} errors",
                reconcile.archived, reconcile.warnings, reconcile.errors
            );
        }
        if let Some(deletion) = report.deletion {
            println!(
                "deletions: {} missing, {} confirmed, {} restored, {} stays cancelled",
                deletion.marked_missing,
                deletion.confirmed_deleted,
                deletion.restored,
                deletion.cancelled_stays
            );
        }
        if report.parse_degraded {
            println!("warning: many detail pages parsed without core fields");
        }
    }

    if report.log.status == RunStatus::Failed {
        return Err(CliError::RunFailed(report.log.status.to_string()));
    }
    Ok(())
}
