use std::path::Path;
use std::sync::atomic::Ordering;

use chrono::Utc;
use roost_core::models::{CheckpointStatus, DateRange, SyncType};
use roost_core::sync::{batch_status, cancel_batch, record_health_quietly, BatchOutcome, BatchRunner, SyncEngine};

use crate::cli::BatchCommands;
use crate::commands::common::{
    connect, format_batch_status_lines, format_run_line, open_database, print_json,
};
use crate::error::CliError;

fn health_result(outcome: &BatchOutcome) -> Result<serde_json::Value, String> {
    let checkpoint = &outcome.checkpoint;
    match checkpoint.status {
        CheckpointStatus::Completed | CheckpointStatus::InProgress => Ok(serde_json::json!({
            "action": checkpoint.status.as_str(),
            "checkpointId": checkpoint.id,
            "batchesCompleted": checkpoint.batches_completed,
            "appointmentsProcessed": checkpoint.appointments_processed,
        })),
        CheckpointStatus::Paused | CheckpointStatus::Failed => Err(checkpoint
            .error_message
            .clone()
            .unwrap_or_else(|| checkpoint.status.to_string())),
    }
}

pub async fn run_batch(
    sync_type: SyncType,
    command: BatchCommands,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path)?;

    match command {
        BatchCommands::Status { json } => {
            let status = batch_status(db.connection(), sync_type)?;
            if json {
                return print_json(&status);
            }
            match status {
                Some(status) => format_batch_status_lines(&status)
                    .iter()
                    .for_each(|line| println!("{line}")),
                None => println!("No {sync_type} checkpoint recorded."),
            }
            Ok(())
        }
        BatchCommands::Cancel => {
            if cancel_batch(db.connection(), sync_type, Utc::now())? {
                println!("Cancelled the active {sync_type} sync.");
            } else {
                println!("No active {sync_type} sync to cancel.");
            }
            Ok(())
        }
        BatchCommands::Start { start, end } => {
            drive(&db, sync_type, Some(DateRange::new(start, end))).await
        }
        BatchCommands::Resume => drive(&db, sync_type, None).await,
    }
}

async fn drive(
    db: &roost_core::db::Database,
    sync_type: SyncType,
    target: Option<DateRange>,
) -> Result<(), CliError> {
    let (config, transport) = connect()?;
    let runner = BatchRunner::new(
        db.connection(),
        SyncEngine::new(db.connection(), &transport, &config),
        sync_type,
    );

    let flag = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current sub-range");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let result = match target {
        Some(target) => runner.start(target).await.map_err(CliError::from),
        None => runner.resume().await.map_err(|error| match error {
            roost_core::Error::NotFound(_) => CliError::NothingToResume(sync_type.to_string()),
            other => other.into(),
        }),
    };
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => {
            record_health_quietly(db.connection(), sync_type.as_str(), Utc::now(), Err(error.to_string()));
            return Err(error);
        }
    };
    record_health_quietly(db.connection(), sync_type.as_str(), Utc::now(), health_result(&outcome));

    for log in &outcome.runs {
        println!("{}", format_run_line(log));
    }
    let status = batch_status(db.connection(), sync_type)?;
    if let Some(status) = status {
        for line in format_batch_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}
