use std::path::Path;

use chrono::Utc;
use roost_core::sync::{MicroOutcome, MicroSync, SyncEngine};

use crate::commands::common::{connect, format_micro_outcome, keeps_draining, open_database, print_json};
use crate::error::CliError;

fn report(outcome: &MicroOutcome, as_json: bool) -> Result<(), CliError> {
    if as_json {
        print_json(outcome)
    } else {
        println!("{}", format_micro_outcome(outcome));
        Ok(())
    }
}

pub async fn run_auth(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let (config, transport) = connect()?;
    let micro = MicroSync::new(db.connection(), SyncEngine::new(db.connection(), &transport, &config));

    let outcome = micro.refresh_session(Utc::now()).await?;
    report(&outcome, as_json)
}

pub async fn run_scan(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let (config, transport) = connect()?;
    let micro = MicroSync::new(db.connection(), SyncEngine::new(db.connection(), &transport, &config));

    let now = Utc::now();
    let outcome = micro.scan_schedule(now.date_naive(), now).await?;
    report(&outcome, as_json)
}

pub async fn run_detail(count: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let (config, transport) = connect()?;
    let micro = MicroSync::new(db.connection(), SyncEngine::new(db.connection(), &transport, &config));

    let mut outcomes = Vec::new();
    for _ in 0..count.max(1) {
        let now = Utc::now();
        let outcome = micro.process_next(now.date_naive(), now).await?;
        let more = keeps_draining(outcome.action);
        if !as_json {
            println!("{}", format_micro_outcome(&outcome));
        }
        outcomes.push(outcome);
        if !more {
            break;
        }
    }

    if as_json {
        print_json(&outcomes)?;
    }
    Ok(())
}
