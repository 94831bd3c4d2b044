//! One sync run: authenticate, walk the schedule, map every appointment,
//! then reconcile or detect deletions.

use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::deletion::{DeletionCounts, DeletionDetector};
use super::mapper::{EntityMapper, MapperOptions};
use super::reconcile::{ReconcileCounts, Reconciler};
use crate::auth::{AuthOutcome, Authenticator, Credentials, Session, SessionStore};
use crate::config::SyncConfig;
use crate::db::{
    RunLogRepository, SettingsRepository, SqliteRunLogRepository, SqliteSettingsRepository,
};
use crate::error::{Error, Result};
use crate::fetch::{PageFetcher, Transport};
use crate::models::{
    ChangeType, DateRange, ExternalAppointment, RunError, RunStatus, ScheduleStub, SyncRunLog,
    SyncType,
};
use crate::parse::{check_parse_degradation, fetch_schedule, is_boarding_candidate, parse_appointment_page};
use crate::util::{pause, sanitize_error};

/// Runs still `running` after this long are failed before a new run starts
pub const STUCK_RUN_MINUTES: i64 = 30;

/// Retry `op` on transient errors, waiting `config.retry_delays[n]` before
/// attempt `n + 1`
pub async fn with_retry<R, F, Fut>(config: &SyncConfig, label: &str, mut op: F) -> Result<R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match config.retry_delays.get(attempt) {
                Some(delay) if e.is_transient() => {
                    attempt += 1;
                    tracing::warn!(
                        "{label} failed (attempt {attempt}), retrying in {delay:?}: {}",
                        sanitize_error(&e.to_string())
                    );
                    pause(*delay, config.jitter).await;
                }
                _ => return Err(e),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub sync_type: SyncType,
    /// First day to scan; today when absent
    pub start: Option<NaiveDate>,
    /// Last day to scan, inclusive; one week from `start` when absent
    pub end: Option<NaiveDate>,
    pub force_update: bool,
}

impl SyncOptions {
    pub const fn incremental() -> Self {
        Self {
            sync_type: SyncType::Incremental,
            start: None,
            end: None,
            force_update: false,
        }
    }

    pub const fn for_range(sync_type: SyncType, range: DateRange) -> Self {
        Self {
            sync_type,
            start: Some(range.start),
            end: Some(range.end),
            force_update: false,
        }
    }

    /// Resolved inclusive window for a run on `today`
    pub fn window(&self, today: NaiveDate) -> Result<DateRange> {
        let start = self.start.unwrap_or(today);
        let end = self.end.unwrap_or(start + Duration::days(6));
        if end < start {
            return Err(Error::InvalidInput(format!(
                "sync window ends before it starts: {start} > {end}"
            )));
        }
        Ok(DateRange::new(start, end))
    }

    /// Whether unseen records are handled by missing-streak counting rather
    /// than confirmation fetches
    pub const fn detects_deletions(&self) -> bool {
        matches!(self.sync_type, SyncType::Full | SyncType::Historical)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub log: SyncRunLog,
    pub reconcile: Option<ReconcileCounts>,
    pub deletion: Option<DeletionCounts>,
    pub parse_degraded: bool,
}

#[derive(Debug, Default)]
struct PostRun {
    reconcile: Option<ReconcileCounts>,
    deletion: Option<DeletionCounts>,
    parse_degraded: bool,
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Composes the session store, parsers, mapper and reconcilers into runs
pub struct SyncEngine<'a, T> {
    conn: &'a Connection,
    transport: &'a T,
    config: &'a SyncConfig,
}

impl<'a, T: Transport> SyncEngine<'a, T> {
    pub const fn new(conn: &'a Connection, transport: &'a T, config: &'a SyncConfig) -> Self {
        Self {
            conn,
            transport,
            config,
        }
    }

    pub const fn config(&self) -> &SyncConfig {
        self.config
    }

    pub const fn transport(&self) -> &T {
        self.transport
    }

    /// Log in and cache the new session; a rejected login is an error
    pub async fn login(&self, now: DateTime<Utc>) -> Result<Session> {
        let authenticator = Authenticator::new(self.transport, self.config)?;
        let credentials = Credentials::from_config(self.config);
        let outcome = with_retry(self.config, "Authentication", || {
            authenticator.authenticate(&credentials, now)
        })
        .await?;

        match outcome {
            AuthOutcome::Success(session) => {
                SessionStore::new(self.conn).store(&session)?;
                Ok(session)
            }
            AuthOutcome::Failure(message) => Err(Error::Authentication(message)),
        }
    }

    /// Cached session if still valid, otherwise a fresh login
    pub async fn ensure_session(&self, now: DateTime<Utc>) -> Result<Session> {
        if let Some(session) = SessionStore::new(self.conn).get(now)? {
            tracing::debug!("Reusing cached session");
            return Ok(session);
        }
        self.login(now).await
    }

    /// Fetch and parse one appointment detail page
    pub async fn fetch_appointment(
        &self,
        session: &Session,
        url: &str,
        today: NaiveDate,
    ) -> Result<ExternalAppointment> {
        let fetcher = PageFetcher::new(self.transport, session);
        let html = with_retry(self.config, "Detail fetch", || fetcher.fetch(url)).await?;
        parse_appointment_page(&html, url, today)
    }

    /// Every schedule stub in `window`, deduplicated across weeks.
    ///
    /// Week pages list seven days from the requested date, so stubs whose URL
    /// timestamp falls outside `window` are dropped. Undated stubs are kept.
    pub async fn collect_schedule(&self, session: &Session, window: DateRange) -> Result<Vec<ScheduleStub>> {
        let fetcher = PageFetcher::new(self.transport, session);
        let mut seen = HashSet::new();
        let mut stubs = Vec::new();
        let mut outside = 0usize;

        let mut week = window.start;
        while week <= window.end {
            if week > window.start {
                pause(self.config.request_delay, self.config.jitter).await;
            }
            let url = self.config.week_url(week);
            let page = with_retry(self.config, "Schedule fetch", || {
                fetch_schedule(&fetcher, self.config, &url)
            })
            .await?;
            for stub in page {
                if !stub.scheduled_on().is_none_or(|day| window.contains(day)) {
                    outside += 1;
                    continue;
                }
                if seen.insert(stub.external_id.clone()) {
                    stubs.push(stub);
                }
            }
            week += Duration::days(7);
        }
        if outside > 0 {
            tracing::debug!("Dropped {outside} schedule stub(s) outside {} to {}", window.start, window.end);
        }
        Ok(stubs)
    }

    /// Run one sync and write its log, settings outcome and status.
    ///
    /// Per-appointment failures are recorded and skipped; only a failure
    /// before the appointment loop (login, schedule fetch, store) is returned
    /// as an error, after being written to the log.
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncReport> {
        let started = Utc::now();
        let run_logs = SqliteRunLogRepository::new(self.conn);
        run_logs.abort_stuck(started - Duration::minutes(STUCK_RUN_MINUTES), started)?;

        let mut log = SyncRunLog::start(options.sync_type, started);
        run_logs.insert(&log)?;
        tracing::info!(run_id = %log.id, sync_type = %options.sync_type, "Sync started");

        match self.execute(options, &mut log).await {
            Ok(post) => {
                let status = RunStatus::from_counts(log.found, log.failed);
                log.finish(status, Utc::now());
                run_logs.update(&log)?;

                let message = if status == RunStatus::Failed {
                    format!(
                        "Failed: {}",
                        log.errors
                            .first()
                            .map_or("Unknown error", |error| error.message.as_str())
                    )
                } else {
                    format!("Synced {} appointments", log.created + log.updated)
                };
                SqliteSettingsRepository::new(self.conn).save_sync_outcome(
                    Utc::now(),
                    status,
                    &message,
                )?;

                tracing::info!(
                    status = %status,
                    found = log.found,
                    created = log.created,
                    updated = log.updated,
                    unchanged = log.unchanged,
                    failed = log.failed,
                    skipped = log.skipped,
                    archived = log.archived,
                    duration_ms = log.duration_ms,
                    "Sync completed"
                );
                Ok(SyncReport {
                    log,
                    reconcile: post.reconcile,
                    deletion: post.deletion,
                    parse_degraded: post.parse_degraded,
                })
            }
            Err(e) => {
                let message = sanitize_error(&e.to_string());
                tracing::error!("Sync failed: {message}");
                log.push_error(RunError::new(None, &message));
                log.finish(RunStatus::Failed, Utc::now());
                if let Err(log_error) = run_logs.update(&log) {
                    tracing::warn!("Failed to write run log: {log_error}");
                }
                if let Err(settings_error) = SqliteSettingsRepository::new(self.conn)
                    .save_sync_outcome(Utc::now(), RunStatus::Failed, &message)
                {
                    tracing::warn!("Failed to write sync outcome: {settings_error}");
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, options: &SyncOptions, log: &mut SyncRunLog) -> Result<PostRun> {
        let today = Utc::now().date_naive();
        let window = options.window(today)?;
        let mut session = self.ensure_session(Utc::now()).await?;

        let stubs = self.collect_schedule(&session, window).await?;
        let seen: HashSet<String> = stubs.iter().map(|stub| stub.external_id.clone()).collect();
        let (candidates, skipped): (Vec<_>, Vec<_>) =
            stubs.into_iter().partition(is_boarding_candidate);
        log.skipped = u32::try_from(skipped.len()).unwrap_or(u32::MAX);
        log.found = u32::try_from(candidates.len()).unwrap_or(u32::MAX);
        tracing::info!(
            "Found {} boarding appointment(s), skipped {}",
            candidates.len(),
            skipped.len()
        );

        let mapper = EntityMapper::new(
            self.conn,
            MapperOptions {
                overwrite_manual: self.config.overwrite_manual,
                force_update: options.force_update,
            },
        );
        let mut relogged = false;
        let mut parsed = 0usize;
        let mut missing_pet_names = 0usize;

        for (index, stub) in candidates.iter().enumerate() {
            if index > 0 {
                pause(self.config.request_delay, self.config.jitter).await;
            }

            let fetched = match self.fetch_appointment(&session, &stub.url, today).await {
                Err(Error::SessionExpired) if !relogged => {
                    tracing::warn!("Session expired mid-run, logging in again");
                    relogged = true;
                    SessionStore::new(self.conn).clear()?;
                    session = self.login(Utc::now()).await?;
                    self.fetch_appointment(&session, &stub.url, today).await
                }
                other => other,
            };

            let saved = fetched.and_then(|appointment| {
                parsed += 1;
                if appointment.pet_name.is_none() {
                    missing_pet_names += 1;
                }
                mapper.save_appointment(&appointment, Utc::now())
            });

            match saved {
                Ok(outcome) => {
                    match outcome.action() {
                        ChangeType::Created => log.created += 1,
                        ChangeType::Updated => log.updated += 1,
                        _ => log.unchanged += 1,
                    }
                    let mut change = outcome.change.clone();
                    change.action = outcome.action();
                    log.push_change(change);
                }
                Err(e) => {
                    log.failed += 1;
                    let error = RunError::new(Some(stub.external_id.clone()), &e.to_string());
                    tracing::warn!(
                        external_id = %stub.external_id,
                        "Appointment failed: {}",
                        error.message
                    );
                    log.push_error(error);
                }
            }
        }

        let mut post = PostRun {
            parse_degraded: check_parse_degradation(
                missing_pet_names,
                parsed,
                self.config.parse_degradation_threshold,
            ),
            ..PostRun::default()
        };
        if post.parse_degraded {
            let message = format!(
                "Parse degradation: {missing_pet_names} of {parsed} detail pages had no pet name"
            );
            tracing::warn!("{message}");
            log.push_error(RunError::new(None, &message));
        }

        let start = midnight(window.start);
        let end = midnight(window.end + Duration::days(1));
        if options.detects_deletions() {
            match DeletionDetector::new(self.conn).detect(&seen, start, end, Utc::now()) {
                Ok(counts) => post.deletion = Some(counts),
                Err(e) => tracing::warn!("Deletion detection failed: {e}"),
            }
        } else {
            let reconciler = Reconciler::new(
                self.conn,
                PageFetcher::new(self.transport, &session),
                self.config,
            );
            let counts = reconciler
                .reconcile(&seen, Some(start), Some(end), Utc::now())
                .await;
            log.archived = counts.archived;
            post.reconcile = Some(counts);
        }

        Ok(post)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::{
        Database, SqliteSyncRecordRepository, SyncRecordRepository,
    };
    use crate::fetch::testing::{ok, status, FakeTransport};
    use crate::models::SyncStatus;
    use crate::sync::testing::{appointment_url, config, detail_page, route_login, stored_record, week_page};

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn store_session(db: &Database) {
        SessionStore::new(db.connection())
            .store(&Session::new("sid=cached", Utc::now() + Duration::hours(1)))
            .unwrap();
    }

    fn stay_dates() -> (DateTime<Utc>, DateTime<Utc>) {
        let today = Utc::now().date_naive();
        let check_in = midnight(today + Duration::days(1)) + Duration::hours(17);
        (check_in, check_in + Duration::days(2))
    }

    #[test]
    fn window_defaults_to_one_week_from_today() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let window = SyncOptions::incremental().window(today).unwrap();
        assert_eq!(window.start, today);
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2026, 3, 8).unwrap());

        let inverted = SyncOptions {
            start: Some(today),
            end: Some(today - Duration::days(1)),
            ..SyncOptions::incremental()
        };
        assert!(inverted.window(today).is_err());
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failure() {
        let transport = FakeTransport::new();
        transport
            .route("https://site.test/x", status(503))
            .route("https://site.test/x", ok("fine"));
        let config = config();
        let session = Session::new("sid=1", Utc::now() + Duration::hours(1));
        let fetcher = PageFetcher::new(&transport, &session);

        let body = with_retry(&config, "test", || fetcher.fetch("https://site.test/x"))
            .await
            .unwrap();

        assert_eq!(body, "fine");
        assert_eq!(transport.requests_to("https://site.test/x"), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_on_permanent_failure() {
        let transport = FakeTransport::new();
        transport.route("https://site.test/x", status(404));
        let config = config();
        let session = Session::new("sid=1", Utc::now() + Duration::hours(1));
        let fetcher = PageFetcher::new(&transport, &session);

        let result = with_retry(&config, "test", || fetcher.fetch("https://site.test/x")).await;

        assert!(matches!(result, Err(Error::HttpStatus { status: 404, .. })));
        assert_eq!(transport.requests_to("https://site.test/x"), 1);
    }

    #[tokio::test]
    async fn mixed_run_is_partial_with_exact_counters() {
        let db = setup();
        store_session(&db);
        let config = config();
        let (check_in, check_out) = stay_dates();

        let ids: Vec<String> = (0..10).map(|n| format!("APPT{n}")).collect();
        let entries: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "Boarding")).collect();
        let transport = FakeTransport::new();
        transport.route(
            &config.week_url(Utc::now().date_naive()),
            ok(&week_page(&entries)),
        );

        let records = SqliteSyncRecordRepository::new(db.connection());
        for (n, id) in ids.iter().enumerate().take(8) {
            transport.route(
                &appointment_url(id),
                ok(&detail_page(&format!("Pet{n}"), check_in, check_out)),
            );
            if n >= 3 {
                records.insert(&stored_record(id, check_in, check_out)).unwrap();
            }
        }

        let engine = SyncEngine::new(db.connection(), &transport, &config);
        let report = engine.run(&SyncOptions::incremental()).await.unwrap();

        assert_eq!(report.log.status, RunStatus::Partial);
        assert_eq!(report.log.found, 10);
        assert_eq!(report.log.created, 3);
        assert_eq!(report.log.updated, 5);
        assert_eq!(report.log.failed, 2);
        assert_eq!(report.log.errors.len(), 2);
        assert_eq!(report.log.change_details.len(), 8);
        assert!(!report.parse_degraded);

        let stored = SqliteRunLogRepository::new(db.connection())
            .get(&report.log.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RunStatus::Partial);
        let settings = SqliteSettingsRepository::new(db.connection()).load().unwrap();
        assert_eq!(settings.last_sync_status, Some(RunStatus::Partial));
        assert_eq!(settings.last_sync_message.as_deref(), Some("Synced 8 appointments"));
    }

    #[tokio::test]
    async fn non_boarding_stubs_are_skipped() {
        let db = setup();
        store_session(&db);
        let config = config();
        let (check_in, check_out) = stay_dates();
        let transport = FakeTransport::new();
        transport
            .route(
                &config.week_url(Utc::now().date_naive()),
                ok(&week_page(&[("B1", "Boarding 3/1-4"), ("D1", "D/C full day"), ("E1", "Initial Eval")])),
            )
            .route(&appointment_url("B1"), ok(&detail_page("Luna", check_in, check_out)));

        let engine = SyncEngine::new(db.connection(), &transport, &config);
        let report = engine.run(&SyncOptions::incremental()).await.unwrap();

        assert_eq!(report.log.found, 1);
        assert_eq!(report.log.skipped, 2);
        assert_eq!(report.log.status, RunStatus::Success);
        assert_eq!(transport.requests_to(&appointment_url("D1")), 0);
    }

    #[tokio::test]
    async fn failed_login_is_fatal_and_logged() {
        let db = setup();
        let config = config();
        let transport = FakeTransport::new();
        transport.route(&config.login_url(), status(500));

        let engine = SyncEngine::new(db.connection(), &transport, &config);
        let err = engine.run(&SyncOptions::incremental()).await.unwrap_err();

        assert!(matches!(err, Error::Authentication(_)));
        let logs = SqliteRunLogRepository::new(db.connection()).list_recent(1).unwrap();
        assert_eq!(logs[0].status, RunStatus::Failed);
        assert!(logs[0].errors[0].message.contains("Login page unavailable"));
        let settings = SqliteSettingsRepository::new(db.connection()).load().unwrap();
        assert_eq!(settings.last_sync_status, Some(RunStatus::Failed));
    }

    #[tokio::test]
    async fn expired_session_mid_run_logs_in_again() {
        let db = setup();
        store_session(&db);
        let config = config();
        let (check_in, check_out) = stay_dates();
        let transport = FakeTransport::new();
        transport
            .route(
                &config.week_url(Utc::now().date_naive()),
                ok(&week_page(&[("A1", "Boarding")])),
            )
            .route(&appointment_url("A1"), ok("<p>Please login. Enter your password.</p>"))
            .route(&appointment_url("A1"), ok(&detail_page("Luna", check_in, check_out)));
        route_login(&transport, &config);

        let engine = SyncEngine::new(db.connection(), &transport, &config);
        let report = engine.run(&SyncOptions::incremental()).await.unwrap();

        assert_eq!(report.log.created, 1);
        assert_eq!(report.log.failed, 0);
        let session = SessionStore::new(db.connection()).get(Utc::now()).unwrap().unwrap();
        assert_eq!(session.token(), "sid=fresh");
    }

    #[tokio::test]
    async fn full_sync_counts_misses_instead_of_refetching() {
        let db = setup();
        store_session(&db);
        let config = config();
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let records = SqliteSyncRecordRepository::new(db.connection());
        let check_in = Utc.with_ymd_and_hms(2026, 3, 4, 17, 0, 0).unwrap();
        records
            .insert(&stored_record("GONE", check_in, check_in + Duration::days(2)))
            .unwrap();
        let transport = FakeTransport::new();
        transport.route(&config.week_url(start), ok(&week_page(&[])));

        let engine = SyncEngine::new(db.connection(), &transport, &config);
        let report = engine
            .run(&SyncOptions::for_range(SyncType::Full, DateRange::new(start, end)))
            .await
            .unwrap();

        assert_eq!(report.deletion.map(|counts| counts.marked_missing), Some(1));
        assert_eq!(report.reconcile, None);
        assert_eq!(transport.requests_to(&appointment_url("GONE")), 0);
        let record = records.get_by_external_id("GONE").unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::MissingFromSource);
    }

    #[tokio::test]
    async fn stuck_runs_are_aborted_before_starting() {
        let db = setup();
        store_session(&db);
        let config = config();
        let run_logs = SqliteRunLogRepository::new(db.connection());
        let stuck = SyncRunLog::start(SyncType::Incremental, Utc::now() - Duration::hours(2));
        run_logs.insert(&stuck).unwrap();
        let transport = FakeTransport::new();
        transport.route(&config.week_url(Utc::now().date_naive()), ok(&week_page(&[])));

        SyncEngine::new(db.connection(), &transport, &config)
            .run(&SyncOptions::incremental())
            .await
            .unwrap();

        assert_eq!(run_logs.get(&stuck.id).unwrap().unwrap().status, RunStatus::Failed);
    }
}
