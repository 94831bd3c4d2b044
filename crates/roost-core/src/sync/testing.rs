//! Fixtures shared by the sync tests

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::auth::Session;
use crate::config::SyncConfig;
use crate::fetch::testing::{ok, FakeTransport};
use crate::fetch::HttpResponse;
use crate::models::{ChangeType, ExternalAppointment, SyncRecord, SyncStatus};

pub const SITE: &str = "https://site.test";

pub fn config() -> SyncConfig {
    SyncConfig::new(SITE)
        .with_credentials("owner", "hunter2")
        .without_delays()
}

pub fn session() -> Session {
    Session::new("sid=abc", Utc::now() + Duration::hours(1))
}

/// Script a login form whose submission redirects with `sid=fresh`
pub fn route_login(transport: &FakeTransport, config: &SyncConfig) {
    transport
        .route(
            &config.login_url(),
            ok(r#"<form action="/login/check"><input type="text" name="user"><input type="password" name="pass"></form>"#),
        )
        .route(
            &format!("{SITE}/login/check"),
            HttpResponse {
                status: 302,
                body: String::new(),
                set_cookies: vec!["sid=fresh; Path=/".into()],
                location: Some("/schedule".into()),
            },
        );
}

/// Detail URL without a timestamp segment, kept by every window filter
pub fn appointment_url(external_id: &str) -> String {
    format!("{SITE}/schedule/a/{external_id}")
}

/// Detail URL whose timestamp segment is `day` at 09:00 UTC
pub fn dated_appointment_url(external_id: &str, day: NaiveDate) -> String {
    let at = day.and_hms_opt(9, 0, 0).unwrap().and_utc();
    format!("{SITE}/schedule/a/{external_id}/{}", at.timestamp())
}

/// Detail page carrying scheduled timestamps and one pet
pub fn detail_page(pet: &str, check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> String {
    format!(
        r#"<html><head><title>Boarding (Nights) | Pet Sitting Co</title></head><body>
        <a class="appt-change-status">Scheduled</a>
        <div id="when-wrapper" data-start_scheduled="{}" data-end_scheduled="{}"></div>
        <span class="event-client">John Smith</span>
        <span class="event-pet">{pet}</span>
        </body></html>"#,
        check_in.timestamp(),
        check_out.timestamp()
    )
}

/// Week-view page linking to each `(external id, title)`
pub fn week_page(entries: &[(&str, &str)]) -> String {
    let links: Vec<(String, &str)> = entries
        .iter()
        .map(|(id, title)| (appointment_url(id), *title))
        .collect();
    schedule_markup(&links)
}

/// Week-view page linking to each `(external id, title, day)` with dated URLs
pub fn dated_week_page(entries: &[(&str, &str, NaiveDate)]) -> String {
    let links: Vec<(String, &str)> = entries
        .iter()
        .map(|(id, title, day)| (dated_appointment_url(id, *day), *title))
        .collect();
    schedule_markup(&links)
}

fn schedule_markup(links: &[(String, &str)]) -> String {
    let anchors: String = links
        .iter()
        .map(|(href, title)| {
            format!(r#"<a class="day-event" href="{href}"><span class="day-event-title">{title}</span></a>"#)
        })
        .collect();
    format!("<html><body><div class=\"schedule\">{anchors}</div></body></html>")
}

pub fn stored_record(external_id: &str, check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> SyncRecord {
    let now = Utc::now();
    SyncRecord {
        id: uuid::Uuid::now_v7().to_string(),
        external_id: external_id.into(),
        source_url: appointment_url(external_id),
        data: ExternalAppointment {
            external_id: external_id.into(),
            check_in: Some(check_in),
            check_out: Some(check_out),
            pet_name: Some("Biscuit".into()),
            ..ExternalAppointment::default()
        },
        content_hash: "0".repeat(64),
        last_change_type: ChangeType::Created,
        changed_fields: None,
        previous_data: None,
        pet_id: None,
        stay_id: None,
        sync_status: SyncStatus::Active,
        missing_sync_count: 0,
        missing_since: None,
        first_synced_at: now,
        last_synced_at: now,
        last_changed_at: now,
    }
}
