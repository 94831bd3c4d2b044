//! Appointment detail page parsing.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;

use super::html::clean_text;
use super::pricing::pricing_in;
use super::rules::{Extractor, Field};
use super::schedule::appointment_id_from_url;
use crate::error::Result;
use crate::models::ExternalAppointment;

static TITLE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})\s*-\s*(?:(\d{1,2})/)?(\d{1,2})\b").expect("Invalid regex")
});
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\(\s*scheduled:\s*(.*?)\s*\)$").expect("Invalid regex")
});
static EMAIL_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;\s]+").expect("Invalid regex"));

const BIRTHDATE_FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%m/%d/%Y", "%Y-%m-%d"];

/// Parse a detail page into an appointment.
///
/// Missing fields stay `None`; only a present-but-unreadable pricing block
/// is an error. `today` anchors the year of a date range read from the title.
pub fn parse_appointment_page(
    html: &str,
    source_url: &str,
    today: NaiveDate,
) -> Result<ExternalAppointment> {
    let extractor = Extractor::new(html);
    let service_type = extractor.get(Field::ServiceType);

    let (check_in, check_out) = scheduled_instants(&extractor)
        .or_else(|| service_type.as_deref().and_then(|title| title_date_range(title, today)))
        .map_or((None, None), |(start, end)| (Some(start), Some(end)));

    let emails = extractor
        .get(Field::ClientEmails)
        .map(|raw| split_emails(&raw))
        .unwrap_or_default();

    let mut all_pet_names: Vec<String> = Vec::new();
    for name in extractor.texts("event-pet") {
        if !all_pet_names.contains(&name) {
            all_pet_names.push(name);
        }
    }
    let pet_name = all_pet_names
        .first()
        .cloned()
        .or_else(|| extractor.get(Field::PetName));

    Ok(ExternalAppointment {
        external_id: appointment_id_from_url(source_url)
            .map(|(id, _)| id)
            .unwrap_or_default(),
        source_url: source_url.to_string(),
        service_type,
        status: extractor.get(Field::Status),
        check_in,
        check_out,
        duration: extractor.get(Field::Duration).map(|raw| unwrap_duration(&raw)),
        assigned_staff: extractor.get(Field::AssignedStaff),

        client_name: extractor.get(Field::ClientName),
        client_email_primary: emails.first().cloned(),
        client_email_secondary: emails.get(1).cloned(),
        client_phone: extractor.get(Field::ClientPhone),
        client_address: extractor.get(Field::ClientAddress).and_then(|raw| clean_text(&raw)),

        access_instructions: extractor.get(Field::AccessInstructions),
        drop_off_instructions: extractor.get(Field::DropOffInstructions),
        special_notes: extractor.get(Field::SpecialNotes),

        pet_name,
        all_pet_names,
        pet_photo_url: extractor.get(Field::PetPhotoUrl),
        pet_birthdate: extractor
            .get(Field::PetBirthdate)
            .and_then(|raw| parse_birthdate(&raw)),
        pet_breed: extractor.get(Field::PetBreed),
        pet_breed_type: extractor.get(Field::PetBreedType),
        pet_food_allergies: extractor.get(Field::PetFoodAllergies),
        pet_health_mobility: extractor.get(Field::PetHealthMobility),
        pet_medications: extractor.get(Field::PetMedications),
        pet_veterinarian: extractor.get(Field::PetVeterinarian),
        pet_behavioral: extractor.get(Field::PetBehavioral),
        pet_bite_history: extractor.get(Field::PetBiteHistory),

        pricing: pricing_in(extractor.document())?,
    })
}

/// Whether too many pages in a run came back without a pet name.
///
/// True only when the missing fraction is strictly above `threshold`.
#[allow(clippy::cast_precision_loss)]
pub fn check_parse_degradation(missing_pet_names: usize, total: usize, threshold: f64) -> bool {
    if total == 0 {
        return false;
    }
    missing_pet_names as f64 / total as f64 > threshold
}

fn scheduled_instants(extractor: &Extractor) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = unix_seconds(&extractor.get(Field::CheckInTimestamp)?)?;
    let end = unix_seconds(&extractor.get(Field::CheckOutTimestamp)?)?;
    let plausible = |instant: &DateTime<Utc>| (2000..=2099).contains(&instant.year());

    (plausible(&start) && plausible(&end) && end >= start).then_some((start, end))
}

fn unix_seconds(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
}

/// Compact ranges such as `2/13-18` or `2/28-3/5`, resolved to midnight UTC
pub fn title_date_range(title: &str, today: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let captures = TITLE_RANGE_RE.captures(title)?;
    let number = |index: usize| -> Option<u32> { captures.get(index)?.as_str().parse().ok() };

    let start_month = number(1)?;
    let start_day = number(2)?;
    let end_month = number(3).unwrap_or(start_month);
    let end_day = number(4)?;

    let start_year = today.year();
    let end_year = if end_month < start_month {
        start_year + 1
    } else {
        start_year
    };

    let start = NaiveDate::from_ymd_opt(start_year, start_month, start_day)?;
    let end = NaiveDate::from_ymd_opt(end_year, end_month, end_day)?;
    if end < start {
        return None;
    }
    Some((
        start.and_hms_opt(0, 0, 0)?.and_utc(),
        end.and_hms_opt(0, 0, 0)?.and_utc(),
    ))
}

fn unwrap_duration(raw: &str) -> String {
    DURATION_RE
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map_or_else(|| raw.to_string(), |inner| inner.as_str().to_string())
}

fn split_emails(raw: &str) -> Vec<String> {
    EMAIL_SEPARATOR_RE
        .split(raw)
        .filter(|part| part.contains('@'))
        .map(str::to_string)
        .collect()
}

fn parse_birthdate(raw: &str) -> Option<NaiveDate> {
    BIRTHDATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw.trim(), format).ok())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;

    const PAGE: &str = r#"
<!DOCTYPE html>
<html>
<head><title>Boarding (Nights) | Pet Sitting Co</title></head>
<body>
  <a class="appt-change-status"><i class="icon-status"></i> Scheduled</a>
  <div id="when-wrapper"
       data-start_scheduled="1766336400"
       data-end_scheduled="1766484000">
    <span class="scheduled-duration">(Scheduled: 2 d)</span>
  </div>
  <span class="event-client">John &amp; Jane Smith</span>
  <button class="message-client" data-emails= "john.smith@example.com, jane@example.com">Message</button>
  <a class="mobile-contact" data-value="+15551234567">Call</a>
  <div class="client-address" data-address="123 Main St, Austin, TX 78701"></div>
  <span class="event-pet">Luna</span>
  <div class="field-label">Access Home or Apartment</div>
  <div class="field-value">Gate code is 1234, key under mat</div>
  <div class="field-label">Drop Off</div>
  <div class="field-value">Please arrive between 4-6 PM</div>
  <div class="field-label">Breed(s)</div>
  <div class="field-value">Golden Retriever</div>
  <div class="field-label">Birthdate</div>
  <div class="field-value">March 15, 2020</div>
  <div class="field-label">Food Allergies</div>
  <div class="field-value">Grain-free diet, no chicken</div>
  <div class="field-label">Health and Mobility</div>
  <div class="field-value">Healthy, high energy</div>
  <div class="field-label">Bite History</div>
  <div class="field-value">None</div>
  <div class="field-label">Veterinarian</div>
  <div class="field-value">Austin Pet Clinic, (555) 987-6543</div>
  <div class="notes-wrapper">
    <div class="note">Luna loves belly rubs!</div>
  </div>
</body>
</html>"#;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
    }

    fn instant(text: &str) -> Option<DateTime<Utc>> {
        Some(text.parse().unwrap())
    }

    #[test]
    fn parses_full_detail_page() {
        let appointment = parse_appointment_page(
            PAGE,
            "https://site.test/schedule/a/C63QgKsK/1766336400",
            today(),
        )
        .unwrap();

        assert_eq!(appointment.external_id, "C63QgKsK");
        assert_eq!(appointment.service_type.as_deref(), Some("Boarding (Nights)"));
        assert_eq!(appointment.status.as_deref(), Some("Scheduled"));
        assert_eq!(appointment.check_in, instant("2025-12-21T17:00:00Z"));
        assert_eq!(appointment.check_out, instant("2025-12-23T10:00:00Z"));
        assert_eq!(appointment.duration.as_deref(), Some("2 d"));
        assert_eq!(appointment.client_name.as_deref(), Some("John & Jane Smith"));
        assert_eq!(
            appointment.client_email_primary.as_deref(),
            Some("john.smith@example.com")
        );
        assert_eq!(
            appointment.client_email_secondary.as_deref(),
            Some("jane@example.com")
        );
        assert_eq!(appointment.client_phone.as_deref(), Some("+15551234567"));
        assert_eq!(
            appointment.client_address.as_deref(),
            Some("123 Main St, Austin, TX 78701")
        );
        assert_eq!(appointment.pet_name.as_deref(), Some("Luna"));
        assert_eq!(appointment.pet_breed.as_deref(), Some("Golden Retriever"));
        assert_eq!(appointment.pet_birthdate, NaiveDate::from_ymd_opt(2020, 3, 15));
        assert_eq!(
            appointment.access_instructions.as_deref(),
            Some("Gate code is 1234, key under mat")
        );
        assert_eq!(
            appointment.drop_off_instructions.as_deref(),
            Some("Please arrive between 4-6 PM")
        );
        assert_eq!(appointment.pet_bite_history.as_deref(), Some("None"));
        assert_eq!(
            appointment.special_notes.as_deref(),
            Some("Luna loves belly rubs!")
        );
        assert_eq!(appointment.pet_medications, None);
        assert_eq!(appointment.assigned_staff, None);
        assert_eq!(appointment.pricing, None);
    }

    #[test]
    fn empty_and_malformed_pages_yield_empty_fields() {
        let empty = parse_appointment_page("", "", today()).unwrap();
        assert_eq!(empty, ExternalAppointment::default());

        let malformed =
            parse_appointment_page(r#"<html><body><div class="pet-name">Test"#, "", today())
                .unwrap();
        assert_eq!(malformed.pet_name.as_deref(), Some("Test"));
        assert_eq!(malformed.check_in, None);
    }

    #[test]
    fn cross_month_title_range_without_timestamps() {
        let html = "<h1>Boarding 2/28-3/5</h1>";
        let appointment = parse_appointment_page(html, "", today()).unwrap();

        assert_eq!(appointment.check_in, instant("2026-02-28T00:00:00Z"));
        assert_eq!(appointment.check_out, instant("2026-03-05T00:00:00Z"));
    }

    #[test]
    fn implausible_timestamps_fall_back_to_title() {
        let html = r#"<h1>12/21-23</h1><div id="when-wrapper" data-start_scheduled="9999999999" data-end_scheduled="9999999999"></div>"#;
        let appointment = parse_appointment_page(html, "", today()).unwrap();

        assert_eq!(appointment.check_in, instant("2026-12-21T00:00:00Z"));
        assert_eq!(appointment.check_out, instant("2026-12-23T00:00:00Z"));
    }

    #[test]
    fn title_range_rolls_into_next_year() {
        let (start, end) = title_date_range("12/28-1/3", today()).unwrap();
        assert_eq!(start.date_naive(), NaiveDate::from_ymd_opt(2026, 12, 28).unwrap());
        assert_eq!(end.date_naive(), NaiveDate::from_ymd_opt(2027, 1, 3).unwrap());
        assert_eq!(title_date_range("Boarding", today()), None);
        assert_eq!(title_date_range("2/31-3/2", today()), None);
    }

    #[test]
    fn multiple_pets_are_listed_in_page_order() {
        let html = r#"<span class="event-pet">Mochi</span><span class="event-pet">Marlee</span><span class="event-pet">Mochi</span>"#;
        let appointment = parse_appointment_page(html, "", today()).unwrap();

        assert_eq!(appointment.pet_name.as_deref(), Some("Mochi"));
        assert_eq!(appointment.all_pet_names, vec!["Mochi".to_string(), "Marlee".to_string()]);
    }

    #[test]
    fn broken_pricing_block_is_an_error() {
        let html = r#"<span class="event-pet">Luna</span>
            <fieldset id="confirm-price"><a>Total TBD</a></fieldset>"#;
        assert!(matches!(
            parse_appointment_page(html, "", today()),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn parse_degradation_is_strictly_above_threshold() {
        assert!(!check_parse_degradation(2, 10, 0.2));
        assert!(check_parse_degradation(3, 10, 0.2));
        assert!(!check_parse_degradation(0, 0, 0.2));
    }
}
