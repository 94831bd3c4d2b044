//! Appointment data scraped from the booking site

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// An appointment link found on a week-view schedule page.
///
/// Only text present in the static markup is available; anything the page
/// fills in with script is missing here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStub {
    pub external_id: String,
    /// Absolute URL of the appointment detail page
    pub url: String,
    /// Trailing timestamp segment of the appointment URL
    pub timestamp: Option<String>,
    pub title: Option<String>,
    pub time_text: Option<String>,
    pub pet_name: Option<String>,
    pub client_name: Option<String>,
}

impl ScheduleStub {
    /// UTC day of the URL timestamp, when the link carries one
    pub fn scheduled_on(&self) -> Option<NaiveDate> {
        let seconds = self.timestamp.as_deref()?.parse::<i64>().ok()?;
        DateTime::from_timestamp(seconds, 0).map(|at| at.date_naive())
    }
}

/// One appointment as read from its detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalAppointment {
    pub external_id: String,
    pub source_url: String,
    pub service_type: Option<String>,
    pub status: Option<String>,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub assigned_staff: Option<String>,

    pub client_name: Option<String>,
    pub client_email_primary: Option<String>,
    pub client_email_secondary: Option<String>,
    pub client_phone: Option<String>,
    pub client_address: Option<String>,

    pub access_instructions: Option<String>,
    pub drop_off_instructions: Option<String>,
    pub special_notes: Option<String>,

    pub pet_name: Option<String>,
    /// Every pet listed on the appointment, in page order
    #[serde(default)]
    pub all_pet_names: Vec<String>,
    pub pet_photo_url: Option<String>,
    pub pet_birthdate: Option<NaiveDate>,
    pub pet_breed: Option<String>,
    pub pet_breed_type: Option<String>,
    pub pet_food_allergies: Option<String>,
    pub pet_health_mobility: Option<String>,
    pub pet_medications: Option<String>,
    pub pet_veterinarian: Option<String>,
    pub pet_behavioral: Option<String>,
    pub pet_bite_history: Option<String>,

    pub pricing: Option<Pricing>,
}

impl ExternalAppointment {
    /// Names of every pet on the appointment, falling back to `pet_name`.
    pub fn pet_names(&self) -> Vec<String> {
        if self.all_pet_names.is_empty() {
            self.pet_name.iter().cloned().collect()
        } else {
            self.all_pet_names.clone()
        }
    }
}

/// Pricing block of an appointment, in display currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub total: f64,
    pub line_items: Vec<LineItem>,
    /// Present only when the appointment covers more than one pet
    pub per_pet_rates: Option<Vec<PetRate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub service_name: String,
    pub rate: f64,
    pub qty: f64,
    pub amount: f64,
}

/// Day and night rate charged for a single pet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PetRate {
    pub night_rate: Option<f64>,
    pub day_rate: Option<f64>,
}
