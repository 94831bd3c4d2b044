//! Pet model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

text_enum! {
    /// Where a pet or stay row came from
    RecordSource {
        External => "external",
        Manual => "manual",
    }
}

/// A pet known to the business
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub id: String,
    pub name: String,
    pub night_rate: f64,
    pub day_rate: f64,
    pub active: bool,
    pub source: RecordSource,
    /// Booking-site id this pet was first linked through
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a pet
#[derive(Debug, Clone, PartialEq)]
pub struct NewPet {
    pub name: String,
    pub night_rate: f64,
    pub day_rate: f64,
    pub source: RecordSource,
    pub external_id: Option<String>,
}

impl NewPet {
    /// A manually entered pet, as the owner would create it
    pub fn manual(name: impl Into<String>, night_rate: f64, day_rate: f64) -> Self {
        Self {
            name: name.into(),
            night_rate,
            day_rate,
            source: RecordSource::Manual,
            external_id: None,
        }
    }
}

impl Pet {
    pub fn is_manual(&self) -> bool {
        self.source == RecordSource::Manual
    }
}
