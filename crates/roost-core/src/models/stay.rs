//! Stay (boarding booking) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecordSource;

/// One boarding stay for one pet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stay {
    pub id: String,
    pub pet_id: String,
    pub arrival: DateTime<Utc>,
    pub departure: DateTime<Utc>,
    pub external_id: Option<String>,
    pub source: RecordSource,
    pub billed_amount: Option<f64>,
    pub night_rate: Option<f64>,
    pub day_rate: Option<f64>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a stay
#[derive(Debug, Clone, PartialEq)]
pub struct NewStay {
    pub pet_id: String,
    pub arrival: DateTime<Utc>,
    pub departure: DateTime<Utc>,
    pub external_id: Option<String>,
    pub source: RecordSource,
    pub billed_amount: Option<f64>,
    pub night_rate: Option<f64>,
    pub day_rate: Option<f64>,
}

impl NewStay {
    /// A manually entered stay with no pricing
    pub fn manual(pet_id: impl Into<String>, arrival: DateTime<Utc>, departure: DateTime<Utc>) -> Self {
        Self {
            pet_id: pet_id.into(),
            arrival,
            departure,
            external_id: None,
            source: RecordSource::Manual,
            billed_amount: None,
            night_rate: None,
            day_rate: None,
        }
    }
}

impl Stay {
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}
