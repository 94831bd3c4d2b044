//! Data models for Roost

use thiserror::Error;

/// A stored enum value that does not name a known variant.
#[derive(Debug, Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum persisted as text.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

mod appointment;
mod checkpoint;
mod error_category;
mod pet;
mod queue_item;
mod run_log;
mod settings;
mod stay;
mod sync_record;

pub use appointment::{ExternalAppointment, LineItem, PetRate, Pricing, ScheduleStub};
pub use checkpoint::{Checkpoint, CheckpointStatus, DateRange, SyncType};
pub use error_category::{analyze_errors, ErrorCategory, ErrorSummary};
pub use pet::{NewPet, Pet, RecordSource};
pub use queue_item::{QueueItem, QueueStatus};
pub use run_log::{ChangeDetail, RunError, RunStatus, SyncRunLog};
pub use settings::{CronHealth, HealthStatus, SyncSettings};
pub use stay::{NewStay, Stay};
pub use sync_record::{ChangeType, FieldChange, SyncRecord, SyncStatus};
