//! Pure parsers for booking-site pages

pub mod detail;
pub mod html;
pub mod pricing;
pub mod rules;
pub mod schedule;

pub use detail::{check_parse_degradation, parse_appointment_page, title_date_range};
pub use pricing::{classify_rates, is_day_service, parse_pricing, pricing_in};
pub use schedule::{
    appointment_id_from_url, fetch_schedule, is_boarding_candidate, next_page_url,
    parse_schedule_page,
};
