//! roost-core - Core library for Roost
//!
//! This crate contains the models, SQLite store, booking-site scraping and
//! the sync engine used by the `roost` command line interface.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod models;
pub mod parse;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{DateRange, SyncType};
