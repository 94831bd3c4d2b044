pub mod batch;
pub mod common;
pub mod completions;
pub mod logs;
pub mod micro;
pub mod sync;
