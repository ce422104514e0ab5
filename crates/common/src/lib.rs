pub mod config;
pub mod json;
pub mod observability;
pub mod time;

pub use json::JsonValue;
