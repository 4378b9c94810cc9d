use chrono::{DateTime, Utc};

/// Primary key type for all database rows (BIGSERIAL).
pub type DbId = i64;

/// Timestamp type used for all persisted times (TIMESTAMPTZ).
pub type Timestamp = DateTime<Utc>;
