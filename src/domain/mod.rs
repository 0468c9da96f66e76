pub mod aggregation;
pub mod models;
pub mod recurrence;
pub mod status;
