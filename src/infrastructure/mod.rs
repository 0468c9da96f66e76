pub mod calendar_client;
pub mod config;
pub mod error;
pub mod frontmatter;
pub mod ics_parser;
pub mod task_store;
