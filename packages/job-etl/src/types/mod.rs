//! Data types for the job ETL pipeline.

pub mod catalog;
pub mod config;
pub mod listing;
pub mod metrics;
pub mod record;
pub mod run;
