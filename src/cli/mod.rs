//! CLI command handlers
//!
//! Each command group is implemented in its own module.

pub mod capture;
pub mod feedback;
pub mod helpers;
pub mod query;
pub mod report;
pub mod score;
pub mod training;
