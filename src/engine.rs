//! Business rules that do not touch the database directly.

pub mod averaging;
pub mod schedule;
