pub mod grading;
pub mod schedule;
pub mod school;
