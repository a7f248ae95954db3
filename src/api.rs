pub mod grading;
pub mod schedule;

mod helper;
