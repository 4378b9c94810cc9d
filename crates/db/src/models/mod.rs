pub mod job;
pub mod section;
