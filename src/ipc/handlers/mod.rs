pub mod core;
pub mod owners;
pub mod setup;
pub mod timetable;
