pub mod api;
pub mod chapter_job;
pub mod gate;
pub mod merge;
pub mod model;
pub mod queue;
pub mod runner;
