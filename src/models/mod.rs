pub mod progress;
pub mod recognition;
pub mod task;
