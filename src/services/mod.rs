pub mod merge;
pub mod metadata;
pub mod ocr;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod report;
pub mod staging;
pub mod storage;
pub mod tasks;
pub mod worker;
