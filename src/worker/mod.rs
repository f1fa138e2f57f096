//! Business-work side of the worker: the batch loop and its processors

pub mod executor;
pub mod processor;

pub use executor::BatchLoop;
pub use processor::{
    BatchProcessor, BatchReport, DocumentHandler, IdleProcessor, LoggingHandler,
    PostgresTriggerProcessor,
};
