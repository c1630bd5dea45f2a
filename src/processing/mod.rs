//! Queue processing phase

pub mod environment;
pub mod processor;
pub mod runner;

pub use environment::{CommandEnvironment, Environment, EnvironmentError};
pub use processor::{AcceptAllProcessor, HttpItemProcessor, ItemProcessor, ProcessorStatusError};
pub use runner::{ProcessingConfig, ProcessingLoop, ProcessingReport};
