pub mod config;
pub mod content;
pub mod engine;
pub mod gateway;
pub mod interval;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sweeper;
pub mod wal;

pub use engine::{Engine, EngineError, ErrorKind};
