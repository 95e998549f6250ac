//! Prelude for commonly used types and traits in tally.

pub use crate::config::{EngineConfig, StartPosition};
pub use crate::error::{Result, TallyError};
pub use crate::sink::ResultSink;
pub use crate::sources::{DataSource, Marker, Record};
pub use crate::trigger::Cadence;
