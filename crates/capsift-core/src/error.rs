use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::PredicateError;
use crate::source::SourceError;

/// Which predicate a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateStage {
    Packet,
    Stream,
}

impl fmt::Display for PredicateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packet => f.write_str("packet"),
            Self::Stream => f.write_str("stream"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("capture source: {0}")]
    Source(#[from] SourceError),
    #[error("{stage} predicate failed: {source}")]
    Predicate {
        stage: PredicateStage,
        #[source]
        source: PredicateError,
    },
    #[error("engine task failed: {0}")]
    Runtime(String),
}
