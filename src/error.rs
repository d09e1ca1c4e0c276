//! Engine error taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Fewer than the minimum viable number of tracks resolved from the pool.
    #[error("Need at least {min} tracks in the pool, got {got}")]
    InsufficientPool { got: usize, min: usize },

    #[error("Phase profile '{0}' not found")]
    PhaseProfileNotFound(String),

    /// The narrative LLM returned malformed or incomplete output after retries.
    #[error("LLM contract violation: {0}")]
    LlmContract(String),

    /// An external capability (slot fill, storage) failed.
    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Set store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// A second build was requested while one is in flight.
    #[error("A set build is already in progress")]
    BuildInProgress,
}
