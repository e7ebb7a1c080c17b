use thiserror::Error;

/// Canonical FedGrid error taxonomy used across crates.
///
/// Classification guidance:
/// - [`FedError::Config`]: fatal startup-time configuration contract violations
/// - [`FedError::SchemaNotFound`]: distinguished per-lookup not-found result;
///   callers branch on the kind, never on message text
/// - [`FedError::Planning`]: query shape/name/type issues discovered before execution
/// - [`FedError::Execution`]: runtime task/operator/backend failures
/// - [`FedError::Canceled`]: the query's cancellation signal fired mid-flight
/// - [`FedError::Unsupported`]: syntactically valid but intentionally unimplemented behavior
#[derive(Debug, Error)]
pub enum FedError {
    /// Invalid or inconsistent gateway configuration.
    ///
    /// Examples:
    /// - duplicate schema name in the config file
    /// - a schema references a source name with no matching source entry
    ///
    /// Aborts server initialization; never produced after the load phase.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A schema name is not registered.
    ///
    /// Returned by registry/context lookups so callers can distinguish
    /// "unknown schema" from "unknown table within a known schema".
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// Query planning/compilation failures.
    ///
    /// Examples:
    /// - unknown table/column reference
    /// - unsupported construct in the logical plan
    #[error("planning error: {0}")]
    Planning(String),

    /// Runtime execution failures after planning succeeded.
    ///
    /// Examples:
    /// - leaf task backend failure
    /// - unreachable worker mid-execution
    ///
    /// Terminal for the owning query; the grid never retries a failed task.
    #[error("execution error: {0}")]
    Execution(String),

    /// The query's cancellation signal fired while work was in flight.
    #[error("query canceled")]
    Canceled,

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature/shape not implemented in the current version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl FedError {
    /// True for the distinguished schema-not-found kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FedError::SchemaNotFound(_))
    }

    /// True when the error came from query cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, FedError::Canceled)
    }
}

/// Standard FedGrid result alias.
pub type Result<T> = std::result::Result<T, FedError>;
