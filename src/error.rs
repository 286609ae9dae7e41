//! Error types for trackstream

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trackstream error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encoding or decoding through the wire codec failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Encoded payload does not fit in a single datagram
    #[error(
        "Payload too large: {size} > {budget} bytes ({} over budget, send fewer fields per record)",
        .size.saturating_sub(*.budget)
    )]
    PayloadTooLarge {
        /// Encoded size in bytes
        size: usize,
        /// Datagram budget of the transport
        budget: usize,
    },

    /// Caller supplied a reserved sequence key as payload
    #[error("Key '{0}' is reserved (keys 'idx' and 'timestamp' are assigned by the sequence)")]
    ReservedKey(String),

    /// Socket bind failed during server startup
    #[error("Address '{address}' not available: {source}")]
    Bind {
        /// Address that could not be bound
        address: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// Lifecycle operation is not valid in the current state
    #[error("{component}: cannot {operation} while {state}")]
    InvalidState {
        /// Component name (server, writer)
        component: &'static str,
        /// Current state name
        state: &'static str,
        /// Requested operation
        operation: &'static str,
    },

    /// Experiment is not present in the store
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    /// Experiment already present and the persist policy forbids overwriting
    #[error("Experiment already exists: {0}")]
    ExperimentExists(String),

    /// Run is not part of the experiment
    #[error("Run '{id_run}' not found in experiment '{id_experiment}'")]
    RunNotFound {
        /// Owning experiment
        id_experiment: String,
        /// Missing run
        id_run: String,
    },

    /// Field exists but does not hold a sequence
    #[error("Field '{field_name}' of run '{id_run}' is not a sequence")]
    FieldTypeMismatch {
        /// Owning run
        id_run: String,
        /// Offending field
        field_name: String,
    },

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(String),

    /// Worker thread panicked before it could report a result
    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(&'static str),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
