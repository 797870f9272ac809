/// Boxed error raised by a persistence provider.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for provider boundary calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Error type for persistence manager, registry and interceptor operations
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Persistence manager matching persistence unit '{unit}' not found")]
    NotFound { unit: String },

    #[error(
        "More than one persistence manager is registered ({count}), \
         you must specify the persistence unit name"
    )]
    AmbiguousDefault { count: usize },

    #[error("Persistence manager for unit '{unit}' is closed, dispose of this instance")]
    Closed { unit: String },

    #[error("Initialization of persistence unit '{unit}' failed: {source}")]
    ResourceInit {
        unit: String,
        #[source]
        source: ProviderError,
    },

    #[error("Error configuring transaction isolation level: {source}")]
    IsolationConfig {
        #[source]
        source: ProviderError,
    },

    #[error(
        "Each persistence manager must be paired with a persistence unit \
         in the form <manager:unit>, but got '{token}'"
    )]
    Config { token: String },

    #[error("Persistence provider error: {source}")]
    Provider {
        #[source]
        source: ProviderError,
    },
}

impl PersistenceError {
    pub(crate) fn not_found(unit: impl Into<String>) -> Self {
        Self::NotFound { unit: unit.into() }
    }

    pub(crate) fn closed(unit: impl Into<String>) -> Self {
        Self::Closed { unit: unit.into() }
    }

    pub(crate) fn provider(source: ProviderError) -> Self {
        Self::Provider { source }
    }

    pub(crate) fn isolation(source: ProviderError) -> Self {
        Self::IsolationConfig { source }
    }
}

/// Result type for persistence operations
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Failure surfaced by an intercepted unit of work.
///
/// `Operation` carries the guarded handler's original error after the
/// transaction has been rolled back and the session released.
#[derive(Debug, thiserror::Error)]
pub enum SessionError<E> {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Unit of work failed: {0}")]
    Operation(#[source] E),
}

impl<E> SessionError<E> {
    /// Returns the handler error, if the unit of work failed inside the handler.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Persistence(_) => None,
        }
    }
}
