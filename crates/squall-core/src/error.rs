//! Error types for store and backend operations.

use std::fmt;

/// The primary error type for all squall operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, timeout)
    Connection(ConnectionError),
    /// Statement execution errors, including wrapped integrity violations
    Query(QueryError),
    /// Type conversion or normalization errors
    Type(TypeError),
    /// A variable was read while undefined or unresolvably lazy
    NotLoaded(NotLoadedError),
    /// Pending writes form a dependency cycle that cannot be ordered
    OrderLoop(OrderLoopError),
    /// The object is gone from its store (deleted, or a reload found no row)
    LostObject(LostObjectError),
    /// The object is already owned by a different store
    WrongStore(WrongStoreError),
    /// A result set expected to hold exactly one row held zero or many
    NotOne(NotOneError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Statement or connection timeout
    Timeout,
    /// Connection already closed
    Closed,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, check)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotLoadedError {
    /// Column whose variable had no usable value
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct OrderLoopError {
    /// Descriptions of the objects participating in the cycle
    pub objects: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LostObjectError {
    /// Description of the object (table plus key when known)
    pub object: String,
}

#[derive(Debug, Clone)]
pub struct WrongStoreError {
    pub object: String,
}

#[derive(Debug, Clone, Copy)]
pub struct NotOneError {
    /// Number of rows actually found
    pub count: usize,
}

impl Error {
    /// Shorthand for a `NotLoaded` error on the given column.
    pub fn not_loaded(column: impl Into<String>) -> Self {
        Error::NotLoaded(NotLoadedError {
            column: column.into(),
        })
    }

    /// Shorthand for a `LostObject` error.
    pub fn lost_object(object: impl Into<String>) -> Self {
        Error::LostObject(LostObjectError {
            object: object.into(),
        })
    }

    /// Shorthand for a `WrongStore` error.
    pub fn wrong_store(object: impl Into<String>) -> Self {
        Error::WrongStore(WrongStoreError {
            object: object.into(),
        })
    }

    /// Is this a retryable error (deadlock, serialization failure, timeout)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            Error::Connection(c) => matches!(c.kind, ConnectionErrorKind::Timeout),
            _ => false,
        }
    }

    /// Is this a lost-connection error? The store never reconnects silently;
    /// callers decide whether a retry makes sense.
    pub fn is_disconnection(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected | ConnectionErrorKind::Closed,
                ..
            })
        )
    }

    /// Is this a wrapped backend integrity violation?
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                ..
            })
        )
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::NotLoaded(e) => {
                write!(f, "Column '{}' is not loaded", e.column)
            }
            Error::OrderLoop(e) => {
                write!(
                    f,
                    "Can't order a flush with a dependency loop: {}",
                    e.objects.join(" -> ")
                )
            }
            Error::LostObject(e) => write!(f, "Object is gone from its store: {}", e.object),
            Error::WrongStore(e) => {
                write!(f, "Object {} is owned by a different store", e.object)
            }
            Error::NotOne(e) => {
                write!(f, "Expected exactly one row, found {}", e.count)
            }
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Error::Connection(e)
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        Error::Query(e)
    }
}

impl From<TypeError> for Error {
    fn from(e: TypeError) -> Self {
        Error::Type(e)
    }
}

impl From<OrderLoopError> for Error {
    fn from(e: OrderLoopError) -> Self {
        Error::OrderLoop(e)
    }
}

impl From<NotOneError> for Error {
    fn from(e: NotOneError) -> Self {
        Error::NotOne(e)
    }
}

/// Result type alias for squall operations.
pub type Result<T> = std::result::Result<T, Error>;
