use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for opaque sources (engines, feature shutdown hooks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// Classification of a non-successful response rejected by response validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatusClass {
    /// 3xx that was not followed
    Redirect,
    /// 4xx
    Client,
    /// 5xx
    Server,
    /// Anything else outside 2xx (1xx, non-standard codes)
    Unexpected,
}

impl StatusClass {
    /// Classify a status code.
    #[must_use]
    pub fn of(status: http::StatusCode) -> Self {
        match status.as_u16() {
            300..=399 => Self::Redirect,
            400..=499 => Self::Client,
            500..=599 => Self::Server,
            _ => Self::Unexpected,
        }
    }
}

/// Errors detected while assembling a client.
///
/// These are fatal to the construction attempt and are always raised before
/// the first request is issued.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A feature needs an engine capability the engine does not advertise
    #[error("feature '{feature}' requires engine capability '{capability}' which engine '{engine}' does not support")]
    UnsupportedCapability {
        feature: String,
        capability: String,
        engine: String,
    },

    /// Two installers share a key but disagree on the configuration type
    #[error("conflicting installers registered under feature key '{key}'")]
    ConflictingFeature { key: String },

    /// An interceptor was registered at a phase the pipeline does not have
    #[error("pipeline '{pipeline}' has no phase '{phase}'")]
    UnknownPhase { pipeline: String, phase: String },

    /// A phase was added twice to the same pipeline
    #[error("pipeline '{pipeline}' already contains phase '{phase}'")]
    DuplicatePhase { pipeline: String, phase: String },

    /// Interceptors or phases were added after the client was built
    #[error("pipeline '{pipeline}' is sealed; interceptors can only be added while features install")]
    Sealed { pipeline: String },

    /// A client owning its engine was built outside a Tokio runtime
    #[error("a client that owns its engine must be built within a Tokio runtime")]
    MissingRuntime,

    /// A feature failed while installing itself
    #[error("failed to install feature '{feature}': {reason}")]
    Install { feature: String, reason: String },
}

/// Attribute store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttributeError {
    /// No value is stored under the key
    #[error("attribute not found: {key}")]
    NotFound { key: &'static str },
}

/// A single failed shutdown step.
#[derive(Debug)]
pub struct ShutdownFailure {
    /// Feature key name, or the engine name for the engine close step
    pub component: String,
    /// Underlying error
    pub source: BoxError,
}

impl fmt::Display for ShutdownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.source)
    }
}

/// Errors collected while closing a client.
///
/// Every closeable feature and the engine (when owned) are attempted even if
/// an earlier step fails; all failures are reported here together.
#[derive(Debug)]
pub struct ShutdownError {
    failures: Vec<ShutdownFailure>,
}

impl ShutdownError {
    pub(crate) fn new(failures: Vec<ShutdownFailure>) -> Self {
        Self { failures }
    }

    /// Individual failures in the order they were observed.
    #[must_use]
    pub fn failures(&self) -> &[ShutdownFailure] {
        &self.failures
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} shutdown step(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f.source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Client could not be assembled
    #[error("Client configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Missing or mistyped attribute
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// Operation attempted on a client whose `close()` has begun
    #[error("Client is closed")]
    ClientClosed,

    /// Engine was closed before the request could be executed
    #[error("Engine '{0}' is closed")]
    EngineClosed(String),

    /// The client's (or engine's) lifecycle token was cancelled
    #[error("Call cancelled")]
    Cancelled,

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Single request attempt timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Non-2xx status rejected by response validation or `error_for_status`
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        class: StatusClass,
        body_preview: String,
        content_type: Option<String>,
        /// Parsed `Retry-After` header value, if present and valid
        retry_after: Option<Duration>,
    },

    /// Too many sends for a single call (redirect loops and the like)
    #[error("Maximum send count {limit} exceeded")]
    SendCountExceeded { limit: usize },

    /// The send pipeline completed without an engine producing a response
    #[error("No response was produced for the call")]
    NoResponse,

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::error::Error;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<TestError>().unwrap();
        assert_eq!(downcast.0, "connection refused");
    }

    #[test]
    fn test_config_error_converts_into_http_error() {
        let err: HttpError = ConfigError::UnknownPhase {
            pipeline: "send".to_owned(),
            phase: "Nope".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            HttpError::Config(ConfigError::UnknownPhase { .. })
        ));
        assert!(err.to_string().contains("has no phase 'Nope'"));
    }

    #[test]
    fn test_shutdown_error_reports_every_failure() {
        let err = ShutdownError::new(vec![
            ShutdownFailure {
                component: "a".to_owned(),
                source: Box::new(TestError("first")),
            },
            ShutdownFailure {
                component: "b".to_owned(),
                source: Box::new(TestError("second")),
            },
        ]);

        assert_eq!(err.failures().len(), 2);
        let msg = err.to_string();
        assert!(msg.starts_with("2 shutdown step(s) failed"));
        assert!(msg.contains("a: first"));
        assert!(msg.contains("b: second"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_status_class() {
        assert_eq!(
            StatusClass::of(http::StatusCode::FOUND),
            StatusClass::Redirect
        );
        assert_eq!(
            StatusClass::of(http::StatusCode::NOT_FOUND),
            StatusClass::Client
        );
        assert_eq!(
            StatusClass::of(http::StatusCode::BAD_GATEWAY),
            StatusClass::Server
        );
        assert_eq!(
            StatusClass::of(http::StatusCode::CONTINUE),
            StatusClass::Unexpected
        );
    }
}
