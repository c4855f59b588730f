//! Error types for obelisca.
//!
//! Every fallible operation in the crate (HTTP calls to a deployment, the
//! conversation database, attachment extraction, settings) reports through
//! the single [`Error`] type defined here.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

type Source = Arc<dyn error::Error + Send + Sync>;

/// The main error type for obelisca.
#[derive(Clone, Debug)]
pub enum Error {
    /// A non-success response that no narrower variant covers.
    Api {
        /// HTTP status code.
        status_code: u16,
        /// The `error.type` (or `error.code`) of the response body.
        error_type: Option<String>,
        message: String,
        /// `x-request-id` or `apim-request-id` of the response.
        request_id: Option<String>,
    },

    /// The deployment rejected the API key, or no key was configured.
    Authentication { message: String },

    /// The key is valid but may not use this deployment.
    Permission { message: String },

    /// A deployment or stored conversation that does not exist.
    NotFound { message: String },

    /// HTTP 429.
    RateLimit {
        message: String,
        /// Seconds from the `retry-after` header.
        retry_after: Option<u64>,
    },

    /// HTTP 400, naming the offending request field when the body does.
    BadRequest {
        message: String,
        param: Option<String>,
    },

    /// The request or the deployment timed out.
    Timeout {
        message: String,
        /// Client timeout in seconds, when the client gave up.
        duration: Option<f64>,
    },

    /// The deployment endpoint could not be reached.
    Connection {
        message: String,
        source: Option<Source>,
    },

    /// HTTP 500.
    InternalServer {
        message: String,
        request_id: Option<String>,
    },

    /// HTTP 502, 503 or 504.
    ServiceUnavailable {
        message: String,
        retry_after: Option<u64>,
    },

    /// JSON, YAML or timestamp text that could not be read or written.
    Serialization {
        message: String,
        source: Option<Source>,
    },

    /// Filesystem failure.
    Io {
        message: String,
        source: Arc<io::Error>,
    },

    /// reqwest failed outside of connecting or timing out.
    HttpClient {
        message: String,
        source: Option<Source>,
    },

    /// Caller input that cannot be acted on.
    Validation {
        message: String,
        param: Option<String>,
    },

    /// An endpoint that is not a valid URL.
    Url {
        message: String,
        source: Option<url::ParseError>,
    },

    /// Settings or deployment configuration is unusable.
    Configuration {
        message: String,
        /// The offending setting, if known.
        setting: Option<String>,
    },

    /// The conversation database failed.
    Database {
        message: String,
        source: Option<Source>,
    },

    /// An attached file could not be turned into text.
    Attachment { message: String, path: String },
}

impl Error {
    pub fn api(
        status_code: u16,
        error_type: Option<String>,
        message: String,
        request_id: Option<String>,
    ) -> Self {
        Error::Api {
            status_code,
            error_type,
            message,
            request_id,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Error::Permission {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn bad_request(message: impl Into<String>, param: Option<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
            param,
        }
    }

    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn internal_server(message: impl Into<String>, request_id: Option<String>) -> Self {
        Error::InternalServer {
            message: message.into(),
            request_id,
        }
    }

    pub fn service_unavailable(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::ServiceUnavailable {
            message: message.into(),
            retry_after,
        }
    }

    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>, setting: Option<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            setting,
        }
    }

    pub fn database(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Database {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn attachment(message: impl Into<String>, path: impl Into<String>) -> Self {
        Error::Attachment {
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimit { .. })
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Error::BadRequest { .. })
    }

    /// True for 500 and 502..504 responses.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Error::InternalServer { .. } | Error::ServiceUnavailable { .. }
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    pub fn is_database(&self) -> bool {
        matches!(self, Error::Database { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// The request id the service attached to a failed response.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Error::Api { request_id, .. } | Error::InternalServer { request_id, .. } => {
                request_id.as_deref()
            }
            _ => None,
        }
    }

    /// The HTTP status of a generic API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Api {
                error_type,
                message,
                ..
            } => write!(
                f,
                "{}: {message}",
                error_type.as_deref().unwrap_or("API error")
            )?,
            Error::Authentication { message } => write!(f, "Authentication error: {message}")?,
            Error::Permission { message } => write!(f, "Permission error: {message}")?,
            Error::NotFound { message } => write!(f, "Not found: {message}")?,
            Error::RateLimit { message, .. } => write!(f, "Rate limit exceeded: {message}")?,
            Error::BadRequest { message, .. } => write!(f, "Bad request: {message}")?,
            Error::Timeout { message, .. } => write!(f, "Timeout error: {message}")?,
            Error::Connection { message, .. } => write!(f, "Connection error: {message}")?,
            Error::InternalServer { message, .. } => {
                write!(f, "Internal server error: {message}")?
            }
            Error::ServiceUnavailable { message, .. } => {
                write!(f, "Service unavailable: {message}")?
            }
            Error::Serialization { message, .. } => write!(f, "Serialization error: {message}")?,
            Error::Io { message, .. } => write!(f, "I/O error: {message}")?,
            Error::HttpClient { message, .. } => write!(f, "HTTP client error: {message}")?,
            Error::Validation { message, .. } => write!(f, "Validation error: {message}")?,
            Error::Url { message, .. } => write!(f, "URL error: {message}")?,
            Error::Configuration { message, .. } => write!(f, "Configuration error: {message}")?,
            Error::Database { message, .. } => write!(f, "Database error: {message}")?,
            Error::Attachment { message, .. } => write!(f, "Attachment error: {message}")?,
        }
        match self {
            Error::Api {
                request_id: Some(id),
                ..
            }
            | Error::InternalServer {
                request_id: Some(id),
                ..
            } => write!(f, " (Request ID: {id})"),
            Error::RateLimit {
                retry_after: Some(secs),
                ..
            }
            | Error::ServiceUnavailable {
                retry_after: Some(secs),
                ..
            } => write!(f, " (retry after {secs} seconds)"),
            Error::BadRequest {
                param: Some(param), ..
            }
            | Error::Validation {
                param: Some(param), ..
            } => write!(f, " (parameter: {param})"),
            Error::Timeout {
                duration: Some(secs),
                ..
            } => write!(f, " ({secs} seconds)"),
            Error::Configuration {
                setting: Some(setting),
                ..
            } => write!(f, " (setting: {setting})"),
            Error::Attachment { path, .. } => write!(f, " ({path})"),
            _ => Ok(()),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. }
            | Error::Serialization { source, .. }
            | Error::HttpClient { source, .. }
            | Error::Database { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(format!("YAML error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::database(format!("SQLite error: {err}"), Some(Box::new(err)))
    }
}

/// A specialized Result type for obelisca operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::configuration("unknown deployment type: bedrock", Some("type".into()));
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown deployment type: bedrock (setting: type)"
        );
        let err = Error::attachment("not a docx archive", "notes.docx");
        assert_eq!(
            err.to_string(),
            "Attachment error: not a docx archive (notes.docx)"
        );
        let err = Error::api(418, None, "teapot".to_string(), None);
        assert_eq!(err.to_string(), "API error: teapot");
        let err = Error::timeout("Request timed out", Some(60.0));
        assert_eq!(err.to_string(), "Timeout error: Request timed out (60 seconds)");
        let err = Error::not_found("conversation 4 does not exist");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: conversation 4 does not exist");
    }

    #[test]
    fn sqlite_errors_become_database_errors() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(err.is_database());
        assert!(error::Error::source(&err).is_some());
    }
}
