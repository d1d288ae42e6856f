use axum::{Json, http::StatusCode, response::IntoResponse};

pub type GpResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	NotFound,
	DbError,
	ValidationError(String),
	ConfigError(String),
	/// Transient failure (network, timeout, provider 5xx). Retryable.
	ServiceUnavailable(String),
	/// Permanent failure (invalid address, provider rejection). Not retryable.
	Rejected(String),
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl Error {
	/// Permanent failures must be dead-lettered instead of retried.
	pub fn is_permanent(&self) -> bool {
		matches!(self, Error::Rejected(_) | Error::ValidationError(_))
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::NotFound => write!(f, "not found"),
			Error::DbError => write!(f, "database error"),
			Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
			Error::ConfigError(msg) => write!(f, "configuration error: {}", msg),
			Error::ServiceUnavailable(msg) => write!(f, "service unavailable: {}", msg),
			Error::Rejected(msg) => write!(f, "rejected: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let (status, msg) = match self {
			Error::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
			Error::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
			Error::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
			_ => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string()),
		};
		(status, Json(serde_json::json!({ "error": msg }))).into_response()
	}
}

// vim: ts=4
