#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Invalid scope: {message}")]
	InvalidScope { message: String },
	#[error("Structural error: {message}")]
	Structural { message: String },
	#[error("Permission denied: {message}")]
	PermissionDenied { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Cache error: {message}")]
	Cache { message: String },
	#[error("Lock error: {message}")]
	Lock { message: String },
}
impl From<odr_domain::Error> for Error {
	fn from(err: odr_domain::Error) -> Self {
		match err {
			odr_domain::Error::InvalidScope { message } => Self::InvalidScope { message },
			odr_domain::Error::Structural { message } => Self::Structural { message },
			odr_domain::Error::InvalidSearchKey { message } => Self::InvalidRequest { message },
			err @ odr_domain::Error::UnknownFieldType { .. } =>
				Self::Structural { message: err.to_string() },
		}
	}
}

impl From<odr_storage::Error> for Error {
	fn from(err: odr_storage::Error) -> Self {
		match err {
			odr_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			odr_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			odr_storage::Error::NotFound(message) => Self::NotFound { message },
			odr_storage::Error::Conflict(message) => Self::Conflict { message },
		}
	}
}
