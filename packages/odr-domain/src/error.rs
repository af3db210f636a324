#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid scope: {message}")]
	InvalidScope { message: String },
	#[error("Structural error: {message}")]
	Structural { message: String },
	#[error("Invalid search key: {message}")]
	InvalidSearchKey { message: String },
	#[error("Unknown field type {value:?}.")]
	UnknownFieldType { value: String },
}
impl Error {
	pub(crate) fn structural(message: impl Into<String>) -> Self {
		Self::Structural { message: message.into() }
	}

	pub(crate) fn invalid_key(message: impl Into<String>) -> Self {
		Self::InvalidSearchKey { message: message.into() }
	}
}
