//! Error type shared by every layer of the store: coordinator, block
//! server, client transfer engine, and the binaries that wire them up.
use err_derive::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(std::io::Error),

	#[error(display = "Metadata store error: {}", _0)]
	Db(strata_db::Error),

	#[error(display = "Config error: {}", _0)]
	Config(toml::de::Error),

	#[error(display = "JSON error: {}", _0)]
	Json(serde_json::Error),

	#[error(display = "Malformed request: {}", _0)]
	Protocol(String),

	#[error(display = "{}", _0)]
	Message(String),
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		Error::Io(e)
	}
}

impl From<strata_db::Error> for Error {
	fn from(e: strata_db::Error) -> Error {
		Error::Db(e)
	}
}

impl From<toml::de::Error> for Error {
	fn from(e: toml::de::Error) -> Error {
		Error::Config(e)
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Error {
		Error::Json(e)
	}
}

impl From<&str> for Error {
	fn from(s: &str) -> Error {
		Error::Message(s.to_string())
	}
}

impl From<String> for Error {
	fn from(s: String) -> Error {
		Error::Message(s)
	}
}

pub type Result<T> = std::result::Result<T, Error>;

/// Mirrors `garage_util`'s `OkOrMessage` helper: turn an `Option` into a
/// `Result` with a plain-text error, for the "this should have been
/// there" cases that don't warrant their own `Error` variant.
pub trait OkOrMessage<T> {
	fn ok_or_message<S: Into<String>>(self, msg: S) -> Result<T>;
}

impl<T> OkOrMessage<T> for Option<T> {
	fn ok_or_message<S: Into<String>>(self, msg: S) -> Result<T> {
		self.ok_or_else(|| Error::Message(msg.into()))
	}
}
