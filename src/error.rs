use std::fmt;

use crate::types::FieldId;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Decode(serde_json::Error),
    Validation { field: FieldId, reason: String },
    NoBaseline(FieldId),
    Config(String),
    Toml(toml::de::Error),
    Io(std::io::Error),
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::Validation { field, reason } => {
                write!(f, "invalid value for {}: {reason}", field.name())
            }
            Error::NoBaseline(field) => {
                write!(f, "no confirmed value for {} yet", field.name())
            }
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Toml(e) => write!(f, "TOML parse error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Closed => write!(f, "controller is not running"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Toml(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Toml(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
