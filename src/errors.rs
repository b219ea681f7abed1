use std::{fmt, io, num::ParseFloatError, path::Path};
use quick_xml::events::attributes::AttrError;

/// Broad category of a failure, used by callers and tests to tell fatal input
/// problems apart from plain I/O trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputNotFound,
    Parse,
    EmptyInput,
    MalformedAttribute,
    DanglingNodeRef,
    Config,
    Cache,
    Io,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn input_not_found(path: &Path) -> Self {
        Error::new(ErrorKind::InputNotFound, format!("Input file {} does not exist", path.display()))
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Parse, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::MalformedAttribute, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            message: value.to_string(),
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(value: quick_xml::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string(),
        }
    }
}

impl From<AttrError> for Error {
    fn from(value: AttrError) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string(),
        }
    }
}

impl From<ParseFloatError> for Error {
    fn from(value: ParseFloatError) -> Self {
        Error {
            kind: ErrorKind::MalformedAttribute,
            message: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        let kind = if value.is_io() {
            ErrorKind::Io
        } else {
            ErrorKind::Config
        };
        Error {
            kind,
            message: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
