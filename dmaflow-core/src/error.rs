/*!
Specialized `Error` and `Result` types for dmaflow.
*/

use std::{convert, error, fmt, result};

/// Specialized `Error` type for dmaflow errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    /// Generic error type containing a string
    Other(&'static str),
    /// Out of bounds.
    ///
    /// Catch-all for bounds check errors.
    Bounds,
    /// IO error
    ///
    /// Catch-all for io related errors.
    IO(&'static str),
    /// Device error
    ///
    /// The device could not be opened or set up.
    /// These errors are fatal to plugin initialization and are never retried.
    Device(&'static str),
    /// Transport error
    ///
    /// A transfer on an already opened channel has failed.
    Transport(&'static str),
    /// Protocol error
    ///
    /// The remote/device side reported an error or sent malformed data.
    Protocol(&'static str),
    /// API misuse
    ///
    /// The caller violated the calling contract (e.g. double initialization
    /// of the async pipeline). Returned immediately and without side effects.
    Misuse(&'static str),
    /// Plugin api version mismatch.
    ///
    /// Contains the api version the plugin was built against.
    ApiVersion(i32),
    /// Partial transfer.
    ///
    /// A request finished with its completion flag still unset.
    Partial,
}

/// Convert from &str to error
impl convert::From<&'static str> for Error {
    fn from(error: &'static str) -> Self {
        Error::Other(error)
    }
}

impl Error {
    /// Returns a tuple representing the error description and its string value.
    pub fn to_str_pair(self) -> (&'static str, Option<&'static str>) {
        match self {
            Error::Other(e) => ("other error", Some(e)),
            Error::Bounds => ("out of bounds", None),
            Error::IO(e) => ("io error", Some(e)),
            Error::Device(e) => ("device error", Some(e)),
            Error::Transport(e) => ("transport error", Some(e)),
            Error::Protocol(e) => ("protocol error", Some(e)),
            Error::Misuse(e) => ("api misuse", Some(e)),
            Error::ApiVersion(_) => ("plugin api version mismatch", None),
            Error::Partial => ("partial transfer", None),
        }
    }

    /// Returns a simple string representation of the error.
    pub fn to_str(self) -> &'static str {
        self.to_str_pair().0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (desc, value) = self.to_str_pair();

        if let Some(value) = value {
            write!(f, "{}: {}", desc, value)
        } else {
            f.write_str(desc)
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        self.to_str()
    }
}

/// Specialized `Result` type for dmaflow results.
pub type Result<T> = result::Result<T, Error>;
