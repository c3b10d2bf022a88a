use std::path::Path;
use std::{error, fmt, io, result};

#[derive(Debug)]
enum ErrorKind {
    Io(io::Error),
    Open { path: String, source: io::Error },
    InvalidHeaders,
    Stream(String),
}

#[derive(Debug)]
pub struct Error(ErrorKind);

impl Error {
    pub(crate) fn open(path: &Path, source: io::Error) -> Self {
        Self(ErrorKind::Open {
            path: path.display().to_string(),
            source,
        })
    }

    pub(crate) fn invalid_headers() -> Self {
        Self(ErrorKind::InvalidHeaders)
    }

    /// An error message forwarded from the producer thread.
    pub(crate) fn stream(message: String) -> Self {
        Self(ErrorKind::Stream(message))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        Self::new(io::ErrorKind::Other, err)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.0 {
            ErrorKind::Io(ref err) => Some(err),
            ErrorKind::Open { ref source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::Open {
                ref path,
                ref source,
            } => {
                write!(f, "failed to open file: {}: {}", path, source)
            }
            ErrorKind::InvalidHeaders => {
                write!(f, "could not parse header row")
            }
            ErrorKind::Stream(ref message) => f.write_str(message),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
