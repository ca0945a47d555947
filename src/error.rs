use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum Md1Error {
    #[error("Unable to access {}: {source}", .path.display())]
    IoAccess {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Header error: {0}")]
    HeaderInvalid(String),
    #[error("md1_file_map not found in {0}")]
    MappingNotFound(String),
    #[error("Configuration error: {detail}{}", origin_suffix(.origin))]
    ConfigurationInvalid {
        detail: String,
        origin: Option<PathBuf>,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("No files to pack")]
    NothingToPack,
}

fn origin_suffix(origin: &Option<PathBuf>) -> String {
    origin.as_ref().map(|p| format!(" (in {})", p.display())).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Md1Error>;

impl Md1Error {
    /// Closure for `map_err` that tags an `io::Error` with the path it concerns.
    pub fn io_at(path: &Path) -> impl FnOnce(io::Error) -> Md1Error + '_ {
        move |source| Md1Error::IoAccess { path: path.to_owned(), source }
    }

    pub fn config(detail: impl Into<String>, origin: Option<&Path>) -> Md1Error {
        Md1Error::ConfigurationInvalid {
            detail: detail.into(),
            origin: origin.map(Path::to_owned),
        }
    }
}
