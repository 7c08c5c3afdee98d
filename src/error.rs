use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Reading the static image base of an object file failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no object path to read an image base from")]
    EmptyPath,

    #[error("failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse `{}` as an object file", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: object::Error,
    },

    #[error("`{}` has no loadable segments", path.display())]
    NoLoadSegment { path: PathBuf },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
