use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = FillError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FillError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("io error on {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("site profile {path}: {source}")]
    Profile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid selector for {field}: {selector:?}")]
    Selector {
        field: &'static str,
        selector: String,
    },

    #[error("invalid base url {0:?}: {1}")]
    BaseUrl(String, url::ParseError),

    #[error("http client build failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("html rewrite failed: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),

    #[error("report output failed: {0}")]
    Report(#[from] csv::Error),
}

impl FillError {
    pub fn at(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| FillError::Path { path, source }
    }
}
