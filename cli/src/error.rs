//! Error types for the CLI

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("No {kind} matches '{input}'")]
    NoMatch { kind: &'static str, input: String },

    #[error("'{input}' matches {count} {kind}s, use a longer prefix")]
    AmbiguousId {
        kind: &'static str,
        input: String,
        count: usize,
    },

    #[error("{} is not an image ({mime})", path.display())]
    UnsupportedImage { path: PathBuf, mime: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] retcon_core::RetconErr),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
