// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{io, sync::Arc};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Error type for the aliases crate
#[derive(Diagnostic, Debug, Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] io::Error),

    #[diagnostic(transparent)]
    #[error(transparent)]
    UnrecognizedKey(#[from] UnrecognizedKey),

    #[diagnostic(transparent)]
    #[error(transparent)]
    MissingKey(#[from] MissingKey),

    #[diagnostic(transparent)]
    #[error(transparent)]
    InvalidDevtype(#[from] InvalidDevtype),

    #[diagnostic(transparent)]
    #[error(transparent)]
    InvalidNumber(#[from] InvalidNumber),

    #[diagnostic(transparent)]
    #[error(transparent)]
    UnterminatedString(#[from] UnterminatedString),

    #[diagnostic(transparent)]
    #[error(transparent)]
    InvalidAlias(#[from] InvalidAlias),
}

impl Error {
    /// Line of the alias file the error was found on
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::IO(_) => None,
            Error::UnrecognizedKey(e) => Some(e.line),
            Error::MissingKey(e) => Some(e.line),
            Error::InvalidDevtype(e) => Some(e.line),
            Error::InvalidNumber(e) => Some(e.line),
            Error::UnterminatedString(e) => Some(e.line),
            Error::InvalidAlias(e) => Some(e.line),
        }
    }
}

/// Merged error for parsing failures
/// Returns a list of diagnostics for the user
#[derive(Debug, Diagnostic, Error)]
#[error("failed to parse alias file")]
#[diagnostic(severity(warning))]
pub struct ParseError {
    #[source_code]
    pub src: NamedSource<Arc<String>>,
    #[related]
    pub diagnostics: Vec<Error>,
}

/// Error for keys that are not part of the alias syntax
#[derive(Debug, Diagnostic, Error)]
#[error("unrecognized specifier \"{key}\" on line {line}")]
#[diagnostic(severity(error))]
pub struct UnrecognizedKey {
    #[label]
    pub at: SourceSpan,

    pub line: usize,

    pub key: String,

    #[help]
    pub advice: Option<String>,
}

/// Error for records lacking a mandatory key
#[derive(Debug, Diagnostic, Error)]
#[error("line {line} is missing \"{key}\" specifier")]
#[diagnostic(severity(error))]
pub struct MissingKey {
    #[label]
    pub at: SourceSpan,

    pub line: usize,

    pub key: &'static str,
}

/// Error for unknown device types
#[derive(Debug, Diagnostic, Error)]
#[error("line {line} has invalid \"devtype\" specifier ({value})")]
#[diagnostic(severity(error))]
pub struct InvalidDevtype {
    #[label]
    pub at: SourceSpan,

    pub line: usize,

    pub value: String,

    #[help]
    pub advice: Option<String>,
}

/// Error for numbers that do not parse or fit
#[derive(Debug, Diagnostic, Error)]
#[error("invalid number \"{value}\" on line {line}")]
#[diagnostic(severity(error))]
pub struct InvalidNumber {
    #[label]
    pub at: SourceSpan,

    pub line: usize,

    pub value: String,

    #[help]
    pub advice: Option<String>,
}

/// Error for a quoted value without its closing quote
#[derive(Debug, Diagnostic, Error)]
#[error("unterminated string on line {line}")]
#[diagnostic(severity(error))]
pub struct UnterminatedString {
    #[label]
    pub at: SourceSpan,

    pub line: usize,
}

/// Error for alias names that cannot live in the managed directory
#[derive(Debug, Diagnostic, Error)]
#[error("invalid alias name \"{name}\" on line {line}")]
#[diagnostic(severity(error))]
pub struct InvalidAlias {
    #[label]
    pub at: SourceSpan,

    pub line: usize,

    pub name: String,

    #[help]
    pub advice: Option<String>,
}
