//! Error types for the attestation collector.
//!
//! All fallible operations in this crate return [`Error`]. The enum carries
//! two kinds of variants: typed sentinels that callers pattern-match on to
//! drive control flow, and wrapping variants that preserve the underlying
//! transport or parse failure as a `source()`.
//!
//! The most important sentinel is [`Error::NotCorrectFormat`]: every parser
//! in the envelope, statement, and predicate registries returns it when the
//! input's structural preconditions fail. Registries treat it as a
//! fall-through signal and try the next parser; any other error aborts the
//! registry. Match on the variant, never on the message text.

use std::fmt;

/// Errors produced by collector operations.
#[derive(Debug)]
pub enum Error {
    /// The bytes are not in the format this parser expects. Registries use
    /// this as a fall-through signal to try the next candidate parser.
    NotCorrectFormat,

    /// No configured repository implements a fetch capability.
    NoFetcherConfigured,

    /// No configured repository implements the store capability.
    NoStorerConfigured,

    /// The repository driver intentionally does not implement the invoked
    /// method. The agent classifies drivers by capability before calling,
    /// so this is only observable by direct callers.
    FetcherMethodNotImplemented,

    /// A factory or parser was already registered under the same tag.
    TypeAlreadyRegistered,

    /// The repository init string names an unknown driver tag.
    UnknownRepositoryType(String),

    /// No predicate parser accepted the data and the generic JSON fallback
    /// was disabled.
    UnknownPredicateType,

    /// A repository locator string could not be parsed.
    InvalidLocator(String),

    /// JSON (de)serialization failure, with the phase that produced it.
    Json {
        /// What was being (de)serialized.
        context: String,
        /// The underlying serde error.
        source: serde_json::Error,
    },

    /// Filesystem I/O failure.
    Io {
        /// The path or operation that failed.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// HTTP transport failure.
    Http {
        /// The request that failed.
        context: String,
        /// The underlying client error.
        source: reqwest::Error,
    },

    /// Git transport or object-store failure.
    Git {
        /// The repository operation that failed.
        context: String,
        /// The underlying libgit2 error.
        source: git2::Error,
    },

    /// Container-registry transport failure.
    Oci {
        /// The registry operation that failed.
        context: String,
        /// The distribution client error, stringified.
        message: String,
    },

    /// Structural parse failure that is not a format mismatch (for example
    /// a DSSE payload that is not valid base64).
    Parse {
        /// File, line, or field context for the failure.
        context: String,
        /// Human-readable reason.
        message: String,
    },

    /// A driver operation failed; carries the driver tag and phase.
    Repository {
        /// Driver moniker and phase, e.g. `"note: fetching bundle"`.
        context: String,
        /// The wrapped cause.
        source: Box<Error>,
    },

    /// Several accumulated errors, surfaced together (registry dispatch,
    /// bulk registration).
    Joined(Vec<Error>),
}

impl Error {
    /// Wraps `self` with a driver tag and phase description.
    pub(crate) fn in_repository(self, context: impl Into<String>) -> Self {
        Self::Repository {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Convenience constructor for [`Error::Parse`].
    pub(crate) fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error is the format fall-through sentinel,
    /// looking through repository wrapping.
    pub fn is_not_correct_format(&self) -> bool {
        match self {
            Self::NotCorrectFormat => true,
            Self::Repository { source, .. } => source.is_not_correct_format(),
            _ => false,
        }
    }

    /// Joins a list of errors into one. Returns `None` when the list is
    /// empty, the single error when there is exactly one.
    pub fn join(mut errs: Vec<Error>) -> Option<Error> {
        match errs.len() {
            0 => None,
            1 => Some(errs.remove(0)),
            _ => Some(Error::Joined(errs)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCorrectFormat => write!(f, "data is not in the expected format"),
            Self::NoFetcherConfigured => {
                write!(f, "no repository with fetch capabilities configured")
            }
            Self::NoStorerConfigured => {
                write!(f, "no repository with store capabilities configured")
            }
            Self::FetcherMethodNotImplemented => {
                write!(f, "method not implemented by repository driver")
            }
            Self::TypeAlreadyRegistered => write!(f, "type already registered"),
            Self::UnknownRepositoryType(t) => write!(f, "repository type unknown: {t:?}"),
            Self::UnknownPredicateType => write!(f, "unknown predicate type"),
            Self::InvalidLocator(msg) => write!(f, "invalid repository locator: {msg}"),
            Self::Json { context, source } => write!(f, "{context}: {source}"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Http { context, source } => write!(f, "{context}: {source}"),
            Self::Git { context, source } => write!(f, "{context}: {source}"),
            Self::Oci { context, message } => write!(f, "{context}: {message}"),
            Self::Parse { context, message } => write!(f, "parsing {context}: {message}"),
            Self::Repository { context, source } => write!(f, "{context}: {source}"),
            Self::Joined(errs) => {
                let msgs: Vec<String> = errs.iter().map(ToString::to_string).collect();
                write!(f, "{}", msgs.join("; "))
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::Http { source, .. } => Some(source),
            Self::Git { source, .. } => Some(source),
            Self::Repository { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
