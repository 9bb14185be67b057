//! Statement model and the statement parser dispatch.
//!
//! A statement is the body of an attestation: an ordered subject list, a
//! predicate type URI, and the typed predicate. The only wire format
//! implemented today is the in-toto v1 statement; the dispatch here keeps
//! the same fall-through shape as the envelope and predicate registries so
//! additional statement formats slot in without touching callers.

pub mod intoto;

pub use intoto::Statement;

use tracing::debug;

use crate::errors::{Error, Result};

/// Attempts to parse statement bytes with the known statement formats.
///
/// Returns [`Error::NotCorrectFormat`] when the bytes are valid JSON but
/// not a statement in any known format, so envelope parsers can fall
/// through to their own synthesis paths.
pub fn parse(data: &[u8]) -> Result<Statement> {
    if data.is_empty() {
        return Err(Error::parse(
            "statement",
            "empty statement data when attempting to parse",
        ));
    }

    let statement = intoto::parse(data)?;
    debug!("statement parsed as in-toto v1");
    Ok(statement)
}
