//! Line-delimited JSON attestation bundles.
//!
//! A JSONL bundle holds one JSON document per line. There is no reliable
//! way to sniff the format from the data, so this parser is only invoked
//! when the caller asserts the format (the `.jsonl` file extension, the
//! git-notes blob layout, an HTTP driver option).
//!
//! Resilience contract: blank lines are skipped, and a line that is not
//! valid JSON is skipped with a debug log -- one bad line never fails the
//! bundle. A line that is valid JSON but fails envelope parsing is a real
//! error and aborts.

use tracing::debug;

use crate::errors::{Error, Result};

use super::Envelope;

/// Iterates the lines of a JSONL document, yielding `(line_index, line)`
/// for every line that holds a valid JSON document. Blank and non-JSON
/// lines are skipped (the latter with a debug log). Indexes count all
/// lines, including skipped ones.
pub fn valid_lines(data: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    data.split(|b| *b == b'\n').enumerate().filter(|(i, line)| {
        let trimmed = trim_ascii(line);
        if trimmed.is_empty() {
            return false;
        }
        if serde_json::from_slice::<serde::de::IgnoredAny>(trimmed).is_err() {
            debug!("skipping jsonl line {i}: not valid JSON");
            return false;
        }
        true
    })
}

fn trim_ascii(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &line[start..end]
}

/// Parses a JSONL bundle, tagging each envelope with the index of the
/// line it came from. Each valid line re-enters the top-level envelope
/// parser, so lines may hold DSSE envelopes, bundles, or bare
/// statements.
pub fn parse_indexed(data: &[u8]) -> Result<Vec<(usize, Envelope)>> {
    let mut ret = Vec::new();
    for (i, line) in valid_lines(data) {
        let envelopes = super::parse(line).map_err(|e| {
            Error::parse(
                format!("attestation in jsonl line {i}"),
                e.to_string(),
            )
        })?;
        ret.extend(envelopes.into_iter().map(|env| (i, env)));
    }
    Ok(ret)
}

/// Parses a JSONL bundle, discarding line indexes.
pub fn parse(data: &[u8]) -> Result<Vec<Envelope>> {
    Ok(parse_indexed(data)?.into_iter().map(|(_, env)| env).collect())
}

/// Validates that data is line-delimited JSON: every non-blank line must
/// parse as a JSON document. Used by storers before appending to an
/// existing bundle.
pub fn validate(data: &[u8]) -> Result<()> {
    for (i, line) in data.split(|b| *b == b'\n').enumerate() {
        let trimmed = trim_ascii(line);
        if trimmed.is_empty() {
            continue;
        }
        if let Err(err) = serde_json::from_slice::<serde::de::IgnoredAny>(trimmed) {
            return Err(Error::parse(
                format!("jsonl line {}", i + 1),
                format!("not valid JSON: {err}"),
            ));
        }
    }
    Ok(())
}
