//! Generic JSON predicate parser, the registry's catch-all.
//!
//! Any well-formed JSON document parses successfully here; the resulting
//! predicate carries the `text/json` type unless the statement parser
//! later overrides it with the statement's declared type.

use crate::errors::{Error, Result};

use super::{ParsedPredicate, Predicate, PredicateParser};
use crate::attestation::PredicateType;

/// Type URI assigned to predicates parsed as plain JSON.
pub const PREDICATE_TYPE: &str = "text/json";

/// The catch-all parser.
pub struct JsonParser;

impl PredicateParser for JsonParser {
    /// Always true: plain JSON can stand in for any predicate type.
    fn supports_type(&self, _types: &[PredicateType]) -> bool {
        true
    }

    fn parse(&self, data: &[u8]) -> Result<Predicate> {
        let parsed: serde_json::Value =
            serde_json::from_slice(data).map_err(|source| Error::Json {
                context: "parsing raw json data".to_string(),
                source,
            })?;
        Ok(Predicate {
            predicate_type: PREDICATE_TYPE.into(),
            data: data.to_vec(),
            parsed: ParsedPredicate::Json(parsed),
            origin: None,
            verification: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_any_well_formed_json() {
        let pred = JsonParser.parse(br#"{"a": [1, 2, 3]}"#).unwrap();
        assert_eq!(pred.predicate_type, PREDICATE_TYPE.into());
        assert_eq!(pred.data, br#"{"a": [1, 2, 3]}"#);
        match pred.parsed {
            ParsedPredicate::Json(v) => assert_eq!(v["a"][2], 3),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(JsonParser.parse(b"not json").is_err());
    }

    #[test]
    fn supports_every_type() {
        assert!(JsonParser.supports_type(&["https://example.com/anything".into()]));
    }
}
