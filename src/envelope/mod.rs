//! Envelope model and the format-sniffing parser pipeline.
//!
//! An envelope is the outer container of an attestation as a backend
//! delivers it. Three variants exist, differing in signature semantics and
//! auxiliary data, so the type is a sum rather than a hierarchy:
//!
//! | Variant | Wire format | Signatures |
//! |---------|-------------|------------|
//! | [`Dsse`](Envelope::Dsse) | DSSE envelope | keyid + raw signature list |
//! | [`Bundle`](Envelope::Bundle) | Sigstore bundle (protojson) | verification material |
//! | [`Bare`](Envelope::Bare) | plain JSON statement | none (unsigned) |
//!
//! [`parse`] sniffs raw bytes in fixed order: DSSE, Sigstore bundle, then
//! bare JSON. A parser that finds its structural preconditions unmet
//! returns the `NotCorrectFormat` sentinel and the sniffer moves on; any
//! other error surfaces immediately. JSONL bundles are never
//! auto-detected: callers that know they hold line-delimited data use
//! [`jsonl::parse`] explicitly.
//!
//! Every successful parse content-addresses its input: the predicate
//! origin carries the sha256 of the exact bytes consumed. Drivers may
//! overwrite the origin with a richer source record (`oci:...`,
//! `jsonl:<path>#<line>`) via [`Envelope::set_origin`].

pub mod bare;
pub mod bundle;
pub mod dsse;
pub mod jsonl;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::attestation::{ResourceDescriptor, Signature, Verification};
use crate::errors::{Error, Result};
use crate::predicate::Predicate;
use crate::statement::Statement;

pub use bare::BareEnvelope;
pub use bundle::BundleEnvelope;
pub use dsse::DsseEnvelope;

/// Envelope wire formats known to the sniffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// DSSE envelope.
    Dsse,
    /// Sigstore bundle.
    Bundle,
    /// Line-delimited JSON bundle (explicit only).
    Jsonl,
    /// Bare JSON statement.
    Bare,
}

/// A single attestation as delivered by a backend.
#[derive(Clone, Debug)]
pub enum Envelope {
    /// An unsigned statement.
    Bare(BareEnvelope),
    /// A DSSE-enveloped statement.
    Dsse(DsseEnvelope),
    /// A statement inside a Sigstore bundle.
    Bundle(BundleEnvelope),
}

impl Envelope {
    /// Returns the wire format of this envelope.
    pub fn format(&self) -> Format {
        match self {
            Self::Bare(_) => Format::Bare,
            Self::Dsse(_) => Format::Dsse,
            Self::Bundle(_) => Format::Bundle,
        }
    }

    /// Returns the parsed statement. For bundles the statement is
    /// materialized on first access and memoized; a materialization
    /// failure reads as "no statement".
    pub fn statement(&self) -> Option<&Statement> {
        match self {
            Self::Bare(env) => env.statement.as_ref(),
            Self::Dsse(env) => Some(&env.statement),
            Self::Bundle(env) => env.statement(),
        }
    }

    /// Returns the statement's predicate, if a statement is present.
    pub fn predicate(&self) -> Option<&Predicate> {
        self.statement().map(|s| &s.predicate)
    }

    /// Returns the envelope signatures. Bare envelopes are unsigned and
    /// bundles carry their material in the verification data instead, so
    /// both return an empty list.
    pub fn signatures(&self) -> &[Signature] {
        match self {
            Self::Dsse(env) => &env.signatures,
            Self::Bare(_) | Self::Bundle(_) => &[],
        }
    }

    /// Returns the signing certificate (DER) when the envelope carries
    /// one (Sigstore bundles only).
    pub fn certificate(&self) -> Option<Vec<u8>> {
        match self {
            Self::Bundle(env) => env.certificate(),
            Self::Bare(_) | Self::Dsse(_) => None,
        }
    }

    /// Returns the verification recorded on the predicate, if any.
    pub fn verification(&self) -> Option<&Verification> {
        self.predicate().and_then(|p| p.verification.as_ref())
    }

    /// Returns the provenance record of the bytes this envelope was
    /// parsed from.
    pub fn origin(&self) -> Option<&ResourceDescriptor> {
        self.predicate().and_then(|p| p.origin.as_ref())
    }

    /// Overwrites the predicate origin. Drivers use this to replace the
    /// parser's digest-only record with a source URI.
    pub fn set_origin(&mut self, origin: ResourceDescriptor) -> Result<()> {
        match self {
            Self::Bare(env) => {
                if let Some(statement) = env.statement.as_mut() {
                    statement.predicate.origin = Some(origin);
                }
                Ok(())
            }
            Self::Dsse(env) => {
                env.statement.predicate.origin = Some(origin);
                Ok(())
            }
            Self::Bundle(env) => env.set_origin(origin),
        }
    }

    /// Records a verification result on the predicate. Fails when the
    /// envelope has no predicate to attach it to.
    pub fn set_verification(&mut self, verification: Verification) -> Result<()> {
        let predicate = match self {
            Self::Bare(env) => env
                .statement
                .as_mut()
                .map(|s| &mut s.predicate),
            Self::Dsse(env) => Some(&mut env.statement.predicate),
            Self::Bundle(env) => env.predicate_mut()?,
        };
        match predicate {
            Some(p) => {
                p.verification = Some(verification);
                Ok(())
            }
            None => Err(Error::parse(
                "envelope",
                "unable to set verification, envelope has no predicate",
            )),
        }
    }

    /// Encodes the envelope back into its wire JSON value.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        match self {
            Self::Bare(env) => env.to_json_value(),
            Self::Dsse(env) => env.to_json_value(),
            Self::Bundle(env) => env.to_json_value(),
        }
    }

    /// Encodes the envelope into compact wire JSON bytes (one JSONL line).
    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_json_value()?).map_err(|source| Error::Json {
            context: "encoding envelope".to_string(),
            source,
        })
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let value = self
            .to_json_value()
            .map_err(<S::Error as serde::ser::Error>::custom)?;
        value.serialize(serializer)
    }
}

/// Parses raw bytes into envelopes, sniffing the format.
///
/// Sniff order is fixed: DSSE, Sigstore bundle, bare JSON statement. The
/// `NotCorrectFormat` sentinel falls through to the next format; any
/// other error aborts. On success every envelope's predicate origin holds
/// the sha256 of `data`.
pub fn parse(data: &[u8]) -> Result<Vec<Envelope>> {
    type ParserFn = fn(&[u8]) -> Result<Vec<Envelope>>;
    const SNIFF_ORDER: &[(Format, ParserFn)] =
        &[(Format::Dsse, dsse::parse), (Format::Bundle, bundle::parse)];

    for (format, parser) in SNIFF_ORDER {
        match parser(data) {
            Ok(envelopes) => {
                debug!("found envelope type: {format:?}");
                return Ok(envelopes);
            }
            Err(err) if err.is_not_correct_format() => continue,
            Err(err) => return Err(err),
        }
    }

    debug!("parsing data as bare JSON statement");
    bare::parse(data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hasher;

    const STATEMENT: &str = r#"{"_type":"https://in-toto.io/Statement/v1","subject":[{"name":"artifact.tgz","digest":{"sha256":"8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9"}}],"predicateType":"https://slsa.dev/provenance/v0.2","predicate":{"builder":{"id":"https://github.com/actions/runner"},"buildType":"https://example.com/build@v1"}}"#;

    #[test]
    fn sniffs_bare_statement() {
        let envelopes = parse(STATEMENT.as_bytes()).unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].format(), Format::Bare);
        let statement = envelopes[0].statement().unwrap();
        assert_eq!(
            statement.predicate_type,
            "https://slsa.dev/provenance/v0.2".into()
        );
    }

    #[test]
    fn parse_records_source_digest() {
        let envelopes = parse(STATEMENT.as_bytes()).unwrap();
        let origin = envelopes[0].origin().unwrap();
        assert_eq!(
            origin.digest.get(hasher::ALGO_SHA256).unwrap(),
            &hasher::sha256_hex(STATEMENT.as_bytes())
        );
    }

    #[test]
    fn driver_origin_overwrite_wins() {
        let mut envelopes = parse(STATEMENT.as_bytes()).unwrap();
        let rd = ResourceDescriptor::new()
            .with_uri("jsonl:/tmp/bundle.jsonl#0")
            .with_digest("sha256", "aaaa");
        envelopes[0].set_origin(rd).unwrap();
        assert_eq!(
            envelopes[0].origin().unwrap().uri,
            "jsonl:/tmp/bundle.jsonl#0"
        );
    }

    #[test]
    fn non_json_surfaces_an_error() {
        assert!(parse(b"definitely not json").is_err());
    }

    #[test]
    fn envelope_serializes_to_wire_json() {
        let envelopes = parse(STATEMENT.as_bytes()).unwrap();
        let line = envelopes[0].to_json_vec().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["_type"], "https://in-toto.io/Statement/v1");
        assert_eq!(value["predicateType"], "https://slsa.dev/provenance/v0.2");
    }
}
