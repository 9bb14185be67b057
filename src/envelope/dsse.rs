//! DSSE envelope parsing.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "payloadType": "application/vnd.in-toto+json",
//!   "payload": "<base64 statement>",
//!   "signatures": [{"keyid": "...", "sig": "<base64>"}]
//! }
//! ```
//!
//! Unknown top-level fields are ignored; the envelope is simple enough
//! that integrity is checked after decoding instead: an envelope with an
//! empty payload AND no signatures is not DSSE (`NotCorrectFormat`).

use base64::prelude::{Engine, BASE64_STANDARD, BASE64_URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::attestation::Signature;
use crate::errors::{Error, Result};
use crate::hasher;
use crate::statement::{self, Statement};

use super::Envelope;

/// Payload type for in-toto statements inside DSSE envelopes.
pub const INTOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireEnvelope {
    #[serde(rename = "payloadType", default, skip_serializing_if = "String::is_empty")]
    pub payload_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<WireSignature>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireSignature {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sig: String,
}

/// A DSSE-enveloped attestation.
#[derive(Clone, Debug)]
pub struct DsseEnvelope {
    /// The wire envelope exactly as received (for re-encoding).
    wire: WireEnvelope,
    /// Decoded payload bytes.
    pub payload: Vec<u8>,
    /// Decoded signatures.
    pub signatures: Vec<Signature>,
    /// The parsed payload statement.
    pub statement: Statement,
}

impl DsseEnvelope {
    /// The declared payload type.
    pub fn payload_type(&self) -> &str {
        &self.wire.payload_type
    }

    /// Encodes the envelope back into its wire JSON.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.wire).map_err(|source| Error::Json {
            context: "encoding dsse envelope".to_string(),
            source,
        })
    }
}

/// Decodes base64 that may arrive in standard or URL-safe alphabets
/// (protojson emitters differ).
pub(crate) fn decode_base64(data: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(data)
        .or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(data))
        .map_err(|err| Error::parse("base64 data", err.to_string()))
}

/// Parses a DSSE envelope.
///
/// # Errors
///
/// Returns [`Error::NotCorrectFormat`] when the JSON decodes but carries
/// neither a payload nor signatures. Malformed JSON and payload decode
/// failures surface as hard errors.
pub fn parse(data: &[u8]) -> Result<Vec<Envelope>> {
    let wire: WireEnvelope = serde_json::from_slice(data).map_err(|source| Error::Json {
        context: "unmarshalling dsse envelope".to_string(),
        source,
    })?;

    if wire.payload.is_empty() && wire.signatures.is_empty() {
        return Err(Error::NotCorrectFormat);
    }

    let payload = decode_base64(&wire.payload)?;

    let signatures = wire
        .signatures
        .iter()
        .map(|s| {
            Ok(Signature {
                keyid: s.keyid.clone(),
                signature: decode_base64(&s.sig)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut statement = statement::parse(&payload)
        .map_err(|e| e.in_repository("parsing the envelope payload"))?;

    statement.predicate.origin = Some(hasher::hash_bytes(data));

    Ok(vec![Envelope::Dsse(DsseEnvelope {
        wire,
        payload,
        signatures,
        statement,
    })])
}
