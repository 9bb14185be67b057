//! Sigstore bundle envelopes.
//!
//! The bundle is the protojson form of the Sigstore bundle spec (v0.1
//! through v0.3 media types). Decoding is strict: any unknown field at
//! any nesting level means the data is not a bundle
//! (`NotCorrectFormat`). protojson conventions apply -- 64-bit integers
//! travel as JSON strings and `bytes` fields as base64.
//!
//! Statement materialization is deferred: the parsed bundle holds the
//! nested DSSE payload and the statement is decoded on first access, then
//! memoized. [`parse`] forces materialization so a parse success always
//! implies a valid statement; envelopes deserialized elsewhere (the
//! GitHub attestation API returns naked bundles) materialize lazily.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attestation::ResourceDescriptor;
use crate::errors::{Error, Result};
use crate::hasher;
use crate::predicate::Predicate;
use crate::statement::{self, Statement};

use super::dsse::{decode_base64, INTOTO_PAYLOAD_TYPE};
use super::Envelope;

/// Media type of v0.3 bundles.
pub const MEDIA_TYPE_V03: &str = "application/vnd.dev.sigstore.bundle.v0.3+json";

/// Media type of v0.1 bundles.
pub const MEDIA_TYPE_V01: &str = "application/vnd.dev.sigstore.bundle+json;version=0.1";

/// The Sigstore bundle wire document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Bundle {
    /// Bundle media type.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    /// Certificates, tlog entries, and timestamps backing verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_material: Option<VerificationMaterial>,
    /// The enveloped statement (one of the two content arms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsse_envelope: Option<BundleDsseEnvelope>,
    /// Raw message signature (the other content arm).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_signature: Option<MessageSignature>,
}

/// The DSSE envelope nested inside a bundle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleDsseEnvelope {
    /// Base64 payload bytes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,
    /// Payload media type.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload_type: String,
    /// Signatures over the payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<BundleSignature>,
}

/// A signature entry of the nested DSSE envelope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleSignature {
    /// Base64 signature bytes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sig: String,
    /// Optional key hint.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyid: String,
}

/// Verification material carried by the bundle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerificationMaterial {
    /// Key hint arm of the content oneof.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKeyIdentifier>,
    /// Certificate chain arm of the content oneof.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x509_certificate_chain: Option<X509CertificateChain>,
    /// Single-certificate arm of the content oneof (v0.3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<X509Certificate>,
    /// Transparency log entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tlog_entries: Vec<TransparencyLogEntry>,
    /// RFC 3161 timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_verification_data: Option<TimestampVerificationData>,
}

/// Hint identifying a known public key.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PublicKeyIdentifier {
    /// Key hint.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hint: String,
}

/// An X.509 certificate chain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct X509CertificateChain {
    /// Chain certificates, leaf first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<X509Certificate>,
}

/// A single DER certificate, base64-encoded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct X509Certificate {
    /// Base64 DER bytes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_bytes: String,
}

/// A Rekor transparency log entry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransparencyLogEntry {
    /// Log index (protojson int64: a string).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_index: String,
    /// Log identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_id: Option<LogId>,
    /// Entry kind and version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind_version: Option<KindVersion>,
    /// Integration time (protojson int64: a string).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub integrated_time: String,
    /// Signed entry timestamp promise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion_promise: Option<InclusionPromise>,
    /// Merkle inclusion proof.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion_proof: Option<InclusionProof>,
    /// Canonicalized entry body, base64.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canonicalized_body: String,
}

/// Transparency log identifier.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogId {
    /// Log public key id, base64.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_id: String,
}

/// Rekor entry kind/version pair.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KindVersion {
    /// Entry kind (e.g. `intoto`, `dsse`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Entry schema version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Signed entry timestamp promise.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InclusionPromise {
    /// Signed entry timestamp, base64.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signed_entry_timestamp: String,
}

/// Merkle tree inclusion proof.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InclusionProof {
    /// Entry index (protojson int64: a string).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_index: String,
    /// Tree root hash, base64.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_hash: String,
    /// Tree size (protojson int64: a string).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tree_size: String,
    /// Proof hashes, base64.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<String>,
    /// Signed checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
}

/// Signed tree head checkpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Checkpoint {
    /// Checkpoint envelope text.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub envelope: String,
}

/// Timestamp verification data.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimestampVerificationData {
    /// RFC 3161 signed timestamps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rfc3161_timestamps: Vec<Rfc3161Timestamp>,
}

/// An RFC 3161 signed timestamp.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Rfc3161Timestamp {
    /// DER timestamp token, base64.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signed_timestamp: String,
}

/// Raw message signature content arm.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageSignature {
    /// Digest of the signed message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_digest: Option<MessageDigest>,
    /// Signature bytes, base64.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

/// Digest of a raw signed message.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageDigest {
    /// Digest algorithm name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub algorithm: String,
    /// Digest bytes, base64.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

/// A statement wrapped in a Sigstore bundle.
#[derive(Debug, Default)]
pub struct BundleEnvelope {
    /// The decoded bundle document.
    pub bundle: Bundle,
    statement: OnceLock<Statement>,
}

impl Clone for BundleEnvelope {
    fn clone(&self) -> Self {
        let statement = OnceLock::new();
        if let Some(s) = self.statement.get() {
            let _ = statement.set(s.clone());
        }
        Self {
            bundle: self.bundle.clone(),
            statement,
        }
    }
}

impl BundleEnvelope {
    /// Wraps an already-decoded bundle document.
    pub fn new(bundle: Bundle) -> Self {
        Self {
            bundle,
            statement: OnceLock::new(),
        }
    }

    /// The bundle media type.
    pub fn media_type(&self) -> &str {
        &self.bundle.media_type
    }

    /// Returns the statement, materializing and memoizing it on first
    /// access.
    ///
    /// # Errors
    ///
    /// Fails when the bundle has no DSSE envelope, the payload type is
    /// not an in-toto statement, or the payload does not parse.
    pub fn statement_or_err(&self) -> Result<&Statement> {
        if let Some(statement) = self.statement.get() {
            return Ok(statement);
        }

        let dsse = self.bundle.dsse_envelope.as_ref().ok_or_else(|| {
            Error::parse("bundle", "no dsse envelope found in bundle")
        })?;

        if dsse.payload_type != INTOTO_PAYLOAD_TYPE {
            return Err(Error::parse(
                "bundle",
                "payload is not an in-toto attestation",
            ));
        }

        let payload = decode_base64(&dsse.payload)?;
        let statement = statement::parse(&payload)
            .map_err(|e| e.in_repository("parsing bundled statement"))?;
        debug!("bundled predicate is of type {}", statement.predicate_type);

        Ok(self.statement.get_or_init(|| statement))
    }

    /// Returns the statement, or `None` when materialization fails.
    pub fn statement(&self) -> Option<&Statement> {
        match self.statement_or_err() {
            Ok(statement) => Some(statement),
            Err(err) => {
                debug!("bundle statement materialization failed: {err}");
                None
            }
        }
    }

    /// Mutable access to the predicate, materializing the statement
    /// first.
    pub(crate) fn predicate_mut(&mut self) -> Result<Option<&mut Predicate>> {
        self.statement_or_err()?;
        Ok(self.statement.get_mut().map(|s| &mut s.predicate))
    }

    /// Overwrites the predicate origin, materializing the statement
    /// first.
    pub fn set_origin(&mut self, origin: ResourceDescriptor) -> Result<()> {
        if let Some(predicate) = self.predicate_mut()? {
            predicate.origin = Some(origin);
        }
        Ok(())
    }

    /// Returns the signing certificate DER bytes: the single-certificate
    /// arm when present, otherwise the first chain certificate.
    pub fn certificate(&self) -> Option<Vec<u8>> {
        let material = self.bundle.verification_material.as_ref()?;
        let encoded = material
            .certificate
            .as_ref()
            .map(|c| c.raw_bytes.as_str())
            .or_else(|| {
                material
                    .x509_certificate_chain
                    .as_ref()
                    .and_then(|chain| chain.certificates.first())
                    .map(|c| c.raw_bytes.as_str())
            })?;
        decode_base64(encoded).ok()
    }

    /// Encodes the envelope back into its bundle wire JSON.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.bundle).map_err(|source| Error::Json {
            context: "encoding bundle".to_string(),
            source,
        })
    }
}

/// Parses Sigstore bundle bytes.
///
/// # Errors
///
/// Returns [`Error::NotCorrectFormat`] when the JSON does not decode as a
/// bundle (strict unknown-field handling makes mismatched documents fail
/// structurally). Statement materialization errors surface.
pub fn parse(data: &[u8]) -> Result<Vec<Envelope>> {
    let bundle: Bundle = match serde_json::from_slice(data) {
        Ok(bundle) => bundle,
        Err(_) => return Err(Error::NotCorrectFormat),
    };

    let mut envelope = BundleEnvelope::new(bundle);

    // Force materialization: a parse success implies a valid statement.
    envelope.statement_or_err()?;
    envelope.set_origin(hasher::hash_bytes(data))?;

    Ok(vec![Envelope::Bundle(envelope)])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PAYLOAD_B64: &str = "eyJfdHlwZSI6Imh0dHBzOi8vaW4tdG90by5pby9TdGF0ZW1lbnQvdjEiLCJzdWJqZWN0IjpbeyJuYW1lIjoiYXJ0aWZhY3QudGd6IiwiZGlnZXN0Ijp7InNoYTI1NiI6IjhjNjFiODdhNTA1NDc0MTA1ZGQyNTFmZTA1YWI0M2M4Mjc4Njc1ZjQ2NjdiZGUyNDVhZDg5OTkyYjkyNmY4ZjkifX1dLCJwcmVkaWNhdGVUeXBlIjoiaHR0cHM6Ly9zbHNhLmRldi9wcm92ZW5hbmNlL3YwLjIiLCJwcmVkaWNhdGUiOnsiYnVpbGRlciI6eyJpZCI6Imh0dHBzOi8vZ2l0aHViLmNvbS9hY3Rpb25zL3J1bm5lciJ9LCJidWlsZFR5cGUiOiJodHRwczovL2V4YW1wbGUuY29tL2J1aWxkQHYxIn19";

    fn bundle_json() -> String {
        format!(
            r#"{{"mediaType":"{MEDIA_TYPE_V01}","verificationMaterial":{{"x509CertificateChain":{{"certificates":[{{"rawBytes":"ZmFrZS1jZXJ0LWRlcg=="}}]}},"tlogEntries":[{{"logIndex":"12345","logId":{{"keyId":"a2V5aWQ="}},"kindVersion":{{"kind":"intoto","version":"0.0.2"}},"integratedTime":"1700000000","inclusionPromise":{{"signedEntryTimestamp":"ZmFrZS1zZXQ="}},"canonicalizedBody":"ZmFrZS1yZWtvci1ib2R5"}}]}},"dsseEnvelope":{{"payload":"{PAYLOAD_B64}","payloadType":"application/vnd.in-toto+json","signatures":[{{"sig":"ZmFrZS1zaWduYXR1cmUtYnl0ZXM="}}]}}}}"#
        )
    }

    #[test]
    fn parses_bundle_with_provenance() {
        let envelopes = parse(bundle_json().as_bytes()).unwrap();
        assert_eq!(envelopes.len(), 1);
        let Envelope::Bundle(env) = &envelopes[0] else {
            panic!("expected a bundle envelope");
        };
        assert_eq!(env.media_type(), MEDIA_TYPE_V01);
        let statement = env.statement().unwrap();
        assert_eq!(
            statement.predicate_type,
            "https://slsa.dev/provenance/v0.2".into()
        );
    }

    #[test]
    fn unknown_fields_mean_not_a_bundle() {
        let data = br#"{"mediaType": "x", "unexpectedField": 1}"#;
        let err = parse(data).unwrap_err();
        assert!(err.is_not_correct_format());
    }

    #[test]
    fn dsse_envelope_json_is_not_a_bundle() {
        let data = br#"{"payloadType": "application/vnd.in-toto+json", "payload": "e30=", "signatures": []}"#;
        let err = parse(data).unwrap_err();
        assert!(err.is_not_correct_format());
    }

    #[test]
    fn non_intoto_payload_type_is_an_error() {
        let data = format!(
            r#"{{"mediaType":"{MEDIA_TYPE_V03}","dsseEnvelope":{{"payload":"{PAYLOAD_B64}","payloadType":"application/json","signatures":[]}}}}"#
        );
        let err = parse(data.as_bytes()).unwrap_err();
        assert!(!err.is_not_correct_format());
        assert!(err.to_string().contains("not an in-toto attestation"));
    }

    #[test]
    fn exposes_leaf_certificate() {
        let envelopes = parse(bundle_json().as_bytes()).unwrap();
        assert_eq!(envelopes[0].certificate().unwrap(), b"fake-cert-der");
    }

    #[test]
    fn marshal_is_stable_after_round_trip() {
        let envelopes = parse(bundle_json().as_bytes()).unwrap();
        let first = envelopes[0].to_json_vec().unwrap();
        let reparsed = parse(&first).unwrap();
        let second = reparsed[0].to_json_vec().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn origin_digest_matches_input() {
        let data = bundle_json();
        let envelopes = parse(data.as_bytes()).unwrap();
        assert_eq!(
            envelopes[0]
                .origin()
                .unwrap()
                .digest
                .get(crate::hasher::ALGO_SHA256)
                .unwrap(),
            &crate::hasher::sha256_hex(data.as_bytes())
        );
    }
}
