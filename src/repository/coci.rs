//! Cosign OCI attachment collector.
//!
//! Cosign attaches attestations to container images under the tag
//! `sha256-<digest>.att` in the same repository (the `:` of the digest
//! is replaced with `-`). The attachment manifest carries one DSSE
//! envelope per layer, with the signing certificate and transparency-log
//! data in layer annotations. For details about the storage format see
//! cosign's documentation:
//! <https://github.com/sigstore/cosign/blob/main/specs/SIGNATURE_SPEC.md#storage>
//!
//! The collector synthesizes a v0.3 Sigstore bundle per layer so the
//! downstream verification path sees the same shape it gets from bundle
//! files.

use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use oci_client::{
    client::ClientConfig, manifest::OciDescriptor, secrets::RegistryAuth, Client, Reference,
};
use tracing::debug;

use crate::attestation::FetchOptions;
use crate::envelope::bundle::{
    Bundle, BundleDsseEnvelope, BundleEnvelope, BundleSignature, InclusionPromise, KindVersion,
    LogId, Rfc3161Timestamp, TimestampVerificationData, TransparencyLogEntry,
    VerificationMaterial, X509Certificate, X509CertificateChain, MEDIA_TYPE_V03,
};
use crate::envelope::dsse::decode_base64;
use crate::envelope::Envelope;
use crate::errors::{Error, Result};
use crate::hasher;

use super::{Capabilities, Repository};

/// Scheme tag for this driver.
pub const TYPE_MONIKER: &str = "coci";

/// Media type of DSSE envelope layers in attestation manifests.
pub const DSSE_LAYER_MEDIA_TYPE: &str = "application/vnd.dsse.envelope.v1+json";

/// Layer annotation holding the signing certificate (PEM).
pub const CERTIFICATE_ANNOTATION: &str = "dev.sigstore.cosign/certificate";

/// Layer annotation holding the cosign transparency-log bundle.
pub const BUNDLE_ANNOTATION: &str = "dev.sigstore.cosign/bundle";

/// Layer annotation holding the RFC 3161 timestamp.
pub const RFC3161_ANNOTATION: &str = "dev.sigstore.cosign/rfc3161timestamp";

/// Factory building the driver from an image reference init string.
pub fn build(init: &str) -> Result<Arc<dyn Repository>> {
    Ok(Arc::new(CociCollector::new(init)?))
}

/// Collects cosign-attached attestations for a container image.
pub struct CociCollector {
    reference: Reference,
    client: Client,
}

impl CociCollector {
    /// Creates a collector for an image reference
    /// (`registry/repository:tag-or-digest`).
    pub fn new(reference: &str) -> Result<Self> {
        let reference: Reference = reference.parse().map_err(|err| {
            Error::InvalidLocator(format!("parsing image reference {reference:?}: {err}"))
        })?;
        Ok(Self {
            reference,
            client: Client::new(ClientConfig::default()),
        })
    }

    /// Resolves the image digest, asking the registry when the reference
    /// is a tag.
    async fn resolve_digest(&self, auth: &RegistryAuth) -> Result<String> {
        if let Some(digest) = self.reference.digest() {
            return Ok(digest.to_string());
        }
        self.client
            .fetch_manifest_digest(&self.reference, auth)
            .await
            .map_err(|err| Error::Oci {
                context: format!("getting digest for {}", self.reference),
                message: err.to_string(),
            })
    }

    /// The `.att` attachment reference for an image digest.
    fn attachment_reference(&self, digest: &str) -> Reference {
        Reference::with_tag(
            self.reference.registry().to_string(),
            self.reference.repository().to_string(),
            format!("{}.att", digest.replace(':', "-")),
        )
    }

    /// Builds a bundle envelope from one attestation layer.
    async fn attestation_from_layer(
        &self,
        auth: &RegistryAuth,
        att_ref: &Reference,
        layer: &OciDescriptor,
    ) -> Result<Envelope> {
        let mut blob: Vec<u8> = Vec::new();
        self.client
            .pull_blob(att_ref, layer, &mut blob)
            .await
            .map_err(|err| Error::Oci {
                context: format!("pulling layer {}", layer.digest),
                message: err.to_string(),
            })?;

        let dsse: crate::envelope::dsse::WireEnvelope = serde_json::from_slice(&blob)
            .map_err(|source| Error::Json {
                context: "unmarshaling dsse envelope from layer".to_string(),
                source,
            })?;

        let material = verification_material(layer)?;

        let bundle = Bundle {
            media_type: MEDIA_TYPE_V03.to_string(),
            verification_material: Some(material),
            dsse_envelope: Some(BundleDsseEnvelope {
                payload: dsse.payload.clone(),
                payload_type: dsse.payload_type.clone(),
                signatures: dsse
                    .signatures
                    .iter()
                    .map(|s| BundleSignature {
                        sig: s.sig.clone(),
                        keyid: s.keyid.clone(),
                    })
                    .collect(),
            }),
            message_signature: None,
        };

        let mut envelope = BundleEnvelope::new(bundle);
        envelope.statement_or_err()?;

        // The origin digest is the hash of the signed payload, the URI
        // points at the attachment layer.
        let payload = decode_base64(&dsse.payload)?;
        let mut origin = hasher::hash_bytes(&payload);
        origin.uri = format!(
            "oci:{}/{}:{}.att",
            self.reference.registry(),
            self.reference.repository(),
            layer.digest.replace(':', "-"),
        );
        envelope.set_origin(origin)?;

        Ok(Envelope::Bundle(envelope))
    }
}

/// Extracts the certificate chain, tlog entries, and timestamps from the
/// layer annotations.
fn verification_material(layer: &OciDescriptor) -> Result<VerificationMaterial> {
    let cert_pem = layer
        .annotations
        .as_ref()
        .and_then(|a| a.get(CERTIFICATE_ANNOTATION))
        .ok_or_else(|| Error::parse("oci layer", "certificate not found in layer data"))?;

    let der = pem_to_der(cert_pem)?;

    Ok(VerificationMaterial {
        public_key: None,
        x509_certificate_chain: Some(X509CertificateChain {
            certificates: vec![X509Certificate {
                raw_bytes: BASE64_STANDARD.encode(der),
            }],
        }),
        certificate: None,
        tlog_entries: tlog_entries(layer)?,
        timestamp_verification_data: timestamp_entries(layer)?,
    })
}

/// Decodes the body of a PEM block. Returns an error when no base64
/// payload is found between the armor lines.
fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----") && !line.trim().is_empty())
        .collect();
    if body.is_empty() {
        return Err(Error::parse("oci layer", "failed to decode PEM block"));
    }
    decode_base64(&body)
}

/// Parses the cosign bundle annotation into a transparency log entry.
/// A missing annotation or an incomplete payload yields no entries.
fn tlog_entries(layer: &OciDescriptor) -> Result<Vec<TransparencyLogEntry>> {
    let Some(raw) = layer
        .annotations
        .as_ref()
        .and_then(|a| a.get(BUNDLE_ANNOTATION))
    else {
        return Ok(Vec::new());
    };

    let value: serde_json::Value = serde_json::from_slice(raw.as_bytes()).map_err(|source| {
        Error::Json {
            context: "parsing cosign bundle annotation".to_string(),
            source,
        }
    })?;

    let (Some(payload), Some(set)) = (
        value.get("Payload"),
        value.get("SignedEntryTimestamp").and_then(|v| v.as_str()),
    ) else {
        return Ok(Vec::new());
    };

    // Validate the signed entry timestamp encoding.
    decode_base64(set)?;

    let log_index = payload
        .get("logIndex")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| Error::parse("cosign bundle annotation", "error getting logIndex"))?;
    let log_id_hex = payload
        .get("logID")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::parse("cosign bundle annotation", "error getting logID"))?;
    let log_id = hex::decode(log_id_hex)
        .map_err(|err| Error::parse("cosign bundle annotation", format!("decoding logID: {err}")))?;
    let integrated_time = payload
        .get("integratedTime")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| Error::parse("cosign bundle annotation", "error getting integratedTime"))?;
    let body_b64 = payload
        .get("body")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::parse("cosign bundle annotation", "error getting body"))?;
    let body = decode_base64(body_b64)?;

    // The rekor entry kind and version live in the canonicalized body.
    let body_json: serde_json::Value =
        serde_json::from_slice(&body).map_err(|source| Error::Json {
            context: "parsing rekor entry body".to_string(),
            source,
        })?;
    let kind = body_json
        .get("kind")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let version = body_json
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(vec![TransparencyLogEntry {
        log_index: log_index.to_string(),
        log_id: Some(LogId {
            key_id: BASE64_STANDARD.encode(log_id),
        }),
        kind_version: Some(KindVersion { kind, version }),
        integrated_time: integrated_time.to_string(),
        inclusion_promise: Some(InclusionPromise {
            signed_entry_timestamp: set.to_string(),
        }),
        inclusion_proof: None,
        canonicalized_body: body_b64.to_string(),
    }])
}

/// Parses the RFC 3161 timestamp annotation. A missing annotation yields
/// no timestamp data.
fn timestamp_entries(layer: &OciDescriptor) -> Result<Option<TimestampVerificationData>> {
    let Some(raw) = layer
        .annotations
        .as_ref()
        .and_then(|a| a.get(RFC3161_ANNOTATION))
    else {
        return Ok(None);
    };

    let value: serde_json::Value = serde_json::from_slice(raw.as_bytes()).map_err(|source| {
        Error::Json {
            context: "parsing rfc3161 timestamp annotation".to_string(),
            source,
        }
    })?;
    let Some(ts) = value.get("SignedRFC3161Timestamp").and_then(|v| v.as_str()) else {
        return Err(Error::parse(
            "rfc3161 timestamp annotation",
            "error getting SignedRFC3161Timestamp",
        ));
    };
    decode_base64(ts)?;

    Ok(Some(TimestampVerificationData {
        rfc3161_timestamps: vec![Rfc3161Timestamp {
            signed_timestamp: ts.to_string(),
        }],
    }))
}

#[async_trait]
impl Repository for CociCollector {
    fn moniker(&self) -> &'static str {
        TYPE_MONIKER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            fetch: true,
            fetch_by_subject: false,
            fetch_by_predicate_type: false,
            store: false,
        }
    }

    async fn fetch(&self, _opts: &FetchOptions) -> Result<Vec<Envelope>> {
        let auth = RegistryAuth::Anonymous;
        let digest = self.resolve_digest(&auth).await?;
        let att_ref = self.attachment_reference(&digest);

        let (manifest, _manifest_digest) = self
            .client
            .pull_image_manifest(&att_ref, &auth)
            .await
            .map_err(|err| Error::Oci {
                context: format!("fetching attestations manifest {att_ref}"),
                message: err.to_string(),
            })?;

        let mut ret = Vec::new();
        for layer in &manifest.layers {
            if layer.media_type != DSSE_LAYER_MEDIA_TYPE {
                debug!("skipping layer with media type {}", layer.media_type);
                continue;
            }
            let envelope = self
                .attestation_from_layer(&auth, &att_ref, layer)
                .await
                .map_err(|e| e.in_repository("coci: generating bundle from layer"))?;
            ret.push(envelope);
        }
        Ok(ret)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn layer_with_annotations(pairs: &[(&str, &str)]) -> OciDescriptor {
        OciDescriptor {
            media_type: DSSE_LAYER_MEDIA_TYPE.to_string(),
            digest: "sha256:aaaa".to_string(),
            annotations: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    const CERT_PEM: &str =
        "-----BEGIN CERTIFICATE-----\nZmFrZS1jZXJ0LWRlcg==\n-----END CERTIFICATE-----\n";

    #[test]
    fn attachment_tag_replaces_digest_colon() {
        let collector = CociCollector::new("registry.example.com/org/image:v1").unwrap();
        let reference = collector.attachment_reference("sha256:abcdef");
        assert_eq!(reference.tag(), Some("sha256-abcdef.att"));
        assert_eq!(reference.repository(), "org/image");
    }

    #[test]
    fn pem_decoding_strips_armor() {
        assert_eq!(pem_to_der(CERT_PEM).unwrap(), b"fake-cert-der");
        assert!(pem_to_der("no armor here").is_err() || pem_to_der("").is_err());
    }

    #[test]
    fn missing_certificate_annotation_is_an_error() {
        let layer = layer_with_annotations(&[]);
        let err = verification_material(&layer).unwrap_err();
        assert!(err.to_string().contains("certificate not found"));
    }

    #[test]
    fn tlog_entry_synthesis() {
        let bundle_annotation = r#"{"SignedEntryTimestamp":"ZmFrZS1zZXQ=","Payload":{"logIndex":12345,"logID":"abcd","integratedTime":1700000000,"body":"eyJraW5kIjoiaW50b3RvIiwiYXBpVmVyc2lvbiI6IjAuMC4yIn0="}}"#;
        let layer = layer_with_annotations(&[
            (CERTIFICATE_ANNOTATION, CERT_PEM),
            (BUNDLE_ANNOTATION, bundle_annotation),
        ]);
        let material = verification_material(&layer).unwrap();
        let entries = material.tlog_entries;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].log_index, "12345");
        assert_eq!(entries[0].integrated_time, "1700000000");
        let kv = entries[0].kind_version.as_ref().unwrap();
        assert_eq!(kv.kind, "intoto");
        assert_eq!(kv.version, "0.0.2");
    }

    #[test]
    fn incomplete_bundle_annotation_yields_no_entries() {
        let layer = layer_with_annotations(&[
            (CERTIFICATE_ANNOTATION, CERT_PEM),
            (BUNDLE_ANNOTATION, r#"{"SomethingElse": 1}"#),
        ]);
        let material = verification_material(&layer).unwrap();
        assert!(material.tlog_entries.is_empty());
    }

    #[test]
    fn rfc3161_annotation_is_optional() {
        let layer = layer_with_annotations(&[(CERTIFICATE_ANNOTATION, CERT_PEM)]);
        let material = verification_material(&layer).unwrap();
        assert!(material.timestamp_verification_data.is_none());

        let with_ts = layer_with_annotations(&[
            (CERTIFICATE_ANNOTATION, CERT_PEM),
            (RFC3161_ANNOTATION, r#"{"SignedRFC3161Timestamp":"ZmFrZS1zZXQ="}"#),
        ]);
        let material = verification_material(&with_ts).unwrap();
        let data = material.timestamp_verification_data.unwrap();
        assert_eq!(data.rfc3161_timestamps.len(), 1);
    }
}
