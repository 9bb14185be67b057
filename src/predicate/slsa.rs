//! SLSA provenance predicate parser.
//!
//! Covers provenance v0.2 and v1.x. Serves as the vendor exemplar of the
//! registry contract: one parser instance per version URI, structural
//! detection via required fields, and the `NotCorrectFormat` fall-through
//! when the data is JSON but not provenance.

use serde::{Deserialize, Serialize};

use crate::attestation::PredicateType;
use crate::errors::{Error, Result};

use super::{ParsedPredicate, Predicate, PredicateParser};

/// SLSA provenance v0.2 type URI.
pub const PREDICATE_TYPE_V02: &str = "https://slsa.dev/provenance/v0.2";

/// SLSA provenance v1 type URI.
pub const PREDICATE_TYPE_V1: &str = "https://slsa.dev/provenance/v1";

/// SLSA provenance v1.1 type URI.
pub const PREDICATE_TYPE_V11: &str = "https://slsa.dev/provenance/v1.1";

/// Parsed provenance, either generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Provenance {
    /// v1 / v1.1 shape.
    V1(ProvenanceV1),
    /// v0.2 shape.
    V02(ProvenanceV02),
}

/// SLSA v0.2 provenance body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceV02 {
    /// Builder identity.
    #[serde(default)]
    pub builder: Builder,
    /// Build type URI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_type: String,
    /// Invocation record, kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<serde_json::Value>,
    /// Build metadata, kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Input materials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Material>,
}

/// SLSA v1 provenance body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceV1 {
    /// What was built and how.
    pub build_definition: BuildDefinition,
    /// Who built it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_details: Option<RunDetails>,
}

/// Builder identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Builder {
    /// Builder URI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// A v0.2 input material.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Material {
    /// Material URI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Material digests.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub digest: std::collections::BTreeMap<String, String>,
}

/// The v1 build definition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDefinition {
    /// Build type URI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_type: String,
    /// External parameters, kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_parameters: Option<serde_json::Value>,
    /// Internal parameters, kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_parameters: Option<serde_json::Value>,
    /// Resolved dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_dependencies: Vec<Material>,
}

/// The v1 run details.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    /// Builder identity.
    #[serde(default)]
    pub builder: Builder,
    /// Run metadata, kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Which provenance generation a parser instance handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Version {
    V02,
    V1,
    V11,
}

impl Version {
    fn type_uri(self) -> &'static str {
        match self {
            Self::V02 => PREDICATE_TYPE_V02,
            Self::V1 => PREDICATE_TYPE_V1,
            Self::V11 => PREDICATE_TYPE_V11,
        }
    }
}

/// Parser for one SLSA provenance version.
pub struct SlsaParser {
    version: Version,
}

impl SlsaParser {
    /// Parser for provenance v0.2.
    pub fn v02() -> Self {
        Self {
            version: Version::V02,
        }
    }

    /// Parser for provenance v1.
    pub fn v1() -> Self {
        Self { version: Version::V1 }
    }

    /// Parser for provenance v1.1.
    pub fn v11() -> Self {
        Self {
            version: Version::V11,
        }
    }
}

impl PredicateParser for SlsaParser {
    fn supports_type(&self, types: &[PredicateType]) -> bool {
        types.iter().any(|t| t.0 == self.version.type_uri())
    }

    fn parse(&self, data: &[u8]) -> Result<Predicate> {
        let parsed = match self.version {
            Version::V02 => {
                let prov: ProvenanceV02 =
                    serde_json::from_slice(data).map_err(|_| Error::NotCorrectFormat)?;
                // Arbitrary JSON deserializes into an all-default body;
                // require at least a builder id or a build type.
                if prov.builder.id.is_empty() && prov.build_type.is_empty() {
                    return Err(Error::NotCorrectFormat);
                }
                Provenance::V02(prov)
            }
            Version::V1 | Version::V11 => {
                let prov: ProvenanceV1 =
                    serde_json::from_slice(data).map_err(|_| Error::NotCorrectFormat)?;
                Provenance::V1(prov)
            }
        };

        Ok(Predicate {
            predicate_type: self.version.type_uri().into(),
            data: data.to_vec(),
            parsed: ParsedPredicate::SlsaProvenance(parsed),
            origin: None,
            verification: None,
        })
    }
}
