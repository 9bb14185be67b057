//! Predicate model and the predicate parser registry.
//!
//! A predicate is the typed payload of a statement. The registry maps
//! predicate-type URIs to parsers; the statement parser narrows the
//! candidate set with a type hint extracted from the statement, and falls
//! back to the generic JSON parser when no typed parser accepts the data.
//!
//! Parsers are registered once at process start via [`registry`]; the
//! registry is append-only afterwards. Registering a type twice returns
//! [`Error::TypeAlreadyRegistered`], which bulk registration ignores.

pub mod json;
pub mod slsa;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::attestation::{PredicateType, ResourceDescriptor, Verification};
use crate::errors::{Error, Result};

/// The parsed, variant-typed form of a predicate.
#[derive(Clone, Debug)]
pub enum ParsedPredicate {
    /// Generic JSON document (the catch-all).
    Json(serde_json::Value),
    /// SLSA provenance, any supported version.
    SlsaProvenance(slsa::Provenance),
}

/// The typed payload of a statement.
///
/// `predicate_type` and `data` are always present after parse; `parsed`
/// holds the type-specific structure when a registered parser accepted the
/// data, and the generic JSON document otherwise. `origin` and
/// `verification` are bound late: the envelope parser records the source
/// digest, drivers may overwrite it with a source URI, and the external
/// verification engine fills `verification`.
#[derive(Clone, Debug)]
pub struct Predicate {
    /// Predicate type URI.
    pub predicate_type: PredicateType,
    /// Raw predicate bytes exactly as received.
    pub data: Vec<u8>,
    /// Typed parse result.
    pub parsed: ParsedPredicate,
    /// Provenance of the bytes the envelope came from.
    pub origin: Option<ResourceDescriptor>,
    /// Populated by signature verification.
    pub verification: Option<Verification>,
}

impl Predicate {
    /// Re-encodes the raw predicate data as a JSON value.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.data).map_err(|source| Error::Json {
            context: "encoding predicate data".to_string(),
            source,
        })
    }
}

/// A parser for one or more predicate types.
pub trait PredicateParser: Send + Sync {
    /// Returns true when this parser can handle any of the given types.
    fn supports_type(&self, types: &[PredicateType]) -> bool;

    /// Parses predicate bytes. Returns [`Error::NotCorrectFormat`] when
    /// the bytes are not this parser's format; any other error aborts the
    /// registry dispatch.
    fn parse(&self, data: &[u8]) -> Result<Predicate>;
}

/// Options controlling registry dispatch.
#[derive(Clone, Debug)]
pub struct ParseOptions {
    /// Fall back to the generic JSON parser when no typed parser accepts
    /// the data. Enabled by default.
    pub default_to_json: bool,
    /// Restrict candidate parsers to those supporting one of these types.
    pub type_hints: Vec<PredicateType>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            default_to_json: true,
            type_hints: Vec::new(),
        }
    }
}

impl ParseOptions {
    /// Default options with a list of type hints.
    pub fn with_type_hints(hints: Vec<PredicateType>) -> Self {
        Self {
            type_hints: hints,
            ..Self::default()
        }
    }
}

/// Maps predicate-type URIs to parsers.
pub struct ParserRegistry {
    parsers: HashMap<PredicateType, Arc<dyn PredicateParser>>,
}

impl ParserRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Registers a parser under a type URI. Append-only: a type that is
    /// already present yields [`Error::TypeAlreadyRegistered`].
    pub fn register(
        &mut self,
        predicate_type: PredicateType,
        parser: Arc<dyn PredicateParser>,
    ) -> Result<()> {
        if self.parsers.contains_key(&predicate_type) {
            return Err(Error::TypeAlreadyRegistered);
        }
        self.parsers.insert(predicate_type, parser);
        Ok(())
    }

    /// Returns the number of registered type URIs.
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// Returns true when no parser is registered.
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Dispatches predicate bytes to the registered parsers.
    ///
    /// Candidates are narrowed by the type hints when present. The first
    /// parser that succeeds wins. Parsers returning
    /// [`Error::NotCorrectFormat`] fall through to the next candidate;
    /// other errors accumulate and surface joined when nothing accepts.
    /// With no accepting parser and no hard errors, the generic JSON
    /// parser is used unless `default_to_json` is disabled.
    pub fn parse(&self, data: &[u8], opts: &ParseOptions) -> Result<Predicate> {
        let mut errs: Vec<Error> = Vec::new();

        for (ptype, parser) in &self.parsers {
            if !opts.type_hints.is_empty() {
                if !opts.type_hints.contains(ptype) {
                    continue;
                }
                if !parser.supports_type(&opts.type_hints) {
                    continue;
                }
            }

            match parser.parse(data) {
                Ok(pred) => {
                    debug!("predicate parsed as {ptype}");
                    return Ok(pred);
                }
                Err(Error::NotCorrectFormat) => continue,
                Err(err) => errs.push(err),
            }
        }

        if let Some(err) = Error::join(errs) {
            return Err(err);
        }

        if !opts.default_to_json {
            return Err(Error::UnknownPredicateType);
        }

        debug!("predicate parsed as generic JSON");
        json::JsonParser.parse(data)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        for (ptype, parser) in [
            (slsa::PREDICATE_TYPE_V02, slsa::SlsaParser::v02()),
            (slsa::PREDICATE_TYPE_V1, slsa::SlsaParser::v1()),
            (slsa::PREDICATE_TYPE_V11, slsa::SlsaParser::v11()),
        ] {
            // The registry is empty here, duplicates are impossible.
            let _ = registry.register(ptype.into(), Arc::new(parser));
        }
        registry
    }
}

static REGISTRY: OnceLock<RwLock<ParserRegistry>> = OnceLock::new();

/// Returns the process-wide parser registry, initialized with the built-in
/// parsers on first use. The registry is effectively frozen after startup;
/// late registration is possible but must happen before parsing begins.
pub fn registry() -> &'static RwLock<ParserRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(ParserRegistry::default()))
}

/// Parses predicate bytes through the process-wide registry.
pub fn parse(data: &[u8], opts: &ParseOptions) -> Result<Predicate> {
    registry()
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .parse(data, opts)
}
