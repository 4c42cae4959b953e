//! Feature configuration and parameter expansion.
//!
//! The configuration is a JSON document of two sections, each a map of
//! group → kind → parameter domains:
//!
//! ```json
//! {
//!   "symbol_specific": {
//!     "Moving_Averages": {
//!       "SMA": { "length": [20, 50], "description": "Simple moving average" }
//!     }
//!   },
//!   "universal": {}
//! }
//! ```
//!
//! [`expand`] turns one kind's domains into the Cartesian product of concrete
//! [`FeatureInstance`]s. Declaration order is preserved throughout, so output
//! names are deterministic.

use super::params::{ParamSet, ParamValue};
use super::registry::{Category, Constructor, FeatureRegistry, FeatureSpec};
use super::universal::UniversalFeature;
use super::{Feature, FeatureError};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Fatal problems with the feature configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read feature config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed feature config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{kind}: parameter '{param}' must be a list of candidate values")]
    NotAnArray { kind: String, param: String },

    #[error("{kind}: parameter '{param}' has an unusable candidate value {value}")]
    InvalidValue {
        kind: String,
        param: String,
        value: String,
    },
}

/// Key in a kind's entry that carries documentation rather than a domain.
const DESCRIPTION_KEY: &str = "description";

type RawSection = IndexMap<String, IndexMap<String, IndexMap<String, serde_json::Value>>>;

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    symbol_specific: RawSection,
    #[serde(default)]
    universal: RawSection,
}

/// One kind's declared parameter domains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    pub description: Option<String>,
    /// Parameter name → candidate values, in declaration order.
    pub domains: IndexMap<String, Vec<ParamValue>>,
}

impl ParamSchema {
    fn parse(
        kind: &str,
        entry: &IndexMap<String, serde_json::Value>,
    ) -> Result<Self, ConfigError> {
        let mut schema = ParamSchema::default();
        for (key, value) in entry {
            if key == DESCRIPTION_KEY {
                schema.description = value.as_str().map(str::to_string);
                continue;
            }
            let candidates = value.as_array().ok_or_else(|| ConfigError::NotAnArray {
                kind: kind.to_string(),
                param: key.clone(),
            })?;
            let domain = candidates
                .iter()
                .map(|v| {
                    ParamValue::from_json(v).ok_or_else(|| ConfigError::InvalidValue {
                        kind: kind.to_string(),
                        param: key.clone(),
                        value: v.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            schema.domains.insert(key.clone(), dedup_domain(kind, key, domain));
        }
        Ok(schema)
    }

    /// Number of instances the schema expands to.
    pub fn combinations(&self) -> usize {
        self.domains.values().map(Vec::len).product()
    }
}

/// Drop candidates that render the same as an earlier one (`20` and `20`,
/// `2` and `2.0`): they would expand to instances with the same output name.
fn dedup_domain(kind: &str, param: &str, domain: Vec<ParamValue>) -> Vec<ParamValue> {
    let mut seen = HashSet::new();
    domain
        .into_iter()
        .filter(|value| {
            let fresh = seen.insert(value.to_string());
            if !fresh {
                warn!(kind, param, %value, "duplicate parameter value ignored");
            }
            fresh
        })
        .collect()
}

/// Parsed feature configuration: category → group → kind → schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureConfig {
    symbol_specific: IndexMap<String, IndexMap<String, ParamSchema>>,
    universal: IndexMap<String, IndexMap<String, ParamSchema>>,
}

impl FeatureConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)?;
        Ok(Self {
            symbol_specific: parse_section(&raw.symbol_specific)?,
            universal: parse_section(&raw.universal)?,
        })
    }

    fn section(&self, category: Category) -> &IndexMap<String, IndexMap<String, ParamSchema>> {
        match category {
            Category::SymbolSpecific => &self.symbol_specific,
            Category::Universal => &self.universal,
        }
    }

    /// The schema declared for `kind`, searching every group of the category.
    pub fn schema_for(&self, category: Category, kind: &str) -> Option<&ParamSchema> {
        self.section(category)
            .values()
            .find_map(|group| group.get(kind))
    }

    /// Declared kinds, with their category, in document order.
    pub fn declared_kinds(&self) -> impl Iterator<Item = (Category, &str)> {
        [Category::SymbolSpecific, Category::Universal]
            .into_iter()
            .flat_map(move |category| {
                self.section(category)
                    .values()
                    .flat_map(|group| group.keys())
                    .map(move |kind| (category, kind.as_str()))
            })
    }

    /// Declared kinds the registry does not know, or knows under the other
    /// category.
    pub fn unknown_kinds<'a>(
        &'a self,
        registry: &'a FeatureRegistry,
    ) -> impl Iterator<Item = (Category, &'a str)> + 'a {
        self.declared_kinds().filter(move |(category, kind)| {
            registry
                .get(kind)
                .map_or(true, |spec| spec.category() != *category)
        })
    }
}

fn parse_section(
    raw: &RawSection,
) -> Result<IndexMap<String, IndexMap<String, ParamSchema>>, ConfigError> {
    raw.iter()
        .map(|(group, kinds)| {
            let schemas = kinds
                .iter()
                .map(|(kind, entry)| Ok((kind.clone(), ParamSchema::parse(kind, entry)?)))
                .collect::<Result<IndexMap<_, _>, ConfigError>>()?;
            Ok((group.clone(), schemas))
        })
        .collect()
}

/// A concrete (kind, parameters) pair ready to be built and computed.
#[derive(Debug, Clone)]
pub struct FeatureInstance {
    pub spec: &'static FeatureSpec,
    pub params: ParamSet,
    pub output_name: String,
}

impl FeatureInstance {
    pub fn new(spec: &'static FeatureSpec, params: ParamSet) -> Self {
        let output_name = output_name(spec.label, &params);
        Self {
            spec,
            params,
            output_name,
        }
    }

    /// Construct the symbol-specific feature this instance describes.
    pub fn build(&self) -> Result<Box<dyn Feature>, FeatureError> {
        match self.spec.constructor {
            Constructor::Symbol(build) => build(&self.params),
            Constructor::Universal(_) => Err(self.wrong_category()),
        }
    }

    /// Construct the cross-symbol feature this instance describes.
    pub fn build_universal(&self) -> Result<Box<dyn UniversalFeature>, FeatureError> {
        match self.spec.constructor {
            Constructor::Universal(build) => build(&self.params),
            Constructor::Symbol(_) => Err(self.wrong_category()),
        }
    }

    fn wrong_category(&self) -> FeatureError {
        FeatureError::WrongCategory {
            kind: self.spec.kind.to_string(),
            actual: self.spec.category(),
        }
    }
}

/// `label` followed by `_{value}` for each parameter in order.
fn output_name(label: &str, params: &ParamSet) -> String {
    let mut name = label.to_string();
    for value in params.values() {
        name.push('_');
        name.push_str(&value.to_string());
    }
    name
}

/// Expand one kind against the configuration.
///
/// Without a schema, or with a schema that declares no parameters, the kind
/// gets exactly one instance built from its defaults. Otherwise the result is
/// the Cartesian product of the declared domains, with the last parameter
/// varying fastest. A declared but empty domain yields no instances.
pub fn expand(spec: &'static FeatureSpec, config: &FeatureConfig) -> Vec<FeatureInstance> {
    let schema = match config.schema_for(spec.category(), spec.kind) {
        Some(schema) if !schema.domains.is_empty() => schema,
        _ => return vec![FeatureInstance::new(spec, spec.default_params())],
    };

    let mut combos: Vec<ParamSet> = vec![ParamSet::new()];
    for (name, domain) in &schema.domains {
        combos = combos
            .into_iter()
            .flat_map(|partial| {
                domain.iter().map(move |value| {
                    let mut next = partial.clone();
                    next.insert(name.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combos
        .into_iter()
        .map(|params| FeatureInstance::new(spec, params))
        .collect()
}

/// Expand every registered kind of one category, in registry order.
pub fn expand_all(
    registry: &FeatureRegistry,
    config: &FeatureConfig,
    category: Category,
) -> Vec<FeatureInstance> {
    registry
        .by_category(category)
        .flat_map(|spec| expand(spec, config))
        .collect()
}
