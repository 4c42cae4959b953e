//! Parameter values and typed extraction for feature constructors.

use super::FeatureError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single concrete parameter value from the feature configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParamValue {
    /// Convert a JSON scalar. Nulls, arrays and objects are not parameter values.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ParamValue::Int(i)),
                None => n.as_f64().map(ParamValue::Float),
            },
            serde_json::Value::Bool(b) => Some(ParamValue::Bool(*b)),
            serde_json::Value::String(s) => Some(ParamValue::Text(s.clone())),
            _ => None,
        }
    }
}

/// Renders the value as it appears in output names: `20`, `2.5`, `true`.
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// Concrete parameter assignment, in declaration order.
pub type ParamSet = IndexMap<String, ParamValue>;

/// Typed view over a [`ParamSet`] for one feature kind.
///
/// Construction rejects parameter names the kind does not accept, so a typo
/// in the configuration fails that instance instead of being silently ignored.
pub struct Params<'a> {
    kind: &'static str,
    set: &'a ParamSet,
}

impl<'a> Params<'a> {
    pub fn new(
        kind: &'static str,
        set: &'a ParamSet,
        accepted: &[&str],
    ) -> Result<Self, FeatureError> {
        if let Some(name) = set.keys().find(|k| !accepted.contains(&k.as_str())) {
            return Err(FeatureError::UnexpectedParam {
                kind: kind.to_string(),
                param: name.clone(),
            });
        }
        Ok(Self { kind, set })
    }

    fn get(&self, name: &str) -> Result<&'a ParamValue, FeatureError> {
        self.set.get(name).ok_or_else(|| FeatureError::MissingParam {
            kind: self.kind.to_string(),
            param: name.to_string(),
        })
    }

    fn invalid(&self, name: &str, reason: impl Into<String>) -> FeatureError {
        FeatureError::InvalidParam {
            kind: self.kind.to_string(),
            param: name.to_string(),
            reason: reason.into(),
        }
    }

    /// A window length or period: a positive integer. Integral floats are accepted.
    pub fn period(&self, name: &str) -> Result<usize, FeatureError> {
        let value = match self.get(name)? {
            ParamValue::Int(i) => *i,
            ParamValue::Float(x) if x.fract() == 0.0 && x.is_finite() => *x as i64,
            other => return Err(self.invalid(name, format!("expected an integer, got {other}"))),
        };
        if value < 1 {
            return Err(self.invalid(name, format!("must be >= 1, got {value}")));
        }
        Ok(value as usize)
    }

    /// A finite real number.
    pub fn number(&self, name: &str) -> Result<f64, FeatureError> {
        let value = match self.get(name)? {
            ParamValue::Int(i) => *i as f64,
            ParamValue::Float(x) => *x,
            other => return Err(self.invalid(name, format!("expected a number, got {other}"))),
        };
        if !value.is_finite() {
            return Err(self.invalid(name, "must be finite"));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, ParamValue)]) -> ParamSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn display_matches_output_name_format() {
        assert_eq!(ParamValue::Int(20).to_string(), "20");
        assert_eq!(ParamValue::Float(2.5).to_string(), "2.5");
        assert_eq!(ParamValue::Float(2.0).to_string(), "2");
        assert_eq!(ParamValue::Text("close".into()).to_string(), "close");
    }

    #[test]
    fn from_json_rejects_non_scalars() {
        assert_eq!(
            ParamValue::from_json(&serde_json::json!(14)),
            Some(ParamValue::Int(14))
        );
        assert_eq!(
            ParamValue::from_json(&serde_json::json!(1.5)),
            Some(ParamValue::Float(1.5))
        );
        assert_eq!(ParamValue::from_json(&serde_json::json!(null)), None);
        assert_eq!(ParamValue::from_json(&serde_json::json!([1])), None);
        assert_eq!(ParamValue::from_json(&serde_json::json!({"a": 1})), None);
    }

    #[test]
    fn period_accepts_positive_integers() {
        let s = set(&[("length", ParamValue::Int(20)), ("w", ParamValue::Float(5.0))]);
        let p = Params::new("SMA", &s, &["length", "w"]).unwrap();
        assert_eq!(p.period("length").unwrap(), 20);
        assert_eq!(p.period("w").unwrap(), 5);
    }

    #[test]
    fn period_rejects_zero_and_fractions() {
        let s = set(&[("a", ParamValue::Int(0)), ("b", ParamValue::Float(2.5))]);
        let p = Params::new("SMA", &s, &["a", "b"]).unwrap();
        assert!(matches!(p.period("a"), Err(FeatureError::InvalidParam { .. })));
        assert!(matches!(p.period("b"), Err(FeatureError::InvalidParam { .. })));
    }

    #[test]
    fn missing_and_unexpected_params() {
        let s = set(&[("lenght", ParamValue::Int(20))]);
        assert_eq!(
            Params::new("SMA", &s, &["length"]).err(),
            Some(FeatureError::UnexpectedParam {
                kind: "SMA".into(),
                param: "lenght".into()
            })
        );

        let empty = ParamSet::new();
        let p = Params::new("SMA", &empty, &["length"]).unwrap();
        assert_eq!(
            p.period("length").unwrap_err(),
            FeatureError::MissingParam {
                kind: "SMA".into(),
                param: "length".into()
            }
        );
    }

    #[test]
    fn number_accepts_ints_and_floats() {
        let s = set(&[("std", ParamValue::Int(2)), ("x", ParamValue::Float(1.5))]);
        let p = Params::new("BBANDS", &s, &["std", "x"]).unwrap();
        assert_eq!(p.number("std").unwrap(), 2.0);
        assert_eq!(p.number("x").unwrap(), 1.5);
    }
}
