//! Schema-typed design values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single decoded gene value.
///
/// Serialized untagged so that a phenotype reads as a plain JSON object of
/// parameters, the shape the backend stores models in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<GeneValue>),
}

impl GeneValue {
    /// Numeric view of the value (integers widen to `f64`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GeneValue::Int(v) => Some(*v as f64),
            GeneValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view; floats are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            GeneValue::Int(v) => Some(*v),
            GeneValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GeneValue::Bool(v) => Some(*v),
            GeneValue::Int(0) => Some(false),
            GeneValue::Int(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GeneValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[GeneValue]> {
        match self {
            GeneValue::List(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for GeneValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneValue::Bool(v) => write!(f, "{v}"),
            GeneValue::Int(v) => write!(f, "{v}"),
            GeneValue::Float(v) => write!(f, "{v}"),
            GeneValue::Text(v) => write!(f, "{v:?}"),
            GeneValue::List(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for GeneValue {
    fn from(value: f64) -> Self {
        GeneValue::Float(value)
    }
}

impl From<i64> for GeneValue {
    fn from(value: i64) -> Self {
        GeneValue::Int(value)
    }
}

impl From<bool> for GeneValue {
    fn from(value: bool) -> Self {
        GeneValue::Bool(value)
    }
}

impl From<&str> for GeneValue {
    fn from(value: &str) -> Self {
        GeneValue::Text(value.to_string())
    }
}

impl From<Vec<GeneValue>> for GeneValue {
    fn from(value: Vec<GeneValue>) -> Self {
        GeneValue::List(value)
    }
}

/// A decoded design: gene name to typed value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phenotype(BTreeMap<String, GeneValue>);

impl Phenotype {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<GeneValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<GeneValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&GeneValue> {
        self.0.get(name)
    }

    /// Numeric value of a gene, if present and numeric.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(GeneValue::as_f64)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GeneValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, GeneValue)> for Phenotype {
    fn from_iter<I: IntoIterator<Item = (String, GeneValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
