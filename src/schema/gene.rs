//! Gene specifications and project schemas.
//!
//! A [`Schema`] is parsed once per search session from the backend's
//! [`RawSchema`] and is read-only afterwards. Gene kinds are a tagged enum;
//! everything downstream (encoding, random sampling, mutation) matches on the
//! tag instead of dispatching through per-kind types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{GeneValue, Phenotype};
use crate::error::{EncodingError, SchemaError};

/// Gene kind tag as the backend spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawKind {
    #[default]
    #[serde(alias = "float", alias = "double", alias = "FLOAT", alias = "DOUBLE")]
    Continuous,
    #[serde(
        alias = "int",
        alias = "integer",
        alias = "INT",
        alias = "discrete-integer"
    )]
    Discrete,
    Categorical,
    #[serde(alias = "bool")]
    Boolean,
    Vector,
}

/// Unvalidated gene entry from the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGene {
    /// Gene name (ignored for vector elements).
    #[serde(default, alias = "field_name")]
    pub name: String,
    #[serde(rename = "type", alias = "field_type", alias = "kind", default)]
    pub kind: RawKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// `[min, max]` pair, an alternative to separate bounds.
    #[serde(default, alias = "field_range", skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    #[serde(default, alias = "allowed_values", skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<GeneValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<RawGene>>,
    /// Significant digits kept for continuous values.
    #[serde(default, alias = "field_precision", skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Fixed mutation step for numeric genes, in gene units.
    #[serde(default, alias = "field_step", skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl RawGene {
    pub fn continuous(name: &str, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: RawKind::Continuous,
            min: Some(min),
            max: Some(max),
            ..Default::default()
        }
    }

    pub fn discrete(name: &str, min: i64, max: i64) -> Self {
        Self {
            name: name.to_string(),
            kind: RawKind::Discrete,
            min: Some(min as f64),
            max: Some(max as f64),
            ..Default::default()
        }
    }

    pub fn categorical(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: RawKind::Categorical,
            values: Some(values.iter().map(|v| GeneValue::from(*v)).collect()),
            ..Default::default()
        }
    }

    pub fn boolean(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: RawKind::Boolean,
            ..Default::default()
        }
    }

    pub fn vector(name: &str, length: usize, element: RawGene) -> Self {
        Self {
            name: name.to_string(),
            kind: RawKind::Vector,
            length: Some(length),
            element: Some(Box::new(element)),
            ..Default::default()
        }
    }

    pub fn with_precision(mut self, digits: u32) -> Self {
        self.precision = Some(digits);
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    fn bounds(&self) -> (Option<f64>, Option<f64>) {
        (
            self.min.or(self.range.map(|r| r.0)),
            self.max.or(self.range.map(|r| r.1)),
        )
    }
}

/// Unvalidated schema as fetched from the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSchema {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: u32,
    #[serde(alias = "schema")]
    pub fields: Vec<RawGene>,
}

/// Typed constraints of a gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GeneKind {
    Continuous {
        min: f64,
        max: f64,
        precision: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
    Discrete {
        min: i64,
        max: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<i64>,
    },
    Categorical {
        values: Vec<GeneValue>,
    },
    Boolean,
    Vector {
        length: usize,
        element: Box<GeneKind>,
    },
}

impl GeneKind {
    /// Number of genotype loci this kind occupies.
    pub fn width(&self) -> usize {
        match self {
            GeneKind::Vector { length, element } => length * element.width(),
            _ => 1,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            GeneKind::Continuous { .. } => "continuous",
            GeneKind::Discrete { .. } => "discrete-integer",
            GeneKind::Categorical { .. } => "categorical",
            GeneKind::Boolean => "boolean",
            GeneKind::Vector { .. } => "vector",
        }
    }

    /// Check a value against this kind, naming violations after `path`.
    pub(crate) fn check(&self, path: &str, value: &GeneValue) -> Result<(), EncodingError> {
        let mismatch = || EncodingError::TypeMismatch {
            gene: path.to_string(),
            expected: self.label(),
        };
        let out_of_range = || EncodingError::OutOfRange {
            gene: path.to_string(),
            value: value.to_string(),
        };

        match self {
            GeneKind::Continuous { min, max, .. } => {
                let v = value.as_f64().ok_or_else(mismatch)?;
                if !v.is_finite() || v < *min || v > *max {
                    return Err(out_of_range());
                }
            }
            GeneKind::Discrete { min, max, .. } => {
                let v = value.as_i64().ok_or_else(mismatch)?;
                if v < *min || v > *max {
                    return Err(out_of_range());
                }
            }
            GeneKind::Categorical { values } => {
                if !values.contains(value) {
                    return Err(out_of_range());
                }
            }
            GeneKind::Boolean => {
                value.as_bool().ok_or_else(mismatch)?;
            }
            GeneKind::Vector { length, element } => {
                let items = value.as_list().ok_or_else(mismatch)?;
                if items.len() != *length {
                    return Err(EncodingError::LengthMismatch {
                        gene: path.to_string(),
                        expected: *length,
                        actual: items.len(),
                    });
                }
                for (i, item) in items.iter().enumerate() {
                    element.check(&format!("{path}[{i}]"), item)?;
                }
            }
        }
        Ok(())
    }
}

/// A named, typed, constrained design parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: GeneKind,
}

/// Ordered gene specifications plus identifier and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    id: String,
    version: u32,
    genes: Vec<GeneSpec>,
}

impl Schema {
    /// Validate a raw schema into typed gene specifications.
    pub fn parse(raw: &RawSchema) -> Result<Self, SchemaError> {
        if raw.fields.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen = HashSet::new();
        let mut genes = Vec::with_capacity(raw.fields.len());
        for (i, field) in raw.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(SchemaError::MissingName(i));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateGene(field.name.clone()));
            }
            genes.push(GeneSpec {
                name: field.name.clone(),
                kind: parse_kind(&field.name, field)?,
            });
        }

        Ok(Self {
            id: raw.id.clone(),
            version: raw.version,
            genes,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn genes(&self) -> &[GeneSpec] {
        &self.genes
    }

    pub fn gene(&self, name: &str) -> Option<&GeneSpec> {
        self.genes.iter().find(|g| g.name == name)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Total genotype length under this schema.
    pub fn genotype_len(&self) -> usize {
        self.genes.iter().map(|g| g.kind.width()).sum()
    }

    /// Whether a phenotype satisfies every gene constraint.
    pub fn validate(&self, phenotype: &Phenotype) -> bool {
        self.check(phenotype).is_ok()
    }

    /// Like [`Schema::validate`] but reports the first violation.
    pub fn check(&self, phenotype: &Phenotype) -> Result<(), EncodingError> {
        if let Some(unknown) = phenotype.names().find(|n| self.gene(n).is_none()) {
            return Err(EncodingError::UnknownGene(unknown.to_string()));
        }
        for gene in &self.genes {
            let value = phenotype
                .get(&gene.name)
                .ok_or_else(|| EncodingError::MissingGene(gene.name.clone()))?;
            gene.kind.check(&gene.name, value)?;
        }
        Ok(())
    }
}

/// Largest magnitude a discrete bound may take; every integer up to it is
/// exactly representable in an `f64`.
pub const MAX_DISCRETE_BOUND: f64 = 9_007_199_254_740_992.0;

fn parse_kind(gene: &str, raw: &RawGene) -> Result<GeneKind, SchemaError> {
    let missing = |field| SchemaError::MissingConstraint {
        gene: gene.to_string(),
        field,
    };

    match raw.kind {
        RawKind::Continuous => {
            let (min, max) = raw.bounds();
            let min = min.ok_or_else(|| missing("min"))?;
            let max = max.ok_or_else(|| missing("max"))?;
            check_range(gene, min, max)?;
            if raw.precision == Some(0) {
                return Err(SchemaError::InvalidPrecision {
                    gene: gene.to_string(),
                });
            }
            let step = check_step(gene, raw.step)?;
            Ok(GeneKind::Continuous {
                min,
                max,
                precision: raw.precision,
                step,
            })
        }
        RawKind::Discrete => {
            let (min, max) = raw.bounds();
            let min = min.ok_or_else(|| missing("min"))?;
            let max = max.ok_or_else(|| missing("max"))?;
            for value in [min, max] {
                if value.fract() != 0.0 || !value.is_finite() {
                    return Err(SchemaError::NonIntegralBound {
                        gene: gene.to_string(),
                        value,
                    });
                }
                if value.abs() > MAX_DISCRETE_BOUND {
                    return Err(SchemaError::UnrepresentableBound {
                        gene: gene.to_string(),
                        value,
                    });
                }
            }
            check_range(gene, min, max)?;
            let step = match check_step(gene, raw.step)? {
                Some(step) if step.fract() != 0.0 => {
                    return Err(SchemaError::InvalidStep {
                        gene: gene.to_string(),
                        step,
                    });
                }
                step => step.map(|s| s as i64),
            };
            Ok(GeneKind::Discrete {
                min: min as i64,
                max: max as i64,
                step,
            })
        }
        RawKind::Categorical => {
            let values = raw.values.as_ref().ok_or_else(|| missing("values"))?;
            if values.is_empty() {
                return Err(SchemaError::EmptyCategories {
                    gene: gene.to_string(),
                });
            }
            Ok(GeneKind::Categorical {
                values: values.clone(),
            })
        }
        RawKind::Boolean => Ok(GeneKind::Boolean),
        RawKind::Vector => {
            let length = raw.length.ok_or_else(|| missing("length"))?;
            if length == 0 {
                return Err(SchemaError::EmptyVector {
                    gene: gene.to_string(),
                });
            }
            let element = raw.element.as_ref().ok_or_else(|| missing("element"))?;
            Ok(GeneKind::Vector {
                length,
                element: Box::new(parse_kind(gene, element)?),
            })
        }
    }
}

fn check_step(gene: &str, step: Option<f64>) -> Result<Option<f64>, SchemaError> {
    match step {
        Some(step) if !(step > 0.0 && step.is_finite()) => Err(SchemaError::InvalidStep {
            gene: gene.to_string(),
            step,
        }),
        step => Ok(step),
    }
}

fn check_range(gene: &str, min: f64, max: f64) -> Result<(), SchemaError> {
    if min.partial_cmp(&max) != Some(std::cmp::Ordering::Less) {
        return Err(SchemaError::InvalidRange {
            gene: gene.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(fields: Vec<RawGene>) -> RawSchema {
        RawSchema {
            id: "tower".into(),
            version: 1,
            fields,
        }
    }

    #[test]
    fn test_parse_all_kinds() {
        let schema = Schema::parse(&raw(vec![
            RawGene::continuous("height", 0.0, 10.0),
            RawGene::discrete("floors", 1, 5),
            RawGene::categorical("roof", &["flat", "gable"]),
            RawGene::boolean("solar"),
            RawGene::vector("bays", 3, RawGene::continuous("", 0.0, 1.0)),
        ]))
        .unwrap();

        assert_eq!(schema.len(), 5);
        assert_eq!(schema.genotype_len(), 7);
        assert_eq!(
            schema.gene("floors").unwrap().kind,
            GeneKind::Discrete {
                min: 1,
                max: 5,
                step: None
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed_genes() {
        let mut no_max = RawGene::continuous("x", 0.0, 1.0);
        no_max.max = None;
        assert_eq!(
            Schema::parse(&raw(vec![no_max])),
            Err(SchemaError::MissingConstraint {
                gene: "x".into(),
                field: "max"
            })
        );

        assert!(matches!(
            Schema::parse(&raw(vec![RawGene::categorical("c", &[])])),
            Err(SchemaError::EmptyCategories { .. })
        ));
        assert!(matches!(
            Schema::parse(&raw(vec![RawGene::continuous("x", 2.0, 2.0)])),
            Err(SchemaError::InvalidRange { .. })
        ));
        assert!(matches!(
            Schema::parse(&raw(vec![RawGene::discrete("n", 5, 1)])),
            Err(SchemaError::InvalidRange { .. })
        ));
        assert!(matches!(
            Schema::parse(&raw(vec![
                RawGene::boolean("b"),
                RawGene::boolean("b")
            ])),
            Err(SchemaError::DuplicateGene(_))
        ));
        assert_eq!(Schema::parse(&raw(vec![])), Err(SchemaError::Empty));
    }

    #[test]
    fn test_parse_rejects_wide_discrete_bounds() {
        let wide = RawGene::discrete("n", i64::MIN / 2 - 10, i64::MAX / 2 + 10);
        assert!(matches!(
            Schema::parse(&raw(vec![wide])),
            Err(SchemaError::UnrepresentableBound { gene, .. }) if gene == "n"
        ));

        let widest = RawGene::discrete("n", -(1 << 53), 1 << 53);
        let schema = Schema::parse(&raw(vec![widest])).unwrap();
        assert_eq!(
            schema.gene("n").unwrap().kind,
            GeneKind::Discrete {
                min: -(1 << 53),
                max: 1 << 53,
                step: None
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_steps() {
        for step in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                Schema::parse(&raw(vec![RawGene::continuous("x", 0.0, 1.0).with_step(step)])),
                Err(SchemaError::InvalidStep { .. })
            ));
        }
        assert!(matches!(
            Schema::parse(&raw(vec![RawGene::discrete("n", 0, 10).with_step(1.5)])),
            Err(SchemaError::InvalidStep { .. })
        ));
        assert!(Schema::parse(&raw(vec![RawGene::continuous("x", 0.0, 1.0).with_step(0.25)])).is_ok());
    }

    #[test]
    fn test_parse_nested_vector_errors() {
        let bad = RawGene::vector("grid", 2, RawGene::categorical("", &[]));
        assert!(matches!(
            Schema::parse(&raw(vec![bad])),
            Err(SchemaError::EmptyCategories { gene }) if gene == "grid"
        ));
    }

    #[test]
    fn test_parse_backend_field_names() {
        let json = r#"{
            "id": "p1",
            "schema": [
                {"field_name": "height", "field_type": "float", "field_range": [0, 30], "field_precision": 3},
                {"field_name": "floors", "field_type": "int", "field_range": [1, 9], "field_step": 2}
            ]
        }"#;
        let raw: RawSchema = serde_json::from_str(json).unwrap();
        let schema = Schema::parse(&raw).unwrap();

        assert_eq!(
            schema.gene("height").unwrap().kind,
            GeneKind::Continuous {
                min: 0.0,
                max: 30.0,
                precision: Some(3),
                step: None
            }
        );
        assert_eq!(
            schema.gene("floors").unwrap().kind,
            GeneKind::Discrete {
                min: 1,
                max: 9,
                step: Some(2)
            }
        );
    }

    #[test]
    fn test_validate_phenotype() {
        let schema = Schema::parse(&raw(vec![
            RawGene::continuous("height", 0.0, 10.0),
            RawGene::categorical("roof", &["flat", "gable"]),
            RawGene::vector("bays", 2, RawGene::discrete("", 0, 3)),
        ]))
        .unwrap();

        let valid = Phenotype::new()
            .with("height", 4.5)
            .with("roof", "flat")
            .with("bays", vec![GeneValue::Int(0), GeneValue::Int(3)]);
        assert!(schema.validate(&valid));

        let out_of_range = valid.clone().with("height", 11.0);
        assert!(!schema.validate(&out_of_range));

        let bad_element = valid.clone().with("bays", vec![GeneValue::Int(0), GeneValue::Int(4)]);
        assert!(matches!(
            schema.check(&bad_element),
            Err(EncodingError::OutOfRange { gene, .. }) if gene == "bays[1]"
        ));

        let extra = valid.clone().with("color", "red");
        assert_eq!(
            schema.check(&extra),
            Err(EncodingError::UnknownGene("color".into()))
        );
    }
}
