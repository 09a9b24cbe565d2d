//! Mapping between schema-typed phenotypes and normalized genotypes.
//!
//! A genotype is a flat vector of loci, one per scalar gene value, laid out in
//! schema order with vector genes expanded element by element. Numeric loci
//! live in `[0, 1]`; categorical loci hold an index into the allowed values;
//! boolean loci hold `0` or `1`. Operators only ever see this flat form plus
//! the per-locus kind table exposed by [`Chromosome::loci`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::rng::SearchRng;
use crate::error::EncodingError;
use crate::schema::{GeneKind, GeneValue, Phenotype, Schema};

/// Kind of a single scalar locus.
///
/// `step` on numeric loci is the gene's fixed mutation step, normalized to the
/// `[0, 1]` locus scale.
#[derive(Debug, Clone, PartialEq)]
pub enum Locus {
    Continuous {
        min: f64,
        max: f64,
        precision: Option<u32>,
        step: Option<f64>,
    },
    Discrete {
        min: i64,
        max: i64,
        step: Option<f64>,
    },
    Categorical {
        options: usize,
    },
    Boolean,
}

impl Locus {
    /// Whether the locus value is a position on a continuum (as opposed to a
    /// choice among options).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Locus::Continuous { .. } | Locus::Discrete { .. })
    }
}

/// Normalized encoding of an individual's genes.
#[derive(Debug, Clone, PartialEq)]
pub struct Genotype {
    fingerprint: u64,
    loci: Vec<f64>,
}

impl Genotype {
    pub(crate) fn from_parts(fingerprint: u64, loci: Vec<f64>) -> Self {
        Self { fingerprint, loci }
    }

    /// Layout fingerprint of the schema this genotype was encoded under.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn values(&self) -> &[f64] {
        &self.loci
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f64] {
        &mut self.loci
    }

    pub fn len(&self) -> usize {
        self.loci.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }
}

/// Stable hash of an encoded genotype, used as the fitness cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenotypeKey(pub u64);

impl fmt::Display for GenotypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Schema-bound encoder/decoder.
#[derive(Debug, Clone)]
pub struct Chromosome {
    schema: Schema,
    loci: Vec<Locus>,
    fingerprint: u64,
}

impl Chromosome {
    pub fn new(schema: Schema) -> Self {
        let mut loci = Vec::with_capacity(schema.genotype_len());
        for gene in schema.genes() {
            flatten(&gene.kind, &mut loci);
        }

        let mut hasher = Fnv1a::new();
        hasher.write(schema.id().as_bytes());
        hasher.write(&schema.version().to_le_bytes());
        for locus in &loci {
            match locus {
                Locus::Continuous { min, max, .. } => {
                    hasher.write(&[0]);
                    hasher.write(&min.to_bits().to_le_bytes());
                    hasher.write(&max.to_bits().to_le_bytes());
                }
                Locus::Discrete { min, max, .. } => {
                    hasher.write(&[1]);
                    hasher.write(&min.to_le_bytes());
                    hasher.write(&max.to_le_bytes());
                }
                Locus::Categorical { options } => {
                    hasher.write(&[2]);
                    hasher.write(&(*options as u64).to_le_bytes());
                }
                Locus::Boolean => hasher.write(&[3]),
            }
        }

        Self {
            schema,
            loci,
            fingerprint: hasher.finish(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Per-locus kinds, in genotype order.
    pub fn loci(&self) -> &[Locus] {
        &self.loci
    }

    /// Genotype length.
    pub fn len(&self) -> usize {
        self.loci.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Whether a genotype has this chromosome's shape.
    pub fn conforms(&self, genotype: &Genotype) -> bool {
        genotype.fingerprint == self.fingerprint && genotype.len() == self.len()
    }

    /// Encode a schema-valid phenotype.
    pub fn encode(&self, phenotype: &Phenotype) -> Result<Genotype, EncodingError> {
        self.schema.check(phenotype)?;

        let mut loci = Vec::with_capacity(self.len());
        for gene in self.schema.genes() {
            let value = phenotype
                .get(&gene.name)
                .ok_or_else(|| EncodingError::MissingGene(gene.name.clone()))?;
            encode_value(&gene.kind, &gene.name, value, &mut loci)?;
        }

        Ok(Genotype::from_parts(self.fingerprint, loci))
    }

    /// Decode a genotype, clamping every locus back into its constraints.
    pub fn decode(&self, genotype: &Genotype) -> Result<Phenotype, EncodingError> {
        if genotype.fingerprint != self.fingerprint {
            return Err(EncodingError::ForeignGenotype);
        }
        if genotype.len() != self.len() {
            return Err(EncodingError::GenotypeLength {
                expected: self.len(),
                actual: genotype.len(),
            });
        }

        let mut values = genotype.loci.iter().copied();
        let phenotype = self
            .schema
            .genes()
            .iter()
            .map(|gene| (gene.name.clone(), decode_value(&gene.kind, &mut values)))
            .collect();
        Ok(phenotype)
    }

    /// Sample a genotype uniformly within every gene's constraints.
    pub fn random_genotype(&self, rng: &mut SearchRng) -> Genotype {
        let loci = self
            .loci
            .iter()
            .map(|locus| match locus {
                Locus::Continuous { .. } => rng.unit(),
                Locus::Discrete { min, max, .. } => {
                    let span = max - min;
                    rng.int_inclusive(0, span) as f64 / span as f64
                }
                Locus::Categorical { options } => rng.index(*options) as f64,
                Locus::Boolean => {
                    if rng.chance(0.5) {
                        1.0
                    } else {
                        0.0
                    }
                }
            })
            .collect();
        Genotype::from_parts(self.fingerprint, loci)
    }

    /// Stable cache key of a genotype.
    pub fn key(&self, genotype: &Genotype) -> GenotypeKey {
        let mut hasher = Fnv1a::new();
        hasher.write(&genotype.fingerprint.to_le_bytes());
        for value in &genotype.loci {
            // -0.0 and 0.0 are the same locus value
            let value = if *value == 0.0 { 0.0 } else { *value };
            hasher.write(&value.to_bits().to_le_bytes());
        }
        GenotypeKey(hasher.finish())
    }

    /// Mean per-locus distance between two genotypes of this shape.
    ///
    /// Numeric loci contribute their absolute difference; categorical and
    /// boolean loci contribute 0 when equal and 1 otherwise.
    pub fn distance(&self, a: &Genotype, b: &Genotype) -> f64 {
        if self.loci.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .loci
            .iter()
            .zip(a.loci.iter().zip(&b.loci))
            .map(|(locus, (x, y))| {
                if locus.is_numeric() {
                    (x - y).abs()
                } else if x == y {
                    0.0
                } else {
                    1.0
                }
            })
            .sum();
        total / self.loci.len() as f64
    }
}

fn flatten(kind: &GeneKind, out: &mut Vec<Locus>) {
    match kind {
        GeneKind::Continuous {
            min,
            max,
            precision,
            step,
        } => out.push(Locus::Continuous {
            min: *min,
            max: *max,
            precision: *precision,
            step: step.map(|s| s / (max - min)),
        }),
        GeneKind::Discrete { min, max, step } => out.push(Locus::Discrete {
            min: *min,
            max: *max,
            step: step.map(|s| s as f64 / (max - min) as f64),
        }),
        GeneKind::Categorical { values } => out.push(Locus::Categorical {
            options: values.len(),
        }),
        GeneKind::Boolean => out.push(Locus::Boolean),
        GeneKind::Vector { length, element } => {
            for _ in 0..*length {
                flatten(element, out);
            }
        }
    }
}

fn encode_value(
    kind: &GeneKind,
    path: &str,
    value: &GeneValue,
    out: &mut Vec<f64>,
) -> Result<(), EncodingError> {
    let mismatch = |expected| EncodingError::TypeMismatch {
        gene: path.to_string(),
        expected,
    };

    match kind {
        GeneKind::Continuous { min, max, .. } => {
            let v = value.as_f64().ok_or_else(|| mismatch("continuous"))?;
            out.push((v - min) / (max - min));
        }
        GeneKind::Discrete { min, max, .. } => {
            let v = value.as_i64().ok_or_else(|| mismatch("discrete-integer"))?;
            out.push((v - min) as f64 / (max - min) as f64);
        }
        GeneKind::Categorical { values } => {
            let index = values
                .iter()
                .position(|allowed| allowed == value)
                .ok_or_else(|| EncodingError::OutOfRange {
                    gene: path.to_string(),
                    value: value.to_string(),
                })?;
            out.push(index as f64);
        }
        GeneKind::Boolean => {
            let v = value.as_bool().ok_or_else(|| mismatch("boolean"))?;
            out.push(if v { 1.0 } else { 0.0 });
        }
        GeneKind::Vector { element, .. } => {
            let items = value.as_list().ok_or_else(|| mismatch("vector"))?;
            for (i, item) in items.iter().enumerate() {
                encode_value(element, &format!("{path}[{i}]"), item, out)?;
            }
        }
    }
    Ok(())
}

fn decode_value(kind: &GeneKind, values: &mut impl Iterator<Item = f64>) -> GeneValue {
    match kind {
        GeneKind::Continuous {
            min,
            max,
            precision,
            ..
        } => {
            let x = normalized(values.next());
            let mut v = (min + x * (max - min)).clamp(*min, *max);
            if let Some(digits) = precision {
                v = truncate_significant(v, *digits).clamp(*min, *max);
            }
            GeneValue::Float(v)
        }
        GeneKind::Discrete { min, max, .. } => {
            let x = normalized(values.next());
            let offset = (x * (max - min) as f64).round() as i64;
            GeneValue::Int((min + offset).clamp(*min, *max))
        }
        GeneKind::Categorical { values: allowed } => {
            let x = values.next().filter(|x| x.is_finite()).unwrap_or(0.0);
            let index = x.round().clamp(0.0, (allowed.len() - 1) as f64) as usize;
            allowed[index].clone()
        }
        GeneKind::Boolean => GeneValue::Bool(normalized(values.next()) >= 0.5),
        GeneKind::Vector { length, element } => {
            GeneValue::List((0..*length).map(|_| decode_value(element, values)).collect())
        }
    }
}

fn normalized(x: Option<f64>) -> f64 {
    x.filter(|x| x.is_finite()).unwrap_or(0.0).clamp(0.0, 1.0)
}

/// Truncate toward zero to `digits` significant digits.
pub(crate) fn truncate_significant(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    // Absorbs representation error such as 2.3 * 10 = 22.999...
    let nudge = 1.0 + 8.0 * f64::EPSILON;
    let magnitude = value.abs().log10().floor() as i32;
    let shift = digits as i32 - 1 - magnitude;
    if shift >= 0 {
        let factor = 10f64.powi(shift);
        (value * factor * nudge).trunc() / factor
    } else {
        let factor = 10f64.powi(-shift);
        (value / factor * nudge).trunc() * factor
    }
}

/// 64-bit FNV-1a; stable across processes, unlike `std`'s hasher.
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    fn new() -> Self {
        Self(Self::OFFSET)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
