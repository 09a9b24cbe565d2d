//! Caller-supplied fitness functions.

use crate::error::FitnessError;
use crate::schema::{ObjectiveConfig, Phenotype};

/// Scores a decoded design. Higher is better.
///
/// Implementations are expected to be pure functions of the phenotype; a
/// seeded search only replays exactly when they are. Returning an error (or a
/// non-finite score) marks that single individual as failed without stopping
/// the run.
pub trait FitnessFunction {
    fn evaluate(&mut self, phenotype: &Phenotype) -> Result<f64, FitnessError>;
}

impl<F> FitnessFunction for F
where
    F: FnMut(&Phenotype) -> Result<f64, FitnessError>,
{
    fn evaluate(&mut self, phenotype: &Phenotype) -> Result<f64, FitnessError> {
        self(phenotype)
    }
}

/// Fitness read straight from a numeric gene of the design.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldObjective {
    field: String,
    maximize: bool,
}

impl FieldObjective {
    pub fn maximize(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            maximize: true,
        }
    }

    pub fn minimize(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            maximize: false,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl From<&ObjectiveConfig> for FieldObjective {
    fn from(config: &ObjectiveConfig) -> Self {
        Self {
            field: config.field.clone(),
            maximize: config.maximize,
        }
    }
}

impl FitnessFunction for FieldObjective {
    fn evaluate(&mut self, phenotype: &Phenotype) -> Result<f64, FitnessError> {
        let value = phenotype.get_f64(&self.field).ok_or_else(|| {
            FitnessError::new(format!("design has no numeric gene `{}`", self.field))
        })?;
        Ok(if self.maximize { value } else { -value })
    }
}
