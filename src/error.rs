//! Error taxonomy for schema loading, encoding, genetic operators and the
//! search lifecycle.

use crate::backend::TransportError;
use crate::schema::{ConfigError, SearchState};

/// Malformed schema. Fatal: no population work starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema declares no genes")]
    Empty,
    #[error("Gene #{0} has an empty name")]
    MissingName(usize),
    #[error("Duplicate gene name: {0}")]
    DuplicateGene(String),
    #[error("Gene {gene} is missing required constraint `{field}`")]
    MissingConstraint { gene: String, field: &'static str },
    #[error("Gene {gene} has an empty categorical value set")]
    EmptyCategories { gene: String },
    #[error("Gene {gene} declares min ({min}) >= max ({max})")]
    InvalidRange { gene: String, min: f64, max: f64 },
    #[error("Gene {gene} declares non-integral bound {value} for a discrete range")]
    NonIntegralBound { gene: String, value: f64 },
    #[error("Gene {gene} declares discrete bound {value} beyond +/-2^53")]
    UnrepresentableBound { gene: String, value: f64 },
    #[error("Gene {gene} declares invalid mutation step {step}")]
    InvalidStep { gene: String, step: f64 },
    #[error("Gene {gene} declares a zero-length vector")]
    EmptyVector { gene: String },
    #[error("Gene {gene} declares precision 0; at least one significant digit is required")]
    InvalidPrecision { gene: String },
}

/// Phenotype/genotype shape mismatch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodingError {
    #[error("Phenotype references unknown gene {0}")]
    UnknownGene(String),
    #[error("Phenotype omits required gene {0}")]
    MissingGene(String),
    #[error("Gene {gene} expected a {expected} value")]
    TypeMismatch { gene: String, expected: &'static str },
    #[error("Gene {gene} expected {expected} elements, got {actual}")]
    LengthMismatch {
        gene: String,
        expected: usize,
        actual: usize,
    },
    #[error("Gene {gene} value {value} violates its constraints")]
    OutOfRange { gene: String, value: String },
    #[error("Genotype has {actual} loci, schema layout needs {expected}")]
    GenotypeLength { expected: usize, actual: usize },
    #[error("Genotype was encoded under a different schema layout")]
    ForeignGenotype,
}

/// Genotypes of mismatched schema shape handed to a genetic operator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperatorError {
    #[error("{operator}: genotype was encoded under a different schema layout")]
    ForeignGenotype { operator: &'static str },
    #[error("{operator}: genotype has {actual} loci, expected {expected}")]
    LengthMismatch {
        operator: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Selection over an empty or partially evaluated population.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectionError {
    #[error("Cannot select from an empty population")]
    EmptyPopulation,
    #[error("Individual {id} has not been evaluated")]
    Unevaluated { id: u64 },
}

/// Operation attempted in the wrong lifecycle state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Cannot {operation} while search is {state:?}")]
pub struct InvalidStateError {
    pub operation: &'static str,
    pub state: SearchState,
}

/// Failure raised by a caller-supplied fitness function.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct FitnessError(pub String);

impl FitnessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Fatal errors surfaced by [`GaSearch`](crate::GaSearch), with enough context
/// to diagnose without rerunning.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Schema rejected: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
    #[error("Backend failure while {state:?} at generation {generation}: {source}")]
    Transport {
        state: SearchState,
        generation: usize,
        #[source]
        source: TransportError,
    },
    #[error("Operator failure at generation {generation} (individual {individual:?}): {source}")]
    Operator {
        generation: usize,
        individual: Option<u64>,
        #[source]
        source: OperatorError,
    },
    #[error("Selection failure at generation {generation}: {source}")]
    Selection {
        generation: usize,
        #[source]
        source: SelectionError,
    },
    #[error("Decoding failure at generation {generation} (individual {individual}): {source}")]
    Encoding {
        generation: usize,
        individual: u64,
        #[source]
        source: EncodingError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = InvalidStateError {
            operation: "advance",
            state: SearchState::Terminated,
        };
        assert_eq!(err.to_string(), "Cannot advance while search is Terminated");
    }

    #[test]
    fn test_search_error_context() {
        let err = SearchError::Selection {
            generation: 3,
            source: SelectionError::Unevaluated { id: 7 },
        };
        let message = err.to_string();
        assert!(message.contains("generation 3"));
        assert!(message.contains("Individual 7"));
    }
}
