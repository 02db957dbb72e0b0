//! Error taxonomy shared by every stage of a study.

/// Errors raised while validating data, fitting recipes, training estimators
/// or evaluating workflows.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A record or column does not match the fixed clinical schema.
    #[error("schema violation: {detail}")]
    SchemaViolation {
        /// Description of the mismatch.
        detail: String,
    },

    /// A stratum holds fewer records than the requested partitioning needs.
    #[error("insufficient samples: class {class} has {count} records, {required} required")]
    InsufficientSamples {
        /// Outcome class that is too small (`true` = deceased).
        class: bool,
        /// Records of that class in the parent partition.
        count: usize,
        /// Records required (usually the fold count).
        required: usize,
    },

    /// A column has no variance on the training partition.
    #[error("degenerate column '{column}': {detail}")]
    DegenerateColumn {
        /// Name of the offending design column.
        column: String,
        /// What made the column unusable.
        detail: String,
    },

    /// An estimator or optimiser failed to reach a usable solution.
    #[error("{model} failed to converge: {detail}")]
    NonConvergence {
        /// Estimator or routine that failed.
        model: String,
        /// Underlying failure.
        detail: String,
    },

    /// A configuration value is outside its admissible range.
    #[error("invalid configuration: {detail}")]
    InvalidConfig {
        /// Description of the bad value.
        detail: String,
    },

    /// Two aligned inputs disagree in length or width.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Expected length or width.
        expected: usize,
        /// Observed length or width.
        got: usize,
    },

    /// A fitted artifact could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn schema(detail: impl Into<String>) -> Self {
        ModelError::SchemaViolation {
            detail: detail.into(),
        }
    }

    pub(crate) fn config(detail: impl Into<String>) -> Self {
        ModelError::InvalidConfig {
            detail: detail.into(),
        }
    }

    pub(crate) fn non_convergence(model: impl Into<String>, detail: impl Into<String>) -> Self {
        ModelError::NonConvergence {
            model: model.into(),
            detail: detail.into(),
        }
    }

    /// Whether a hyperparameter search may score this failure as worst-case
    /// and carry on with the remaining configurations.
    pub fn is_recoverable_in_search(&self) -> bool {
        matches!(
            self,
            ModelError::NonConvergence { .. }
                | ModelError::DegenerateColumn { .. }
                | ModelError::InvalidConfig { .. }
        )
    }
}

/// Counts of recoverable events observed while running a study.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunDiagnostics {
    /// Hyperparameter configurations abandoned and scored worst-case.
    pub failed_configurations: usize,
    /// Individual fold fits that failed during search.
    pub failed_folds: usize,
    /// Bootstrap iterations whose statistic was undefined or failed.
    pub failed_bootstrap_iterations: usize,
    /// Probabilities clamped away from 0 or 1 before taking a logit.
    pub clipped_probabilities: usize,
    /// Design columns dropped because they were degenerate on a training partition.
    pub dropped_degenerate_columns: usize,
}

impl RunDiagnostics {
    /// Fold another set of counts into this one.
    pub fn absorb(&mut self, other: &RunDiagnostics) {
        self.failed_configurations += other.failed_configurations;
        self.failed_folds += other.failed_folds;
        self.failed_bootstrap_iterations += other.failed_bootstrap_iterations;
        self.clipped_probabilities += other.clipped_probabilities;
        self.dropped_degenerate_columns += other.dropped_degenerate_columns;
    }
}
