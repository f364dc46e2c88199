use thiserror::Error;

/// Failures surfaced while assembling manager descriptors.
///
/// None of these are retried here; the calling reconciler owns retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The cluster configuration cannot be turned into a schedulable pod
    ///
    /// Raised for malformed multi-network selectors and for user labels that
    /// clobber the labels the deployment selects on.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A controller owner reference could not be set on a descriptor
    #[error("failed to set owner reference to {kind} {name:?}: {reason}")]
    Ownership {
        /// Kind of the descriptor being owned
        kind: String,
        /// Name of the descriptor being owned
        name: String,
        /// Why the owner could not be resolved
        reason: String,
    },

    /// An alert rule override does not fit the built-in catalog
    #[error("invalid alert rule override: {0}")]
    Validation(String),
}
