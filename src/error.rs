//! Error types for the Azure cluster actuator
//!
//! Errors carry the cluster name and the failing step so that a failed
//! reconciliation can be traced back to the collaborator that caused it.
//! The requeue signal is a distinct variant so callers can tell it apart
//! from terminal failures without inspecting messages.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for actuator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The cluster or its provider spec is not usable as declared
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
    },

    /// Provider spec/status could not be decoded or encoded
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The kind being (de)serialized, if known
        kind: Option<String>,
    },

    /// Certificate or key material could not be generated or parsed
    #[error("pki error: {source}")]
    Pki {
        /// The underlying PKI error
        #[from]
        source: crate::pki::PkiError,
    },

    /// Process configuration is missing or malformed
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is missing
        message: String,
    },

    /// A collaborator service failed
    #[error("{service} service error: {message}")]
    Service {
        /// Service that failed (certificates, resources, network, bastion)
        service: String,
        /// Description of what failed
        message: String,
        /// Whether the failure may clear up on its own
        retryable: bool,
    },

    /// Scope construction failed, no step was attempted
    #[error("failed to create scope: {source}")]
    ScopeCreation {
        /// Name of the cluster the scope was requested for
        cluster: String,
        /// Why the scope could not be created
        source: Box<Error>,
    },

    /// A reconciliation or deletion step failed
    #[error("failed to {step} for cluster {cluster:?}: {source}")]
    StepFailed {
        /// Name of the cluster being reconciled
        cluster: String,
        /// The step that failed, e.g. "reconcile certificates"
        step: String,
        /// The collaborator error
        source: Box<Error>,
    },

    /// Releasing the scope failed after all steps succeeded
    #[error("failed to close scope for cluster {cluster:?}: {source}")]
    ScopeClose {
        /// Name of the cluster whose scope failed to close
        cluster: String,
        /// Why the scope could not persist its state
        source: Box<Error>,
    },

    /// Something the caller asked for has not been provisioned yet
    #[error("cluster {cluster:?} has no {what} yet")]
    NotReady {
        /// Name of the cluster
        cluster: String,
        /// What is missing, e.g. "API server IP address"
        what: String,
    },

    /// Not a failure: the caller should retry after the given delay
    #[error("requeue in {requeue_after:?}")]
    RequeueAfter {
        /// How long the caller should wait before retrying
        requeue_after: Duration,
    },
}

impl Error {
    /// Create a validation error without cluster context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a retryable collaborator error
    pub fn service(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a collaborator error that will not clear up by retrying
    pub fn service_permanent(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Wrap a scope construction failure
    pub fn scope_creation(cluster: impl Into<String>, source: Error) -> Self {
        Self::ScopeCreation {
            cluster: cluster.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a step failure with the step and cluster name
    pub fn step_failed(cluster: impl Into<String>, step: impl Into<String>, source: Error) -> Self {
        Self::StepFailed {
            cluster: cluster.into(),
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a scope release failure
    pub fn scope_close(cluster: impl Into<String>, source: Error) -> Self {
        Self::ScopeClose {
            cluster: cluster.into(),
            source: Box::new(source),
        }
    }

    /// Create a not-ready error
    pub fn not_ready(cluster: impl Into<String>, what: impl Into<String>) -> Self {
        Self::NotReady {
            cluster: cluster.into(),
            what: what.into(),
        }
    }

    /// Create a requeue signal
    pub fn requeue_after(requeue_after: Duration) -> Self {
        Self::RequeueAfter { requeue_after }
    }

    /// The requested delay if this is a requeue signal
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self {
            Error::RequeueAfter { requeue_after } => Some(*requeue_after),
            _ => None,
        }
    }

    /// Returns true if this is a requeue signal rather than a failure
    pub fn is_requeue(&self) -> bool {
        matches!(self, Error::RequeueAfter { .. })
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and configuration errors need a fix to the
    /// cluster or the process environment. Wrapped errors defer to their cause.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Pki { .. } => false,
            Error::Config { .. } => false,
            Error::Service { retryable, .. } => *retryable,
            Error::ScopeCreation { source, .. } => source.is_retryable(),
            Error::StepFailed { source, .. } => source.is_retryable(),
            Error::ScopeClose { source, .. } => source.is_retryable(),
            Error::NotReady { .. } => true,
            Error::RequeueAfter { .. } => true,
        }
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Validation { cluster, .. } => Some(cluster),
            Error::ScopeCreation { cluster, .. } => Some(cluster),
            Error::StepFailed { cluster, .. } => Some(cluster),
            Error::ScopeClose { cluster, .. } => Some(cluster),
            Error::NotReady { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Get the failing step if this error wraps a step failure
    pub fn step(&self) -> Option<&str> {
        match self {
            Error::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: how failures surface from a reconciliation
    // ==========================================================================

    /// Story: a failed step names the step and the cluster
    ///
    /// When certificate issuance fails for "prod-eastus", the operator reading
    /// the controller logs sees which cluster and which step broke, followed by
    /// the collaborator's own message.
    #[test]
    fn story_step_failure_names_cluster_and_step() {
        let err = Error::step_failed(
            "prod-eastus",
            "reconcile certificates",
            Error::service("certificates", "key vault unreachable"),
        );

        assert_eq!(
            err.to_string(),
            "failed to reconcile certificates for cluster \"prod-eastus\": \
             certificates service error: key vault unreachable"
        );
        assert_eq!(err.cluster(), Some("prod-eastus"));
        assert_eq!(err.step(), Some("reconcile certificates"));
    }

    /// Story: scope construction failures are reported before any step runs
    #[test]
    fn story_scope_creation_failure_wraps_cause() {
        let err = Error::scope_creation(
            "dev",
            Error::validation_for("dev", "providerSpec.location must be set"),
        );

        assert!(err.to_string().starts_with("failed to create scope: "));
        assert!(err.to_string().contains("location must be set"));
        assert_eq!(err.cluster(), Some("dev"));
        assert!(!err.is_retryable());
    }

    /// Story: the requeue signal is recognised by kind, not by message
    #[test]
    fn story_requeue_signal_is_distinguishable() {
        let err = Error::requeue_after(Duration::from_secs(5));

        assert!(err.is_requeue());
        assert_eq!(err.requeue_delay(), Some(Duration::from_secs(5)));
        assert!(err.is_retryable());

        let terminal = Error::service("resources", "resource group stuck");
        assert!(!terminal.is_requeue());
        assert_eq!(terminal.requeue_delay(), None);
    }

    /// Story: a wrapped requeue signal is no longer a requeue signal
    ///
    /// Only the actuator's top-level delete result carries the signal; once an
    /// error is wrapped as a step failure it is a terminal error.
    #[test]
    fn story_wrapped_requeue_is_terminal_kind() {
        let err = Error::step_failed(
            "c",
            "reconcile network",
            Error::requeue_after(Duration::from_secs(1)),
        );
        assert!(!err.is_requeue());
        assert_eq!(err.requeue_delay(), None);
    }

    #[test]
    fn test_retryability_follows_cause() {
        assert!(Error::step_failed("c", "reconcile network", Error::service("network", "timeout"))
            .is_retryable());
        assert!(!Error::step_failed(
            "c",
            "reconcile network",
            Error::service_permanent("network", "address space overlaps")
        )
        .is_retryable());
        assert!(!Error::config("AZURE_SUBSCRIPTION_ID is not set").is_retryable());
        assert!(!Error::serialization("bad json").is_retryable());
    }

    #[test]
    fn test_scope_close_error_message() {
        let err = Error::scope_close("c1", Error::serialization("cannot encode status"));
        assert!(err.to_string().contains("failed to close scope for cluster \"c1\""));
        assert_eq!(err.cluster(), Some("c1"));
    }

    #[test]
    fn test_not_ready_is_retryable() {
        let err = Error::not_ready("c1", "API server IP address");
        assert_eq!(
            err.to_string(),
            "cluster \"c1\" has no API server IP address yet"
        );
        assert!(err.is_retryable());
        assert_eq!(err.cluster(), Some("c1"));
    }

    #[test]
    fn test_serialization_for_kind() {
        let err = Error::serialization_for_kind("AzureClusterProviderSpec", "missing field");
        match &err {
            Error::Serialization { kind, .. } => {
                assert_eq!(kind.as_deref(), Some("AzureClusterProviderSpec"));
            }
            _ => panic!("Expected Serialization variant"),
        }
    }

    #[test]
    fn test_validation_default_context() {
        match Error::validation("bad") {
            Error::Validation { cluster, .. } => assert_eq!(cluster, UNKNOWN_CONTEXT),
            _ => panic!("Expected Validation variant"),
        }
    }
}
