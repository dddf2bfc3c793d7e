//! Error types for the mesh adapter
//!
//! Each variant maps to one failure category of the lifecycle core. Variants
//! carry enough context (operation, source, namespace) to produce a
//! human-readable event detail without consulting logs.

use thiserror::Error;

/// Main error type for mesh adapter operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Adapter configuration could not be read or is invalid (fatal at startup)
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
    },

    /// Component generation failed (fetch, parse or write)
    #[error("component generation failed for {source_ref}: {message}")]
    GenerationFailed {
        /// Manifest URL or chart reference being generated from
        source_ref: String,
        /// Underlying cause
        message: String,
    },

    /// The requested operation is not present in the registry
    #[error("operation {operation:?} is not supported by this adapter")]
    OpInvalid {
        /// Operation name as received
        operation: String,
    },

    /// The cluster rejected a mutation
    #[error("apply failed{}: {message}", namespace_suffix(.namespace))]
    ApplyFailed {
        /// Description of what failed
        message: String,
        /// Target namespace (if any)
        namespace: Option<String>,
    },

    /// A declarative document could not be parsed
    #[error("failed to parse {document}: {message}")]
    ParseFailed {
        /// Which document failed (e.g. "component", "application configuration")
        document: String,
        /// Parser error
        message: String,
    },

    /// One or both declarative reconciliation phases failed
    #[error("declarative reconciliation failed: {summary}")]
    AggregateReconcile {
        /// Component phase message followed by configuration phase message
        summary: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "registrar", "release-lister")
        context: String,
    },
}

fn namespace_suffix(namespace: &Option<String>) -> String {
    match namespace {
        Some(ns) => format!(" in namespace {ns}"),
        None => String::new(),
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a generation error for the given source
    pub fn generation(source_ref: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::GenerationFailed {
            source_ref: source_ref.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-operation error
    pub fn op_invalid(operation: impl Into<String>) -> Self {
        Self::OpInvalid {
            operation: operation.into(),
        }
    }

    /// Create an apply error without namespace context
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::ApplyFailed {
            message: msg.into(),
            namespace: None,
        }
    }

    /// Create an apply error scoped to a namespace
    pub fn apply_in(namespace: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ApplyFailed {
            message: msg.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Create a parse error for the named document
    pub fn parse(document: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ParseFailed {
            document: document.into(),
            message: msg.into(),
        }
    }

    /// Create an aggregate reconciliation error
    pub fn aggregate(summary: impl Into<String>) -> Self {
        Self::AggregateReconcile {
            summary: summary.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }
}
