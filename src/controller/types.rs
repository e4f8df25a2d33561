//! # Types
//!
//! Core types shared by the reconcilers.

use crate::certificate::CertificateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The certificate Secret the webhook must point at does not exist (yet)
    #[error("certificate secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    /// Generating a certificate, or reading the stored one, failed
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// A read or write against the API server failed
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}
