//! Abstract ERP document submission seam.
//!
//! The concrete wire client (SOAP/REST session handling, authentication,
//! payload mapping) lives in a sibling crate; the posting worker only needs
//! the ability to submit a document and to distinguish "try again later" from
//! "this document will never be accepted".

use async_trait::async_trait;
use serde_json::Value;

/// Failure modes of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// ERP unreachable, timed out, or returned a retryable fault.
    /// The posting worker retries these with backoff.
    #[error("Transient submission failure: {0}")]
    Transient(String),

    /// The ERP rejected the document as malformed or violating a business
    /// rule. Retrying cannot succeed; the item fails immediately.
    #[error("Document rejected by ERP: {0}")]
    Rejected(String),
}

/// Capability to submit a finalized document to the external system of record.
#[async_trait]
pub trait DocumentPoster: Send + Sync {
    /// Submits one document and returns the id the ERP assigned to it.
    async fn submit(&self, document_type: &str, payload: &Value)
        -> Result<String, SubmitError>;
}
