use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::types::{CreateRecord, CreatedRecord, FieldMeta, NewField};

/// The CRM operations the gateway relies on.
///
/// Implementations must not retry on their own: record creation is not
/// idempotent, and retry policy belongs to the
/// [`SubmissionEngine`](crate::SubmissionEngine).
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Current field catalog of the form identified by `form_id`.
    async fn fetch_fields(&self, form_id: &str) -> Result<Vec<FieldMeta>, UpstreamError>;

    /// Create one record and return its identifier.
    async fn create_record(&self, request: &CreateRecord) -> Result<CreatedRecord, UpstreamError>;

    /// Add a field to the form's start phase. Only used by administrative
    /// provisioning; clients that cannot change forms keep the default.
    async fn create_field(&self, form_id: &str, field: &NewField) -> Result<FieldMeta, UpstreamError> {
        let _ = (form_id, field);
        Err(UpstreamError::NotConfigured(
            "this client cannot create form fields".into(),
        ))
    }
}
