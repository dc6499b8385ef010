//! CRM upstream
//!
//! Everything the gateway knows about the remote system of record lives here:
//!
//! - [`CrmClient`] is the seam. The gateway only needs a schema-discovery
//!   query and a record-creation mutation; [`GraphqlCrmClient`] implements
//!   both over HTTP.
//! - [`SchemaResolver`] fetches the field catalog once per submission and
//!   binds logical keys to concrete fields ([`FieldBinding`],
//!   [`resolve_bindings`]).
//! - [`SubmissionEngine`] creates the record, with a single bounded retry on
//!   the alternate identifier namespace when a field id is rejected.
//! - [`CrmClient::create_field`] backs the administrative provisioning of
//!   consent fields.

mod client;
mod engine;
mod error;
mod graphql;
mod schema;
mod types;

pub use crate::client::CrmClient;
pub use crate::engine::{is_field_not_found, EngineOutcome, SubmissionEngine};
pub use crate::error::UpstreamError;
pub use crate::graphql::{graphql_errors, GraphqlCrmClient, UpstreamConfig};
pub use crate::schema::{
    resolve_bindings, FieldBinding, MatchStrategy, ResolveError, ResolvedField, ResolvedSchema,
    SchemaResolver,
};
pub use crate::types::{
    AttributeValue, CreateRecord, CreatedRecord, FieldMeta, NewField, NormalizedAttribute,
    OutboundAttribute, RecordDraft,
};
