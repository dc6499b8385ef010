//! Schema resolution.
//!
//! The CRM's field catalog can change between deployments, so logical keys
//! are bound to concrete fields per submission. A [`FieldBinding`] is tried
//! against the catalog in a fixed order:
//!
//! 1. exact primary id ([`MatchStrategy::Id`])
//! 2. exact alternate id ([`MatchStrategy::InternalId`])
//! 3. folded label ([`MatchStrategy::Label`])
//! 4. first unclaimed field of a compatible type ([`MatchStrategy::TypeHeuristic`])
//!
//! The heuristic pass runs after every binding had its chance at an exact
//! match, so it never steals a field another binding names explicitly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use catalog::folded_eq;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::CrmClient;
use crate::error::UpstreamError;
use crate::types::FieldMeta;

/// How a logical key should be located in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    /// Stable internal name, also the payload key.
    pub key: String,
    /// Upstream identifier; defaults to `key`.
    #[serde(default)]
    pub id: Option<String>,
    /// Labels to try when no identifier matches.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Field types acceptable for the last-resort heuristic.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub required: bool,
    /// Local option catalog, used when the upstream field declares none.
    #[serde(default)]
    pub options: Vec<String>,
}

impl FieldBinding {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: None,
            labels: Vec::new(),
            types: Vec::new(),
            required: false,
            options: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn upstream_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Id,
    InternalId,
    Label,
    TypeHeuristic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub meta: FieldMeta,
    pub strategy: MatchStrategy,
}

/// Logical key to field lookup for one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSchema {
    fields: HashMap<String, ResolvedField>,
    catalog: Vec<FieldMeta>,
}

impl ResolvedSchema {
    pub fn get(&self, key: &str) -> Option<&FieldMeta> {
        self.fields.get(key).map(|resolved| &resolved.meta)
    }

    pub fn strategy(&self, key: &str) -> Option<MatchStrategy> {
        self.fields.get(key).map(|resolved| resolved.strategy)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The full catalog the schema was resolved from.
    pub fn catalog(&self) -> &[FieldMeta] {
        &self.catalog
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Required logical keys with no matching field. Carries the catalog
    /// snapshot for operator diagnosis.
    #[error("upstream schema lacks required field(s): {}", .missing.join(", "))]
    MissingFields {
        missing: Vec<String>,
        catalog: Vec<FieldMeta>,
    },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Bind `bindings` against `catalog`.
pub fn resolve_bindings(
    catalog: Vec<FieldMeta>,
    bindings: &[FieldBinding],
) -> Result<ResolvedSchema, ResolveError> {
    let mut fields: HashMap<String, ResolvedField> = HashMap::new();
    let mut claimed: HashSet<usize> = HashSet::new();

    for binding in bindings {
        if let Some((index, strategy)) = exact_match(&catalog, binding) {
            claimed.insert(index);
            fields.insert(
                binding.key.clone(),
                ResolvedField {
                    meta: catalog[index].clone(),
                    strategy,
                },
            );
        }
    }

    for binding in bindings {
        if fields.contains_key(&binding.key) || binding.types.is_empty() {
            continue;
        }
        let candidate = catalog.iter().enumerate().find(|(index, field)| {
            !claimed.contains(index) && binding.types.iter().any(|t| *t == field.field_type)
        });
        if let Some((index, field)) = candidate {
            warn!(
                key = %binding.key,
                field_id = %field.id,
                field_type = %field.field_type,
                "schema field bound by type heuristic"
            );
            claimed.insert(index);
            fields.insert(
                binding.key.clone(),
                ResolvedField {
                    meta: field.clone(),
                    strategy: MatchStrategy::TypeHeuristic,
                },
            );
        }
    }

    let missing: Vec<String> = bindings
        .iter()
        .filter(|binding| binding.required && !fields.contains_key(&binding.key))
        .map(|binding| binding.key.clone())
        .collect();
    if !missing.is_empty() {
        return Err(ResolveError::MissingFields { missing, catalog });
    }

    debug!(resolved = fields.len(), catalog = catalog.len(), "schema resolved");
    Ok(ResolvedSchema { fields, catalog })
}

fn exact_match(catalog: &[FieldMeta], binding: &FieldBinding) -> Option<(usize, MatchStrategy)> {
    let wanted = binding.upstream_id();

    if let Some(index) = catalog.iter().position(|field| field.id == wanted) {
        return Some((index, MatchStrategy::Id));
    }
    if let Some(index) = catalog
        .iter()
        .position(|field| field.internal_id.as_deref() == Some(wanted))
    {
        return Some((index, MatchStrategy::InternalId));
    }

    let mut labels = binding.labels.iter().map(String::as_str).chain([binding.key.as_str()]);
    labels.find_map(|label| {
        catalog
            .iter()
            .position(|field| !field.label.is_empty() && folded_eq(&field.label, label))
            .map(|index| (index, MatchStrategy::Label))
    })
}

/// Fetches the catalog once per call and resolves bindings against it.
pub struct SchemaResolver {
    client: Arc<dyn CrmClient>,
    timeout: Duration,
}

impl SchemaResolver {
    pub fn new(client: Arc<dyn CrmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn resolve(
        &self,
        form_id: &str,
        bindings: &[FieldBinding],
    ) -> Result<ResolvedSchema, ResolveError> {
        let catalog = tokio::time::timeout(self.timeout, self.client.fetch_fields(form_id))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;
        resolve_bindings(catalog, bindings)
    }
}
