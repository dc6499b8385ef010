use catalog::Cardinality;
use serde::{Deserialize, Serialize};

/// One field of the CRM's current form catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub id: String,
    /// The CRM's second identifier namespace for the same field.
    #[serde(default)]
    pub internal_id: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    /// Canonical option spellings; empty means free text.
    #[serde(default)]
    pub options: Vec<String>,
    /// Multi-select flag as reported by the CRM, when it reports one.
    #[serde(default)]
    pub multiple: Option<bool>,
}

impl FieldMeta {
    pub fn new(id: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            internal_id: None,
            label: String::new(),
            field_type: field_type.into(),
            options: Vec::new(),
            multiple: None,
        }
    }

    pub fn with_internal_id(mut self, internal_id: impl Into<String>) -> Self {
        self.internal_id = Some(internal_id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
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

    pub fn with_multiple(mut self, multiple: bool) -> Self {
        self.multiple = Some(multiple);
        self
    }

    /// The reported `multiple` flag wins; without one, checklist-style
    /// fields keep every selected option.
    pub fn cardinality(&self) -> Cardinality {
        let multiple = self
            .multiple
            .unwrap_or_else(|| self.field_type.contains("checklist"));
        if multiple {
            Cardinality::Multiple
        } else {
            Cardinality::Single
        }
    }

    /// The alternate identifier, when it differs from the primary one.
    pub fn alternate_id(&self) -> Option<&str> {
        self.internal_id
            .as_deref()
            .filter(|internal| !internal.is_empty() && *internal != self.id)
    }
}

/// A value ready to be written to the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    List(Vec<String>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(text) => Some(text),
            AttributeValue::List(_) => None,
        }
    }
}

/// `{field_id, field_value}` as the create-record mutation expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedAttribute {
    #[serde(rename = "field_id")]
    pub field_id: String,
    #[serde(rename = "field_value")]
    pub value: AttributeValue,
}

/// An attribute that still knows both of its identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundAttribute {
    pub logical_key: String,
    pub primary_id: String,
    pub alternate_id: Option<String>,
    pub value: AttributeValue,
}

impl OutboundAttribute {
    pub fn for_field(logical_key: impl Into<String>, meta: &FieldMeta, value: AttributeValue) -> Self {
        Self {
            logical_key: logical_key.into(),
            primary_id: meta.id.clone(),
            alternate_id: meta.alternate_id().map(str::to_string),
            value,
        }
    }
}

/// Everything needed to create one record, before identifiers are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub form_id: String,
    pub title: String,
    pub attributes: Vec<OutboundAttribute>,
}

impl RecordDraft {
    pub fn new(form_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            form_id: form_id.into(),
            title: title.into(),
            attributes: Vec::new(),
        }
    }

    pub fn push(&mut self, attribute: OutboundAttribute) {
        self.attributes.push(attribute);
    }

    pub fn attribute(&self, logical_key: &str) -> Option<&OutboundAttribute> {
        self.attributes
            .iter()
            .find(|attr| attr.logical_key == logical_key)
    }

    /// Build the create call, using alternates for the listed primary ids.
    pub fn to_request(&self, substitute: &[String]) -> CreateRecord {
        let attributes = self
            .attributes
            .iter()
            .map(|attr| {
                let field_id = match attr.alternate_id.as_deref() {
                    Some(alternate) if substitute.contains(&attr.primary_id) => alternate,
                    _ => attr.primary_id.as_str(),
                };
                NormalizedAttribute {
                    field_id: field_id.to_string(),
                    value: attr.value.clone(),
                }
            })
            .collect();

        CreateRecord {
            form_id: self.form_id.clone(),
            title: self.title.clone(),
            attributes,
        }
    }
}

/// The create-record call as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateRecord {
    pub form_id: String,
    pub title: String,
    pub attributes: Vec<NormalizedAttribute>,
}

/// A form field to be created upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewField {
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
}

impl NewField {
    pub fn new(label: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            field_type: field_type.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// What the CRM gives back for a created record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checklist_fields_are_multi_select() {
        assert_eq!(
            FieldMeta::new("a", "checklist_vertical").cardinality(),
            Cardinality::Multiple
        );
        assert_eq!(FieldMeta::new("b", "select").cardinality(), Cardinality::Single);
    }

    #[test]
    fn reported_multiple_flag_beats_the_type_name() {
        let select = FieldMeta::new("a", "select").with_multiple(true);
        assert_eq!(select.cardinality(), Cardinality::Multiple);
        let checklist = FieldMeta::new("b", "checklist_vertical").with_multiple(false);
        assert_eq!(checklist.cardinality(), Cardinality::Single);
    }

    #[test]
    fn alternate_id_ignores_duplicates() {
        let same = FieldMeta::new("e_mail", "email").with_internal_id("e_mail");
        assert_eq!(same.alternate_id(), None);
        let other = FieldMeta::new("e_mail", "email").with_internal_id("318829");
        assert_eq!(other.alternate_id(), Some("318829"));
    }

    #[test]
    fn substitution_only_touches_listed_attributes() {
        let email = FieldMeta::new("e_mail", "email").with_internal_id("318829");
        let name = FieldMeta::new("nome", "short_text").with_internal_id("318830");
        let mut draft = RecordDraft::new("42", "Lead - Ana");
        draft.push(OutboundAttribute::for_field(
            "email",
            &email,
            AttributeValue::Text("ana@example.com".into()),
        ));
        draft.push(OutboundAttribute::for_field(
            "name",
            &name,
            AttributeValue::Text("Ana".into()),
        ));

        let primary = draft.to_request(&[]);
        assert_eq!(primary.attributes[0].field_id, "e_mail");

        let fallback = draft.to_request(&["e_mail".to_string()]);
        assert_eq!(fallback.attributes[0].field_id, "318829");
        assert_eq!(fallback.attributes[1].field_id, "nome");
    }

    #[test]
    fn attribute_serializes_with_wire_names() {
        let attr = NormalizedAttribute {
            field_id: "objectives".into(),
            value: AttributeValue::List(vec!["Crescimento".into()]),
        };
        let json = serde_json::to_value(&attr).unwrap();
        assert_eq!(json["field_id"], "objectives");
        assert_eq!(json["field_value"][0], "Crescimento");
    }
}
