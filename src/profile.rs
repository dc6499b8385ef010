use std::collections::BTreeMap;

use intake::{IntakeProfile, FIELD_EMAIL, FIELD_MESSAGE, FIELD_NAME, FIELD_PHONE};
use serde::{Deserialize, Serialize};
use upstream::FieldBinding;

use crate::consent::{consent_bindings, CONSENT_AT, CONSENT_IP, CONSENT_UA};

pub const DEFAULT_ROUTE: &str = "form";
pub const CONTACT_ROUTE: &str = "contact";
pub const CONSENT_ROUTE: &str = "consent";
pub const DATA_REQUEST_ROUTE: &str = "lgpd";

/// Payload key of the data-subject request type.
pub const REQUEST_TYPE: &str = "request_type";

/// Request types a data subject may file, in canonical spelling.
pub const REQUEST_TYPES: [&str; 5] = ["acesso", "correcao", "exclusao", "portabilidade", "revogacao"];

/// One submission flow served by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteProfile {
    /// Route name; part of the URL and of the rate-limit key. Filled from
    /// the map key when profiles come from configuration.
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,
    /// Answer whose value is added to the record title after the prefix.
    #[serde(default)]
    pub title_field: Option<String>,
    #[serde(default)]
    pub require_message: bool,
    /// Upstream form for this route, when it differs from the global one.
    #[serde(default)]
    pub form_id: Option<String>,
    /// Upstream id overrides for the core fields of this route.
    #[serde(default)]
    pub field_overrides: BTreeMap<String, String>,
    /// Extra answer fields this route whitelists.
    #[serde(default)]
    pub fields: Vec<FieldBinding>,
}

fn default_title_prefix() -> String {
    "Lead".into()
}

impl RouteProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title_prefix: default_title_prefix(),
            title_field: None,
            require_message: false,
            form_id: None,
            field_overrides: BTreeMap::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = prefix.into();
        self
    }

    pub fn with_title_field(mut self, key: impl Into<String>) -> Self {
        self.title_field = Some(key.into());
        self
    }

    pub fn with_required_message(mut self) -> Self {
        self.require_message = true;
        self
    }

    pub fn with_field(mut self, binding: FieldBinding) -> Self {
        self.fields.push(binding);
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, id: impl Into<String>) -> Self {
        self.field_overrides.insert(key.into(), id.into());
        self
    }

    /// What the intake validator whitelists for this route.
    pub fn intake(&self) -> IntakeProfile {
        IntakeProfile::new(self.name.clone())
            .with_required_message(self.require_message)
            .with_answer_fields(self.fields.iter().map(|binding| binding.key.clone()))
            .with_required_answers(
                self.fields
                    .iter()
                    .filter(|binding| binding.required)
                    .map(|binding| binding.key.clone()),
            )
    }

    /// Every binding a submission on this route resolves: core fields,
    /// route answers, then consent fields.
    ///
    /// `global_overrides` apply first; the route's own overrides win.
    pub fn bindings(&self, global_overrides: &BTreeMap<String, String>) -> Vec<FieldBinding> {
        let mut bindings = core_bindings(self.require_message);
        bindings.extend(self.fields.iter().cloned());
        bindings.extend(consent_bindings());

        for binding in &mut bindings {
            let id = self
                .field_overrides
                .get(&binding.key)
                .or_else(|| global_overrides.get(&binding.key));
            if let Some(id) = id.filter(|id| !id.trim().is_empty()) {
                binding.id = Some(id.clone());
            }
        }
        bindings
    }
}

fn core_bindings(require_message: bool) -> Vec<FieldBinding> {
    let mut message = FieldBinding::new(FIELD_MESSAGE)
        .with_labels(["Mensagem", "Message"])
        .with_types(["long_text"]);
    if require_message {
        message = message.required();
    }

    vec![
        FieldBinding::new(FIELD_NAME)
            .with_id("nome_do_cliente")
            .with_labels(["Nome do cliente", "Nome", "Nome completo", "Name"])
            .required(),
        FieldBinding::new(FIELD_EMAIL)
            .with_id("e_mail")
            .with_labels(["E-mail", "Email"])
            .with_types(["email"])
            .required(),
        FieldBinding::new(FIELD_PHONE)
            .with_id("telefone_para_contato_whatsapp")
            .with_labels(["Telefone para contato (WhatsApp)", "Telefone", "Phone", "WhatsApp"])
            .with_types(["phone"]),
        message,
    ]
}

/// The investor questionnaire, the contact form, the standalone consent
/// registration and the data-subject request intake.
pub fn default_routes() -> Vec<RouteProfile> {
    vec![
        questionnaire_route(),
        contact_route(),
        consent_route(),
        data_request_route(),
    ]
}

fn questionnaire_route() -> RouteProfile {
    let answer = |key: &str, id: &str, label: &str| {
        FieldBinding::new(key).with_id(id).with_labels([label])
    };

    RouteProfile::new(DEFAULT_ROUTE)
        .with_title_prefix("Perfil do Investidor")
        .with_field(answer(
            "objectives",
            "qual_a_principal_finalidade_de_investir",
            "Qual a principal finalidade de investir?",
        ))
        .with_field(answer(
            "investment_horizon",
            "qual_o_seu_horizonte_de_investimento",
            "Qual o seu horizonte de investimento?",
        ))
        .with_field(answer("age_range", "qual_a_sua_faixa_et_ria", "Qual a sua faixa etária?"))
        .with_field(answer("marital_status", "estado_civil", "Estado civil"))
        .with_field(answer("dependents", "possui_dependentes", "Possui dependentes?"))
        .with_field(answer(
            "income_source",
            "qual_a_sua_principal_fonte_de_renda",
            "Qual a sua principal fonte de renda?",
        ))
        .with_field(answer("net_worth", "patrim_nio_l_quido", "Patrimônio líquido"))
        .with_field(answer(
            "risk_reaction",
            "como_voc_reagiria_a_uma_queda",
            "Como você reagiria a uma queda de 20% nos seus investimentos?",
        ))
}

fn contact_route() -> RouteProfile {
    RouteProfile::new(CONTACT_ROUTE)
        .with_title_prefix("Contato")
        .with_required_message()
        .with_override(FIELD_NAME, "nome")
        .with_override(FIELD_EMAIL, "email")
        .with_override(FIELD_PHONE, "telefone")
        .with_override(FIELD_MESSAGE, "mensagem")
}

fn consent_route() -> RouteProfile {
    RouteProfile::new(CONSENT_ROUTE)
        .with_title_prefix("Consentimento LGPD")
        .with_override(FIELD_NAME, "nome")
        .with_override(FIELD_EMAIL, "email")
        .with_override(FIELD_PHONE, "telefone")
        .with_override(CONSENT_AT, "consent_ts")
}

/// Access, correction, deletion, portability or revocation requests. The
/// server-observed time, address and user agent land on the `request_*`
/// fields of the request form.
fn data_request_route() -> RouteProfile {
    RouteProfile::new(DATA_REQUEST_ROUTE)
        .with_title_prefix("Solicitação LGPD")
        .with_title_field(REQUEST_TYPE)
        .with_field(
            FieldBinding::new(REQUEST_TYPE)
                .with_id("solicitacao_tipo")
                .with_labels(["Tipo de solicitação", "Solicitação"])
                .with_options(REQUEST_TYPES)
                .required(),
        )
        .with_override(FIELD_NAME, "nome")
        .with_override(FIELD_EMAIL, "email")
        .with_override(FIELD_MESSAGE, "mensagem")
        .with_override(CONSENT_AT, "request_ts")
        .with_override(CONSENT_IP, "request_ip")
        .with_override(CONSENT_UA, "request_ua")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding<'a>(bindings: &'a [FieldBinding], key: &str) -> &'a FieldBinding {
        bindings.iter().find(|b| b.key == key).unwrap()
    }

    #[test]
    fn default_routes_cover_every_flow() {
        let routes = default_routes();
        let names: Vec<&str> = routes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![DEFAULT_ROUTE, CONTACT_ROUTE, CONSENT_ROUTE, DATA_REQUEST_ROUTE]
        );
        assert!(routes[1].require_message);
        assert!(routes[0].intake().answer_fields.contains(&"objectives".to_string()));
    }

    #[test]
    fn message_is_required_only_where_declared() {
        let form = questionnaire_route().bindings(&BTreeMap::new());
        assert!(!binding(&form, FIELD_MESSAGE).required);
        let contact = contact_route().bindings(&BTreeMap::new());
        assert!(binding(&contact, FIELD_MESSAGE).required);
    }

    #[test]
    fn route_overrides_beat_global_ones() {
        let global = BTreeMap::from([
            (FIELD_EMAIL.to_string(), "global_mail".to_string()),
            (FIELD_PHONE.to_string(), "global_phone".to_string()),
        ]);
        let route = RouteProfile::new("r").with_override(FIELD_EMAIL, "route_mail");
        let bindings = route.bindings(&global);
        assert_eq!(binding(&bindings, FIELD_EMAIL).upstream_id(), "route_mail");
        assert_eq!(binding(&bindings, FIELD_PHONE).upstream_id(), "global_phone");
        assert_eq!(binding(&bindings, FIELD_NAME).upstream_id(), "nome_do_cliente");
    }

    #[test]
    fn data_requests_require_a_known_type() {
        let route = data_request_route();
        let intake = route.intake();
        assert_eq!(intake.required_answers, vec![REQUEST_TYPE.to_string()]);

        let bindings = route.bindings(&BTreeMap::new());
        let kind = binding(&bindings, REQUEST_TYPE);
        assert!(kind.required);
        assert_eq!(kind.options.len(), REQUEST_TYPES.len());
        assert_eq!(binding(&bindings, CONSENT_AT).upstream_id(), "request_ts");
        assert_eq!(binding(&bindings, CONSENT_UA).upstream_id(), "request_ua");
    }

    #[test]
    fn consent_bindings_are_optional() {
        let bindings = RouteProfile::new("r").bindings(&BTreeMap::new());
        let consent = binding(&bindings, crate::consent::CONSENT_AT);
        assert!(!consent.required);
    }
}
