//! Request-observed facts: who is calling, with what, and log-safe views of
//! the personal data in a submission.

use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use leadgate::hash_address;

pub const UNKNOWN_IDENTITY: &str = "unknown";
const FORWARDED_FOR: &str = "x-forwarded-for";
const MAX_USER_AGENT_CHARS: usize = 512;

/// Client identity for rate limiting and consent.
///
/// The trusted platform header wins, then the left-most `X-Forwarded-For`
/// entry; with neither, every caller shares the `"unknown"` bucket.
pub fn client_identity(headers: &HeaderMap, trusted_header: Option<&str>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    trusted_header
        .and_then(header)
        .or_else(|| {
            header(FORWARDED_FOR)
                .and_then(|chain| chain.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_CHARS).collect())
        .unwrap_or_default()
}

pub fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// `ana@example.com` becomes `a***@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        None => "***".into(),
    }
}

/// Every digit but the last four is replaced.
pub fn mask_phone(phone: &str) -> String {
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    let mut seen = 0;
    phone
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                seen += 1;
                if seen + 4 <= digits {
                    return '*';
                }
            }
            c
        })
        .collect()
}

/// Short salted hash of a client address for log lines.
pub fn identity_tag(identity: &str, salt: Option<&str>) -> String {
    let mut digest = hash_address(identity, salt.unwrap_or("leadgate"));
    digest.truncate(16);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn identity_prefers_trusted_header() {
        let h = headers(&[("x-nf-client-connection-ip", "198.51.100.4"), (FORWARDED_FOR, "10.0.0.1")]);
        assert_eq!(client_identity(&h, Some("x-nf-client-connection-ip")), "198.51.100.4");
        assert_eq!(client_identity(&h, None), "10.0.0.1");
    }

    #[test]
    fn identity_uses_leftmost_forwarded_address() {
        let h = headers(&[(FORWARDED_FOR, " 203.0.113.5 , 10.0.0.1, 10.0.0.2")]);
        assert_eq!(client_identity(&h, None), "203.0.113.5");
    }

    #[test]
    fn identity_falls_back_to_unknown() {
        assert_eq!(client_identity(&HeaderMap::new(), Some("x-real-ip")), UNKNOWN_IDENTITY);
        let h = headers(&[(FORWARDED_FOR, " , ")]);
        assert_eq!(client_identity(&h, None), UNKNOWN_IDENTITY);
    }

    #[test]
    fn masks_personal_data() {
        assert_eq!(mask_email("ana@example.com"), "a***@example.com");
        assert_eq!(mask_email("nonsense"), "***");
        assert_eq!(mask_phone("+5511999991234"), "+*********1234");
        assert_eq!(identity_tag("203.0.113.5", None).len(), 16);
    }
}
