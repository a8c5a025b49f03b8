//! Client metadata captured at first contact and on each scene connection.

use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use serde::Serialize;
use utoipa::ToSchema;

/// Browser family tokens, most specific first (Chrome UAs also claim Safari).
const KNOWN_FAMILIES: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("OPR/", "Opera"),
    ("Firefox/", "Firefox"),
    ("Chrome/", "Chrome"),
    ("Version/", "Safari"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct UserAgent {
    pub family: String,
    pub major: Option<String>,
}

impl UserAgent {
    pub fn parse(raw: &str) -> Self {
        for (token, family) in KNOWN_FAMILIES {
            if let Some(pos) = raw.find(token) {
                let version = &raw[pos + token.len()..];
                return Self {
                    family: family.to_string(),
                    major: major_version(version),
                };
            }
        }

        // Unknown agent: fall back to the first product token, e.g. `curl/8.4.0`.
        let product = raw.split_whitespace().next().unwrap_or_default();
        match product.split_once('/') {
            Some((name, version)) if !name.is_empty() => Self {
                family: name.to_string(),
                major: major_version(version),
            },
            _ => Self {
                family: if product.is_empty() { "Other" } else { product }.to_string(),
                major: None,
            },
        }
    }
}

fn major_version(version: &str) -> Option<String> {
    let major: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!major.is_empty()).then_some(major)
}

/// Who is on the other end of a session or scene.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: UserAgent,
}

impl ClientInfo {
    pub fn new(ip: Option<String>, user_agent: UserAgent) -> Self {
        Self { ip, user_agent }
    }

    /// Build from request headers (`User-Agent`, first `X-Forwarded-For` hop).
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(UserAgent::parse)
            .unwrap_or_default();

        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Self { ip, user_agent }
    }

    /// Label shown in the session menu: `Firefox 118: 10.0.0.1`.
    pub fn label(&self) -> String {
        let mut label = self.user_agent.family.clone();
        if label.is_empty() {
            label.push_str("Other");
        }
        if let Some(major) = &self.user_agent.major {
            label.push(' ');
            label.push_str(major);
        }
        label.push_str(": ");
        label.push_str(self.ip.as_deref().unwrap_or("unknown"));
        label
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn parses_common_browsers() {
        let firefox = UserAgent::parse(
            "Mozilla/5.0 (X11; Linux x86_64; rv:118.0) Gecko/20100101 Firefox/118.0",
        );
        assert_eq!(firefox.family, "Firefox");
        assert_eq!(firefox.major.as_deref(), Some("118"));

        let chrome = UserAgent::parse(
            "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(chrome.family, "Chrome");
        assert_eq!(chrome.major.as_deref(), Some("120"));
    }

    #[test]
    fn unknown_agent_uses_first_product() {
        let curl = UserAgent::parse("curl/8.4.0");
        assert_eq!(curl.family, "curl");
        assert_eq!(curl.major.as_deref(), Some("8"));

        assert_eq!(UserAgent::parse("").family, "Other");
    }

    #[test]
    fn from_headers_and_label() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.4.0"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 172.16.0.1"));

        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(client.label(), "curl 8: 10.0.0.1");

        assert_eq!(ClientInfo::default().label(), "Other: unknown");
    }
}
