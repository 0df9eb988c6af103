//! Security consent cookie.
//!
//! The cookie scope follows the access channel: pages served through the
//! tunnel share the provider's domain suffix, direct access stays host-only.

use axum::http::header::{HOST, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use std::time::Duration;

pub const CONSENT_COOKIE_NAME: &str = "webeditxSecurityAccepted";
pub const CONSENT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_TUNNEL_DOMAIN: &str = ".loca.lt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes of one consent cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentCookie {
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age: Duration,
}

impl ConsentCookie {
    pub fn header_value(&self) -> String {
        let mut cookie = format!(
            "{}=true; Path=/; Max-Age={}",
            CONSENT_COOKIE_NAME,
            self.max_age.as_secs()
        );
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.same_site.as_str());
        cookie
    }
}

/// Decides the cookie scope for incoming requests.
#[derive(Debug, Clone)]
pub struct ConsentGate {
    tunnel_domain: String,
}

impl Default for ConsentGate {
    fn default() -> Self {
        Self::new(DEFAULT_TUNNEL_DOMAIN)
    }
}

impl ConsentGate {
    pub fn new(tunnel_domain: impl Into<String>) -> Self {
        Self {
            tunnel_domain: tunnel_domain.into(),
        }
    }

    pub fn is_tunnel_host(&self, hostname: &str) -> bool {
        hostname.ends_with(&self.tunnel_domain)
    }

    pub fn cookie_for(&self, hostname: &str, https: bool) -> ConsentCookie {
        if self.is_tunnel_host(hostname) {
            ConsentCookie {
                domain: Some(self.tunnel_domain.clone()),
                secure: true,
                same_site: SameSite::None,
                max_age: CONSENT_MAX_AGE,
            }
        } else {
            ConsentCookie {
                domain: None,
                secure: https,
                same_site: SameSite::Lax,
                max_age: CONSENT_MAX_AGE,
            }
        }
    }

    /// Build the `Set-Cookie` header for a request with `headers`.
    ///
    /// Forwarded headers are trusted since the tunnel relays plain HTTP.
    pub fn set_cookie_header(
        &self,
        headers: &HeaderMap,
    ) -> Result<(axum::http::HeaderName, HeaderValue), axum::http::header::InvalidHeaderValue> {
        let cookie = self.cookie_for(&request_hostname(headers), request_is_https(headers));
        Ok((SET_COOKIE, HeaderValue::from_str(&cookie.header_value())?))
    }
}

fn first_header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Host name without port, preferring `X-Forwarded-Host`.
pub fn request_hostname(headers: &HeaderMap) -> String {
    let host = first_header_value(headers, "x-forwarded-host")
        .or_else(|| first_header_value(headers, HOST.as_str()))
        .unwrap_or_default();
    strip_port(host).to_ascii_lowercase()
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal
        return rest.split(']').next().unwrap_or(rest);
    }
    host.split(':').next().unwrap_or(host)
}

pub fn request_is_https(headers: &HeaderMap) -> bool {
    first_header_value(headers, "x-forwarded-proto")
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn tunnel_host_gets_wildcard_cross_site_cookie() {
        let gate = ConsentGate::default();
        let cookie = gate.cookie_for("quick-fox-12.loca.lt", false);
        assert_eq!(cookie.domain.as_deref(), Some(".loca.lt"));
        assert!(cookie.secure);
        assert_eq!(cookie.same_site, SameSite::None);
        assert_eq!(
            cookie.header_value(),
            "webeditxSecurityAccepted=true; Path=/; Max-Age=604800; Domain=.loca.lt; Secure; SameSite=None"
        );
    }

    #[test]
    fn direct_host_is_host_scoped() {
        let gate = ConsentGate::default();
        let cookie = gate.cookie_for("localhost", false);
        assert_eq!(cookie.domain, None);
        assert!(!cookie.secure);
        assert_eq!(
            cookie.header_value(),
            "webeditxSecurityAccepted=true; Path=/; Max-Age=604800; SameSite=Lax"
        );

        assert!(gate.cookie_for("192.168.1.4", true).secure);
    }

    #[test]
    fn suffix_match_does_not_leak_to_lookalikes() {
        let gate = ConsentGate::default();
        assert!(!gate.is_tunnel_host("evil-loca.lt.example.com"));
        assert!(!gate.is_tunnel_host("loca.lt.evil"));
        assert!(gate.is_tunnel_host("abc.loca.lt"));
    }

    #[test]
    fn hostname_prefers_forwarded_host_and_drops_port() {
        let map = headers(&[("host", "localhost:3000"), ("x-forwarded-host", "abc.loca.lt")]);
        assert_eq!(request_hostname(&map), "abc.loca.lt");

        let map = headers(&[("host", "LocalHost:3000")]);
        assert_eq!(request_hostname(&map), "localhost");

        let map = headers(&[("host", "[::1]:3000")]);
        assert_eq!(request_hostname(&map), "::1");

        assert_eq!(request_hostname(&HeaderMap::new()), "");
    }

    #[test]
    fn https_detected_from_forwarded_proto() {
        assert!(request_is_https(&headers(&[("x-forwarded-proto", "https")])));
        assert!(request_is_https(&headers(&[("x-forwarded-proto", "HTTPS, http")])));
        assert!(!request_is_https(&headers(&[("x-forwarded-proto", "http")])));
        assert!(!request_is_https(&HeaderMap::new()));
    }

    #[test]
    fn set_cookie_header_uses_request_channel() {
        let gate = ConsentGate::default();
        let map = headers(&[("host", "localhost:3000"), ("x-forwarded-host", "abc.loca.lt")]);
        let (name, value) = gate.set_cookie_header(&map).unwrap();
        assert_eq!(name, SET_COOKIE);
        assert!(value.to_str().unwrap().contains("Domain=.loca.lt"));
    }
}
