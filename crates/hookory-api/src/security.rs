//! Security utilities for input validation and sanitization.
//!
//! This module provides:
//! - Source URL validation (SSRF protection for URL input)
//! - Input text sanitization

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::warn;
use url::{Host, Url};

/// Maximum URL length to prevent DoS attacks.
const MAX_URL_LENGTH: usize = 2048;

/// Hostnames that resolve to cloud metadata or the local machine.
const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata", "metadata.google.internal"];

/// Result of URL validation.
#[derive(Debug)]
pub enum UrlValidationResult {
    /// URL is valid and allowed.
    Valid(Url),
    /// URL is malformed or uses an unsupported protocol.
    Invalid(String),
    /// URL targets a private or internal address.
    Blocked(String),
    /// URL exceeds maximum length.
    TooLong,
}

impl UrlValidationResult {
    /// Convert to Result for easy error handling.
    pub fn into_result(self) -> Result<Url, String> {
        match self {
            Self::Valid(url) => Ok(url),
            Self::Invalid(msg) | Self::Blocked(msg) => Err(msg),
            Self::TooLong => Err(format!(
                "URL exceeds maximum length of {} characters",
                MAX_URL_LENGTH
            )),
        }
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // Carrier-grade NAT
        || (ip.octets()[0] == 100 && (64..128).contains(&ip.octets()[1]))
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
}

/// Whether `url` points at a private, loopback or metadata address.
pub fn is_internal_target(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_blocked_v4(ip),
        Some(Host::Ipv6(ip)) => is_blocked_v6(ip),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if let Ok(ip) = domain.parse::<IpAddr>() {
                return match ip {
                    IpAddr::V4(v4) => is_blocked_v4(v4),
                    IpAddr::V6(v6) => is_blocked_v6(v6),
                };
            }
            BLOCKED_HOSTS.contains(&domain.as_str())
                || domain.ends_with(".localhost")
                || domain.ends_with(".internal")
        }
        None => true,
    }
}

/// Validate a user-supplied source URL before fetching it.
///
/// Only http/https are accepted, and hosts on private networks or cloud
/// metadata endpoints are refused.
pub fn validate_source_url(url: &str) -> UrlValidationResult {
    if url.len() > MAX_URL_LENGTH {
        return UrlValidationResult::TooLong;
    }

    let url = url.trim();
    if url.is_empty() {
        return UrlValidationResult::Invalid("URL is required.".to_string());
    }

    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return UrlValidationResult::Invalid("Invalid URL format".to_string()),
    };

    match parsed.scheme() {
        "http" | "https" => {}
        _ => {
            return UrlValidationResult::Invalid(
                "Only HTTP and HTTPS URLs are supported".to_string(),
            )
        }
    }

    if is_internal_target(&parsed) {
        warn!(url = %url, "Blocked internal URL target");
        return UrlValidationResult::Blocked(
            "URL appears to target an internal or restricted endpoint".to_string(),
        );
    }

    UrlValidationResult::Valid(parsed)
}

/// Strip control characters other than newlines and tabs.
pub fn sanitize_input(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
