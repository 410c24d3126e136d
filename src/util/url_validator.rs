use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Longest URL accepted for a subscription.
const MAX_URL_LENGTH: usize = 2048;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("URL longer than 2048 characters")]
    TooLong,
    /// The host is loopback, private, link-local or unspecified.
    #[error("Private or local address not allowed: {0}")]
    PrivateHost(String),
}

/// Syntactic check for a feed URL: absolute, http(s), with a host.
///
/// This is what subscriptions are held to. Whether the host is reachable,
/// or even resolves, is only discovered on refresh.
///
/// # Examples
///
/// ```
/// use rsscast::util::validate_feed_url;
///
/// assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_feed_url("not a url").is_err());
/// assert!(validate_feed_url("ftp://example.com/feed").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url_str = url_str.trim();
    if url_str.len() > MAX_URL_LENGTH {
        return Err(UrlValidationError::TooLong);
    }

    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// [`validate_feed_url`] plus an SSRF guard: rejects `localhost` and literal
/// loopback, private (RFC 1918), link-local, unique-local and unspecified
/// addresses.
///
/// Applied to links taken from feed content before the server fetches them.
/// Hostnames are not resolved, so a public name pointing at a private
/// address still passes.
pub fn validate_public_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = validate_feed_url(url_str)?;

    if let Some(host) = url.host_str() {
        if host.eq_ignore_ascii_case("localhost") || host.ends_with(".localhost") {
            return Err(UrlValidationError::PrivateHost(host.to_owned()));
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateHost(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_url_accepts_http_and_https() {
        assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(validate_feed_url("http://news.example.org").is_ok());
        assert!(validate_feed_url("  https://example.com/padded  ").is_ok());
        // Syntactic only: local hosts are fine for subscriptions
        assert!(validate_feed_url("http://127.0.0.1:8080/feed").is_ok());
    }

    #[test]
    fn test_feed_url_rejects_garbage() {
        assert!(matches!(
            validate_feed_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_feed_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_feed_url("").is_err());

        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(matches!(
            validate_feed_url(&long),
            Err(UrlValidationError::TooLong)
        ));
    }

    #[test]
    fn test_public_url_rejects_local_hosts() {
        for url in [
            "http://localhost/page",
            "http://api.localhost/page",
            "http://127.0.0.1/page",
            "http://[::1]/page",
            "http://0.0.0.0/page",
            "http://10.0.0.1:3000/page",
            "http://172.16.0.1/page",
            "http://192.168.1.1:8080/page",
            "http://169.254.169.254/latest/meta-data",
            "http://[fe80::1]/page",
            "http://[fd00::1]/page",
            "http://[::ffff:192.168.0.1]/page",
        ] {
            assert!(
                matches!(validate_public_url(url), Err(UrlValidationError::PrivateHost(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_public_url_accepts_public_hosts() {
        assert!(validate_public_url("https://example.com:443/article").is_ok());
        assert!(validate_public_url("http://93.184.216.34/article").is_ok());
    }
}
