use reqwest::Url;

/// Parse "true"/"false"/"1"/"0"/"yes"/"no"/"on"/"off" from an owned String.
pub fn parse_bool_flag(s: String) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Returns true for localhost, loopback IPv4/IPv6, and 0.0.0.0 URLs.
pub fn is_local_endpoint_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };

    parsed.host_str().is_some_and(|host| {
        let host = host.trim().to_ascii_lowercase();
        host == "localhost" || host == "[::1]" || host == "0.0.0.0" || host.starts_with("127.")
    })
}
