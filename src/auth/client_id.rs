use axum::http::HeaderMap;

/// Bucket shared by every request that carries no usable address header.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Client address as reported by the fronting proxy, if any.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return Some(forwarded.to_string());
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Key used by the login rate limiter.
///
/// Unidentifiable clients all land in [`UNKNOWN_CLIENT`] and share one
/// counter, so a burst from one of them limits the others too.
#[must_use]
pub fn client_identifier(headers: &HeaderMap) -> String {
    extract_client_ip(headers).unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_wins_over_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_identifier(&headers), "1.2.3.4");
    }

    #[test]
    fn falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static(" 9.9.9.9 "));
        assert_eq!(client_identifier(&headers), "9.9.9.9");
    }

    #[test]
    fn empty_forwarded_entry_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" , 5.6.7.8"));
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_identifier(&headers), "9.9.9.9");
    }

    #[test]
    fn missing_headers_use_shared_bucket() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
        assert_eq!(client_identifier(&headers), UNKNOWN_CLIENT);
    }
}
