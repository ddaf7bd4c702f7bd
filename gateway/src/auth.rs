use actix_web::http::header::{HeaderMap, AUTHORIZATION};

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let authorization = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = authorization.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let trimmed = token.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed)
}

pub(crate) fn is_request_authorized(headers: &HeaderMap, expected_api_key: Option<&str>) -> bool {
    let Some(expected_api_key) = expected_api_key else {
        return true;
    };

    let x_api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim);
    if x_api_key == Some(expected_api_key) {
        return true;
    }

    bearer_token(headers).is_some_and(|token| token == expected_api_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    #[test]
    fn allows_requests_when_api_key_not_configured() {
        let headers = HeaderMap::new();
        assert!(is_request_authorized(&headers, None));
    }

    #[test]
    fn accepts_x_api_key_and_bearer_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("secret"),
        );
        assert!(is_request_authorized(&headers, Some("secret")));

        headers.remove("x-api-key");
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(is_request_authorized(&headers, Some("secret")));
    }

    #[test]
    fn rejects_wrong_or_missing_key() {
        let mut headers = HeaderMap::new();
        assert!(!is_request_authorized(&headers, Some("secret")));

        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("wrong"),
        );
        assert!(!is_request_authorized(&headers, Some("secret")));
    }

    #[test]
    fn bearer_token_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic secret"));
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn bearer_token_rejects_empty_value() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(bearer_token(&headers).is_none());
    }
}
