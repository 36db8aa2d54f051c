use crate::call::HttpCall;
use crate::error::{HttpError, StatusClass};
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, SystemTime};

/// Maximum number of body bytes copied into [`HttpError::HttpStatus`] previews.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Parse `Retry-After` header value into a `Duration`.
///
/// Supports two formats per RFC 7231:
/// - Seconds: "120" → 120 seconds
/// - HTTP-date (RFC 1123): "Wed, 21 Oct 2015 07:28:00 GMT" → duration until that time
///
/// Returns `None` if the header is missing, unparsable, negative or in the past.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds.cast_unsigned()));
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}

/// Build the [`HttpError::HttpStatus`] describing a non-successful response.
pub fn status_error(response: &Response<Bytes>) -> HttpError {
    let status = response.status();
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response.body();
    let preview = &body[..body.len().min(ERROR_BODY_PREVIEW_LIMIT)];

    HttpError::HttpStatus {
        status,
        class: StatusClass::of(status),
        body_preview: String::from_utf8_lossy(preview).into_owned(),
        content_type,
        retry_after: parse_retry_after(response.headers()),
    }
}

/// Completed exchange returned by [`RequestBuilder::send`](crate::RequestBuilder::send).
///
/// `send()` returns `Ok` for every status (unless the client validates
/// responses); use [`error_for_status`](Self::error_for_status) to turn
/// non-2xx into an error.
#[derive(Debug)]
pub struct HttpResponse {
    request: Request<Bytes>,
    inner: Response<Bytes>,
}

impl HttpResponse {
    pub(crate) fn new(call: HttpCall) -> Result<Self, HttpError> {
        let (request, inner) = call.into_parts()?;
        Ok(Self { request, inner })
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Final request of the call (after redirects).
    #[must_use]
    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Fail with [`HttpError::HttpStatus`] unless the status is 2xx.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` with a body preview if status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }
        Err(status_error(&self.inner))
    }

    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.inner.body().clone()
    }

    /// Response body as UTF-8; invalid sequences are replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.inner.body()).into_owned()
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if parsing fails.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(self.inner.body())?)
    }

    /// Take the raw response.
    #[must_use]
    pub fn into_inner(self) -> Response<Bytes> {
        self.inner
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn response(status: u16, headers: &[(&str, &str)], body: &'static str) -> HttpResponse {
        let mut builder = Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut call = HttpCall::new(Request::get("http://example.com/").body(Bytes::new()).unwrap());
        call.set_response(builder.body(Bytes::from_static(body.as_bytes())).unwrap());
        HttpResponse::new(call).unwrap()
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "120".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_seconds_with_whitespace() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "  60  ".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_retry_after_missing_or_invalid() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(http::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(http::header::RETRY_AFTER, "-5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);

        let future = httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(60));
        headers.insert(http::header::RETRY_AFTER, future.parse().unwrap());
        let secs = parse_retry_after(&headers).unwrap().as_secs();
        assert!((58..=62).contains(&secs));
    }

    #[test]
    fn test_error_for_status_success_passes_through() {
        let resp = response(204, &[], "").error_for_status().unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_error_for_status_builds_status_error() {
        let err = response(
            503,
            &[("content-type", "text/plain"), ("retry-after", "7")],
            "maintenance",
        )
        .error_for_status()
        .unwrap_err();

        match err {
            HttpError::HttpStatus {
                status,
                class,
                body_preview,
                content_type,
                retry_after,
            } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(class, StatusClass::Server);
                assert_eq!(body_preview, "maintenance");
                assert_eq!(content_type.as_deref(), Some("text/plain"));
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_status_error_preview_is_limited() {
        let body = Bytes::from(vec![b'a'; ERROR_BODY_PREVIEW_LIMIT * 2]);
        let response = Response::builder().status(500).body(body).unwrap();
        match status_error(&response) {
            HttpError::HttpStatus { body_preview, .. } => {
                assert_eq!(body_preview.len(), ERROR_BODY_PREVIEW_LIMIT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_body_accessors() {
        #[derive(serde::Deserialize)]
        struct Payload {
            ok: bool,
        }

        let resp = response(200, &[], r#"{"ok":true}"#);
        assert_eq!(resp.text(), r#"{"ok":true}"#);
        assert_eq!(resp.bytes().len(), 11);
        assert!(resp.json::<Payload>().unwrap().ok);
        assert!(matches!(resp.json::<Vec<u8>>(), Err(HttpError::Json(_))));
    }
}
