//! Redirect following with a security-hardened policy.
//!
//! By default, [`HttpRedirect`]:
//! - only follows same-origin redirects (same scheme, host, and port)
//! - strips sensitive headers (`Authorization`, `Cookie`, `Proxy-Authorization`) on cross-origin redirects
//! - blocks HTTPS → HTTP downgrades
//! - follows at most 10 redirects per call
//!
//! A redirect the policy refuses is not an error: the call completes with the
//! 3xx response. Use [`RedirectConfig`] to customize behavior.

use crate::attributes::AttributeKey;
use crate::call::HttpCall;
use crate::client::HttpClient;
use crate::config::RedirectConfig;
use crate::error::HttpError;
use crate::feature::HttpClientFeature;
use crate::features::send::{HttpSend, SendInterceptor, Sender};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri, header};
use std::sync::Arc;

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Headers describing the request body, dropped when a redirect turns the
/// request into a bodiless GET.
const CONTENT_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
];

/// Follows `301`, `302`, `303`, `307` and `308` responses.
///
/// Installed by default; disable with `follow_redirects(false)`. Requires
/// [`HttpSend`], on which it registers a [`SendInterceptor`].
///
/// ## Example
///
/// ```rust,ignore
/// use modkit_http_client::{HttpClientConfig, HttpRedirect};
///
/// let config = HttpClientConfig::new().install::<HttpRedirect>(|c| c.max_redirects = 3);
/// ```
#[derive(Debug)]
pub struct HttpRedirect {
    config: RedirectConfig,
}

impl HttpRedirect {
    #[must_use]
    pub fn config(&self) -> &RedirectConfig {
        &self.config
    }

    /// Check if the redirect is to the same origin (scheme, host, port)
    ///
    /// Missing schemes default to "https" (fail-closed): a scheme-less URI is
    /// treated as HTTPS so that cross-scheme comparisons err on the side of
    /// security rather than silently downgrading.
    fn is_same_origin(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        let orig_host = original.host().unwrap_or("");
        let target_host = target.host().unwrap_or("");

        let orig_port = original
            .port_u16()
            .unwrap_or_else(|| default_port(orig_scheme));
        let target_port = target
            .port_u16()
            .unwrap_or_else(|| default_port(target_scheme));

        orig_scheme == target_scheme && orig_host == target_host && orig_port == target_port
    }

    /// Check if the redirect is an HTTPS → HTTP downgrade
    fn is_https_downgrade(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        orig_scheme == "https" && target_scheme == "http"
    }

    /// Check if the target host is in the allowed hosts list
    fn is_allowed_host(&self, target: &Uri) -> bool {
        target
            .host()
            .is_some_and(|host| self.config.allowed_redirect_hosts.contains(host))
    }

    /// Build the request following `exchange`, or `None` when the call
    /// should complete with the current response.
    fn follow_up(&self, exchange: &HttpCall, followed: usize) -> Option<Request<Bytes>> {
        let response = exchange.response()?;
        let status = response.status();
        if !is_redirect(status) {
            return None;
        }
        if followed >= self.config.max_redirects {
            tracing::debug!(
                count = followed,
                max = self.config.max_redirects,
                "Redirect limit reached"
            );
            return None;
        }

        let original = exchange.request().uri();
        let Some(location) = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
        else {
            tracing::debug!(status = status.as_u16(), "Redirect without a usable Location header");
            return None;
        };
        let Some(target) = resolve_location(original, location) else {
            tracing::debug!(location, "Redirect Location could not be resolved");
            return None;
        };

        if !self.config.allow_https_downgrade && Self::is_https_downgrade(original, &target) {
            tracing::warn!(
                target: "modkit_http_client::security",
                original = %original,
                redirect = %target,
                "Blocking HTTPS to HTTP downgrade redirect"
            );
            return None;
        }

        let same_origin = Self::is_same_origin(original, &target);
        if self.config.same_origin_only && !same_origin && !self.is_allowed_host(&target) {
            tracing::warn!(
                target: "modkit_http_client::security",
                original = %original,
                redirect = %target,
                "Blocking cross-origin redirect (same_origin_only=true)"
            );
            return None;
        }

        let mut request = exchange.request().clone();
        *request.uri_mut() = target;
        request.headers_mut().remove(header::HOST);

        if changes_to_get(status, request.method()) {
            *request.method_mut() = Method::GET;
            *request.body_mut() = Bytes::new();
            for name in CONTENT_HEADERS {
                request.headers_mut().remove(name);
            }
        }

        if !same_origin {
            tracing::debug!(original = %original, redirect = %request.uri(), "Cross-origin redirect detected");
            if self.config.strip_sensitive_headers {
                for name in SENSITIVE_HEADERS {
                    if request.headers_mut().remove(name).is_some() {
                        tracing::debug!(header = %name, "Stripped sensitive header on cross-origin redirect");
                    }
                }
            }
        }

        tracing::debug!(
            status = status.as_u16(),
            method = %request.method(),
            redirect = %request.uri(),
            "Following redirect"
        );
        Some(request)
    }
}

impl HttpClientFeature for HttpRedirect {
    type Config = RedirectConfig;
    const KEY: AttributeKey<Self> = AttributeKey::new("HttpRedirect");

    fn prepare(config: RedirectConfig) -> Self {
        Self { config }
    }

    fn install(feature: &Arc<Self>, client: &HttpClient) -> Result<(), HttpError> {
        let send = client.attributes().get(&HttpSend::KEY)?;
        send.intercept(FollowRedirects {
            feature: feature.clone(),
        })?;
        Ok(())
    }
}

struct FollowRedirects {
    feature: Arc<HttpRedirect>,
}

#[async_trait]
impl SendInterceptor for FollowRedirects {
    async fn intercept(
        &self,
        request: Request<Bytes>,
        sender: &Sender<'_>,
    ) -> Result<HttpCall, HttpError> {
        let mut exchange = sender.execute(request).await?;
        let mut followed = 0;
        while let Some(next) = self.feature.follow_up(&exchange, followed) {
            followed += 1;
            exchange = sender.execute(next).await?;
        }
        Ok(exchange)
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// `303` turns everything but `HEAD` into `GET`; `301` and `302` do so for
/// `POST`. `307` and `308` keep the method and body.
fn changes_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method == Method::POST,
        _ => false,
    }
}

/// Get the default port for a scheme
fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

/// Resolve a `Location` value against the URI of the request it answers.
fn resolve_location(base: &Uri, location: &str) -> Option<Uri> {
    if let Ok(uri) = location.parse::<Uri>()
        && uri.scheme().is_some()
        && uri.authority().is_some()
    {
        return Some(uri);
    }

    let scheme = base.scheme_str()?;
    let authority = base.authority()?;
    let resolved = if let Some(rest) = location.strip_prefix("//") {
        format!("{scheme}://{rest}")
    } else if location.starts_with('/') {
        format!("{scheme}://{authority}{location}")
    } else if location.starts_with('?') {
        format!("{scheme}://{authority}{}{location}", base.path())
    } else {
        let path = base.path();
        let dir = path.rfind('/').map_or("/", |i| &path[..=i]);
        format!("{scheme}://{authority}{dir}{location}")
    };
    resolved.parse().ok()
}
