use crate::client::HttpClient;
use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::HttpResponse;
use bytes::Bytes;
use http::Request;
use serde::Serialize;

/// Body type for the request builder
#[derive(Clone, Debug)]
enum BodyKind {
    Empty,
    Bytes(Bytes),
    /// Serialized JSON; implies `application/json` unless overridden
    Json(Bytes),
    /// Serialized form; implies `application/x-www-form-urlencoded` unless overridden
    Form(Bytes),
}

/// HTTP request builder with fluent API
///
/// Created by [`HttpClient::get`], [`HttpClient::post`], etc. Errors from
/// header parsing are deferred to [`send()`](RequestBuilder::send).
///
/// # Example
///
/// ```ignore
/// let resp = client
///     .post("https://api.example.com/users")
///     .header("x-request-id", "123")
///     .json(&NewUser { name: "Alice" })?
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
#[derive(Debug)]
pub struct RequestBuilder {
    client: HttpClient,
    method: http::Method,
    url: String,
    headers: Vec<(http::header::HeaderName, http::header::HeaderValue)>,
    body: BodyKind,
    /// Error captured during building (deferred to `send()`)
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(client: HttpClient, method: http::Method, url: &str) -> Self {
        Self {
            client,
            method,
            url: url.to_owned(),
            headers: Vec::new(),
            body: BodyKind::Empty,
            error: None,
        }
    }

    /// Add a single header to the request
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (
            http::header::HeaderName::try_from(name),
            http::header::HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Add multiple headers to the request
    pub fn headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        headers
            .into_iter()
            .fold(self, |builder, (name, value)| builder.header(name.as_ref(), value.as_ref()))
    }

    /// Set request body as JSON
    ///
    /// Sets Content-Type to application/json unless a Content-Type header was provided.
    ///
    /// # Errors
    /// Returns a deferred header error, or `HttpError::Json` if serialization fails.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = BodyKind::Json(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    /// Set request body as form URL-encoded
    ///
    /// Sets Content-Type to application/x-www-form-urlencoded unless a
    /// Content-Type header was provided.
    ///
    /// # Errors
    /// Returns a deferred header error, or `HttpError::FormEncode` if encoding fails.
    pub fn form<T: Serialize + ?Sized>(mut self, fields: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = BodyKind::Form(Bytes::from(serde_urlencoded::to_string(fields)?));
        Ok(self)
    }

    /// Set request body as raw bytes
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodyKind::Bytes(body.into());
        self
    }

    /// Set request body as a string
    pub fn body_string(self, body: impl Into<String>) -> Self {
        self.body_bytes(body.into())
    }

    /// Validate URL and scheme against the engine's transport security.
    fn validate_url(&self) -> Result<http::Uri, HttpError> {
        let uri: http::Uri =
            self.url
                .parse()
                .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                    url: self.url.clone(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                })?;

        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") => match self.client.engine().config().transport {
                TransportSecurity::AllowInsecureHttp => Ok(uri),
                TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    /// Build the request without sending it.
    ///
    /// # Errors
    /// Returns a deferred header error, an invalid URL or a disallowed scheme.
    pub fn build(mut self) -> Result<(HttpClient, Request<Bytes>), HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let uri = self.validate_url()?;

        let mut builder = Request::builder().method(self.method).uri(uri);

        let has_content_type = self
            .headers
            .iter()
            .any(|(name, _)| name == http::header::CONTENT_TYPE);
        if !has_content_type {
            match &self.body {
                BodyKind::Json(_) => builder = builder.header("content-type", "application/json"),
                BodyKind::Form(_) => {
                    builder = builder.header("content-type", "application/x-www-form-urlencoded");
                }
                BodyKind::Empty | BodyKind::Bytes(_) => {}
            }
        }
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }

        let body = match self.body {
            BodyKind::Empty => Bytes::new(),
            BodyKind::Bytes(b) | BodyKind::Json(b) | BodyKind::Form(b) => b,
        };
        Ok((self.client, builder.body(body)?))
    }

    /// Execute the request through the client's pipelines.
    ///
    /// # Errors
    /// Returns any building error, or the error of the call (transport,
    /// timeout, cancelled or closed client, rejected status when the client
    /// validates responses).
    pub async fn send(self) -> Result<HttpResponse, HttpError> {
        let (client, request) = self.build()?;
        let call = client.execute(request).await?;
        HttpResponse::new(call)
    }
}
