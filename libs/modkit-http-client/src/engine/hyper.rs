//! Default engine: pooled hyper-util client over rustls.
//!
//! Service stack (outer to inner):
//!
//! ```text
//! Timeout → Decompression → hyper_util legacy Client (HTTP/1 + HTTP/2 via ALPN)
//! ```
//!
//! Response bodies are collected in full, with the size limit enforced on
//! decompressed bytes.

use super::tls;
use super::{EngineCapability, HttpEngine, HttpEngineFactory};
use crate::config::{EngineConfig, TransportSecurity};
use crate::error::HttpError;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower_http::decompression::DecompressionLayer;

type ResponseBody = http_body_util::combinators::BoxBody<Bytes, crate::error::BoxError>;

type EngineService = BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

const CAPABILITIES: &[EngineCapability] = &[EngineCapability::HTTP2, EngineCapability::DECOMPRESSION];

/// Engine backed by `hyper_util`'s pooled client.
pub struct HyperEngine {
    config: EngineConfig,
    lifecycle: CancellationToken,
    // Taken on close; dropping the client drops its connection pool.
    service: Mutex<Option<EngineService>>,
}

impl HyperEngine {
    /// Build the engine.
    ///
    /// # Errors
    /// Returns [`HttpError::Tls`] if the TLS root store cannot be set up.
    pub fn new(config: EngineConfig) -> Result<Self, HttpError> {
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                target: "modkit_http_client::security",
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let https = tls::https_connector(config.tls_roots, config.transport)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout has no effect without a pool timer
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle_timeout) = config.pool_idle_timeout {
            builder.pool_idle_timeout(idle_timeout);
        }
        let hyper_client = builder.build::<_, Full<Bytes>>(https);

        let timeout = config.request_timeout;
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout))
            .boxed_clone();

        tracing::debug!(
            timeout = ?config.request_timeout,
            max_body_size = config.max_body_size,
            pool_max_idle_per_host = config.pool_max_idle_per_host,
            "hyper engine created"
        );

        Ok(Self {
            config,
            lifecycle: CancellationToken::new(),
            service: Mutex::new(Some(service)),
        })
    }

    fn service(&self) -> Result<EngineService, HttpError> {
        self.service
            .lock()
            .clone()
            .ok_or_else(|| HttpError::EngineClosed(self.name().to_owned()))
    }
}

#[async_trait]
impl HttpEngine for HyperEngine {
    fn name(&self) -> &str {
        "hyper"
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lifecycle(&self) -> &CancellationToken {
        &self.lifecycle
    }

    fn capabilities(&self) -> &[EngineCapability] {
        CAPABILITIES
    }

    async fn execute(&self, request: &Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let service = self.service()?;
        let (parts, body) = request.clone().into_parts();
        let response = service
            .oneshot(Request::from_parts(parts, Full::new(body)))
            .await?;

        let (parts, body) = response.into_parts();
        let body = read_body_limited(body, self.config.max_body_size).await?;
        Ok(Response::from_parts(parts, body))
    }

    async fn close(&self) -> Result<(), HttpError> {
        let service = self.service.lock().take();
        self.lifecycle.cancel();
        if service.is_some() {
            tracing::debug!(engine = self.name(), "engine closed");
        }
        Ok(())
    }
}

/// Factory of [`HyperEngine`]s; the default engine of [`HttpClient::new`](crate::HttpClient::new).
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperEngineFactory;

impl HttpEngineFactory for HyperEngineFactory {
    fn create(&self, config: EngineConfig) -> Result<Arc<dyn HttpEngine>, HttpError> {
        Ok(Arc::new(HyperEngine::new(config)?))
    }
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<crate::error::BoxError>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

/// Map tower errors to `HttpError`, keeping the configured timeout duration.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    match err.downcast::<hyper_util::client::legacy::Error>() {
        Ok(err) => HttpError::from(*err),
        Err(other) => HttpError::Transport(other),
    }
}

/// Collect a body, failing once more than `limit` (decompressed) bytes arrive.
async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use httpmock::prelude::*;

    fn insecure_engine(configure: impl FnOnce(&mut EngineConfig)) -> HyperEngine {
        let mut config = EngineConfig {
            transport: TransportSecurity::AllowInsecureHttp,
            ..Default::default()
        };
        configure(&mut config);
        HyperEngine::new(config).unwrap()
    }

    fn get(url: String) -> Request<Bytes> {
        Request::get(url).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_execute_returns_collected_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET).path("/data");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"ok":true}"#);
        });

        let engine = insecure_engine(|_| {});
        let response = engine.execute(&get(server.url("/data"))).await.unwrap();

        mock.assert();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.body().as_ref(), br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_error_status_is_not_an_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/missing");
            then.status(404).body("nope");
        });

        let engine = insecure_engine(|_| {});
        let response = engine.execute(&get(server.url("/missing"))).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_body_limit_is_enforced() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/large");
            then.status(200).body("x".repeat(64));
        });

        let engine = insecure_engine(|c| c.max_body_size = 16);
        let err = engine.execute(&get(server.url("/large"))).await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 16, .. }));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/slow");
            then.status(200).delay(Duration::from_millis(500));
        });

        let engine = insecure_engine(|c| c.request_timeout = Duration::from_millis(50));
        let err = engine.execute(&get(server.url("/slow"))).await.unwrap_err();
        assert!(matches!(err, HttpError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_tls_only_rejects_plain_http() {
        let server = MockServer::start();
        let engine = HyperEngine::new(EngineConfig::default()).unwrap();
        let err = engine.execute(&get(server.url("/"))).await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
    }

    #[tokio::test]
    async fn test_close_cancels_lifecycle_and_rejects_requests() {
        let engine = insecure_engine(|_| {});
        assert!(!engine.lifecycle().is_cancelled());

        engine.close().await.unwrap();
        assert!(engine.lifecycle().is_cancelled());

        let err = engine
            .execute(&get("http://localhost/".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::EngineClosed(ref name) if name == "hyper"));
    }

    #[test]
    fn test_capabilities() {
        let engine = HyperEngine::new(EngineConfig::default()).unwrap();
        assert!(engine.capabilities().contains(&EngineCapability::HTTP2));
        assert!(engine.capabilities().contains(&EngineCapability::DECOMPRESSION));
        assert_eq!(engine.config().max_body_size, 10 * 1024 * 1024);
    }
}
