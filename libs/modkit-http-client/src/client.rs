use crate::attributes::Attributes;
use crate::call::HttpCall;
use crate::config::HttpClientConfig;
use crate::engine::{EngineCapability, HttpEngine, HttpEngineFactory, HyperEngineFactory};
use crate::error::{ConfigError, HttpError, ShutdownError, ShutdownFailure};
use crate::feature::{FeatureRegistry, HttpClientFeature};
use crate::lifecycle::{EngineOwnership, watch_owned_engine};
use crate::phases::{self, SendPhase};
use crate::pipeline::{Interceptor, Next, Pipeline};
use crate::request::RequestBuilder;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering, fence};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Extensible HTTP client.
///
/// A client is assembled once from an engine and an [`HttpClientConfig`]:
/// the engine and every configured feature install interceptors into the
/// four pipelines, after which the pipelines are sealed and the set of
/// features is fixed. Calls run concurrently; the handle is cheap to clone
/// and all clones share the same client (use [`config`](Self::config) to
/// derive a client with different features).
///
/// # Example
///
/// ```ignore
/// use modkit_http_client::{HttpClient, HttpClientConfig};
///
/// let client = HttpClient::new(HttpClientConfig::new().expect_success(true)).await?;
/// let body = client.get("https://example.com/api").send().await?.text();
/// client.close().await?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    engine: Arc<dyn HttpEngine>,
    // Some iff the client owns its engine
    ownership: Option<Arc<EngineOwnership>>,
    request_pipeline: Arc<Pipeline<HttpCall>>,
    send_pipeline: Arc<Pipeline<HttpCall>>,
    receive_pipeline: Arc<Pipeline<HttpCall>>,
    response_pipeline: Arc<Pipeline<HttpCall>>,
    attributes: Attributes,
    lifecycle: CancellationToken,
    closed: AtomicBool,
    calls: TaskTracker,
    config: HttpClientConfig,
    features: Vec<&'static str>,
}

impl HttpClient {
    /// Build a client on a new [`HyperEngine`](crate::HyperEngine) owned by the client.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingRuntime`] outside a Tokio runtime, or an
    /// error if the engine cannot be created or a feature fails to install.
    pub async fn new(config: HttpClientConfig) -> Result<Self, HttpError> {
        Self::from_factory(&HyperEngineFactory, config).await
    }

    /// Build a client on an engine created by `factory` from the config's
    /// engine settings. The client owns the engine: closing the client (or
    /// cancelling its lifecycle) closes the engine.
    ///
    /// Must be called within a Tokio runtime: the owned engine is torn down
    /// by a task on that runtime when the client's lifecycle ends.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingRuntime`] outside a Tokio runtime (no
    /// engine is created then), or an error if the engine cannot be created
    /// or a feature fails to install.
    pub async fn from_factory(
        factory: &dyn HttpEngineFactory,
        config: HttpClientConfig,
    ) -> Result<Self, HttpError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?;
        let engine = factory.create(config.engine_config())?;
        let ownership = Arc::new(EngineOwnership::new(engine.clone(), runtime));
        Self::build(engine, Some(ownership), config).await
    }

    /// Build a client on a caller-supplied engine. The client never closes it.
    ///
    /// # Errors
    /// Returns an error if a feature fails to install or needs a capability
    /// the engine lacks.
    pub async fn with_engine(
        engine: Arc<dyn HttpEngine>,
        config: HttpClientConfig,
    ) -> Result<Self, HttpError> {
        Self::build(engine, None, config).await
    }

    async fn build(
        engine: Arc<dyn HttpEngine>,
        ownership: Option<Arc<EngineOwnership>>,
        config: HttpClientConfig,
    ) -> Result<Self, HttpError> {
        let lifecycle = engine.lifecycle().child_token();
        if let Some(ownership) = &ownership {
            watch_owned_engine(ownership.clone(), lifecycle.clone());
        }

        let registry = match FeatureRegistry::resolve(&config)
            .and_then(|registry| registry.check_capabilities(engine.as_ref()).map(|()| registry))
        {
            Ok(registry) => registry,
            Err(err) => {
                lifecycle.cancel();
                return Err(err.into());
            }
        };

        let client = Self {
            inner: Arc::new(ClientInner {
                engine,
                ownership,
                request_pipeline: Arc::new(phases::request_pipeline()),
                send_pipeline: Arc::new(phases::send_pipeline()),
                receive_pipeline: Arc::new(phases::receive_pipeline()),
                response_pipeline: Arc::new(phases::response_pipeline()),
                attributes: Attributes::new(),
                lifecycle,
                closed: AtomicBool::new(false),
                calls: TaskTracker::new(),
                config,
                features: registry.names(),
            }),
        };

        if let Err(err) = client.assemble(&registry) {
            tracing::warn!(error = %err, "HTTP client construction failed");
            client.abandon().await;
            return Err(err);
        }
        client.seal();

        tracing::debug!(
            engine = client.inner.engine.name(),
            owns_engine = client.owns_engine(),
            features = ?client.inner.features,
            "HTTP client created"
        );
        Ok(client)
    }

    fn assemble(&self, registry: &FeatureRegistry) -> Result<(), HttpError> {
        self.inner.engine.install(self)?;
        self.inner.send_pipeline.intercept(
            SendPhase::RECEIVE,
            ReceiveBridge {
                receive_pipeline: self.inner.receive_pipeline.clone(),
            },
        )?;
        registry.install(self)
    }

    fn seal(&self) {
        self.inner.request_pipeline.seal();
        self.inner.send_pipeline.seal();
        self.inner.receive_pipeline.seal();
        self.inner.response_pipeline.seal();
    }

    /// Tear down a partially assembled client: run the shutdown hooks of the
    /// features installed so far, then end the lifecycle (which releases an
    /// owned engine).
    async fn abandon(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let failures = self.close_features().await;
        if !failures.is_empty() {
            tracing::warn!(
                failures = failures.len(),
                "shutdown hooks failed while abandoning HTTP client construction"
            );
        }
        self.inner.lifecycle.cancel();
    }

    /// Derive a new client on the same engine.
    ///
    /// The new configuration starts from the defaults, merges this client's
    /// configuration, then applies `block`. Features are installed afresh, so
    /// the derived client shares no feature state with this one. Engine
    /// ownership is shared: an owned engine is closed when the last owning
    /// client releases it.
    ///
    /// # Errors
    /// Returns [`HttpError::ClientClosed`] if this client is closed, or any
    /// construction error of the new client.
    pub async fn config(&self, block: impl FnOnce(&mut HttpClientConfig)) -> Result<Self, HttpError> {
        self.ensure_open()?;
        let mut config = HttpClientConfig::default();
        config.merge(&self.inner.config);
        block(&mut config);

        let ownership = match &self.inner.ownership {
            Some(ownership) => Some(Arc::new(ownership.share()?)),
            None => None,
        };
        Self::build(self.inner.engine.clone(), ownership, config).await
    }

    /// Whether the engine advertises `capability`.
    #[must_use]
    pub fn is_supported(&self, capability: EngineCapability) -> bool {
        self.inner.engine.capabilities().contains(&capability)
    }

    #[must_use]
    pub fn engine(&self) -> Arc<dyn HttpEngine> {
        self.inner.engine.clone()
    }

    /// Whether closing this client may close the engine.
    #[must_use]
    pub fn owns_engine(&self) -> bool {
        self.inner.ownership.is_some()
    }

    /// Client-wide attribute store holding the installed features.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.inner.attributes
    }

    /// Installed feature `F`, if any.
    #[must_use]
    pub fn feature<F: HttpClientFeature>(&self) -> Option<Arc<F>> {
        self.inner.attributes.get_or_none(&F::KEY)
    }

    /// Feature key names in install order.
    #[must_use]
    pub fn installed_features(&self) -> &[&'static str] {
        &self.inner.features
    }

    /// The configuration this client was built from.
    #[must_use]
    pub fn client_config(&self) -> &HttpClientConfig {
        &self.inner.config
    }

    /// Request pipeline. Features register interceptors here while they
    /// install; once the client is built it is sealed and registrations fail
    /// with [`ConfigError::Sealed`]. The same holds for the other pipelines.
    #[must_use]
    pub fn request_pipeline(&self) -> &Arc<Pipeline<HttpCall>> {
        &self.inner.request_pipeline
    }

    #[must_use]
    pub fn send_pipeline(&self) -> &Arc<Pipeline<HttpCall>> {
        &self.inner.send_pipeline
    }

    #[must_use]
    pub fn receive_pipeline(&self) -> &Arc<Pipeline<HttpCall>> {
        &self.inner.receive_pipeline
    }

    #[must_use]
    pub fn response_pipeline(&self) -> &Arc<Pipeline<HttpCall>> {
        &self.inner.response_pipeline
    }

    /// Lifecycle token of the client; a child of the engine's token.
    ///
    /// Cancelling it fails in-flight calls; [`close`](Self::close) only
    /// cancels it once they have finished.
    #[must_use]
    pub fn lifecycle(&self) -> &CancellationToken {
        &self.inner.lifecycle
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), HttpError> {
        if self.is_closed() {
            return Err(HttpError::ClientClosed);
        }
        if self.inner.lifecycle.is_cancelled() {
            return Err(HttpError::Cancelled);
        }
        Ok(())
    }

    /// Run `request` through the request pipeline (which sends it) and the
    /// response pipeline.
    ///
    /// # Errors
    /// [`HttpError::ClientClosed`] / [`HttpError::Cancelled`] on a closed or
    /// cancelled client, [`HttpError::NoResponse`] if nothing produced a
    /// response, or the first error raised by an interceptor.
    pub async fn execute(&self, request: Request<Bytes>) -> Result<HttpCall, HttpError> {
        let _call = self.inner.calls.token();
        // Pairs with the fence in `close`: either this call sees the closed
        // flag, or `close` waits for it.
        fence(Ordering::SeqCst);
        self.ensure_open()?;

        let call = self
            .inner
            .request_pipeline
            .execute(HttpCall::new(request))
            .await?;
        if !call.has_response() {
            return Err(HttpError::NoResponse);
        }
        self.inner.response_pipeline.execute(call).await
    }

    /// Start building a request with an arbitrary method.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url)
    }

    /// Create a GET request builder
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a PUT request builder
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Create a PATCH request builder
    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Create a DELETE request builder
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Shut the client down.
    ///
    /// Only the first call does anything; concurrent and repeated calls
    /// return `Ok(())` immediately. New calls are refused from the start.
    /// Calls already running are left to finish, then every closeable
    /// feature is closed, the lifecycle token is cancelled and the engine is
    /// closed if this client was its last owner.
    ///
    /// Awaiting `close` from inside one of this client's interceptors never
    /// completes, since it waits for the very call it runs in.
    ///
    /// # Errors
    /// Returns every failure of a feature hook or the engine close together.
    pub async fn close(&self) -> Result<(), ShutdownError> {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        fence(Ordering::SeqCst);

        self.inner.calls.close();
        if !self.inner.calls.is_empty() {
            tracing::debug!(
                in_flight = self.inner.calls.len(),
                "waiting for in-flight calls before closing"
            );
        }
        self.inner.calls.wait().await;

        let mut failures = self.close_features().await;

        let close_engine = self
            .inner
            .ownership
            .as_ref()
            .is_some_and(|ownership| ownership.release());
        self.inner.lifecycle.cancel();

        if close_engine {
            let engine = &self.inner.engine;
            tracing::debug!(engine = engine.name(), "closing owned engine");
            if let Err(err) = engine.close().await {
                tracing::warn!(engine = engine.name(), error = %err, "engine failed to close");
                failures.push(ShutdownFailure {
                    component: engine.name().to_owned(),
                    source: Box::new(err),
                });
            }
        }

        tracing::debug!(failures = failures.len(), "HTTP client closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError::new(failures))
        }
    }

    async fn close_features(&self) -> Vec<ShutdownFailure> {
        let mut failures = Vec::new();
        for (key, hook) in self.inner.attributes.closeables() {
            tracing::debug!(feature = key.name(), "closing feature");
            if let Err(err) = hook.close().await {
                tracing::warn!(feature = key.name(), error = %err, "feature failed to close");
                failures.push(ShutdownFailure {
                    component: key.name().to_owned(),
                    source: err,
                });
            }
        }
        failures
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            tracing::debug!("HTTP client dropped without close; cancelling its lifecycle");
            self.lifecycle.cancel();
        }
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("engine", &self.inner.engine.name())
            .field("owns_engine", &self.owns_engine())
            .field("features", &self.inner.features)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Forwards each exchange of the send pipeline through the receive pipeline.
struct ReceiveBridge {
    receive_pipeline: Arc<Pipeline<HttpCall>>,
}

#[async_trait]
impl Interceptor<HttpCall> for ReceiveBridge {
    async fn intercept(&self, call: HttpCall, next: Next<'_, HttpCall>) -> Result<HttpCall, HttpError> {
        let call = self.receive_pipeline.execute(call).await?;
        next.run(call).await
    }
}
