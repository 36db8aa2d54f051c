#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use modkit_http_client::{
    AttributeKey, BoxError, Closeable, EngineCapability, EngineConfig, HttpClient,
    HttpClientFeature, HttpEngine, HttpEngineFactory, HttpError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

pub const STREAMING: EngineCapability = EngineCapability::new("streaming");

/// Route client logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Engine answering `200 OK` to everything and counting its close calls.
pub struct CountingEngine {
    config: EngineConfig,
    token: CancellationToken,
    capabilities: Vec<EngineCapability>,
    closes: AtomicUsize,
    fail_close: AtomicBool,
}

impl CountingEngine {
    pub fn new(capabilities: &[EngineCapability]) -> Arc<Self> {
        Self::with_config(EngineConfig::default(), capabilities)
    }

    pub fn with_config(config: EngineConfig, capabilities: &[EngineCapability]) -> Arc<Self> {
        Arc::new(Self {
            config,
            token: CancellationToken::new(),
            capabilities: capabilities.to_vec(),
            closes: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
        })
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_on_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Cancel the engine token from outside, as a failing transport would.
    pub fn cancel_lifecycle(&self) {
        self.token.cancel();
    }

    pub fn lifecycle_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[async_trait]
impl HttpEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lifecycle(&self) -> &CancellationToken {
        &self.token
    }

    fn capabilities(&self) -> &[EngineCapability] {
        &self.capabilities
    }

    async fn execute(&self, _request: &Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        Ok(Response::new(Bytes::from_static(b"ok")))
    }

    async fn close(&self) -> Result<(), HttpError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(HttpError::Transport("socket already gone".into()));
        }
        Ok(())
    }
}

/// Factory handing out [`CountingEngine`]s and keeping them for inspection.
#[derive(Default)]
pub struct CountingFactory {
    pub capabilities: Vec<EngineCapability>,
    created: Mutex<Vec<Arc<CountingEngine>>>,
}

impl CountingFactory {
    pub fn with_capabilities(capabilities: &[EngineCapability]) -> Self {
        Self {
            capabilities: capabilities.to_vec(),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn last(&self) -> Arc<CountingEngine> {
        self.created.lock().last().cloned().expect("no engine created")
    }
}

impl HttpEngineFactory for CountingFactory {
    fn create(&self, config: EngineConfig) -> Result<Arc<dyn HttpEngine>, HttpError> {
        let engine = CountingEngine::with_config(config, &self.capabilities);
        self.created.lock().push(engine.clone());
        Ok(engine)
    }
}

/// Configuration of [`Logger`].
#[derive(Default)]
pub struct LoggerConfig {
    pub fail_on_close: bool,
}

/// Closeable test feature counting its shutdown calls.
pub struct Logger {
    fail_on_close: bool,
    closes: AtomicUsize,
}

impl Logger {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Closeable for Logger {
    async fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_on_close {
            return Err("logger sink unavailable".into());
        }
        Ok(())
    }
}

impl HttpClientFeature for Logger {
    type Config = LoggerConfig;
    const KEY: AttributeKey<Self> = AttributeKey::new("Logger");

    fn prepare(config: LoggerConfig) -> Self {
        Self {
            fail_on_close: config.fail_on_close,
            closes: AtomicUsize::new(0),
        }
    }

    fn install(_feature: &Arc<Self>, _client: &HttpClient) -> Result<(), HttpError> {
        Ok(())
    }

    fn closeable(feature: &Arc<Self>) -> Option<Arc<dyn Closeable>> {
        Some(feature.clone())
    }
}

/// Second closeable feature, for shutdown hooks running side by side.
pub struct Metrics {
    closes: AtomicUsize,
}

impl Metrics {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Closeable for Metrics {
    async fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl HttpClientFeature for Metrics {
    type Config = ();
    const KEY: AttributeKey<Self> = AttributeKey::new("Metrics");

    fn prepare((): ()) -> Self {
        Self {
            closes: AtomicUsize::new(0),
        }
    }

    fn install(_feature: &Arc<Self>, _client: &HttpClient) -> Result<(), HttpError> {
        Ok(())
    }

    fn closeable(feature: &Arc<Self>) -> Option<Arc<dyn Closeable>> {
        Some(feature.clone())
    }
}

/// Configuration of [`Journal`].
#[derive(Default)]
pub struct JournalConfig {
    pub closes: Arc<AtomicUsize>,
}

/// Closeable feature reporting its shutdown calls through a shared counter,
/// so they stay observable when the client itself is never returned.
pub struct Journal {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Closeable for Journal {
    async fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl HttpClientFeature for Journal {
    type Config = JournalConfig;
    const KEY: AttributeKey<Self> = AttributeKey::new("Journal");

    fn prepare(config: JournalConfig) -> Self {
        Self {
            closes: config.closes,
        }
    }

    fn install(_feature: &Arc<Self>, _client: &HttpClient) -> Result<(), HttpError> {
        Ok(())
    }

    fn closeable(feature: &Arc<Self>) -> Option<Arc<dyn Closeable>> {
        Some(feature.clone())
    }
}

/// Feature that only works on engines able to stream.
pub struct Streaming;

impl HttpClientFeature for Streaming {
    type Config = ();
    const KEY: AttributeKey<Self> = AttributeKey::new("Streaming");

    fn prepare((): ()) -> Self {
        Self
    }

    fn install(_feature: &Arc<Self>, _client: &HttpClient) -> Result<(), HttpError> {
        Ok(())
    }

    fn required_capabilities() -> &'static [EngineCapability] {
        &[STREAMING]
    }
}
