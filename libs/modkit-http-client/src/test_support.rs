#![allow(clippy::unwrap_used)]

use crate::client::HttpClient;
use crate::config::{EngineConfig, HttpClientConfig};
use crate::engine::{EngineCapability, HttpEngine};
use crate::error::HttpError;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Responder = Box<dyn Fn(&Request<Bytes>) -> Response<Bytes> + Send + Sync>;

/// Engine answering from a closure and recording every request it saw.
pub struct MockEngine {
    config: EngineConfig,
    token: CancellationToken,
    capabilities: Vec<EngineCapability>,
    responder: Responder,
    requests: Mutex<Vec<Request<Bytes>>>,
}

impl MockEngine {
    pub(crate) fn new(
        responder: impl Fn(&Request<Bytes>) -> Response<Bytes> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: EngineConfig::default(),
            token: CancellationToken::new(),
            capabilities: Vec::new(),
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Engine answering `200 OK` with an empty body.
    pub(crate) fn ok() -> Arc<Self> {
        Self::new(|_| Response::new(Bytes::new()))
    }

    pub(crate) fn requests(&self) -> Vec<Request<Bytes>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
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

    async fn execute(&self, request: &Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        self.requests.lock().push(request.clone());
        Ok((self.responder)(request))
    }

    async fn close(&self) -> Result<(), HttpError> {
        self.token.cancel();
        Ok(())
    }
}

pub async fn client(engine: &Arc<MockEngine>, config: HttpClientConfig) -> HttpClient {
    HttpClient::with_engine(engine.clone(), config).await.unwrap()
}

pub fn request(method: http::Method, uri: &str) -> Request<Bytes> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

pub fn status(code: u16) -> Response<Bytes> {
    Response::builder().status(code).body(Bytes::new()).unwrap()
}

pub fn redirect(code: u16, location: &str) -> Response<Bytes> {
    Response::builder()
        .status(code)
        .header(http::header::LOCATION, location)
        .body(Bytes::new())
        .unwrap()
}
