//! Network engines.
//!
//! An engine performs a single request/response exchange. Clients never talk
//! to the network directly: the engine hooks itself into the send pipeline's
//! `Engine` phase in [`HttpEngine::install`].

pub mod hyper;
mod tls;

pub use self::hyper::{HyperEngine, HyperEngineFactory};

use crate::call::HttpCall;
use crate::client::HttpClient;
use crate::config::EngineConfig;
use crate::error::HttpError;
use crate::phases::SendPhase;
use crate::pipeline::{Interceptor, Next};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Optional engine feature that client features can depend on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineCapability(&'static str);

impl EngineCapability {
    /// HTTP/2 negotiation via ALPN
    pub const HTTP2: Self = Self::new("http2");
    /// Transparent gzip/br/deflate response decoding
    pub const DECOMPRESSION: Self = Self::new("decompression");

    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for EngineCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineCapability({})", self.0)
    }
}

impl fmt::Display for EngineCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Transport that executes requests for one or more clients.
///
/// Every client built on an engine gets a lifecycle token that is a child of
/// [`lifecycle`](Self::lifecycle): cancelling the engine token cancels all of
/// its clients.
#[async_trait]
pub trait HttpEngine: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Settings the engine was created with.
    fn config(&self) -> &EngineConfig;

    /// Root of the cancellation hierarchy of every client using this engine.
    fn lifecycle(&self) -> &CancellationToken;

    /// Capabilities features may require.
    fn capabilities(&self) -> &[EngineCapability] {
        &[]
    }

    /// Hook the engine into a client under construction.
    ///
    /// The default registers [`EngineInterceptor`] at [`SendPhase::ENGINE`].
    ///
    /// # Errors
    /// Any error aborts client construction.
    fn install(&self, client: &HttpClient) -> Result<(), HttpError> {
        client
            .send_pipeline()
            .intercept(SendPhase::ENGINE, EngineInterceptor::new(client.engine()))?;
        Ok(())
    }

    /// Perform one exchange.
    ///
    /// # Errors
    /// Transport, TLS and timeout failures. Non-2xx statuses are not errors.
    async fn execute(&self, request: &Request<Bytes>) -> Result<Response<Bytes>, HttpError>;

    /// Release the engine's resources and cancel its lifecycle token.
    ///
    /// # Errors
    /// Returns the failure to release; the token is cancelled regardless.
    async fn close(&self) -> Result<(), HttpError>;
}

/// Creates engines from accumulated [`EngineConfig`] settings.
pub trait HttpEngineFactory: Send + Sync {
    /// # Errors
    /// Returns an error if the engine cannot be initialized (TLS roots and the like).
    fn create(&self, config: EngineConfig) -> Result<Arc<dyn HttpEngine>, HttpError>;
}

/// Send-pipeline interceptor that executes the call on an engine.
pub struct EngineInterceptor {
    engine: Arc<dyn HttpEngine>,
}

impl EngineInterceptor {
    #[must_use]
    pub fn new(engine: Arc<dyn HttpEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Interceptor<HttpCall> for EngineInterceptor {
    async fn intercept(
        &self,
        mut call: HttpCall,
        next: Next<'_, HttpCall>,
    ) -> Result<HttpCall, HttpError> {
        let token = self.engine.lifecycle();
        if token.is_cancelled() {
            return Err(HttpError::EngineClosed(self.engine.name().to_owned()));
        }
        let response = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(HttpError::EngineClosed(self.engine.name().to_owned()));
            }
            response = self.engine.execute(call.request()) => response?,
        };
        tracing::debug!(
            engine = self.engine.name(),
            method = %call.request().method(),
            uri = %call.request().uri(),
            status = response.status().as_u16(),
            "engine exchange completed"
        );
        call.set_response(response);
        next.run(call).await
    }
}
