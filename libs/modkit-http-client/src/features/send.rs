//! The send step of the request pipeline.
//!
//! [`HttpSend`] takes the rendered request off the request pipeline and runs
//! it through the send pipeline, which ends at the engine. Features that
//! need to look at a response and send again (redirects, retries,
//! authentication) register a [`SendInterceptor`]; each one receives a
//! [`Sender`] to dispatch as many exchanges as it needs.

use crate::attributes::AttributeKey;
use crate::call::HttpCall;
use crate::client::HttpClient;
use crate::error::{ConfigError, HttpError};
use crate::feature::HttpClientFeature;
use crate::phases::RequestPhase;
use crate::pipeline::{Interceptor, Next, Pipeline};
use async_trait::async_trait;
use bytes::Bytes;
use http::Request;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration of [`HttpSend`].
#[derive(Debug, Clone)]
pub struct HttpSendConfig {
    /// Maximum number of exchanges a single call may send (default: 20).
    pub max_send_count: usize,
}

impl Default for HttpSendConfig {
    fn default() -> Self {
        Self { max_send_count: 20 }
    }
}

/// Wraps the dispatch of every exchange of a call.
#[async_trait]
pub trait SendInterceptor: Send + Sync {
    /// Handle `request`, usually by calling `sender.execute(..)` one or more
    /// times and returning the exchange that should complete the call.
    ///
    /// # Errors
    /// Any error fails the call.
    async fn intercept(
        &self,
        request: Request<Bytes>,
        sender: &Sender<'_>,
    ) -> Result<HttpCall, HttpError>;
}

/// Dispatches requests through the rest of the send chain.
pub struct Sender<'a> {
    pipeline: &'a Pipeline<HttpCall>,
    rest: &'a [Arc<dyn SendInterceptor>],
    sent: &'a AtomicUsize,
    max_send_count: usize,
}

impl Sender<'_> {
    /// Pass `request` to the next send interceptor, or send it through the
    /// send pipeline when none are left.
    ///
    /// # Errors
    /// [`HttpError::SendCountExceeded`] once the call has sent
    /// `max_send_count` exchanges, [`HttpError::NoResponse`] if the send
    /// pipeline produced no response, or any error raised on the way.
    pub async fn execute(&self, request: Request<Bytes>) -> Result<HttpCall, HttpError> {
        if let Some((head, rest)) = self.rest.split_first() {
            let sender = Sender {
                pipeline: self.pipeline,
                rest,
                sent: self.sent,
                max_send_count: self.max_send_count,
            };
            return head.intercept(request, &sender).await;
        }

        let sent = self.sent.fetch_add(1, Ordering::AcqRel);
        if sent >= self.max_send_count {
            return Err(HttpError::SendCountExceeded {
                limit: self.max_send_count,
            });
        }
        let exchange = self.pipeline.execute(HttpCall::new(request)).await?;
        if !exchange.has_response() {
            return Err(HttpError::NoResponse);
        }
        Ok(exchange)
    }

    /// Exchanges sent so far by this call.
    #[must_use]
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::Acquire)
    }
}

/// Sends the request of every call.
pub struct HttpSend {
    max_send_count: usize,
    interceptors: RwLock<Vec<Arc<dyn SendInterceptor>>>,
    // Send pipeline of the owning client; interceptors freeze with it.
    send_pipeline: OnceLock<Arc<Pipeline<HttpCall>>>,
}

impl HttpSend {
    /// Register a send interceptor. Interceptors registered first wrap the
    /// ones registered later.
    ///
    /// # Errors
    /// Returns [`ConfigError::Sealed`] once the client is built.
    pub fn intercept(
        &self,
        interceptor: impl SendInterceptor + 'static,
    ) -> Result<(), ConfigError> {
        let mut interceptors = self.interceptors.write();
        if let Some(pipeline) = self.send_pipeline.get()
            && pipeline.is_sealed()
        {
            return Err(ConfigError::Sealed {
                pipeline: pipeline.name().to_owned(),
            });
        }
        interceptors.push(Arc::new(interceptor));
        Ok(())
    }

    #[must_use]
    pub fn max_send_count(&self) -> usize {
        self.max_send_count
    }

    #[must_use]
    pub fn interceptor_count(&self) -> usize {
        self.interceptors.read().len()
    }
}

impl fmt::Debug for HttpSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSend")
            .field("max_send_count", &self.max_send_count)
            .field("interceptors", &self.interceptor_count())
            .finish()
    }
}

impl HttpClientFeature for HttpSend {
    type Config = HttpSendConfig;
    const KEY: AttributeKey<Self> = AttributeKey::new("HttpSend");

    fn prepare(config: HttpSendConfig) -> Self {
        Self {
            max_send_count: config.max_send_count,
            interceptors: RwLock::new(Vec::new()),
            send_pipeline: OnceLock::new(),
        }
    }

    fn install(feature: &Arc<Self>, client: &HttpClient) -> Result<(), HttpError> {
        feature
            .send_pipeline
            .get_or_init(|| client.send_pipeline().clone());
        client.request_pipeline().intercept(
            RequestPhase::SEND,
            SendStep {
                feature: feature.clone(),
                send_pipeline: client.send_pipeline().clone(),
            },
        )?;
        Ok(())
    }
}

struct SendStep {
    feature: Arc<HttpSend>,
    send_pipeline: Arc<Pipeline<HttpCall>>,
}

#[async_trait]
impl Interceptor<HttpCall> for SendStep {
    async fn intercept(&self, mut call: HttpCall, next: Next<'_, HttpCall>) -> Result<HttpCall, HttpError> {
        let request = std::mem::take(call.request_mut());
        let interceptors = self.feature.interceptors.read().clone();
        let sent = AtomicUsize::new(0);
        let sender = Sender {
            pipeline: &self.send_pipeline,
            rest: &interceptors,
            sent: &sent,
            max_send_count: self.feature.max_send_count,
        };

        let (request, response) = sender.execute(request).await?.into_parts()?;
        tracing::trace!(
            uri = %request.uri(),
            status = response.status().as_u16(),
            exchanges = sent.load(Ordering::Acquire),
            "call sent"
        );
        *call.request_mut() = request;
        call.set_response(response);
        next.run(call).await
    }
}
