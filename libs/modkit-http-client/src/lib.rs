#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Composable HTTP client core for `ModKit`
//!
//! A client is assembled from two parts:
//! - an **engine** ([`HttpEngine`]) that performs the network exchange; the
//!   default [`HyperEngine`] uses hyper with rustls (HTTPS only by default),
//!   connection pooling, timeouts and transparent decompression
//! - a set of **features** ([`HttpClientFeature`]) that hook interceptors into
//!   four pipelines (request, send, receive, response)
//!
//! Every call travels the request pipeline, whose send step runs one or more
//! exchanges through the send pipeline down to the engine; each exchange's
//! response goes through the receive pipeline, and the final call through
//! the response pipeline.
//!
//! # Lifecycle
//!
//! The client's cancellation token is a child of the engine's, so closing an
//! engine fails every client built on it. [`HttpClient::close`] is idempotent:
//! it rejects new calls, waits for in-flight ones, runs every feature's
//! shutdown hook once, cancels the client and closes the engine only if the
//! client owns it (created through a factory) and is its last owner.
//!
//! # Example
//!
//! ```ignore
//! use modkit_http_client::{HttpClient, HttpClientConfig, UserAgent};
//!
//! let client = HttpClient::new(
//!     HttpClientConfig::new()
//!         .expect_success(true)
//!         .install::<UserAgent>(|c| c.agent = "my-app/1.0".to_owned()),
//! )
//! .await?;
//!
//! let data: MyData = client
//!     .get("https://example.com/api")
//!     .send()
//!     .await?
//!     .json()?;
//!
//! client.close().await?;
//! ```

mod attributes;
mod call;
mod client;
mod config;
mod engine;
mod error;
mod feature;
mod features;
mod lifecycle;
mod phases;
mod pipeline;
mod request;
mod response;

#[cfg(test)]
mod test_support;

pub use attributes::{AttributeKey, AttributeKeyId, Attributes, Closeable};
pub use call::HttpCall;
pub use client::HttpClient;
pub use config::{
    DEFAULT_USER_AGENT, EngineConfig, HttpClientConfig, RedirectConfig, TlsRootConfig,
    TransportSecurity,
};
pub use engine::{
    EngineCapability, EngineInterceptor, HttpEngine, HttpEngineFactory, HyperEngine,
    HyperEngineFactory,
};
pub use error::{
    AttributeError, BoxError, ConfigError, HttpError, InvalidUriKind, ShutdownError,
    ShutdownFailure, StatusClass,
};
pub use feature::{FeatureInstaller, HttpClientFeature};
pub use features::{
    CALL_LIFECYCLE, DefaultResponseValidation, DefaultTransformers, HttpRedirect,
    HttpRequestLifecycle, HttpSend, HttpSendConfig, SendInterceptor, Sender, UserAgent,
    UserAgentConfig,
};
pub use phases::{ReceivePhase, RequestPhase, ResponsePhase, SendPhase};
pub use pipeline::{Interceptor, MapSubject, Next, Pipeline, PipelinePhase, map_subject};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, parse_retry_after};
