//! Built-in client features.
//!
//! Installed automatically, in this order:
//!
//! 1. [`HttpRequestLifecycle`] (always)
//! 2. [`DefaultTransformers`] (if `use_default_transformers`)
//! 3. [`DefaultResponseValidation`] (if `expect_success`)
//! 4. [`HttpSend`] (always)
//! 5. [`HttpRedirect`] (if `follow_redirects`)
//!
//! [`UserAgent`] is opt-in.

mod lifecycle;
mod redirect;
mod send;
mod transformers;
mod user_agent;
mod validation;

pub use lifecycle::{CALL_LIFECYCLE, HttpRequestLifecycle};
pub use redirect::HttpRedirect;
pub use send::{HttpSend, HttpSendConfig, SendInterceptor, Sender};
pub use transformers::DefaultTransformers;
pub use user_agent::{UserAgent, UserAgentConfig};
pub use validation::DefaultResponseValidation;
