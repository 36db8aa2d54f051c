use crate::attributes::AttributeKey;
use crate::call::HttpCall;
use crate::client::HttpClient;
use crate::config::DEFAULT_USER_AGENT;
use crate::error::HttpError;
use crate::feature::HttpClientFeature;
use crate::phases::RequestPhase;
use crate::pipeline::map_subject;
use http::HeaderValue;
use http::header::USER_AGENT;
use std::sync::Arc;

/// Configuration of [`UserAgent`].
#[derive(Debug, Clone)]
pub struct UserAgentConfig {
    /// Value of the `User-Agent` header (default: [`DEFAULT_USER_AGENT`])
    pub agent: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Adds a `User-Agent` header to requests that do not carry one.
#[derive(Debug)]
pub struct UserAgent {
    agent: String,
}

impl UserAgent {
    #[must_use]
    pub fn agent(&self) -> &str {
        &self.agent
    }
}

impl HttpClientFeature for UserAgent {
    type Config = UserAgentConfig;
    const KEY: AttributeKey<Self> = AttributeKey::new("UserAgent");

    fn prepare(config: UserAgentConfig) -> Self {
        Self {
            agent: config.agent,
        }
    }

    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the agent string is not a
    /// valid header value.
    fn install(feature: &Arc<Self>, client: &HttpClient) -> Result<(), HttpError> {
        let value = HeaderValue::from_str(&feature.agent)?;
        client.request_pipeline().intercept(
            RequestPhase::STATE,
            map_subject(move |mut call: HttpCall| {
                let headers = call.request_mut().headers_mut();
                if !headers.contains_key(USER_AGENT) {
                    headers.insert(USER_AGENT, value.clone());
                }
                Ok(call)
            }),
        )?;
        Ok(())
    }
}
