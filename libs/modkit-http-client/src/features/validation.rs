use crate::attributes::AttributeKey;
use crate::call::HttpCall;
use crate::client::HttpClient;
use crate::error::HttpError;
use crate::feature::HttpClientFeature;
use crate::phases::ResponsePhase;
use crate::pipeline::map_subject;
use crate::response::status_error;
use std::sync::Arc;

/// Rejects non-2xx final responses with [`HttpError::HttpStatus`].
///
/// Installed when `expect_success` is set. Runs on the final response of
/// the call, so redirects that were followed are never rejected.
#[derive(Debug, Default)]
pub struct DefaultResponseValidation;

impl HttpClientFeature for DefaultResponseValidation {
    type Config = ();
    const KEY: AttributeKey<Self> = AttributeKey::new("DefaultResponseValidation");

    fn prepare((): ()) -> Self {
        Self
    }

    fn install(_feature: &Arc<Self>, client: &HttpClient) -> Result<(), HttpError> {
        client
            .response_pipeline()
            .intercept(ResponsePhase::RECEIVE, map_subject(validate))?;
        Ok(())
    }
}

fn validate(call: HttpCall) -> Result<HttpCall, HttpError> {
    match call.response() {
        Some(response) if !response.status().is_success() => {
            tracing::debug!(
                status = response.status().as_u16(),
                uri = %call.request().uri(),
                "response rejected by validation"
            );
            Err(status_error(response))
        }
        Some(_) => Ok(call),
        None => Err(HttpError::NoResponse),
    }
}
