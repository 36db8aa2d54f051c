use crate::attributes::AttributeKey;
use crate::call::HttpCall;
use crate::client::HttpClient;
use crate::error::HttpError;
use crate::feature::HttpClientFeature;
use crate::phases::RequestPhase;
use crate::pipeline::map_subject;
use http::HeaderValue;
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use std::sync::Arc;

/// Fills in the headers every request needs before it is sent:
///
/// - `Accept: */*` when no `Accept` header is set
/// - `Content-Type: application/octet-stream` for a non-empty body without one
/// - `Content-Length` for a non-empty body
#[derive(Debug, Default)]
pub struct DefaultTransformers;

impl HttpClientFeature for DefaultTransformers {
    type Config = ();
    const KEY: AttributeKey<Self> = AttributeKey::new("DefaultTransformers");

    fn prepare((): ()) -> Self {
        Self
    }

    fn install(_feature: &Arc<Self>, client: &HttpClient) -> Result<(), HttpError> {
        client
            .request_pipeline()
            .intercept(RequestPhase::RENDER, map_subject(render_defaults))?;
        Ok(())
    }
}

fn render_defaults(mut call: HttpCall) -> Result<HttpCall, HttpError> {
    let request = call.request_mut();
    let body_len = request.body().len();
    let headers = request.headers_mut();

    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    }
    if body_len > 0 {
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
        }
        if !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
        }
    }
    Ok(call)
}
