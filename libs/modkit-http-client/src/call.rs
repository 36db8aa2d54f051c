use crate::attributes::Attributes;
use crate::error::HttpError;
use bytes::Bytes;
use http::{Request, Response};
use std::fmt;

/// A single request/response exchange travelling through the client pipelines.
///
/// The request pipeline receives a call without a response; the engine
/// attaches one in the send pipeline; the receive and response pipelines see
/// the completed call. Per-call state shared between interceptors lives in
/// [`HttpCall::attributes`].
pub struct HttpCall {
    request: Request<Bytes>,
    response: Option<Response<Bytes>>,
    attributes: Attributes,
}

impl HttpCall {
    #[must_use]
    pub fn new(request: Request<Bytes>) -> Self {
        Self {
            request,
            response: None,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Bytes> {
        &mut self.request
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response<Bytes>> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response<Bytes>> {
        self.response.as_mut()
    }

    /// Attach (or replace) the response of this call.
    pub fn set_response(&mut self, response: Response<Bytes>) {
        self.response = Some(response);
    }

    #[must_use]
    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Per-call attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Split the call into its request and response.
    ///
    /// # Errors
    /// Returns [`HttpError::NoResponse`] if no response was attached.
    pub fn into_parts(self) -> Result<(Request<Bytes>, Response<Bytes>), HttpError> {
        let response = self.response.ok_or(HttpError::NoResponse)?;
        Ok((self.request, response))
    }

    /// Take the response of this call.
    ///
    /// # Errors
    /// Returns [`HttpError::NoResponse`] if no response was attached.
    pub fn into_response(self) -> Result<Response<Bytes>, HttpError> {
        self.response.ok_or(HttpError::NoResponse)
    }
}

impl fmt::Debug for HttpCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCall")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("status", &self.response.as_ref().map(Response::status))
            .field("attributes", &self.attributes)
            .finish()
    }
}
