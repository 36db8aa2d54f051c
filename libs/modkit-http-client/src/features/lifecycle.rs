use crate::attributes::AttributeKey;
use crate::call::HttpCall;
use crate::client::HttpClient;
use crate::error::HttpError;
use crate::feature::HttpClientFeature;
use crate::phases::RequestPhase;
use crate::pipeline::{Interceptor, Next};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Per-call cancellation token, stored in [`HttpCall::attributes`].
///
/// Cancelling it fails that call alone with [`HttpError::Cancelled`].
pub const CALL_LIFECYCLE: AttributeKey<CancellationToken> = AttributeKey::new("CallLifecycle");

/// Runs every call under a child token of the client's lifecycle.
///
/// Cancelling the client's token (directly, through its engine, or by
/// dropping the client) fails in-flight calls with [`HttpError::Cancelled`].
/// [`HttpClient::close`] waits for them instead.
#[derive(Debug, Default)]
pub struct HttpRequestLifecycle {
    in_flight: AtomicUsize,
}

impl HttpRequestLifecycle {
    /// Number of calls currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl HttpClientFeature for HttpRequestLifecycle {
    type Config = ();
    const KEY: AttributeKey<Self> = AttributeKey::new("HttpRequestLifecycle");

    fn prepare((): ()) -> Self {
        Self::default()
    }

    fn install(feature: &Arc<Self>, client: &HttpClient) -> Result<(), HttpError> {
        client.request_pipeline().intercept(
            RequestPhase::BEFORE,
            CallScope {
                feature: feature.clone(),
                client_lifecycle: client.lifecycle().clone(),
            },
        )?;
        Ok(())
    }
}

struct CallScope {
    feature: Arc<HttpRequestLifecycle>,
    client_lifecycle: CancellationToken,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Interceptor<HttpCall> for CallScope {
    async fn intercept(&self, call: HttpCall, next: Next<'_, HttpCall>) -> Result<HttpCall, HttpError> {
        let token = self.client_lifecycle.child_token();
        call.attributes().put(&CALL_LIFECYCLE, Arc::new(token.clone()));
        let _in_flight = InFlight::enter(&self.feature.in_flight);

        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!("call cancelled");
                Err(HttpError::Cancelled)
            }
            result = next.run(call) => result,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::HttpClientConfig;
    use crate::phases::SendPhase;
    use crate::test_support::{MockEngine, client, request};
    use std::time::Duration;

    /// Holds the call for a while before letting it through.
    struct Slow(Duration);

    #[async_trait]
    impl Interceptor<HttpCall> for Slow {
        async fn intercept(&self, call: HttpCall, next: Next<'_, HttpCall>) -> Result<HttpCall, HttpError> {
            tokio::time::sleep(self.0).await;
            next.run(call).await
        }
    }

    /// Cancels the call's own token.
    struct CancelSelf;

    #[async_trait]
    impl Interceptor<HttpCall> for CancelSelf {
        async fn intercept(&self, call: HttpCall, next: Next<'_, HttpCall>) -> Result<HttpCall, HttpError> {
            call.attributes().get(&CALL_LIFECYCLE)?.cancel();
            tokio::task::yield_now().await;
            next.run(call).await
        }
    }

    fn slow(delay: Duration) -> HttpClientConfig {
        HttpClientConfig::new().install_fn("Slow", move |client| {
            client.send_pipeline().intercept(SendPhase::BEFORE, Slow(delay))?;
            Ok(())
        })
    }

    async fn wait_in_flight(lifecycle: &HttpRequestLifecycle) {
        while lifecycle.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn close_lets_in_flight_calls_finish() {
        let engine = MockEngine::ok();
        let client = client(&engine, slow(Duration::from_millis(100))).await;
        let lifecycle = client.feature::<HttpRequestLifecycle>().unwrap();

        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.execute(request(http::Method::GET, "http://a/")).await })
        };
        wait_in_flight(&lifecycle).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.close().await.unwrap();
        let result = call.await.unwrap();
        assert!(result.is_ok(), "in-flight call failed: {result:?}");
        assert_eq!(engine.requests().len(), 1);
        assert_eq!(lifecycle.in_flight(), 0);
        assert!(client.lifecycle().is_cancelled());

        let late = client.execute(request(http::Method::GET, "http://a/")).await;
        assert!(matches!(late, Err(HttpError::ClientClosed)));
    }

    #[tokio::test]
    async fn client_cancellation_fails_in_flight_calls() {
        let engine = MockEngine::ok();
        let client = client(&engine, slow(Duration::from_secs(30))).await;
        let lifecycle = client.feature::<HttpRequestLifecycle>().unwrap();

        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.execute(request(http::Method::GET, "http://a/")).await })
        };
        wait_in_flight(&lifecycle).await;

        client.lifecycle().cancel();
        let result = call.await.unwrap();
        assert!(matches!(result, Err(HttpError::Cancelled)));
        assert_eq!(lifecycle.in_flight(), 0);
        assert!(engine.requests().is_empty());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn call_token_cancels_only_that_call() {
        let engine = MockEngine::ok();
        let config = HttpClientConfig::new().install_fn("CancelSelf", |client| {
            client.request_pipeline().intercept(RequestPhase::STATE, CancelSelf)?;
            Ok(())
        });
        let client = client(&engine, config).await;

        let result = client.execute(request(http::Method::GET, "http://a/")).await;
        assert!(matches!(result, Err(HttpError::Cancelled)));
        assert!(!client.lifecycle().is_cancelled());
    }

    #[tokio::test]
    async fn completed_call_leaves_counter_at_zero() {
        let engine = MockEngine::ok();
        let client = client(&engine, HttpClientConfig::new()).await;
        client.execute(request(http::Method::GET, "http://a/")).await.unwrap();
        assert_eq!(client.feature::<HttpRequestLifecycle>().unwrap().in_flight(), 0);
    }
}
