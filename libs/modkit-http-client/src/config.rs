use crate::client::HttpClient;
use crate::error::HttpError;
use crate::feature::{FeatureInstaller, HttpClientFeature};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-http-client/", env!("CARGO_PKG_VERSION"));

/// Configuration for redirect behavior
///
/// Controls how the redirect feature handles 3xx responses with security protections.
///
/// ## Security Features
///
/// - **Same-origin enforcement**: By default, only follows redirects to the same host
/// - **Header stripping**: Removes `Authorization`, `Cookie` on cross-origin redirects
/// - **Downgrade protection**: Blocks HTTPS → HTTP redirects
/// - **Host allow-list**: Configurable list of trusted redirect targets
///
/// A redirect that is refused by the policy is not an error: the 3xx response
/// is handed back to the caller as-is.
///
/// ## Example
///
/// ```rust,ignore
/// use modkit_http_client::{HttpRedirect, RedirectConfig};
///
/// let client = HttpClient::with_engine(engine, HttpClientConfig::new().install::<HttpRedirect>(|c| {
///     *c = RedirectConfig::permissive();
/// }))
/// .await?;
/// ```
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Maximum number of redirects to follow (default: 10)
    ///
    /// Set to `0` to disable redirect following entirely.
    pub max_redirects: usize,

    /// Only allow same-origin redirects (default: true)
    ///
    /// When `true`, redirects to different hosts are blocked unless the target
    /// host is in `allowed_redirect_hosts`.
    pub same_origin_only: bool,

    /// Hosts that are allowed as redirect targets even when `same_origin_only` is true
    ///
    /// **Note**: Entries should be hostnames only, without scheme or port.
    pub allowed_redirect_hosts: HashSet<String>,

    /// Strip sensitive headers on cross-origin redirects (default: true)
    ///
    /// Removes `Authorization`, `Cookie` and `Proxy-Authorization`.
    pub strip_sensitive_headers: bool,

    /// Allow HTTPS → HTTP downgrades (default: false)
    pub allow_https_downgrade: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            same_origin_only: true,
            allowed_redirect_hosts: HashSet::new(),
            strip_sensitive_headers: true,
            allow_https_downgrade: false,
        }
    }
}

impl RedirectConfig {
    /// Create a permissive configuration that allows all redirects with header stripping
    ///
    /// **Note**: This configuration still blocks HTTPS → HTTP downgrades.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            same_origin_only: false,
            ..Default::default()
        }
    }

    /// Create a configuration that disables redirect following
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_redirects: 0,
            ..Default::default()
        }
    }

    /// Create a configuration for testing (allows HTTP, permissive)
    ///
    /// **WARNING**: Only use for local testing with mock servers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            same_origin_only: false,
            allow_https_downgrade: true,
            ..Default::default()
        }
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
///
/// Controls whether the engine enforces TLS or allows insecure HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (for testing with mock servers only)
    AllowInsecureHttp,
}

/// Settings handed to an [`HttpEngineFactory`](crate::HttpEngineFactory).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-request timeout (default: 30 seconds)
    pub request_timeout: Duration,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Timeout for idle connections in the pool (default: 90 seconds)
    ///
    /// Set to `None` to keep idle connections indefinitely.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10 MB
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl EngineConfig {
    /// Create minimal configuration (small timeout, small body limit, small pool)
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024, // 1 MB
            pool_idle_timeout: Some(Duration::from_secs(30)),
            pool_max_idle_per_host: 8,
            ..Default::default()
        }
    }
}

type EngineConfigBlock = Arc<dyn Fn(&mut EngineConfig) + Send + Sync>;

/// Client configuration: feature installers, engine settings and client toggles.
///
/// A configuration is a template: building a client reads it without
/// consuming it, and [`merge`](Self::merge) never mutates its argument, so the
/// same configuration can seed any number of clients.
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Follow 3xx responses through the redirect feature (default: true)
    pub follow_redirects: bool,

    /// Install the default content transformers (default: true)
    pub use_default_transformers: bool,

    /// Reject non-2xx responses with [`HttpError::HttpStatus`] (default: false)
    pub expect_success: bool,

    installers: Vec<FeatureInstaller>,
    engine_blocks: Vec<EngineConfigBlock>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            use_default_transformers: true,
            expect_success: false,
            installers: Vec::new(),
            engine_blocks: Vec::new(),
        }
    }
}

impl HttpClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    #[must_use]
    pub fn use_default_transformers(mut self, enabled: bool) -> Self {
        self.use_default_transformers = enabled;
        self
    }

    #[must_use]
    pub fn expect_success(mut self, enabled: bool) -> Self {
        self.expect_success = enabled;
        self
    }

    /// Register feature `F`, configured by `configure`.
    ///
    /// Registering the same feature again keeps its original position in the
    /// install order and applies the new configure block after the previous
    /// ones, so later settings win.
    #[must_use]
    pub fn install<F>(mut self, configure: impl Fn(&mut F::Config) + Send + Sync + 'static) -> Self
    where
        F: HttpClientFeature,
    {
        self.add_feature::<F>(configure);
        self
    }

    /// Register feature `F` with its default configuration.
    #[must_use]
    pub fn install_default<F>(self) -> Self
    where
        F: HttpClientFeature,
    {
        self.install::<F>(|_| {})
    }

    /// Register a named install callback.
    ///
    /// A later callback registered under the same name replaces the earlier one.
    #[must_use]
    pub fn install_fn(
        mut self,
        name: &'static str,
        install: impl Fn(&HttpClient) -> Result<(), HttpError> + Send + Sync + 'static,
    ) -> Self {
        self.add_feature_fn(name, install);
        self
    }

    /// In-place form of [`install`](Self::install), for use inside
    /// [`HttpClient::config`] blocks.
    pub fn add_feature<F>(
        &mut self,
        configure: impl Fn(&mut F::Config) + Send + Sync + 'static,
    ) -> &mut Self
    where
        F: HttpClientFeature,
    {
        self.add_installer(FeatureInstaller::typed::<F>(configure));
        self
    }

    /// In-place form of [`install_fn`](Self::install_fn).
    pub fn add_feature_fn(
        &mut self,
        name: &'static str,
        install: impl Fn(&HttpClient) -> Result<(), HttpError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.add_installer(FeatureInstaller::raw(name, install));
        self
    }

    /// Append an already built installer.
    pub fn add_installer(&mut self, installer: FeatureInstaller) {
        self.installers.push(installer);
    }

    /// Adjust engine settings. Blocks run in registration order when the
    /// engine is created from a factory.
    #[must_use]
    pub fn engine(mut self, configure: impl Fn(&mut EngineConfig) + Send + Sync + 'static) -> Self {
        self.engine_blocks.push(Arc::new(configure));
        self
    }

    /// Set the engine's transport security mode.
    #[must_use]
    pub fn transport(self, transport: TransportSecurity) -> Self {
        self.engine(move |c| c.transport = transport)
    }

    /// Allow plain `http://` URLs (for testing with mock servers only).
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    #[must_use]
    pub fn allow_insecure_http(self) -> Self {
        tracing::warn!(
            target: "modkit_http_client::security",
            "allow_insecure_http() called; plain HTTP requests will be permitted"
        );
        self.transport(TransportSecurity::AllowInsecureHttp)
    }

    /// Installers in registration order (before same-key resolution).
    #[must_use]
    pub fn installers(&self) -> &[FeatureInstaller] {
        &self.installers
    }

    /// Names of the registered installers in registration order.
    #[must_use]
    pub fn installer_names(&self) -> Vec<&'static str> {
        self.installers.iter().map(FeatureInstaller::name).collect()
    }

    /// Engine settings produced by applying every engine block to the defaults.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        for block in &self.engine_blocks {
            block(&mut config);
        }
        config
    }

    /// Merge `other` into `self`.
    ///
    /// Installers and engine blocks of `other` are appended after ours; the
    /// client toggles of `other` override ours. `other` is left untouched.
    pub fn merge(&mut self, other: &HttpClientConfig) {
        self.follow_redirects = other.follow_redirects;
        self.use_default_transformers = other.use_default_transformers;
        self.expect_success = other.expect_success;
        self.installers.extend(other.installers.iter().cloned());
        self.engine_blocks.extend(other.engine_blocks.iter().cloned());
    }
}

impl std::ops::AddAssign<&HttpClientConfig> for HttpClientConfig {
    fn add_assign(&mut self, other: &HttpClientConfig) {
        self.merge(other);
    }
}

impl fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("follow_redirects", &self.follow_redirects)
            .field("use_default_transformers", &self.use_default_transformers)
            .field("expect_success", &self.expect_success)
            .field("installers", &self.installer_names())
            .field("engine_blocks", &self.engine_blocks.len())
            .finish()
    }
}
