//! Feature installers and the registry that applies them.
//!
//! A feature is installed in two steps: its configuration is assembled from
//! the registered configure blocks and turned into the feature value
//! ([`HttpClientFeature::prepare`]), then the value is stored in the client's
//! attribute store and hooks itself into the pipelines
//! ([`HttpClientFeature::install`]).
//!
//! The registry resolves installers by key name before anything is
//! installed, so every key is installed exactly once per client.

use crate::attributes::{AttributeKey, AttributeKeyId, Closeable};
use crate::client::HttpClient;
use crate::config::HttpClientConfig;
use crate::engine::{EngineCapability, HttpEngine};
use crate::error::{ConfigError, HttpError};
use crate::features::{
    DefaultResponseValidation, DefaultTransformers, HttpRedirect, HttpRequestLifecycle, HttpSend,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A pluggable client feature.
///
/// The feature value itself is stored in the client's attribute store under
/// [`KEY`](Self::KEY) and can be fetched with [`HttpClient::feature`].
pub trait HttpClientFeature: Send + Sync + Sized + 'static {
    /// Configuration built by the caller's configure blocks.
    type Config: Default + Send + 'static;

    /// Attribute key of the installed feature. The key name identifies the
    /// feature in the install order and in diagnostics.
    const KEY: AttributeKey<Self>;

    /// Turn the final configuration into the feature value.
    fn prepare(config: Self::Config) -> Self;

    /// Register interceptors into the client's pipelines.
    ///
    /// # Errors
    /// Any error aborts client construction.
    fn install(feature: &Arc<Self>, client: &HttpClient) -> Result<(), HttpError>;

    /// Engine capabilities the feature depends on.
    fn required_capabilities() -> &'static [EngineCapability] {
        &[]
    }

    /// Shutdown hook run once when the client closes.
    fn closeable(_feature: &Arc<Self>) -> Option<Arc<dyn Closeable>> {
        None
    }
}

type ConfigBlock<C> = Arc<dyn Fn(&mut C) + Send + Sync>;
type ErasedBlock = Arc<dyn Any + Send + Sync>;
type RawInstall = Arc<dyn Fn(&HttpClient) -> Result<(), HttpError> + Send + Sync>;

/// Marker value type of keys created for named install callbacks.
struct RawInstaller;

#[derive(Clone)]
struct TypedInstaller {
    blocks: Vec<ErasedBlock>,
    install: fn(&[ErasedBlock], &HttpClient) -> Result<(), HttpError>,
    required: fn() -> &'static [EngineCapability],
}

#[derive(Clone)]
enum InstallerKind {
    Typed(TypedInstaller),
    Raw(RawInstall),
}

/// A registered install step: a key plus the work to run for it.
#[derive(Clone)]
pub struct FeatureInstaller {
    key: AttributeKeyId,
    kind: InstallerKind,
}

impl FeatureInstaller {
    /// Installer of feature `F` configured by `configure`.
    #[must_use]
    pub fn typed<F>(configure: impl Fn(&mut F::Config) + Send + Sync + 'static) -> Self
    where
        F: HttpClientFeature,
    {
        let block: ConfigBlock<F::Config> = Arc::new(configure);
        Self {
            key: F::KEY.id(),
            kind: InstallerKind::Typed(TypedInstaller {
                blocks: vec![Arc::new(block)],
                install: install_typed::<F>,
                required: F::required_capabilities,
            }),
        }
    }

    /// Installer running an arbitrary callback under `name`.
    #[must_use]
    pub fn raw(
        name: &'static str,
        install: impl Fn(&HttpClient) -> Result<(), HttpError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: AttributeKey::<RawInstaller>::new(name).id(),
            kind: InstallerKind::Raw(Arc::new(install)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.key.name()
    }

    #[must_use]
    pub fn key(&self) -> AttributeKeyId {
        self.key
    }

    fn required_capabilities(&self) -> &'static [EngineCapability] {
        match &self.kind {
            InstallerKind::Typed(typed) => (typed.required)(),
            InstallerKind::Raw(_) => &[],
        }
    }

    /// Fold a later installer with the same key into this one.
    fn absorb(&mut self, later: &FeatureInstaller) -> Result<(), ConfigError> {
        if self.key != later.key {
            return Err(ConfigError::ConflictingFeature {
                key: self.name().to_owned(),
            });
        }
        match (&mut self.kind, &later.kind) {
            (InstallerKind::Typed(mine), InstallerKind::Typed(theirs)) => {
                mine.blocks.extend(theirs.blocks.iter().cloned());
            }
            (InstallerKind::Raw(mine), InstallerKind::Raw(theirs)) => {
                *mine = theirs.clone();
            }
            _ => {
                return Err(ConfigError::ConflictingFeature {
                    key: self.name().to_owned(),
                });
            }
        }
        Ok(())
    }

    fn install(&self, client: &HttpClient) -> Result<(), HttpError> {
        match &self.kind {
            InstallerKind::Typed(typed) => (typed.install)(&typed.blocks, client),
            InstallerKind::Raw(install) => install(client),
        }
    }
}

impl fmt::Debug for FeatureInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            InstallerKind::Typed(_) => "typed",
            InstallerKind::Raw(_) => "raw",
        };
        f.debug_struct("FeatureInstaller")
            .field("key", &self.key)
            .field("kind", &kind)
            .finish()
    }
}

fn install_typed<F>(blocks: &[ErasedBlock], client: &HttpClient) -> Result<(), HttpError>
where
    F: HttpClientFeature,
{
    let mut config = F::Config::default();
    for block in blocks {
        if let Some(block) = block.downcast_ref::<ConfigBlock<F::Config>>() {
            block(&mut config);
        }
    }
    let feature = Arc::new(F::prepare(config));
    let closeable = F::closeable(&feature);
    client
        .attributes()
        .put_with_closeable(&F::KEY, feature.clone(), closeable);
    F::install(&feature, client)
}

/// Installers of one client, resolved into their final install order.
#[derive(Debug)]
pub struct FeatureRegistry {
    entries: Vec<FeatureInstaller>,
}

impl FeatureRegistry {
    /// Resolve the install sequence of `config`.
    ///
    /// Built-in features come first in their fixed order, followed by the
    /// caller's installers in registration order. Installers sharing a key
    /// are folded into the first occurrence, which keeps its position.
    pub(crate) fn resolve(config: &HttpClientConfig) -> Result<Self, ConfigError> {
        let mut builtins = vec![FeatureInstaller::typed::<HttpRequestLifecycle>(|_| {})];
        if config.use_default_transformers {
            builtins.push(FeatureInstaller::typed::<DefaultTransformers>(|_| {}));
        }
        if config.expect_success {
            builtins.push(FeatureInstaller::typed::<DefaultResponseValidation>(|_| {}));
        }
        builtins.push(FeatureInstaller::typed::<HttpSend>(|_| {}));
        if config.follow_redirects {
            builtins.push(FeatureInstaller::typed::<HttpRedirect>(|_| {}));
        }

        let mut entries: Vec<FeatureInstaller> = Vec::new();
        for installer in builtins.iter().chain(config.installers()) {
            match entries.iter_mut().find(|e| e.name() == installer.name()) {
                Some(existing) => existing.absorb(installer)?,
                None => entries.push(installer.clone()),
            }
        }
        Ok(Self { entries })
    }

    /// Fail if any feature needs a capability `engine` does not advertise.
    pub(crate) fn check_capabilities(&self, engine: &dyn HttpEngine) -> Result<(), ConfigError> {
        for entry in &self.entries {
            for capability in entry.required_capabilities() {
                if !engine.capabilities().contains(capability) {
                    return Err(ConfigError::UnsupportedCapability {
                        feature: entry.name().to_owned(),
                        capability: capability.name().to_owned(),
                        engine: engine.name().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(FeatureInstaller::name).collect()
    }

    /// Run every installer in order. The first failure aborts.
    pub(crate) fn install(&self, client: &HttpClient) -> Result<(), HttpError> {
        for entry in &self.entries {
            tracing::debug!(feature = entry.name(), "installing feature");
            entry.install(client).map_err(|err| match err {
                HttpError::Config(err) => HttpError::Config(err),
                other => HttpError::Config(ConfigError::Install {
                    feature: entry.name().to_owned(),
                    reason: other.to_string(),
                }),
            })?;
        }
        Ok(())
    }
}
