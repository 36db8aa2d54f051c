//! Ordered interceptor chains with named phases.
//!
//! A [`Pipeline`] threads a subject through every registered [`Interceptor`]
//! in phase order (and registration order within a phase). Each interceptor
//! decides what happens next:
//! - transform the subject and forward it with [`Next::run`],
//! - return without calling `next` to short-circuit the rest of the chain,
//! - return an error to abort the execution.

use crate::error::{ConfigError, HttpError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Named insertion point of a [`Pipeline`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelinePhase(&'static str);

impl PipelinePhase {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phase({})", self.0)
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A single step of a [`Pipeline`].
#[async_trait]
pub trait Interceptor<S: Send + 'static>: Send + Sync {
    /// Process `subject`. Call `next.run(..)` to continue with the rest of
    /// the chain.
    ///
    /// # Errors
    /// Any error aborts the pipeline execution and is returned to its caller.
    async fn intercept(&self, subject: S, next: Next<'_, S>) -> Result<S, HttpError>;
}

/// Remainder of an executing chain, handed to each interceptor.
pub struct Next<'a, S> {
    chain: &'a [Arc<dyn Interceptor<S>>],
}

impl<S: Send + 'static> Next<'_, S> {
    /// Run the remaining interceptors; returns the subject unchanged when the
    /// chain is exhausted.
    ///
    /// # Errors
    /// Propagates the first error returned by a downstream interceptor.
    pub async fn run(self, subject: S) -> Result<S, HttpError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.intercept(subject, Next { chain: rest }).await,
            None => Ok(subject),
        }
    }

    /// Number of interceptors still to run.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

/// Interceptor that transforms the subject and always forwards it.
pub struct MapSubject<F>(F);

/// Build an interceptor from a synchronous transformation.
pub fn map_subject<S, F>(f: F) -> MapSubject<F>
where
    F: Fn(S) -> Result<S, HttpError> + Send + Sync,
{
    MapSubject(f)
}

#[async_trait]
impl<S, F> Interceptor<S> for MapSubject<F>
where
    S: Send + 'static,
    F: Fn(S) -> Result<S, HttpError> + Send + Sync,
{
    async fn intercept(&self, subject: S, next: Next<'_, S>) -> Result<S, HttpError> {
        let subject = (self.0)(subject)?;
        next.run(subject).await
    }
}

struct PhaseSlot<S> {
    phase: PipelinePhase,
    interceptors: Vec<Arc<dyn Interceptor<S>>>,
}

/// Ordered list of phases, each holding zero or more interceptors.
///
/// Interceptors are registered through `&self` so features can install
/// themselves into a shared client. Once the client is built the pipeline is
/// sealed and every further registration fails with [`ConfigError::Sealed`].
pub struct Pipeline<S> {
    name: &'static str,
    phases: RwLock<Vec<PhaseSlot<S>>>,
    sealed: AtomicBool,
}

impl<S: Send + 'static> Pipeline<S> {
    /// Create a pipeline with the given phases in order.
    #[must_use]
    pub fn new(name: &'static str, phases: &[PipelinePhase]) -> Self {
        let phases = phases
            .iter()
            .map(|phase| PhaseSlot {
                phase: *phase,
                interceptors: Vec::new(),
            })
            .collect();
        Self {
            name,
            phases: RwLock::new(phases),
            sealed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether registrations are closed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Freeze phases and interceptors.
    pub(crate) fn seal(&self) {
        let _guard = self.phases.write();
        self.sealed.store(true, Ordering::Release);
    }

    /// Phases in execution order.
    #[must_use]
    pub fn phases(&self) -> Vec<PipelinePhase> {
        self.phases.read().iter().map(|slot| slot.phase).collect()
    }

    #[must_use]
    pub fn has_phase(&self, phase: PipelinePhase) -> bool {
        self.phases.read().iter().any(|slot| slot.phase == phase)
    }

    /// Append a phase after all existing phases.
    ///
    /// # Errors
    /// Returns [`ConfigError::DuplicatePhase`] if the phase already exists
    /// and [`ConfigError::Sealed`] once the pipeline is sealed.
    pub fn add_phase(&self, phase: PipelinePhase) -> Result<(), ConfigError> {
        let mut w = self.phases.write();
        self.ensure_open()?;
        self.ensure_absent(&w, phase)?;
        w.push(PhaseSlot {
            phase,
            interceptors: Vec::new(),
        });
        Ok(())
    }

    /// Insert `phase` right after `reference`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownPhase`] if `reference` is missing,
    /// [`ConfigError::DuplicatePhase`] if `phase` already exists and
    /// [`ConfigError::Sealed`] once the pipeline is sealed.
    pub fn insert_phase_after(
        &self,
        reference: PipelinePhase,
        phase: PipelinePhase,
    ) -> Result<(), ConfigError> {
        self.insert_phase_at(reference, phase, 1)
    }

    /// Insert `phase` right before `reference`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownPhase`] if `reference` is missing,
    /// [`ConfigError::DuplicatePhase`] if `phase` already exists and
    /// [`ConfigError::Sealed`] once the pipeline is sealed.
    pub fn insert_phase_before(
        &self,
        reference: PipelinePhase,
        phase: PipelinePhase,
    ) -> Result<(), ConfigError> {
        self.insert_phase_at(reference, phase, 0)
    }

    fn insert_phase_at(
        &self,
        reference: PipelinePhase,
        phase: PipelinePhase,
        offset: usize,
    ) -> Result<(), ConfigError> {
        let mut w = self.phases.write();
        self.ensure_open()?;
        self.ensure_absent(&w, phase)?;
        let index = self.index_of(&w, reference)?;
        w.insert(
            index + offset,
            PhaseSlot {
                phase,
                interceptors: Vec::new(),
            },
        );
        Ok(())
    }

    /// Append `interceptor` to the end of `phase`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownPhase`] if the pipeline has no such phase
    /// and [`ConfigError::Sealed`] once the pipeline is sealed.
    pub fn intercept<I>(&self, phase: PipelinePhase, interceptor: I) -> Result<(), ConfigError>
    where
        I: Interceptor<S> + 'static,
    {
        self.intercept_arc(phase, Arc::new(interceptor))
    }

    /// Append an already shared interceptor to the end of `phase`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownPhase`] if the pipeline has no such phase
    /// and [`ConfigError::Sealed`] once the pipeline is sealed.
    pub fn intercept_arc(
        &self,
        phase: PipelinePhase,
        interceptor: Arc<dyn Interceptor<S>>,
    ) -> Result<(), ConfigError> {
        let mut w = self.phases.write();
        self.ensure_open()?;
        let index = self.index_of(&w, phase)?;
        w[index].interceptors.push(interceptor);
        Ok(())
    }

    /// Total number of interceptors across all phases.
    #[must_use]
    pub fn interceptor_count(&self) -> usize {
        self.phases
            .read()
            .iter()
            .map(|slot| slot.interceptors.len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptor_count() == 0
    }

    /// Thread `subject` through every interceptor.
    ///
    /// The chain is snapshotted before the first interceptor runs, so
    /// registrations racing with an execution never affect it.
    ///
    /// # Errors
    /// Returns the first error raised by an interceptor.
    pub async fn execute(&self, subject: S) -> Result<S, HttpError> {
        let chain: Vec<Arc<dyn Interceptor<S>>> = self
            .phases
            .read()
            .iter()
            .flat_map(|slot| slot.interceptors.iter().cloned())
            .collect();
        Next { chain: &chain }.run(subject).await
    }

    fn ensure_open(&self) -> Result<(), ConfigError> {
        if self.is_sealed() {
            return Err(ConfigError::Sealed {
                pipeline: self.name.to_owned(),
            });
        }
        Ok(())
    }

    fn index_of(&self, slots: &[PhaseSlot<S>], phase: PipelinePhase) -> Result<usize, ConfigError> {
        slots
            .iter()
            .position(|slot| slot.phase == phase)
            .ok_or_else(|| ConfigError::UnknownPhase {
                pipeline: self.name.to_owned(),
                phase: phase.name().to_owned(),
            })
    }

    fn ensure_absent(&self, slots: &[PhaseSlot<S>], phase: PipelinePhase) -> Result<(), ConfigError> {
        if slots.iter().any(|slot| slot.phase == phase) {
            return Err(ConfigError::DuplicatePhase {
                pipeline: self.name.to_owned(),
                phase: phase.name().to_owned(),
            });
        }
        Ok(())
    }
}

impl<S> fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phases = self.phases.read();
        let mut list = f.debug_list();
        for slot in phases.iter() {
            list.entry(&format_args!("{}({})", slot.phase, slot.interceptors.len()));
        }
        list.finish()
    }
}
