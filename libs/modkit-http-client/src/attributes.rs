//! Type-safe, concurrency-safe attribute store.
//!
//! The store backs the feature registry of a client: every installed feature
//! is kept under its own [`AttributeKey`]. The same type is used for
//! per-call attributes on [`HttpCall`](crate::HttpCall).
//!
//! Implementation details:
//! - Key = (name, `TypeId` of the value type). Two keys with the same name but
//!   different value types never collide.
//! - Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on read).
//! - Values that own resources are registered together with a [`Closeable`]
//!   handle; the store never inspects values at runtime to discover that.

use crate::error::{AttributeError, BoxError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Shutdown hook of a value stored in an [`Attributes`] store.
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Release the resources held by the value.
    ///
    /// # Errors
    /// Returns the failure to release; the caller keeps closing other values.
    async fn close(&self) -> Result<(), BoxError>;
}

/// Typed key of a value of type `T`.
pub struct AttributeKey<T: ?Sized> {
    name: &'static str,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + 'static> AttributeKey<T> {
    /// Create a key. The name is used for diagnostics and, together with
    /// `T`, for identity.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Diagnostic name of the key.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Untyped identity of the key.
    #[must_use]
    pub fn id(&self) -> AttributeKeyId {
        AttributeKeyId {
            name: self.name,
            type_id: TypeId::of::<T>(),
        }
    }
}

impl<T: ?Sized> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for AttributeKey<T> {}

impl<T: ?Sized> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeKey({})", self.name)
    }
}

/// Untyped identity of an [`AttributeKey`], as returned by [`Attributes::keys`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeKeyId {
    name: &'static str,
    type_id: TypeId,
}

impl AttributeKeyId {
    /// Diagnostic name of the key.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for AttributeKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for AttributeKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    closeable: Option<Arc<dyn Closeable>>,
}

/// Concurrency-safe heterogeneous map keyed by [`AttributeKey`].
#[derive(Default)]
pub struct Attributes {
    map: RwLock<HashMap<AttributeKeyId, Entry>>,
}

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put<T>(&self, key: &AttributeKey<T>, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(key, value, None);
    }

    /// Store `value` under `key` and register its shutdown hook.
    pub fn put_closeable<T>(&self, key: &AttributeKey<T>, value: Arc<T>)
    where
        T: Closeable + 'static,
    {
        let closeable: Arc<dyn Closeable> = value.clone();
        self.insert(key, value, Some(closeable));
    }

    /// Store `value` under `key` with an explicit shutdown hook (or none).
    pub fn put_with_closeable<T>(
        &self,
        key: &AttributeKey<T>,
        value: Arc<T>,
        closeable: Option<Arc<dyn Closeable>>,
    ) where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(key, value, closeable);
    }

    fn insert<T>(
        &self,
        key: &AttributeKey<T>,
        value: Arc<T>,
        closeable: Option<Arc<dyn Closeable>>,
    ) where
        T: ?Sized + Send + Sync + 'static,
    {
        let entry = Entry {
            value: Box::new(value),
            closeable,
        };
        self.map.write().insert(key.id(), entry);
    }

    /// Fetch the value stored under `key`.
    ///
    /// # Errors
    /// Returns [`AttributeError::NotFound`] when nothing is stored under `key`.
    pub fn get<T>(&self, key: &AttributeKey<T>) -> Result<Arc<T>, AttributeError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_or_none(key)
            .ok_or(AttributeError::NotFound { key: key.name() })
    }

    /// Fetch the value stored under `key`, if any.
    #[must_use]
    pub fn get_or_none<T>(&self, key: &AttributeKey<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let r = self.map.read();
        // The TypeId in the key guarantees the stored value is exactly `Arc<T>`.
        r.get(&key.id())?.value.downcast_ref::<Arc<T>>().cloned()
    }

    /// Fetch the value under `key`, storing the result of `init` first if absent.
    pub fn compute_if_absent<T>(
        &self,
        key: &AttributeKey<T>,
        init: impl FnOnce() -> Arc<T>,
    ) -> Arc<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if let Some(existing) = self.get_or_none(key) {
            return existing;
        }
        let mut w = self.map.write();
        if let Some(existing) = w
            .get(&key.id())
            .and_then(|entry| entry.value.downcast_ref::<Arc<T>>())
        {
            return existing.clone();
        }
        let value = init();
        w.insert(
            key.id(),
            Entry {
                value: Box::new(value.clone()),
                closeable: None,
            },
        );
        value
    }

    /// Check whether a value is stored under `key`.
    #[must_use]
    pub fn contains<T>(&self, key: &AttributeKey<T>) -> bool
    where
        T: ?Sized + 'static,
    {
        self.map.read().contains_key(&key.id())
    }

    /// Remove the value under `key`; returns it if it was present.
    pub fn remove<T>(&self, key: &AttributeKey<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let entry = self.map.write().remove(&key.id())?;
        entry.value.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    /// Identities of every key currently present.
    #[must_use]
    pub fn keys(&self) -> Vec<AttributeKeyId> {
        self.map.read().keys().copied().collect()
    }

    /// Snapshot of every registered shutdown hook.
    #[must_use]
    pub fn closeables(&self) -> Vec<(AttributeKeyId, Arc<dyn Closeable>)> {
        self.map
            .read()
            .iter()
            .filter_map(|(id, entry)| entry.closeable.clone().map(|c| (*id, c)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;
    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_owned()
        }
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Closeable for Counter {
        async fn close(&self) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const NUMBER: AttributeKey<u32> = AttributeKey::new("number");
    const GREETER: AttributeKey<dyn Greeter> = AttributeKey::new("greeter");
    const COUNTER: AttributeKey<Counter> = AttributeKey::new("counter");

    #[test]
    fn put_and_get() {
        let attrs = Attributes::new();
        attrs.put(&NUMBER, Arc::new(7));
        assert_eq!(*attrs.get(&NUMBER).unwrap(), 7);
        assert!(attrs.contains(&NUMBER));
    }

    #[test]
    fn missing_key_is_not_found() {
        let attrs = Attributes::new();
        let err = attrs.get(&NUMBER).unwrap_err();
        assert_eq!(err, AttributeError::NotFound { key: "number" });
        assert!(attrs.get_or_none(&NUMBER).is_none());
    }

    #[test]
    fn same_name_different_type_do_not_collide() {
        const OTHER: AttributeKey<String> = AttributeKey::new("number");

        let attrs = Attributes::new();
        attrs.put(&NUMBER, Arc::new(1));
        attrs.put(&OTHER, Arc::new("one".to_owned()));

        assert_eq!(attrs.len(), 2);
        assert_eq!(*attrs.get(&NUMBER).unwrap(), 1);
        assert_eq!(attrs.get(&OTHER).unwrap().as_str(), "one");
    }

    #[test]
    fn trait_object_values() {
        let attrs = Attributes::new();
        attrs.put(&GREETER, Arc::new(English) as Arc<dyn Greeter>);
        assert_eq!(attrs.get(&GREETER).unwrap().greet(), "hello");
    }

    #[test]
    fn put_replaces_previous_value() {
        let attrs = Attributes::new();
        attrs.put(&NUMBER, Arc::new(1));
        attrs.put(&NUMBER, Arc::new(2));
        assert_eq!(attrs.len(), 1);
        assert_eq!(*attrs.get(&NUMBER).unwrap(), 2);
    }

    #[test]
    fn remove_returns_value() {
        let attrs = Attributes::new();
        attrs.put(&NUMBER, Arc::new(3));
        assert_eq!(*attrs.remove(&NUMBER).unwrap(), 3);
        assert!(attrs.remove(&NUMBER).is_none());
        assert!(attrs.is_empty());
    }

    #[test]
    fn compute_if_absent_only_initializes_once() {
        let attrs = Attributes::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = attrs.compute_if_absent(&NUMBER, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Arc::new(42)
            });
            assert_eq!(*v, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keys_lists_every_entry() {
        let attrs = Attributes::new();
        attrs.put(&NUMBER, Arc::new(1));
        attrs.put(&GREETER, Arc::new(English) as Arc<dyn Greeter>);

        let mut names: Vec<_> = attrs.keys().iter().map(AttributeKeyId::name).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["greeter", "number"]);
    }

    #[tokio::test]
    async fn closeables_only_lists_registered_hooks() {
        let attrs = Attributes::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        attrs.put(&NUMBER, Arc::new(1));
        attrs.put_closeable(&COUNTER, counter.clone());

        let hooks = attrs.closeables();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].0, COUNTER.id());
        hooks[0].1.close().await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_writers() {
        let attrs = Arc::new(Attributes::new());
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let attrs = attrs.clone();
                std::thread::spawn(move || {
                    attrs.put(&NUMBER, Arc::new(i));
                    attrs.get(&NUMBER).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(attrs.len(), 1);
    }
}
