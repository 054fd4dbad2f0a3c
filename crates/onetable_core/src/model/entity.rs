//! Entity contract and shared handles for tracked objects.
//!
//! # Responsibility
//! - Define what an application type must provide to be persisted.
//! - Provide `Tracked<T>`, the shared handle the change tracker observes.
//!
//! # Invariants
//! - A `Tracked<T>` clone refers to the same object; pointer identity is the
//!   fallback identity when the schema identity property is absent.
//! - `Tracked<T>` serializes exactly like `T`.
//! - Never call into the tracker while holding a write guard of a tracked
//!   object: the locks are not reentrant.

use crate::model::document::{to_document, Document, MapperResult};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Application type stored in the single table.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical type name; registry key and diagnostic label.
    const TYPE_NAME: &'static str;
}

/// Shared, lockable handle to an application object.
pub struct Tracked<T>(Arc<RwLock<T>>);

impl<T> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    /// Returns whether both handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn instance_id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> From<T> for Tracked<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Debug> Debug for Tracked<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Tracked").field(&*self.0.read()).finish()
    }
}

impl<T: Serialize> Serialize for Tracked<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.read().serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Tracked<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self::new)
    }
}

/// Type-erased view of a `Tracked<T>` used inside the tracker.
pub(crate) trait AnyTracked: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn instance_id(&self) -> usize;
    fn to_document(&self) -> MapperResult<Document>;
    fn as_any(&self) -> &dyn Any;
    fn clone_boxed(&self) -> Box<dyn AnyTracked>;
}

impl<T: Entity> AnyTracked for Tracked<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn instance_id(&self) -> usize {
        Tracked::instance_id(self)
    }

    fn to_document(&self) -> MapperResult<Document> {
        to_document(T::TYPE_NAME, &*self.read())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn AnyTracked> {
        Box::new(self.clone())
    }
}
