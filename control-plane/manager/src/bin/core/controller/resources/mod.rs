use parking_lot::Mutex;
use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};
use vol_port::types::v0::store::AsOperationSequencer;

/// The internal operations interface for all resources.
pub(crate) mod operations;
/// Generic interface implemented for all resources.
pub(crate) mod operations_helper;
/// Generic resources map.
pub(crate) mod resource_map;

/// Sequences exclusive operations on a resource behind a shared mutex.
pub(crate) trait OperationSequencer: std::fmt::Debug + Clone {
    /// Try to take the exclusive operation slot.
    fn sequence(&self) -> Result<(), ()>;
    /// Release the exclusive operation slot.
    fn complete(&self);
}

impl<T: AsOperationSequencer + std::fmt::Debug + Clone> OperationSequencer for ResourceMutex<T> {
    fn sequence(&self) -> Result<(), ()> {
        self.lock().as_mut().sequence()
    }
    fn complete(&self) {
        self.lock().as_mut().complete();
    }
}

/// Operation Guard for a ResourceMutex<T> type.
pub(crate) type OperationGuardArc<T> = OperationGuard<ResourceMutex<T>, T>;

/// Ref-counted resource wrapped with a mutex.
#[derive(Debug, Clone)]
pub(crate) struct ResourceMutex<T> {
    inner: Arc<ResourceMutexInner<T>>,
}
/// Inner Resource which holds the mutex and an immutable value for peeking
/// into immutable fields such as identification fields.
#[derive(Debug)]
pub(crate) struct ResourceMutexInner<T> {
    resource: Mutex<T>,
    immutable_peek: Arc<T>,
}
impl<T: Clone> From<T> for ResourceMutex<T> {
    fn from(resource: T) -> Self {
        let immutable_peek = Arc::new(resource.clone());
        let resource = Mutex::new(resource);
        Self {
            inner: Arc::new(ResourceMutexInner {
                resource,
                immutable_peek,
            }),
        }
    }
}
impl<T> Deref for ResourceMutex<T> {
    type Target = Mutex<T>;
    fn deref(&self) -> &Self::Target {
        &self.inner.resource
    }
}
impl<T: Clone> ResourceMutex<T> {
    /// Peek the initial resource value without locking.
    /// # Note:
    /// This is only useful for immutable fields, such as the resource identifier.
    pub(crate) fn immutable_ref(&self) -> &Arc<T> {
        &self.inner.immutable_peek
    }
}

impl<T: OperationSequencer, R> Deref for OperationGuard<T, R> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
impl<T: OperationSequencer, R> DerefMut for OperationGuard<T, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<T: OperationSequencer, R> AsRef<R> for OperationGuard<T, R> {
    fn as_ref(&self) -> &R {
        self.peek()
    }
}

/// Exclusive access to an in-flight operation on a resource.
/// It unlocks the sequence lock on drop.
#[derive(Debug)]
pub(crate) struct OperationGuard<T: OperationSequencer, R> {
    inner: T,
    inner_value: R,
    locked: bool,
}
impl<T: OperationSequencer, R> Drop for OperationGuard<T, R> {
    fn drop(&mut self) {
        self.unlock();
    }
}
impl<T: OperationSequencer, R> OperationGuard<T, R> {
    fn unlock(&mut self) {
        if self.locked {
            self.locked = false;
            self.inner.complete();
        }
    }
    /// Peek at the resource as it was when the guard was taken.
    /// Note, this value may be outdated *during* an operation, and so must not
    /// be used to inspect fields which are being mutated.
    fn peek(&self) -> &R {
        &self.inner_value
    }
    /// Create an operation guard for the resource, failing if another
    /// operation is already in flight.
    pub(crate) fn try_sequence(resource: &T, value: fn(&T) -> R) -> Result<Self, String> {
        match resource.sequence() {
            Ok(()) => Ok(Self {
                inner: resource.clone(),
                inner_value: value(resource),
                locked: true,
            }),
            Err(()) => Err(format!(
                "Cannot start an operation on busy resource: {resource:?}"
            )),
        }
    }
}

/// Update inner value interface.
pub(crate) trait UpdateInnerValue {
    /// Update the inner value.
    fn update(&mut self);
}
impl<R: Clone + std::fmt::Debug + AsOperationSequencer> UpdateInnerValue
    for OperationGuard<ResourceMutex<R>, R>
{
    fn update(&mut self) {
        self.inner_value = self.inner.lock().clone();
    }
}
