//! Fixed-size service table keyed by [`ServiceId`], indexed by `id & mask`.
//!
//! Grounded in the original `struct service_pool` / `service_new` /
//! `get_service`: allocation walks forward from a cursor, probing past
//! occupied slots; lookup additionally checks the occupant's own recorded
//! id against the query so a stale id from before a `delete` can never
//! alias whatever new service later reused that slot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use svc_core::{ServiceError, ServiceId, ServiceResult, SpinLock};

use crate::service::{Service, ServiceStatus};

/// Slots are `Arc<Service>` rather than a borrowed reference so a caller can
/// hold and resume a service without holding the pool locked: allocation and
/// deletion only ever touch one slot's lock at a time, and a lookup just
/// clones the `Arc`.
pub struct ServicePool {
    mask: u32,
    queue_capacity: usize,
    cursor: AtomicU32,
    slots: Box<[SpinLock<Option<Arc<Service>>>]>,
}

impl ServicePool {
    pub fn new(max_service: usize, queue_capacity: usize) -> Self {
        let size = max_service.max(2).next_power_of_two();
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(SpinLock::new(None));
        }
        Self {
            mask: (size - 1) as u32,
            queue_capacity,
            cursor: AtomicU32::new(1),
            slots: slots.into_boxed_slice(),
        }
    }

    fn index(&self, id: ServiceId) -> usize {
        (id.as_u32() & self.mask) as usize
    }

    /// Looks up a service by id, validating the occupant's own recorded id
    /// matches (guards against slot reuse aliasing a stale id).
    pub fn lookup(&self, id: ServiceId) -> Option<Arc<Service>> {
        if id.is_none() {
            return None;
        }
        let guard = self.slots[self.index(id)].lock();
        match guard.as_ref() {
            Some(svc) if svc.id() == id => Some(Arc::clone(svc)),
            _ => None,
        }
    }

    /// Allocates a new service. With `preferred_id`, fails if that slot is
    /// occupied. Without one, probes forward from the allocation cursor for
    /// up to `mask + 1` slots before giving up.
    pub fn new_service(&self, preferred_id: Option<ServiceId>) -> ServiceResult<ServiceId> {
        if let Some(id) = preferred_id {
            let mut guard = self.slots[self.index(id)].lock();
            if guard.is_some() {
                return Err(ServiceError::id_occupied());
            }
            *guard = Some(Arc::new(Service::new(id, self.queue_capacity)));
            return Ok(id);
        }

        let mut candidate = self.cursor.load(Ordering::Relaxed);
        let mut probes = 0u32;
        loop {
            if candidate == 0 {
                candidate = 1;
            }
            let id = ServiceId::from_raw(candidate);
            let idx = self.index(id);
            let mut guard = self.slots[idx].lock();
            if guard.is_none() {
                *guard = Some(Arc::new(Service::new(id, self.queue_capacity)));
                self.cursor.store(candidate.wrapping_add(1), Ordering::Relaxed);
                return Ok(id);
            }
            drop(guard);
            candidate = candidate.wrapping_add(1);
            probes += 1;
            if probes > self.mask {
                return Err(ServiceError::pool_exhausted());
            }
        }
    }

    /// Closes the interpreter and marks the service `Dead`, keeping its
    /// slot occupied until `delete`.
    pub fn close(&self, id: ServiceId) -> ServiceResult<()> {
        match self.lookup(id) {
            Some(svc) => {
                svc.close();
                Ok(())
            }
            None => Err(ServiceError::dest_missing()),
        }
    }

    /// Frees the slot. `close` must have been called first; deleting a
    /// service that was never closed would silently leak its interpreter,
    /// so this returns an error instead (see DESIGN.md).
    pub fn delete(&self, id: ServiceId) -> ServiceResult<()> {
        let mut guard = self.slots[self.index(id)].lock();
        match guard.as_ref() {
            Some(svc) if svc.id() == id => {
                if svc.status() != ServiceStatus::Dead {
                    return Err(ServiceError::not_closed());
                }
                *guard = None;
                Ok(())
            }
            _ => Err(ServiceError::dest_missing()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Number of occupied slots. O(capacity); diagnostic use only.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.lock().is_some()).count()
    }

    /// Calls `f` with every currently `Running` service. O(capacity) --
    /// the scheduler's outbox harvest needs the full set of `Running`
    /// services each tick, not just the ones a worker happens
    /// to still be holding in its `running` slot: a service can finish its
    /// resume and be cleared from that slot before the scheduler's next
    /// pass, which would otherwise silently strand a pending outbox
    /// message with no receipt ever written.
    pub fn for_each_running(&self, mut f: impl FnMut(&Arc<Service>)) {
        for slot in self.slots.iter() {
            if let Some(svc) = slot.lock().as_ref() {
                if svc.status() == ServiceStatus::Running {
                    f(svc);
                }
            }
        }
    }
}
