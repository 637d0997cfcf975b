// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Services: the serving side of an RPC.
//!
//! Submitted requests wait in two FIFO bands. HRT requests are always
//! dispatched before any SRT, FRT or NRT request:
//!
//! ```text
//!   submit(HRT) ──► [ hrt    ] ─┐
//!                               ├─► dispatch (hrt first)
//!   submit(*)   ──► [ others ] ─┘
//! ```

use super::request::{Request, RequestState};
use crate::config::{self, ServiceId};
use crate::core::{check_event_mask, Core};
use crate::osal::{EventMask, ThreadEvents, Time};
use crate::primitives::{ProfilingCounter, Result, RtClass, Status};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// Profiling data of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceProfile {
    /// Submitted requests.
    pub calls: ProfilingCounter,
    /// Requests taken back by their callers before an answer.
    pub ownership_lost: ProfilingCounter,
}

/// Number of queued requests per band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLength {
    /// HRT requests.
    pub hrt: usize,
    /// SRT and FRT requests.
    pub fsrt: usize,
    /// NRT requests.
    pub nrt: usize,
}

impl QueueLength {
    /// All queued requests.
    pub fn total(&self) -> usize {
        self.hrt + self.fsrt + self.nrt
    }
}

struct Queued {
    request: Arc<Request>,
    submitted: Time,
}

struct ServiceQueue {
    hrt: VecDeque<Queued>,
    others: VecDeque<Queued>,
    profile: ServiceProfile,
}

/// A dispatched request, as seen at dispatch time.
#[derive(Debug, Clone)]
pub struct Dispatched {
    request: Arc<Request>,
    submission_time: Time,
    size: usize,
    noreturn: bool,
}

impl Dispatched {
    /// The dispatched request.
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Submission time observed at dispatch.
    pub fn submission_time(&self) -> Time {
        self.submission_time
    }

    /// Payload size of the request.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The caller expects no answer.
    pub fn is_noreturn(&self) -> bool {
        self.noreturn
    }
}

/// An RPC service served by one thread.
pub struct Service {
    id: ServiceId,
    thread: Arc<ThreadEvents>,
    mask: EventMask,
    queue: Mutex<ServiceQueue>,
    core: Weak<Core>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("thread", &self.thread.name())
            .field("mask", &self.mask)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Creates a service and registers it with `core`.
    ///
    /// `thread` is signalled with `mask` whenever a request is submitted.
    ///
    /// # Errors
    ///
    /// - `NodeInvalidEventMask`: `mask` is empty or overlaps the core mask
    /// - `ServiceDuplicate`: `id` is already registered
    pub fn new(
        core: &Arc<Core>,
        id: ServiceId,
        thread: Arc<ThreadEvents>,
        mask: EventMask,
    ) -> Result<Arc<Self>> {
        debug_assert!(id <= config::SERVICE_ID_MAX);
        check_event_mask(mask)?;
        let service = Arc::new(Self {
            id,
            thread,
            mask,
            queue: Mutex::new(ServiceQueue {
                hrt: VecDeque::with_capacity(config::SERVICE_QUEUE_CAPACITY),
                others: VecDeque::with_capacity(config::SERVICE_QUEUE_CAPACITY),
                profile: ServiceProfile::default(),
            }),
            core: Arc::downgrade(core),
        });
        core.add_service(Arc::clone(&service))?;
        log::debug!("[Service::new] service {} registered", id);
        Ok(service)
    }

    /// Service id.
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Thread serving this service.
    pub fn thread(&self) -> &Arc<ThreadEvents> {
        &self.thread
    }

    /// Event mask signalled on submission.
    pub fn event_mask(&self) -> EventMask {
        self.mask
    }

    pub(crate) fn core(&self) -> &Weak<Core> {
        &self.core
    }

    /// Queues `request` (which is locked by the caller) and signals the
    /// service thread.
    pub(crate) fn enqueue(&self, request: Arc<Request>, submitted: Time) {
        let mut queue = self.queue.lock();
        let band = if request.rt_class() == RtClass::Hrt {
            &mut queue.hrt
        } else {
            &mut queue.others
        };
        band.push_back(Queued { request, submitted });
        if config::RPC_PROFILING {
            queue.profile.calls += 1;
        }
        self.thread.signal(self.mask);
    }

    /// Removes `request` from the queue (the caller holds its lock).
    pub(crate) fn detach(&self, request: &Request) {
        let mut queue = self.queue.lock();
        let target: *const Request = request;
        queue.hrt.retain(|q| !std::ptr::eq(Arc::as_ptr(&q.request), target));
        queue.others.retain(|q| !std::ptr::eq(Arc::as_ptr(&q.request), target));
        if config::RPC_PROFILING {
            queue.profile.ownership_lost += 1;
        }
    }

    /// Takes the next request from the queue and copies its payload into
    /// `payload` (truncated to its length).
    ///
    /// Returns `None` if no request is queued. The service keeps ownership
    /// of the request until it responds.
    pub fn dispatch(&self, payload: &mut [u8]) -> Option<Dispatched> {
        let queued = {
            let mut queue = self.queue.lock();
            match queue.hrt.pop_front() {
                Some(queued) => queued,
                None => queue.others.pop_front()?,
            }
        };

        let state = queued.request.lock();
        let copied = state.size.min(payload.len());
        payload[..copied].copy_from_slice(&state.payload[..copied]);
        let dispatched = Dispatched {
            size: state.size,
            noreturn: state.mask == 0,
            submission_time: queued.submitted,
            request: Arc::clone(&queued.request),
        };
        drop(state);

        log::trace!(
            "[Service::dispatch] service {} dispatched {} request ({} bytes)",
            self.id,
            dispatched.request.rt_class(),
            dispatched.size
        );
        Some(dispatched)
    }

    /// Locks a dispatched request for responding.
    ///
    /// # Errors
    ///
    /// - `RequestBadOwner`: the caller took the request back
    /// - `RequestObsolete`: the request was resubmitted since dispatch
    pub fn acquire_request<'a>(&self, dispatched: &'a Dispatched) -> Result<ServiceRequestGuard<'a>> {
        let state = dispatched.request.lock();
        self.check_owner(dispatched, state)
    }

    /// Like [`Service::acquire_request`], but fails with `RequestLocked`
    /// instead of blocking.
    pub fn try_acquire_request<'a>(
        &self,
        dispatched: &'a Dispatched,
    ) -> Result<ServiceRequestGuard<'a>> {
        let state = dispatched.request.try_lock().ok_or(Status::RequestLocked)?;
        self.check_owner(dispatched, state)
    }

    fn check_owner<'a>(
        &self,
        dispatched: &'a Dispatched,
        state: MutexGuard<'a, RequestState>,
    ) -> Result<ServiceRequestGuard<'a>> {
        let owned = state
            .service
            .as_ref()
            .is_some_and(|owner| std::ptr::eq(Arc::as_ptr(owner), self));
        if !owned {
            return Err(Status::RequestBadOwner);
        }
        if dispatched.request.submission_time() != dispatched.submission_time {
            log::debug!(
                "[Service::acquire_request] service {}: request resubmitted since dispatch",
                self.id
            );
            return Err(Status::RequestObsolete);
        }
        Ok(ServiceRequestGuard {
            dispatched,
            state,
        })
    }

    /// Queued requests per band.
    pub fn queue_length(&self) -> QueueLength {
        let queue = self.queue.lock();
        let nrt = queue
            .others
            .iter()
            .filter(|q| q.request.rt_class() == RtClass::Nrt)
            .count();
        QueueLength {
            hrt: queue.hrt.len(),
            fsrt: queue.others.len() - nrt,
            nrt,
        }
    }

    /// Profiling data (all zero without `profiling`).
    pub fn profile(&self) -> ServiceProfile {
        self.queue.lock().profile
    }
}

/// Exclusive access of a service to a dispatched request.
pub struct ServiceRequestGuard<'a> {
    dispatched: &'a Dispatched,
    state: MutexGuard<'a, RequestState>,
}

impl std::fmt::Debug for ServiceRequestGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRequestGuard")
            .field("dispatched", self.dispatched)
            .finish_non_exhaustive()
    }
}

impl ServiceRequestGuard<'_> {
    /// Request payload.
    pub fn payload(&self) -> &[u8] {
        &self.state.payload[..self.state.size]
    }

    /// The whole payload buffer, to write the response into.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.state.payload
    }

    /// Completes the call with a `bytes` long response and wakes the caller.
    pub fn respond(mut self, bytes: usize) {
        self.state.complete(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CORE_EVENT_MASK;
    use crate::rpc::RetrievePolicy;

    const MASK: EventMask = 1 << 2;

    #[test]
    fn test_duplicate_and_invalid_mask() {
        let core = Core::new(None);
        let thread = ThreadEvents::new("svc");
        Service::new(&core, 7, Arc::clone(&thread), MASK).expect("first");
        assert_eq!(
            Service::new(&core, 7, Arc::clone(&thread), MASK).err(),
            Some(Status::ServiceDuplicate)
        );
        assert_eq!(
            Service::new(&core, 8, Arc::clone(&thread), CORE_EVENT_MASK).err(),
            Some(Status::NodeInvalidEventMask)
        );
        assert_eq!(
            Service::new(&core, 9, thread, 0).err(),
            Some(Status::NodeInvalidEventMask)
        );
        assert_eq!(core.service_ids(), vec![7]);
        assert!(core.service(7).is_some());
    }

    #[test]
    fn test_submit_signals_service_thread() {
        let core = Core::new(None);
        let thread = ThreadEvents::new("svc");
        let service = Service::new(&core, 1, Arc::clone(&thread), MASK).expect("service");
        Request::nrt(0).acquire().expect("acquire").submit(&service, 0, 0, 0);
        assert_eq!(thread.pending() & MASK, MASK);
    }

    #[test]
    fn test_dispatch_empty_queue() {
        let core = Core::new(None);
        let service = Service::new(&core, 1, ThreadEvents::new("svc"), MASK).expect("service");
        assert!(service.dispatch(&mut []).is_none());
    }

    #[test]
    fn test_dispatch_copies_payload() {
        let core = Core::new(None);
        let service = Service::new(&core, 1, ThreadEvents::new("svc"), MASK).expect("service");
        let request = Request::frt(8, 0);
        let mut guard = request.acquire().expect("acquire");
        guard.payload_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        guard.submit(&service, 4, 0, 0);

        let mut buf = [0u8; 2];
        let dispatched = service.dispatch(&mut buf).expect("dispatch");
        assert_eq!(buf, [1, 2]);
        assert_eq!(dispatched.size(), 4);
        assert!(dispatched.is_noreturn());
        assert_eq!(dispatched.submission_time(), request.submission_time());
        let guard = service.try_acquire_request(&dispatched).expect("acquire");
        assert_eq!(guard.payload(), &[1, 2, 3, 4]);
        guard.respond(0);
    }

    #[test]
    fn test_queue_length_per_band() {
        let core = Core::new(None);
        let service = Service::new(&core, 1, ThreadEvents::new("svc"), MASK).expect("service");
        let requests = [
            Request::nrt(0),
            Request::hrt(0, 0),
            Request::srt(0),
            Request::frt(0, 0),
            Request::nrt(0),
        ];
        for request in &requests {
            request.acquire().expect("acquire").submit(&service, 0, 0, 0);
        }
        assert_eq!(
            service.queue_length(),
            QueueLength {
                hrt: 1,
                fsrt: 2,
                nrt: 2
            }
        );
        assert_eq!(service.queue_length().total(), 5);
        if config::RPC_PROFILING {
            assert_eq!(service.profile().calls, 5);
        }
    }

    #[test]
    fn test_acquire_after_detach_is_bad_owner() {
        let core = Core::new(None);
        let service = Service::new(&core, 1, ThreadEvents::new("svc"), MASK).expect("service");
        let request = Request::nrt(0);
        request.acquire().expect("acquire").submit(&service, 0, 1 << 5, 0);

        let dispatched = service.dispatch(&mut []).expect("dispatch");
        let retrieved = request
            .retrieve(RetrievePolicy::Enforcing, &mut [])
            .expect("retrieve");
        assert!(retrieved.detached);
        assert_eq!(
            service.acquire_request(&dispatched).err(),
            Some(Status::RequestBadOwner)
        );
        ThreadEvents::current().clear(1 << 5);
    }

    #[test]
    fn test_other_service_is_bad_owner() {
        let core = Core::new(None);
        let first = Service::new(&core, 1, ThreadEvents::new("a"), MASK).expect("service");
        let second = Service::new(&core, 2, ThreadEvents::new("b"), MASK).expect("service");
        let request = Request::nrt(0);
        request.acquire().expect("acquire").submit(&first, 0, 0, 0);
        let dispatched = first.dispatch(&mut []).expect("dispatch");
        assert_eq!(
            second.try_acquire_request(&dispatched).err(),
            Some(Status::RequestBadOwner)
        );
        first.acquire_request(&dispatched).expect("owner").respond(0);
    }
}
