// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Requests: the caller side of an RPC.
//!
//! A request is a pre-allocated payload buffer plus bookkeeping. Its life
//! cycle is driven by its owner and by the service it is submitted to:
//!
//! ```text
//!   acquire ─► write payload ─► submit ───► [service queue]
//!                                              │ dispatch
//!                                              ▼
//!   retrieve ◄─ signal(mask) ◄─ respond ◄─ acquire_request
//! ```
//!
//! While a service owns a request, the caller can only take it back by force
//! (`RetrievePolicy::Enforcing`), which removes it from the service queue.

use super::service::Service;
use crate::config;
use crate::core::Core;
use crate::osal::{EventMask, ThreadEvents, Time, Timer};
use crate::primitives::{Delay, ProfilingCounter, Result, RtClass, Status};
use crate::qos::{deadline_violated, JitterWindow, LatencyProfile, Recovery};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// How hard the caller tries to take a request back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrievePolicy {
    /// Abort if the request is locked.
    Lazy,
    /// Wait for the lock, abort if a service still owns the request.
    Determined,
    /// Wait for the lock and take the request away from its service.
    Enforcing,
}

/// Result of a successful retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retrieved {
    /// Payload size of the response (or of the request, if unanswered).
    pub size: usize,
    /// Delay since submission.
    pub latency: Delay,
    /// Timing violation detected by this retrieve.
    pub violation: Option<Status>,
    /// The request was taken away from its service without an answer.
    pub detached: bool,
}

/// Profiling data of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestProfile {
    /// Latencies between submission and retrieval.
    pub latency: LatencyProfile,
    /// Submissions.
    pub calls: ProfilingCounter,
    /// Submissions that were detached before an answer arrived.
    pub fails: ProfilingCounter,
}

struct HrtRequestQos {
    timer: Timer,
    recovery: Option<Recovery>,
    violation: Mutex<Status>,
}

impl HrtRequestQos {
    fn escalate(&self, core: &Weak<Core>, reason: Status) {
        match &self.recovery {
            None => {
                if let Some(core) = core.upgrade() {
                    core.emergency(reason);
                }
            }
            Some(recovery) => {
                {
                    let mut violation = self.violation.lock();
                    if !violation.is_ok() {
                        return;
                    }
                    *violation = reason;
                }
                log::warn!("[Request] {}, running recovery", reason);
                recovery(reason);
            }
        }
    }
}

pub(crate) struct RequestState {
    pub(crate) service: Option<Arc<Service>>,
    caller: Option<Arc<ThreadEvents>>,
    pub(crate) mask: EventMask,
    pub(crate) payload: Box<[u8]>,
    pub(crate) size: usize,
    deadline: Delay,
    window: JitterWindow,
    core: Weak<Core>,
    profile: RequestProfile,
}

impl RequestState {
    /// Clears ownership and notifies the caller.
    pub(crate) fn complete(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.payload.len(), "response exceeds payload capacity");
        self.service = None;
        self.size = bytes.min(self.payload.len());
        if self.mask != 0 {
            if let Some(caller) = &self.caller {
                caller.signal(self.mask);
            }
        }
    }
}

/// An RPC request of one real-time class.
pub struct Request {
    rt_class: RtClass,
    state: Mutex<RequestState>,
    submitted: AtomicU64,
    hrt: Option<HrtRequestQos>,
    this: Weak<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("rt_class", &self.rt_class)
            .field("submission_time", &self.submission_time())
            .finish_non_exhaustive()
    }
}

impl Request {
    fn build(
        rt_class: RtClass,
        capacity: usize,
        jitter: Delay,
        hrt: Option<HrtRequestQos>,
    ) -> Arc<Self> {
        let jitter = if config::RPC_QOS_JITTER_CHECKS { jitter } else { 0 };
        Arc::new_cyclic(|this| Self {
            rt_class,
            state: Mutex::new(RequestState {
                service: None,
                caller: None,
                mask: 0,
                payload: vec![0u8; capacity].into_boxed_slice(),
                size: 0,
                deadline: 0,
                window: JitterWindow::new(jitter),
                core: Weak::new(),
                profile: RequestProfile::default(),
            }),
            submitted: AtomicU64::new(Time::ZERO.as_micros()),
            hrt,
            this: this.clone(),
        })
    }

    /// Non real-time request with `capacity` payload bytes.
    pub fn nrt(capacity: usize) -> Arc<Self> {
        Self::build(RtClass::Nrt, capacity, 0, None)
    }

    /// Soft real-time request.
    pub fn srt(capacity: usize) -> Arc<Self> {
        Self::build(RtClass::Srt, capacity, 0, None)
    }

    /// Firm real-time request; `jitter` of `0` disables jitter checks.
    pub fn frt(capacity: usize, jitter: Delay) -> Arc<Self> {
        Self::build(RtClass::Frt, capacity, jitter, None)
    }

    /// Hard real-time request. Violations trigger a core emergency.
    pub fn hrt(capacity: usize, jitter: Delay) -> Arc<Self> {
        Self::build(RtClass::Hrt, capacity, jitter, Some(Self::hrt_qos(None)))
    }

    /// Hard real-time request with a recovery callback.
    ///
    /// The callback runs once per violation until the violation is
    /// acknowledged with [`Request::take_violation`].
    pub fn hrt_with_recovery<F>(capacity: usize, jitter: Delay, recovery: F) -> Arc<Self>
    where
        F: Fn(Status) + Send + Sync + 'static,
    {
        let qos = Self::hrt_qos(Some(Box::new(recovery)));
        Self::build(RtClass::Hrt, capacity, jitter, Some(qos))
    }

    fn hrt_qos(recovery: Option<Recovery>) -> HrtRequestQos {
        HrtRequestQos {
            timer: Timer::new(),
            recovery,
            violation: Mutex::new(Status::Ok),
        }
    }

    /// Real-time class.
    pub fn rt_class(&self) -> RtClass {
        self.rt_class
    }

    /// Time of the last submission (`Time::ZERO` if never submitted).
    pub fn submission_time(&self) -> Time {
        Time::from_micros(self.submitted.load(Ordering::Acquire))
    }

    /// Delay since the last submission, `0` if never submitted.
    pub fn age(&self) -> Delay {
        let submitted = self.submission_time();
        if submitted == Time::ZERO {
            0
        } else {
            Time::now().delay_since(submitted)
        }
    }

    /// Whether the caller still waits for an answer it has not retrieved.
    pub fn is_pending(&self) -> bool {
        self.state.lock().caller.is_some()
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.state.lock().payload.len()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, RequestState>> {
        self.state.try_lock()
    }

    /// Locks the request for writing and submission.
    ///
    /// # Errors
    ///
    /// - `RequestBadOwner`: a service still owns the request
    /// - `RequestPending`: the previous answer was not retrieved yet
    pub fn acquire(self: &Arc<Self>) -> Result<RequestGuard<'_>> {
        let state = self.state.lock();
        Self::check_acquirable(&state)?;
        Ok(RequestGuard { request: self, state })
    }

    /// Like [`Request::acquire`], but fails with `RequestLocked` instead of
    /// blocking.
    pub fn try_acquire(self: &Arc<Self>) -> Result<RequestGuard<'_>> {
        let state = self.state.try_lock().ok_or(Status::RequestLocked)?;
        Self::check_acquirable(&state)?;
        Ok(RequestGuard { request: self, state })
    }

    fn check_acquirable(state: &RequestState) -> Result<()> {
        if state.service.is_some() {
            return Err(Status::RequestBadOwner);
        }
        if state.caller.is_some() {
            return Err(Status::RequestPending);
        }
        Ok(())
    }

    /// Takes the request back after (or instead of) an answer and copies the
    /// payload into `out`.
    ///
    /// `Enforcing` detaches the request from a service that still owns it;
    /// [`Retrieved::detached`] is set in that case and no timing checks are
    /// performed.
    ///
    /// # Errors
    ///
    /// - `RequestLocked`: request locked (`Lazy` only)
    /// - `RequestBadOwner`: a service still owns the request (`Lazy`,
    ///   `Determined`)
    pub fn retrieve(&self, policy: RetrievePolicy, out: &mut [u8]) -> Result<Retrieved> {
        let mut state = match policy {
            RetrievePolicy::Lazy => self.state.try_lock().ok_or(Status::RequestLocked)?,
            RetrievePolicy::Determined | RetrievePolicy::Enforcing => self.state.lock(),
        };

        let mut detached = false;
        if let Some(service) = state.service.take() {
            if policy != RetrievePolicy::Enforcing {
                state.service = Some(service);
                return Err(Status::RequestBadOwner);
            }
            service.detach(self);
            if config::RPC_PROFILING {
                state.profile.fails += 1;
            }
            log::debug!(
                "[Request::retrieve] {} request detached from service {}",
                self.rt_class,
                service.id()
            );
            detached = true;
        }

        let submitted = self.submission_time();
        if submitted == Time::ZERO {
            // Never submitted: nothing to time.
            let size = state.size;
            let copied = size.min(out.len()).min(state.payload.len());
            out[..copied].copy_from_slice(&state.payload[..copied]);
            return Ok(Retrieved {
                size,
                latency: 0,
                violation: None,
                detached,
            });
        }

        let latency = Time::now().delay_since(submitted);
        if let Some(qos) = &self.hrt {
            qos.timer.reset();
        }
        if config::RPC_PROFILING {
            state.profile.latency.track(latency);
        }

        let violation = if detached {
            None
        } else {
            match self.rt_class {
                RtClass::Frt if deadline_violated(state.deadline, latency) => {
                    Some(Status::DeadlineViolation)
                }
                RtClass::Frt | RtClass::Hrt => state
                    .window
                    .track(latency)
                    .then_some(Status::JitterViolation),
                RtClass::Nrt | RtClass::Srt => None,
            }
        };

        state.caller = None;
        let size = state.size;
        let copied = size.min(out.len()).min(state.payload.len());
        out[..copied].copy_from_slice(&state.payload[..copied]);
        let core = state.core.clone();
        drop(state);

        if let (Some(qos), Some(reason)) = (&self.hrt, violation) {
            qos.escalate(&core, reason);
        }

        Ok(Retrieved {
            size,
            latency,
            violation,
            detached,
        })
    }

    /// Whether a response arriving `latency` after submission would still be
    /// valid with respect to deadline and jitter.
    pub fn calculate_validity(&self, latency: Delay) -> bool {
        debug_assert!(self.rt_class == RtClass::Frt, "validity is defined for FRT requests");
        let state = self.state.lock();
        !deadline_violated(state.deadline, latency) && state.window.admits(latency)
    }

    /// Returns and clears the violation recorded for an HRT request with a
    /// recovery callback.
    pub fn take_violation(&self) -> Status {
        self.hrt
            .as_ref()
            .map_or(Status::Ok, |qos| std::mem::replace(&mut *qos.violation.lock(), Status::Ok))
    }

    /// Profiling data (all zero without `profiling`).
    pub fn profile(&self) -> RequestProfile {
        self.state.lock().profile
    }

    fn arm_qos_timer(&self, state: &RequestState, submitted: Time) {
        let Some(qos) = &self.hrt else {
            return;
        };
        let Some((delay, reason)) = state.window.critical_delay(state.deadline) else {
            qos.timer.reset();
            return;
        };
        let request = self.this.clone();
        let core = state.core.clone();
        let armed = qos.timer.set(submitted.add(delay), move || {
            if let Some(request) = request.upgrade() {
                if let Some(qos) = &request.hrt {
                    qos.escalate(&core, reason);
                }
            }
        });
        if armed.is_err() {
            // Unsupervised constraint.
            if let Some(core) = state.core.upgrade() {
                core.emergency(reason);
            }
        }
    }
}

/// Exclusive access to a request that is neither owned nor pending.
///
/// Dropping the guard releases the request without submitting it.
pub struct RequestGuard<'a> {
    request: &'a Arc<Request>,
    state: MutexGuard<'a, RequestState>,
}

impl std::fmt::Debug for RequestGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGuard")
            .field("request", self.request)
            .field("size", &self.state.size)
            .finish()
    }
}

impl RequestGuard<'_> {
    /// Payload of the last exchange (response after a retrieve).
    pub fn payload(&self) -> &[u8] {
        &self.state.payload[..self.state.size]
    }

    /// The whole payload buffer.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.state.payload
    }

    /// Whether the last submission expected no answer.
    pub fn is_fire_and_forget(&self) -> bool {
        self.state.mask == 0
    }

    /// Submits `bytes` payload bytes to `service`.
    ///
    /// `mask` is signalled on the calling thread once the service responds;
    /// `0` submits without expecting an answer. `deadline` constrains FRT
    /// and HRT requests (`0` = none).
    pub fn submit(mut self, service: &Arc<Service>, bytes: usize, mask: EventMask, deadline: Delay) {
        debug_assert!(bytes <= self.state.payload.len(), "payload exceeds capacity");
        let request = self.request;

        let previous = request.submission_time();
        let now = Time::now();
        let submitted = if now > previous { now } else { previous.successor() };
        request.submitted.store(submitted.as_micros(), Ordering::Release);

        let state = &mut *self.state;
        state.service = Some(Arc::clone(service));
        state.caller = (mask != 0).then(ThreadEvents::current);
        state.mask = mask;
        state.size = bytes.min(state.payload.len());
        state.core = service.core().clone();
        if matches!(request.rt_class, RtClass::Frt | RtClass::Hrt) {
            state.deadline = if config::RPC_QOS_DEADLINE_CHECKS { deadline } else { 0 };
        }
        if config::RPC_PROFILING {
            state.profile.calls += 1;
        }
        request.arm_qos_timer(state, submitted);

        service.enqueue(Arc::clone(request), submitted);
        log::trace!(
            "[RequestGuard::submit] {} request to service {} at {}us",
            request.rt_class,
            service.id(),
            submitted.as_micros()
        );
    }
}
