// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-shot timers with callbacks.
//!
//! Each [`Timer`] owns a worker thread that is spawned on the first
//! [`Timer::set`] and sleeps on a condition variable until the armed
//! deadline. Callbacks run on that worker without any timer lock held, so a
//! callback may re-arm its own timer.

use super::time::Time;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;

type Callback = Box<dyn FnOnce() + Send>;

struct Armed {
    at: Time,
    callback: Callback,
}

#[derive(Default)]
struct TimerState {
    armed: Option<Armed>,
    worker: bool,
    shutdown: bool,
}

#[derive(Default)]
struct TimerInner {
    state: Mutex<TimerState>,
    condvar: Condvar,
    #[cfg(test)]
    refuse_spawn: std::sync::atomic::AtomicBool,
}

/// One-shot timer.
#[derive(Default)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Timer")
            .field("armed_at", &state.armed.as_ref().map(|a| a.at))
            .finish()
    }
}

impl Timer {
    /// Creates a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to call `callback` at `at`, replacing a previous setting.
    ///
    /// # Errors
    ///
    /// Fails if the worker thread cannot be spawned; the timer stays disarmed.
    pub fn set<F>(&self, at: Time, callback: F) -> std::io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if !state.worker {
            if let Err(e) = self.spawn_worker() {
                log::error!("[Timer::set] failed to spawn timer worker: {}", e);
                state.armed = None;
                return Err(e);
            }
            state.worker = true;
        }
        state.armed = Some(Armed {
            at,
            callback: Box::new(callback),
        });
        self.inner.condvar.notify_all();
        Ok(())
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        #[cfg(test)]
        if self.inner.refuse_spawn.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "thread limit reached"));
        }
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("urt-timer".into())
            .spawn(move || run_worker(inner))
            .map(drop)
    }

    /// Makes the next worker spawn fail, as under thread exhaustion.
    #[cfg(test)]
    pub(crate) fn refuse_spawn(&self) {
        self.inner
            .refuse_spawn
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// Disarms the timer.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        if state.armed.take().is_some() {
            self.inner.condvar.notify_all();
        }
    }

    /// Whether a callback is pending.
    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().armed.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        state.armed = None;
        self.inner.condvar.notify_all();
    }
}

fn run_worker(inner: Arc<TimerInner>) {
    let mut state = inner.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let Some(at) = state.armed.as_ref().map(|armed| armed.at) else {
            inner.condvar.wait(&mut state);
            continue;
        };
        if Time::now() < at {
            inner.condvar.wait_until(&mut state, at.to_instant());
            continue;
        }
        if let Some(armed) = state.armed.take() {
            drop(state);
            (armed.callback)();
            state = inner.state.lock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_timer_fires_once() {
        let timer = Timer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        timer
            .set(Time::now().add(1_000), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("arm");
        assert!(timer.is_armed());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_reset_prevents_callback() {
        let timer = Timer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        timer
            .set(Time::now().add(20_000), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("arm");
        timer.reset();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_replaces_previous_deadline() {
        let timer = Timer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&fired);
        timer
            .set(Time::now().add(5_000), move || {
                first.fetch_add(1, Ordering::SeqCst);
            })
            .expect("arm");
        let second = Arc::clone(&fired);
        timer
            .set(Time::now().add(1_000), move || {
                second.fetch_add(10, Ordering::SeqCst);
            })
            .expect("arm");
        thread::sleep(Duration::from_millis(40));
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let timer = Timer::new();
        timer.refuse_spawn();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let result = timer.set(Time::now().add(1_000), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(result.is_err());
        assert!(!timer.is_armed());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
