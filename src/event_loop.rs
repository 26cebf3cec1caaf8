//! The single-threaded, tick-driven event loop from `spec.md` §4.4/§4.7.
//! No async runtime: the loop is a plain `run`/`run_once` pair that polls
//! a timer on a fixed cadence, mirroring the original's
//! `CONNECTION_UPDATE_INTERVAL`-based design.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{trace, warn};

/// Default cadence at which `EventLoop::run` wakes a registered timeout,
/// matching the 1000ms tick the original implementation used to drive
/// its connection state machine forward.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

pub type TimeoutId = u64;

/// A unit of work the loop polls on each tick. Returns `true` to keep
/// running, `false` to signal the loop should stop after this tick.
pub trait TickHandler {
    fn on_tick(&mut self) -> Result<bool>;
}

/// A `TickHandler` built from a plain closure, for callers that don't
/// need a dedicated type.
pub struct FnTickHandler<F: FnMut() -> Result<bool>>(pub F);

impl<F: FnMut() -> Result<bool>> TickHandler for FnTickHandler<F> {
    fn on_tick(&mut self) -> Result<bool> {
        (self.0)()
    }
}

/// Invoked whenever a tick handler returns `Err`; lets the owning
/// session log and decide whether to keep the loop alive.
pub trait ErrorHandler {
    fn on_error(&mut self, err: &anyhow::Error);
}

struct Timeout {
    interval: Duration,
    due: Instant,
    handler: Box<dyn TickHandler>,
}

/// A cooperative, single-threaded timer-driven loop. Not `Send`: it owns
/// `Box<dyn TickHandler>` trait objects with no threading guarantees,
/// matching the crate's single-threaded, non-blocking connection model.
#[derive(Default)]
pub struct EventLoop {
    timeouts: HashMap<TimeoutId, Timeout>,
    next_id: TimeoutId,
    error_handler: Option<Box<dyn ErrorHandler>>,
    private: HashMap<&'static str, Box<dyn std::any::Any>>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_error_handler(&mut self, handler: Box<dyn ErrorHandler>) {
        self.error_handler = Some(handler);
    }

    /// Register a handler to run every `interval`, starting one
    /// `interval` from now. Returns an id usable with [`Self::del`].
    pub fn add_timeout(&mut self, interval: Duration, handler: Box<dyn TickHandler>) -> TimeoutId {
        let id = self.next_id;
        self.next_id += 1;
        self.timeouts.insert(id, Timeout { interval, due: Instant::now() + interval, handler });
        id
    }

    pub fn del(&mut self, id: TimeoutId) -> bool {
        self.timeouts.remove(&id).is_some()
    }

    pub fn set_private<T: 'static>(&mut self, key: &'static str, value: T) {
        self.private.insert(key, Box::new(value));
    }

    pub fn get_private<T: 'static>(&self, key: &'static str) -> Option<&T> {
        self.private.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Run every due timeout exactly once, sleeping until the next one
    /// is due if none are. Returns `false` once every timeout has been
    /// removed (either explicitly or by returning `Ok(false)`).
    pub fn run_once(&mut self) -> bool {
        if self.timeouts.is_empty() {
            return false;
        }
        let now = Instant::now();
        let next_due = self.timeouts.values().map(|t| t.due).min().unwrap();
        if next_due > now {
            thread::sleep(next_due - now);
        }
        let due_ids: Vec<TimeoutId> = self
            .timeouts
            .iter()
            .filter(|(_, t)| t.due <= Instant::now())
            .map(|(id, _)| *id)
            .collect();

        for id in due_ids {
            let keep_running = {
                let Some(timeout) = self.timeouts.get_mut(&id) else { continue };
                match timeout.handler.on_tick() {
                    Ok(keep) => keep,
                    Err(err) => {
                        warn!("tick handler {id} returned an error: {err:#}");
                        if let Some(h) = &mut self.error_handler {
                            h.on_error(&err);
                        }
                        true
                    }
                }
            };
            if keep_running {
                if let Some(timeout) = self.timeouts.get_mut(&id) {
                    timeout.due = Instant::now() + timeout.interval;
                }
            } else {
                self.timeouts.remove(&id);
                trace!("tick handler {id} requested removal");
            }
        }
        !self.timeouts.is_empty()
    }

    /// Run until every timeout has removed itself.
    pub fn run(&mut self) {
        while self.run_once() {}
    }
}
