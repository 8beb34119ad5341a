//! The event loop abstraction the engine is driven from.

use std::time::SystemTime;

/// An opaque handle to a one-shot timer owned by a [`Mainloop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// A timer callback. Invoked at most once per arm; rearming via
/// [`Mainloop::timer_restart`] schedules another invocation.
pub type TimerCallback = Box<dyn FnMut()>;

/// The contract the surrounding event loop implements for the engine.
///
/// The engine only ever needs clocks and one-shot timers. Everything is
/// called from the loop thread itself; implementations don't need to be
/// thread safe.
pub trait Mainloop {
    /// The current monotonic time, in microseconds. The reference point is
    /// arbitrary but must be stable for the life of the loop.
    fn monotonic_usec(&self) -> u64;

    /// The current wall clock. Sent to the server in latency queries.
    fn wallclock(&self) -> SystemTime;

    /// Creates a one-shot timer firing at the given monotonic time.
    fn timer_new(&self, at_usec: u64, callback: TimerCallback) -> TimerHandle;

    /// Rearms a timer for the given monotonic time.
    fn timer_restart(&self, handle: TimerHandle, at_usec: u64);

    /// Frees a timer. Pending callbacks are dropped.
    fn timer_free(&self, handle: TimerHandle);
}

impl std::fmt::Debug for dyn Mainloop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Mainloop")
    }
}
