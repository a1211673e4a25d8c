//! Suspension and time keeping for the transmit loop.
//!
//! The scheduler never sleeps for a relative duration. Instead it keeps a running deadline, the
//! sum of every hold so far, and asks the [`Timer`] to suspend until that instant. Late wakeups or
//! slow output calls therefore never accumulate into drift.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use crate::CancelToken;

/// Why a [`Timer::sleep_until`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
	/// The deadline was reached.
	Elapsed,
	/// The cancellation token fired before the deadline.
	Cancelled
}

/// A monotonic clock that can suspend the calling thread.
pub trait Timer {
	/// Time elapsed since the timer was created.
	fn now(&self) -> Duration;

	/// Suspend until `deadline` (measured like [`Timer::now`]) or until `cancel` fires.
	///
	/// Returns immediately with [`Wake::Elapsed`] if the deadline has already passed and the token
	/// is not cancelled.
	fn sleep_until(&mut self, deadline: Duration, cancel: &CancelToken) -> Wake;
}

/// Real time [`Timer`] backed by [`Instant`].
///
/// Sleeping waits on the token's condition variable, so cancellation wakes the thread right away
/// rather than at the end of the hold.
pub struct SystemTimer {
	start: Instant
}

impl SystemTimer {
	/// Create a timer whose zero point is now.
	pub fn new() -> SystemTimer {
		SystemTimer { start: Instant::now() }
	}
}

impl Default for SystemTimer {
	fn default() -> Self {
		SystemTimer::new()
	}
}

impl Timer for SystemTimer {
	fn now(&self) -> Duration {
		self.start.elapsed()
	}

	fn sleep_until(&mut self, deadline: Duration, cancel: &CancelToken) -> Wake {
		loop {
			if cancel.is_cancelled() {
				return Wake::Cancelled;
			}
			let now = self.now();
			if now >= deadline {
				return Wake::Elapsed;
			}
			// Condvar waits may return early, so loop until the deadline is really reached
			if cancel.wait_timeout(deadline - now) {
				return Wake::Cancelled;
			}
		}
	}
}

/// A shared, manually advanced clock.
///
/// Clones observe the same time. Used by [`ManualTimer`] and by anything that needs to timestamp
/// events against the simulated timeline (see [`crate::output::Recorder`]).
#[derive(Clone, Default, Debug)]
pub struct Timeline(Arc<AtomicU64>);

impl Timeline {
	/// Current simulated time.
	pub fn now(&self) -> Duration {
		Duration::from_nanos(self.0.load(Ordering::Acquire))
	}

	/// Move the clock to `t`. The clock never moves backwards.
	pub fn advance_to(&self, t: Duration) {
		self.0.fetch_max(t.as_nanos() as u64, Ordering::AcqRel);
	}
}

/// Simulated [`Timer`] that never blocks.
///
/// Each sleep jumps the shared [`Timeline`] straight to the deadline. A cancellation instant can be
/// configured with [`ManualTimer::cancel_at`]: the first sleep that would cross it stops there,
/// cancels the token and reports [`Wake::Cancelled`], as if another thread had cancelled mid-hold.
///
/// # Examples
/// ```
/// # use dcf77::{CancelToken, ManualTimer, Timer, Wake};
/// # use std::time::Duration;
/// let mut timer = ManualTimer::new().cancel_at(Duration::from_millis(150));
/// let token = CancelToken::new();
/// assert_eq!(timer.sleep_until(Duration::from_millis(100), &token), Wake::Elapsed);
/// assert_eq!(timer.sleep_until(Duration::from_millis(200), &token), Wake::Cancelled);
/// assert_eq!(timer.now(), Duration::from_millis(150));
/// assert!(token.is_cancelled());
/// ```
#[derive(Default, Debug)]
pub struct ManualTimer {
	timeline: Timeline,
	cancel_at: Option<Duration>,
	/// Every deadline passed to `sleep_until`, in call order.
	deadlines: Vec<Duration>
}

impl ManualTimer {
	/// Create a simulated timer starting at zero.
	pub fn new() -> ManualTimer {
		ManualTimer::default()
	}

	/// Cancel when simulated time reaches `at`.
	pub fn cancel_at(mut self, at: Duration) -> ManualTimer {
		self.cancel_at = Some(at);
		self
	}

	/// A handle to the shared simulated clock.
	pub fn timeline(&self) -> Timeline {
		self.timeline.clone()
	}

	/// Every deadline requested so far.
	pub fn deadlines(&self) -> &[Duration] {
		&self.deadlines
	}
}

impl Timer for ManualTimer {
	fn now(&self) -> Duration {
		self.timeline.now()
	}

	fn sleep_until(&mut self, deadline: Duration, cancel: &CancelToken) -> Wake {
		self.deadlines.push(deadline);
		if cancel.is_cancelled() {
			return Wake::Cancelled;
		}
		match self.cancel_at {
			Some(at) if at < deadline => {
				self.timeline.advance_to(at);
				cancel.cancel();
				Wake::Cancelled
			},
			_ => {
				self.timeline.advance_to(deadline);
				Wake::Elapsed
			}
		}
	}
}
