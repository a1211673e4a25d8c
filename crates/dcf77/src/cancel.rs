//! Cross-thread cancellation for the transmit loop.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Simple multi-threaded cancellation flag using a condition variable.
///
/// Clones share the same flag. Once [`CancelToken::cancel`] is called the token stays cancelled,
/// and every current and future [`CancelToken::wait_timeout`] returns immediately.
///
/// # Examples
/// ```
/// # use dcf77::CancelToken;
/// # use std::{thread, time::Duration};
/// let token = CancelToken::new();
/// let token_clone = token.clone();
/// let handle = thread::spawn(move || {
/// 	// Sleeps at most 10s, but wakes as soon as the token is cancelled
/// 	token_clone.wait_timeout(Duration::from_secs(10))
/// });
///
/// token.cancel();
/// assert!(handle.join().unwrap());
/// ```
#[derive(Clone, Default)]
pub struct CancelToken(Arc<Inner>);

#[derive(Default)]
struct Inner {
	/// Mutex containing the flag. `true` means cancelled.
	mutex: Mutex<bool>,
	/// Condition variable to wake sleepers.
	cond: Condvar
}

impl CancelToken {
	/// Create a new, not yet cancelled token.
	pub fn new() -> CancelToken {
		CancelToken::default()
	}

	/// Lock the flag. A poisoned lock still holds a valid `bool`, so poisoning is ignored.
	fn lock(&self) -> MutexGuard<'_, bool> {
		self.0.mutex.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Request cancellation and wake every waiting thread.
	pub fn cancel(&self) {
		let mut flag = self.lock();
		*flag = true;
		self.0.cond.notify_all();
	}

	/// Whether cancellation has been requested.
	pub fn is_cancelled(&self) -> bool {
		*self.lock()
	}

	/// Block for up to `timeout`, returning early if the token is cancelled.
	///
	/// Returns `true` if the token is cancelled, avoiding spurious wakeups using the owned
	/// condition variable.
	pub fn wait_timeout(&self, timeout: Duration) -> bool {
		let (flag, _) = self.0.cond
			.wait_timeout_while(self.lock(), timeout, |cancelled| !*cancelled)
			.unwrap_or_else(PoisonError::into_inner);
		*flag
	}

	/// Block until the token is cancelled.
	pub fn wait(&self) {
		drop(self.0.cond.wait_while(self.lock(), |cancelled| !*cancelled).unwrap_or_else(PoisonError::into_inner));
	}
}
