//! The output primitive driven by the scheduler.
//!
//! Anything that can set a carrier amplitude implements [`AmplitudeOutput`]: a signal generator
//! behind a vendor SDK, an audio device, or the in-memory [`Recorder`] used for simulation. The
//! device handle is opened and initialised by the host before it is handed to the scheduler, and
//! released by the host afterwards.

use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use crate::timer::Timeline;

/// The error type for amplitude commands.
///
/// The scheduler treats these as non-fatal: they are logged and counted, and timing continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputError {
	/// The device returned a non-zero status code, provided in the payload.
	#[error("device returned status {0}")]
	Status(u16),
	/// The device (or the stream feeding it) failed. A description is provided in the payload.
	#[error("device error: {0}")]
	Device(String)
}

/// A carrier whose amplitude can be set.
pub trait AmplitudeOutput {
	/// Set the carrier amplitude to `level`, in device units.
	///
	/// The call should return as soon as the command is issued. It must not wait for the output
	/// to settle, since the scheduler measures holds from its own clock.
	fn set_amplitude(&mut self, level: u16) -> Result<(), OutputError>;
}

impl<O: AmplitudeOutput + ?Sized> AmplitudeOutput for &mut O {
	fn set_amplitude(&mut self, level: u16) -> Result<(), OutputError> {
		(**self).set_amplitude(level)
	}
}

impl<O: AmplitudeOutput + ?Sized> AmplitudeOutput for Box<O> {
	fn set_amplitude(&mut self, level: u16) -> Result<(), OutputError> {
		(**self).set_amplitude(level)
	}
}

/// An output that records every amplitude command in memory.
///
/// When created with [`Recorder::with_timeline`], each event is stamped with the simulated time
/// of a [`crate::ManualTimer`], which makes the pulse widths of a run directly observable.
/// Individual calls can be made to fail with [`Recorder::fail_calls`].
///
/// # Examples
/// ```
/// # use dcf77::AmplitudeOutput;
/// # use dcf77::output::Recorder;
/// let mut r = Recorder::default().fail_calls([1]);
/// assert!(r.set_amplitude(10).is_ok());
/// assert!(r.set_amplitude(20).is_err());
/// assert_eq!(r.levels(), vec![10, 20]);
/// ```
#[derive(Debug, Default)]
pub struct Recorder {
	timeline: Option<Timeline>,
	failing: BTreeSet<usize>,
	/// Every command as (time issued, level), including failed ones.
	pub events: Vec<(Duration, u16)>
}

impl Recorder {
	/// Create a recorder stamping events with `timeline`.
	pub fn with_timeline(timeline: Timeline) -> Recorder {
		Recorder { timeline: Some(timeline), ..Default::default() }
	}

	/// Make the given calls (0-indexed) report [`OutputError::Status`].
	pub fn fail_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Recorder {
		self.failing.extend(calls);
		self
	}

	/// The levels commanded so far, in order.
	pub fn levels(&self) -> Vec<u16> {
		self.events.iter().map(|&(_, l)| l).collect()
	}

	/// The last level commanded.
	pub fn last(&self) -> Option<u16> {
		self.events.last().map(|&(_, l)| l)
	}
}

impl AmplitudeOutput for Recorder {
	fn set_amplitude(&mut self, level: u16) -> Result<(), OutputError> {
		let at = self.timeline.as_ref().map(Timeline::now).unwrap_or_default();
		let call = self.events.len();
		self.events.push((at, level));
		if self.failing.contains(&call) {
			Err(OutputError::Status(1))
		} else {
			Ok(())
		}
	}
}
