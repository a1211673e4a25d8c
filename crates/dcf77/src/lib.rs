//! Encode and transmit the DCF77 time signal.
//!
//! This crate builds [DCF77] time-code frames from civil date/time and transmits them by
//! amplitude-shift-keying a carrier through an injected output primitive, one bit per bit period.
//! It is split into two layers:
//! - [`frame`]: pure conversion between [`CalendarTime`] and the 59-bit [`Frame`], including BCD
//!   fields and the three even-parity checks.
//! - [`scheduler`]: the real-time loop that walks frames and drives the output amplitude with
//!   cumulative deadlines, until cancelled through a [`CancelToken`].
//!
//! The output hardware, the clock and the suspension mechanism are all traits
//! ([`AmplitudeOutput`], [`Clock`], [`Timer`]) so the loop can run against a signal generator, an
//! audio device, or a fully simulated timeline in tests.
//!
//! [DCF77]: https://en.wikipedia.org/wiki/DCF77
//!
//! # Examples
//! ```
//! # use dcf77::{CalendarTime, CancelToken, Frame, ManualTimer, Scheduler, SchedulerConfig};
//! # use dcf77::output::Recorder;
//! let time = CalendarTime::new(2024, 3, 15, 5, 14, 37);
//! let frame = dcf77::encode(&time).unwrap();
//! assert_eq!(dcf77::decode(&frame).unwrap(), time);
//!
//! // Transmit the frame twice against a simulated timeline
//! let config = SchedulerConfig { max_frames: Some(2), ..Default::default() };
//! let mut scheduler = Scheduler::new(Recorder::default(), ManualTimer::new(), config).unwrap();
//! let mut source = frame;
//! let report = scheduler.run(&mut source, &CancelToken::new()).unwrap();
//! assert_eq!(report.frames, 2);
//! ```

use thiserror::Error;

pub mod cancel;
pub mod frame;
pub mod output;
pub mod scheduler;
pub mod source;
pub mod timer;

pub use cancel::CancelToken;
pub use frame::{decode, encode, encode_verified, encode_with, Annotations, CalendarTime, Field, Frame, ParityBlock};
pub use output::{AmplitudeOutput, OutputError};
pub use scheduler::{Outcome, Phase, Report, Scheduler, SchedulerConfig, SchedulerError, Step};
pub use source::{Clock, ClockSource, FixedClock, FrameSource, SystemClock};
pub use timer::{ManualTimer, SystemTimer, Timeline, Timer, Wake};

/// The error type for building and checking frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
	/// A calendar field is outside its civil range (or outside what a frame can carry). The field
	/// and the rejected value are provided in the payload.
	#[error("invalid {field}: {value}")]
	InvalidTime { field: Field, value: u16 },
	/// A parity bit does not match the bits it covers.
	#[error("parity mismatch in {block} block")]
	Parity { block: ParityBlock },
	/// A fixed marker bit (0 or 20) has the wrong value.
	#[error("marker bit {bit} has the wrong value")]
	Marker { bit: u8 },
	/// A BCD digit of the field is greater than 9.
	#[error("invalid BCD digit in {field} field")]
	InvalidBcd { field: Field },
	/// A frame could not be parsed from text.
	#[error("cannot parse frame: {0}")]
	Parse(String),
	/// An encoded frame did not decode back to its input time.
	#[error("frame verification failed: encoded {expected}, decoded {actual}")]
	Mismatch { expected: CalendarTime, actual: CalendarTime },
	/// An encoded frame did not carry the pass-through bits it was given.
	#[error("frame verification failed: encoded flags {expected:?}, decoded {actual:?}")]
	FlagMismatch { expected: Annotations, actual: Annotations }
}
