//! Where the scheduler gets the next frame to transmit.
//!
//! The scheduler asks its [`FrameSource`] for a frame at the start of every cycle. A plain
//! [`Frame`] is a source that repeats itself forever. A [`ClockSource`] encodes a fresh frame each
//! minute from a [`Clock`].
//!
//! A source reading a wall clock can also tie its frames to the clock: bit 0 of a frame must start
//! on second :00 of the minute before the one it encodes, so that its minute marker falls on the
//! encoded minute. [`FrameSource::next_timed_frame`] reports when that is.

use std::time::Duration;
use chrono::{Local, NaiveDateTime, TimeDelta, Timelike, Utc};
use log::debug;
use crate::frame::{encode_verified, Annotations, CalendarTime, Frame};
use crate::FrameError;

/// Trait for anything that supplies frames to transmit.
pub trait FrameSource {
	/// Get the frame for the next transmission cycle.
	fn next_frame(&mut self) -> Result<Frame, FrameError>;

	/// Get the frame for the next transmission cycle and how long from now its bit 0 must start.
	///
	/// `lead` is the shortest delay the caller can honour. A delay of `None` means the frame can
	/// start at any time, which is the default.
	fn next_timed_frame(&mut self, _lead: Duration) -> Result<(Frame, Option<Duration>), FrameError> {
		self.next_frame().map(|f| (f, None))
	}
}

impl FrameSource for Frame {
	/// A fixed frame is transmitted unchanged every cycle.
	fn next_frame(&mut self) -> Result<Frame, FrameError> {
		Ok(*self)
	}
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
	fn next_frame(&mut self) -> Result<Frame, FrameError> {
		(**self).next_frame()
	}

	fn next_timed_frame(&mut self, lead: Duration) -> Result<(Frame, Option<Duration>), FrameError> {
		(**self).next_timed_frame(lead)
	}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
	fn next_frame(&mut self) -> Result<Frame, FrameError> {
		(**self).next_frame()
	}

	fn next_timed_frame(&mut self, lead: Duration) -> Result<(Frame, Option<Duration>), FrameError> {
		(**self).next_timed_frame(lead)
	}
}

/// A source of civil time.
pub trait Clock {
	/// The current date and time. No timezone conversion happens after this point.
	fn now(&mut self) -> NaiveDateTime;
}

/// The host's system clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemClock {
	/// Local time, as configured on the host.
	Local,
	/// Coordinated universal time.
	Utc
}

impl Clock for SystemClock {
	fn now(&mut self) -> NaiveDateTime {
		match self {
			SystemClock::Local => Local::now().naive_local(),
			SystemClock::Utc => Utc::now().naive_utc()
		}
	}
}

/// A clock that starts at a fixed time and moves forward one minute per reading.
///
/// Used to transmit an arbitrary time: each cycle of the scheduler reads the clock once, so the
/// transmitted minutes follow on from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
	next: NaiveDateTime
}

impl FixedClock {
	/// Create a clock whose first reading is `start`.
	pub fn new(start: NaiveDateTime) -> FixedClock {
		FixedClock { next: start }
	}
}

impl Clock for FixedClock {
	fn now(&mut self) -> NaiveDateTime {
		let now = self.next;
		self.next += TimeDelta::minutes(1);
		now
	}
}

/// A [`FrameSource`] that encodes the current time from a [`Clock`].
///
/// A DCF77 frame announces the minute that begins at the **end** of its transmission, so each
/// frame encodes the minute after the clock reading. Each frame is decoded again and compared
/// before it is handed out.
///
/// By default frames are handed out as soon as they are asked for. A source made with
/// [`ClockSource::aligned`] ties each frame to the wall clock instead: it picks the first whole
/// minute at least `lead` away, encodes the minute after it and reports the delay until it.
///
/// # Examples
/// ```
/// # use dcf77::{decode, ClockSource, FixedClock, FrameSource};
/// # use chrono::NaiveDate;
/// let start = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(14, 36, 20).unwrap();
/// let mut source = ClockSource::new(FixedClock::new(start), Default::default());
/// assert_eq!(decode(&source.next_frame().unwrap()).unwrap().to_string(), "2024-03-15 14:37");
/// assert_eq!(decode(&source.next_frame().unwrap()).unwrap().to_string(), "2024-03-15 14:38");
/// ```
pub struct ClockSource<C: Clock> {
	clock: C,
	annotations: Annotations,
	aligned: bool
}

impl<C: Clock> ClockSource<C> {
	/// Create a source reading `clock`, setting the pass-through bits from `annotations`.
	pub fn new(clock: C, annotations: Annotations) -> ClockSource<C> {
		ClockSource { clock, annotations, aligned: false }
	}

	/// Start every frame on a whole minute of the clock. Only meaningful for clocks that follow
	/// real time, such as [`SystemClock`].
	pub fn aligned(mut self) -> ClockSource<C> {
		self.aligned = true;
		self
	}

	/// The calendar time the next frame would carry for a clock reading of `now`.
	fn upcoming_minute(now: NaiveDateTime) -> CalendarTime {
		CalendarTime::from(now + TimeDelta::minutes(1))
	}
}

impl<C: Clock> FrameSource for ClockSource<C> {
	/// # Errors
	///
	/// Returns [`FrameError::InvalidTime`] if the clock is outside the years 2000-2099.
	fn next_frame(&mut self) -> Result<Frame, FrameError> {
		let time = Self::upcoming_minute(self.clock.now());
		let frame = encode_verified(&time, &self.annotations)?;
		debug!("Encoded {} as {}", time, frame);
		Ok(frame)
	}

	/// # Errors
	///
	/// Returns [`FrameError::InvalidTime`] if the clock is outside the years 2000-2099.
	fn next_timed_frame(&mut self, lead: Duration) -> Result<(Frame, Option<Duration>), FrameError> {
		if !self.aligned {
			return self.next_frame().map(|f| (f, None));
		}
		let now = self.clock.now();
		let start = ceil_minute(now + TimeDelta::milliseconds(lead.as_millis() as i64));
		let time = CalendarTime::from(start + TimeDelta::minutes(1));
		let frame = encode_verified(&time, &self.annotations)?;
		let delay = (start - now).to_std().unwrap_or_default();
		debug!("Encoded {} as {}, starting in {:?}", time, frame, delay);
		Ok((frame, Some(delay)))
	}
}

/// The first whole minute at or after `t`.
fn ceil_minute(t: NaiveDateTime) -> NaiveDateTime {
	let past = TimeDelta::seconds(t.second() as i64) + TimeDelta::nanoseconds(t.nanosecond() as i64);
	if past == TimeDelta::zero() {
		t
	} else {
		t - past + TimeDelta::minutes(1)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::NaiveDate;
	use crate::frame::decode;
	use crate::{Field, FrameError};

	fn datetime(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
		NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, s).unwrap()
	}

	#[test]
	fn static_source_test() {
		let mut frame: Frame = "00101001011100000010100010010010001000100110010001101001000".parse().unwrap();
		let copy = frame;
		for _ in 0..3 {
			assert_eq!(frame.next_frame(), Ok(copy));
		}
	}

	#[test]
	fn clock_source_test() {
		let cet = Annotations { cet: true, ..Default::default() };
		// New Year's Eve rolls over into the next year
		let mut source = ClockSource::new(FixedClock::new(datetime(2024, 12, 31, 23, 58, 59)), cet);

		let f = source.next_frame().unwrap();
		assert_eq!(decode(&f), Ok(CalendarTime::new(2024, 12, 31, 2, 23, 59)));
		assert!(f.annotations().cet);

		let f = source.next_frame().unwrap();
		assert_eq!(decode(&f), Ok(CalendarTime::new(2025, 1, 1, 3, 0, 0)));
	}

	#[test]
	fn clock_source_range_test() {
		let mut source = ClockSource::new(FixedClock::new(datetime(2099, 12, 31, 23, 59, 0)), Annotations::default());
		assert_eq!(source.next_frame(), Err(FrameError::InvalidTime { field: Field::Year, value: 2100 }));
	}

	#[test]
	fn system_clock_test() {
		let mut source = ClockSource::new(SystemClock::Utc, Annotations::default());
		let f = source.next_frame().unwrap();
		let t = decode(&f).unwrap();
		let expected = CalendarTime::from(Utc::now().naive_utc() + TimeDelta::minutes(1));
		// Allow for a minute boundary between the two readings
		assert!(t == expected || t.minute == (expected.minute + 59) % 60, "{} vs {}", t, expected);
	}

	#[test]
	fn aligned_source_test() {
		let ms = Duration::from_millis;
		let mut source = ClockSource::new(FixedClock::new(datetime(2024, 3, 15, 14, 36, 20)), Annotations::default())
			.aligned();
		// Starts at 14:37:00, so carries 14:38
		let (f, delay) = source.next_timed_frame(ms(1800)).unwrap();
		assert_eq!(decode(&f), Ok(CalendarTime::new(2024, 3, 15, 5, 14, 38)));
		assert_eq!(delay, Some(ms(40_000)));

		// The clock reads 14:37:20 now, and a long lead skips a minute
		let (f, delay) = source.next_timed_frame(ms(50_000)).unwrap();
		assert_eq!(decode(&f), Ok(CalendarTime::new(2024, 3, 15, 5, 14, 40)));
		assert_eq!(delay, Some(ms(100_000)));

		// A reading exactly on the minute starts right away
		let mut source = ClockSource::new(FixedClock::new(datetime(2024, 3, 15, 14, 37, 0)), Annotations::default())
			.aligned();
		let (f, delay) = source.next_timed_frame(Duration::ZERO).unwrap();
		assert_eq!(decode(&f), Ok(CalendarTime::new(2024, 3, 15, 5, 14, 38)));
		assert_eq!(delay, Some(Duration::ZERO));

		// Unaligned sources do not ask for a start time
		let mut source = ClockSource::new(FixedClock::new(datetime(2024, 3, 15, 14, 36, 20)), Annotations::default());
		let (f, delay) = source.next_timed_frame(ms(1800)).unwrap();
		assert_eq!(decode(&f), Ok(CalendarTime::new(2024, 3, 15, 5, 14, 37)));
		assert_eq!(delay, None);
	}

	#[test]
	fn ceil_minute_test() {
		assert_eq!(ceil_minute(datetime(2024, 12, 31, 23, 59, 1)), datetime(2025, 1, 1, 0, 0, 0));
		assert_eq!(ceil_minute(datetime(2024, 3, 15, 14, 37, 0)), datetime(2024, 3, 15, 14, 37, 0));
		let t = datetime(2024, 3, 15, 14, 36, 59) + TimeDelta::milliseconds(999);
		assert_eq!(ceil_minute(t), datetime(2024, 3, 15, 14, 37, 0));
	}

	#[test]
	fn boxed_source_test() {
		let frame = crate::encode(&CalendarTime::new(2024, 3, 15, 5, 14, 37)).unwrap();
		let mut boxed: Box<dyn FrameSource> = Box::new(frame);
		assert_eq!(boxed.next_frame(), Ok(frame));
		assert_eq!((&mut boxed).next_frame(), Ok(frame));
		assert_eq!(boxed.next_timed_frame(Duration::from_secs(1)), Ok((frame, None)));
	}
}
