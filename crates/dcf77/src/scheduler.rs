//! Real-time amplitude-shift keying of DCF77 frames.
//!
//! The [`Scheduler`] walks a frame and drives an [`AmplitudeOutput`] through the following
//! sequence:
//!
//! 1. **Idle**: output at [`SchedulerConfig::idle_level`] for `idle_ms`, forcing receivers to drop
//!    any partial lock.
//! 2. **Sync**: output at `high_level` for `sync_ms`, giving receivers a clean second boundary.
//! 3. **Transmitting**: for each of the 59 bits, in transmission order, output at `low_level` for
//!    the pulse (`zero_pulse_ms` or `one_pulse_ms`), then at `high_level` for the rest of the bit
//!    period.
//! 4. **Minute gap**: output stays at `high_level` for `gap_ms`, standing in for the pulse-less
//!    59th second. Then back to 3 with the next frame from the [`FrameSource`].
//!
//! When the source ties its frames to the wall clock (see [`FrameSource::next_timed_frame`]), the
//! sync hold and each minute gap are stretched so that bit 0 of every frame starts exactly when
//! the source asked for it, on a whole minute.
//!
//! Transmission order is DCF77 bit 0 first. For a frame written as an MSB-first integer literal
//! this is integer bit 58 down to bit 0.
//!
//! Every hold is scheduled against a cumulative deadline, so neither timer jitter nor slow or
//! failing output calls shift any later transition.
//!
//! *Note: the default bit period is 970 ms, not the 1000 ms of the broadcast signal. This matches
//! the timing the transmitter was tuned to on real hardware; it has not been validated against a
//! reference receiver. Set [`SchedulerConfig::bit_period_ms`] to 1000 for protocol timing.*

use std::time::Duration;
use log::{debug, error, info, trace, warn};
use thiserror::Error;
use crate::frame::{decode, Frame, FRAME_BITS};
use crate::output::AmplitudeOutput;
use crate::source::FrameSource;
use crate::timer::{Timer, Wake};
use crate::{CancelToken, FrameError};

/// Timer jitter tolerated when fitting the minute gap before a frame tied to the wall clock.
///
/// Without it, a clock read a few ms late at the end of a frame would push the next frame a whole
/// minute out.
const ALIGN_SLACK_MS: u32 = 100;

fn ms(v: u32) -> Duration {
	Duration::from_millis(v as u64)
}

/// Timing and level configuration for the [`Scheduler`].
///
/// Durations are in milliseconds, levels in device units. The defaults reproduce the timing the
/// transmitter was tuned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
	/// Hold at `idle_level` before the first frame.
	pub idle_ms: u32,
	/// Hold at `high_level` before the first bit.
	pub sync_ms: u32,
	/// Length of one bit cell, pulse included.
	pub bit_period_ms: u32,
	/// Pulse length encoding a 0 bit.
	pub zero_pulse_ms: u32,
	/// Pulse length encoding a 1 bit.
	pub one_pulse_ms: u32,
	/// Hold at `high_level` after the last bit of every frame.
	pub gap_ms: u32,
	/// Safe level used while idle and after stopping.
	pub idle_level: u16,
	/// Reduced level used for pulses.
	pub low_level: u16,
	/// Nominal carrier level.
	pub high_level: u16,
	/// Stop after this many complete frames. `None` runs until cancelled.
	pub max_frames: Option<u64>,
	/// Number of output failures after which an error is logged as a health signal.
	pub failure_warn_threshold: u64
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		SchedulerConfig {
			idle_ms: 3000,
			sync_ms: 1800,
			bit_period_ms: 970,
			zero_pulse_ms: 100,
			one_pulse_ms: 200,
			gap_ms: 850,
			idle_level: 0,
			low_level: 50,
			high_level: 1500,
			max_frames: None,
			failure_warn_threshold: 10
		}
	}
}

impl SchedulerConfig {
	/// Check that the configuration describes a decodable signal.
	///
	/// # Errors
	///
	/// Returns [`SchedulerError::Config`] if the pulses are empty, not distinguishable, or do not
	/// fit in the bit period, if the low level is not below the high level, or if `max_frames`
	/// is zero.
	pub fn validate(&self) -> Result<(), SchedulerError> {
		let fail = |s: String| Err(SchedulerError::Config(s));
		if self.zero_pulse_ms == 0 || self.zero_pulse_ms >= self.one_pulse_ms {
			return fail(format!("0 bit pulse ({} ms) must be non-zero and shorter than the 1 bit pulse ({} ms)",
				self.zero_pulse_ms, self.one_pulse_ms));
		}
		if self.one_pulse_ms >= self.bit_period_ms {
			return fail(format!("1 bit pulse ({} ms) must be shorter than the bit period ({} ms)",
				self.one_pulse_ms, self.bit_period_ms));
		}
		if self.low_level >= self.high_level {
			return fail(format!("low level ({}) must be below high level ({})", self.low_level, self.high_level));
		}
		if self.max_frames == Some(0) {
			return fail(String::from("frame limit must be at least 1"));
		}
		Ok(())
	}

	/// The pulse length encoding `bit`.
	#[inline(always)]
	pub fn pulse_ms(&self, bit: bool) -> u32 {
		if bit { self.one_pulse_ms } else { self.zero_pulse_ms }
	}

	/// The steps that transmit one frame: two per bit, then the minute gap.
	///
	/// This is the modulation schedule of a frame. The scheduler computes it lazily and realises
	/// each step as it is produced.
	///
	/// # Examples
	/// ```
	/// # use dcf77::{Frame, SchedulerConfig};
	/// # use std::time::Duration;
	/// let config = SchedulerConfig::default();
	/// let total: Duration = config.schedule(&Frame::default()).map(|s| s.duration).sum();
	/// assert_eq!(total, Duration::from_millis(59 * 970 + 850));
	/// ```
	pub fn schedule<'a>(&'a self, frame: &'a Frame) -> impl Iterator<Item = Step> + 'a {
		frame.bits().enumerate().flat_map(move |(i, value)| {
			let bit = i as u8;
			let pulse = self.pulse_ms(value);
			[
				Step::new(Phase::Pulse { bit, value }, self.low_level, pulse),
				Step::new(Phase::Space { bit }, self.high_level, self.bit_period_ms.saturating_sub(pulse))
			]
		}).chain(core::iter::once(Step::new(Phase::MinuteGap, self.high_level, self.gap_ms)))
	}
}

/// What a [`Step`] of the transmission is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// Carrier suppressed before transmission starts.
	Idle,
	/// Carrier at nominal level before the first bit.
	Sync,
	/// Reduced carrier carrying bit `bit` of value `value`.
	Pulse { bit: u8, value: bool },
	/// Nominal carrier for the rest of bit `bit`.
	Space { bit: u8 },
	/// Nominal carrier during the 59th second.
	MinuteGap
}

/// One output level held for a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
	pub phase: Phase,
	pub level: u16,
	pub duration: Duration
}

impl Step {
	fn new(phase: Phase, level: u16, millis: u32) -> Step {
		Step { phase, level, duration: ms(millis) }
	}
}

/// The error type for running the scheduler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
	/// The configuration was rejected. A description is provided in the payload.
	#[error("invalid scheduler configuration: {0}")]
	Config(String),
	/// The frame source could not supply the first frame.
	#[error("no frame to transmit: {0}")]
	Source(#[from] FrameError)
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// The cancellation token fired.
	Cancelled,
	/// [`SchedulerConfig::max_frames`] frames were transmitted.
	Completed
}

/// Summary of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
	/// Complete frames transmitted, minute gap included.
	pub frames: u64,
	/// Bits transmitted, counting partial frames.
	pub bits: u64,
	/// Output commands that reported an error.
	pub output_failures: u64,
	pub outcome: Outcome
}

/// Transmits frames by driving an output's amplitude in real time.
///
/// The scheduler owns its output handle and timer, both supplied by the caller. It is blocking:
/// [`Scheduler::run`] only returns when cancelled or when the frame limit is reached, so hosts
/// with other work should run it on a dedicated thread.
///
/// # Examples
/// ```no_run
/// # use dcf77::{CancelToken, Frame, Scheduler, SchedulerConfig, SystemTimer};
/// # use dcf77::output::Recorder;
/// let frame = Frame::from_msb_first(0b00101001011100000010100010010010001000100110010001101001000);
/// let token = CancelToken::new();
/// let mut scheduler = Scheduler::new(Recorder::default(), SystemTimer::new(), SchedulerConfig::default())?;
///
/// let canceller = token.clone();
/// std::thread::spawn(move || {
/// 	std::thread::sleep(std::time::Duration::from_secs(120));
/// 	canceller.cancel();
/// });
///
/// // Repeats the frame until cancelled
/// let report = scheduler.run(&mut frame.clone(), &token)?;
/// # Ok::<(), dcf77::SchedulerError>(())
/// ```
pub struct Scheduler<O: AmplitudeOutput, T: Timer> {
	output: O,
	timer: T,
	config: SchedulerConfig,
	/// The running deadline, end of the current hold.
	deadline: Duration,
	/// Level last set successfully, `None` if unknown.
	level: Option<u16>,
	report: Report
}

impl<O: AmplitudeOutput, T: Timer> Scheduler<O, T> {
	/// Create a scheduler driving `output`, sleeping with `timer`.
	///
	/// # Errors
	///
	/// Returns [`SchedulerError::Config`] if `config` fails [`SchedulerConfig::validate`].
	pub fn new(output: O, timer: T, config: SchedulerConfig) -> Result<Scheduler<O, T>, SchedulerError> {
		config.validate()?;
		Ok(Scheduler {
			output,
			timer,
			config,
			deadline: Duration::ZERO,
			level: None,
			report: Report::new()
		})
	}

	/// The configuration in use.
	pub fn config(&self) -> &SchedulerConfig {
		&self.config
	}

	/// The output handle.
	pub fn output(&self) -> &O {
		&self.output
	}

	/// The timer.
	pub fn timer(&self) -> &T {
		&self.timer
	}

	/// Release the output handle and timer.
	pub fn into_parts(self) -> (O, T) {
		(self.output, self.timer)
	}

	/// Transmit frames from `source` until `cancel` fires or the frame limit is reached.
	///
	/// The source is asked for the first frame before sync, and for each following frame when the
	/// minute gap before it starts. If it fails on a later cycle the previous frame is sent again. Output errors are logged and counted but never stop the
	/// run. Whatever the result, the output is set to the idle level before returning.
	///
	/// # Errors
	///
	/// Returns [`SchedulerError::Source`] if the source cannot supply the first frame.
	pub fn run<S: FrameSource + ?Sized>(&mut self, source: &mut S, cancel: &CancelToken)
		-> Result<Report, SchedulerError>
	{
		self.report = Report::new();
		self.level = None;
		self.deadline = self.timer.now();

		let result = self.transmit(source, cancel);

		// Force the carrier to the safe level even if it is believed to be there already
		self.level = None;
		self.set(self.config.idle_level);

		let outcome = result?;
		self.report.outcome = outcome;
		info!("Transmission {:?} after {} frames, {} bits, {} output failures",
			outcome, self.report.frames, self.report.bits, self.report.output_failures);
		Ok(self.report)
	}

	/// The transmit state machine. Returns when cancelled or done, leaving the output as is.
	fn transmit<S: FrameSource + ?Sized>(&mut self, source: &mut S, cancel: &CancelToken)
		-> Result<Outcome, SchedulerError>
	{
		info!("Idle for {} ms", self.config.idle_ms);
		if self.step(Step::new(Phase::Idle, self.config.idle_level, self.config.idle_ms), cancel) == Wake::Cancelled {
			return Ok(Outcome::Cancelled);
		}

		// The first frame is fetched before sync so a failing source never puts out a carrier
		let (mut frame, start) = source.next_timed_frame(ms(self.config.sync_ms))
			.inspect_err(|e| error!("Cannot get first frame: {}", e))?;

		let mut sync = Step::new(Phase::Sync, self.config.high_level, self.config.sync_ms);
		if let Some(delay) = start {
			sync.duration = self.hold_for(delay);
		}
		info!("Sync for {:?}", sync.duration);
		if self.step(sync, cancel) == Wake::Cancelled {
			return Ok(Outcome::Cancelled);
		}

		loop {
			match decode(&frame) {
				Ok(t) => info!("Transmitting frame {}: {} ({})", self.report.frames + 1, t, frame),
				Err(e) => warn!("Transmitting frame {}: {} does not decode ({})", self.report.frames + 1, frame, e)
			}

			let last = self.config.max_frames.is_some_and(|n| self.report.frames + 1 >= n);
			let mut upcoming = frame;

			// Copy the config out so the schedule does not borrow self
			let config = self.config.clone();
			for mut step in config.schedule(&frame) {
				// The next frame is fetched when the gap starts, the gap then runs until it is due
				if step.phase == Phase::MinuteGap && !last {
					let lead = ms(config.gap_ms.saturating_sub(ALIGN_SLACK_MS));
					match source.next_timed_frame(lead) {
						Ok((f, start)) => {
							upcoming = f;
							if let Some(delay) = start {
								step.duration = self.hold_for(delay);
							}
						},
						Err(e) => warn!("Cannot get next frame, repeating previous: {}", e)
					}
				}
				if self.step(step, cancel) == Wake::Cancelled {
					return Ok(Outcome::Cancelled);
				}
				if let Phase::Space { .. } = step.phase {
					self.report.bits += 1;
				}
			}
			self.report.frames += 1;

			if last {
				return Ok(Outcome::Completed);
			}
			frame = upcoming;
		}
	}

	/// The hold, starting at the current deadline, that ends `delay` after now.
	fn hold_for(&self, delay: Duration) -> Duration {
		(self.timer.now() + delay).saturating_sub(self.deadline)
	}

	/// Set the output for `step` and hold until the end of it.
	fn step(&mut self, step: Step, cancel: &CancelToken) -> Wake {
		match step.phase {
			Phase::Pulse { bit, value } => trace!("Bit {:2} = {} ({:?})", bit, value as u8, step.duration),
			Phase::Space { .. } => (),
			phase => debug!("{:?} at level {} for {:?}", phase, step.level, step.duration)
		}
		self.set(step.level);
		self.deadline += step.duration;
		self.timer.sleep_until(self.deadline, cancel)
	}

	/// Command `level`, skipping the call if the output is known to be there already.
	///
	/// Failures are counted and logged, and leave the level unknown so the next step issues it
	/// again.
	fn set(&mut self, level: u16) {
		if self.level == Some(level) {
			return;
		}
		match self.output.set_amplitude(level) {
			Ok(()) => self.level = Some(level),
			Err(e) => {
				self.level = None;
				self.report.output_failures += 1;
				warn!("Failed to set amplitude {}: {}", level, e);
				if self.report.output_failures == self.config.failure_warn_threshold {
					error!("{} output commands have failed, check the output device", self.report.output_failures);
				}
			}
		}
	}
}

impl Report {
	fn new() -> Report {
		Report { frames: 0, bits: 0, output_failures: 0, outcome: Outcome::Cancelled }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::VecDeque;
	use std::thread;
	use std::time::Instant;
	use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};
	use crate::frame::{encode, Annotations, CalendarTime};
	use crate::output::Recorder;
	use crate::source::{Clock, ClockSource};
	use crate::timer::{ManualTimer, SystemTimer, Timeline};

	const REFERENCE: u64 = 0b00101001011100000010100010010010001000100110010001101001000;

	/// Number of steps in the schedule of one frame.
	const STEPS_PER_FRAME: usize = FRAME_BITS * 2 + 1;

	fn ms(v: u64) -> Duration {
		Duration::from_millis(v)
	}

	fn init_logger() {
		let _ = env_logger::builder().is_test(true).try_init();
	}

	/// A scheduler on a simulated timeline, recording every output command.
	fn simulated(config: SchedulerConfig, timer: ManualTimer) -> Scheduler<Recorder, ManualTimer> {
		init_logger();
		let recorder = Recorder::with_timeline(timer.timeline());
		Scheduler::new(recorder, timer, config).unwrap()
	}

	fn single_frame() -> SchedulerConfig {
		SchedulerConfig { max_frames: Some(1), ..Default::default() }
	}

	/// Check that `events` (starting with the first bit) carry `frame` with the default timing.
	fn check_frame(events: &[(Duration, u16)], frame: &Frame, start: Duration) {
		let mut t = start;
		for (i, bit) in frame.bits().enumerate() {
			let (low, high) = (events[2 * i], events[2 * i + 1]);
			let pulse = if bit { 200 } else { 100 };
			assert_eq!(low, (t, 50), "bit {} pulse", i);
			assert_eq!(high, (t + ms(pulse), 1500), "bit {} space", i);
			let next = events.get(2 * i + 2).map(|e| e.0).unwrap();
			if i < FRAME_BITS - 1 {
				assert_eq!(next - high.0, ms(970 - pulse), "bit {} space length", i);
			}
			t += ms(970);
		}
	}

	#[test]
	fn timing_test() {
		let frame = Frame::from_msb_first(REFERENCE);
		let mut scheduler = simulated(single_frame(), ManualTimer::new());
		let report = scheduler.run(&mut frame.clone(), &CancelToken::new()).unwrap();
		assert_eq!(report, Report { frames: 1, bits: 59, output_failures: 0, outcome: Outcome::Completed });

		let (recorder, timer) = scheduler.into_parts();
		let events = recorder.events;
		assert_eq!(events.len(), 2 + 2 * FRAME_BITS + 1);
		assert_eq!(events[0], (ms(0), 0));
		assert_eq!(events[1], (ms(3000), 1500));

		// Bits follow the sync, the gap re-uses the high level without a new command
		check_frame(&events[2..], &frame, ms(4800));
		let end = ms(4800 + 59 * 970 + 850);
		assert_eq!(events[events.len() - 1], (end, 0));
		assert_eq!(timer.now(), end);
		assert_eq!(events[events.len() - 2].0, ms(4800 + 58 * 970) + ms(if frame.bit(58) { 200 } else { 100 }));
	}

	#[test]
	fn pulse_width_test() {
		// 0 bit: 100 ms low, 870 ms high. 1 bit: 200 ms low, 770 ms high.
		let config = SchedulerConfig::default();
		let frame = Frame::from_msb_first(REFERENCE);
		let steps: Vec<Step> = config.schedule(&frame).collect();
		assert_eq!(steps.len(), STEPS_PER_FRAME);
		for (i, bit) in frame.bits().enumerate() {
			let (pulse, space) = (steps[2 * i], steps[2 * i + 1]);
			assert_eq!(pulse.phase, Phase::Pulse { bit: i as u8, value: bit });
			assert_eq!(space.phase, Phase::Space { bit: i as u8 });
			assert_eq!(pulse.level, 50);
			assert_eq!(space.level, 1500);
			if bit {
				assert_eq!((pulse.duration, space.duration), (ms(200), ms(770)));
			} else {
				assert_eq!((pulse.duration, space.duration), (ms(100), ms(870)));
			}
		}
		assert_eq!(steps[STEPS_PER_FRAME - 1], Step::new(Phase::MinuteGap, 1500, 850));

		let total: Duration = steps.iter().map(|s| s.duration).sum();
		assert_eq!(total, ms(58080));

		// Protocol timing gives exactly one minute per frame
		let config = SchedulerConfig { bit_period_ms: 1000, gap_ms: 1000, ..Default::default() };
		let total: Duration = config.schedule(&frame).map(|s| s.duration).sum();
		assert_eq!(total, ms(60000));
	}

	#[test]
	fn repeat_test() {
		let frame = encode(&CalendarTime::new(2024, 3, 15, 5, 14, 37)).unwrap();
		let config = SchedulerConfig { max_frames: Some(3), ..Default::default() };
		let mut scheduler = simulated(config, ManualTimer::new());
		let report = scheduler.run(&mut frame.clone(), &CancelToken::new()).unwrap();
		assert_eq!(report.frames, 3);
		assert_eq!(report.bits, 3 * 59);

		let (recorder, timer) = scheduler.into_parts();
		let events = &recorder.events[2..];
		for n in 0..3 {
			let start = ms(4800 + n as u64 * 58080);
			check_frame(&events[n * 2 * FRAME_BITS..], &frame, start);
		}
		assert_eq!(timer.now(), ms(4800 + 3 * 58080));
	}

	/// A source handing out a fixed sequence of results.
	struct Sequence(VecDeque<Result<Frame, FrameError>>, usize);

	impl FrameSource for Sequence {
		fn next_frame(&mut self) -> Result<Frame, FrameError> {
			self.1 += 1;
			self.0.pop_front().unwrap_or(Err(FrameError::Parse(String::from("empty"))))
		}
	}

	#[test]
	fn source_test() {
		let a = encode(&CalendarTime::new(2024, 3, 15, 5, 14, 37)).unwrap();
		let b = encode(&CalendarTime::new(2024, 3, 15, 5, 14, 38)).unwrap();
		let mut source = Sequence(VecDeque::from([Ok(a), Err(FrameError::Marker { bit: 0 }), Ok(b)]), 0);
		let config = SchedulerConfig { max_frames: Some(3), ..Default::default() };
		let mut scheduler = simulated(config, ManualTimer::new());
		let report = scheduler.run(&mut source, &CancelToken::new()).unwrap();
		assert_eq!(report.frames, 3);
		assert_eq!(source.1, 3);

		let events = &scheduler.output().events[2..];
		check_frame(events, &a, ms(4800));
		check_frame(&events[2 * FRAME_BITS..], &a, ms(4800 + 58080));
		check_frame(&events[4 * FRAME_BITS..], &b, ms(4800 + 2 * 58080));
	}

	/// A wall clock following the simulated timeline.
	struct TimelineClock {
		start: NaiveDateTime,
		timeline: Timeline
	}

	impl Clock for TimelineClock {
		fn now(&mut self) -> NaiveDateTime {
			self.start + TimeDelta::from_std(self.timeline.now()).unwrap()
		}
	}

	/// Read back the frame carried by the pulse widths of `events`, starting at bit 0.
	fn received(events: &[(Duration, u16)]) -> Frame {
		let packed = (0..FRAME_BITS).fold(0u64, |acc, i| {
			let pulse = events[2 * i + 1].0 - events[2 * i].0;
			acc | ((pulse > ms(100)) as u64) << i
		});
		Frame::from_packed(packed)
	}

	#[test]
	fn clock_alignment_test() {
		let start = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(14, 36, 20).unwrap();
		for config in [
			SchedulerConfig { bit_period_ms: 1000, gap_ms: 1000, max_frames: Some(3), ..Default::default() },
			SchedulerConfig { max_frames: Some(3), ..Default::default() }
		] {
			let timer = ManualTimer::new();
			let clock = TimelineClock { start, timeline: timer.timeline() };
			let mut source = ClockSource::new(clock, Annotations::default()).aligned();
			let mut scheduler = simulated(config.clone(), timer);
			let report = scheduler.run(&mut source, &CancelToken::new()).unwrap();
			assert_eq!(report.outcome, Outcome::Completed);

			// Idle, sync, two per bit, then idle. The gaps re-use the high level.
			let events = scheduler.into_parts().0.events;
			assert_eq!(events.len(), 2 + 3 * 2 * FRAME_BITS + 1);
			for n in 0..3 {
				let first = 2 + n * 2 * FRAME_BITS;
				let (at, level) = events[first];
				assert_eq!(level, 50);

				// Bit 0 starts on 14:37:00, 14:38:00 and 14:39:00
				assert_eq!(at, ms(40_000 + 60_000 * n as u64), "frame {} with {:?}", n, config);
				let wall = start + TimeDelta::from_std(at).unwrap();
				assert_eq!((wall.minute(), wall.second(), wall.nanosecond()), (37 + n as u32, 0, 0));

				// Each frame carries the minute its marker begins
				let t = decode(&received(&events[first..])).unwrap();
				assert_eq!(t, CalendarTime::new(2024, 3, 15, 5, 14, 38 + n as u8));
			}
		}
	}

	#[test]
	fn first_frame_error_test() {
		let mut source = Sequence(VecDeque::from([Err(FrameError::Marker { bit: 20 })]), 0);
		let mut scheduler = simulated(SchedulerConfig::default(), ManualTimer::new());
		let result = scheduler.run(&mut source, &CancelToken::new());
		assert_eq!(result, Err(SchedulerError::Source(FrameError::Marker { bit: 20 })));

		// No carrier was put out, and the output was left idle
		assert_eq!(scheduler.output().levels(), vec![0, 0]);
	}

	#[test]
	fn cancel_test() {
		let frame = Frame::from_msb_first(REFERENCE);
		let pulse = |i: usize| -> u64 { if frame.bit(i) { 200 } else { 100 } };
		// (cancel instant, bits sent, frames sent)
		let cases = [
			(ms(1000), 0, 0),                                   // idle
			(ms(3500), 0, 0),                                   // sync
			(ms(4800 + 50), 0, 0),                              // first pulse
			(ms(4800 + 10 * 970 + 500), 10, 0),                 // space of bit 10
			(ms(4800 + 33 * 970 + pulse(33) - 1), 33, 0),       // end of pulse of bit 33
			(ms(4800 + 59 * 970 + 400), 59, 0),                 // minute gap
			(ms(4800 + 58080 + 20 * 970 + 10), 59 + 20, 1)      // second frame
		];
		for (at, bits, frames) in cases {
			let mut scheduler = simulated(SchedulerConfig::default(), ManualTimer::new().cancel_at(at));
			let token = CancelToken::new();
			let report = scheduler.run(&mut frame.clone(), &token).unwrap();
			assert_eq!(report.outcome, Outcome::Cancelled, "{:?}", at);
			assert_eq!(report.bits, bits, "{:?}", at);
			assert_eq!(report.frames, frames, "{:?}", at);
			assert!(token.is_cancelled());

			// Stopped at the cancellation instant and forced to idle
			let (recorder, timer) = scheduler.into_parts();
			assert_eq!(timer.now(), at);
			assert_eq!(recorder.events.last(), Some(&(at, 0)), "{:?}", at);
		}
	}

	#[test]
	fn cancel_before_start_test() {
		let token = CancelToken::new();
		token.cancel();
		let mut scheduler = simulated(SchedulerConfig::default(), ManualTimer::new());
		let report = scheduler.run(&mut Frame::from_msb_first(REFERENCE), &token).unwrap();
		assert_eq!(report.outcome, Outcome::Cancelled);
		assert_eq!(report.bits, 0);
		assert_eq!(scheduler.output().levels(), vec![0, 0]);
	}

	#[test]
	fn output_failure_test() {
		let frame = Frame::from_msb_first(REFERENCE);
		let mut clean = simulated(single_frame(), ManualTimer::new());
		clean.run(&mut frame.clone(), &CancelToken::new()).unwrap();

		let timer = ManualTimer::new();
		let recorder = Recorder::with_timeline(timer.timeline()).fail_calls([1, 2, 5, 6, 40]);
		let config = SchedulerConfig { failure_warn_threshold: 3, ..single_frame() };
		let mut failing = Scheduler::new(recorder, timer, config).unwrap();
		let report = failing.run(&mut frame.clone(), &CancelToken::new()).unwrap();
		assert_eq!(report.output_failures, 5);
		assert_eq!(report.outcome, Outcome::Completed);
		assert_eq!(report.bits, 59);

		// Failed commands do not move any later transition
		assert_eq!(failing.output().events, clean.output().events);
	}

	#[test]
	fn last_command_failure_test() {
		// The final space fails, so the gap issues the high level again
		let frame = Frame::from_msb_first(REFERENCE);
		let timer = ManualTimer::new();
		let last_space = 2 + 2 * FRAME_BITS - 1;
		let recorder = Recorder::with_timeline(timer.timeline()).fail_calls([last_space]);
		let mut scheduler = Scheduler::new(recorder, timer, single_frame()).unwrap();
		let report = scheduler.run(&mut frame.clone(), &CancelToken::new()).unwrap();
		assert_eq!(report.output_failures, 1);

		let events = &scheduler.output().events;
		assert_eq!(events.len(), 2 + 2 * FRAME_BITS + 2);
		assert_eq!(events[last_space + 1], (ms(4800 + 59 * 970), 1500));
		assert_eq!(events[last_space + 2], (ms(4800 + 59 * 970 + 850), 0));
	}

	#[test]
	fn config_test() {
		assert_eq!(SchedulerConfig::default().validate(), Ok(()));

		let bad = [
			SchedulerConfig { zero_pulse_ms: 0, ..Default::default() },
			SchedulerConfig { zero_pulse_ms: 200, ..Default::default() },
			SchedulerConfig { one_pulse_ms: 970, ..Default::default() },
			SchedulerConfig { bit_period_ms: 0, ..Default::default() },
			SchedulerConfig { low_level: 1500, ..Default::default() },
			SchedulerConfig { max_frames: Some(0), ..Default::default() }
		];
		for config in bad {
			assert!(matches!(config.validate(), Err(SchedulerError::Config(_))), "{:?}", config);
			assert!(Scheduler::new(Recorder::default(), ManualTimer::new(), config).is_err());
		}

		let config = SchedulerConfig { bit_period_ms: 1000, ..Default::default() };
		assert_eq!(config.validate(), Ok(()));
		assert_eq!(config.pulse_ms(false), 100);
		assert_eq!(config.pulse_ms(true), 200);
	}

	#[test]
	fn realtime_test() {
		init_logger();
		let config = SchedulerConfig {
			idle_ms: 5,
			sync_ms: 5,
			bit_period_ms: 10,
			zero_pulse_ms: 2,
			one_pulse_ms: 4,
			gap_ms: 5,
			max_frames: Some(1),
			..Default::default()
		};
		let start = Instant::now();
		let mut scheduler = Scheduler::new(Recorder::default(), SystemTimer::new(), config).unwrap();
		let report = scheduler.run(&mut Frame::from_msb_first(REFERENCE), &CancelToken::new()).unwrap();
		assert_eq!(report.outcome, Outcome::Completed);
		assert!(start.elapsed() >= ms(5 + 5 + 590 + 5));
		assert_eq!(scheduler.output().last(), Some(0));
	}

	#[test]
	fn realtime_cancel_test() {
		init_logger();
		let token = CancelToken::new();
		let canceller = token.clone();
		let handle = thread::spawn(move || {
			thread::sleep(ms(50));
			canceller.cancel();
		});

		// Cancelled during the 3 s idle hold, must not wait for it to finish
		let start = Instant::now();
		let mut scheduler = Scheduler::new(Recorder::default(), SystemTimer::new(), SchedulerConfig::default()).unwrap();
		let report = scheduler.run(&mut Frame::from_msb_first(REFERENCE), &token).unwrap();
		handle.join().unwrap();
		assert_eq!(report.outcome, Outcome::Cancelled);
		assert!(start.elapsed() < ms(2500));
		assert_eq!(scheduler.output().levels(), vec![0, 0]);
	}
}
