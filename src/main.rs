//! Generate the DCF77 time signal by keying a carrier's amplitude.
//!
//! This binary encodes [DCF77] frames from the system clock (or a fixed start time, or a fixed
//! frame) and transmits them by amplitude-shift keying, one bit per bit period. The carrier comes
//! from the device's default audio output: devices listening for DCF77 use RF rather than audio,
//! and the stray RF of the audio hardware's 15.5 kHz tone has its fifth harmonic at 77.5 kHz.
//! A log-only output is available for dry runs.
//!
//! [DCF77]: https://en.wikipedia.org/wiki/DCF77
//!
//! # Command Line Arguments
//!
//! General form: `dcf77tx [-v...] <transmit|encode|decode> [options...]`
//!
//! `transmit` supports the following options:
//!
//! | Short form | Long form         | Argument           | Default      | Description                          |
//! | ---------- | ----------------- | ------------------ | ------------ | ------------------------------------ |
//! | `-o`       | `--output`        | `audio` or `log`   | `audio`      | The output stage to drive            |
//! | `-f`       | `--frame`         | Frame bits         | None         | Repeat a fixed frame                 |
//! |            | `--force`         |                    |              | Transmit a frame that does not decode |
//! | `-t`       | `--time`          | Date time string   | Current time | The first minute to transmit         |
//! |            | `--utc`           |                    | Local time   | Read the system clock as UTC         |
//! | `-n`       | `--frames`        | Integer > 0        | Unlimited    | The number of frames to transmit     |
//! | `-d`       | `--duration`      | Seconds            | Unlimited    | Stop after this long                 |
//! |            | `--cet`, `--cest` |                    |              | Set the timezone bits                |
//! |            | `--dst-announce`  |                    |              | Set the summer time announcement bit |
//! |            | `--leap-announce` |                    |              | Set the leap second announcement bit |
//! |            | `--call`          |                    |              | Set the call bit                     |
//! |            | `--weather`       | Integer < 16384    | 0            | Bits 1-14                            |
//! |            | `--bit-period-ms` | Milliseconds       | 970          | The bit period                       |
//! |            | `--idle-ms`       | Milliseconds       | 3000         | Carrier off before transmitting      |
//! |            | `--sync-ms`       | Milliseconds       | 1800         | Carrier on before the first bit      |
//! |            | `--gap-ms`        | Milliseconds       | 850          | Hold after the last bit of a frame   |
//! |            | `--low-level`     | Integer            | 50           | Amplitude during pulses              |
//! |            | `--high-level`    | Integer            | 1500         | Nominal amplitude                    |
//!
//! Timezone conversion is not done: the clock is read as local time (or UTC), and the CET/CEST
//! bits are set only as requested. When following the system clock, every frame starts on a whole
//! minute, so the first frame can take up to a minute to begin. With `--time` frames follow each
//! other without waiting.
//!
//! Frame bits are written bit 0 first, as 59 `0`/`1` characters. A `0b` prefix and `_` separators
//! are allowed.
//!
//! # Examples
//!
//! Transmit the current local time as CET until stopped
//! ```sh
//! dcf77tx transmit --cet
//! ```
//!
//! Transmit 3 minutes starting at a fixed time, logging amplitude changes instead of playing audio
//! ```sh
//! dcf77tx -v transmit -o log -n 3 -t "2024-03-15 14:37" --cet
//! ```
//!
//! Print and check a frame
//! ```sh
//! dcf77tx encode -t "2025-11-24 22:48" --cet --weather 1866
//! dcf77tx decode 00101001011100000010100010010010001000100110010001101001000
//! ```

use std::error::Error;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use dcf77::{
	decode, encode_verified, AmplitudeOutput, Annotations, CalendarTime, CancelToken, ClockSource,
	FixedClock, Frame, FrameSource, Outcome, Scheduler, SystemClock, SystemTimer
};

use args::{Arguments, Command, OutputType, TransmitArgs};
use output::{AudioCarrier, LogOutput};

mod args;
mod output;

/// Weekday names, Monday first.
const WEEKDAYS: [&str; 7] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"];

/// Transmit frames until cancelled, the frame limit is reached or `--duration` elapses.
///
/// The scheduler runs on its own thread, while this thread keeps the audio stream alive and
/// enforces the duration.
///
/// # Errors
///
/// This function can generate a variety of errors, all wrapped in `Box<dyn Error>`:
/// - [`dcf77::SchedulerError`] for an invalid configuration or a clock out of range.
/// - [`cpal::BuildStreamError`], [`cpal::PlayStreamError`] from configuring and playing audio.
/// - `String` for a fixed frame that does not decode (without `--force`).
/// - [`std::io::Error`] if the scheduler thread cannot be spawned.
fn transmit(args: TransmitArgs) -> Result<ExitCode, Box<dyn Error>> {
	let config = args.scheduler_config();
	config.validate()?;

	let annotations = Annotations::from(args.annotations);
	let mut source: Box<dyn FrameSource + Send> = match (args.frame, args.clock_start()) {
		(Some(frame), _) => {
			if let Err(e) = decode(&frame) {
				if !args.force {
					return Err(format!("Frame {} does not decode: {} (use --force to transmit it anyway)", frame, e).into());
				}
				warn!("Transmitting frame that does not decode: {}", e);
			}
			Box::new(frame)
		},
		(None, Some(start)) => Box::new(ClockSource::new(FixedClock::new(start), annotations)),
		(None, None) => {
			let clock = if args.utc { SystemClock::Utc } else { SystemClock::Local };
			Box::new(ClockSource::new(clock, annotations).aligned())
		}
	};

	// The audio stream must stay on this thread, only its level handle moves
	let carrier: Option<AudioCarrier>;
	let output: Box<dyn AmplitudeOutput + Send> = match args.output {
		OutputType::Audio => {
			let c = AudioCarrier::open(config.high_level)?;
			let level = c.level();
			carrier = Some(c);
			Box::new(level)
		},
		OutputType::Log => {
			carrier = None;
			Box::new(LogOutput::default())
		}
	};

	let mut scheduler = Scheduler::new(output, SystemTimer::new(), config)?;
	let token = CancelToken::new();
	let handle = {
		let token = token.clone();
		thread::Builder::new()
			.name(String::from("scheduler"))
			.spawn(move || {
				let result = scheduler.run(&mut source, &token);
				// Wake the main thread
				token.cancel();
				result
			})?
	};

	match args.duration {
		Some(d) => if !token.wait_timeout(d) {
			info!("Stopping after {} s", d.as_secs());
			token.cancel();
		},
		None => token.wait()
	}

	let report = handle.join().map_err(|_| "Scheduler thread panicked")??;
	drop(carrier);

	if report.output_failures > 0 {
		warn!("{} output commands failed", report.output_failures);
	}
	if report.outcome == Outcome::Completed {
		info!("Transmitted {} frames", report.frames);
	}
	Ok(ExitCode::SUCCESS)
}

/// Print the frame for `time`.
fn encode(time: CalendarTime, annotations: Annotations) -> Result<ExitCode, Box<dyn Error>> {
	let frame = encode_verified(&time, &annotations)?;
	println!("{}", frame);
	Ok(ExitCode::SUCCESS)
}

/// Print the date, time and flags carried by `frame`.
fn describe(frame: Frame) -> Result<ExitCode, Box<dyn Error>> {
	let time = decode(&frame)?;
	let a = frame.annotations();
	let weekday = WEEKDAYS.get(usize::from(time.weekday) - 1).copied().unwrap_or("?");
	println!("{} {}", time, weekday);

	let flags: Vec<&str> = [
		(a.cest, "CEST"),
		(a.cet, "CET"),
		(a.dst_announce, "DST announce"),
		(a.leap_announce, "leap second announce"),
		(a.call, "call")
	].into_iter().filter_map(|(set, name)| set.then_some(name)).collect();
	if !flags.is_empty() {
		println!("{}", flags.join(", "));
	}
	if a.weather != 0 {
		println!("weather {:#06x}", a.weather);
	}
	Ok(ExitCode::SUCCESS)
}

/// Main program entry point.
///
/// Parses input arguments and runs the subcommand. See [`crate`] documentation for details.
fn main() -> ExitCode {
	let args = Arguments::parse();

	let level = match args.verbose {
		0 => "info",
		1 => "debug",
		_ => "trace"
	};
	env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

	let result = match args.command {
		Command::Transmit(t) => transmit(t),
		Command::Encode { time, annotations } => encode(CalendarTime::from(time), annotations.into()),
		Command::Decode { frame } => describe(frame)
	};

	result
		.inspect_err(|e| error!("{}", e))
		.unwrap_or(ExitCode::FAILURE)
}
