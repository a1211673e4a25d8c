//! Support for command line argument parsing.
//!
//! See [crate] documentation for details on command line arguments and examples.

use std::time::Duration;
use chrono::{NaiveDateTime, TimeDelta};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dcf77::{Annotations, Frame, SchedulerConfig};

/// Parsed command line arguments.
#[derive(Debug, Parser)]
#[cfg_attr(test, derive(PartialEq))]
#[command(name = "dcf77tx", version)]
#[command(about = "Generate the DCF77 time signal by keying a carrier's amplitude")]
pub struct Arguments {
	/// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides this.
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Command
}

/// Known subcommands.
#[derive(Debug, Subcommand)]
#[cfg_attr(test, derive(PartialEq))]
pub enum Command {
	/// Transmit frames until stopped
	Transmit(TransmitArgs),
	/// Print the frame for a date and time
	Encode {
		/// The date and time to encode, "YYYY-MM-DD HH:MM"
		#[arg(short, long, value_parser = parse_datetime)]
		time: NaiveDateTime,

		#[command(flatten)]
		annotations: AnnotationArgs
	},
	/// Check a frame and print the date and time it carries
	Decode {
		/// 59 bits, bit 0 first (a 0b prefix and _ separators are allowed)
		frame: Frame
	}
}

/// Known output stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputType {
	/// The default audio device, carrier at 15.5 kHz (77.5 kHz fifth harmonic)
	Audio,
	/// Log amplitude changes only (use -v to see them)
	Log
}

/// Arguments of the `transmit` subcommand.
#[derive(Debug, Args)]
#[cfg_attr(test, derive(PartialEq))]
pub struct TransmitArgs {
	/// Output stage to drive
	#[arg(short, long, value_enum, default_value_t = OutputType::Audio)]
	pub output: OutputType,

	/// Transmit this fixed frame repeatedly instead of the clock
	#[arg(short, long, conflicts_with_all = ["time", "utc", "cest", "cet", "dst_announce", "leap_announce", "call", "weather"])]
	pub frame: Option<Frame>,

	/// Transmit a fixed frame even if it does not decode
	#[arg(long, requires = "frame")]
	pub force: bool,

	/// The first minute to transmit, "YYYY-MM-DD HH:MM", instead of the system clock
	#[arg(short, long, value_parser = parse_datetime)]
	pub time: Option<NaiveDateTime>,

	/// Use UTC instead of local time from the system clock
	#[arg(long)]
	pub utc: bool,

	/// The number of frames to transmit, default unlimited
	#[arg(short = 'n', long)]
	pub frames: Option<u64>,

	/// Stop after this many seconds
	#[arg(short, long, value_parser = parse_seconds)]
	pub duration: Option<Duration>,

	#[command(flatten)]
	pub annotations: AnnotationArgs,

	#[command(flatten)]
	pub timing: TimingArgs
}

/// Pass-through bits of the frame.
#[derive(Debug, Clone, Copy, Args)]
#[cfg_attr(test, derive(PartialEq))]
pub struct AnnotationArgs {
	/// Set the CEST bit (17)
	#[arg(long)]
	pub cest: bool,

	/// Set the CET bit (18)
	#[arg(long)]
	pub cet: bool,

	/// Announce a CET/CEST change at the end of the hour (bit 16)
	#[arg(long)]
	pub dst_announce: bool,

	/// Announce a leap second at the end of the hour (bit 19)
	#[arg(long)]
	pub leap_announce: bool,

	/// Set the call bit (15)
	#[arg(long)]
	pub call: bool,

	/// Weather bits 1-14
	#[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u16).range(0..0x4000))]
	pub weather: u16
}

impl From<AnnotationArgs> for Annotations {
	fn from(a: AnnotationArgs) -> Self {
		Annotations {
			weather: a.weather,
			call: a.call,
			dst_announce: a.dst_announce,
			cest: a.cest,
			cet: a.cet,
			leap_announce: a.leap_announce
		}
	}
}

/// Timing and levels of the modulation. Defaults are the tuned values of the transmitter.
#[derive(Debug, Clone, Copy, Args)]
#[cfg_attr(test, derive(PartialEq))]
pub struct TimingArgs {
	/// Bit period in ms (the broadcast signal uses 1000)
	#[arg(long, default_value_t = 970)]
	pub bit_period_ms: u32,

	/// Carrier-off time before transmitting, in ms
	#[arg(long, default_value_t = 3000)]
	pub idle_ms: u32,

	/// Carrier-on time before the first bit, in ms
	#[arg(long, default_value_t = 1800)]
	pub sync_ms: u32,

	/// Hold after the last bit of each frame, in ms
	#[arg(long, default_value_t = 850)]
	pub gap_ms: u32,

	/// Output level during pulses
	#[arg(long, default_value_t = 50)]
	pub low_level: u16,

	/// Nominal output level
	#[arg(long, default_value_t = 1500)]
	pub high_level: u16
}

impl TransmitArgs {
	/// The scheduler configuration for these arguments.
	pub fn scheduler_config(&self) -> SchedulerConfig {
		SchedulerConfig {
			idle_ms: self.timing.idle_ms,
			sync_ms: self.timing.sync_ms,
			bit_period_ms: self.timing.bit_period_ms,
			gap_ms: self.timing.gap_ms,
			low_level: self.timing.low_level,
			high_level: self.timing.high_level,
			max_frames: self.frames,
			..Default::default()
		}
	}

	/// The clock reading that makes the first transmitted frame carry `--time`.
	///
	/// Frames carry the minute after the clock reading, so the clock starts one minute early.
	pub fn clock_start(&self) -> Option<NaiveDateTime> {
		self.time.map(|t| t - TimeDelta::minutes(1))
	}
}

/// Parse a date time string as `YYYY-MM-DD HH:MM` or `YYYY-MM-DD HH:MM:SS`.
///
/// # Examples
///
/// ```ignore
/// assert!(parse_datetime("2024-03-15 14:37").is_ok());
/// assert!(parse_datetime("2024-03-15T14:37:10").is_ok());
/// assert!(parse_datetime("14:37").is_err());
/// ```
fn parse_datetime(s: &str) -> Result<NaiveDateTime, String> {
	const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];
	FORMATS.iter()
		.find_map(|f| NaiveDateTime::parse_from_str(s.trim(), f).ok())
		.ok_or_else(|| format!("invalid date time {:?}, expected \"YYYY-MM-DD HH:MM\"", s))
}

/// Parse a whole number of seconds.
fn parse_seconds(s: &str) -> Result<Duration, String> {
	s.parse::<u64>()
		.map(Duration::from_secs)
		.map_err(|_| format!("invalid number of seconds: {}", s))
}
