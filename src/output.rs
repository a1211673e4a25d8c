//! Output stages available to the command line.
//!
//! - [`AudioCarrier`] plays the carrier on the default audio output device. This works by taking
//!   advantage of stray RF emitted by audio hardware: the 15.5 kHz tone has its fifth harmonic at
//!   the 77.5 kHz DCF77 carrier frequency.
//! - [`LogOutput`] only logs the amplitude commands, for dry runs.

use std::error::Error;
use std::f32::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error};
use dcf77::{AmplitudeOutput, OutputError};

/// Output sample rate.
const SAMPLE_RATE: u32 = 48000;

/// Tone frequency, a fifth of the DCF77 carrier.
const TONE_HZ: f32 = 77500. / 5.;

/// Amplitude shared between the scheduler thread and the audio callback.
///
/// The gain is stored as `f32` bits.
#[derive(Clone, Default)]
struct Shared {
	gain: Arc<AtomicU32>,
	failed: Arc<AtomicBool>
}

/// A carrier tone on the default audio output device.
///
/// The stream lives as long as this value. [`cpal::Stream`] cannot move between threads, so the
/// scheduler thread drives the carrier through a [`CarrierLevel`] handle instead.
pub struct AudioCarrier {
	_stream: cpal::Stream,
	shared: Shared,
	full_scale: u16
}

impl AudioCarrier {
	/// Open the default output device at 48 kHz, mono, and start playing silence.
	///
	/// Levels are scaled so that `full_scale` plays at full amplitude.
	///
	/// # Errors
	///
	/// Fails if there is no default output device or the stream cannot be built or started.
	pub fn open(full_scale: u16) -> Result<AudioCarrier, Box<dyn Error>> {
		let host = cpal::default_host();
		let device = host.default_output_device().ok_or("Failed to get default audio output device")?;
		let config = cpal::StreamConfig {
			channels: 1,
			sample_rate: cpal::SampleRate(SAMPLE_RATE),
			buffer_size: cpal::BufferSize::Fixed(1024),
		};
		let shared = Shared::default();
		let failed = shared.failed.clone();
		let mut write = make_writer(shared.gain.clone());
		let stream = device.build_output_stream(
			&config,
			move |data: &mut [f32], _: &cpal::OutputCallbackInfo| write(data),
			move |e| {
				error!("Error occured on the audio stream: {}", e);
				failed.store(true, Ordering::Release);
			},
			None
		)?;
		stream.play()?;
		debug!("Audio carrier started on {}", device.name().unwrap_or_else(|_| String::from("unknown device")));

		Ok(AudioCarrier { _stream: stream, shared, full_scale: full_scale.max(1) })
	}

	/// A handle that sets the carrier amplitude from any thread.
	pub fn level(&self) -> CarrierLevel {
		CarrierLevel { shared: self.shared.clone(), full_scale: self.full_scale }
	}
}

/// Sets the amplitude of an [`AudioCarrier`].
pub struct CarrierLevel {
	shared: Shared,
	full_scale: u16
}

impl AmplitudeOutput for CarrierLevel {
	/// Takes effect from the next audio buffer, at most 21.33 ms later.
	fn set_amplitude(&mut self, level: u16) -> Result<(), OutputError> {
		let gain = (level as f32 / self.full_scale as f32).min(1.);
		self.shared.gain.store(gain.to_bits(), Ordering::Release);
		if self.shared.failed.swap(false, Ordering::AcqRel) {
			return Err(OutputError::Device(String::from("audio stream reported an error")));
		}
		Ok(())
	}
}

/// Make the audio callback writing the carrier tone scaled by `gain`.
///
/// The tone has a whole number of cycles per second, so the phase is computed from the sample
/// index within the current second.
fn make_writer(gain: Arc<AtomicU32>) -> impl FnMut(&mut [f32]) + Send {
	let mut i: u32 = 0;
	move |data: &mut [f32]| {
		let power = f32::from_bits(gain.load(Ordering::Acquire));
		for sample in data.iter_mut() {
			let pos = i as f32 / SAMPLE_RATE as f32;
			*sample = power * (PI * 2. * TONE_HZ * pos).sin();
			i = (i + 1) % SAMPLE_RATE;
		}
	}
}

/// Dry-run output that logs each amplitude change.
#[derive(Default)]
pub struct LogOutput {
	last: Option<u16>
}

impl AmplitudeOutput for LogOutput {
	fn set_amplitude(&mut self, level: u16) -> Result<(), OutputError> {
		if self.last != Some(level) {
			debug!("Amplitude {}", level);
			self.last = Some(level);
		}
		Ok(())
	}
}
