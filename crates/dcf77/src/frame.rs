//! DCF77 time-code frames.
//!
//! See [DCF77 documentation](https://en.wikipedia.org/wiki/DCF77#Time_code_details) for details.
//!
//! A [`Frame`] holds the 59 bits of one minute, packed into a `u64` with DCF77 bit `i` stored at
//! integer bit `i` (LSB first, the order of transmission). The layout is:
//!
//! | Bits  | Content                                              |
//! | ----- | ---------------------------------------------------- |
//! | 0     | Start of minute, always 0                            |
//! | 1-14  | Weather / auxiliary bits                             |
//! | 15    | Call bit                                             |
//! | 16    | Summer time change announced for the end of the hour |
//! | 17    | CEST in effect                                       |
//! | 18    | CET in effect                                        |
//! | 19    | Leap second announced for the end of the hour        |
//! | 20    | Start of encoded time, always 1                      |
//! | 21-27 | Minute (BCD), 28 even parity over 21-28              |
//! | 29-34 | Hour (BCD), 35 even parity over 29-35                |
//! | 36-41 | Day of month (BCD)                                   |
//! | 42-44 | Day of week, Monday = 1 ... Sunday = 7               |
//! | 45-49 | Month (BCD)                                          |
//! | 50-57 | Year within century (BCD), 58 even parity over 36-58 |
//!
//! # Examples
//!
//! ```
//! # use dcf77::frame::{decode, encode, CalendarTime, Frame};
//! let frame: Frame = "00101001011100000010100010010010001000100110010001101001000".parse().unwrap();
//! let time = decode(&frame).unwrap();
//! assert_eq!(time.to_string(), "2025-11-24 22:48");
//! assert_eq!(encode(&CalendarTime::new(2024, 3, 15, 5, 14, 37)).unwrap().bit(20), true);
//! ```

use core::fmt;
use core::str::FromStr;
use chrono::{Datelike, NaiveDateTime, Timelike};
use crate::FrameError;

/// Number of bits in a frame. The 60th second carries no pulse.
pub const FRAME_BITS: usize = 59;

/// Mask of the valid bits in a packed frame.
const FRAME_MASK: u64 = (1 << FRAME_BITS) - 1;

/// Bit 20 always set to 1, indicates the start of encoded time.
const TIME_START: u64 = 1 << 20;

/// Offset and width of the minute field (without parity).
const MINUTE: (u32, u32) = (21, 7);
/// Offset and width of the hour field (without parity).
const HOUR: (u32, u32) = (29, 6);
/// Offset and width of the day of month field.
const DAY: (u32, u32) = (36, 6);
/// Offset and width of the day of week field.
const WEEKDAY: (u32, u32) = (42, 3);
/// Offset and width of the month field.
const MONTH: (u32, u32) = (45, 5);
/// Offset and width of the year field.
const YEAR: (u32, u32) = (50, 8);

/// Parity blocks as (block, first bit, width including the parity bit).
const PARITY_BLOCKS: [(ParityBlock, u32, u32); 3] = [
	(ParityBlock::Minute, 21, 8),
	(ParityBlock::Hour, 29, 7),
	(ParityBlock::Date, 36, 23)
];

/// Calendar fields carried in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
	Year,
	Month,
	Day,
	Weekday,
	Hour,
	Minute
}

impl fmt::Display for Field {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Field::Year => "year",
			Field::Month => "month",
			Field::Day => "day",
			Field::Weekday => "weekday",
			Field::Hour => "hour",
			Field::Minute => "minute"
		})
	}
}

/// The three ranges of a frame protected by an even parity bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParityBlock {
	/// Bits 21-28.
	Minute,
	/// Bits 29-35.
	Hour,
	/// Bits 36-58.
	Date
}

impl fmt::Display for ParityBlock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ParityBlock::Minute => "minute",
			ParityBlock::Hour => "hour",
			ParityBlock::Date => "date"
		})
	}
}

/// A civil date and time, to the minute.
///
/// The weekday is taken as given (1 = Monday ... 7 = Sunday) and never re-derived from the date,
/// the same way a transmitter trusts its upstream clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalendarTime {
	/// Absolute Gregorian year, ranged [2000, 2099].
	pub year: u16,
	/// Month, ranged [1, 12].
	pub month: u8,
	/// Day of month, ranged [1, days in month].
	pub day: u8,
	/// Day of week, ranged [1, 7].
	pub weekday: u8,
	/// Hour, ranged [0, 23].
	pub hour: u8,
	/// Minute, ranged [0, 59].
	pub minute: u8
}

impl CalendarTime {
	/// Create a new calendar time. No validation is done until the time is encoded.
	pub const fn new(year: u16, month: u8, day: u8, weekday: u8, hour: u8, minute: u8) -> CalendarTime {
		CalendarTime { year, month, day, weekday, hour, minute }
	}

	/// Check every field against its civil range.
	///
	/// # Errors
	///
	/// Returns [`FrameError::InvalidTime`] naming the first field found out of range.
	pub fn validate(&self) -> Result<(), FrameError> {
		let invalid = |field, value: u8| FrameError::InvalidTime { field, value: value as u16 };
		if !(2000..=2099).contains(&self.year) {
			return Err(FrameError::InvalidTime { field: Field::Year, value: self.year });
		}
		if !(1..=12).contains(&self.month) {
			return Err(invalid(Field::Month, self.month));
		}
		if self.day < 1 || self.day > days_per_month(self.year, self.month) {
			return Err(invalid(Field::Day, self.day));
		}
		if !(1..=7).contains(&self.weekday) {
			return Err(invalid(Field::Weekday, self.weekday));
		}
		if self.hour > 23 {
			return Err(invalid(Field::Hour, self.hour));
		}
		if self.minute > 59 {
			return Err(invalid(Field::Minute, self.minute));
		}
		Ok(())
	}
}

impl From<NaiveDateTime> for CalendarTime {
	/// Seconds are dropped. Years that do not fit a `u16` map to 0 and fail validation.
	fn from(value: NaiveDateTime) -> Self {
		CalendarTime {
			year: u16::try_from(value.year()).unwrap_or(0),
			month: value.month() as u8,
			day: value.day() as u8,
			weekday: value.weekday().number_from_monday() as u8,
			hour: value.hour() as u8,
			minute: value.minute() as u8
		}
	}
}

impl fmt::Display for CalendarTime {
	/// Formats as `YYYY-MM-DD HH:MM`.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:04}-{:02}-{:02} {:02}:{:02}", self.year, self.month, self.day, self.hour, self.minute)
	}
}

/// Check whether a given absolute Gregorian `year` is a leap year.
#[inline(always)]
fn isleapyear(year: u16) -> bool {
	let l = if year % 100 != 0 { 3 } else { 15 };
	(year & l) == 0
}

/// The number of days in a given month.
///
/// `y` must be the absolute Gregorian calendar year, and `m` the 1-indexed month starting at
/// January, ranged [1, 12].
fn days_per_month(y: u16, m: u8) -> u8 {
	if m == 2 {
		if isleapyear(y) { 29 } else { 28 }
	} else {
		30 | (m ^ (m >> 3))
	}
}

/// Bits of a frame that are passed through without interpretation.
///
/// Timezone conversion is not done here: the caller decides which of the CET/CEST and
/// announcement bits are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotations {
	/// Weather / auxiliary bits 1-14, LSB at bit 1. Upper two bits are ignored.
	pub weather: u16,
	/// Bit 15, abnormal transmitter operation ("call bit").
	pub call: bool,
	/// Bit 16, CET/CEST change at the end of this hour.
	pub dst_announce: bool,
	/// Bit 17, CEST in effect.
	pub cest: bool,
	/// Bit 18, CET in effect.
	pub cet: bool,
	/// Bit 19, leap second at the end of this hour.
	pub leap_announce: bool
}

impl Annotations {
	/// Pack into bits 1-19 of a frame.
	fn pack(&self) -> u64 {
		((self.weather as u64 & 0x3fff) << 1)
			| (self.call as u64) << 15
			| (self.dst_announce as u64) << 16
			| (self.cest as u64) << 17
			| (self.cet as u64) << 18
			| (self.leap_announce as u64) << 19
	}
}

/// A 59-bit DCF77 frame.
///
/// Frames are plain values: once built they never change. The text form is 59 `0`/`1` characters
/// with bit 0 first, which is also how the MSB-first integer literal of a frame reads (see
/// [`Frame::from_msb_first`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Frame(u64);

impl Frame {
	/// Create a frame from its packed form, DCF77 bit `i` at integer bit `i`. Bits above 58 are
	/// discarded.
	pub const fn from_packed(packed: u64) -> Frame {
		Frame(packed & FRAME_MASK)
	}

	/// The packed form, DCF77 bit `i` at integer bit `i`.
	pub const fn packed(&self) -> u64 {
		self.0
	}

	/// Create a frame from an integer where DCF77 bit 0 is integer bit 58, i.e. written as a binary
	/// literal the bits read left to right in transmission order.
	///
	/// # Examples
	///
	/// ```
	/// # use dcf77::frame::Frame;
	/// let frame = Frame::from_msb_first(0b00101001011100000010100010010010001000100110010001101001000);
	/// assert_eq!(frame.packed(), 0x96264449140e94);
	/// ```
	pub const fn from_msb_first(value: u64) -> Frame {
		Frame((value.reverse_bits() >> (64 - FRAME_BITS)) & FRAME_MASK)
	}

	/// The integer form where DCF77 bit 0 is integer bit 58. Inverse of [`Frame::from_msb_first`].
	pub const fn to_msb_first(&self) -> u64 {
		self.0.reverse_bits() >> (64 - FRAME_BITS)
	}

	/// Value of bit `index`. Indexes past the end of the frame read as 0.
	#[inline(always)]
	pub fn bit(&self, index: usize) -> bool {
		index < FRAME_BITS && (self.0 >> index) & 1 > 0
	}

	/// All 59 bits in transmission order (bit 0 first).
	pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
		(0..FRAME_BITS).map(move |i| self.bit(i))
	}

	/// The pass-through bits 1-19.
	pub fn annotations(&self) -> Annotations {
		Annotations {
			weather: self.field((1, 14)) as u16,
			call: self.bit(15),
			dst_announce: self.bit(16),
			cest: self.bit(17),
			cet: self.bit(18),
			leap_announce: self.bit(19)
		}
	}

	/// Extract the raw bits at `(offset, width)`.
	#[inline(always)]
	fn field(&self, (offset, width): (u32, u32)) -> u64 {
		(self.0 >> offset) & ((1 << width) - 1)
	}

	/// Extract a two digit BCD value at `(offset, width)`.
	fn bcd(&self, at: (u32, u32), field: Field) -> Result<u8, FrameError> {
		let v = self.field(at);
		let (ones, tens) = (v & 0xf, v >> 4);
		if ones > 9 || tens > 9 {
			return Err(FrameError::InvalidBcd { field });
		}
		Ok((tens * 10 + ones) as u8)
	}
}

impl fmt::Display for Frame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.bits() {
			f.write_str(if b { "1" } else { "0" })?;
		}
		Ok(())
	}
}

impl FromStr for Frame {
	type Err = FrameError;

	/// Parse 59 `0`/`1` characters, bit 0 first. An optional `0b` prefix and `_` separators are
	/// accepted so integer literals can be pasted as-is.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		let s = s.strip_prefix("0b").unwrap_or(s);
		let mut packed = 0u64;
		let mut n = 0;
		for c in s.chars().filter(|&c| c != '_') {
			let bit = match c {
				'0' => 0,
				'1' => 1,
				_ => return Err(FrameError::Parse(format!("unexpected character {:?}", c)))
			};
			if n < FRAME_BITS {
				packed |= bit << n;
			}
			n += 1;
		}
		if n != FRAME_BITS {
			return Err(FrameError::Parse(format!("expected {} bits, found {}", FRAME_BITS, n)));
		}
		Ok(Frame(packed))
	}
}

/// Encode a two digit value as BCD, ones in the low nibble.
#[inline(always)]
fn bcd(v: u8) -> u64 {
	((v % 10) | ((v / 10) << 4)) as u64
}

/// Even parity of `v`.
#[inline(always)]
fn parity(v: u64) -> u64 {
	(v.count_ones() & 0x1) as u64
}

/// Encode `time` with all pass-through bits cleared.
///
/// This is a convenience function, see [`encode_with`] for details.
#[inline(always)]
pub fn encode(time: &CalendarTime) -> Result<Frame, FrameError> {
	encode_with(time, &Annotations::default())
}

/// Encode `time` into a frame, setting bits 1-19 from `annotations`.
///
/// # Errors
///
/// Returns [`FrameError::InvalidTime`] if any field of `time` is out of range. Values are never
/// clamped.
pub fn encode_with(time: &CalendarTime, annotations: &Annotations) -> Result<Frame, FrameError> {
	time.validate()?;

	let min = bcd(time.minute);
	let hour = bcd(time.hour);
	let date =  bcd(time.day)
			 | (time.weekday as u64) << (WEEKDAY.0 - DAY.0)
			 | bcd(time.month) << (MONTH.0 - DAY.0)
			 | bcd((time.year % 100) as u8) << (YEAR.0 - DAY.0);

	let mut r = TIME_START | annotations.pack();
	r |= min          << MINUTE.0;
	r |= parity(min)  << (MINUTE.0 + MINUTE.1);
	r |= hour         << HOUR.0;
	r |= parity(hour) << (HOUR.0 + HOUR.1);
	r |= date         << DAY.0;
	r |= parity(date) << (YEAR.0 + YEAR.1);

	Ok(Frame::from_packed(r))
}

/// Encode `time` and check that the frame decodes back to the same time and annotations.
///
/// # Errors
///
/// Returns any error from [`encode_with`] or [`decode`], or [`FrameError::Mismatch`] /
/// [`FrameError::FlagMismatch`] if the round trip disagrees.
pub fn encode_verified(time: &CalendarTime, annotations: &Annotations) -> Result<Frame, FrameError> {
	let frame = encode_with(time, annotations)?;
	verify(&frame, time, annotations)?;
	Ok(frame)
}

/// Check that `frame` carries `time` and `annotations`.
fn verify(frame: &Frame, time: &CalendarTime, annotations: &Annotations) -> Result<(), FrameError> {
	let decoded = decode(frame)?;
	if decoded != *time {
		return Err(FrameError::Mismatch { expected: *time, actual: decoded });
	}
	let expected = Annotations { weather: annotations.weather & 0x3fff, ..*annotations };
	let actual = frame.annotations();
	if actual != expected {
		return Err(FrameError::FlagMismatch { expected, actual });
	}
	Ok(())
}

/// Decode a frame back into calendar time, checking markers and parity first.
///
/// The year is reconstructed as 2000 plus the year within century.
///
/// # Errors
///
/// - [`FrameError::Marker`] if bit 0 is set or bit 20 is clear.
/// - [`FrameError::Parity`] for the first parity block that does not check out.
/// - [`FrameError::InvalidBcd`] if a digit is greater than 9.
/// - [`FrameError::InvalidTime`] if a decoded field is out of its civil range.
pub fn decode(frame: &Frame) -> Result<CalendarTime, FrameError> {
	if frame.bit(0) {
		return Err(FrameError::Marker { bit: 0 });
	}
	if !frame.bit(20) {
		return Err(FrameError::Marker { bit: 20 });
	}
	for (block, offset, width) in PARITY_BLOCKS {
		if parity(frame.field((offset, width))) != 0 {
			return Err(FrameError::Parity { block });
		}
	}

	let time = CalendarTime {
		year: 2000 + frame.bcd(YEAR, Field::Year)? as u16,
		month: frame.bcd(MONTH, Field::Month)?,
		day: frame.bcd(DAY, Field::Day)?,
		weekday: frame.field(WEEKDAY) as u8,
		hour: frame.bcd(HOUR, Field::Hour)?,
		minute: frame.bcd(MINUTE, Field::Minute)?
	};
	time.validate()?;
	Ok(time)
}
