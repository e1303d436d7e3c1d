use std::ops::Deref;

use hifitime::{Duration, Epoch};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    leapsecs::LeapSeconds,
};

/// Segmented mission time from a packet secondary header.
///
/// Packed into 64 bits as day since 1958-01-01 (16 bits), millisecond of day (32 bits) and
/// microsecond of millisecond (16 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MissionTime {
    pub day: u16,
    pub millis: u32,
    pub micros: u16,
}

impl MissionTime {
    pub const MILLIS_PER_DAY: u32 = 86_400_000;
    pub const MICROS_PER_DAY: i64 = 86_400_000_000;

    /// Decode a packed timecode.
    ///
    /// # Errors
    /// [Error::CorruptTimestamp] if the value is zero or any field is out of range.
    pub fn from_packed(raw: u64) -> Result<Self> {
        let time = MissionTime {
            day: (raw >> 48) as u16,
            millis: (raw >> 16 & 0xffff_ffff) as u32,
            micros: (raw & 0xffff) as u16,
        };
        if raw == 0 || !time.is_valid() {
            return Err(Error::CorruptTimestamp(raw));
        }
        Ok(time)
    }

    #[must_use]
    pub fn packed(&self) -> u64 {
        u64::from(self.day) << 48 | u64::from(self.millis) << 16 | u64::from(self.micros)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.millis < Self::MILLIS_PER_DAY && self.micros < 1000
    }

    /// Microseconds since 1958-01-01.
    #[must_use]
    pub fn micros(&self) -> i64 {
        i64::from(self.day) * Self::MICROS_PER_DAY
            + i64::from(self.millis) * 1000
            + i64::from(self.micros)
    }

    /// Inverse of [MissionTime::micros]. `None` when outside of the representable range.
    #[must_use]
    pub fn from_micros(micros: i64) -> Option<Self> {
        if micros < 0 {
            return None;
        }
        let day = u16::try_from(micros / Self::MICROS_PER_DAY).ok()?;
        let rem = micros % Self::MICROS_PER_DAY;
        Some(MissionTime {
            day,
            millis: u32::try_from(rem / 1000).ok()?,
            micros: u16::try_from(rem % 1000).ok()?,
        })
    }

    /// Apply TAI - UTC leap seconds, renormalizing all fields.
    ///
    /// The result in microseconds is IET.
    ///
    /// # Errors
    /// [Error::CorruptTimestamp] if the result overflows the day field.
    pub fn apply_leap(&self, leaps: &LeapSeconds) -> Result<Self> {
        let offset = 10 + leaps.leap_seconds_since_1972(i64::from(self.day));
        Self::from_micros(self.micros() + offset * 1_000_000)
            .ok_or(Error::CorruptTimestamp(self.packed()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Time(Epoch);

impl AsRef<Epoch> for Time {
    fn as_ref(&self) -> &Epoch {
        &self.0
    }
}

impl Deref for Time {
    type Target = Epoch;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Time {
    // Difference betweeh hifitime epoch (1900-01-01) and JPSS epoch (Jan 1, 1958) in microseconds
    const IET_DELTA: i64 = 1_830_297_600_000_000;

    /// # Panics
    /// If the system clock cannot be read
    #[must_use]
    pub fn now() -> Self {
        Time(Epoch::now().expect("failed to get system time"))
    }

    #[must_use]
    pub fn from_epoch(epoch: Epoch) -> Self {
        Time(epoch)
    }

    /// Create [Time] from IET microseconds.
    #[must_use]
    pub fn from_iet(micros: i64) -> Self {
        let nanos = i128::from(micros + Self::IET_DELTA) * 1000;
        Time(Epoch::from_tai_duration(Duration::from_total_nanoseconds(
            nanos,
        )))
    }

    /// Return TAI microseconds since Jan 1, 1958
    #[must_use]
    pub fn iet(&self) -> i64 {
        let micros = self.0.to_tai_duration().total_nanoseconds() / 1000;
        i64::try_from(micros).unwrap_or(i64::MAX) - Self::IET_DELTA
    }

    /// UTC calendar fields; year, month, day, hour, minute, second, nanosecond.
    #[must_use]
    pub fn utc_fields(&self) -> (i32, u8, u8, u8, u8, u8, u32) {
        self.0.to_gregorian_utc()
    }
}

/// Date attribute value, e.g., `20200101`.
#[must_use]
pub fn attr_date(dt: &Time) -> String {
    let (y, m, d, ..) = dt.utc_fields();
    format!("{y:04}{m:02}{d:02}")
}

/// Time attribute value, e.g., `121314.123456Z`.
#[must_use]
pub fn attr_time(dt: &Time) -> String {
    let (_, _, _, hh, mm, ss, nanos) = dt.utc_fields();
    format!("{hh:02}{mm:02}{ss:02}.{:06}Z", nanos / 1000)
}
