use std::{fmt::Display, fs::File, io::BufReader, path::Path, sync::Arc};

use hifitime::Epoch;
use lazy_static::lazy_static;
use leap_seconds::LeapSecondsList;

use crate::error::{Error, Result};

// Static leap-second.list file embeded in build.rs
// Obtain a new one from https://hpiers.obspm.fr/iers/bul/bulc/ntp/leap-seconds.list
const LEAP_SECONDS_LIST: &str = include_str!(concat!(env!("OUT_DIR"), "/leap-seconds.list"));

// NTP timestamps are seconds since 1900-01-01, mission days are since 1958-01-01
const NTP_DAYS_BEFORE_1958: i64 = 21_184;
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
// TAI - UTC when leap seconds were introduced on 1972-01-01
const INITIAL_TAI_OFFSET: i64 = 10;

lazy_static! {
    static ref DEFAULT: Arc<LeapSeconds> = Arc::new(
        LeapSeconds::parse(LEAP_SECONDS_LIST).expect("embedded leap-seconds.list must be valid")
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Leap {
    // mission day the offset takes effect
    day: i64,
    // TAI - UTC in seconds from `day` on
    tai_offset: i64,
}

/// Leap-second table loaded from an IERS `leap-seconds.list`.
///
/// The table is parsed once and shared; lookups never touch the file again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeapSeconds {
    leaps: Vec<Leap>,
    /// Last update as NTP seconds.
    pub updated: i64,
    /// Expiration as NTP seconds.
    pub expires: i64,
}

impl Display for LeapSeconds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LeapSeconds{{entries:{}, updated:{}, expires:{}}}",
            self.leaps.len(),
            self.updated,
            self.expires
        )
    }
}

impl LeapSeconds {
    /// The table embedded at build time.
    #[must_use]
    pub fn embedded() -> Arc<LeapSeconds> {
        DEFAULT.clone()
    }

    /// Load a table from a user provided file.
    ///
    /// # Errors
    /// If the file cannot be read or is not a valid leap-seconds list.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Arc<LeapSeconds>> {
        let reader = BufReader::new(File::open(path)?);
        Ok(Arc::new(Self::from_list(&Self::read_list(reader)?)?))
    }

    /// Parse the content of a `leap-seconds.list`.
    ///
    /// # Errors
    /// [Error::LeapSeconds] if the list is malformed, fails its hash check, has out of
    /// order records, or has no records.
    pub fn parse(content: &str) -> Result<Self> {
        Self::from_list(&Self::read_list(content.as_bytes())?)
    }

    fn read_list<R: std::io::BufRead>(reader: R) -> Result<LeapSecondsList> {
        LeapSecondsList::new(reader).map_err(|err| Error::LeapSeconds(err.to_string()))
    }

    fn from_list(list: &LeapSecondsList) -> Result<Self> {
        let mut leaps: Vec<Leap> = Vec::default();
        for (idx, leap) in list.leap_seconds().iter().enumerate() {
            #[allow(clippy::cast_possible_wrap)]
            let day = leap.timestamp().as_u64() as i64 / 86_400 - NTP_DAYS_BEFORE_1958;
            let tai_offset = i64::from(leap.tai_diff());
            if let Some(prev) = leaps.last() {
                if day <= prev.day || tai_offset < prev.tai_offset {
                    return Err(Error::LeapSeconds(format!(
                        "records out of order at entry={idx}"
                    )));
                }
            }
            leaps.push(Leap { day, tai_offset });
        }

        if leaps.is_empty() {
            return Err(Error::LeapSeconds("no leap second records".to_string()));
        }

        #[allow(clippy::cast_possible_wrap)]
        Ok(LeapSeconds {
            leaps,
            updated: list.last_update().as_u64() as i64,
            expires: list.expiration_date().as_u64() as i64,
        })
    }

    /// Number of leap seconds inserted since 1972-01-01 in effect on mission day `day`.
    #[must_use]
    pub fn leap_seconds_since_1972(&self, day: i64) -> i64 {
        let idx = self.leaps.partition_point(|l| l.day <= day);
        if idx == 0 {
            return 0;
        }
        self.leaps[idx - 1].tai_offset - INITIAL_TAI_OFFSET
    }

    /// Returns true if the list expired before `unix_seconds`.
    #[must_use]
    pub fn is_expired_at(&self, unix_seconds: i64) -> bool {
        self.expires - NTP_UNIX_OFFSET < unix_seconds
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        match Epoch::now() {
            #[allow(clippy::cast_possible_truncation)]
            Ok(now) => self.is_expired_at(now.to_unix_seconds() as i64),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const LIST: &str = "#$	3976686858
#@	4007404800
#
2272060800	10	# 1 Jan 1972
2287785600	11	# 1 Jul 1972
3550089600	35	# 1 Jul 2012
3644697600	36	# 1 Jul 2015
3692217600	37	# 1 Jan 2017
#h	e7233496 bd783447 c720397d f2eda06d 7cc4ea67
";

    #[test]
    fn test_parse() {
        let leaps = LeapSeconds::parse(LIST).unwrap();

        assert_eq!(leaps.leaps.len(), 5);
        assert_eq!(leaps.updated, 3_976_686_858);
        assert_eq!(leaps.expires, 4_007_404_800);
        // 1 Jan 1972 is mission day 5113
        assert_eq!(leaps.leaps[0].day, 5113);
        assert_eq!(leaps.leaps[3].day, 21000);
    }

    #[test_case(0, 0; "1958")]
    #[test_case(5112, 0; "day before 1972")]
    #[test_case(5113, 0; "1972")]
    #[test_case(5295, 1; "jul 1972")]
    #[test_case(18000, 1; "before 2012")]
    #[test_case(19905, 25; "jul 2012")]
    #[test_case(20999, 25; "day before jul 2015")]
    #[test_case(21000, 26; "jul 2015")]
    #[test_case(21549, 26; "day before 2017")]
    #[test_case(23000, 27; "after last")]
    fn test_leap_seconds_since_1972(day: i64, expected: i64) {
        let leaps = LeapSeconds::parse(LIST).unwrap();
        assert_eq!(leaps.leap_seconds_since_1972(day), expected);
    }

    #[test]
    fn test_embedded() {
        let leaps = LeapSeconds::embedded();
        // 2020-01-01
        assert_eq!(leaps.leap_seconds_since_1972(22645), 27);
    }

    #[test]
    fn test_expired() {
        let leaps = LeapSeconds::parse(LIST).unwrap();
        // expires 2026-12-28
        assert!(!leaps.is_expired_at(1_700_000_000));
        assert!(leaps.is_expired_at(1_800_000_000));
    }

    #[test]
    fn test_out_of_order() {
        let list = "#$\t3976686858
#@\t4007404800
2287785600\t11\t# 1 Jul 1972
2272060800\t10\t# 1 Jan 1972
#h\t01dc6c68 8c36d0f3 3be09f24 ff9eb656 070336be
";
        let zult = LeapSeconds::parse(list);
        assert!(matches!(zult, Err(Error::LeapSeconds(_))));
    }

    #[test]
    fn test_empty() {
        assert!(LeapSeconds::parse("# nothing here\n").is_err());
        let list = "#$\t3976686858
#@\t4007404800
#h\t2f411e2d 77c32a1f 914f9a28 e0010eb8 c17e3d1e
";
        assert!(matches!(LeapSeconds::parse(list), Err(Error::LeapSeconds(_))));
    }

    #[test]
    fn test_bad_hash() {
        let list = LIST.replace("e7233496", "e7233497");
        assert!(matches!(LeapSeconds::parse(&list), Err(Error::LeapSeconds(_))));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leap-seconds.list");
        std::fs::write(&path, LIST).unwrap();

        let leaps = LeapSeconds::from_path(&path).unwrap();
        assert_eq!(*leaps, LeapSeconds::parse(LIST).unwrap());
    }
}
