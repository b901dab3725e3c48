//! Snapshot folder naming
//!
//! A snapshot is identified by its folder name alone:
//! `Backup_` followed by a second-precision timestamp, e.g.
//! `Backup_20240115_093000`. Names are written from the local clock and read
//! back as UTC, which keeps existing snapshot folders interoperable.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

pub const SNAPSHOT_PREFIX: &str = "Backup_";
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `yyyyMMdd_HHmmss`
const STAMP_LEN: usize = 15;
const STAMP_SEPARATOR: usize = 8;

pub fn format_snapshot_name(timestamp: NaiveDateTime) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, timestamp.format(SNAPSHOT_TIME_FORMAT))
}

/// Parses a snapshot folder name. Anything that is not exactly
/// `Backup_yyyyMMdd_HHmmss` yields `None`.
pub fn parse_snapshot_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(SNAPSHOT_PREFIX)?;
    if !has_stamp_shape(stamp) {
        return None;
    }

    NaiveDateTime::parse_from_str(stamp, SNAPSHOT_TIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn has_stamp_shape(stamp: &str) -> bool {
    stamp.len() == STAMP_LEN
        && stamp.bytes().enumerate().all(|(i, b)| {
            if i == STAMP_SEPARATOR {
                b == b'_'
            } else {
                b.is_ascii_digit()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use test_case::test_case;

    fn stamp(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_format_matches_folder_layout() {
        assert_eq!(
            format_snapshot_name(stamp(2024, 1, 15, 9, 30, 0)),
            "Backup_20240115_093000"
        );
    }

    #[test]
    fn test_round_trip_at_second_precision() {
        let mut t = stamp(1999, 12, 31, 23, 59, 59);
        for _ in 0..50 {
            let parsed = parse_snapshot_name(&format_snapshot_name(t)).unwrap();
            assert_eq!(parsed.naive_utc(), t);
            t += Duration::seconds(86_400 * 37 + 3_601);
        }
    }

    #[test]
    fn test_sub_second_precision_is_dropped() {
        let t = stamp(2024, 6, 1, 12, 0, 0) + Duration::milliseconds(750);
        let parsed = parse_snapshot_name(&format_snapshot_name(t)).unwrap();
        assert_eq!(parsed.naive_utc(), stamp(2024, 6, 1, 12, 0, 0));
    }

    #[test]
    fn test_parse_treats_value_as_utc() {
        let parsed = parse_snapshot_name("Backup_20240115_093000").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap());
    }

    #[test_case("" ; "empty")]
    #[test_case("Backup_" ; "prefix only")]
    #[test_case("backup_20240115_093000" ; "wrong case prefix")]
    #[test_case("Snapshot_20240115_093000" ; "other prefix")]
    #[test_case("Backup_20240115093000" ; "missing separator")]
    #[test_case("Backup_20240115_09300" ; "short time")]
    #[test_case("Backup_20240115_0930000" ; "long time")]
    #[test_case("Backup_2024011_5093000" ; "misplaced separator")]
    #[test_case("Backup_20241315_093000" ; "month out of range")]
    #[test_case("Backup_20240230_093000" ; "no such day")]
    #[test_case("Backup_20240115_253000" ; "hour out of range")]
    #[test_case("Backup_+2024115_093000" ; "signed year")]
    #[test_case("Backup_20240115_093000 copy" ; "trailing text")]
    #[test_case("Backup_２０２４0115_093000" ; "non ascii digits")]
    fn test_parse_rejects(name: &str) {
        assert_eq!(parse_snapshot_name(name), None);
    }
}
