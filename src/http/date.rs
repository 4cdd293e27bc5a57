//! Minimal RFC 9110 §5.6.7 `HTTP-date` (IMF-fixdate) formatting, used for the `Date` header and
//! for parsing `If-Modified-Since` (spec §4.5 "Conditional-GET"). No external date/time crate is
//! in the teacher's dependency stack, so this works directly off `SystemTime` with the standard
//! civil-calendar-from-days-since-epoch algorithm rather than pulling one in for a handful of
//! format/parse calls.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Formats `time` as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let (year, month, day, weekday) = civil_from_unix_days((secs / 86_400) as i64);
    let time_of_day = secs % 86_400;
    let (hour, minute, second) = (time_of_day / 3600, (time_of_day / 60) % 60, time_of_day % 60);

    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        DAY_NAMES[weekday as usize],
        day,
        MONTH_NAMES[(month - 1) as usize],
        year,
        hour,
        minute,
        second
    )
}

/// Parses an IMF-fixdate back into a `SystemTime`. Returns `None` for anything else (obsolete
/// `rfc850`/`asctime` forms are not accepted — real clients overwhelmingly send IMF-fixdate).
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    let rest = value.split_once(", ")?.1;
    let mut parts = rest.split_whitespace();
    let day: i64 = parts.next()?.parse().ok()?;
    let month = MONTH_NAMES.iter().position(|m| *m == parts.next()?)? as i64 + 1;
    let year: i64 = parts.next()?.parse().ok()?;
    let mut clock = parts.next()?.split(':');
    let hour: i64 = clock.next()?.parse().ok()?;
    let minute: i64 = clock.next()?.parse().ok()?;
    let second: i64 = clock.next()?.parse().ok()?;

    let days = unix_days_from_civil(year, month, day);
    let secs = days * 86_400 + hour * 3600 + minute * 60 + second;
    if secs < 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_secs(secs as u64))
}

/// Howard Hinnant's `civil_from_days`, adapted to also return the day of week (0 = Sunday).
fn civil_from_unix_days(z: i64) -> (i64, i64, i64, i64) {
    let weekday = (z + 4).rem_euclid(7);
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as i64;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as i64;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d, weekday)
}

/// Inverse of [`civil_from_unix_days`]: days since the Unix epoch for a given civil date.
fn unix_days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = if m > 2 { m - 3 } else { m + 9 } as u64;
    let doy = (153 * mp + 2) / 5 + d as u64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe as i64 - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_the_unix_epoch() {
        assert_eq!("Thu, 01 Jan 1970 00:00:00 GMT", format_http_date(UNIX_EPOCH));
    }

    #[test]
    fn formats_a_known_reference_date() {
        let time = UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!("Sun, 06 Nov 1994 08:49:37 GMT", format_http_date(time));
    }

    #[test]
    fn parse_is_the_inverse_of_format() {
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let rendered = format_http_date(time);
        assert_eq!(time, parse_http_date(&rendered).unwrap());
    }

    #[test]
    fn rejects_non_imf_fixdate_input() {
        assert!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT").is_none());
        assert!(parse_http_date("garbage").is_none());
    }
}
