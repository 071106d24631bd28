//! HTTP-date parsing (RFC 9110 §5.6.7).
//!
//! Accepts the preferred IMF-fixdate form plus the two obsolete forms
//! (RFC 850 and asctime). Results are milliseconds since the Unix epoch.

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parse an HTTP-date. Returns `None` for anything malformed.
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();
    parse_imf_fixdate(value)
        .or_else(|| parse_rfc850(value))
        .or_else(|| parse_asctime(value))
}

// Sun, 06 Nov 1994 08:49:37 GMT
fn parse_imf_fixdate(value: &str) -> Option<i64> {
    let (_, rest) = value.split_once(", ")?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() != 5 || parts[4] != "GMT" {
        return None;
    }
    let day = parts[0].parse().ok()?;
    let month = month_number(parts[1])?;
    let year = parts[2].parse().ok()?;
    let (h, m, s) = parse_clock(parts[3])?;
    to_epoch_millis(year, month, day, h, m, s)
}

// Sunday, 06-Nov-94 08:49:37 GMT
fn parse_rfc850(value: &str) -> Option<i64> {
    let (_, rest) = value.split_once(", ")?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() != 3 || parts[2] != "GMT" {
        return None;
    }
    let date: Vec<&str> = parts[0].split('-').collect();
    if date.len() != 3 || date[2].len() != 2 {
        return None;
    }
    let day = date[0].parse().ok()?;
    let month = month_number(date[1])?;
    let short_year: i64 = date[2].parse().ok()?;
    let year = if short_year < 70 { 2000 + short_year } else { 1900 + short_year };
    let (h, m, s) = parse_clock(parts[1])?;
    to_epoch_millis(year, month, day, h, m, s)
}

// Sun Nov  6 08:49:37 1994
fn parse_asctime(value: &str) -> Option<i64> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 5 {
        return None;
    }
    let month = month_number(parts[1])?;
    let day = parts[2].parse().ok()?;
    let (h, m, s) = parse_clock(parts[3])?;
    let year = parts[4].parse().ok()?;
    to_epoch_millis(year, month, day, h, m, s)
}

fn month_number(name: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name))
        .map(|i| i as u32 + 1)
}

fn parse_clock(clock: &str) -> Option<(u32, u32, u32)> {
    let mut it = clock.split(':');
    let h = it.next()?.parse().ok()?;
    let m = it.next()?.parse().ok()?;
    let s = it.next()?.parse().ok()?;
    if it.next().is_some() || h > 23 || m > 59 || s > 60 {
        return None;
    }
    Some((h, m, s))
}

fn to_epoch_millis(year: i64, month: u32, day: u32, h: u32, m: u32, s: u32) -> Option<i64> {
    if !(1..=31).contains(&day) {
        return None;
    }
    let days = days_from_civil(year, month, day);
    let secs = days * 86_400 + i64::from(h) * 3_600 + i64::from(m) * 60 + i64::from(s);
    Some(secs * 1_000)
}

// Howard Hinnant's days_from_civil.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
