use chrono::DateTime;

/// Fast parse of `"YYYY-MM-DD HH:MM:SS"` (optional `.ffffff` fraction)
/// → naive microseconds since epoch. Returns `None` for anything else.
pub fn parse_timestamp_micros(s: &str) -> Option<i64> {
    let b = s.trim().as_bytes();
    // minimal length + separators check
    if b.len() < 19
        || b[4] != b'-'
        || b[7] != b'-'
        || b[10] != b' '
        || b[13] != b':'
        || b[16] != b':'
    {
        return None;
    }
    for &i in &[0usize, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18] {
        if !b[i].is_ascii_digit() {
            return None;
        }
    }

    // fast digit-to-int parsing
    let year = (b[0] - b'0') as i32 * 1000
        + (b[1] - b'0') as i32 * 100
        + (b[2] - b'0') as i32 * 10
        + (b[3] - b'0') as i32;
    let month = ((b[5] - b'0') as u32) * 10 + (b[6] - b'0') as u32;
    let day = ((b[8] - b'0') as u32) * 10 + (b[9] - b'0') as u32;
    let hour = ((b[11] - b'0') as u32) * 10 + (b[12] - b'0') as u32;
    let min = ((b[14] - b'0') as u32) * 10 + (b[15] - b'0') as u32;
    let sec = ((b[17] - b'0') as u32) * 10 + (b[18] - b'0') as u32;

    // optional fractional seconds, up to 6 digits
    let mut micros = 0u32;
    if b.len() > 19 {
        if b[19] != b'.' || b.len() == 20 {
            return None;
        }
        let mut factor = 100_000u32;
        for &d in &b[20..] {
            if !d.is_ascii_digit() || factor == 0 {
                return None;
            }
            micros += (d - b'0') as u32 * factor;
            factor /= 10;
        }
    }

    let naive = chrono::NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_micro_opt(hour, min, sec, micros)?;
    Some(naive.and_utc().timestamp_micros())
}

/// Inverse of [`parse_timestamp_micros`]: format naive microseconds back to
/// `"YYYY-MM-DD HH:MM:SS"`, appending the 6-digit fraction only when nonzero.
pub fn format_timestamp_micros(micros: i64) -> Option<String> {
    let dt = DateTime::from_timestamp_micros(micros)?.naive_utc();
    let rendered = if micros % 1_000_000 == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    };
    Some(rendered)
}
