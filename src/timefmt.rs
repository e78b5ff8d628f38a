use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

/// Formats an ISO-8601 timestamp as e.g. `"1st April 2021 - 9:30 PM UTC"`.
///
/// If the input cannot be parsed it is returned unchanged; a bad timestamp
/// degrades the display, it never fails a request.
pub fn format_timestamp(raw: &str) -> String {
    match parse_utc(raw) {
        Some(dt) => render(dt),
        None => raw.to_string(),
    }
}

fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // timestamps without an offset are taken as UTC
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn render(dt: DateTime<Utc>) -> String {
    let day = dt.day();
    let (pm, hour) = dt.hour12();
    format!(
        "{}{} {} {} - {}:{:02} {} UTC",
        day,
        ordinal_suffix(day),
        dt.format("%B"),
        dt.year(),
        hour,
        dt.minute(),
        if pm { "PM" } else { "AM" },
    )
}

fn ordinal_suffix(day: u32) -> &'static str {
    if (10..=20).contains(&(day % 100)) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_evening_timestamp() {
        assert_eq!(
            format_timestamp("2021-04-01T21:30:00Z"),
            "1st April 2021 - 9:30 PM UTC"
        );
    }

    #[test]
    fn midnight_hour_renders_as_twelve_am() {
        assert_eq!(
            format_timestamp("2021-04-11T00:05:00Z"),
            "11th April 2021 - 12:05 AM UTC"
        );
    }

    #[test]
    fn teens_always_get_th_suffix() {
        assert_eq!(
            format_timestamp("2021-04-12T09:00:00Z"),
            "12th April 2021 - 9:00 AM UTC"
        );
        assert_eq!(
            format_timestamp("2021-04-13T09:00:00Z"),
            "13th April 2021 - 9:00 AM UTC"
        );
    }

    #[test]
    fn suffixes_outside_the_teens() {
        assert_eq!(
            format_timestamp("2021-04-02T12:00:00Z"),
            "2nd April 2021 - 12:00 PM UTC"
        );
        assert_eq!(
            format_timestamp("2021-04-03T12:00:00Z"),
            "3rd April 2021 - 12:00 PM UTC"
        );
        assert_eq!(
            format_timestamp("2021-04-21T12:00:00Z"),
            "21st April 2021 - 12:00 PM UTC"
        );
        assert_eq!(
            format_timestamp("2021-04-22T12:00:00Z"),
            "22nd April 2021 - 12:00 PM UTC"
        );
        assert_eq!(
            format_timestamp("2021-04-23T12:00:00Z"),
            "23rd April 2021 - 12:00 PM UTC"
        );
    }

    #[test]
    fn offset_timestamps_are_converted_to_utc() {
        assert_eq!(
            format_timestamp("2021-04-01T23:30:00+02:00"),
            "1st April 2021 - 9:30 PM UTC"
        );
    }

    #[test]
    fn naive_timestamps_are_taken_as_utc() {
        assert_eq!(
            format_timestamp("2021-04-01T21:30:00"),
            "1st April 2021 - 9:30 PM UTC"
        );
    }

    #[test]
    fn unparseable_input_passes_through() {
        assert_eq!(format_timestamp("not-a-date"), "not-a-date");
        assert_eq!(format_timestamp(""), "");
    }
}
