use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y年%m月%d日", "%Y%m%d"];

/// Parses the date formats found in meeting records and forms. Surrounding
/// whitespace is ignored; anything else must match exactly.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
}

pub fn japanese_weekday(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "月",
        Weekday::Tue => "火",
        Weekday::Wed => "水",
        Weekday::Thu => "木",
        Weekday::Fri => "金",
        Weekday::Sat => "土",
        Weekday::Sun => "日",
    }
}

/// `2025年10月6日（月）`
pub fn display_date(date: NaiveDate) -> String {
    format!(
        "{}年{}月{}日（{}）",
        date.year(),
        date.month(),
        date.day(),
        japanese_weekday(date.weekday())
    )
}

/// Re-renders a parseable date with [`display_date`]. Anything else, including
/// era-style dates, is returned unchanged.
pub fn normalize_date(input: &str) -> String {
    match parse_date(input) {
        Some(date) => display_date(date),
        None => input.to_string(),
    }
}

/// `YYYYMMDD`, used in document names.
pub fn day_stamp(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `YYYYMMDD_HHMMSS`, used in document names, archive names and storage keys.
pub fn timestamp(now: NaiveDateTime) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}
