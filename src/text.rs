//! Small text and date helpers shared by the notes, todos and editor modules.

use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use unicode_segmentation::UnicodeSegmentation;

pub const UNTITLED_NOTE: &str = "Untitled Note";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#x[0-9a-fA-F]+|[a-zA-Z]+);").expect("valid entity regex"));

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

pub fn timestamp(dt: OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.unix_timestamp().to_string())
}

pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

/// `Mar 5, 2025`
pub fn format_date(date: Date) -> String {
    date.format(format_description!(
        "[month repr:short] [day padding:none], [year]"
    ))
    .unwrap_or_default()
}

/// `09:30`
pub fn format_time(time: Time) -> String {
    time.format(format_description!("[hour]:[minute]"))
        .unwrap_or_default()
}

pub fn format_timestamp_date(raw: &str) -> String {
    parse_timestamp(raw)
        .map(|dt| format_date(dt.date()))
        .unwrap_or_default()
}

pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

pub fn parse_time(raw: &str) -> Option<Time> {
    let raw = raw.trim();
    Time::parse(raw, format_description!("[hour]:[minute]"))
        .or_else(|_| Time::parse(raw, format_description!("[hour]:[minute]:[second]")))
        .ok()
}

/// Combines a `YYYY-MM-DD` date and optional `HH:MM` time into an instant.
pub fn due_instant(date: &str, time: &str, offset: UtcOffset) -> Option<OffsetDateTime> {
    let date = parse_date(date)?;
    let time = if time.trim().is_empty() {
        Time::MIDNIGHT
    } else {
        parse_time(time)?
    };
    Some(PrimitiveDateTime::new(date, time).assume_offset(offset))
}

pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes.by_ref().take(max_chars).collect();
    if graphemes.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Plain text of a rich-text fragment: tags dropped, common entities decoded.
pub fn extract_text_from_html(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, "");
    ENTITY_RE
        .replace_all(&stripped, |caps: &regex::Captures<'_>| {
            decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(name: &str) -> Option<String> {
    if let Some(num) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(num, 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from);
    }
    if let Some(num) = name.strip_prefix('#') {
        return num
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from);
    }
    let decoded = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        _ => return None,
    };
    Some(decoded.to_string())
}

/// File name for an exported note: non alphanumerics become `_`, lowercased.
pub fn export_filename(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.txt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime, offset, time};

    #[test]
    fn extracts_text_and_decodes_entities() {
        let html = "<p>Fish &amp; <b>chips</b></p><div>&lt;3&#33;</div>";
        assert_eq!(extract_text_from_html(html), "Fish & chips<3!");
        assert_eq!(extract_text_from_html("&bogus; kept"), "&bogus; kept");
    }

    #[test]
    fn truncates_with_ellipsis_only_when_needed() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc...");
        assert_eq!(truncate_text("", 3), "");
    }

    #[test]
    fn counts_words_across_whitespace_runs() {
        assert_eq!(count_words("  one\ttwo \n three "), 3);
        assert_eq!(count_words(""), 0);
    }

    #[test]
    fn export_filename_replaces_symbols() {
        assert_eq!(export_filename("My Trip: Day 1!"), "my_trip__day_1_.txt");
        assert_eq!(export_filename("Café"), "caf_.txt");
    }

    #[test]
    fn formats_dates_and_times() {
        assert_eq!(format_date(date!(2025 - 03 - 05)), "Mar 5, 2025");
        assert_eq!(format_time(time!(9:05)), "09:05");
        assert_eq!(format_timestamp_date("2024-12-31T23:00:00Z"), "Dec 31, 2024");
        assert_eq!(format_timestamp_date("not a date"), "");
    }

    #[test]
    fn due_instant_defaults_to_midnight() {
        let due = due_instant("2025-04-01", "", offset!(+2)).expect("due");
        assert_eq!(due, datetime!(2025-04-01 0:00 +2));
        let due = due_instant("2025-04-01", "14:30", offset!(UTC)).expect("due");
        assert_eq!(due, datetime!(2025-04-01 14:30 UTC));
        assert!(due_instant("", "14:30", offset!(UTC)).is_none());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
    }
}
