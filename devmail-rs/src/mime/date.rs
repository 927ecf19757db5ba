use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

const FORMATS: [&str; 6] = [
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S",
];

const NAMED_ZONES: [(&str, &str); 10] = [
    ("GMT", "+0000"),
    ("UTC", "+0000"),
    ("UT", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
];

/// Parse a `Date:` header value, trying strict formats before lenient ones.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let cleaned = replace_named_zone(&strip_day_of_week(&strip_comment(trimmed)));
    for fmt in FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&cleaned, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    mail_parser_date(trimmed)
}

fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    use mail_parser::MessageParser;

    let wrapped = format!("Date: {input}\n\n");
    let parsed = MessageParser::default().parse(wrapped.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Drop a trailing `(PST)`-style comment.
fn strip_comment(s: &str) -> String {
    match s.find('(') {
        Some(pos) => s[..pos].trim().to_string(),
        None => s.to_string(),
    }
}

fn strip_day_of_week(s: &str) -> String {
    match s.split_once(',') {
        Some((day, rest)) if day.len() == 3 && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim().to_string()
        }
        _ => s.to_string(),
    }
}

fn replace_named_zone(s: &str) -> String {
    for (name, offset) in NAMED_ZONES {
        if let Some(head) = s.strip_suffix(name) {
            if head.ends_with(' ') {
                return format!("{}{}", head, offset);
            }
        }
    }
    s.to_string()
}
