//! Field predicates used to validate compound sub-field values.
//!
//! Predicates decide both whether a split fragment can stand as a given
//! schema field and where merge boundaries fall when an embedded delimiter
//! broke a cell apart. They are looked up by schema field name through a
//! [`PredicateRegistry`] so new compound schemas only need new registrations.

use std::{collections::HashMap, sync::OnceLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M",
    "%d/%b/%y %I:%M %p",
    "%d/%b/%Y %I:%M %p",
    "%d/%b/%y %H:%M",
    "%d/%b/%Y %H:%M",
    "%d/%b/%y %I:%M:%S %p",
    "%b %d, %Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d/%b/%y",
    "%d/%b/%Y",
];

fn filename_regex() -> &'static Regex {
    static FILENAME: OnceLock<Regex> = OnceLock::new();
    FILENAME.get_or_init(|| Regex::new(r"^.*\.\w+$").expect("filename pattern compiles"))
}

fn location_regex() -> &'static Regex {
    static LOCATION: OnceLock<Regex> = OnceLock::new();
    LOCATION.get_or_init(|| Regex::new(r"^(http|file).*\.\w+$").expect("location pattern compiles"))
}

/// Permissive date/time test. Underscores are read as spaces so values that
/// were previously rewritten into a file-safe form still validate.
pub fn looks_like_datetime(value: &str) -> bool {
    let candidate = value.trim().replace('_', " ");
    if candidate.is_empty() {
        return false;
    }
    if DateTime::parse_from_rfc3339(&candidate).is_ok()
        || DateTime::parse_from_str(&candidate, "%Y-%m-%dT%H:%M:%S%.f%z").is_ok()
    {
        return true;
    }
    DATETIME_FORMATS
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(&candidate, fmt).is_ok())
        || DATE_FORMATS
            .iter()
            .any(|fmt| NaiveDate::parse_from_str(&candidate, fmt).is_ok())
}

/// Usernames carry no whitespace and no delimiter. Blank usernames and bare
/// numeric account ids are accepted; resolving them is left to the target system.
///
/// Jira itself only refuses leading whitespace. Inner spaces are refused here
/// too, so a display name such as `Jane Doe` is flagged as suspect and a cell
/// carrying one never auto-merges.
pub fn looks_like_username(value: &str) -> bool {
    !value.contains(|c: char| c.is_whitespace() || c == ';')
}

pub fn looks_like_filename(value: &str) -> bool {
    filename_regex().is_match(value)
}

pub fn looks_like_location(value: &str) -> bool {
    location_regex().is_match(value)
}

pub fn looks_like_integer(value: &str) -> bool {
    value.trim().parse::<i64>().is_ok()
}

pub fn looks_like_boolean(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "1" | "0"
    )
}

pub fn is_non_empty(value: &str) -> bool {
    !value.trim().is_empty()
}

fn any_value(_: &str) -> bool {
    true
}

#[derive(Debug, Clone, Copy)]
pub struct Predicate {
    name: &'static str,
    test: fn(&str) -> bool,
    mergeable: bool,
    percent_encoded: bool,
}

impl Predicate {
    pub const DATETIME: Predicate =
        Predicate::new("datetime", looks_like_datetime).unmergeable();
    pub const USERNAME: Predicate =
        Predicate::new("username", looks_like_username).unmergeable();
    pub const FILENAME: Predicate = Predicate::new("filename", looks_like_filename);
    pub const LOCATION: Predicate =
        Predicate::new("location", looks_like_location).percent_encoded();
    pub const INTEGER: Predicate = Predicate::new("integer", looks_like_integer).unmergeable();
    pub const BOOLEAN: Predicate = Predicate::new("boolean", looks_like_boolean).unmergeable();
    pub const NON_EMPTY: Predicate = Predicate::new("non-empty", is_non_empty);
    pub const TEXT: Predicate = Predicate::new("text", any_value);

    pub const fn new(name: &'static str, test: fn(&str) -> bool) -> Self {
        Self {
            name,
            test,
            mergeable: true,
            percent_encoded: false,
        }
    }

    /// Marks fields that must come from a single fragment.
    pub const fn unmergeable(self) -> Self {
        Self {
            mergeable: false,
            ..self
        }
    }

    /// Marks URL-valued fields: `%3b` in them is left as-is when decoding.
    pub const fn percent_encoded(self) -> Self {
        Self {
            percent_encoded: true,
            ..self
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mergeable(&self) -> bool {
        self.mergeable
    }

    pub fn is_percent_encoded(&self) -> bool {
        self.percent_encoded
    }

    pub fn accepts(&self, value: &str) -> bool {
        (self.test)(value)
    }
}

/// Predicates keyed by schema field name. Unknown field names fall back to
/// free text, which accepts anything.
#[derive(Debug, Clone)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Predicate>,
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl PredicateRegistry {
    pub fn empty() -> Self {
        Self {
            predicates: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("datetime", Predicate::DATETIME);
        registry.register("username", Predicate::USERNAME);
        registry.register("filename", Predicate::FILENAME);
        registry.register("location", Predicate::LOCATION);
        registry.register("seconds", Predicate::INTEGER);
        registry.register("checked", Predicate::BOOLEAN);
        registry
    }

    pub fn register(&mut self, field: &str, predicate: Predicate) -> &mut Self {
        self.predicates.insert(field.to_ascii_lowercase(), predicate);
        self
    }

    pub fn get(&self, field: &str) -> Predicate {
        self.predicates
            .get(&field.to_ascii_lowercase())
            .copied()
            .unwrap_or(Predicate::TEXT)
    }

    pub fn accepts(&self, field: &str, value: &str) -> bool {
        self.get(field).accepts(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_accepts_common_export_formats() {
        assert!(looks_like_datetime("2024-01-01 10:00"));
        assert!(looks_like_datetime("2024-01-01T10:00:00.000+0000"));
        assert!(looks_like_datetime("01/Jan/24 10:00 AM"));
        assert!(looks_like_datetime("2024-01-01_10:00"));
        assert!(looks_like_datetime("2024-01-01"));
        assert!(!looks_like_datetime("Fixed the bug"));
        assert!(!looks_like_datetime(""));
        assert!(!looks_like_datetime("2024-01-01 10:00;jdoe"));
    }

    #[test]
    fn username_rejects_whitespace_and_delimiters() {
        assert!(looks_like_username("jdoe"));
        assert!(looks_like_username("557058:1234"));
        assert!(looks_like_username("42"));
        assert!(looks_like_username(""));
        assert!(!looks_like_username(" added tests"));
        assert!(!looks_like_username("jdoe;Fixed"));
        assert!(!looks_like_username("Jane Doe"));
    }

    #[test]
    fn filename_and_location_patterns() {
        assert!(looks_like_filename("report.pdf"));
        assert!(looks_like_filename("my;file.txt"));
        assert!(!looks_like_filename("README"));
        assert!(looks_like_location(
            "https://jira.example.com/secure/attachment/10/report.pdf"
        ));
        assert!(looks_like_location("file://share/attachments/report.pdf"));
        assert!(!looks_like_location("report.pdf"));
    }

    #[test]
    fn registry_falls_back_to_text() {
        let registry = PredicateRegistry::standard();
        assert_eq!(registry.get("comment").name(), "text");
        assert!(registry.accepts("comment", ""));
        assert!(registry.accepts("Seconds", "3600"));
        assert!(!registry.accepts("seconds", "an hour"));
        assert!(!registry.get("checked").mergeable());
    }

    #[test]
    fn delimiter_free_fields_are_unmergeable() {
        let registry = PredicateRegistry::standard();
        for field in ["datetime", "username", "seconds", "checked"] {
            assert!(!registry.get(field).mergeable(), "{field}");
        }
        for field in ["comment", "filename", "location"] {
            assert!(registry.get(field).mergeable(), "{field}");
        }
        assert!(registry.get("location").is_percent_encoded());
        assert!(!registry.get("filename").is_percent_encoded());
    }

    #[test]
    fn registry_accepts_custom_predicates() {
        fn ticket(value: &str) -> bool {
            value.starts_with("TICKET-")
        }
        let mut registry = PredicateRegistry::standard();
        registry.register("ticket", Predicate::new("ticket", ticket));
        assert!(registry.accepts("ticket", "TICKET-1"));
        assert!(!registry.accepts("ticket", "jdoe"));
    }
}
