//! Profile store: parsing and deterministic lookup.
//!
//! The profile is a human-editable YAML document (JSON also parses, being a
//! YAML subset) with well-known top-level keys: `personal_information` plus
//! arrays and maps for `experiences`, `education`, `skills`, `languages`,
//! `certifications`, `projects`, `interests`. Unknown keys are preserved and
//! indexed but never direct-matched.
//!
//! The profile is immutable for the life of an answering session; reloading
//! it rebuilds the index and clears the classification cache.

use serde_yaml::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed profile document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Profile root must be a mapping")]
    NotAMapping,
}

/// Question phrase banks for deterministic intent detection, English and
/// German forms side by side. Matching is case-insensitive substring.
const EMAIL_PHRASES: &[&str] = &["email", "e-mail"];
const PHONE_PHRASES: &[&str] = &["phone", "mobile", "telefon", "handynummer"];
const FIRST_NAME_PHRASES: &[&str] = &["first name", "given name", "vorname"];
const LAST_NAME_PHRASES: &[&str] = &["last name", "surname", "family name", "nachname"];

/// Parsed, immutable profile document.
#[derive(Debug, Clone)]
pub struct Profile {
    root: Value,
}

impl Profile {
    pub fn parse(text: &str) -> Result<Self, ProfileError> {
        let root: Value = serde_yaml::from_str(text)?;
        if !root.is_mapping() {
            return Err(ProfileError::NotAMapping);
        }
        Ok(Self { root })
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Direct dotted-path read, e.g. `personal_information.phone` or
    /// `experiences[2].employment_period`. Returns `None` when the path does
    /// not resolve to a scalar (or a flat scalar list, joined with ", ").
    pub fn lookup(&self, key: &str) -> Option<String> {
        let mut current = &self.root;
        for segment in key.split('.') {
            let (name, indices) = parse_segment(segment)?;
            if !name.is_empty() {
                current = current.get(name)?;
            }
            for idx in indices {
                current = current.get(idx)?;
            }
        }
        scalar_text(current)
    }

    fn personal(&self, field: &str) -> Option<String> {
        self.lookup(&format!("personal_information.{field}"))
    }

    pub fn email(&self) -> Option<String> {
        self.personal("email")
    }

    /// `phone_prefix + phone` concatenated when both are present, otherwise
    /// whichever half exists.
    pub fn phone(&self) -> Option<String> {
        let prefix = self.personal("phone_prefix");
        let number = self.personal("phone");
        match (prefix, number) {
            (Some(p), Some(n)) => Some(format!("{p}{n}")),
            (None, Some(n)) => Some(n),
            (Some(p), None) => Some(p),
            (None, None) => None,
        }
    }

    pub fn first_name(&self) -> Option<String> {
        self.personal("name")
    }

    pub fn last_name(&self) -> Option<String> {
        self.personal("surname")
    }

    pub fn country(&self) -> Option<String> {
        self.personal("country")
    }

    /// `salary` and `desired_salary` are aliases; `salary` wins when both exist.
    pub fn salary(&self) -> Option<String> {
        self.personal("salary")
            .or_else(|| self.personal("desired_salary"))
    }

    /// Deterministic intent detection for a fixed set of personal-information
    /// questions. Country questions containing "code" are not direct-matched:
    /// those are country-code selectors, resolved by the option matcher.
    pub fn direct_match(&self, question: &str) -> Option<String> {
        let q = question.to_lowercase();

        if contains_any(&q, EMAIL_PHRASES) {
            return self.email();
        }
        if contains_any(&q, PHONE_PHRASES) {
            return self.phone();
        }
        if contains_any(&q, FIRST_NAME_PHRASES) {
            return self.first_name();
        }
        if contains_any(&q, LAST_NAME_PHRASES) {
            return self.last_name();
        }
        if is_country_question(&q) && !q.contains("code") {
            return self.country();
        }

        None
    }
}

/// Country intent: "country" anywhere, or a German word starting with "Land"
/// ("Land", "Landesvorwahl"). A bare substring test would misfire on place
/// names like "Deutschland" inside unrelated questions.
fn is_country_question(q: &str) -> bool {
    if q.contains("country") {
        return true;
    }
    q.split(|c: char| !c.is_alphanumeric())
        .any(|w| w.starts_with("land"))
}

fn contains_any(haystack: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| haystack.contains(p))
}

/// Split a path segment into its name and trailing `[i]` indices.
/// `experiences[2]` → `("experiences", [2])`.
fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    match segment.find('[') {
        None => Some((segment, Vec::new())),
        Some(pos) => {
            let name = &segment[..pos];
            let mut indices = Vec::new();
            let mut rest = &segment[pos..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                indices.push(stripped[..close].parse().ok()?);
                rest = &stripped[close + 1..];
            }
            if rest.is_empty() {
                Some((name, indices))
            } else {
                None
            }
        }
    }
}

/// Render a scalar (or flat scalar list) as text.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
            if parts.is_empty() || parts.len() != items.len() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        _ => None,
    }
}
