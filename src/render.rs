//! Context-aware profile field renderer.
//!
//! Flattens the nested profile document into the flat `(key, text)` entries
//! the embedding index ingests. Keys are dotted paths with index suffixes so
//! provenance survives retrieval. Text rendering is field-aware: fields a
//! form is likely to ask about in several ways (salary, phone, location) are
//! expanded with paraphrased labels so the query embedding lands near them.
//!
//! Every scalar leaf appears as exactly one entry; scalar arrays become one
//! aggregate entry; arrays of mappings contribute one entry per scalar
//! subfield plus one aggregate entry per element.

use serde_yaml::Value;

use crate::models::FieldEntry;
use crate::profile::{scalar_text, Profile};

/// Paraphrased label banks keyed by the final path segment.
const PARAPHRASES: &[(&str, &str)] = &[
    ("salary", "Expected salary / Desired compensation / Annual salary"),
    (
        "desired_salary",
        "Expected salary / Desired compensation / Annual salary",
    ),
    ("phone", "Phone number / Mobile number / Telefonnummer"),
    (
        "phone_prefix",
        "Phone country prefix / Dial code / Landesvorwahl",
    ),
    ("email", "Email address / E-Mail"),
    ("city", "City / Location / Wohnort"),
    ("country", "Country of residence / Land"),
    (
        "citizenship",
        "Citizenship / Nationality / Staatsangehörigkeit",
    ),
    (
        "visa_required",
        "Visa sponsorship required / Work permit needed",
    ),
];

/// Flatten the profile into renderer entries, vectors unset.
pub fn render_profile(profile: &Profile) -> Vec<FieldEntry> {
    let mut entries = Vec::new();
    if let Value::Mapping(map) = profile.root() {
        for (k, v) in map {
            if let Some(name) = k.as_str() {
                render_value(name, v, &mut entries);
            }
        }
    }
    entries
}

fn render_value(key: &str, value: &Value, out: &mut Vec<FieldEntry>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                if let Some(name) = k.as_str() {
                    render_value(&format!("{key}.{name}"), v, out);
                }
            }
        }
        Value::Sequence(items) => {
            if items.iter().all(|i| !i.is_mapping()) {
                // Scalar array: a single aggregate entry.
                if let Some(joined) = scalar_text(value) {
                    push_entry(key, &joined, out);
                }
            } else {
                for (i, item) in items.iter().enumerate() {
                    let elem_key = format!("{key}[{i}]");
                    render_value(&elem_key, item, out);
                    if let Some(summary) = summarize_mapping(item) {
                        out.push(FieldEntry {
                            key: elem_key,
                            text: summary,
                            vector: None,
                        });
                    }
                }
            }
        }
        _ => {
            if let Some(text) = scalar_text(value) {
                push_entry(key, &text, out);
            }
        }
    }
}

fn push_entry(key: &str, raw: &str, out: &mut Vec<FieldEntry>) {
    out.push(FieldEntry {
        key: key.to_string(),
        text: render_text(key, raw),
        vector: None,
    });
}

/// One-line summary of a mapping element, `field: value` pairs joined with ". ".
fn summarize_mapping(value: &Value) -> Option<String> {
    let map = value.as_mapping()?;
    let parts: Vec<String> = map
        .iter()
        .filter_map(|(k, v)| {
            let name = k.as_str()?;
            let text = scalar_text(v)?;
            Some(format!("{}: {}", humanize(name), text))
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(". "))
    }
}

/// Field-aware rendering: paraphrase bank label when the final segment has
/// one, humanised key otherwise.
fn render_text(key: &str, raw: &str) -> String {
    let leaf = key
        .rsplit('.')
        .next()
        .unwrap_or(key)
        .trim_end_matches(|c: char| c == ']' || c.is_ascii_digit() || c == '[');

    for (field, label) in PARAPHRASES {
        if leaf.eq_ignore_ascii_case(field) {
            return format!("{label}: {raw}");
        }
    }
    format!("{}: {}", humanize(leaf), raw)
}

fn humanize(field: &str) -> String {
    field.replace('_', " ")
}
