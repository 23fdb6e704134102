//! Option coercion: force a free-form answer into exactly one allowed choice.
//!
//! Matching is deterministic and total: when nothing reasonable matches,
//! the second option wins (the first is frequently a "please select"
//! placeholder), so a result is always produced and never surfaced as an
//! error.

/// Country hint table: English name, German name, dial code. Used to match
/// answers like "Germany" against options like "Deutschland (+49)".
const COUNTRY_HINTS: &[(&str, &str, &str)] = &[
    ("germany", "deutschland", "+49"),
    ("austria", "österreich", "+43"),
    ("switzerland", "schweiz", "+41"),
    ("france", "frankreich", "+33"),
    ("netherlands", "niederlande", "+31"),
    ("belgium", "belgien", "+32"),
    ("spain", "spanien", "+34"),
    ("italy", "italien", "+39"),
    ("poland", "polen", "+48"),
    ("united kingdom", "vereinigtes königreich", "+44"),
    ("united states", "vereinigte staaten", "+1"),
];

/// Score threshold below which containment matches are rejected.
const MIN_SCORE: f64 = 0.5;

/// Coerce `candidate` to exactly one of `options`.
///
/// 1. Exact case-insensitive match.
/// 2. Country hint (name in either locale, or a dial-code substring).
/// 3. Bidirectional substring containment, scored `min_len / max_len`,
///    best score wins, ties by lowest index.
/// 4. Scores at or below 0.5 fall through to the default.
/// 5. Default: second option when present, else the first.
pub fn match_option(candidate: &str, options: &[String]) -> String {
    let Some(first) = options.first() else {
        return candidate.to_string();
    };

    let trimmed = candidate.trim();
    let lower = trimmed.to_lowercase();

    // 1. Exact, case-insensitive.
    if !lower.is_empty() {
        for option in options {
            if option.trim().to_lowercase() == lower {
                return option.clone();
            }
        }

        // 2. Country hint.
        if let Some(country) = country_of(&lower) {
            for option in options {
                if country_of(&option.to_lowercase()) == Some(country) {
                    return option.clone();
                }
            }
        }

        // 3. Bidirectional containment with length-ratio scoring.
        let mut best: Option<(f64, usize)> = None;
        for (i, option) in options.iter().enumerate() {
            let o = option.trim().to_lowercase();
            if o.is_empty() {
                continue;
            }
            if lower.contains(&o) || o.contains(&lower) {
                let score = lower.len().min(o.len()) as f64 / lower.len().max(o.len()) as f64;
                if best.map(|(s, _)| score > s).unwrap_or(true) {
                    best = Some((score, i));
                }
            }
        }
        if let Some((score, i)) = best {
            if score > MIN_SCORE {
                return options[i].clone();
            }
        }
    }

    // 5. Placeholder-avoiding default.
    options.get(1).unwrap_or(first).clone()
}

/// Identify a country mentioned in lowercased text, by localised name or by
/// dial code. Dial codes only count at a digit boundary so `+1` cannot fire
/// inside `+49`.
fn country_of(text: &str) -> Option<usize> {
    for (i, (en, de, _)) in COUNTRY_HINTS.iter().enumerate() {
        if text.contains(en) || text.contains(de) {
            return Some(i);
        }
    }
    for (i, (_, _, dial)) in COUNTRY_HINTS.iter().enumerate() {
        let mut search = text;
        while let Some(pos) = search.find(dial) {
            let after = &search[pos + dial.len()..];
            if !after.starts_with(|c: char| c.is_ascii_digit()) {
                return Some(i);
            }
            search = &search[pos + dial.len()..];
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_case_insensitive() {
        let options = opts(&["Yes", "No"]);
        assert_eq!(match_option("yes", &options), "Yes");
        assert_eq!(match_option("  NO  ", &options), "No");
    }

    #[test]
    fn test_country_hint_across_locales() {
        let options = opts(&[
            "Option auswählen",
            "Deutschland (+49)",
            "Frankreich (+33)",
        ]);
        assert_eq!(match_option("Germany", &options), "Deutschland (+49)");
        assert_eq!(match_option("France", &options), "Frankreich (+33)");
    }

    #[test]
    fn test_country_hint_via_dial_code() {
        let options = opts(&["Select one", "Deutschland (+49)", "United States (+1)"]);
        assert_eq!(match_option("my prefix is +49", &options), "Deutschland (+49)");
        // +1 must not fire inside +49.
        assert_eq!(match_option("+1", &options), "United States (+1)");
    }

    #[test]
    fn test_containment_best_score_wins() {
        let options = opts(&["1-2 years", "5+ years", "10+ years"]);
        assert_eq!(match_option("5 years", &options), "5+ years");
    }

    #[test]
    fn test_low_score_falls_through_to_default() {
        // "ja" is contained in the long option but the length ratio is tiny.
        let options = opts(&["Ja, ich bin berechtigt in Deutschland zu arbeiten", "Nein"]);
        assert_eq!(match_option("ja", &options), "Nein");
    }

    #[test]
    fn test_default_avoids_placeholder_first_option() {
        let options = opts(&["Please select", "Yes", "No"]);
        assert_eq!(match_option("totally unrelated", &options), "Yes");
    }

    #[test]
    fn test_default_single_option() {
        let options = opts(&["Only choice"]);
        assert_eq!(match_option("whatever", &options), "Only choice");
    }

    #[test]
    fn test_empty_candidate_defaults() {
        let options = opts(&["Select", "Second"]);
        assert_eq!(match_option("", &options), "Second");
    }

    #[test]
    fn test_equal_scores_break_by_lowest_index() {
        // Both options contain the candidate at the same length ratio.
        let options = opts(&["remote ok", "remote no"]);
        assert_eq!(match_option("remote", &options), "remote ok");
    }

    #[test]
    fn test_result_always_element_of_options() {
        let options = opts(&["A", "B", "C"]);
        for candidate in ["A", "b", "zzz", "", "AB"] {
            let result = match_option(candidate, &options);
            assert!(options.contains(&result), "{result} not in options");
        }
    }
}
