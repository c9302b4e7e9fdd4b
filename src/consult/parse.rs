// src/consult/parse.rs — Extract a candidate from free-form consult text

use regex::Regex;
use std::sync::OnceLock;

use crate::core::types::{Candidate, Domain};

fn integers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static pattern"))
}

/// Every integer in `text`, in order of appearance.
pub fn extract_integers(text: &str) -> Vec<u32> {
    integers()
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .collect()
}

/// First K distinct in-range values become the primaries; the secondary is
/// the first in-range value not among them, else the first in-range value.
/// Returns `None` on any shortfall.
pub fn parse_candidate(text: &str, domain: &Domain) -> Option<Candidate> {
    let values = extract_integers(text);

    let mut primary: Vec<u32> = Vec::with_capacity(domain.primary_count);
    for v in &values {
        if primary.len() == domain.primary_count {
            break;
        }
        if domain.contains_primary(*v) && !primary.contains(v) {
            primary.push(*v);
        }
    }
    if primary.len() < domain.primary_count {
        return None;
    }

    let in_range = || values.iter().copied().filter(|v| domain.contains_secondary(*v));
    let secondary = in_range()
        .find(|v| !primary.contains(v))
        .or_else(|| in_range().next())?;

    Candidate::new(primary, secondary, domain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_list() {
        let d = Domain::default();
        let c = parse_candidate("Red: 3, 8, 15, 21, 27, 33. Blue: 9", &d).unwrap();
        assert_eq!(c.primary(), &[3, 8, 15, 21, 27, 33]);
        assert_eq!(c.secondary(), 9);
    }

    #[test]
    fn test_parse_skips_duplicates_and_out_of_range() {
        let d = Domain::default();
        let c = parse_candidate("2024 1 1 2 40 3 4 5 6 16", &d).unwrap();
        assert_eq!(c.primary(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(c.secondary(), 16);
    }

    #[test]
    fn test_secondary_prefers_value_outside_primaries() {
        let d = Domain::default();
        let c = parse_candidate("1 2 3 4 5 6 12", &d).unwrap();
        assert_eq!(c.secondary(), 12);
    }

    #[test]
    fn test_secondary_falls_back_to_first_valid() {
        let d = Domain::default();
        let c = parse_candidate("1 2 3 4 5 6", &d).unwrap();
        assert_eq!(c.secondary(), 1);
    }

    #[test]
    fn test_shortfall_is_none() {
        let d = Domain::default();
        assert!(parse_candidate("1 2 3 four five", &d).is_none());
        assert!(parse_candidate("", &d).is_none());
        assert!(parse_candidate("20 21 22 23 24 25", &d).is_none());
    }
}
