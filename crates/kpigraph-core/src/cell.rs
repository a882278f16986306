//! Locale-aware numeric parsing of table cells.
//!
//! Financial tables mix European (`1.234,56`) and US (`1,234.56`) number
//! conventions, accounting negatives (`(123)`), currency glyphs, footnote
//! markers and magnitude suffixes. `parse_cell` maps all of these onto a
//! canonical `f64`, or `None` when the cell carries no number.
//!
//! Disambiguation rule: after removing spaces, text of the shape
//! `-?[digits.]*,d{1,4}` is European. Everything else is US.

use regex::Regex;
use std::sync::OnceLock;

/// Cell contents that mean "no value".
pub const NULL_MARKERS: &[&str] = &["", "–", "—", "-", "−", "x", "X", "n/a", "N/A"];

/// Characters normalised to an ASCII minus.
const MINUS_VARIANTS: &[char] = &['−', '–', '—'];

const CURRENCY_GLYPHS: &[char] = &['€', '$', '£', '¥'];

const SUFFIX_MULTIPLIERS: &[(char, f64)] = &[
    ('K', 1e3),
    ('M', 1e6),
    ('B', 1e9),
    ('T', 1e12),
];

fn european_decimal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?[\d.]*,\d{1,4}$").expect("european decimal pattern"))
}

fn footnote_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\^\d+\.?\d*").expect("footnote marker pattern"))
}

/// Parse a raw cell into a number.
///
/// Never fails: anything that does not reduce to a finite float is `None`.
pub fn parse_cell(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if NULL_MARKERS.contains(&trimmed) {
        return None;
    }

    let signed: String = trimmed
        .chars()
        .map(|c| if MINUS_VARIANTS.contains(&c) { '-' } else { c })
        .collect();

    let compact: String = signed.chars().filter(|c| !is_space(*c)).collect();
    let mut normalised = if european_decimal().is_match(&compact) {
        compact.replace('.', "").replace(',', ".")
    } else {
        compact.replace(',', "")
    };

    if normalised.len() > 2 && normalised.starts_with('(') && normalised.ends_with(')') {
        normalised = format!("-{}", &normalised[1..normalised.len() - 1]);
    }

    normalised.retain(|c| !CURRENCY_GLYPHS.contains(&c));
    let normalised = footnote_marker().replace_all(&normalised, "");
    let normalised = normalised.trim();

    if let Some(last) = normalised.chars().last() {
        let upper = last.to_ascii_uppercase();
        if let Some((_, multiplier)) = SUFFIX_MULTIPLIERS.iter().find(|(s, _)| *s == upper) {
            let head = &normalised[..normalised.len() - last.len_utf8()];
            if let Some(v) = parse_finite(head) {
                return Some(v * multiplier).filter(|v| v.is_finite());
            }
        }
    }

    parse_finite(normalised)
}

fn is_space(c: char) -> bool {
    c.is_whitespace() || c == '\u{a0}' || c == '\u{202f}'
}

fn parse_finite(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // `f64::from_str` accepts "inf"/"nan" spellings; cells never mean those.
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn european_decimals() {
        assert_relative_eq!(parse_cell("1,4864").unwrap(), 1.4864);
        assert_relative_eq!(parse_cell("1.234,56").unwrap(), 1234.56);
        assert_relative_eq!(parse_cell("1 234,5").unwrap(), 1234.5);
        assert_relative_eq!(parse_cell("−2,5").unwrap(), -2.5);
    }

    #[test]
    fn us_decimals_and_thousands() {
        assert_relative_eq!(parse_cell("1,234.56").unwrap(), 1234.56);
        assert_relative_eq!(parse_cell("12,345,678").unwrap(), 12_345_678.0);
        assert_relative_eq!(parse_cell("  42 ").unwrap(), 42.0);
        assert_relative_eq!(parse_cell("0.5").unwrap(), 0.5);
    }

    #[test]
    fn accounting_negatives_and_dashes() {
        assert_relative_eq!(parse_cell("(123)").unwrap(), -123.0);
        assert_relative_eq!(parse_cell("(1,234.5)").unwrap(), -1234.5);
        assert_relative_eq!(parse_cell("–7").unwrap(), -7.0);
        assert_relative_eq!(parse_cell("—0.25").unwrap(), -0.25);
    }

    #[test]
    fn null_markers_are_absent() {
        for marker in ["–", "—", "-", "", "   ", "x", "X", "n/a", "N/A"] {
            assert_eq!(parse_cell(marker), None, "marker {marker:?}");
        }
    }

    #[test]
    fn currency_and_footnotes_are_stripped() {
        assert_relative_eq!(parse_cell("€12.5").unwrap(), 12.5);
        assert_relative_eq!(parse_cell("$1,000").unwrap(), 1000.0);
        assert_relative_eq!(parse_cell("£3").unwrap(), 3.0);
        assert_relative_eq!(parse_cell("¥900").unwrap(), 900.0);
        assert_relative_eq!(parse_cell("17.3^1").unwrap(), 17.3);
        assert_relative_eq!(parse_cell("250^2.1").unwrap(), 250.0);
    }

    #[test]
    fn magnitude_suffixes() {
        assert_relative_eq!(parse_cell("5K").unwrap(), 5000.0);
        assert_relative_eq!(parse_cell("2.5m").unwrap(), 2_500_000.0);
        assert_relative_eq!(parse_cell("1B").unwrap(), 1e9);
        assert_relative_eq!(parse_cell("3t").unwrap(), 3e12);
        assert_eq!(parse_cell("K"), None);
    }

    #[test]
    fn garbage_is_absent_not_an_error() {
        assert_eq!(parse_cell("Revenue"), None);
        assert_eq!(parse_cell("12 apples"), None);
        assert_eq!(parse_cell("inf"), None);
        assert_eq!(parse_cell("NaN"), None);
        assert_eq!(parse_cell("()"), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        #[test]
        fn reparsing_display_is_stable(v in -1.0e12f64..1.0e12f64) {
            let first = parse_cell(&format!("{v}"));
            prop_assert_eq!(first, Some(v));
            let again = parse_cell(&format!("{}", first.unwrap()));
            prop_assert_eq!(again, first);
        }

        #[test]
        fn arbitrary_text_never_panics(s in "\\PC{0,24}") {
            let _ = parse_cell(&s);
        }

        #[test]
        fn parsed_values_are_finite(s in "[-−(]?[0-9.,  ]{0,12}[)KMBT]?") {
            if let Some(v) = parse_cell(&s) {
                prop_assert!(v.is_finite());
            }
        }
    }
}
