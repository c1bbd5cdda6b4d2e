use lazy_static::lazy_static;
use regex::Regex;

use crate::models::RateSnapshot;
use crate::utils::config::DisplayConfig;
use crate::utils::format::{format_btc, format_sats};

lazy_static! {
    /// Currency marker before the number: "$25", "US$ 1.5k", "USD 3 million"
    static ref SYMBOL_FIRST: Regex = Regex::new(
        r"(?i)(?P<symbol>US\$|\$|\bUSD)(?P<gap>\s?)(?P<number>\d{1,3}(?:,\d{3})+|\d+)(?P<decimal>\.\d+)?(?:\s?(?P<suffix>thousand|million|billion|trillion|k|m|b|t)\b)?"
    )
    .expect("valid symbol-first pattern");

    /// Number before the currency marker: "25 USD", "3.5 million dollars", "10$"
    static ref SYMBOL_LAST: Regex = Regex::new(
        r"(?i)(?P<number>\b\d{1,3}(?:,\d{3})+|\b\d+)(?P<decimal>\.\d+)?(?:\s?(?P<suffix>thousand|million|billion|trillion|k|m|b|t)\b)?(?P<gap>\s?)(?P<symbol>USD\b|dollars?\b|\$)"
    )
    .expect("valid symbol-last pattern");
}

/// Bare four-digit values in this range read as calendar years
const YEAR_RANGE: std::ops::RangeInclusive<u32> = 1900..=2100;

/// A fiat amount found in text, as byte offsets into the scanned string
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyMatch {
    pub start: usize,
    pub end: usize,
    pub amount: f64,
}

/// Crypto equivalent of a fiat amount
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Equivalent {
    Btc(f64),
    Sats(f64),
}

impl Equivalent {
    /// Whole bitcoin at or above one coin's fiat value, satoshis below it
    pub fn for_amount(amount_usd: f64, snapshot: &RateSnapshot) -> Self {
        if amount_usd >= snapshot.usd_rate() {
            Equivalent::Btc(amount_usd / snapshot.usd_rate())
        } else {
            Equivalent::Sats(amount_usd / snapshot.satoshi_rate())
        }
    }

    pub fn display(&self, config: &DisplayConfig) -> String {
        match self {
            Equivalent::Btc(btc) => format_btc(*btc, config.btc_decimals),
            Equivalent::Sats(sats) => format_sats(*sats),
        }
    }
}

/// Multiplier for a magnitude suffix; full words and letters alike
pub fn suffix_multiplier(suffix: &str) -> Option<f64> {
    match suffix.to_lowercase().as_str() {
        "k" | "thousand" => Some(1e3),
        "m" | "million" => Some(1e6),
        "b" | "billion" => Some(1e9),
        "t" | "trillion" => Some(1e12),
        _ => None,
    }
}

/// Numeric pieces of one pattern match
struct RawAmount<'t> {
    number: &'t str,
    decimal: Option<&'t str>,
    suffix: Option<&'t str>,
    /// `$` written directly against the digits, as in "$2024"
    symbol_attached: bool,
}

/// Turn one pattern match into an amount, or None when it should be skipped
fn parse_amount(raw: &RawAmount) -> Option<f64> {
    let has_separator = raw.number.contains(',');
    if !has_separator
        && raw.decimal.is_none()
        && raw.suffix.is_none()
        && !raw.symbol_attached
        && raw.number.len() == 4
    {
        if let Ok(value) = raw.number.parse::<u32>() {
            if YEAR_RANGE.contains(&value) {
                return None;
            }
        }
    }

    let mut digits = raw.number.replace(',', "");
    if let Some(decimal) = raw.decimal {
        digits.push_str(decimal);
    }
    let base: f64 = digits.parse().ok()?;
    let multiplier = match raw.suffix {
        Some(suffix) => suffix_multiplier(suffix)?,
        None => 1.0,
    };

    let amount = base * multiplier;
    if !amount.is_finite() || amount <= 0.0 {
        return None;
    }
    Some(amount)
}

/// A one-letter suffix only counts when it ends the word: "$5 T-shirt" and
/// "$5 k's" are five dollars
fn letter_suffix_stands_alone(text: &str, suffix_end: usize) -> bool {
    !matches!(text[suffix_end..].chars().next(), Some('-') | Some('\'') | Some('\u{2019}'))
}

/// `$` followed by a number belongs to that number, not to the one before it
fn dollar_opens_next_amount(text: &str, symbol_end: usize) -> bool {
    let rest = text[symbol_end..].trim_start_matches(|c: char| c == ' ' || c == '\u{a0}');
    rest.starts_with(|c: char| c.is_ascii_digit())
}

/// A match plus where its digits start, used to tell whether two
/// overlapping matches describe the same number
struct Candidate {
    found: CurrencyMatch,
    number_start: usize,
}

fn symbol_first_candidates(text: &str, out: &mut Vec<Candidate>) {
    for caps in SYMBOL_FIRST.captures_iter(text) {
        let (whole, number) = match (caps.get(0), caps.name("number")) {
            (Some(whole), Some(number)) => (whole, number),
            _ => continue,
        };
        let symbol = caps.name("symbol").map(|m| m.as_str()).unwrap_or_default();
        let gap = caps.name("gap").map(|m| m.as_str()).unwrap_or_default();

        // "10$ 20$": this `$` closes the amount before it
        if symbol == "$" && !gap.is_empty() && text[..whole.start()].ends_with(|c: char| c.is_ascii_digit()) {
            continue;
        }

        let decimal = caps.name("decimal");
        let mut suffix = caps.name("suffix");
        let mut end = whole.end();
        if let Some(m) = suffix {
            if m.as_str().len() == 1 && !letter_suffix_stands_alone(text, m.end()) {
                suffix = None;
                end = decimal.map(|d| d.end()).unwrap_or(number.end());
            }
        }

        let raw = RawAmount {
            number: number.as_str(),
            decimal: decimal.map(|m| m.as_str()),
            suffix: suffix.map(|m| m.as_str()),
            symbol_attached: symbol.ends_with('$') && gap.is_empty(),
        };
        if let Some(amount) = parse_amount(&raw) {
            out.push(Candidate {
                found: CurrencyMatch {
                    start: whole.start(),
                    end,
                    amount,
                },
                number_start: number.start(),
            });
        }
    }
}

fn symbol_last_candidates(text: &str, out: &mut Vec<Candidate>) {
    for caps in SYMBOL_LAST.captures_iter(text) {
        let (whole, number, symbol) = match (caps.get(0), caps.name("number"), caps.name("symbol")) {
            (Some(whole), Some(number), Some(symbol)) => (whole, number, symbol),
            _ => continue,
        };
        let gap = caps.name("gap").map(|m| m.as_str()).unwrap_or_default();

        // "$19.99 $14.99": the second `$` opens the next price
        if symbol.as_str() == "$" && !gap.is_empty() && dollar_opens_next_amount(text, symbol.end()) {
            continue;
        }

        let raw = RawAmount {
            number: number.as_str(),
            decimal: caps.name("decimal").map(|m| m.as_str()),
            suffix: caps.name("suffix").map(|m| m.as_str()),
            symbol_attached: false,
        };
        if let Some(amount) = parse_amount(&raw) {
            out.push(Candidate {
                found: CurrencyMatch {
                    start: whole.start(),
                    end: whole.end(),
                    amount,
                },
                number_start: number.start(),
            });
        }
    }
}

/// Every fiat amount in `text`, in order, without overlaps.
///
/// Both orderings are scanned. A symbol-first and a symbol-last match over
/// the same number ("$5 USD") merge into one span; any other overlap keeps
/// the earlier match.
pub fn find_amounts(text: &str) -> Vec<CurrencyMatch> {
    let mut candidates = Vec::new();
    symbol_first_candidates(text, &mut candidates);
    symbol_last_candidates(text, &mut candidates);

    candidates.sort_by(|a, b| {
        a.found
            .start
            .cmp(&b.found.start)
            .then(b.found.end.cmp(&a.found.end))
    });

    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match merged.last_mut() {
            Some(last) if candidate.found.start < last.found.end => {
                if candidate.number_start == last.number_start {
                    last.found.end = last.found.end.max(candidate.found.end);
                }
            }
            _ => merged.push(candidate),
        }
    }
    merged.into_iter().map(|c| c.found).collect()
}

/// Annotated copy of `text`, or None when nothing in it was converted.
///
/// Each amount keeps its original text and gains " (<equivalent>)" right
/// after it.
pub fn annotate_text(text: &str, snapshot: &RateSnapshot, config: &DisplayConfig) -> Option<String> {
    let matches = find_amounts(text);
    if matches.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(text.len() + matches.len() * 16);
    let mut cursor = 0;
    for found in &matches {
        out.push_str(&text[cursor..found.end]);
        let equivalent = Equivalent::for_amount(found.amount, snapshot);
        out.push_str(" (");
        out.push_str(&equivalent.display(config));
        out.push(')');
        cursor = found.end;
    }
    out.push_str(&text[cursor..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::format::parse_display_figure;
    use chrono::Utc;

    fn rate(usd: f64) -> RateSnapshot {
        RateSnapshot::new(usd, Utc::now(), "test").unwrap()
    }

    fn amounts(text: &str) -> Vec<f64> {
        find_amounts(text).into_iter().map(|m| m.amount).collect()
    }

    #[test]
    fn test_whole_coin_amount_uses_btc() {
        let display = DisplayConfig::default();
        let out = annotate_text("$60000", &rate(50_000.0), &display).unwrap();
        assert_eq!(out, "$60000 (1.2 BTC)");
    }

    #[test]
    fn test_small_amount_uses_sats() {
        let display = DisplayConfig::default();
        let out = annotate_text("$25", &rate(50_000.0), &display).unwrap();
        assert_eq!(out, "$25 (50,000 sats)");
    }

    #[test]
    fn test_bare_year_is_ignored() {
        assert!(annotate_text("2027", &rate(50_000.0), &DisplayConfig::default()).is_none());
        assert!(find_amounts("back in 2019 dollars were worth more").is_empty());
        assert!(find_amounts("USD 2024").is_empty());
    }

    #[test]
    fn test_year_like_prices_with_markers_still_count() {
        assert_eq!(amounts("$2024"), vec![2024.0]);
        assert_eq!(amounts("2,024 USD"), vec![2024.0]);
        assert_eq!(amounts("2024.50 USD"), vec![2024.5]);
        assert_eq!(amounts("3500 dollars"), vec![3500.0]);
    }

    #[test]
    fn test_separators_and_decimals() {
        assert_eq!(amounts("only $1,234,567.89 today"), vec![1_234_567.89]);
        assert_eq!(amounts("$0.99"), vec![0.99]);
    }

    #[test]
    fn test_magnitude_suffixes() {
        assert_eq!(amounts("$5k"), vec![5e3]);
        assert_eq!(amounts("$2.5M"), vec![2.5e6]);
        assert_eq!(amounts("$3 billion"), vec![3e9]);
        assert_eq!(amounts("$1 Trillion"), vec![1e12]);
        assert_eq!(amounts("4 million dollars"), vec![4e6]);
    }

    #[test]
    fn test_full_word_beats_letter() {
        let found = find_amounts("raised $3 million in funding");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].amount, 3e6);
        assert_eq!(&"raised $3 million in funding"[found[0].start..found[0].end], "$3 million");
    }

    #[test]
    fn test_suffix_needs_word_boundary() {
        assert_eq!(amounts("$5 more"), vec![5.0]);
        assert_eq!(amounts("$5 km"), vec![5.0]);
    }

    #[test]
    fn test_symbol_last_forms() {
        assert_eq!(amounts("costs 25 USD"), vec![25.0]);
        assert_eq!(amounts("costs 25USD"), vec![25.0]);
        assert_eq!(amounts("costs 10$"), vec![10.0]);
        assert_eq!(amounts("one dollar or 1 dollar"), vec![1.0]);
    }

    #[test]
    fn test_iso_code_first() {
        assert_eq!(amounts("USD 250"), vec![250.0]);
        assert_eq!(amounts("US$ 99"), vec![99.0]);
        assert!(amounts("FUSD 250").is_empty());
    }

    #[test]
    fn test_overlapping_orders_merge() {
        let text = "$5 USD";
        let found = find_amounts(text);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].start, found[0].end), (0, text.len()));
        let out = annotate_text(text, &rate(50_000.0), &DisplayConfig::default()).unwrap();
        assert_eq!(out, "$5 USD (10,000 sats)");
    }

    #[test]
    fn test_adjacent_prices_stay_separate() {
        assert_eq!(amounts("$19.99 $14.99"), vec![19.99, 14.99]);
        assert_eq!(amounts("$10 $20"), vec![10.0, 20.0]);
        assert_eq!(amounts("10$ 20$"), vec![10.0, 20.0]);

        let out = annotate_text("$19.99 $14.99", &rate(50_000.0), &DisplayConfig::default()).unwrap();
        assert_eq!(out, "$19.99 (39,980 sats) $14.99 (29,980 sats)");
    }

    #[test]
    fn test_trailing_dollar_before_words_still_counts() {
        assert_eq!(amounts("19.99 $ each"), vec![19.99]);
    }

    #[test]
    fn test_letter_suffix_inside_a_word_is_not_a_multiplier() {
        assert_eq!(amounts("$5 T-shirt"), vec![5.0]);
        assert_eq!(amounts("$5 k's worth"), vec![5.0]);
        let out = annotate_text("$5 T-shirt", &rate(50_000.0), &DisplayConfig::default()).unwrap();
        assert_eq!(out, "$5 (10,000 sats) T-shirt");
        assert_eq!(amounts("$5 T, maybe"), vec![5e12]);
    }

    #[test]
    fn test_zero_amounts_are_skipped() {
        assert!(find_amounts("$0 and $0.00").is_empty());
    }

    #[test]
    fn test_multiple_amounts_keep_original_text() {
        let out = annotate_text("Was $50, now $25!", &rate(50_000.0), &DisplayConfig::default()).unwrap();
        assert_eq!(out, "Was $50 (100,000 sats), now $25 (50,000 sats)!");
    }

    #[test]
    fn test_no_currency_no_annotation() {
        assert!(annotate_text("nothing to see, 42 apples", &rate(50_000.0), &DisplayConfig::default()).is_none());
    }

    #[test]
    fn test_round_trip_within_rounding() {
        let config = DisplayConfig::default();
        for usd_rate in [25_000.0, 50_000.0, 67_123.45] {
            let snapshot = rate(usd_rate);
            for amount in [0.01, 1.0, 25.0, 999.99, 24_999.0, 60_000.0, 1_234_567.0] {
                let equivalent = Equivalent::for_amount(amount, &snapshot);
                let figure = parse_display_figure(&equivalent.display(&config)).unwrap();
                let (back, tolerance) = match equivalent {
                    Equivalent::Btc(_) => (
                        figure * snapshot.usd_rate(),
                        0.5 * 10f64.powi(-(config.btc_decimals as i32)) * snapshot.usd_rate(),
                    ),
                    Equivalent::Sats(sats) if sats < 1.0 => {
                        (figure * snapshot.satoshi_rate(), 0.005 * snapshot.satoshi_rate())
                    }
                    Equivalent::Sats(_) => (figure * snapshot.satoshi_rate(), 0.5 * snapshot.satoshi_rate()),
                };
                assert!(
                    (back - amount).abs() <= tolerance + 1e-9,
                    "amount {} at rate {} came back as {}",
                    amount,
                    usd_rate,
                    back
                );
            }
        }
    }
}
