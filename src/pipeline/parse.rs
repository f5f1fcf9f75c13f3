//! Text parsers for the values printed on credit summaries.
//!
//! Each parser is a small pure function over one line of text with its own
//! regex, so the field strategy can try them in turn without caring how a
//! given vendor formats its numbers.

use once_cell::sync::Lazy;
use regex::Regex;

fn digits(s: &str) -> Option<u64> {
    s.replace(',', "").parse().ok()
}

// ── Count / amount pairs ─────────────────────────────────────────────────────

static RE_COUNT_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d[\d,]*)\s*/\s*\$\s*(\d[\d,]*)(?:\.\d+)?").unwrap());

static RE_MONTHLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/\s*mo\b|per\s+month").unwrap());

/// `"3 / $9,000"` → `(Some(3), Some(9000))`.
///
/// Monthly payment strings (`$450/mo`) are not account totals and parse as
/// `(None, None)`.
pub fn parse_count_amount_pair(s: &str) -> (Option<u64>, Option<u64>) {
    if RE_MONTHLY.is_match(s) {
        return (None, None);
    }
    match RE_COUNT_AMOUNT.captures(s) {
        Some(caps) => (digits(&caps[1]), digits(&caps[2])),
        None => (None, None),
    }
}

static RE_COUNT_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\d$,])(\d+)\s*/\s*(\d+)\b").unwrap());

/// `"2 / 1"` → `(Some(2), Some(1))`.
pub fn parse_count_count_pair(s: &str) -> (Option<u64>, Option<u64>) {
    match RE_COUNT_COUNT.captures(s) {
        Some(caps) => (digits(&caps[1]), digits(&caps[2])),
        None => (None, None),
    }
}

// ── Yes / No indicators ──────────────────────────────────────────────────────

static RE_BOOL_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(yes|no|true|false)\b").unwrap());

fn bool_word(token: &str) -> Option<u8> {
    match token.to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Some(1),
        "no" | "n" | "false" | "0" => Some(0),
        _ => None,
    }
}

/// `1` for yes-like, `0` for no-like text.
///
/// A whole-string token (`Y`, `0`, `false`, …) is read directly. Inside a
/// longer string only the words yes/no/true/false count, and only when they
/// all agree.
pub fn parse_bool_token(s: &str) -> Option<u8> {
    let trimmed = s.trim().trim_end_matches(['.', ':']);
    if let Some(v) = bool_word(trimmed) {
        return Some(v);
    }
    let mut found = RE_BOOL_WORD.find_iter(s).filter_map(|m| bool_word(m.as_str()));
    let first = found.next()?;
    found.all(|v| v == first).then_some(first)
}

// ── Money and percentages ────────────────────────────────────────────────────

static RE_MONEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s*(\d[\d,]*)(?:\.\d+)?").unwrap());

/// `"$20,483"` → `Some(20483)`. Cents are dropped.
pub fn parse_money(s: &str) -> Option<u64> {
    RE_MONEY.captures(s).and_then(|c| digits(&c[1]))
}

static RE_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());

/// `"116%"` → `Some(116)`, rounded to the nearest whole percent.
pub fn parse_percent(s: &str) -> Option<u64> {
    RE_PERCENT
        .captures(s)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|v| v.round() as u64)
}

static RE_MONTHLY_PAYMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\$\s*(\d[\d,]*)(?:\.\d+)?\s*(?:/\s*mo\b|per\s+month)").unwrap()
});

/// `"$1,250/mo"` → `Some(1250)`.
pub fn parse_monthly_payment(s: &str) -> Option<u64> {
    RE_MONTHLY_PAYMENT.captures(s).and_then(|c| digits(&c[1]))
}

// ── Addresses ────────────────────────────────────────────────────────────────

static RE_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<street>[^,]+?),\s*(?P<city>[A-Za-z][A-Za-z .'-]*?),?\s+(?P<state>[A-Za-z]{2})\s+(?P<zip>\d{5}(?:-\d{4})?)$",
    )
    .unwrap()
});

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn title_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => word.to_lowercase(),
        Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn title_case(s: &str) -> String {
    s.split(' ').map(title_word).collect::<Vec<_>>().join(" ")
}

/// Normalise a one- or two-line postal address to
/// `"3070 Lakecrest Cir, Lexington, KY 40513"`.
///
/// Unrecognised shapes are title-cased with whitespace collapsed.
pub fn normalize_address(raw: &str) -> String {
    let joined = raw
        .replace('.', "")
        .lines()
        .map(|l| RE_SPACES.replace_all(l.trim(), " ").into_owned())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    let joined = joined.replace(",,", ",");

    match RE_ADDRESS.captures(&joined) {
        Some(caps) => format!(
            "{}, {}, {} {}",
            title_case(caps["street"].trim()),
            title_case(caps["city"].trim()),
            caps["state"].to_ascii_uppercase(),
            &caps["zip"]
        ),
        None => title_case(&joined),
    }
}

static RE_STREET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\s+[A-Za-z0-9]").unwrap());

static RE_CITY_STATE_ZIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z .'-]*,?\s+[A-Za-z]{2}\.?\s+\d{5}(?:-\d{4})?\s*$").unwrap());

/// Starts with a house number and contains no money or slash pairs.
pub fn looks_like_street(s: &str) -> bool {
    RE_STREET.is_match(s.trim()) && !s.contains('$') && !s.contains('/')
}

/// Ends with `City, ST 12345`.
pub fn looks_like_city_state_zip(s: &str) -> bool {
    RE_CITY_STATE_ZIP.is_match(s.trim()) && !s.contains('$')
}

// ── Public records ───────────────────────────────────────────────────────────

static RE_PUBLIC_RECORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)public\s+records?\D{0,20}?(\d+)").unwrap());

/// Number following "Public Records".
pub fn parse_public_records(text: &str) -> Option<u64> {
    RE_PUBLIC_RECORDS.captures(text).and_then(|c| digits(&c[1]))
}
