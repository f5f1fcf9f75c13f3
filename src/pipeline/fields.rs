//! Stage 2: map text lines onto semantic ground-truth fields.
//!
//! Grouping is pluggable. The builder hands a [`LineIndex`] and a
//! [`FieldSink`] to an [`Arc<dyn FieldGrouping>`]; the strategy decides which
//! lines form which field and writes values into the sink, which takes care
//! of layout annotation and of counting mapped fields.
//!
//! [`LabelProximity`] is the default strategy for credit-summary layouts. It
//! applies one rule per field, each looking for a label and reading the value
//! on the same line, on the same row to its right, or a few lines below:
//!
//! 1. `age`
//! 2. `address` (street lines paired with the city/state/zip lines after them)
//! 3. `credit_score` and its colour category
//! 4. `monthly_payments`
//! 5. `credit_freeze`, `fraud_alert`, `deceased`
//! 6. open account categories as `{count, total}`
//! 7. `collections` as `{open, closed}`
//! 8. `public_records`
//! 9. `inquiries_lt6mo`
//! 10. `late_pays` as `{last_2_years, last_over_2_years}`
//! 11. `credit_card_open_totals`
//! 12. `credit_factors` and per-colour counts
//!
//! Lines captured as credit factors are never used as labels by the other
//! rules, so "Too many inquiries" cannot open the inquiries section.

use crate::output::{FieldLayout, GroundTruthRecord};
use crate::pipeline::color::{categorize, ColorCategory};
use crate::pipeline::factors::{self, capture_factors, is_section_heading, FactorCapture};
use crate::pipeline::lines::{LineIndex, TextLine};
use crate::pipeline::parse;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Maps a document's lines onto semantic fields.
///
/// Implementations must be `Send + Sync` so one strategy instance can be
/// shared by builders running on different threads, and must be
/// deterministic for a given input.
pub trait FieldGrouping: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "custom"
    }

    fn group(&self, lines: &LineIndex, sink: &mut FieldSink);
}

/// Shared grouping strategy, as held by the builder.
pub type SharedGrouping = Arc<dyn FieldGrouping>;

/// Collects field values in insertion order.
#[derive(Debug, Clone)]
pub struct FieldSink {
    fields: Map<String, Value>,
    mapped: HashSet<String>,
    include_layout: bool,
    include_candidate_scores: bool,
}

impl FieldSink {
    pub fn new(include_layout: bool, include_candidate_scores: bool) -> Self {
        Self {
            fields: Map::new(),
            mapped: HashSet::new(),
            include_layout,
            include_candidate_scores,
        }
    }

    pub fn include_layout(&self) -> bool {
        self.include_layout
    }

    pub fn include_candidate_scores(&self) -> bool {
        self.include_candidate_scores
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Record a mapped field. In layout mode `<field>_page`, `<field>_bbox`
    /// and `<field>_spans` follow it, built from `lines`.
    pub fn set(&mut self, field: &str, value: impl Into<Value>, lines: &[&TextLine]) {
        self.fields.insert(field.to_string(), value.into());
        if self.include_layout {
            if let Some(layout) = layout_of(lines) {
                layout.write_into(&mut self.fields, field);
            }
        }
        self.mapped.insert(field.to_string());
    }

    /// Record a mapped nested category. Layout goes inside the object as
    /// `_page`, `_bbox` and `_spans`.
    pub fn set_nested(&mut self, field: &str, mut object: Map<String, Value>, lines: &[&TextLine]) {
        if self.include_layout {
            if let Some(layout) = layout_of(lines) {
                layout.write_into(&mut object, "");
            }
        }
        self.fields.insert(field.to_string(), Value::Object(object));
        self.mapped.insert(field.to_string());
    }

    /// Add a derived value (colour, count, diagnostic) that does not count
    /// as a mapped field.
    pub fn annotate(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Number of distinct fields recorded with [`set`](Self::set) or
    /// [`set_nested`](Self::set_nested).
    pub fn mapped(&self) -> usize {
        self.mapped.len()
    }

    pub fn into_record(self) -> GroundTruthRecord {
        GroundTruthRecord::from(self.fields)
    }
}

fn layout_of(lines: &[&TextLine]) -> Option<FieldLayout> {
    FieldLayout::from_spans(lines.iter().flat_map(|l| l.spans.iter()))
}

/// Default strategy: labels and nearby values.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelProximity;

impl FieldGrouping for LabelProximity {
    fn name(&self) -> &str {
        "label-proximity"
    }

    fn group(&self, lines: &LineIndex, sink: &mut FieldSink) {
        let captured = capture_factors(lines);
        let scope = Scope {
            lines,
            skip: captured.iter().map(|f| f.line).collect(),
        };
        map_age(&scope, sink);
        map_address(&scope, sink);
        map_credit_score(&scope, sink);
        map_monthly_payments(&scope, sink);
        map_indicators(&scope, sink);
        map_account_categories(&scope, sink);
        map_collections(&scope, sink);
        map_public_records(&scope, sink);
        map_inquiries(&scope, sink);
        map_late_pays(&scope, sink);
        map_credit_card_totals(&scope, sink);
        map_credit_factors(lines, &captured, sink);
    }
}

/// Lines available to label searches.
struct Scope<'a> {
    lines: &'a LineIndex,
    skip: HashSet<usize>,
}

impl<'a> Scope<'a> {
    /// Indices of label candidates, in document order.
    fn labels<P>(&self, pred: P) -> Vec<usize>
    where
        P: Fn(&str) -> bool,
    {
        (0..self.lines.len())
            .filter(|i| !self.skip.contains(i) && pred(self.lines.lower(*i)))
            .collect()
    }

    fn label<P>(&self, pred: P) -> Option<usize>
    where
        P: Fn(&str) -> bool,
    {
        self.labels(pred).into_iter().next()
    }
}

/// `i`, the fragments to its right, then up to `below` following lines.
fn neighbourhood(lines: &LineIndex, i: usize, below: usize) -> Vec<usize> {
    let mut out = vec![i];
    for j in lines.right_of(i).into_iter().chain(lines.after(i, below)) {
        if !out.contains(&j) {
            out.push(j);
        }
    }
    out
}

fn all_digits(text: &str) -> Option<u64> {
    let t = text.trim();
    if t.is_empty() || !t.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    t.parse().ok()
}

fn refs<'a>(lines: &'a LineIndex, indices: &[usize]) -> Vec<&'a TextLine> {
    indices.iter().map(|&i| lines.line(i)).collect()
}

fn opt(v: Option<u64>) -> Value {
    v.map_or(Value::Null, Value::from)
}

// ── Rule 1: Age ──────────────────────────────────────────────────────────────

static RE_AGE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bage\b").unwrap());

static RE_AGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bage\b\s*:?\s*(\d{1,3})\b").unwrap());

fn map_age(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    for i in scope.labels(|t| RE_AGE_LABEL.is_match(t)) {
        if let Some(age) = RE_AGE.captures(lines.text(i)).and_then(|c| c[1].parse::<u64>().ok()) {
            sink.set("age", age, &[lines.line(i)]);
            return;
        }
        let value = lines
            .right_of(i)
            .into_iter()
            .chain(lines.after(i, 1))
            .find_map(|j| all_digits(lines.text(j)).filter(|v| *v < 1000).map(|v| (j, v)));
        if let Some((j, age)) = value {
            sink.set("age", age, &refs(lines, &[i, j]));
            return;
        }
    }
}

// ── Rule 2: Addresses ────────────────────────────────────────────────────────

static RE_ADDRESS_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"credit|\bage\b|name|report date|categories").unwrap());

fn map_address(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    let usable = |i: usize| !scope.skip.contains(&i);
    let mut pairs: Vec<(String, Vec<usize>)> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let text = lines.text(i);
        if usable(i) && parse::looks_like_street(text) && parse::looks_like_city_state_zip(text) {
            pairs.push((text.to_string(), vec![i]));
            i += 1;
            continue;
        }

        let mut streets = Vec::new();
        while i < lines.len()
            && parse::looks_like_street(lines.text(i))
            && !parse::looks_like_city_state_zip(lines.text(i))
        {
            if usable(i) && !RE_ADDRESS_NOISE.is_match(lines.lower(i)) {
                streets.push(i);
            }
            i += 1;
        }
        let mut cities = Vec::new();
        let mut j = i;
        while j < lines.len()
            && usable(j)
            && parse::looks_like_city_state_zip(lines.text(j))
            && !parse::looks_like_street(lines.text(j))
        {
            cities.push(j);
            j += 1;
        }

        if !streets.is_empty() && !cities.is_empty() {
            let n = streets.len().min(cities.len());
            // the lines nearest the city block are the street lines
            let streets = &streets[streets.len() - n..];
            for (s, c) in streets.iter().zip(&cities) {
                pairs.push((
                    format!("{}\n{}", lines.text(*s), lines.text(*c)),
                    vec![*s, *c],
                ));
            }
            i = j;
        } else {
            i = j.max(i + 1);
        }
    }

    if pairs.is_empty() {
        return;
    }
    let mut seen = HashSet::new();
    let mut addresses = Vec::new();
    let mut used = Vec::new();
    for (raw, idx) in pairs {
        let normalised = parse::normalize_address(&raw);
        if seen.insert(normalised.clone()) {
            addresses.push(Value::from(normalised));
            used.extend(idx);
        }
    }
    sink.set("address", Value::Array(addresses), &refs(lines, &used));
}

// ── Rule 3: Credit score ─────────────────────────────────────────────────────

static RE_SCORE_INLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)credit\s+score\D{0,5}(\d{3})\b").unwrap());

const SCORE_RANGE: std::ops::RangeInclusive<u64> = 300..=850;

fn score_value(text: &str) -> Option<u64> {
    all_digits(text).filter(|v| SCORE_RANGE.contains(v))
}

fn map_credit_score(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    let mut hit = None;
    for i in scope.labels(|t| t.contains("credit score")) {
        let inline = RE_SCORE_INLINE
            .captures(lines.text(i))
            .and_then(|c| c[1].parse::<u64>().ok())
            .filter(|v| SCORE_RANGE.contains(v));
        hit = inline
            .map(|v| (i, v))
            .or_else(|| lines.window(i, 3, 3).find_map(|j| score_value(lines.text(j)).map(|v| (j, v))));
        if hit.is_some() {
            break;
        }
    }
    if hit.is_none() {
        hit = (0..lines.len().min(6)).find_map(|j| score_value(lines.text(j)).map(|v| (j, v)));
    }
    let Some((j, score)) = hit else {
        return;
    };

    let line = lines.line(j);
    sink.set("credit_score", score, &[line]);
    if let Some(rgb) = line.color_of(&score.to_string()) {
        sink.annotate("credit_score_color", categorize(rgb).as_str());
    }
}

// ── Rule 4: Monthly payments ─────────────────────────────────────────────────

fn map_monthly_payments(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    let hit = (0..lines.len())
        .filter(|i| !scope.skip.contains(i))
        .find_map(|i| parse::parse_monthly_payment(lines.text(i)).map(|v| (i, v)));
    let Some((i, amount)) = hit else {
        return;
    };
    let line = lines.line(i);
    sink.set("monthly_payments", amount, &[line]);
    if sink.include_layout() {
        if let Some(rgb) = line.color_of("$") {
            sink.annotate("monthly_payments_color", categorize(rgb).as_str());
        }
    }
}

// ── Rule 5: Yes/No indicators ────────────────────────────────────────────────

const INDICATORS: [(&str, &str); 3] = [
    ("credit freeze", "credit_freeze"),
    ("fraud alert", "fraud_alert"),
    ("deceased", "deceased"),
];

/// Label line, the row to its right, 3 lines below, then 6 lines above
/// (compact layouts print the value over its label).
fn indicator_near(lines: &LineIndex, i: usize) -> Option<(usize, u8)> {
    let above = (i.saturating_sub(6)..i).rev();
    neighbourhood(lines, i, 3)
        .into_iter()
        .chain(above)
        .find_map(|j| parse::parse_bool_token(lines.text(j)).map(|v| (j, v)))
}

fn map_indicators(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    for (label, key) in INDICATORS {
        let Some((j, value)) = scope
            .labels(|t| t.contains(label))
            .into_iter()
            .find_map(|i| indicator_near(lines, i))
        else {
            continue;
        };
        let line = lines.line(j);
        sink.set(key, value, &[line]);
        if sink.include_layout() {
            if let Some(rgb) = line.first_color() {
                sink.annotate(&format!("{key}_color"), categorize(rgb).as_str());
            }
        }
    }
}

// ── Rule 6: Open account categories ──────────────────────────────────────────

const ACCOUNT_CATEGORIES: [(&str, &str); 5] = [
    ("revolving accounts", "revolving_accounts_open"),
    ("installment accounts", "installment_accounts_open"),
    ("real estate", "real_estate_open"),
    ("line of credit", "line_of_credit_accounts_open"),
    ("miscellaneous", "miscellaneous_accounts_open"),
];

const ACCOUNT_WINDOW: usize = 7;

static RE_NO_ACCOUNTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bno\b.*accounts").unwrap());

fn other_category_label(lower: &str, needle: &str) -> bool {
    ACCOUNT_CATEGORIES
        .iter()
        .any(|(n, _)| *n != needle && lower.contains(n))
}

/// `(count, total, value line)` for the category labelled at `i`.
fn account_pair_near(
    lines: &LineIndex,
    i: usize,
    needle: &str,
) -> Option<(Option<u64>, Option<u64>, usize)> {
    if RE_NO_ACCOUNTS.is_match(lines.lower(i)) {
        return Some((Some(0), Some(0), i));
    }
    for j in neighbourhood(lines, i, ACCOUNT_WINDOW) {
        let lower = lines.lower(j);
        if j != i && other_category_label(lower, needle) {
            return None;
        }
        if j != i && RE_NO_ACCOUNTS.is_match(lower) && lower.contains(needle) {
            return Some((Some(0), Some(0), j));
        }
        match parse::parse_count_amount_pair(lines.text(j)) {
            (None, None) => continue,
            (count, total) => return Some((count, total, j)),
        }
    }
    None
}

fn map_account_categories(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    for (needle, key) in ACCOUNT_CATEGORIES {
        let Some((i, (count, total, j))) = scope
            .labels(|t| t.contains(needle))
            .into_iter()
            .find_map(|i| account_pair_near(lines, i, needle).map(|hit| (i, hit)))
        else {
            continue;
        };
        let mut object = Map::new();
        object.insert("count".into(), opt(count));
        object.insert("total".into(), opt(total));
        let used = if i == j { vec![i] } else { vec![i, j] };
        sink.set_nested(key, object, &refs(lines, &used));
    }
}

// ── Rule 7: Collections ──────────────────────────────────────────────────────

fn map_collections(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    for i in scope.labels(|t| t.contains("collections")) {
        let near = neighbourhood(lines, i, 5);
        let pair = near.iter().find_map(|&j| match parse::parse_count_count_pair(lines.text(j)) {
            (None, None) => None,
            (open, closed) => Some((open, closed, vec![i, j])),
        });
        let found = pair.or_else(|| {
            let numbers: Vec<(usize, u64)> = near
                .iter()
                .filter(|&&j| j != i)
                .filter_map(|&j| all_digits(lines.text(j)).map(|v| (j, v)))
                .take(2)
                .collect();
            if numbers.is_empty() {
                return None;
            }
            let mut used = vec![i];
            used.extend(numbers.iter().map(|(j, _)| *j));
            Some((
                numbers.first().map(|(_, v)| *v),
                numbers.get(1).map(|(_, v)| *v),
                used,
            ))
        });
        if let Some((open, closed, mut used)) = found {
            used.dedup();
            let mut object = Map::new();
            object.insert("open".into(), opt(open));
            object.insert("closed".into(), opt(closed));
            sink.set_nested("collections", object, &refs(lines, &used));
            return;
        }
    }
}

// ── Rule 8: Public records ───────────────────────────────────────────────────

fn map_public_records(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    for i in scope.labels(|t| t.contains("public record")) {
        let hit = neighbourhood(lines, i, 1).into_iter().find_map(|j| {
            let value = if j == i {
                parse::parse_public_records(lines.text(i))
            } else {
                all_digits(lines.text(j))
            };
            value.map(|v| (j, v))
        });
        if let Some((j, count)) = hit {
            let used = if i == j { vec![i] } else { vec![i, j] };
            sink.set("public_records", count, &refs(lines, &used));
            return;
        }
    }
}

// ── Rule 9: Inquiries ────────────────────────────────────────────────────────

const INQUIRY_WINDOW: usize = 20;

static RE_INQUIRY_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s+inq").unwrap());

fn map_inquiries(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    for i in scope.labels(|t| t.contains("inquir") && !RE_INQUIRY_COUNT.is_match(t)) {
        let mut total = 0u64;
        let mut used = vec![i];
        for j in (i + 1..lines.len()).take(INQUIRY_WINDOW) {
            if is_section_heading(lines.lower(j)) {
                break;
            }
            // a count that would overflow the sum is not a real count
            if let Some(sum) = RE_INQUIRY_COUNT
                .captures(lines.text(j))
                .and_then(|c| c[1].parse::<u64>().ok())
                .and_then(|n| total.checked_add(n))
            {
                total = sum;
                used.push(j);
            }
        }
        if used.len() > 1 || lines.lower(i).contains("last 6 months") {
            sink.set("inquiries_lt6mo", total, &refs(lines, &used));
            return;
        }
    }
}

// ── Rule 10: Late payments ───────────────────────────────────────────────────

const LATE_PAY_WINDOW: usize = 20;

static RE_LATE_TIMEFRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s+(?:\w+\s+)*?lates?\s+.*?\bin\b\s*(\d+)(?:\s*-\s*(\d+))?\s*(mo|yrs?)?")
        .unwrap()
});

static RE_MONTH_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmo\b").unwrap());

static RE_LATES_OVER_2YR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)lates\s*\+2yr\s*:\s*(\d+)").unwrap());

fn map_late_pays(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    for i in scope.labels(|t| t.contains("late pay") || t.contains("lates +2yr")) {
        let (mut recent, mut older) = (0u64, 0u64);
        let mut used = vec![i];
        for j in (i..lines.len()).take(LATE_PAY_WINDOW + 1) {
            let lower = lines.lower(j);
            if j > i && is_section_heading(lower) && !lower.contains("late pay") {
                break;
            }
            let text = lines.text(j);
            if j > i {
                if let Some(caps) = RE_LATE_TIMEFRAME.captures(text) {
                    let n: u64 = caps[1].parse().unwrap_or(0);
                    let in_months = caps
                        .get(4)
                        .is_some_and(|u| u.as_str().eq_ignore_ascii_case("mo"))
                        || RE_MONTH_WORD.is_match(text);
                    let bucket = if in_months { &mut recent } else { &mut older };
                    if let Some(sum) = bucket.checked_add(n) {
                        *bucket = sum;
                        used.push(j);
                    }
                    continue;
                }
            }
            if older == 0 {
                if let Some(n) = RE_LATES_OVER_2YR
                    .captures(text)
                    .and_then(|c| c[1].parse::<u64>().ok())
                {
                    older = n;
                    if j != i {
                        used.push(j);
                    }
                }
            }
        }
        if recent > 0 || older > 0 {
            let mut object = Map::new();
            object.insert("last_2_years".into(), Value::from(recent));
            object.insert("last_over_2_years".into(), Value::from(older));
            sink.set_nested("late_pays", object, &refs(lines, &used));
            return;
        }
    }
}

// ── Rule 11: Credit card open totals ─────────────────────────────────────────

static RE_DOLLAR_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\s*\d").unwrap());

fn map_credit_card_totals(scope: &Scope, sink: &mut FieldSink) {
    let lines = scope.lines;
    let Some(i) = scope.label(|t| t.contains("credit card open totals")) else {
        return;
    };
    let amounts: Vec<usize> = neighbourhood(lines, i, 5)
        .into_iter()
        .filter(|&j| j != i && RE_DOLLAR_AMOUNT.is_match(lines.text(j)))
        .take(3)
        .collect();

    let mut object = Map::new();
    if let Some(v) = amounts.first().and_then(|&j| parse::parse_money(lines.text(j))) {
        object.insert("balance".into(), Value::from(v));
    }
    if let Some(&j) = amounts.get(1) {
        if let Some(v) = parse::parse_money(lines.text(j)) {
            object.insert("limit".into(), Value::from(v));
        }
        if let Some(p) = parse::parse_percent(lines.text(j)) {
            object.insert("percent".into(), Value::from(p));
        }
    }
    if let Some(v) = amounts.get(2).and_then(|&j| parse::parse_money(lines.text(j))) {
        object.insert("payment".into(), Value::from(v));
    }
    if object.is_empty() {
        return;
    }

    let mut used = vec![i];
    used.extend(&amounts);
    sink.set_nested("credit_card_open_totals", object, &refs(lines, &used));
    if sink.include_layout() {
        let first = amounts.first().map(|&j| lines.line(j));
        if let Some(rgb) = first.and_then(|line| line.color_of("$")) {
            sink.annotate("credit_card_open_totals_color", categorize(rgb).as_str());
        }
    }
}

// ── Rule 12: Credit factors ──────────────────────────────────────────────────

fn map_credit_factors(lines: &LineIndex, captured: &[FactorCapture], sink: &mut FieldSink) {
    if captured.is_empty() {
        return;
    }
    let mut entries: Vec<Value> = captured
        .iter()
        .map(|f| f.to_entry(lines, sink.include_layout()))
        .collect();
    factors::sort_by_position(&mut entries);
    sink.set("credit_factors", Value::Array(entries), &[]);

    let count = |c: ColorCategory| captured.iter().filter(|f| f.color == Some(c)).count();
    sink.annotate("red_credit_factors_count", count(ColorCategory::Red));
    sink.annotate("green_credit_factors_count", count(ColorCategory::Green));
    sink.annotate("black_credit_factors_count", count(ColorCategory::Black));

    if sink.include_candidate_scores() {
        let scores: Vec<Value> = captured
            .iter()
            .map(|f| serde_json::json!({"factor": f.factor, "score": f.candidate_score()}))
            .collect();
        sink.annotate("candidate_scores", Value::Array(scores));
    }
}
