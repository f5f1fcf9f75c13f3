//! Stage 1: group positioned spans into text lines.
//!
//! PDF text libraries hand spans over in content-stream order, which for
//! generated reports is rarely reading order. This stage sorts spans into
//! rows by vertical overlap and splits each row into column fragments at
//! large horizontal gaps, so a label and the value printed far to its right
//! end up as two neighbouring lines.
//!
//! The result is wrapped in a [`LineIndex`] that the field strategies query
//! by text and by geometry.

use crate::span::{BBox, PositionedSpan, Rgb};
use std::cmp::Ordering;
use std::ops::Range;

/// Spans sharing one row and one column fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub page: usize,
    pub bbox: BBox,
    pub spans: Vec<PositionedSpan>,
}

impl TextLine {
    fn from_spans(spans: Vec<PositionedSpan>) -> Option<Self> {
        let first = spans.first()?;
        let page = first.page;
        let bbox = spans.iter().fold(first.bbox, |acc, s| acc.union(&s.bbox));
        Some(Self { page, bbox, spans })
    }

    /// Span texts joined by one space.
    pub fn text(&self) -> String {
        self.spans
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Fill colour of the first coloured span.
    pub fn first_color(&self) -> Option<Rgb> {
        self.spans.iter().find_map(|s| s.color())
    }

    /// Fill colour of the first span whose text contains `needle`.
    pub fn color_of(&self, needle: &str) -> Option<Rgb> {
        self.spans
            .iter()
            .find(|s| s.text.contains(needle))
            .and_then(|s| s.color())
            .or_else(|| self.first_color())
    }
}

/// Group spans into lines ordered by page, row and x position.
///
/// Whitespace-only spans are dropped. Deterministic for a given input: ties
/// in position are broken by the span's index in `spans`.
pub fn group_lines(spans: &[PositionedSpan], tolerance: f32, max_word_gap: f32) -> Vec<TextLine> {
    let mut order: Vec<(usize, &PositionedSpan)> = spans
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.text.trim().is_empty())
        .collect();
    order.sort_by(|(ia, a), (ib, b)| {
        a.page
            .cmp(&b.page)
            .then_with(|| a.bbox.center_y().total_cmp(&b.bbox.center_y()))
            .then_with(|| a.bbox.x0.total_cmp(&b.bbox.x0))
            .then_with(|| ia.cmp(ib))
    });

    let mut rows: Vec<Vec<(usize, &PositionedSpan)>> = Vec::new();
    let mut row_box: Option<(usize, BBox)> = None;
    for (idx, span) in order {
        let joins = match row_box {
            Some((page, bbox)) => {
                page == span.page && bbox.vertical_overlap_ratio(&span.bbox) >= tolerance
            }
            None => false,
        };
        match rows.last_mut() {
            Some(row) if joins => {
                row.push((idx, span));
                row_box = row_box.map(|(p, b)| (p, b.union(&span.bbox)));
            }
            _ => {
                rows.push(vec![(idx, span)]);
                row_box = Some((span.page, span.bbox));
            }
        }
    }

    let mut lines = Vec::new();
    for mut row in rows {
        row.sort_by(|(ia, a), (ib, b)| match a.bbox.x0.total_cmp(&b.bbox.x0) {
            Ordering::Equal => ia.cmp(ib),
            other => other,
        });
        let mut fragment: Vec<PositionedSpan> = Vec::new();
        let mut right_edge = f32::NEG_INFINITY;
        for (_, span) in row {
            if !fragment.is_empty() && span.bbox.x0 - right_edge > max_word_gap {
                lines.extend(TextLine::from_spans(std::mem::take(&mut fragment)));
            }
            right_edge = right_edge.max(span.bbox.x1);
            fragment.push(span.clone());
        }
        lines.extend(TextLine::from_spans(fragment));
    }
    lines
}

/// Text and geometry lookups over a document's lines.
#[derive(Debug, Clone, Default)]
pub struct LineIndex {
    lines: Vec<TextLine>,
    texts: Vec<String>,
    lower: Vec<String>,
}

impl LineIndex {
    pub fn new(lines: Vec<TextLine>) -> Self {
        let texts: Vec<String> = lines.iter().map(TextLine::text).collect();
        let lower = texts.iter().map(|t| t.to_lowercase()).collect();
        Self {
            lines,
            texts,
            lower,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, i: usize) -> &TextLine {
        &self.lines[i]
    }

    pub fn lines(&self) -> &[TextLine] {
        &self.lines
    }

    pub fn text(&self, i: usize) -> &str {
        &self.texts[i]
    }

    /// Lower-cased text of line `i`.
    pub fn lower(&self, i: usize) -> &str {
        &self.lower[i]
    }

    /// First line whose lower-cased text satisfies `pred`.
    pub fn find(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.find_from(0, pred)
    }

    pub fn find_from(&self, start: usize, pred: impl Fn(&str) -> bool) -> Option<usize> {
        (start..self.len()).find(|&i| pred(self.lower(i)))
    }

    /// Up to `n` lines following `i` on the same page.
    pub fn after(&self, i: usize, n: usize) -> Vec<usize> {
        let page = self.lines[i].page;
        (i + 1..self.len())
            .take_while(|&j| self.lines[j].page == page)
            .take(n)
            .collect()
    }

    /// `before` lines above and `after` lines below `i`, clipped to the
    /// document. Includes `i` itself.
    pub fn window(&self, i: usize, before: usize, after: usize) -> Range<usize> {
        i.saturating_sub(before)..(i + after + 1).min(self.len())
    }

    /// Lines below `i` that overlap it horizontally, within `max_dy` points,
    /// nearest first.
    pub fn below_in_column(&self, i: usize, max_dy: f32) -> Vec<usize> {
        let anchor = &self.lines[i];
        let mut hits: Vec<(f32, usize)> = (0..self.len())
            .filter(|&j| j != i)
            .filter_map(|j| {
                let line = &self.lines[j];
                let dy = line.bbox.y0 - anchor.bbox.y1;
                let same_column = line.bbox.horizontal_overlap(&anchor.bbox) > 0.0;
                (line.page == anchor.page && same_column && dy >= -1.0 && dy <= max_dy)
                    .then_some((dy, j))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, j)| j).collect()
    }

    /// Fragments on the same row to the right of `i`, nearest first.
    pub fn right_of(&self, i: usize) -> Vec<usize> {
        let anchor = &self.lines[i];
        let mut hits: Vec<(f32, usize)> = (0..self.len())
            .filter(|&j| j != i)
            .filter_map(|j| {
                let line = &self.lines[j];
                let same_row = line.page == anchor.page
                    && line.bbox.vertical_overlap_ratio(&anchor.bbox) >= 0.5;
                (same_row && line.bbox.x0 >= anchor.bbox.x1)
                    .then_some((line.bbox.x0 - anchor.bbox.x1, j))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, j)| j).collect()
    }
}
