use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::debug;

use crate::accumulator::ChunkAccumulator;
use crate::event::{ScorePayload, SectionPayload};

/// Opening marker of a delimiter-marked section: `▸▸▸name▸▸▸content...`.
pub const SECTION_BEGIN: &str = "▸▸▸";
/// Closing marker of a delimiter-marked section: `...content◂◂◂name◂◂◂`.
pub const SECTION_END: &str = "◂◂◂";

/// Value shape expected for an allow-listed speculative field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FieldShape {
    Text,
    List,
}

/// Fixed allow-list of response fields probed speculatively while the
/// document is still incomplete.
const SPECULATIVE_FIELDS: &[(&str, FieldShape)] = &[
    ("verdict", FieldShape::Text),
    ("summary", FieldShape::Text),
    ("keyFindings", FieldShape::List),
    ("sources", FieldShape::List),
    ("biasIndicators", FieldShape::List),
    ("counterpoints", FieldShape::List),
];

const REALITY_KEY: &str = "realityScore";
const INTEGRITY_KEY: &str = "integrityScore";

/// A field surfaced by one extraction pass, ready to be emitted.
#[derive(Clone, Debug, PartialEq)]
pub enum Extraction {
    Score(ScorePayload),
    Section(SectionPayload),
}

/// Best-effort extraction of structured fields from a prefix of a
/// not-yet-valid JSON document.
///
/// Extraction (pattern probes, per chunk) and authoritative parsing
/// (`finalize`, once at stream end) are deliberately separate phases: the
/// probe layer can be replaced by a streaming JSON parser without touching
/// the event contract.
pub struct SpeculativeExtractor {
    reality_re: Regex,
    integrity_re: Regex,
    reality: Option<f64>,
    integrity: Option<f64>,
    sections: HashMap<String, serde_json::Value>,
    final_names: HashSet<String>,
}

impl SpeculativeExtractor {
    pub fn new() -> Self {
        Self {
            reality_re: score_pattern(REALITY_KEY),
            integrity_re: score_pattern(INTEGRITY_KEY),
            reality: None,
            integrity: None,
            sections: HashMap::new(),
            final_names: HashSet::new(),
        }
    }

    /// Latest known scores, `(reality, integrity)`.
    pub fn scores(&self) -> (Option<f64>, Option<f64>) {
        (self.reality, self.integrity)
    }

    /// All sections recorded so far, speculative or final.
    pub fn sections(&self) -> &HashMap<String, serde_json::Value> {
        &self.sections
    }

    /// Runs extraction steps 1–3 against the full current buffer.
    ///
    /// Always the full buffer, never the delta: matches may span chunk
    /// boundaries. Marked sections run before the speculative JSON probe and
    /// consume their matched region, so the probe never re-reads resolved
    /// content.
    pub fn scan(&mut self, accumulator: &mut ChunkAccumulator) -> Vec<Extraction> {
        let mut out = Vec::new();
        self.scan_scores(accumulator.as_str(), &mut out);
        self.scan_marked_sections(accumulator, &mut out);
        self.scan_speculative_fields(accumulator.as_str(), &mut out);
        out
    }

    /// Step 4: the one authoritative whole-document parse, at stream end.
    ///
    /// Strips fenced code-block wrapping and attempts a single full JSON
    /// parse. On success the result supersedes speculative values for the
    /// returned report; on failure `None` is returned and the session's
    /// speculative state stands as the best available information.
    pub fn finalize(&mut self, accumulator: &ChunkAccumulator) -> Option<serde_json::Value> {
        let document = strip_code_fences(accumulator.as_str());
        match serde_json::from_str::<serde_json::Value>(document) {
            Ok(value) => {
                if let Some(score) = value.get(REALITY_KEY).and_then(serde_json::Value::as_f64) {
                    self.reality = Some(score);
                }
                if let Some(score) = value.get(INTEGRITY_KEY).and_then(serde_json::Value::as_f64) {
                    self.integrity = Some(score);
                }
                if let Some(object) = value.as_object() {
                    for (name, _) in SPECULATIVE_FIELDS {
                        if let Some(field) = object.get(*name) {
                            self.sections.insert((*name).to_string(), field.clone());
                        }
                    }
                }
                Some(value)
            }
            Err(err) => {
                debug!(error = %err, "terminal parse failed, keeping speculative state");
                None
            }
        }
    }

    // Step 1: first successful extraction per score key wins and is
    // provisional until the terminal parse.
    fn scan_scores(&mut self, buffer: &str, out: &mut Vec<Extraction>) {
        if self.reality.is_none()
            && let Some(value) = capture_score(&self.reality_re, buffer)
        {
            self.reality = Some(value);
            out.push(Extraction::Score(self.score_snapshot()));
        }
        if self.integrity.is_none()
            && let Some(value) = capture_score(&self.integrity_re, buffer)
        {
            self.integrity = Some(value);
            out.push(Extraction::Score(self.score_snapshot()));
        }
    }

    fn score_snapshot(&self) -> ScorePayload {
        ScorePayload {
            reality_score: self.reality,
            integrity_score: self.integrity,
            provisional: true,
        }
    }

    // Step 2: explicit begin/end marker pairs. Authoritative the moment they
    // match; the matched region is removed so later passes cannot rematch it.
    fn scan_marked_sections(&mut self, accumulator: &mut ChunkAccumulator, out: &mut Vec<Extraction>) {
        loop {
            let Some(region) = find_marked_region(accumulator.as_str()) else {
                break;
            };
            let name = region.name.clone();
            let content = region.content.clone();
            accumulator.remove_range(region.span);
            if self.final_names.insert(name.clone()) {
                self.sections
                    .insert(name.clone(), serde_json::Value::String(content.clone()));
                out.push(Extraction::Section(SectionPayload {
                    name,
                    content: serde_json::Value::String(content),
                    is_final: true,
                }));
            }
        }
    }

    // Step 3: allow-listed fields probed by text pattern, validated by
    // decoding the candidate fragment as an isolated JSON value. A fragment
    // that fails to decode was cut off mid-stream: not an error, retried on
    // the next chunk.
    fn scan_speculative_fields(&mut self, buffer: &str, out: &mut Vec<Extraction>) {
        for (name, shape) in SPECULATIVE_FIELDS {
            if self.sections.contains_key(*name) || self.final_names.contains(*name) {
                continue;
            }
            let Some(fragment) = locate_field_fragment(buffer, name, *shape) else {
                continue;
            };
            match serde_json::from_str::<serde_json::Value>(fragment) {
                Ok(value) => {
                    self.sections.insert((*name).to_string(), value.clone());
                    out.push(Extraction::Section(SectionPayload {
                        name: (*name).to_string(),
                        content: value,
                        is_final: false,
                    }));
                }
                Err(_) => {
                    // Not yet available; the value is still arriving.
                }
            }
        }
    }
}

impl Default for SpeculativeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn score_pattern(key: &str) -> Regex {
    // Matches `key : number` with or without surrounding JSON quoting, so a
    // score is caught as soon as the digits are on the wire.
    Regex::new(&format!(r#""?{key}"?\s*:\s*(-?\d+(?:\.\d+)?)"#))
        .expect("static score pattern is valid")
}

fn capture_score(re: &Regex, buffer: &str) -> Option<f64> {
    re.captures(buffer)?.get(1)?.as_str().parse().ok()
}

struct MarkedRegion {
    name: String,
    content: String,
    span: std::ops::Range<usize>,
}

/// Finds the first complete `▸▸▸name▸▸▸content◂◂◂name◂◂◂` region.
fn find_marked_region(buffer: &str) -> Option<MarkedRegion> {
    let start = buffer.find(SECTION_BEGIN)?;
    let name_from = start + SECTION_BEGIN.len();
    let name_len = buffer[name_from..].find(SECTION_BEGIN)?;
    let name = &buffer[name_from..name_from + name_len];
    let content_from = name_from + name_len + SECTION_BEGIN.len();
    let closing = format!("{SECTION_END}{name}{SECTION_END}");
    let content_len = buffer[content_from..].find(&closing)?;
    let end = content_from + content_len + closing.len();
    Some(MarkedRegion {
        name: name.to_string(),
        content: buffer[content_from..content_from + content_len].to_string(),
        span: start..end,
    })
}

/// Locates the candidate JSON fragment for `"name": <value>` in an
/// incomplete document. Returns `None` while the value has not fully
/// arrived.
fn locate_field_fragment<'a>(buffer: &'a str, name: &str, shape: FieldShape) -> Option<&'a str> {
    let key = format!("\"{name}\"");
    let key_at = buffer.find(&key)?;
    let after_key = &buffer[key_at + key.len()..];
    let colon = after_key.find(':')?;
    if !after_key[..colon].trim().is_empty() {
        return None;
    }
    let value_text = after_key[colon + 1..].trim_start();
    match shape {
        FieldShape::Text => complete_string_fragment(value_text),
        FieldShape::List => balanced_fragment(value_text, b'[', b']'),
    }
}

/// Returns the full `"..."` slice when the closing quote has arrived.
fn complete_string_fragment(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut escaped = false;
    for (i, byte) in bytes.iter().enumerate().skip(1) {
        if escaped {
            escaped = false;
        } else if *byte == b'\\' {
            escaped = true;
        } else if *byte == b'"' {
            return Some(&text[..=i]);
        }
    }
    None
}

/// Returns the balanced `open..close` slice, tracking nesting and string
/// state. `None` while the closing delimiter has not arrived.
fn balanced_fragment(text: &str, open: u8, close: u8) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&open) {
        return None;
    }
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        if *byte == b'"' {
            in_string = true;
        } else if *byte == open {
            depth += 1;
        } else if *byte == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[..=i]);
            }
        }
    }
    None
}

/// Strips fenced code-block wrapping (` ```json ... ``` `) the model tends to
/// put around the document.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").map_or(body, str::trim).trim()
}
