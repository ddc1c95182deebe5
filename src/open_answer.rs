//! Local grading of free-text answers.
//!
//! A question may declare a typed answer (number, year, date, regex, text) that
//! is checked exactly; otherwise the answer is scored by keyword coverage. The
//! AI rubric upgrade for premium learners lives in `grading.rs` and falls back
//! to this module.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use tracing::warn;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::domain::{OpenBody, Tolerance, TypedAnswer};

/// Share of expected keywords an answer must mention to count as correct.
pub const KEYWORD_PASS_RATIO: f64 = 0.5;
/// A miss within this multiple of the allowed delta is reported as "near".
const NEAR_MISS_FACTOR: f64 = 3.0;
/// Near-miss window, relative to the expected value, when no tolerance is set.
const NEAR_MISS_DEFAULT_RATIO: f64 = 0.01;
const EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub struct OpenGrade {
  pub is_correct: bool,
  pub partial_score: Option<f64>,
  pub near_miss: bool,
  /// False when nothing could be checked automatically.
  pub graded: bool,
  pub note: String,
}

impl OpenGrade {
  fn exact(is_correct: bool, note: impl Into<String>) -> Self {
    Self { is_correct, partial_score: None, near_miss: false, graded: true, note: note.into() }
  }
}

/// Grade an open answer without any external service.
pub fn grade_locally(body: &OpenBody, answer: &str) -> OpenGrade {
  if let Some(typed) = &body.typed_answer {
    return grade_typed(typed, answer);
  }
  if !body.expected_keywords.is_empty() {
    return keyword_coverage(&body.expected_keywords, answer);
  }
  OpenGrade {
    is_correct: false,
    partial_score: None,
    near_miss: false,
    graded: false,
    note: "Answer recorded; it will be reviewed by a teacher.".into(),
  }
}

pub fn grade_typed(typed: &TypedAnswer, answer: &str) -> OpenGrade {
  match typed {
    TypedAnswer::Integer { value, tolerance } | TypedAnswer::Year { value, tolerance } => {
      grade_numeric(*value as f64, *tolerance, answer)
    }
    TypedAnswer::Float { value, tolerance } => grade_numeric(*value, *tolerance, answer),
    TypedAnswer::Date { value } => {
      let ok = date_parts(answer) == date_parts(value) && !date_parts(value).is_empty();
      OpenGrade::exact(ok, if ok { "Correct date." } else { "This is not the expected date." })
    }
    TypedAnswer::Regex { pattern, case_insensitive } => {
      match RegexBuilder::new(pattern).case_insensitive(*case_insensitive).build() {
        Ok(re) => {
          let ok = re.is_match(answer.trim());
          OpenGrade::exact(ok, if ok { "Correct." } else { "This does not match the expected answer." })
        }
        Err(e) => {
          warn!(target: "grading", %pattern, error = %e, "Invalid answer pattern");
          OpenGrade {
            is_correct: false,
            partial_score: None,
            near_miss: false,
            graded: false,
            note: "Answer recorded; it will be reviewed by a teacher.".into(),
          }
        }
      }
    }
    TypedAnswer::Text { value, alternates, case_sensitive } => {
      let given = normalize_text(answer, *case_sensitive);
      let ok = std::iter::once(value)
        .chain(alternates.iter())
        .any(|expected| normalize_text(expected, *case_sensitive) == given);
      OpenGrade::exact(ok, if ok { "Correct." } else { "This is not the expected answer." })
    }
  }
}

fn number_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"-?\d+(?:[.,]\d+)?").expect("static number pattern"))
}

/// First number in the answer; spaces inside digit groups ("1 000") are ignored.
pub fn parse_number(answer: &str) -> Option<f64> {
  let compact: String = answer.chars().filter(|c| !c.is_whitespace() && *c != '\u{202f}').collect();
  let m = number_regex().find(&compact)?;
  m.as_str().replace(',', ".").parse::<f64>().ok()
}

fn allowed_delta(expected: f64, tolerance: Option<Tolerance>) -> f64 {
  match tolerance {
    Some(Tolerance::Absolute(a)) => a.abs(),
    Some(Tolerance::Percent(p)) => expected.abs() * p.abs() / 100.0,
    None => 0.0,
  }
}

fn grade_numeric(expected: f64, tolerance: Option<Tolerance>, answer: &str) -> OpenGrade {
  let Some(given) = parse_number(answer) else {
    return OpenGrade::exact(false, "A number was expected.");
  };
  let delta = allowed_delta(expected, tolerance);
  let diff = (given - expected).abs();
  if diff <= delta + EPSILON {
    return OpenGrade::exact(true, "Correct.");
  }
  let near_window = if delta > 0.0 { delta * NEAR_MISS_FACTOR } else { expected.abs() * NEAR_MISS_DEFAULT_RATIO };
  let near_miss = diff <= near_window + EPSILON;
  OpenGrade {
    is_correct: false,
    partial_score: None,
    near_miss,
    graded: true,
    note: if near_miss { "Close, but not quite.".into() } else { "This is not the expected value.".into() },
  }
}

/// Date components with separators unified and leading zeros dropped.
fn date_parts(s: &str) -> Vec<String> {
  s.trim()
    .split(|c: char| matches!(c, '/' | '-' | '.' | ' '))
    .filter(|p| !p.is_empty())
    .map(|p| {
      let trimmed = p.trim_start_matches('0');
      if trimmed.is_empty() { "0".to_string() } else { trimmed.to_lowercase() }
    })
    .collect()
}

/// Trim, collapse whitespace, drop trailing punctuation; when not
/// case-sensitive also fold case and strip accents.
pub fn normalize_text(s: &str, case_sensitive: bool) -> String {
  let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
  let trimmed = collapsed.trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ';' | ','));
  if case_sensitive {
    trimmed.to_string()
  } else {
    trimmed.nfd().filter(|c| !is_combining_mark(*c)).collect::<String>().to_lowercase()
  }
}

pub fn keyword_coverage(keywords: &[String], answer: &str) -> OpenGrade {
  let haystack = normalize_text(answer, false);
  let missing: Vec<&String> = keywords
    .iter()
    .filter(|k| !haystack.contains(&normalize_text(k, false)))
    .collect();
  let matched = keywords.len() - missing.len();
  let coverage = matched as f64 / keywords.len().max(1) as f64;
  let note = if missing.is_empty() {
    "All key ideas are present.".to_string()
  } else {
    format!("{}/{} key ideas found.", matched, keywords.len())
  };
  OpenGrade {
    is_correct: coverage >= KEYWORD_PASS_RATIO,
    partial_score: Some(coverage),
    near_miss: false,
    graded: true,
    note,
  }
}
