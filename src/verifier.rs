//! Per question-type answer verification.
//!
//! Each question body implements `Verify`. Index-based variants recompute the
//! presentation shuffle from the session and question ids and map the
//! submitted slot back to the authored option; nothing the client sends about
//! ordering is trusted.

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Value};

use crate::domain::{
  AiEvaluation, ChoiceBody, FillBlankBody, MapLabelsBody, MatchingBody, MultiChoiceBody, OpenBody, OrderingBody,
  Question, QuestionBody, TrueFalseBody,
};
use crate::error::AppError;
use crate::open_answer;
use crate::shuffle::{self, presentation_seed, MAP_LABELS_SUFFIX, MATCHING_RIGHT_SUFFIX, ORDERING_ITEMS_SUFFIX};

/// Identifies the presentation a submission refers to.
#[derive(Clone, Copy, Debug)]
pub struct Presentation<'a> {
  pub session_id: &'a str,
  pub question_id: &'a str,
}

impl<'a> Presentation<'a> {
  pub fn permutation(&self, len: usize, suffix: Option<&str>) -> Vec<usize> {
    shuffle::shuffle(len, &presentation_seed(self.session_id, self.question_id, suffix))
  }
}

/// Outcome of grading one submission.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
  pub is_correct: bool,
  pub partial_score: Option<f64>,
  /// Truth in the shape the client saw it.
  pub correct_answer: Value,
  pub near_miss: bool,
  /// False when the variant is not gradable automatically; mastery is left alone.
  pub graded: bool,
  pub feedback: Option<String>,
  pub ai_evaluation: Option<AiEvaluation>,
}

impl Verdict {
  fn graded(is_correct: bool, partial_score: Option<f64>, correct_answer: Value) -> Self {
    Self {
      is_correct,
      partial_score,
      correct_answer,
      near_miss: false,
      graded: true,
      feedback: None,
      ai_evaluation: None,
    }
  }

  /// Contribution to the session score.
  pub fn score_value(&self) -> f64 {
    if self.is_correct { 1.0 } else { self.partial_score.unwrap_or(0.0) }
  }
}

pub trait Verify {
  /// Truth in presentation coordinates.
  fn reveal(&self, presentation: &Presentation<'_>) -> Value;
  fn verify(&self, presentation: &Presentation<'_>, answer: &Value) -> Result<Verdict, AppError>;
}

/// Fraction credit, reported only when the answer is not fully correct.
fn partial(is_correct: bool, fraction: f64) -> Option<f64> {
  if is_correct { None } else { Some(fraction.clamp(0.0, 1.0)) }
}

fn expect_index(answer: &Value) -> Result<usize, AppError> {
  answer
    .as_u64()
    .map(|i| i as usize)
    .ok_or_else(|| AppError::Validation("answer must be an option index".into()))
}

impl Verify for ChoiceBody {
  fn reveal(&self, presentation: &Presentation<'_>) -> Value {
    let perm = presentation.permutation(self.options.len(), None);
    shuffle::slot_of(&perm, self.correct).map(|slot| json!(slot)).unwrap_or(Value::Null)
  }

  fn verify(&self, presentation: &Presentation<'_>, answer: &Value) -> Result<Verdict, AppError> {
    let slot = expect_index(answer)?;
    let perm = presentation.permutation(self.options.len(), None);
    let correct_slot = shuffle::slot_of(&perm, self.correct)
      .ok_or_else(|| AppError::Internal("correct option out of range".into()))?;
    let is_correct = slot == correct_slot;
    Ok(Verdict::graded(is_correct, None, json!(correct_slot)))
  }
}

impl MultiChoiceBody {
  fn correct_slots(&self, presentation: &Presentation<'_>) -> BTreeSet<usize> {
    let perm = presentation.permutation(self.options.len(), None);
    self.correct.iter().filter_map(|&c| shuffle::slot_of(&perm, c)).collect()
  }
}

impl Verify for MultiChoiceBody {
  fn reveal(&self, presentation: &Presentation<'_>) -> Value {
    json!(self.correct_slots(presentation))
  }

  fn verify(&self, presentation: &Presentation<'_>, answer: &Value) -> Result<Verdict, AppError> {
    let submitted: BTreeSet<usize> = answer
      .as_array()
      .ok_or_else(|| AppError::Validation("answer must be a list of option indices".into()))?
      .iter()
      .map(expect_index)
      .collect::<Result<_, _>>()?;

    let correct_slots = self.correct_slots(presentation);

    let good = submitted.intersection(&correct_slots).count() as f64;
    let bad = submitted.difference(&correct_slots).count() as f64;
    let is_correct = submitted == correct_slots;
    let fraction = if correct_slots.is_empty() { 0.0 } else { ((good - bad) / correct_slots.len() as f64).max(0.0) };
    Ok(Verdict::graded(is_correct, partial(is_correct, fraction), json!(correct_slots)))
  }
}

impl Verify for TrueFalseBody {
  fn reveal(&self, _presentation: &Presentation<'_>) -> Value {
    json!(self.correct)
  }

  fn verify(&self, _presentation: &Presentation<'_>, answer: &Value) -> Result<Verdict, AppError> {
    let given = answer
      .as_bool()
      .ok_or_else(|| AppError::Validation("answer must be true or false".into()))?;
    Ok(Verdict::graded(given == self.correct, None, json!(self.correct)))
  }
}

impl Verify for FillBlankBody {
  fn reveal(&self, _presentation: &Presentation<'_>) -> Value {
    json!(self.answers)
  }

  fn verify(&self, presentation: &Presentation<'_>, answer: &Value) -> Result<Verdict, AppError> {
    let given: Vec<String> = serde_json::from_value(answer.clone())
      .map_err(|_| AppError::Validation("answer must be a list of strings".into()))?;
    let matches = self
      .answers
      .iter()
      .enumerate()
      .filter(|(i, expected)| {
        given
          .get(*i)
          .map(|g| open_answer::normalize_text(g, self.case_sensitive) == open_answer::normalize_text(expected, self.case_sensitive))
          .unwrap_or(false)
      })
      .count();
    let total = self.answers.len().max(1);
    let is_correct = matches == self.answers.len();
    Ok(Verdict::graded(is_correct, partial(is_correct, matches as f64 / total as f64), self.reveal(presentation)))
  }
}

impl Verify for MatchingBody {
  fn reveal(&self, _presentation: &Presentation<'_>) -> Value {
    let truth: serde_json::Map<String, Value> =
      self.pairs.iter().map(|p| (p.left.clone(), Value::String(p.right.clone()))).collect();
    Value::Object(truth)
  }

  fn verify(&self, presentation: &Presentation<'_>, answer: &Value) -> Result<Verdict, AppError> {
    let given: HashMap<String, String> = serde_json::from_value(answer.clone())
      .map_err(|_| AppError::Validation("answer must map each left item to a right item".into()))?;
    let matches = self
      .pairs
      .iter()
      .filter(|p| given.get(&p.left).map(|r| r == &p.right).unwrap_or(false))
      .count();
    let is_correct = matches == self.pairs.len();
    let fraction = matches as f64 / self.pairs.len().max(1) as f64;
    Ok(Verdict::graded(is_correct, partial(is_correct, fraction), self.reveal(presentation)))
  }
}

impl Verify for OrderingBody {
  /// Presentation slots listed in the authored (correct) order.
  fn reveal(&self, presentation: &Presentation<'_>) -> Value {
    let perm = ordering_permutation(presentation, self);
    let slots: Vec<usize> = (0..self.items.len()).filter_map(|orig| shuffle::slot_of(&perm, orig)).collect();
    json!(slots)
  }

  fn verify(&self, presentation: &Presentation<'_>, answer: &Value) -> Result<Verdict, AppError> {
    let given: Vec<usize> = serde_json::from_value(answer.clone())
      .map_err(|_| AppError::Validation("answer must be the ordered list of item ids".into()))?;
    let perm = ordering_permutation(presentation, self);
    let in_place = given
      .iter()
      .enumerate()
      .filter(|(pos, slot)| perm.get(**slot) == Some(pos))
      .count();
    let expected = self.items.len();
    let is_correct = given.len() == expected && in_place == expected;
    let fraction = in_place as f64 / expected.max(1) as f64;
    Ok(Verdict::graded(is_correct, partial(is_correct, fraction), self.reveal(presentation)))
  }
}

impl Verify for OpenBody {
  fn reveal(&self, _presentation: &Presentation<'_>) -> Value {
    use crate::domain::TypedAnswer;
    match (&self.typed_answer, &self.sample_answer) {
      (_, Some(sample)) => json!(sample),
      (Some(TypedAnswer::Integer { value, .. }), None) | (Some(TypedAnswer::Year { value, .. }), None) => json!(value),
      (Some(TypedAnswer::Float { value, .. }), None) => json!(value),
      (Some(TypedAnswer::Date { value }), None) | (Some(TypedAnswer::Text { value, .. }), None) => json!(value),
      (Some(TypedAnswer::Regex { .. }), None) | (None, None) => json!(self.expected_keywords),
    }
  }

  fn verify(&self, presentation: &Presentation<'_>, answer: &Value) -> Result<Verdict, AppError> {
    let text = answer
      .as_str()
      .ok_or_else(|| AppError::Validation("answer must be text".into()))?;
    let grade = open_answer::grade_locally(self, text);
    Ok(Verdict {
      is_correct: grade.is_correct,
      partial_score: grade.partial_score,
      correct_answer: self.reveal(presentation),
      near_miss: grade.near_miss,
      graded: grade.graded,
      feedback: Some(grade.note),
      ai_evaluation: None,
    })
  }
}

impl Verify for MapLabelsBody {
  /// Label text for each target, in target order.
  fn reveal(&self, _presentation: &Presentation<'_>) -> Value {
    json!(self.labels.iter().map(|l| l.text.as_str()).collect::<Vec<_>>())
  }

  fn verify(&self, presentation: &Presentation<'_>, _answer: &Value) -> Result<Verdict, AppError> {
    Ok(Verdict {
      is_correct: false,
      partial_score: None,
      correct_answer: self.reveal(presentation),
      near_miss: false,
      graded: false,
      feedback: Some("Map labelling is not graded automatically.".into()),
      ai_evaluation: None,
    })
  }
}

fn strategy(body: &QuestionBody) -> &dyn Verify {
  match body {
    QuestionBody::Qcm(b) | QuestionBody::QcmImage(b) => b,
    QuestionBody::QcmMultiple(b) => b,
    QuestionBody::TrueFalse(b) => b,
    QuestionBody::FillBlank(b) => b,
    QuestionBody::Matching(b) => b,
    QuestionBody::Ordering(b) => b,
    QuestionBody::OpenShort(b) | QuestionBody::OpenLong(b) => b,
    QuestionBody::MapLabels(b) => b,
  }
}

/// Grade `answer` against `question` as presented in `session_id`.
pub fn verify(question: &Question, session_id: &str, answer: &Value) -> Result<Verdict, AppError> {
  if answer.is_null() && !matches!(question.body, QuestionBody::MapLabels(_)) {
    return Err(AppError::Validation("answer is required".into()));
  }
  let presentation = Presentation { session_id, question_id: &question.id };
  strategy(&question.body).verify(&presentation, answer)
}

/// The true answer as `session_id` presents it, without grading anything.
pub fn reveal(question: &Question, session_id: &str) -> Value {
  let presentation = Presentation { session_id, question_id: &question.id };
  strategy(&question.body).reveal(&presentation)
}

/// Permutation of the right column for a matching question.
pub fn matching_permutation(presentation: &Presentation<'_>, body: &MatchingBody) -> Vec<usize> {
  presentation.permutation(body.pairs.len(), Some(MATCHING_RIGHT_SUFFIX))
}

/// Permutation of the items of an ordering question.
pub fn ordering_permutation(presentation: &Presentation<'_>, body: &OrderingBody) -> Vec<usize> {
  presentation.permutation(body.items.len(), Some(ORDERING_ITEMS_SUFFIX))
}

/// Permutation of the label texts of a map question.
pub fn map_labels_permutation(presentation: &Presentation<'_>, body: &MapLabelsBody) -> Vec<usize> {
  presentation.permutation(body.labels.len(), Some(MAP_LABELS_SUFFIX))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{MatchPair, OrderItem, Tolerance, TypedAnswer};

  fn question(body: QuestionBody) -> Question {
    Question {
      id: "q-1".into(),
      subject: "math".into(),
      themes: vec!["numbers".into()],
      difficulty: HashMap::new(),
      competences: vec![],
      prompt: "?".into(),
      explanation: None,
      image: None,
      active: true,
      body,
    }
  }

  #[test]
  fn test_qcm_presented_correct_slot_verifies() {
    let body = ChoiceBody { options: vec!["a".into(), "b".into(), "c".into(), "d".into()], correct: 2 };
    let q = question(QuestionBody::Qcm(body));
    for session in ["s-1", "s-2", "s-3", "4bd0c1"] {
      let perm = shuffle::shuffle(4, &presentation_seed(session, "q-1", None));
      let slot = shuffle::slot_of(&perm, 2).unwrap();
      let v = verify(&q, session, &json!(slot)).unwrap();
      assert!(v.is_correct);
      assert_eq!(v.correct_answer, json!(slot));
      let wrong = (slot + 1) % 4;
      assert!(!verify(&q, session, &json!(wrong)).unwrap().is_correct);
    }
  }

  #[test]
  fn test_qcm_rejects_malformed_answer() {
    let q = question(QuestionBody::Qcm(ChoiceBody { options: vec!["a".into(), "b".into()], correct: 0 }));
    assert!(matches!(verify(&q, "s", &json!("zero")), Err(AppError::Validation(_))));
    assert!(matches!(verify(&q, "s", &Value::Null), Err(AppError::Validation(_))));
  }

  fn multi_slots(session: &str, originals: &[usize]) -> Vec<usize> {
    let perm = shuffle::shuffle(4, &presentation_seed(session, "q-1", None));
    originals.iter().map(|&o| shuffle::slot_of(&perm, o).unwrap()).collect()
  }

  #[test]
  fn test_qcm_multiple_full_and_partial_credit() {
    let body = MultiChoiceBody {
      options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
      correct: vec![0, 2],
    };
    let q = question(QuestionBody::QcmMultiple(body));

    let both = multi_slots("sess", &[0, 2]);
    let v = verify(&q, "sess", &json!(both)).unwrap();
    assert!(v.is_correct);
    assert_eq!(v.partial_score, None);
    assert_eq!(v.score_value(), 1.0);

    let one = multi_slots("sess", &[0]);
    let v = verify(&q, "sess", &json!(one)).unwrap();
    assert!(!v.is_correct);
    assert_eq!(v.partial_score, Some(0.5));

    let one_wrong = multi_slots("sess", &[0, 1]);
    let v = verify(&q, "sess", &json!(one_wrong)).unwrap();
    assert_eq!(v.partial_score, Some(0.0));

    let all_wrong = multi_slots("sess", &[1, 3]);
    assert_eq!(verify(&q, "sess", &json!(all_wrong)).unwrap().partial_score, Some(0.0));
  }

  #[test]
  fn test_true_false() {
    let q = question(QuestionBody::TrueFalse(TrueFalseBody { correct: false }));
    assert!(verify(&q, "s", &json!(false)).unwrap().is_correct);
    assert!(!verify(&q, "s", &json!(true)).unwrap().is_correct);
    assert!(verify(&q, "s", &json!("false")).is_err());
  }

  #[test]
  fn test_fill_blank_case_insensitive() {
    let q = question(QuestionBody::FillBlank(FillBlankBody {
      text: "___ cm = 1 m, reste ___".into(),
      answers: vec!["100".into(), "0".into()],
      case_sensitive: false,
    }));
    assert!(verify(&q, "s", &json!(["100", "0"])).unwrap().is_correct);

    let words = question(QuestionBody::FillBlank(FillBlankBody {
      text: "La capitale est ___".into(),
      answers: vec!["Paris".into(), "Seine".into()],
      case_sensitive: false,
    }));
    assert!(verify(&words, "s", &json!(["PARIS", " seine "])).unwrap().is_correct);
    let half = verify(&words, "s", &json!(["paris", "loire"])).unwrap();
    assert!(!half.is_correct);
    assert_eq!(half.partial_score, Some(0.5));
    let short = verify(&words, "s", &json!(["paris"])).unwrap();
    assert_eq!(short.partial_score, Some(0.5));
  }

  #[test]
  fn test_fill_blank_case_sensitive() {
    let q = question(QuestionBody::FillBlank(FillBlankBody {
      text: "___".into(),
      answers: vec!["H2O".into()],
      case_sensitive: true,
    }));
    assert!(verify(&q, "s", &json!(["H2O"])).unwrap().is_correct);
    assert!(!verify(&q, "s", &json!(["h2o"])).unwrap().is_correct);
  }

  #[test]
  fn test_matching_pairs() {
    let q = question(QuestionBody::Matching(MatchingBody {
      pairs: vec![
        MatchPair { left: "France".into(), right: "Paris".into() },
        MatchPair { left: "Italie".into(), right: "Rome".into() },
        MatchPair { left: "Espagne".into(), right: "Madrid".into() },
        MatchPair { left: "Allemagne".into(), right: "Berlin".into() },
      ],
    }));
    let all = json!({"France": "Paris", "Italie": "Rome", "Espagne": "Madrid", "Allemagne": "Berlin"});
    assert!(verify(&q, "s", &all).unwrap().is_correct);
    let swapped = json!({"France": "Rome", "Italie": "Paris", "Espagne": "Madrid", "Allemagne": "Berlin"});
    let v = verify(&q, "s", &swapped).unwrap();
    assert!(!v.is_correct);
    assert_eq!(v.partial_score, Some(0.5));
    assert_eq!(v.correct_answer["Italie"], json!("Rome"));
  }

  #[test]
  fn test_ordering_positions() {
    let items = ["a", "b", "c", "d"]
      .iter()
      .map(|id| OrderItem { id: id.to_string(), text: id.to_uppercase() })
      .collect();
    let q = question(QuestionBody::Ordering(OrderingBody { items }));
    let presentation = Presentation { session_id: "s", question_id: &q.id };
    let QuestionBody::Ordering(body) = &q.body else { unreachable!() };
    let perm = ordering_permutation(&presentation, body);
    let slot = |orig: usize| shuffle::slot_of(&perm, orig).unwrap();

    let truth = json!([slot(0), slot(1), slot(2), slot(3)]);
    assert_eq!(reveal(&q, "s"), truth);
    assert!(verify(&q, "s", &truth).unwrap().is_correct);
    let v = verify(&q, "s", &json!([slot(0), slot(2), slot(1), slot(3)])).unwrap();
    assert!(!v.is_correct);
    assert_eq!(v.partial_score, Some(0.5));
    assert_eq!(verify(&q, "s", &json!([slot(0), slot(1), slot(2)])).unwrap().partial_score, Some(0.75));
    assert!(matches!(verify(&q, "s", &json!(["a", "b", "c", "d"])), Err(AppError::Validation(_))));
  }

  #[test]
  fn test_ordering_presentation_order_is_not_the_answer() {
    let items: Vec<OrderItem> = (0..5).map(|i| OrderItem { id: format!("i{i}"), text: format!("t{i}") }).collect();
    let q = question(QuestionBody::Ordering(OrderingBody { items }));
    let sessions: Vec<String> = (0..20).map(|n| format!("sess-{n}")).collect();
    let correct_when_sorted = sessions
      .iter()
      .filter(|s| verify(&q, s, &json!([0, 1, 2, 3, 4])).unwrap().is_correct)
      .count();
    assert!(correct_when_sorted < sessions.len());
  }

  #[test]
  fn test_open_typed_answer_reports_near_miss() {
    let q = question(QuestionBody::OpenShort(OpenBody {
      typed_answer: Some(TypedAnswer::Integer { value: 56, tolerance: Some(Tolerance::Absolute(0.5)) }),
      ..OpenBody::default()
    }));
    let v = verify(&q, "s", &json!("57")).unwrap();
    assert!(!v.is_correct);
    assert!(v.near_miss);
    assert_eq!(v.correct_answer, json!(56));
    assert!(verify(&q, "s", &json!("56")).unwrap().is_correct);
  }

  #[test]
  fn test_open_keywords_fallback() {
    let q = question(QuestionBody::OpenLong(OpenBody {
      expected_keywords: vec!["évaporation".into(), "condensation".into(), "précipitations".into()],
      ..OpenBody::default()
    }));
    let v = verify(&q, "s", &json!("L'évaporation puis la condensation.")).unwrap();
    assert!(v.is_correct);
    assert!((v.partial_score.unwrap() - 2.0 / 3.0).abs() < 1e-9);
  }

  #[test]
  fn test_map_labels_is_not_graded() {
    let q = question(QuestionBody::MapLabels(MapLabelsBody {
      map_url: "/maps/france.svg".into(),
      labels: vec![crate::domain::MapLabel { id: "l1".into(), text: "Paris".into(), x: 0.5, y: 0.3 }],
    }));
    let v = verify(&q, "s", &Value::Null).unwrap();
    assert!(!v.graded);
    assert!(!v.is_correct);
  }
}
