//! Domain models: quizzes, polymorphic questions, sessions, answer records,
//! mastery records and the badge catalog.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of the opaque identifiers handed to learners without an account.
pub const ANONYMOUS_PREFIX: &str = "anon-";

pub fn is_anonymous(user_id: &str) -> bool {
  user_id.is_empty() || user_id.starts_with(ANONYMOUS_PREFIX)
}

/// Ordered mastery level ("niveau"). Always derived from points.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
  #[default]
  Novice,
  Apprentice,
  Proficient,
  Expert,
  Master,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  #[default]
  Easy,
  Medium,
  Hard,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
  #[default]
  Revision,
  Exam,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
  InProgress,
  Completed,
  Abandoned,
}

fn default_true() -> bool { true }

/// Quiz definition owned by content authoring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quiz {
  pub id: String,
  pub slug: String,
  pub title: String,
  #[serde(default)] pub subject: Option<String>,
  #[serde(default)] pub themes: Vec<String>,
  #[serde(default)] pub max_questions: Option<usize>,
  #[serde(default)] pub default_mode: SessionMode,
  #[serde(default)] pub time_limit_secs: Option<u32>,
  #[serde(default = "default_true")] pub active: bool,
}

/// Wire name of each question variant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  Qcm,
  QcmImage,
  QcmMultiple,
  TrueFalse,
  FillBlank,
  Matching,
  Ordering,
  OpenShort,
  OpenLong,
  MapLabels,
}

/// Authored question. The correctness-bearing part lives in `body`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Question {
  pub id: String,
  pub subject: String,
  #[serde(default)] pub themes: Vec<String>,
  /// Difficulty per grade id. Grades without an entry count as easy.
  #[serde(default)] pub difficulty: HashMap<String, Difficulty>,
  #[serde(default)] pub competences: Vec<String>,
  pub prompt: String,
  #[serde(default)] pub explanation: Option<String>,
  #[serde(default)] pub image: Option<String>,
  #[serde(default = "default_true")] pub active: bool,
  #[serde(flatten)]
  pub body: QuestionBody,
}

impl Question {
  pub fn difficulty_for(&self, grade_id: Option<&str>) -> Difficulty {
    grade_id
      .and_then(|g| self.difficulty.get(g).copied())
      .unwrap_or_default()
  }

  pub fn question_type(&self) -> QuestionType {
    self.body.question_type()
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "question_type", rename_all = "snake_case")]
pub enum QuestionBody {
  Qcm(ChoiceBody),
  QcmImage(ChoiceBody),
  QcmMultiple(MultiChoiceBody),
  TrueFalse(TrueFalseBody),
  FillBlank(FillBlankBody),
  Matching(MatchingBody),
  Ordering(OrderingBody),
  OpenShort(OpenBody),
  OpenLong(OpenBody),
  MapLabels(MapLabelsBody),
}

impl QuestionBody {
  pub fn question_type(&self) -> QuestionType {
    match self {
      QuestionBody::Qcm(_) => QuestionType::Qcm,
      QuestionBody::QcmImage(_) => QuestionType::QcmImage,
      QuestionBody::QcmMultiple(_) => QuestionType::QcmMultiple,
      QuestionBody::TrueFalse(_) => QuestionType::TrueFalse,
      QuestionBody::FillBlank(_) => QuestionType::FillBlank,
      QuestionBody::Matching(_) => QuestionType::Matching,
      QuestionBody::Ordering(_) => QuestionType::Ordering,
      QuestionBody::OpenShort(_) => QuestionType::OpenShort,
      QuestionBody::OpenLong(_) => QuestionType::OpenLong,
      QuestionBody::MapLabels(_) => QuestionType::MapLabels,
    }
  }
}

/// Single-answer multiple choice (`qcm`, `qcm_image`). `correct` indexes `options`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChoiceBody {
  pub options: Vec<String>,
  pub correct: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiChoiceBody {
  pub options: Vec<String>,
  pub correct: Vec<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrueFalseBody {
  pub correct: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FillBlankBody {
  /// Text with one `___` marker per blank.
  pub text: String,
  pub answers: Vec<String>,
  #[serde(default)] pub case_sensitive: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchPair {
  pub left: String,
  pub right: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingBody {
  pub pairs: Vec<MatchPair>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
  pub id: String,
  pub text: String,
}

/// Items are authored in their correct order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderingBody {
  pub items: Vec<OrderItem>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OpenBody {
  #[serde(default)] pub expected_keywords: Vec<String>,
  #[serde(default)] pub typed_answer: Option<TypedAnswer>,
  #[serde(default)] pub sample_answer: Option<String>,
  /// Free-form rubric handed to the AI grader.
  #[serde(default)] pub rubric: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Tolerance {
  Absolute(f64),
  Percent(f64),
}

/// Structured expected answer for open questions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypedAnswer {
  Integer { value: i64, #[serde(default)] tolerance: Option<Tolerance> },
  Float { value: f64, #[serde(default)] tolerance: Option<Tolerance> },
  Year { value: i64, #[serde(default)] tolerance: Option<Tolerance> },
  Date { value: String },
  Regex { pattern: String, #[serde(default)] case_insensitive: bool },
  Text {
    value: String,
    #[serde(default)] alternates: Vec<String>,
    #[serde(default)] case_sensitive: bool,
  },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapLabel {
  pub id: String,
  pub text: String,
  pub x: f64,
  pub y: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapLabelsBody {
  pub map_url: String,
  pub labels: Vec<MapLabel>,
}

/// Store key of a mastery record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryKey {
  pub user_id: String,
  pub subject: String,
  pub theme: String,
  pub grade_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
  #[serde(flatten)]
  pub key: MasteryKey,
  pub points: u32,
  pub tier: Tier,
  pub quizzes_completed: u32,
  pub correct_answers: u32,
  pub total_answers: u32,
  pub best_score: f64,
  pub last_practiced_at: Option<DateTime<Utc>>,
}

impl MasteryRecord {
  pub fn new(key: MasteryKey) -> Self {
    Self {
      key,
      points: 0,
      tier: Tier::Novice,
      quizzes_completed: 0,
      correct_answers: 0,
      total_answers: 0,
      best_score: 0.0,
      last_practiced_at: None,
    }
  }
}

/// Looser per-competence accuracy counter (no tiers).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetenceRecord {
  pub user_id: String,
  pub competence: String,
  pub correct_answers: u32,
  pub total_answers: u32,
  pub last_practiced_at: Option<DateTime<Utc>>,
}

/// Qualitative grading returned by the AI rubric evaluator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiEvaluation {
  pub score: f64,
  pub feedback: String,
  #[serde(default)] pub strengths: Vec<String>,
  #[serde(default)] pub improvements: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
  pub question_index: usize,
  pub question_id: String,
  pub question_type: QuestionType,
  pub answer: serde_json::Value,
  pub correct_answer: serde_json::Value,
  pub is_correct: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub partial_score: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ai_evaluation: Option<AiEvaluation>,
  #[serde(default)] pub skipped: bool,
  #[serde(default)] pub near_miss: bool,
  pub answered_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
  pub id: String,
  pub user_id: String,
  pub quiz_id: String,
  pub quiz_slug: String,
  pub grade_id: Option<String>,
  pub question_ids: Vec<String>,
  pub current_index: usize,
  pub answers: Vec<AnswerRecord>,
  pub saved_answers: HashMap<usize, serde_json::Value>,
  pub score: f64,
  pub total_questions: usize,
  pub status: SessionStatus,
  pub mode: SessionMode,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub last_activity_at: DateTime<Utc>,
  // Exam timer; carried but not enforced.
  pub time_limit_secs: Option<u32>,
  pub timer_started_at: Option<DateTime<Utc>>,
}

impl QuizSession {
  pub fn answer_for(&self, index: usize) -> Option<&AnswerRecord> {
    self.answers.iter().find(|a| a.question_index == index)
  }

  pub fn percentage(&self) -> f64 {
    if self.total_questions == 0 {
      0.0
    } else {
      self.score / self.total_questions as f64 * 100.0
    }
  }

  pub fn time_remaining_secs(&self, now: DateTime<Utc>) -> Option<i64> {
    let limit = self.time_limit_secs? as i64;
    let started = self.timer_started_at?;
    Some((limit - (now - started).num_seconds()).max(0))
  }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
  #[default]
  Common,
  Rare,
  Epic,
  Legendary,
}

/// Badge condition descriptor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BadgeCondition {
  QuizzesCompleted { count: u32 },
  PerfectScores { count: u32 },
  PerfectExams { count: u32 },
  Streak { days: u32 },
  BestStreak { days: u32 },
  /// Completed before this hour of the day (UTC).
  CompletedBeforeHour { hour: u32 },
  /// Completed at or after this hour of the day (UTC).
  CompletedAfterHour { hour: u32 },
  CorrectInARow { count: u32 },
  /// Cross-subject mastery comparison; not evaluated yet.
  SubjectMastery { tier: Tier, subjects: u32 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Badge {
  pub slug: String,
  pub name: String,
  #[serde(default)] pub description: String,
  pub condition: BadgeCondition,
  #[serde(default)] pub rarity: Rarity,
  #[serde(default)] pub points: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBadge {
  pub user_id: String,
  pub badge_slug: String,
  pub earned_at: DateTime<Utc>,
}

/// Collaborator data about a learner.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserProfile {
  pub user_id: String,
  #[serde(default)] pub grade_id: Option<String>,
  #[serde(default)] pub premium_grading: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
  pub user_id: String,
  pub current_streak: u32,
  pub best_streak: u32,
  pub last_activity_date: Option<NaiveDate>,
  pub badge_points: u32,
}
