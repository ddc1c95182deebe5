//! Session lifecycle: create/resume, question delivery, revision answers,
//! exam save/submit, abandon.
//!
//! Sessions move `in_progress -> completed` or `in_progress -> abandoned`
//! and never leave a terminal state. Every mutation is committed through
//! `Store::update_session`, which re-checks state under the session lock, so
//! grading (possibly a slow AI call) runs outside the lock and the commit
//! still rejects a second answer for the same index.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::achievements;
use crate::domain::{
  is_anonymous, AnswerRecord, Badge, MasteryKey, Question, QuestionType, Quiz, QuizSession, SessionMode,
  SessionStatus, Tier,
};
use crate::error::{AppError, AppResult};
use crate::grading;
use crate::mastery::{self, Reward};
use crate::selector;
use crate::state::AppState;
use crate::store::Store;
use crate::util::new_anonymous_id;
use crate::verifier::{self, Verdict};

/// Grade bucket used for completion rewards when neither the session nor the
/// learner profile names a grade.
pub const UNGRADED_BUCKET: &str = "ungraded";

#[derive(Clone, Debug, Default)]
pub struct CreateSession {
  pub user_id: Option<String>,
  pub grade_id: Option<String>,
  pub mode: Option<SessionMode>,
}

#[derive(Clone, Debug)]
pub struct SessionStart {
  pub session: QuizSession,
  pub quiz: Quiz,
  pub user_niveau: Option<Tier>,
  pub resumed: bool,
}

#[derive(Clone, Debug)]
pub struct QuizInfo {
  pub quiz: Quiz,
  pub available_questions: usize,
}

#[derive(Clone, Debug)]
pub struct Delivery {
  pub session: QuizSession,
  pub index: usize,
  pub question: Question,
  pub previous_answer: Option<AnswerRecord>,
  pub saved_answer: Option<Value>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  #[default]
  Answer,
  Save,
  Submit,
}

#[derive(Clone, Debug)]
pub struct Submission {
  pub index: Option<usize>,
  pub answer: Value,
  pub question_type: Option<QuestionType>,
  pub action: Action,
}

#[derive(Clone, Debug)]
pub struct Answered {
  pub session: QuizSession,
  pub record: AnswerRecord,
  pub explanation: Option<String>,
  pub feedback: Option<String>,
  pub new_badges: Vec<Badge>,
}

#[derive(Clone, Debug)]
pub enum Outcome {
  Answered(Box<Answered>),
  Saved { session: QuizSession, index: usize },
  Submitted { session: QuizSession, new_badges: Vec<Badge> },
}

// ---- helpers ----

async fn active_quiz(store: &Store, slug: &str) -> AppResult<Quiz> {
  store
    .quiz_by_slug(slug)
    .await
    .filter(|q| q.active)
    .ok_or_else(|| AppError::NotFound(format!("quiz {}", slug)))
}

async fn load_session(store: &Store, session_id: &str) -> AppResult<QuizSession> {
  store
    .session(session_id)
    .await
    .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))
}

async fn load_question(store: &Store, question_id: &str) -> AppResult<Question> {
  store
    .question(question_id)
    .await
    .ok_or_else(|| AppError::NotFound(format!("question {}", question_id)))
}

fn ensure_in_progress(session: &QuizSession) -> AppResult<()> {
  match session.status {
    SessionStatus::InProgress => Ok(()),
    other => Err(AppError::InvalidState(format!("session {} is {:?}", session.id, other))),
  }
}

fn question_id_at(session: &QuizSession, index: usize) -> AppResult<&str> {
  session
    .question_ids
    .get(index)
    .map(String::as_str)
    .ok_or_else(|| AppError::NotFound(format!("question index {} (session has {})", index, session.total_questions)))
}

fn ensure_type(question: &Question, declared: Option<QuestionType>) -> AppResult<()> {
  match declared {
    Some(t) if t != question.question_type() => Err(AppError::Validation(format!(
      "questionType {:?} does not match question {} ({:?})",
      t,
      question.id,
      question.question_type()
    ))),
    _ => Ok(()),
  }
}

/// Adaptive mode needs a known learner and a grade.
fn adaptive_grade(session: &QuizSession) -> Option<&str> {
  if is_anonymous(&session.user_id) {
    None
  } else {
    session.grade_id.as_deref()
  }
}

/// Distinct (subject, theme) pairs covered by `questions`.
fn theme_pairs<'a, I>(questions: I) -> BTreeSet<(String, String)>
where
  I: IntoIterator<Item = &'a Question>,
{
  questions
    .into_iter()
    .flat_map(|q| q.themes.iter().map(move |t| (q.subject.clone(), t.clone())))
    .collect()
}

fn mastery_key(user_id: &str, subject: &str, theme: &str, grade_id: &str) -> MasteryKey {
  MasteryKey {
    user_id: user_id.to_string(),
    subject: subject.to_string(),
    theme: theme.to_string(),
    grade_id: grade_id.to_string(),
  }
}

/// Quiz themes first, then the quiz subject, then every active question.
async fn candidate_pool(store: &Store, quiz: &Quiz) -> Vec<Question> {
  if !quiz.themes.is_empty() {
    let by_theme = store
      .active_questions_where(|q| q.themes.iter().any(|t| quiz.themes.contains(t)))
      .await;
    if !by_theme.is_empty() {
      return by_theme;
    }
  }
  if let Some(subject) = &quiz.subject {
    let by_subject = store.active_questions_where(|q| &q.subject == subject).await;
    if !by_subject.is_empty() {
      return by_subject;
    }
  }
  store.active_questions_where(|_| true).await
}

/// Effective tier over the given pairs; missing records count as novice.
async fn current_niveau(store: &Store, user_id: &str, grade_id: &str, pairs: &BTreeSet<(String, String)>) -> Tier {
  let mut tiers = Vec::with_capacity(pairs.len());
  for (subject, theme) in pairs {
    let tier = store
      .mastery(&mastery_key(user_id, subject, theme, grade_id))
      .await
      .map(|r| r.tier)
      .unwrap_or_default();
    tiers.push(tier);
  }
  mastery::effective_tier(&tiers)
}

// ---- create / info ----

#[instrument(level = "info", skip(state, req), fields(user = ?req.user_id, grade = ?req.grade_id))]
pub async fn create_session(state: &AppState, slug: &str, req: CreateSession) -> AppResult<SessionStart> {
  let store = &state.store;
  let quiz = active_quiz(store, slug).await?;
  let user_id = req
    .user_id
    .map(|u| u.trim().to_string())
    .filter(|u| !u.is_empty())
    .unwrap_or_else(new_anonymous_id);

  if let Some(existing) = store.find_in_progress_session(&user_id, &quiz.id).await {
    info!(target: "session", session_id = %existing.id, user = %user_id, quiz = %quiz.slug, "Resuming in-progress session");
    let user_niveau = resumed_niveau(store, &existing).await;
    return Ok(SessionStart { session: existing, quiz, user_niveau, resumed: true });
  }

  let grade_id = match req.grade_id.filter(|g| !g.trim().is_empty()) {
    Some(g) => Some(g),
    None if !is_anonymous(&user_id) => store.profile(&user_id).await.and_then(|p| p.grade_id),
    None => None,
  };

  let pool = candidate_pool(store, &quiz).await;
  if pool.is_empty() {
    return Err(AppError::InvalidState(format!("quiz {} has no active questions", quiz.slug)));
  }
  let cap = quiz.max_questions.unwrap_or(pool.len());

  let (chosen, user_niveau) = match grade_id.as_deref().filter(|_| !is_anonymous(&user_id)) {
    Some(grade) => {
      let pairs = theme_pairs(&pool);
      let mut tiers = Vec::with_capacity(pairs.len());
      for (subject, theme) in &pairs {
        let record = store.get_or_create_mastery(mastery_key(&user_id, subject, theme, grade)).await?;
        tiers.push(record.tier);
      }
      let tier = mastery::effective_tier(&tiers);
      let chosen = {
        let mut rng = rand::thread_rng();
        selector::select(&pool, tier, cap, Some(grade), &mut rng)
      };
      debug!(target: "session", ?tier, themes = pairs.len(), "Adaptive selection");
      (chosen, Some(tier))
    }
    None => {
      let chosen = {
        let mut rng = rand::thread_rng();
        selector::random_subset(&pool, Some(cap), &mut rng)
      };
      (chosen, None)
    }
  };

  let now = Utc::now();
  let mode = req.mode.unwrap_or(quiz.default_mode);
  let question_ids: Vec<String> = chosen.into_iter().map(|q| q.id).collect();
  let candidate = QuizSession {
    id: uuid::Uuid::new_v4().to_string(),
    user_id: user_id.clone(),
    quiz_id: quiz.id.clone(),
    quiz_slug: quiz.slug.clone(),
    grade_id,
    total_questions: question_ids.len(),
    question_ids,
    current_index: 0,
    answers: Vec::new(),
    saved_answers: Default::default(),
    score: 0.0,
    status: SessionStatus::InProgress,
    mode,
    started_at: now,
    completed_at: None,
    last_activity_at: now,
    time_limit_secs: if mode == SessionMode::Exam { quiz.time_limit_secs } else { None },
    timer_started_at: if mode == SessionMode::Exam { Some(now) } else { None },
  };

  let (session, resumed) = store.insert_session_or_resume(candidate).await?;
  info!(
    target: "session",
    session_id = %session.id,
    user = %session.user_id,
    quiz = %quiz.slug,
    ?mode,
    questions = session.total_questions,
    resumed,
    "Session ready"
  );
  Ok(SessionStart { session, quiz, user_niveau, resumed })
}

async fn resumed_niveau(store: &Store, session: &QuizSession) -> Option<Tier> {
  let grade = adaptive_grade(session)?;
  let mut questions = Vec::with_capacity(session.question_ids.len());
  for id in &session.question_ids {
    if let Some(q) = store.question(id).await {
      questions.push(q);
    }
  }
  Some(current_niveau(store, &session.user_id, grade, &theme_pairs(&questions)).await)
}

pub async fn quiz_info(state: &AppState, slug: &str) -> AppResult<QuizInfo> {
  let quiz = active_quiz(&state.store, slug).await?;
  let available_questions = candidate_pool(&state.store, &quiz).await.len();
  Ok(QuizInfo { quiz, available_questions })
}

// ---- delivery ----

#[instrument(level = "info", skip(state))]
pub async fn deliver_question(state: &AppState, session_id: &str, index: usize) -> AppResult<Delivery> {
  let store = &state.store;
  let mut session = load_session(store, session_id).await?;
  ensure_in_progress(&session)?;
  let question = load_question(store, question_id_at(&session, index)?).await?;

  if session.grade_id.is_none() && !is_anonymous(&session.user_id) {
    if let Some(grade) = store.profile(&session.user_id).await.and_then(|p| p.grade_id) {
      let (updated, _) = store
        .update_session(&session.id, |s| {
          s.grade_id.get_or_insert(grade);
          Ok(())
        })
        .await?;
      debug!(target: "session", session_id = %session.id, grade = ?updated.grade_id, "Backfilled grade from profile");
      session = updated;
    }
  }

  if let Some(grade) = adaptive_grade(&session) {
    for theme in &question.themes {
      store
        .get_or_create_mastery(mastery_key(&session.user_id, &question.subject, theme, grade))
        .await?;
    }
  }

  let previous_answer = session.answer_for(index).cloned();
  let saved_answer = match session.mode {
    SessionMode::Exam => session.saved_answers.get(&index).cloned(),
    SessionMode::Revision => None,
  };
  Ok(Delivery { session, index, question, previous_answer, saved_answer })
}

// ---- answers ----

#[instrument(level = "info", skip(state, submission), fields(question_index = ?submission.index, action = ?submission.action))]
pub async fn submit(state: &AppState, session_id: &str, submission: Submission) -> AppResult<Outcome> {
  let session = load_session(&state.store, session_id).await?;
  ensure_in_progress(&session)?;
  match (session.mode, submission.action) {
    (SessionMode::Revision, Action::Answer) => answer_revision(state, session, submission).await,
    (SessionMode::Exam, Action::Save) => save_exam_answer(state, session, submission).await,
    (SessionMode::Exam, Action::Submit) => submit_exam(state, session, submission).await,
    (mode, action) => Err(AppError::InvalidState(format!("action {:?} is not valid in {:?} mode", action, mode))),
  }
}

fn required_index(submission: &Submission) -> AppResult<usize> {
  submission
    .index
    .ok_or_else(|| AppError::Validation("questionIndex is required".into()))
}

fn answer_record(index: usize, question: &Question, answer: Value, verdict: &Verdict, now: DateTime<Utc>) -> AnswerRecord {
  AnswerRecord {
    question_index: index,
    question_id: question.id.clone(),
    question_type: question.question_type(),
    answer,
    correct_answer: verdict.correct_answer.clone(),
    is_correct: verdict.is_correct,
    partial_score: verdict.partial_score,
    ai_evaluation: verdict.ai_evaluation.clone(),
    skipped: false,
    near_miss: verdict.near_miss,
    answered_at: now,
  }
}

async fn premium_grading(store: &Store, user_id: &str) -> bool {
  if is_anonymous(user_id) {
    return false;
  }
  store.profile(user_id).await.map(|p| p.premium_grading).unwrap_or(false)
}

async fn answer_revision(state: &AppState, session: QuizSession, submission: Submission) -> AppResult<Outcome> {
  let index = required_index(&submission)?;
  if session.answer_for(index).is_some() {
    return Err(AppError::InvalidState(format!("question {} already answered", index)));
  }
  let question = load_question(&state.store, question_id_at(&session, index)?).await?;
  ensure_type(&question, submission.question_type)?;

  let premium = premium_grading(&state.store, &session.user_id).await;
  let verdict = grading::grade(state, &question, &session.id, &submission.answer, premium).await?;
  let now = Utc::now();
  let record = answer_record(index, &question, submission.answer, &verdict, now);

  let (session, completed) = state
    .store
    .update_session(&session.id, |s| {
      ensure_in_progress(s)?;
      if s.answer_for(index).is_some() {
        return Err(AppError::InvalidState(format!("question {} already answered", index)));
      }
      s.answers.push(record.clone());
      s.score += verdict.score_value();
      s.current_index = s.current_index.max(index + 1);
      s.last_activity_at = now;
      let completed = s.answers.len() >= s.total_questions;
      if completed {
        s.status = SessionStatus::Completed;
        s.completed_at = Some(now);
      }
      Ok(completed)
    })
    .await?;

  info!(
    target: "session",
    session_id = %session.id,
    question_index = index,
    question_id = %question.id,
    correct = record.is_correct,
    partial = ?record.partial_score,
    score = session.score,
    completed,
    "Answer recorded"
  );

  apply_answer_effects(state, &session, &question, &verdict, now).await?;
  let new_badges = if completed { finish_session(state, &session, now).await? } else { Vec::new() };

  Ok(Outcome::Answered(Box::new(Answered {
    session,
    record,
    explanation: question.explanation.clone(),
    feedback: verdict.feedback,
    new_badges,
  })))
}

async fn save_exam_answer(state: &AppState, session: QuizSession, submission: Submission) -> AppResult<Outcome> {
  let index = required_index(&submission)?;
  if submission.answer.is_null() {
    return Err(AppError::Validation("answer is required".into()));
  }
  let question = load_question(&state.store, question_id_at(&session, index)?).await?;
  ensure_type(&question, submission.question_type)?;

  let now = Utc::now();
  let answer = submission.answer;
  let (session, _) = state
    .store
    .update_session(&session.id, |s| {
      ensure_in_progress(s)?;
      s.saved_answers.insert(index, answer);
      s.current_index = s.current_index.max(index + 1);
      s.last_activity_at = now;
      Ok(())
    })
    .await?;
  debug!(target: "session", session_id = %session.id, question_index = index, saved = session.saved_answers.len(), "Exam answer saved");
  Ok(Outcome::Saved { session, index })
}

/// Grade every saved choice, synthesize skipped records for the rest and
/// complete the session in one commit.
async fn submit_exam(state: &AppState, session: QuizSession, submission: Submission) -> AppResult<Outcome> {
  let mut saved = session.saved_answers.clone();
  // A final choice may ride along with the submit.
  if let Some(index) = submission.index {
    if !submission.answer.is_null() {
      question_id_at(&session, index)?;
      saved.insert(index, submission.answer.clone());
    }
  }

  let premium = premium_grading(&state.store, &session.user_id).await;
  let now = Utc::now();
  let mut records = Vec::with_capacity(session.total_questions);
  let mut graded: Vec<(Question, Verdict)> = Vec::new();
  let mut score = 0.0;

  for (index, question_id) in session.question_ids.iter().enumerate() {
    let question = load_question(&state.store, question_id).await?;
    match saved.get(&index) {
      Some(raw) => match grading::grade(state, &question, &session.id, raw, premium).await {
        Ok(verdict) => {
          score += verdict.score_value();
          records.push(answer_record(index, &question, raw.clone(), &verdict, now));
          graded.push((question, verdict));
        }
        Err(AppError::Validation(msg)) => {
          warn!(target: "session", session_id = %session.id, question_index = index, error = %msg, "Malformed saved answer; recorded as incorrect");
          records.push(AnswerRecord {
            question_index: index,
            question_id: question.id.clone(),
            question_type: question.question_type(),
            answer: raw.clone(),
            correct_answer: verifier::reveal(&question, &session.id),
            is_correct: false,
            partial_score: None,
            ai_evaluation: None,
            skipped: false,
            near_miss: false,
            answered_at: now,
          });
        }
        Err(e) => return Err(e),
      },
      None => records.push(AnswerRecord {
        question_index: index,
        question_id: question.id.clone(),
        question_type: question.question_type(),
        answer: Value::Null,
        correct_answer: verifier::reveal(&question, &session.id),
        is_correct: false,
        partial_score: None,
        ai_evaluation: None,
        skipped: true,
        near_miss: false,
        answered_at: now,
      }),
    }
  }

  let (session, _) = state
    .store
    .update_session(&session.id, |s| {
      ensure_in_progress(s)?;
      s.saved_answers = saved;
      s.answers = records;
      s.score = score;
      s.current_index = s.total_questions;
      s.status = SessionStatus::Completed;
      s.completed_at = Some(now);
      s.last_activity_at = now;
      Ok(())
    })
    .await?;

  let skipped = session.answers.iter().filter(|a| a.skipped).count();
  info!(target: "session", session_id = %session.id, score = session.score, total = session.total_questions, skipped, "Exam submitted");

  for (question, verdict) in &graded {
    apply_answer_effects(state, &session, question, verdict, now).await?;
  }
  let new_badges = finish_session(state, &session, now).await?;
  Ok(Outcome::Submitted { session, new_badges })
}

/// Competence counters for known learners and per-answer mastery deltas in
/// adaptive sessions. Ungraded verdicts leave both untouched.
async fn apply_answer_effects(
  state: &AppState,
  session: &QuizSession,
  question: &Question,
  verdict: &Verdict,
  now: DateTime<Utc>,
) -> AppResult<()> {
  if is_anonymous(&session.user_id) || !verdict.graded {
    return Ok(());
  }
  let store = &state.store;
  for competence in &question.competences {
    store.record_competence(&session.user_id, competence, verdict.is_correct, now).await;
  }

  let Some(grade) = adaptive_grade(session) else {
    return Ok(());
  };
  let difficulty = question.difficulty_for(Some(grade));
  let reward = Reward::PerAnswer { difficulty, is_correct: verdict.is_correct };
  for theme in &question.themes {
    let key = mastery_key(&session.user_id, &question.subject, theme, grade);
    store.get_or_create_mastery(key.clone()).await?;
    let (record, delta) = store.update_mastery(&key, |r| mastery::award(r, reward, now)).await?;
    debug!(
      target: "mastery",
      user = %key.user_id,
      subject = %key.subject,
      theme = %key.theme,
      delta,
      points = record.points,
      tier = ?record.tier,
      "Per-answer delta applied"
    );
  }
  Ok(())
}

/// Completion bookkeeping for a just-completed session: mastery completion
/// (points-free when points were credited per answer) then streak and badges.
async fn finish_session(state: &AppState, session: &QuizSession, now: DateTime<Utc>) -> AppResult<Vec<Badge>> {
  if is_anonymous(&session.user_id) {
    return Ok(Vec::new());
  }
  let store = &state.store;
  let percentage = session.percentage();

  let mut questions = Vec::with_capacity(session.question_ids.len());
  for id in &session.question_ids {
    if let Some(q) = store.question(id).await {
      questions.push(q);
    }
  }
  let pairs = theme_pairs(&questions);

  match adaptive_grade(session) {
    Some(grade) => {
      for (subject, theme) in &pairs {
        let key = mastery_key(&session.user_id, subject, theme, grade);
        store.get_or_create_mastery(key.clone()).await?;
        store.update_mastery(&key, |r| mastery::record_quiz_completion(r, percentage, now)).await?;
      }
    }
    None => {
      let grade = match store.profile(&session.user_id).await.and_then(|p| p.grade_id) {
        Some(g) => g,
        None => UNGRADED_BUCKET.to_string(),
      };
      for (subject, theme) in &pairs {
        let key = mastery_key(&session.user_id, subject, theme, &grade);
        store.get_or_create_mastery(key.clone()).await?;
        let (record, gained) = store
          .update_mastery(&key, |r| mastery::award(r, Reward::QuizCompletion { percentage }, now))
          .await?;
        debug!(target: "mastery", theme = %key.theme, grade = %key.grade_id, gained, points = record.points, "Quiz completion reward applied");
      }
    }
  }

  let badges = achievements::on_quiz_completed(store, session, now).await?;
  info!(target: "session", session_id = %session.id, percentage, badges = badges.len(), "Session completed");
  Ok(badges)
}

// ---- abandon ----

#[instrument(level = "info", skip(state))]
pub async fn abandon(state: &AppState, session_id: &str) -> AppResult<QuizSession> {
  let now = Utc::now();
  let (session, changed) = state
    .store
    .update_session(session_id, |s| match s.status {
      SessionStatus::InProgress => {
        s.status = SessionStatus::Abandoned;
        s.last_activity_at = now;
        Ok(true)
      }
      SessionStatus::Abandoned => Ok(false),
      SessionStatus::Completed => Err(AppError::InvalidState(format!("session {} is already completed", s.id))),
    })
    .await?;
  if changed {
    info!(target: "session", session_id = %session.id, answered = session.answers.len(), "Session abandoned");
  }
  Ok(session)
}

pub async fn get_session(state: &AppState, session_id: &str) -> AppResult<QuizSession> {
  load_session(&state.store, session_id).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{
    BadgeCondition, ChoiceBody, Difficulty, FillBlankBody, MasteryRecord, MultiChoiceBody, QuestionBody, Rarity,
    TrueFalseBody, UserProfile,
  };
  use serde_json::json;
  use std::collections::HashMap;

  fn question(id: &str, theme: &str, body: QuestionBody) -> Question {
    Question {
      id: id.into(),
      subject: "math".into(),
      themes: vec![theme.into()],
      difficulty: HashMap::from([("cm1".to_string(), Difficulty::Hard)]),
      competences: vec!["calcul".into()],
      prompt: format!("prompt {id}"),
      explanation: Some(format!("explanation {id}")),
      image: None,
      active: true,
      body,
    }
  }

  fn true_false(id: &str) -> Question {
    question(id, "fractions", QuestionBody::TrueFalse(TrueFalseBody { correct: true }))
  }

  fn quiz(slug: &str, mode: SessionMode, max: Option<usize>) -> Quiz {
    Quiz {
      id: format!("id-{slug}"),
      slug: slug.into(),
      title: slug.into(),
      subject: Some("math".into()),
      themes: vec!["fractions".into()],
      max_questions: max,
      default_mode: mode,
      time_limit_secs: Some(600),
      active: true,
    }
  }

  async fn state_with(questions: Vec<Question>, quizzes: Vec<Quiz>) -> AppState {
    let store = Store::new();
    for q in questions {
      store.put_question(q).await;
    }
    for q in quizzes {
      store.put_quiz(q).await;
    }
    store.put_profile(UserProfile { user_id: "u1".into(), grade_id: Some("cm1".into()), premium_grading: false }).await;
    AppState::with_store(store)
  }

  fn known(user: &str) -> CreateSession {
    CreateSession { user_id: Some(user.into()), ..CreateSession::default() }
  }

  fn answer(index: usize, value: Value) -> Submission {
    Submission { index: Some(index), answer: value, question_type: None, action: Action::Answer }
  }

  #[tokio::test]
  async fn test_create_is_idempotent_while_in_progress() {
    let state = state_with(vec![true_false("q1"), true_false("q2")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let first = create_session(&state, "quiz", known("u1")).await.unwrap();
    assert!(!first.resumed);
    assert_eq!(first.session.grade_id.as_deref(), Some("cm1"));
    assert_eq!(first.user_niveau, Some(Tier::Novice));
    let second = create_session(&state, "quiz", known("u1")).await.unwrap();
    assert!(second.resumed);
    assert_eq!(first.session.id, second.session.id);
  }

  #[tokio::test]
  async fn test_unknown_quiz_is_not_found() {
    let state = state_with(vec![], vec![]).await;
    let err = create_session(&state, "nope", known("u1")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
  }

  #[tokio::test]
  async fn test_anonymous_sessions_get_generated_ids_and_no_mastery() {
    let state = state_with(vec![true_false("q1")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", CreateSession::default()).await.unwrap();
    assert!(is_anonymous(&start.session.user_id));
    assert!(start.user_niveau.is_none());
    submit(&state, &start.session.id, answer(0, json!(true))).await.unwrap();
    assert!(state.store.mastery_for_user(&start.session.user_id).await.is_empty());
  }

  #[tokio::test]
  async fn test_revision_double_answer_is_rejected_without_mutation() {
    let state = state_with(vec![true_false("q1"), true_false("q2")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", known("u1")).await.unwrap();
    let id = start.session.id.clone();

    submit(&state, &id, answer(0, json!(true))).await.unwrap();
    let before = get_session(&state, &id).await.unwrap();
    let err = submit(&state, &id, answer(0, json!(false))).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    let after = get_session(&state, &id).await.unwrap();
    assert_eq!(after.answers.len(), before.answers.len());
    assert_eq!(after.score, before.score);
  }

  #[tokio::test]
  async fn test_revision_flow_updates_mastery_and_completes() {
    let state = state_with(vec![true_false("q1"), true_false("q2")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    state.store.put_badge(Badge {
      slug: "first".into(),
      name: "First".into(),
      description: String::new(),
      condition: BadgeCondition::QuizzesCompleted { count: 1 },
      rarity: Rarity::Common,
      points: 10,
    }).await;
    let start = create_session(&state, "quiz", known("u1")).await.unwrap();
    let id = start.session.id.clone();

    let first = match submit(&state, &id, answer(0, json!(true))).await.unwrap() {
      Outcome::Answered(a) => a,
      other => panic!("unexpected outcome {other:?}"),
    };
    assert!(first.record.is_correct);
    assert_eq!(first.session.current_index, 1);
    assert!(first.new_badges.is_empty());

    let key = mastery_key("u1", "math", "fractions", "cm1");
    assert_eq!(state.store.mastery(&key).await.unwrap().points, 15);

    let last = match submit(&state, &id, answer(1, json!(false))).await.unwrap() {
      Outcome::Answered(a) => a,
      other => panic!("unexpected outcome {other:?}"),
    };
    assert!(!last.record.is_correct);
    assert_eq!(last.session.status, SessionStatus::Completed);
    assert_eq!(last.session.score, 1.0);
    assert_eq!(last.new_badges.len(), 1);

    let record = state.store.mastery(&key).await.unwrap();
    // +15 then -7; completion bookkeeping adds no points.
    assert_eq!(record.points, 8);
    assert_eq!(record.quizzes_completed, 1);
    assert_eq!(record.best_score, 50.0);
    let competences = state.store.competences_for_user("u1").await;
    assert_eq!(competences.len(), 1);
    assert_eq!(competences[0].total_answers, 2);

    let err = submit(&state, &id, answer(1, json!(true))).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
  }

  #[tokio::test]
  async fn test_known_user_without_grade_gets_completion_reward() {
    let state = state_with(vec![true_false("q1")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", known("u2")).await.unwrap();
    assert!(start.session.grade_id.is_none());
    submit(&state, &start.session.id, answer(0, json!(true))).await.unwrap();
    let records = state.store.mastery_for_user("u2").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.grade_id, UNGRADED_BUCKET);
    assert_eq!(records[0].points, 25);
    assert_eq!(records[0].correct_answers, 0);
  }

  #[tokio::test]
  async fn test_question_type_guard_and_index_bounds() {
    let state = state_with(vec![true_false("q1")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", known("u1")).await.unwrap();
    let id = start.session.id.clone();

    let mut wrong_type = answer(0, json!(true));
    wrong_type.question_type = Some(QuestionType::Qcm);
    assert!(matches!(submit(&state, &id, wrong_type).await, Err(AppError::Validation(_))));
    assert!(matches!(submit(&state, &id, answer(5, json!(true))).await, Err(AppError::NotFound(_))));
    assert!(matches!(deliver_question(&state, &id, 5).await, Err(AppError::NotFound(_))));
    let missing = Submission { index: None, ..answer(0, json!(true)) };
    assert!(matches!(submit(&state, &id, missing).await, Err(AppError::Validation(_))));
  }

  #[tokio::test]
  async fn test_delivery_creates_mastery_and_reports_previous_answer() {
    let state = state_with(vec![true_false("q1"), true_false("q2")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", known("u1")).await.unwrap();
    let id = start.session.id.clone();

    let fresh = deliver_question(&state, &id, 0).await.unwrap();
    assert!(fresh.previous_answer.is_none());
    assert!(state.store.mastery(&mastery_key("u1", "math", "fractions", "cm1")).await.is_some());

    submit(&state, &id, answer(0, json!(true))).await.unwrap();
    let again = deliver_question(&state, &id, 0).await.unwrap();
    assert!(again.previous_answer.unwrap().is_correct);
  }

  #[tokio::test]
  async fn test_exam_save_and_submit_synthesizes_skips() {
    let questions = vec![
      question("e1", "fractions", QuestionBody::Qcm(ChoiceBody { options: vec!["a".into(), "b".into(), "c".into()], correct: 1 })),
      true_false("e2"),
      question("e3", "fractions", QuestionBody::FillBlank(FillBlankBody {
        text: "1 m = ___ cm, 0 = ___".into(),
        answers: vec!["100".into(), "0".into()],
        case_sensitive: false,
      })),
    ];
    let state = state_with(questions, vec![quiz("exam", SessionMode::Exam, Some(3))]).await;
    let start = create_session(&state, "exam", known("u1")).await.unwrap();
    let session = start.session;
    assert_eq!(session.mode, SessionMode::Exam);
    assert_eq!(session.time_limit_secs, Some(600));
    assert!(session.timer_started_at.is_some());

    let save = |index: usize, value: Value| Submission { index: Some(index), answer: value, question_type: None, action: Action::Save };
    let mut truths = Vec::new();
    for qid in &session.question_ids {
      let q = state.store.question(qid).await.unwrap();
      truths.push(verifier::reveal(&q, &session.id));
    }

    // Save the first and last slots only; index 1 stays unanswered.
    submit(&state, &session.id, save(0, json!("placeholder"))).await.unwrap();
    submit(&state, &session.id, save(0, truths[0].clone())).await.unwrap();
    assert!(matches!(submit(&state, &session.id, save(2, Value::Null)).await, Err(AppError::Validation(_))));
    submit(&state, &session.id, save(2, truths[2].clone())).await.unwrap();

    let delivered = deliver_question(&state, &session.id, 0).await.unwrap();
    assert!(delivered.saved_answer.is_some());

    assert!(matches!(
      submit(&state, &session.id, answer(1, json!(true))).await,
      Err(AppError::InvalidState(_))
    ));

    let submitted = Submission { index: None, answer: Value::Null, question_type: None, action: Action::Submit };
    let (done, _) = match submit(&state, &session.id, submitted).await.unwrap() {
      Outcome::Submitted { session, new_badges } => (session, new_badges),
      other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.answers.len(), 3);
    let skipped = done.answer_for(1).unwrap();
    assert!(skipped.skipped);
    assert!(!skipped.is_correct);
    assert!(skipped.answer.is_null());
    assert!(done.answer_for(0).unwrap().is_correct);
    assert!(done.answer_for(2).unwrap().is_correct);
    assert_eq!(done.score, 2.0);

    let again = Submission { index: None, answer: Value::Null, question_type: None, action: Action::Submit };
    assert!(matches!(submit(&state, &session.id, again).await, Err(AppError::InvalidState(_))));
  }

  #[tokio::test]
  async fn test_exam_malformed_saved_answer_counts_as_incorrect() {
    let state = state_with(vec![true_false("x1")], vec![quiz("exam", SessionMode::Exam, None)]).await;
    let start = create_session(&state, "exam", known("u1")).await.unwrap();
    let save = Submission { index: Some(0), answer: json!("yes"), question_type: None, action: Action::Save };
    submit(&state, &start.session.id, save).await.unwrap();
    let done = match submit(&state, &start.session.id, Submission { index: None, answer: Value::Null, question_type: None, action: Action::Submit }).await.unwrap() {
      Outcome::Submitted { session, .. } => session,
      other => panic!("unexpected outcome {other:?}"),
    };
    let record = done.answer_for(0).unwrap();
    assert!(!record.is_correct);
    assert!(!record.skipped);
    assert_eq!(record.correct_answer, json!(true));
  }

  #[tokio::test]
  async fn test_presented_correct_index_verifies_true() {
    let q = question("m1", "fractions", QuestionBody::QcmMultiple(MultiChoiceBody {
      options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
      correct: vec![0, 2],
    }));
    let state = state_with(vec![q.clone()], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", known("u1")).await.unwrap();
    let truth = verifier::reveal(&q, &start.session.id);
    let outcome = submit(&state, &start.session.id, answer(0, truth)).await.unwrap();
    match outcome {
      Outcome::Answered(a) => assert!(a.record.is_correct),
      other => panic!("unexpected outcome {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_abandon_is_terminal() {
    let state = state_with(vec![true_false("q1")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", known("u1")).await.unwrap();
    let id = start.session.id.clone();
    assert_eq!(abandon(&state, &id).await.unwrap().status, SessionStatus::Abandoned);
    assert_eq!(abandon(&state, &id).await.unwrap().status, SessionStatus::Abandoned);
    assert!(matches!(submit(&state, &id, answer(0, json!(true))).await, Err(AppError::InvalidState(_))));
    assert!(matches!(deliver_question(&state, &id, 0).await, Err(AppError::InvalidState(_))));

    // A fresh session can start once the previous one is terminal.
    let next = create_session(&state, "quiz", known("u1")).await.unwrap();
    assert!(!next.resumed);
    assert_ne!(next.session.id, id);
  }

  #[tokio::test]
  async fn test_abandon_completed_session_is_invalid() {
    let state = state_with(vec![true_false("q1")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", known("u1")).await.unwrap();
    submit(&state, &start.session.id, answer(0, json!(true))).await.unwrap();
    assert!(matches!(abandon(&state, &start.session.id).await, Err(AppError::InvalidState(_))));
  }

  #[tokio::test]
  async fn test_pool_falls_back_to_subject() {
    let mut off_theme = true_false("s1");
    off_theme.themes = vec!["geometrie".into()];
    let state = state_with(vec![off_theme], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let info = quiz_info(&state, "quiz").await.unwrap();
    assert_eq!(info.available_questions, 1);
    let start = create_session(&state, "quiz", known("u1")).await.unwrap();
    assert_eq!(start.session.question_ids, vec!["s1".to_string()]);
  }

  #[tokio::test]
  async fn test_delivery_backfills_grade_from_profile() {
    let state = state_with(vec![true_false("q1"), true_false("q2")], vec![quiz("quiz", SessionMode::Revision, None)]).await;
    let start = create_session(&state, "quiz", known("u3")).await.unwrap();
    assert!(start.session.grade_id.is_none());
    assert!(start.user_niveau.is_none());
    assert!(state.store.mastery_for_user("u3").await.is_empty());

    state.store.put_profile(UserProfile { user_id: "u3".into(), grade_id: Some("cm1".into()), premium_grading: false }).await;
    let delivery = deliver_question(&state, &start.session.id, 0).await.unwrap();
    assert_eq!(delivery.session.grade_id.as_deref(), Some("cm1"));
    assert!(state.store.mastery(&mastery_key("u3", "math", "fractions", "cm1")).await.is_some());

    let stored = get_session(&state, &start.session.id).await.unwrap();
    assert_eq!(stored.grade_id.as_deref(), Some("cm1"));

    // The backfilled session now awards per-answer points.
    submit(&state, &start.session.id, answer(0, json!(true))).await.unwrap();
    assert_eq!(state.store.mastery(&mastery_key("u3", "math", "fractions", "cm1")).await.unwrap().points, 15);
  }

  #[tokio::test]
  async fn test_effective_tier_drives_selection() {
    let with_difficulty = |id: &str, theme: &str, difficulty: Difficulty| Question {
      difficulty: HashMap::from([("cm1".to_string(), difficulty)]),
      ..question(id, theme, QuestionBody::TrueFalse(TrueFalseBody { correct: true }))
    };
    let mut questions = Vec::new();
    for n in 0..10 {
      questions.push(with_difficulty(&format!("easy-{n}"), "fractions", Difficulty::Easy));
      questions.push(with_difficulty(&format!("hard-{n}"), "decimaux", Difficulty::Hard));
    }
    let adaptive = Quiz {
      themes: vec!["fractions".into(), "decimaux".into()],
      ..quiz("adaptive", SessionMode::Revision, Some(10))
    };
    let state = state_with(questions, vec![adaptive]).await;
    for (theme, points, tier) in [("fractions", 1000, Tier::Master), ("decimaux", 600, Tier::Expert)] {
      state
        .store
        .insert_mastery(MasteryRecord { points, tier, ..MasteryRecord::new(mastery_key("u1", "math", theme, "cm1")) })
        .await
        .unwrap();
    }

    let start = create_session(&state, "adaptive", known("u1")).await.unwrap();
    assert_eq!(start.user_niveau, Some(Tier::Expert));
    assert_eq!(start.session.total_questions, 10);
    // Expert wants 10/30/60; with no medium questions the medium share spills to hard.
    let hard = start.session.question_ids.iter().filter(|id| id.starts_with("hard-")).count();
    assert_eq!(hard, 9);
    assert_eq!(start.session.question_ids.len() - hard, 1);
  }
}
