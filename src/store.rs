//! In-memory document store.
//!
//! One `RwLock`-guarded map per collection. Every update is a per-record
//! read-modify-write under that collection's write lock; there are no
//! cross-collection transactions. Inserts that must be unique report
//! `AppError::Conflict` so callers can resolve races by re-reading.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{
  Badge, CompetenceRecord, MasteryKey, MasteryRecord, Question, Quiz, QuizSession, SessionStatus, UserBadge,
  UserProfile, UserStats,
};
use crate::error::{AppError, AppResult};

#[derive(Default)]
pub struct Store {
  quizzes: RwLock<HashMap<String, Quiz>>,
  questions: RwLock<HashMap<String, Question>>,
  sessions: RwLock<HashMap<String, QuizSession>>,
  mastery: RwLock<HashMap<MasteryKey, MasteryRecord>>,
  competences: RwLock<HashMap<(String, String), CompetenceRecord>>,
  profiles: RwLock<HashMap<String, UserProfile>>,
  stats: RwLock<HashMap<String, UserStats>>,
  badges: RwLock<Vec<Badge>>,
  user_badges: RwLock<HashMap<(String, String), UserBadge>>,
}

impl Store {
  pub fn new() -> Self {
    Self::default()
  }

  // ---- Content (read-mostly, loaded at startup) ----

  /// Insert or replace a quiz, keyed by slug.
  pub async fn put_quiz(&self, quiz: Quiz) {
    self.quizzes.write().await.insert(quiz.slug.clone(), quiz);
  }

  pub async fn put_question(&self, question: Question) {
    self.questions.write().await.insert(question.id.clone(), question);
  }

  pub async fn put_profile(&self, profile: UserProfile) {
    self.profiles.write().await.insert(profile.user_id.clone(), profile);
  }

  /// Insert or replace a catalog badge, keyed by slug.
  pub async fn put_badge(&self, badge: Badge) {
    let mut badges = self.badges.write().await;
    match badges.iter_mut().find(|b| b.slug == badge.slug) {
      Some(existing) => *existing = badge,
      None => badges.push(badge),
    }
  }

  pub async fn quiz_by_slug(&self, slug: &str) -> Option<Quiz> {
    self.quizzes.read().await.get(slug).cloned()
  }

  pub async fn question(&self, id: &str) -> Option<Question> {
    self.questions.read().await.get(id).cloned()
  }

  /// Active questions matching `pred`, sorted by id for stable iteration.
  pub async fn active_questions_where<F>(&self, pred: F) -> Vec<Question>
  where
    F: Fn(&Question) -> bool,
  {
    let mut out: Vec<Question> = self
      .questions
      .read()
      .await
      .values()
      .filter(|q| q.active && pred(q))
      .cloned()
      .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
  }

  pub async fn profile(&self, user_id: &str) -> Option<UserProfile> {
    self.profiles.read().await.get(user_id).cloned()
  }

  pub async fn badges(&self) -> Vec<Badge> {
    self.badges.read().await.clone()
  }

  pub async fn counts(&self) -> (usize, usize, usize) {
    (
      self.quizzes.read().await.len(),
      self.questions.read().await.len(),
      self.badges.read().await.len(),
    )
  }

  // ---- Sessions ----

  /// Insert `candidate` unless an in-progress session already exists for the
  /// same (user, quiz); returns the stored session and whether it was resumed.
  #[instrument(level = "debug", skip(self, candidate), fields(user = %candidate.user_id, quiz = %candidate.quiz_id))]
  pub async fn insert_session_or_resume(&self, candidate: QuizSession) -> AppResult<(QuizSession, bool)> {
    let mut sessions = self.sessions.write().await;
    if let Some(existing) = sessions
      .values()
      .find(|s| s.user_id == candidate.user_id && s.quiz_id == candidate.quiz_id && s.status == SessionStatus::InProgress)
    {
      return Ok((existing.clone(), true));
    }
    if sessions.contains_key(&candidate.id) {
      return Err(AppError::Conflict(format!("session {} already exists", candidate.id)));
    }
    sessions.insert(candidate.id.clone(), candidate.clone());
    Ok((candidate, false))
  }

  pub async fn find_in_progress_session(&self, user_id: &str, quiz_id: &str) -> Option<QuizSession> {
    self
      .sessions
      .read()
      .await
      .values()
      .find(|s| s.user_id == user_id && s.quiz_id == quiz_id && s.status == SessionStatus::InProgress)
      .cloned()
  }

  pub async fn session(&self, id: &str) -> Option<QuizSession> {
    self.sessions.read().await.get(id).cloned()
  }

  /// Run `f` against a draft of the stored session and commit the draft only
  /// when `f` succeeds. Checks inside `f` see the latest committed state.
  pub async fn update_session<F, T>(&self, id: &str, f: F) -> AppResult<(QuizSession, T)>
  where
    F: FnOnce(&mut QuizSession) -> AppResult<T>,
  {
    let mut sessions = self.sessions.write().await;
    let slot = sessions
      .get_mut(id)
      .ok_or_else(|| AppError::NotFound(format!("session {}", id)))?;
    let mut draft = slot.clone();
    let out = f(&mut draft)?;
    *slot = draft.clone();
    Ok((draft, out))
  }

  pub async fn completed_sessions(&self, user_id: &str) -> Vec<QuizSession> {
    self
      .sessions
      .read()
      .await
      .values()
      .filter(|s| s.user_id == user_id && s.status == SessionStatus::Completed)
      .cloned()
      .collect()
  }

  // ---- Mastery ----

  pub async fn mastery(&self, key: &MasteryKey) -> Option<MasteryRecord> {
    self.mastery.read().await.get(key).cloned()
  }

  /// Unique insert; `Conflict` if a record with this key already exists.
  pub async fn insert_mastery(&self, record: MasteryRecord) -> AppResult<MasteryRecord> {
    let mut mastery = self.mastery.write().await;
    if mastery.contains_key(&record.key) {
      return Err(AppError::Conflict(format!("mastery record {:?}", record.key)));
    }
    mastery.insert(record.key.clone(), record.clone());
    Ok(record)
  }

  /// Existing record, or a fresh novice one. A lost creation race resolves to
  /// the winner's record.
  #[instrument(level = "debug", skip(self), fields(user = %key.user_id, theme = %key.theme, grade = %key.grade_id))]
  pub async fn get_or_create_mastery(&self, key: MasteryKey) -> AppResult<MasteryRecord> {
    if let Some(existing) = self.mastery(&key).await {
      return Ok(existing);
    }
    match self.insert_mastery(MasteryRecord::new(key.clone())).await {
      Ok(created) => {
        debug!(target: "mastery", user = %key.user_id, subject = %key.subject, theme = %key.theme, "Created mastery record");
        Ok(created)
      }
      Err(AppError::Conflict(_)) => self
        .mastery(&key)
        .await
        .ok_or_else(|| AppError::Internal("mastery record vanished after conflict".into())),
      Err(e) => Err(e),
    }
  }

  /// Apply `f` to an existing record and return the updated copy.
  pub async fn update_mastery<F, T>(&self, key: &MasteryKey, f: F) -> AppResult<(MasteryRecord, T)>
  where
    F: FnOnce(&mut MasteryRecord) -> T,
  {
    let mut mastery = self.mastery.write().await;
    let record = mastery
      .get_mut(key)
      .ok_or_else(|| AppError::NotFound(format!("mastery record {:?}", key)))?;
    let out = f(record);
    Ok((record.clone(), out))
  }

  pub async fn mastery_for_user(&self, user_id: &str) -> Vec<MasteryRecord> {
    let mut out: Vec<MasteryRecord> = self
      .mastery
      .read()
      .await
      .values()
      .filter(|r| r.key.user_id == user_id)
      .cloned()
      .collect();
    out.sort_by(|a, b| {
      (&a.key.subject, &a.key.theme, &a.key.grade_id).cmp(&(&b.key.subject, &b.key.theme, &b.key.grade_id))
    });
    out
  }

  // ---- Competences ----

  pub async fn record_competence(&self, user_id: &str, competence: &str, is_correct: bool, now: DateTime<Utc>) -> CompetenceRecord {
    let mut competences = self.competences.write().await;
    let entry = competences
      .entry((user_id.to_string(), competence.to_string()))
      .or_insert_with(|| CompetenceRecord {
        user_id: user_id.to_string(),
        competence: competence.to_string(),
        correct_answers: 0,
        total_answers: 0,
        last_practiced_at: None,
      });
    entry.total_answers += 1;
    if is_correct {
      entry.correct_answers += 1;
    }
    entry.last_practiced_at = Some(now);
    entry.clone()
  }

  pub async fn competences_for_user(&self, user_id: &str) -> Vec<CompetenceRecord> {
    let mut out: Vec<CompetenceRecord> = self
      .competences
      .read()
      .await
      .values()
      .filter(|r| r.user_id == user_id)
      .cloned()
      .collect();
    out.sort_by(|a, b| a.competence.cmp(&b.competence));
    out
  }

  // ---- Stats & badges ----

  pub async fn stats(&self, user_id: &str) -> UserStats {
    self.stats.read().await.get(user_id).cloned().unwrap_or_else(|| UserStats {
      user_id: user_id.to_string(),
      ..UserStats::default()
    })
  }

  pub async fn update_stats<F>(&self, user_id: &str, f: F) -> UserStats
  where
    F: FnOnce(&mut UserStats),
  {
    let mut stats = self.stats.write().await;
    let entry = stats.entry(user_id.to_string()).or_insert_with(|| UserStats {
      user_id: user_id.to_string(),
      ..UserStats::default()
    });
    f(entry);
    entry.clone()
  }

  pub async fn earned_badge_slugs(&self, user_id: &str) -> HashSet<String> {
    self
      .user_badges
      .read()
      .await
      .keys()
      .filter(|(u, _)| u == user_id)
      .map(|(_, slug)| slug.clone())
      .collect()
  }

  pub async fn user_badges(&self, user_id: &str) -> Vec<UserBadge> {
    let mut out: Vec<UserBadge> = self
      .user_badges
      .read()
      .await
      .values()
      .filter(|b| b.user_id == user_id)
      .cloned()
      .collect();
    out.sort_by(|a, b| a.earned_at.cmp(&b.earned_at).then_with(|| a.badge_slug.cmp(&b.badge_slug)));
    out
  }

  /// Unique (user, badge) insert; `Conflict` if already earned.
  pub async fn grant_badge(&self, user_id: &str, badge_slug: &str, now: DateTime<Utc>) -> AppResult<UserBadge> {
    let mut user_badges = self.user_badges.write().await;
    let key = (user_id.to_string(), badge_slug.to_string());
    if user_badges.contains_key(&key) {
      return Err(AppError::Conflict(format!("badge {} already earned by {}", badge_slug, user_id)));
    }
    let earned = UserBadge { user_id: user_id.to_string(), badge_slug: badge_slug.to_string(), earned_at: now };
    user_badges.insert(key, earned.clone());
    Ok(earned)
  }
}
