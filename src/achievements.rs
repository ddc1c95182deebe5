//! Daily streaks and badge grants, run once when a session completes.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tracing::{debug, info, instrument};

use crate::domain::{AnswerRecord, Badge, BadgeCondition, QuizSession, SessionMode, UserStats};
use crate::error::{AppError, AppResult};
use crate::store::Store;

/// Stats a badge condition is tested against.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AchievementStats {
  pub quizzes_completed: u32,
  pub perfect_scores: u32,
  pub perfect_exams: u32,
  pub current_streak: u32,
  pub best_streak: u32,
  pub completion_hour: u32,
  pub session_correct_run: u32,
}

/// Update the daily streak for an activity on `today`.
/// Returns false when today was already recorded.
pub fn advance_streak(stats: &mut UserStats, today: NaiveDate) -> bool {
  match stats.last_activity_date {
    Some(last) if last == today => return false,
    Some(last) if today.pred_opt() == Some(last) => stats.current_streak += 1,
    _ => stats.current_streak = 1,
  }
  stats.last_activity_date = Some(today);
  stats.best_streak = stats.best_streak.max(stats.current_streak);
  true
}

/// Longest run of consecutive correct answers, in question order.
pub fn longest_correct_run(answers: &[AnswerRecord]) -> u32 {
  let mut ordered: Vec<&AnswerRecord> = answers.iter().collect();
  ordered.sort_by_key(|a| a.question_index);
  let mut best = 0;
  let mut current = 0;
  for a in ordered {
    if a.is_correct {
      current += 1;
      best = best.max(current);
    } else {
      current = 0;
    }
  }
  best
}

pub fn is_perfect(session: &QuizSession) -> bool {
  session.total_questions > 0 && session.score + 1e-9 >= session.total_questions as f64
}

pub fn condition_met(condition: &BadgeCondition, stats: &AchievementStats) -> bool {
  match condition {
    BadgeCondition::QuizzesCompleted { count } => stats.quizzes_completed >= *count,
    BadgeCondition::PerfectScores { count } => stats.perfect_scores >= *count,
    BadgeCondition::PerfectExams { count } => stats.perfect_exams >= *count,
    BadgeCondition::Streak { days } => stats.current_streak >= *days,
    BadgeCondition::BestStreak { days } => stats.best_streak >= *days,
    BadgeCondition::CompletedBeforeHour { hour } => stats.completion_hour < *hour,
    BadgeCondition::CompletedAfterHour { hour } => stats.completion_hour >= *hour,
    BadgeCondition::CorrectInARow { count } => stats.session_correct_run >= *count,
    // Needs cross-subject mastery comparison; not evaluated yet.
    BadgeCondition::SubjectMastery { .. } => false,
  }
}

/// Streak update and badge scan for a just-completed session.
/// Returns the badges granted by this call.
#[instrument(level = "info", skip(store, session), fields(session_id = %session.id, user = %session.user_id))]
pub async fn on_quiz_completed(store: &Store, session: &QuizSession, now: DateTime<Utc>) -> AppResult<Vec<Badge>> {
  let today = now.date_naive();
  let streak = store.update_stats(&session.user_id, |s| {
    advance_streak(s, today);
  }).await;

  let completed = store.completed_sessions(&session.user_id).await;
  let stats = AchievementStats {
    quizzes_completed: completed.len() as u32,
    perfect_scores: completed.iter().filter(|s| is_perfect(s)).count() as u32,
    perfect_exams: completed.iter().filter(|s| s.mode == SessionMode::Exam && is_perfect(s)).count() as u32,
    current_streak: streak.current_streak,
    best_streak: streak.best_streak,
    completion_hour: now.hour(),
    session_correct_run: longest_correct_run(&session.answers),
  };
  debug!(target: "achievements", ?stats, "Aggregated stats");

  let earned = store.earned_badge_slugs(&session.user_id).await;
  let mut granted = Vec::new();
  for badge in store.badges().await {
    if earned.contains(&badge.slug) || !condition_met(&badge.condition, &stats) {
      continue;
    }
    match store.grant_badge(&session.user_id, &badge.slug, now).await {
      Ok(_) => {
        let points = badge.points;
        store.update_stats(&session.user_id, |s| s.badge_points += points).await;
        info!(target: "achievements", user = %session.user_id, badge = %badge.slug, points, "Badge earned");
        granted.push(badge);
      }
      // Granted concurrently by another request.
      Err(AppError::Conflict(_)) => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(granted)
}
