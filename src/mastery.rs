//! Mastery progression rules: tier thresholds, point deltas and the two
//! reward strategies that update a `MasteryRecord`.
//!
//! Persistence (and the race-tolerant `get_or_create`) lives in `store.rs`;
//! everything here is pure arithmetic over a record.

use chrono::{DateTime, Utc};

use crate::domain::{Difficulty, MasteryRecord, Tier};

/// Inclusive lower bound of each tier, in ascending order.
const TIER_THRESHOLDS: [(Tier, u32); 5] = [
  (Tier::Novice, 0),
  (Tier::Apprentice, 100),
  (Tier::Proficient, 300),
  (Tier::Expert, 600),
  (Tier::Master, 1000),
];

impl Tier {
  pub const ALL: [Tier; 5] = [Tier::Novice, Tier::Apprentice, Tier::Proficient, Tier::Expert, Tier::Master];

  pub fn from_points(points: u32) -> Tier {
    TIER_THRESHOLDS
      .iter()
      .rev()
      .find(|(_, min)| points >= *min)
      .map(|(tier, _)| *tier)
      .unwrap_or(Tier::Novice)
  }

  pub fn index(self) -> usize {
    self as usize
  }

  /// Out-of-range indices saturate at `Master`.
  pub fn from_index(index: usize) -> Tier {
    Tier::ALL[index.min(Tier::ALL.len() - 1)]
  }

  #[cfg(test)]
  pub fn min_points(self) -> u32 {
    TIER_THRESHOLDS[self.index()].1
  }
}

/// Floor of the average tier index; `Novice` for an empty slice.
pub fn effective_tier(tiers: &[Tier]) -> Tier {
  if tiers.is_empty() {
    return Tier::Novice;
  }
  let sum: usize = tiers.iter().map(|t| t.index()).sum();
  Tier::from_index(sum / tiers.len())
}

pub fn points_for(difficulty: Difficulty) -> u32 {
  match difficulty {
    Difficulty::Easy => 5,
    Difficulty::Medium => 10,
    Difficulty::Hard => 15,
  }
}

/// Coarse reward used when a whole quiz completes without per-question context.
pub fn completion_points(percentage: f64) -> u32 {
  match percentage {
    p if p >= 90.0 => 25,
    p if p >= 75.0 => 20,
    p if p >= 60.0 => 15,
    p if p >= 50.0 => 10,
    p if p >= 30.0 => 5,
    _ => 2,
  }
}

/// The two ways a record earns points. A call site picks exactly one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reward {
  PerAnswer { difficulty: Difficulty, is_correct: bool },
  QuizCompletion { percentage: f64 },
}

/// Apply a reward and return the signed point change actually applied.
pub fn award(record: &mut MasteryRecord, reward: Reward, now: DateTime<Utc>) -> i64 {
  match reward {
    Reward::PerAnswer { difficulty, is_correct } => apply_answer_delta(record, difficulty, is_correct, now),
    Reward::QuizCompletion { percentage } => apply_quiz_completion_delta(record, percentage, now),
  }
}

pub fn apply_answer_delta(record: &mut MasteryRecord, difficulty: Difficulty, is_correct: bool, now: DateTime<Utc>) -> i64 {
  let base = points_for(difficulty);
  let before = record.points;
  record.points = if is_correct {
    record.points.saturating_add(base)
  } else {
    record.points.saturating_sub(base / 2)
  };
  record.tier = Tier::from_points(record.points);
  record.total_answers += 1;
  if is_correct {
    record.correct_answers += 1;
  }
  record.last_practiced_at = Some(now);
  record.points as i64 - before as i64
}

pub fn apply_quiz_completion_delta(record: &mut MasteryRecord, percentage: f64, now: DateTime<Utc>) -> i64 {
  let gained = completion_points(percentage);
  record.points = record.points.saturating_add(gained);
  record.tier = Tier::from_points(record.points);
  record_quiz_completion(record, percentage, now);
  gained as i64
}

/// Completion bookkeeping without points, for records already credited per answer.
pub fn record_quiz_completion(record: &mut MasteryRecord, percentage: f64, now: DateTime<Utc>) {
  record.quizzes_completed += 1;
  if percentage > record.best_score {
    record.best_score = percentage;
  }
  record.last_practiced_at = Some(now);
}
