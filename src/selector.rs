//! Difficulty-weighted question selection.
//!
//! A pool is split into easy/medium/hard buckets for the session's grade, each
//! bucket gets a share of the quiz according to the learner's tier, shortfalls
//! spill into neighbouring buckets, and the result is shuffled. This shuffle is
//! a plain random one; only the per-question presentation order must be
//! reproducible.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, instrument};

use crate::domain::{Difficulty, Question, Tier};

const EASY: usize = 0;
const MEDIUM: usize = 1;
const HARD: usize = 2;

/// Target split (easy, medium, hard) in percent.
pub fn distribution(tier: Tier) -> [u32; 3] {
  match tier {
    Tier::Novice => [100, 0, 0],
    Tier::Apprentice => [70, 30, 0],
    Tier::Proficient => [20, 60, 20],
    Tier::Expert => [10, 30, 60],
    Tier::Master => [0, 20, 80],
  }
}

fn bucket_of(difficulty: Difficulty) -> usize {
  match difficulty {
    Difficulty::Easy => EASY,
    Difficulty::Medium => MEDIUM,
    Difficulty::Hard => HARD,
  }
}

/// Neighbours a short bucket hands its excess to, closest first.
fn spill_order(bucket: usize, split: [u32; 3]) -> [usize; 2] {
  match bucket {
    EASY => [MEDIUM, HARD],
    HARD => [MEDIUM, EASY],
    _ => {
      if split[HARD] > split[EASY] { [HARD, EASY] } else { [EASY, HARD] }
    }
  }
}

/// Per-bucket counts for a tier given what is available.
///
/// The sum never exceeds `min(max_count, total available)` and each count
/// never exceeds its bucket's availability.
pub fn plan(tier: Tier, available: [usize; 3], max_count: usize) -> [usize; 3] {
  let split = distribution(tier);
  let total: usize = available.iter().sum();
  let wanted = max_count.min(total);

  let mut targets = [0usize; 3];
  for b in 0..3 {
    targets[b] = (split[b] as f64 / 100.0 * wanted as f64).round() as usize;
  }

  // Rounding drift goes to (or comes from) the tier's dominant bucket.
  let dominant = (0..3).max_by_key(|&b| split[b]).unwrap_or(EASY);
  let sum: usize = targets.iter().sum();
  if sum < wanted {
    targets[dominant] += wanted - sum;
  } else if sum > wanted {
    let mut excess = sum - wanted;
    for b in std::iter::once(dominant).chain(0..3) {
      let take = excess.min(targets[b]);
      targets[b] -= take;
      excess -= take;
    }
  }

  for b in 0..3 {
    if targets[b] <= available[b] {
      continue;
    }
    let mut short = targets[b] - available[b];
    targets[b] = available[b];
    for n in spill_order(b, split) {
      let spare = available[n].saturating_sub(targets[n]);
      let take = short.min(spare);
      targets[n] += take;
      short -= take;
    }
  }

  for b in 0..3 {
    targets[b] = targets[b].min(available[b]);
  }
  targets
}

/// Select up to `max_count` questions matching the tier's difficulty split.
#[instrument(level = "debug", skip(pool, rng), fields(pool = pool.len(), ?tier, max_count, grade = ?grade_id))]
pub fn select<R: Rng + ?Sized>(
  pool: &[Question],
  tier: Tier,
  max_count: usize,
  grade_id: Option<&str>,
  rng: &mut R,
) -> Vec<Question> {
  let mut buckets: [Vec<&Question>; 3] = [Vec::new(), Vec::new(), Vec::new()];
  for q in pool {
    buckets[bucket_of(q.difficulty_for(grade_id))].push(q);
  }
  let available = [buckets[EASY].len(), buckets[MEDIUM].len(), buckets[HARD].len()];
  let counts = plan(tier, available, max_count);
  debug!(target: "session", ?available, ?counts, "Difficulty plan");

  let mut chosen: Vec<Question> = Vec::with_capacity(counts.iter().sum());
  for b in 0..3 {
    chosen.extend(buckets[b].choose_multiple(rng, counts[b]).map(|q| (*q).clone()));
  }
  chosen.shuffle(rng);
  chosen
}

/// Plain random subset used by non-adaptive sessions.
pub fn random_subset<R: Rng + ?Sized>(pool: &[Question], cap: Option<usize>, rng: &mut R) -> Vec<Question> {
  let n = cap.unwrap_or(pool.len()).min(pool.len());
  let mut chosen: Vec<Question> = pool.choose_multiple(rng, n).cloned().collect();
  chosen.shuffle(rng);
  chosen
}
