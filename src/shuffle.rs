//! Deterministic seeded shuffle.
//!
//! The presentation order of a question's options is never persisted. It is
//! recomputed from `"{session_id}-{question_id}"` (plus a per-variant suffix)
//! every time the question is shown or graded, so both sides of the round-trip
//! must produce the exact same permutation on every machine.

const HASH_MULTIPLIER: i32 = 31;
const LCG_MULTIPLIER: u64 = 1_103_515_245;
const LCG_INCREMENT: u64 = 12_345;
const LCG_MODULUS_MASK: u64 = 0x7FFF_FFFF;

/// Suffix used to shuffle the right-hand column of a matching question.
pub const MATCHING_RIGHT_SUFFIX: &str = "right";
/// Suffix used to shuffle the items of an ordering question.
pub const ORDERING_ITEMS_SUFFIX: &str = "items";
/// Suffix used to shuffle the label texts of a map question.
pub const MAP_LABELS_SUFFIX: &str = "labels";

/// 32-bit string hash (`h = h * 31 + code_unit`, wrapping) over UTF-16 code units.
fn seed_hash(seed: &str) -> i32 {
  seed
    .encode_utf16()
    .fold(0i32, |h, unit| h.wrapping_mul(HASH_MULTIPLIER).wrapping_add(unit as i32))
}

/// Returns a permutation of `[0, length)` where `perm[slot]` is the original
/// index shown at presentation slot `slot`.
///
/// The swap index is scaled from the high bits of the 31-bit state; the low
/// bits of a power-of-two LCG cycle with very short periods.
pub fn shuffle(length: usize, seed: &str) -> Vec<usize> {
  let mut perm: Vec<usize> = (0..length).collect();
  let mut state = seed_hash(seed) as u32 as u64 & LCG_MODULUS_MASK;

  for i in (1..length).rev() {
    state = (state * LCG_MULTIPLIER + LCG_INCREMENT) & LCG_MODULUS_MASK;
    let j = ((state * (i as u64 + 1)) >> 31) as usize;
    perm.swap(i, j);
  }
  perm
}

/// Seed for a question's presentation within one session.
pub fn presentation_seed(session_id: &str, question_id: &str, suffix: Option<&str>) -> String {
  match suffix {
    Some(s) => format!("{}-{}-{}", session_id, question_id, s),
    None => format!("{}-{}", session_id, question_id),
  }
}

/// Apply a permutation to a slice, producing the presented order.
pub fn apply<T: Clone>(items: &[T], perm: &[usize]) -> Vec<T> {
  perm.iter().filter_map(|&orig| items.get(orig).cloned()).collect()
}

/// Slot at which `original` is presented, if it is part of the permutation.
pub fn slot_of(perm: &[usize], original: usize) -> Option<usize> {
  perm.iter().position(|&o| o == original)
}
