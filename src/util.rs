//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Identifier handed to a learner who starts a session without an account.
pub fn new_anonymous_id() -> String {
  format!("{}{}", crate::domain::ANONYMOUS_PREFIX, uuid::Uuid::new_v4())
}
