//! Grading entry point used by the session manager.
//!
//! Every question goes through its `Verify` strategy first. Open answers
//! without a typed expectation are then upgraded to an AI rubric evaluation
//! when the learner is entitled to it; any failure of the AI call keeps the
//! local keyword grade.

use serde_json::Value;
use tracing::{error, info, instrument};

use crate::domain::{Question, QuestionBody};
use crate::error::AppResult;
use crate::openai::GradingRequest;
use crate::state::AppState;
use crate::verifier::{self, Verdict};

/// AI score at or above which an open answer counts as correct.
pub const AI_PASS_SCORE: f64 = 70.0;

#[instrument(level = "info", skip(state, question, answer), fields(question_id = %question.id, question_type = ?question.question_type()))]
pub async fn grade(state: &AppState, question: &Question, session_id: &str, answer: &Value, premium: bool) -> AppResult<Verdict> {
  let mut verdict = verifier::verify(question, session_id, answer)?;

  let body = match &question.body {
    QuestionBody::OpenShort(b) | QuestionBody::OpenLong(b) => b,
    _ => return Ok(verdict),
  };
  if !premium || body.typed_answer.is_some() {
    return Ok(verdict);
  }
  let (Some(oa), Some(text)) = (&state.openai, answer.as_str()) else {
    return Ok(verdict);
  };

  let req = GradingRequest {
    question: &question.prompt,
    keywords: &body.expected_keywords,
    reference: body.sample_answer.as_deref(),
    rubric: body.rubric.as_deref(),
    answer: text,
  };
  match oa.evaluate_open_answer(&state.prompts, &req).await {
    Ok(eval) => {
      verdict.is_correct = eval.score >= AI_PASS_SCORE;
      verdict.partial_score = Some(eval.score / 100.0);
      verdict.graded = true;
      verdict.feedback = Some(eval.feedback.clone());
      info!(target: "grading", question_id = %question.id, score = eval.score, correct = verdict.is_correct, "AI grading applied");
      verdict.ai_evaluation = Some(eval);
    }
    Err(e) => {
      error!(target: "grading", question_id = %question.id, error = %e, "AI grading failed; using keyword grading.");
    }
  }
  Ok(verdict)
}
