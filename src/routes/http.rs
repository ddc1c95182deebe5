//! HTTP endpoint handlers. These are thin wrappers that forward to the session
//! manager and the store. Each handler is instrumented and logs its parameters
//! and basic result info; failures render through `AppError`.

use std::sync::Arc;
use axum::{extract::{rejection::JsonRejection, Path, State}, Json, response::IntoResponse};
use chrono::Utc;
use tracing::{info, instrument};

use crate::error::AppResult;
use crate::protocol::*;
use crate::session;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, body))]
pub async fn http_create_session(
  State(state): State<Arc<AppState>>,
  Path(slug): Path<String>,
  body: Result<Json<CreateSessionIn>, JsonRejection>,
) -> AppResult<Json<SessionStartOut>> {
  // A bodiless POST carries no JSON content type; anything else must parse.
  let body = match body {
    Ok(Json(b)) => b,
    Err(JsonRejection::MissingJsonContentType(_)) => CreateSessionIn::default(),
    Err(rejection) => return Err(rejection.into()),
  };
  let start = session::create_session(&state, &slug, body.into()).await?;
  info!(target: "session", quiz = %slug, session_id = %start.session.id, resumed = start.resumed, niveau = ?start.user_niveau, "HTTP session created");
  Ok(Json(to_start_out(&start, Utc::now())))
}

#[instrument(level = "info", skip(state))]
pub async fn http_quiz_info(
  State(state): State<Arc<AppState>>,
  Path(slug): Path<String>,
) -> AppResult<Json<QuizInfoOut>> {
  let info = session::quiz_info(&state, &slug).await?;
  Ok(Json(QuizInfoOut::from(&info)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> AppResult<Json<SessionView>> {
  let s = session::get_session(&state, &id).await?;
  Ok(Json(session_view(&s, Utc::now())))
}

#[instrument(level = "info", skip(state))]
pub async fn http_abandon_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> AppResult<Json<SessionView>> {
  let s = session::abandon(&state, &id).await?;
  Ok(Json(session_view(&s, Utc::now())))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_question(
  State(state): State<Arc<AppState>>,
  Path((id, index)): Path<(String, usize)>,
) -> AppResult<Json<QuestionDeliveryOut>> {
  let delivery = session::deliver_question(&state, &id, index).await?;
  info!(target: "session", session_id = %id, question_index = index, question_id = %delivery.question.id, already_answered = delivery.previous_answer.is_some(), "HTTP question served");
  Ok(Json(to_delivery_out(&delivery, Utc::now())))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  body: Result<Json<SubmitIn>, JsonRejection>,
) -> AppResult<Json<SubmitOut>> {
  let Json(body) = body?;
  let outcome = session::submit(&state, &id, body.into()).await?;
  Ok(Json(SubmitOut::from(outcome)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_user_mastery(
  State(state): State<Arc<AppState>>,
  Path(user_id): Path<String>,
) -> Json<UserMasteryOut> {
  let records = state.store.mastery_for_user(&user_id).await;
  let competences = state.store.competences_for_user(&user_id).await;
  Json(UserMasteryOut { user_id, records, competences })
}

#[instrument(level = "info", skip(state))]
pub async fn http_user_badges(
  State(state): State<Arc<AppState>>,
  Path(user_id): Path<String>,
) -> Json<UserBadgesOut> {
  let earned = state.store.user_badges(&user_id).await;
  let catalog = state.store.badges().await;
  let stats = state.store.stats(&user_id).await;
  Json(to_user_badges_out(&user_id, earned, &catalog, &stats))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::routes::build_router;
  use axum::body::Body;
  use axum::http::{Request, StatusCode};
  use serde_json::{json, Value};
  use tower::ServiceExt;

  async fn app() -> axum::Router {
    build_router(Arc::new(AppState::build(None, None).await))
  }

  async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        req = req.header("content-type", "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
  }

  #[tokio::test]
  async fn test_health() {
    let app = app().await;
    let (status, body) = call(&app, "GET", "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
  }

  #[tokio::test]
  async fn test_unknown_quiz_is_404() {
    let app = app().await;
    let (status, body) = call(&app, "POST", "/api/v1/quiz/nope/session", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("not_found"));
  }

  #[tokio::test]
  async fn test_revision_session_over_http() {
    let app = app().await;
    let (status, info) = call(&app, "GET", "/api/v1/quiz/fractions-et-decimaux/session", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(info["availableQuestions"].as_u64().unwrap() >= 6);

    let (status, start) = call(&app, "POST", "/api/v1/quiz/fractions-et-decimaux/session", Some(json!({"userId": "eleve-1"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(start["resumed"], json!(false));
    assert_eq!(start["session"]["mode"], json!("revision"));
    assert!(start["session"].get("questionIds").is_none());
    let id = start["session"]["id"].as_str().unwrap().to_string();
    let total = start["session"]["totalQuestions"].as_u64().unwrap();
    assert_eq!(total, 6);

    let (_, again) = call(&app, "POST", "/api/v1/quiz/fractions-et-decimaux/session", Some(json!({"userId": "eleve-1"}))).await;
    assert_eq!(again["resumed"], json!(true));
    assert_eq!(again["session"]["id"], json!(id));

    let (status, q) = call(&app, "GET", &format!("/api/v1/session/{id}/question/0"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(q["alreadyAnswered"], json!(false));
    assert!(q["question"].get("correct").is_none());
    assert!(q["question"].get("answers").is_none());

    let (status, _) = call(&app, "GET", &format!("/api/v1/session/{id}/question/99"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A null answer is rejected and nothing is recorded.
    let (status, body) = call(&app, "POST", &format!("/api/v1/session/{id}"), Some(json!({"questionIndex": 0, "answer": null}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation_error"));

    let (status, view) = call(&app, "GET", &format!("/api/v1/session/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["answers"], json!([]));

    let (status, abandoned) = call(&app, "DELETE", &format!("/api/v1/session/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(abandoned["status"], json!("abandoned"));

    let (status, body) = call(&app, "GET", &format!("/api/v1/session/{id}/question/0"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid_state"));
  }

  #[tokio::test]
  async fn test_exam_session_over_http() {
    let app = app().await;
    let (_, start) = call(&app, "POST", "/api/v1/quiz/revolution-francaise/session", Some(json!({"userId": "eleve-2"}))).await;
    assert_eq!(start["session"]["mode"], json!("exam"));
    assert_eq!(start["session"]["timeLimitSecs"], json!(900));
    let id = start["session"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "POST", &format!("/api/v1/session/{id}"), Some(json!({"questionIndex": 0, "answer": "1789"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid_state"));

    let (status, saved) = call(&app, "POST", &format!("/api/v1/session/{id}"), Some(json!({"questionIndex": 0, "answer": "1789", "action": "save"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["action"], json!("save"));
    assert_eq!(saved["savedCount"], json!(1));

    let (status, result) = call(&app, "POST", &format!("/api/v1/session/{id}"), Some(json!({"action": "submit"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["action"], json!("submit"));
    assert_eq!(result["completed"], json!(true));
    let total = start["session"]["totalQuestions"].as_u64().unwrap();
    assert_eq!(result["answers"].as_array().unwrap().len() as u64, total);
    assert_eq!(result["skipped"].as_u64().unwrap(), total - 1);

    let (_, badges) = call(&app, "GET", "/api/v1/users/eleve-2/badges", None).await;
    assert_eq!(badges["currentStreak"], json!(1));
    assert!(badges["badges"].as_array().unwrap().iter().any(|b| b["slug"] == json!("premier-quiz")));

    let (_, mastery) = call(&app, "GET", "/api/v1/users/eleve-2/mastery", None).await;
    assert_eq!(mastery["userId"], json!("eleve-2"));
    assert!(mastery["competences"].is_array());
  }

  #[tokio::test]
  async fn test_create_session_body_handling() {
    let app = app().await;
    let (status, start) = call(&app, "POST", "/api/v1/quiz/fractions-et-decimaux/session", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(start["session"]["userId"].as_str().unwrap().starts_with("anon-"));

    let (status, body) = call(&app, "POST", "/api/v1/quiz/fractions-et-decimaux/session", Some(json!({"userId": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation_error"));
  }

  #[tokio::test]
  async fn test_malformed_submit_body_is_validation_error() {
    let app = app().await;
    let (_, start) = call(&app, "POST", "/api/v1/quiz/fractions-et-decimaux/session", Some(json!({}))).await;
    let id = start["session"]["id"].as_str().unwrap().to_string();
    let (status, body) = call(&app, "POST", &format!("/api/v1/session/{id}"), Some(json!({"questionIndex": "first"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation_error"));
  }
}
