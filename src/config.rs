//! Loading the content catalog (prompts, quizzes, questions, learners, badges) from TOML.
//!
//! See `CatalogConfig` and `Prompts` for the expected schema. Everything is
//! optional; built-in seed content is always loaded alongside.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{Badge, Question, Quiz, UserProfile};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CatalogConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub quizzes: Vec<Quiz>,
  #[serde(default)]
  pub questions: Vec<Question>,
  #[serde(default)]
  pub users: Vec<UserProfile>,
  #[serde(default)]
  pub badges: Vec<Badge>,
}

/// Prompts used by the AI grader. Override them in TOML to tune tone or rubric.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub grading_system: String,
  pub grading_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      grading_system: "You are a benevolent but rigorous teacher grading a school pupil's written answer. Respond ONLY with strict JSON.".into(),
      grading_user_template: "Question: {question}\nExpected elements: {keywords}\nReference answer: {reference}\nRubric: {rubric}\nPupil answer: {answer}\n\nReturn JSON {\"score\": number (0-100), \"feedback\": string, \"strengths\": [string], \"improvements\": [string]}. Address the pupil directly, in the language of the question.".into(),
    }
  }
}

/// Server settings read from the environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
  pub port: u16,
}

impl ServerConfig {
  pub fn from_env() -> Self {
    let port = std::env::var("PORT")
      .ok()
      .and_then(|p| p.parse::<u16>().ok())
      .unwrap_or(3000);
    Self { port }
  }
}

pub fn parse_catalog(s: &str) -> Result<CatalogConfig, toml::de::Error> {
  toml::from_str::<CatalogConfig>(s)
}

/// Attempt to load `CatalogConfig` from QUIZ_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_catalog_from_env() -> Option<CatalogConfig> {
  let path = std::env::var("QUIZ_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_catalog(&s) {
      Ok(cfg) => {
        info!(target: "quiz_engine", %path, quizzes = cfg.quizzes.len(), questions = cfg.questions.len(), "Loaded catalog config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quiz_engine", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quiz_engine", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
