//! Application state: the document store, prompts and the optional OpenAI client.
//!
//! This module owns:
//!   - the store, seeded with built-in content plus the optional TOML catalog
//!   - the grading prompts (from TOML or defaults)
//!   - the optional OpenAI client used for premium grading

use tracing::{info, instrument};

use crate::config::{load_catalog_from_env, CatalogConfig, Prompts};
use crate::openai::OpenAI;
use crate::seeds::{seed_badges, seed_questions, seed_quizzes};
use crate::store::Store;

pub struct AppState {
  pub store: Store,
  pub openai: Option<OpenAI>,
  pub prompts: Prompts,
}

impl AppState {
  /// Build state from env: load catalog, seed content, init OpenAI.
  #[instrument(level = "info", skip_all)]
  pub async fn from_env() -> Self {
    let catalog = load_catalog_from_env();
    let openai = OpenAI::from_env();
    if let Some(oa) = &openai {
      info!(target: "quiz_engine", base_url = %oa.base_url, grading_model = %oa.grading_model, "OpenAI grading enabled.");
    } else {
      info!(target: "quiz_engine", "OpenAI disabled (no OPENAI_API_KEY). Open answers use local grading only.");
    }
    Self::build(catalog, openai).await
  }

  /// Seeds first, then catalog entries (which replace seeds with the same key).
  pub async fn build(catalog: Option<CatalogConfig>, openai: Option<OpenAI>) -> Self {
    let store = Store::new();
    for quiz in seed_quizzes() {
      store.put_quiz(quiz).await;
    }
    for question in seed_questions() {
      store.put_question(question).await;
    }
    for badge in seed_badges() {
      store.put_badge(badge).await;
    }

    let prompts = match catalog {
      Some(cfg) => {
        for quiz in cfg.quizzes {
          store.put_quiz(quiz).await;
        }
        for question in cfg.questions {
          store.put_question(question).await;
        }
        for profile in cfg.users {
          store.put_profile(profile).await;
        }
        for badge in cfg.badges {
          store.put_badge(badge).await;
        }
        cfg.prompts
      }
      None => Prompts::default(),
    };

    let (quizzes, questions, badges) = store.counts().await;
    info!(target: "quiz_engine", quizzes, questions, badges, "Startup content inventory");

    Self { store, openai, prompts }
  }

  /// State over a prepared store, without AI grading.
  pub fn with_store(store: Store) -> Self {
    Self { store, openai: None, prompts: Prompts::default() }
  }
}
