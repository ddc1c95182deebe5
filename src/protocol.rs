//! Public protocol structs for the HTTP API (serde ready, camelCase on the wire).
//! Keep this small and stable to evolve backend and frontend independently.
//!
//! Question delivery goes through `present_question`, which rebuilds the
//! per-session shuffle and drops every answer-bearing field.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    AiEvaluation, AnswerRecord, Badge, CompetenceRecord, Difficulty, MasteryRecord, Question, QuestionBody, QuestionType,
    Quiz, QuizSession, SessionMode, SessionStatus, Tier, UserBadge, UserStats,
};
use crate::session::{Action, Answered, CreateSession, Delivery, Outcome, QuizInfo, SessionStart, Submission};
use crate::shuffle;
use crate::verifier::{self, Presentation};

//
// Sessions
//

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateSessionIn {
    pub user_id: Option<String>,
    pub grade_id: Option<String>,
    pub mode: Option<SessionMode>,
}

impl From<CreateSessionIn> for CreateSession {
    fn from(body: CreateSessionIn) -> Self {
        CreateSession { user_id: body.user_id, grade_id: body.grade_id, mode: body.mode }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOut {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub subject: Option<String>,
    pub themes: Vec<String>,
    pub max_questions: Option<usize>,
    pub default_mode: SessionMode,
    pub time_limit_secs: Option<u32>,
}

impl From<&Quiz> for QuizOut {
    fn from(q: &Quiz) -> Self {
        QuizOut {
            id: q.id.clone(),
            slug: q.slug.clone(),
            title: q.title.clone(),
            subject: q.subject.clone(),
            themes: q.themes.clone(),
            max_questions: q.max_questions,
            default_mode: q.default_mode,
            time_limit_secs: q.time_limit_secs,
        }
    }
}

/// Client-safe session projection: no question ids, no shuffles, answer keys
/// only for questions already answered.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub quiz_slug: String,
    pub grade_id: Option<String>,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub current_index: usize,
    pub total_questions: usize,
    pub score: f64,
    pub percentage: f64,
    pub answers: Vec<AnswerRecord>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub saved_answers: HashMap<usize, Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining_secs: Option<i64>,
}

pub fn session_view(s: &QuizSession, now: DateTime<Utc>) -> SessionView {
    let mut answers = s.answers.clone();
    answers.sort_by_key(|a| a.question_index);
    SessionView {
        id: s.id.clone(),
        user_id: s.user_id.clone(),
        quiz_id: s.quiz_id.clone(),
        quiz_slug: s.quiz_slug.clone(),
        grade_id: s.grade_id.clone(),
        mode: s.mode,
        status: s.status,
        current_index: s.current_index,
        total_questions: s.total_questions,
        score: s.score,
        percentage: s.percentage(),
        answers,
        saved_answers: s.saved_answers.clone(),
        started_at: s.started_at,
        completed_at: s.completed_at,
        last_activity_at: s.last_activity_at,
        time_limit_secs: s.time_limit_secs,
        time_remaining_secs: match s.status {
            SessionStatus::InProgress => s.time_remaining_secs(now),
            _ => None,
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartOut {
    pub session: SessionView,
    pub quiz: QuizOut,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_niveau: Option<Tier>,
    pub resumed: bool,
}

pub fn to_start_out(start: &SessionStart, now: DateTime<Utc>) -> SessionStartOut {
    SessionStartOut {
        session: session_view(&start.session, now),
        quiz: QuizOut::from(&start.quiz),
        user_niveau: start.user_niveau,
        resumed: start.resumed,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizInfoOut {
    pub quiz: QuizOut,
    pub available_questions: usize,
}

impl From<&QuizInfo> for QuizInfoOut {
    fn from(info: &QuizInfo) -> Self {
        QuizInfoOut { quiz: QuizOut::from(&info.quiz), available_questions: info.available_questions }
    }
}

//
// Question delivery
//

/// An ordering item as shown; `id` is its presentation slot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemOut {
    pub id: usize,
    pub text: String,
}

/// A map position to label. Targets are listed in authored order and carry
/// no text; the label texts are delivered separately, shuffled.
#[derive(Debug, Serialize)]
pub struct MapTargetOut {
    pub x: f64,
    pub y: f64,
}

/// Type-specific, answer-free part of a delivered question.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PresentedBody {
    Choices {
        options: Vec<String>,
    },
    FillBlank {
        text: String,
        blanks: usize,
    },
    Matching {
        left: Vec<String>,
        right: Vec<String>,
    },
    Ordering {
        items: Vec<OrderItemOut>,
    },
    #[serde(rename_all = "camelCase")]
    MapLabels {
        map_url: String,
        labels: Vec<String>,
        targets: Vec<MapTargetOut>,
    },
    Plain {},
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOut {
    pub id: String,
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub body: PresentedBody,
}

/// Strip the answer key and apply this session's presentation shuffle.
pub fn present_question(q: &Question, session_id: &str) -> QuestionOut {
    let presentation = Presentation { session_id, question_id: &q.id };
    let body = match &q.body {
        QuestionBody::Qcm(b) | QuestionBody::QcmImage(b) => PresentedBody::Choices {
            options: shuffle::apply(&b.options, &presentation.permutation(b.options.len(), None)),
        },
        QuestionBody::QcmMultiple(b) => PresentedBody::Choices {
            options: shuffle::apply(&b.options, &presentation.permutation(b.options.len(), None)),
        },
        QuestionBody::TrueFalse(_) | QuestionBody::OpenShort(_) | QuestionBody::OpenLong(_) => PresentedBody::Plain {},
        QuestionBody::FillBlank(b) => PresentedBody::FillBlank { text: b.text.clone(), blanks: b.answers.len() },
        QuestionBody::Matching(b) => {
            let rights: Vec<String> = b.pairs.iter().map(|p| p.right.clone()).collect();
            PresentedBody::Matching {
                left: b.pairs.iter().map(|p| p.left.clone()).collect(),
                right: shuffle::apply(&rights, &verifier::matching_permutation(&presentation, b)),
            }
        }
        QuestionBody::Ordering(b) => {
            let perm = verifier::ordering_permutation(&presentation, b);
            PresentedBody::Ordering {
                items: perm
                    .iter()
                    .enumerate()
                    .map(|(slot, &i)| OrderItemOut { id: slot, text: b.items[i].text.clone() })
                    .collect(),
            }
        }
        QuestionBody::MapLabels(b) => {
            let texts: Vec<String> = b.labels.iter().map(|l| l.text.clone()).collect();
            PresentedBody::MapLabels {
                map_url: b.map_url.clone(),
                labels: shuffle::apply(&texts, &verifier::map_labels_permutation(&presentation, b)),
                targets: b.labels.iter().map(|l| MapTargetOut { x: l.x, y: l.y }).collect(),
            }
        }
    };
    QuestionOut { id: q.id.clone(), question_type: q.question_type(), prompt: q.prompt.clone(), image: q.image.clone(), body }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDeliveryOut {
    pub session_id: String,
    pub index: usize,
    pub total_questions: usize,
    pub mode: SessionMode,
    pub question: QuestionOut,
    pub difficulty: Difficulty,
    pub subject: String,
    pub themes: Vec<String>,
    pub already_answered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_answer: Option<AnswerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_answer: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining_secs: Option<i64>,
}

pub fn to_delivery_out(d: &Delivery, now: DateTime<Utc>) -> QuestionDeliveryOut {
    QuestionDeliveryOut {
        session_id: d.session.id.clone(),
        index: d.index,
        total_questions: d.session.total_questions,
        mode: d.session.mode,
        question: present_question(&d.question, &d.session.id),
        difficulty: d.question.difficulty_for(d.session.grade_id.as_deref()),
        subject: d.question.subject.clone(),
        themes: d.question.themes.clone(),
        already_answered: d.previous_answer.is_some(),
        previous_answer: d.previous_answer.clone(),
        saved_answer: d.saved_answer.clone(),
        time_remaining_secs: d.session.time_remaining_secs(now),
    }
}

//
// Answers
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitIn {
    #[serde(default)]
    pub question_index: Option<usize>,
    #[serde(default)]
    pub answer: Value,
    #[serde(default)]
    pub question_type: Option<QuestionType>,
    #[serde(default)]
    pub action: Action,
}

impl From<SubmitIn> for Submission {
    fn from(body: SubmitIn) -> Self {
        Submission { index: body.question_index, answer: body.answer, question_type: body.question_type, action: body.action }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOut {
    pub question_index: usize,
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_score: Option<f64>,
    pub near_miss: bool,
    pub correct_answer: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_evaluation: Option<AiEvaluation>,
    pub score: f64,
    pub percentage: f64,
    pub current_index: usize,
    pub total_questions: usize,
    pub completed: bool,
    pub new_badges: Vec<Badge>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOut {
    pub question_index: usize,
    pub saved_count: usize,
    pub total_questions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResultOut {
    pub score: f64,
    pub percentage: f64,
    pub total_questions: usize,
    pub skipped: usize,
    pub answers: Vec<AnswerRecord>,
    pub completed: bool,
    pub new_badges: Vec<Badge>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SubmitOut {
    Answer(AnswerOut),
    Save(SaveOut),
    Submit(ExamResultOut),
}

fn answer_out(a: Answered) -> AnswerOut {
    let Answered { session, record, explanation, feedback, new_badges } = a;
    AnswerOut {
        question_index: record.question_index,
        is_correct: record.is_correct,
        partial_score: record.partial_score,
        near_miss: record.near_miss,
        correct_answer: record.correct_answer,
        explanation,
        feedback,
        ai_evaluation: record.ai_evaluation,
        score: session.score,
        percentage: session.percentage(),
        current_index: session.current_index,
        total_questions: session.total_questions,
        completed: session.status == SessionStatus::Completed,
        new_badges,
    }
}

impl From<Outcome> for SubmitOut {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Answered(a) => SubmitOut::Answer(answer_out(*a)),
            Outcome::Saved { session, index } => SubmitOut::Save(SaveOut {
                question_index: index,
                saved_count: session.saved_answers.len(),
                total_questions: session.total_questions,
            }),
            Outcome::Submitted { session, new_badges } => {
                let percentage = session.percentage();
                let mut answers = session.answers;
                answers.sort_by_key(|a| a.question_index);
                SubmitOut::Submit(ExamResultOut {
                    score: session.score,
                    percentage,
                    total_questions: session.total_questions,
                    skipped: answers.iter().filter(|a| a.skipped).count(),
                    answers,
                    completed: session.status == SessionStatus::Completed,
                    new_badges,
                })
            }
        }
    }
}

//
// Learners
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMasteryOut {
    pub user_id: String,
    pub records: Vec<MasteryRecord>,
    pub competences: Vec<CompetenceRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarnedBadgeOut {
    #[serde(flatten)]
    pub badge: Badge,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBadgesOut {
    pub user_id: String,
    pub badges: Vec<EarnedBadgeOut>,
    pub current_streak: u32,
    pub best_streak: u32,
    pub badge_points: u32,
}

/// Join earned badges with the catalog; grants whose badge left the catalog are dropped.
pub fn to_user_badges_out(user_id: &str, earned: Vec<UserBadge>, catalog: &[Badge], stats: &UserStats) -> UserBadgesOut {
    let badges = earned
        .into_iter()
        .filter_map(|ub| {
            catalog
                .iter()
                .find(|b| b.slug == ub.badge_slug)
                .map(|b| EarnedBadgeOut { badge: b.clone(), earned_at: ub.earned_at })
        })
        .collect();
    UserBadgesOut {
        user_id: user_id.to_string(),
        badges,
        current_streak: stats.current_streak,
        best_streak: stats.best_streak,
        badge_points: stats.badge_points,
    }
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
