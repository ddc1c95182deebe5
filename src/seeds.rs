//! Built-in content: a couple of demo quizzes and the default badge catalog,
//! so the engine is usable without an external catalog file.

use std::collections::HashMap;

use crate::domain::{
  Badge, BadgeCondition, ChoiceBody, Difficulty, FillBlankBody, MatchPair, MatchingBody, MultiChoiceBody, OpenBody,
  OrderItem, OrderingBody, Question, QuestionBody, Quiz, Rarity, SessionMode, Tier, Tolerance, TrueFalseBody,
  TypedAnswer,
};

fn grades(pairs: &[(&str, Difficulty)]) -> HashMap<String, Difficulty> {
  pairs.iter().map(|(g, d)| (g.to_string(), *d)).collect()
}

fn question(id: &str, subject: &str, themes: &[&str], prompt: &str, difficulty: HashMap<String, Difficulty>, body: QuestionBody) -> Question {
  Question {
    id: id.into(),
    subject: subject.into(),
    themes: themes.iter().map(|t| t.to_string()).collect(),
    difficulty,
    competences: vec![],
    prompt: prompt.into(),
    explanation: None,
    image: None,
    active: true,
    body,
  }
}

pub fn seed_quizzes() -> Vec<Quiz> {
  vec![
    Quiz {
      id: "quiz-fractions".into(),
      slug: "fractions-et-decimaux".into(),
      title: "Fractions et nombres décimaux".into(),
      subject: Some("mathematiques".into()),
      themes: vec!["fractions".into(), "decimaux".into()],
      max_questions: Some(6),
      default_mode: SessionMode::Revision,
      time_limit_secs: None,
      active: true,
    },
    Quiz {
      id: "quiz-revolution".into(),
      slug: "revolution-francaise".into(),
      title: "La Révolution française".into(),
      subject: Some("histoire".into()),
      themes: vec!["revolution".into()],
      max_questions: Some(4),
      default_mode: SessionMode::Exam,
      time_limit_secs: Some(900),
      active: true,
    },
  ]
}

pub fn seed_questions() -> Vec<Question> {
  use Difficulty::{Easy, Hard, Medium};
  let math = "mathematiques";
  let hist = "histoire";
  let mut out = vec![
    question(
      "math-frac-1", math, &["fractions"], "Quelle fraction est égale à 1/2 ?",
      grades(&[("cm1", Easy), ("cm2", Easy)]),
      QuestionBody::Qcm(ChoiceBody { options: vec!["2/4".into(), "1/3".into(), "3/4".into(), "2/3".into()], correct: 0 }),
    ),
    question(
      "math-frac-2", math, &["fractions"], "Sélectionne les fractions supérieures à 1.",
      grades(&[("cm1", Medium), ("cm2", Easy)]),
      QuestionBody::QcmMultiple(MultiChoiceBody {
        options: vec!["5/4".into(), "3/4".into(), "7/3".into(), "1/2".into()],
        correct: vec![0, 2],
      }),
    ),
    question(
      "math-frac-3", math, &["fractions"], "3/3 est égal à 1.",
      grades(&[("cm1", Easy)]),
      QuestionBody::TrueFalse(TrueFalseBody { correct: true }),
    ),
    question(
      "math-frac-4", math, &["fractions"], "Range ces fractions de la plus petite à la plus grande.",
      grades(&[("cm1", Hard), ("cm2", Medium)]),
      QuestionBody::Ordering(OrderingBody {
        items: vec![
          OrderItem { id: "a".into(), text: "1/4".into() },
          OrderItem { id: "b".into(), text: "1/2".into() },
          OrderItem { id: "c".into(), text: "3/4".into() },
          OrderItem { id: "d".into(), text: "5/4".into() },
        ],
      }),
    ),
    question(
      "math-dec-1", math, &["decimaux"], "Complète : 1 m = ___ cm et 1 m − 100 cm = ___ cm.",
      grades(&[("cm1", Medium), ("cm2", Easy)]),
      QuestionBody::FillBlank(FillBlankBody {
        text: "1 m = ___ cm et 1 m − 100 cm = ___ cm".into(),
        answers: vec!["100".into(), "0".into()],
        case_sensitive: false,
      }),
    ),
    question(
      "math-dec-2", math, &["decimaux", "fractions"], "Associe chaque fraction à son écriture décimale.",
      grades(&[("cm1", Hard), ("cm2", Medium)]),
      QuestionBody::Matching(MatchingBody {
        pairs: vec![
          MatchPair { left: "1/2".into(), right: "0,5".into() },
          MatchPair { left: "1/4".into(), right: "0,25".into() },
          MatchPair { left: "3/4".into(), right: "0,75".into() },
        ],
      }),
    ),
    question(
      "math-dec-3", math, &["decimaux"], "Combien font 2,5 × 4 ?",
      grades(&[("cm1", Medium), ("cm2", Easy)]),
      QuestionBody::OpenShort(OpenBody {
        typed_answer: Some(TypedAnswer::Float { value: 10.0, tolerance: Some(Tolerance::Absolute(0.0)) }),
        ..OpenBody::default()
      }),
    ),
    question(
      "math-dec-4", math, &["decimaux"], "Quel nombre est le plus grand ?",
      grades(&[("cm1", Hard), ("cm2", Hard)]),
      QuestionBody::Qcm(ChoiceBody { options: vec!["0,9".into(), "0,19".into(), "0,099".into()], correct: 0 }),
    ),
    question(
      "hist-rev-1", hist, &["revolution"], "En quelle année a eu lieu la prise de la Bastille ?",
      grades(&[("cm1", Easy), ("cm2", Easy)]),
      QuestionBody::OpenShort(OpenBody {
        typed_answer: Some(TypedAnswer::Year { value: 1789, tolerance: None }),
        ..OpenBody::default()
      }),
    ),
    question(
      "hist-rev-2", hist, &["revolution"], "Donne la date de la fête nationale française.",
      grades(&[("cm1", Medium), ("cm2", Easy)]),
      QuestionBody::OpenShort(OpenBody {
        typed_answer: Some(TypedAnswer::Date { value: "14/07".into() }),
        ..OpenBody::default()
      }),
    ),
    question(
      "hist-rev-3", hist, &["revolution"], "Explique pourquoi les États généraux ont été convoqués en 1789.",
      grades(&[("cm1", Hard), ("cm2", Medium)]),
      QuestionBody::OpenLong(OpenBody {
        expected_keywords: vec!["impôts".into(), "crise".into(), "roi".into(), "dette".into()],
        sample_answer: Some("Le roi Louis XVI les convoque pour trouver une solution à la crise financière : le royaume est endetté et il faut de nouveaux impôts.".into()),
        rubric: Some("Mentionner la crise financière et le rôle du roi.".into()),
        ..OpenBody::default()
      }),
    ),
    question(
      "hist-rev-4", hist, &["revolution"], "Qui était roi de France en 1789 ?",
      grades(&[("cm1", Easy)]),
      QuestionBody::OpenShort(OpenBody {
        typed_answer: Some(TypedAnswer::Text { value: "Louis XVI".into(), alternates: vec!["Louis 16".into(), "Louis seize".into()], case_sensitive: false }),
        ..OpenBody::default()
      }),
    ),
  ];
  for q in out.iter_mut() {
    q.competences = match q.subject.as_str() {
      "mathematiques" => vec!["calcul".into()],
      _ => vec!["reperes-chronologiques".into()],
    };
  }
  out
}

pub fn seed_badges() -> Vec<Badge> {
  vec![
    Badge {
      slug: "premier-quiz".into(),
      name: "Premier quiz".into(),
      description: "Terminer un premier quiz.".into(),
      condition: BadgeCondition::QuizzesCompleted { count: 1 },
      rarity: Rarity::Common,
      points: 10,
    },
    Badge {
      slug: "dix-quiz".into(),
      name: "Assidu".into(),
      description: "Terminer dix quiz.".into(),
      condition: BadgeCondition::QuizzesCompleted { count: 10 },
      rarity: Rarity::Rare,
      points: 30,
    },
    Badge {
      slug: "sans-faute".into(),
      name: "Sans faute".into(),
      description: "Obtenir un score parfait.".into(),
      condition: BadgeCondition::PerfectScores { count: 1 },
      rarity: Rarity::Rare,
      points: 25,
    },
    Badge {
      slug: "examen-parfait".into(),
      name: "Examen parfait".into(),
      description: "Obtenir un score parfait en mode examen.".into(),
      condition: BadgeCondition::PerfectExams { count: 1 },
      rarity: Rarity::Epic,
      points: 50,
    },
    Badge {
      slug: "serie-7".into(),
      name: "Une semaine d'affilée".into(),
      description: "S'entraîner sept jours de suite.".into(),
      condition: BadgeCondition::Streak { days: 7 },
      rarity: Rarity::Epic,
      points: 50,
    },
    Badge {
      slug: "leve-tot".into(),
      name: "Lève-tôt".into(),
      description: "Terminer un quiz avant 8 h.".into(),
      condition: BadgeCondition::CompletedBeforeHour { hour: 8 },
      rarity: Rarity::Common,
      points: 5,
    },
    Badge {
      slug: "couche-tard".into(),
      name: "Couche-tard".into(),
      description: "Terminer un quiz après 21 h.".into(),
      condition: BadgeCondition::CompletedAfterHour { hour: 21 },
      rarity: Rarity::Common,
      points: 5,
    },
    Badge {
      slug: "en-serie".into(),
      name: "En série".into(),
      description: "Cinq bonnes réponses d'affilée dans un quiz.".into(),
      condition: BadgeCondition::CorrectInARow { count: 5 },
      rarity: Rarity::Rare,
      points: 15,
    },
    Badge {
      slug: "polymathe".into(),
      name: "Polymathe".into(),
      description: "Atteindre le niveau expert dans trois matières.".into(),
      condition: BadgeCondition::SubjectMastery { tier: Tier::Expert, subjects: 3 },
      rarity: Rarity::Legendary,
      points: 100,
    },
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_seed_ids_are_unique() {
    let ids: HashSet<String> = seed_questions().into_iter().map(|q| q.id).collect();
    assert_eq!(ids.len(), seed_questions().len());
    let slugs: HashSet<String> = seed_badges().into_iter().map(|b| b.slug).collect();
    assert_eq!(slugs.len(), seed_badges().len());
  }

  #[test]
  fn test_every_quiz_has_questions() {
    let questions = seed_questions();
    for quiz in seed_quizzes() {
      assert!(questions.iter().any(|q| q.themes.iter().any(|t| quiz.themes.contains(t))), "{}", quiz.slug);
    }
  }
}
