use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    #[serde(other)]
    Unknown,
}

impl Difficulty {
    /// Per-question time budget in seconds.
    pub const fn time_limit(self) -> u32 {
        match self {
            Difficulty::Easy => 10,
            Difficulty::Medium => 15,
            Difficulty::Hard => 20,
            Difficulty::Unknown => 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub shuffled_options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
}

impl QuizQuestion {
    pub fn time_limit(&self) -> u32 {
        self.difficulty.time_limit()
    }

    pub fn is_correct(&self, answer: &str) -> bool {
        answer == self.correct_answer
    }

    /// Options in the order they should be shown; falls back to the
    /// canonical order when no shuffle was stored.
    pub fn display_options(&self) -> &[String] {
        if self.shuffled_options.is_empty() {
            &self.options
        } else {
            &self.shuffled_options
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswer {
    pub question_id: String,
    pub selected_answer: String,
    pub is_correct: bool,
    pub time_spent: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_timeout: bool,
}

impl QuizAnswer {
    pub fn timeout(question: &QuizQuestion, timestamp: DateTime<Utc>) -> Self {
        Self {
            question_id: question.id.clone(),
            selected_answer: String::new(),
            is_correct: false,
            time_spent: question.time_limit(),
            timestamp,
            is_timeout: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizProgress {
    pub attempt_id: Uuid,
    pub current_question_index: usize,
    pub answers: Vec<QuizAnswer>,
    pub start_time: DateTime<Utc>,
    pub current_question_start_time: DateTime<Utc>,
    #[serde(default)]
    pub total_time: u32,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub score: u32,
    pub total_questions: usize,
    #[serde(default)]
    pub correct_answers: u32,
    #[serde(default)]
    pub wrong_answers: u32,
    #[serde(default)]
    pub skipped_answers: u32,
    #[serde(default)]
    pub timeout_answers: u32,
}

impl QuizProgress {
    pub fn new(total_questions: usize, now: DateTime<Utc>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            current_question_index: 0,
            answers: Vec::new(),
            start_time: now,
            current_question_start_time: now,
            total_time: 0,
            is_completed: false,
            score: 0,
            total_questions,
            correct_answers: 0,
            wrong_answers: 0,
            skipped_answers: 0,
            timeout_answers: 0,
        }
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&QuizAnswer> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }

    pub fn has_answer(&self, question_id: &str) -> bool {
        self.answer_for(question_id).is_some()
    }

    /// Appends an answer and bumps the matching counters. Returns false and
    /// leaves the progress untouched when the question already has one.
    pub fn record(&mut self, answer: QuizAnswer) -> bool {
        if self.is_completed || self.has_answer(&answer.question_id) {
            return false;
        }
        if answer.is_correct {
            self.correct_answers += 1;
        } else {
            self.wrong_answers += 1;
        }
        if answer.is_timeout {
            self.timeout_answers += 1;
        }
        self.answers.push(answer);
        true
    }

    pub fn calculate_score(&self) -> u32 {
        if self.total_questions == 0 {
            0
        } else {
            ((self.correct_answers as f64) * 100.0 / (self.total_questions as f64)).round() as u32
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuizMode {
    #[default]
    Academic,
    Entrance,
}

/// Descriptor of the query that produced a question set. The core never
/// interprets it; unknown fields are kept so it round-trips through storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuizFilter {
    #[serde(default)]
    pub mode: QuizMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrance_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

pub fn validate_questions(questions: &[QuizQuestion]) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if questions.is_empty() {
        issues.push(ValidationIssue {
            field: "questions".into(),
            issue: "must contain at least one question".into(),
        });
    }

    let mut question_ids = HashSet::new();
    for (i, q) in questions.iter().enumerate() {
        if q.id.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].id"),
                issue: "must not be empty".into(),
            });
        }
        if !question_ids.insert(q.id.as_str()) {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].id"),
                issue: "must be unique".into(),
            });
        }
        if q.question.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].question"),
                issue: "must not be empty".into(),
            });
        }
        if q.options.len() != OPTIONS_PER_QUESTION {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].options"),
                issue: format!("must contain exactly {OPTIONS_PER_QUESTION} options"),
            });
        }
        let mut seen = HashSet::new();
        for (j, opt) in q.options.iter().enumerate() {
            if opt.trim().is_empty() {
                issues.push(ValidationIssue {
                    field: format!("questions[{i}].options[{j}]"),
                    issue: "must not be empty".into(),
                });
            }
            if !seen.insert(opt.as_str()) {
                issues.push(ValidationIssue {
                    field: format!("questions[{i}].options[{j}]"),
                    issue: "must be unique".into(),
                });
            }
        }
        if !q.options.contains(&q.correct_answer) {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].correctAnswer"),
                issue: "must match one of the options".into(),
            });
        }
        if !q.shuffled_options.is_empty() && !is_permutation(&q.options, &q.shuffled_options) {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].shuffledOptions"),
                issue: "must be a permutation of options".into(),
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

pub fn is_permutation(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left: Vec<&String> = a.iter().collect();
    let mut right: Vec<&String> = b.iter().collect();
    left.sort();
    right.sort();
    left == right
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, difficulty: Difficulty) -> QuizQuestion {
        QuizQuestion {
            id: id.into(),
            question: format!("Question {id}"),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            shuffled_options: Vec::new(),
            correct_answer: "B".into(),
            difficulty,
            hint: None,
            reference_url: None,
            priority: None,
            subject_name: None,
        }
    }

    #[test]
    fn time_limits_by_difficulty() {
        assert_eq!(Difficulty::Easy.time_limit(), 10);
        assert_eq!(Difficulty::Medium.time_limit(), 15);
        assert_eq!(Difficulty::Hard.time_limit(), 20);
        assert_eq!(Difficulty::Unknown.time_limit(), 15);
    }

    #[test]
    fn unknown_difficulty_falls_back() {
        let d: Difficulty = serde_json::from_str("\"extreme\"").unwrap();
        assert_eq!(d, Difficulty::Unknown);
        assert_eq!(d.time_limit(), 15);
    }

    #[test]
    fn question_json_uses_camel_case() {
        let raw = serde_json::json!({
            "id": "q1",
            "question": "2+2",
            "options": ["1", "2", "3", "4"],
            "correctAnswer": "4",
            "difficulty": "hard",
            "subjectName": "Math"
        });
        let q: QuizQuestion = serde_json::from_value(raw).unwrap();
        assert_eq!(q.correct_answer, "4");
        assert_eq!(q.subject_name.as_deref(), Some("Math"));
        assert!(q.shuffled_options.is_empty());
        assert_eq!(q.display_options(), q.options.as_slice());
        assert!(q.is_correct("4"));
        assert!(!q.is_correct(" 4"));
    }

    #[test]
    fn validate_questions_ok() {
        let qs = vec![question("q1", Difficulty::Easy), question("q2", Difficulty::Hard)];
        assert!(validate_questions(&qs).is_ok());
    }

    #[test]
    fn validate_questions_negative() {
        let mut qs = vec![question("q1", Difficulty::Easy), question("q1", Difficulty::Hard)];
        qs[0].correct_answer = "Z".into();
        qs[1].options.pop();
        let issues = validate_questions(&qs).err().unwrap();
        assert!(issues.iter().any(|i| i.issue.contains("unique")));
        assert!(issues.iter().any(|i| i.field == "questions[0].correctAnswer"));
        assert!(issues.iter().any(|i| i.field == "questions[1].options"));
        assert!(validate_questions(&[]).is_err());
    }

    #[test]
    fn record_keeps_one_answer_per_question() {
        let q = question("q1", Difficulty::Easy);
        let mut progress = QuizProgress::new(2, Utc::now());
        assert!(progress.record(QuizAnswer::timeout(&q, Utc::now())));
        assert!(!progress.record(QuizAnswer::timeout(&q, Utc::now())));
        assert_eq!(progress.answers.len(), 1);
        assert_eq!(progress.wrong_answers, 1);
        assert_eq!(progress.timeout_answers, 1);
    }

    #[test]
    fn score_rounds_to_percentage() {
        let mut progress = QuizProgress::new(3, Utc::now());
        progress.correct_answers = 2;
        assert_eq!(progress.calculate_score(), 67);
        progress.total_questions = 0;
        assert_eq!(progress.calculate_score(), 0);
    }
}
