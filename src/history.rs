use crate::models::{QuizAnswer, QuizProgress};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub question_id: String,
    pub selected_answer: String,
    pub is_correct: bool,
    pub is_timeout: bool,
    pub time_spent: u32,
}

impl From<&QuizAnswer> for OutcomeRecord {
    fn from(answer: &QuizAnswer) -> Self {
        Self {
            question_id: answer.question_id.clone(),
            selected_answer: answer.selected_answer.clone(),
            is_correct: answer.is_correct,
            is_timeout: answer.is_timeout,
            time_spent: answer.time_spent,
        }
    }
}

/// Payload handed to the history submission action once an attempt is over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistorySubmission {
    pub attempt_id: Uuid,
    pub score: u32,
    pub total_time: u32,
    pub total_questions: usize,
    pub correct: Vec<OutcomeRecord>,
    pub wrong: Vec<OutcomeRecord>,
}

impl HistorySubmission {
    /// `None` until the attempt is completed.
    pub fn from_progress(progress: &QuizProgress) -> Option<Self> {
        if !progress.is_completed {
            return None;
        }
        let (correct, wrong): (Vec<_>, Vec<_>) = progress
            .answers
            .iter()
            .map(OutcomeRecord::from)
            .partition(|r| r.is_correct);
        Some(Self {
            attempt_id: progress.attempt_id,
            score: progress.score,
            total_time: progress.total_time,
            total_questions: progress.total_questions,
            correct,
            wrong,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn answer(id: &str, correct: bool, timeout: bool) -> QuizAnswer {
        QuizAnswer {
            question_id: id.into(),
            selected_answer: if timeout { String::new() } else { "X".into() },
            is_correct: correct,
            time_spent: 4,
            timestamp: Utc::now(),
            is_timeout: timeout,
        }
    }

    #[test]
    fn partitions_completed_progress() {
        let mut progress = QuizProgress::new(3, Utc::now());
        progress.record(answer("q1", true, false));
        progress.record(answer("q2", false, true));
        progress.record(answer("q3", false, false));
        assert!(HistorySubmission::from_progress(&progress).is_none());

        progress.is_completed = true;
        progress.score = progress.calculate_score();
        let submission = HistorySubmission::from_progress(&progress).unwrap();
        assert_eq!(submission.score, 33);
        assert_eq!(submission.correct.len(), 1);
        assert_eq!(submission.wrong.len(), 2);
        assert!(submission.wrong[0].is_timeout);

        let raw = serde_json::to_value(&submission).unwrap();
        assert_eq!(raw["wrong"][0]["selectedAnswer"], "");
        assert_eq!(raw["correct"][0]["questionId"], "q1");
    }
}
