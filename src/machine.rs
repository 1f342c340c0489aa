//! State machine for a single quiz attempt.
//!
//! The machine is driven from outside: the caller feeds it user answers and
//! one `update_timer` call per elapsed second (see [`crate::timer::QuizRunner`]
//! for the async driver). Every mutating operation reports what it did through
//! [`Outcome`] instead of failing, so out-of-order calls from a UI degrade to
//! no-ops that can still be observed.

use crate::clock::Clock;
use crate::config::QuizConfig;
use crate::error::QuizError;
use crate::models::{QuizAnswer, QuizProgress, QuizQuestion};
use crate::storage::QuizStorage;
use crate::store::KvStore;
use crate::timer::{Countdown, Tick};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SNAPSHOT_KEY: &str = "quiz_store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuizState {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Started,
    Resumed,
    TimedOut,
    Completed,
    Idle,
    IgnoredNoProgress,
    IgnoredCompleted,
    IgnoredDuplicateAnswer,
    IgnoredTimerStopped,
}

impl Outcome {
    pub fn is_ignored(self) -> bool {
        matches!(
            self,
            Outcome::IgnoredNoProgress
                | Outcome::IgnoredCompleted
                | Outcome::IgnoredDuplicateAnswer
                | Outcome::IgnoredTimerStopped
        )
    }
}

/// Persisted shape of the machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizSnapshot {
    pub questions: Vec<QuizQuestion>,
    pub progress: Option<QuizProgress>,
    pub is_quiz_started: bool,
    pub is_quiz_completed: bool,
}

impl QuizSnapshot {
    pub fn save(&self, store: &dyn KvStore) -> Result<(), QuizError> {
        let raw = serde_json::to_string(self).map_err(crate::error::StoreError::from)?;
        store.set(SNAPSHOT_KEY, raw)?;
        Ok(())
    }

    /// Reads the persisted snapshot. Unreadable data is dropped.
    pub fn load(store: &dyn KvStore) -> Option<Self> {
        let raw = store.get(SNAPSHOT_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!("discarding unreadable quiz snapshot: {}", err);
                if let Err(err) = store.remove(SNAPSHOT_KEY) {
                    warn!("failed to remove {}: {}", SNAPSHOT_KEY, err);
                }
                None
            }
        }
    }
}

pub struct QuizMachine {
    clock: Arc<dyn Clock>,
    advance_delay: Duration,
    questions: Vec<QuizQuestion>,
    question_index: HashMap<String, usize>,
    progress: Option<QuizProgress>,
    countdown: Countdown,
    is_quiz_started: bool,
    show_results: bool,
    pending_advance: Option<DateTime<Utc>>,
}

impl QuizMachine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            advance_delay: QuizConfig::default().timeout_advance_delay,
            questions: Vec::new(),
            question_index: HashMap::new(),
            progress: None,
            countdown: Countdown::default(),
            is_quiz_started: false,
            show_results: false,
            pending_advance: None,
        }
    }

    pub fn with_advance_delay(mut self, delay: Duration) -> Self {
        self.advance_delay = delay;
        self
    }

    /// Rebuilds a machine from persisted state. The countdown stays stopped
    /// until `initialize_quiz` is called with the same question set.
    pub fn restore(snapshot: QuizSnapshot, clock: Arc<dyn Clock>) -> Self {
        let mut machine = Self::new(clock);
        machine.set_questions(snapshot.questions);
        machine.progress = snapshot.progress;
        machine.is_quiz_started = snapshot.is_quiz_started;
        machine.show_results = snapshot.is_quiz_completed;
        let budget = machine.current_question().map(|q| q.time_limit()).unwrap_or(0);
        machine.countdown = Countdown::new(budget);
        machine
    }

    pub fn snapshot(&self) -> QuizSnapshot {
        QuizSnapshot {
            questions: self.questions.clone(),
            progress: self.progress.clone(),
            is_quiz_started: self.is_quiz_started,
            is_quiz_completed: self.is_completed(),
        }
    }

    pub fn advance_delay(&self) -> Duration {
        self.advance_delay
    }

    pub fn state(&self) -> QuizState {
        if self.is_completed() {
            QuizState::Completed
        } else if self.is_quiz_started && self.progress.is_some() {
            QuizState::InProgress
        } else {
            QuizState::NotStarted
        }
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn progress(&self) -> Option<&QuizProgress> {
        self.progress.as_ref()
    }

    pub fn current_question(&self) -> Option<&QuizQuestion> {
        let progress = self.progress.as_ref()?;
        self.questions.get(progress.current_question_index)
    }

    pub fn current_answer(&self) -> Option<&QuizAnswer> {
        let question = self.current_question()?;
        self.progress.as_ref()?.answer_for(&question.id)
    }

    pub fn time_remaining(&self) -> u32 {
        self.countdown.remaining()
    }

    pub fn is_timer_running(&self) -> bool {
        self.countdown.is_running()
    }

    pub fn is_quiz_started(&self) -> bool {
        self.is_quiz_started
    }

    pub fn is_completed(&self) -> bool {
        self.progress.as_ref().map(|p| p.is_completed).unwrap_or(false)
    }

    pub fn show_results(&self) -> bool {
        self.show_results
    }

    pub fn has_pending_advance(&self) -> bool {
        self.pending_advance.is_some()
    }

    /// True when an unanswered current question sits with its countdown
    /// stopped and nothing scheduled, e.g. a fresh attempt or one resumed
    /// before the first answer.
    pub fn awaiting_start(&self) -> bool {
        let Some(progress) = self.progress.as_ref() else {
            return false;
        };
        !progress.is_completed
            && !self.countdown.is_running()
            && self.pending_advance.is_none()
            && self.current_question().is_some()
            && self.current_answer().is_none()
    }

    pub fn question_by_id(&self, id: &str) -> Option<&QuizQuestion> {
        self.question_index.get(id).and_then(|&i| self.questions.get(i))
    }

    pub fn calculate_score(&self) -> u32 {
        self.progress.as_ref().map(|p| p.calculate_score()).unwrap_or(0)
    }

    pub fn initialize_quiz(&mut self, questions: Vec<QuizQuestion>) -> Outcome {
        let resume = self.progress.is_some() && same_question_set(&self.questions, &questions);
        self.set_questions(questions);

        if resume {
            return self.resume();
        }

        let now = self.clock.now();
        self.progress = Some(QuizProgress::new(self.questions.len(), now));
        self.is_quiz_started = false;
        self.show_results = false;
        self.pending_advance = None;
        let budget = self.questions.first().map(|q| q.time_limit()).unwrap_or(0);
        self.countdown = Countdown::new(budget);
        info!("initialized quiz with {} questions", self.questions.len());
        Outcome::Applied
    }

    fn resume(&mut self) -> Outcome {
        let now = self.clock.now();
        let Some(progress) = self.progress.as_ref() else {
            return Outcome::IgnoredNoProgress;
        };
        if progress.is_completed {
            self.countdown.stop();
            self.show_results = true;
            return Outcome::Resumed;
        }
        let Some(question) = self.questions.get(progress.current_question_index) else {
            return Outcome::Resumed;
        };

        let elapsed = (now - progress.current_question_start_time).num_seconds().max(0);
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
        let remaining = question.time_limit().saturating_sub(elapsed);
        let answered = progress.has_answer(&question.id);
        let any_answers = !progress.answers.is_empty();
        self.countdown.reset(remaining);
        info!(
            "resuming quiz at question {} with {}s left",
            progress.current_question_index, remaining
        );

        if answered {
            return Outcome::Resumed;
        }
        if remaining == 0 {
            self.is_quiz_started = true;
            return self.handle_timeout();
        }
        if any_answers {
            self.is_quiz_started = true;
            self.countdown.start();
        }
        Outcome::Resumed
    }

    pub fn start_quiz(&mut self) -> Outcome {
        let now = self.clock.now();
        let Some(progress) = self.progress.as_mut() else {
            return Outcome::IgnoredNoProgress;
        };
        if progress.is_completed {
            return Outcome::IgnoredCompleted;
        }
        progress.current_question_start_time = now;
        self.is_quiz_started = true;
        self.countdown.start();
        debug!("quiz started, {}s on the clock", self.countdown.remaining());
        Outcome::Started
    }

    pub fn answer_question(&mut self, answer: &str) -> Outcome {
        let now = self.clock.now();
        let Some(progress) = self.progress.as_mut() else {
            return Outcome::IgnoredNoProgress;
        };
        if progress.is_completed {
            return Outcome::IgnoredCompleted;
        }
        let Some(question) = self.questions.get(progress.current_question_index) else {
            return Outcome::IgnoredNoProgress;
        };
        if progress.has_answer(&question.id) {
            return Outcome::IgnoredDuplicateAnswer;
        }

        let is_correct = question.is_correct(answer);
        progress.record(QuizAnswer {
            question_id: question.id.clone(),
            selected_answer: answer.to_string(),
            is_correct,
            time_spent: question.time_limit().saturating_sub(self.countdown.remaining()),
            timestamp: now,
            is_timeout: false,
        });
        progress.current_question_start_time = now;
        self.countdown.stop();
        debug!("answered {} (correct: {})", question.id, is_correct);
        Outcome::Applied
    }

    pub fn next_question(&mut self) -> Outcome {
        let now = self.clock.now();
        let Some(progress) = self.progress.as_mut() else {
            return Outcome::IgnoredNoProgress;
        };
        if progress.is_completed {
            return Outcome::IgnoredCompleted;
        }
        self.pending_advance = None;

        let next = progress.current_question_index + 1;
        if next >= self.questions.len() {
            return self.complete_quiz();
        }

        self.countdown.stop();
        progress.current_question_index = next;
        progress.current_question_start_time = now;
        self.countdown.reset(self.questions[next].time_limit());
        self.countdown.start();
        debug!("moved to question {}", next);
        Outcome::Applied
    }

    pub fn complete_quiz(&mut self) -> Outcome {
        let now = self.clock.now();
        let Some(progress) = self.progress.as_mut() else {
            return Outcome::IgnoredNoProgress;
        };
        if progress.is_completed {
            return Outcome::IgnoredCompleted;
        }
        self.countdown.stop();
        self.pending_advance = None;

        let total = (now - progress.start_time).num_seconds().max(0);
        progress.total_time = u32::try_from(total).unwrap_or(u32::MAX);
        progress.is_completed = true;
        progress.score = progress.calculate_score();
        self.show_results = true;
        info!(
            "quiz completed: score {}%, {}/{} correct, {} timeouts",
            progress.score, progress.correct_answers, progress.total_questions, progress.timeout_answers
        );
        Outcome::Completed
    }

    /// Drops all in-memory state and every persisted quiz key.
    pub fn reset_quiz(&mut self, storage: &QuizStorage) -> Outcome {
        self.set_questions(Vec::new());
        self.reset_progress_only();
        storage.clear_all_quiz_data();
        info!("quiz reset");
        Outcome::Applied
    }

    /// Drops progress and the countdown but keeps the question set, so the
    /// same questions can be retried.
    pub fn reset_progress_only(&mut self) -> Outcome {
        self.progress = None;
        self.countdown = Countdown::default();
        self.is_quiz_started = false;
        self.show_results = false;
        self.pending_advance = None;
        Outcome::Applied
    }

    /// One second of countdown.
    pub fn update_timer(&mut self) -> Outcome {
        match self.countdown.tick() {
            Tick::Stopped => Outcome::IgnoredTimerStopped,
            Tick::Running(_) => Outcome::Applied,
            Tick::Expired => self.handle_timeout(),
        }
    }

    fn handle_timeout(&mut self) -> Outcome {
        let now = self.clock.now();
        self.countdown.stop();
        let Some(progress) = self.progress.as_mut() else {
            return Outcome::IgnoredNoProgress;
        };
        if progress.is_completed {
            return Outcome::IgnoredCompleted;
        }
        let Some(question) = self.questions.get(progress.current_question_index) else {
            return Outcome::IgnoredNoProgress;
        };
        if progress.has_answer(&question.id) {
            return Outcome::IgnoredDuplicateAnswer;
        }

        progress.record(QuizAnswer::timeout(question, now));
        let delay = chrono::Duration::from_std(self.advance_delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.pending_advance = Some(now + delay);
        info!("question {} timed out", question.id);
        Outcome::TimedOut
    }

    /// Runs the advance scheduled by a timeout once its delay has passed.
    pub fn poll_pending_advance(&mut self) -> Outcome {
        match self.pending_advance {
            Some(due) if self.clock.now() >= due => self.fire_pending_advance(),
            _ => Outcome::Idle,
        }
    }

    /// Runs the scheduled advance immediately, whatever the clock says.
    pub fn fire_pending_advance(&mut self) -> Outcome {
        if self.pending_advance.take().is_none() {
            return Outcome::Idle;
        }
        self.next_question()
    }

    fn set_questions(&mut self, questions: Vec<QuizQuestion>) {
        self.question_index = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id.clone(), i))
            .collect();
        self.questions = questions;
    }
}

fn same_question_set(held: &[QuizQuestion], incoming: &[QuizQuestion]) -> bool {
    held.len() == incoming.len() && held.iter().zip(incoming).all(|(a, b)| a.id == b.id)
}
