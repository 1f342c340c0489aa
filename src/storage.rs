use crate::clock::Clock;
use crate::codec;
use crate::error::QuizError;
use crate::models::{QuizFilter, QuizQuestion};
use crate::store::KvStore;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FILTER_KEY: &str = "quiz_filter";
pub const QUESTIONS_KEY: &str = "quiz_questions";
pub const START_TIME_KEY: &str = "quiz_start_time";
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

static QUIZ_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)quiz|question|answer|progress|timer").expect("static pattern"));

#[derive(Debug, Serialize, Deserialize)]
struct FilterBlob {
    filter: QuizFilter,
}

#[derive(Debug, Serialize, Deserialize)]
struct QuestionsBlob {
    questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone)]
pub struct StoredQuiz {
    pub filter: QuizFilter,
    pub questions: Vec<QuizQuestion>,
    pub questions_map: HashMap<String, QuizQuestion>,
    pub start_time: Option<DateTime<Utc>>,
}

/// Uniform Fisher–Yates shuffle of a copy of `items`.
pub fn shuffle<T: Clone, R: Rng + ?Sized>(items: &[T], rng: &mut R) -> Vec<T> {
    let mut out = items.to_vec();
    for i in (1..out.len()).rev() {
        let j = rng.gen_range(0..=i);
        out.swap(i, j);
    }
    out
}

/// Staging area for a fetched question set and the filter that produced it.
/// Everything it holds expires together once the session is older than the
/// configured timeout.
#[derive(Clone)]
pub struct QuizStorage {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    session_timeout: Duration,
}

impl QuizStorage {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn store_quiz_data(
        &self,
        filter: &QuizFilter,
        questions: &[QuizQuestion],
        should_shuffle: bool,
    ) -> Result<Vec<QuizQuestion>, QuizError> {
        self.store_quiz_data_with_rng(filter, questions, should_shuffle, &mut rand::thread_rng())
    }

    pub fn store_quiz_data_with_rng<R: Rng + ?Sized>(
        &self,
        filter: &QuizFilter,
        questions: &[QuizQuestion],
        should_shuffle: bool,
        rng: &mut R,
    ) -> Result<Vec<QuizQuestion>, QuizError> {
        let now = self.clock.now();

        let mut prepared: Vec<QuizQuestion> = questions
            .iter()
            .map(|q| {
                let mut q = q.clone();
                q.shuffled_options = shuffle(&q.options, &mut *rng);
                q
            })
            .collect();
        if should_shuffle {
            prepared = shuffle(&prepared, &mut *rng);
        }

        let filter_raw = codec::encode(&FilterBlob { filter: filter.clone() })?;
        let questions_raw = codec::encode(&QuestionsBlob { questions: prepared.clone() })?;

        self.store.set(START_TIME_KEY, now.timestamp_millis().to_string())?;
        self.store.set(FILTER_KEY, filter_raw)?;
        self.store.set(QUESTIONS_KEY, questions_raw)?;

        info!(
            "stored quiz session with {} questions (shuffled order: {})",
            prepared.len(),
            should_shuffle
        );
        Ok(prepared)
    }

    pub fn get_quiz_data(&self) -> Option<StoredQuiz> {
        let filter_raw = self.store.get(FILTER_KEY)?;
        let questions_raw = self.store.get(QUESTIONS_KEY)?;

        let start_time = match self.store.get(START_TIME_KEY) {
            Some(raw) => match parse_millis(&raw) {
                Some(ts) => Some(ts),
                None => {
                    warn!("quiz session start time is unreadable, clearing session");
                    self.clear_quiz_data();
                    return None;
                }
            },
            None => None,
        };

        if let Some(start) = start_time {
            if self.elapsed_since(start) > self.session_timeout {
                info!("quiz session expired, clearing stored data");
                self.clear_quiz_data();
                return None;
            }
        }

        let decoded = codec::decode::<FilterBlob>(&filter_raw)
            .and_then(|f| codec::decode::<QuestionsBlob>(&questions_raw).map(|q| (f, q)));
        let (filter_blob, questions_blob) = match decoded {
            Ok(v) => v,
            Err(err) => {
                warn!("failed to decode stored quiz data: {}", err);
                self.clear_quiz_data();
                return None;
            }
        };

        let questions_map = questions_blob
            .questions
            .iter()
            .map(|q| (q.id.clone(), q.clone()))
            .collect();
        Some(StoredQuiz {
            filter: filter_blob.filter,
            questions: questions_blob.questions,
            questions_map,
            start_time,
        })
    }

    pub fn clear_quiz_data(&self) {
        for key in [FILTER_KEY, QUESTIONS_KEY, START_TIME_KEY] {
            if let Err(err) = self.store.remove(key) {
                warn!("failed to remove {}: {}", key, err);
            }
        }
    }

    /// Clears the session keys and sweeps every other key that looks like
    /// quiz state.
    pub fn clear_all_quiz_data(&self) {
        self.clear_quiz_data();
        for key in self.store.keys() {
            if QUIZ_KEY_PATTERN.is_match(&key) {
                debug!("sweeping stored key {}", key);
                if let Err(err) = self.store.remove(&key) {
                    warn!("failed to remove {}: {}", key, err);
                }
            }
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.store.get(START_TIME_KEY).and_then(|raw| parse_millis(&raw))
    }

    pub fn is_quiz_expired(&self) -> bool {
        match self.start_time() {
            Some(start) => self.elapsed_since(start) > self.session_timeout,
            None => false,
        }
    }

    pub fn remaining_time(&self) -> Duration {
        match self.start_time() {
            Some(start) => self.session_timeout.saturating_sub(self.elapsed_since(start)),
            None => Duration::ZERO,
        }
    }

    pub fn elapsed_time(&self) -> Duration {
        self.start_time()
            .map(|start| self.elapsed_since(start))
            .unwrap_or(Duration::ZERO)
    }

    pub fn question_by_id(&self, id: &str) -> Option<QuizQuestion> {
        self.get_quiz_data()?.questions_map.remove(id)
    }

    /// Looks up several questions at once, in the order of `ids`. Unknown
    /// ids are skipped.
    pub fn questions_by_ids<I, S>(&self, ids: I) -> Vec<QuizQuestion>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(data) = self.get_quiz_data() else {
            return Vec::new();
        };
        ids.into_iter()
            .filter_map(|id| data.questions_map.get(id.as_ref()).cloned())
            .collect()
    }

    fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.clock.now() - start).to_std().unwrap_or(Duration::ZERO)
    }
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{is_permutation, Difficulty};
    use crate::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn question(id: &str) -> QuizQuestion {
        QuizQuestion {
            id: id.into(),
            question: format!("Question {id}"),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            shuffled_options: Vec::new(),
            correct_answer: "C".into(),
            difficulty: Difficulty::Medium,
            hint: None,
            reference_url: None,
            priority: None,
            subject_name: None,
        }
    }

    fn setup() -> (QuizStorage, Arc<MemoryStore>, ManualClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap());
        let storage = QuizStorage::new(store.clone(), Arc::new(clock.clone()));
        (storage, store, clock)
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let items: Vec<u32> = (0..50).collect();
        let mut out = shuffle(&items, &mut rng);
        assert_ne!(out, items);
        out.sort();
        assert_eq!(out, items);
        assert!(shuffle::<u32, _>(&[], &mut rng).is_empty());
    }

    #[test]
    fn round_trip_keeps_ids_and_permutes_options() {
        let (storage, _, _) = setup();
        let input: Vec<_> = (1..=6).map(|i| question(&format!("q{i}"))).collect();
        storage
            .store_quiz_data(&QuizFilter::default(), &input, true)
            .unwrap();

        let data = storage.get_quiz_data().unwrap();
        assert_eq!(data.questions.len(), input.len());
        let mut got: Vec<_> = data.questions.iter().map(|q| q.id.clone()).collect();
        let mut want: Vec<_> = input.iter().map(|q| q.id.clone()).collect();
        got.sort();
        want.sort();
        assert_eq!(got, want);
        for q in &data.questions {
            assert!(is_permutation(&q.options, &q.shuffled_options));
        }
        assert_eq!(data.questions_map.len(), 6);
        assert!(data.start_time.is_some());
    }

    #[test]
    fn no_shuffle_keeps_question_order() {
        let (storage, _, _) = setup();
        let mut rng = StdRng::seed_from_u64(42);
        let input = vec![question("qA"), question("qB")];
        storage
            .store_quiz_data_with_rng(&QuizFilter::default(), &input, false, &mut rng)
            .unwrap();
        let data = storage.get_quiz_data().unwrap();
        let ids: Vec<_> = data.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["qA", "qB"]);
        for (stored, original) in data.questions.iter().zip(&input) {
            assert_eq!(stored.options, original.options);
            assert!(is_permutation(&stored.options, &stored.shuffled_options));
        }
    }

    #[test]
    fn filter_round_trips_with_extra_fields() {
        let (storage, _, _) = setup();
        let filter: QuizFilter = serde_json::from_value(serde_json::json!({
            "mode": "entrance",
            "entranceCategory": "engineering",
            "count": 20,
            "source": "dashboard"
        }))
        .unwrap();
        storage.store_quiz_data(&filter, &[question("q1")], true).unwrap();
        let data = storage.get_quiz_data().unwrap();
        assert_eq!(data.filter, filter);
        assert_eq!(data.filter.extra.get("source"), Some(&serde_json::json!("dashboard")));
    }

    #[test]
    fn missing_key_returns_none_without_purge() {
        let (storage, store, _) = setup();
        storage.store_quiz_data(&QuizFilter::default(), &[question("q1")], true).unwrap();
        store.remove(QUESTIONS_KEY).unwrap();
        assert!(storage.get_quiz_data().is_none());
        assert!(store.get(FILTER_KEY).is_some());
    }

    #[test]
    fn expired_session_is_purged() {
        let (storage, store, clock) = setup();
        storage.store_quiz_data(&QuizFilter::default(), &[question("q1")], true).unwrap();
        clock.advance_secs(29 * 60);
        assert!(!storage.is_quiz_expired());
        assert_eq!(storage.remaining_time(), Duration::from_secs(60));
        assert!(storage.get_quiz_data().is_some());

        clock.advance_secs(61);
        assert!(storage.is_quiz_expired());
        assert!(storage.get_quiz_data().is_none());
        assert!(store.is_empty());
        assert!(storage.get_quiz_data().is_none());
        assert_eq!(storage.remaining_time(), Duration::ZERO);
        assert!(!storage.is_quiz_expired());

        storage.store_quiz_data(&QuizFilter::default(), &[question("q1")], true).unwrap();
        assert!(storage.get_quiz_data().is_some());
    }

    #[test]
    fn corrupted_blob_is_purged() {
        let (storage, store, _) = setup();
        storage.store_quiz_data(&QuizFilter::default(), &[question("q1")], true).unwrap();
        store.set(QUESTIONS_KEY, "%%%garbage".into()).unwrap();
        assert!(storage.get_quiz_data().is_none());
        assert!(store.get(FILTER_KEY).is_none());
        assert!(store.get(START_TIME_KEY).is_none());
    }

    #[test]
    fn derived_times_without_session() {
        let (storage, _, _) = setup();
        assert!(!storage.is_quiz_expired());
        assert_eq!(storage.remaining_time(), Duration::ZERO);
        assert_eq!(storage.elapsed_time(), Duration::ZERO);
        assert!(storage.question_by_id("q1").is_none());
        assert!(storage.questions_by_ids(["q1"]).is_empty());
    }

    #[test]
    fn elapsed_time_tracks_clock() {
        let (storage, _, clock) = setup();
        storage.store_quiz_data(&QuizFilter::default(), &[question("q1")], true).unwrap();
        clock.advance_secs(90);
        assert_eq!(storage.elapsed_time(), Duration::from_secs(90));
    }

    #[test]
    fn lookup_helpers() {
        let (storage, _, _) = setup();
        let input = vec![question("q1"), question("q2"), question("q3")];
        storage.store_quiz_data(&QuizFilter::default(), &input, true).unwrap();
        assert_eq!(storage.question_by_id("q2").unwrap().id, "q2");
        assert!(storage.question_by_id("nope").is_none());
        let found = storage.questions_by_ids(["q3", "missing", "q1"]);
        let ids: Vec<_> = found.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q3", "q1"]);
    }

    #[test]
    fn clear_all_sweeps_related_keys() {
        let (storage, store, _) = setup();
        storage.store_quiz_data(&QuizFilter::default(), &[question("q1")], true).unwrap();
        store.set("quiz_store", "{}".into()).unwrap();
        store.set("lastAnswerDraft", "x".into()).unwrap();
        store.set("Timer-Handle", "1".into()).unwrap();
        store.set("theme", "dark".into()).unwrap();

        storage.clear_all_quiz_data();
        assert_eq!(store.keys(), vec!["theme".to_string()]);
    }
}
