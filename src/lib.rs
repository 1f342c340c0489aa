pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod history;
pub mod machine;
pub mod models;
pub mod storage;
pub mod store;
pub mod timer;

use std::sync::Arc;

pub fn build_store(config: &config::QuizConfig) -> Arc<dyn store::KvStore> {
    match config.state_path.as_deref() {
        Some(path) => Arc::new(store::FileStore::open(path)),
        None => Arc::new(store::MemoryStore::new()),
    }
}

pub fn build_storage(
    config: &config::QuizConfig,
    store: Arc<dyn store::KvStore>,
    clock: Arc<dyn clock::Clock>,
) -> storage::QuizStorage {
    storage::QuizStorage::new(store, clock).with_session_timeout(config.session_timeout)
}

/// Machine for a new session, picking up a persisted snapshot when one exists.
pub fn build_machine(
    config: &config::QuizConfig,
    store: &dyn store::KvStore,
    clock: Arc<dyn clock::Clock>,
) -> machine::QuizMachine {
    let restored = match machine::QuizSnapshot::load(store) {
        Some(snapshot) => machine::QuizMachine::restore(snapshot, clock),
        None => machine::QuizMachine::new(clock),
    };
    restored.with_advance_delay(config.timeout_advance_delay)
}
