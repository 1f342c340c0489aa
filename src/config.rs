use crate::error::QuizError;
use std::time::Duration;

/// Runtime settings, read from the environment with defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuizConfig {
    /// How long a stored question set stays valid.
    pub session_timeout: Duration,
    /// Pause between a timeout being recorded and the move to the next question.
    pub timeout_advance_delay: Duration,
    /// Countdown tick period.
    pub tick_interval: Duration,
    /// File backing the local store; `None` keeps everything in memory.
    pub state_path: Option<String>,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30 * 60),
            timeout_advance_delay: Duration::from_millis(1000),
            tick_interval: Duration::from_millis(1000),
            state_path: Some(format!("{}/local_state.json", env!("CARGO_MANIFEST_DIR"))),
        }
    }
}

impl QuizConfig {
    pub fn from_env() -> Result<Self, QuizError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, QuizError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let session_timeout = parse_u64(&lookup, "QUIZ_SESSION_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(default.session_timeout);
        let timeout_advance_delay = parse_u64(&lookup, "QUIZ_TIMEOUT_ADVANCE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(default.timeout_advance_delay);
        let tick_interval = parse_u64(&lookup, "QUIZ_TICK_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(default.tick_interval);
        if tick_interval.is_zero() {
            return Err(QuizError::Config {
                key: "QUIZ_TICK_INTERVAL_MS",
                value: "0".into(),
            });
        }
        let state_path = match lookup("QUIZ_STATE_PATH") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v),
            None => default.state_path,
        };
        Ok(Self {
            session_timeout,
            timeout_advance_delay,
            tick_interval,
            state_path,
        })
    }
}

fn parse_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, QuizError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| QuizError::Config { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = QuizConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.session_timeout, Duration::from_secs(1800));
        assert_eq!(cfg.timeout_advance_delay, Duration::from_secs(1));
        assert_eq!(cfg.tick_interval, Duration::from_secs(1));
        assert!(cfg.state_path.unwrap().ends_with("local_state.json"));
    }

    #[test]
    fn overrides_and_disables_file_store() {
        let cfg = QuizConfig::from_lookup(lookup_from(&[
            ("QUIZ_SESSION_TIMEOUT_SECS", "60"),
            ("QUIZ_TIMEOUT_ADVANCE_MS", "250"),
            ("QUIZ_STATE_PATH", ""),
        ]))
        .unwrap();
        assert_eq!(cfg.session_timeout, Duration::from_secs(60));
        assert_eq!(cfg.timeout_advance_delay, Duration::from_millis(250));
        assert!(cfg.state_path.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        let err = QuizConfig::from_lookup(lookup_from(&[("QUIZ_TICK_INTERVAL_MS", "soon")])).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(QuizConfig::from_lookup(lookup_from(&[("QUIZ_TICK_INTERVAL_MS", "0")])).is_err());
    }
}
