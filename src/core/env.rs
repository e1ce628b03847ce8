//! Environment Lookups
//!
//! Shared by every `from_env` constructor. A value that is set but does not
//! parse keeps its default and logs a warning.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Parse `key` from the environment, or return `default`.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring {}={}: {}", key, raw, e);
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a millisecond count from `key` into a [`Duration`].
pub fn env_millis(key: &str, default: Duration) -> Duration {
    let millis = env_parse(key, default.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Read a boolean flag: `1` or `true` (any case) is on.
pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Every test owns its keys; the process environment is shared.

    #[test]
    fn test_unset_keeps_default() {
        assert_eq!(env_parse("CRASH_ENV_TEST_UNSET", 42u32), 42);
        assert_eq!(
            env_millis("CRASH_ENV_TEST_UNSET_MS", Duration::from_millis(250)),
            Duration::from_millis(250)
        );
        assert!(!env_flag("CRASH_ENV_TEST_UNSET_FLAG"));
    }

    #[test]
    fn test_parses_set_value() {
        std::env::set_var("CRASH_ENV_TEST_SET", " 17 ");
        assert_eq!(env_parse("CRASH_ENV_TEST_SET", 0u64), 17);

        std::env::set_var("CRASH_ENV_TEST_SET_MS", "1500");
        assert_eq!(
            env_millis("CRASH_ENV_TEST_SET_MS", Duration::ZERO),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_unparsable_falls_back() {
        std::env::set_var("CRASH_ENV_TEST_BAD", "soon");
        assert_eq!(env_parse("CRASH_ENV_TEST_BAD", 9u16), 9);
        assert_eq!(env_parse("CRASH_ENV_TEST_BAD", 2.5f64), 2.5);
    }

    #[test]
    fn test_flag_values() {
        std::env::set_var("CRASH_ENV_TEST_FLAG_ON", "TRUE");
        std::env::set_var("CRASH_ENV_TEST_FLAG_ONE", "1");
        std::env::set_var("CRASH_ENV_TEST_FLAG_OFF", "yes");
        assert!(env_flag("CRASH_ENV_TEST_FLAG_ON"));
        assert!(env_flag("CRASH_ENV_TEST_FLAG_ONE"));
        assert!(!env_flag("CRASH_ENV_TEST_FLAG_OFF"));
    }
}
