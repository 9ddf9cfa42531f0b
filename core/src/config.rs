use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_SESSION_KEY_PREFIX: &str = "vision:mcp:session:";

const REDIS_URL_ENV: &str = "REDIS_URL";
const STORE_BACKEND_ENV: &str = "VISION_STORE_BACKEND";
const SESSION_TTL_ENV: &str = "VISION_SESSION_TTL_SECS";
const STORE_TIMEOUT_ENV: &str = "VISION_STORE_TIMEOUT_MS";
const STORE_RECONNECT_ENV: &str = "VISION_STORE_RECONNECT_SECS";
const SESSION_KEY_PREFIX_ENV: &str = "VISION_SESSION_KEY_PREFIX";

const SESSION_TTL_SECS_DEFAULT: u64 = 86_400;
const SESSION_TTL_SECS_MAX: u64 = 30 * 86_400;
const STORE_TIMEOUT_MS_DEFAULT: u64 = 2_000;
const STORE_TIMEOUT_MS_MIN: u64 = 50;
const STORE_TIMEOUT_MS_MAX: u64 = 60_000;
const STORE_RECONNECT_SECS_DEFAULT: u64 = 5;
const STORE_RECONNECT_SECS_MIN: u64 = 1;
const STORE_RECONNECT_SECS_MAX: u64 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreBackend {
    /// Case-insensitive backend name; `None` for anything unrecognized.
    pub fn from_name(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    fn from_env_value(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|v| !v.trim().is_empty()) else {
            return Self::Redis;
        };
        Self::from_name(raw).unwrap_or_else(|| {
            tracing::warn!(
                event = "store_backend_unknown",
                value = raw,
                "unknown VISION_STORE_BACKEND, falling back to redis"
            );
            Self::Redis
        })
    }
}

/// Settings for the credential store and the resolver sitting on top of it.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub key_prefix: String,
    /// `None` keeps bindings until logout.
    pub session_ttl: Option<Duration>,
    /// Upper bound for a single store round trip (and for connection setup).
    pub op_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_SESSION_KEY_PREFIX.to_string(),
            session_ttl: Some(Duration::from_secs(SESSION_TTL_SECS_DEFAULT)),
            op_timeout: Duration::from_millis(STORE_TIMEOUT_MS_DEFAULT),
            reconnect_interval: Duration::from_secs(STORE_RECONNECT_SECS_DEFAULT),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let redis_url = lookup(REDIS_URL_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        let key_prefix = lookup(SESSION_KEY_PREFIX_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_KEY_PREFIX.to_string());

        let (ttl_secs, ttl_clamped) = parse_env_u64_with_bounds(
            lookup(SESSION_TTL_ENV),
            0,
            SESSION_TTL_SECS_MAX,
            SESSION_TTL_SECS_DEFAULT,
        );
        let (timeout_ms, timeout_clamped) = parse_env_u64_with_bounds(
            lookup(STORE_TIMEOUT_ENV),
            STORE_TIMEOUT_MS_MIN,
            STORE_TIMEOUT_MS_MAX,
            STORE_TIMEOUT_MS_DEFAULT,
        );
        let (reconnect_secs, reconnect_clamped) = parse_env_u64_with_bounds(
            lookup(STORE_RECONNECT_ENV),
            STORE_RECONNECT_SECS_MIN,
            STORE_RECONNECT_SECS_MAX,
            STORE_RECONNECT_SECS_DEFAULT,
        );
        if ttl_clamped || timeout_clamped || reconnect_clamped {
            tracing::warn!(
                event = "store_config_clamped",
                session_ttl_secs = ttl_secs,
                op_timeout_ms = timeout_ms,
                reconnect_secs = reconnect_secs,
                "store settings out of range were clamped"
            );
        }

        Self {
            backend: StoreBackend::from_env_value(lookup(STORE_BACKEND_ENV).as_deref()),
            redis_url,
            key_prefix,
            session_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            op_timeout: Duration::from_millis(timeout_ms),
            reconnect_interval: Duration::from_secs(reconnect_secs),
        }
    }
}

/// Returns the parsed value and whether it had to be clamped into range.
/// Unparseable input falls back to `default` without being reported as clamped.
fn parse_env_u64_with_bounds(raw: Option<String>, min: u64, max: u64, default: u64) -> (u64, bool) {
    let Some(parsed) = raw.and_then(|v| v.trim().parse::<u64>().ok()) else {
        return (default, false);
    };
    let clamped = parsed.clamp(min, max);
    (clamped, clamped != parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> StoreConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StoreConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_point_at_local_redis() {
        let config = config_from(&[]);
        assert_eq!(config.backend, StoreBackend::Redis);
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.key_prefix, DEFAULT_SESSION_KEY_PREFIX);
        assert_eq!(config.session_ttl, Some(Duration::from_secs(86_400)));
        assert_eq!(config.op_timeout, Duration::from_millis(2_000));
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
    }

    #[test]
    fn env_values_override_defaults() {
        let config = config_from(&[
            ("REDIS_URL", "redis://cache.internal:6380/2"),
            ("VISION_STORE_BACKEND", "Memory"),
            ("VISION_SESSION_TTL_SECS", "600"),
            ("VISION_STORE_TIMEOUT_MS", "750"),
            ("VISION_SESSION_KEY_PREFIX", "tenant-a:"),
        ]);
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.redis_url, "redis://cache.internal:6380/2");
        assert_eq!(config.key_prefix, "tenant-a:");
        assert_eq!(config.session_ttl, Some(Duration::from_secs(600)));
        assert_eq!(config.op_timeout, Duration::from_millis(750));
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let config = config_from(&[("VISION_SESSION_TTL_SECS", "0")]);
        assert_eq!(config.session_ttl, None);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = config_from(&[
            ("VISION_STORE_TIMEOUT_MS", "1"),
            ("VISION_STORE_RECONNECT_SECS", "100000"),
        ]);
        assert_eq!(config.op_timeout, Duration::from_millis(STORE_TIMEOUT_MS_MIN));
        assert_eq!(
            config.reconnect_interval,
            Duration::from_secs(STORE_RECONNECT_SECS_MAX)
        );
    }

    #[test]
    fn parse_env_u64_with_bounds_falls_back_on_garbage() {
        assert_eq!(
            parse_env_u64_with_bounds(Some("abc".to_string()), 1, 10, 5),
            (5, false)
        );
        assert_eq!(parse_env_u64_with_bounds(None, 1, 10, 5), (5, false));
        assert_eq!(
            parse_env_u64_with_bounds(Some(" 7 ".to_string()), 1, 10, 5),
            (7, false)
        );
        assert_eq!(
            parse_env_u64_with_bounds(Some("70".to_string()), 1, 10, 5),
            (10, true)
        );
    }

    #[test]
    fn unknown_backend_falls_back_to_redis() {
        let config = config_from(&[("VISION_STORE_BACKEND", "memroy")]);
        assert_eq!(config.backend, StoreBackend::Redis);
        let config = config_from(&[("VISION_STORE_BACKEND", "  ")]);
        assert_eq!(config.backend, StoreBackend::Redis);
    }

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!(StoreBackend::from_name(" REDIS "), Some(StoreBackend::Redis));
        assert_eq!(StoreBackend::from_name("memory"), Some(StoreBackend::Memory));
        assert_eq!(StoreBackend::from_name("memroy"), None);
    }

    #[test]
    fn blank_redis_url_uses_default() {
        let config = config_from(&[("REDIS_URL", "  ")]);
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
    }
}
