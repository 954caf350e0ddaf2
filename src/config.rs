use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

/// Raw on-disk shape of `orchestrator.json`.
///
/// Every field is optional; missing fields fall back to the defaults the
/// reference deployment used (3 concurrent actions, 5-10 minute pacing,
/// 60 second keep-alive period, cohorts of 3).
#[derive(Debug, Default, Deserialize)]
pub struct OrchestratorJson {
    #[serde(default)]
    pub sessions_dir: Option<String>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub min_delay_secs: Option<u64>,
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
    #[serde(default)]
    pub keepalive_period_secs: Option<u64>,
    #[serde(default)]
    pub min_flow_size: Option<usize>,
    #[serde(default)]
    pub flow_group_size: Option<usize>,
}

/// Validated runtime settings for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Directory holding authentication artifact files.
    pub sessions_dir: PathBuf,
    /// Cap on actions in flight for a single batch call.
    pub max_concurrency: usize,
    /// Lower bound of the inter-action pacing interval.
    pub min_delay: Duration,
    /// Upper bound of the inter-action pacing interval (used when randomized).
    pub max_delay: Duration,
    /// Wake-up period of the keep-alive loop while inside the activity window.
    pub keepalive_period: Duration,
    /// Minimum cohort size accepted by explicit flow creation.
    pub min_flow_size: usize,
    /// Cohort size used by automatic partitioning.
    pub flow_group_size: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("sessions"),
            max_concurrency: 3,
            min_delay: Duration::from_secs(5 * 60),
            max_delay: Duration::from_secs(10 * 60),
            keepalive_period: Duration::from_secs(60),
            min_flow_size: 3,
            flow_group_size: 3,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_json(raw: OrchestratorJson) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            sessions_dir: raw
                .sessions_dir
                .map(|p| PathBuf::from(expand_env_vars(&p)))
                .unwrap_or(defaults.sessions_dir),
            max_concurrency: raw.max_concurrency.unwrap_or(defaults.max_concurrency),
            min_delay: raw
                .min_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.min_delay),
            max_delay: raw
                .max_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_delay),
            keepalive_period: raw
                .keepalive_period_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.keepalive_period),
            min_flow_size: raw.min_flow_size.unwrap_or(defaults.min_flow_size),
            flow_group_size: raw.flow_group_size.unwrap_or(defaults.flow_group_size),
        };

        if settings.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }
        if settings.min_delay > settings.max_delay {
            anyhow::bail!(
                "min_delay_secs ({}s) must not exceed max_delay_secs ({}s)",
                settings.min_delay.as_secs(),
                settings.max_delay.as_secs()
            );
        }
        if settings.keepalive_period.is_zero() {
            anyhow::bail!("keepalive_period_secs must be at least 1");
        }
        if settings.flow_group_size == 0 {
            anyhow::bail!("flow_group_size must be at least 1");
        }

        Ok(settings)
    }
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("ORCHESTRATOR_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg)
            .join("cohort-orchestrator")
            .join("orchestrator.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("orchestrator.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

/// Load settings from the resolved config file, or defaults when no file
/// exists. A file that exists but fails to parse or validate is a hard
/// error: configuration problems are only ever surfaced at startup.
pub fn load_settings() -> anyhow::Result<OrchestratorSettings> {
    match resolve_config_path() {
        Some(path) => {
            let raw = fs::read_to_string(&path)?;
            let parsed: OrchestratorJson = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
            OrchestratorSettings::from_json(parsed)
        }
        None => Ok(OrchestratorSettings::default()),
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            while let Some(c) = chars.next() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behavior() {
        let s = OrchestratorSettings::default();
        assert_eq!(s.max_concurrency, 3);
        assert_eq!(s.min_flow_size, 3);
        assert_eq!(s.keepalive_period, Duration::from_secs(60));
    }

    #[test]
    fn from_json_rejects_inverted_delays() {
        let raw = OrchestratorJson {
            min_delay_secs: Some(600),
            max_delay_secs: Some(300),
            ..Default::default()
        };
        assert!(OrchestratorSettings::from_json(raw).is_err());
    }

    #[test]
    fn from_json_rejects_zero_concurrency() {
        let raw = OrchestratorJson {
            max_concurrency: Some(0),
            ..Default::default()
        };
        assert!(OrchestratorSettings::from_json(raw).is_err());
    }

    #[test]
    fn expand_env_vars_keeps_unknown_placeholders() {
        let out = expand_env_vars("${DEFINITELY_NOT_SET_12345}/sessions");
        assert_eq!(out, "${DEFINITELY_NOT_SET_12345}/sessions");
    }
}
