use std::time::Duration;

use vtt_kernel::Limits;

use crate::error::HostError;

/// Runtime knobs for the session host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Period of the durable sync timer. Ticks only write when the session changed.
    pub sync_interval: Duration,
    /// Bounded command queue in front of each session actor.
    pub mailbox_capacity: usize,
    /// Per-subscriber broadcast queue; a subscriber that falls this far behind is dropped.
    pub subscriber_queue: usize,
    /// Also deliver broadcasts to the writer's own subscriptions.
    pub echo_to_writer: bool,
    /// Reject a second concurrent submit instead of queueing it.
    pub reject_overlapping: bool,
    pub limits: Limits,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            mailbox_capacity: 64,
            subscriber_queue: 256,
            echo_to_writer: false,
            reject_overlapping: true,
            limits: Limits::default(),
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `VTT_*` environment variables.
    pub fn from_env() -> Result<Self, HostError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `VTT_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HostError> {
        let mut config = Self::default();
        if let Some(ms) = parse::<u64>(&lookup, "VTT_SYNC_INTERVAL_MS")? {
            config.sync_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = parse_nonzero(&lookup, "VTT_MAILBOX_CAPACITY")? {
            config.mailbox_capacity = n;
        }
        if let Some(n) = parse_nonzero(&lookup, "VTT_SUBSCRIBER_QUEUE")? {
            config.subscriber_queue = n;
        }
        if let Some(flag) = parse_bool(&lookup, "VTT_ECHO_TO_WRITER")? {
            config.echo_to_writer = flag;
        }
        if let Some(flag) = parse_bool(&lookup, "VTT_REJECT_OVERLAPPING")? {
            config.reject_overlapping = flag;
        }
        if let Some(n) = parse_nonzero(&lookup, "VTT_MAX_OPS")? {
            config.limits.max_ops = n;
        }
        if let Some(n) = parse_nonzero(&lookup, "VTT_MAX_PATH_DEPTH")? {
            config.limits.max_path_depth = n;
        }
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, HostError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HostError::Config { var, value: raw }),
    }
}

fn parse_nonzero(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<usize>, HostError> {
    match parse::<usize>(lookup, var)? {
        Some(0) => Err(HostError::Config {
            var,
            value: "0".into(),
        }),
        other => Ok(other),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, HostError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(HostError::Config { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_keeps_defaults() {
        let config = HostConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert!(config.reject_overlapping);
        assert!(!config.echo_to_writer);
        assert_eq!(config.limits, Limits::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = HostConfig::from_lookup(lookup(&[
            ("VTT_SYNC_INTERVAL_MS", "250"),
            ("VTT_SUBSCRIBER_QUEUE", "8"),
            ("VTT_ECHO_TO_WRITER", "true"),
            ("VTT_REJECT_OVERLAPPING", "off"),
            ("VTT_MAX_OPS", "16"),
        ]))
        .unwrap();
        assert_eq!(config.sync_interval, Duration::from_millis(250));
        assert_eq!(config.subscriber_queue, 8);
        assert!(config.echo_to_writer);
        assert!(!config.reject_overlapping);
        assert_eq!(config.limits.max_ops, 16);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = HostConfig::from_lookup(lookup(&[("VTT_MAILBOX_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, HostError::Config { var: "VTT_MAILBOX_CAPACITY", .. }));
        let err = HostConfig::from_lookup(lookup(&[("VTT_ECHO_TO_WRITER", "maybe")])).unwrap_err();
        assert!(matches!(err, HostError::Config { var: "VTT_ECHO_TO_WRITER", .. }));
    }
}
