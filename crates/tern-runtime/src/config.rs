//! Runtime configuration

use serde::{Deserialize, Serialize};
use tern_core::{parse_leading_int, round, PAGE_SIZE};

/// Smallest accepted stack, system or task.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Largest accepted stack.
pub const MAX_STACK_SIZE: usize = tern_primitives::region::MAX_STACK_SIZE;

const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Configuration errors
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} of {size} bytes is below the minimum of {min}", min = MIN_STACK_SIZE)]
    StackTooSmall { field: &'static str, size: usize },
    #[error("{field} of {size} bytes exceeds the maximum of {max}", max = MAX_STACK_SIZE)]
    StackTooLarge { field: &'static str, size: usize },
}

/// Sizes of the stacks the runtime allocates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bytes per worker system stack
    pub system_stack_size: usize,
    /// Bytes per task stack
    pub task_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            system_stack_size: DEFAULT_STACK_SIZE,
            task_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `TERN_SYSSTACK_KB` and `TERN_TASKSTACK_KB`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// Values are parsed like the runtime's other bootstrap settings: leading
    /// digits only, anything after them ignored. Zero or no digits keeps the
    /// default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kb = |name: &str| {
            let n = lookup(name).map_or(0, |v| parse_leading_int(v.as_bytes()));
            usize::try_from(n).ok().filter(|&n| n > 0)?.checked_mul(1024)
        };

        let mut config = Self::default();
        if let Some(size) = kb("TERN_SYSSTACK_KB") {
            config.system_stack_size = size;
        }
        if let Some(size) = kb("TERN_TASKSTACK_KB") {
            config.task_stack_size = size;
        }
        config.validated()
    }

    /// Round both sizes up to a page and check their bounds.
    pub fn validated(self) -> Result<Self, ConfigError> {
        Ok(Self {
            system_stack_size: check_stack("system_stack_size", self.system_stack_size)?,
            task_stack_size: check_stack("task_stack_size", self.task_stack_size)?,
        })
    }
}

fn check_stack(field: &'static str, size: usize) -> Result<usize, ConfigError> {
    if size < MIN_STACK_SIZE {
        return Err(ConfigError::StackTooSmall { field, size });
    }
    if size > MAX_STACK_SIZE {
        return Err(ConfigError::StackTooLarge { field, size });
    }
    Ok(round(size, PAGE_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.task_stack_size, 256 * 1024);
    }

    #[test]
    fn test_env_overrides_with_leading_digits() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("TERN_SYSSTACK_KB", "64k"),
            ("TERN_TASKSTACK_KB", "0"),
        ]))
        .unwrap();
        assert_eq!(config.system_stack_size, 64 * 1024);
        assert_eq!(config.task_stack_size, 256 * 1024);
    }

    #[test]
    fn test_validation_rounds_and_rejects() {
        let config = RuntimeConfig {
            system_stack_size: 20_000,
            task_stack_size: MIN_STACK_SIZE,
        }
        .validated()
        .unwrap();
        assert_eq!(config.system_stack_size, 20_480);

        assert_eq!(
            RuntimeConfig::from_lookup(lookup(&[("TERN_TASKSTACK_KB", "4")])),
            Err(ConfigError::StackTooSmall {
                field: "task_stack_size",
                size: 4096
            })
        );
    }

    #[test]
    fn test_serde_partial() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"task_stack_size":32768}"#).unwrap();
        assert_eq!(config.task_stack_size, 32768);
        assert_eq!(config.system_stack_size, 256 * 1024);
    }
}
