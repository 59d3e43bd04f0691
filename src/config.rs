//! Runtime limits and policies of the contract VM.
//!
//! [`VmConfig::default`] uses the built-in constants; [`VmConfig::from_env`]
//! lets a deployment override them:
//!
//! | Variable                     | Field              |
//! |------------------------------|--------------------|
//! | `LEDGER_COST_LIMIT`          | `cost_default`     |
//! | `LEDGER_MAX_CALL_DEPTH`      | `max_call_depth`   |
//! | `LEDGER_REJECT_NON_CALLABLE` | `non_callable`     |

use crate::warn;
use std::env;

/// Cost ceiling of a top-level invocation.
pub const COST_DEFAULT: i64 = 10_000_000;
/// Base cost of an interpreted function call.
pub const COST_CALL: i64 = 50;
/// Cost debited when a contract starts.
pub const COST_CONTRACT: i64 = 100;
/// Default cost of a native function call.
pub const COST_EXTEND: i64 = 10;
/// Maximum nesting of interpreted calls.
pub const MAX_CALL_DEPTH: usize = 256;

pub const COST_LIMIT_ENV: &str = "LEDGER_COST_LIMIT";
pub const MAX_CALL_DEPTH_ENV: &str = "LEDGER_MAX_CALL_DEPTH";
pub const REJECT_NON_CALLABLE_ENV: &str = "LEDGER_REJECT_NON_CALLABLE";

/// What to do when a registration entry is not a function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NonCallablePolicy {
    /// Log a warning and skip the entry.
    #[default]
    WarnAndSkip,
    /// Fail the registration.
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    pub cost_default: i64,
    pub cost_call: i64,
    pub cost_contract: i64,
    pub cost_extend: i64,
    pub max_call_depth: usize,
    pub non_callable: NonCallablePolicy,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            cost_default: COST_DEFAULT,
            cost_call: COST_CALL,
            cost_contract: COST_CONTRACT,
            cost_extend: COST_EXTEND,
            max_call_depth: MAX_CALL_DEPTH,
            non_callable: NonCallablePolicy::default(),
        }
    }
}

impl VmConfig {
    /// Defaults overridden by the `LEDGER_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = parsed::<i64>(&lookup, COST_LIMIT_ENV) {
            config.cost_default = v;
        }
        if let Some(v) = parsed::<usize>(&lookup, MAX_CALL_DEPTH_ENV) {
            config.max_call_depth = v;
        }
        if let Some(v) = lookup(REJECT_NON_CALLABLE_ENV) {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.non_callable = NonCallablePolicy::Reject,
                "0" | "false" | "no" | "" => {}
                other => warn!("ignoring {REJECT_NON_CALLABLE_ENV}={other}"),
            }
        }
        config
    }

    pub fn with_cost_limit(mut self, cost: i64) -> Self {
        self.cost_default = cost;
        self
    }

    pub fn with_non_callable(mut self, policy: NonCallablePolicy) -> Self {
        self.non_callable = policy;
        self
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {key}={raw}: not a number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_constants() {
        let config = VmConfig::default();
        assert_eq!(config.cost_default, 10_000_000);
        assert_eq!(config.cost_contract, COST_CONTRACT);
        assert_eq!(config.non_callable, NonCallablePolicy::WarnAndSkip);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = VmConfig::from_lookup(lookup(&[
            (COST_LIMIT_ENV, "500"),
            (MAX_CALL_DEPTH_ENV, "8"),
            (REJECT_NON_CALLABLE_ENV, "true"),
        ]));
        assert_eq!(config.cost_default, 500);
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.non_callable, NonCallablePolicy::Reject);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = VmConfig::from_lookup(lookup(&[(COST_LIMIT_ENV, "lots")]));
        assert_eq!(config.cost_default, COST_DEFAULT);
    }
}
