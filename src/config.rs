//! Runtime tuning, overridable from the environment (ambient config layer).
//!
//! Everything here has a sane built-in default; the environment variables
//! exist only for benchmarking and debugging the allocator/optimizer, never
//! for changing program semantics.

use std::env;

const GC_THRESHOLD_VAR: &str = "NSCHEME_GC_THRESHOLD";
const OPTIMIZER_PASSES_VAR: &str = "NSCHEME_OPTIMIZER_PASSES";

const DEFAULT_GC_THRESHOLD: usize = 1 << 10;
const DEFAULT_OPTIMIZER_PASSES: usize = 7;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Initial byte threshold before the allocator's first collection
    /// (spec §4.1).
    pub gc_initial_threshold: usize,
    /// Pass cap for the peephole optimizer (spec §4.4).
    pub optimizer_max_passes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gc_initial_threshold: DEFAULT_GC_THRESHOLD,
            optimizer_max_passes: DEFAULT_OPTIMIZER_PASSES,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.gc_initial_threshold = read_usize(GC_THRESHOLD_VAR, config.gc_initial_threshold);
        config.optimizer_max_passes = read_usize(OPTIMIZER_PASSES_VAR, config.optimizer_max_passes);
        config
    }
}

fn read_usize(var: &str, default: usize) -> usize {
    match env::var(var) {
        Ok(raw) => match raw.parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(var, raw, "ignoring unparsable override, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = Config::default();
        assert_eq!(config.gc_initial_threshold, 1 << 10);
        assert_eq!(config.optimizer_max_passes, 7);
    }
}
