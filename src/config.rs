//! Per-module runtime options and their resolution.
//!
//! Every aggregate type and projection has a bag of [`Options`]. At spawn
//! time the runtime resolves each knob with the precedence
//! explicit argument > per-module config > runtime defaults > built-ins.
//! Adapter selection (which store, which bus) is not an option here; it is
//! the required input of [`RuntimeBuilder`](crate::RuntimeBuilder).

use std::collections::HashMap;
use std::time::Duration;

/// Built-in idle-shutdown timer: 15 minutes.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Built-in snapshot cadence: one snapshot every 100 events.
pub const DEFAULT_SNAPSHOT_EVERY: u64 = 100;

/// Idle-shutdown timer setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTimeout {
    /// Shut the instance down after this much inactivity.
    After(Duration),
    /// Never shut down on inactivity.
    Never,
}

impl ShutdownTimeout {
    /// The duration to arm the inactivity timer with.
    ///
    /// `Never` maps to an effectively infinite duration; `u64::MAX / 2`
    /// avoids overflow when tokio adds the timeout to the current instant.
    pub(crate) fn as_duration(self) -> Duration {
        match self {
            Self::After(d) => d,
            Self::Never => Duration::from_secs(u64::MAX / 2),
        }
    }
}

/// A bag of per-module option overrides. Unset knobs fall through to the
/// next precedence level.
#[derive(Debug, Clone, Default)]
pub struct Options {
    shutdown_timeout: Option<ShutdownTimeout>,
    snapshot_every: Option<u64>,
    snapshot_on_shutdown: Option<bool>,
}

impl Options {
    /// An empty bag: every knob falls through.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle-shutdown timer.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: ShutdownTimeout) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Set the number of events between snapshots. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn snapshot_every(mut self, every: u64) -> Self {
        self.snapshot_every = Some(every.max(1));
        self
    }

    /// Set whether an instance writes a final snapshot before idle shutdown.
    /// Off by default.
    #[must_use]
    pub fn snapshot_on_shutdown(mut self, enabled: bool) -> Self {
        self.snapshot_on_shutdown = Some(enabled);
        self
    }

    /// The idle-shutdown timer, if set at this level.
    #[must_use]
    pub fn get_shutdown_timeout(&self) -> Option<ShutdownTimeout> {
        self.shutdown_timeout
    }

    /// The snapshot cadence, if set at this level.
    #[must_use]
    pub fn get_snapshot_every(&self) -> Option<u64> {
        self.snapshot_every
    }

    /// The shutdown-snapshot flag, if set at this level.
    #[must_use]
    pub fn get_snapshot_on_shutdown(&self) -> Option<bool> {
        self.snapshot_on_shutdown
    }

    /// Overlay `self` on top of `base`: knobs set here win.
    fn over(&self, base: &Options) -> Options {
        Options {
            shutdown_timeout: self.shutdown_timeout.or(base.shutdown_timeout),
            snapshot_every: self.snapshot_every.or(base.snapshot_every),
            snapshot_on_shutdown: self.snapshot_on_shutdown.or(base.snapshot_on_shutdown),
        }
    }
}

/// Fully-resolved options for one module instance; no knob is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedOptions {
    pub shutdown_timeout: ShutdownTimeout,
    pub snapshot_every: u64,
    pub snapshot_on_shutdown: bool,
}

/// Runtime-wide configuration: defaults plus per-module overrides.
#[derive(Debug, Clone, Default)]
pub struct Config {
    defaults: Options,
    modules: HashMap<String, Options>,
}

impl Config {
    /// Replace the runtime-wide default options.
    pub fn set_defaults(&mut self, defaults: Options) {
        self.defaults = defaults;
    }

    /// Set the option overrides for one module (an aggregate type name or a
    /// projection name).
    pub fn set_module(&mut self, module: impl Into<String>, options: Options) {
        self.modules.insert(module.into(), options);
    }

    /// The merged option bag for `module`, with `explicit` taking top
    /// precedence. Used to seed projection `init` as well as actor spawns.
    pub(crate) fn merged(&self, module: &str, explicit: Option<&Options>) -> Options {
        let mut merged = match self.modules.get(module) {
            Some(module_opts) => module_opts.over(&self.defaults),
            None => self.defaults.clone(),
        };
        if let Some(explicit) = explicit {
            merged = explicit.over(&merged);
        }
        merged
    }

    /// Resolve every knob for `module`, filling the built-in defaults last.
    pub(crate) fn resolve(&self, module: &str, explicit: Option<&Options>) -> ResolvedOptions {
        let merged = self.merged(module, explicit);
        ResolvedOptions {
            shutdown_timeout: merged
                .shutdown_timeout
                .unwrap_or(ShutdownTimeout::After(DEFAULT_SHUTDOWN_TIMEOUT)),
            snapshot_every: merged.snapshot_every.unwrap_or(DEFAULT_SNAPSHOT_EVERY),
            snapshot_on_shutdown: merged.snapshot_on_shutdown.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_built_ins() {
        let config = Config::default();
        let resolved = config.resolve("counter", None);
        assert_eq!(
            resolved.shutdown_timeout,
            ShutdownTimeout::After(DEFAULT_SHUTDOWN_TIMEOUT)
        );
        assert_eq!(resolved.snapshot_every, DEFAULT_SNAPSHOT_EVERY);
        assert!(!resolved.snapshot_on_shutdown);
    }

    #[test]
    fn module_options_override_defaults() {
        let mut config = Config::default();
        config.set_defaults(Options::new().snapshot_every(50));
        config.set_module("counter", Options::new().snapshot_every(3));

        assert_eq!(config.resolve("counter", None).snapshot_every, 3);
        assert_eq!(config.resolve("cart", None).snapshot_every, 50);
    }

    #[test]
    fn explicit_argument_wins_over_module_config() {
        let mut config = Config::default();
        config.set_module("counter", Options::new().snapshot_every(3));

        let explicit = Options::new().snapshot_every(7);
        assert_eq!(
            config.resolve("counter", Some(&explicit)).snapshot_every,
            7
        );
    }

    #[test]
    fn unset_explicit_knobs_fall_through() {
        let mut config = Config::default();
        config.set_module(
            "counter",
            Options::new()
                .snapshot_every(3)
                .shutdown_timeout(ShutdownTimeout::Never),
        );

        // Explicit bag only sets snapshot_on_shutdown; the rest comes from
        // the module level.
        let explicit = Options::new().snapshot_on_shutdown(true);
        let resolved = config.resolve("counter", Some(&explicit));
        assert_eq!(resolved.snapshot_every, 3);
        assert_eq!(resolved.shutdown_timeout, ShutdownTimeout::Never);
        assert!(resolved.snapshot_on_shutdown);
    }

    #[test]
    fn getters_expose_set_knobs_only() {
        let opts = Options::new().snapshot_every(5);
        assert_eq!(opts.get_snapshot_every(), Some(5));
        assert_eq!(opts.get_shutdown_timeout(), None);
        assert_eq!(opts.get_snapshot_on_shutdown(), None);
    }

    #[test]
    fn snapshot_every_is_clamped_to_one() {
        let mut config = Config::default();
        config.set_module("counter", Options::new().snapshot_every(0));
        assert_eq!(config.resolve("counter", None).snapshot_every, 1);
    }

    #[test]
    fn never_maps_to_effectively_infinite_duration() {
        let timer = ShutdownTimeout::Never.as_duration();
        assert!(timer > Duration::from_secs(60 * 60 * 24 * 365));
    }
}
