//! Engine configuration: dev-mode diagnostics plus the backstop limits that
//! keep a misbehaving effect or batch nesting from running forever.

/// Tunables for one [`crate::runtime::Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Enables dev-only warnings (read-only writes, missing active effect in
    /// `on_effect_cleanup`, invariant violations) and `on_track`/`on_trigger`
    /// dev hooks. Defaults to `cfg!(debug_assertions)`.
    pub dev_mode: bool,
    /// Backstop against runaway `start_batch` nesting. Default 256.
    pub max_batch_depth: u32,
    /// Backstop against an `allow_recurse` effect that never stabilizes.
    /// Default 1000.
    pub max_effect_recursion: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dev_mode: cfg!(debug_assertions),
            max_batch_depth: 256,
            max_effect_recursion: 1000,
        }
    }
}
