//! A fine-grained push-pull reactivity engine: `Signal`, `Computed`,
//! `Effect` and `Watch` over an arena-indexed Dep/Link/Subscriber graph,
//! single-threaded by construction.
//!
//! Writes to a `Signal` bump a version counter and enqueue subscribers for
//! a batched drain; `Computed`s stay lazy and only recompute when actually
//! read, gated by a global version number for an O(1) "nothing changed
//! anywhere" fast path; `Effect`s re-run their body when a tracked
//! dependency's version no longer matches what was last observed.
//!
//! No unsafe code anywhere in this crate: the entire graph lives behind
//! slotmap-indexed arenas and `Rc`/`RefCell` handles, never raw pointers.
#![forbid(unsafe_code)]

mod batch;
mod bridge;
mod computed;
mod config;
mod diagnostics;
mod effect;
mod error;
mod graph;
mod runtime;
mod signal;
mod subscriber;
mod tracking;
mod version;
mod watch;

pub use batch::{batch, start_batch, end_batch, BatchGuard};
pub use bridge::{KeyedDepMap, OpType};
pub use computed::Computed;
pub use config::EngineConfig;
pub use diagnostics::{last_warning, AccessType, DebugPayload};
pub use effect::{on_effect_cleanup, Effect, EffectBuilder, Runner};
pub use error::ReactiveError;
pub use runtime::configure;
pub use signal::Signal;
pub use tracking::{enable_tracking, pause_tracking, reset_tracking, untracked};
pub use watch::{watch, Watch, WatchOptions};
