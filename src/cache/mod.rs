//! Cache policy enforcement and invalidation.
//!
//! - **Drivers**: a uniform contract over cache backends (reverse proxy,
//!   in-memory store, filesystem) behind a shared wrapper that normalizes
//!   keys and runs the purge hooks.
//! - **Decision engine**: turns request facts and policy into a
//!   cache/no-cache verdict and the headers that express it.
//! - **Purge pipeline**: purges and full flushes through the active driver,
//!   with a per-actor record of what was flushed.
//!
//! ## Configuration
//!
//! The policy is a nested tree (see [`PolicyConfig`]) persisted through an
//! [`OptionStore`] and mirrored into a TOML snapshot:
//!
//! ```toml
//! enabled = true
//!
//! [config.general]
//! expire = 600
//! https_indifferent = true
//!
//! [config.options]
//! cookies = ["wordpress_logged_in", "session_.*"]
//! statuscode = [200, 404]
//! ```

mod decision;
mod driver;
pub mod drivers;
pub mod flush_queue;
mod form;
mod hooks;
mod keys;
mod lock;
mod middleware;
mod persist;
mod policy;
mod registry;
mod service;
mod snapshot;

pub use decision::{
    CacheDirective, Decision, DecisionEngine, HTTP_DATE_FORMAT, PatternList, RequestFacts,
    ResponseCycle, Verdict, http_date_after,
};
pub use driver::{
    CacheBackend, CacheDriver, DriverInfo, DriverKind, Existence, FlushOutcome, PurgeOutcome,
};
pub use flush_queue::{FlushLog, FlushQueue, FlushReport, Flushed, FlushedEntry, with_flush_log};
pub use form::{CommentForm, GeneralForm, ObjectForm, OptionsForm, PolicyForm, coerce_flags};
pub use hooks::{CacheHooks, EngineFilter, EtagBump, FlushAllListener, FlushDecision, KeyFilter};
pub use keys::{CacheKey, KeySet, key_set, normalize};
pub use middleware::{
    ACTOR_HEADER, Actor, CacheState, PageFacts, actor_from_headers, cache_headers_layer,
    track_flushes,
};
pub use persist::{ActorId, OptionStore, ScratchStore, StoreError};
pub use policy::{DEFAULT_EXPIRATION_SECS, PolicyConfig, PolicyStore, default_tree};
pub use registry::{DriverRegistry, DriverSummary};
pub use service::CacheManager;
pub use snapshot::{BootstrapSnapshot, SnapshotError, SnapshotWriter};
