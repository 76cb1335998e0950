//! centralink - consolidate playlist files into one central repository
//!
//! Files found under a playlist folder are moved into a repository folder and replaced by
//! symbolic links to their new location. A revert pass walks the playlist folder again and
//! puts every linked file back.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod output;
pub mod preflight;
pub mod revert;
pub mod transition;

pub use config::{CollisionPolicy, Config, ConfigError, DiscoveryRules, OrderPolicy};
pub use discovery::{CandidateFile, discover};
pub use revert::{RevertOptions, RevertReport, revert};
pub use transition::{Transition, TransitionEngine, TransitionError, TransitionReport};

pub use cli::{Cli, RunOutcome, run_cli};
