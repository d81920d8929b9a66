pub mod assets;
pub mod cache;
pub mod classify;
pub mod compose;
pub mod config;
pub mod error;
pub mod graph;
pub mod html;
pub mod minify;
pub mod parsing;
pub mod planner;
pub mod report;
pub mod resources;
pub mod site;
pub mod types;

pub use assets::{AssetTracker, ReferenceScanner, TrackedAssets};
pub use cache::{BuildCache, KeyValueStore, MemoryStore, PersistentStore};
pub use classify::{FileAction, FileClassifier};
pub use compose::{Composer, PageFailure, PageOutput};
pub use config::*;
pub use error::*;
pub use graph::DependencyGraph;
pub use parsing::*;
pub use planner::{Planner, RebuildPlan};
pub use report::IssueReport;
pub use resources::{FileStamp, FsResources, ResourceReader};
pub use site::*;
pub use types::*;
