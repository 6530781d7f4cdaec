//! # Changelog registry
//!
//! Keeps track of projects, the numbered builds of each project, and the
//! artifact file uploaded with every build.
//!
//! The registry is a single JSON document (by default
//! `<root>/config/downloads.json`); artifacts are stored by an
//! [`artifact_store::ArtifactStore`], normally below `<root>/downloads`.
//! Every front end (the HTTP API in [`api`], the `changelog-manager` command
//! line tool) goes through [`RegistryService`], which serializes writers per
//! project, also across processes, and replaces the document atomically.
//!
//! ## Example
//!
//! ```no_run
//! use changelog::{CommitInput, RegistryBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new("/srv/downloads").build();
//!
//! let mut artifact: &[u8] = b"jar contents";
//! let changelog = registry
//!     .add_changelog(
//!         "LobbySystem",
//!         vec![CommitInput::new("a1b2c3d", "Fix lobby teleport")],
//!         "LobbySystem.jar",
//!         &mut artifact,
//!     )
//!     .await?;
//! assert_eq!(changelog.build_number, 1);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod api;
pub mod commit;
mod config;
mod error;
pub mod lock;
pub mod model;
mod service;
pub mod store;

pub use commit::CommitInput;
pub use config::{
    DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_REGISTRY_PATH, LOCK_DIR,
    RegistryBuilder, RegistryConfig,
};
pub use error::{RegistryError, RegistryResult};
pub use model::{Changelog, Commit, Project, Registry, Timestamp};
pub use service::{
    CleanupWarning, NewVersion, RegistryService, RemovedChangelog, RemovedProject,
};
