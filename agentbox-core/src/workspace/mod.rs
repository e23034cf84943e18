//! Workspace boundary enforcement.
//!
//! Everything the sandbox touches must stay at or under a single workspace
//! root. [`WorkspacePathValidator`] is the one place that decides whether a
//! requested path is inside that boundary.

mod path_validator;

pub use path_validator::{PathValidation, WorkspacePathValidator, normalize_path};
