//! Mapping from project names to on-disk locations.
//!
//! Every project owns a disjoint subtree of the base directory, so
//! operations on different projects never contend on the filesystem.

use std::path::{Path, PathBuf};

/// Directory under a project root into which structural migration relocates
/// former branch contents.
pub const STAGE_DIRECTORY_NAME: &str = "stages";

/// Per-project manifest file at the working-tree root.
pub const METADATA_FILE_NAME: &str = "metadata.yaml";

/// Prefix for the throwaway clone used during structural migration.
pub const TMP_PROJECT_PREFIX: &str = "_tmp_";

/// Resolves project names to working-tree locations under a base directory.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    base: PathBuf,
}

impl ProjectLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Working-tree directory of a project.
    pub fn repo_path(&self, project: &str) -> PathBuf {
        self.base.join(project)
    }

    /// The project manifest inside the working tree.
    pub fn metadata_path(&self, project: &str) -> PathBuf {
        self.repo_path(project).join(METADATA_FILE_NAME)
    }

    /// Root of the stage subtree populated by structural migration.
    pub fn stage_path(&self, project: &str, branch: &str) -> PathBuf {
        self.repo_path(project).join(STAGE_DIRECTORY_NAME).join(branch)
    }

    /// Name of the temporary companion project used while migrating.
    pub fn tmp_project_name(project: &str) -> String {
        format!("{TMP_PROJECT_PREFIX}{project}")
    }
}
