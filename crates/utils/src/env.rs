//! Process-scoped configuration, resolved from the environment at each use.
//!
//! Values are deliberately re-read on every call so that orchestrated
//! deployments can rotate identity without a restart.

use std::env;

pub const GIT_USER_ENV: &str = "GIT_USER";
pub const GIT_EMAIL_ENV: &str = "GIT_EMAIL";
pub const GIT_DEFAULT_BRANCH_ENV: &str = "GIT_DEFAULT_BRANCH";
pub const CONFIG_DIR_ENV: &str = "CONFIG_DIR";

pub const GIT_USER_DEFAULT: &str = "resource-service";
pub const GIT_EMAIL_DEFAULT: &str = "resource-service@localhost";
pub const GIT_DEFAULT_BRANCH_DEFAULT: &str = "main";
pub const CONFIG_DIR_DEFAULT: &str = "./data/config";

fn var_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

/// Committer/author user name for every commit produced by this service.
pub fn git_user() -> String {
    var_or(GIT_USER_ENV, GIT_USER_DEFAULT)
}

/// Committer/author email for every commit produced by this service.
pub fn git_email() -> String {
    var_or(GIT_EMAIL_ENV, GIT_EMAIL_DEFAULT)
}

/// Default branch name configured for freshly initialized upstreams.
pub fn default_branch() -> String {
    var_or(GIT_DEFAULT_BRANCH_ENV, GIT_DEFAULT_BRANCH_DEFAULT)
}

/// Base directory under which all project working trees live.
pub fn config_dir() -> String {
    var_or(CONFIG_DIR_ENV, CONFIG_DIR_DEFAULT)
}
