//! Project repository manager for the resource service.
//!
//! Each project is materialized as a working tree cloned from its upstream.
//! This crate provides the primitive operations the service composes:
//! clone-or-init bootstrap, the atomic stage-commit-pull-push cycle, branch
//! lifecycle, revision read-back, hard reset, and the two migrations
//! (upstream transplant and branch-to-stage-directory folding).
//!
//! All operations on one project must be serialized by the caller; the
//! working tree is the shared mutable state and this crate assumes
//! exclusive access to it. Operations on different projects touch disjoint
//! subtrees and may run in parallel.

use std::{fs, path::Path};

use git2::{
    BranchType, ErrorCode, IndexAddOption, ObjectType, Oid, Repository, ResetType, Signature,
    build::{CheckoutBuilder, RepoBuilder},
};
use tracing::{debug, error, warn};
use utils::{
    env as service_env,
    path::{METADATA_FILE_NAME, ProjectLayout},
};

mod auth;
mod errors;

pub use auth::{
    AuthEnvelope, GitCredentials, HttpsCredentials, SshCredentials, auth_for, insecure_skip_tls,
};
pub use errors::{GitServiceError, translate};

const ORIGIN_REMOTE: &str = "origin";
const TMP_ORIGIN_REMOTE: &str = "tmp-origin";
const INIT_COMMIT_MESSAGE: &str = "init git empty repo";
const DEFAULT_COMMIT_MESSAGE: &str = "commit changes";
/// Mirror every upstream ref, allowing non-fast-forward updates to local.
const MIRROR_REFSPEC: &str = "+refs/*:refs/*";
/// Branch name libgit2 hardcodes into HEAD on plain init. An ambient
/// `init.defaultBranch` override makes the init-time rewrite a no-op.
const LIBGIT2_INIT_HEAD: &str = "master";

/// Committer/author identity, resolved from the environment at each use.
pub fn service_signature() -> Result<Signature<'static>, GitServiceError> {
    Signature::now(&service_env::git_user(), &service_env::git_email()).map_err(translate)
}

/// The unit of every operation: a project identifier plus the credentials
/// for its upstream. Caller-supplied and immutable for the duration of a
/// single operation.
#[derive(Debug, Clone)]
pub struct GitContext {
    pub project: String,
    pub credentials: Option<GitCredentials>,
}

impl GitContext {
    pub fn new(project: impl Into<String>, credentials: Option<GitCredentials>) -> Self {
        Self {
            project: project.into(),
            credentials,
        }
    }

    /// Auth envelope derived from the carried credentials.
    pub fn auth(&self) -> Result<AuthEnvelope, GitServiceError> {
        auth_for(self.credentials.as_ref())
    }
}

/// Service for managing project repositories under a base directory.
#[derive(Debug, Clone)]
pub struct GitService {
    layout: ProjectLayout,
}

impl GitService {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            layout: ProjectLayout::new(base_dir),
        }
    }

    /// Service rooted at the `CONFIG_DIR` environment directory.
    pub fn from_env() -> Self {
        Self::new(service_env::config_dir())
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// True when the project directory exists and opens as a repository.
    pub fn project_repo_exists(&self, project: &str) -> bool {
        let path = self.layout.repo_path(project);
        path.exists() && Repository::open(&path).is_ok()
    }

    /// True when the project is available locally. This probe is
    /// side-effecting: a project that is not present is cloned on the spot.
    /// Use [`GitService::project_repo_exists`] for a pure check.
    pub fn project_exists(&self, ctx: &GitContext) -> bool {
        if self.project_repo_exists(&ctx.project) {
            return true;
        }
        match self.clone_or_init(ctx) {
            Ok(existed) => existed,
            Err(err) => {
                error!(project = %ctx.project, %err, "could not check for project availability");
                false
            }
        }
    }

    /// Clone the project's upstream, or initialize and seed it when the
    /// upstream exists but is empty. Returns `true` when the project is on
    /// disk afterwards; a repository that is already present is left
    /// untouched with no network I/O.
    pub fn clone_or_init(&self, ctx: &GitContext) -> Result<bool, GitServiceError> {
        let credentials = match &ctx.credentials {
            None => {
                debug!(project = %ctx.project, "clone: credentials missing");
                return Err(GitServiceError::action(
                    "clone",
                    &ctx.project,
                    GitServiceError::MissingCredentials,
                ));
            }
            Some(credentials) if credentials.is_empty() => {
                return Err(GitServiceError::action(
                    "clone",
                    &ctx.project,
                    GitServiceError::InvalidGitContext,
                ));
            }
            Some(credentials) => credentials,
        };

        if self.project_repo_exists(&ctx.project) {
            return Ok(true);
        }

        let path = self.layout.repo_path(&ctx.project);
        fs::create_dir_all(&path).map_err(|source| GitServiceError::CouldNotCreatePath {
            path: path.clone(),
            source,
        })?;

        let envelope = auth_for(Some(credentials))?;
        let mut builder = RepoBuilder::new();
        builder.fetch_options(envelope.fetch_options());

        let repo = match builder.clone(&credentials.remote_url, &path) {
            Ok(repo) => {
                if repo.head().is_err() {
                    // libgit2 clones an empty upstream successfully and
                    // leaves an unborn HEAD; that outcome enters the same
                    // init subprotocol as a clone rejection would.
                    self.seed_empty_upstream(ctx, &repo)
                        .map_err(|e| GitServiceError::action("init", &ctx.project, e))?;
                }
                repo
            }
            Err(err) => {
                debug!(project = %ctx.project, %err, "could not clone project");
                match errors::classify(&err) {
                    Some(GitServiceError::EmptyRemoteRepository) => self
                        .init_repo(ctx, credentials, &path)
                        .map_err(|e| GitServiceError::action("init", &ctx.project, e))?,
                    _ => {
                        return Err(GitServiceError::action(
                            "clone",
                            &ctx.project,
                            translate(err),
                        ));
                    }
                }
            }
        };

        self.configure_user(&repo)?;

        let head_branch = {
            let head = repo
                .head()
                .map_err(|e| GitServiceError::action("clone", &ctx.project, translate(e)))?;
            head.shorthand().unwrap_or_default().to_string()
        };

        self.fetch_all(ctx, &repo)
            .map_err(|e| GitServiceError::action("fetch", &ctx.project, e))?;

        // Persist the branch observed at HEAD at clone time so later
        // queries get a stable answer independent of transient HEAD state.
        self.store_default_branch(&repo, &head_branch)
            .map_err(|e| GitServiceError::action("set config", &ctx.project, e))?;

        Ok(true)
    }

    /// Stage everything, commit, pull, push, and verify the remote absorbed
    /// the local advance. Any failure past the commit rolls the commit back
    /// (best effort). Returns the remote commit id as hex.
    pub fn stage_and_commit_all(
        &self,
        ctx: &GitContext,
        message: &str,
    ) -> Result<String, GitServiceError> {
        let commit_id = match self.commit_all(ctx, message) {
            Ok(id) => id,
            Err(err) => {
                debug!(project = %ctx.project, %err, "could not commit");
                // Discard whatever staging residue the failed commit left.
                match self.reset_hard(ctx, "HEAD~0") {
                    Ok(()) => warn!(project = %ctx.project, "untracked changes were removed"),
                    Err(reset_err) => {
                        warn!(project = %ctx.project, %reset_err, "could not reset after failed commit")
                    }
                }
                return Err(GitServiceError::commit(&ctx.project, err));
            }
        };
        debug!(project = %ctx.project, commit = %commit_id, "created local commit");

        let rollback = || match self.reset_hard(ctx, "HEAD~1") {
            Ok(()) => warn!(project = %ctx.project, "committed changes were removed"),
            Err(reset_err) => {
                warn!(project = %ctx.project, %reset_err, "could not roll back commit")
            }
        };

        if let Err(err) = self.pull(ctx) {
            debug!(project = %ctx.project, %err, "could not pull during commit cycle");
            rollback();
            return Err(err);
        }

        if let Err(err) = self.push(ctx) {
            debug!(project = %ctx.project, %err, "could not push during commit cycle");
            rollback();
            if matches!(err.root_cause(), GitServiceError::NonFastForward) {
                // The remote refused the advance; the caller must
                // intervene, there is no automatic force.
                return Err(GitServiceError::commit(
                    &ctx.project,
                    GitServiceError::ForceNeeded,
                ));
            }
            return Err(err);
        }

        let (remote_id, up_to_date) = self
            .current_remote_revision(ctx)
            .map_err(|e| GitServiceError::commit(&ctx.project, e))?;
        if !up_to_date {
            debug!(project = %ctx.project, "remote did not absorb the local advance");
            return Err(GitServiceError::commit(
                &ctx.project,
                GitServiceError::ForceNeeded,
            ));
        }

        Ok(remote_id)
    }

    /// Update the current branch from `origin`. Empty upstreams and
    /// already-up-to-date outcomes are success; an upstream that does not
    /// know the current branch yet falls back to its default branch.
    pub fn pull(&self, ctx: &GitContext) -> Result<(), GitServiceError> {
        if !self.project_exists(ctx) {
            debug!(project = %ctx.project, "pull: project does not exist");
            return Err(GitServiceError::action(
                "pull",
                &ctx.project,
                GitServiceError::ProjectNotFound,
            ));
        }

        let repo = self
            .acquire_repo(ctx)
            .map_err(|e| GitServiceError::action("pull", &ctx.project, e))?;

        let (branch, head_refname) = match repo.head() {
            Ok(head) => (
                head.shorthand().unwrap_or("HEAD").to_string(),
                head.name().unwrap_or("HEAD").to_string(),
            ),
            // Unborn HEAD: the upstream had no refs to clone, nothing to
            // pull.
            Err(err)
                if err.code() == ErrorCode::UnbornBranch
                    || err.code() == ErrorCode::NotFound =>
            {
                return Ok(());
            }
            Err(err) => {
                return Err(GitServiceError::action(
                    "pull",
                    &ctx.project,
                    translate(err),
                ));
            }
        };

        let envelope = ctx
            .auth()
            .map_err(|e| GitServiceError::action("pull", &ctx.project, e))?;
        {
            let mut remote = repo
                .find_remote(ORIGIN_REMOTE)
                .map_err(|e| GitServiceError::action("pull", &ctx.project, translate(e)))?;
            let mut opts = envelope.fetch_options();
            remote
                .fetch(&[] as &[&str], Some(&mut opts), None)
                .map_err(|e| GitServiceError::action("pull", &ctx.project, translate(e)))?;
        }

        let fetched = match repo.find_reference(&format!("refs/remotes/{ORIGIN_REMOTE}/{branch}"))
        {
            Ok(reference) => Some(reference),
            // Reference not there yet: retry against the upstream's default
            // branch, the way a pull without an explicit reference behaves.
            Err(_) => repo
                .find_reference(&format!("refs/remotes/{ORIGIN_REMOTE}/HEAD"))
                .ok(),
        };
        let Some(fetched) = fetched else {
            debug!(project = %ctx.project, %branch, "nothing to pull");
            return Ok(());
        };

        self.integrate_fetched(&repo, &head_refname, &fetched)
            .map_err(|e| GitServiceError::action("pull", &ctx.project, e))
    }

    /// Push the current branch to `origin`. An up-to-date remote is
    /// success.
    pub fn push(&self, ctx: &GitContext) -> Result<(), GitServiceError> {
        if ctx.credentials.is_none() {
            debug!(project = %ctx.project, "push: credentials missing");
            return Err(GitServiceError::action(
                "push",
                &ctx.project,
                GitServiceError::MissingCredentials,
            ));
        }

        let repo = self
            .acquire_repo(ctx)
            .map_err(|e| GitServiceError::action("push", &ctx.project, e))?;
        let envelope = ctx
            .auth()
            .map_err(|e| GitServiceError::action("push", &ctx.project, e))?;

        let head_refname = repo
            .head()
            .ok()
            .and_then(|head| head.name().map(str::to_string))
            .ok_or_else(|| {
                GitServiceError::action("push", &ctx.project, GitServiceError::ReferenceNotFound)
            })?;

        self.push_ref(&repo, ORIGIN_REMOTE, &head_refname, &envelope)
            .map_err(|e| GitServiceError::action("push", &ctx.project, e))
    }

    /// Create `branch` from `source_branch` and register its tracking
    /// configuration. Fails with `BranchExists` when the name is taken,
    /// without mutating the worktree.
    pub fn create_branch(
        &self,
        ctx: &GitContext,
        branch: &str,
        source_branch: &str,
    ) -> Result<(), GitServiceError> {
        let wrap = |source: GitServiceError| GitServiceError::CouldNotCreateBranch {
            branch: branch.to_string(),
            project: ctx.project.clone(),
            source: Box::new(source),
        };

        // Move HEAD to the source branch first.
        self.checkout_branch(ctx, source_branch)?;

        let repo = self.acquire_repo(ctx).map_err(&wrap)?;

        if repo.find_branch(branch, BranchType::Local).is_ok() {
            debug!(project = %ctx.project, %branch, "branch already exists");
            return Err(wrap(GitServiceError::BranchExists));
        }

        let head_commit = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(|e| wrap(translate(e)))?;
        repo.branch(branch, &head_commit, false)
            .map_err(|e| wrap(translate(e)))?;

        let refname = format!("refs/heads/{branch}");
        self.checkout_ref(&repo, &refname, false).map_err(&wrap)?;

        // Tracking configuration, so the branch knows its upstream before
        // the first push.
        let mut config = repo.config().map_err(|e| wrap(translate(e)))?;
        config
            .set_str(&format!("branch.{branch}.remote"), ORIGIN_REMOTE)
            .map_err(|e| wrap(translate(e)))?;
        config
            .set_str(&format!("branch.{branch}.merge"), &refname)
            .map_err(|e| wrap(translate(e)))?;

        Ok(())
    }

    /// Checkout a branch by short name or fully-qualified reference.
    pub fn checkout_branch(&self, ctx: &GitContext, branch: &str) -> Result<(), GitServiceError> {
        let wrap = |source: GitServiceError| GitServiceError::CouldNotCheckout {
            branch: branch.to_string(),
            source: Box::new(source),
        };

        let refname = if branch.starts_with("refs") {
            branch.to_string()
        } else {
            format!("refs/heads/{branch}")
        };

        if !self.project_exists(ctx) {
            return Err(wrap(GitServiceError::ProjectNotFound));
        }

        let repo = self.acquire_repo(ctx).map_err(&wrap)?;
        self.checkout_ref(&repo, &refname, true).map_err(&wrap)
    }

    /// The branch recorded at clone time, falling back to the branch at
    /// HEAD when local configuration carries none.
    pub fn get_default_branch(&self, ctx: &GitContext) -> Result<String, GitServiceError> {
        let wrap = |source: GitServiceError| GitServiceError::CouldNotGetDefaultBranch {
            project: ctx.project.clone(),
            source: Box::new(source),
        };

        let repo = self.acquire_repo(ctx).map_err(&wrap)?;
        let config = repo.config().map_err(|e| wrap(translate(e)))?;
        match config.get_string("init.defaultBranch") {
            Ok(branch) if !branch.is_empty() => Ok(branch),
            _ => {
                let head = repo.head().map_err(|e| wrap(translate(e)))?;
                Ok(head.shorthand().unwrap_or_default().to_string())
            }
        }
    }

    /// Hex id of the commit at HEAD.
    pub fn get_current_revision(&self, ctx: &GitContext) -> Result<String, GitServiceError> {
        let repo = self
            .acquire_repo(ctx)
            .map_err(|e| GitServiceError::revision(&ctx.project, e))?;
        let head = repo
            .head()
            .map_err(|e| GitServiceError::revision(&ctx.project, translate(e)))?;
        head.target().map(|oid| oid.to_string()).ok_or_else(|| {
            GitServiceError::revision(&ctx.project, GitServiceError::ReferenceNotFound)
        })
    }

    /// Read a file's bytes at a revision. A file missing from an otherwise
    /// valid revision is `ResourceNotFound`.
    pub fn get_file_revision(
        &self,
        ctx: &GitContext,
        revision: &str,
        file: &str,
    ) -> Result<Vec<u8>, GitServiceError> {
        let path = self.layout.repo_path(&ctx.project);
        let repo = Repository::open(&path)
            .map_err(|e| GitServiceError::action("open", &ctx.project, translate(e)))?;

        let object = repo
            .revparse_single(revision)
            .map_err(|e| GitServiceError::revision(&ctx.project, translate(e)))?;

        let blob = resolve_blob(&repo, object, file)
            .map_err(|e| GitServiceError::action("read", &ctx.project, e))?;
        Ok(blob.content().to_vec())
    }

    /// Hard-reset the working tree to a revision.
    pub fn reset_hard(&self, ctx: &GitContext, revision: &str) -> Result<(), GitServiceError> {
        let repo = self
            .acquire_repo(ctx)
            .map_err(|e| GitServiceError::action("reset", &ctx.project, e))?;
        let object = repo
            .revparse_single(revision)
            .map_err(|e| GitServiceError::action("reset", &ctx.project, translate(e)))?;
        repo.reset(&object, ResetType::Hard, None)
            .map_err(|e| GitServiceError::action("reset", &ctx.project, translate(e)))
    }

    /// Transplant the project's local repository to a new upstream,
    /// preserving every branch's history. A retry after a partial failure
    /// is safe: the stale temporary remote is removed up front.
    pub fn move_to_new_upstream(
        &self,
        current: &GitContext,
        new: &GitContext,
    ) -> Result<(), GitServiceError> {
        self.pull(current)?;

        let repo = self.acquire_repo(current)?;

        match repo.remote_delete(TMP_ORIGIN_REMOTE) {
            Ok(()) => {}
            Err(err) if err.code() == ErrorCode::NotFound => {}
            Err(err) => return Err(translate(err)),
        }

        let new_credentials = new
            .credentials
            .as_ref()
            .ok_or(GitServiceError::MissingCredentials)?;
        repo.remote(TMP_ORIGIN_REMOTE, &new_credentials.remote_url)
            .map_err(translate)?;

        self.fetch_all(current, &repo)
            .map_err(|e| GitServiceError::action("fetch", &current.project, e))?;

        let new_envelope = auth_for(Some(new_credentials))?;
        for branch in local_branch_names(&repo)? {
            let refname = format!("refs/heads/{branch}");
            self.checkout_ref(&repo, &refname, false)?;
            self.push_ref(&repo, TMP_ORIGIN_REMOTE, &refname, &new_envelope)
                .map_err(|e| GitServiceError::action("push", &new.project, e))?;
        }

        self.ensure_remote_matches(&repo, new)?;
        repo.remote_delete(TMP_ORIGIN_REMOTE).map_err(translate)?;

        Ok(())
    }

    /// Fold every non-default branch of a legacy layout into
    /// `stages/<branch>/` on the default branch, then commit and push the
    /// new shape together with the new project manifest. The temporary
    /// clone is removed on success and left on disk for inspection when
    /// the migration fails partway.
    pub fn migrate_project(
        &self,
        ctx: &GitContext,
        new_metadata: &[u8],
    ) -> Result<(), GitServiceError> {
        self.pull(ctx)?;

        let tmp_ctx = GitContext::new(
            ProjectLayout::tmp_project_name(&ctx.project),
            ctx.credentials.clone(),
        );
        let tmp_path = self.layout.repo_path(&tmp_ctx.project);

        let default_branch = self.get_default_branch(ctx)?;

        self.clone_or_init(&tmp_ctx)?;

        let tmp_repo = self.acquire_repo(&tmp_ctx)?;
        self.fetch_all(&tmp_ctx, &tmp_repo)
            .map_err(|e| GitServiceError::action("fetch", &tmp_ctx.project, e))?;

        for branch in local_branch_names(&tmp_repo)? {
            if branch != default_branch {
                let stage_path = self.layout.stage_path(&ctx.project, &branch);
                self.migrate_branch(&tmp_repo, &branch, &stage_path, &tmp_path)?;
            }
        }

        fs::write(self.layout.metadata_path(&ctx.project), new_metadata)?;

        self.stage_and_commit_all(ctx, "migrated project structure")?;

        fs::remove_dir_all(&tmp_path)?;

        Ok(())
    }

    /// Pull-based connectivity probe against the upstream.
    pub fn check_upstream_connection(&self, ctx: &GitContext) -> Result<(), GitServiceError> {
        self.pull(ctx)
    }

    // --- internals -------------------------------------------------------

    /// Open the project repository and reconcile `origin` with the
    /// context's credential URL. Every mutating operation funnels through
    /// here so a stale remote URL cannot persist.
    fn acquire_repo(&self, ctx: &GitContext) -> Result<Repository, GitServiceError> {
        let repo = Repository::open(self.layout.repo_path(&ctx.project)).map_err(translate)?;
        self.ensure_remote_matches(&repo, ctx)?;
        Ok(repo)
    }

    fn ensure_remote_matches(
        &self,
        repo: &Repository,
        ctx: &GitContext,
    ) -> Result<(), GitServiceError> {
        let credentials = ctx
            .credentials
            .as_ref()
            .ok_or(GitServiceError::InvalidGitContext)?;

        let matches = {
            let remote = repo.find_remote(ORIGIN_REMOTE).map_err(translate)?;
            remote.url() == Some(credentials.remote_url.as_str())
        };
        if !matches {
            // Delete and recreate rather than editing in place; remotes are
            // cached aggressively enough that in-place URL edits go stale.
            debug!(project = %ctx.project, url = %credentials.remote_url, "rewriting origin remote");
            repo.remote_delete(ORIGIN_REMOTE).map_err(translate)?;
            repo.remote(ORIGIN_REMOTE, &credentials.remote_url)
                .map_err(translate)?;
        }
        Ok(())
    }

    fn configure_user(&self, repo: &Repository) -> Result<(), GitServiceError> {
        let mut config = repo.config().map_err(translate)?;
        config
            .set_str("user.name", &service_env::git_user())
            .map_err(translate)?;
        config
            .set_str("user.email", &service_env::git_email())
            .map_err(translate)?;
        Ok(())
    }

    fn store_default_branch(&self, repo: &Repository, branch: &str) -> Result<(), GitServiceError> {
        let mut config = repo.config().map_err(translate)?;
        config
            .set_str("init.defaultBranch", branch)
            .map_err(translate)?;
        Ok(())
    }

    /// Mirror all upstream refs into the local repository.
    fn fetch_all(&self, ctx: &GitContext, repo: &Repository) -> Result<(), GitServiceError> {
        let envelope = ctx.auth()?;
        let mut remote = repo.find_remote(ORIGIN_REMOTE).map_err(translate)?;
        let mut opts = envelope.fetch_options();
        remote
            .fetch(&[MIRROR_REFSPEC], Some(&mut opts), None)
            .map_err(translate)?;
        Ok(())
    }

    /// Initialize a local repository against an empty upstream: plain init,
    /// `origin` created at the credential URL, and the seed commit pushed.
    fn init_repo(
        &self,
        ctx: &GitContext,
        credentials: &GitCredentials,
        path: &Path,
    ) -> Result<Repository, GitServiceError> {
        debug!(project = %ctx.project, "upstream is empty, initializing a local repository");
        let repo = Repository::init(path).map_err(translate)?;

        if repo.find_remote(ORIGIN_REMOTE).is_err() {
            repo.remote(ORIGIN_REMOTE, &credentials.remote_url)
                .map_err(translate)?;
        }

        self.seed_empty_upstream(ctx, &repo)?;
        Ok(repo)
    }

    /// The init subprotocol shared by both empty-upstream outcomes: align
    /// HEAD with the configured default branch, create the empty manifest,
    /// commit it and push, so the caller ends up holding a non-empty
    /// upstream.
    fn seed_empty_upstream(
        &self,
        ctx: &GitContext,
        repo: &Repository,
    ) -> Result<(), GitServiceError> {
        let path = self.layout.repo_path(&ctx.project);
        self.rewrite_initial_head(&path)?;

        fs::write(self.layout.metadata_path(&ctx.project), b"")?;

        let mut index = repo.index().map_err(translate)?;
        index
            .add_path(Path::new(METADATA_FILE_NAME))
            .map_err(translate)?;
        index.write().map_err(translate)?;
        let tree_id = index.write_tree().map_err(translate)?;
        let tree = repo.find_tree(tree_id).map_err(translate)?;

        let signature = service_signature()?;
        repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            INIT_COMMIT_MESSAGE,
            &tree,
            &[],
        )
        .map_err(translate)?;

        // The upstream must hold the seed commit before the bootstrap
        // continues; after init the caller expects a non-empty remote.
        self.push(ctx)?;
        Ok(())
    }

    /// Substitute the configured default branch for libgit2's hardcoded
    /// one in the HEAD file, byte-level, only when they differ.
    fn rewrite_initial_head(&self, project_path: &Path) -> Result<(), GitServiceError> {
        let default_branch = service_env::default_branch();
        if default_branch == LIBGIT2_INIT_HEAD {
            return Ok(());
        }

        debug!(branch = %default_branch, "setting initial HEAD to configured default branch");
        let head_file = project_path.join(".git").join("HEAD");
        let contents = fs::read_to_string(&head_file)?;
        fs::write(
            &head_file,
            contents.replace(LIBGIT2_INIT_HEAD, &default_branch),
        )?;
        Ok(())
    }

    /// Stage adds, modifications and deletions, then commit under the
    /// configured identity at the current time.
    fn commit_all(&self, ctx: &GitContext, message: &str) -> Result<Oid, GitServiceError> {
        let repo = self.acquire_repo(ctx)?;

        let mut index = repo.index().map_err(translate)?;
        index
            .add_all(["*"], IndexAddOption::DEFAULT, None)
            .map_err(translate)?;
        index.update_all(["*"], None).map_err(translate)?;
        index.write().map_err(translate)?;

        let tree_id = index.write_tree().map_err(translate)?;
        let tree = repo.find_tree(tree_id).map_err(translate)?;

        let message = if message.is_empty() {
            DEFAULT_COMMIT_MESSAGE
        } else {
            message
        };
        let signature = service_signature()?;

        let id = match repo.head().ok().and_then(|head| head.target()) {
            Some(parent_id) => {
                let parent = repo.find_commit(parent_id).map_err(translate)?;
                repo.commit(
                    Some("HEAD"),
                    &signature,
                    &signature,
                    message,
                    &tree,
                    &[&parent],
                )
                .map_err(translate)?
            }
            None => repo
                .commit(Some("HEAD"), &signature, &signature, message, &tree, &[])
                .map_err(translate)?,
        };
        Ok(id)
    }

    /// Resolve `origin/<current-branch>` and report whether the local HEAD
    /// is contained in it.
    fn current_remote_revision(&self, ctx: &GitContext) -> Result<(String, bool), GitServiceError> {
        let repo = self.acquire_repo(ctx)?;
        let head = repo.head().map_err(translate)?;
        let branch = head
            .shorthand()
            .ok_or(GitServiceError::ReferenceNotFound)?
            .to_string();
        let head_id = head.target().ok_or(GitServiceError::ReferenceNotFound)?;

        let remote_object = repo
            .revparse_single(&format!("{ORIGIN_REMOTE}/{branch}"))
            .map_err(translate)?;
        let remote_commit = remote_object.peel(ObjectType::Commit).map_err(translate)?;
        let remote_id = remote_commit.id();

        let up_to_date = remote_id == head_id
            || repo
                .graph_descendant_of(remote_id, head_id)
                .map_err(translate)?;
        Ok((remote_id.to_string(), up_to_date))
    }

    /// Bring the current branch up to the fetched remote state. Up-to-date
    /// is success, fast-forwards advance the ref with a forced checkout,
    /// and divergence surfaces `NonFastForward`; this layer never merges.
    fn integrate_fetched(
        &self,
        repo: &Repository,
        head_refname: &str,
        fetched: &git2::Reference<'_>,
    ) -> Result<(), GitServiceError> {
        let fetched = fetched.resolve().map_err(translate)?;
        let target = fetched.target().ok_or(GitServiceError::ReferenceNotFound)?;
        let annotated = repo.find_annotated_commit(target).map_err(translate)?;
        let (analysis, _) = repo.merge_analysis(&[&annotated]).map_err(translate)?;

        if analysis.is_up_to_date() {
            return Ok(());
        }
        if analysis.is_fast_forward() || analysis.is_unborn() {
            repo.reference(head_refname, target, true, "pull: fast-forward")
                .map_err(translate)?;
            repo.set_head(head_refname).map_err(translate)?;
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            repo.checkout_head(Some(&mut checkout)).map_err(translate)?;
            return Ok(());
        }

        Err(GitServiceError::NonFastForward)
    }

    fn checkout_ref(
        &self,
        repo: &Repository,
        refname: &str,
        force: bool,
    ) -> Result<(), GitServiceError> {
        // Surface a missing reference before moving HEAD.
        repo.find_reference(refname).map_err(translate)?;
        repo.set_head(refname).map_err(translate)?;

        let mut checkout = CheckoutBuilder::new();
        if force {
            checkout.force();
        }
        repo.checkout_head(Some(&mut checkout)).map_err(translate)
    }

    fn push_ref(
        &self,
        repo: &Repository,
        remote_name: &str,
        refname: &str,
        envelope: &AuthEnvelope,
    ) -> Result<(), GitServiceError> {
        let mut remote = repo.find_remote(remote_name).map_err(translate)?;
        let mut opts = envelope.push_options();
        let refspec = format!("{refname}:{refname}");
        remote
            .push(&[refspec.as_str()], Some(&mut opts))
            .map_err(translate)?;
        Ok(())
    }

    /// Relocate one branch's files into its stage directory under the
    /// project root, leaving the temporary tree clean for the next branch.
    fn migrate_branch(
        &self,
        tmp_repo: &Repository,
        branch: &str,
        stage_path: &Path,
        tmp_path: &Path,
    ) -> Result<(), GitServiceError> {
        self.checkout_ref(tmp_repo, &format!("refs/heads/{branch}"), true)?;

        fs::create_dir_all(stage_path).map_err(|source| GitServiceError::CouldNotCreatePath {
            path: stage_path.to_path_buf(),
            source,
        })?;

        for entry in fs::read_dir(tmp_path)? {
            let entry = entry?;
            if entry.file_name() == ".git" {
                continue;
            }
            fs::rename(entry.path(), stage_path.join(entry.file_name()))?;
        }

        let head = tmp_repo.revparse_single("HEAD").map_err(translate)?;
        tmp_repo
            .reset(&head, ResetType::Hard, None)
            .map_err(translate)?;
        Ok(())
    }
}

fn local_branch_names(repo: &Repository) -> Result<Vec<String>, GitServiceError> {
    let mut names = Vec::new();
    for entry in repo.branches(Some(BranchType::Local)).map_err(translate)? {
        let (branch, _) = entry.map_err(translate)?;
        if let Some(name) = branch.name().map_err(translate)? {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Recursive object resolution: commits and tags peel toward a tree, trees
/// look up the entry at `path`, blobs resolve to themselves.
fn resolve_blob<'r>(
    repo: &'r Repository,
    object: git2::Object<'r>,
    path: &str,
) -> Result<git2::Blob<'r>, GitServiceError> {
    match object.kind() {
        Some(ObjectType::Commit) => {
            let tree = object.peel(ObjectType::Tree).map_err(translate)?;
            resolve_blob(repo, tree, path)
        }
        Some(ObjectType::Tag) => {
            let tag = object
                .into_tag()
                .map_err(|_| GitServiceError::ResourceNotFound)?;
            let target = tag.target().map_err(translate)?;
            resolve_blob(repo, target, path)
        }
        Some(ObjectType::Tree) => {
            let tree = object
                .into_tree()
                .map_err(|_| GitServiceError::ResourceNotFound)?;
            let entry = tree.get_path(Path::new(path)).map_err(|err| {
                if err.code() == ErrorCode::NotFound {
                    GitServiceError::ResourceNotFound
                } else {
                    translate(err)
                }
            })?;
            let child = entry.to_object(repo).map_err(translate)?;
            resolve_blob(repo, child, path)
        }
        Some(ObjectType::Blob) => object
            .into_blob()
            .map_err(|_| GitServiceError::ResourceNotFound),
        _ => Err(GitServiceError::ResourceNotFound),
    }
}
