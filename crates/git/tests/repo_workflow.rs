use std::{
    fs,
    path::{Path, PathBuf},
};

use git::{GitContext, GitCredentials, GitService, GitServiceError};
use git2::{Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

fn service(td: &TempDir) -> GitService {
    GitService::new(td.path().join("base"))
}

fn context(project: &str, remote: &Path) -> GitContext {
    GitContext::new(
        project,
        Some(GitCredentials::for_remote(remote.to_str().unwrap())),
    )
}

fn init_bare_remote(td: &TempDir, name: &str) -> PathBuf {
    let path = td.path().join(name);
    Repository::init_opts(
        &path,
        RepositoryInitOptions::new().bare(true).initial_head("main"),
    )
    .unwrap();
    path
}

fn write_file<P: AsRef<Path>>(base: P, rel: &str, content: &str) {
    let path = base.as_ref().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
}

fn raw_commit(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"], None).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("Seed User", "seed@example.com").unwrap();
    let parent = repo
        .head()
        .ok()
        .and_then(|h| h.target())
        .map(|oid| repo.find_commit(oid).unwrap());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

fn push_branch(repo: &Repository, branch: &str) {
    let mut remote = repo.find_remote("origin").unwrap();
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
    remote.push(&[refspec.as_str()], None).unwrap();
}

/// Build history in a scratch work tree and push `main` to the bare remote.
fn seed_remote(td: &TempDir, remote: &Path, files: &[(&str, &str)]) -> Oid {
    let name = remote.file_name().unwrap().to_str().unwrap();
    let work = td.path().join(format!("{name}-seed"));
    let repo =
        Repository::init_opts(&work, RepositoryInitOptions::new().initial_head("main")).unwrap();
    for (rel, content) in files {
        write_file(&work, rel, content);
    }
    let id = raw_commit(&repo, "seed");
    repo.remote("origin", remote.to_str().unwrap()).unwrap();
    push_branch(&repo, "main");
    id
}

fn local_head_branch(svc: &GitService, project: &str) -> String {
    let repo = Repository::open(svc.layout().repo_path(project)).unwrap();
    let head = repo.head().unwrap();
    head.shorthand().unwrap().to_string()
}

#[test]
fn fresh_clone_reads_default_branch_and_metadata() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);

    assert!(svc.clone_or_init(&ctx).unwrap());
    assert!(svc.layout().repo_path("demo").exists());
    assert_eq!(svc.get_default_branch(&ctx).unwrap(), "main");
    assert_eq!(
        svc.get_file_revision(&ctx, "HEAD", "metadata.yaml").unwrap(),
        b"k: v\n"
    );

    // Local HEAD matches the upstream tip.
    let bare = Repository::open(&remote).unwrap();
    let tip = bare.refname_to_id("refs/heads/main").unwrap();
    assert_eq!(svc.get_current_revision(&ctx).unwrap(), tip.to_string());
}

#[test]
fn clone_is_idempotent() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);

    assert!(svc.clone_or_init(&ctx).unwrap());
    assert!(svc.project_repo_exists("demo"));
    // Second call returns existed without touching the upstream.
    assert!(svc.clone_or_init(&ctx).unwrap());
}

#[test]
fn clone_without_credentials_fails() {
    let td = TempDir::new().unwrap();
    let svc = service(&td);

    let ctx = GitContext::new("demo", None);
    let err = svc.clone_or_init(&ctx).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        GitServiceError::MissingCredentials
    ));

    let empty = GitContext::new("demo", Some(GitCredentials::for_remote("")));
    let err = svc.clone_or_init(&empty).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        GitServiceError::InvalidGitContext
    ));
}

#[test]
fn empty_upstream_is_initialized_and_seeded() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "empty-remote");

    let svc = service(&td);
    let ctx = context("fresh", &remote);

    assert!(svc.clone_or_init(&ctx).unwrap());

    // Local HEAD sits on the recorded default branch.
    let default_branch = svc.get_default_branch(&ctx).unwrap();
    assert_eq!(local_head_branch(&svc, "fresh"), default_branch);

    // The upstream now holds exactly the seed commit.
    let bare = Repository::open(&remote).unwrap();
    let mut seeded = false;
    for entry in bare.references().unwrap() {
        let reference = entry.unwrap();
        if reference.is_branch() {
            let commit = reference.peel_to_commit().unwrap();
            assert_eq!(commit.message(), Some("init git empty repo"));
            assert_eq!(commit.parent_count(), 0);
            seeded = true;
        }
    }
    assert!(seeded);

    // The manifest exists and is empty.
    let metadata = fs::read(svc.layout().metadata_path("fresh")).unwrap();
    assert!(metadata.is_empty());
}

#[test]
fn commit_cycle_happy_path() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    write_file(svc.layout().repo_path("demo"), "x.txt", "hello");
    let id = svc.stage_and_commit_all(&ctx, "add x").unwrap();

    assert_eq!(svc.get_file_revision(&ctx, &id, "x.txt").unwrap(), b"hello");
    assert_eq!(svc.get_current_revision(&ctx).unwrap(), id);

    // The upstream branch absorbed the commit and carries the configured
    // author identity.
    let bare = Repository::open(&remote).unwrap();
    let tip = bare.refname_to_id("refs/heads/main").unwrap();
    assert_eq!(tip.to_string(), id);
    let commit = bare.find_commit(tip).unwrap();
    assert_eq!(
        commit.author().name(),
        Some(utils::env::git_user().as_str())
    );
    assert_eq!(
        commit.author().email(),
        Some(utils::env::git_email().as_str())
    );
}

#[test]
fn commit_cycle_defaults_empty_message() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    write_file(svc.layout().repo_path("demo"), "y.txt", "y\n");
    let id = svc.stage_and_commit_all(&ctx, "").unwrap();

    let bare = Repository::open(&remote).unwrap();
    let commit = bare.find_commit(Oid::from_str(&id).unwrap()).unwrap();
    assert_eq!(commit.message(), Some("commit changes"));
}

#[test]
fn diverged_commit_cycle_rolls_back() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    // A collaborator advances the upstream behind our back.
    let collaborator = GitService::new(td.path().join("base2"));
    collaborator.clone_or_init(&ctx).unwrap();
    write_file(
        collaborator.layout().repo_path("demo"),
        "remote.txt",
        "remote\n",
    );
    collaborator
        .stage_and_commit_all(&ctx, "remote change")
        .unwrap();

    let before = svc.get_current_revision(&ctx).unwrap();
    write_file(svc.layout().repo_path("demo"), "local.txt", "local\n");

    let err = svc.stage_and_commit_all(&ctx, "local change").unwrap_err();
    assert!(matches!(
        err.root_cause(),
        GitServiceError::NonFastForward
    ));

    // The compensating reset discarded the cycle's commit.
    assert_eq!(svc.get_current_revision(&ctx).unwrap(), before);
}

#[test]
fn commit_cycle_requires_force_when_remote_advances_mid_cycle() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    // Freeze the cycle's fetch view: with the tracking namespace pinned
    // elsewhere, the pull keeps seeing the pre-advance remote state, the
    // same way an upstream advancing between the pull and the push would.
    {
        let repo = Repository::open(svc.layout().repo_path("demo")).unwrap();
        let mut config = repo.config().unwrap();
        config
            .set_str("remote.origin.fetch", "+refs/heads/*:refs/stale/*")
            .unwrap();
    }

    // A collaborator advances the upstream behind our back.
    let collaborator = GitService::new(td.path().join("base2"));
    collaborator.clone_or_init(&ctx).unwrap();
    write_file(
        collaborator.layout().repo_path("demo"),
        "remote.txt",
        "remote\n",
    );
    collaborator
        .stage_and_commit_all(&ctx, "remote change")
        .unwrap();

    let before = svc.get_current_revision(&ctx).unwrap();
    write_file(svc.layout().repo_path("demo"), "local.txt", "local\n");

    // The pull succeeds against the stale view, so the divergence is
    // discovered when the upstream rejects the push; the caller must
    // intervene.
    let err = svc.stage_and_commit_all(&ctx, "local change").unwrap_err();
    assert!(matches!(err, GitServiceError::CouldNotCommit { .. }));
    assert!(matches!(err.root_cause(), GitServiceError::ForceNeeded));

    // The compensating reset discarded the cycle's commit.
    assert_eq!(svc.get_current_revision(&ctx).unwrap(), before);
}

#[test]
fn push_rejects_non_fast_forward() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    let collaborator = GitService::new(td.path().join("base2"));
    collaborator.clone_or_init(&ctx).unwrap();
    write_file(
        collaborator.layout().repo_path("demo"),
        "remote.txt",
        "remote\n",
    );
    collaborator
        .stage_and_commit_all(&ctx, "remote change")
        .unwrap();

    // Commit locally without pulling, then push the stale branch.
    let repo = Repository::open(svc.layout().repo_path("demo")).unwrap();
    write_file(svc.layout().repo_path("demo"), "local.txt", "local\n");
    raw_commit(&repo, "stale local change");

    let err = svc.push(&ctx).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        GitServiceError::NonFastForward
    ));
}

#[test]
fn push_without_credentials_fails() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    let bare_ctx = GitContext::new("demo", None);
    let err = svc.push(&bare_ctx).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        GitServiceError::MissingCredentials
    ));
}

#[test]
fn create_and_checkout_branch_round_trip() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    svc.create_branch(&ctx, "dev", "main").unwrap();
    svc.checkout_branch(&ctx, "dev").unwrap();
    assert_eq!(local_head_branch(&svc, "demo"), "dev");

    // The commit cycle creates the branch upstream.
    write_file(svc.layout().repo_path("demo"), "dev.txt", "dev\n");
    let id = svc.stage_and_commit_all(&ctx, "on dev").unwrap();
    let bare = Repository::open(&remote).unwrap();
    assert_eq!(
        bare.refname_to_id("refs/heads/dev").unwrap().to_string(),
        id
    );

    // Fully-qualified references check out too.
    svc.checkout_branch(&ctx, "refs/heads/main").unwrap();
    assert_eq!(local_head_branch(&svc, "demo"), "main");
}

#[test]
fn creating_existing_branch_fails() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    svc.create_branch(&ctx, "dev", "main").unwrap();
    let err = svc.create_branch(&ctx, "dev", "main").unwrap_err();
    assert!(matches!(err.root_cause(), GitServiceError::BranchExists));
    // HEAD is left where the source checkout put it.
    assert_eq!(local_head_branch(&svc, "demo"), "main");
}

#[test]
fn checkout_branch_on_missing_project_fails() {
    let td = TempDir::new().unwrap();
    let svc = service(&td);

    // Never cloned, and the upstream is not cloneable either, so the
    // on-demand probe cannot materialize the project.
    let ctx = context("ghost", &td.path().join("no-such-remote"));

    let err = svc.checkout_branch(&ctx, "main").unwrap_err();
    assert!(matches!(err, GitServiceError::CouldNotCheckout { .. }));
    assert!(matches!(
        err.root_cause(),
        GitServiceError::ProjectNotFound
    ));
}

#[test]
fn checkout_unknown_branch_is_reference_not_found() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    let err = svc.checkout_branch(&ctx, "nope").unwrap_err();
    assert!(matches!(err, GitServiceError::CouldNotCheckout { .. }));
    assert!(matches!(
        err.root_cause(),
        GitServiceError::ReferenceNotFound
    ));
}

#[test]
fn missing_file_is_distinct_from_invalid_revision() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    let missing_file = svc
        .get_file_revision(&ctx, "HEAD", "nope.yaml")
        .unwrap_err();
    assert!(matches!(
        missing_file.root_cause(),
        GitServiceError::ResourceNotFound
    ));

    let bad_revision = svc
        .get_file_revision(&ctx, "deadbeef", "metadata.yaml")
        .unwrap_err();
    assert!(matches!(
        bad_revision,
        GitServiceError::CouldNotGetRevision { .. }
    ));
}

#[test]
fn reset_hard_discards_latest_commit() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    let first = svc.get_current_revision(&ctx).unwrap();
    write_file(svc.layout().repo_path("demo"), "z.txt", "z\n");
    svc.stage_and_commit_all(&ctx, "add z").unwrap();

    svc.reset_hard(&ctx, "HEAD~1").unwrap();
    assert_eq!(svc.get_current_revision(&ctx).unwrap(), first);
    assert!(!svc.layout().repo_path("demo").join("z.txt").exists());
}

#[test]
fn stale_origin_url_is_reconciled_on_acquire() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    {
        let repo = Repository::open(svc.layout().repo_path("demo")).unwrap();
        repo.remote_set_url("origin", "/bogus/somewhere-else").unwrap();
    }

    // Any acquisition funnels through the reconciler.
    svc.get_current_revision(&ctx).unwrap();

    let repo = Repository::open(svc.layout().repo_path("demo")).unwrap();
    assert_eq!(
        repo.find_remote("origin").unwrap().url(),
        remote.to_str()
    );
}

#[test]
fn pull_is_a_no_op_when_up_to_date() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    let before = svc.get_current_revision(&ctx).unwrap();
    svc.pull(&ctx).unwrap();
    assert_eq!(svc.get_current_revision(&ctx).unwrap(), before);
}

#[test]
fn pull_fast_forwards_to_remote_state() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    let collaborator = GitService::new(td.path().join("base2"));
    collaborator.clone_or_init(&ctx).unwrap();
    write_file(
        collaborator.layout().repo_path("demo"),
        "new.txt",
        "new\n",
    );
    let id = collaborator
        .stage_and_commit_all(&ctx, "remote change")
        .unwrap();

    svc.pull(&ctx).unwrap();
    assert_eq!(svc.get_current_revision(&ctx).unwrap(), id);
    assert!(svc.layout().repo_path("demo").join("new.txt").exists());
}

#[test]
fn check_upstream_connection_succeeds_locally() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);
    svc.clone_or_init(&ctx).unwrap();

    svc.check_upstream_connection(&ctx).unwrap();
}

#[test]
fn project_exists_probe_clones_on_demand() {
    let td = TempDir::new().unwrap();
    let remote = init_bare_remote(&td, "remote");
    seed_remote(&td, &remote, &[("metadata.yaml", "k: v\n")]);

    let svc = service(&td);
    let ctx = context("demo", &remote);

    assert!(!svc.project_repo_exists("demo"));
    assert!(svc.project_exists(&ctx));
    assert!(svc.project_repo_exists("demo"));
}
