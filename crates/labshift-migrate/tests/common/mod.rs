//! In-memory GitLab and git doubles with failure injection.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use labshift_migrate::{
    Clock, ExportArchive, ExportToken, GitLabApi, Group, HostConfig, ImportTicket, ImportToken,
    Issue, IssueRef, IssueScope, MigrationConfig, MigrationError, MirrorClone, Note, PollStatus,
    Project, PushReport, RepositoryFile, RepositoryMirror, Result, TransferError,
};
use labshift_migrate::mirror::RefUpdate;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Fake GitLab instance
// ============================================================================

#[derive(Default)]
struct State {
    next_id: u64,
    groups: Vec<Group>,
    projects: Vec<Project>,
    issues: HashMap<u64, Vec<Issue>>,
    notes: HashMap<IssueRef, Vec<Note>>,
    files: HashMap<(u64, String), String>,
    commits: Vec<(u64, String, String, String)>,
    export_script: VecDeque<Result<PollStatus>>,
    import_script: VecDeque<Result<PollStatus>>,
    import_issues: Vec<(u64, String, String, Option<String>)>,
    raced_paths: HashSet<String>,
    forbidden_paths: HashSet<String>,
    failing_closes: HashSet<u64>,
    closed: Vec<IssueRef>,
    comments: Vec<(IssueRef, String)>,
}

/// A GitLab instance held in memory.
pub struct FakeGitLab {
    base_url: String,
    state: Mutex<State>,
    pub group_creates: AtomicUsize,
    pub project_creates: AtomicUsize,
    pub export_polls: AtomicUsize,
    pub import_polls: AtomicUsize,
    pub imports: AtomicUsize,
    pub destination_writes: AtomicUsize,
}

impl FakeGitLab {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            state: Mutex::new(State {
                next_id: 100,
                ..Default::default()
            }),
            group_creates: AtomicUsize::new(0),
            project_creates: AtomicUsize::new(0),
            export_polls: AtomicUsize::new(0),
            import_polls: AtomicUsize::new(0),
            imports: AtomicUsize::new(0),
            destination_writes: AtomicUsize::new(0),
        }
    }

    fn project_value(&self, id: u64, path: &str) -> Project {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Project {
            id,
            name,
            path_with_namespace: path.to_string(),
            http_url_to_repo: format!("{}/{path}.git", self.base_url),
            default_branch: Some("main".to_string()),
            web_url: Some(format!("{}/{path}", self.base_url)),
        }
    }

    /// Seed a group and all its ancestors.
    pub fn add_group(&self, full_path: &str) -> Group {
        let mut state = self.state.lock();
        let mut current: Option<Group> = None;
        for segment in full_path.split('/') {
            let path = match &current {
                Some(parent) => format!("{}/{segment}", parent.full_path),
                None => segment.to_string(),
            };
            let existing = state.groups.iter().find(|g| g.full_path == path).cloned();
            let group = match existing {
                Some(group) => group,
                None => {
                    state.next_id += 1;
                    let group = Group {
                        id: state.next_id,
                        name: segment.to_string(),
                        full_path: path,
                    };
                    state.groups.push(group.clone());
                    group
                }
            };
            current = Some(group);
        }
        current.expect("non-empty group path")
    }

    /// Seed a project and its groups.
    pub fn add_project(&self, full_path: &str) -> Project {
        if let Some((namespace, _)) = full_path.rsplit_once('/') {
            self.add_group(namespace);
        }
        let mut state = self.state.lock();
        state.next_id += 1;
        let project = self.project_value(state.next_id, full_path);
        state.projects.push(project.clone());
        project
    }

    /// Seed an issue.
    pub fn add_issue(
        &self,
        project: &Project,
        iid: u64,
        title: &str,
        state_name: &str,
        created_at: Option<&str>,
    ) -> Issue {
        let mut state = self.state.lock();
        state.next_id += 1;
        let issue = Issue {
            id: state.next_id,
            iid,
            project_id: project.id,
            title: title.to_string(),
            state: state_name.to_string(),
            created_at: created_at.map(str::to_string),
            web_url: Some(format!(
                "{}/{}/-/issues/{iid}",
                self.base_url, project.path_with_namespace
            )),
        };
        state.issues.entry(project.id).or_default().push(issue.clone());
        issue
    }

    /// Issues created on every imported project: `(iid, title, state, created_at)`.
    pub fn on_import_create_issue(
        &self,
        iid: u64,
        title: &str,
        state_name: &str,
        created_at: Option<&str>,
    ) {
        self.state.lock().import_issues.push((
            iid,
            title.to_string(),
            state_name.to_string(),
            created_at.map(str::to_string),
        ));
    }

    /// Seed a plain-text repository file.
    pub fn set_file(&self, project: &Project, path: &str, content: &str) {
        self.state
            .lock()
            .files
            .insert((project.id, path.to_string()), content.to_string());
    }

    pub fn file(&self, project_id: u64, path: &str) -> Option<String> {
        self.state.lock().files.get(&(project_id, path.to_string())).cloned()
    }

    pub fn commits(&self) -> Vec<(u64, String, String, String)> {
        self.state.lock().commits.clone()
    }

    pub fn script_export(&self, script: Vec<Result<PollStatus>>) {
        self.state.lock().export_script = script.into();
    }

    pub fn script_import(&self, script: Vec<Result<PollStatus>>) {
        self.state.lock().import_script = script.into();
    }

    /// Simulate a concurrent actor creating `full_path` right before our create.
    pub fn race_on(&self, full_path: &str) {
        self.state.lock().raced_paths.insert(full_path.to_string());
    }

    /// Make creating `full_path` fail with 403.
    pub fn forbid(&self, full_path: &str) {
        self.state.lock().forbidden_paths.insert(full_path.to_string());
    }

    /// Make closing issue `iid` fail with 500.
    pub fn fail_close(&self, iid: u64) {
        self.state.lock().failing_closes.insert(iid);
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn project_count(&self) -> usize {
        self.state.lock().projects.len()
    }

    pub fn project_by_path(&self, path: &str) -> Option<Project> {
        self.state
            .lock()
            .projects
            .iter()
            .find(|p| p.path_with_namespace == path)
            .cloned()
    }

    pub fn issue(&self, project_id: u64, iid: u64) -> Option<Issue> {
        self.state
            .lock()
            .issues
            .get(&project_id)
            .and_then(|issues| issues.iter().find(|i| i.iid == iid).cloned())
    }

    pub fn comments(&self) -> Vec<(IssueRef, String)> {
        self.state.lock().comments.clone()
    }

    pub fn closed(&self) -> Vec<IssueRef> {
        self.state.lock().closed.clone()
    }

    fn create_entity_check(&self, state: &mut State, full_path: &str, kind: &str) -> Result<bool> {
        if state.forbidden_paths.contains(full_path) {
            return Err(MigrationError::api(
                403,
                "POST",
                kind,
                r#"{"message":"403 Forbidden"}"#,
            ));
        }
        Ok(state.raced_paths.remove(full_path))
    }
}

fn taken(kind: &str) -> MigrationError {
    MigrationError::api(
        400,
        "POST",
        kind,
        r#"{"message":{"path":["has already been taken"]}}"#,
    )
}

#[async_trait]
impl GitLabApi for FakeGitLab {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn find_group(&self, full_path: &str) -> Result<Option<Group>> {
        Ok(self
            .state
            .lock()
            .groups
            .iter()
            .find(|g| g.full_path == full_path)
            .cloned())
    }

    async fn create_group(&self, parent_id: Option<u64>, name: &str) -> Result<Group> {
        self.destination_writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let full_path = match parent_id {
            Some(id) => {
                let parent = state
                    .groups
                    .iter()
                    .find(|g| g.id == id)
                    .cloned()
                    .ok_or_else(|| {
                        MigrationError::api(404, "POST", "/groups", "parent not found")
                    })?;
                format!("{}/{name}", parent.full_path)
            }
            None => name.to_string(),
        };

        if self.create_entity_check(&mut state, &full_path, "/groups")? {
            state.next_id += 1;
            let group = Group {
                id: state.next_id,
                name: name.to_string(),
                full_path,
            };
            state.groups.push(group);
            return Err(taken("/groups"));
        }
        if state.groups.iter().any(|g| g.full_path == full_path) {
            return Err(taken("/groups"));
        }

        self.group_creates.fetch_add(1, Ordering::SeqCst);
        state.next_id += 1;
        let group = Group {
            id: state.next_id,
            name: name.to_string(),
            full_path,
        };
        state.groups.push(group.clone());
        Ok(group)
    }

    async fn find_project(&self, full_path: &str) -> Result<Option<Project>> {
        Ok(self.project_by_path(full_path))
    }

    async fn get_project(&self, id: u64) -> Result<Option<Project>> {
        Ok(self.state.lock().projects.iter().find(|p| p.id == id).cloned())
    }

    async fn create_project(&self, group_id: u64, name: &str) -> Result<Project> {
        self.destination_writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let group = state
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
            .ok_or_else(|| MigrationError::api(404, "POST", "/projects", "namespace not found"))?;
        let full_path = format!("{}/{name}", group.full_path);

        if self.create_entity_check(&mut state, &full_path, "/projects")? {
            state.next_id += 1;
            let project = self.project_value(state.next_id, &full_path);
            state.projects.push(project);
            return Err(taken("/projects"));
        }
        if state.projects.iter().any(|p| p.path_with_namespace == full_path) {
            return Err(taken("/projects"));
        }

        self.project_creates.fetch_add(1, Ordering::SeqCst);
        state.next_id += 1;
        let project = self.project_value(state.next_id, &full_path);
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn request_export(&self, project_id: u64) -> Result<ExportToken> {
        Ok(ExportToken(project_id))
    }

    async fn poll_export(&self, _token: &ExportToken) -> Result<PollStatus> {
        self.export_polls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .export_script
            .pop_front()
            .unwrap_or(Ok(PollStatus::Finished))
    }

    async fn download_export(&self, _token: &ExportToken) -> Result<ExportArchive> {
        ExportArchive::from_bytes(b"fake export bundle")
    }

    async fn request_import(
        &self,
        namespace: &str,
        name: &str,
        archive: &ExportArchive,
    ) -> Result<ImportTicket> {
        assert!(archive.path().exists(), "archive must still exist while importing");
        self.imports.fetch_add(1, Ordering::SeqCst);
        self.destination_writes.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        if !state.groups.iter().any(|g| g.full_path == namespace) {
            return Err(MigrationError::api(
                404,
                "POST",
                "/projects/import",
                "namespace not found",
            ));
        }
        let full_path = format!("{namespace}/{name}");
        state.next_id += 1;
        let project = self.project_value(state.next_id, &full_path);
        state.projects.push(project.clone());

        let seeds = state.import_issues.clone();
        for (iid, title, issue_state, created_at) in seeds {
            state.next_id += 1;
            let issue = Issue {
                id: state.next_id,
                iid,
                project_id: project.id,
                title,
                state: issue_state,
                created_at,
                web_url: Some(format!("{}/{full_path}/-/issues/{iid}", self.base_url)),
            };
            state.issues.entry(project.id).or_default().push(issue);
        }

        Ok(ImportTicket {
            project_id: Some(project.id),
        })
    }

    async fn poll_import(&self, _token: &ImportToken) -> Result<PollStatus> {
        self.import_polls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .import_script
            .pop_front()
            .unwrap_or(Ok(PollStatus::Finished))
    }

    async fn list_issues(&self, project_id: u64, scope: IssueScope) -> Result<Vec<Issue>> {
        let state = self.state.lock();
        let mut issues: Vec<Issue> = state
            .issues
            .get(&project_id)
            .map(|issues| {
                issues
                    .iter()
                    .filter(|i| scope == IssueScope::All || i.is_open())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        issues.sort_by_key(|i| i.iid);
        Ok(issues)
    }

    async fn list_issue_notes(&self, issue: &IssueRef) -> Result<Vec<Note>> {
        Ok(self.state.lock().notes.get(issue).cloned().unwrap_or_default())
    }

    async fn comment_issue(&self, issue: &IssueRef, body: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let note = Note {
            id: state.next_id,
            body: body.to_string(),
        };
        state.notes.entry(*issue).or_default().push(note);
        state.comments.push((*issue, body.to_string()));
        Ok(())
    }

    async fn close_issue(&self, issue: &IssueRef) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_closes.contains(&issue.iid) {
            return Err(MigrationError::api(500, "PUT", "/issues", "internal error"));
        }
        if let Some(found) = state
            .issues
            .get_mut(&issue.project_id)
            .and_then(|issues| issues.iter_mut().find(|i| i.iid == issue.iid))
        {
            found.state = "closed".to_string();
        }
        state.closed.push(*issue);
        Ok(())
    }

    async fn get_file(
        &self,
        project_id: u64,
        file_path: &str,
        _git_ref: &str,
    ) -> Result<Option<RepositoryFile>> {
        Ok(self
            .file(project_id, file_path)
            .map(|content| RepositoryFile {
                file_path: file_path.to_string(),
                encoding: "base64".to_string(),
                content: STANDARD.encode(content),
            }))
    }

    async fn update_file(
        &self,
        project_id: u64,
        file_path: &str,
        branch: &str,
        content: &str,
        commit_message: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state
            .files
            .insert((project_id, file_path.to_string()), content.to_string());
        state.commits.push((
            project_id,
            file_path.to_string(),
            branch.to_string(),
            commit_message.to_string(),
        ));
        Ok(())
    }
}

// ============================================================================
// Fake git mirror
// ============================================================================

/// Scripted clone-and-push.
pub struct FakeMirror {
    refs: Vec<String>,
    rejected: Mutex<HashSet<String>>,
    fail_clone: Mutex<bool>,
    pub pushes: Mutex<Vec<String>>,
}

impl FakeMirror {
    pub fn with_refs(refs: &[&str]) -> Self {
        Self {
            refs: refs.iter().map(|r| r.to_string()).collect(),
            rejected: Mutex::new(HashSet::new()),
            fail_clone: Mutex::new(false),
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Branches `main`, `feature-x` and tag `v1.0`.
    pub fn standard() -> Self {
        Self::with_refs(&["refs/heads/main", "refs/heads/feature-x", "refs/tags/v1.0"])
    }

    pub fn reject(&self, refname: &str) {
        self.rejected.lock().insert(refname.to_string());
    }

    pub fn fail_clone(&self) {
        *self.fail_clone.lock() = true;
    }
}

#[async_trait]
impl RepositoryMirror for FakeMirror {
    async fn clone_all_refs(&self, source: &Project) -> Result<MirrorClone> {
        if *self.fail_clone.lock() {
            return Err(TransferError::CloneFailed(format!(
                "repository {} not readable",
                source.path_with_namespace
            ))
            .into());
        }
        Ok(MirrorClone::detached(self.refs.clone()))
    }

    async fn push_all_refs(
        &self,
        clone: &MirrorClone,
        destination: &Project,
    ) -> Result<PushReport> {
        self.pushes.lock().push(destination.path_with_namespace.clone());
        let rejected = self.rejected.lock();
        let updates = clone
            .refs()
            .iter()
            .map(|refname| {
                let flag = if rejected.contains(refname) { '!' } else { '*' };
                RefUpdate {
                    refname: refname.clone(),
                    flag,
                    summary: if flag == '!' {
                        "[remote rejected] (pre-receive hook declined)".to_string()
                    } else {
                        "[new]".to_string()
                    },
                }
            })
            .collect();
        Ok(PushReport { updates })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Virtual clock: sleeping returns at once and moves time forward.
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    pub slept: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            slept: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
        *self.elapsed.lock() += duration;
    }
}

pub fn config(root_group: &str) -> MigrationConfig {
    MigrationConfig::new(
        HostConfig::new("https://ce.example.com", "source-token"),
        HostConfig::new("https://ee.example.com", "dest-token"),
        root_group,
    )
    .expect("valid config")
}
