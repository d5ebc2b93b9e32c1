//! GitLab REST v4 client.

use crate::api::{ExportArchive, GitLabApi};
use crate::config::{HostConfig, Secret};
use crate::error::{MigrationError, Result};
use crate::types::{
    ExportToken, Group, ImportTicket, ImportToken, Issue, IssueRef, IssueScope, Note, PollStatus,
    Project, RepositoryFile,
};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{multipart, Body, Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

const PER_PAGE: usize = 100;

/// Client for one GitLab instance.
pub struct GitLabClient {
    client: Client,
    base_url: String,
    token: Secret,
}

#[derive(Debug, Serialize)]
struct CreateGroupRequest<'a> {
    name: &'a str,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CreateProjectRequest<'a> {
    name: &'a str,
    path: &'a str,
    namespace_id: u64,
}

#[derive(Debug, Serialize)]
struct CreateNoteRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateIssueRequest<'a> {
    state_event: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateFileRequest<'a> {
    branch: &'a str,
    content: &'a str,
    commit_message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExportStatusResponse {
    #[serde(default)]
    export_status: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportStatusResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    import_status: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    import_error: Option<String>,
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(host: &HostConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("labshift/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| MigrationError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: host.base_url.trim_end_matches('/').to_string(),
            token: host.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v4{path}", self.base_url);
        self.client
            .request(method, url)
            .header("PRIVATE-TOKEN", self.token.expose())
    }

    /// Send a request and turn non-success statuses into [`MigrationError::Api`].
    async fn send(&self, method: Method, path: &str, request: RequestBuilder) -> Result<Response> {
        debug!(method = %method, path = %path, host = %self.base_url, "GitLab API request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                MigrationError::Network(e.to_string())
            } else {
                MigrationError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MigrationError::api(
                status.as_u16(),
                method.as_str(),
                path,
                body,
            ));
        }

        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let request = self.request(Method::GET, path).query(query);
        let response = self.send(Method::GET, path, request).await?;
        Ok(response.json().await?)
    }

    /// GET that maps `404` to `None`.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        match self.get(path, query).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut page = 1;

        loop {
            let mut paged: Vec<(&str, String)> = query.to_vec();
            paged.push(("page", page.to_string()));
            paged.push(("per_page", PER_PAGE.to_string()));

            let items: Vec<T> = self.get(path, &paged).await?;
            let count = items.len();
            all_items.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all_items)
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.request(method.clone(), path).json(body);
        let response = self.send(method, path, request).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl GitLabApi for GitLabClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn find_group(&self, full_path: &str) -> Result<Option<Group>> {
        self.get_optional(&format!("/groups/{}", encode(full_path)), &[])
            .await
    }

    async fn create_group(&self, parent_id: Option<u64>, name: &str) -> Result<Group> {
        self.send_json(
            Method::POST,
            "/groups",
            &CreateGroupRequest {
                name,
                path: name,
                parent_id,
            },
        )
        .await
    }

    async fn find_project(&self, full_path: &str) -> Result<Option<Project>> {
        self.get_optional(&format!("/projects/{}", encode(full_path)), &[])
            .await
    }

    async fn get_project(&self, id: u64) -> Result<Option<Project>> {
        self.get_optional(&format!("/projects/{id}"), &[]).await
    }

    async fn create_project(&self, group_id: u64, name: &str) -> Result<Project> {
        self.send_json(
            Method::POST,
            "/projects",
            &CreateProjectRequest {
                name,
                path: name,
                namespace_id: group_id,
            },
        )
        .await
    }

    async fn request_export(&self, project_id: u64) -> Result<ExportToken> {
        let path = format!("/projects/{project_id}/export");
        let request = self.request(Method::POST, &path);
        self.send(Method::POST, &path, request).await?;
        Ok(ExportToken(project_id))
    }

    async fn poll_export(&self, token: &ExportToken) -> Result<PollStatus> {
        let status: Option<ExportStatusResponse> = self
            .get_optional(&format!("/projects/{}/export", token.0), &[])
            .await?;
        Ok(status.map_or(PollStatus::Pending, |s| export_poll_status(&s)))
    }

    async fn download_export(&self, token: &ExportToken) -> Result<ExportArchive> {
        let path = format!("/projects/{}/export/download", token.0);
        let request = self.request(Method::GET, &path);
        let response = self.send(Method::GET, &path, request).await?;

        let mut file = tempfile::Builder::new()
            .prefix("labshift-export-")
            .suffix(".tar.gz")
            .tempfile()?;
        let mut size = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MigrationError::Network(e.to_string()))?;
            file.write_all(&chunk)?;
            size += chunk.len() as u64;
        }
        file.flush()?;

        debug!(project_id = token.0, bytes = size, "Downloaded export archive");
        Ok(ExportArchive::new(file, size))
    }

    async fn request_import(
        &self,
        namespace: &str,
        name: &str,
        archive: &ExportArchive,
    ) -> Result<ImportTicket> {
        let file = tokio::fs::File::open(archive.path()).await?;
        let body = Body::wrap_stream(ReaderStream::new(file));
        let part = multipart::Part::stream_with_length(body, archive.size())
            .file_name(format!("{name}-export.tar.gz"))
            .mime_str("application/gzip")?;
        let form = multipart::Form::new()
            .text("path", name.to_string())
            .text("name", name.to_string())
            .text("namespace", namespace.to_string())
            .part("file", part);

        let path = "/projects/import";
        let request = self.request(Method::POST, path).multipart(form);
        let response = self.send(Method::POST, path, request).await?;

        // Some versions answer with an empty body.
        let body = response
            .bytes()
            .await
            .map_err(|e| MigrationError::Network(e.to_string()))?;
        if body.is_empty() {
            return Ok(ImportTicket { project_id: None });
        }
        let status: ImportStatusResponse = serde_json::from_slice(&body)?;
        Ok(ImportTicket {
            project_id: status.id,
        })
    }

    async fn poll_import(&self, token: &ImportToken) -> Result<PollStatus> {
        let status: Option<ImportStatusResponse> = self
            .get_optional(&format!("/projects/{}/import", token.0), &[])
            .await?;
        Ok(status.map_or(PollStatus::Pending, |s| import_poll_status(&s)))
    }

    async fn list_issues(&self, project_id: u64, scope: IssueScope) -> Result<Vec<Issue>> {
        self.get_paginated(
            &format!("/projects/{project_id}/issues"),
            &[
                ("state", scope.as_param().to_string()),
                ("order_by", "iid".to_string()),
                ("sort", "asc".to_string()),
            ],
        )
        .await
    }

    async fn list_issue_notes(&self, issue: &IssueRef) -> Result<Vec<Note>> {
        self.get_paginated(
            &format!("/projects/{}/issues/{}/notes", issue.project_id, issue.iid),
            &[
                ("order_by", "created_at".to_string()),
                ("sort", "asc".to_string()),
            ],
        )
        .await
    }

    async fn comment_issue(&self, issue: &IssueRef, body: &str) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                Method::POST,
                &format!("/projects/{}/issues/{}/notes", issue.project_id, issue.iid),
                &CreateNoteRequest { body },
            )
            .await?;
        Ok(())
    }

    async fn close_issue(&self, issue: &IssueRef) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                Method::PUT,
                &format!("/projects/{}/issues/{}", issue.project_id, issue.iid),
                &UpdateIssueRequest {
                    state_event: "close",
                },
            )
            .await?;
        Ok(())
    }

    async fn get_file(
        &self,
        project_id: u64,
        file_path: &str,
        git_ref: &str,
    ) -> Result<Option<RepositoryFile>> {
        self.get_optional(
            &format!(
                "/projects/{project_id}/repository/files/{}",
                encode(file_path)
            ),
            &[("ref", git_ref.to_string())],
        )
        .await
    }

    async fn update_file(
        &self,
        project_id: u64,
        file_path: &str,
        branch: &str,
        content: &str,
        commit_message: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                Method::PUT,
                &format!(
                    "/projects/{project_id}/repository/files/{}",
                    encode(file_path)
                ),
                &UpdateFileRequest {
                    branch,
                    content,
                    commit_message,
                },
            )
            .await?;
        Ok(())
    }
}

/// Percent-encode a path parameter, including `/`.
fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn export_poll_status(response: &ExportStatusResponse) -> PollStatus {
    match response
        .export_status
        .as_deref()
        .or(response.status.as_deref())
    {
        Some("finished") => PollStatus::Finished,
        Some("failed") => PollStatus::Failed("export reported failed".to_string()),
        _ => PollStatus::Pending,
    }
}

fn import_poll_status(response: &ImportStatusResponse) -> PollStatus {
    match response
        .import_status
        .as_deref()
        .or(response.status.as_deref())
    {
        Some("finished") => PollStatus::Finished,
        Some("failed") => PollStatus::Failed(
            response
                .import_error
                .clone()
                .unwrap_or_else(|| "import reported failed".to_string()),
        ),
        _ => PollStatus::Pending,
    }
}
