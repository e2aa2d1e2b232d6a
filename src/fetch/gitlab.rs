use chrono::Utc;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;

use crate::errors::FetchError;
use crate::models::{ChangeType, CommitInfo, FileChange, RepoRef};
use super::api::CommitPage;
use super::http::{api_url, classify_response, map_transport_error, read_json, HostEndpoint};

const DIFFS_PER_PAGE: usize = 100;
const MAX_DIFF_PAGES: u32 = 50;
const GITLINK_MODE: &str = "160000";

pub(crate) struct GitLabClient<'a> {
    client: &'a Client,
    endpoint: &'a HostEndpoint,
}

impl<'a> GitLabClient<'a> {
    pub(crate) fn new(client: &'a Client, endpoint: &'a HostEndpoint) -> Self {
        Self { client, endpoint }
    }

    /// Project-scoped URL; the project path is one encoded segment.
    fn project_url(&self, repo: &RepoRef, tail: &[&str]) -> Result<Url, FetchError> {
        let mut segments = vec!["projects", repo.path.as_str()];
        segments.extend_from_slice(tail);
        api_url(&self.endpoint.api_base, &segments)
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let mut builder = self.client.get(url);
        if let Some(token) = &self.endpoint.token {
            builder = builder.header("PRIVATE-TOKEN", token);
        }
        builder
    }

    async fn send(&self, url: Url, what: &str) -> Result<reqwest::Response, FetchError> {
        let resp = self.get(url.clone()).send().await.map_err(|e| map_transport_error(&url, e))?;
        if let Some(err) = classify_response(resp.status(), resp.headers(), what, Utc::now()) {
            return Err(err);
        }
        Ok(resp)
    }

    async fn get_json(&self, url: Url, what: &str) -> Result<Value, FetchError> {
        let resp = self.send(url.clone(), what).await?;
        read_json(resp, &url, what).await
    }

    /// Page 1 is the commit metadata; page `n` is page `n - 1` of its diff.
    pub(crate) async fn get_commit_page(&self, repo: &RepoRef, sha: &str, page: u32) -> Result<CommitPage, FetchError> {
        let what = format!("commit {}@{}", repo, sha);
        if page <= 1 {
            let url = self.project_url(repo, &["repository", "commits", sha])?;
            let data = self.get_json(url, &what).await?;
            return parse_commit_metadata(&data, &what);
        }

        let diff_page = page - 1;
        let mut url = self.project_url(repo, &["repository", "commits", sha, "diff"])?;
        url.query_pairs_mut()
            .append_pair("per_page", &DIFFS_PER_PAGE.to_string())
            .append_pair("page", &diff_page.to_string());
        let diffs = self.get_json(url, &format!("diff of {} page {}", what, diff_page)).await?;
        parse_diff_page(&diffs, sha, diff_page)
    }

    pub(crate) async fn get_file_at_ref(
        &self,
        repo: &RepoRef,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>, FetchError> {
        let mut url = self.project_url(repo, &["repository", "files", path, "raw"])?;
        url.query_pairs_mut().append_pair("ref", reference);
        let what = format!("file {}@{}:{}", repo, reference, path);
        let resp = self.send(url.clone(), &what).await?;
        let bytes = resp.bytes().await.map_err(|e| map_transport_error(&url, e))?;
        Ok(bytes.to_vec())
    }

    pub(crate) async fn resolve_merge_request_head(&self, repo: &RepoRef, iid: u64) -> Result<String, FetchError> {
        let iid_str = iid.to_string();
        let url = self.project_url(repo, &["merge_requests", iid_str.as_str()])?;
        let data = self.get_json(url, &format!("merge request {}!{}", repo, iid)).await?;
        merge_request_commit(&data)
            .ok_or_else(|| FetchError::NotFound(format!("merge request {}!{} has no usable commit", repo, iid)))
    }
}

pub(crate) fn parse_commit_metadata(data: &Value, what: &str) -> Result<CommitPage, FetchError> {
    let sha = data["id"].as_str()
        .ok_or_else(|| FetchError::InvalidResponse(format!("{} without id", what)))?
        .to_string();
    let parents = data["parent_ids"].as_array()
        .map(|ps| ps.iter().filter_map(|p| p.as_str().map(String::from)).collect())
        .unwrap_or_default();
    Ok(CommitPage {
        commit: CommitInfo { sha, parents, files: Vec::new() },
        more: true,
    })
}

pub(crate) fn parse_diff_page(diffs: &Value, sha: &str, diff_page: u32) -> Result<CommitPage, FetchError> {
    let entries = diffs.as_array()
        .ok_or_else(|| FetchError::InvalidResponse(format!("diff of {} is not a list", sha)))?;
    let files = entries.iter().filter_map(parse_diff_entry).collect();
    Ok(CommitPage {
        commit: CommitInfo { sha: sha.to_string(), parents: Vec::new(), files },
        more: entries.len() == DIFFS_PER_PAGE && diff_page < MAX_DIFF_PAGES,
    })
}

/// Parse one entry of `GET /projects/:id/repository/commits/:sha/diff`.
pub(crate) fn parse_diff_entry(entry: &Value) -> Option<FileChange> {
    let new_path = entry["new_path"].as_str()?;
    let old_path = entry["old_path"].as_str().unwrap_or(new_path);

    let (path, change_type) = if entry["new_file"].as_bool().unwrap_or(false) {
        (new_path, ChangeType::Added)
    } else if entry["deleted_file"].as_bool().unwrap_or(false) {
        (old_path, ChangeType::Deleted)
    } else if entry["renamed_file"].as_bool().unwrap_or(false) {
        (new_path, ChangeType::Renamed)
    } else {
        (new_path, ChangeType::Modified)
    };

    let submodule = entry["b_mode"].as_str() == Some(GITLINK_MODE)
        || entry["a_mode"].as_str() == Some(GITLINK_MODE);

    Some(FileChange {
        path: path.to_string(),
        previous_path: (change_type == ChangeType::Renamed).then(|| old_path.to_string()),
        change_type,
        submodule,
    })
}

pub(crate) fn merge_request_commit(data: &Value) -> Option<String> {
    if data["state"].as_str() == Some("merged") {
        for key in ["merge_commit_sha", "squash_commit_sha"] {
            if let Some(sha) = data[key].as_str() {
                return Some(sha.to_string());
            }
        }
    }
    data["sha"].as_str().map(String::from)
}
