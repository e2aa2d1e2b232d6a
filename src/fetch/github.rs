use chrono::Utc;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;

use crate::errors::FetchError;
use crate::models::{ChangeType, CommitInfo, FileChange, RepoRef};
use super::api::CommitPage;
use super::http::{api_url, classify_response, map_transport_error, read_json, HostEndpoint};

const FILES_PER_PAGE: usize = 100;
/// The commits endpoint stops listing files after 3000 entries.
const MAX_FILE_PAGES: u32 = 30;

pub(crate) struct GitHubClient<'a> {
    client: &'a Client,
    endpoint: &'a HostEndpoint,
}

impl<'a> GitHubClient<'a> {
    pub(crate) fn new(client: &'a Client, endpoint: &'a HostEndpoint) -> Self {
        Self { client, endpoint }
    }

    fn repo_url(&self, repo: &RepoRef, tail: &[&str]) -> Result<Url, FetchError> {
        let mut segments = vec!["repos"];
        segments.extend(repo.path.split('/'));
        segments.extend_from_slice(tail);
        api_url(&self.endpoint.api_base, &segments)
    }

    fn get(&self, url: Url, accept: &str) -> RequestBuilder {
        let mut builder = self.client
            .get(url)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.endpoint.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder, url: &Url, what: &str) -> Result<reqwest::Response, FetchError> {
        let resp = builder.send().await.map_err(|e| map_transport_error(url, e))?;
        if let Some(err) = classify_response(resp.status(), resp.headers(), what, Utc::now()) {
            return Err(err);
        }
        Ok(resp)
    }

    async fn get_json(&self, url: Url, what: &str) -> Result<Value, FetchError> {
        let resp = self.send(self.get(url.clone(), "application/vnd.github+json"), &url, what).await?;
        read_json(resp, &url, what).await
    }

    /// One page of the commit's file list. Every page repeats the commit metadata.
    pub(crate) async fn get_commit_page(&self, repo: &RepoRef, sha: &str, page: u32) -> Result<CommitPage, FetchError> {
        let mut url = self.repo_url(repo, &["commits", sha])?;
        url.query_pairs_mut()
            .append_pair("per_page", &FILES_PER_PAGE.to_string())
            .append_pair("page", &page.to_string());
        let data = self.get_json(url, &format!("commit {}@{} page {}", repo, sha, page)).await?;
        parse_commit_page(&data, page)
    }

    pub(crate) async fn get_file_at_ref(
        &self,
        repo: &RepoRef,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>, FetchError> {
        let mut tail = vec!["contents"];
        tail.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.repo_url(repo, &tail)?;
        url.query_pairs_mut().append_pair("ref", reference);

        let what = format!("file {}@{}:{}", repo, reference, path);
        let resp = self.send(self.get(url.clone(), "application/vnd.github.raw"), &url, &what).await?;
        let bytes = resp.bytes().await.map_err(|e| map_transport_error(&url, e))?;
        Ok(bytes.to_vec())
    }

    pub(crate) async fn resolve_pull_request_head(&self, repo: &RepoRef, number: u64) -> Result<String, FetchError> {
        let number_str = number.to_string();
        let url = self.repo_url(repo, &["pulls", number_str.as_str()])?;
        let data = self.get_json(url, &format!("pull {}#{}", repo, number)).await?;
        pull_request_commit(&data)
            .ok_or_else(|| FetchError::NotFound(format!("pull {}#{} has no usable commit", repo, number)))
    }
}

/// Parse one page of `GET /repos/{owner}/{repo}/commits/{sha}`.
pub(crate) fn parse_commit_page(data: &Value, page: u32) -> Result<CommitPage, FetchError> {
    let commit = parse_commit(data)?;
    let more = commit.files.len() == FILES_PER_PAGE && page < MAX_FILE_PAGES;
    Ok(CommitPage { commit, more })
}

pub(crate) fn parse_commit(data: &Value) -> Result<CommitInfo, FetchError> {
    let sha = data["sha"].as_str()
        .ok_or_else(|| FetchError::InvalidResponse("commit response without sha".into()))?
        .to_string();

    let parents = data["parents"].as_array()
        .map(|ps| ps.iter().filter_map(|p| p["sha"].as_str().map(String::from)).collect())
        .unwrap_or_default();

    let files = data["files"].as_array()
        .map(|fs| fs.iter().filter_map(parse_file).collect())
        .unwrap_or_default();

    Ok(CommitInfo { sha, parents, files })
}

fn parse_file(file: &Value) -> Option<FileChange> {
    let path = file["filename"].as_str()?;
    let change_type = match file["status"].as_str()? {
        "added" | "copied" => ChangeType::Added,
        "removed" => ChangeType::Deleted,
        "modified" | "changed" => ChangeType::Modified,
        "renamed" => ChangeType::Renamed,
        _ => return None,
    };
    Some(FileChange {
        path: path.to_string(),
        previous_path: file["previous_filename"].as_str().map(String::from),
        change_type,
        submodule: false,
    })
}

/// A merged pull request is represented by its merge (or squash) commit,
/// whose first-parent diff is the whole change; an open one by its head.
pub(crate) fn pull_request_commit(data: &Value) -> Option<String> {
    let merged = data["merged"].as_bool().unwrap_or(false);
    if merged {
        if let Some(sha) = data["merge_commit_sha"].as_str() {
            return Some(sha.to_string());
        }
    }
    data["head"]["sha"].as_str().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commit_files() {
        let data = json!({
            "sha": "deadbeef",
            "parents": [{"sha": "p1"}, {"sha": "p2"}],
            "files": [
                {"filename": "src/Foo.php", "status": "modified"},
                {"filename": "new.c", "status": "added"},
                {"filename": "old.c", "status": "removed"},
                {"filename": "b/x.js", "status": "renamed", "previous_filename": "a/x.js"},
                {"filename": "same.txt", "status": "unchanged"}
            ]
        });
        let info = parse_commit(&data).unwrap();
        assert_eq!(info.sha, "deadbeef");
        assert_eq!(info.parents, vec!["p1", "p2"]);
        assert_eq!(info.files.len(), 4);
        assert_eq!(info.files[0].change_type, ChangeType::Modified);
        assert_eq!(info.files[2].change_type, ChangeType::Deleted);
        assert_eq!(info.files[3].previous_path.as_deref(), Some("a/x.js"));
    }

    #[test]
    fn test_parse_commit_requires_sha() {
        assert!(matches!(
            parse_commit(&json!({"files": []})),
            Err(FetchError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_full_page_asks_for_more() {
        let files: Vec<Value> = (0..FILES_PER_PAGE)
            .map(|i| json!({"filename": format!("f{}.c", i), "status": "modified"}))
            .collect();
        let data = json!({"sha": "deadbeef", "parents": [], "files": files});

        assert!(parse_commit_page(&data, 1).unwrap().more);
        assert!(!parse_commit_page(&data, MAX_FILE_PAGES).unwrap().more);

        let short = json!({"sha": "deadbeef", "files": [{"filename": "a.c", "status": "added"}]});
        assert!(!parse_commit_page(&short, 1).unwrap().more);
    }

    #[test]
    fn test_merged_pull_uses_merge_commit() {
        let data = json!({"merged": true, "merge_commit_sha": "m1", "head": {"sha": "h1"}});
        assert_eq!(pull_request_commit(&data).as_deref(), Some("m1"));
    }

    #[test]
    fn test_open_pull_uses_head() {
        let data = json!({"merged": false, "merge_commit_sha": "test-merge", "head": {"sha": "h1"}});
        assert_eq!(pull_request_commit(&data).as_deref(), Some("h1"));
    }
}
