use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::{issue::IssueRecord, rate_limit::RateLimit, repo_name::RepoName};

pub(crate) const DEFAULT_API_URL: &str = "https://api.github.com";

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("GitHub returned {status} for issue {number}")]
    Status {
        number: u64,
        status: reqwest::StatusCode,
    },
}

/// The result of one remote read: the record, the quota signal that came
/// with it, and how long the round trip took.
#[derive(Debug)]
pub(crate) struct FetchedIssue {
    pub record: IssueRecord,
    pub rate_limit: RateLimit,
    pub elapsed: Duration,
}

pub(crate) struct Client {
    http: reqwest::Client,
    api_url: String,
    repo: RepoName,
    token: String,
}

impl Client {
    pub(crate) fn new(api_url: &str, repo: RepoName, token: String) -> Result<Client, Error> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Client {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo,
            token,
        })
    }

    /// Reads a single issue. Any non-success status is an error, there is no
    /// retry.
    pub(crate) async fn get_issue(&self, number: u64) -> Result<FetchedIssue, Error> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}",
            self.api_url, self.repo.owner, self.repo.name, number
        );
        debug!(%url, "requesting issue");
        let started = Instant::now();
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .header(reqwest::header::AUTHORIZATION, format!("token {}", self.token))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { number, status });
        }
        let rate_limit = RateLimit::from_headers(response.headers());
        let record: IssueRecord = response.json().await?;
        Ok(FetchedIssue {
            record,
            rate_limit,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::fixtures;

    fn client(server: &mockito::Server) -> Client {
        Client::new(
            &server.url(),
            "python/cpython".parse().unwrap(),
            "ghp_test".to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fetches_issue_with_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/python/cpython/issues/456")
            .match_header("authorization", "token ghp_test")
            .match_header("accept", "application/vnd.github.v3+json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-ratelimit-remaining", "4321")
            .with_header("x-ratelimit-reset", "1700000000")
            .with_body(fixtures::issue_json(456, "open", "2022-06-01T00:00:00Z").to_string())
            .create_async()
            .await;

        let fetched = client(&server).get_issue(456).await.unwrap();
        mock.assert_async().await;
        assert_eq!(fetched.record.number, 456);
        assert_eq!(
            fetched.rate_limit,
            RateLimit {
                remaining: 4321,
                reset: 1700000000
            }
        );
    }

    #[tokio::test]
    async fn non_success_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/repos/python/cpython/issues/9")
            .with_status(404)
            .create_async()
            .await;

        match client(&server).get_issue(9).await {
            Err(Error::Status { number, status }) => {
                assert_eq!(number, 9);
                assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }
}
