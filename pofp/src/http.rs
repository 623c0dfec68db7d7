//! C8: streaming HTTP GET/POST against the object endpoints, with
//! bounded retry via `rbop`'s retry wrapper (spec.md §4.8).

use rbop::retry::{invoke, Attempt, InvocationResult, NonRetryableEscape};
use rbop::CallbackResult;

use crate::types::Sha;

#[derive(thiserror::Error, Debug)]
pub enum HttpError {
    #[error("http status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Synchronous HTTP client for the documented smart-HTTP object
/// endpoints (spec.md §6). Synchronous by design: spec.md §5 mandates
/// a parallel-OS-thread model throughout, so no async runtime is
/// introduced here.
pub struct HttpClient {
    remote_base: String,
    agent: ureq::Agent,
    max_attempts: u32,
    backoff_base: f64,
}

impl HttpClient {
    pub fn new(remote_base: impl Into<String>) -> Self {
        Self {
            remote_base: remote_base.into(),
            agent: ureq::AgentBuilder::new().build(),
            max_attempts: 5,
            backoff_base: 2.0,
        }
    }

    pub fn with_retry_policy(mut self, max_attempts: u32, backoff_base: f64) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_base = backoff_base;
        self
    }

    /// Fetch a single loose object by SHA.
    pub fn try_download_loose_object(
        &self,
        sha: Sha,
        mut on_success: impl FnMut(u32, ureq::Response) -> CallbackResult,
        mut on_failure: impl FnMut(&NonRetryableEscape),
    ) -> InvocationResult<()> {
        let url = format!("{}/objects/{}", self.remote_base, sha);
        let result = self.attempt(
            move |_attempt| ureq::get(&url).call(),
            &mut on_success,
        );
        self.report_failure(result, &mut on_failure)
    }

    /// Bulk-fetch a batch of SHAs at the given commit depth, optionally
    /// negotiating a batched-loose-objects response.
    pub fn try_download_objects(
        &self,
        sha_provider: impl Fn() -> Vec<Sha>,
        commit_depth: u32,
        mut on_success: impl FnMut(u32, ureq::Response) -> CallbackResult,
        mut on_failure: impl FnMut(&NonRetryableEscape),
        prefer_batched_loose_objects: bool,
    ) -> InvocationResult<()> {
        let url = format!("{}/objects/batch", self.remote_base);
        let accept = super::types::ContentType::accept_header(prefer_batched_loose_objects);
        let result = self.attempt(
            move |_attempt| {
                let body = BulkRequestBody {
                    shas: sha_provider(),
                    commit_depth,
                };
                ureq::post(&url)
                    .set("Accept", accept)
                    .send_json(body.to_json())
            },
            &mut on_success,
        );
        self.report_failure(result, &mut on_failure)
    }

    fn attempt(
        &self,
        build_and_send: impl Fn(u32) -> Result<ureq::Response, ureq::Error>,
        on_success: &mut impl FnMut(u32, ureq::Response) -> CallbackResult,
    ) -> Result<InvocationResult<()>, NonRetryableEscape> {
        invoke(self.max_attempts, self.backoff_base, |attempt| {
            match build_and_send(attempt) {
                Ok(response) => match on_success(attempt, response) {
                    CallbackResult::Success => Attempt::Success(()),
                    CallbackResult::RetryableError(err) => Attempt::Retryable(err),
                    CallbackResult::FatalError(err) => Attempt::Fatal(err),
                },
                Err(ureq::Error::Status(code, _)) => Attempt::retryable(HttpError::Status(code)),
                Err(ureq::Error::Transport(transport)) => {
                    Attempt::retryable(HttpError::Transport(transport.to_string()))
                }
            }
        })
    }

    fn report_failure(
        &self,
        result: Result<InvocationResult<()>, NonRetryableEscape>,
        on_failure: &mut impl FnMut(&NonRetryableEscape),
    ) -> InvocationResult<()> {
        match result {
            Ok(invocation) => invocation,
            Err(escape) => {
                on_failure(&escape);
                InvocationResult::Exhausted {
                    attempts: self.max_attempts,
                    last_error: Box::new(escape),
                }
            }
        }
    }
}

struct BulkRequestBody {
    shas: Vec<Sha>,
    commit_depth: u32,
}

impl BulkRequestBody {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "shas": self.shas.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            "commitDepth": self.commit_depth,
        })
    }
}
