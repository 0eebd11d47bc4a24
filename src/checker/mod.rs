use reqwest::Client;
use serde::{Serialize, Serializer};
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info};

pub mod classify;
pub mod status;

use classify::FailureKind;
use status::status_message;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// HTTP status of a check, or `ERROR` when no response came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Code(u16),
    Error,
}

impl Serialize for CheckStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CheckStatus::Code(code) => serializer.serialize_u16(*code),
            CheckStatus::Error => serializer.serialize_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub alive: bool,
    pub status: CheckStatus,
    pub message: String,
    pub response_time: u64,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl CheckResult {
    fn responded(code: u16, alive: bool, response_time: u64) -> Self {
        Self {
            alive,
            status: CheckStatus::Code(code),
            message: status_message(code).to_string(),
            response_time,
            failure: None,
        }
    }

    fn failed(kind: FailureKind, bound: Duration, response_time: u64) -> Self {
        Self {
            alive: false,
            status: CheckStatus::Error,
            message: kind.message(bound),
            response_time,
            failure: Some(kind),
        }
    }
}

/// Issues one bounded GET per check.
#[derive(Debug, Clone)]
pub struct LivenessChecker {
    client: Client,
    timeout: Duration,
}

impl LivenessChecker {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn build_client(user_agent: &str) -> anyhow::Result<Client> {
        Ok(Client::builder().user_agent(user_agent).build()?)
    }

    /// Never fails: every outcome, including network errors, is a `CheckResult`.
    pub async fn check(&self, url: &str) -> CheckResult {
        let start = Instant::now();
        // Whichever side loses the race is dropped, which releases the timer
        // or aborts the in-flight connection.
        let outcome = timeout(self.timeout, self.client.get(url).send()).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(resp)) => {
                let code = resp.status();
                CheckResult::responded(code.as_u16(), code.is_success(), elapsed)
            }
            Ok(Err(e)) => {
                debug!("check {} failed: {:?}", url, e);
                CheckResult::failed(FailureKind::from_reqwest(&e), self.timeout, elapsed)
            }
            Err(_) => {
                debug!("check {} hit the {:?} bound", url, self.timeout);
                CheckResult::failed(FailureKind::Timeout, self.timeout, elapsed)
            }
        };

        info!(
            url = %url,
            status = ?result.status,
            message = %result.message,
            elapsed_ms = result.response_time,
            "liveness check done"
        );
        result
    }
}
