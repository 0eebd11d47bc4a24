use std::error::Error as StdError;
use std::io;
use std::time::Duration;

/// Why a check produced no HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    DnsNotFound,
    ConnectionRefused,
    Network,
}

impl FailureKind {
    /// Classify a client error. Timeouts win over everything else, then DNS,
    /// then refused connections.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return FailureKind::Timeout;
        }
        if is_dns_failure(err) {
            return FailureKind::DnsNotFound;
        }
        if is_connection_refused(err) {
            return FailureKind::ConnectionRefused;
        }
        FailureKind::Network
    }

    pub fn message(&self, timeout: Duration) -> String {
        match self {
            FailureKind::Timeout => format!("Timeout ({})", timeout_label(timeout)),
            FailureKind::DnsNotFound => "DNS Not Found".to_string(),
            FailureKind::ConnectionRefused => "Connection Refused".to_string(),
            FailureKind::Network => "Network Error".to_string(),
        }
    }
}

/// "10s" for whole seconds, "250ms" otherwise.
pub fn timeout_label(timeout: Duration) -> String {
    let ms = timeout.as_millis();
    if ms >= 1000 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

fn sources<'a>(err: &'a (dyn StdError + 'static)) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |&e: &&'a (dyn StdError + 'static)| e.source())
}

// Checked against hyper-util 0.1 under reqwest 0.12: resolver failures come
// wrapped in its private ConnectError, displayed as "dns error", and the
// getaddrinfo cause is an io::Error of kind Other/Uncategorized. Neither has
// a type or kind to match on, hence the text match.
fn is_dns_failure(err: &reqwest::Error) -> bool {
    sources(err).any(|e| {
        let text = e.to_string();
        text.contains("dns error") || text.contains("failed to lookup address")
    })
}

fn is_connection_refused(err: &reqwest::Error) -> bool {
    sources(err).any(|e| {
        e.downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::ConnectionRefused)
    })
}
