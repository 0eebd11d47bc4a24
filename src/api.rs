use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::Client;
use tokio::net::TcpListener;
use serde::Serialize;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::checker::LivenessChecker;
use crate::config::ConfigManager;
use crate::metrics::observe_check;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Shared by every request: the pooled client and the live config.
#[derive(Clone)]
pub struct ApiContext {
    pub client: Client,
    pub config: Arc<ConfigManager>,
}

fn with_context(ctx: ApiContext) -> impl Filter<Extract = (ApiContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// `GET /api/check?url=...`
pub fn routes(ctx: ApiContext) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "check")
        .and(warp::get())
        // Pairs rather than a struct so a repeated `url` key is not a rejection.
        .and(warp::query::<Vec<(String, String)>>())
        .and(with_context(ctx))
        .and_then(handle_check)
}

/// First `url` value in the query; later repeats are ignored.
fn url_param(query: &[(String, String)]) -> Option<&str> {
    query
        .iter()
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.trim())
}

async fn handle_check(query: Vec<(String, String)>, ctx: ApiContext) -> Result<warp::reply::Response, Infallible> {
    let url = match url_param(&query) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => {
            tracing::debug!("check request without url");
            let body = warp::reply::json(&ErrorBody { error: "No URL provided" });
            return Ok(warp::reply::with_status(body, StatusCode::BAD_REQUEST).into_response());
        }
    };

    let checker = LivenessChecker::new(ctx.client, ctx.config.timeout().await);
    let result = checker.check(&url).await;
    observe_check(&result);

    Ok(warp::reply::json(&result).into_response())
}

/// warp's `run` panics when it cannot bind, so listeners are checked up front
/// and a failure is logged and returned instead.
pub async fn ensure_bindable(addr: SocketAddr, listener: &str) -> anyhow::Result<()> {
    match TcpListener::bind(addr).await {
        Ok(bound) => {
            drop(bound);
            Ok(())
        }
        Err(e) => {
            tracing::error!("{} listener cannot bind {}: {}", listener, addr, e);
            Err(anyhow::Error::new(e).context(format!("binding {} listener on {}", listener, addr)))
        }
    }
}

pub async fn serve(addr: SocketAddr, ctx: ApiContext) {
    tracing::info!("check endpoint listening on {}", addr);
    warp::serve(routes(ctx)).run(addr).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckerConfig;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn context(timeout_ms: u64) -> ApiContext {
        let cfg = CheckerConfig { timeout_ms, ..CheckerConfig::default() };
        ApiContext {
            client: Client::builder().no_proxy().build().unwrap(),
            config: Arc::new(ConfigManager::fixed(cfg)),
        }
    }

    async fn ok_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let _ = sock
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nhi")
                    .await;
            }
        });
        format!("http://{}/health", addr)
    }

    /// Accepts connections and never answers.
    async fn silent_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        format!("http://{}/", addr)
    }

    fn encode(url: &str) -> String {
        url.replace(':', "%3A").replace('/', "%2F")
    }

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn missing_url_is_bad_request() {
        let resp = warp::test::request()
            .path("/api/check")
            .reply(&routes(context(10_000)))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp.body()), serde_json::json!({"error": "No URL provided"}));
    }

    #[tokio::test]
    async fn empty_url_is_bad_request() {
        let resp = warp::test::request()
            .path("/api/check?url=")
            .reply(&routes(context(10_000)))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp.body());
        assert!(body.get("alive").is_none());
        assert_eq!(body["error"], "No URL provided");
    }

    #[tokio::test]
    async fn reports_reachable_target() {
        let target = ok_upstream().await;
        let path = format!("/api/check?url={}", encode(&target));
        let resp = warp::test::request()
            .path(&path)
            .reply(&routes(context(10_000)))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp.body());
        assert_eq!(body["alive"], true);
        assert_eq!(body["status"], 200);
        assert_eq!(body["message"], "OK");
        assert!(body["responseTime"].as_u64().is_some());
    }

    #[tokio::test]
    async fn reports_failures_as_results() {
        let resp = warp::test::request()
            .path("/api/check?url=http%3A%2F%2Fno-such-host.invalid%2F")
            .reply(&routes(context(10_000)))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp.body());
        assert_eq!(body["alive"], false);
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["message"], "DNS Not Found");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let resp = warp::test::request()
            .path("/api/other")
            .reply(&routes(context(10_000)))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn repeated_url_uses_first_value() {
        let target = ok_upstream().await;
        let path = format!(
            "/api/check?url={}&url={}",
            encode(&target),
            encode("http://no-such-host.invalid/")
        );
        let resp = warp::test::request()
            .path(&path)
            .reply(&routes(context(10_000)))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp.body());
        assert_eq!(body["status"], 200);
        assert_eq!(body["message"], "OK");
    }

    #[tokio::test]
    async fn reloaded_timeout_applies_to_next_check() {
        let ctx = context(10_000);
        ctx.config.config.write().await.timeout_ms = 200;

        let target = silent_upstream().await;
        let path = format!("/api/check?url={}", encode(&target));
        let resp = warp::test::request()
            .path(&path)
            .reply(&routes(ctx))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp.body());
        assert_eq!(body["alive"], false);
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["message"], "Timeout (200ms)");
        let elapsed = body["responseTime"].as_u64().unwrap();
        assert!((200..3000).contains(&elapsed), "responseTime {}", elapsed);
    }

    #[test]
    fn url_param_takes_first_url_key() {
        let query = vec![
            ("other".to_string(), "x".to_string()),
            ("url".to_string(), " http://a/ ".to_string()),
            ("url".to_string(), "http://b/".to_string()),
        ];
        assert_eq!(url_param(&query), Some("http://a/"));
        assert_eq!(url_param(&[]), None);
    }

    #[tokio::test]
    async fn occupied_port_fails_bind_check() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        assert!(ensure_bindable(addr, "check").await.is_err());

        drop(taken);
        assert!(ensure_bindable(addr, "check").await.is_ok());
    }

    #[tokio::test]
    async fn only_get_is_routed() {
        let resp = warp::test::request()
            .method("POST")
            .path("/api/check?url=http%3A%2F%2Fexample.com%2F")
            .reply(&routes(context(10_000)))
            .await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
