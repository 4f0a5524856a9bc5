use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::display::Display;

/// Fixed-spacing retry policy for one-time bring-up steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected { attempts: u32 },
    Failed,
}

impl Connectivity {
    pub fn is_connected(&self) -> bool {
        matches!(self, Connectivity::Connected { .. })
    }
}

/// Runs `attempt` until it succeeds or the policy gives up, printing one progress
/// dot per failed attempt.
pub async fn bring_up<D, F, Fut>(policy: RetryPolicy, display: &mut D, mut attempt: F) -> Connectivity
where
    D: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    display.clear();
    display.set_cursor(0, 0);
    display.print("Connecting");
    display.flush();

    for n in 1..=policy.max_attempts {
        if attempt().await {
            tracing::info!("Network reachable after {} attempt(s)", n);
            display.clear();
            display.print("Network OK");
            display.flush();
            return Connectivity::Connected { attempts: n };
        }
        tracing::debug!("Network attempt {}/{} failed", n, policy.max_attempts);
        display.print(".");
        display.flush();
        if n < policy.max_attempts {
            sleep(policy.delay).await;
        }
    }

    tracing::warn!(
        "Network connection failed after {} attempts",
        policy.max_attempts
    );
    display.clear();
    display.print("Network FAILED");
    display.flush();
    Connectivity::Failed
}

/// Host and port of a URL, defaulting the port from the scheme.
pub fn endpoint_of(url: &str) -> Option<(String, u16)> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let port = parsed.port_or_known_default()?;
    Some((host, port))
}

/// Whether a TCP connection to `host:port` can be opened within `limit`.
pub async fn tcp_reachable(host: &str, port: u16, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!("Connect to {}:{} failed: {}", host, port, e);
            false
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::CharacterGrid;
    use std::cell::Cell;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let calls = Cell::new(0);
        let mut grid = CharacterGrid::new();

        let result = bring_up(quick_policy(15), &mut grid, || {
            calls.set(calls.get() + 1);
            let ok = calls.get() == 3;
            async move { ok }
        })
        .await;

        assert_eq!(result, Connectivity::Connected { attempts: 3 });
        assert_eq!(calls.get(), 3);
        assert_eq!(grid.row_text(0).trim_end(), "Network OK");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let mut grid = CharacterGrid::new();

        let result = bring_up(quick_policy(4), &mut grid, || {
            calls.set(calls.get() + 1);
            async { false }
        })
        .await;

        assert_eq!(result, Connectivity::Failed);
        assert!(!result.is_connected());
        assert_eq!(calls.get(), 4);
        assert_eq!(grid.row_text(0).trim_end(), "Network FAILED");
    }

    /// Keeps every printed fragment.
    #[derive(Default)]
    struct PrintLog(Vec<String>);

    impl Display for PrintLog {
        fn clear(&mut self) {
            self.0.push("<clear>".to_string());
        }
        fn set_cursor(&mut self, _col: usize, _row: usize) {}
        fn print(&mut self, text: &str) {
            self.0.push(text.to_string());
        }
    }

    #[tokio::test]
    async fn test_progress_dots() {
        let mut log = PrintLog::default();

        bring_up(quick_policy(2), &mut log, || async { false }).await;

        assert_eq!(
            log.0,
            vec!["<clear>", "Connecting", ".", ".", "<clear>", "Network FAILED"]
        );
    }

    #[test]
    fn test_endpoint_of() {
        assert_eq!(
            endpoint_of("https://meter-db.europe-west1.firebasedatabase.app"),
            Some(("meter-db.europe-west1.firebasedatabase.app".to_string(), 443))
        );
        assert_eq!(
            endpoint_of("http://127.0.0.1:9000"),
            Some(("127.0.0.1".to_string(), 9000))
        );
        assert_eq!(endpoint_of(""), None);
    }

    #[tokio::test]
    async fn test_tcp_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(tcp_reachable("127.0.0.1", port, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!tcp_reachable("127.0.0.1", port, Duration::from_secs(1)).await);
    }
}
