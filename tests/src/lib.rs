//! Shared helpers for the end-to-end scenarios against `fake_peer`, plus
//! the integration tests themselves. `fake_peer` is a real MCP-speaking
//! process rather than a stub, so these tests exercise the full stdio
//! transport instead of mocking it out.

use mcp_common::Invocation;
use std::collections::HashMap;
use std::path::PathBuf;

/// Path to the compiled `fake_peer` binary. `CARGO_BIN_EXE_fake_peer` is
/// set by Cargo for any target in this package because `fake_peer` is
/// declared as a `[[bin]]` here.
pub fn fake_peer_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fake_peer"))
}

/// Build an [`Invocation`] that spawns `fake_peer` in the given mode.
pub fn fake_peer_invocation(mode: &str, extra_env: HashMap<String, String>) -> Invocation {
    let mut env = extra_env;
    env.insert("FAKE_PEER_MODE".to_string(), mode.to_string());
    Invocation::new(
        fake_peer_path().to_string_lossy().to_string(),
        Vec::new(),
        std::env::temp_dir().to_string_lossy().to_string(),
    )
    .with_env(env)
}

#[cfg(test)]
mod end_to_end {
    use super::*;
    use mcp_core::VersionCatalog;
    use mcp_session::{PeerSession, SessionConfig};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            reconnect_base_delay: Duration::from_millis(30),
            request_deadline: Duration::from_secs(5),
            ..SessionConfig::default()
        }
    }

    /// Happy path: handshake negotiates the host's preferred version, the
    /// `echo` tool is discovered and callable.
    #[tokio::test]
    async fn echo_round_trip() {
        let invocation = fake_peer_invocation("echo", HashMap::new());
        let catalog = Arc::new(VersionCatalog::default_catalog());
        let (session, _rx) = PeerSession::new("echo-server", invocation, catalog, fast_config());

        session.start().await.expect("start should succeed");
        assert_eq!(session.negotiated_version().await.as_deref(), Some(mcp_core::PROTOCOL_VERSION));

        let tools = session.list_tools().await.expect("list_tools");
        assert!(tools.iter().any(|t| t.name == "echo"));

        let result = session
            .call_tool("echo", json!({"message": "hello"}))
            .await
            .expect("call_tool");
        let text = result["content"][0]["text"].as_str().unwrap_or_default();
        assert_eq!(text, "hello");

        session.stop().await.expect("stop should succeed");
    }

    /// The peer only accepts `2024-09-24`: the primary handshake must fail
    /// and fall back, and the negotiated version must then disable
    /// prompts (tools/resources only per the catalog's legacy entry).
    #[tokio::test]
    async fn legacy_fallback_disables_prompts() {
        let invocation = fake_peer_invocation("fallback", HashMap::new());
        let catalog = Arc::new(VersionCatalog::default_catalog());
        let (session, _rx) = PeerSession::new("legacy-server", invocation, catalog, fast_config());

        session.start().await.expect("start should fall back and succeed");
        assert_eq!(session.negotiated_version().await.as_deref(), Some("2024-09-24"));

        let tools = session.list_tools().await.expect("tools/list still allowed");
        assert!(tools.iter().any(|t| t.name == "echo"));

        let prompt_result = session.get_prompt("anything", json!({})).await;
        assert!(prompt_result.is_err(), "prompts must be rejected at 2024-09-24");

        session.stop().await.expect("stop should succeed");
    }

    /// A crash shortly after connecting should be reconnected automatically
    /// (crash budget 1): the session must observe `Running` again without
    /// the caller calling `start` a second time.
    #[tokio::test]
    async fn reconnects_after_single_crash() {
        let counter_file = tempfile::NamedTempFile::new().expect("tempfile");
        let counter_path = counter_file.path().to_string_lossy().to_string();
        std::fs::write(&counter_path, "0").unwrap();

        let mut env = HashMap::new();
        env.insert("FAKE_PEER_CRASH_COUNTER_FILE".to_string(), counter_path);
        env.insert("FAKE_PEER_CRASH_BUDGET".to_string(), "1".to_string());
        let invocation = fake_peer_invocation("crash", env);
        let catalog = Arc::new(VersionCatalog::default_catalog());
        let (session, mut rx) = PeerSession::new("crashy-server", invocation, catalog, fast_config());

        session.start().await.expect("initial start should succeed");

        let mut saw_reconnect = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
                Ok(Ok(mcp_common::ManagerEvent::ClientConnected { .. })) => {
                    saw_reconnect = true;
                    break;
                }
                _ => continue,
            }
        }
        assert!(saw_reconnect, "session should reconnect after the first crash");
        assert_eq!(session.state().await, mcp_common::PeerState::Running);

        session.stop().await.expect("stop should succeed");
    }

    /// Exceeding the reconnect budget must latch the session in `Error`
    /// state rather than retrying forever.
    #[tokio::test]
    async fn latches_error_after_exhausting_reconnect_attempts() {
        let counter_file = tempfile::NamedTempFile::new().expect("tempfile");
        let counter_path = counter_file.path().to_string_lossy().to_string();
        std::fs::write(&counter_path, "0").unwrap();

        let mut env = HashMap::new();
        env.insert("FAKE_PEER_CRASH_COUNTER_FILE".to_string(), counter_path);
        env.insert("FAKE_PEER_CRASH_BUDGET".to_string(), "999".to_string());
        let invocation = fake_peer_invocation("crash", env);
        let catalog = Arc::new(VersionCatalog::default_catalog());
        let mut config = fast_config();
        config.max_reconnect_attempts = 2;
        let (session, _rx) = PeerSession::new("always-crashy", invocation, catalog, config);

        session.start().await.expect("initial start should succeed");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if session.state().await == mcp_common::PeerState::Error {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("session never latched Error after exhausting reconnect attempts");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Benign package-manager stderr chatter and stray non-JSON stdout
    /// lines must not be treated as connection faults; the session still
    /// reaches `Running` and serves tools normally.
    #[tokio::test]
    async fn tolerates_benign_noise() {
        let invocation = fake_peer_invocation("noisy", HashMap::new());
        let catalog = Arc::new(VersionCatalog::default_catalog());
        let (session, _rx) = PeerSession::new("noisy-server", invocation, catalog, fast_config());

        session.start().await.expect("start should succeed despite noise");
        assert_eq!(session.state().await, mcp_common::PeerState::Running);

        session.stop().await.expect("stop should succeed");
    }
}
