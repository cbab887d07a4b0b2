// =============================================================================
// Session — `.session_state` persistence and crash-recovery detection
// =============================================================================
//
// A small local file tracking the current session id, start time, initial
// balance, last heartbeat, symbol list and status. On startup, if the
// recovered status is RUNNING the same session id is kept (the process
// crashed without a clean shutdown); otherwise a new session id is minted.
// =============================================================================

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::types::SessionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub start_time: i64,
    pub initial_balance: f64,
    pub last_heartbeat: i64,
    pub symbols: Vec<String>,
    pub status: SessionStatus,
    /// Why the session stopped, e.g. `"Emergency"` for an emergency-drawdown
    /// flatten, `"Shutdown"` for a clean operator-initiated stop. `None`
    /// while `status == Running`.
    #[serde(default)]
    pub end_reason: Option<String>,
}

/// Owns the `.session_state` file path and the current in-memory state.
/// Single writer: the orchestrator's heartbeat task.
pub struct Session {
    path: PathBuf,
    state: SessionState,
}

impl Session {
    /// Recover or mint a session. If a prior file exists with
    /// `status == Running`, its session id is preserved (the process likely
    /// crashed); otherwise a fresh session id is minted.
    pub fn bootstrap(path: impl AsRef<Path>, initial_balance: f64, symbols: Vec<String>, now: i64) -> Self {
        let path = path.as_ref().to_path_buf();

        let recovered = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<SessionState>(&content).ok());

        let state = match recovered {
            Some(prior) if prior.status == SessionStatus::Running => {
                warn!(
                    session_id = %prior.session_id,
                    last_heartbeat = prior.last_heartbeat,
                    "recovered session was RUNNING at last heartbeat; resuming same session id (crash recovery)"
                );
                SessionState {
                    session_id: prior.session_id,
                    start_time: prior.start_time,
                    initial_balance: prior.initial_balance,
                    last_heartbeat: now,
                    symbols,
                    status: SessionStatus::Running,
                    end_reason: None,
                }
            }
            Some(prior) => {
                info!(session_id = %prior.session_id, "prior session exited cleanly; minting new session id");
                Self::fresh(initial_balance, symbols, now)
            }
            None => {
                info!("no prior session state found; minting new session id");
                Self::fresh(initial_balance, symbols, now)
            }
        };

        Self { path, state }
    }

    fn fresh(initial_balance: f64, symbols: Vec<String>, now: i64) -> SessionState {
        SessionState {
            session_id: Uuid::new_v4().to_string(),
            start_time: now,
            initial_balance,
            last_heartbeat: now,
            symbols,
            status: SessionStatus::Running,
            end_reason: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    /// Update the heartbeat timestamp and persist, called periodically by
    /// the orchestrator's heartbeat task.
    pub fn heartbeat(&mut self, now: i64) -> Result<(), ConfigError> {
        self.state.last_heartbeat = now;
        self.state.status = SessionStatus::Running;
        self.persist()
    }

    /// Mark the session stopped with a reason and persist — e.g. `"Shutdown"`
    /// for a clean operator-initiated stop, `"Emergency"` for an
    /// emergency-drawdown flatten.
    pub fn mark_stopped(&mut self, now: i64, reason: impl Into<String>) -> Result<(), ConfigError> {
        self.state.last_heartbeat = now;
        self.state.status = SessionStatus::Stopped;
        self.state.end_reason = Some(reason.into());
        self.persist()
    }

    fn persist(&self) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(&self.state)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_with_no_prior_file_mints_running_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_state");
        let session = Session::bootstrap(&path, 10_000.0, vec!["EURUSD".into()], 1000);
        assert_eq!(session.status(), SessionStatus::Running);
        assert!(!session.session_id().is_empty());
    }

    #[test]
    fn bootstrap_recovers_session_id_when_prior_status_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_state");

        let mut first = Session::bootstrap(&path, 10_000.0, vec!["EURUSD".into()], 1000);
        first.heartbeat(1050).unwrap();
        let first_id = first.session_id().to_string();

        let second = Session::bootstrap(&path, 10_000.0, vec!["EURUSD".into()], 2000);
        assert_eq!(second.session_id(), first_id);
        assert_eq!(second.status(), SessionStatus::Running);
    }

    #[test]
    fn bootstrap_mints_new_id_when_prior_status_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_state");

        let mut first = Session::bootstrap(&path, 10_000.0, vec!["EURUSD".into()], 1000);
        first.mark_stopped(1100, "Shutdown").unwrap();
        let first_id = first.session_id().to_string();

        let second = Session::bootstrap(&path, 10_000.0, vec!["EURUSD".into()], 2000);
        assert_ne!(second.session_id(), first_id);
        assert_eq!(second.status(), SessionStatus::Running);
    }

    #[test]
    fn mark_stopped_persists_end_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_state");
        let mut session = Session::bootstrap(&path, 10_000.0, vec!["EURUSD".into()], 1000);
        session.mark_stopped(1500, "Emergency").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let reloaded: SessionState = serde_json::from_str(&content).unwrap();
        assert_eq!(reloaded.status, SessionStatus::Stopped);
        assert_eq!(reloaded.end_reason.as_deref(), Some("Emergency"));
    }

    #[test]
    fn heartbeat_persists_updated_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_state");
        let mut session = Session::bootstrap(&path, 10_000.0, vec!["EURUSD".into()], 1000);
        session.heartbeat(1234).unwrap();
        assert_eq!(session.state.last_heartbeat, 1234);

        let content = std::fs::read_to_string(&path).unwrap();
        let reloaded: SessionState = serde_json::from_str(&content).unwrap();
        assert_eq!(reloaded.last_heartbeat, 1234);
    }
}
