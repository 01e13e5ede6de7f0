//! Fallback poll for token changes made outside the manager.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::manager::SessionManager;

/// Background poll of the persisted token. Stops when dropped.
#[derive(Debug)]
pub struct TokenWatcher {
    handle: JoinHandle<()>,
}

impl TokenWatcher {
    /// Poll `manager` every `poll_interval` of its config.
    #[must_use]
    pub fn spawn(manager: Arc<SessionManager>) -> Self {
        let period = manager.config().poll_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(?period, "token watcher started");
            loop {
                ticker.tick().await;
                if let Err(err) = manager.poll_once().await {
                    warn!("Token poll failed: {err}");
                }
            }
        });
        Self { handle }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for TokenWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cookie::{MemoryCookieJar, TokenStore};
    use crate::session::manager::tests::{manager_with, FakeApi};
    use crate::session::types::{Credentials, SessionState, TokenChangeSource, TokenEvent};
    use anyhow::Result;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn watcher_notices_external_sign_out() -> Result<()> {
        let api = Arc::new(FakeApi::new());
        let jar = Arc::new(MemoryCookieJar::new());
        let manager = manager_with(&api, &jar);
        manager
            .sign_in(Credentials::new("prof@univ.fr", "hunter2"))
            .await?;
        let mut events = manager.token_events();
        let watcher = TokenWatcher::spawn(manager.clone());

        jar.clear()?;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(watcher.is_running());
        assert_eq!(manager.state(), SessionState::LoggedOut);
        assert_eq!(
            events.recv().await?,
            TokenEvent::Cleared(TokenChangeSource::External)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_watcher_stops_polling() -> Result<()> {
        let api = Arc::new(FakeApi::new());
        let jar = Arc::new(MemoryCookieJar::new());
        let manager = manager_with(&api, &jar);
        manager
            .sign_in(Credentials::new("prof@univ.fr", "hunter2"))
            .await?;

        TokenWatcher::spawn(manager.clone()).stop();
        jar.clear()?;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(manager.state().is_logged_in());
        Ok(())
    }
}
