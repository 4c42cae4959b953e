//! Shared HTTP session for network-backed sources.
//!
//! One `reqwest::blocking::Client` is built lazily on first use and shared by
//! every worker. A connection failure invalidates it so the next request
//! builds a fresh client.

use reqwest::blocking::Client;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug)]
pub struct Session {
    client: Mutex<Option<Client>>,
    timeout: Duration,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Session {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Mutex::new(None),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Client>> {
        // A panic while holding the lock cannot leave the Option half-written.
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The shared client, building it if needed. `None` if it cannot be built.
    pub fn client(&self) -> Option<Client> {
        let mut slot = self.lock();
        if slot.is_none() {
            match Client::builder()
                .timeout(self.timeout)
                .user_agent(USER_AGENT)
                .build()
            {
                Ok(client) => {
                    debug!("http session initialized");
                    *slot = Some(client);
                }
                Err(e) => {
                    warn!(error = %e, "failed to initialize http session");
                    return None;
                }
            }
        }
        slot.clone()
    }

    /// Drop the current client; the next [`Session::client`] call rebuilds it.
    pub fn invalidate(&self) {
        if self.lock().take().is_some() {
            debug!("http session invalidated");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_init_and_invalidate() {
        let session = Session::default();
        assert!(!session.is_initialized());
        assert!(session.client().is_some());
        assert!(session.is_initialized());
        session.invalidate();
        assert!(!session.is_initialized());
        assert!(session.client().is_some());
    }
}
