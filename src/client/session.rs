//! Scoped connection guard

use std::ops::Deref;
use tracing::warn;

use super::DysonMqttClient;
use crate::error::ClientResult;

/// Connected scope over a [`DysonMqttClient`]
///
/// Created by [`DysonMqttClient::session`], which connects first. The
/// guard disconnects exactly once when it goes out of scope, whether the
/// scope ends normally, through `?`, or by unwinding. Use [`Session::close`]
/// to observe the disconnect result instead of having it logged.
#[must_use = "dropping the session disconnects immediately"]
pub struct Session<'a> {
    client: &'a DysonMqttClient,
    open: bool,
}

impl<'a> Session<'a> {
    pub(super) fn open(client: &'a DysonMqttClient) -> ClientResult<Self> {
        client.connect()?;
        Ok(Self { client, open: true })
    }

    /// Disconnect now and report the outcome
    pub fn close(mut self) -> ClientResult<()> {
        self.open = false;
        self.client.disconnect()
    }
}

impl Deref for Session<'_> {
    type Target = DysonMqttClient;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.client.disconnect() {
            warn!(error = %e, "Disconnect on session exit failed");
        }
    }
}
