//! Shared fixtures: an in-process server over `tokio::io::duplex` with a
//! channel-backed one-time-code path, plus client-side login helpers.

// each test binary uses a different subset of these helpers
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

use hearth_server::otp::OtpSender;
use hearth_server::registry::SharedState;
use hearth_server::session;
use hearth_shared::identity::DeviceIdentity;
use hearth_shared::types::UserId;
use hearth_store::{DataLayout, LocalInfoFile};

use hearth_device::auth::{authenticate, OtpPrompt};
use hearth_device::commands::DeviceSession;
use hearth_device::error::DeviceError;
use hearth_device::keystore::KeyParamsStore;

pub const REFERENCE_BYTES: &[u8] = b"hearth device reference artifact v1";

/// Delivery channel that hands each generated code straight to the test.
#[derive(Clone)]
pub struct ChannelOtp {
    tx: std::sync::mpsc::Sender<String>,
}

impl OtpSender for ChannelOtp {
    async fn deliver(&self, _user: &UserId, code: &str) {
        self.tx.send(code.to_string()).expect("test still listening");
    }
}

/// Echoes every delivered code back verbatim; never retries.
pub struct EchoPrompt {
    pub rx: std::sync::mpsc::Receiver<String>,
}

impl OtpPrompt for EchoPrompt {
    fn code(&mut self) -> String {
        self.rx.recv().expect("code delivered")
    }

    fn retry(&mut self) -> bool {
        false
    }
}

/// Corrupts the first delivered code, echoes the rest; always retries.
pub struct RetryPrompt {
    pub rx: std::sync::mpsc::Receiver<String>,
    pub calls: usize,
}

impl OtpPrompt for RetryPrompt {
    fn code(&mut self) -> String {
        let code = self.rx.recv().expect("code delivered");
        self.calls += 1;
        if self.calls == 1 {
            corrupt(&code)
        } else {
            code
        }
    }

    fn retry(&mut self) -> bool {
        true
    }
}

/// Flip the first digit so the code is guaranteed not to match.
pub fn corrupt(code: &str) -> String {
    let mut chars: Vec<char> = code.chars().collect();
    chars[0] = if chars[0] == '0' { '1' } else { '0' };
    chars.into_iter().collect()
}

pub struct TestServer {
    pub state: Arc<SharedState>,
    pub localinfo: Arc<LocalInfoFile>,
    pub dir: TempDir,
    identities: Mutex<HashMap<String, DeviceIdentity>>,
}

impl TestServer {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());

        let reference_path = dir.path().join("reference.bin");
        std::fs::write(&reference_path, REFERENCE_BYTES).unwrap();
        let localinfo = LocalInfoFile::new(&layout, "operator-secret");
        localinfo
            .create(reference_path.to_str().unwrap())
            .unwrap();

        Self {
            state: Arc::new(SharedState::new(Vec::new(), Vec::new())),
            localinfo: Arc::new(localinfo),
            dir,
            identities: Mutex::new(HashMap::new()),
        }
    }

    /// The stable identity for a test user, generated on first use.
    pub fn identity_for(&self, user: &str) -> DeviceIdentity {
        self.identities
            .lock()
            .unwrap()
            .entry(user.to_string())
            .or_insert_with(DeviceIdentity::generate)
            .clone()
    }

    /// Spawn one server connection; returns the client stream, the codes
    /// channel and the connection task.
    pub fn connect(&self) -> (DuplexStream, std::sync::mpsc::Receiver<String>, JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        let (tx, rx) = std::sync::mpsc::channel();

        let state = Arc::clone(&self.state);
        let localinfo = Arc::clone(&self.localinfo);
        let handle = tokio::spawn(session::handle_connection(
            server,
            state,
            Arc::new(ChannelOtp { tx }),
            localinfo,
        ));
        (client, rx, handle)
    }

    /// Full handshake for `user:device`, echoing the delivered code.
    pub async fn login(
        &self,
        user: &str,
        device: &str,
    ) -> Result<(DeviceSession<DuplexStream>, JoinHandle<()>), DeviceError> {
        let (mut client, rx, handle) = self.connect();
        let identity = self.identity_for(user);

        authenticate(
            &mut client,
            &identity,
            &UserId::from(user),
            device,
            REFERENCE_BYTES,
            &mut EchoPrompt { rx },
        )
        .await?;

        let params = KeyParamsStore::new(self.dir.path().join(format!("{user}_params")));
        Ok((DeviceSession::new(client, identity, params), handle))
    }
}
