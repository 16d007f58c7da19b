//! In-memory fakes for snapclient tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use source_hub_types::ServerDescriptor;

use super::discovery::ServerBrowser;
use super::process::{ClientProcess, ProcessError, StopOutcome};

#[derive(Debug)]
pub(crate) struct FakeProcessState {
    pub events: Vec<String>,
    pub running: bool,
    pub fail_start: bool,
    pub executable_ok: bool,
    pub next_pid: u32,
    pub pid: Option<u32>,
}

/// Records `start:<host>` / `stop` calls; liveness is controlled by the test.
#[derive(Clone)]
pub(crate) struct FakeProcess {
    pub state: Arc<Mutex<FakeProcessState>>,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeProcessState {
                events: Vec::new(),
                running: false,
                fail_start: false,
                executable_ok: true,
                next_pid: 4000,
                pid: None,
            })),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    pub fn alive(&self) -> bool {
        self.state.lock().unwrap().running
    }

    /// Simulate the process dying behind the supervisor's back.
    pub fn crash(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.pid = None;
    }

    /// Simulate a process appearing without a start call.
    pub fn spawn_stray(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = true;
        state.pid = Some(9999);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn set_executable_ok(&self, ok: bool) {
        self.state.lock().unwrap().executable_ok = ok;
    }
}

#[async_trait]
impl ClientProcess for FakeProcess {
    fn check_executable(&self) -> bool {
        self.state.lock().unwrap().executable_ok
    }

    async fn start(&mut self, host: &str, _port: u16) -> Result<u32, ProcessError> {
        let mut state = self.state.lock().unwrap();
        if state.running {
            state.events.push("stop".to_string());
            state.running = false;
            state.pid = None;
        }
        state.events.push(format!("start:{host}"));
        if state.fail_start {
            return Err(ProcessError::ExitedEarly {
                code: Some(1),
                stderr: "fake failure".to_string(),
            });
        }
        state.next_pid += 1;
        let pid = state.next_pid;
        state.running = true;
        state.pid = Some(pid);
        Ok(pid)
    }

    async fn stop(&mut self) -> StopOutcome {
        let mut state = self.state.lock().unwrap();
        state.events.push("stop".to_string());
        let outcome = if state.running {
            StopOutcome::Terminated
        } else {
            StopOutcome::NotRunning
        };
        state.running = false;
        state.pid = None;
        outcome
    }

    async fn is_running(&mut self) -> bool {
        self.state.lock().unwrap().running
    }

    fn pid(&self) -> Option<u32> {
        self.state.lock().unwrap().pid
    }
}

/// Returns a fixed (mutable) server list.
#[derive(Clone, Default)]
pub(crate) struct FakeBrowser {
    pub servers: Arc<Mutex<Vec<ServerDescriptor>>>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn with(servers: Vec<ServerDescriptor>) -> Self {
        Self {
            servers: Arc::new(Mutex::new(servers)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, servers: Vec<ServerDescriptor>) {
        *self.servers.lock().unwrap() = servers;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerBrowser for FakeBrowser {
    async fn discover(&self) -> Vec<ServerDescriptor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.servers.lock().unwrap().clone()
    }
}

pub(crate) fn server(host: &str, name: &str) -> ServerDescriptor {
    ServerDescriptor::new(host, name, source_hub_types::DEFAULT_SNAPCAST_PORT)
}
