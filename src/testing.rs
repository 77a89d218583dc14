//! In-memory transport doubles for unit tests

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::connection::TunneledConnection;
use crate::db::{DatabaseTarget, Row};
use crate::error::{MysqlTunnelError, Result};
use crate::ssh::TunnelEndpoint;
use crate::transport::{DatabaseDriver, DatabaseSession, Tunnel, Tunneler};

pub type FakeConnection = TunneledConnection<FakeTunneler, FakeDriver>;

pub fn endpoint() -> TunnelEndpoint {
    TunnelEndpoint::new("bastion.test", "deploy").with_password("ssh-secret")
}

pub fn target() -> DatabaseTarget {
    DatabaseTarget {
        host: "localhost".to_string(),
        port: 3306,
        username: "app".to_string(),
        password: "db-secret".to_string(),
        database: "shop".to_string(),
    }
}

/// A fake-backed connection plus the state shared with its fakes
pub fn fake_connection() -> (FakeConnection, FakeState) {
    let state = FakeState::default();
    let conn = TunneledConnection::with_transport(
        endpoint(),
        target(),
        FakeTunneler(state.clone()),
        FakeDriver(state.clone()),
    )
    .expect("valid test configuration");
    (conn, state)
}

#[derive(Default)]
struct Inner {
    next_port: AtomicU16,
    fail_tunnel: AtomicBool,
    tunnel_severed: AtomicBool,
    tunnels_opened: AtomicUsize,
    tunnels_stopped: AtomicUsize,
    session_epoch: AtomicU64,
    session_open_failures: AtomicU32,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    execution_failures: AtomicU32,
    affected: AtomicU64,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    executions: Mutex<Vec<(String, Vec<Value>)>>,
    teardown: Mutex<Vec<&'static str>>,
}

/// Knobs and counters shared between a test and its fakes
#[derive(Clone, Default)]
pub struct FakeState(Arc<Inner>);

impl FakeState {
    pub fn fail_tunnel(&self, fail: bool) {
        self.0.fail_tunnel.store(fail, Ordering::SeqCst);
    }

    /// Make the forward stop carrying traffic, as if SSH dropped
    pub fn sever_tunnel(&self) {
        self.0.tunnel_severed.store(true, Ordering::SeqCst);
    }

    /// Kill every session opened so far
    pub fn drop_session(&self) {
        self.0.session_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_session_opens(&self, count: u32) {
        self.0.session_open_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_executions(&self, count: u32) {
        self.0.execution_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_affected(&self, affected: u64) {
        self.0.affected.store(affected, Ordering::SeqCst);
    }

    pub fn tunnels_opened(&self) -> usize {
        self.0.tunnels_opened.load(Ordering::SeqCst)
    }

    pub fn tunnels_stopped(&self) -> usize {
        self.0.tunnels_stopped.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.0.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.0.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.0.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.0.rollbacks.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.0.executions.lock().unwrap().len()
    }

    pub fn last_execution(&self) -> Option<(String, Vec<Value>)> {
        self.0.executions.lock().unwrap().last().cloned()
    }

    pub fn teardown_order(&self) -> Vec<&'static str> {
        self.0.teardown.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn record(&self, query: &str, params: &[Value]) -> Result<()> {
        self.0
            .executions
            .lock()
            .unwrap()
            .push((query.to_string(), params.to_vec()));
        if Self::take_failure(&self.0.execution_failures) {
            return Err(MysqlTunnelError::database(
                "Lost connection to MySQL server during query",
            ));
        }
        Ok(())
    }
}

pub struct FakeTunneler(FakeState);

pub struct FakeTunnel {
    port: u16,
    stopped: bool,
    state: FakeState,
}

#[async_trait]
impl Tunneler for FakeTunneler {
    type Tunnel = FakeTunnel;

    async fn open(
        &self,
        _endpoint: &TunnelEndpoint,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<FakeTunnel> {
        let inner = &self.0 .0;
        if inner.fail_tunnel.load(Ordering::SeqCst) {
            return Err(MysqlTunnelError::connection(format!(
                "Connection refused while forwarding to {}:{}",
                remote_host, remote_port
            )));
        }
        inner.tunnels_opened.fetch_add(1, Ordering::SeqCst);
        inner.tunnel_severed.store(false, Ordering::SeqCst);
        let port = 40_000 + inner.next_port.fetch_add(1, Ordering::SeqCst);
        Ok(FakeTunnel {
            port,
            stopped: false,
            state: self.0.clone(),
        })
    }
}

#[async_trait]
impl Tunnel for FakeTunnel {
    fn local_port(&self) -> u16 {
        self.port
    }

    fn is_active(&self) -> bool {
        !self.stopped && !self.state.0.tunnel_severed.load(Ordering::SeqCst)
    }

    async fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.state.0.tunnels_stopped.fetch_add(1, Ordering::SeqCst);
            self.state.0.teardown.lock().unwrap().push("tunnel");
        }
    }
}

pub struct FakeDriver(FakeState);

pub struct FakeSession {
    epoch: u64,
    state: FakeState,
}

impl FakeSession {
    fn check_alive(&self) -> Result<()> {
        if self.epoch == self.state.0.session_epoch.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MysqlTunnelError::database("MySQL server has gone away"))
        }
    }
}

#[async_trait]
impl DatabaseDriver for FakeDriver {
    type Session = FakeSession;

    async fn open(&self, _target: &DatabaseTarget, _local_port: u16) -> Result<FakeSession> {
        let inner = &self.0 .0;
        if FakeState::take_failure(&inner.session_open_failures) {
            return Err(MysqlTunnelError::database("Access denied for user 'app'"));
        }
        inner.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            epoch: inner.session_epoch.load(Ordering::SeqCst),
            state: self.0.clone(),
        })
    }
}

#[async_trait]
impl DatabaseSession for FakeSession {
    async fn ping(&mut self) -> Result<()> {
        self.check_alive()
    }

    async fn fetch_rows(&mut self, query: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.check_alive()?;
        self.state.record(query, params)?;

        if query.trim().eq_ignore_ascii_case("SELECT 1") {
            let mut row = Row::new();
            row.insert("1".to_string(), json!(1));
            return Ok(vec![row]);
        }
        Ok(Vec::new())
    }

    async fn execute_and_commit(&mut self, query: &str, params: &[Value]) -> Result<u64> {
        self.check_alive()?;
        self.state.record(query, params)?;
        self.state.0.commits.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.0.affected.load(Ordering::SeqCst))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.state.0.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.check_alive()
    }

    async fn close(self) -> Result<()> {
        self.state.0.sessions_closed.fetch_add(1, Ordering::SeqCst);
        self.state.0.teardown.lock().unwrap().push("session");
        self.check_alive()
    }
}
