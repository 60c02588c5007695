use std::io::ErrorKind;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::StartupError;
use crate::store::StoreLifecycle;

/// Startup progress. Updates are only processed once `Running` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    StorageChecked,
    ListenerBound,
    Running,
    Failed,
}

/// Sequences the readiness checks that must pass before ingestion starts.
pub struct Bootstrapper {
    phase: Phase,
    server: ServerConfig,
}

impl Bootstrapper {
    pub fn new(server: ServerConfig) -> Self {
        Self {
            phase: Phase::Init,
            server,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Confirm the store answers and that its tables exist.
    pub async fn check_storage(&mut self, store: &dyn StoreLifecycle) -> Result<(), StartupError> {
        self.require_phase(Phase::Init)?;

        if let Err(e) = store.ping().await {
            return self.fail(StartupError::StorageUnreachable(e));
        }
        info!("Storage is reachable");

        if let Err(e) = store.verify_schema().await {
            return self.fail(StartupError::SchemaMissing(e));
        }
        info!("Storage schema verified");

        self.phase = Phase::StorageChecked;
        Ok(())
    }

    /// Bind the API listener, moving up from the configured port while it is
    /// taken. Returns the listener and the port actually bound.
    pub async fn bind_listener(&mut self) -> Result<(TcpListener, u16), StartupError> {
        self.require_phase(Phase::StorageChecked)?;

        let bound = bind_with_fallback(
            &self.server.host,
            self.server.port,
            self.server.max_port_attempts,
        )
        .await;

        match bound {
            Ok((listener, port)) => {
                info!("API listening on {}:{}", self.server.host, port);
                self.phase = Phase::ListenerBound;
                Ok((listener, port))
            }
            Err(e) => self.fail(e),
        }
    }

    pub fn mark_running(&mut self) -> Result<(), StartupError> {
        self.require_phase(Phase::ListenerBound)?;
        self.phase = Phase::Running;
        Ok(())
    }

    fn require_phase(&mut self, expected: Phase) -> Result<(), StartupError> {
        if self.phase != expected {
            let actual = self.phase;
            return self.fail(StartupError::OutOfOrder { expected, actual });
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: StartupError) -> Result<T, StartupError> {
        self.phase = Phase::Failed;
        Err(err)
    }
}

/// Bind `host:start`, trying each following port while the current one is
/// in use. `max_attempts == 0` keeps going until the port range runs out.
pub async fn bind_with_fallback(
    host: &str,
    start: u16,
    max_attempts: u32,
) -> Result<(TcpListener, u16), StartupError> {
    let mut port = start;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                let bound = listener
                    .local_addr()
                    .map_err(|source| StartupError::Bind {
                        host: host.to_string(),
                        port,
                        source,
                    })?
                    .port();
                return Ok((listener, bound));
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!("Port {} is already in use, trying the next one", port);
            }
            Err(source) => {
                return Err(StartupError::Bind {
                    host: host.to_string(),
                    port,
                    source,
                })
            }
        }

        let exhausted = max_attempts != 0 && attempts >= max_attempts;
        match port.checked_add(1) {
            Some(next) if !exhausted => port = next,
            _ => return Err(StartupError::NoPortAvailable { start, attempts }),
        }
    }
}
