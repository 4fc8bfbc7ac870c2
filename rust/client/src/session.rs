use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ChainConfig;
use crate::engine::DexEngine;
use crate::utils::{felt_to_hex, format_chain_id};
use crate::wallet::{ConnectionKey, WalletConnection, WalletSigner, WalletTransport};

pub const WALLET_NOT_CONNECTED: &str = "Wallet not connected.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkPhase {
    Disconnected,
    Initializing,
    Ready,
    Error,
}

/// Snapshot consumed by the UI layer. Only the constructors below build one,
/// so engine and signer are either both present (ready) or both absent.
#[derive(Debug)]
pub struct SdkState<S> {
    phase: SdkPhase,
    engine: Option<Arc<DexEngine<S>>>,
    signer: Option<Arc<S>>,
    error: Option<String>,
}

impl<S> Clone for SdkState<S> {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            engine: self.engine.clone(),
            signer: self.signer.clone(),
            error: self.error.clone(),
        }
    }
}

impl<S> SdkState<S> {
    pub fn disconnected() -> Self {
        Self {
            phase: SdkPhase::Disconnected,
            engine: None,
            signer: None,
            error: Some(WALLET_NOT_CONNECTED.to_string()),
        }
    }

    pub fn initializing() -> Self {
        Self {
            phase: SdkPhase::Initializing,
            engine: None,
            signer: None,
            error: None,
        }
    }

    pub fn ready(engine: Arc<DexEngine<S>>, signer: Arc<S>) -> Self {
        Self {
            phase: SdkPhase::Ready,
            engine: Some(engine),
            signer: Some(signer),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            phase: SdkPhase::Error,
            engine: None,
            signer: None,
            error: Some(reason.into()),
        }
    }

    pub fn phase(&self) -> SdkPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == SdkPhase::Ready
    }

    pub fn is_loading(&self) -> bool {
        self.phase == SdkPhase::Initializing
    }

    pub fn engine(&self) -> Option<&Arc<DexEngine<S>>> {
        self.engine.as_ref()
    }

    pub fn signer(&self) -> Option<&Arc<S>> {
        self.signer.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

type Initialized<S> = (Arc<DexEngine<S>>, Arc<S>);

struct Inner<W: WalletTransport> {
    connection: WalletConnection<W>,
    generation: u64,
    in_flight: Option<(u64, ConnectionKey)>,
    ready_for: Option<ConnectionKey>,
    failed_for: Option<ConnectionKey>,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared<W: WalletTransport> {
    config: ChainConfig,
    inner: Mutex<Inner<W>>,
    state_tx: watch::Sender<SdkState<W::Signer>>,
}

pub struct SdkController<W: WalletTransport> {
    shared: Arc<Shared<W>>,
}

impl<W: WalletTransport> Clone for SdkController<W> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<W: WalletTransport> SdkController<W> {
    pub fn new(config: ChainConfig) -> Self {
        let (state_tx, _) = watch::channel(SdkState::disconnected());
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(Inner {
                    connection: WalletConnection::disconnected(),
                    generation: 0,
                    in_flight: None,
                    ready_for: None,
                    failed_for: None,
                    tasks: Vec::new(),
                }),
                state_tx,
            }),
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.shared.config
    }

    pub fn snapshot(&self) -> SdkState<W::Signer> {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SdkState<W::Signer>> {
        self.shared.state_tx.subscribe()
    }

    /// Feeds a wallet connection event. Must be called inside a Tokio runtime.
    pub fn connection_changed(&self, connection: WalletConnection<W>) {
        let mut inner = self.shared.lock();
        let previous = inner.connection.key();
        let same_transport = match (&inner.connection.transport, &connection.transport) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            _ => false,
        };
        inner.connection = connection;
        let Some(key) = inner.connection.key() else {
            if previous.is_some() || inner.in_flight.is_some() {
                info!("wallet disconnected");
            }
            inner.generation += 1;
            inner.in_flight = None;
            inner.ready_for = None;
            inner.failed_for = None;
            self.shared.publish(SdkState::disconnected());
            return;
        };

        if inner.in_flight.is_some() {
            debug!(account = %felt_to_hex(key.account), "initialization in flight, event dropped");
            return;
        }
        if inner.ready_for == Some(key) {
            debug!("already ready for this connection");
            return;
        }
        if inner.failed_for == Some(key) && same_transport {
            debug!("initialization already failed for this connection");
            return;
        }
        self.shared.start_attempt(&mut inner, key);
    }

    pub fn retry(&self) {
        let mut inner = self.shared.lock();
        let Some(key) = inner.connection.key() else {
            return;
        };
        if inner.in_flight.is_some() || inner.ready_for == Some(key) {
            return;
        }
        inner.failed_for = None;
        self.shared.start_attempt(&mut inner, key);
    }

    pub async fn wait_idle(&self) {
        loop {
            let next = self.shared.lock().tasks.pop();
            match next {
                Some(handle) => {
                    if let Err(err) = handle.await {
                        warn!(error = %err, "initialization task ended abnormally");
                    }
                }
                None => return,
            }
        }
    }
}

impl<W: WalletTransport> Shared<W> {
    fn lock(&self) -> MutexGuard<'_, Inner<W>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: SdkState<W::Signer>) {
        self.state_tx.send_replace(state);
    }

    fn start_attempt(self: &Arc<Self>, inner: &mut Inner<W>, key: ConnectionKey) {
        let Some(transport) = inner.connection.transport.clone() else {
            return;
        };
        inner.generation += 1;
        let generation = inner.generation;
        inner.in_flight = Some((generation, key));
        inner.ready_for = None;
        inner.failed_for = None;
        inner.tasks.retain(|task| !task.is_finished());
        info!(
            account = %felt_to_hex(key.account),
            chain_id = %format_chain_id(key.chain_id),
            generation,
            "initializing DEX engine"
        );
        self.publish(SdkState::initializing());

        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = initialize(&shared.config, transport.as_ref(), key).await;
            shared.finish(generation, key, result);
        });
        inner.tasks.push(handle);
    }

    fn finish(
        self: &Arc<Self>,
        generation: u64,
        key: ConnectionKey,
        result: Result<Initialized<W::Signer>, String>,
    ) {
        let mut inner = self.lock();
        if inner.in_flight == Some((generation, key)) {
            inner.in_flight = None;
            if inner.connection.key() == Some(key) {
                match result {
                    Ok((engine, signer)) => {
                        info!(generation, "DEX engine ready");
                        inner.ready_for = Some(key);
                        self.publish(SdkState::ready(engine, signer));
                    }
                    Err(reason) => {
                        error!(generation, reason = %reason, "initialization failed");
                        inner.failed_for = Some(key);
                        self.publish(SdkState::failed(reason));
                    }
                }
                return;
            }
        }

        debug!(generation, "discarding stale initialization result");
        if inner.in_flight.is_some() {
            return;
        }
        let Some(current) = inner.connection.key() else {
            return;
        };
        if inner.ready_for != Some(current) && inner.failed_for != Some(current) {
            self.start_attempt(&mut inner, current);
        }
    }
}

async fn initialize<W: WalletTransport>(
    config: &ChainConfig,
    transport: &W,
    key: ConnectionKey,
) -> Result<Initialized<W::Signer>, String> {
    let reported = transport
        .chain_id()
        .await
        .map_err(|err| format!("Failed to query network: {}", err.user_message()))?;
    for actual in [key.chain_id, reported] {
        if actual != config.chain_id {
            return Err(format!(
                "Incorrect Network: Please connect to {} (ID {}). Connected to {}.",
                config.chain_name,
                format_chain_id(config.chain_id),
                format_chain_id(actual)
            ));
        }
    }

    let signer = transport
        .signer_for(key.account, key.chain_id)
        .await
        .map_err(|err| format!("Failed to create signer: {}", err.user_message()))?
        .ok_or_else(|| "Failed to create signer from wallet connection.".to_string())?;
    if signer.address() != key.account {
        return Err(format!(
            "Signer address mismatch: expected {}, got {}.",
            felt_to_hex(key.account),
            felt_to_hex(signer.address())
        ));
    }
    if signer.chain_id() != config.chain_id {
        return Err(format!(
            "Signer is bound to chain {}, expected {}.",
            format_chain_id(signer.chain_id()),
            format_chain_id(config.chain_id)
        ));
    }

    let signer = Arc::new(signer);
    let engine = DexEngine::new(config.chain_name.clone(), signer.clone(), config.deployment())
        .with_retry(config.retry.clone());

    match signer.block_number().await {
        Ok(block) => debug!(block, "rpc reachable"),
        Err(err) => warn!(error = %err, "liveness check failed, continuing"),
    }
    Ok((Arc::new(engine), signer))
}
