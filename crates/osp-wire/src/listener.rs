//! Inbound and outbound connection setup.
//!
//! A [`Listener`] turns every connection accepted by a [`NetworkListener`]
//! into an [`UnauthenticatedConnection`] whose info exchange has finished.
//! [`DiscoveredAgent::dial`] does the same for the dialing side.

use crate::connection::UnauthenticatedConnection;
use crate::error::{WireError, WireResult};
use crate::transport::{NetworkConnection, NetworkDialer, NetworkListener};
use osp_types::txt::TxtRecords;
use osp_types::{AgentContext, ConnectionRole, PeerId, TypesError};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accepts inbound connections and runs their info exchange.
pub struct Listener {
    network: Arc<dyn NetworkListener>,
    shutdown: CancellationToken,
    ready: Mutex<mpsc::Receiver<UnauthenticatedConnection>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// Start accepting on `network`. Must be called from within a tokio
    /// runtime.
    pub fn start(ctx: Arc<AgentContext>, network: Box<dyn NetworkListener>) -> Self {
        let network: Arc<dyn NetworkListener> = Arc::from(network);
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);

        let task = tokio::spawn(run_accept_loop(
            ctx,
            network.clone(),
            tx,
            shutdown.clone(),
        ));
        Self {
            network,
            shutdown,
            ready: Mutex::new(rx),
            task: Mutex::new(Some(task)),
        }
    }

    /// Wait for the next inbound connection whose info exchange completed.
    pub async fn accept(&self, cancel: &CancellationToken) -> WireResult<UnauthenticatedConnection> {
        let mut ready = tokio::select! {
            _ = cancel.cancelled() => return Err(WireError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(WireError::Closed),
            ready = self.ready.lock() => ready,
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(WireError::Cancelled),
            _ = self.shutdown.cancelled() => Err(WireError::Closed),
            conn = ready.recv() => conn.ok_or(WireError::Closed),
        }
    }

    /// Stop accepting and close connections nobody has picked up yet.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().await.take();
        let Some(task) = task else {
            return;
        };
        self.network.close().await;
        if let Err(e) = task.await {
            warn!(error = %e, "OSP: listener task failed");
        }

        let mut ready = self.ready.lock().await;
        ready.close();
        while let Ok(conn) = ready.try_recv() {
            conn.close().await;
        }
        info!("OSP: listener closed");
    }
}

async fn run_accept_loop(
    ctx: Arc<AgentContext>,
    network: Arc<dyn NetworkListener>,
    ready: mpsc::Sender<UnauthenticatedConnection>,
    shutdown: CancellationToken,
) {
    let mut pending = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = network.accept() => match accepted {
                Ok(conn) => {
                    debug!(remote = %conn.remote_peer_id(), "OSP: inbound connection");
                    pending.spawn(admit(ctx.clone(), conn, ready.clone(), shutdown.clone()));
                }
                Err(e) => {
                    if !shutdown.is_cancelled() {
                        warn!(error = %e, "OSP: accept failed, listener stopping");
                    }
                    break;
                }
            },
            Some(_) = pending.join_next(), if !pending.is_empty() => {}
        }
    }
    // Exchanges still running see the shutdown and close their connections.
    shutdown.cancel();
    while pending.join_next().await.is_some() {}
}

async fn admit(
    ctx: Arc<AgentContext>,
    network: Box<dyn NetworkConnection>,
    ready: mpsc::Sender<UnauthenticatedConnection>,
    shutdown: CancellationToken,
) {
    let conn = match UnauthenticatedConnection::new(ctx, network, ConnectionRole::Responder) {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "OSP: could not start inbound connection");
            return;
        }
    };
    let exchange = match conn.exchange_info() {
        Ok(Some(exchange)) => exchange,
        Ok(None) => return,
        Err(e) => {
            debug!(conn = %conn.id(), error = %e, "OSP: inbound connection closed early");
            return;
        }
    };
    if let Err(e) = exchange.wait(&shutdown).await {
        debug!(conn = %conn.id(), error = %e, "OSP: inbound info exchange failed");
        conn.close_with_error(e).await;
        return;
    }

    tokio::select! {
        _ = shutdown.cancelled() => {
            conn.close().await;
        }
        sent = ready.send(conn.clone()) => {
            if sent.is_err() {
                conn.close().await;
            }
        }
    }
}

/// A peer found through discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAgent {
    nickname: String,
    peer_id: PeerId,
    txt: TxtRecords,
}

impl DiscoveredAgent {
    pub fn new(nickname: impl Into<String>, peer_id: PeerId, txt: TxtRecords) -> Self {
        Self {
            nickname: nickname.into(),
            peer_id,
            txt,
        }
    }

    /// Build from raw `key=value` TXT strings. The peer id comes from `fp`.
    pub fn from_txt<S: AsRef<str>>(nickname: impl Into<String>, records: &[S]) -> WireResult<Self> {
        let txt = TxtRecords::from_slice(records)?;
        let peer_id = PeerId::from_fingerprint(txt.get_one("fp")?);
        Ok(Self::new(nickname, peer_id, txt))
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn txt(&self) -> &TxtRecords {
        &self.txt
    }

    /// The advertised auth-initiation token, if any.
    pub fn auth_token(&self) -> Option<&str> {
        self.txt.get("at").first().map(String::as_str)
    }

    /// Dial this agent, check its identity and run the info exchange.
    pub async fn dial(
        &self,
        ctx: Arc<AgentContext>,
        dialer: &dyn NetworkDialer,
        cancel: &CancellationToken,
    ) -> WireResult<UnauthenticatedConnection> {
        let fingerprint = self.txt.get_one("fp")?;
        self.txt.get_one("sn")?;

        let network = tokio::select! {
            _ = cancel.cancelled() => return Err(WireError::Cancelled),
            network = dialer.dial(self) => network?,
        };
        if network.remote_peer_id().as_str() != fingerprint {
            warn!(
                nickname = %self.nickname,
                advertised = fingerprint,
                presented = %network.remote_peer_id(),
                "OSP: peer certificate does not match advertised fingerprint"
            );
            network.close().await;
            return Err(TypesError::FingerprintMismatch(fingerprint.to_string()).into());
        }

        let conn = UnauthenticatedConnection::with_auth_token(
            ctx,
            network,
            ConnectionRole::Initiator,
            self.auth_token().map(str::to_string),
        )?;
        let exchange = conn
            .exchange_info()?
            .ok_or_else(|| WireError::Protocol("info exchange already pending".to_string()))?;
        match exchange.wait(cancel).await {
            Ok(role) => {
                info!(nickname = %self.nickname, %role, "OSP: connected to agent");
                Ok(conn)
            }
            Err(e) => {
                conn.close_with_error(e.clone()).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_txt() {
        let fp = PeerId::from_spki(b"tv-cert");
        let records = vec![
            format!("fp={fp}"),
            "sn=AQ".to_string(),
            "at=abc+/=xyz".to_string(),
        ];
        let agent = DiscoveredAgent::from_txt("Living Room", &records).unwrap();
        assert_eq!(agent.nickname(), "Living Room");
        assert_eq!(agent.peer_id(), &fp);
        assert_eq!(agent.auth_token(), Some("abc+/=xyz"));
    }

    #[test]
    fn test_from_txt_requires_fingerprint() {
        let err = DiscoveredAgent::from_txt("tv", &["sn=AQ"]).unwrap_err();
        assert!(matches!(err, WireError::Types(TypesError::TxtRecord(_))));
    }
}
