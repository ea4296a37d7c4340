//! End-to-end demo over the in-memory transport.

use crate::ui;
use osp_types::agent::new_auth_token;
use osp_types::psk::{decode_numeric, encode_numeric};
use osp_types::{AgentConfig, AgentContext, AuthenticationRole, PeerId, PskConfig};
use osp_wire::transport::memory::MemoryNetwork;
use osp_wire::{DataEncoding, DiscoveredAgent, Listener, UnauthenticatedConnection, WireResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn cmd_demo(config: Option<PathBuf>, label: &str, message: &str, wrong_psk: bool) {
    let mut receiver = super::load(config);
    if receiver.display_name.is_empty() {
        receiver.display_name = "Living Room TV".to_string();
    }
    let sender = AgentConfig {
        display_name: "ospctl".to_string(),
        psk: PskConfig {
            ease_of_input: PskConfig::MAX_EASE_OF_INPUT,
            min_entropy_bits: PskConfig::MIN_ENTROPY_BITS,
        },
        ..Default::default()
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start runtime: {e}"));
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run(receiver, sender, label, message, wrong_psk)) {
        ui::error_with_fix(
            &format!("Demo failed: {e}"),
            "run with RUST_LOG=osp_wire=debug for protocol details",
        );
        std::process::exit(1);
    }
}

async fn run(
    receiver: AgentConfig,
    sender: AgentConfig,
    label: &str,
    message: &str,
    wrong_psk: bool,
) -> WireResult<()> {
    let receiver = Arc::new(AgentContext::new(&receiver, PeerId::from_spki(b"demo-receiver"))?);
    let sender = Arc::new(AgentContext::new(&sender, PeerId::from_spki(b"demo-sender"))?);
    let network = MemoryNetwork::new();
    let cancel = CancellationToken::new();

    let listener = Listener::start(
        receiver.clone(),
        Box::new(network.listen(receiver.peer_id().clone())),
    );
    let records = receiver.advertisement(&new_auth_token())?.to_vec();
    ui::section("Discovery");
    for record in &records {
        ui::kv("TXT", record);
    }

    let discovered = DiscoveredAgent::from_txt(receiver.info().display_name.clone(), &records)?;
    let dialer = network.dialer(sender.peer_id().clone());
    let (outbound, inbound) = tokio::join!(
        discovered.dial(sender.clone(), &dialer, &cancel),
        listener.accept(&cancel)
    );
    let (outbound, inbound) = (outbound?, inbound?);

    let (presenter, consumer, presenter_name) = match inbound.authentication_role() {
        Some(AuthenticationRole::Presenter) => (inbound, outbound, &receiver.info().display_name),
        _ => (outbound, inbound, &sender.info().display_name),
    };
    ui::section("Authentication");
    ui::kv("Presenter", presenter_name);

    let psk = presenter.generate_psk();
    let code = encode_numeric(&psk)?;
    ui::kv_ok("Code", &code);
    let mut entered = decode_numeric(&code)?;
    if wrong_psk {
        entered[entered.len() - 1] ^= 1;
    }

    let (presented, consumed) = tokio::join!(
        present(&presenter, &psk, &cancel),
        consume(&consumer, &entered, &cancel)
    );
    let (conn, peer) = (presented?, consumed?);
    ui::kv(
        "Secret",
        &conn.shared_secret_fingerprint().unwrap_or_default(),
    );

    ui::section("Data channel");
    let channel = conn.open_data_channel(label, "", None).await?;
    let accepted = peer.accept_data_channel(&cancel).await?;
    channel.send(message.as_bytes(), DataEncoding::Text).await?;
    if let Some((payload, _)) = accepted.receive().await? {
        ui::kv(accepted.label(), &String::from_utf8_lossy(&payload));
    }

    conn.close().await;
    listener.close().await;
    info!("Demo finished");
    ui::success("Agents connected, authenticated and exchanged data");
    Ok(())
}

async fn present(
    conn: &UnauthenticatedConnection,
    psk: &[u8],
    cancel: &CancellationToken,
) -> WireResult<osp_wire::Connection> {
    conn.accept_authenticate(cancel).await?;
    conn.authenticate_psk(psk, cancel).await
}

async fn consume(
    conn: &UnauthenticatedConnection,
    psk: &[u8],
    cancel: &CancellationToken,
) -> WireResult<osp_wire::Connection> {
    conn.request_authenticate_psk()?;
    conn.authenticate_psk(psk, cancel).await
}
