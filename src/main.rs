use std::sync::Arc;

use log::{info, warn};
use overlay_core::collaborators::mock::{
    MockBanList, MockConsensusEngine, MockLedger, MockPeerDirectory, MockSurveyManager,
};
use overlay_core::crypto::LocalIdentity;
use overlay_core::session::{Collaborators, DropDirection, PeerSession, Role};
use overlay_core::{Network, OverlayConfig, OverlayMetrics};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Arc::new(OverlayConfig::default());
    let identity = Arc::new(LocalIdentity::generate());
    let network = Arc::new(Network::public_network());
    let metrics = Arc::new(OverlayMetrics::new());

    let listener = TcpListener::bind("0.0.0.0:11625").await?;
    info!("overlay-core listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        info!("accepted connection from {peer_addr}");

        let config = config.clone();
        let identity = identity.clone();
        let network = network.clone();
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let collaborators = Collaborators {
                ban_list: Arc::new(MockBanList::default()),
                peer_directory: Arc::new(MockPeerDirectory::default()),
                consensus_engine: Arc::new(MockConsensusEngine::default()),
                ledger: Arc::new(MockLedger::default()),
                survey_manager: Arc::new(MockSurveyManager::default()),
            };
            let mut session = PeerSession::new(
                stream,
                Role::TheyInitiated,
                identity,
                network,
                config,
                collaborators,
                metrics,
            );
            if let Err(err) = session.run_handshake(11625).await {
                warn!("handshake with {peer_addr} failed: {err}");
                session.fail(err, DropDirection::WeDropped).await;
                return;
            }
            loop {
                if let Err(err) = session.recv_and_dispatch().await {
                    warn!("dropping {peer_addr}: {err}");
                    session.fail(err, DropDirection::WeDropped).await;
                    break;
                }
            }
        });
    }
}
