use std::sync::Arc;
use std::time::{Duration, Instant};

use overlay_core::collaborators::mock::{
    MockBanList, MockConsensusEngine, MockLedger, MockPeerDirectory, MockSurveyManager,
};
use overlay_core::crypto::LocalIdentity;
use overlay_core::session::{Collaborators, ConnectionState, PeerSession, Role};
use overlay_core::wire::messages::TransactionEnvelope;
use overlay_core::{Network, OverlayConfig, OverlayMetrics};

fn collaborators() -> Collaborators {
    Collaborators {
        ban_list: Arc::new(MockBanList::default()),
        peer_directory: Arc::new(MockPeerDirectory::default()),
        consensus_engine: Arc::new(MockConsensusEngine::default()),
        ledger: Arc::new(MockLedger::default()),
        survey_manager: Arc::new(MockSurveyManager::default()),
    }
}

type Session = PeerSession<tokio::io::DuplexStream>;

fn new_pair(
    network: &Arc<Network>,
    config: &Arc<OverlayConfig>,
) -> (Session, Session, Arc<LocalIdentity>, Arc<LocalIdentity>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let a_identity = Arc::new(LocalIdentity::generate());
    let b_identity = Arc::new(LocalIdentity::generate());

    let a = PeerSession::new(
        client,
        Role::WeInitiated,
        a_identity.clone(),
        network.clone(),
        config.clone(),
        collaborators(),
        Arc::new(OverlayMetrics::new()),
    );
    let b = PeerSession::new(
        server,
        Role::TheyInitiated,
        b_identity.clone(),
        network.clone(),
        config.clone(),
        collaborators(),
        Arc::new(OverlayMetrics::new()),
    );
    (a, b, a_identity, b_identity)
}

#[tokio::test]
async fn happy_handshake_reaches_got_auth_on_both_sides() {
    let network = Arc::new(Network::test_network());
    let config = Arc::new(OverlayConfig::default());
    let (mut a, mut b, _ai, _bi) = new_pair(&network, &config);

    let (a_res, b_res) = tokio::join!(a.run_handshake(11625), b.run_handshake(11625));
    a_res.unwrap();
    b_res.unwrap();

    assert_eq!(a.state(), ConnectionState::GotAuth);
    assert_eq!(b.state(), ConnectionState::GotAuth);
}

#[tokio::test]
async fn self_connect_is_detected_when_both_sides_share_an_identity() {
    let network = Arc::new(Network::test_network());
    let config = Arc::new(OverlayConfig::default());
    let (client, server) = tokio::io::duplex(64 * 1024);
    let shared_identity = Arc::new(LocalIdentity::generate());

    let mut a = PeerSession::new(
        client,
        Role::WeInitiated,
        shared_identity.clone(),
        network.clone(),
        config.clone(),
        collaborators(),
        Arc::new(OverlayMetrics::new()),
    );
    let mut b = PeerSession::new(
        server,
        Role::TheyInitiated,
        shared_identity.clone(),
        network.clone(),
        config.clone(),
        collaborators(),
        Arc::new(OverlayMetrics::new()),
    );

    let (a_res, b_res) = tokio::join!(a.run_handshake(11625), b.run_handshake(11625));
    assert!(a_res.is_err() || b_res.is_err());
}

#[tokio::test]
async fn advert_then_demand_fulfills_known_hash_and_counts_unknown() {
    let network = Arc::new(Network::test_network());
    let config = Arc::new(OverlayConfig::default());
    let (client, server) = tokio::io::duplex(64 * 1024);

    let a_consensus = Arc::new(MockConsensusEngine::default());
    let h1 = [1u8; 32];
    let h2 = [2u8; 32];
    a_consensus.insert_transaction(h2, TransactionEnvelope(vec![42, 42]));

    let a_metrics = Arc::new(OverlayMetrics::new());
    let b_metrics = Arc::new(OverlayMetrics::new());

    let mut a = PeerSession::new(
        client,
        Role::WeInitiated,
        Arc::new(LocalIdentity::generate()),
        network.clone(),
        config.clone(),
        Collaborators {
            ban_list: Arc::new(MockBanList::default()),
            peer_directory: Arc::new(MockPeerDirectory::default()),
            consensus_engine: a_consensus,
            ledger: Arc::new(MockLedger::default()),
            survey_manager: Arc::new(MockSurveyManager::default()),
        },
        a_metrics.clone(),
    );
    let mut b = PeerSession::new(
        server,
        Role::TheyInitiated,
        Arc::new(LocalIdentity::generate()),
        network.clone(),
        config.clone(),
        collaborators(),
        b_metrics.clone(),
    );

    let (a_res, b_res) = tokio::join!(a.run_handshake(11625), b.run_handshake(11625));
    a_res.unwrap();
    b_res.unwrap();

    // Drain each side's initial SEND_MORE so both have outbound flood
    // credit before the advert/demand exchange.
    b.recv_and_dispatch().await.unwrap();
    a.recv_and_dispatch().await.unwrap();

    a.advertise(h1).await.unwrap();
    a.advertise(h2).await.unwrap();
    a.flush_advert_batch().await.unwrap();

    b.recv_and_dispatch().await.unwrap();
    a.recv_and_dispatch().await.unwrap();
    b.recv_and_dispatch().await.unwrap();

    use std::sync::atomic::Ordering;
    assert_eq!(a_metrics.flood_fulfilled.load(Ordering::Relaxed), 1);
    assert_eq!(a_metrics.flood_unfulfilled_unknown.load(Ordering::Relaxed), 1);
    assert_eq!(a_metrics.flood_unfulfilled_banned.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn flow_idle_fires_once_no_grant_arrives_within_threshold() {
    let network = Arc::new(Network::test_network());
    let config = Arc::new(OverlayConfig {
        flow_idle_timeout: Duration::from_secs(60),
        ..OverlayConfig::default()
    });
    let (mut a, mut b, _ai, _bi) = new_pair(&network, &config);

    let (a_res, b_res) = tokio::join!(a.run_handshake(11625), b.run_handshake(11625));
    a_res.unwrap();
    b_res.unwrap();

    let now = Instant::now();
    assert_eq!(a.check_liveness(now), None);
    assert_eq!(
        a.check_liveness(now + Duration::from_secs(61)),
        Some("idle timeout (no new flood requests)")
    );
}
