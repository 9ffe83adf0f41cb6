//! `PeerSession`: composes the framer, authenticator, flow controller,
//! router, and advert engine into one connection's lifecycle (section 4.5).
//! Per the single-owning-handle design in section 9 "Weak session
//! references", a `PeerSession` lives in a `SessionArena` slot owned by the
//! connection manager; this module only models the session itself.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::advert::{serve_demand, AdvertHistory, PendingAdvertBatch};
use crate::collaborators::{BanList, ConsensusEngine, Ledger, PeerDirectory, SurveyManager};
use crate::config::OverlayConfig;
use crate::crypto::{build_auth_cert, derive_session_keys, verify_auth_cert, EphemeralKeys, LocalIdentity};
use crate::error::{DropMode, OverlayError};
use crate::flow::{FlowController, OutgoingGrant};
use crate::metrics::OverlayMetrics;
use crate::network::Network;
use crate::router::{categorize, MessageCategory};
use crate::scheduler::{Scheduler, SessionArena, SessionToken, Task};
use crate::wire::framer::Framer;
use crate::wire::messages::*;

/// Which side opened the TCP connection (section 3 "Connection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    WeInitiated,
    TheyInitiated,
}

/// The handshake/lifecycle state machine, modeled as a tagged variant per
/// section 9 "State machine" rather than an integer, so an invalid
/// transition is a compile error at the call site, not a runtime bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    GotHello,
    GotAuth,
    Closing,
}

impl ConnectionState {
    /// Advances to `next`, rejecting any transition that isn't forward
    /// (section 3 invariant (a)), except into `Closing`, which is reachable
    /// from any state and terminal.
    fn advance(self, next: ConnectionState) -> Result<ConnectionState, OverlayError> {
        use ConnectionState::*;
        if next == Closing {
            return Ok(Closing);
        }
        let ok = matches!(
            (self, next),
            (Connecting, Connected) | (Connected, GotHello) | (GotHello, GotAuth)
        );
        if ok {
            Ok(next)
        } else {
            Err(OverlayError::PolicyRejected(format!(
                "illegal state transition {self:?} -> {next:?}"
            )))
        }
    }
}

/// Which side caused a drop, for metrics and Peer Directory notification
/// (section 4.5 "Drop").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropDirection {
    WeDropped,
    TheyDropped,
}

struct PingState {
    sent_hash: Uint256,
    sent_at: Instant,
}

/// Per-connection mutable bookkeeping (section 3 "Connection"). Lives behind
/// `PeerSession`, not shared across threads.
pub struct Connection {
    pub role: Role,
    pub state: ConnectionState,
    local_nonce: Uint256,
    remote_nonce: Option<Uint256>,
    send_sequence: u64,
    recv_sequence: u64,
    remote_node_id: Option<NodeId>,
    remote_overlay_version: Option<u32>,
    remote_ledger_version: Option<u32>,
    remote_listening_port: Option<u32>,
    created_at: Instant,
    authenticated_at: Option<Instant>,
    last_read: Instant,
    last_write: Instant,
    last_enqueue: Instant,
    last_rtt: Option<Duration>,
    outstanding_ping: Option<PingState>,
}

impl Connection {
    fn new(role: Role, local_nonce: Uint256) -> Self {
        let now = Instant::now();
        Connection {
            role,
            state: ConnectionState::Connecting,
            local_nonce,
            remote_nonce: None,
            send_sequence: 0,
            recv_sequence: 0,
            remote_node_id: None,
            remote_overlay_version: None,
            remote_ledger_version: None,
            remote_listening_port: None,
            created_at: now,
            authenticated_at: None,
            last_read: now,
            last_write: now,
            last_enqueue: now,
            last_rtt: None,
            outstanding_ping: None,
        }
    }
}

/// The set of collaborators a session is constructed with (section 6).
pub struct Collaborators {
    pub ban_list: Arc<dyn BanList>,
    pub peer_directory: Arc<dyn PeerDirectory>,
    pub consensus_engine: Arc<dyn ConsensusEngine>,
    pub ledger: Arc<dyn Ledger>,
    pub survey_manager: Arc<dyn SurveyManager>,
}

/// Composes Framer + Authenticator state + FlowController + AdvertEngine
/// state for one connection (section 2, 4.5).
pub struct PeerSession<S> {
    framer: Framer<S>,
    conn: Connection,
    send_mac_key: Option<Uint256>,
    receive_mac_key: Option<Uint256>,
    ephemeral: EphemeralKeys,
    identity: Arc<LocalIdentity>,
    network: Arc<Network>,
    config: Arc<OverlayConfig>,
    flow: FlowController,
    advert_batch: PendingAdvertBatch,
    advert_history: AdvertHistory,
    collaborators: Collaborators,
    metrics: Arc<OverlayMetrics>,
    outbound_queue: VecDeque<Message>,
    shutting_down: bool,
    scheduler: Scheduler<Message>,
    inbound_token: SessionToken,
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        role: Role,
        identity: Arc<LocalIdentity>,
        network: Arc<Network>,
        config: Arc<OverlayConfig>,
        collaborators: Collaborators,
        metrics: Arc<OverlayMetrics>,
    ) -> Self {
        let local_nonce: Uint256 = rand::random();
        // A session only ever schedules work against itself; a disposable
        // one-slot arena is enough to mint a well-formed token without
        // sharing an arena with the connection manager.
        let inbound_token = SessionArena::<()>::new().insert(());
        let max_droppable_queue_depth = config.max_droppable_queue_depth;
        PeerSession {
            framer: Framer::new(stream, config.max_frame_bytes),
            conn: Connection::new(role, local_nonce),
            send_mac_key: None,
            receive_mac_key: None,
            ephemeral: EphemeralKeys::generate(),
            identity,
            network,
            advert_batch: PendingAdvertBatch::new(config.max_advert_batch_size, config.max_advert_batch_vector),
            advert_history: AdvertHistory::new(config.advert_history_capacity),
            flow: FlowController::new(&config),
            config,
            collaborators,
            metrics,
            outbound_queue: VecDeque::new(),
            shutting_down: false,
            scheduler: Scheduler::new(max_droppable_queue_depth),
            inbound_token,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state
    }

    fn build_hello(&self, listening_port: i32) -> Hello {
        Hello {
            ledger_version: self.config.ledger_version,
            overlay_min_version: self.config.overlay_min_version,
            overlay_version: self.config.overlay_version,
            version_str: self.config.version_string.clone(),
            network_id: self.network.id(),
            listening_port,
            peer_id: self.identity.node_id(),
            cert: build_auth_cert(
                &self.identity,
                &self.network.id(),
                &self.ephemeral.public_bytes(),
                now_unix(),
            ),
            nonce: self.conn.local_nonce,
        }
    }

    /// Runs the four-step handshake exactly as ordered in section 4.1.
    /// On success the connection is in `GotAuth`. Any failure leaves the
    /// session ready for the caller to drop per the section 7 disposition
    /// table.
    pub async fn run_handshake(&mut self, listening_port: i32) -> Result<(), OverlayError> {
        match self.conn.role {
            Role::WeInitiated => {
                let hello = self.build_hello(listening_port);
                self.write_unauthenticated(Message::Hello(hello)).await?;
                self.conn.state = self.conn.state.advance(ConnectionState::Connected)?;

                let their_hello = self.read_hello().await?;
                self.accept_remote_hello(&their_hello)?;
                self.derive_keys_from_hello(&their_hello)?;
                self.conn.state = self.conn.state.advance(ConnectionState::GotHello)?;

                let flags = if self.byte_axis_requested() {
                    auth_flags::FLAG_FLOW_CONTROL_BYTES
                } else {
                    0
                };
                self.write_authenticated(Message::Auth(Auth { flags })).await?;

                let their_auth = self.read_auth().await?;
                self.maybe_enable_byte_axis(their_hello.overlay_version, their_auth.flags);
                self.conn.state = self.conn.state.advance(ConnectionState::GotAuth)?;
                self.conn.authenticated_at = Some(Instant::now());
                self.metrics.connections_authenticated.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.send_initial_credit().await?;
                Ok(())
            }
            Role::TheyInitiated => {
                let their_hello = self.read_hello().await?;
                self.accept_remote_hello(&their_hello)?;
                self.derive_keys_from_hello(&their_hello)?;

                let hello = self.build_hello(listening_port);
                self.write_unauthenticated(Message::Hello(hello)).await?;
                self.conn.state = self.conn.state.advance(ConnectionState::Connected)?;
                self.conn.state = self.conn.state.advance(ConnectionState::GotHello)?;

                let their_auth = self.read_auth().await?;
                self.maybe_enable_byte_axis(their_hello.overlay_version, their_auth.flags);

                let flags = if self.byte_axis_requested() {
                    auth_flags::FLAG_FLOW_CONTROL_BYTES
                } else {
                    0
                };
                self.write_authenticated(Message::Auth(Auth { flags })).await?;
                self.conn.state = self.conn.state.advance(ConnectionState::GotAuth)?;
                self.conn.authenticated_at = Some(Instant::now());
                self.metrics.connections_authenticated.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.send_initial_credit().await?;
                Ok(())
            }
        }
    }

    fn byte_axis_requested(&self) -> bool {
        self.config.overlay_version >= self.config.byte_flow_control_min_version
    }

    fn maybe_enable_byte_axis(&mut self, remote_overlay_version: u32, remote_flags: u32) {
        let both_request = remote_flags & auth_flags::FLAG_FLOW_CONTROL_BYTES != 0 && self.byte_axis_requested();
        let both_support = remote_overlay_version >= self.config.byte_flow_control_min_version;
        if both_request && both_support {
            self.flow.enable_byte_axis();
        }
    }

    async fn send_initial_credit(&mut self) -> Result<(), OverlayError> {
        if self.flow.byte_axis_enabled() {
            self.write_authenticated(Message::SendMoreExtended(SendMoreExtended {
                num_messages: self.config.peer_flood_reading_capacity,
                num_bytes: self.config.flood_byte_capacity,
            }))
            .await
        } else {
            self.write_authenticated(Message::SendMore(SendMore {
                num_messages: self.config.peer_flood_reading_capacity,
            }))
            .await
        }
    }

    fn accept_remote_hello(&self, hello: &Hello) -> Result<(), OverlayError> {
        if self.collaborators.ban_list.is_banned(&hello.peer_id) {
            return Err(OverlayError::BannedPeer);
        }
        if hello.network_id != self.network.id() {
            return Err(OverlayError::WrongNetwork);
        }
        let overlap = hello.overlay_version >= self.config.overlay_min_version
            && self.config.overlay_version >= hello.overlay_min_version;
        if !overlap {
            return Err(OverlayError::VersionMismatch);
        }
        if hello.peer_id == self.identity.node_id() {
            return Err(OverlayError::SelfConnect);
        }
        verify_auth_cert(&hello.cert, &hello.peer_id, &self.network.id(), now_unix())?;
        Ok(())
    }

    fn derive_keys_from_hello(&mut self, hello: &Hello) -> Result<(), OverlayError> {
        let we_called_remote = self.conn.role == Role::WeInitiated;
        let keys = derive_session_keys(
            &self.ephemeral,
            &hello.cert.pubkey.key,
            &self.conn.local_nonce,
            &hello.nonce,
            we_called_remote,
        )?;
        self.send_mac_key = Some(keys.send_mac_key);
        self.receive_mac_key = Some(keys.receive_mac_key);
        self.conn.remote_nonce = Some(hello.nonce);
        self.conn.remote_node_id = Some(hello.peer_id);
        self.conn.remote_overlay_version = Some(hello.overlay_version);
        self.conn.remote_ledger_version = Some(hello.ledger_version);
        self.conn.remote_listening_port = Some(hello.listening_port);
        Ok(())
    }

    async fn read_hello(&mut self) -> Result<Hello, OverlayError> {
        let (env, _bytes) = self.framer.read_message().await?;
        self.conn.last_read = Instant::now();
        match env.message {
            Message::Hello(hello) => Ok(hello),
            other => Err(OverlayError::PolicyRejected(format!(
                "expected HELLO, got {other:?}"
            ))),
        }
    }

    async fn read_auth(&mut self) -> Result<Auth, OverlayError> {
        let env = self.read_authenticated_envelope().await?;
        match env.message {
            Message::Auth(auth) => Ok(auth),
            other => Err(OverlayError::PolicyRejected(format!(
                "expected AUTH, got {other:?}"
            ))),
        }
    }

    async fn write_unauthenticated(&mut self, message: Message) -> Result<(), OverlayError> {
        let env = AuthenticatedMessage {
            sequence: 0,
            message,
            mac: HmacSha256Mac { mac: [0; 32] },
        };
        let n = self.framer.write_message(&env).await?;
        self.metrics.record_write(n as u64);
        self.conn.last_write = Instant::now();
        Ok(())
    }

    async fn write_authenticated(&mut self, message: Message) -> Result<(), OverlayError> {
        let key = self
            .send_mac_key
            .ok_or(OverlayError::MessageBeforeHandshake)?;
        let encoded = serde_xdr::to_bytes(&message).map_err(|e| OverlayError::Encode(e.to_string()))?;
        let mac = crate::crypto::compute_mac(&key, self.conn.send_sequence, &encoded);
        let env = AuthenticatedMessage {
            sequence: self.conn.send_sequence,
            message,
            mac: HmacSha256Mac { mac },
        };
        self.conn.send_sequence += 1;
        let n = self.framer.write_message(&env).await?;
        self.metrics.record_write(n as u64);
        self.conn.last_write = Instant::now();
        self.conn.last_enqueue = Instant::now();
        Ok(())
    }

    /// Reads the next frame, enforcing the MAC sequence invariant (section
    /// 3 invariant (c), section 4.1 "Per-message MAC") for every message
    /// except HELLO/ERROR_MSG, which travel unauthenticated.
    async fn read_authenticated_envelope(&mut self) -> Result<AuthenticatedMessage, OverlayError> {
        let (env, bytes) = self.framer.read_message().await?;
        self.conn.last_read = Instant::now();
        self.metrics.record_read(bytes as u64);

        if env.message.is_unauthenticated() {
            return Ok(env);
        }

        let key = self
            .receive_mac_key
            .ok_or(OverlayError::MessageBeforeHandshake)?;
        if env.sequence != self.conn.recv_sequence {
            let err = OverlayError::OutOfOrderMessage {
                expected: self.conn.recv_sequence,
                got: env.sequence,
            };
            self.conn.recv_sequence += 1;
            return Err(err);
        }
        let encoded = serde_xdr::to_bytes(&env.message).map_err(|e| OverlayError::Encode(e.to_string()))?;
        crate::crypto::verify_mac(&key, env.sequence, &encoded, &env.mac.mac)?;
        self.conn.recv_sequence += 1;
        Ok(env)
    }

    /// Dispatches one inbound authenticated message per section 4.3.
    /// Handshake-category messages never reach here (handled inline during
    /// `run_handshake`); this handles everything sent after GOT_AUTH. The
    /// message is posted to the scheduler at its routed class before
    /// processing, so droppable-class traffic is subject to the same
    /// enqueue-time load-shedding rule as outbound `send_message` (section
    /// 4.3, section 5).
    pub async fn recv_and_dispatch(&mut self) -> Result<(), OverlayError> {
        if self.conn.state != ConnectionState::GotAuth {
            return Err(OverlayError::MessageBeforeHandshake);
        }
        let env = self.read_authenticated_envelope().await?;
        let class = categorize(&env.message).scheduler_class();

        let posted = self.scheduler.post(Task {
            token: self.inbound_token,
            class,
            run: env.message,
        });
        if !posted {
            self.metrics.record_load_shed();
            return Ok(());
        }

        while let Some(task) = self.scheduler.next() {
            self.process_inbound(task.run).await?;
        }
        Ok(())
    }

    /// Accounts and routes one message drained from the scheduler. Credit is
    /// consumed before the unsynced-discard check runs (section 4.3: credit
    /// is taken on arrival and given back on discard), and the total inbound
    /// budget applies to every category, not just flood-class traffic
    /// (section 4.2).
    async fn process_inbound(&mut self, message: Message) -> Result<(), OverlayError> {
        let category = categorize(&message);

        self.flow.admit_inbound()?;

        let byte_cost = serde_xdr::to_bytes(&message).map(|b| b.len() as u64).unwrap_or(0);
        if category.is_flood_class() {
            if let Err(err) = self.flow.consume_inbound_flood(byte_cost) {
                self.flow.release_inbound();
                return Err(err);
            }
        }

        let result = if category.drop_if_unsynced() && !self.collaborators.ledger.is_synced() {
            Ok(())
        } else {
            self.dispatch_by_category(category, message).await
        };

        if category.is_flood_class() {
            self.flow.release_inbound_flood(byte_cost);
            if result.is_ok() {
                self.flush_pending_grants().await?;
            }
        }
        self.flow.release_inbound();

        result
    }

    async fn flush_pending_grants(&mut self) -> Result<(), OverlayError> {
        for grant in self.flow.take_pending_grants() {
            match grant {
                OutgoingGrant::Messages(send_more) => {
                    self.metrics.record_send_more();
                    self.write_authenticated(Message::SendMore(send_more)).await?;
                }
                OutgoingGrant::MessagesAndBytes(extended) => {
                    self.metrics.record_send_more_extended();
                    self.write_authenticated(Message::SendMoreExtended(extended)).await?;
                }
            }
        }
        Ok(())
    }

    async fn dispatch_by_category(&mut self, category: MessageCategory, message: Message) -> Result<(), OverlayError> {
        match category {
            MessageCategory::Handshake => unreachable!("handshake handled during run_handshake"),
            MessageCategory::Control => self.handle_control(message).await,
            MessageCategory::FloodTx => self.handle_flood_tx(message).await,
            MessageCategory::InboundConsensusFetch => self.handle_consensus_fetch(message).await,
            MessageCategory::Consensus => self.handle_consensus(message),
            MessageCategory::Survey => self.handle_survey(message),
        }
    }

    async fn handle_control(&mut self, message: Message) -> Result<(), OverlayError> {
        match message {
            Message::GetPeers(_) => {
                let remote = self.conn.remote_node_id.unwrap_or(NodeId([0; 32]));
                let peers = self
                    .collaborators
                    .peer_directory
                    .get_peers_to_send(self.config.max_peers_to_send, &remote);
                self.write_authenticated(Message::Peers(peers)).await?;
            }
            Message::Peers(addresses) => {
                for addr in &addresses {
                    self.collaborators.peer_directory.ensure_exists(addr);
                }
            }
            Message::ErrorMsg(err) => {
                let sanitized = sanitize_error_text(&err.msg);
                warn!("peer sent ERROR_MSG code={:?}: {}", err.code, sanitized);
            }
            Message::SendMore(grant) => {
                self.flow.record_send_more(&grant, Instant::now())?;
            }
            Message::SendMoreExtended(grant) => {
                self.flow.record_send_more_extended(&grant, Instant::now())?;
            }
            other => {
                return Err(OverlayError::PolicyRejected(format!(
                    "unexpected control message {other:?}"
                )))
            }
        }
        Ok(())
    }

    async fn handle_flood_tx(&mut self, message: Message) -> Result<(), OverlayError> {
        match message {
            Message::Transaction(tx) => {
                let _ = self.collaborators.consensus_engine.recv_transaction(&tx);
            }
            Message::FloodAdvert(advert) => {
                let ledger_seq = self.collaborators.ledger.last_closed_ledger_seq();
                let mut wanted = Vec::new();
                for hash in advert.tx_hashes {
                    self.advert_history.record(hash, ledger_seq);
                    if self.collaborators.consensus_engine.get_tx(&hash).is_none() {
                        wanted.push(hash);
                    }
                }
                if !wanted.is_empty() {
                    self.write_authenticated(Message::FloodDemand(FloodDemand { tx_hashes: wanted }))
                        .await?;
                }
            }
            Message::FloodDemand(demand) => {
                let outcome = serve_demand(&demand, self.collaborators.consensus_engine.as_ref());
                self.metrics.record_flood_fulfillment(
                    outcome.fulfilled.len() as u64,
                    outcome.unfulfilled_unknown as u64,
                    outcome.unfulfilled_banned as u64,
                );
                for tx in outcome.fulfilled {
                    self.write_authenticated(Message::Transaction(tx)).await?;
                }
            }
            other => {
                return Err(OverlayError::PolicyRejected(format!(
                    "unexpected flood-tx message {other:?}"
                )))
            }
        }
        Ok(())
    }

    async fn handle_consensus_fetch(&mut self, message: Message) -> Result<(), OverlayError> {
        match message {
            Message::GetTxSet(req) => {
                if let Some(frame) = self.collaborators.consensus_engine.get_tx_set(&req.tx_set_hash) {
                    self.write_authenticated(Message::TxSet(frame)).await?;
                } else {
                    self.write_authenticated(Message::DontHave(DontHave {
                        type_: MessageType::TxSet,
                        req_hash: req.tx_set_hash,
                    }))
                    .await?;
                }
            }
            Message::GetScpQuorumSet(req) => {
                if let Some(qset) = self.collaborators.consensus_engine.get_qset(&req.qset_hash) {
                    self.write_authenticated(Message::ScpQuorumSet(qset)).await?;
                } else {
                    self.write_authenticated(Message::DontHave(DontHave {
                        type_: MessageType::ScpQuorumset,
                        req_hash: req.qset_hash,
                    }))
                    .await?;
                    self.maybe_resolve_ping(&req.qset_hash);
                }
            }
            Message::GetScpState(req) => {
                let remote = self.conn.remote_node_id.unwrap_or(NodeId([0; 32]));
                self.collaborators
                    .consensus_engine
                    .send_scp_state_to_peer(req.ledger_seq, &remote);
            }
            other => {
                return Err(OverlayError::PolicyRejected(format!(
                    "unexpected consensus-fetch message {other:?}"
                )))
            }
        }
        Ok(())
    }

    fn handle_consensus(&mut self, message: Message) -> Result<(), OverlayError> {
        match message {
            Message::DontHave(dont_have) => {
                let remote = self.conn.remote_node_id.unwrap_or(NodeId([0; 32]));
                self.collaborators.consensus_engine.peer_doesnt_have(
                    dont_have.type_,
                    &dont_have.req_hash,
                    &remote,
                );
            }
            Message::TxSet(frame) | Message::GeneralizedTxSet(frame) => {
                let hash = sha256_32(&frame.0);
                self.collaborators.consensus_engine.recv_tx_set(&hash, &frame);
            }
            Message::ScpQuorumSet(qset) => {
                let hash = sha256_32(&qset.0);
                self.maybe_resolve_ping(&hash);
            }
            Message::ScpMessage(envelope) => {
                let _ = self.collaborators.consensus_engine.recv_scp_envelope(&envelope);
            }
            other => {
                return Err(OverlayError::PolicyRejected(format!(
                    "unexpected consensus message {other:?}"
                )))
            }
        }
        Ok(())
    }

    fn handle_survey(&mut self, message: Message) -> Result<(), OverlayError> {
        let remote = self.conn.remote_node_id.unwrap_or(NodeId([0; 32]));
        match message {
            Message::SurveyRequest(req) => self.collaborators.survey_manager.relay_or_process_request(&req, &remote),
            Message::SurveyResponse(resp) => self
                .collaborators
                .survey_manager
                .relay_or_process_response(&resp, &remote),
            other => {
                return Err(OverlayError::PolicyRejected(format!(
                    "unexpected survey message {other:?}"
                )))
            }
        }
        Ok(())
    }

    fn maybe_resolve_ping(&mut self, hash: &Uint256) {
        if let Some(ping) = &self.conn.outstanding_ping {
            if &ping.sent_hash == hash {
                self.conn.last_rtt = Some(ping.sent_at.elapsed());
                self.conn.outstanding_ping = None;
            }
        }
    }

    /// Sends a synthetic `GET_SCP_QUORUMSET` ping if none is outstanding
    /// (section 4.5 "Pinging").
    pub async fn maybe_send_ping(&mut self) -> Result<(), OverlayError> {
        if self.conn.state != ConnectionState::GotAuth || self.conn.outstanding_ping.is_some() {
            return Ok(());
        }
        let hash = sha256_32(&now_unix().to_be_bytes());
        self.conn.outstanding_ping = Some(PingState {
            sent_hash: hash,
            sent_at: Instant::now(),
        });
        self.write_authenticated(Message::GetScpQuorumSet(GetScpQuorumSet { qset_hash: hash }))
            .await
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.conn.last_rtt
    }

    /// Public send entry point used by the flood/advert/consensus paths and
    /// by external callers (`sendTxDemand`, SCP relay). Applies the
    /// droppable-class load-shedding rule from section 4.5 before queueing.
    pub async fn send_message(&mut self, message: Message, class_is_droppable: bool) -> Result<(), OverlayError> {
        if class_is_droppable && self.outbound_queue.len() >= self.config.max_droppable_queue_depth {
            self.metrics.record_load_shed();
            return Ok(());
        }
        self.outbound_queue.push_back(message);
        self.conn.last_enqueue = Instant::now();
        self.drain_outbound().await
    }

    async fn drain_outbound(&mut self) -> Result<(), OverlayError> {
        while let Some(message) = self.outbound_queue.front().cloned() {
            let category = categorize(&message);
            if category.is_flood_class() {
                let byte_cost = serde_xdr::to_bytes(&message).map(|b| b.len() as u64).unwrap_or(0);
                if !self.flow.try_spend_outbound_flood(byte_cost) {
                    break;
                }
            }
            self.outbound_queue.pop_front();
            self.write_authenticated(message).await?;
        }
        Ok(())
    }

    /// Queues a hash the local transaction pool wants advertised, flushing
    /// immediately if the batch just reached its size ceiling (section
    /// 4.4 "Outgoing advertisement").
    pub async fn advertise(&mut self, hash: Uint256) -> Result<(), OverlayError> {
        let ledger_seq = self.collaborators.ledger.last_closed_ledger_seq();
        if self.advert_history.knows(&hash) {
            return Ok(());
        }
        self.advert_history.record(hash, ledger_seq);
        if self.advert_batch.push(hash) {
            self.flush_advert_batch().await?;
        }
        Ok(())
    }

    pub async fn flush_advert_batch(&mut self) -> Result<(), OverlayError> {
        if let Some(advert) = self.advert_batch.flush() {
            self.send_message(Message::FloodAdvert(advert), true).await?;
        }
        Ok(())
    }

    /// `sendTxDemand` from section 4.4 "Outgoing demand".
    pub async fn send_tx_demand(&mut self, hashes: Vec<Uint256>) -> Result<(), OverlayError> {
        self.send_message(
            Message::FloodDemand(crate::advert::build_tx_demand(hashes)),
            true,
        )
        .await
    }

    /// Called whenever the local ledger closes below `floor`, pruning
    /// AdvertHistory (section 4.4 "Advert memory").
    pub fn on_ledger_closed(&mut self, floor: u32) {
        self.advert_history.clear_below(floor);
    }

    /// The recurring liveness check (section 4.5, items 1-3). Returns the
    /// drop reason if any condition fires; the caller is expected to call
    /// `drop_session` with it.
    pub fn check_liveness(&self, now: Instant) -> Option<&'static str> {
        let io_timeout = if self.conn.state == ConnectionState::GotAuth {
            self.config.peer_io_timeout
        } else {
            self.config.handshake_io_timeout
        };
        if now.duration_since(self.conn.last_read) >= io_timeout && now.duration_since(self.conn.last_write) >= io_timeout {
            return Some("idle timeout");
        }
        if let Some(since_auth) = self.conn.authenticated_at {
            if self
                .flow
                .is_flow_idle(now, self.config.flow_idle_timeout, since_auth)
            {
                return Some("idle timeout (no new flood requests)");
            }
        }
        if now.duration_since(self.conn.last_enqueue) >= self.config.straggler_timeout && !self.outbound_queue.is_empty() {
            return Some("straggling (cannot keep up)");
        }
        None
    }

    /// Idempotent drop (section 4.5 "Drop") for liveness/local reasons that
    /// carry no wire error code. Moves state to `Closing`, notifies the peer
    /// directory, and — for `FlushWriteQueue` mode — drains whatever remains
    /// queued first.
    pub async fn drop_session(&mut self, reason: &str, direction: DropDirection, mode: DropMode) {
        if self.conn.state == ConnectionState::Closing {
            return;
        }
        self.metrics.record_drop(reason);
        info!("dropping connection ({direction:?}): {reason}");
        self.teardown(direction, mode).await;
    }

    /// Reacts to a connection-fatal error per the section 7 disposition
    /// table: sends `ERROR_MSG` carrying the error's wire code first, if it
    /// has one (MAC mismatches, transport failures, and liveness timeouts
    /// don't), then tears the connection down in the mode the error
    /// prescribes.
    pub async fn fail(&mut self, err: OverlayError, direction: DropDirection) {
        if self.conn.state == ConnectionState::Closing {
            return;
        }
        let code = err.wire_code();
        if let Some(code) = code {
            let _ = self
                .write_unauthenticated(Message::ErrorMsg(Error {
                    code: code as u32,
                    msg: err.to_string(),
                }))
                .await;
        }
        self.metrics.record_error_drop(code);
        warn!("dropping connection ({direction:?}): {err}");
        let mode = err.drop_mode();
        self.teardown(direction, mode).await;
    }

    async fn teardown(&mut self, direction: DropDirection, mode: DropMode) {
        self.shutting_down = true;
        if mode == DropMode::FlushWriteQueue {
            let _ = self.drain_outbound().await;
        } else {
            self.outbound_queue.clear();
        }
        self.conn.state = ConnectionState::Closing;
        debug!("connection moved to CLOSING ({direction:?})");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn sha256_32(data: &[u8]) -> Uint256 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Strips non-alphanumeric characters before an `ERROR_MSG` body is logged
/// (section 7 "its `msg` string is sanitized").
fn sanitize_error_text(msg: &str) -> String {
    msg.chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_only_advances_forward() {
        let s = ConnectionState::Connecting;
        assert!(s.advance(ConnectionState::Connected).is_ok());
        assert!(ConnectionState::GotAuth.advance(ConnectionState::Connected).is_err());
    }

    #[test]
    fn closing_reachable_from_any_state() {
        assert!(ConnectionState::Connected.advance(ConnectionState::Closing).is_ok());
        assert!(ConnectionState::GotAuth.advance(ConnectionState::Closing).is_ok());
    }

    #[test]
    fn sanitizer_strips_non_alphanumeric() {
        assert_eq!(sanitize_error_text("bad!!cert??"), "badcert");
    }
}
