//! Peer actor: one Tokio task that owns a player's whole side of a match.
//!
//! The actor owns the session, the canonical state, the log and every
//! timer. The outside world reaches it through a [`PeerHandle`] (commands
//! over an mpsc channel, replies over oneshot channels) and watches it
//! through a [`PeerView`] published on a `watch` channel after every event.
//!
//! Transport I/O never blocks the loop: opening a link and reading frames
//! run in small tasks that feed [`LinkEvent`]s back into the actor. Each
//! link gets an epoch number so events from a link that was already
//! replaced are ignored.

use std::ops::ControlFlow;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realmlink_protocol::{
    Codec, DeckType, JsonCodec, Message, ProtocolError, Role, SerializedGameState, Slot,
};
use realmlink_session::{
    ConnectionStatus, Directory, GameCode, GameStatus, KeyValueStore, PrivateSnapshot,
    SessionManager, clear_snapshot, save_snapshot,
};
use realmlink_state::{
    Action, LogEntry, LogKind, MatchLog, MatchState, Perspective, redact_private, unix_millis,
};
use realmlink_sync::{
    Broadcaster, HarbingerDraw, ReceiveWindow, Reconciler, RestoreSource, RollOutcome,
    TurnOrderRoll,
};
use realmlink_timer::{Debouncer, Flush};
use realmlink_transport::{Connection, Transport};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::{PeerConfig, RealmlinkError};

type Reply<T> = oneshot::Sender<Result<T, RealmlinkError>>;

/// A change to the local drag indicator, mirrored to the remote.
#[derive(Debug, Clone, PartialEq)]
pub enum DragUpdate {
    Start { card_id: Option<String> },
    Move { x: f64, y: f64 },
    End,
}

/// Commands sent to a peer actor through its channel.
///
/// Slots inside commands are in the local player's me-first frame:
/// `Slot::Player` is always "me".
pub(crate) enum PeerCommand {
    Create { reply: Reply<GameCode> },
    Join { code: GameCode, reply: Reply<()> },
    /// Resume the live session, or the one persisted in the store.
    Resume { reply: Reply<()> },
    Apply { action: Action, reply: Reply<Option<u64>> },
    EndTurn { reply: Reply<()> },
    Chat { message: String, reply: Reply<()> },
    Roll { max: u32, reply: Reply<u32> },
    Searching {
        deck: DeckType,
        searching: bool,
        count: Option<u32>,
        reply: Reply<()>,
    },
    RevealHand { reply: Reply<()> },
    Ping { x: f64, y: f64, reply: Reply<()> },
    Drag { update: DragUpdate, reply: Reply<()> },
    StartTurnOrderRoll { reply: Reply<()> },
    ChooseTurnOrder { starts_first: bool, reply: Reply<Slot> },
    RollHarbinger { player: Slot, reply: Reply<HarbingerDraw> },
    Concede { reply: Reply<()> },
    RequestRematch { reply: Reply<()> },
    AcceptRematch { reply: Reply<()> },
    /// Cut the transport as if the network failed.
    DropConnection { reply: Reply<()> },
    Leave { reply: Reply<()> },
}

/// Everything a UI needs to draw one peer, refreshed after every event.
#[derive(Debug, Clone)]
pub struct PeerView {
    pub status: ConnectionStatus,
    pub code: Option<GameCode>,
    pub role: Option<Role>,
    pub remote_nickname: Option<String>,
    /// Canonical (host-centric) state plus transient flags.
    pub state: MatchState,
    pub log: Vec<LogEntry>,
    /// Sequences sent and not yet acknowledged.
    pub pending: Vec<u64>,
    /// Pending sequences whose re-sends are used up.
    pub unacknowledged: Vec<u64>,
    pub rolling: bool,
    /// Settled turn-order roll from this side, once there is a winner.
    pub roll: Option<RollOutcome>,
    pub remote_wants_rematch: bool,
    /// Source of the guest's hidden zones after the last full sync.
    pub last_restore: Option<RestoreSource>,
}

impl PeerView {
    fn empty() -> Self {
        Self {
            status: ConnectionStatus::Disconnected { since: None },
            code: None,
            role: None,
            remote_nickname: None,
            state: MatchState::new(),
            log: Vec::new(),
            pending: Vec::new(),
            unacknowledged: Vec::new(),
            rolling: false,
            roll: None,
            remote_wants_rematch: false,
            last_restore: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// The state oriented me-first for this peer's UI.
    pub fn local_view(&self) -> SerializedGameState {
        let role = self.role.unwrap_or(Role::Host);
        Perspective::new(role).view(self.state.serialized())
    }

    /// This peer's canonical seat.
    pub fn local_slot(&self) -> Slot {
        self.role.unwrap_or(Role::Host).local_slot()
    }

    /// `true` if any log line contains `needle`.
    pub fn log_contains(&self, needle: &str) -> bool {
        self.log.iter().any(|e| e.message.contains(needle))
    }
}

// ---------------------------------------------------------------------------
// PeerHandle
// ---------------------------------------------------------------------------

/// Handle to a running peer actor.
///
/// Cheap to clone: an `mpsc::Sender` plus a `watch::Receiver`.
#[derive(Clone)]
pub struct PeerHandle {
    sender: mpsc::Sender<PeerCommand>,
    view: watch::Receiver<PeerView>,
}

impl PeerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> PeerCommand,
    ) -> Result<T, RealmlinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RealmlinkError::PeerStopped)?;
        reply_rx.await.map_err(|_| RealmlinkError::PeerStopped)?
    }

    /// Hosts a new match. Returns its code once the game is listed; the
    /// guest may connect any time after.
    pub async fn create(&self) -> Result<GameCode, RealmlinkError> {
        self.request(|reply| PeerCommand::Create { reply }).await
    }

    /// Joins the match listed under `code`. Returns once dialing started.
    pub async fn join(&self, code: GameCode) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::Join { code, reply }).await
    }

    /// Reconnects the current session, or the one saved in the store after
    /// a reload.
    pub async fn resume(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::Resume { reply }).await
    }

    /// Applies an action locally and broadcasts it. Slots are me-first.
    /// Returns the sequence the frame carries. Fails with
    /// [`RealmlinkError::NotConnected`] and leaves the state alone while
    /// the link is down.
    pub async fn apply(&self, action: Action) -> Result<Option<u64>, RealmlinkError> {
        self.request(|reply| PeerCommand::Apply { action, reply }).await
    }

    pub async fn end_turn(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::EndTurn { reply }).await
    }

    pub async fn chat(&self, message: &str) -> Result<(), RealmlinkError> {
        let message = message.to_string();
        self.request(|reply| PeerCommand::Chat { message, reply }).await
    }

    /// Rolls a `max`-sided die for everyone to see.
    pub async fn roll(&self, max: u32) -> Result<u32, RealmlinkError> {
        self.request(|reply| PeerCommand::Roll { max, reply }).await
    }

    pub async fn set_searching(
        &self,
        deck: DeckType,
        searching: bool,
        count: Option<u32>,
    ) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::Searching {
            deck,
            searching,
            count,
            reply,
        })
        .await
    }

    pub async fn reveal_hand(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::RevealHand { reply }).await
    }

    pub async fn ping(&self, x: f64, y: f64) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::Ping { x, y, reply }).await
    }

    pub async fn drag(&self, update: DragUpdate) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::Drag { update, reply }).await
    }

    /// Starts the turn-order roll by hand. The host starts it on its own
    /// the first time both peers connect.
    pub async fn start_turn_order_roll(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::StartTurnOrderRoll { reply })
            .await
    }

    /// The roll winner picks whether to go first. Returns the canonical
    /// seat that moves first.
    pub async fn choose_turn_order(&self, starts_first: bool) -> Result<Slot, RealmlinkError> {
        self.request(|reply| PeerCommand::ChooseTurnOrder {
            starts_first,
            reply,
        })
        .await
    }

    /// Rolls the harbinger dice for `player` (me-first).
    pub async fn roll_harbinger(&self, player: Slot) -> Result<HarbingerDraw, RealmlinkError> {
        self.request(|reply| PeerCommand::RollHarbinger { player, reply })
            .await
    }

    pub async fn concede(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::Concede { reply }).await
    }

    pub async fn request_rematch(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::RequestRematch { reply }).await
    }

    pub async fn accept_rematch(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::AcceptRematch { reply }).await
    }

    /// Cuts the transport without leaving, as a network failure would.
    pub async fn drop_connection(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::DropConnection { reply })
            .await
    }

    /// Leaves the match for good and stops the actor.
    pub async fn leave(&self) -> Result<(), RealmlinkError> {
        self.request(|reply| PeerCommand::Leave { reply }).await
    }

    /// The latest published view.
    pub fn view(&self) -> PeerView {
        self.view.borrow().clone()
    }

    /// A receiver that is notified on every published view.
    pub fn subscribe(&self) -> watch::Receiver<PeerView> {
        self.view.clone()
    }

    /// Waits until the published view satisfies `condition`.
    pub async fn wait_for(
        &self,
        mut condition: impl FnMut(&PeerView) -> bool,
    ) -> Result<PeerView, RealmlinkError> {
        let mut rx = self.view.clone();
        let view = rx
            .wait_for(|v| condition(v))
            .await
            .map_err(|_| RealmlinkError::PeerStopped)?;
        Ok(PeerView::clone(&view))
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Entry point for starting peers.
pub struct Peer;

impl Peer {
    /// Spawns a peer speaking JSON.
    pub fn spawn<T, D, S>(config: PeerConfig, transport: T, directory: D, store: S) -> PeerHandle
    where
        T: Transport,
        D: Directory,
        S: KeyValueStore,
    {
        Self::spawn_with_codec(config, transport, directory, store, JsonCodec)
    }

    /// Spawns a peer with a custom codec. Both peers must use the same one.
    pub fn spawn_with_codec<T, D, S, C>(
        config: PeerConfig,
        transport: T,
        directory: D,
        store: S,
        codec: C,
    ) -> PeerHandle
    where
        T: Transport,
        D: Directory,
        S: KeyValueStore,
        C: Codec,
    {
        let config = config.validated();
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (view_tx, view_rx) = watch::channel(PeerView::empty());
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let actor = PeerActor {
            manager: SessionManager::new(config.retry.clone()),
            broadcaster: Broadcaster::new(config.ack.clone()),
            reconciler: Reconciler::new(config.reconcile.clone()),
            saves: Debouncer::new(config.debounce.clone()),
            config,
            transport: Arc::new(transport),
            directory,
            store: Box::new(store),
            codec,
            state: MatchState::new(),
            log: MatchLog::new(),
            window: ReceiveWindow::new(),
            roll: TurnOrderRoll::new(),
            rng,
            link: None,
            epoch: 0,
            opener: None,
            reader: None,
            link_tx,
            link_rx,
            retry_at: None,
            open_attempts: 0,
            local_wants_rematch: false,
            remote_wants_rematch: false,
            last_restore: None,
            commands: cmd_rx,
            view: view_tx,
        };

        tokio::spawn(actor.run());

        PeerHandle {
            sender: cmd_tx,
            view: view_rx,
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Feedback from the link tasks.
pub(crate) enum LinkEvent<K> {
    Opened { epoch: u64, conn: K },
    OpenFailed { epoch: u64, error: String },
    Frame { epoch: u64, data: Vec<u8> },
    Closed { epoch: u64, error: Option<String> },
}

/// The internal peer state. Runs inside a Tokio task.
pub(crate) struct PeerActor<T: Transport, D: Directory, C: Codec> {
    pub(crate) config: PeerConfig,
    pub(crate) transport: Arc<T>,
    pub(crate) directory: D,
    pub(crate) store: Box<dyn KeyValueStore>,
    pub(crate) codec: C,
    pub(crate) manager: SessionManager,
    pub(crate) state: MatchState,
    pub(crate) log: MatchLog,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) window: ReceiveWindow,
    pub(crate) reconciler: Reconciler,
    pub(crate) roll: TurnOrderRoll,
    pub(crate) rng: StdRng,
    pub(crate) saves: Debouncer,
    pub(crate) link: Option<Arc<T::Connection>>,
    pub(crate) epoch: u64,
    pub(crate) opener: Option<JoinHandle<()>>,
    pub(crate) reader: Option<JoinHandle<()>>,
    pub(crate) link_tx: mpsc::UnboundedSender<LinkEvent<T::Connection>>,
    pub(crate) link_rx: mpsc::UnboundedReceiver<LinkEvent<T::Connection>>,
    /// When the next open attempt is due after a failure.
    pub(crate) retry_at: Option<Instant>,
    pub(crate) open_attempts: u32,
    pub(crate) local_wants_rematch: bool,
    pub(crate) remote_wants_rematch: bool,
    pub(crate) last_restore: Option<RestoreSource>,
    pub(crate) commands: mpsc::Receiver<PeerCommand>,
    pub(crate) view: watch::Sender<PeerView>,
}

impl<T: Transport, D: Directory, C: Codec> PeerActor<T, D, C> {
    /// Runs the actor loop until `leave` or until every handle is dropped.
    async fn run(mut self) {
        tracing::info!(nickname = %self.config.nickname, "peer started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle_command(cmd).await.is_break() {
                        self.publish();
                        break;
                    }
                }
                Some(event) = self.link_rx.recv() => self.handle_link(event).await,
                flush = self.saves.wait_for_flush() => self.flush(flush).await,
                () = self.broadcaster.wait_for_retry() => self.resend_due().await,
                () = sleep_until_opt(self.retry_at) => {
                    self.retry_at = None;
                    self.open_link();
                }
            }
            self.publish();
        }

        if let Some(flush) = self.saves.flush_now() {
            self.flush(flush).await;
        }
        self.close_link().await;
        tracing::info!(nickname = %self.config.nickname, "peer stopped");
    }

    async fn handle_command(&mut self, cmd: PeerCommand) -> ControlFlow<()> {
        match cmd {
            PeerCommand::Create { reply } => {
                let _ = reply.send(self.create().await);
            }
            PeerCommand::Join { code, reply } => {
                let _ = reply.send(self.join(code).await);
            }
            PeerCommand::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            PeerCommand::Apply { action, reply } => {
                let _ = reply.send(self.apply_local(action).await);
            }
            PeerCommand::EndTurn { reply } => {
                let result = self.require_connected();
                if result.is_ok() {
                    self.state.end_turn();
                    self.log_local(LogKind::System, "ended the turn");
                    self.saves.mark_dirty();
                    self.send(&Message::EndTurn).await;
                }
                let _ = reply.send(result);
            }
            PeerCommand::Chat { message, reply } => {
                self.log_local(LogKind::Chat, message.clone());
                self.send(&Message::Chat {
                    message,
                    timestamp: unix_millis(),
                })
                .await;
                let _ = reply.send(Ok(()));
            }
            PeerCommand::Roll { max, reply } => {
                let _ = reply.send(self.roll_public_die(max).await);
            }
            PeerCommand::Searching {
                deck,
                searching,
                count,
                reply,
            } => {
                self.send(&Message::SearchingDeck {
                    player: Slot::Player,
                    deck_type: deck,
                    searching,
                    count,
                })
                .await;
                let _ = reply.send(Ok(()));
            }
            PeerCommand::RevealHand { reply } => {
                let cards = self.state.serialized().zones(self.local_slot()).hand.clone();
                self.log.system(format!("You revealed {} cards", cards.len()));
                self.send(&Message::RevealHand {
                    cards,
                    nickname: self.config.nickname.clone(),
                })
                .await;
                let _ = reply.send(Ok(()));
            }
            PeerCommand::Ping { x, y, reply } => {
                self.send(&Message::Ping {
                    x: x.clamp(0.0, 1.0),
                    y: y.clamp(0.0, 1.0),
                })
                .await;
                let _ = reply.send(Ok(()));
            }
            PeerCommand::Drag { update, reply } => {
                let msg = match update {
                    DragUpdate::Start { card_id } => Message::DragStart { card_id },
                    DragUpdate::Move { x, y } => Message::DragMove { x, y },
                    DragUpdate::End => Message::DragEnd,
                };
                self.send(&msg).await;
                let _ = reply.send(Ok(()));
            }
            PeerCommand::StartTurnOrderRoll { reply } => {
                self.start_roll().await;
                let _ = reply.send(Ok(()));
            }
            PeerCommand::ChooseTurnOrder {
                starts_first,
                reply,
            } => {
                let _ = reply.send(self.choose_turn_order(starts_first).await);
            }
            PeerCommand::RollHarbinger { player, reply } => {
                let result = match self.require_connected() {
                    Ok(()) => Ok(self.roll_harbinger(player).await),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            PeerCommand::Concede { reply } => {
                self.state.conceded = Some(self.local_slot());
                self.log.system("You conceded");
                self.send(&Message::Concede).await;
                self.mark_finished().await;
                let _ = reply.send(Ok(()));
            }
            PeerCommand::RequestRematch { reply } => {
                if self.remote_wants_rematch {
                    self.send(&Message::RematchAccept).await;
                    self.start_rematch().await;
                } else {
                    self.local_wants_rematch = true;
                    self.log.system("Rematch requested");
                    self.send(&Message::RematchRequest).await;
                }
                let _ = reply.send(Ok(()));
            }
            PeerCommand::AcceptRematch { reply } => {
                let result = if self.remote_wants_rematch {
                    self.send(&Message::RematchAccept).await;
                    self.start_rematch().await;
                    Ok(())
                } else {
                    Err(RealmlinkError::NoRematchRequested)
                };
                let _ = reply.send(result);
            }
            PeerCommand::DropConnection { reply } => {
                if self.link.is_some() {
                    self.close_link().await;
                    self.link_lost(Some("dropped locally".to_string())).await;
                }
                let _ = reply.send(Ok(()));
            }
            PeerCommand::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(Ok(()));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // -----------------------------------------------------------------
    // Session commands
    // -----------------------------------------------------------------

    async fn create(&mut self) -> Result<GameCode, RealmlinkError> {
        let nickname = self.config.nickname.clone();
        let session = self.manager.create(&nickname)?;
        let (code, peer_id) = (session.code.clone(), session.peer_id.clone());

        if let Err(e) = self
            .directory
            .register(&code, &peer_id, &nickname, self.config.public)
            .await
        {
            self.manager.fail(&e.to_string());
            return Err(e.into());
        }

        self.reset_match();
        self.log.system(format!("Created game {code}"));
        self.persist_identity();
        self.open_link();
        Ok(code)
    }

    async fn join(&mut self, code: GameCode) -> Result<(), RealmlinkError> {
        // Resolve the code before a session exists, so a typo leaves
        // nothing behind.
        let host = self.directory.join(&code).await?;
        self.manager.join(code.clone(), &self.config.nickname)?;
        tracing::debug!(%code, %host, "joining");

        self.reset_match();
        self.log.system(format!("Joining game {code}"));
        self.persist_identity();
        self.open_link();
        Ok(())
    }

    fn resume(&mut self) -> Result<(), RealmlinkError> {
        if self.manager.session().is_none() {
            let identity = SessionManager::load_identity(&*self.store)?
                .ok_or(realmlink_session::SessionError::NoSession)?;
            self.manager.restore(identity)?;
        }
        self.begin_resume()
    }

    fn begin_resume(&mut self) -> Result<(), RealmlinkError> {
        self.manager.begin_resume()?;
        self.log.system("Reconnecting");
        self.open_link();
        Ok(())
    }

    async fn leave(&mut self) {
        self.close_link().await;
        self.saves.cancel();
        self.retry_at = None;
        if let Some(session) = self.manager.leave() {
            if session.is_host() {
                if let Err(e) = self.directory.remove(&session.code).await {
                    tracing::warn!(code = %session.code, error = %e, "could not remove listing");
                }
            }
        }
        if let Err(e) = SessionManager::clear_identity(&*self.store) {
            tracing::warn!(error = %e, "could not clear identity");
        }
        if let Err(e) = clear_snapshot(&*self.store) {
            tracing::warn!(error = %e, "could not clear snapshot");
        }
        self.log.system("Left the game");
    }

    // -----------------------------------------------------------------
    // Match commands
    // -----------------------------------------------------------------

    /// Shared state only changes while the other peer can hear about it.
    fn require_connected(&self) -> Result<(), RealmlinkError> {
        if self.manager.status().is_connected() {
            Ok(())
        } else {
            Err(RealmlinkError::NotConnected(self.manager.status()))
        }
    }

    async fn apply_local(&mut self, action: Action) -> Result<Option<u64>, RealmlinkError> {
        self.require_connected()?;
        let action = self.state.revealing(action);
        let canonical = self.perspective().action_to_canonical(action.clone());
        self.state.apply(&canonical)?;
        self.log_local(LogKind::Action, action.name());
        self.saves.mark_dirty();

        let record = action.redacted().to_record(unix_millis())?;
        let frame = self.broadcaster.broadcast_record(record);
        self.send(&frame).await;
        Ok(frame.sequence())
    }

    async fn roll_public_die(&mut self, max: u32) -> Result<u32, RealmlinkError> {
        if max == 0 {
            return Err(ProtocolError::InvalidMessage("a die needs at least one face".into()).into());
        }
        let result = self.rng.random_range(1..=max);
        self.log_local(LogKind::Roll, format!("rolled {result} on a d{max}"));
        self.send(&Message::Roll {
            max,
            result,
            nickname: self.config.nickname.clone(),
            timestamp: unix_millis(),
        })
        .await;
        Ok(result)
    }

    pub(crate) async fn start_roll(&mut self) {
        if !self.roll.start() {
            tracing::debug!("turn-order roll already running");
            return;
        }
        self.log.system("Rolling for turn order");
        self.send(&Message::DiceRollStart).await;
        self.roll_local_die().await;
    }

    /// Rolls our turn-order die if we haven't this round, re-rolling on
    /// ties the roll itself settles.
    pub(crate) async fn roll_local_die(&mut self) {
        while let Some(value) = self.roll.roll_local(&mut self.rng) {
            self.send(&Message::DiceRollResult { result: value }).await;
            let outcome = self.roll.outcome();
            self.log_roll_outcome(outcome, value);
            if outcome != RollOutcome::Tie {
                break;
            }
        }
    }

    pub(crate) fn log_roll_outcome(&mut self, outcome: RollOutcome, last: u8) {
        let remote = self.remote_nickname();
        match outcome {
            RollOutcome::Pending => {}
            RollOutcome::Tie => {
                self.log.system(format!("Both rolled {last}, rolling again"));
            }
            RollOutcome::Won | RollOutcome::Lost => {
                let (ours, theirs) = (
                    self.roll.local().unwrap_or_default(),
                    self.roll.remote().unwrap_or_default(),
                );
                let winner = if outcome == RollOutcome::Won { "You" } else { remote.as_str() };
                self.log
                    .system(format!("{winner} won the roll ({ours} vs {theirs})"));
            }
        }
    }

    async fn choose_turn_order(&mut self, starts_first: bool) -> Result<Slot, RealmlinkError> {
        let first = self.roll.choose(self.role(), starts_first)?;
        self.apply_first_turn(first);
        self.send(&Message::TurnChoice { starts_first }).await;
        self.announce_game_start(first).await;
        Ok(first)
    }

    pub(crate) fn apply_first_turn(&mut self, first: Slot) {
        self.state.set_first_turn(first);
        let who = if first == self.local_slot() {
            self.config.nickname.clone()
        } else {
            self.remote_nickname()
        };
        self.log.system(format!("{who} goes first"));
        self.saves.mark_dirty();
    }

    /// Host only: confirms the settled turn order to the guest.
    pub(crate) async fn announce_game_start(&mut self, first: Slot) {
        if !self.role().is_host() {
            return;
        }
        self.send(&Message::GameStart {
            host_goes_first: first == Slot::Player,
            nickname: Some(self.config.nickname.clone()),
        })
        .await;
    }

    async fn roll_harbinger(&mut self, player: Slot) -> HarbingerDraw {
        self.send(&Message::HarbingerDiceStart { player }).await;
        let draw = HarbingerDraw::roll(&mut self.rng);
        self.state.set_harbinger_positions(draw.positions.clone());
        self.log_local(LogKind::Roll, format!("harbinger dice {:?}", draw.rolls));
        self.saves.mark_dirty();
        self.send(&Message::HarbingerDiceResult {
            rolls: draw.rolls.clone(),
            positions: draw.positions.clone(),
        })
        .await;
        draw
    }

    pub(crate) async fn start_rematch(&mut self) {
        self.reset_match();
        self.log.system("Rematch started");
        if self.role().is_host() {
            if let Some(code) = self.code() {
                if let Err(e) = self.directory.update_status(&code, GameStatus::Playing).await {
                    tracing::warn!(%code, error = %e, "could not update listing");
                }
            }
            self.start_roll().await;
        }
    }

    pub(crate) async fn mark_finished(&mut self) {
        let Some(code) = self.code() else { return };
        if let Err(e) = self.directory.update_status(&code, GameStatus::Finished).await {
            tracing::warn!(%code, error = %e, "could not update listing");
        }
    }

    /// Fresh match: state, roll and rematch flags back to defaults.
    fn reset_match(&mut self) {
        self.state.reset();
        self.roll.reset();
        self.broadcaster.reset_baseline();
        self.local_wants_rematch = false;
        self.remote_wants_rematch = false;
        self.last_restore = None;
    }

    // -----------------------------------------------------------------
    // Link management
    // -----------------------------------------------------------------

    /// Starts listening (host) or dialing (guest) in a background task.
    fn open_link(&mut self) {
        let Some(session) = self.manager.session() else {
            return;
        };
        let code = session.code.to_string();
        let role = session.role;

        self.epoch += 1;
        let epoch = self.epoch;
        if let Some(opener) = self.opener.take() {
            opener.abort();
        }
        let transport = Arc::clone(&self.transport);
        let events = self.link_tx.clone();
        self.opener = Some(tokio::spawn(async move {
            let result = match role {
                Role::Host => transport.accept(&code).await,
                Role::Guest => transport.connect(&code).await,
            };
            let event = match result {
                Ok(conn) => LinkEvent::Opened { epoch, conn },
                Err(e) => LinkEvent::OpenFailed {
                    epoch,
                    error: e.to_string(),
                },
            };
            let _ = events.send(event);
        }));

        if role.is_host() {
            if let Err(e) = self.manager.listening() {
                tracing::warn!(error = %e, "could not enter waiting");
            }
        }
    }

    async fn handle_link(&mut self, event: LinkEvent<T::Connection>) {
        match event {
            LinkEvent::Opened { epoch, conn } if epoch == self.epoch => self.link_opened(conn).await,
            LinkEvent::Opened { conn, .. } => {
                tracing::debug!(id = %conn.id(), "closing link opened by a stale attempt");
                let _ = conn.close().await;
            }
            LinkEvent::OpenFailed { epoch, error } if epoch == self.epoch => self.open_failed(&error),
            LinkEvent::Frame { epoch, data } if epoch == self.epoch => self.handle_frame(&data).await,
            LinkEvent::Closed { epoch, error } if epoch == self.epoch => {
                self.link = None;
                self.link_lost(error).await;
            }
            _ => tracing::trace!("stale link event ignored"),
        }
    }

    async fn link_opened(&mut self, conn: T::Connection) {
        let conn = Arc::new(conn);
        tracing::info!(id = %conn.id(), "link opened");
        self.opener = None;
        self.open_attempts = 0;
        self.link = Some(Arc::clone(&conn));

        let epoch = self.epoch;
        let events = self.link_tx.clone();
        self.reader = Some(tokio::spawn(async move {
            loop {
                let event = match conn.recv().await {
                    Ok(Some(data)) => LinkEvent::Frame { epoch, data },
                    Ok(None) => LinkEvent::Closed { epoch, error: None },
                    Err(e) => LinkEvent::Closed {
                        epoch,
                        error: Some(e.to_string()),
                    },
                };
                let closed = matches!(event, LinkEvent::Closed { .. });
                if events.send(event).is_err() || closed {
                    break;
                }
            }
        }));

        if let Err(e) = self.manager.transport_connected() {
            tracing::warn!(error = %e, "unexpected link while not connecting");
        }
        if let Some(session) = self.manager.session() {
            let hello = Message::Hello {
                nickname: session.nickname.clone(),
                peer_id: session.peer_id.clone(),
            };
            self.send(&hello).await;
        }
    }

    fn open_failed(&mut self, error: &str) {
        tracing::warn!(error, "could not open link");
        self.opener = None;
        match self.manager.status() {
            ConnectionStatus::Reconnecting { .. } => match self.manager.resume_failed(error) {
                Ok(delay) => self.retry_at = Some(Instant::now() + delay),
                Err(e) => {
                    self.log.system(format!("Could not reconnect: {e}"));
                }
            },
            ConnectionStatus::Initializing | ConnectionStatus::Waiting => {
                self.open_attempts += 1;
                if self.open_attempts >= self.manager.retry_config().max_attempts {
                    self.manager.fail(error);
                    self.log.system(format!("Could not connect: {error}"));
                } else {
                    let delay = self.manager.backoff(self.open_attempts);
                    self.retry_at = Some(Instant::now() + delay);
                }
            }
            _ => {}
        }
    }

    /// Transport gone without a `leave`: keep the session, save, and try to
    /// come back.
    async fn link_lost(&mut self, error: Option<String>) {
        match &error {
            Some(e) => tracing::warn!(error = %e, "link lost"),
            None => tracing::info!("link closed by remote"),
        }
        if let Some(flush) = self.saves.flush_now() {
            self.flush(flush).await;
        }
        if let Err(e) = self.manager.transport_lost() {
            tracing::debug!(error = %e, "link lost outside a live session");
            return;
        }
        self.state.clear_transient();
        self.log.system("Connection lost");
        if self.roll.interrupt() {
            self.log.system("Turn-order roll interrupted");
        }
        if self.config.auto_resume {
            if let Err(e) = self.begin_resume() {
                tracing::warn!(error = %e, "could not start resume");
            }
        }
    }

    /// Closes the current link and stops its tasks. Events already queued
    /// from it become stale.
    async fn close_link(&mut self) {
        self.epoch += 1;
        for task in [self.opener.take(), self.reader.take()].into_iter().flatten() {
            task.abort();
        }
        if let Some(conn) = self.link.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "close failed");
            }
        }
    }

    pub(crate) async fn send(&self, msg: &Message) {
        let kind = msg.kind();
        let Some(conn) = &self.link else {
            tracing::debug!(%kind, "no link, frame dropped");
            return;
        };
        let bytes = match self.codec.encode(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "encode failed");
                return;
            }
        };
        let result = if kind.is_visual() {
            conn.send_unreliable(&bytes).await
        } else {
            conn.send(&bytes).await
        };
        if let Err(e) = result {
            tracing::warn!(%kind, error = %e, "send failed");
        }
    }

    async fn resend_due(&mut self) {
        for frame in self.broadcaster.due_retries(Instant::now()) {
            self.send(&frame).await;
        }
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Host: pushes the public board. Guest: saves its hidden zones locally
    /// and to the directory.
    async fn flush(&mut self, flush: Flush) {
        let Some(session) = self.manager.session() else {
            return;
        };
        let code = session.code.clone();
        if session.is_host() {
            let public = redact_private(
                &redact_private(self.state.serialized(), Slot::Player),
                Slot::Opponent,
            );
            if let Err(e) = self.directory.push_board_snapshot(&code, &public).await {
                tracing::warn!(%code, error = %e, "board snapshot not pushed");
            }
        } else if self.state.has_known_private_zones(Slot::Opponent)
            || self.state.serialized().opponent.private_zones_empty()
        {
            // An empty capture still supersedes the last one, which may
            // hold cards that have since been played.
            let snapshot =
                PrivateSnapshot::capture(code.clone(), &self.state.serialized().opponent, unix_millis());
            if let Err(e) = save_snapshot(&*self.store, &snapshot) {
                tracing::warn!(%code, error = %e, "snapshot not saved");
            }
            if let Err(e) = self.directory.push_private_snapshot(&code, &snapshot).await {
                tracing::warn!(%code, error = %e, "snapshot not pushed");
            }
        }
        tracing::debug!(%code, marks = flush.marks, forced = flush.forced, "state flushed");
    }

    pub(crate) fn persist_identity(&self) {
        if let Err(e) = self.manager.persist(&*self.store, unix_millis()) {
            tracing::warn!(error = %e, "identity not saved");
        }
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    /// Logs an entry authored by this peer.
    pub(crate) fn log_local(&mut self, kind: LogKind, message: impl Into<String>) {
        let slot = self.local_slot();
        self.log.push(kind, Some(slot), Some(&self.config.nickname), message);
    }

    pub(crate) fn role(&self) -> Role {
        self.manager.session().map_or(Role::Host, |s| s.role)
    }

    pub(crate) fn perspective(&self) -> Perspective {
        Perspective::new(self.role())
    }

    pub(crate) fn local_slot(&self) -> Slot {
        self.role().local_slot()
    }

    pub(crate) fn remote_slot(&self) -> Slot {
        self.local_slot().swapped()
    }

    pub(crate) fn remote_nickname(&self) -> String {
        self.manager
            .session()
            .and_then(|s| s.remote.as_ref())
            .map_or_else(|| "Opponent".to_string(), |r| r.nickname.clone())
    }

    pub(crate) fn code(&self) -> Option<GameCode> {
        self.manager.session().map(|s| s.code.clone())
    }

    fn publish(&self) {
        let session = self.manager.session();
        let pending = self.broadcaster.pending();
        self.view.send_replace(PeerView {
            status: self.manager.status(),
            code: session.map(|s| s.code.clone()),
            role: session.map(|s| s.role),
            remote_nickname: session.and_then(|s| s.remote.as_ref()).map(|r| r.nickname.clone()),
            state: self.state.clone(),
            log: self.log.entries().to_vec(),
            pending: pending.sequences(),
            unacknowledged: pending.unacknowledged(),
            rolling: self.roll.is_rolling(),
            roll: self.roll.decided(),
            remote_wants_rematch: self.remote_wants_rematch,
            last_restore: self.last_restore,
        });
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
