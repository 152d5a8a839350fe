//! Inbound frame dispatch: decode, then route by message type.
//!
//! Every frame that reaches here came from the current link. Frames that
//! fail to decode are dropped with a warning and never close the link.

use realmlink_protocol::{Codec, Message, PeerId, SerializedGameState, Slot, decode_message};
use realmlink_session::{Directory, GameStatus, HelloOutcome, load_snapshot};
use realmlink_state::{Action, LogKind, PingMark, RevealedHand, SearchStatus, redact_private, unix_millis};
use realmlink_sync::{Delivery, HarbingerDraw, RollOutcome, first_seat};
use realmlink_transport::Transport;

use crate::peer::PeerActor;

impl<T: Transport, D: Directory, C: Codec> PeerActor<T, D, C> {
    pub(crate) async fn handle_frame(&mut self, data: &[u8]) {
        let msg = match decode_message(&self.codec, data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, len = data.len(), "dropping undecodable frame");
                return;
            }
        };
        tracing::trace!(kind = %msg.kind(), "frame received");

        match msg {
            Message::Hello { nickname, peer_id } => self.on_hello(&nickname, peer_id).await,
            Message::GameStart {
                host_goes_first,
                nickname,
            } => self.on_game_start(host_goes_first, nickname),
            Message::FullSync { state, sequence } => self.on_full_sync(*state, sequence).await,
            Message::Action { action, sequence } => {
                self.send(&Message::Ack { sequence }).await;
                if self.window.accept(sequence) == Delivery::Duplicate {
                    tracing::debug!(sequence, "duplicate action re-acked");
                    return;
                }
                match Action::from_record(&action) {
                    Ok(action) => self.apply_remote(action),
                    Err(e) => tracing::warn!(sequence, error = %e, "unreadable action"),
                }
            }
            Message::Ack { sequence } => {
                if !self.broadcaster.on_ack(sequence) {
                    tracing::debug!(sequence, "ack for nothing pending");
                }
            }
            Message::EndTurn => {
                self.state.end_turn();
                self.log_remote(LogKind::System, "ended the turn");
                self.saves.mark_dirty();
            }
            Message::Chat { message, .. } => self.log_remote(LogKind::Chat, message),
            Message::Roll {
                max,
                result,
                nickname,
                ..
            } => {
                let slot = self.remote_slot();
                self.log.push(
                    LogKind::Roll,
                    Some(slot),
                    Some(&nickname),
                    format!("rolled {result} on a d{max}"),
                );
            }
            Message::SearchingDeck {
                player,
                deck_type,
                searching,
                count,
            } => {
                let player = self.perspective().remote_to_canonical(player);
                self.state.searching = searching.then_some(SearchStatus {
                    player,
                    deck: deck_type,
                    count,
                });
            }
            Message::RevealHand { cards, nickname } => {
                self.log.system(format!("{nickname} revealed {} cards", cards.len()));
                self.state.revealed_hand = Some(RevealedHand { nickname, cards });
            }
            Message::Ping { x, y } => self.state.last_ping = Some(PingMark { x, y }),
            Message::DragStart { card_id } => self.state.remote_drag = Some(card_id),
            // Positions are a pure render concern; the flag is enough here.
            Message::DragMove { .. } => {}
            Message::DragEnd => self.state.remote_drag = None,
            Message::DiceRollStart => {
                if self.roll.start() {
                    self.log.system("Rolling for turn order");
                    self.roll_local_die().await;
                }
            }
            Message::DiceRollResult { result } => self.on_dice_result(result).await,
            Message::TurnChoice { starts_first } => {
                let first = first_seat(!self.role().is_host(), starts_first);
                self.apply_first_turn(first);
                self.announce_game_start(first).await;
            }
            Message::HarbingerDiceStart { player } => {
                let player = self.perspective().remote_to_canonical(player);
                tracing::debug!(%player, "remote harbinger roll started");
                self.log_remote(LogKind::Roll, "is rolling the harbinger dice");
            }
            Message::HarbingerDiceResult { rolls, positions } => {
                match HarbingerDraw::from_wire(rolls, positions) {
                    Ok(draw) => {
                        self.log_remote(LogKind::Roll, format!("harbinger dice {:?}", draw.rolls));
                        self.state.set_harbinger_positions(draw.positions);
                        self.saves.mark_dirty();
                    }
                    Err(e) => tracing::warn!(error = %e, "harbinger result rejected"),
                }
            }
            Message::Concede => {
                self.state.conceded = Some(self.remote_slot());
                let remote = self.remote_nickname();
                self.log.system(format!("{remote} conceded"));
                if self.role().is_host() {
                    self.mark_finished().await;
                }
            }
            Message::RematchRequest => {
                self.remote_wants_rematch = true;
                let remote = self.remote_nickname();
                self.log.system(format!("{remote} wants a rematch"));
                // Both asked: the host settles it so only one accept flows.
                if self.local_wants_rematch && self.role().is_host() {
                    self.send(&Message::RematchAccept).await;
                    self.start_rematch().await;
                }
            }
            Message::RematchAccept => {
                if self.local_wants_rematch {
                    self.start_rematch().await;
                } else {
                    tracing::debug!("rematch accept without a request");
                }
            }
        }
    }

    async fn on_hello(&mut self, nickname: &str, peer_id: PeerId) {
        let outcome = match self.manager.hello_received(nickname, peer_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "hello out of order");
                return;
            }
        };
        let is_host = self.role().is_host();

        match outcome {
            HelloOutcome::Duplicate => tracing::debug!(nickname, "repeated hello"),
            HelloOutcome::FirstConnect => {
                self.window.reset();
                self.log.system(format!("{nickname} joined"));
                self.persist_identity();
                if is_host {
                    if let Some(code) = self.code() {
                        if let Err(e) = self.directory.update_status(&code, GameStatus::Playing).await {
                            tracing::warn!(%code, error = %e, "could not update listing");
                        }
                    }
                    if !self.state.has_progress() {
                        self.start_roll().await;
                    }
                }
            }
            HelloOutcome::Resumed => {
                self.window.reset();
                self.broadcaster.reset_baseline();
                self.log.system(format!("{nickname} reconnected"));
                self.persist_identity();
                if is_host && self.state.has_progress() {
                    let public = redact_private(self.state.serialized(), Slot::Player);
                    self.push_full_sync(public).await;
                }
                let unsettled = self.roll.decided().is_none()
                    && (self.roll.was_interrupted() || !self.state.has_progress());
                if is_host && unsettled {
                    self.start_roll().await;
                }
            }
        }
    }

    async fn push_full_sync(&mut self, state: SerializedGameState) {
        let frame = self.broadcaster.full_sync(state);
        tracing::info!(sequence = ?frame.sequence(), "pushing full sync");
        self.send(&frame).await;
    }

    fn on_game_start(&mut self, host_goes_first: bool, nickname: Option<String>) {
        if self.role().is_host() {
            tracing::warn!("host ignoring game_start");
            return;
        }
        // The guest already applied the choice from `turn_choice` when it
        // got one; this only fills in a missed one.
        if self.state.turn_number() <= 1 {
            let first = if host_goes_first { Slot::Player } else { Slot::Opponent };
            self.state.set_first_turn(first);
            self.saves.mark_dirty();
        }
        if let Some(nickname) = nickname {
            tracing::debug!(host = %nickname, "game started");
        }
    }

    async fn on_full_sync(&mut self, incoming: SerializedGameState, sequence: u64) {
        if self.role().is_host() {
            tracing::warn!(sequence, "host ignoring full_sync from guest");
            return;
        }
        if self.window.accept(sequence) == Delivery::Duplicate {
            self.send(&Message::Ack { sequence }).await;
            return;
        }
        let Some(code) = self.code() else { return };

        let local = match load_snapshot(&*self.store) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "could not read local snapshot");
                None
            }
        };
        let directory = &self.directory;
        let fetch_code = &code;
        let merged = self
            .reconciler
            .reconcile(&code, &self.state, incoming, local.as_ref(), unix_millis(), move || async move {
                match directory.pull_private_snapshot(fetch_code).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        tracing::warn!(code = %fetch_code, error = %e, "remote snapshot unavailable");
                        None
                    }
                }
            })
            .await;

        self.state.replace(merged.state);
        self.state.clear_transient();
        self.last_restore = Some(merged.source);
        self.send(&Message::Ack { sequence }).await;
        self.log.system(format!("Game state restored from {}", merged.source));
        self.saves.mark_dirty();
    }

    fn apply_remote(&mut self, action: Action) {
        let name = action.name();
        let canonical = self.perspective().remote_action_to_canonical(action);
        if let Err(e) = self.state.apply(&canonical) {
            tracing::warn!(name, error = %e, "remote action rejected");
            return;
        }
        self.log_remote(LogKind::Action, name);
        self.saves.mark_dirty();
    }

    async fn on_dice_result(&mut self, result: u8) {
        let outcome = self.roll.record_remote(result);
        self.log_roll_outcome(outcome, result);
        if matches!(outcome, RollOutcome::Pending | RollOutcome::Tie) && self.roll.local().is_none() {
            self.roll_local_die().await;
        }
    }

    /// Logs an entry authored by the remote peer.
    fn log_remote(&mut self, kind: LogKind, message: impl Into<String>) {
        let slot = self.remote_slot();
        let nickname = self.remote_nickname();
        self.log.push(kind, Some(slot), Some(&nickname), message);
    }
}
