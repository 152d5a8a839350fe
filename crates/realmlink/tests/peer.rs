//! End-to-end peer scenarios over the in-memory transport, directory and
//! store. The clock is paused, so retry and debounce timers run instantly.

use std::time::Duration;

use realmlink::prelude::*;
use realmlink::protocol::{
    CellPos, Codec, JsonCodec, Message, PeerId, SerializedGameState, decode_message,
};
use realmlink::session::{SessionError, load_snapshot};
use realmlink::transport::Connection;

// =========================================================================
// Helpers
// =========================================================================

fn config(nickname: &str, seed: u64) -> PeerConfig {
    PeerConfig {
        rng_seed: Some(seed),
        ..PeerConfig::named(nickname)
    }
}

fn spell_deck(prefix: &str, n: usize) -> Vec<Card> {
    (0..n)
        .map(|i| Card::new(format!("{prefix}-{i}"), format!("Spell {i}"), CardKind::Spell))
        .collect()
}

struct Table {
    host: PeerHandle,
    guest: PeerHandle,
    transport: MemoryTransport,
    directory: MemoryDirectory,
    guest_store: MemoryStore,
    code: GameCode,
}

/// Host creates, guest joins, both finish the handshake.
async fn connected_table() -> Table {
    connected_table_with(config("Brook", 2)).await
}

async fn connected_table_with(guest_config: PeerConfig) -> Table {
    let transport = MemoryTransport::new();
    let directory = MemoryDirectory::new();
    let guest_store = MemoryStore::new();

    let host = Peer::spawn(config("Ada", 1), transport.clone(), directory.clone(), MemoryStore::new());
    let guest = Peer::spawn(guest_config, transport.clone(), directory.clone(), guest_store.clone());

    let code = host.create().await.unwrap();
    guest.join(code.clone()).await.unwrap();
    host.wait_for(PeerView::is_connected).await.unwrap();
    guest.wait_for(PeerView::is_connected).await.unwrap();

    Table {
        host,
        guest,
        transport,
        directory,
        guest_store,
        code,
    }
}

/// Waits for both peers to settle the turn-order roll, then lets the winner
/// go first. Returns the canonical seat that moves first.
async fn settle_turn_order(table: &Table) -> Slot {
    let host = table.host.wait_for(|v| v.roll.is_some()).await.unwrap();
    table.guest.wait_for(|v| v.roll.is_some()).await.unwrap();
    let winner = if host.roll == Some(RollOutcome::Won) {
        &table.host
    } else {
        &table.guest
    };
    winner.choose_turn_order(true).await.unwrap()
}

/// Guest loads a 10-card spell deck and draws 7.
async fn guest_draws_seven(table: &Table) {
    table
        .guest
        .apply(Action::LoadDeck {
            player: Slot::Player,
            deck: DeckType::Spell,
            cards: spell_deck("g", 10),
        })
        .await
        .unwrap();
    table
        .guest
        .apply(Action::DrawCard {
            player: Slot::Player,
            deck: DeckType::Spell,
            count: 7,
        })
        .await
        .unwrap();
    table
        .host
        .wait_for(|v| v.state.serialized().opponent.hand.len() == 7)
        .await
        .unwrap();
}

fn play_to_cell(card_id: &str, pos: CellPos) -> Action {
    Action::MoveCard {
        card_id: card_id.into(),
        to: Zone::Cell { pos },
        index: None,
        card: None,
    }
}

fn units_at(view: &PeerView, pos: CellPos) -> Vec<Card> {
    view.state
        .serialized()
        .board
        .cell(pos)
        .map(|cell| cell.units.clone())
        .unwrap_or_default()
}

async fn wait_listening(transport: &MemoryTransport, code: &GameCode) {
    while !transport.is_listening(code.as_str()).await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =========================================================================
// Handshake and turn order
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_create_join_roll_and_choose_converge() {
    let table = connected_table().await;
    assert_eq!(table.code.as_str().len(), 6);

    let host = table.host.view();
    let guest = table.guest.view();
    assert_eq!(host.role, Some(Role::Host));
    assert_eq!(guest.role, Some(Role::Guest));
    assert_eq!(host.remote_nickname.as_deref(), Some("Brook"));
    assert_eq!(guest.remote_nickname.as_deref(), Some("Ada"));
    assert!(host.log_contains("Brook joined"));

    let first = settle_turn_order(&table).await;
    let host = table
        .host
        .wait_for(|v| v.log_contains("goes first"))
        .await
        .unwrap();
    let guest = table
        .guest
        .wait_for(|v| v.log_contains("goes first"))
        .await
        .unwrap();

    assert_eq!(host.state.current_turn(), first);
    assert_eq!(guest.state.current_turn(), first);
    assert_eq!(host.state.turn_number(), 1);

    // Exactly one side won.
    assert_ne!(host.roll, guest.roll);
    assert_eq!(
        table.directory.status(&table.code).await,
        Some(realmlink::session::GameStatus::Playing)
    );
}

#[tokio::test(start_paused = true)]
async fn test_choose_turn_order_rejected_for_loser() {
    let table = connected_table().await;
    let host = table.host.wait_for(|v| v.roll.is_some()).await.unwrap();
    let guest = table.guest.wait_for(|v| v.roll.is_some()).await.unwrap();
    let loser = if host.roll == Some(RollOutcome::Lost) {
        &table.host
    } else {
        assert_eq!(guest.roll, Some(RollOutcome::Lost));
        &table.guest
    };
    let err = loser.choose_turn_order(true).await.unwrap_err();
    assert!(matches!(err, RealmlinkError::Sync(_)));
}

#[tokio::test(start_paused = true)]
async fn test_join_unknown_code_leaves_no_session() {
    let guest = Peer::spawn(
        PeerConfig::named("Brook"),
        MemoryTransport::new(),
        MemoryDirectory::new(),
        MemoryStore::new(),
    );
    let err = guest
        .join(GameCode::parse("ABCDEF").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RealmlinkError::Session(SessionError::GameNotFound(_))));
    assert_eq!(guest.view().code, None);
}

#[tokio::test(start_paused = true)]
async fn test_turn_order_roll_cut_by_a_drop_restarts_on_resume() {
    let transport = MemoryTransport::new();
    let host = Peer::spawn(config("Ada", 1), transport.clone(), MemoryDirectory::new(), MemoryStore::new());
    let code = host.create().await.unwrap();
    let codec = JsonCodec;
    let hello = codec
        .encode(&Message::Hello {
            nickname: "Mallory".into(),
            peer_id: PeerId("raw".into()),
        })
        .unwrap();

    // The guest says hello, then vanishes before rolling its die.
    wait_listening(&transport, &code).await;
    let first = transport.connect(code.as_str()).await.unwrap();
    first.send(&hello).await.unwrap();
    host.wait_for(|v| v.rolling).await.unwrap();
    first.close().await.unwrap();
    let view = host.wait_for(|v| !v.is_connected()).await.unwrap();
    assert!(!view.rolling);
    assert!(view.log_contains("Turn-order roll interrupted"));

    wait_listening(&transport, &code).await;
    let second = transport.connect(code.as_str()).await.unwrap();
    second.send(&hello).await.unwrap();

    let mut host_die = None;
    while host_die.is_none() {
        let frame = tokio::time::timeout(Duration::from_secs(1), second.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::DiceRollResult { result } = decode_message(&codec, &frame).unwrap() {
            host_die = Some(result);
        }
    }
    let ours = if host_die == Some(1) { 2 } else { 1 };
    let reply = codec.encode(&Message::DiceRollResult { result: ours }).unwrap();
    second.send(&reply).await.unwrap();

    let view = host.wait_for(|v| v.roll.is_some()).await.unwrap();
    let expected = if ours > host_die.unwrap() {
        RollOutcome::Lost
    } else {
        RollOutcome::Won
    };
    assert_eq!(view.roll, Some(expected));
    assert!(!view.rolling);
}

// =========================================================================
// Actions and acks
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_action_acked_clears_pending() {
    let table = connected_table().await;

    let sequence = table
        .host
        .apply(Action::SetLife {
            player: Slot::Player,
            value: 15,
        })
        .await
        .unwrap();
    assert!(sequence.is_some());

    let guest = table
        .guest
        .wait_for(|v| v.state.serialized().player.life == 15)
        .await
        .unwrap();
    assert!(guest.log_contains("setLife"));
    table.host.wait_for(|v| v.pending.is_empty()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_guest_action_lands_in_canonical_opponent_slot() {
    let table = connected_table().await;
    guest_draws_seven(&table).await;

    let host = table.host.view();
    let hand = &host.state.serialized().opponent.hand;
    assert!(hand.iter().all(Card::is_hidden), "host never sees guest cards");

    let guest = table.guest.view();
    assert_eq!(guest.state.serialized().opponent.hand, spell_deck("g", 7));
    // The guest's own UI shows its hand me-first.
    assert_eq!(guest.local_view().player.hand, spell_deck("g", 7));
}

// =========================================================================
// Reconnect and reconcile
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_dropped_link_resumes_and_keeps_guest_hand() {
    let table = connected_table().await;
    settle_turn_order(&table).await;
    guest_draws_seven(&table).await;

    table.guest.drop_connection().await.unwrap();
    let guest = table
        .guest
        .wait_for(|v| v.is_connected() && v.last_restore.is_some())
        .await
        .unwrap();

    assert_eq!(guest.last_restore, Some(RestoreSource::Memory));
    assert_eq!(guest.state.serialized().opponent.hand, spell_deck("g", 7));
    assert!(guest.log_contains("Connection lost"));
    assert!(guest.log_contains("restored from memory"));
    assert!(
        guest.state.serialized().player.hand.iter().all(Card::is_hidden),
        "host hand arrives redacted"
    );
    table.host.wait_for(PeerView::is_connected).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reloaded_guest_restores_hand_from_local_snapshot() {
    let table = connected_table().await;
    settle_turn_order(&table).await;
    guest_draws_seven(&table).await;

    // Let the debounced save run, then "close the tab".
    tokio::time::sleep(Duration::from_secs(4)).await;
    let Table {
        host,
        guest,
        transport,
        directory,
        guest_store,
        ..
    } = table;
    drop(guest);

    let reloaded = Peer::spawn(config("Brook", 3), transport, directory, guest_store);
    reloaded.resume().await.unwrap();
    let view = reloaded
        .wait_for(|v| v.is_connected() && v.last_restore.is_some())
        .await
        .unwrap();

    assert_eq!(view.role, Some(Role::Guest));
    assert_eq!(view.last_restore, Some(RestoreSource::LocalSnapshot));
    assert_eq!(view.state.serialized().opponent.hand, spell_deck("g", 7));
    host.wait_for(|v| v.log_contains("Brook reconnected")).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_card_played_from_hand_is_public_and_survives_resume() {
    let table = connected_table().await;
    settle_turn_order(&table).await;
    guest_draws_seven(&table).await;
    let pos = CellPos::new(2, 2).unwrap();

    table.guest.apply(play_to_cell("g-0", pos)).await.unwrap();
    let host = table
        .host
        .wait_for(|v| !units_at(v, pos).is_empty())
        .await
        .unwrap();
    assert_eq!(units_at(&host, pos), vec![spell_deck("g", 1)[0].clone()]);
    assert_eq!(host.state.serialized().opponent.hand.len(), 6);

    table.guest.drop_connection().await.unwrap();
    let guest = table
        .guest
        .wait_for(|v| v.is_connected() && v.last_restore.is_some())
        .await
        .unwrap();
    assert_eq!(units_at(&guest, pos), vec![spell_deck("g", 1)[0].clone()]);
    assert_eq!(guest.state.serialized().opponent.hand, spell_deck("g", 7)[1..].to_vec());
    assert!(guest.state.duplicate_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_actions_refused_while_offline_keep_every_card() {
    let table = connected_table_with(PeerConfig {
        auto_resume: false,
        ..config("Brook", 2)
    })
    .await;
    settle_turn_order(&table).await;
    guest_draws_seven(&table).await;
    let before = table.guest.view().state.serialized().clone();

    table.guest.drop_connection().await.unwrap();
    let err = table
        .guest
        .apply(play_to_cell("g-0", CellPos::new(1, 1).unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, RealmlinkError::NotConnected(_)));
    assert!(matches!(
        table.guest.end_turn().await,
        Err(RealmlinkError::NotConnected(_))
    ));
    assert_eq!(table.guest.view().state.serialized(), &before);

    table.guest.resume().await.unwrap();
    let guest = table
        .guest
        .wait_for(|v| v.is_connected() && v.last_restore.is_some())
        .await
        .unwrap();
    assert_eq!(guest.last_restore, Some(RestoreSource::Memory));
    assert_eq!(guest.state.serialized().opponent.hand, spell_deck("g", 7));
    assert_eq!(guest.state.turn_number(), before.turn_number);

    let sequence = table
        .guest
        .apply(play_to_cell("g-0", CellPos::new(1, 1).unwrap()))
        .await
        .unwrap();
    assert!(sequence.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_emptied_hand_replaces_saved_snapshot() {
    let table = connected_table().await;
    settle_turn_order(&table).await;
    table
        .guest
        .apply(Action::LoadDeck {
            player: Slot::Player,
            deck: DeckType::Spell,
            cards: spell_deck("g", 1),
        })
        .await
        .unwrap();
    table
        .guest
        .apply(Action::DrawCard {
            player: Slot::Player,
            deck: DeckType::Spell,
            count: 1,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    let saved = load_snapshot(&table.guest_store).unwrap().unwrap();
    assert!(saved.has_cards());

    let pos = CellPos::new(0, 3).unwrap();
    table.guest.apply(play_to_cell("g-0", pos)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    let saved = load_snapshot(&table.guest_store).unwrap().unwrap();
    assert!(!saved.has_cards(), "played card no longer in the snapshot");

    let Table {
        host,
        guest,
        transport,
        directory,
        guest_store,
        ..
    } = table;
    host.wait_for(|v| units_at(v, pos).len() == 1).await.unwrap();
    drop(guest);

    let reloaded = Peer::spawn(config("Brook", 3), transport, directory, guest_store);
    reloaded.resume().await.unwrap();
    let view = reloaded
        .wait_for(|v| v.is_connected() && v.last_restore.is_some())
        .await
        .unwrap();
    assert!(view.state.serialized().opponent.hand.is_empty());
    assert_eq!(units_at(&view, pos), spell_deck("g", 1));
    assert!(view.state.duplicate_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resume_without_saved_identity_fails() {
    let peer = Peer::spawn(
        PeerConfig::named("Brook"),
        MemoryTransport::new(),
        MemoryDirectory::new(),
        MemoryStore::new(),
    );
    let err = peer.resume().await.unwrap_err();
    assert!(matches!(err, RealmlinkError::Session(SessionError::NoSession)));
}

// =========================================================================
// Host authority
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_host_ignores_full_sync_from_guest() {
    let transport = MemoryTransport::new();
    let host = Peer::spawn(config("Ada", 1), transport.clone(), MemoryDirectory::new(), MemoryStore::new());
    let code = host.create().await.unwrap();
    wait_listening(&transport, &code).await;

    // A hand-rolled guest speaking raw frames.
    let conn = transport.connect(code.as_str()).await.unwrap();
    let codec = JsonCodec;
    let send = |msg: Message| {
        let bytes = codec.encode(&msg).unwrap();
        let conn = &conn;
        async move { conn.send(&bytes).await.unwrap() }
    };
    send(Message::Hello {
        nickname: "Mallory".into(),
        peer_id: PeerId("raw".into()),
    })
    .await;
    let forged = SerializedGameState {
        turn_number: 9,
        ..SerializedGameState::default()
    };
    send(Message::FullSync {
        state: Box::new(forged),
        sequence: 1,
    })
    .await;
    conn.send(b"not json").await.unwrap();
    send(Message::Chat {
        message: "after sync".into(),
        timestamp: 0,
    })
    .await;

    let view = host.wait_for(|v| v.log_contains("after sync")).await.unwrap();
    assert_ne!(view.state.turn_number(), 9);
    assert!(view.is_connected(), "bad frames don't close the link");

    while let Ok(Ok(Some(frame))) =
        tokio::time::timeout(Duration::from_millis(100), conn.recv()).await
    {
        let msg = decode_message(&codec, &frame).unwrap();
        assert_ne!(msg, Message::Ack { sequence: 1 });
    }
}

// =========================================================================
// Match lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_concede_then_rematch_resets_and_rerolls() {
    let table = connected_table().await;
    settle_turn_order(&table).await;
    table
        .host
        .apply(Action::SetLife {
            player: Slot::Player,
            value: 3,
        })
        .await
        .unwrap();

    let err = table.guest.accept_rematch().await.unwrap_err();
    assert!(matches!(err, RealmlinkError::NoRematchRequested));

    table.guest.concede().await.unwrap();
    let host = table.host.wait_for(|v| v.state.conceded.is_some()).await.unwrap();
    assert_eq!(host.state.conceded, Some(Slot::Opponent));

    table.host.request_rematch().await.unwrap();
    table
        .guest
        .wait_for(|v| v.remote_wants_rematch)
        .await
        .unwrap();
    table.guest.accept_rematch().await.unwrap();

    let host = table
        .host
        .wait_for(|v| v.log_contains("Rematch started") && v.roll.is_some())
        .await
        .unwrap();
    assert_eq!(host.state.conceded, None);
    assert_eq!(host.state.serialized().player.life, SerializedGameState::default().player.life);
    table.guest.wait_for(|v| v.roll.is_some()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_chat_ping_and_search_reach_remote() {
    let table = connected_table().await;

    table.guest.chat("hello there").await.unwrap();
    table.guest.ping(0.25, 1.5).await.unwrap();
    table
        .guest
        .set_searching(DeckType::Site, true, Some(3))
        .await
        .unwrap();

    let host = table
        .host
        .wait_for(|v| v.state.searching.is_some())
        .await
        .unwrap();
    assert!(host.log_contains("hello there"));
    let ping = host.state.last_ping.unwrap();
    assert_eq!((ping.x, ping.y), (0.25, 1.0));
    let search = host.state.searching.unwrap();
    assert_eq!(search.player, Slot::Opponent);
    assert_eq!(search.count, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_leave_removes_listing_and_identity() {
    let table = connected_table().await;
    table.host.leave().await.unwrap();
    assert_eq!(table.directory.status(&table.code).await, None);
    assert!(matches!(
        table.host.view().status,
        ConnectionStatus::Disconnected { .. }
    ));
    assert!(matches!(
        table.host.chat("anyone?").await,
        Err(RealmlinkError::PeerStopped)
    ));
}
