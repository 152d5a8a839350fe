use realmlink::prelude::*;
use realmlink::state::LogEntry;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Decks
// ---------------------------------------------------------------------------

fn deck(owner: &str, kind: CardKind, names: &[&str]) -> Vec<Card> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Card::new(format!("{owner}-{i}"), *name, kind))
        .collect()
}

fn spellbook(owner: &str) -> Vec<Card> {
    deck(
        owner,
        CardKind::Spell,
        &[
            "Pudge Butcher", "Lightning Bolt", "Cave Trolls", "Sling Pixies",
            "Ring of Morrigan", "Raise Dead", "Wicker Manikin", "Dragonlord",
            "Blink", "Minor Explosion",
        ],
    )
}

// ---------------------------------------------------------------------------
// Match script
// ---------------------------------------------------------------------------

struct Hotseat {
    host: PeerHandle,
    guest: PeerHandle,
}

impl Hotseat {
    /// Both players at one table, connected over the in-process transport.
    async fn seat() -> Result<Self, RealmlinkError> {
        let transport = MemoryTransport::new();
        let directory = MemoryDirectory::new();
        let host = Peer::spawn(
            PeerConfig::named("Ada"),
            transport.clone(),
            directory.clone(),
            MemoryStore::new(),
        );
        let guest = Peer::spawn(PeerConfig::named("Brook"), transport, directory, MemoryStore::new());

        let code = host.create().await?;
        println!("game code: {code}");
        guest.join(code).await?;
        host.wait_for(PeerView::is_connected).await?;
        guest.wait_for(PeerView::is_connected).await?;
        Ok(Self { host, guest })
    }

    /// Waits out the turn-order roll and lets the winner start.
    async fn roll_for_turn(&self) -> Result<Slot, RealmlinkError> {
        let host = self.host.wait_for(|v| v.roll.is_some()).await?;
        self.guest.wait_for(|v| v.roll.is_some()).await?;
        let winner = if host.roll == Some(RollOutcome::Won) { &self.host } else { &self.guest };
        winner.choose_turn_order(true).await
    }

    async fn play_opening(&self) -> Result<(), RealmlinkError> {
        for (peer, owner) in [(&self.host, "ada"), (&self.guest, "brook")] {
            peer.apply(Action::LoadDeck {
                player: Slot::Player,
                deck: DeckType::Spell,
                cards: spellbook(owner),
            })
            .await?;
            peer.apply(Action::DrawCard { player: Slot::Player, deck: DeckType::Spell, count: 3 })
                .await?;
        }
        self.host.apply(Action::SetLife { player: Slot::Opponent, value: 17 }).await?;
        self.guest.chat("good luck!").await?;
        self.host.roll(6).await?;

        self.host.wait_for(|v| v.pending.is_empty()).await?;
        self.guest.wait_for(|v| v.pending.is_empty()).await?;
        Ok(())
    }

    /// Cuts the link under the guest and waits for both sides to recover.
    async fn drop_and_resume(&self) -> Result<Option<RestoreSource>, RealmlinkError> {
        self.guest.drop_connection().await?;
        let guest = self
            .guest
            .wait_for(|v| v.is_connected() && v.last_restore.is_some())
            .await?;
        self.host.wait_for(PeerView::is_connected).await?;
        Ok(guest.last_restore)
    }
}

fn print_log(title: &str, entries: &[LogEntry]) {
    println!("--- {title} ---");
    for entry in entries {
        match &entry.nickname {
            Some(nick) => println!("[{:?}] {nick}: {}", entry.kind, entry.message),
            None => println!("[{:?}] {}", entry.kind, entry.message),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let table = Hotseat::seat().await?;
    let first = table.roll_for_turn().await?;
    println!("first seat: {first}");

    table.play_opening().await?;
    let source = table.drop_and_resume().await?;
    println!("guest hand restored from: {source:?}");

    let guest = table.guest.view();
    let hand: Vec<_> = guest.local_view().player.hand.iter().map(|c| c.name.clone()).collect();
    println!("guest hand: {hand:?}");

    print_log("Ada", &table.host.view().log);
    print_log("Brook", &guest.log);

    table.guest.leave().await?;
    table.host.leave().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hotseat_script_runs_to_the_end() {
        let table = Hotseat::seat().await.unwrap();
        let first = table.roll_for_turn().await.unwrap();
        table.play_opening().await.unwrap();

        let source = table.drop_and_resume().await.unwrap();
        assert_eq!(source, Some(RestoreSource::Memory));

        let guest = table.guest.view();
        assert_eq!(guest.state.current_turn(), first);
        assert_eq!(guest.local_view().player.hand, spellbook("brook")[..3].to_vec());
        assert_eq!(guest.local_view().player.life, 17);
        assert!(guest.log_contains("good luck!"));
    }
}
