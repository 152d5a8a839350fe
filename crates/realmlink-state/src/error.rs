use realmlink_protocol::{CardId, CellPos, DeckType, Slot};

/// Errors from applying a mutation to the match state.
///
/// A failed mutation leaves the state untouched.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The action's `name` is not a known mutator.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The action's payload doesn't match its mutator's shape.
    #[error("invalid payload for {name}: {source}")]
    InvalidPayload {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("card not found: {0}")]
    CardNotFound(CardId),

    #[error("position {row}-{col} is off the board")]
    InvalidPosition { row: u8, col: u8 },

    #[error("site at {0} is already occupied")]
    SiteOccupied(CellPos),

    #[error("{player} {deck:?} deck has fewer than {wanted} cards")]
    DeckEmpty {
        player: Slot,
        deck: DeckType,
        wanted: usize,
    },

    /// A shuffle order that isn't a permutation of the deck.
    #[error("shuffle order does not match the deck: {0}")]
    BadShuffle(String),

    #[error("card {0} cannot be attached to itself")]
    SelfAttach(CardId),

    /// A revealed face that names another card or goes into a hidden zone.
    #[error("revealed face does not fit the move of {0}")]
    RevealMismatch(CardId),
}
