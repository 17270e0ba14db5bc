#[cfg(feature = "ssr")]
use chrono::NaiveDateTime;
use thiserror::Error;

/// Problems with participant form input, caught before anything reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{field} is not a valid timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// Reasons a vote submission is refused or aborted.
#[cfg(feature = "ssr")]
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("score {0} is outside the range 0 to 10")]
    ScoreOutOfRange(i32),

    #[error("voting for participant {participant_id} closed at {closed_at}")]
    VotingClosed {
        participant_id: i32,
        closed_at: NaiveDateTime,
    },

    #[error("participant {0} does not exist")]
    ParticipantNotFound(i32),

    #[error("could not determine the caller address")]
    AddressUnavailable,

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}
