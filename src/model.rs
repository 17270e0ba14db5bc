use chrono::{DateTime, NaiveDateTime};
#[cfg(feature = "ssr")]
use diesel::prelude::*;
#[cfg(feature = "ssr")]
use diesel::sqlite::Sqlite;
use serde::{Deserialize, Serialize};

use crate::changes::ChangeKind;
use crate::compute_score;
use crate::error::FormError;

pub const MIN_SCORE: i32 = 0;
pub const MAX_SCORE: i32 = 10;
pub const DEFAULT_SCORE: i32 = 5;

/// Format produced (and accepted) by `<input type="datetime-local">`.
pub const DATETIME_LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ssr", derive(Queryable, Selectable, Identifiable))]
#[cfg_attr(feature = "ssr", diesel(table_name = crate::schema::participants))]
#[cfg_attr(feature = "ssr", diesel(check_for_backend(Sqlite)))]
pub struct Participant {
    pub id: i32,
    pub name: String,
    pub event_name: String,
    pub photo_url: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Participant {
    /// Voting stays open until the end of the window. The start time is informational only.
    pub fn voting_open(&self, now: NaiveDateTime) -> bool {
        now <= self.end_time
    }
}

#[cfg(feature = "ssr")]
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::participants)]
pub struct NewParticipant<'a> {
    pub name: &'a str,
    pub event_name: &'a str,
    pub photo_url: &'a str,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[cfg(feature = "ssr")]
#[derive(AsChangeset, Debug)]
#[diesel(table_name = crate::schema::participants)]
pub struct ParticipantChanges<'a> {
    pub name: &'a str,
    pub event_name: &'a str,
    pub photo_url: &'a str,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(
    feature = "ssr",
    derive(Queryable, Selectable, Identifiable, Associations)
)]
#[cfg_attr(feature = "ssr", diesel(belongs_to(Participant)))]
#[cfg_attr(feature = "ssr", diesel(table_name = crate::schema::votes))]
#[cfg_attr(feature = "ssr", diesel(check_for_backend(Sqlite)))]
pub struct Vote {
    pub id: i32,
    pub participant_id: i32,
    pub ip_address: String,
    pub score: i32,
    pub created_at: NaiveDateTime,
}

#[cfg(feature = "ssr")]
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::votes)]
pub struct NewVote<'a> {
    pub participant_id: i32,
    pub ip_address: &'a str,
    pub score: i32,
    pub created_at: NaiveDateTime,
}

/// Whether a submission created a new vote or overwrote the caller's earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteOutcome {
    Created,
    Updated,
}

impl VoteOutcome {
    pub fn change_kind(self) -> ChangeKind {
        match self {
            VoteOutcome::Created => ChangeKind::Insert,
            VoteOutcome::Updated => ChangeKind::Update,
        }
    }
}

/// A participant together with its derived score, as listed by both views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredParticipant {
    pub participant: Participant,
    pub score: f64,
    pub vote_count: usize,
}

impl ScoredParticipant {
    pub fn new(participant: Participant, votes: &[Vote]) -> Self {
        ScoredParticipant {
            participant,
            score: compute_score(votes.iter().map(|v| v.score)),
            vote_count: votes.len(),
        }
    }

    pub fn voting_open(&self, now: NaiveDateTime) -> bool {
        self.participant.voting_open(now)
    }
}

/// Validated participant attributes, shared by create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantFields {
    pub name: String,
    pub event_name: String,
    pub photo_url: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

impl ParticipantFields {
    /// Checks that every field is present and both timestamps parse. The end is allowed to
    /// precede the start.
    pub fn parse(
        name: &str,
        event_name: &str,
        photo_url: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<Self, FormError> {
        let name = required("name", name)?;
        let event_name = required("event name", event_name)?;
        let photo_url = required("photo URL", photo_url)?;
        let start_time = required_timestamp("start time", start_time)?;
        let end_time = required_timestamp("end time", end_time)?;

        Ok(ParticipantFields {
            name: name.to_string(),
            event_name: event_name.to_string(),
            photo_url: photo_url.to_string(),
            start_time,
            end_time,
        })
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, FormError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FormError::MissingField(field));
    }
    Ok(trimmed)
}

fn required_timestamp(field: &'static str, value: &str) -> Result<NaiveDateTime, FormError> {
    let trimmed = required(field, value)?;
    parse_timestamp(trimmed).ok_or_else(|| FormError::InvalidTimestamp {
        field,
        value: trimmed.to_string(),
    })
}

/// Parses `datetime-local` input (with or without seconds) or an RFC 3339 timestamp, which is
/// normalised to UTC.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, DATETIME_LOCAL_FORMAT))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

pub fn format_datetime_local(value: &NaiveDateTime) -> String {
    value.format(DATETIME_LOCAL_FORMAT).to_string()
}
