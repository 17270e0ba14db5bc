#[cfg(feature = "ssr")]
pub mod address;
pub mod app;
pub mod cache;
pub mod changes;
#[cfg(feature = "ssr")]
pub mod config;
pub mod error;
pub mod model;
pub mod notice;
#[cfg(feature = "ssr")]
pub mod schema;

#[cfg(feature = "ssr")]
use chrono::{NaiveDateTime, Utc};
#[cfg(feature = "ssr")]
use diesel::connection::SimpleConnection;
#[cfg(feature = "ssr")]
use diesel::prelude::*;
#[cfg(feature = "ssr")]
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
#[cfg(feature = "ssr")]
use diesel::SqliteConnection;

#[cfg(feature = "ssr")]
use crate::config::AppConfig;
#[cfg(feature = "ssr")]
use crate::error::VoteError;
#[cfg(feature = "ssr")]
use crate::model::{
    NewParticipant, NewVote, Participant, ParticipantChanges, ParticipantFields,
    ScoredParticipant, Vote, VoteOutcome, MAX_SCORE, MIN_SCORE,
};
#[cfg(feature = "ssr")]
use crate::schema::{participants, votes};

#[cfg(feature = "ssr")]
pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

#[cfg(feature = "ssr")]
const SCHEMA_SQL: &str =
    include_str!("../migrations/2025-01-01-000000_create_participants_and_votes/up.sql");

// Enable WAL mode to allow concurrent reads during writes, and a timeout to retry locked
// operations. Foreign keys stop a participant from being removed while votes still point at it.
#[cfg(feature = "ssr")]
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; \
    PRAGMA journal_mode = WAL; \
    PRAGMA synchronous = NORMAL; \
    PRAGMA busy_timeout = 10000;";

#[cfg(feature = "hydrate")]
#[wasm_bindgen::prelude::wasm_bindgen]
pub fn hydrate() {
    use crate::app::*;
    console_error_panic_hook::set_once();
    leptos::mount::hydrate_body(App);
}

/// Arithmetic mean of the given scores, or 0 when there are none. No rounding is applied.
pub fn compute_score<I>(scores: I) -> f64
where
    I: IntoIterator<Item = i32>,
{
    let (sum, count) = scores
        .into_iter()
        .fold((0i64, 0u64), |(sum, count), score| {
            (sum + i64::from(score), count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

#[cfg(feature = "ssr")]
pub fn establish_connection(database_url: &str) -> ConnectionResult<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)?;
    conn.batch_execute(CONNECTION_PRAGMAS)
        .map_err(ConnectionError::CouldntSetupConfiguration)?;
    Ok(conn)
}

/// Applies the connection PRAGMAs to every connection handed out by the pool.
#[cfg(feature = "ssr")]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions;

#[cfg(feature = "ssr")]
impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(CONNECTION_PRAGMAS)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[cfg(feature = "ssr")]
pub fn build_pool(config: &AppConfig) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<SqliteConnection>::new(&config.database_url);
    Pool::builder()
        .max_size(config.pool_size)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
}

/// Creates the participants and votes tables if they don't exist yet.
#[cfg(feature = "ssr")]
pub fn create_schema(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute(SCHEMA_SQL)
}

/// Fetches every participant with its votes and derived score, in whatever order the store
/// returns them.
#[cfg(feature = "ssr")]
pub fn get_scored_participants(
    conn: &mut SqliteConnection,
) -> Result<Vec<ScoredParticipant>, diesel::result::Error> {
    let all_participants: Vec<Participant> = participants::table
        .select(Participant::as_select())
        .load(conn)?;
    let all_votes: Vec<Vote> = Vote::belonging_to(&all_participants)
        .select(Vote::as_select())
        .load(conn)?;

    Ok(all_votes
        .grouped_by(&all_participants)
        .into_iter()
        .zip(all_participants)
        .map(|(participant_votes, participant)| {
            ScoredParticipant::new(participant, &participant_votes)
        })
        .collect())
}

#[cfg(feature = "ssr")]
pub fn get_participant(
    conn: &mut SqliteConnection,
    participant_id: i32,
) -> Result<Participant, diesel::result::Error> {
    participants::table
        .find(participant_id)
        .select(Participant::as_select())
        .first(conn)
}

#[cfg(feature = "ssr")]
pub fn create_participant(
    conn: &mut SqliteConnection,
    fields: &ParticipantFields,
) -> Result<Participant, diesel::result::Error> {
    let now = Utc::now().naive_utc();
    let new_participant = NewParticipant {
        name: &fields.name,
        event_name: &fields.event_name,
        photo_url: &fields.photo_url,
        start_time: fields.start_time,
        end_time: fields.end_time,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(participants::table)
        .values(&new_participant)
        .returning(Participant::as_returning())
        .get_result(conn)
}

/// Replaces every mutable field of a participant and stamps `updated_at`. Returns NotFound if
/// the participant doesn't exist.
#[cfg(feature = "ssr")]
pub fn update_participant(
    conn: &mut SqliteConnection,
    participant_id: i32,
    fields: &ParticipantFields,
) -> Result<Participant, diesel::result::Error> {
    let changes = ParticipantChanges {
        name: &fields.name,
        event_name: &fields.event_name,
        photo_url: &fields.photo_url,
        start_time: fields.start_time,
        end_time: fields.end_time,
        updated_at: Utc::now().naive_utc(),
    };
    diesel::update(participants::table.find(participant_id))
        .set(&changes)
        .returning(Participant::as_returning())
        .get_result(conn)
}

/// Deletes a participant's votes and then the participant, in one transaction. Returns the
/// number of votes removed, or NotFound (with nothing removed) if the participant doesn't exist.
#[cfg(feature = "ssr")]
pub fn delete_participant(
    conn: &mut SqliteConnection,
    participant_id: i32,
) -> Result<usize, diesel::result::Error> {
    conn.transaction(|conn| {
        let removed_votes =
            diesel::delete(votes::table.filter(votes::participant_id.eq(participant_id)))
                .execute(conn)?;

        let removed = diesel::delete(participants::table.find(participant_id)).execute(conn)?;
        if removed == 0 {
            return Err(diesel::result::Error::NotFound);
        }

        Ok(removed_votes)
    })
}

#[cfg(feature = "ssr")]
pub fn find_vote(
    conn: &mut SqliteConnection,
    participant_id: i32,
    ip_address: &str,
) -> Result<Option<Vote>, diesel::result::Error> {
    votes::table
        .filter(votes::participant_id.eq(participant_id))
        .filter(votes::ip_address.eq(ip_address))
        .select(Vote::as_select())
        .first(conn)
        .optional()
}

#[cfg(feature = "ssr")]
pub fn get_votes_for_participant(
    conn: &mut SqliteConnection,
    participant_id: i32,
) -> Result<Vec<Vote>, diesel::result::Error> {
    votes::table
        .filter(votes::participant_id.eq(participant_id))
        .select(Vote::as_select())
        .load(conn)
}

/// Records `score` for the participant on behalf of `ip_address`, overwriting that address's
/// earlier vote if there is one. Refused once the participant's voting window has closed.
///
/// The lookup and the write are separate statements with no uniqueness constraint behind them,
/// so two concurrent first votes from the same address can both insert.
#[cfg(feature = "ssr")]
pub fn submit_vote(
    conn: &mut SqliteConnection,
    participant_id: i32,
    ip_address: &str,
    score: i32,
    now: NaiveDateTime,
) -> Result<(Vote, VoteOutcome), VoteError> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(VoteError::ScoreOutOfRange(score));
    }
    if ip_address.trim().is_empty() {
        return Err(VoteError::AddressUnavailable);
    }

    let participant = participants::table
        .find(participant_id)
        .select(Participant::as_select())
        .first(conn)
        .optional()?
        .ok_or(VoteError::ParticipantNotFound(participant_id))?;
    if !participant.voting_open(now) {
        return Err(VoteError::VotingClosed {
            participant_id,
            closed_at: participant.end_time,
        });
    }

    match find_vote(conn, participant_id, ip_address)? {
        Some(existing) => {
            let vote = diesel::update(votes::table.find(existing.id))
                .set(votes::score.eq(score))
                .returning(Vote::as_returning())
                .get_result(conn)?;
            Ok((vote, VoteOutcome::Updated))
        }
        None => {
            let new_vote = NewVote {
                participant_id,
                ip_address,
                score,
                created_at: now,
            };
            let vote = diesel::insert_into(votes::table)
                .values(&new_vote)
                .returning(Vote::as_returning())
                .get_result(conn)?;
            Ok((vote, VoteOutcome::Created))
        }
    }
}

/// Removes every vote and participant.
#[cfg(feature = "ssr")]
pub fn reset_database(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    conn.transaction(|conn| {
        // Votes first, the foreign key forbids the other order.
        diesel::delete(votes::table).execute(conn)?;
        diesel::delete(participants::table).execute(conn)?;
        Ok(())
    })
}


#[cfg(all(test, feature = "ssr"))]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // Helper to run a test against a fresh in-memory database. The test body runs in a
    // transaction that is always rolled back; a real error from the body fails the test.
    fn run_test_in_transaction<F>(test_fn: F)
    where
        F: FnOnce(&mut SqliteConnection) -> Result<(), diesel::result::Error>,
    {
        let mut conn = establish_connection(":memory:").expect("Failed to open database");
        create_schema(&mut conn).expect("Failed to create schema");
        let result: Result<(), diesel::result::Error> = conn.transaction(|conn| {
            test_fn(conn)?;
            // Force rollback on test success by returning an error.
            Err(diesel::result::Error::RollbackTransaction)
        });
        match result {
            Err(diesel::result::Error::RollbackTransaction) => {}
            Err(e) => panic!("Test failed with database error: {}", e),
            Ok(()) => unreachable!("test transaction always rolls back"),
        }
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 31)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    // A participant whose window runs from 18:00 to 19:00.
    fn fields(name: &str) -> ParticipantFields {
        ParticipantFields {
            name: name.to_string(),
            event_name: "Talent Show".to_string(),
            photo_url: format!("https://example.com/{}.jpg", name.to_lowercase()),
            start_time: at(18, 0),
            end_time: at(19, 0),
        }
    }

    fn vote_count(conn: &mut SqliteConnection, participant_id: i32) -> i64 {
        votes::table
            .filter(votes::participant_id.eq(participant_id))
            .count()
            .get_result(conn)
            .expect("Failed to count votes")
    }

    #[test]
    fn test_create_schema_is_idempotent() {
        run_test_in_transaction(|conn| {
            create_schema(conn)?;
            let count: i64 = participants::table.count().get_result(conn)?;
            assert_eq!(count, 0);
            Ok(())
        });
    }

    #[test]
    fn test_create_and_list_participant() {
        run_test_in_transaction(|conn| {
            let created = create_participant(conn, &fields("Ada"))?;
            assert_eq!(created.name, "Ada");
            assert_eq!(created.event_name, "Talent Show");
            assert_eq!(created.start_time, at(18, 0));
            assert_eq!(created.end_time, at(19, 0));
            assert_eq!(created.created_at, created.updated_at);

            let listed = get_scored_participants(conn)?;
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].participant, created);
            assert_eq!(listed[0].score, 0.0);
            assert_eq!(listed[0].vote_count, 0);

            Ok(())
        });
    }

    #[test]
    fn test_create_participant_with_end_before_start() {
        run_test_in_transaction(|conn| {
            let mut reversed = fields("Grace");
            reversed.start_time = at(19, 0);
            reversed.end_time = at(18, 0);
            let created = create_participant(conn, &reversed)?;
            assert!(created.end_time < created.start_time);
            Ok(())
        });
    }

    #[test]
    fn test_list_scores_each_participant() {
        run_test_in_transaction(|conn| {
            let ada = create_participant(conn, &fields("Ada"))?;
            let grace = create_participant(conn, &fields("Grace"))?;
            let linus = create_participant(conn, &fields("Linus"))?;

            for (address, score) in [("10.0.0.1", 4), ("10.0.0.2", 8)] {
                submit_vote(conn, ada.id, address, score, at(18, 30)).expect("vote for Ada");
            }
            submit_vote(conn, grace.id, "10.0.0.1", 3, at(18, 30)).expect("vote for Grace");

            let listed = get_scored_participants(conn)?;
            assert_eq!(listed.len(), 3);
            let score_of = |id: i32| {
                listed
                    .iter()
                    .find(|p| p.participant.id == id)
                    .map(|p| (p.score, p.vote_count))
                    .expect("participant listed")
            };
            assert_eq!(score_of(ada.id), (6.0, 2));
            assert_eq!(score_of(grace.id), (3.0, 1));
            assert_eq!(score_of(linus.id), (0.0, 0));

            Ok(())
        });
    }

    #[test]
    fn test_update_participant() {
        run_test_in_transaction(|conn| {
            let created = create_participant(conn, &fields("Ada"))?;

            let mut changed = fields("Ada Lovelace");
            changed.event_name = "Science Fair".to_string();
            changed.end_time = at(21, 0);
            let updated = update_participant(conn, created.id, &changed)?;

            assert_eq!(updated.id, created.id);
            assert_eq!(updated.name, "Ada Lovelace");
            assert_eq!(updated.event_name, "Science Fair");
            assert_eq!(updated.photo_url, "https://example.com/ada lovelace.jpg");
            assert_eq!(updated.end_time, at(21, 0));
            assert_eq!(updated.created_at, created.created_at);
            assert!(updated.updated_at >= created.updated_at);

            let fetched = get_participant(conn, created.id)?;
            assert_eq!(fetched, updated);

            Ok(())
        });
    }

    #[test]
    fn test_update_missing_participant() {
        run_test_in_transaction(|conn| {
            let err = update_participant(conn, 999, &fields("Nobody"))
                .expect_err("Should fail for a non-existent participant");
            assert!(matches!(err, diesel::result::Error::NotFound));
            Ok(())
        });
    }

    #[test]
    fn test_submit_vote_creates_then_updates() {
        run_test_in_transaction(|conn| {
            let ada = create_participant(conn, &fields("Ada"))?;

            let (first, outcome) =
                submit_vote(conn, ada.id, "10.0.0.1", 3, at(18, 10)).expect("first vote");
            assert_eq!(outcome, VoteOutcome::Created);
            assert_eq!(first.score, 3);
            assert_eq!(first.ip_address, "10.0.0.1");

            // Repeat submissions from the same address keep a single row with the latest score.
            for score in [7, 0, 10, 9] {
                let (vote, outcome) =
                    submit_vote(conn, ada.id, "10.0.0.1", score, at(18, 20)).expect("re-vote");
                assert_eq!(outcome, VoteOutcome::Updated);
                assert_eq!(vote.id, first.id);
                assert_eq!(vote.score, score);
            }
            assert_eq!(vote_count(conn, ada.id), 1);
            let stored = find_vote(conn, ada.id, "10.0.0.1")?.expect("vote stored");
            assert_eq!(stored.score, 9);

            // Another address gets its own row.
            let (_, outcome) =
                submit_vote(conn, ada.id, "10.0.0.2", 5, at(18, 30)).expect("second address");
            assert_eq!(outcome, VoteOutcome::Created);
            assert_eq!(vote_count(conn, ada.id), 2);

            Ok(())
        });
    }

    #[test]
    fn test_revote_changes_derived_score() {
        run_test_in_transaction(|conn| {
            let ada = create_participant(conn, &fields("Ada"))?;
            submit_vote(conn, ada.id, "10.0.0.4", 4, at(18, 5)).expect("vote 4");
            submit_vote(conn, ada.id, "10.0.0.8", 8, at(18, 6)).expect("vote 8");
            assert_eq!(get_scored_participants(conn)?[0].score, 6.0);

            // The address that cast the 4 changes its mind.
            submit_vote(conn, ada.id, "10.0.0.4", 10, at(18, 7)).expect("re-vote 10");
            let mut scores: Vec<i32> = get_votes_for_participant(conn, ada.id)?
                .into_iter()
                .map(|v| v.score)
                .collect();
            scores.sort();
            assert_eq!(scores, vec![8, 10]);
            assert_eq!(get_scored_participants(conn)?[0].score, 9.0);

            Ok(())
        });
    }

    #[test]
    fn test_submit_vote_window() {
        run_test_in_transaction(|conn| {
            let ada = create_participant(conn, &fields("Ada"))?;

            // Half way through the window.
            submit_vote(conn, ada.id, "10.0.0.1", 6, at(18, 30)).expect("open window");

            // An hour after it closed: refused, nothing written.
            let err = submit_vote(conn, ada.id, "10.0.0.2", 6, at(20, 0))
                .expect_err("Should fail after the window");
            match err {
                VoteError::VotingClosed {
                    participant_id,
                    closed_at,
                } => {
                    assert_eq!(participant_id, ada.id);
                    assert_eq!(closed_at, at(19, 0));
                }
                other => panic!("Unexpected error: {}", other),
            }
            assert_eq!(vote_count(conn, ada.id), 1);

            // An existing vote can't be changed after the window either.
            submit_vote(conn, ada.id, "10.0.0.1", 1, at(19, 1)).expect_err("closed");
            assert_eq!(find_vote(conn, ada.id, "10.0.0.1")?.map(|v| v.score), Some(6));

            Ok(())
        });
    }

    #[test]
    fn test_submit_vote_rejects_bad_input() {
        run_test_in_transaction(|conn| {
            let ada = create_participant(conn, &fields("Ada"))?;

            for score in [-1, 11, 100] {
                let err = submit_vote(conn, ada.id, "10.0.0.1", score, at(18, 30))
                    .expect_err("Should fail for an out of range score");
                assert!(matches!(err, VoteError::ScoreOutOfRange(s) if s == score));
            }

            let err = submit_vote(conn, ada.id, "  ", 5, at(18, 30))
                .expect_err("Should fail without an address");
            assert!(matches!(err, VoteError::AddressUnavailable));

            let err = submit_vote(conn, 999, "10.0.0.1", 5, at(18, 30))
                .expect_err("Should fail for a non-existent participant");
            assert!(matches!(err, VoteError::ParticipantNotFound(999)));

            assert_eq!(vote_count(conn, ada.id), 0);
            Ok(())
        });
    }

    #[test]
    fn test_delete_participant_removes_votes() {
        run_test_in_transaction(|conn| {
            let ada = create_participant(conn, &fields("Ada"))?;
            let grace = create_participant(conn, &fields("Grace"))?;
            for address in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
                submit_vote(conn, ada.id, address, 7, at(18, 30)).expect("vote for Ada");
            }
            submit_vote(conn, grace.id, "10.0.0.1", 2, at(18, 30)).expect("vote for Grace");

            let removed = delete_participant(conn, ada.id)?;
            assert_eq!(removed, 3);

            assert!(get_participant(conn, ada.id).is_err());
            assert_eq!(vote_count(conn, ada.id), 0);

            // Grace and her vote are untouched, and no vote points at a missing participant.
            assert_eq!(vote_count(conn, grace.id), 1);
            let orphans: i64 = votes::table
                .left_join(participants::table)
                .filter(participants::id.nullable().is_null())
                .count()
                .get_result(conn)?;
            assert_eq!(orphans, 0);

            Ok(())
        });
    }

    #[test]
    fn test_delete_missing_participant() {
        run_test_in_transaction(|conn| {
            let err = delete_participant(conn, 42).expect_err("Should fail for a missing id");
            assert!(matches!(err, diesel::result::Error::NotFound));
            Ok(())
        });
    }

    #[test]
    fn test_participant_with_votes_needs_cascade() {
        run_test_in_transaction(|conn| {
            let ada = create_participant(conn, &fields("Ada"))?;
            submit_vote(conn, ada.id, "10.0.0.1", 7, at(18, 30)).expect("vote");

            // Removing the participant row directly is refused by the foreign key.
            let direct: QueryResult<usize> = conn.transaction(|conn| {
                diesel::delete(participants::table.find(ada.id)).execute(conn)
            });
            assert!(direct.is_err());
            assert_eq!(get_participant(conn, ada.id)?.id, ada.id);
            assert_eq!(vote_count(conn, ada.id), 1);

            Ok(())
        });
    }

    #[test]
    fn test_reset_database() {
        run_test_in_transaction(|conn| {
            let ada = create_participant(conn, &fields("Ada"))?;
            submit_vote(conn, ada.id, "10.0.0.1", 7, at(18, 30)).expect("vote");

            reset_database(conn)?;

            assert!(get_scored_participants(conn)?.is_empty());
            let remaining_votes: i64 = votes::table.count().get_result(conn)?;
            assert_eq!(remaining_votes, 0);
            Ok(())
        });
    }
}
