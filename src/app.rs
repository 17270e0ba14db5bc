use chrono::{NaiveDateTime, Utc};
use leptos::ev::SubmitEvent;
use leptos::logging::log;
use leptos::prelude::*;
use leptos::server_fn::error::NoCustomError;
use leptos::task::spawn_local;
use leptos_meta::{provide_meta_context, MetaTags, Stylesheet, Title};
use leptos_router::{
    components::{Route, Router, Routes},
    path,
};

use crate::cache::{QueryCache, PARTICIPANTS_KEY};
use crate::error::FormError;
use crate::model::{
    format_datetime_local, Participant, ParticipantFields, ScoredParticipant, VoteOutcome,
    DEFAULT_SCORE, MAX_SCORE, MIN_SCORE,
};
use crate::notice::{Notices, Notifier};

#[cfg(feature = "ssr")]
use crate::address::current_caller_address;
#[cfg(feature = "ssr")]
use crate::changes::{ChangeEvent, ChangeFeed, ChangeKind, Table};
#[cfg(feature = "ssr")]
use crate::{
    create_participant, delete_participant, get_scored_participants, submit_vote,
    update_participant, DbPool,
};

#[server(ListParticipants)]
pub async fn list_participants() -> Result<Vec<ScoredParticipant>, ServerFnError<NoCustomError>>
{
    let pool: DbPool = expect_context();
    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;
        get_scored_participants(&mut conn).map_err(|e| ServerFnError::ServerError(e.to_string()))
    })
    .await;
    match result {
        Ok(participants) => participants,
        Err(e) => Err(ServerFnError::ServerError(e.to_string())),
    }
}

#[server(CreateParticipant)]
pub async fn create_participant_handler(
    name: String,
    event_name: String,
    photo_url: String,
    start_time: String,
    end_time: String,
) -> Result<Participant, ServerFnError<NoCustomError>> {
    let fields = ParticipantFields::parse(&name, &event_name, &photo_url, &start_time, &end_time)
        .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;

    let pool: DbPool = expect_context();
    let feed: ChangeFeed = expect_context();

    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;
        create_participant(&mut conn, &fields)
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))
    })
    .await
    .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;

    match result {
        Ok(participant) => {
            tracing::info!(participant_id = participant.id, "Participant created");
            feed.publish(ChangeEvent::new(
                Table::Participants,
                ChangeKind::Insert,
                participant.id,
            ));
            Ok(participant)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to create participant");
            Err(e)
        }
    }
}

#[server(UpdateParticipant)]
pub async fn update_participant_handler(
    participant_id: i32,
    name: String,
    event_name: String,
    photo_url: String,
    start_time: String,
    end_time: String,
) -> Result<Participant, ServerFnError<NoCustomError>> {
    let fields = ParticipantFields::parse(&name, &event_name, &photo_url, &start_time, &end_time)
        .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;

    let pool: DbPool = expect_context();
    let feed: ChangeFeed = expect_context();

    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;
        update_participant(&mut conn, participant_id, &fields)
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))
    })
    .await
    .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;

    match result {
        Ok(participant) => {
            tracing::info!(participant_id, "Participant updated");
            feed.publish(ChangeEvent::new(
                Table::Participants,
                ChangeKind::Update,
                participant_id,
            ));
            Ok(participant)
        }
        Err(e) => {
            tracing::error!(participant_id, error = %e, "Failed to update participant");
            Err(e)
        }
    }
}

#[server(DeleteParticipant)]
pub async fn delete_participant_handler(
    participant_id: i32,
) -> Result<(), ServerFnError<NoCustomError>> {
    let pool: DbPool = expect_context();
    let feed: ChangeFeed = expect_context();

    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;
        delete_participant(&mut conn, participant_id)
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))
    })
    .await
    .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;

    match result {
        Ok(removed_votes) => {
            tracing::info!(participant_id, removed_votes, "Participant deleted");
            feed.publish(ChangeEvent::new(
                Table::Participants,
                ChangeKind::Delete,
                participant_id,
            ));
            Ok(())
        }
        Err(e) => {
            tracing::error!(participant_id, error = %e, "Failed to delete participant");
            Err(e)
        }
    }
}

#[server(CastVote)]
pub async fn cast_vote(
    participant_id: i32,
    score: i32,
) -> Result<VoteOutcome, ServerFnError<NoCustomError>> {
    let address = current_caller_address().await?;
    let pool: DbPool = expect_context();
    let feed: ChangeFeed = expect_context();
    let now = Utc::now().naive_utc();

    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;
        submit_vote(&mut conn, participant_id, &address, score, now)
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))
    })
    .await
    .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;

    match result {
        Ok((vote, outcome)) => {
            tracing::info!(participant_id, vote_id = vote.id, ?outcome, "Vote recorded");
            feed.publish(ChangeEvent::new(Table::Votes, outcome.change_kind(), vote.id));
            Ok(outcome)
        }
        Err(e) => {
            tracing::warn!(participant_id, score, error = %e, "Vote rejected");
            Err(e)
        }
    }
}

pub fn shell(options: LeptosOptions) -> impl IntoView {
    view! {
        <!DOCTYPE html>
        <html lang="en">
            <head>
                <meta charset="utf-8" />
                <meta name="viewport" content="width=device-width, initial-scale=1" />
                <AutoReload options=options.clone() />
                <HydrationScripts options />
                <MetaTags />
            </head>
            <body>
                <App />
            </body>
        </html>
    }
}

#[component]
pub fn App() -> impl IntoView {
    // Provides context that manages stylesheets, titles, meta tags, etc.
    provide_meta_context();

    // Handed to the views explicitly rather than provided as context.
    let cache = QueryCache::new();
    let notifier = Notifier::new();

    view! {
        // id=leptos means cargo-leptos will hot-reload this stylesheet
        <Stylesheet id="leptos" href="/pkg/event-vote.css" />

        <Title text="Event Voting" />

        <Notices notifier />
        <Router>
            <main>
                <Routes fallback=|| "Page not found.".into_view()>
                    <Route path=path!("/") view=move || view! { <AudiencePage notifier /> } />
                    <Route
                        path=path!("/admin")
                        view=move || view! { <AdminPage cache notifier /> }
                    />
                </Routes>
            </main>
        </Router>
    }
}

/// State of the audience vote dialog. `selected` is the participant being voted for while the
/// dialog is open.
#[derive(Debug, Clone, PartialEq)]
struct VoteDialog {
    selected: Option<ScoredParticipant>,
    score: i32,
}

impl Default for VoteDialog {
    fn default() -> Self {
        VoteDialog {
            selected: None,
            score: DEFAULT_SCORE,
        }
    }
}

impl VoteDialog {
    /// Opens the dialog for the participant, unless its voting window has closed. Returns
    /// whether the dialog opened.
    fn open(&mut self, participant: ScoredParticipant, now: NaiveDateTime) -> bool {
        if !participant.voting_open(now) {
            return false;
        }
        self.selected = Some(participant);
        true
    }

    fn set_score(&mut self, score: i32) {
        self.score = score.clamp(MIN_SCORE, MAX_SCORE);
    }

    /// The (participant id, score) pair to submit, if the dialog is open.
    fn ballot(&self) -> Option<(i32, i32)> {
        self.selected
            .as_ref()
            .map(|p| (p.participant.id, self.score))
    }

    fn close(&mut self) {
        *self = VoteDialog::default();
    }
}

fn format_window(participant: &Participant) -> String {
    format!(
        "{} - {}",
        participant.start_time.format("%d/%m/%Y, %H:%M"),
        participant.end_time.format("%d/%m/%Y, %H:%M")
    )
}

/// The audience page. Lists participants and lets visitors score them while voting is open.
/// The list is fetched once; it does not follow later changes.
#[component]
fn AudiencePage(notifier: Notifier) -> impl IntoView {
    let participants = Resource::new(|| (), |_| list_participants());
    let dialog = RwSignal::new(VoteDialog::default());

    Effect::new(move || {
        if let Some(Err(e)) = participants.get() {
            log!("Error fetching participants: {}", e);
            notifier.error(format!("Error fetching participants: {}", e));
        }
    });

    // Does nothing once the participant's voting window has closed.
    let handle_vote = move |participant: ScoredParticipant| {
        let now = Utc::now().naive_utc();
        dialog.update(|d| {
            d.open(participant, now);
        });
    };

    let submit_vote = move |_| {
        let Some((participant_id, score)) = dialog.with(|d| d.ballot()) else {
            return;
        };
        spawn_local(async move {
            match cast_vote(participant_id, score).await {
                Ok(_) => {
                    notifier.success("Vote submitted successfully!");
                    dialog.update(|d| d.close());
                }
                Err(e) => {
                    log!("Error submitting vote: {}", e);
                    notifier.error(format!("Error submitting vote: {}", e));
                }
            }
        });
    };

    view! {
        <div class="container">
            <h1>"Vote for Your Favorite"</h1>
            <Suspense fallback=|| {
                view! { <div class="card-grid loading">"Loading..."</div> }
            }>
                {move || {
                    participants
                        .with(|res| match res {
                            Some(Ok(list)) => {
                                let now = Utc::now().naive_utc();
                                view! {
                                    <div class="card-grid">
                                        {list
                                            .iter()
                                            .map(|scored| {
                                                let p = &scored.participant;
                                                let is_voting_active = scored.voting_open(now);
                                                let to_vote = scored.clone();
                                                let button_class = if is_voting_active {
                                                    "btn-vote"
                                                } else {
                                                    "btn-vote disabled"
                                                };
                                                view! {
                                                    <div class="card">
                                                        {(!p.photo_url.is_empty())
                                                            .then(|| {
                                                                view! {
                                                                    <img src=p.photo_url.clone() alt=p.name.clone() />
                                                                }
                                                            })}
                                                        <h2>{p.name.clone()}</h2>
                                                        <p class="event-name">{p.event_name.clone()}</p>
                                                        <div class="window">{format_window(p)}</div>
                                                        <button
                                                            class=button_class
                                                            disabled=!is_voting_active
                                                            on:click=move |_| handle_vote(to_vote.clone())
                                                        >
                                                            {if is_voting_active {
                                                                "Vote Now"
                                                            } else {
                                                                "Voting Ended"
                                                            }}
                                                        </button>
                                                    </div>
                                                }
                                            })
                                            .collect_view()}
                                    </div>
                                }
                                    .into_any()
                            }
                            Some(Err(e)) => {
                                view! {
                                    <p class="error">"Error fetching participants: " {e.to_string()}</p>
                                }
                                    .into_any()
                            }
                            None => view! { "Loading..." }.into_any(),
                        })
                }}
            </Suspense>

            {move || {
                dialog
                    .with(|d| d.selected.as_ref().map(|p| p.participant.name.clone()))
                    .map(|name| {
                        view! {
                            <div class="dialog-backdrop">
                                <div class="dialog">
                                    <h2>"Vote for " {name}</h2>
                                    <label>
                                        "Score (0-10)"
                                        <input
                                            type="range"
                                            min="0"
                                            max="10"
                                            step="1"
                                            prop:value=move || dialog.with(|d| d.score).to_string()
                                            on:input=move |ev| {
                                                let value = event_target_value(&ev)
                                                    .parse()
                                                    .unwrap_or(DEFAULT_SCORE);
                                                dialog.update(|d| d.set_score(value));
                                            }
                                        />
                                    </label>
                                    <div class="score-value">{move || dialog.with(|d| d.score)}</div>
                                    <div class="dialog-actions">
                                        <button
                                            class="btn-cancel"
                                            on:click=move |_| dialog.update(|d| d.close())
                                        >
                                            "Cancel"
                                        </button>
                                        <button class="btn-submit" on:click=submit_vote>
                                            "Submit Vote"
                                        </button>
                                    </div>
                                </div>
                            </div>
                        }
                    })
            }}
        </div>
    }
}

/// Contents of the admin add/edit form. `editing` holds the id of the participant being edited,
/// or None when adding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ParticipantDraft {
    editing: Option<i32>,
    name: String,
    event_name: String,
    photo_url: String,
    start_time: String,
    end_time: String,
}

impl ParticipantDraft {
    fn from_participant(participant: &Participant) -> Self {
        ParticipantDraft {
            editing: Some(participant.id),
            name: participant.name.clone(),
            event_name: participant.event_name.clone(),
            photo_url: participant.photo_url.clone(),
            start_time: format_datetime_local(&participant.start_time),
            end_time: format_datetime_local(&participant.end_time),
        }
    }

    fn validate(&self) -> Result<ParticipantFields, FormError> {
        ParticipantFields::parse(
            &self.name,
            &self.event_name,
            &self.photo_url,
            &self.start_time,
            &self.end_time,
        )
    }
}

#[cfg(feature = "hydrate")]
fn on_participant_change(cache: QueryCache, event: &crate::changes::ChangeEvent) {
    log!("Participant {} changed ({:?})", event.id, event.kind);
    cache.invalidate(PARTICIPANTS_KEY);
}

/// Opens the participant change feed for the lifetime of the current component.
#[cfg(feature = "hydrate")]
fn subscribe_to_participant_changes(cache: QueryCache) {
    use crate::changes::{ChangeSubscription, PARTICIPANT_CHANGES_PATH};

    match ChangeSubscription::open(PARTICIPANT_CHANGES_PATH, move |event| {
        on_participant_change(cache, &event)
    }) {
        Ok(subscription) => {
            let handle = StoredValue::new_local(Some(subscription));
            on_cleanup(move || {
                if let Some(subscription) = handle.try_update_value(Option::take).flatten() {
                    log!("Closing participant change feed");
                    subscription.dispose();
                }
            });
        }
        Err(e) => log!("Could not subscribe to participant changes: {:?}", e),
    }
}

/// The admin page. Lists participants through the query cache, follows the participant change
/// feed, and adds, edits and deletes participants.
#[component]
fn AdminPage(cache: QueryCache, notifier: Notifier) -> impl IntoView {
    let participants_generation = cache.watch(PARTICIPANTS_KEY);
    let participants_fetcher = Resource::new(
        move || participants_generation.get(),
        |_| list_participants(),
    );

    #[cfg(feature = "hydrate")]
    subscribe_to_participant_changes(cache);

    let dialog_open = RwSignal::new(false);
    let draft = RwSignal::new(ParticipantDraft::default());

    let open_create = move |_| {
        draft.set(ParticipantDraft::default());
        dialog_open.set(true);
    };

    let open_edit = move |participant: Participant| {
        draft.set(ParticipantDraft::from_participant(&participant));
        dialog_open.set(true);
    };

    // Adds or updates depending on the draft. On success, closes the dialog and refreshes the
    // listing.
    let submit = move |ev: SubmitEvent| {
        ev.prevent_default();
        let current = draft.get();
        if let Err(e) = current.validate() {
            notifier.error(e.to_string());
            return;
        }
        spawn_local(async move {
            let ParticipantDraft {
                editing,
                name,
                event_name,
                photo_url,
                start_time,
                end_time,
            } = current;
            let result = match editing {
                Some(participant_id) => {
                    update_participant_handler(
                        participant_id,
                        name,
                        event_name,
                        photo_url,
                        start_time,
                        end_time,
                    )
                    .await
                }
                None => {
                    create_participant_handler(name, event_name, photo_url, start_time, end_time)
                        .await
                }
            };
            match result {
                Ok(participant) => {
                    dialog_open.set(false);
                    draft.set(ParticipantDraft::default());
                    cache.invalidate(PARTICIPANTS_KEY);
                    notifier.success(format!("Saved {}", participant.name));
                }
                Err(e) => {
                    log!("Error saving participant: {}", e);
                    notifier.error(format!("Error saving participant: {}", e));
                }
            }
        });
    };

    let delete = move |participant_id: i32| {
        spawn_local(async move {
            if !leptos::leptos_dom::helpers::window()
                .confirm_with_message("Are you sure you want to delete this participant?")
                .unwrap_or(false)
            {
                return;
            }
            match delete_participant_handler(participant_id).await {
                Ok(_) => {
                    cache.invalidate(PARTICIPANTS_KEY);
                    notifier.success("Participant deleted");
                }
                Err(e) => {
                    log!("Error deleting participant: {}", e);
                    notifier.error(format!("Error deleting participant: {}", e));
                }
            }
        });
    };

    view! {
        <div class="container admin-container">
            <header class="admin-header">
                <h1>"Event Participants"</h1>
                <button class="btn-add" on:click=open_create>
                    "+ Add Participant"
                </button>
            </header>

            <Suspense fallback=|| {
                view! { <div class="card-grid loading">"Loading..."</div> }
            }>
                {move || {
                    participants_fetcher
                        .with(|res| match res {
                            Some(Ok(list)) => {
                                view! {
                                    <div class="card-grid">
                                        {list
                                            .iter()
                                            .map(|scored| {
                                                let p = scored.participant.clone();
                                                let participant_id = p.id;
                                                let to_edit = p.clone();
                                                view! {
                                                    <div class="card">
                                                        {(!p.photo_url.is_empty())
                                                            .then(|| {
                                                                view! {
                                                                    <img src=p.photo_url.clone() alt=p.name.clone() />
                                                                }
                                                            })}
                                                        <h2>{p.name.clone()}</h2>
                                                        <p class="event-name">{p.event_name.clone()}</p>
                                                        <div class="window">
                                                            <div>
                                                                "Start: " {p.start_time.format("%d/%m/%Y, %H:%M:%S").to_string()}
                                                            </div>
                                                            <div>
                                                                "End: " {p.end_time.format("%d/%m/%Y, %H:%M:%S").to_string()}
                                                            </div>
                                                        </div>
                                                        <div class="score">
                                                            {format!(
                                                                "Score: {:.2} ({} votes)",
                                                                scored.score,
                                                                scored.vote_count,
                                                            )}
                                                        </div>
                                                        <div class="card-actions">
                                                            <button
                                                                class="btn-edit"
                                                                on:click=move |_| open_edit(to_edit.clone())
                                                            >
                                                                "Edit"
                                                            </button>
                                                            <button
                                                                class="btn-delete"
                                                                on:click=move |_| delete(participant_id)
                                                            >
                                                                "Delete"
                                                            </button>
                                                        </div>
                                                    </div>
                                                }
                                            })
                                            .collect_view()}
                                    </div>
                                }
                                    .into_any()
                            }
                            Some(Err(e)) => {
                                view! {
                                    <p class="error">"Error loading participants: " {e.to_string()}</p>
                                }
                                    .into_any()
                            }
                            None => view! { "Loading..." }.into_any(),
                        })
                }}
            </Suspense>

            <Show when=move || dialog_open.get()>
                <div class="dialog-backdrop">
                    <div class="dialog">
                        <h2>
                            {move || {
                                if draft.with(|d| d.editing.is_some()) {
                                    "Edit Participant"
                                } else {
                                    "Add Participant"
                                }
                            }}
                        </h2>
                        <form class="admin-form" on:submit=submit>
                            <input
                                class="form-input"
                                type="text"
                                placeholder="Name"
                                required
                                prop:value=move || draft.with(|d| d.name.clone())
                                on:input=move |ev| draft.update(|d| d.name = event_target_value(&ev))
                            />
                            <input
                                class="form-input"
                                type="text"
                                placeholder="Event Name"
                                required
                                prop:value=move || draft.with(|d| d.event_name.clone())
                                on:input=move |ev| {
                                    draft.update(|d| d.event_name = event_target_value(&ev))
                                }
                            />
                            <input
                                class="form-input"
                                type="url"
                                placeholder="Photo URL"
                                required
                                prop:value=move || draft.with(|d| d.photo_url.clone())
                                on:input=move |ev| {
                                    draft.update(|d| d.photo_url = event_target_value(&ev))
                                }
                            />
                            <label>
                                "Start: "
                                <input
                                    class="form-input"
                                    type="datetime-local"
                                    required
                                    prop:value=move || draft.with(|d| d.start_time.clone())
                                    on:input=move |ev| {
                                        draft.update(|d| d.start_time = event_target_value(&ev))
                                    }
                                />
                            </label>
                            <label>
                                "End: "
                                <input
                                    class="form-input"
                                    type="datetime-local"
                                    required
                                    prop:value=move || draft.with(|d| d.end_time.clone())
                                    on:input=move |ev| {
                                        draft.update(|d| d.end_time = event_target_value(&ev))
                                    }
                                />
                            </label>
                            <div class="dialog-actions">
                                <button
                                    type="button"
                                    class="btn-cancel"
                                    on:click=move |_| dialog_open.set(false)
                                >
                                    "Cancel"
                                </button>
                                <button type="submit" class="btn-submit">
                                    {move || {
                                        if draft.with(|d| d.editing.is_some()) {
                                            "Update"
                                        } else {
                                            "Add"
                                        }
                                    }}
                                </button>
                            </div>
                        </form>
                    </div>
                </div>
            </Show>
        </div>
    }
}
