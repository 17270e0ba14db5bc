use leptos::prelude::*;

/// How long a notice stays on screen unless clicked away.
pub const NOTICE_TIMEOUT_MS: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

impl NoticeLevel {
    fn class(self) -> &'static str {
        match self {
            NoticeLevel::Success => "notice notice-success",
            NoticeLevel::Error => "notice notice-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoticeQueue {
    next_id: u64,
    notices: Vec<Notice>,
}

impl NoticeQueue {
    pub fn push(&mut self, level: NoticeLevel, text: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.notices.push(Notice { id, level, text });
        id
    }

    /// Returns false if the notice was already gone.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }
}

/// Handle for showing transient notifications.
#[derive(Debug, Clone, Copy)]
pub struct Notifier {
    queue: RwSignal<NoticeQueue>,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier {
            queue: RwSignal::new(NoticeQueue::default()),
        }
    }

    pub fn success(&self, text: impl Into<String>) {
        self.push(NoticeLevel::Success, text.into());
    }

    pub fn error(&self, text: impl Into<String>) {
        self.push(NoticeLevel::Error, text.into());
    }

    pub fn dismiss(&self, id: u64) {
        self.queue.try_update(|q| q.dismiss(id));
    }

    fn push(&self, level: NoticeLevel, text: String) {
        let Some(id) = self.queue.try_update(|q| q.push(level, text)) else {
            return;
        };

        #[cfg(feature = "hydrate")]
        {
            let notifier = *self;
            leptos::task::spawn_local(async move {
                gloo_timers::future::TimeoutFuture::new(NOTICE_TIMEOUT_MS).await;
                notifier.dismiss(id);
            });
        }
        #[cfg(not(feature = "hydrate"))]
        let _ = id;
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the current notices in the top-right corner. Clicking one dismisses it.
#[component]
pub fn Notices(notifier: Notifier) -> impl IntoView {
    view! {
        <div class="notices">
            <For
                each=move || notifier.queue.with(|q| q.notices().to_vec())
                key=|notice| notice.id
                children=move |notice| {
                    let id = notice.id;
                    view! {
                        <div class=notice.level.class() on:click=move |_| notifier.dismiss(id)>
                            {notice.text}
                        </div>
                    }
                }
            />
        </div>
    }
}
