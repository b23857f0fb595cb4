//! The polling loop: dedup through the watermark, classify, answer operator
//! commands, and drive deliveries for every media reference found.

pub mod report;
mod shutdown;

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{CommandsSection, FeedcastConfig, PollingStyle};
use crate::delivery::Orchestrator;
use crate::error::ConfigError;
use crate::feed::{ChatMemberUpdated, Event, Feed, FeedError, Message, OutgoingMessage, Update};
use crate::source::{MediaReference, PlaylistResolver, SourceResult};
use crate::state::{LoopState, StateError, StateStore};

pub use shutdown::{shutdown_notice, spawn_shutdown_hook, wait_for_signal};

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("feed unreachable: {0}")]
    FeedUnreachable(#[source] FeedError),
    #[error("failed to load loop state: {0}")]
    State(#[from] StateError),
}

pub type LoopResult<T> = Result<T, LoopError>;

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub operator_chat_id: i64,
    pub polling_style: PollingStyle,
    pub interval: Duration,
    pub mirror_events: bool,
    pub commands: CommandsSection,
    pub video_title_prefix: Option<String>,
    pub playlist_pause: Duration,
    pub playlist_pause_threshold: usize,
    pub media_pattern: Regex,
    pub playlist_pattern: Regex,
}

impl LoopSettings {
    pub fn from_config(config: &FeedcastConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            operator_chat_id: config.feed.operator_chat_id,
            polling_style: config.feed.polling_style,
            interval: config.system.interval(),
            mirror_events: config.feed.mirror_events,
            commands: config.feed.commands.clone(),
            video_title_prefix: config.delivery.video_title_prefix.clone(),
            playlist_pause: config.delivery.playlist_pause(),
            playlist_pause_threshold: config.delivery.playlist_pause_threshold,
            media_pattern: config.source.media_regex()?,
            playlist_pattern: config.source.playlist_regex()?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub fetched: usize,
    pub skipped: usize,
    pub references: usize,
    pub delivered: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

pub struct UpdateLoop {
    feed: Arc<dyn Feed>,
    orchestrator: Arc<Orchestrator>,
    playlists: Arc<dyn PlaylistResolver>,
    store: StateStore,
    state: LoopState,
    settings: LoopSettings,
}

impl UpdateLoop {
    pub fn new(
        feed: Arc<dyn Feed>,
        orchestrator: Arc<Orchestrator>,
        playlists: Arc<dyn PlaylistResolver>,
        store: StateStore,
        state: LoopState,
        settings: LoopSettings,
    ) -> Self {
        Self {
            feed,
            orchestrator,
            playlists,
            store,
            state,
            settings,
        }
    }

    /// Loads persisted state from `store` before building the loop.
    pub async fn bootstrap(
        feed: Arc<dyn Feed>,
        orchestrator: Arc<Orchestrator>,
        playlists: Arc<dyn PlaylistResolver>,
        store: StateStore,
        settings: LoopSettings,
    ) -> LoopResult<Self> {
        let state = store.load().await?;
        Ok(Self::new(feed, orchestrator, playlists, store, state, settings))
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Polls forever; only an unreachable feed ends the loop.
    pub async fn run(&mut self) -> LoopResult<()> {
        loop {
            let started = Instant::now();
            let stats = self.run_cycle().await?;
            info!(
                fetched = stats.fetched,
                skipped = stats.skipped,
                delivered = stats.delivered,
                failed = stats.failed,
                duration_ms = stats.duration_ms,
                "poll cycle finished"
            );
            if let Some(remaining) = self.settings.interval.checked_sub(started.elapsed()) {
                sleep(remaining).await;
            }
        }
    }

    pub async fn run_cycle(&mut self) -> LoopResult<CycleStats> {
        let started = Instant::now();
        let offset = match self.settings.polling_style {
            PollingStyle::Log => None,
            PollingStyle::Offset => self.state.watermark.newest().map(|id| id + 1),
        };
        let updates = self
            .feed
            .get_updates(offset)
            .await
            .map_err(LoopError::FeedUnreachable)?;

        let mut stats = CycleStats {
            fetched: updates.len(),
            ..CycleStats::default()
        };
        let mut previous_body: Option<String> = None;
        for update in &updates {
            self.handle_update(update, &mut previous_body, &mut stats)
                .await;
        }
        stats.duration_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn handle_update(
        &mut self,
        update: &Update,
        previous_body: &mut Option<String>,
        stats: &mut CycleStats,
    ) {
        if !self.state.watermark.record(update.update_id) {
            debug!(update_id = update.update_id, "update already processed, skipping");
            stats.skipped += 1;
            return;
        }
        if let Err(err) = self.store.save_watermark(&self.state.watermark).await {
            warn!(update_id = update.update_id, error = %err, "failed to persist watermark");
        }

        match update.classify() {
            Event::Text {
                message,
                edited,
                channel_post,
            } => {
                self.handle_message(message, edited, channel_post, previous_body, stats)
                    .await
            }
            Event::MembershipChange(change) => self.report_membership(change).await,
            Event::Unrecognized => {
                warn!(update_id = update.update_id, "unsupported update received");
                self.notify_operator(report::unrecognized(update)).await;
            }
        }
    }

    async fn handle_message(
        &mut self,
        message: &Message,
        edited: bool,
        channel_post: bool,
        previous_body: &mut Option<String>,
        stats: &mut CycleStats,
    ) {
        let chat_id = message.chat.id;
        if channel_post && self.state.channels.insert(chat_id) {
            info!(chat_id, "new broadcast feed");
            self.persist_channels().await;
        }

        let body = message.body();
        info!(
            chat_id,
            message_id = message.message_id,
            from = message.sender_username(),
            text = body,
            "message received"
        );
        if body.is_empty() {
            return;
        }

        if self.settings.mirror_events {
            self.mirror(message, edited).await;
        }
        self.answer_commands(message).await;

        let want_video = wants_video(
            body,
            previous_body.as_deref(),
            message.chat.title(),
            self.settings.video_title_prefix.as_deref(),
        );
        *previous_body = Some(body.to_string());

        let references = match self.extract_references(body).await {
            Ok(references) => references,
            Err(err) => {
                warn!(chat_id, error = %err, "playlist expansion failed");
                stats.failed += 1;
                self.reply_error(message, &err.to_string()).await;
                return;
            }
        };
        if references.is_empty() {
            return;
        }
        stats.references += references.len();

        let total = references.len();
        let mut failure = None;
        for (index, reference) in references.iter().enumerate() {
            match self
                .orchestrator
                .deliver(reference, want_video, chat_id)
                .await
            {
                Ok(report) => {
                    stats.delivered += 1;
                    debug!(?report, "delivery finished");
                }
                Err(err) => {
                    warn!(media_id = %reference.id, chat_id, error = %err, "delivery failed");
                    failure = Some(err);
                    break;
                }
            }
            if pause_after(index, total, self.settings.playlist_pause_threshold) {
                sleep(self.settings.playlist_pause).await;
            }
        }

        match failure {
            None if channel_post => {
                if let Err(err) = self
                    .feed
                    .delete_message(chat_id, message.message_id)
                    .await
                {
                    warn!(
                        chat_id,
                        message_id = message.message_id,
                        error = %err,
                        "failed to delete delivered post"
                    );
                }
            }
            None => {}
            Some(err) => {
                stats.failed += 1;
                self.reply_error(message, &err.to_string()).await;
            }
        }
    }

    async fn extract_references(&self, body: &str) -> SourceResult<Vec<MediaReference>> {
        if let Some(id) = first_capture(&self.settings.playlist_pattern, body) {
            return self.playlists.expand(id).await;
        }
        Ok(first_capture(&self.settings.media_pattern, body)
            .map(|id| vec![MediaReference::single(id)])
            .unwrap_or_default())
    }

    async fn mirror(&self, message: &Message, edited: bool) {
        let operator = self.settings.operator_chat_id;
        if message.sender_id() == operator {
            return;
        }
        let admins = match self.feed.get_chat_administrators(message.chat.id).await {
            Ok(admins) => admins,
            Err(err) => {
                debug!(chat_id = message.chat.id, error = %err, "administrator lookup failed");
                Vec::new()
            }
        };
        if admins.iter().any(|admin| admin.user.id == operator) {
            return;
        }
        self.notify_operator(report::mirrored_message(message, &admins, edited))
            .await;
    }

    async fn answer_commands(&mut self, message: &Message) {
        let command = message.body().trim();
        if command == "/id" {
            let reply = OutgoingMessage::new(message.chat.id, report::id_reply(message))
                .markdown()
                .reply_to(message.message_id);
            self.send(reply).await;
        }
        if self.settings.commands.list_channels.as_deref() == Some(command) {
            self.list_channels(message).await;
        }
        if self.settings.commands.promote_admin.as_deref() == Some(command) {
            self.promote_admin(message).await;
        }
        let replies: Vec<String> = self
            .settings
            .commands
            .replies
            .iter()
            .filter(|keyword| keyword.trigger == command)
            .map(|keyword| keyword.reply.clone())
            .collect();
        for reply in replies {
            self.send(OutgoingMessage::new(message.chat.id, reply)).await;
        }
    }

    async fn list_channels(&mut self, message: &Message) {
        let chat_id = message.chat.id;
        let channels: Vec<i64> = self.state.channels.iter().collect();
        let mut removed = 0usize;
        for channel_id in &channels {
            match self.feed.get_chat(*channel_id).await {
                Ok(chat) => {
                    let line = match chat.public_link() {
                        Some(link) => format!("{} {link}", chat.title()),
                        None => chat.title().to_string(),
                    };
                    self.send(OutgoingMessage::new(chat_id, line)).await;
                }
                Err(err) if err.is_chat_not_found() => {
                    info!(channel_id, "dropping broadcast feed that no longer exists");
                    self.state.channels.remove(*channel_id);
                    removed += 1;
                }
                Err(err) => {
                    let line = format!("id:{channel_id} err:{err}");
                    self.send(OutgoingMessage::new(chat_id, line)).await;
                }
            }
        }
        if removed > 0 {
            self.persist_channels().await;
        }
        let mut summary = format!("Total {} channels.", channels.len());
        if removed > 0 {
            summary.push_str(&format!("\nRemoved {removed} channels."));
        }
        self.send(OutgoingMessage::new(chat_id, summary).reply_to(message.message_id))
            .await;
    }

    async fn promote_admin(&self, message: &Message) {
        let user_id = message.sender_id();
        let mut total = 0usize;
        let mut promoted = 0usize;
        for channel_id in self.state.channels.iter() {
            total += 1;
            match self.feed.promote_chat_member(channel_id, user_id).await {
                Ok(true) => {
                    promoted += 1;
                    info!(channel_id, user_id, "promoted to administrator");
                }
                Ok(false) => warn!(channel_id, user_id, "promotion declined"),
                Err(err) => warn!(channel_id, user_id, error = %err, "promotion failed"),
            }
        }
        let summary = format!("ok for {promoted} of total {total} channels.");
        self.send(OutgoingMessage::new(message.chat.id, summary).reply_to(message.message_id))
            .await;
    }

    async fn report_membership(&self, change: &ChatMemberUpdated) {
        info!(
            chat_id = change.chat.id,
            status = %change.new_chat_member.status,
            "membership changed"
        );
        self.notify_operator(report::membership_change(change)).await;
    }

    async fn notify_operator(&self, text: String) {
        let message = OutgoingMessage::new(self.settings.operator_chat_id, text).markdown();
        self.send(message).await;
    }

    async fn reply_error(&self, message: &Message, error: &str) {
        let reply = OutgoingMessage::new(message.chat.id, format!("ERROR {error}"))
            .reply_to(message.message_id);
        self.send(reply).await;
    }

    async fn send(&self, message: OutgoingMessage) {
        let chat_id = message.chat_id;
        if let Err(err) = self.feed.send_message(message).await {
            warn!(chat_id, error = %err, "failed to send message");
        }
    }

    async fn persist_channels(&self) {
        if let Err(err) = self.store.save_channels(&self.state.channels).await {
            warn!(error = %err, "failed to persist broadcast feeds");
        }
    }
}

/// Long expansions pause between consecutive deliveries, never after the last.
fn pause_after(index: usize, total: usize, threshold: usize) -> bool {
    total > threshold && index + 1 < total
}

fn first_capture<'t>(pattern: &Regex, text: &'t str) -> Option<&'t str> {
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|matched| matched.as_str())
}

/// Video is wanted when the body is tagged with a leading or trailing
/// `video` word, when the previous body this cycle was exactly `video`, or
/// when the chat title starts with the configured prefix.
pub fn wants_video(
    body: &str,
    previous_body: Option<&str>,
    chat_title: &str,
    title_prefix: Option<&str>,
) -> bool {
    let body = body.to_lowercase();
    if body.starts_with("video ") || body.ends_with(" video") {
        return true;
    }
    if previous_body.is_some_and(|previous| previous.to_lowercase() == "video") {
        return true;
    }
    title_prefix
        .filter(|prefix| !prefix.is_empty())
        .is_some_and(|prefix| chat_title.to_lowercase().starts_with(&prefix.to_lowercase()))
}
