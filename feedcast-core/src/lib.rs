pub mod config;
pub mod delivery;
pub mod error;
pub mod feed;
pub mod process;
pub mod selector;
pub mod source;
pub mod state;
pub mod transcode;
pub mod updates;

pub use config::{
    load_feedcast_config, parse_feedcast_config, FeedcastConfig, PollingStyle, StateBackend,
};
pub use delivery::{
    DeliveryError, DeliveryReport, DeliveryResult, DeliverySettings, Orchestrator,
    TemporaryArtifact,
};
pub use error::{ConfigError, Result};
pub use feed::{Feed, FeedError, FeedResult, OutgoingMessage, TelegramClient};
pub use process::{CommandExecutor, SystemCommandExecutor};
pub use selector::{
    select, DeliveryBudget, EncodingDescriptor, MediaFamily, SelectError, Selection,
};
pub use source::{
    MediaMetadata, MediaReference, MediaSource, PlaylistContext, PlaylistResolver, SourceError,
    SourceResult, YoutubeDataApi, YtDlpSource,
};
pub use state::{
    store_from_config, ChannelRegistry, KeyValueStore, LoopState, StateError, StateResult,
    StateStore, Watermark,
};
pub use transcode::{TranscodeError, TranscodeResult, Transcoder};
pub use updates::{CycleStats, LoopError, LoopResult, LoopSettings, UpdateLoop};
