//! Wiki markup extraction, the wiki page store client with its category
//! walker, and streaming platform clients.

pub mod error;
pub mod extract;
pub mod platforms;
pub mod wiki;

pub use error::AdapterError;
pub use extract::{classify, extract, is_vtuber_page, PageKind};
pub use platforms::{
    BilibiliClient, BilibiliConfig, ChannelInfo, NiconicoClient, NiconicoConfig, PlatformClient,
    PlatformRegistry, TwitchClient, TwitchConfig, YoutubeClient, YoutubeConfig,
};
pub use wiki::{
    category_display_name, CategoryWalker, ListKind, MediaWikiClient, PageBatch, PageStore,
    AGENCY_CATEGORY, DEFAULT_WIKI_API_URL,
};

pub const CRATE_NAME: &str = "vtwiki-adapters";
