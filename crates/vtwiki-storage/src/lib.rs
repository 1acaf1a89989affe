//! HTTP fetch utilities, shared limiter/token state, raw page archive and
//! repositories for vtwiki.

pub mod archive;
pub mod http;
pub mod limiter;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod token_cache;

pub use archive::{ArchivedRevision, PageArchive};
pub use http::{
    BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, HttpRequest,
};
pub use limiter::{IntervalLimiter, RateLimiter, Unlimited};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repository::{AgencyRepository, NonVtuberRegistry, ProfileRepository, StorageError};
pub use token_cache::{AccessToken, TokenCache};

pub const CRATE_NAME: &str = "vtwiki-storage";
