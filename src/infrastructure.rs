//! Infrastructure layer for network access, HTML extraction, term
//! normalization, storage and the ambient configuration and logging.

pub mod backoff;
pub mod config;
pub mod database_connection;
pub mod entity_repository;
pub mod fetcher;
pub mod http_client;
pub mod logging;
pub mod parsing;
pub mod robots;
pub mod term_normalizer;

// Re-export commonly used items
pub use backoff::BackoffPolicy;
pub use config::{AppConfig, ConfigError};
pub use database_connection::DatabaseConnection;
pub use entity_repository::SqliteEntityRepository;
pub use fetcher::{FetchError, FetchStats, RateLimitedFetcher, entity_url};
pub use http_client::{PageTransport, ReqwestTransport, TransportError, TransportResponse};
pub use logging::{get_log_directory, init_logging};
pub use parsing::{EntityHints, ExtractError, HtmlExtractor, StructuralExtractor};
pub use robots::{RobotsCache, RobotsRules};
pub use term_normalizer::{NormalizeError, NormalizeWarning, Normalized, TermNormalizer};
