pub mod browser;
pub mod detail;
pub mod fields;
pub mod http;
pub mod listing;
pub mod pagination;
pub mod traits;
pub mod types;

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;
pub use listing::ListingExtractor;
pub use traits::PageFetcher;
pub use types::UserAgentPool;
