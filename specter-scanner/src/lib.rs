pub mod crawler;
pub mod detection;
pub mod error;
pub mod frontier;

pub use crawler::{Crawler, CrawlerOptions, Target};
pub use detection::{DetectionResult, FetchedPage, detect};
pub use error::CrawlError;
pub use frontier::FrontierState;
