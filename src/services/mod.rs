pub mod annotate_service;
pub mod cache_service;
pub mod freshness;
pub mod messaging_service;
pub mod page_service;
pub mod scan_service;
pub mod scheduler_service;
pub mod watcher_service;

pub use annotate_service::{AnnotationStats, Annotator, ProcessedNodeSet};
pub use cache_service::{CacheStatus, RateCache};
pub use messaging_service::{PriceClient, PriceResponder};
pub use page_service::PageSession;
pub use scheduler_service::RefreshScheduler;
pub use watcher_service::MutationWatcher;
