mod download;
mod fetcher;
mod metadata;

pub use download::{plan_for as build_download_plan, DownloadPlan};
pub use fetcher::{
    Attempt, FetchError, RetryPolicy, RetryingFetcher, Sleeper, DEFAULT_BASE_DELAY,
    DEFAULT_MAX_ATTEMPTS,
};
pub use metadata::{compute_sha256, verify_sha256};
