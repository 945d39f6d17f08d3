//! Structured events describing the decisions a fetch takes.
//!
//! The fetcher reports through a [FetchObserver] instead of logging inline; [TracingObserver] forwards to `tracing`.
use crate::{ImageRequest, Size};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent<'a> {
    Started { file_cache_key: &'a str },
    DiskHit,
    ReuseHit { size_tag: &'a str },
    ReuseMiss { size_tag: &'a str, key: &'a str },
    Downloading { url: &'a str },
    /// Another writer holds the disk entry.
    WriterConflict,
    DownloadFailed { error: &'a str },
    Committed { bytes: u64 },
    Decoding { origin: Size, sampling_factor: u32 },
    Unavailable,
}

pub trait FetchObserver: Send + Sync {
    fn on_event(&self, request: &ImageRequest, event: &FetchEvent<'_>);
}

/// Emits every event at debug level, and failures at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl FetchObserver for TracingObserver {
    fn on_event(&self, request: &ImageRequest, event: &FetchEvent<'_>) {
        match *event {
            FetchEvent::Started { file_cache_key } => tracing::debug!(
                %request,
                identity_key = %request.identity_key(),
                file_cache_key,
                origin_url = request.origin_url(),
                "fetch started"
            ),
            FetchEvent::DiskHit => tracing::debug!(%request, "disk cache hit"),
            FetchEvent::ReuseHit { size_tag } => tracing::debug!(%request, size_tag, "reusing other size"),
            FetchEvent::ReuseMiss { size_tag, key } => {
                tracing::debug!(%request, size_tag, key, "reuse candidate missing")
            }
            FetchEvent::Downloading { url } => tracing::debug!(%request, url, "downloading"),
            FetchEvent::WriterConflict => tracing::warn!(%request, "disk entry is held by another writer"),
            FetchEvent::DownloadFailed { error } => tracing::warn!(%request, error, "download failed"),
            FetchEvent::Committed { bytes } => tracing::debug!(%request, bytes, "committed to disk"),
            FetchEvent::Decoding {
                origin,
                sampling_factor,
            } => tracing::debug!(%request, %origin, sampling_factor, "decoding"),
            FetchEvent::Unavailable => tracing::warn!(%request, "image unavailable"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FetchObserver for NoopObserver {
    fn on_event(&self, _request: &ImageRequest, _event: &FetchEvent<'_>) {}
}
