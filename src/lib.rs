//! A two-tier cache for fetching images at a requested size.
//!
//! Decoded images are big and encoded ones are small, so this crate keeps decoded images in a memory tier keyed by
//! identity, and encoded bytes in a disk tier keyed by identity plus size.  The interesting part is what happens on a
//! miss.  [ImageFetcher::fetch] takes an [ImageRequest] and:
//!
//! - Reads the exact disk entry for the requested rendition if there is one.
//! - Otherwise walks the request's [ReusePolicy], taking the first other rendition found on disk.
//! - Otherwise downloads from a [RetrievalSource] straight into the [ByteStore], committing only a complete transfer
//!   and decoding from what was committed.
//! - Decodes in two passes, first for the dimensions only and then with a power-of-two [sampling_factor] which keeps the
//!   result at least as large as the target while using as little memory as possible.
//!
//! The memory tier is populated explicitly with [ImageFetcher::populate_memory_cache], or by
//! [ImageFetcher::get_or_fetch] which does the whole round trip.
//!
//! To use this crate, pick or implement a [ByteStore], [RetrievalSource], [Codec] and [MemoryCache], then construct an
//! [ImageFetcher] with your chosen [FetcherConfig].  [FsByteStore], [ImageCodec] and [LruMemoryCache] cover the common
//! case.
mod error;
mod events;
mod fetcher;
mod fs_store;
mod image_codec;
pub mod keys;
mod markable;
mod memory_cache;
mod request;
mod sampling;
mod traits;

pub use error::*;
pub use events::*;
pub use fetcher::*;
pub use fs_store::*;
pub use image_codec::*;
pub use markable::*;
pub use memory_cache::*;
pub use request::*;
pub use sampling::*;
pub use traits::*;
