//! The collaborators the [ImageFetcher](crate::ImageFetcher) drives.
//!
//! A [ByteStore] holds encoded bytes on disk, a [RetrievalSource] produces them from the network, a [Codec] turns them
//! into decoded images, and a [MemoryCache] keeps decoded images around.  The crate ships one implementation of each
//! except the retrieval source, but any of them may be swapped out.
use std::io::{BufRead, Error, Read, Seek, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::Size;

/// A keyed store of encoded bytes, usually backed by a directory with its own eviction policy.
pub trait ByteStore: Send + Sync + 'static {
    type Reader: Read + Seek + Send;
    type Writer: EntryWriter;

    /// Open a committed entry for reading, or `Ok(None)` if there isn't one.
    fn read(&self, key: &str) -> Result<Option<Self::Reader>, Error>;

    /// Open a writer for `key`.
    ///
    /// Returns `Ok(None)` if another writer already holds the key.
    fn open(&self, key: &str) -> Result<Option<Self::Writer>, Error>;

    /// Start flushing and compacting the store in the background.
    fn flush_async(&self) -> MaintenanceHandle;
}

/// An in-flight write to a [ByteStore].
///
/// Nothing written becomes visible to [ByteStore::read] until [EntryWriter::commit] succeeds.
pub trait EntryWriter: Write + Send {
    fn commit(self) -> Result<(), Error>;

    /// Throw away everything written so far.
    fn abort(self) -> Result<(), Error>;
}

/// Produces raw bytes for a remote url.
pub trait RetrievalSource: Send + Sync {
    type Stream: Read + Send;

    /// Copy the whole resource into `out`.  A truncated transfer must be reported as an error.
    fn fetch_to_stream(&self, url: &str, out: &mut dyn Write) -> Result<(), Error>;

    /// Open the resource as a stream, or `Ok(None)` if it doesn't exist.
    fn open_input_stream(&self, url: &str) -> Result<Option<Self::Stream>, Error>;
}

/// A `Codec` knows how to get from encoded bytes to a decoded image, optionally subsampled.
pub trait Codec: Send + Sync {
    type Output: Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read only as much as is needed to learn the dimensions of the image.
    fn decode_bounds<R: Read>(&self, reader: R) -> Result<Size, Self::Error>;

    /// Decode the image, shrinking each dimension by `sampling_factor`.
    fn decode<R: Read>(&self, reader: R, sampling_factor: u32) -> Result<Self::Output, Self::Error>;

    /// [Codec::decode_bounds] for a reader which can seek, such as a disk entry.
    ///
    /// Codecs which can jump straight to the dimensions override this.  The default reads from the start like the
    /// streaming version.
    fn decode_bounds_seekable<R: BufRead + Seek>(&self, reader: R) -> Result<Size, Self::Error> {
        self.decode_bounds(reader)
    }

    /// [Codec::decode] for a reader which can seek.
    fn decode_seekable<R: BufRead + Seek>(
        &self,
        reader: R,
        sampling_factor: u32,
    ) -> Result<Self::Output, Self::Error> {
        self.decode(reader, sampling_factor)
    }
}

/// A capacity-bounded map from identity keys to decoded images.
///
/// Implementations must be safe to use from many threads at once.
pub trait MemoryCache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<V>>;
    fn set(&self, key: String, value: Arc<V>);
    fn clear(&self);
}

/// Estimate the cost of an item.  This is usually in bytes.
///
/// [LruMemoryCache](crate::LruMemoryCache) caches up to a specified total cost, then begins evicting entries which are
/// least recently used.
pub trait EstimateCost {
    fn estimate_cost(&self) -> u64;
}

/// Handle to background store maintenance started by [ByteStore::flush_async].
///
/// Dropping the handle detaches the work.
#[derive(Debug)]
pub struct MaintenanceHandle(Option<JoinHandle<Result<(), Error>>>);

impl MaintenanceHandle {
    pub fn spawned(handle: JoinHandle<Result<(), Error>>) -> MaintenanceHandle {
        MaintenanceHandle(Some(handle))
    }

    /// For stores with nothing to do.
    pub fn completed() -> MaintenanceHandle {
        MaintenanceHandle(None)
    }

    /// Block until the maintenance finishes.
    pub fn wait(self) -> Result<(), Error> {
        match self.0 {
            None => Ok(()),
            Some(h) => h
                .join()
                .map_err(|_| Error::new(std::io::ErrorKind::Other, "store maintenance panicked"))?,
        }
    }
}
