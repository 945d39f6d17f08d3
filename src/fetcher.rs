//! The [ImageFetcher] drives a [ByteStore], a [RetrievalSource] and a [Codec], producing a decoded image for an
//! [ImageRequest].
//!
//! A fetch runs straight through, stopping at the first step which produces bytes:
//!
//! - The exact disk entry for the request's file cache key.
//! - Each size tag of the request's [ReusePolicy], in order.
//! - A download written through to the store.  The entry is committed only if the whole transfer succeeds, and the
//!   bytes are then read back from the store so that what gets decoded is exactly what is cached.
//!
//! The bytes are decoded twice: once for the dimensions only, then again with a sampling factor chosen from those
//! dimensions and the request's target size.  A substituted rendition is sampled against the target like any other.
//!
//! Fetching never touches the memory tier.  Callers populate it explicitly with [ImageFetcher::populate_memory_cache],
//! or use [ImageFetcher::get_or_fetch] which does the whole round trip.
use std::io::{BufReader, Error as IoError, ErrorKind, Read, Seek, Write};
use std::sync::Arc;

use crate::*;

pub const DEFAULT_STREAM_LOOK_AHEAD: usize = 64 * 1024;

#[derive(Debug, Clone, derive_builder::Builder)]
pub struct FetcherConfig {
    /// Whether this environment can keep sized decoded images in memory.  When false, populating the memory tier
    /// does nothing.
    #[builder(default = "true")]
    pub memory_caching_supported: bool,
    /// How far a streamed image may be read while finding its dimensions.
    #[builder(default = "DEFAULT_STREAM_LOOK_AHEAD")]
    pub stream_look_ahead: usize,
}

impl Default for FetcherConfig {
    fn default() -> FetcherConfig {
        FetcherConfig {
            memory_caching_supported: true,
            stream_look_ahead: DEFAULT_STREAM_LOOK_AHEAD,
        }
    }
}

/// Where the bytes for a fetch came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOrigin {
    DiskExact,
    /// A differently sized rendition, found via the reuse policy.
    Reuse {
        size_tag: String,
    },
    Network,
    /// Decoded straight from the retrieval source without going through the store.
    Stream,
}

#[derive(Debug)]
pub struct Fetched<T> {
    pub image: T,
    pub origin: FetchOrigin,
    pub plan: DecodePlan,
}

pub type FetchResult<T, E> = Result<Option<Fetched<T>>, FetchError<E>>;

pub struct ImageFetcher<S, R, C, M> {
    config: FetcherConfig,
    store: S,
    source: R,
    codec: C,
    memory: M,
    observer: Arc<dyn FetchObserver>,
}

fn decode_fault<E: std::error::Error>(e: E) -> FetchError<E> {
    tracing::warn!(error = %e, "decode failed");
    FetchError::Decode(e)
}

/// Owns an [EntryWriter] until it is committed, aborting it on every other way out.
struct PendingEntry<W: EntryWriter> {
    writer: Option<W>,
}

impl<W: EntryWriter> PendingEntry<W> {
    fn commit(mut self) -> Result<(), IoError> {
        match self.writer.take() {
            Some(w) => w.commit(),
            None => Ok(()),
        }
    }
}

impl<W: EntryWriter> Write for PendingEntry<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(IoError::new(ErrorKind::Other, "entry already finished")),
        }
    }

    fn flush(&mut self) -> Result<(), IoError> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl<W: EntryWriter> Drop for PendingEntry<W> {
    fn drop(&mut self) {
        if let Some(w) = self.writer.take() {
            if let Err(e) = w.abort() {
                tracing::warn!(error = %e, "could not abort disk entry");
            }
        }
    }
}

/// Counts bytes on their way into the store, and remembers whether the store itself refused any.
struct WatchedWriter<'a, W> {
    inner: &'a mut W,
    bytes: u64,
    store_failed: bool,
}

impl<'a, W: Write> Write for WatchedWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        match self.inner.write(buf) {
            Ok(n) => {
                self.bytes += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.store_failed = true;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> Result<(), IoError> {
        self.inner.flush().map_err(|e| {
            self.store_failed = true;
            e
        })
    }
}

impl<S, R, C, M> ImageFetcher<S, R, C, M>
where
    S: ByteStore,
    R: RetrievalSource,
    C: Codec,
    M: MemoryCache<C::Output>,
{
    pub fn new(store: S, source: R, codec: C, memory: M, config: FetcherConfig) -> ImageFetcher<S, R, C, M> {
        ImageFetcher {
            config,
            store,
            source,
            codec,
            memory,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the default [TracingObserver].
    pub fn with_observer(mut self, observer: Arc<dyn FetchObserver>) -> ImageFetcher<S, R, C, M> {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn source(&self) -> &R {
        &self.source
    }

    pub fn memory_cache(&self) -> &M {
        &self.memory
    }

    fn store_fault(e: IoError) -> FetchError<C::Error> {
        tracing::warn!(error = %e, "byte store fault");
        FetchError::Store(e)
    }

    fn emit(&self, request: &ImageRequest, event: FetchEvent<'_>) {
        self.observer.on_event(request, &event);
    }

    /// Fetch and decode the image for `request`, recording the origin size on it.
    ///
    /// Returns `Ok(None)` if no tier had the image and it couldn't be downloaded.
    pub fn fetch(&self, request: &mut ImageRequest) -> FetchResult<C::Output, C::Error> {
        let file_cache_key = request.file_cache_key();
        self.emit(
            request,
            FetchEvent::Started {
                file_cache_key: &file_cache_key,
            },
        );

        let found = match self.read_cached(request, &file_cache_key)? {
            Some(x) => Some(x),
            None => self
                .download(request, &file_cache_key)?
                .map(|r| (r, FetchOrigin::Network)),
        };
        let (reader, origin) = match found {
            Some(x) => x,
            None => {
                self.emit(request, FetchEvent::Unavailable);
                return Ok(None);
            }
        };

        let (image, plan) = self.decode_seekable(request, reader)?;
        Ok(Some(Fetched {
            image,
            origin,
            plan,
        }))
    }

    /// Decode straight from the retrieval source, without reading or writing the disk tier.
    ///
    /// The stream is read once; the dimensions are found within the configured look-ahead window, which is then
    /// replayed for the full decode.
    pub fn fetch_streaming(&self, request: &mut ImageRequest) -> FetchResult<C::Output, C::Error> {
        let url = request.remote_url().to_string();
        self.emit(request, FetchEvent::Downloading { url: &url });

        let stream = match self.source.open_input_stream(&url) {
            Ok(Some(s)) => s,
            Ok(None) => {
                self.emit(request, FetchEvent::Unavailable);
                return Ok(None);
            }
            Err(e) => {
                let error = e.to_string();
                self.emit(request, FetchEvent::DownloadFailed { error: &error });
                self.emit(request, FetchEvent::Unavailable);
                return Ok(None);
            }
        };

        let limit = self.config.stream_look_ahead;
        let mut stream = MarkableReader::new(stream);
        let mark = stream.save_position(limit);
        let origin = self.codec.decode_bounds(&mut stream).map_err(decode_fault)?;
        stream
            .reset(mark)
            .map_err(|_| FetchError::<C::Error>::LookAheadExceeded { limit })?;

        let plan = self.plan(request, origin);
        let image = self
            .codec
            .decode(stream, plan.sampling_factor)
            .map_err(decode_fault)?;
        Ok(Some(Fetched {
            image,
            origin: FetchOrigin::Stream,
            plan,
        }))
    }

    /// Look for the exact disk entry, then for each reuse candidate in order.
    fn read_cached(
        &self,
        request: &ImageRequest,
        file_cache_key: &str,
    ) -> Result<Option<(S::Reader, FetchOrigin)>, FetchError<C::Error>> {
        if let Some(r) = self.store.read(file_cache_key).map_err(Self::store_fault)? {
            self.emit(request, FetchEvent::DiskHit);
            return Ok(Some((r, FetchOrigin::DiskExact)));
        }

        let size_tags = match request.reuse_policy() {
            Some(p) => p.size_tags(),
            None => return Ok(None),
        };
        for size_tag in size_tags {
            let key = request.file_cache_key_for_reuse(size_tag);
            if let Some(r) = self.store.read(&key).map_err(Self::store_fault)? {
                self.emit(
                    request,
                    FetchEvent::ReuseHit {
                        size_tag: size_tag.as_str(),
                    },
                );
                return Ok(Some((
                    r,
                    FetchOrigin::Reuse {
                        size_tag: size_tag.clone(),
                    },
                )));
            }
            self.emit(
                request,
                FetchEvent::ReuseMiss {
                    size_tag: size_tag.as_str(),
                    key: &key,
                },
            );
        }
        Ok(None)
    }

    /// Download into the store and read the committed entry back.
    fn download(
        &self,
        request: &ImageRequest,
        file_cache_key: &str,
    ) -> Result<Option<S::Reader>, FetchError<C::Error>> {
        let url = request.remote_url();
        self.emit(request, FetchEvent::Downloading { url });

        let mut pending = match self.store.open(file_cache_key).map_err(Self::store_fault)? {
            Some(w) => PendingEntry { writer: Some(w) },
            None => {
                self.emit(request, FetchEvent::WriterConflict);
                return Ok(None);
            }
        };

        let mut sink = WatchedWriter {
            inner: &mut pending,
            bytes: 0,
            store_failed: false,
        };
        let transferred = self.source.fetch_to_stream(url, &mut sink);
        let (bytes, store_failed) = (sink.bytes, sink.store_failed);

        match transferred {
            Ok(()) => {
                pending.commit().map_err(Self::store_fault)?;
                self.emit(request, FetchEvent::Committed { bytes });
            }
            Err(e) => {
                // Abort before reporting either way.
                drop(pending);
                if store_failed {
                    return Err(Self::store_fault(e));
                }
                let error = e.to_string();
                self.emit(request, FetchEvent::DownloadFailed { error: &error });
                return Ok(None);
            }
        }

        self.store.read(file_cache_key).map_err(Self::store_fault)
    }

    /// Both passes run against the store entry itself, rewinding in between.
    fn decode_seekable<Rd: Read + Seek>(
        &self,
        request: &mut ImageRequest,
        reader: Rd,
    ) -> Result<(C::Output, DecodePlan), FetchError<C::Error>> {
        let mut reader = BufReader::new(reader);
        let origin = self
            .codec
            .decode_bounds_seekable(&mut reader)
            .map_err(decode_fault)?;
        reader.rewind().map_err(Self::store_fault)?;
        let plan = self.plan(request, origin);
        let image = self
            .codec
            .decode_seekable(reader, plan.sampling_factor)
            .map_err(decode_fault)?;
        Ok((image, plan))
    }

    /// Record the origin size on the request and choose the sampling factor for it.
    fn plan(&self, request: &mut ImageRequest, origin: Size) -> DecodePlan {
        request.set_origin_size(origin);
        let plan = DecodePlan::new(origin, request.target());
        self.emit(
            request,
            FetchEvent::Decoding {
                origin,
                sampling_factor: plan.sampling_factor,
            },
        );
        plan
    }

    /// Look the request up in the memory tier by its identity key.
    pub fn get_from_memory_cache(&self, request: &ImageRequest) -> Option<Arc<C::Output>> {
        self.memory.get(&request.identity_key())
    }

    /// Put a decoded image in the memory tier.
    ///
    /// Does nothing, returning false, if either argument is missing, the key is empty, or this environment doesn't
    /// support caching decoded images.
    pub fn populate_memory_cache(&self, key: Option<&str>, image: Option<Arc<C::Output>>) -> bool {
        match (key, image) {
            (Some(k), Some(img)) if !k.is_empty() && self.config.memory_caching_supported => {
                self.memory.set(k.to_string(), img);
                true
            }
            _ => false,
        }
    }

    pub fn clear_memory_cache(&self) {
        self.memory.clear();
    }

    /// Start flushing the disk tier in the background.
    pub fn flush_disk_cache_async(&self) -> MaintenanceHandle {
        self.store.flush_async()
    }

    /// Check the memory tier, then fetch and populate it.
    pub fn get_or_fetch(&self, request: &mut ImageRequest) -> Result<Option<Arc<C::Output>>, FetchError<C::Error>> {
        if let Some(hit) = self.get_from_memory_cache(request) {
            return Ok(Some(hit));
        }

        let fetched = match self.fetch(request)? {
            Some(f) => f,
            None => return Ok(None),
        };
        let image = Arc::new(fetched.image);
        let key = request.identity_key();
        self.populate_memory_cache(Some(&key), Some(image.clone()));
        Ok(Some(image))
    }
}
