use std::io::Error as IoError;

/// Failures surfaced by a fetch.
///
/// A missing image is not an error: fetches return `Ok(None)` when no tier and no source could produce bytes, including
/// when a download fails part way through.
#[derive(Debug, thiserror::Error)]
pub enum FetchError<DecodeError> {
    /// The byte store failed to open, read, write or commit an entry.
    #[error("byte store fault: {0}")]
    Store(#[source] IoError),
    /// Bytes were obtained but the codec couldn't make sense of them.
    #[error("could not decode image: {0}")]
    Decode(#[source] DecodeError),
    /// A streamed image header didn't fit in the look-ahead window, so the stream couldn't be rewound.
    #[error("image header exceeded the {limit} byte look-ahead window")]
    LookAheadExceeded { limit: usize },
}
