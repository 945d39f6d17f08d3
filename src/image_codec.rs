//! A [Codec] over the `image` crate.
use std::io::{BufRead, Cursor, Read, Seek};

use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageReader};

use crate::*;

/// First read when looking for the dimensions of a stream.  Each retry reads twice as much, up to
/// [MAX_HEADER_CHUNK].
const FIRST_HEADER_CHUNK: usize = 4 * 1024;
const MAX_HEADER_CHUNK: usize = 64 * 1024;

/// Bytes needed before the format can be recognized from its magic number.
const MAGIC_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct ImageCodec {
    filter: FilterType,
}

impl Default for ImageCodec {
    fn default() -> ImageCodec {
        ImageCodec {
            filter: FilterType::Triangle,
        }
    }
}

impl ImageCodec {
    pub fn new() -> ImageCodec {
        Default::default()
    }

    /// Filter used when shrinking by the sampling factor.
    pub fn with_filter(mut self, filter: FilterType) -> ImageCodec {
        self.filter = filter;
        self
    }

    fn shrink(&self, decoded: DynamicImage, sampling_factor: u32) -> DynamicImage {
        let factor = sampling_factor.max(1);
        if factor == 1 {
            return decoded;
        }
        let width = (decoded.width() / factor).max(1);
        let height = (decoded.height() / factor).max(1);
        decoded.resize_exact(width, height, self.filter)
    }
}

impl Codec for ImageCodec {
    type Output = DynamicImage;
    type Error = ImageError;

    /// Reads the stream a chunk at a time until the header parses, so only as much as the header needs is consumed
    /// (rounded up to the chunk).  Metadata before the dimensions, such as a large EXIF block, just means more chunks.
    fn decode_bounds<R: Read>(&self, mut reader: R) -> Result<Size, ImageError> {
        let mut header = vec![];
        let mut chunk = FIRST_HEADER_CHUNK;
        loop {
            let read = (&mut reader)
                .take(chunk as u64)
                .read_to_end(&mut header)?;
            let exhausted = read == 0;
            if header.len() >= MAGIC_LEN || exhausted {
                // Unknown formats fail here rather than reading the whole stream.
                image::guess_format(&header)?;
            }
            match self.decode_bounds_seekable(Cursor::new(&header[..])) {
                Ok(size) => return Ok(size),
                Err(e) if exhausted => return Err(e),
                Err(_) => chunk = (chunk * 2).min(MAX_HEADER_CHUNK),
            }
        }
    }

    fn decode<R: Read>(&self, mut reader: R, sampling_factor: u32) -> Result<DynamicImage, ImageError> {
        // The decoders need to seek, which a plain stream can't.
        let mut bytes = vec![];
        reader.read_to_end(&mut bytes)?;
        self.decode_seekable(Cursor::new(bytes), sampling_factor)
    }

    fn decode_bounds_seekable<R: BufRead + Seek>(&self, reader: R) -> Result<Size, ImageError> {
        let (width, height) = ImageReader::new(reader)
            .with_guessed_format()?
            .into_dimensions()?;
        Ok(Size::new(width, height))
    }

    fn decode_seekable<R: BufRead + Seek>(
        &self,
        reader: R,
        sampling_factor: u32,
    ) -> Result<DynamicImage, ImageError> {
        let decoded = ImageReader::new(reader).with_guessed_format()?.decode()?;
        Ok(self.shrink(decoded, sampling_factor))
    }
}

impl EstimateCost for DynamicImage {
    fn estimate_cost(&self) -> u64 {
        self.as_bytes().len() as u64
    }
}

#[cfg(test)]
fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

#[cfg(test)]
pub(crate) fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(vec![]);
    gradient(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("Should encode");
    out.into_inner()
}

/// A JPEG whose frame header sits behind `metadata_len` bytes of APP1 segments, the way large EXIF blocks do.
#[cfg(test)]
pub(crate) fn encode_jpeg_with_metadata(width: u32, height: u32, metadata_len: usize) -> Vec<u8> {
    let mut out = Cursor::new(vec![]);
    gradient(width, height)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .expect("Should encode");
    let jpeg = out.into_inner();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    // Segment lengths include their own two bytes and top out at u16::MAX.
    let mut metadata = vec![];
    let mut remaining = metadata_len;
    while remaining > 0 {
        let payload = remaining.min(u16::MAX as usize - 2);
        metadata.extend_from_slice(&[0xFF, 0xE1]);
        metadata.extend_from_slice(&((payload + 2) as u16).to_be_bytes());
        metadata.resize(metadata.len() + payload, b'A');
        remaining -= payload;
    }

    let mut with_metadata = jpeg[..2].to_vec();
    with_metadata.extend_from_slice(&metadata);
    with_metadata.extend_from_slice(&jpeg[2..]);
    with_metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_then_sampled_decode() {
        let png = encode_png(400, 300);
        let codec = ImageCodec::new();

        assert_eq!(codec.decode_bounds(&png[..]).unwrap(), Size::new(400, 300));

        let full = codec.decode(&png[..], 1).unwrap();
        assert_eq!((full.width(), full.height()), (400, 300));

        let quarter = codec.decode(&png[..], 4).unwrap();
        assert_eq!((quarter.width(), quarter.height()), (100, 75));
        assert_eq!(quarter.estimate_cost(), 100 * 75 * 3);
    }

    #[test]
    fn test_seekable_matches_streaming() {
        let png = encode_png(64, 48);
        let codec = ImageCodec::new();

        assert_eq!(
            codec.decode_bounds_seekable(Cursor::new(&png[..])).unwrap(),
            Size::new(64, 48)
        );
        let half = codec.decode_seekable(Cursor::new(&png[..]), 2).unwrap();
        assert_eq!((half.width(), half.height()), (32, 24));
    }

    #[test]
    fn test_large_metadata_before_dimensions() {
        let jpeg = encode_jpeg_with_metadata(400, 300, 60_000);
        assert!(jpeg.len() > 60_000);
        let codec = ImageCodec::new();

        assert_eq!(codec.decode_bounds(&jpeg[..]).unwrap(), Size::new(400, 300));
        assert_eq!(
            codec.decode_bounds_seekable(Cursor::new(&jpeg[..])).unwrap(),
            Size::new(400, 300)
        );

        let half = codec.decode_seekable(Cursor::new(&jpeg[..]), 2).unwrap();
        assert_eq!((half.width(), half.height()), (200, 150));
        let half = codec.decode(&jpeg[..], 2).unwrap();
        assert_eq!((half.width(), half.height()), (200, 150));
    }

    #[test]
    fn test_bounds_stop_at_the_header() {
        let png = encode_png(400, 300);
        let codec = ImageCodec::new();

        let mut reader = &png[..];
        codec.decode_bounds(&mut reader).unwrap();
        assert_eq!(reader.len(), png.len().saturating_sub(FIRST_HEADER_CHUNK));
    }

    #[test]
    fn test_garbage_is_an_error() {
        let codec = ImageCodec::new();
        assert!(codec.decode_bounds(&b"definitely not an image"[..]).is_err());
        assert!(codec.decode(&b"definitely not an image"[..], 2).is_err());
        assert!(codec
            .decode_bounds_seekable(Cursor::new(&b"definitely not an image"[..]))
            .is_err());

        // A recognizable header cut off before the dimensions.
        let png = encode_png(16, 16);
        assert!(codec.decode_bounds(&png[..12]).is_err());
    }
}
