//! Compression/decompression for ClickHouse native protocol.
//!
//! LZ4 and ZSTD support w/ ClickHouse's custom frame format:
//! - 16 bytes: CityHash128 checksum
//! - 1 byte: compression method (0x02=None, 0x82=LZ4, 0x90=ZSTD)
//! - 4 bytes: compressed size (incl. 9-byte header)
//! - 4 bytes: decompressed size
//! - N bytes: payload
//!
//! Checksum covers method+sizes+payload. Frames are read by method byte, so a server answering
//! in a different codec than the one we send with is still understood.
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BufMut;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use super::io::ClickHouseRead;
use crate::config::CompressionMethod;
use crate::{Error, Result};

const HEADER_SIZE: usize = 9;

/// Compress `raw` into a single ClickHouse frame appended to `out`.
#[expect(clippy::cast_possible_truncation)]
pub(crate) fn compress_frame(
    out: &mut impl BufMut,
    raw: &[u8],
    compression: CompressionMethod,
) -> Result<()> {
    let payload = match compression {
        // ZSTD with default compression level (1)
        CompressionMethod::ZSTD => zstd::bulk::compress(raw, 1)
            .map_err(|e| Error::Protocol(format!("ZSTD compress error: {e}")))?,
        CompressionMethod::LZ4 => lz4_flex::compress(raw),
        CompressionMethod::None => raw.to_vec(),
    };
    let compressed_size = u32::try_from(payload.len() + HEADER_SIZE)
        .map_err(|_| Error::Protocol("compressed frame exceeds 4GiB".into()))?;
    let decompressed_size = u32::try_from(raw.len())
        .map_err(|_| Error::Protocol("block exceeds 4GiB".into()))?;

    let mut frame = Vec::with_capacity(payload.len() + HEADER_SIZE);
    frame.push(compression.byte());
    frame.extend_from_slice(&compressed_size.to_le_bytes());
    frame.extend_from_slice(&decompressed_size.to_le_bytes());
    frame.extend_from_slice(&payload);

    let hash = cityhash_rs::cityhash_102_128(&frame);
    out.put_u64_le((hash >> 64) as u64);
    out.put_u64_le(hash as u64);
    out.put_slice(&frame);
    Ok(())
}

/// Read and decompress a single frame. Validates CityHash128 checksum.
pub(crate) async fn decompress_frame(reader: &mut impl ClickHouseRead) -> Result<Vec<u8>> {
    // Read checksum (16 bytes)
    let checksum_high = reader
        .read_u64_le()
        .await
        .map_err(|e| Error::Protocol(format!("Failed to read checksum high: {e}")))?;
    let checksum_low = reader
        .read_u64_le()
        .await
        .map_err(|e| Error::Protocol(format!("Failed to read checksum low: {e}")))?;
    let checksum = (u128::from(checksum_high) << 64) | u128::from(checksum_low);

    // Read compression header (9 bytes)
    let type_byte = reader
        .read_u8()
        .await
        .map_err(|e| Error::Protocol(format!("Failed to read compression type: {e}")))?;
    let method = CompressionMethod::from_byte(type_byte).ok_or_else(|| {
        Error::Protocol(format!("Unknown compression method: {type_byte:02x}"))
    })?;

    let compressed_size = reader
        .read_u32_le()
        .await
        .map_err(|e| Error::Protocol(format!("Failed to read compressed size: {e}")))?;
    let decompressed_size = reader
        .read_u32_le()
        .await
        .map_err(|e| Error::Protocol(format!("Failed to read decompressed size: {e}")))?;

    // Sanity checks
    if compressed_size > 100_000_000 || decompressed_size > 1_000_000_000 {
        return Err(Error::Protocol("Chunk size too large".to_string()));
    }
    if (compressed_size as usize) < HEADER_SIZE {
        return Err(Error::Protocol(format!("Chunk size {compressed_size} below header size")));
    }

    // Build the complete compressed block for checksum validation
    let mut compressed = vec![0u8; compressed_size as usize];
    let _ = reader
        .read_exact(&mut compressed[HEADER_SIZE..])
        .await
        .map_err(|e| Error::Protocol(format!("Failed to read compressed payload: {e}")))?;
    compressed[0] = type_byte;
    compressed[1..5].copy_from_slice(&compressed_size.to_le_bytes());
    compressed[5..9].copy_from_slice(&decompressed_size.to_le_bytes());

    let calc_checksum = cityhash_rs::cityhash_102_128(&compressed);
    if calc_checksum != checksum {
        return Err(Error::Protocol(format!(
            "Checksum mismatch: expected {checksum:032x}, got {calc_checksum:032x}"
        )));
    }

    let payload = &compressed[HEADER_SIZE..];
    let decompressed_size = decompressed_size as usize;
    match method {
        CompressionMethod::LZ4 => lz4_flex::decompress(payload, decompressed_size)
            .map_err(|e| Error::Protocol(format!("LZ4 decompress error: {e}"))),
        CompressionMethod::ZSTD => zstd::bulk::decompress(payload, decompressed_size)
            .map_err(|e| Error::Protocol(format!("ZSTD decompress error: {e}"))),
        CompressionMethod::None if payload.len() == decompressed_size => Ok(payload.to_vec()),
        CompressionMethod::None => Err(Error::Protocol(format!(
            "Uncompressed frame of {} bytes declares {decompressed_size}",
            payload.len()
        ))),
    }
}

type FrameReadingFuture<'a, R> =
    Pin<Box<dyn Future<Output = Result<(Vec<u8>, &'a mut R)>> + Send + 'a>>;

/// Async reader that decompresses ClickHouse frames on-the-fly.
///
/// A block may span several frames; the next frame is only read once the current one is
/// exhausted, so the reader never consumes bytes past the end of the block it serves.
pub(crate) struct DecompressionReader<'a, R: ClickHouseRead> {
    inner:                Option<&'a mut R>,
    decompressed:         Vec<u8>,
    position:             usize,
    frame_reading_future: Option<FrameReadingFuture<'a, R>>,
}

impl<'a, R: ClickHouseRead> DecompressionReader<'a, R> {
    /// Create decompressor. Reads first frame immediately.
    pub(crate) async fn new(inner: &'a mut R) -> Result<Self> {
        let decompressed = decompress_frame(inner).await.inspect_err(|error| {
            tracing::error!(?error, "Error decompressing data");
        })?;

        Ok(Self { inner: Some(inner), decompressed, position: 0, frame_reading_future: None })
    }
}

impl<R: ClickHouseRead> AsyncRead for DecompressionReader<'_, R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if let Some(frame_reading_future) = self.frame_reading_future.as_mut() {
            match frame_reading_future.poll_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok((value, inner))) => {
                    drop(self.frame_reading_future.take());
                    self.decompressed = value;
                    self.position = 0;
                    self.inner = Some(inner);
                }
                Poll::Ready(Err(e)) => {
                    drop(self.frame_reading_future.take());
                    return Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e,
                    )));
                }
            }
        }

        let available = self.decompressed.len() - self.position;
        if available > 0 {
            let to_serve = available.min(buf.remaining());
            buf.put_slice(&self.decompressed[self.position..self.position + to_serve]);
            self.position += to_serve;
            return Poll::Ready(Ok(()));
        }

        if let Some(inner) = self.inner.take() {
            self.frame_reading_future = Some(Box::pin(async move {
                let value = decompress_frame(inner).await?;
                Ok((value, inner))
            }));
            return self.poll_read(cx, buf);
        }

        // Inner reader lost to a failed frame read: report EOF
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn frame(data: &[u8], compression: CompressionMethod) -> Vec<u8> {
        let mut buffer = Vec::new();
        compress_frame(&mut buffer, data, compression).unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_frame_round_trip_by_method_byte() {
        let data = b"This is a longer piece of test data that should compress well with both \
                     LZ4 and ZSTD algorithms";

        for compression in
            [CompressionMethod::LZ4, CompressionMethod::ZSTD, CompressionMethod::None]
        {
            let buffer = frame(data, compression);
            assert_eq!(buffer[16], compression.byte());
            let decompressed = decompress_frame(&mut Cursor::new(buffer)).await.unwrap();
            assert_eq!(decompressed, data, "Round trip failed for {compression:?}");
        }
    }

    #[tokio::test]
    async fn test_checksum_validation() {
        let mut buffer = frame(b"test data for checksum validation", CompressionMethod::LZ4);
        buffer[0] ^= 0xFF;

        let result = decompress_frame(&mut Cursor::new(buffer)).await;
        assert!(result.unwrap_err().to_string().contains("Checksum mismatch"));
    }

    #[tokio::test]
    async fn test_unknown_method_byte() {
        let mut buffer = frame(b"abc", CompressionMethod::LZ4);
        buffer[16] = 0x55;
        let result = decompress_frame(&mut Cursor::new(buffer)).await;
        assert!(result.unwrap_err().to_string().contains("Unknown compression method"));
    }

    #[tokio::test]
    async fn test_decompression_reader_spans_frames() {
        let mut buffer = frame(b"first frame|", CompressionMethod::LZ4);
        buffer.extend(frame(b"second frame", CompressionMethod::ZSTD));
        buffer.extend_from_slice(b"trailing");

        let mut reader = Cursor::new(buffer);
        let mut decompression_reader = DecompressionReader::new(&mut reader).await.unwrap();
        let mut result = vec![0u8; 24];
        let _ = decompression_reader.read_exact(&mut result).await.unwrap();
        assert_eq!(result, b"first frame|second frame");
        drop(decompression_reader);

        // Nothing past the second frame was consumed.
        let mut rest = Vec::new();
        let _ = reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"trailing");
    }
}
