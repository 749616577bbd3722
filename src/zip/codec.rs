//! Decompression strategies for the supported ZIP methods.
//!
//! Each strategy takes opaque compressed bytes and yields plaintext. The
//! streaming codecs cap their output per call; input they could not consume
//! yet is kept and fed again on the next call, so callers never have to
//! track an unconsumed tail themselves.

use flate2::{Decompress, FlushDecompress, Status};
use tracing::debug;
use xz2::stream::{Action, Stream};

use super::structures::CompressionMethod;
use crate::error::{Result, ZipError};

/// Feed compressed bytes, get plaintext bytes.
pub trait Decompressor: Send {
    /// Decompress `input` together with anything left over from earlier
    /// calls, producing at most `max_len` bytes.
    fn decompress(&mut self, input: &[u8], max_len: usize) -> Result<Vec<u8>>;

    /// Compressed bytes received but not consumed yet.
    fn unconsumed(&self) -> usize;

    /// True once the codec has seen the end of its stream.
    fn is_finished(&self) -> bool;
}

/// Select the decompressor for `method`.
///
/// Unsupported methods fail here, before any entry data is read.
pub fn new_decompressor(method: CompressionMethod) -> Result<Box<dyn Decompressor>> {
    debug!(method = method.name(), "selecting decompressor");
    Ok(match method {
        CompressionMethod::Stored => Box::new(Passthrough),
        CompressionMethod::Deflate => Box::new(Streaming::new(RawInflate(Decompress::new(false)))),
        CompressionMethod::Bzip2 => Box::new(Streaming::new(Bunzip(bzip2::Decompress::new(false)))),
        CompressionMethod::Lzma => Box::new(Streaming::new(ZipLzma::default())),
        CompressionMethod::Unknown(code) => {
            return Err(ZipError::UnsupportedCompression { method: code });
        }
    })
}

/// Stored entries: the compressed bytes are the plaintext.
struct Passthrough;

impl Decompressor for Passthrough {
    fn decompress(&mut self, input: &[u8], _max_len: usize) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn unconsumed(&self) -> usize {
        0
    }

    fn is_finished(&self) -> bool {
        false
    }
}

/// One step of a push-style decoder.
trait Backend: Send {
    /// Decode from `input` into the spare capacity of `out`.
    ///
    /// Returns the number of input bytes consumed and whether the end of the
    /// compressed stream was reached.
    fn step(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(usize, bool)>;
}

/// Drives a [`Backend`] with an output cap and an input carry-over buffer.
struct Streaming<B> {
    backend: B,
    pending: Vec<u8>,
    finished: bool,
}

impl<B: Backend> Streaming<B> {
    fn new(backend: B) -> Self {
        Self {
            backend,
            pending: Vec::new(),
            finished: false,
        }
    }
}

impl<B: Backend> Decompressor for Streaming<B> {
    fn decompress(&mut self, input: &[u8], max_len: usize) -> Result<Vec<u8>> {
        self.pending.extend_from_slice(input);

        let mut out = Vec::with_capacity(max_len);
        let mut consumed = 0;
        while out.len() < max_len && !self.finished {
            let produced_before = out.len();
            let (used, end) = self.backend.step(&self.pending[consumed..], &mut out)?;
            consumed += used;
            self.finished = end;
            if used == 0 && out.len() == produced_before {
                break;
            }
        }
        self.pending.drain(..consumed);
        if self.finished {
            // Anything after the end of stream is not part of this entry.
            self.pending.clear();
        }
        Ok(out)
    }

    fn unconsumed(&self) -> usize {
        self.pending.len()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Raw deflate (no zlib header), method 8.
struct RawInflate(Decompress);

impl Backend for RawInflate {
    fn step(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(usize, bool)> {
        let before = self.0.total_in();
        let status = self
            .0
            .decompress_vec(input, out, FlushDecompress::None)
            .map_err(|e| ZipError::format(format!("Error while decompressing deflate data: {e}")))?;
        let used = (self.0.total_in() - before) as usize;
        Ok((used, status == Status::StreamEnd))
    }
}

/// bzip2, method 12.
struct Bunzip(bzip2::Decompress);

impl Backend for Bunzip {
    fn step(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(usize, bool)> {
        let before = self.0.total_in();
        let status = self
            .0
            .decompress_vec(input, out)
            .map_err(|e| ZipError::format(format!("Error while decompressing bzip2 data: {e}")))?;
        let used = (self.0.total_in() - before) as usize;
        Ok((used, status == bzip2::Status::StreamEnd))
    }
}

/// Length of the ZIP LZMA header: version (2 bytes) + properties size (2 bytes).
const LZMA_HEADER_SIZE: usize = 4;
/// LZMA1 properties: lc/lp/pb byte + 32-bit dictionary size.
const LZMA_PROPS_SIZE: usize = 5;

/// Length of an `.lzma` (LZMA-alone) header: properties + 64-bit size.
const LZMA_ALONE_HEADER_SIZE: usize = LZMA_PROPS_SIZE + 8;

/// LZMA as framed by ZIP, method 14.
///
/// The entry data starts with a small header and the LZMA1 properties
/// blob. Both are buffered until complete. xz2 exposes no raw LZMA1
/// decoder, so the properties are rewritten as an `.lzma` header with
/// an unknown size and fed to an LZMA-alone decoder ahead of the entry's
/// compressed stream.
#[derive(Default)]
struct ZipLzma {
    stream: Option<Stream>,
}

impl ZipLzma {
    /// Parse the framing header. Returns `None` until enough bytes arrived.
    fn start(input: &[u8]) -> Result<Option<(Stream, usize)>> {
        if input.len() < LZMA_HEADER_SIZE {
            return Ok(None);
        }
        let props_len = u16::from_le_bytes([input[2], input[3]]) as usize;
        if input.len() < LZMA_HEADER_SIZE + props_len {
            return Ok(None);
        }
        if props_len < LZMA_PROPS_SIZE {
            return Err(ZipError::format(format!(
                "Invalid LZMA properties size {props_len}"
            )));
        }

        let props = &input[LZMA_HEADER_SIZE..LZMA_HEADER_SIZE + LZMA_PROPS_SIZE];
        // lc/lp/pb packed as (pb * 5 + lp) * 9 + lc
        if props[0] >= 9 * 5 * 5 {
            return Err(ZipError::format("Invalid LZMA properties byte"));
        }

        let mut alone = [0xFF; LZMA_ALONE_HEADER_SIZE];
        alone[..LZMA_PROPS_SIZE].copy_from_slice(props);

        let mut stream = Stream::new_lzma_decoder(u64::MAX).map_err(lzma_error)?;
        let mut scratch = Vec::with_capacity(64);
        stream
            .process_vec(&alone, &mut scratch, Action::Run)
            .map_err(lzma_error)?;
        if stream.total_in() != LZMA_ALONE_HEADER_SIZE as u64 {
            return Err(ZipError::format("Invalid LZMA properties"));
        }

        Ok(Some((stream, LZMA_HEADER_SIZE + props_len)))
    }
}

impl Backend for ZipLzma {
    fn step(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(usize, bool)> {
        let Some(stream) = self.stream.as_mut() else {
            return match Self::start(input)? {
                Some((stream, header_len)) => {
                    self.stream = Some(stream);
                    Ok((header_len, false))
                }
                None => Ok((0, false)),
            };
        };

        let before = stream.total_in();
        let status = stream
            .process_vec(input, out, Action::Run)
            .map_err(lzma_error)?;
        let used = (stream.total_in() - before) as usize;
        Ok((used, status == xz2::stream::Status::StreamEnd))
    }
}

fn lzma_error(err: xz2::stream::Error) -> ZipError {
    ZipError::format(format!("Error while decompressing LZMA data: {err}"))
}
