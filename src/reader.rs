use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{self, Error};

const MIN_BUFFER_SIZE: usize = 4 * 1024;
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;
const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Options for the chunked byte source.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Map the whole file instead of reading through a buffer.
    pub use_mmap: bool,
    /// Buffered-mode chunk size, clamped to [4 KiB, 64 MiB].
    pub buffer_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            use_mmap: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

enum Backend {
    Buffered { file: File, buf: Vec<u8> },
    Mapped { map: Option<Mmap>, done: bool },
}

/// Finite sequence of byte chunks from a file.
///
/// Buffered mode refills one internal buffer per call, so a returned chunk
/// is only valid until the next [`Self::next_chunk`]. Mapped mode returns
/// the whole file once and empty chunks forever after. An empty chunk means
/// end of stream either way.
pub struct FileReader {
    backend: Backend,
    bytes_read: usize,
}

impl FileReader {
    pub fn open<P: AsRef<Path>>(path: P, options: &ReaderOptions) -> error::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| Error::open(path, err))?;

        let backend = if options.use_mmap {
            let len = file.metadata().map_err(|err| Error::open(path, err))?.len();

            // Zero-length files cannot be mapped; they are just EOF.
            let map = if len == 0 {
                None
            } else {
                Some(unsafe { Mmap::map(&file) }.map_err(|err| Error::open(path, err))?)
            };

            Backend::Mapped { map, done: false }
        } else {
            let size = options.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);

            Backend::Buffered {
                file,
                buf: vec![0u8; size],
            }
        };

        Ok(Self {
            backend,
            bytes_read: 0,
        })
    }

    /// The next chunk of the file; empty at end of stream. Read errors
    /// terminate the stream.
    pub fn next_chunk(&mut self) -> error::Result<&[u8]> {
        match &mut self.backend {
            Backend::Buffered { file, buf } => {
                let n = loop {
                    match file.read(buf) {
                        Ok(n) => break n,
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => return Err(err.into()),
                    }
                };

                self.bytes_read += n;

                Ok(&buf[..n])
            }
            Backend::Mapped { map, done } => {
                if *done {
                    return Ok(&[]);
                }

                *done = true;

                match map {
                    Some(map) => {
                        self.bytes_read = map.len();
                        Ok(&map[..])
                    }
                    None => Ok(&[]),
                }
            }
        }
    }

    /// Total bytes handed out so far. Monotonic.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }
}
