//! In-memory resource files

use bytes::Bytes;
use futures_util::stream;

use super::{ByteStream, ResourceFile, SwarmError};
use crate::stream::ByteRange;

/// Default size of the chunks a `MemoryFile` stream yields
const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// A resource file held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
    mime_type: String,
    chunk_size: usize,
}

impl MemoryFile {
    pub fn new(name: &str, data: impl Into<Bytes>, mime_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data: data.into(),
            mime_type: mime_type.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the size of streamed chunks
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl ResourceFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    fn open_byte_stream(&self, range: Option<ByteRange>) -> Result<ByteStream, SwarmError> {
        let length = self.length();
        let span = match range {
            Some(range) if !range.fits(length) => {
                return Err(SwarmError::RangeOutOfBounds {
                    start: range.start,
                    end: range.end,
                    length,
                })
            }
            Some(range) => self.data.slice(range.start as usize..=range.end as usize),
            None => self.data.clone(),
        };

        let chunk_size = self.chunk_size;
        let chunks = (0..span.len())
            .step_by(chunk_size)
            .map(move |offset| {
                Ok::<_, std::io::Error>(span.slice(offset..(offset + chunk_size).min(span.len())))
            });
        Ok(Box::pin(stream::iter(chunks)))
    }
}
