//! Payload decoding.
//!
//! A [`Codec`] turns one receive buffer into decoded inputs. The JSON codec
//! accepts a single object, an array of objects or newline-delimited
//! objects; the compressed variant expects an LZ4 block with its size
//! prepended around the same JSON.

use crate::core::{IngestError, Result};
use crate::receiver::RecvBuffer;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Decodes buffers into inputs of type `I`.
pub trait Codec<I>: Send {
    /// Append every input held by `buffer` to `out`.
    ///
    /// On error nothing from this buffer is left in `out`.
    fn decode(&self, buffer: &RecvBuffer, out: &mut Vec<I>) -> Result<()>;
}

/// JSON payloads.
pub struct JsonCodec<I> {
    _input: PhantomData<fn() -> I>,
}

impl<I> JsonCodec<I> {
    pub fn new() -> Self {
        Self {
            _input: PhantomData,
        }
    }
}

impl<I> Default for JsonCodec<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: DeserializeOwned> JsonCodec<I> {
    fn decode_bytes(&self, bytes: &[u8], out: &mut Vec<I>) -> Result<()> {
        let start = out.len();
        let result = decode_json(bytes, out);
        if result.is_err() {
            out.truncate(start);
        }
        result
    }
}

fn decode_json<I: DeserializeOwned>(bytes: &[u8], out: &mut Vec<I>) -> Result<()> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    match first {
        None => Err(IngestError::decode("empty payload")),
        Some(b'[') => {
            let items: Vec<I> = serde_json::from_slice(bytes)?;
            out.extend(items);
            Ok(())
        },
        Some(_) => {
            for item in serde_json::Deserializer::from_slice(bytes).into_iter::<I>() {
                out.push(item?);
            }
            Ok(())
        },
    }
}

impl<I: DeserializeOwned> Codec<I> for JsonCodec<I> {
    fn decode(&self, buffer: &RecvBuffer, out: &mut Vec<I>) -> Result<()> {
        self.decode_bytes(&buffer.payload, out)
    }
}

/// LZ4-compressed JSON payloads.
pub struct Lz4JsonCodec<I> {
    inner: JsonCodec<I>,
}

impl<I> Lz4JsonCodec<I> {
    pub fn new() -> Self {
        Self {
            inner: JsonCodec::new(),
        }
    }
}

impl<I> Default for Lz4JsonCodec<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: DeserializeOwned> Codec<I> for Lz4JsonCodec<I> {
    fn decode(&self, buffer: &RecvBuffer, out: &mut Vec<I>) -> Result<()> {
        let bytes = lz4_flex::decompress_size_prepended(&buffer.payload)
            .map_err(|e| IngestError::decode(format!("lz4: {}", e)))?;
        self.inner.decode_bytes(&bytes, out)
    }
}
