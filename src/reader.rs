//! Bounds-checked cursor over a received parcel.
//!
//! Wire layout: native-endian scalars; strings carry a 4 byte length prefix
//! (negative means a null string) and are zero padded to a 4 byte boundary;
//! embedded objects are found through the [`ObjectTable`] rather than parsed
//! inline.

use std::sync::Arc;

use byteorder::{ByteOrder, NativeEndian};
use thiserror::Error;
use tracing::debug;

use crate::{
    buffer::{Buffer, ObjectTable},
    registry::ObjectRegistry,
    remote_object::RemoteObject,
    sys::{BinderType, FlatBinderObject},
};

const PARCEL_ALIGN: usize = 4;

fn pad_size(len: usize) -> Option<usize> {
    len.checked_add(PARCEL_ALIGN - 1)
        .map(|len| len & !(PARCEL_ALIGN - 1))
}

/// Everything a reader borrows from its owning request.
pub struct ReaderData {
    pub(crate) registry: Arc<ObjectRegistry>,
    pub(crate) buffer: Option<Buffer>,
    pub(crate) objects: Option<ObjectTable>,
}

impl ReaderData {
    pub fn new(
        registry: Arc<ObjectRegistry>,
        buffer: Option<Buffer>,
        objects: Option<ObjectTable>,
    ) -> Self {
        Self {
            registry,
            buffer,
            objects,
        }
    }
    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }
    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
    pub fn objects(&self) -> Option<&ObjectTable> {
        self.objects.as_ref()
    }
    /// Reader over `[offset, offset + len)`, clamped to the buffer.
    pub fn reader(&self, offset: usize, len: usize) -> ParcelReader<'_> {
        ParcelReader::new(self, offset, len)
    }
}

/// A cursor over part of a [`ReaderData`].
///
/// Failed reads never move the cursor.
#[derive(Clone)]
pub struct ParcelReader<'a> {
    data: Option<&'a ReaderData>,
    bytes: &'a [u8],
    start: usize,
    offset: usize,
    end: usize,
}

impl<'a> ParcelReader<'a> {
    pub fn new(data: &'a ReaderData, offset: usize, len: usize) -> Self {
        let bytes = data.bytes();
        let start = offset.min(bytes.len());
        let end = start.saturating_add(len).min(bytes.len());
        Self {
            data: Some(data),
            bytes,
            start,
            offset: start,
            end,
        }
    }
    /// A reader with nothing to read, every read fails.
    pub fn empty() -> Self {
        Self {
            data: None,
            bytes: &[],
            start: 0,
            offset: 0,
            end: 0,
        }
    }

    pub fn bytes_read(&self) -> usize {
        self.offset - self.start
    }
    pub fn bytes_remaining(&self) -> usize {
        self.end - self.offset
    }
    pub fn at_end(&self) -> bool {
        self.offset >= self.end
    }
    /// Absolute position in the parcel, the key used for object lookups.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn peek(&self, num_bytes: usize) -> Result<&'a [u8], ReadError> {
        let bytes = self.bytes;
        self.offset
            .checked_add(num_bytes)
            .filter(|end| *end <= self.end)
            .map(|end| &bytes[self.offset..end])
            .ok_or(ReadError::OutOfBounds {
                offset: self.offset,
                wanted: num_bytes,
                remaining: self.bytes_remaining(),
            })
    }

    /// Raw bytes, no padding consumed.
    pub fn read_bytes(&mut self, num_bytes: usize) -> Result<&'a [u8], ReadError> {
        let slice = self.peek(num_bytes)?;
        self.offset += num_bytes;
        Ok(slice)
    }
    pub fn skip(&mut self, num_bytes: usize) -> Result<(), ReadError> {
        self.read_bytes(num_bytes).map(|_| ())
    }

    pub fn read_u32(&mut self) -> Result<u32, ReadError> {
        self.read_bytes(4).map(NativeEndian::read_u32)
    }
    pub fn read_i32(&mut self) -> Result<i32, ReadError> {
        self.read_bytes(4).map(NativeEndian::read_i32)
    }
    pub fn read_u64(&mut self) -> Result<u64, ReadError> {
        self.read_bytes(8).map(NativeEndian::read_u64)
    }
    pub fn read_i64(&mut self) -> Result<i64, ReadError> {
        self.read_bytes(8).map(NativeEndian::read_i64)
    }
    /// Booleans travel as a full 32 bit word.
    pub fn read_bool(&mut self) -> Result<bool, ReadError> {
        self.read_u32().map(|v| v != 0)
    }

    /// Reads the length prefix and, for non-null strings, the padded body of
    /// `len * unit` bytes, plus one zero unit when `terminated`. Returns the
    /// body without terminator or padding.
    fn read_length_prefixed(
        &mut self,
        unit: usize,
        terminated: bool,
    ) -> Result<Option<&'a [u8]>, ReadError> {
        let len = NativeEndian::read_i32(self.peek(4)?);
        if len < 0 {
            self.offset += 4;
            return Ok(None);
        }
        let body_len = (len as usize)
            .checked_mul(unit)
            .ok_or(ReadError::InvalidLength(len))?;
        let term_len = if terminated { unit } else { 0 };
        let wire_len = body_len
            .checked_add(term_len)
            .and_then(pad_size)
            .and_then(|padded| padded.checked_add(4))
            .ok_or(ReadError::InvalidLength(len))?;
        let slice = self.peek(wire_len)?;
        let body = &slice[4..4 + body_len];
        if slice[4 + body_len..4 + body_len + term_len]
            .iter()
            .any(|b| *b != 0)
        {
            return Err(ReadError::Unterminated);
        }
        self.offset += slice.len();
        Ok(Some(body))
    }

    /// 8 bit string, `Ok(None)` for a null string.
    pub fn read_string8(&mut self) -> Result<Option<&'a str>, ReadError> {
        let rollback = self.offset;
        let Some(body) = self.read_length_prefixed(1, false)? else {
            return Ok(None);
        };
        match std::str::from_utf8(body) {
            Ok(s) => Ok(Some(s)),
            Err(_) => {
                self.offset = rollback;
                Err(ReadError::InvalidUtf8)
            }
        }
    }

    /// 16 bit string transcoded to UTF-8, `Ok(None)` for a null string.
    pub fn read_string16(&mut self) -> Result<Option<String>, ReadError> {
        self.read_utf16(false)
    }

    /// 16 bit string followed by a zero code unit, the way Android writes
    /// interface descriptors. The terminator is not part of `len`.
    pub fn read_string16_terminated(&mut self) -> Result<Option<String>, ReadError> {
        self.read_utf16(true)
    }

    fn read_utf16(&mut self, terminated: bool) -> Result<Option<String>, ReadError> {
        let rollback = self.offset;
        let Some(body) = self.read_length_prefixed(2, terminated)? else {
            return Ok(None);
        };
        let mut units = vec![0u16; body.len() / 2];
        NativeEndian::read_u16_into(body, &mut units);
        match String::from_utf16(&units) {
            Ok(s) => Ok(Some(s)),
            Err(_) => {
                self.offset = rollback;
                Err(ReadError::InvalidUtf16)
            }
        }
    }

    /// Resolves the object recorded at the current offset into its proxy.
    ///
    /// The returned reference belongs to the caller.
    pub fn read_object(&mut self) -> Result<Arc<RemoteObject>, ReadError> {
        let offset = self.offset;
        let (data, obj) = self
            .data
            .and_then(|data| data.objects().and_then(|t| t.get(offset)).map(|o| (data, o)))
            .ok_or(ReadError::NoObject(offset))?;
        self.peek(FlatBinderObject::SIZE)?;
        if !obj.type_.is_handle() {
            debug!("object at {offset} is not a handle: {:?}", obj.type_);
            return Err(ReadError::IncorrectObject(obj.type_));
        }
        let remote = data.registry().resolve(obj.handle());
        self.offset += FlatBinderObject::SIZE;
        Ok(remote)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Tried reading {wanted} bytes at {offset} with only {remaining} left")]
    OutOfBounds {
        offset: usize,
        wanted: usize,
        remaining: usize,
    },
    #[error("Invalid length prefix {0}")]
    InvalidLength(i32),
    #[error("String8 is not valid UTF-8")]
    InvalidUtf8,
    #[error("String16 is not valid UTF-16")]
    InvalidUtf16,
    #[error("String16 is missing its zero terminator")]
    Unterminated,
    #[error("No object recorded at offset {0}")]
    NoObject(usize),
    #[error("Unexpected object type {0:?}")]
    IncorrectObject(BinderType),
}
