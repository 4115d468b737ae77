//! Received transaction data: the payload bytes and the out-of-band table of
//! embedded objects the driver recorded alongside them.

use std::{collections::BTreeMap, fmt, ops::Deref, sync::Arc};

use tracing::debug;

use crate::{reader::ReadError, sys::FlatBinderObject};

/// Returns a buffer to whoever allocated it, e.g. by issuing `BC_FREE_BUFFER`
/// for a kernel mapped transaction buffer.
pub trait BufferRelease: Send + Sync + 'static {
    fn release(&self, data: &[u8]);
}

/// An exclusively owned transaction payload.
///
/// The release hook, if any, runs exactly once when the buffer is dropped.
pub struct Buffer {
    data: Vec<u8>,
    release: Option<Arc<dyn BufferRelease>>,
}

impl Buffer {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            release: None,
        }
    }
    pub fn with_release(data: impl Into<Vec<u8>>, release: Arc<dyn BufferRelease>) -> Self {
        Self {
            data: data.into(),
            release: Some(release),
        }
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("release", &self.release.is_some())
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release.release(&self.data);
        }
    }
}

/// Embedded object descriptors keyed by their byte offset in the payload.
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    entries: BTreeMap<usize, FlatBinderObject>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from the driver form: an offsets array pointing at
    /// `flat_binder_object` records inline in `data`.
    pub fn from_offsets(data: &[u8], offsets: &[usize]) -> Result<Self, ReadError> {
        let mut table = Self::new();
        for &offset in offsets {
            let obj = data
                .get(offset..)
                .and_then(FlatBinderObject::from_bytes)
                .ok_or(ReadError::OutOfBounds {
                    offset,
                    wanted: FlatBinderObject::SIZE,
                    remaining: data.len().saturating_sub(offset),
                })?;
            debug!("object table entry at {offset}: {obj:?}");
            table.entries.insert(offset, obj);
        }
        Ok(table)
    }

    pub fn insert(&mut self, offset: usize, obj: FlatBinderObject) -> Option<FlatBinderObject> {
        self.entries.insert(offset, obj)
    }
    pub fn get(&self, offset: usize) -> Option<&FlatBinderObject> {
        self.entries.get(&offset)
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (usize, &FlatBinderObject)> {
        self.entries.iter().map(|(offset, obj)| (*offset, obj))
    }
}

impl FromIterator<(usize, FlatBinderObject)> for ObjectTable {
    fn from_iter<T: IntoIterator<Item = (usize, FlatBinderObject)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
