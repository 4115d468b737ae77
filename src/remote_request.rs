//! One incoming transaction: sender credentials, the received parcel and its
//! decoded RPC header.
//!
//! Sharing follows the usual `Arc` discipline: data is attached while the
//! request is still exclusively owned, after that every accessor takes
//! `&self` and builds its own cursor, so concurrent readers never disturb
//! each other.

use std::{fmt, ops::Deref, ops::Range, sync::Arc};

use libc::{pid_t, uid_t};
use tracing::debug;

use crate::{
    buffer::{Buffer, ObjectTable},
    protocol::{RpcInterface, RpcProtocol},
    reader::{ParcelReader, ReadError, ReaderData},
    registry::ObjectRegistry,
    remote_object::RemoteObject,
};

pub const UNKNOWN_PID: pid_t = -1;
pub const UNKNOWN_EUID: uid_t = uid_t::MAX;

enum InterfaceName {
    /// Byte range of the request's own buffer, already validated as UTF-8.
    Buffer(Range<usize>),
    Owned(String),
}

enum Header {
    Unparsed,
    Parsed {
        size: usize,
        interface: Option<InterfaceName>,
    },
}

pub struct RemoteRequest {
    pid: pid_t,
    euid: uid_t,
    protocol: &'static dyn RpcProtocol,
    data: ReaderData,
    header: Header,
}

fn span_of(bytes: &[u8], s: &str) -> Option<Range<usize>> {
    let start = (s.as_ptr() as usize).checked_sub(bytes.as_ptr() as usize)?;
    let end = start.checked_add(s.len())?;
    (end <= bytes.len()).then_some(start..end)
}

impl RemoteRequest {
    pub fn new(
        registry: Arc<ObjectRegistry>,
        protocol: &'static dyn RpcProtocol,
        pid: pid_t,
        euid: uid_t,
    ) -> Self {
        Self {
            pid,
            euid,
            protocol,
            data: ReaderData::new(registry, None, None),
            header: Header::Unparsed,
        }
    }

    /// Attaches the received parcel, replacing and releasing any previous
    /// one, and parses the RPC header out of it.
    pub fn set_data(&mut self, buffer: Option<Buffer>, objects: Option<ObjectTable>) {
        self.header = Header::Unparsed;
        drop(self.data.objects.take());
        drop(self.data.buffer.take());
        self.data.buffer = buffer;
        self.data.objects = objects;

        let bytes = self.data.bytes();
        let mut reader = self.data.reader(0, bytes.len());
        let interface = self
            .protocol
            .read_rpc_header(&mut reader)
            .map(|iface| match iface {
                RpcInterface::Owned(s) => InterfaceName::Owned(s),
                RpcInterface::Borrowed(s) => match span_of(bytes, s) {
                    Some(range) => InterfaceName::Buffer(range),
                    None => InterfaceName::Owned(s.to_owned()),
                },
            });
        let size = reader.bytes_read();
        debug!(
            "{} request from pid {}: header {size} bytes, interface parsed: {}",
            self.protocol.name(),
            self.pid,
            interface.is_some()
        );
        self.header = Header::Parsed { size, interface };
    }

    /// [`RemoteRequest::set_data`] for call sites holding an optional
    /// request; without one the buffer and table are simply released.
    pub fn set_data_on(
        request: Option<&mut Self>,
        buffer: Option<Buffer>,
        objects: Option<ObjectTable>,
    ) {
        match request {
            Some(request) => request.set_data(buffer, objects),
            None => drop((buffer, objects)),
        }
    }

    pub fn protocol(&self) -> &'static dyn RpcProtocol {
        self.protocol
    }
    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        self.data.registry()
    }
    pub fn sender_pid(&self) -> pid_t {
        self.pid
    }
    pub fn sender_euid(&self) -> uid_t {
        self.euid
    }
    pub fn is_parsed(&self) -> bool {
        matches!(self.header, Header::Parsed { .. })
    }
    pub fn header_size(&self) -> usize {
        match self.header {
            Header::Unparsed => 0,
            Header::Parsed { size, .. } => size,
        }
    }
    pub fn interface_name(&self) -> Option<&str> {
        let Header::Parsed {
            interface: Some(interface),
            ..
        } = &self.header
        else {
            return None;
        };
        match interface {
            InterfaceName::Owned(s) => Some(s),
            InterfaceName::Buffer(range) => self
                .data
                .bytes()
                .get(range.clone())
                .and_then(|bytes| std::str::from_utf8(bytes).ok()),
        }
    }

    /// Fresh cursor over the payload, positioned right after the header.
    pub fn reader(&self) -> ParcelReader<'_> {
        let header_size = self.header_size();
        self.data
            .reader(header_size, self.data.bytes().len().saturating_sub(header_size))
    }

    fn read<'a, T>(
        &'a self,
        read: impl FnOnce(&mut ParcelReader<'a>) -> Result<T, ReadError>,
    ) -> Option<T> {
        read(&mut self.reader())
            .inspect_err(|err| debug!("request read failed: {err}"))
            .ok()
    }

    pub fn read_int32(&self) -> Option<i32> {
        self.read(ParcelReader::read_i32)
    }
    pub fn read_uint32(&self) -> Option<u32> {
        self.read(ParcelReader::read_u32)
    }
    pub fn read_int64(&self) -> Option<i64> {
        self.read(ParcelReader::read_i64)
    }
    pub fn read_uint64(&self) -> Option<u64> {
        self.read(ParcelReader::read_u64)
    }
    /// `None` both for a null string and for a failed read.
    pub fn read_string8(&self) -> Option<&str> {
        self.read(ParcelReader::read_string8).flatten()
    }
    pub fn read_string16(&self) -> Option<String> {
        self.read(ParcelReader::read_string16).flatten()
    }
    pub fn read_object(&self) -> Option<Arc<RemoteObject>> {
        self.read(ParcelReader::read_object)
    }
}

impl fmt::Debug for RemoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRequest")
            .field("pid", &self.pid)
            .field("euid", &self.euid)
            .field("protocol", &self.protocol.name())
            .field("interface", &self.interface_name())
            .field("header_size", &self.header_size())
            .field("len", &self.data.bytes().len())
            .finish()
    }
}

/// Accessors usable on an optional request. An absent request has no
/// interface, unknown credentials and nothing to read.
pub trait RemoteRequestExt {
    fn interface_name(&self) -> Option<&str>;
    fn sender_pid(&self) -> pid_t;
    fn sender_euid(&self) -> uid_t;
    fn reader(&self) -> ParcelReader<'_>;
    fn read_int32(&self) -> Option<i32>;
    fn read_uint32(&self) -> Option<u32>;
    fn read_int64(&self) -> Option<i64>;
    fn read_uint64(&self) -> Option<u64>;
    fn read_string8(&self) -> Option<&str>;
    fn read_string16(&self) -> Option<String>;
    fn read_object(&self) -> Option<Arc<RemoteObject>>;
}

impl<T: Deref<Target = RemoteRequest>> RemoteRequestExt for Option<T> {
    fn interface_name(&self) -> Option<&str> {
        self.as_deref().and_then(RemoteRequest::interface_name)
    }
    fn sender_pid(&self) -> pid_t {
        self.as_deref().map_or(UNKNOWN_PID, RemoteRequest::sender_pid)
    }
    fn sender_euid(&self) -> uid_t {
        self.as_deref().map_or(UNKNOWN_EUID, RemoteRequest::sender_euid)
    }
    fn reader(&self) -> ParcelReader<'_> {
        self.as_deref()
            .map_or_else(ParcelReader::empty, RemoteRequest::reader)
    }
    fn read_int32(&self) -> Option<i32> {
        self.as_deref().and_then(RemoteRequest::read_int32)
    }
    fn read_uint32(&self) -> Option<u32> {
        self.as_deref().and_then(RemoteRequest::read_uint32)
    }
    fn read_int64(&self) -> Option<i64> {
        self.as_deref().and_then(RemoteRequest::read_int64)
    }
    fn read_uint64(&self) -> Option<u64> {
        self.as_deref().and_then(RemoteRequest::read_uint64)
    }
    fn read_string8(&self) -> Option<&str> {
        self.as_deref().and_then(RemoteRequest::read_string8)
    }
    fn read_string16(&self) -> Option<String> {
        self.as_deref().and_then(RemoteRequest::read_string16)
    }
    fn read_object(&self) -> Option<Arc<RemoteObject>> {
        self.as_deref().and_then(RemoteRequest::read_object)
    }
}
