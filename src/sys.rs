//! Subset of the binder uapi needed to decode received transactions.
//!
//! Only the object descriptors that can appear in a received parcel are
//! modelled here; the ioctl and command surface belongs to the transport.

use std::fmt;

use bitflags::bitflags;
use byteorder::{ByteOrder, NativeEndian};

pub type BinderUintptrT = u64;

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | c4 as u32
}
const TYPE_LARGE: u8 = 0x85;

/// `binder_object_header.type`
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinderType(u32);

impl BinderType {
    pub const BINDER: Self = Self(pack_chars(b's', b'b', b'*', TYPE_LARGE));
    pub const WEAK_BINDER: Self = Self(pack_chars(b'w', b'b', b'*', TYPE_LARGE));
    pub const HANDLE: Self = Self(pack_chars(b's', b'h', b'*', TYPE_LARGE));
    pub const WEAK_HANDLE: Self = Self(pack_chars(b'w', b'h', b'*', TYPE_LARGE));
    pub const FD: Self = Self(pack_chars(b'f', b'd', b'*', TYPE_LARGE));
    pub const FDA: Self = Self(pack_chars(b'f', b'd', b'a', TYPE_LARGE));
    pub const PTR: Self = Self(pack_chars(b'p', b't', b'*', TYPE_LARGE));

    pub const fn from_u32(v: u32) -> Self {
        Self(v)
    }
    pub const fn as_u32(self) -> u32 {
        self.0
    }
    /// Whether the object names a remote object by handle.
    pub fn is_handle(self) -> bool {
        matches!(self, Self::HANDLE | Self::WEAK_HANDLE)
    }
}

impl fmt::Debug for BinderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::BINDER => "BINDER",
            Self::WEAK_BINDER => "WEAK_BINDER",
            Self::HANDLE => "HANDLE",
            Self::WEAK_HANDLE => "WEAK_HANDLE",
            Self::FD => "FD",
            Self::FDA => "FDA",
            Self::PTR => "PTR",
            other => return write!(f, "BinderType({:#x})", other.0),
        };
        f.write_str(name)
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FlatBinderFlags: u32 {
        const PRIORITY_MASK = 0xff;
        const ACCEPTS_FDS = 0x100;
        const TXN_SECURITY_CTX = 0x1000;
    }
}

/// Decoded `flat_binder_object`.
///
/// The kernel struct carries a `binder`/`handle` union; it is kept here as the
/// raw 64-bit word and interpreted through [`FlatBinderObject::handle`] or
/// [`FlatBinderObject::binder`] depending on [`FlatBinderObject::type_`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatBinderObject {
    pub type_: BinderType,
    pub flags: FlatBinderFlags,
    data: BinderUintptrT,
    pub cookie: BinderUintptrT,
}

impl FlatBinderObject {
    /// Size of the record on the wire (header, flags, union, cookie).
    pub const SIZE: usize = 24;

    pub fn new_handle(handle: u32) -> Self {
        let mut data = [0u8; 8];
        NativeEndian::write_u32(&mut data[..4], handle);
        Self {
            type_: BinderType::HANDLE,
            flags: FlatBinderFlags::ACCEPTS_FDS,
            data: NativeEndian::read_u64(&data),
            cookie: 0,
        }
    }
    pub fn new_binder(binder: BinderUintptrT, cookie: BinderUintptrT) -> Self {
        Self {
            type_: BinderType::BINDER,
            flags: FlatBinderFlags::ACCEPTS_FDS,
            data: binder,
            cookie,
        }
    }
    pub fn with_type(mut self, type_: BinderType) -> Self {
        self.type_ = type_;
        self
    }

    /// The union read as a handle, meaningful for `HANDLE`/`WEAK_HANDLE`.
    pub fn handle(&self) -> u32 {
        let mut data = [0u8; 8];
        NativeEndian::write_u64(&mut data, self.data);
        NativeEndian::read_u32(&data[..4])
    }
    /// The union read as a local pointer, meaningful for `BINDER`/`WEAK_BINDER`.
    pub fn binder(&self) -> BinderUintptrT {
        self.data
    }

    /// Decodes a record from the start of `bytes`, `None` if too short.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        Some(Self {
            type_: BinderType::from_u32(NativeEndian::read_u32(&bytes[0..4])),
            flags: FlatBinderFlags::from_bits_retain(NativeEndian::read_u32(&bytes[4..8])),
            data: NativeEndian::read_u64(&bytes[8..16]),
            cookie: NativeEndian::read_u64(&bytes[16..24]),
        })
    }
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        NativeEndian::write_u32(&mut bytes[0..4], self.type_.as_u32());
        NativeEndian::write_u32(&mut bytes[4..8], self.flags.bits());
        NativeEndian::write_u64(&mut bytes[8..16], self.data);
        NativeEndian::write_u64(&mut bytes[16..24], self.cookie);
        bytes
    }
}

#[test]
fn test_binder_type_values() {
    assert_eq!(BinderType::BINDER.as_u32(), 0x7362_2a85);
    assert_eq!(BinderType::HANDLE.as_u32(), 0x7368_2a85);
    assert_eq!(BinderType::FDA.as_u32(), 0x6664_6185);
    assert_eq!(format!("{:?}", BinderType::WEAK_HANDLE), "WEAK_HANDLE");
    assert_eq!(format!("{:?}", BinderType::from_u32(7)), "BinderType(0x7)");
}

#[test]
fn test_flat_object_bytes() {
    let obj = FlatBinderObject::new_handle(5);
    let bytes = obj.to_bytes();
    let decoded = FlatBinderObject::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, obj);
    assert_eq!(decoded.handle(), 5);
    assert!(decoded.type_.is_handle());
    assert!(FlatBinderObject::from_bytes(&bytes[..20]).is_none());
}
