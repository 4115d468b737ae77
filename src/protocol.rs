//! RPC header conventions that prefix a transaction's payload.
//!
//! Which convention applies is decided per device by the caller (see
//! [`crate::config::Config`]); a protocol only knows how to strip its own
//! header and name the target interface.

use std::fmt;

use tracing::debug;

use crate::reader::ParcelReader;

pub const DEFAULT_DEVICE: &str = "/dev/binder";
pub const HWBINDER_DEVICE: &str = "/dev/hwbinder";

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | c4 as u32
}
pub const HEADER_SYSTEM: u32 = pack_chars(b'S', b'Y', b'S', b'T');
pub const HEADER_VENDOR: u32 = pack_chars(b'V', b'N', b'D', b'R');

/// Interface name produced by a header parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcInterface<'a> {
    /// Points into the parcel, lives as long as the request's buffer.
    Borrowed(&'a str),
    /// Decoded into a fresh allocation owned by the request.
    Owned(String),
}

impl RpcInterface<'_> {
    pub fn as_str(&self) -> &str {
        match self {
            RpcInterface::Borrowed(s) => s,
            RpcInterface::Owned(s) => s,
        }
    }
}

pub trait RpcProtocol: Send + Sync + fmt::Debug + 'static {
    fn name(&self) -> &'static str;

    /// Consumes the header from a reader positioned at the start of the
    /// parcel. `None` means the header was not recognised; whatever was
    /// consumed up to that point still counts as header.
    fn read_rpc_header<'a>(&self, reader: &mut ParcelReader<'a>) -> Option<RpcInterface<'a>>;
}

/// Framework binder: strict mode policy, optionally the work source uid and
/// the `SYST`/`VNDR` stability marker, then the interface descriptor as a
/// zero terminated 16 bit string.
#[derive(Debug)]
pub struct AidlProtocol {
    name: &'static str,
    work_source: bool,
    header_marker: bool,
}

pub static AIDL: AidlProtocol = AidlProtocol {
    name: "aidl",
    work_source: false,
    header_marker: false,
};
pub static AIDL2: AidlProtocol = AidlProtocol {
    name: "aidl2",
    work_source: true,
    header_marker: false,
};
pub static AIDL3: AidlProtocol = AidlProtocol {
    name: "aidl3",
    work_source: true,
    header_marker: true,
};

impl RpcProtocol for AidlProtocol {
    fn name(&self) -> &'static str {
        self.name
    }

    fn read_rpc_header<'a>(&self, reader: &mut ParcelReader<'a>) -> Option<RpcInterface<'a>> {
        let _strict_mode = reader.read_i32().ok()?;
        if self.work_source {
            let _work_source_uid = reader.read_i32().ok()?;
        }
        if self.header_marker {
            let marker = reader.read_u32().ok()?;
            if marker != HEADER_SYSTEM && marker != HEADER_VENDOR {
                debug!("{}: unexpected header marker {marker:#010x}", self.name);
                return None;
            }
        }
        reader
            .read_string16_terminated()
            .inspect_err(|err| debug!("{}: failed to read interface: {err}", self.name))
            .ok()
            .flatten()
            .map(RpcInterface::Owned)
    }
}

/// Hardware binder: the package qualified interface name as an 8 bit string,
/// e.g. `android.hidl.manager@1.0::IServiceManager`.
#[derive(Debug)]
pub struct HidlProtocol;

pub static HIDL: HidlProtocol = HidlProtocol;

impl RpcProtocol for HidlProtocol {
    fn name(&self) -> &'static str {
        "hidl"
    }

    fn read_rpc_header<'a>(&self, reader: &mut ParcelReader<'a>) -> Option<RpcInterface<'a>> {
        reader
            .read_string8()
            .inspect_err(|err| debug!("hidl: failed to read interface: {err}"))
            .ok()
            .flatten()
            .map(RpcInterface::Borrowed)
    }
}

pub fn by_name(name: &str) -> Option<&'static dyn RpcProtocol> {
    let protocol: &'static dyn RpcProtocol = match name {
        "aidl" => &AIDL,
        "aidl2" => &AIDL2,
        "aidl3" => &AIDL3,
        "hidl" => &HIDL,
        _ => return None,
    };
    Some(protocol)
}

/// Built-in choice when nothing is configured for `dev`.
pub fn for_device(dev: &str) -> &'static dyn RpcProtocol {
    if dev == HWBINDER_DEVICE {
        &HIDL
    } else {
        &AIDL
    }
}
