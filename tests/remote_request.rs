use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use binder_remote::{
    reader::ParcelReader, sys::FlatBinderObject, Buffer, BufferRelease, ObjectRegistry,
    ObjectTable, RemoteRequest, RemoteRequestExt, RpcInterface, RpcProtocol,
};
use byteorder::{NativeEndian, WriteBytesExt};

const MARKER: u32 = 0x4d41_524b;

/// Header of a 4 byte marker word followed by an 8 bit interface name.
#[derive(Debug)]
struct MarkerProtocol;

static MARKER_PROTOCOL: MarkerProtocol = MarkerProtocol;

impl RpcProtocol for MarkerProtocol {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn read_rpc_header<'a>(&self, reader: &mut ParcelReader<'a>) -> Option<RpcInterface<'a>> {
        if reader.read_u32().ok()? != MARKER {
            return None;
        }
        reader.read_string8().ok()?.map(RpcInterface::Borrowed)
    }
}

#[derive(Default)]
struct Accounting {
    released: AtomicUsize,
    released_bytes: AtomicUsize,
}

impl BufferRelease for Accounting {
    fn release(&self, data: &[u8]) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.released_bytes.fetch_add(data.len(), Ordering::SeqCst);
    }
}

fn foo_parcel() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.write_u32::<NativeEndian>(MARKER).unwrap();
    bytes.write_i32::<NativeEndian>(3).unwrap();
    bytes.extend_from_slice(b"foo\0");
    bytes.write_i32::<NativeEndian>(42).unwrap();
    bytes
}

#[test]
fn decodes_header_and_repeats_payload_reads() {
    let registry = ObjectRegistry::with_protocol("/dev/test", &MARKER_PROTOCOL);
    let mut request = registry.new_request(1234, 1000);
    request.set_data(Some(Buffer::new(foo_parcel())), None);

    assert_eq!(request.interface_name(), Some("foo"));
    assert_eq!(request.header_size(), 12);
    assert_eq!(request.read_int32(), Some(42));
    assert_eq!(request.read_int32(), Some(42));
    assert_eq!(request.read_uint32(), Some(42));
    assert_eq!(request.read_int64(), None);
    assert_eq!(request.sender_pid(), 1234);
    assert_eq!(request.sender_euid(), 1000);
}

#[test]
fn wrong_marker_leaves_interface_absent() {
    let mut bytes = foo_parcel();
    bytes[0] ^= 0xff;
    let registry = ObjectRegistry::with_protocol("/dev/test", &MARKER_PROTOCOL);
    let mut request = registry.new_request(1, 1);
    request.set_data(Some(Buffer::new(bytes)), None);
    assert_eq!(request.interface_name(), None);
    assert_eq!(request.header_size(), 4);
}

#[test]
fn set_data_twice_releases_first_buffer_once() {
    let accounting = Arc::new(Accounting::default());
    let registry = ObjectRegistry::with_protocol("/dev/test", &MARKER_PROTOCOL);
    let mut request = registry.new_request(1, 1);

    request.set_data(
        Some(Buffer::with_release(vec![0u8; 16], accounting.clone())),
        None,
    );
    assert_eq!(accounting.released.load(Ordering::SeqCst), 0);

    request.set_data(
        Some(Buffer::with_release(foo_parcel(), accounting.clone())),
        None,
    );
    assert_eq!(accounting.released.load(Ordering::SeqCst), 1);
    assert_eq!(accounting.released_bytes.load(Ordering::SeqCst), 16);
    assert_eq!(request.interface_name(), Some("foo"));
    assert_eq!(request.read_int32(), Some(42));

    let shared = Arc::new(request);
    let clone = shared.clone();
    drop(shared);
    assert_eq!(accounting.released.load(Ordering::SeqCst), 1);
    drop(clone);
    assert_eq!(accounting.released.load(Ordering::SeqCst), 2);
    assert_eq!(
        accounting.released_bytes.load(Ordering::SeqCst),
        16 + foo_parcel().len()
    );
}

#[test]
fn set_data_without_request_still_releases() {
    let accounting = Arc::new(Accounting::default());
    RemoteRequest::set_data_on(
        None,
        Some(Buffer::with_release(vec![1, 2, 3], accounting.clone())),
        Some(ObjectTable::new()),
    );
    assert_eq!(accounting.released.load(Ordering::SeqCst), 1);
}

#[test]
fn object_side_table_lookup() {
    let registry = ObjectRegistry::new("/dev/binder");
    let table: ObjectTable = [(8, FlatBinderObject::new_handle(5))].into_iter().collect();
    let mut request = RemoteRequest::new(registry.clone(), &binder_remote::protocol::HIDL, 1, 1);
    request.set_data(Some(Buffer::new(vec![0xaa; 40])), Some(table));

    // a negative length is a null interface name, only the length word is header
    assert_eq!(request.interface_name(), None);
    assert_eq!(request.header_size(), 4);
    assert!(request.read_object().is_none());

    let mut reader = request.reader();
    reader.skip(4).unwrap();
    assert_eq!(reader.offset(), 8);
    let obj = reader.read_object().expect("object at offset 8");
    assert_eq!(obj.handle(), 5);
    assert!(Arc::ptr_eq(&obj, &registry.get(5).unwrap()));

    let mut reader = request.reader();
    reader.skip(8).unwrap();
    assert_eq!(reader.offset(), 12);
    assert!(reader.read_object().is_err());
}

#[test]
fn driver_offsets_feed_the_side_table() {
    let registry = ObjectRegistry::new("/dev/binder");
    let mut bytes = Vec::new();
    bytes.write_i32::<NativeEndian>(-1).unwrap();
    bytes.extend_from_slice(&FlatBinderObject::new_handle(77).to_bytes());
    let table = ObjectTable::from_offsets(&bytes, &[4]).unwrap();

    let mut request = RemoteRequest::new(registry, &binder_remote::protocol::HIDL, 1, 1);
    request.set_data(Some(Buffer::new(bytes)), Some(table));
    // null hidl interface name consumes just the length word
    assert_eq!(request.interface_name(), None);
    assert_eq!(request.header_size(), 4);
    let obj = request.read_object().unwrap();
    assert_eq!(obj.handle(), 77);
    assert!(Arc::ptr_eq(&obj, &request.read_object().unwrap()));
}

#[test]
fn concurrent_readers_share_one_request() {
    let registry = ObjectRegistry::with_protocol("/dev/test", &MARKER_PROTOCOL);
    let mut request = registry.new_request(1, 1);
    request.set_data(Some(Buffer::new(foo_parcel())), None);
    let request = Arc::new(request);
    std::thread::scope(|s| {
        for _ in 0..4 {
            let request = Some(request.clone());
            s.spawn(move || {
                for _ in 0..100 {
                    assert_eq!(request.read_int32(), Some(42));
                    assert_eq!(request.interface_name(), Some("foo"));
                }
            });
        }
    });
}
