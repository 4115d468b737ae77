use binder_remote::{
    protocol::{self, HEADER_SYSTEM},
    sys::FlatBinderObject,
    Buffer, Config, ObjectRegistry, ObjectTable,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn aidl3_parcel(interface: &str, handle: u32) -> (Vec<u8>, Vec<usize>) {
    let mut data = Vec::new();
    data.extend_from_slice(&0x100i32.to_ne_bytes()); // strict mode
    data.extend_from_slice(&(-1i32).to_ne_bytes()); // work source
    data.extend_from_slice(&HEADER_SYSTEM.to_ne_bytes());
    let units: Vec<u16> = interface.encode_utf16().collect();
    data.extend_from_slice(&(units.len() as i32).to_ne_bytes());
    for unit in units.into_iter().chain([0]) {
        data.extend_from_slice(&unit.to_ne_bytes());
    }
    while data.len() % 4 != 0 {
        data.push(0);
    }
    data.extend_from_slice(&7i32.to_ne_bytes());
    let offset = data.len();
    data.extend_from_slice(&FlatBinderObject::new_handle(handle).to_bytes());
    (data, vec![offset])
}

#[tokio::main]
async fn main() -> binder_remote::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => {
            let mut config = Config::default();
            config.set_protocol(protocol::DEFAULT_DEVICE, &protocol::AIDL3);
            config
        }
    };
    let registry = ObjectRegistry::with_config(protocol::DEFAULT_DEVICE, &config);
    info!(
        "{} speaks {}",
        registry.dev(),
        registry.protocol().name()
    );

    let (data, offsets) = aidl3_parcel("android.os.IServiceManager", 3);
    let objects = ObjectTable::from_offsets(&data, &offsets)?;
    let mut request = registry.new_request(std::process::id() as i32, 0);
    request.set_data(Some(Buffer::new(data)), Some(objects));

    info!(
        "interface {:?}, header {} bytes",
        request.interface_name(),
        request.header_size()
    );

    let mut reader = request.reader();
    let code = reader.read_i32()?;
    let service = reader.read_object()?;
    info!("code {code}, service handle {}", service.handle());

    let died = service.death_notification();
    service.add_death_handler(|obj| info!("handle {} died", obj.handle()));
    registry.handle_death_notification(service.handle());
    died.await;

    if let Err(err) = service.ensure_alive() {
        info!("{err}");
    }
    let fresh = registry.resolve(3);
    info!("handle 3 resolved again, dead: {}", fresh.is_dead());
    Ok(())
}
