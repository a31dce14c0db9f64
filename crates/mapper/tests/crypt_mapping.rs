//! End-to-end: a device mapped onto an encrypting extent, driven through
//! the splitter the way a block-device consumer would.

use std::sync::Arc;

use encryption::{CipherRegistry, RegistryConfig};
use mapper::{
    Bio, CryptTargetType, DeviceRegistry, DeviceSelector, ExtentSpec, TableGeneration,
    TargetRegistry, SECTOR_SIZE,
};
use storage::{MemStore, StorePool};

const KEY_HEX: &str = "2b7e151628aed2a6abf7158809cf4f3c2b7e151628aed2a6abf7158809cf4f3c\
                       603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";

struct Fixture {
    devices: DeviceRegistry,
    targets: TargetRegistry,
    stores: Arc<StorePool>,
}

fn fixture() -> Fixture {
    let stores = Arc::new(StorePool::new());
    stores.register("disk0", Arc::new(MemStore::new(1 << 20)));
    stores.register("disk1", Arc::new(MemStore::new(1 << 20)));

    let targets = TargetRegistry::new();
    CryptTargetType::register(
        &targets,
        Arc::new(CipherRegistry::new(RegistryConfig::default())),
        Arc::clone(&stores),
    )
    .unwrap();

    Fixture {
        devices: DeviceRegistry::new(),
        targets,
        stores,
    }
}

fn crypt_spec(start: u64, length: u64, store: &str) -> ExtentSpec {
    ExtentSpec {
        start,
        length,
        target: "crypt".to_string(),
        params: format!("aes-xts-plain64 {} 0 {} 0", KEY_HEX, store),
    }
}

#[test]
fn write_read_roundtrip_through_mapped_device() {
    let fx = fixture();
    let dev = fx.devices.create("secure0", None, None).unwrap();
    let generation =
        TableGeneration::from_specs(&fx.targets, &[crypt_spec(0, 128, "disk0")]).unwrap();
    dev.tables().load(generation);
    dev.resume().unwrap();

    let payload: Vec<u8> = (0..8 * SECTOR_SIZE as usize).map(|i| (i % 251) as u8).collect();
    let done = mapper::submit(&dev, Bio::write(0, payload.clone()));
    assert!(done.is_ok(), "{:?}", done.error);

    let done = mapper::submit(&dev, Bio::read(0, payload.len()));
    assert!(done.is_ok());
    assert_eq!(done.bio.data, payload);

    // the backing store saw only ciphertext
    let raw = fx.stores.resolve("disk0").unwrap();
    let mut on_disk = vec![0u8; payload.len()];
    raw.read_at(0, &mut on_disk).unwrap();
    assert_ne!(on_disk, payload);

    let done = mapper::submit(&dev, Bio::flush());
    assert!(done.is_ok());
}

#[test]
fn two_extents_split_across_stores() {
    let fx = fixture();
    let dev = fx.devices.create("striped", None, None).unwrap();
    let generation = TableGeneration::from_specs(
        &fx.targets,
        &[crypt_spec(0, 64, "disk0"), crypt_spec(64, 64, "disk1")],
    )
    .unwrap();
    dev.tables().load(generation);
    dev.resume().unwrap();

    // a write straddling the seam at sector 64
    let payload = vec![0xC7u8; 16 * SECTOR_SIZE as usize];
    let done = mapper::submit(&dev, Bio::write(56 * SECTOR_SIZE, payload.clone()));
    assert!(done.is_ok(), "{:?}", done.error);

    let done = mapper::submit(&dev, Bio::read(56 * SECTOR_SIZE, payload.len()));
    assert!(done.is_ok());
    assert_eq!(done.bio.data, payload);

    // both stores were touched
    let mut buf = vec![0u8; SECTOR_SIZE as usize];
    fx.stores.resolve("disk0").unwrap().read_at(56 * SECTOR_SIZE, &mut buf).unwrap();
    assert_ne!(buf, vec![0u8; SECTOR_SIZE as usize]);
    fx.stores.resolve("disk1").unwrap().read_at(0, &mut buf).unwrap();
    assert_ne!(buf, vec![0u8; SECTOR_SIZE as usize]);
}

#[test]
fn reload_swaps_key_without_stopping_the_device() {
    let fx = fixture();
    let dev = fx.devices.create("rekeyed", None, None).unwrap();
    let generation =
        TableGeneration::from_specs(&fx.targets, &[crypt_spec(0, 128, "disk0")]).unwrap();
    dev.tables().load(generation);
    dev.resume().unwrap();

    let payload = vec![0x99u8; 4 * SECTOR_SIZE as usize];
    assert!(mapper::submit(&dev, Bio::write(0, payload.clone())).is_ok());

    // stage a table with a different key over the same store
    let other_key = KEY_HEX.replace('2', "d");
    let generation = TableGeneration::from_specs(
        &fx.targets,
        &[ExtentSpec {
            start: 0,
            length: 128,
            target: "crypt".to_string(),
            params: format!("aes-xts-plain64 {} 0 disk0 0", other_key),
        }],
    )
    .unwrap();
    dev.tables().load(generation);
    dev.suspend();
    dev.resume().unwrap();

    // the old key's ciphertext no longer decrypts to the payload
    let done = mapper::submit(&dev, Bio::read(0, payload.len()));
    assert!(done.is_ok());
    assert_ne!(done.bio.data, payload);

    // but fresh writes roundtrip under the new key
    assert!(mapper::submit(&dev, Bio::write(0, payload.clone())).is_ok());
    let done = mapper::submit(&dev, Bio::read(0, payload.len()));
    assert_eq!(done.bio.data, payload);
}

#[test]
fn unknown_target_type_fails_the_load() {
    let fx = fixture();
    let err = TableGeneration::from_specs(
        &fx.targets,
        &[ExtentSpec {
            start: 0,
            length: 8,
            target: "mirror".to_string(),
            params: String::new(),
        }],
    );
    assert!(err.is_err());
}

#[test]
fn device_capacity_caps_promotion() {
    let fx = fixture();
    let dev = fx.devices.create("small", None, Some(64)).unwrap();
    let generation =
        TableGeneration::from_specs(&fx.targets, &[crypt_spec(0, 128, "disk0")]).unwrap();
    dev.tables().load(generation);
    assert!(dev.resume().is_err());

    let generation =
        TableGeneration::from_specs(&fx.targets, &[crypt_spec(0, 64, "disk0")]).unwrap();
    dev.tables().load(generation);
    dev.resume().unwrap();
    assert_eq!(dev.size_sectors(), 64);

    let _ = fx.devices.remove(&DeviceSelector::by_name("small"));
}
