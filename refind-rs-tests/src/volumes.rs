use refind_rs_core::{
    loader::{Arch, Validity, is_valid_loader},
    system::{image::self_image_path, volumes::UefiStorage},
    volume::VolumeCatalog,
};
use uefi::println;

use crate::press_for_reboot;

pub fn test_volumes() -> anyhow::Result<()> {
    let mut storage = UefiStorage::new();
    let mut catalog = VolumeCatalog::new();
    catalog.scan(&mut storage)?;

    for volume in catalog.volumes() {
        println!(
            "fs{}: '{}' {:?} {} readable: {} self: {}",
            volume.index, volume.name, volume.kind, volume.fs_type, volume.has_root, volume.is_self
        );
    }

    let self_volume = catalog
        .self_volume()
        .expect("The volume of the test image was not found");
    assert!(self_volume.has_root);
    assert!(catalog.find(&self_volume.name).is_some());

    let self_path = self_image_path()?;
    println!("Test image is at {self_path}");
    assert_eq!(
        is_valid_loader(&mut storage, Some(self_volume), Some(&self_path), Arch::current()),
        Validity::ValidExecutable
    );

    let generation = catalog.generation();
    let reference = catalog.reference(self_volume);
    catalog.scan(&mut storage)?;
    assert_ne!(catalog.generation(), generation);
    assert!(catalog.get(reference).is_none());

    println!("All volume catalog assertions passed!");
    println!("Press a key to reboot");
    press_for_reboot();
}
