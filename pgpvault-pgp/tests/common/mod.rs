use std::io::Write;
use std::sync::Arc;

use openpgp::armor::{Kind, Writer};
use pgpvault_core::{IdentityDescriptor, MemoryStorage, Storage};
use pgpvault_pgp::{Entity, KeyService, codec};
use sequoia_openpgp as openpgp;

#[allow(dead_code)]
pub fn memory_service() -> (Arc<MemoryStorage>, KeyService) {
    let storage = Arc::new(MemoryStorage::new());
    let service = KeyService::new(storage.clone() as Arc<dyn Storage>);
    (storage, service)
}

pub fn sample_entity(name: &str) -> Entity {
    let identity = IdentityDescriptor::new(name, "", format!("{}@example.com", name.to_lowercase()));
    pgpvault_pgp::generate(&identity, 2048).expect("keygen")
}

pub fn armor(kind: Kind, packets: &[u8]) -> String {
    let mut writer = Writer::new(Vec::new(), kind).expect("armor writer");
    writer.write_all(packets).expect("armor write");
    String::from_utf8(writer.finalize().expect("armor finalize")).expect("utf8 armor")
}

/// Armored secret key block, as a user would paste it.
pub fn armored_secret(entity: &Entity) -> String {
    let bytes = codec::encode_private_without_signing(entity).expect("serialize secret");
    armor(Kind::SecretKey, &bytes)
}
