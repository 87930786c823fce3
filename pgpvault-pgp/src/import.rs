use std::io::Read;

use openpgp::armor::{Kind as ArmorKind, Reader as ArmorReader, ReaderMode};
use pgpvault_core::{CodecError, ValidationError, VaultError};
use sequoia_openpgp as openpgp;

use crate::codec::{self, Entity};

const ARMOR_HEADER: &str = "-----BEGIN PGP ";

/// Parses caller-supplied armored key text and returns its first entity.
/// Additional entities in the block are discarded.
pub fn import(armored: &str) -> Result<Entity, ValidationError> {
    if armored.trim().is_empty() {
        return Err(ValidationError::EmptyKeyInput);
    }
    let bytes = dearmor(armored)?;
    let mut entities = codec::decode_all(&bytes)
        .map_err(|err| ValidationError::InvalidArmor(err.to_string()))?
        .into_iter();
    let entity = entities
        .next()
        .ok_or_else(|| ValidationError::InvalidArmor("no key found".into()))?;
    let discarded = entities.count();
    if discarded > 0 {
        tracing::warn!(
            discarded,
            fingerprint = %entity.fingerprint(),
            "armored input holds more than one key; only the first is kept"
        );
    }
    Ok(entity)
}

/// Imports armored key text and serializes it into the stored form, keeping
/// the signatures it came with.
pub fn import_for_storage(armored: &str) -> Result<(Entity, Vec<u8>), VaultError> {
    let entity = import(armored)?;
    match codec::encode_private_without_signing(&entity) {
        Ok(bytes) => Ok((entity, bytes)),
        Err(CodecError::NoPrivateKeyPresent) => Err(ValidationError::NoPrivateKeyPresent.into()),
        Err(err) => Err(err.into()),
    }
}

fn dearmor(text: &str) -> Result<Vec<u8>, ValidationError> {
    if !text.contains(ARMOR_HEADER) {
        return Err(ValidationError::InvalidArmor(
            "no armor header found".into(),
        ));
    }
    let mut reader = ArmorReader::from_bytes(text.as_bytes(), ReaderMode::Tolerant(None));
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|err| ValidationError::InvalidArmor(err.to_string()))?;
    match reader.kind() {
        Some(ArmorKind::PublicKey | ArmorKind::SecretKey) => Ok(bytes),
        Some(other) => Err(ValidationError::InvalidArmor(format!(
            "expected a key block, found {other:?}"
        ))),
        None => Err(ValidationError::InvalidArmor(
            "unrecognized armor block".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_empty_input() {
        assert!(matches!(import(""), Err(ValidationError::EmptyKeyInput)));
        assert!(matches!(
            import("  \n\t "),
            Err(ValidationError::EmptyKeyInput)
        ));
    }

    #[test]
    fn binary_or_plain_text_is_invalid_armor() {
        assert!(matches!(
            import("hello world"),
            Err(ValidationError::InvalidArmor(_))
        ));
    }

    #[test]
    fn non_key_armor_is_rejected() {
        let text = "-----BEGIN PGP MESSAGE-----\n\nyDgBO22WxBHv7O8X7O/jygAEzol56iUKiXmV+XmpCtmpqQUKiQrFqclFqUDBovzSvBSFjNSiVHsuAA==\n=njUN\n-----END PGP MESSAGE-----\n";
        assert!(matches!(
            import(text),
            Err(ValidationError::InvalidArmor(_))
        ));
    }
}
