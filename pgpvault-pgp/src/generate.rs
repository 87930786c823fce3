use openpgp::packet::key::{Key4, PrimaryRole, SecretParts, SubordinateRole};
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::{Key, UserID};
use openpgp::types::{Features, HashAlgorithm, KeyFlags, SignatureType, SymmetricAlgorithm};
use pgpvault_core::{CodecError, IdentityDescriptor, MIN_KEY_BITS, ValidationError, VaultError};
use sequoia_openpgp as openpgp;

use crate::codec::{Entity, Identity, Subkey};

/// Creates an RSA entity: a certification/signing primary key carrying one
/// primary user ID, and an encryption subkey of the same size.
pub fn generate(identity: &IdentityDescriptor, key_bits: usize) -> Result<Entity, VaultError> {
    if key_bits < MIN_KEY_BITS {
        return Err(ValidationError::KeyTooSmall { bits: key_bits }.into());
    }
    identity.validate()?;

    let primary: Key<SecretParts, PrimaryRole> =
        Key::V4(Key4::generate_rsa(key_bits).map_err(crypto_error)?);
    let mut signer = primary.clone().into_keypair().map_err(crypto_error)?;
    let primary_public = primary.parts_into_public();

    let user_id = UserID::from(identity.user_id());
    let self_signature = SignatureBuilder::new(SignatureType::PositiveCertification)
        .set_primary_userid(true)
        .and_then(|b| b.set_key_flags(KeyFlags::empty().set_certification().set_signing()))
        .and_then(|b| b.set_features(Features::sequoia()))
        .and_then(|b| {
            b.set_preferred_symmetric_algorithms(vec![
                SymmetricAlgorithm::AES256,
                SymmetricAlgorithm::AES128,
            ])
        })
        .and_then(|b| {
            b.set_preferred_hash_algorithms(vec![HashAlgorithm::SHA512, HashAlgorithm::SHA256])
        })
        .and_then(|b| b.sign_userid_binding(&mut signer, &primary_public, &user_id))
        .map_err(crypto_error)?;

    let subkey: Key<SecretParts, SubordinateRole> =
        Key::V4(Key4::generate_rsa(key_bits).map_err(crypto_error)?);
    let subkey_public = subkey.parts_into_public();
    let binding = SignatureBuilder::new(SignatureType::SubkeyBinding)
        .set_key_flags(
            KeyFlags::empty()
                .set_transport_encryption()
                .set_storage_encryption(),
        )
        .and_then(|b| b.sign_subkey_binding(&mut signer, &primary_public, &subkey_public))
        .map_err(crypto_error)?;

    let mut entity = Entity::new(primary_public);
    entity.push_identity(Identity {
        user_id,
        self_signature,
    });
    entity.push_subkey(Subkey {
        key: subkey_public,
        binding,
    });
    tracing::debug!(bits = key_bits, fingerprint = %entity.fingerprint(), "generated key");
    Ok(entity)
}

fn crypto_error(err: impl std::fmt::Display) -> VaultError {
    CodecError::Crypto(err.to_string()).into()
}
