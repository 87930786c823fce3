//! Conversion between OpenPGP entities and their byte forms.
//!
//! The canonical stored form is a plain (non-armored) packet sequence:
//! primary key, then every user ID followed by its self-signature, then
//! every subkey followed by its binding signature. Signatures read from a
//! key ring are kept as parsed and written back unchanged; only
//! [`encode_private_freshly_generated`] produces new ones.

use std::iter::Peekable;
use std::time::SystemTime;

use openpgp::armor::{Kind as ArmorKind, Writer as ArmorWriter};
use openpgp::packet::key::{PrimaryRole, PublicParts, SubordinateRole};
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::{Key, Signature, UserID};
use openpgp::parse::{Dearmor, PacketParserBuilder, PacketParserResult, Parse};
use openpgp::serialize::Serialize;
use openpgp::types::SignatureType;
use openpgp::Packet;
use pgpvault_core::CodecError;
use sequoia_openpgp as openpgp;

/// A primary key with its identities and subkeys.
///
/// Keys are held with the `PublicParts` marker; secret material, when the
/// source carried it, stays attached and is only written by the private
/// encoders.
#[derive(Debug, Clone)]
pub struct Entity {
    primary: Key<PublicParts, PrimaryRole>,
    identities: Vec<Identity>,
    subkeys: Vec<Subkey>,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserID,
    pub self_signature: Signature,
}

#[derive(Debug, Clone)]
pub struct Subkey {
    pub key: Key<PublicParts, SubordinateRole>,
    pub binding: Signature,
}

impl Entity {
    pub fn new(primary: Key<PublicParts, PrimaryRole>) -> Self {
        Self {
            primary,
            identities: Vec::new(),
            subkeys: Vec::new(),
        }
    }

    pub fn primary_key(&self) -> &Key<PublicParts, PrimaryRole> {
        &self.primary
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn subkeys(&self) -> &[Subkey] {
        &self.subkeys
    }

    pub(crate) fn push_identity(&mut self, identity: Identity) {
        self.identities.push(identity);
    }

    pub(crate) fn push_subkey(&mut self, subkey: Subkey) {
        self.subkeys.push(subkey);
    }

    /// True if the primary key or any subkey carries secret material.
    pub fn has_secret(&self) -> bool {
        self.primary.has_secret() || self.subkeys.iter().any(|s| s.key.has_secret())
    }

    /// Lowercase hex fingerprint of the primary key.
    pub fn fingerprint(&self) -> String {
        self.primary.fingerprint().to_hex().to_lowercase()
    }
}

/// Decodes the first entity of a binary key ring. Any further entities are
/// parsed (and must be well formed) but ignored.
pub fn decode(bytes: &[u8]) -> Result<Entity, CodecError> {
    decode_all(bytes)?
        .into_iter()
        .next()
        .ok_or_else(|| malformed("no key found"))
}

/// Decodes every entity of a binary key ring, in order.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Entity>, CodecError> {
    let mut packets = read_packets(bytes)?.into_iter().peekable();
    let mut entities = Vec::new();
    while packets.peek().is_some() {
        entities.push(read_entity(&mut packets)?);
    }
    tracing::debug!(entities = entities.len(), "decoded key ring");
    Ok(entities)
}

/// ASCII-armored public key block: primary public key, user IDs with their
/// self-signatures, public subkeys with their binding signatures.
pub fn encode_public_armor(entity: &Entity) -> Result<String, CodecError> {
    let mut writer =
        ArmorWriter::new(Vec::new(), ArmorKind::PublicKey).map_err(serialize_error)?;

    let (primary, _) = entity.primary.clone().take_secret();
    write_packet(&mut writer, &Packet::from(primary))?;
    for identity in &entity.identities {
        write_packet(&mut writer, &Packet::from(identity.user_id.clone()))?;
        write_packet(&mut writer, &Packet::from(identity.self_signature.clone()))?;
    }
    for subkey in &entity.subkeys {
        let (key, _) = subkey.key.clone().take_secret();
        write_packet(&mut writer, &Packet::from(key))?;
        write_packet(&mut writer, &Packet::from(subkey.binding.clone()))?;
    }

    let bytes = writer.finalize().map_err(serialize_error)?;
    String::from_utf8(bytes).map_err(serialize_error)
}

/// Serializes the entity with its secret material and its existing
/// signatures. Fails when neither the primary key nor any subkey holds
/// secret material.
pub fn encode_private_without_signing(entity: &Entity) -> Result<Vec<u8>, CodecError> {
    let mut found_private = false;
    let mut out = Vec::new();

    let primary = if entity.primary.has_secret() {
        found_private = true;
        Packet::from(
            entity
                .primary
                .clone()
                .parts_into_secret()
                .map_err(serialize_error)?,
        )
    } else {
        Packet::from(entity.primary.clone())
    };
    write_packet(&mut out, &primary)?;

    for identity in &entity.identities {
        write_packet(&mut out, &Packet::from(identity.user_id.clone()))?;
        write_packet(&mut out, &Packet::from(identity.self_signature.clone()))?;
    }

    for subkey in &entity.subkeys {
        let key = if subkey.key.has_secret() {
            found_private = true;
            Packet::from(subkey.key.clone().parts_into_secret().map_err(serialize_error)?)
        } else {
            Packet::from(subkey.key.clone())
        };
        write_packet(&mut out, &key)?;
        write_packet(&mut out, &Packet::from(subkey.binding.clone()))?;
    }

    if !found_private {
        return Err(CodecError::NoPrivateKeyPresent);
    }
    Ok(out)
}

/// Serializes an entity this engine just created, re-issuing every user ID
/// self-signature and subkey binding with the primary secret key. The
/// existing signatures serve as templates, so their subpackets carry over.
pub fn encode_private_freshly_generated(entity: &Entity) -> Result<Vec<u8>, CodecError> {
    let mut signer = entity
        .primary
        .clone()
        .parts_into_secret()
        .map_err(|_| CodecError::NoPrivateKeyPresent)?
        .into_keypair()
        .map_err(crypto_error)?;

    // Re-issued signatures must not inherit the template's creation time.
    let now = SystemTime::now();
    let mut signed = Entity::new(entity.primary.clone());
    for identity in &entity.identities {
        let self_signature = SignatureBuilder::from(identity.self_signature.clone())
            .set_signature_creation_time(now)
            .and_then(|b| b.sign_userid_binding(&mut signer, &entity.primary, &identity.user_id))
            .map_err(crypto_error)?;
        signed.push_identity(Identity {
            user_id: identity.user_id.clone(),
            self_signature,
        });
    }
    for subkey in &entity.subkeys {
        let binding = SignatureBuilder::from(subkey.binding.clone())
            .set_signature_creation_time(now)
            .and_then(|b| b.sign_subkey_binding(&mut signer, &entity.primary, &subkey.key))
            .map_err(crypto_error)?;
        signed.push_subkey(Subkey {
            key: subkey.key.clone(),
            binding,
        });
    }

    encode_private_without_signing(&signed)
}

fn read_packets(bytes: &[u8]) -> Result<Vec<Packet>, CodecError> {
    let mut ppr = PacketParserBuilder::from_bytes(bytes)
        .map_err(malformed)?
        .dearmor(Dearmor::Disabled)
        .build()
        .map_err(malformed)?;

    let mut packets = Vec::new();
    while let PacketParserResult::Some(pp) = ppr {
        let (packet, next) = pp.next().map_err(malformed)?;
        ppr = next;
        match packet {
            Packet::Marker(_) | Packet::Trust(_) => continue,
            Packet::Unknown(unknown) => {
                return Err(malformed(format!(
                    "unparseable {} packet: {}",
                    unknown.tag(),
                    unknown.error()
                )));
            }
            packet => packets.push(packet),
        }
    }
    Ok(packets)
}

fn read_entity<I>(packets: &mut Peekable<I>) -> Result<Entity, CodecError>
where
    I: Iterator<Item = Packet>,
{
    let primary = match packets.next() {
        Some(Packet::PublicKey(key)) => key,
        Some(Packet::SecretKey(key)) => key.parts_into_public(),
        Some(other) => {
            return Err(malformed(format!(
                "expected a primary key, found a {} packet",
                other.tag()
            )));
        }
        None => return Err(malformed("no key found")),
    };

    // Direct-key and revocation signatures on the primary are not carried.
    take_signatures(packets);

    let mut entity = Entity::new(primary);
    while let Some(packet) =
        packets.next_if(|p| !matches!(p, Packet::PublicKey(_) | Packet::SecretKey(_)))
    {
        match packet {
            Packet::UserID(user_id) => {
                let signatures = take_signatures(packets);
                let self_signature =
                    select_userid_self_signature(&entity.primary, &user_id, signatures)?;
                entity.push_identity(Identity {
                    user_id,
                    self_signature,
                });
            }
            Packet::UserAttribute(_) => {
                take_signatures(packets);
            }
            Packet::PublicSubkey(key) => {
                let signatures = take_signatures(packets);
                let subkey = select_subkey_binding(&entity.primary, key, signatures)?;
                entity.push_subkey(subkey);
            }
            Packet::SecretSubkey(key) => {
                let signatures = take_signatures(packets);
                let subkey =
                    select_subkey_binding(&entity.primary, key.parts_into_public(), signatures)?;
                entity.push_subkey(subkey);
            }
            other => {
                return Err(malformed(format!("unexpected {} packet", other.tag())));
            }
        }
    }
    Ok(entity)
}

fn take_signatures<I>(packets: &mut Peekable<I>) -> Vec<Signature>
where
    I: Iterator<Item = Packet>,
{
    let mut signatures = Vec::new();
    while let Some(Packet::Signature(sig)) =
        packets.next_if(|p| matches!(p, Packet::Signature(_)))
    {
        signatures.push(sig);
    }
    signatures
}

fn is_certification(typ: SignatureType) -> bool {
    matches!(
        typ,
        SignatureType::GenericCertification
            | SignatureType::PersonaCertification
            | SignatureType::CasualCertification
            | SignatureType::PositiveCertification
    )
}

/// Keeps the newest certification that verifies against the primary key.
/// Third-party certifications fail verification and are dropped.
fn select_userid_self_signature(
    primary: &Key<PublicParts, PrimaryRole>,
    user_id: &UserID,
    signatures: Vec<Signature>,
) -> Result<Signature, CodecError> {
    let mut selected: Option<Signature> = None;
    for sig in signatures {
        if !is_certification(sig.typ()) {
            continue;
        }
        if sig.verify_userid_binding(primary, primary, user_id).is_err() {
            continue;
        }
        if selected
            .as_ref()
            .is_none_or(|current| sig.signature_creation_time() > current.signature_creation_time())
        {
            selected = Some(sig);
        }
    }
    selected.ok_or_else(|| {
        malformed(format!(
            "user ID {:?} has no valid self-signature",
            String::from_utf8_lossy(user_id.value())
        ))
    })
}

fn select_subkey_binding(
    primary: &Key<PublicParts, PrimaryRole>,
    key: Key<PublicParts, SubordinateRole>,
    signatures: Vec<Signature>,
) -> Result<Subkey, CodecError> {
    let mut selected: Option<Signature> = None;
    for sig in signatures {
        if sig.typ() != SignatureType::SubkeyBinding {
            continue;
        }
        if sig.verify_subkey_binding(primary, primary, &key).is_err() {
            continue;
        }
        if selected
            .as_ref()
            .is_none_or(|current| sig.signature_creation_time() > current.signature_creation_time())
        {
            selected = Some(sig);
        }
    }
    match selected {
        Some(binding) => Ok(Subkey { key, binding }),
        None => Err(malformed(format!(
            "subkey {} has no valid binding signature",
            key.fingerprint().to_hex()
        ))),
    }
}

fn write_packet(out: &mut dyn std::io::Write, packet: &Packet) -> Result<(), CodecError> {
    packet.serialize(out).map_err(serialize_error)
}

fn malformed(err: impl std::fmt::Display) -> CodecError {
    CodecError::MalformedKeyRing(err.to_string())
}

fn serialize_error(err: impl std::fmt::Display) -> CodecError {
    CodecError::Serialize(err.to_string())
}

fn crypto_error(err: impl std::fmt::Display) -> CodecError {
    CodecError::Crypto(err.to_string())
}
