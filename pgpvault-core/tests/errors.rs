use pgpvault_core::{CodecError, StorageError, ValidationError, VaultError};

#[test]
fn error_display_messages() {
    let err = ValidationError::KeyTooSmall { bits: 1024 };
    assert_eq!(
        err.to_string(),
        "keys < 2048 bits are unsafe and not supported (got 1024)"
    );

    let err = ValidationError::NoPrivateKeyPresent;
    assert_eq!(
        err.to_string(),
        "the key could not be serialized, is a private key present?"
    );

    let err = CodecError::MalformedKeyRing("truncated".into());
    assert_eq!(err.to_string(), "malformed key ring: truncated");

    let err = StorageError::Io("disk".into());
    assert_eq!(err.to_string(), "io error: disk");

    let err = StorageError::Encode("key must be a string".into());
    assert_eq!(err.to_string(), "cannot encode record: key must be a string");
}

#[test]
fn only_validation_errors_are_caller_errors() {
    assert!(VaultError::from(ValidationError::EmptyKeyInput).is_caller_error());
    assert!(!VaultError::from(CodecError::NoPrivateKeyPresent).is_caller_error());
    assert!(!VaultError::from(StorageError::Io("down".into())).is_caller_error());
    assert!(!VaultError::from(StorageError::Encode("record".into())).is_caller_error());
}

#[test]
fn vault_error_is_transparent() {
    let err = VaultError::from(StorageError::InvalidKey("../x".into()));
    assert_eq!(err.to_string(), "invalid storage key: \"../x\"");
}
