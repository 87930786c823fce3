#![no_main]

use libfuzzer_sys::fuzz_target;
use pgpvault_pgp::codec;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must re-encode in both forms.
    if let Ok(entity) = codec::decode(data) {
        let _ = codec::encode_public_armor(&entity);
        let _ = codec::encode_private_without_signing(&entity);
    }
});
