//! Property tests for the segment AEAD, key hierarchy, and descriptor codec.

use proptest::prelude::*;
use segcrypt_core::{Algorithm, SegcryptError};
use segcrypt_crypto::{
    decrypt, derive_segment_key, encrypt, MasterKey, SegmentDescriptor, SegmentKey, KEY_SIZE,
    NONCE_SIZE, TAG_SIZE,
};

fn algorithm() -> impl Strategy<Value = Algorithm> {
    prop_oneof![Just(Algorithm::Aes256Gcm), Just(Algorithm::ChaCha20Poly1305)]
}

/// Which sealed field a single-bit flip lands in.
#[derive(Debug, Clone, Copy)]
enum Field {
    Ciphertext,
    Nonce,
    Tag,
}

fn field() -> impl Strategy<Value = Field> {
    prop_oneof![Just(Field::Ciphertext), Just(Field::Nonce), Just(Field::Tag)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn decrypt_inverts_encrypt(
        plaintext in proptest::collection::vec(any::<u8>(), 0..4096),
        key in any::<[u8; KEY_SIZE]>(),
        algorithm in algorithm(),
    ) {
        let key = SegmentKey::from_bytes(key);
        let sealed = encrypt(&plaintext, &key, algorithm).unwrap();
        prop_assert_eq!(sealed.ciphertext.len(), plaintext.len());

        let opened = decrypt(&sealed.ciphertext, &sealed.nonce, &sealed.tag, algorithm, &key).unwrap();
        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn any_single_bit_flip_fails_closed(
        plaintext in proptest::collection::vec(any::<u8>(), 1..512),
        key in any::<[u8; KEY_SIZE]>(),
        algorithm in algorithm(),
        target in field(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = SegmentKey::from_bytes(key);
        let mut sealed = encrypt(&plaintext, &key, algorithm).unwrap();

        let mask = 1u8 << bit;
        match target {
            Field::Ciphertext => {
                let i = position.index(sealed.ciphertext.len());
                sealed.ciphertext[i] ^= mask;
            }
            Field::Nonce => sealed.nonce[position.index(NONCE_SIZE)] ^= mask,
            Field::Tag => sealed.tag[position.index(TAG_SIZE)] ^= mask,
        }

        let result = decrypt(&sealed.ciphertext, &sealed.nonce, &sealed.tag, algorithm, &key);
        prop_assert!(matches!(result, Err(SegcryptError::AuthenticationFailure)));
    }

    #[test]
    fn distinct_segment_ids_give_distinct_keys(
        master in any::<[u8; KEY_SIZE]>(),
        file_id in "[a-f0-9-]{1,36}",
        a in 0u64..10_000,
        b in 0u64..10_000,
    ) {
        prop_assume!(a != b);
        let master = MasterKey::from_bytes(master);
        let ka = derive_segment_key(&master, &format!("{file_id}_{a}"), &file_id).unwrap();
        let kb = derive_segment_key(&master, &format!("{file_id}_{b}"), &file_id).unwrap();
        prop_assert_ne!(ka.as_bytes(), kb.as_bytes());
    }

    #[test]
    fn descriptor_serialization_roundtrips(
        file_id in "[ -~]{0,40}",
        index in any::<u64>(),
        algorithm in algorithm(),
        nonce in any::<[u8; NONCE_SIZE]>(),
        tag in any::<[u8; TAG_SIZE]>(),
        size in any::<u64>(),
    ) {
        let d = SegmentDescriptor::generate(
            format!("{file_id}_{index}"),
            file_id,
            index,
            algorithm,
            nonce,
            tag,
            size,
        );
        let restored = SegmentDescriptor::deserialize(&d.serialize().unwrap()).unwrap();
        prop_assert_eq!(restored, d);
    }
}
