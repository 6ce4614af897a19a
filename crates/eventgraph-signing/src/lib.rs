//! Content hashing, reference hashing, and signing/verification for events.
//!
//! This crate implements `EventHasher` from the event-graph storage core:
//! it turns a draft [`Event`] into a sealed one by attaching content hashes
//! and a signature, and lets callers independently verify both.
#![warn(missing_docs)]

mod key;

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine,
};
use eventgraph_common::{
    canonical_json::{encode_canonical_json, prune_for_content_hash, prune_for_reference},
    Error, Event, PriorState, Result, ServerName,
};
use sha2::{Digest, Sha256};

pub use crate::key::{verify as verify_signature_bytes, SigningKey, SigningKeySource};

/// The default, and currently only fully supported, hash algorithm.
pub const SHA256: &str = "sha256";

fn encode_base64(bytes: &[u8]) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

/// Decodes base64, accepting both padded and unpadded input so that digests
/// and signatures produced by any standard base64 implementation decode
/// cleanly, per the wire-format contract in the external interfaces.
fn decode_base64(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    STANDARD_NO_PAD.decode(input).or_else(|_| STANDARD.decode(input))
}

fn hash_bytes(algorithm: &str, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        SHA256 => Ok(Sha256::digest(data).to_vec()),
        other => Err(Error::BadHash { algorithm: other.to_owned() }),
    }
}

/// Computes the content hash of `event` under `algorithm`: the hash of the
/// canonically-encoded event with `age_ts`, `unsigned`, `signatures`,
/// `hashes`, `outlier`, and `destinations` removed.
pub fn compute_content_hash(event: &Event, algorithm: &str) -> Result<Vec<u8>> {
    let full = event.to_canonical_json_object()?;
    let pruned = prune_for_content_hash(full);
    let bytes = encode_canonical_json(&pruned)?;
    hash_bytes(algorithm, &bytes)
}

/// Verifies that `event.hashes[algorithm]` matches the freshly computed
/// content hash.
///
/// Fails with [`Error::BadHash`] if `algorithm` is absent from
/// `event.hashes`, [`Error::BadBase64`] if the recorded digest does not
/// decode, and [`Error::HashMismatch`] if the decoded digest differs from
/// the freshly computed one.
pub fn verify_content_hash(event: &Event, algorithm: &str) -> Result<()> {
    let recorded = event
        .hashes
        .get(algorithm)
        .ok_or_else(|| Error::BadHash { algorithm: algorithm.to_owned() })?;
    let recorded_bytes = decode_base64(recorded)?;
    let computed = compute_content_hash(event, algorithm)?;

    // Constant-time comparison: digests are public once verified, but this
    // avoids ever short-circuiting on attacker-controlled content.
    use subtle_eq::ConstantTimeEq;
    if recorded_bytes.ct_eq(&computed) {
        Ok(())
    } else {
        Err(Error::HashMismatch { algorithm: algorithm.to_owned() })
    }
}

/// Computes the reference hash of `event` under `algorithm`: the hash of
/// the canonically-encoded, redaction-pruned event (see
/// [`prune_for_reference`]).
///
/// Returns the algorithm name alongside the raw digest bytes, matching the
/// shape peers exchange in `prev_events`/`auth_events` entries.
pub fn compute_reference_hash(event: &Event, algorithm: &str) -> Result<(String, Vec<u8>)> {
    let full = event.to_canonical_json_object()?;
    let pruned = prune_for_reference(&full);
    let bytes = encode_canonical_json(&pruned)?;
    let digest = hash_bytes(algorithm, &bytes)?;
    Ok((algorithm.to_owned(), digest))
}

/// Computes the reference hash and returns it as a `(algorithm, base64
/// digest)` pair, the form most callers want to attach to an
/// [`EventReference`][eventgraph_common::EventReference].
pub fn compute_reference_hash_base64(event: &Event, algorithm: &str) -> Result<(String, String)> {
    let (algorithm, digest) = compute_reference_hash(event, algorithm)?;
    Ok((algorithm, encode_base64(&digest)))
}

/// Attaches content hashes and a signature to a draft event, producing its
/// sealed form. Does not mutate `draft` in place — ownership moves in, a
/// new sealed `Event` comes out, so the unsealed draft remains available to
/// any caller that kept a clone of it.
///
/// Order of operations, matching the original hashing/signing routine:
/// 1. If `prior_state` carries a frozen snapshot, hash the canonical
///    encoding of its sorted event-id list and store it under
///    `state_hash[algorithm]`.
/// 2. Compute and store the content hash under `hashes[algorithm]`.
/// 3. Compute the signature over the canonical encoding of the
///    reference-pruned form (with `signatures`, `age_ts`, `unsigned`
///    stripped) and store it under `signatures[server_name][key_id]`.
pub fn seal(
    mut draft: Event,
    prior_state: PriorState,
    server_name: &ServerName,
    signing_key: &SigningKey,
    algorithm: &str,
) -> Result<Event> {
    if let PriorState::Frozen(mut state_event_ids) = prior_state {
        state_event_ids.sort();
        let bytes = encode_canonical_json(&state_event_ids)?;
        let digest = hash_bytes(algorithm, &bytes)?;
        draft.state_hash.insert(algorithm.to_owned(), encode_base64(&digest));
    }

    let content_digest = compute_content_hash(&draft, algorithm)?;
    draft.hashes.insert(algorithm.to_owned(), encode_base64(&content_digest));

    let full = draft.to_canonical_json_object()?;
    let mut to_sign = prune_for_reference(&full);
    for key in ["signatures", "age_ts", "unsigned"] {
        to_sign.remove(key);
    }
    let message = encode_canonical_json(&to_sign)?;
    let signature = signing_key.sign(&message);
    draft
        .signatures
        .entry(server_name.to_string())
        .or_default()
        .insert(signing_key.key_id(), encode_base64(&signature));

    Ok(draft)
}

/// Verifies one of `event`'s signatures for `server_name`/`key_id` against
/// a known public key.
pub fn verify_event_signature(
    event: &Event,
    server_name: &str,
    key_id: &str,
    public_key: &ed25519_dalek::VerifyingKey,
) -> Result<()> {
    let signature_b64 = event
        .signatures
        .get(server_name)
        .and_then(|by_key| by_key.get(key_id))
        .ok_or_else(|| Error::SignatureMismatch { key_id: key_id.to_owned() })?;
    let signature = decode_base64(signature_b64)?;

    let full = event.to_canonical_json_object()?;
    let mut to_verify = prune_for_reference(&full);
    for key in ["signatures", "age_ts", "unsigned"] {
        to_verify.remove(key);
    }
    let message = encode_canonical_json(&to_verify)?;

    if key::verify(public_key, &message, &signature) {
        Ok(())
    } else {
        Err(Error::SignatureMismatch { key_id: key_id.to_owned() })
    }
}

/// A minimal constant-time equality helper so this crate does not need a
/// direct `subtle` dependency for a single comparison.
mod subtle_eq {
    pub trait ConstantTimeEq {
        fn ct_eq(&self, other: &Self) -> bool;
    }

    impl ConstantTimeEq for Vec<u8> {
        fn ct_eq(&self, other: &Self) -> bool {
            if self.len() != other.len() {
                return false;
            }
            let mut diff = 0u8;
            for (a, b) in self.iter().zip(other.iter()) {
                diff |= a ^ b;
            }
            diff == 0
        }
    }
}

#[cfg(test)]
mod tests {
    use eventgraph_common::{EventBuilder, EventReference};

    use super::*;

    fn draft() -> Event {
        EventBuilder::new("$a", "!r:example.org", "m.room.message", "example.org", 0, 1)
            .content(serde_json::json!({"body": "hello"}))
            .build()
    }

    #[test]
    fn content_hash_round_trips() {
        let sealed = seal(
            draft(),
            PriorState::None,
            &ServerName::from("example.org"),
            &SigningKey::generate("1"),
            SHA256,
        )
        .unwrap();

        verify_content_hash(&sealed, SHA256).unwrap();
    }

    #[test]
    fn verify_content_hash_rejects_tampering() {
        let mut sealed = seal(
            draft(),
            PriorState::None,
            &ServerName::from("example.org"),
            &SigningKey::generate("1"),
            SHA256,
        )
        .unwrap();

        sealed.content = serde_json::json!({"body": "tampered"});
        let err = verify_content_hash(&sealed, SHA256).unwrap_err();
        assert!(matches!(err, Error::HashMismatch { .. }));
    }

    #[test]
    fn verify_content_hash_reports_missing_algorithm() {
        let sealed = seal(
            draft(),
            PriorState::None,
            &ServerName::from("example.org"),
            &SigningKey::generate("1"),
            SHA256,
        )
        .unwrap();

        let err = verify_content_hash(&sealed, "sha512").unwrap_err();
        assert!(matches!(err, Error::BadHash { .. }));
    }

    #[test]
    fn signature_round_trips_and_rejects_tampering() {
        let key = SigningKey::generate("1");
        let server_name = ServerName::from("example.org");
        let sealed = seal(draft(), PriorState::None, &server_name, &key, SHA256).unwrap();

        verify_event_signature(&sealed, "example.org", &key.key_id(), &key.verifying_key()).unwrap();

        let mut tampered = sealed.clone();
        tampered.depth = 99;
        let err =
            verify_event_signature(&tampered, "example.org", &key.key_id(), &key.verifying_key())
                .unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { .. }));
    }

    #[test]
    fn seal_computes_state_hash_only_when_frozen_state_present() {
        let key = SigningKey::generate("1");
        let server_name = ServerName::from("example.org");

        let without_state = seal(draft(), PriorState::None, &server_name, &key, SHA256).unwrap();
        assert!(without_state.state_hash.is_empty());

        let ids = vec![
            eventgraph_common::EventId::from("$b"),
            eventgraph_common::EventId::from("$a"),
        ];
        let with_state =
            seal(draft(), PriorState::Frozen(ids), &server_name, &key, SHA256).unwrap();
        assert!(with_state.state_hash.contains_key(SHA256));
    }

    #[test]
    fn reference_hash_is_stable_under_unsigned_and_age_ts_changes() {
        let key = SigningKey::generate("1");
        let server_name = ServerName::from("example.org");
        let mut sealed = seal(draft(), PriorState::None, &server_name, &key, SHA256).unwrap();

        let (_, before) = compute_reference_hash(&sealed, SHA256).unwrap();
        sealed.age_ts = Some(1234);
        sealed.unsigned = Some(serde_json::json!({"foo": "bar"}));
        let (_, after) = compute_reference_hash(&sealed, SHA256).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn event_reference_can_be_populated_from_reference_hash() {
        let key = SigningKey::generate("1");
        let server_name = ServerName::from("example.org");
        let sealed = seal(draft(), PriorState::None, &server_name, &key, SHA256).unwrap();

        let (algorithm, digest_b64) = compute_reference_hash_base64(&sealed, SHA256).unwrap();
        let mut reference = EventReference::new(sealed.event_id.clone());
        reference.hashes.insert(algorithm, digest_b64);

        assert!(reference.hashes.contains_key(SHA256));
    }
}
