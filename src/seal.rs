//! Password derivation and document sealing
//!
//! The password is the recipient's name romanized: Han characters become
//! their plain pinyin syllables, Latin letters and digits pass through, and
//! everything else is dropped, all concatenated without separators. The same
//! name always yields the same password. The document is then encrypted with
//! AES-256 using that password for both the user and owner roles.
//!
//! The permission set grants nearly everything (print, copy, modify, annotate,
//! assemble, fill forms, accessibility extraction); the password gates opening
//! the document, not what can be done once it is open.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::encryption::{EncryptionState, EncryptionVersion, Permissions};
use lopdf::Document;
use pinyin::ToPinyin;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::watermark::save_atomically;

/// Romanize a recipient name into a password.
///
/// Deterministic; an empty result (empty name, or a name with no romanizable
/// characters) signals the caller to use its fallback password.
pub fn derive_password(recipient: &str) -> String {
    let mut password = String::new();
    for (ch, syllable) in recipient.chars().zip(recipient.to_pinyin()) {
        match syllable {
            Some(pinyin) => password.push_str(pinyin.plain()),
            None if ch.is_alphanumeric() => password.push(ch),
            None => {}
        }
    }
    password
}

fn permission_set() -> Permissions {
    Permissions::PRINTABLE
        | Permissions::MODIFIABLE
        | Permissions::COPYABLE
        | Permissions::ANNOTABLE
        | Permissions::FILLABLE
        | Permissions::COPYABLE_FOR_ACCESSIBILITY
        | Permissions::ASSEMBLABLE
}

/// Encrypt `input` with a password derived from `recipient` and write the
/// sealed document to `output`.
///
/// Returns the password that was used. The output appears only on full
/// success; failures leave the destination untouched.
pub fn seal_document(
    input: &Path,
    output: &Path,
    recipient: &str,
    fallback_password: &str,
) -> Result<String> {
    let derived = derive_password(recipient);
    let password = if derived.is_empty() {
        tracing::debug!("recipient name yields no password, using the fallback");
        fallback_password.to_string()
    } else {
        derived
    };

    let mut doc = Document::load(input).map_err(|source| Error::InvalidDocument {
        path: input.to_path_buf(),
        source,
    })?;
    // Compress content streams before encrypting to keep the output small.
    doc.compress();

    // AES-256 (V5) wraps a random file encryption key with the password-derived
    // keys; the standard crypt filter handles every stream and string.
    let crypt_filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
    let crypt_filters = BTreeMap::from([(b"StdCF".to_vec(), crypt_filter)]);
    let mut file_encryption_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut file_encryption_key);

    let version = EncryptionVersion::V5 {
        encrypt_metadata: true,
        crypt_filters,
        file_encryption_key: &file_encryption_key,
        stream_filter: b"StdCF".to_vec(),
        string_filter: b"StdCF".to_vec(),
        owner_password: &password,
        user_password: &password,
        permissions: permission_set(),
    };
    let state = EncryptionState::try_from(version)
        .map_err(|err| Error::Sealing(format!("building encryption state: {err}")))?;
    doc.encrypt(&state)
        .map_err(|err| Error::Sealing(format!("encrypting {}: {err}", input.display())))?;

    save_atomically(&mut doc, output)?;
    tracing::info!(output = %output.display(), "document sealed");
    Ok(password)
}
