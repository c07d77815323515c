use crate::core::errors::DocumentValidationError;
use crate::{Document, WrongoDBError};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// `EJDB_RND_SEED`, read once, seeds the OID counter's initial value so that
/// runs started with the same seed produce deterministic `_id` sequences.
fn oid_counter_seed() -> u32 {
    static SEED: OnceLock<u32> = OnceLock::new();
    *SEED.get_or_init(|| {
        std::env::var("EJDB_RND_SEED")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    })
}

pub fn normalize_document(doc: &Document) -> Result<Document, WrongoDBError> {
    let mut normalized = doc.clone();

    let id_key = "_id".to_string();
    if !normalized.contains_key(&id_key) {
        normalized.insert(id_key, Value::String(generate_object_id_hex()));
    }

    // Keys are already String in Document; keep a lightweight validation for values:
    // ensure the document is JSON-serializable (Value always is).
    Ok(normalized)
}

pub fn normalize_document_in_place(doc: &mut Document) -> Result<(), WrongoDBError> {
    let id_key = "_id".to_string();
    if !doc.contains_key(&id_key) {
        doc.insert(id_key, Value::String(generate_object_id_hex()));
    }
    Ok(())
}

pub fn validate_is_object(value: &Value) -> Result<(), WrongoDBError> {
    if !value.is_object() {
        return Err(DocumentValidationError("document must be a JSON object".into()).into());
    }
    Ok(())
}

fn generate_object_id_hex() -> String {
    // 12-byte id, rendered as 24 lower-case hex characters:
    // - 4 bytes: timestamp (seconds since epoch), big-endian
    // - 3 bytes: hash of the machine's hostname
    // - 2 bytes: this process's pid, truncated
    // - 3 bytes: incrementing counter, big-endian (mod 2^24)
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    let counter = COUNTER.get_or_init(|| AtomicU32::new(oid_counter_seed()));

    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    let ts = now_secs.to_be_bytes();

    let machine = machine_hash_bytes();
    let pid = (std::process::id() as u16).to_be_bytes();

    let c = counter.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
    let counter_bytes = c.to_be_bytes();

    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&ts);
    bytes[4..7].copy_from_slice(&machine);
    bytes[7..9].copy_from_slice(&pid);
    bytes[9..12].copy_from_slice(&counter_bytes[1..4]);

    hex_lower(&bytes)
}

/// A 3-byte hash of the machine's hostname, cached for the life of the
/// process since the hostname doesn't change underneath us.
fn machine_hash_bytes() -> [u8; 3] {
    static HASH: OnceLock<[u8; 3]> = OnceLock::new();
    *HASH.get_or_init(|| {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_default();
        let h = fnv1a(hostname.as_bytes()).to_be_bytes();
        [h[0], h[1], h[2]]
    })
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn hex_lower(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(LUT[(b >> 4) as usize]);
        out.push(LUT[(b & 0x0F) as usize]);
    }
    // SAFETY: LUT only contains ASCII hex digits.
    unsafe { String::from_utf8_unchecked(out) }
}
