use rand::Rng;

/// Length of a generated container ID in hex characters.
const ID_LEN: usize = 16;

/// Generate a random hex container ID (16 hex chars = 8 random bytes).
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..ID_LEN / 2).map(|_| rng.gen()).collect();
    hex_encode(&bytes)
}

/// Encode bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Validate that a string looks like a valid container-ID prefix.
/// Must be non-empty, lowercase hex, and at most `ID_LEN` characters.
pub fn validate_id_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() <= ID_LEN
        && prefix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Whether `id` is safe to use verbatim as a single path component under
/// the runtime root: non-empty, no separators, not `.`/`..`. User-supplied
/// ids only need this weaker check — they need not be hex, unlike
/// generated ones.
pub fn is_filesystem_safe(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains('/')
        && !id.contains('\0')
        && id.len() <= 255
}
