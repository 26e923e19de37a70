use sha1::{Digest as _, Sha1};

/// Git-object SHA-1 of `content`: the digest of `"blob <len>\0" + content`,
/// identical to what `git hash-object` emits. This is the single
/// conflict-detection key; it is always computed over the raw stored form of
/// a file, never over the unwrapped edit-time form.
pub fn git_blob_sha1(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

pub fn git_blob_sha1_str(content: &str) -> String {
    git_blob_sha1(content.as_bytes())
}

/// Constant-time comparison of two hex digests, case-insensitive. Length
/// mismatch short-circuits; equal-length inputs are always fully scanned.
pub fn hashes_equal(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x.to_ascii_lowercase() ^ y.to_ascii_lowercase();
    }
    diff == 0
}
