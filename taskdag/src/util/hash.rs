// src/util/hash.rs

use blake3::Hasher;

/// Hash a sequence of strings into a stable hex digest.
///
/// Items are fed through with a separator so that `["ab", "c"]` and
/// `["a", "bc"]` hash differently.
pub fn hash_strings<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Hasher::new();
    for item in items {
        hasher.update(item.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
