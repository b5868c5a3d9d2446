//! Deterministic lexical embedding and cosine similarity.
//!
//! Feature hashing over normalized tokens. This is not a neural model; it
//! is stable and offline, which is what near-duplicate detection during
//! merge needs.

use blake3::Hasher;

use super::normalize::tokens;

/// Default embedding dimensionality.
pub const DEFAULT_EMBEDDING_DIM: usize = 256;

/// Embeds `text` with [`DEFAULT_EMBEDDING_DIM`] buckets.
#[must_use]
pub fn lexical_embedding(text: &str) -> Vec<f32> {
    lexical_embedding_with_dim(text, DEFAULT_EMBEDDING_DIM)
}

/// Embeds `text` into `dim` buckets, L2-normalized.
#[must_use]
pub fn lexical_embedding_with_dim(text: &str, dim: usize) -> Vec<f32> {
    if dim == 0 {
        return Vec::new();
    }

    let mut vec = vec![0.0f32; dim];
    for token in tokens(text) {
        let mut h = Hasher::new();
        h.update(token.to_lowercase().as_bytes());
        let hash = h.finalize();
        let bytes = hash.as_bytes();

        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        let bucket = u64::from_le_bytes(word);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (bucket % dim as u64) as usize;
        let sign = if (bytes[8] & 1) == 0 { 1.0f32 } else { -1.0f32 };
        vec[idx] += sign;
    }

    let norm2: f64 = vec.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    if norm2 > 0.0 {
        #[allow(clippy::cast_possible_truncation)]
        let inv = norm2.sqrt().recip() as f32;
        for x in &mut vec {
            *x *= inv;
        }
    }
    vec
}

/// Cosine similarity of two embeddings; 0 if either is zero or the
/// dimensions differ.
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += f64::from(x) * f64::from(y);
        na += f64::from(x) * f64::from(x);
        nb += f64::from(y) * f64::from(y);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Similarity of two texts in `[-1, 1]`.
#[must_use]
pub fn text_similarity(a: &str, b: &str) -> f64 {
    cosine(&lexical_embedding(a), &lexical_embedding(b))
}
