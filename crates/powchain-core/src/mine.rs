use crate::pow::{meets_target, nonce_hash};
use rayon::prelude::*;
use tracing::info;

/// Parallel nonce search over the u64 range. Rayon splits the range across
/// threads, so the returned nonce satisfies the target but is not
/// necessarily the smallest one. Callers record it on the block before the
/// block becomes visible in any chain, same as the sequential search.
pub fn search_parallel(content_hash: &str, difficulty: usize) -> u64 {
    let found = (0u64..u64::MAX)
        .into_par_iter()
        .find_any(|nonce| meets_target(&nonce_hash(content_hash, *nonce), difficulty))
        .expect("nonce space exhausted (practically impossible)");

    info!(nonce = found, difficulty, "parallel search found nonce");
    found
}
