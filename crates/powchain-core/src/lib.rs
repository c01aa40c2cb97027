use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod constants;
pub mod mine;

pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("nonce is not set; the block has not been mined")]
    UnsetNonce,
    #[error("block {index} does not link to the tip: previous_hash {supplied} != {expected}")]
    InvalidLink {
        index: u64,
        supplied: String,
        expected: String,
    },
    #[error("expected block index {expected}, got {found}")]
    IndexMismatch { expected: u64, found: u64 },
    #[error("content hash of block {index} does not match its fields")]
    HashMismatch { index: u64 },
    #[error("block {index} fails proof of work at difficulty {difficulty}")]
    InvalidProofOfWork { index: u64, difficulty: usize },
    #[error("no nonce met difficulty {difficulty} within {limit} attempts")]
    DifficultyUnreachable { difficulty: usize, limit: u64 },
}

/// One hash-bound record in the chain.
///
/// The content hash covers `index`, `timestamp`, `previous_hash` and
/// `transaction`; rewriting any of them changes the hash and breaks the link
/// in every later block. Fields are private and immutable after construction.
/// The nonce is the single late-binding write, recorded once mining succeeds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    timestamp: u64,
    previous_hash: String,
    transaction: String,
    content_hash: String,
    nonce: Option<u64>,
}

/// Canonical hash input. Declared in lexicographic key order, which is the
/// key order serde_json emits, so the serialized form is stable.
#[derive(Serialize)]
struct HashInput<'a> {
    index: u64,
    previous_hash: &'a str,
    timestamp: u64,
    transaction: &'a str,
}

impl Block {
    pub fn new(
        index: u64,
        previous_hash: impl Into<String>,
        transaction: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        let previous_hash = previous_hash.into();
        let transaction = transaction.into();
        let content_hash = content_hash(index, &previous_hash, timestamp, &transaction);
        Self {
            index,
            timestamp,
            previous_hash,
            transaction,
            content_hash,
            nonce: None,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    /// The content hash, lowercase hex.
    pub fn hash(&self) -> &str {
        &self.content_hash
    }

    /// Records the winning nonce. Setting it twice is a logic error.
    pub fn set_nonce(&mut self, nonce: u64) {
        debug_assert!(self.nonce.is_none(), "nonce set twice on block {}", self.index);
        self.nonce = Some(nonce);
    }

    /// `None` until the block has been mined.
    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    /// Hex digest of `SHA256(content_hash || decimal(nonce))`. Errors when
    /// the nonce is unset rather than hashing a placeholder.
    pub fn hash_with_nonce(&self) -> Result<String> {
        let nonce = self.nonce.ok_or(ChainError::UnsetNonce)?;
        Ok(pow::nonce_hash(&self.content_hash, nonce))
    }
}

/// SHA-256 over the canonical four-key JSON serialization, lowercase hex.
pub fn content_hash(index: u64, previous_hash: &str, timestamp: u64, transaction: &str) -> String {
    let input = HashInput {
        index,
        previous_hash,
        timestamp,
        transaction,
    };
    let json = serde_json::to_vec(&input).expect("hash input serializes");
    sha256_hex(&json)
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs()
}

pub mod pow {
    //! Proof-of-work: brute-force nonce search against a leading-zero target.

    /// The target a digest prefix must match: `difficulty` zero characters.
    pub fn target_prefix(difficulty: usize) -> String {
        "0".repeat(difficulty)
    }

    /// Digest of the content hash joined with the decimal nonce.
    pub fn nonce_hash(content_hash: &str, nonce: u64) -> String {
        let joined = format!("{content_hash}{nonce}");
        super::sha256_hex(joined.as_bytes())
    }

    /// Whether the hex digest starts with `difficulty` zeros.
    pub fn meets_target(digest: &str, difficulty: usize) -> bool {
        digest.len() >= difficulty && digest.as_bytes()[..difficulty].iter().all(|b| *b == b'0')
    }

    /// Linear search from nonce 0. Returns the smallest satisfying nonce.
    /// Unbounded: runs until the target is met, blocking the calling thread.
    pub fn search(content_hash: &str, difficulty: usize) -> u64 {
        let mut nonce = 0u64;
        loop {
            if meets_target(&nonce_hash(content_hash, nonce), difficulty) {
                return nonce;
            }
            nonce += 1;
        }
    }

    /// Like [`search`], but gives up after `limit` attempts.
    pub fn search_bounded(content_hash: &str, difficulty: usize, limit: u64) -> crate::Result<u64> {
        for nonce in 0..limit {
            if meets_target(&nonce_hash(content_hash, nonce), difficulty) {
                return Ok(nonce);
            }
        }
        Err(crate::ChainError::DifficultyUnreachable { difficulty, limit })
    }
}

pub mod chain {
    use super::*;
    use tracing::info;

    /// Append-only sequence of mined blocks. The chain owns its blocks; read
    /// access is by shared reference only, and a block becomes visible in the
    /// sequence only after a winning nonce has been recorded on it.
    #[derive(Debug)]
    pub struct Chain {
        blocks: Vec<Block>,
        difficulty: usize,
        max_attempts: Option<u64>,
    }

    impl Default for Chain {
        fn default() -> Self {
            Self::new(constants::DEFAULT_DIFFICULTY)
        }
    }

    impl Chain {
        pub fn new(difficulty: usize) -> Self {
            Self {
                blocks: Vec::new(),
                difficulty,
                max_attempts: None,
            }
        }

        /// Caps the nonce search; appends then fail with
        /// `DifficultyUnreachable` instead of looping forever.
        pub fn with_max_attempts(mut self, limit: u64) -> Self {
            self.max_attempts = Some(limit);
            self
        }

        pub fn difficulty(&self) -> usize {
            self.difficulty
        }

        pub fn len(&self) -> usize {
            self.blocks.len()
        }

        pub fn is_empty(&self) -> bool {
            self.blocks.is_empty()
        }

        pub fn at(&self, index: usize) -> Option<&Block> {
            self.blocks.get(index)
        }

        pub fn tip(&self) -> Option<&Block> {
            self.blocks.last()
        }

        pub fn iter(&self) -> std::slice::Iter<'_, Block> {
            self.blocks.iter()
        }

        fn tip_hash(&self) -> &str {
            self.blocks
                .last()
                .map(Block::hash)
                .unwrap_or(constants::GENESIS_PREVIOUS_HASH)
        }

        /// Builds the next block for `transaction` with a wall-clock
        /// timestamp, mines it, and appends it.
        pub fn append_transaction(&mut self, transaction: impl Into<String>) -> Result<&Block> {
            self.append_transaction_at(transaction, unix_timestamp())
        }

        /// Same as [`append_transaction`](Self::append_transaction) with a
        /// caller-supplied timestamp, for reproducible hashes.
        pub fn append_transaction_at(
            &mut self,
            transaction: impl Into<String>,
            timestamp: u64,
        ) -> Result<&Block> {
            let index = self.blocks.len() as u64;
            let previous_hash = self.tip_hash().to_owned();
            let mut block = Block::new(index, previous_hash, transaction, timestamp);
            let nonce = match self.max_attempts {
                Some(limit) => pow::search_bounded(block.hash(), self.difficulty, limit)?,
                None => pow::search(block.hash(), self.difficulty),
            };
            block.set_nonce(nonce);
            info!(index, nonce, hash = block.hash(), "mined block");
            self.blocks.push(block);
            Ok(self.blocks.last().expect("block was just pushed"))
        }

        /// Appends an externally constructed block. The block must carry the
        /// next index, link to the current tip, and hold a nonce whose
        /// combined digest meets the chain difficulty.
        pub fn append_block(&mut self, block: Block) -> Result<()> {
            let expected = self.blocks.len() as u64;
            if block.index() != expected {
                return Err(ChainError::IndexMismatch {
                    expected,
                    found: block.index(),
                });
            }
            if block.previous_hash() != self.tip_hash() {
                return Err(ChainError::InvalidLink {
                    index: block.index(),
                    supplied: block.previous_hash().to_owned(),
                    expected: self.tip_hash().to_owned(),
                });
            }
            let recomputed = content_hash(
                block.index(),
                block.previous_hash(),
                block.timestamp(),
                block.transaction(),
            );
            if recomputed != block.hash() {
                return Err(ChainError::HashMismatch {
                    index: block.index(),
                });
            }
            let digest = block.hash_with_nonce()?;
            if !pow::meets_target(&digest, self.difficulty) {
                return Err(ChainError::InvalidProofOfWork {
                    index: block.index(),
                    difficulty: self.difficulty,
                });
            }
            self.blocks.push(block);
            Ok(())
        }

        /// Full audit: recomputes every content hash, checks every link and
        /// every proof of work. Catches blocks tampered with after
        /// deserialization.
        pub fn verify(&self) -> Result<()> {
            for (i, block) in self.blocks.iter().enumerate() {
                let recomputed = content_hash(
                    block.index(),
                    block.previous_hash(),
                    block.timestamp(),
                    block.transaction(),
                );
                if recomputed != block.hash() {
                    return Err(ChainError::HashMismatch {
                        index: block.index(),
                    });
                }
                let expected_prev = if i == 0 {
                    constants::GENESIS_PREVIOUS_HASH
                } else {
                    self.blocks[i - 1].hash()
                };
                if block.previous_hash() != expected_prev {
                    return Err(ChainError::InvalidLink {
                        index: block.index(),
                        supplied: block.previous_hash().to_owned(),
                        expected: expected_prev.to_owned(),
                    });
                }
                let digest = block.hash_with_nonce()?;
                if !pow::meets_target(&digest, self.difficulty) {
                    return Err(ChainError::InvalidProofOfWork {
                        index: block.index(),
                        difficulty: self.difficulty,
                    });
                }
            }
            Ok(())
        }
    }

    impl<'a> IntoIterator for &'a Chain {
        type Item = &'a Block;
        type IntoIter = std::slice::Iter<'a, Block>;

        fn into_iter(self) -> Self::IntoIter {
            self.iter()
        }
    }
}
