//! Round Commitment Protocol
//!
//! Commit to the round seed before the multiplier starts, reveal it at the
//! crash. Anyone holding the reveal can check the commitment and recompute the
//! crash point.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::game::crash_point::{crash_point_from_seed, CrashPoint};

/// Domain separator for commitments.
const COMMITMENT_DOMAIN: &[u8] = b"CRASH_ROUND_COMMIT_V1";

/// SHA-256 commitment to one round's server seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCommitment {
    /// Round the commitment belongs to.
    pub round_id: u64,
    /// Commitment hash (published at round start).
    pub hash: [u8; 32],
}

/// Secret material published once the round has crashed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReveal {
    /// Round the seed belongs to.
    pub round_id: u64,
    /// The server seed the crash point was derived from.
    pub server_seed: [u8; 32],
}

impl RoundReveal {
    /// Hex form sent on the wire.
    pub fn seed_hex(&self) -> String {
        hex::encode(self.server_seed)
    }
}

/// Reasons a reveal fails verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FairnessError {
    /// Reveal belongs to another round.
    #[error("round mismatch: committed {committed}, revealed {revealed}")]
    RoundMismatch {
        /// Round in the commitment.
        committed: u64,
        /// Round in the reveal.
        revealed: u64,
    },

    /// Seed does not hash to the commitment.
    #[error("seed does not match commitment")]
    SeedMismatch,

    /// Seed is valid but the announced crash point is not the derived one.
    #[error("crash point mismatch: expected {expected}, announced {announced}")]
    CrashPointMismatch {
        /// Crash point derived from the seed.
        expected: CrashPoint,
        /// Crash point that was broadcast.
        announced: CrashPoint,
    },
}

impl RoundCommitment {
    /// Commit to `server_seed` for `round_id`.
    pub fn new(round_id: u64, server_seed: &[u8; 32]) -> Self {
        Self {
            round_id,
            hash: compute_commitment_hash(round_id, server_seed),
        }
    }

    /// Hex form sent on the wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Check that `reveal` opens this commitment.
    pub fn verify(&self, reveal: &RoundReveal) -> Result<(), FairnessError> {
        if reveal.round_id != self.round_id {
            return Err(FairnessError::RoundMismatch {
                committed: self.round_id,
                revealed: reveal.round_id,
            });
        }
        if compute_commitment_hash(reveal.round_id, &reveal.server_seed) != self.hash {
            return Err(FairnessError::SeedMismatch);
        }
        Ok(())
    }

    /// Check the reveal and that `announced` is the crash point it implies.
    pub fn verify_crash(
        &self,
        reveal: &RoundReveal,
        announced: CrashPoint,
    ) -> Result<(), FairnessError> {
        self.verify(reveal)?;
        let expected = crash_point_from_seed(&reveal.server_seed, reveal.round_id);
        if expected != announced {
            return Err(FairnessError::CrashPointMismatch { expected, announced });
        }
        Ok(())
    }
}

fn compute_commitment_hash(round_id: u64, server_seed: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update(round_id.to_le_bytes());
    hasher.update(server_seed);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::crash_point::{CrashPointSource, FairCrashPoints};

    #[test]
    fn test_commitment_verifies() {
        let seed = [42u8; 32];
        let commitment = RoundCommitment::new(3, &seed);
        let reveal = RoundReveal { round_id: 3, server_seed: seed };
        assert!(commitment.verify(&reveal).is_ok());
    }

    #[test]
    fn test_wrong_seed_rejected() {
        let commitment = RoundCommitment::new(3, &[1u8; 32]);
        let reveal = RoundReveal { round_id: 3, server_seed: [2u8; 32] };
        assert_eq!(commitment.verify(&reveal), Err(FairnessError::SeedMismatch));
    }

    #[test]
    fn test_wrong_round_rejected() {
        let seed = [1u8; 32];
        let commitment = RoundCommitment::new(3, &seed);
        let reveal = RoundReveal { round_id: 4, server_seed: seed };
        assert!(matches!(
            commitment.verify(&reveal),
            Err(FairnessError::RoundMismatch { committed: 3, revealed: 4 })
        ));
    }

    #[test]
    fn test_verify_drawn_crash() {
        let mut source = FairCrashPoints::seeded(11);
        let crash = source.draw(1);
        assert!(crash.commitment.verify_crash(&crash.reveal, crash.crash_point).is_ok());

        let tampered = CrashPoint::from_hundredths(crash.crash_point.hundredths() % 500 + 101);
        assert!(matches!(
            crash.commitment.verify_crash(&crash.reveal, tampered),
            Err(FairnessError::CrashPointMismatch { .. })
        ));
    }

    #[test]
    fn test_hex_lengths() {
        let commitment = RoundCommitment::new(0, &[0u8; 32]);
        assert_eq!(commitment.to_hex().len(), 64);
        let reveal = RoundReveal { round_id: 0, server_seed: [0xab; 32] };
        assert!(reveal.seed_hex().starts_with("abab"));
    }
}
