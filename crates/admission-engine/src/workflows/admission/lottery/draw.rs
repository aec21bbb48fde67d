use sha2::{Digest, Sha256};

use super::super::domain::CandidateId;
use super::record::LotteryRecord;

/// Label stored on every record so a draw can be replayed by an independent tool.
pub const ALGORITHM: &str = "sha256-ctr-fisher-yates/v1";

const FIELD_SEPARATOR: [u8; 1] = [0x1f];

/// SHA-256 over the algorithm label, effective seed, and canonical participant list.
pub(crate) fn seed_digest(seed: &str, participants: &[CandidateId]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ALGORITHM.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(seed.as_bytes());
    for participant in participants {
        hasher.update(FIELD_SEPARATOR);
        hasher.update(participant.0.as_bytes());
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Counter-mode stream: block `n` is `SHA-256(seed_digest || n)`.
struct DigestStream {
    seed: [u8; 32],
    counter: u64,
}

impl DigestStream {
    fn new(seed: [u8; 32]) -> Self {
        Self { seed, counter: 0 }
    }

    fn next_u64(&mut self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_be_bytes());
        self.counter += 1;
        let block = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&block[..8]);
        u64::from_be_bytes(word)
    }

    /// Uniform value in `0..bound` using rejection sampling (no modulo bias).
    fn below(&mut self, bound: u64) -> u64 {
        let limit = u64::MAX - (u64::MAX % bound);
        loop {
            let value = self.next_u64();
            if value < limit {
                return value % bound;
            }
        }
    }
}

/// Fisher-Yates shuffle of `participants` driven by the digest stream.
pub(crate) fn permute(participants: &[CandidateId], seed_digest: [u8; 32]) -> Vec<CandidateId> {
    let mut order = participants.to_vec();
    let mut stream = DigestStream::new(seed_digest);
    for index in (1..order.len()).rev() {
        let pick = stream.below(index as u64 + 1) as usize;
        order.swap(index, pick);
    }
    order
}

/// Fingerprint over every field of the record except the fingerprint itself.
pub(crate) fn record_digest(record: &LotteryRecord) -> String {
    let mut hasher = Sha256::new();
    let mut field = |bytes: &[u8]| {
        hasher.update(bytes);
        hasher.update(FIELD_SEPARATOR);
    };

    field(record.lottery_id.0.as_bytes());
    field(record.cycle_id.0.as_bytes());
    field(record.cohort_key.to_string().as_bytes());
    for participant in &record.cohort_candidate_ids {
        field(participant.0.as_bytes());
    }
    field(record.seed.as_bytes());
    field(record.algorithm.as_bytes());
    field(record.executed_at.to_rfc3339().as_bytes());
    for candidate in &record.result_order {
        field(candidate.0.as_bytes());
    }
    field(record.seed_digest.as_bytes());

    to_hex(&hasher.finalize())
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<CandidateId> {
        raw.iter().map(|id| CandidateId::from(*id)).collect()
    }

    #[test]
    fn permutation_is_deterministic_for_seed() {
        let participants = ids(&["A", "B", "C", "D", "E"]);
        let digest = seed_digest("acta-07|2025-03-01T10:00:00Z", &participants);

        let first = permute(&participants, digest);
        let second = permute(&participants, digest);

        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, participants, "draw is a permutation");
    }

    #[test]
    fn seed_changes_the_digest() {
        let participants = ids(&["A", "B"]);
        assert_ne!(
            seed_digest("X", &participants),
            seed_digest("Y", &participants)
        );
        assert_ne!(
            seed_digest("X", &participants),
            seed_digest("X", &ids(&["A", "C"]))
        );
    }

    #[test]
    fn different_seeds_reach_every_order_of_a_pair() {
        let participants = ids(&["A", "B"]);
        let orders: std::collections::BTreeSet<Vec<CandidateId>> = (0..32)
            .map(|n| permute(&participants, seed_digest(&format!("seed-{n}"), &participants)))
            .collect();
        assert_eq!(orders.len(), 2);
    }

    #[test]
    fn stream_stays_below_bound() {
        let mut stream = DigestStream::new([7u8; 32]);
        for bound in 1..50u64 {
            assert!(stream.below(bound) < bound);
        }
    }

    #[test]
    fn hex_encoding_is_lowercase_and_padded() {
        assert_eq!(to_hex(&[0x00, 0x0f, 0xab]), "000fab");
    }
}
