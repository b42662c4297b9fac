//! Consensus kernels for contig extension.
//!
//! The main kernel is a majority-vote walker with per-read realignment: at
//! every step it emits the majority base across all live overhangs, then
//! advances each overhang's cursor by a two-base local realignment against
//! the emitted base and the majority successor. A read knocked out of phase
//! by a one-base indel rejoins on the next step through the deletion or
//! insertion branch instead of being lost to a full re-alignment.

use log::debug;

/// Nucleotide index mapping: A=0, T=1, G=2, C=3.
pub const NUM_BASES: usize = 4;

const IDX_TO_BASE: [u8; NUM_BASES] = [b'A', b'T', b'G', b'C'];

/// Index of a nucleotide. Anything outside A/T/G/C (N included) is a gap
/// and contributes to no count.
pub fn base_to_idx(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'T' => Some(1),
        b'G' => Some(2),
        b'C' => Some(3),
        _ => None,
    }
}

pub fn idx_to_base(idx: usize) -> u8 {
    IDX_TO_BASE[idx]
}

/// One read's candidate contribution to one contig end.
///
/// The sequence is oriented so the walker always advances forward; for the
/// left contig end that means it is stored reversed. A dropped overhang
/// contributes nothing further and is never revived.
#[derive(Debug, Clone)]
pub struct Overhang {
    pub read_id: u32,
    pub seq: Vec<u8>,
    pub curr_pos: usize,
    pub dropped: bool,
}

impl Overhang {
    pub fn new(read_id: u32, seq: Vec<u8>) -> Self {
        Overhang {
            read_id,
            seq,
            curr_pos: 0,
            dropped: false,
        }
    }

    /// A read attached to a contig end but currently unusable; the
    /// refinement loop schedules it for re-alignment.
    pub fn placeholder(read_id: u32) -> Self {
        Overhang {
            read_id,
            seq: Vec::new(),
            curr_pos: 0,
            dropped: true,
        }
    }
}

/// Histogram of bases observed at one walker step.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseCounter {
    pub count: [u32; NUM_BASES],
    /// Sum of all counts.
    pub coverage: u32,
    /// Argmax over counts; ties resolve to the lowest index.
    pub max_idx: usize,
}

impl BaseCounter {
    pub fn from_counts(count: [u32; NUM_BASES]) -> Self {
        let mut max_idx = 0;
        for i in 1..NUM_BASES {
            if count[i] > count[max_idx] {
                max_idx = i;
            }
        }
        BaseCounter {
            count,
            coverage: count.iter().sum(),
            max_idx,
        }
    }
}

/// Counts bases at `curr_pos + offset` across live overhangs whose current
/// base passes `eligible`. Cursors parked outside the sequence contribute
/// nothing, as do non-ACGT bases.
pub fn count_bases<F>(overhangs: &[Overhang], offset: usize, eligible: F) -> BaseCounter
where
    F: Fn(u8) -> bool,
{
    let mut count = [0u32; NUM_BASES];

    for ov in overhangs {
        if ov.dropped {
            continue;
        }
        let Some(&current) = ov.seq.get(ov.curr_pos) else {
            continue;
        };
        if !eligible(current) {
            continue;
        }
        let Some(&sampled) = ov.seq.get(ov.curr_pos + offset) else {
            continue;
        };
        if let Some(idx) = base_to_idx(sampled) {
            count[idx] += 1;
        }
    }

    BaseCounter::from_counts(count)
}

/// Majority-vote consensus with per-read realignment.
///
/// Emits one base per step while two gates hold: coverage of the current
/// vote at least `min_coverage`, and coverage of the look-ahead vote
/// (restricted to reads agreeing with the emitted base) at least
/// `lookahead_factor * min_coverage`. After each emission every live
/// overhang advances by the first matching rule: match, deletion (cursor
/// holds), mismatch, insertion (cursor skips one), or drop.
///
/// Deterministic under any permutation of the overhang list.
pub fn walk(overhangs: &mut [Overhang], min_coverage: u32, lookahead_factor: f64) -> Vec<u8> {
    let mut extension = Vec::new();

    for step in 0.. {
        let bases = count_bases(overhangs, 0, |_| true);
        if bases.coverage < min_coverage {
            debug!("step {}: coverage {} below minimum, stopping", step, bases.coverage);
            break;
        }

        let output_base = idx_to_base(bases.max_idx);

        // Successor vote among reads that agree on the emitted base. Both
        // votes together decide whether to emit and how cursors advance.
        let next_bases = count_bases(overhangs, 1, |c| c == output_base);
        if (next_bases.coverage as f64) < lookahead_factor * min_coverage as f64 {
            debug!(
                "step {}: look-ahead coverage {} too low, stopping",
                step, next_bases.coverage
            );
            break;
        }

        extension.push(output_base);
        let next_mv = idx_to_base(next_bases.max_idx);

        debug!(
            "step {}: emit {} counts {:?} next {}",
            step, output_base as char, bases.count, next_mv as char
        );

        for ov in overhangs.iter_mut() {
            if ov.dropped {
                continue;
            }
            // the two-base realignment needs the current base and its successor
            if ov.curr_pos + 1 >= ov.seq.len() {
                ov.dropped = true;
                continue;
            }

            let current = ov.seq[ov.curr_pos];
            let next = ov.seq[ov.curr_pos + 1];

            if current == output_base {
                // match
                ov.curr_pos += 1;
            } else if current == next_mv {
                // deletion: the emitted base is absent from this read
            } else if next == next_mv {
                // mismatch
                ov.curr_pos += 1;
            } else if next == output_base {
                // insertion: this read carries an extra base
                ov.curr_pos += 2;
            } else {
                ov.dropped = true;
            }
        }
    }

    extension
}

/// Plain per-position majority vote, no realignment, no look-ahead.
///
/// Samples position `i` of every live overhang at step `i` and stops when
/// coverage falls below `min_coverage` or `max_len` bases were emitted.
pub fn simple_vote(overhangs: &[Overhang], min_coverage: u32, max_len: usize) -> Vec<u8> {
    let mut extension = Vec::new();

    for i in 0..max_len {
        let mut count = [0u32; NUM_BASES];
        for ov in overhangs {
            if ov.dropped {
                continue;
            }
            if let Some(idx) = ov.seq.get(i).and_then(|&b| base_to_idx(b)) {
                count[idx] += 1;
            }
        }

        let bases = BaseCounter::from_counts(count);
        if bases.coverage < min_coverage {
            break;
        }
        extension.push(idx_to_base(bases.max_idx));
    }

    extension
}

/// External Partial-Order-Alignment consensus backend.
///
/// The engine treats POA as a black box turning a set of overhang
/// sequences into one consensus sequence; implementations typically wrap a
/// separate POA library or tool.
pub trait PoaBackend: Send + Sync {
    fn consensus(&self, sequences: &[Vec<u8>]) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overhangs(seqs: &[&str]) -> Vec<Overhang> {
        seqs.iter()
            .enumerate()
            .map(|(i, s)| Overhang::new(i as u32, s.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_base_index_mapping() {
        assert_eq!(base_to_idx(b'A'), Some(0));
        assert_eq!(base_to_idx(b't'), Some(1));
        assert_eq!(base_to_idx(b'G'), Some(2));
        assert_eq!(base_to_idx(b'c'), Some(3));
        assert_eq!(base_to_idx(b'N'), None);
        assert_eq!(base_to_idx(b'-'), None);
        for i in 0..NUM_BASES {
            assert_eq!(base_to_idx(idx_to_base(i)), Some(i));
        }
    }

    #[test]
    fn test_counter_tie_lowest_index() {
        let c = BaseCounter::from_counts([2, 2, 0, 0]);
        assert_eq!(c.max_idx, 0);
        let c = BaseCounter::from_counts([0, 1, 3, 3]);
        assert_eq!(c.max_idx, 2);
        assert_eq!(c.coverage, 7);
    }

    #[test]
    fn test_pure_majority() {
        let mut ovs = overhangs(&["ACGT"; 10]);
        let ext = walk(&mut ovs, 5, 0.6);
        assert_eq!(ext, b"ACG");
        // nothing fell out of consensus
        assert!(ovs.iter().all(|ov| !ov.dropped));
    }

    #[test]
    fn test_coverage_cliff() {
        let mut ovs = overhangs(&["AAAA"; 4]);
        assert!(walk(&mut ovs, 5, 0.6).is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(walk(&mut [], 5, 0.6).is_empty());
    }

    #[test]
    fn test_single_base_overhangs() {
        // a tentative step-0 emission exists but the look-ahead has nothing
        // to vote on, so nothing is emitted
        let mut ovs = overhangs(&["A"; 10]);
        assert!(walk(&mut ovs, 5, 0.6).is_empty());
    }

    #[test]
    fn test_step0_tie_resolves_to_lowest_index() {
        let mut ovs = overhangs(&["AC", "AC", "AC", "TC", "TC", "TC"]);
        let ext = walk(&mut ovs, 5, 0.6);
        assert_eq!(ext.first(), Some(&b'A'));

        let mut ovs = overhangs(&["GA", "GA", "GA", "CA", "CA", "CA"]);
        let ext = walk(&mut ovs, 5, 0.6);
        assert_eq!(ext.first(), Some(&b'G'));
    }

    #[test]
    fn test_deletion_rejoin() {
        // five reads lost the C after the initial A; they hold their cursor
        // on the deletion branch and rejoin at the G
        let mut seqs = vec!["ACGT"; 6];
        seqs.extend(["AGT"; 5]);
        let mut ovs = overhangs(&seqs);

        let ext = walk(&mut ovs, 5, 0.6);
        assert_eq!(ext, b"ACG");
        assert!(ovs.iter().all(|ov| !ov.dropped));
    }

    #[test]
    fn test_insertion_rejoin() {
        // five reads carry an extra T after the initial A; the insertion
        // branch skips it and they rejoin at the G
        let mut seqs = vec!["ACGT"; 6];
        seqs.extend(["ATCGT"; 5]);
        let mut ovs = overhangs(&seqs);

        let ext = walk(&mut ovs, 5, 0.6);
        assert_eq!(ext, b"ACG");
        assert!(ovs.iter().all(|ov| !ov.dropped));
    }

    #[test]
    fn test_divergent_reads_dropped() {
        let mut seqs = vec!["AACCC"; 6];
        seqs.extend(["AGGGG"; 5]);
        let mut ovs = overhangs(&seqs);

        let ext = walk(&mut ovs, 5, 0.6);
        assert_eq!(ext, b"AACC");
        assert_eq!(ovs.iter().filter(|ov| ov.dropped).count(), 5);
        // survivors advanced monotonically and stay in bounds
        for ov in ovs.iter().filter(|ov| !ov.dropped) {
            assert!(ov.curr_pos < ov.seq.len());
        }
    }

    #[test]
    fn test_permutation_invariance() {
        let mut seqs = vec!["ACGT"; 6];
        seqs.extend(["AGT"; 5]);

        let mut forward = overhangs(&seqs);
        let expected = walk(&mut forward, 5, 0.6);

        let mut reversed_order: Vec<Overhang> = overhangs(&seqs).into_iter().rev().collect();
        assert_eq!(walk(&mut reversed_order, 5, 0.6), expected);

        let mut interleaved: Vec<Overhang> = Vec::new();
        let all = overhangs(&seqs);
        for i in 0..all.len() {
            let j = if i % 2 == 0 { i / 2 } else { all.len() - 1 - i / 2 };
            interleaved.push(all[j].clone());
        }
        assert_eq!(walk(&mut interleaved, 5, 0.6), expected);
    }

    #[test]
    fn test_simple_vote() {
        let ovs = overhangs(&["ACGT", "ACGT", "ACGA"]);
        assert_eq!(simple_vote(&ovs, 3, 1000), b"ACGT");
        // length cap
        assert_eq!(simple_vote(&ovs, 3, 2), b"AC");
        // coverage gate: the shortest read ends first
        let ovs = overhangs(&["ACGT", "ACG", "AC"]);
        assert_eq!(simple_vote(&ovs, 3, 1000), b"AC");
    }
}
