// Full-text index interface consumed by the correction engine.
//
// The engine treats the index as an oracle: an interval stands for every
// occurrence of some string across all indexed sequences, `extend` partitions
// an interval by the next symbol, and rows of the end-of-sequence slot
// identify the sequences that terminate there. `ReadIndex` is the in-memory
// reference implementation backing the CLI and the test-suite; production
// deployments substitute their compressed index behind the same trait.

use crate::alphabet;
use std::cmp::Ordering;

/// A range of index rows sharing a common prefix of length `depth`.
///
/// `depth` is traversal metadata: it names the pattern length the interval
/// represents and is never persisted outside a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FmInterval {
    pub lo: u64,
    pub size: u64,
    pub depth: u32,
}

impl FmInterval {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Extension result slots: 0 = end-of-sequence, 1..=4 = bases A,C,G,T, 5 = N.
pub const EXT_SLOTS: usize = 6;

pub trait FmIndex: Sync {
    /// Number of oriented sequences (two per input read).
    fn num_seqs(&self) -> u64;

    /// Interval of every occurrence of the single symbol `c`.
    fn symbol_interval(&self, c: u8) -> FmInterval;

    /// Partition `ik` by the symbol following the represented prefix.
    /// `out[0]` collects occurrences where the prefix ends a sequence;
    /// `out[1 + b]` extends by base `b`; `out[5]` by the ambiguous symbol.
    fn extend(&self, ik: &FmInterval, out: &mut [FmInterval; EXT_SLOTS]);

    /// Extend by one fixed symbol.
    fn extend_symbol(&self, ik: &FmInterval, c: u8) -> FmInterval {
        let mut out = [FmInterval::default(); EXT_SLOTS];
        self.extend(ik, &mut out);
        out[c as usize + 1]
    }

    /// Oriented sequence id owning `row`; `row` must come from an
    /// end-of-sequence slot.
    fn seq_of_row(&self, row: u64) -> u64;

    /// Decode oriented sequence `coord`. Returns the symbols, the interval of
    /// the full sequence as a pattern, and whether the sequence is contained
    /// in (occurs inside) some other indexed sequence.
    fn retrieve(&self, coord: u64) -> (Vec<u8>, FmInterval, bool);
}

/// Suffix-array-backed reference index over a read set.
///
/// Both orientations of every read are indexed: sequence `2r` is read `r` as
/// given, `2r + 1` is its reverse complement. Construction is the plain
/// comparison sort over all suffixes; fine for the read volumes the CLI and
/// tests feed it, not meant to compete with a compressed index.
pub struct ReadIndex {
    seqs: Vec<Vec<u8>>,
    /// (sequence id, suffix start), sorted by suffix.
    sa: Vec<(u32, u32)>,
}

impl ReadIndex {
    pub fn new(reads: &[Vec<u8>]) -> Self {
        let mut seqs = Vec::with_capacity(reads.len() * 2);
        for r in reads {
            seqs.push(r.clone());
            seqs.push(alphabet::revcomp(r));
        }
        let mut sa = Vec::new();
        for (id, s) in seqs.iter().enumerate() {
            for pos in 0..s.len() {
                sa.push((id as u32, pos as u32));
            }
        }
        sa.sort_unstable_by(|&(ai, ap), &(bi, bp)| {
            let sx = &seqs[ai as usize][ap as usize..];
            let sy = &seqs[bi as usize][bp as usize..];
            // slice order already puts a proper prefix first, which is the
            // end-of-sequence-sorts-lowest convention the intervals rely on
            sx.cmp(sy).then_with(|| (ai, ap).cmp(&(bi, bp)))
        });
        Self { seqs, sa }
    }

    /// Symbol key at `depth` below a suffix: 0 for end-of-sequence,
    /// otherwise symbol + 1. Matches the extension slot numbering.
    #[inline]
    fn key_at(&self, entry: (u32, u32), depth: u32) -> u8 {
        let s = &self.seqs[entry.0 as usize];
        let i = entry.1 as usize + depth as usize;
        if i == s.len() {
            0
        } else {
            s[i] + 1
        }
    }

    fn suffix_vs_pattern(&self, entry: (u32, u32), pat: &[u8]) -> Ordering {
        let s = &self.seqs[entry.0 as usize][entry.1 as usize..];
        for (i, &p) in pat.iter().enumerate() {
            match s.get(i) {
                None => return Ordering::Less,
                Some(&c) if c != p => return c.cmp(&p),
                _ => {}
            }
        }
        // suffix starts with pat
        Ordering::Equal
    }

    /// Interval of every occurrence of `pat`.
    pub fn pattern_interval(&self, pat: &[u8]) -> FmInterval {
        let lo = self
            .sa
            .partition_point(|&e| self.suffix_vs_pattern(e, pat) == Ordering::Less);
        let hi = self
            .sa
            .partition_point(|&e| self.suffix_vs_pattern(e, pat) != Ordering::Greater);
        FmInterval {
            lo: lo as u64,
            size: (hi - lo) as u64,
            depth: pat.len() as u32,
        }
    }
}

impl FmIndex for ReadIndex {
    fn num_seqs(&self) -> u64 {
        self.seqs.len() as u64
    }

    fn symbol_interval(&self, c: u8) -> FmInterval {
        self.pattern_interval(&[c])
    }

    fn extend(&self, ik: &FmInterval, out: &mut [FmInterval; EXT_SLOTS]) {
        let range = &self.sa[ik.lo as usize..(ik.lo + ik.size) as usize];
        let mut bound = [0usize; EXT_SLOTS + 1];
        bound[EXT_SLOTS] = range.len();
        for s in 1..EXT_SLOTS {
            bound[s] = range.partition_point(|&e| (self.key_at(e, ik.depth) as usize) < s);
        }
        for s in 0..EXT_SLOTS {
            out[s] = FmInterval {
                lo: ik.lo + bound[s] as u64,
                size: (bound[s + 1] - bound[s]) as u64,
                // the end-of-sequence slot does not consume a symbol
                depth: if s == 0 { ik.depth } else { ik.depth + 1 },
            };
        }
    }

    fn seq_of_row(&self, row: u64) -> u64 {
        self.sa[row as usize].0 as u64
    }

    fn retrieve(&self, coord: u64) -> (Vec<u8>, FmInterval, bool) {
        let seq = self.seqs[coord as usize].clone();
        let ival = self.pattern_interval(&seq);
        let exact = self.sa[ival.lo as usize..(ival.lo + ival.size) as usize]
            .iter()
            .filter(|&&(id, pos)| pos == 0 && self.seqs[id as usize].len() == seq.len())
            .count() as u64;
        // any occurrence beyond the exact duplicates means some longer
        // sequence contains this one
        (seq, ival, ival.size > exact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::encode;

    fn idx(reads: &[&[u8]]) -> ReadIndex {
        let coded: Vec<Vec<u8>> = reads.iter().map(|r| encode(r)).collect();
        ReadIndex::new(&coded)
    }

    #[test]
    fn test_symbol_interval_counts_both_strands() {
        let ix = idx(&[b"ACGT"]);
        // forward ACGT + reverse complement ACGT: two of each base
        for c in 0..4u8 {
            assert_eq!(ix.symbol_interval(c).size, 2, "base {}", c);
        }
    }

    #[test]
    fn test_extend_partitions_interval() {
        let ix = idx(&[b"ACGA", b"ACT"]);
        let ik = ix.symbol_interval(0); // all A occurrences
        let mut out = [FmInterval::default(); EXT_SLOTS];
        ix.extend(&ik, &mut out);
        let total: u64 = out.iter().map(|o| o.size).sum();
        assert_eq!(total, ik.size);
        // "AC" occurs in both forward reads
        assert_eq!(out[1 + 1].size, 2);
    }

    #[test]
    fn test_sentinel_rows_name_owning_sequences() {
        let ix = idx(&[b"ACG", b"TCG"]);
        // pattern CG is a suffix of both forward reads
        let ik = ix.pattern_interval(&encode(b"CG"));
        let mut out = [FmInterval::default(); EXT_SLOTS];
        ix.extend(&ik, &mut out);
        assert_eq!(out[0].size, 2);
        let mut owners: Vec<u64> = (out[0].lo..out[0].lo + out[0].size)
            .map(|r| ix.seq_of_row(r))
            .collect();
        owners.sort_unstable();
        assert_eq!(owners, vec![0, 2]); // forward orientations of reads 0 and 1
    }

    #[test]
    fn test_retrieve_orientations() {
        let ix = idx(&[b"AACGT"]);
        let (fwd, _, _) = ix.retrieve(0);
        let (rc, _, _) = ix.retrieve(1);
        assert_eq!(fwd, encode(b"AACGT"));
        assert_eq!(rc, crate::alphabet::revcomp(&fwd));
    }

    #[test]
    fn test_containment_flag() {
        let ix = idx(&[b"ACGTACGT", b"GTAC"]);
        let (_, _, contained_long) = ix.retrieve(0);
        let (_, _, contained_short) = ix.retrieve(2);
        assert!(!contained_long);
        assert!(contained_short); // GTAC occurs inside read 0
    }
}
