// End-to-end tests for the correction engine over the in-memory index.

use ferrous_refine::alphabet::{comp, encode, revcomp};
use ferrous_refine::correct::{apply, collect, run_correction, CorrStore, EcOpt};
use ferrous_refine::fm_index::{FmIndex, ReadIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 60 bp with no repeated 13-mer on either strand, so every window in a
/// clean pile of copies classifies with a single solid branch.
const BASE: &[u8] = b"AAGCCCAATAAACCACTCTGACTGGCCGAATAGGGATATAGGCAACGACATGTGCGGCGA";

const ERR_READ: usize = 7;
const ERR_POS: usize = 30;

/// 30 copies of BASE, one of them with a single substitution.
fn pile_with_error() -> Vec<Vec<u8>> {
    let clean = encode(BASE);
    let mut reads = vec![clean; 30];
    reads[ERR_READ][ERR_POS] = (reads[ERR_READ][ERR_POS] + 1) % 4;
    reads
}

fn parse_fasta(out: &[u8]) -> Vec<Vec<u8>> {
    let text = std::str::from_utf8(out).unwrap();
    let mut seqs = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if i % 2 == 0 {
            assert_eq!(line, format!(">{}", i / 2));
        } else {
            seqs.push(encode(line.as_bytes()));
        }
    }
    seqs
}

#[test]
fn test_single_substitution_is_corrected() {
    let reads = pile_with_error();
    let idx = ReadIndex::new(&reads);
    let opt = EcOpt::new(13, 5);

    let mut out = Vec::new();
    run_correction(&idx, &opt, &mut out).unwrap();
    let corrected = parse_fasta(&out);

    let clean = encode(BASE);
    assert_eq!(corrected.len(), 30);
    assert_eq!(corrected[ERR_READ], clean, "error read not restored");
    for (i, seq) in corrected.iter().enumerate() {
        assert_eq!(seq, &clean, "read {} changed", i);
    }
}

#[test]
fn test_collection_records_both_orientations_once() {
    let reads = pile_with_error();
    let idx = ReadIndex::new(&reads);
    let mut store = collect(&idx, &EcOpt::new(13, 5));
    store.sort();

    // one record against the forward orientation, one against the reverse
    // complement, nothing else
    assert_eq!(store.len(), 2);
    let mut recs = Vec::new();
    store.lookup(2 * ERR_READ as u64, &mut recs);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].off_end() as usize, BASE.len() - 1 - ERR_POS);
    assert_eq!(recs[0].to(), encode(BASE)[ERR_POS]);
    recs.clear();
    store.lookup(2 * ERR_READ as u64 + 1, &mut recs);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].to(), comp(encode(BASE)[ERR_POS]));
}

#[test]
fn test_reverse_complement_read_is_corrected() {
    // same pile, but the erroneous read enters in the opposite orientation
    let mut reads = pile_with_error();
    reads[ERR_READ] = revcomp(&reads[ERR_READ]);
    let idx = ReadIndex::new(&reads);

    let mut out = Vec::new();
    run_correction(&idx, &EcOpt::new(13, 5), &mut out).unwrap();
    let corrected = parse_fasta(&out);

    assert_eq!(corrected[ERR_READ], revcomp(&encode(BASE)));
    let clean = encode(BASE);
    for (i, seq) in corrected.iter().enumerate().filter(|(i, _)| *i != ERR_READ) {
        assert_eq!(seq, &clean, "read {} changed", i);
    }
}

#[test]
fn test_collection_deterministic_across_pool_sizes() {
    let mut rng = StdRng::seed_from_u64(0xec5eed);
    let template: Vec<u8> = (0..80).map(|_| rng.gen_range(0..4u8)).collect();
    let mut reads = vec![template; 20];
    for r in reads.iter_mut().step_by(3) {
        let p = rng.gen_range(0..80);
        r[p] = (r[p] + rng.gen_range(1..4u8)) % 4;
    }
    let idx = ReadIndex::new(&reads);
    let opt = EcOpt::new(13, 5);

    let run = |threads: usize| {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap();
        let mut store = pool.install(|| collect(&idx, &opt));
        store.sort();
        store.snapshot()
    };
    assert_eq!(run(1), run(4));
}

#[test]
fn test_apply_lifts_offsets_and_strand() {
    let reads = vec![encode(b"ACGTACGTAC"), encode(b"TTTTGGGG")];
    let idx = ReadIndex::new(&reads);
    let mut store = CorrStore::new(idx.num_seqs());
    // forward record: offset 2 from the end of read 0 is position 7
    store.record(0, 2, 0 /* A */, 3 /* T */);
    // reverse-complement record: offset 4 lifts to forward position 4,
    // symbol complemented
    store.record(1, 4, 3 /* T */, 0 /* A */);
    store.sort();

    let mut out = Vec::new();
    apply(&idx, &store, 0, 1, &mut out).unwrap();
    let seqs = parse_fasta(&out);
    assert_eq!(seqs[0], encode(b"ACGTTCGTAC"));
    assert_eq!(seqs[1], encode(b"TTTTGGGG"));
}

#[test]
fn test_apply_interleaved_partitions() {
    let reads = vec![
        encode(b"ACGTACGTAC"),
        encode(b"TTTTGGGG"),
        encode(b"CCCCAAAA"),
    ];
    let idx = ReadIndex::new(&reads);
    let store = CorrStore::new(idx.num_seqs());

    let mut even = Vec::new();
    apply(&idx, &store, 0, 2, &mut even).unwrap();
    let mut odd = Vec::new();
    apply(&idx, &store, 1, 2, &mut odd).unwrap();

    let even = String::from_utf8(even).unwrap();
    let odd = String::from_utf8(odd).unwrap();
    assert!(even.contains(">0\n") && even.contains(">2\n") && !even.contains(">1\n"));
    assert!(odd.contains(">1\n") && !odd.contains(">0\n") && !odd.contains(">2\n"));
}
