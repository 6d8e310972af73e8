// Index-guided error correction.
//
// Three phases over the full-text index of a read set:
//   1. parameter estimation: pick the window length `w` and the solid
//      support threshold `T` from genome size, read length, coverage and the
//      per-base error rate;
//   2. collection: walk the index forward from every seed context; at depth
//      `w`, a lone solid branch next to weak ones marks the weak ones as
//      errors, and every divergent position reachable from a weak branch is
//      recorded into a sharded correction table;
//   3. application: sort the shards once, then rewrite every read by
//      merging the corrections recorded against both of its orientations.
//
// Collection is embarrassingly parallel over seed subtrees; the only shared
// mutable state is the shard table, each shard behind a spin lock held for
// exactly one append.

use crate::alphabet;
use crate::fm_index::{FmIndex, FmInterval, EXT_SLOTS};
use rayon::prelude::*;
use std::cell::UnsafeCell;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Seed context length for work distribution: every symbol string of this
/// length roots an independent collection subtree.
const SEED_LEN: usize = 3;

/// Safety margin added on top of the estimated support threshold.
const T_MARGIN: i32 = 2;

/// Correction-run parameters. `estimate_params` fills `w` and `min_solid`;
/// both can also be supplied directly.
#[derive(Debug, Clone)]
pub struct EcOpt {
    /// Window length: depth at which branches are classified.
    pub w: u32,
    /// Minimum support of a solid (trusted) branch.
    pub min_solid: i32,
    /// Maximum support of a branch that may still be corrected away.
    pub max_weak: i32,
    /// Absolute mismatch cap when comparing a weak branch to the solid one.
    pub mm_cap: u32,
    /// Mismatch ratio cap over the compared length.
    pub mm_ratio: f64,
}

impl EcOpt {
    pub fn new(w: u32, min_solid: i32) -> Self {
        Self {
            w,
            min_solid,
            max_weak: min_solid,
            mm_cap: 3,
            mm_ratio: 0.2,
        }
    }

    /// A weak branch must also stay below this fraction of the solid
    /// branch's support, so genuine low-frequency variants survive.
    fn drop_ratio(&self) -> f64 {
        1.0 / self.min_solid as f64 + 1e-6
    }
}

/// `1 - (1-x)^k`.
///
/// In the perturbative regime the alternating binomial series is summed until
/// a term's relative contribution drops below 1e-6; direct evaluation there
/// would lose the answer to rounding. Outside it the closed form is accurate
/// and the series terms would grow combinatorially before converging.
fn one_minus_pow(x: f64, k: i64) -> f64 {
    if x <= 0.0 || k <= 0 {
        return 0.0;
    }
    if x * k as f64 > 0.5 {
        return 1.0 - (k as f64 * (-x).ln_1p()).exp();
    }
    let mut sum = 0.0f64;
    let mut term = x * k as f64; // C(k,1) x
    let mut i = 1i64;
    while i <= k {
        sum += term;
        term *= -x * (k - i) as f64 / (i + 1) as f64;
        if (term / sum).abs() < 1e-6 {
            break;
        }
        i += 1;
    }
    sum
}

/// Estimate `(w, T)` for a genome of size `n`, reads of length `l`, expected
/// coverage `cov` and per-base error probability `p`.
///
/// `w` is the smallest window for which the expected loss of genuine
/// branches to chance k-mer collision falls below 0.01% of the expected
/// error count; `T` is the smallest support at which a genuine branch
/// dominates a spurious one, plus a fixed margin.
pub fn estimate_params(n: i64, l: i32, cov: f64, p: f64) -> (u32, i32) {
    let big_l = ((n as f64) * l as f64 / cov + 0.499) as i64; // total bases
    let e = one_minus_pow(p, l as i64) * n as f64; // expected erroneous reads
    let mut w = 8;
    while w < l {
        let q = one_minus_pow(p, w as i64)
            * (1.0 - p)
            * one_minus_pow(0.25f64.powi(w), big_l)
            * 0.75;
        let d = one_minus_pow(q, (l - w) as i64) * (1.0 - p).powi(l) * n as f64;
        if d < 0.0001 * e {
            break;
        }
        w += 1;
    }
    let qc = (l - w) as f64 / big_l as f64 * (1.0 - p).powi(w + 1);
    let qe = (l - w) as f64 / big_l as f64 * (1.0 / 3.0) * p * (1.0 - p).powi(w);
    let mut k = 1;
    while k < cov as i32 + 1 {
        if qc.powi(k) * (1.0 - qc).powf((n - k as i64) as f64)
            > qe.powi(k) * (1.0 - qe).powf((n - k as i64) as f64)
        {
            break;
        }
        k += 1;
    }
    k += T_MARGIN;
    log::info!(
        "estimated correction parameters for n={}, l={}, c={:.1}: w={}, T={}",
        n,
        l,
        cov,
        w,
        k
    );
    (w as u32, k)
}

/// Shard granularity: 1024 coordinates per shard.
pub const SHARD_SHIFT: u32 = 10;
const SHARD_MASK: u64 = (1 << SHARD_SHIFT) - 1;

/// One packed correction, ordered by (shard-local sequence id, offset).
///
/// Layout: local id << 24 | offset-from-end << 8 | original << 4 | corrected.
/// Offsets count back from the sequence end in the orientation the walk saw
/// (0 = last symbol), so read length is capped at 65535.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CorrRec(u64);

impl CorrRec {
    fn pack(local: u64, off_end: u32, orig: u8, to: u8) -> Self {
        CorrRec(local << 24 | (off_end as u64) << 8 | (orig as u64) << 4 | to as u64)
    }

    #[inline]
    pub fn local(self) -> u64 {
        self.0 >> 24
    }

    #[inline]
    pub fn off_end(self) -> u32 {
        (self.0 >> 8 & 0xffff) as u32
    }

    #[inline]
    pub fn orig(self) -> u8 {
        (self.0 >> 4 & 0xf) as u8
    }

    #[inline]
    pub fn to(self) -> u8 {
        (self.0 & 0xf) as u8
    }
}

/// Test-and-set spin lock. The guarded section is a single `Vec::push`, so
/// waiters only ever spin for O(1) work.
struct ShardLock(AtomicBool);

impl ShardLock {
    fn acquire(&self) {
        while self
            .0
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shard {
    lock: ShardLock,
    recs: UnsafeCell<Vec<CorrRec>>,
}

// Appends take the shard lock; the sorted read-only phase never runs
// concurrently with collection.
unsafe impl Sync for Shard {}

/// Sharded correction table over the index's coordinate space.
/// Append-only during collection, sorted once, then read-only.
pub struct CorrStore {
    shards: Vec<Shard>,
}

impl CorrStore {
    pub fn new(num_seqs: u64) -> Self {
        let n = ((num_seqs + SHARD_MASK) >> SHARD_SHIFT) as usize;
        let shards = (0..n.max(1))
            .map(|_| Shard {
                lock: ShardLock(AtomicBool::new(false)),
                recs: UnsafeCell::new(Vec::new()),
            })
            .collect();
        Self { shards }
    }

    /// Record one correction for oriented sequence `coord`.
    pub fn record(&self, coord: u64, off_end: u32, orig: u8, to: u8) {
        let shard = &self.shards[(coord >> SHARD_SHIFT) as usize];
        let rec = CorrRec::pack(coord & SHARD_MASK, off_end, orig, to);
        shard.lock.acquire();
        unsafe { (*shard.recs.get()).push(rec) };
        shard.lock.release();
    }

    /// Sort every shard by its local key; call once, before any lookup.
    pub fn sort(&mut self) {
        for shard in &mut self.shards {
            shard.recs.get_mut().sort_unstable();
        }
    }

    /// Append all corrections recorded for `coord` (contiguous after sort)
    /// onto `out`.
    pub fn lookup(&self, coord: u64, out: &mut Vec<CorrRec>) {
        let shard = &self.shards[(coord >> SHARD_SHIFT) as usize];
        let recs = unsafe { &*shard.recs.get() };
        let local = coord & SHARD_MASK;
        let lo = recs.partition_point(|r| r.local() < local);
        for r in &recs[lo..] {
            if r.local() != local {
                break;
            }
            out.push(*r);
        }
    }

    /// Total records across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| unsafe { (*s.recs.get()).len() })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattened sorted contents, shard by shard (for determinism checks).
    pub fn snapshot(&self) -> Vec<Vec<CorrRec>> {
        self.shards
            .iter()
            .map(|s| unsafe { (*s.recs.get()).clone() })
            .collect()
    }
}

/// Follow the solid branch from `root` up to its next bifurcation: extend as
/// long as exactly one extension keeps support `>= min_solid`.
fn solid_suffix<I: FmIndex + ?Sized>(idx: &I, root: &FmInterval, min_solid: i32, seq: &mut Vec<u8>) {
    let mut ik = *root;
    let mut out = [FmInterval::default(); EXT_SLOTS];
    loop {
        idx.extend(&ik, &mut out);
        let mut next = None;
        for b in 0..4u8 {
            if out[b as usize + 1].size >= min_solid as u64 {
                if next.is_some() {
                    return; // bifurcation
                }
                next = Some(b);
            }
        }
        match next {
            Some(b) => {
                seq.push(b);
                ik = out[b as usize + 1];
            }
            None => return,
        }
    }
}

/// Walk the whole subtree under a weak branch and record every divergence
/// from the solid suffix that survives the mismatch caps.
///
/// `good` is the solid branch including its first symbol; `first` is the weak
/// branch's divergent symbol. Corrections are recorded whenever the walk
/// reaches sequence ends, one per occurrence, keyed by offset from the end.
fn record_branch<I: FmIndex + ?Sized>(
    idx: &I,
    root: &FmInterval,
    first: u8,
    good: &[u8],
    opt: &EcOpt,
    store: &CorrStore,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(good.len() + 8);
    // (interval, depth within the branch, symbol at that depth)
    let mut stack: Vec<(FmInterval, u32, u8)> = vec![(*root, 0, first)];
    let mut out = [FmInterval::default(); EXT_SLOTS];
    while let Some((ik, d, sym)) = stack.pop() {
        // ancestors pop before descendants, so the prefix below d is intact
        buf.truncate(d as usize);
        buf.push(sym);
        idx.extend(&ik, &mut out);
        if out[0].size > 0 {
            let l = (d as usize + 1).min(good.len());
            let mm = (0..l).filter(|&i| buf[i] != good[i]).count();
            if mm < opt.mm_cap as usize || (mm as f64 / l as f64) < opt.mm_ratio {
                for i in 0..l {
                    if buf[i] == good[i] {
                        continue;
                    }
                    let off_end = d - i as u32;
                    for row in out[0].lo..out[0].lo + out[0].size {
                        store.record(idx.seq_of_row(row), off_end, buf[i], good[i]);
                    }
                }
            }
        }
        // keep walking every non-empty extension, ambiguous included
        for s in (1..EXT_SLOTS).rev() {
            if out[s].size > 0 {
                stack.push((out[s], d + 1, (s - 1) as u8));
            }
        }
    }
}

/// Collect corrections for one seed subtree.
fn collect_from<I: FmIndex + ?Sized>(idx: &I, opt: &EcOpt, seed: &[u8], store: &CorrStore) {
    let mut ik = idx.symbol_interval(seed[0]);
    for &c in &seed[1..] {
        if ik.is_empty() {
            return;
        }
        ik = idx.extend_symbol(&ik, c);
    }
    if ik.is_empty() {
        return;
    }

    let mut stack: Vec<FmInterval> = vec![ik];
    let mut out = [FmInterval::default(); EXT_SLOTS];
    let mut good = Vec::new();
    while let Some(ik) = stack.pop() {
        idx.extend(&ik, &mut out);
        if ik.depth == opt.w {
            let mut np = 0;
            let mut nn = 0;
            for b in 1..=4 {
                if out[b].size >= opt.min_solid as u64 {
                    np += 1;
                } else if out[b].size > 0 {
                    nn += 1;
                }
            }
            if np == 1 && nn > 0 {
                let b = (0..4u8)
                    .find(|&b| out[b as usize + 1].size >= opt.min_solid as u64)
                    .unwrap();
                let solid = out[b as usize + 1];
                good.clear();
                good.push(b);
                solid_suffix(idx, &solid, opt.min_solid, &mut good);
                for c in 0..4u8 {
                    let weak = out[c as usize + 1];
                    if c == b || weak.is_empty() || weak.size >= opt.min_solid as u64 {
                        continue;
                    }
                    if weak.size <= opt.max_weak as u64
                        && (weak.size as f64 / solid.size as f64) <= opt.drop_ratio()
                    {
                        record_branch(idx, &weak, c, &good, opt, store);
                    }
                }
            } else if np == 2 {
                // two solid branches at the window boundary; which one (if
                // either) should absorb the weak ones is unresolved, so the
                // whole context is left untouched
            }
        } else {
            // below the window, weaker branches cannot matter at depth w
            for b in (1..=4usize).rev() {
                if out[b].size >= (opt.min_solid + 1) as u64 {
                    stack.push(out[b]);
                }
            }
        }
    }
}

/// All base strings of length `len`, each rooting one parallel subtree.
fn seeds(len: usize) -> Vec<Vec<u8>> {
    let mut seeds = vec![Vec::new()];
    for _ in 0..len {
        seeds = seeds
            .into_iter()
            .flat_map(|s| {
                (0..4u8).map(move |b| {
                    let mut t = s.clone();
                    t.push(b);
                    t
                })
            })
            .collect();
    }
    seeds
}

/// Run the collection phase. Worker count is whatever the ambient rayon pool
/// provides; the sorted result is identical regardless.
pub fn collect<I: FmIndex + ?Sized>(idx: &I, opt: &EcOpt) -> CorrStore {
    let store = CorrStore::new(idx.num_seqs());
    // seed contexts must not overshoot the window
    let seed_len = SEED_LEN.min(opt.w.max(1) as usize);
    seeds(seed_len)
        .par_iter()
        .for_each(|seed| collect_from(idx, opt, seed, &store));
    log::info!("collected {} correction candidates", store.len());
    store
}

/// Apply recorded corrections to every read pair `r` with
/// `r % step == start % step`, emitting `>r\nSEQ\n` records in order.
///
/// Corrections against the reverse-complement orientation are lifted back
/// into the forward frame: position `len-1-off` becomes `off`, the symbol is
/// complemented.
pub fn apply<I: FmIndex + ?Sized>(
    idx: &I,
    store: &CorrStore,
    start: u64,
    step: u64,
    out: &mut impl Write,
) -> io::Result<()> {
    let n_pairs = idx.num_seqs() / 2;
    let mut recs = Vec::new();
    let mut r = start;
    while r < n_pairs {
        let (mut seq, _ival, _contained) = idx.retrieve(2 * r);
        let len = seq.len() as u32;
        recs.clear();
        store.lookup(2 * r, &mut recs);
        let mut edits: Vec<(u32, u8)> = recs
            .iter()
            .map(|c| (len - 1 - c.off_end(), c.to()))
            .collect();
        recs.clear();
        store.lookup(2 * r + 1, &mut recs);
        for c in &recs {
            edits.push((c.off_end(), alphabet::comp(c.to())));
        }
        edits.sort_unstable();
        for &(pos, to) in &edits {
            seq[pos as usize] = to;
        }
        writeln!(out, ">{}", r)?;
        out.write_all(&alphabet::decode(&seq))?;
        out.write_all(b"\n")?;
        r += step;
    }
    Ok(())
}

/// Full correction pass: collect, sort, rewrite.
pub fn run_correction<I: FmIndex + ?Sized>(
    idx: &I,
    opt: &EcOpt,
    out: &mut impl Write,
) -> io::Result<()> {
    let mut store = collect(idx, opt);
    store.sort();
    apply(idx, &store, 0, 1, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_minus_pow_small_regime() {
        // series against the exact value, to the accuracy the term cutoff
        // guarantees
        let exact = 1.0 - (1.0 - 1e-4f64).powi(100);
        let v = one_minus_pow(1e-4, 100);
        assert!(((v - exact) / exact).abs() < 1e-5);
    }

    #[test]
    fn test_one_minus_pow_large_regime() {
        // x*k large: result saturates toward 1 without blowing up
        let v = one_minus_pow(1e-5, 10_000_000);
        assert!(v > 0.99999 && v <= 1.0);
    }

    #[test]
    fn test_one_minus_pow_tiny_x_keeps_precision() {
        // direct 1 - (1-x)^k would round to 0 here
        let v = one_minus_pow(1e-18, 1000);
        assert!((v - 1e-15).abs() / 1e-15 < 1e-3);
    }

    #[test]
    fn test_estimate_params_reference_point() {
        let (w, t) = estimate_params(1_000_000, 100, 30.0, 0.01);
        assert!((8..100).contains(&(w as i32)));
        assert!(t >= 1);
    }

    #[test]
    fn test_threshold_monotone_in_coverage() {
        let (_, t30) = estimate_params(1_000_000, 100, 30.0, 0.01);
        let (_, t60) = estimate_params(1_000_000, 100, 60.0, 0.01);
        assert!(t60 >= t30);
    }

    #[test]
    fn test_corr_rec_packing() {
        let r = CorrRec::pack(513, 77, 3, 1);
        assert_eq!(r.local(), 513);
        assert_eq!(r.off_end(), 77);
        assert_eq!(r.orig(), 3);
        assert_eq!(r.to(), 1);
    }

    #[test]
    fn test_store_lookup_contiguous() {
        let store = CorrStore::new(4096);
        store.record(5, 3, 0, 1);
        store.record(5, 9, 2, 3);
        store.record(6, 1, 1, 0);
        store.record(1029, 4, 0, 2); // second shard, same local id as 5
        let mut store = store;
        store.sort();
        let mut out = Vec::new();
        store.lookup(5, &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.local() == 5));
        out.clear();
        store.lookup(1029, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].off_end(), 4);
    }
}
