// Bubble popping over the unitig graph.
//
// Closed bubbles: bounded Kahn-style relaxation from a branching end, keeping
// best and second-best cumulative read support per vertex end, until the
// frontier reconverges on a single merge point. Open bubbles (tips): a short
// dead-end unitig whose dangling suffix aligns well against some alternative
// branch of its only neighbor is disconnected and deleted.
//
// Traversal state never touches the persistent vertices: it lives in a
// call-scoped side table inside `BubbleAux`, whose arena is reused across
// calls to amortize allocation.

use crate::alignment::{affine_local_score, fill_scmat};
use crate::alphabet::comp;
use crate::graph::UnitigGraph;
use std::collections::HashMap;

/// Best / second-best relaxation state for one vertex end.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndRelax {
    /// Cumulative read support, `[best, second-best]`.
    pub sup: [i32; 2],
    /// Accumulated traversed length for each candidate.
    pub dist: [i32; 2],
    /// Predecessor (vertex, end) each candidate arrived from.
    pub pred: [u64; 2],
    /// Predecessor edges relaxed so far (Kahn countdown).
    pub done: u32,
}

/// Per-vertex traversal record, arena-allocated for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TravRecord {
    pub vid: u32,
    pub ends: [EndRelax; 2],
}

/// Reusable scratch for closed-bubble traversal. One instance per worker;
/// the engine takes no locks, so callers partition the graph themselves.
#[derive(Default)]
pub struct BubbleAux {
    pool: Vec<TravRecord>,
    slot: HashMap<u32, u32>,
    stack: Vec<u64>,
}

impl BubbleAux {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.pool.clear();
        self.slot.clear();
        self.stack.clear();
    }

    fn alloc(&mut self, vid: u32) {
        let s = self.pool.len() as u32;
        self.pool.push(TravRecord {
            vid,
            ..Default::default()
        });
        self.slot.insert(vid, s);
    }

    #[inline]
    fn has(&self, vid: u32) -> bool {
        self.slot.contains_key(&vid)
    }

    #[inline]
    fn get(&self, vid: u32) -> TravRecord {
        self.pool[self.slot[&vid] as usize]
    }

    #[inline]
    fn get_mut(&mut self, vid: u32) -> &mut TravRecord {
        &mut self.pool[self.slot[&vid] as usize]
    }
}

/// A successfully closed bubble: the reconvergence end plus the relaxation
/// annotations of every explored vertex, for a downstream rewriting pass.
#[derive(Debug)]
pub struct ClosedBubble {
    /// Packed (vertex, end) where the frontier reconverged.
    pub merge: u64,
    pub vertices: Vec<TravRecord>,
}

/// Relax the bubble rooted at `start` (a packed (vertex, end) with at least
/// two live neighbors) until it reconverges or a bound trips.
///
/// Every edge strictly increases accumulated length, so the explored region
/// is a DAG and a vertex end joins the frontier only once all its
/// predecessor edges have relaxed. Returns `None` (and mutates nothing) when
/// the start is not a branch, the frontier exceeds `max_vtx`, a best or
/// second-best distance exceeds `max_dist`, or exploration dead-ends.
pub fn pop_closed_bubble(
    g: &UnitigGraph,
    start: u64,
    max_vtx: usize,
    max_dist: i32,
    aux: &mut BubbleAux,
) -> Option<ClosedBubble> {
    aux.clear();
    let pid = (start >> 1) as u32;
    let pend = (start & 1) as usize;
    let p = g.vertex(pid);
    if p.deleted || p.live_degree(pend) < 2 {
        return None;
    }
    aux.alloc(pid);
    // seed so the first hop comes out at -overlap
    aux.get_mut(pid).ends[pend ^ 1].dist = [-p.len(), -p.len()];
    aux.stack.push(start ^ 1);
    // signed: branches reconverging on opposite ends of one vertex push two
    // ends against a single per-vertex increment
    let mut n_pending = 0isize;

    while let Some(&top) = aux.stack.last() {
        if aux.stack.len() == 1 && top != (start ^ 1) && n_pending == 0 {
            // lone zero-pending frontier entry: the merge point
            let merge = top;
            let bubble = ClosedBubble {
                merge,
                vertices: aux.pool.clone(),
            };
            aux.clear();
            return Some(bubble);
        }
        let x = aux.stack.pop().unwrap();
        let xid = (x >> 1) as u32;
        let xend = (x & 1) as usize;
        let p = g.vertex(xid);
        let cur = aux.get(xid).ends[xend];
        if aux.stack.len() > max_vtx || cur.dist[0] > max_dist || cur.dist[1] > max_dist {
            break;
        }
        // outgoing edges leave from the far end of the unitig we arrived at
        let out = &p.nei[xend ^ 1];
        if out.iter().all(|e| e.deleted) {
            break; // dead end
        }
        for e in out.iter().filter(|e| !e.deleted) {
            let y = match g.resolve(e.target) {
                Some(y) => y,
                None => continue,
            };
            let qid = (y >> 1) as u32;
            let qend = (y & 1) as usize;
            let q = g.vertex(qid);
            if q.deleted {
                continue;
            }
            if !aux.has(qid) {
                aux.alloc(qid);
                n_pending += 1;
            }
            let step = p.len() - e.overlap;
            let qdeg = q.live_degree(qend);
            let qsup = q.support;
            let r = &mut aux.get_mut(qid).ends[qend];
            let mut nsr = cur.sup[0] + qsup;
            if nsr > r.sup[0] {
                // best displaced to second-best
                r.sup[1] = r.sup[0];
                r.pred[1] = r.pred[0];
                r.dist[1] = r.dist[0];
                r.sup[0] = nsr;
                r.pred[0] = x;
                r.dist[0] = cur.dist[0] + step;
                nsr = cur.sup[1] + qsup;
            }
            if nsr > r.sup[1] {
                r.sup[1] = nsr;
                r.pred[1] = x;
                r.dist[1] = cur.dist[1] + step;
            }
            r.done += 1;
            if r.done as usize == qdeg {
                aux.stack.push(y);
                n_pending -= 1;
            }
        }
    }
    aux.clear();
    None
}

/// Tip resolution thresholds and alignment scoring. The edit-distance cutoffs
/// are tuned constants, kept configurable rather than derived.
#[derive(Debug, Clone)]
pub struct TipOpt {
    pub match_score: i8,
    pub mismatch_penalty: i8,
    pub gap_open: i32,
    pub gap_ext: i32,
    /// Absolute implied-edit-distance cutoff.
    pub max_edits: f64,
    /// Edit-distance-to-query-length ratio cutoff.
    pub max_ratio: f64,
}

impl Default for TipOpt {
    fn default() -> Self {
        Self {
            match_score: 5,
            mismatch_penalty: -4,
            gap_open: 6,
            gap_ext: 3,
            max_edits: 2.01,
            max_ratio: 0.1,
        }
    }
}

/// Disconnect (and possibly delete) a tip explained by an existing path.
///
/// A tip is a live vertex shorter than `min_len` with exactly one live edge
/// in total. Its dangling suffix is aligned against the corresponding suffix
/// of every alternative branch of the neighbor; the first alternative whose
/// implied edit distance passes the cutoffs tombstones the tip's edge and
/// its mirror. Anything that is not a tip is a silent no-op.
pub fn resolve_tip(g: &mut UnitigGraph, vid: u32, min_len: i32, opt: &TipOpt) {
    let p = g.vertex(vid);
    if p.deleted || p.len() >= min_len {
        return;
    }
    if p.live_degree(0) + p.live_degree(1) != 1 {
        return;
    }
    let dir = if p.live_degree(0) == 1 { 0 } else { 1 };
    let eidx = match p.nei[dir].iter().position(|e| !e.deleted) {
        Some(i) => i,
        None => return,
    };
    let e = p.nei[dir][eidx];
    let own_handle = p.ends[dir];
    let y = match g.resolve(e.target) {
        Some(y) => y,
        None => return,
    };
    let qid = (y >> 1) as u32;
    let qend = (y & 1) as usize;
    if qid == vid {
        return;
    }
    {
        let q = g.vertex(qid);
        if q.deleted || q.live_degree(qend) == 1 {
            // no alternative branch to explain the tip
            return;
        }
    }

    // dangling part of the tip, oriented to read away from the overlap
    let p = g.vertex(vid);
    let plen = p.len();
    if e.overlap >= plen {
        return;
    }
    let query: Vec<u8> = if dir == 0 {
        p.seq[e.overlap as usize..].to_vec()
    } else {
        p.seq[..(plen - e.overlap) as usize]
            .iter()
            .rev()
            .map(|&b| comp(b))
            .collect()
    };
    if query.is_empty() {
        return;
    }
    let max_l = query.len() * 2;
    let mat = fill_scmat(opt.match_score, opt.mismatch_penalty, 0);
    let denom = opt.match_score as f64 - opt.mismatch_penalty as f64;
    // a local hit below half the maximum score covers only a fragment of the
    // dangling suffix and says nothing about the unaligned remainder
    let min_score = query.len() as i32 * opt.match_score as i32 / 2;

    let mut explained = false;
    let alts: Vec<_> = g.vertex(qid).nei[qend]
        .iter()
        .filter(|r| !r.deleted && r.target != own_handle)
        .copied()
        .collect();
    for r in alts {
        let w = match g.resolve(r.target) {
            Some(w) => w,
            None => continue,
        };
        let t = g.vertex((w >> 1) as u32);
        if t.deleted {
            continue;
        }
        let tlen = t.len();
        if r.overlap >= tlen {
            continue;
        }
        let reference: Vec<u8> = if w & 1 == 1 {
            t.seq[..(tlen - r.overlap) as usize]
                .iter()
                .rev()
                .map(|&b| comp(b))
                .take(max_l)
                .collect()
        } else {
            t.seq[r.overlap as usize..]
                .iter()
                .copied()
                .take(max_l)
                .collect()
        };
        let score = affine_local_score(&query, &reference, &mat, opt.gap_open, opt.gap_ext);
        if score >= min_score {
            let n_diff = (query.len() as f64 * opt.match_score as f64 - score as f64) / denom;
            let r_diff = n_diff / query.len() as f64;
            if n_diff < opt.max_edits || r_diff < opt.max_ratio {
                explained = true;
                break;
            }
        }
    }

    if explained {
        g.vertices[vid as usize].nei[dir][eidx].deleted = true;
        for m in g.vertices[qid as usize].nei[qend].iter_mut() {
            if m.target == own_handle {
                m.deleted = true;
            }
        }
    }
    let p = g.vertex(vid);
    if p.live_degree(0) + p.live_degree(1) == 0 {
        g.delete_vertex(vid);
    }
}
