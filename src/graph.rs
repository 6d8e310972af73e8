// Unitig graph data model.
//
// The graph is built upstream (from the index) and only consumed and
// tombstoned here. Every vertex is a unitig with two ends; edges live in the
// neighbor list of the end they leave from and name the far end of their
// target through an opaque handle that upstream construction assigned.
// Deletion never compacts anything: vertices and edges carry an explicit
// `deleted` flag that every consumer re-checks, and a later external pass
// compacts the survivors.

use std::collections::HashMap;

/// Pack a (vertex index, end) pair into the u64 the traversals pass around.
#[inline]
pub fn idd(vid: u32, end: usize) -> u64 {
    (vid as u64) << 1 | end as u64
}

/// Directed edge out of one unitig end.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    /// Opaque handle of the far end of the target vertex.
    pub target: u64,
    /// Overlap length between the two unitigs.
    pub overlap: i32,
    /// Tombstone; set by bubble popping, never cleared.
    pub deleted: bool,
}

/// One unitig.
#[derive(Debug, Clone)]
pub struct Vertex {
    /// Opaque handles for end 0 and end 1, as assigned by graph construction.
    pub ends: [u64; 2],
    /// Symbol sequence in 0..=4 coding.
    pub seq: Vec<u8>,
    /// Number of reads supporting this unitig.
    pub support: i32,
    /// Neighbor lists for end 0 and end 1.
    pub nei: [Vec<Edge>; 2],
    pub deleted: bool,
}

impl Vertex {
    #[inline]
    pub fn len(&self) -> i32 {
        self.seq.len() as i32
    }

    /// Count of live (non-tombstoned) edges at one end.
    pub fn live_degree(&self, end: usize) -> usize {
        self.nei[end].iter().filter(|e| !e.deleted).count()
    }
}

#[derive(Default)]
pub struct UnitigGraph {
    pub vertices: Vec<Vertex>,
    /// End handle -> packed (vertex index, end).
    handles: HashMap<u64, u64>,
}

impl UnitigGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, ends: [u64; 2], seq: Vec<u8>, support: i32) -> u32 {
        let vid = self.vertices.len() as u32;
        self.handles.insert(ends[0], idd(vid, 0));
        self.handles.insert(ends[1], idd(vid, 1));
        self.vertices.push(Vertex {
            ends,
            seq,
            support,
            nei: [Vec::new(), Vec::new()],
            deleted: false,
        });
        vid
    }

    /// Append an edge at `from` (a packed (vertex, end)) pointing at the end
    /// handle `target`. A live edge to the same target already in the list
    /// wins; the new overlap is dropped unseen.
    pub fn add_edge(&mut self, from: u64, target: u64, overlap: i32) {
        let v = &mut self.vertices[(from >> 1) as usize];
        let list = &mut v.nei[(from & 1) as usize];
        if list.iter().any(|e| !e.deleted && e.target == target) {
            return;
        }
        list.push(Edge {
            target,
            overlap,
            deleted: false,
        });
    }

    /// Translate an opaque end handle into a packed (vertex index, end).
    #[inline]
    pub fn resolve(&self, handle: u64) -> Option<u64> {
        self.handles.get(&handle).copied()
    }

    #[inline]
    pub fn vertex(&self, vid: u32) -> &Vertex {
        &self.vertices[vid as usize]
    }

    /// Logically delete a vertex. Mirror edges in neighbors keep pointing at
    /// it; consumers re-check the flag before dereferencing.
    pub fn delete_vertex(&mut self, vid: u32) {
        self.vertices[vid as usize].deleted = true;
    }

    /// Number of vertices still live.
    pub fn live_vertices(&self) -> usize {
        self.vertices.iter().filter(|v| !v.deleted).count()
    }
}
