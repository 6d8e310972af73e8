pub mod alignment; // Score-only affine-gap local alignment for tip resolution
pub mod alphabet; // Nucleotide coding, complement, ASCII conversion
pub mod bubble; // Closed-bubble relaxation and open-bubble (tip) pruning
pub mod correct; // Index-guided error correction (estimate, collect, apply)
pub mod fm_index; // Full-text index interface + in-memory reference index
pub mod graph; // Unitig graph data model (vertices, tombstoned edges)
