// Nucleotide coding shared by the graph and the index.
//
// Bases are stored as 0..=3 (A,C,G,T); 4 is the ambiguous symbol. This is
// the same 2-bit-plus-N coding used by the aligner side of the project.

/// Ambiguous base (anything that is not A/C/G/T).
pub const AMBIG: u8 = 4;

/// ASCII -> 0..=4 lookup, both cases; everything unrecognized maps to N.
pub const NT4_TABLE: [u8; 256] = [
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 0, 4, 1, 4, 4, 4, 2, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 0, 4, 1, 4, 4, 4, 2, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
];

const NT_CHARS: &[u8; 5] = b"ACGTN";

/// Complement of a coded base; the ambiguous symbol is its own complement.
#[inline]
pub fn comp(b: u8) -> u8 {
    if b < 4 {
        3 - b
    } else {
        AMBIG
    }
}

/// Reverse complement of a coded sequence.
pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| comp(b)).collect()
}

/// Encode an ASCII sequence into 0..=4 coding.
pub fn encode(ascii: &[u8]) -> Vec<u8> {
    ascii.iter().map(|&c| NT4_TABLE[c as usize]).collect()
}

/// Decode a coded sequence back to ASCII, rendering the ambiguous symbol as 'N'.
pub fn decode(seq: &[u8]) -> Vec<u8> {
    seq.iter().map(|&b| NT_CHARS[b.min(4) as usize]).collect()
}
