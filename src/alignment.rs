// Score-only affine-gap local alignment.
//
// Tip resolution only needs the best local score to decide whether a dangling
// suffix is explained by an alternative branch, so this is the plain scalar
// Smith-Waterman recurrence without traceback, banding or SIMD.

/// Build a 5x5 scoring matrix over A,C,G,T,N.
///
/// Matches score `match_score`, mismatches score `mismatch_penalty`
/// (negative), and any comparison involving N scores `ambig_score`.
pub fn fill_scmat(match_score: i8, mismatch_penalty: i8, ambig_score: i8) -> [i8; 25] {
    let mut mat = [0i8; 25];
    for i in 0..4 {
        for j in 0..4 {
            mat[i * 5 + j] = if i == j { match_score } else { mismatch_penalty };
        }
        mat[i * 5 + 4] = ambig_score;
        mat[4 * 5 + i] = ambig_score;
    }
    mat[4 * 5 + 4] = ambig_score;
    mat
}

/// Best local alignment score of `query` against `target` under affine gaps.
///
/// A gap of length k costs `gap_open + k * gap_ext`. Sequences are in 0..=4
/// coding and are indexed into `mat` directly. Returns 0 when no positive
/// scoring alignment exists.
pub fn affine_local_score(
    query: &[u8],
    target: &[u8],
    mat: &[i8; 25],
    gap_open: i32,
    gap_ext: i32,
) -> i32 {
    if query.is_empty() || target.is_empty() {
        return 0;
    }
    let n = target.len();
    // h[j] holds H[i-1][j] at the top of row i, e[j] holds E[i-1][j]
    let mut h = vec![0i32; n + 1];
    let mut e = vec![0i32; n + 1];
    let mut best = 0i32;
    for &qb in query {
        let row = &mat[qb as usize * 5..qb as usize * 5 + 5];
        let mut f = 0i32;
        let mut diag = h[0];
        for j in 1..=n {
            e[j] = (e[j] - gap_ext).max(h[j] - gap_open - gap_ext);
            f = (f - gap_ext).max(h[j - 1] - gap_open - gap_ext);
            let mut hij = diag + row[target[j - 1] as usize] as i32;
            hij = hij.max(e[j]).max(f).max(0);
            diag = h[j];
            h[j] = hij;
            if hij > best {
                best = hij;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_mat() -> [i8; 25] {
        fill_scmat(5, -4, 0)
    }

    #[test]
    fn test_perfect_match_scores_full() {
        let s = [0u8, 1, 2, 3, 0, 1, 2, 3];
        assert_eq!(affine_local_score(&s, &s, &default_mat(), 6, 3), 40);
    }

    #[test]
    fn test_single_mismatch_takes_local_optimum() {
        let q = [0u8, 1, 2, 3, 0, 1, 2, 3];
        let mut t = q;
        t[3] = 0;
        // 7 matches + 1 mismatch (31) beats the best mismatch-free run (20)
        assert_eq!(affine_local_score(&q, &t, &default_mat(), 6, 3), 31);
    }

    #[test]
    fn test_gap_cheaper_than_two_mismatches() {
        // target has one extra base in the middle
        let q = [0u8, 1, 2, 3, 3, 2, 1, 0];
        let t = [0u8, 1, 2, 3, 0, 3, 2, 1, 0];
        // 8 matches minus one 1-long gap: 40 - (6 + 3) = 31
        assert_eq!(affine_local_score(&q, &t, &default_mat(), 6, 3), 31);
    }

    #[test]
    fn test_disjoint_sequences_score_zero() {
        let q = [0u8, 0, 0, 0];
        let t = [3u8, 3, 3, 3];
        assert_eq!(affine_local_score(&q, &t, &default_mat(), 6, 3), 0);
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(affine_local_score(&[], &[0, 1, 2], &default_mat(), 6, 3), 0);
    }
}
