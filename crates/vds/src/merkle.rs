//! Range arithmetic for RFC 6962 audit paths
//!
//! Everything here is pure: ranges are half-open `(start, end)` pairs of leaf
//! indices and callers are expected to have range-checked their arguments.

/// Largest power of two strictly less than `n` (1 for `n <= 2`).
pub fn calc_k(n: i64) -> i64 {
    if n <= 2 {
        return 1;
    }
    1 << (63 - (n - 1).leading_zeros())
}

pub fn is_pow2(n: i64) -> bool {
    n > 0 && n & (n - 1) == 0
}

/// Sibling ranges needed to prove leaf `m` within `[start, end)`, ordered
/// leaf to root.
pub fn path(mut m: i64, mut start: i64, mut end: i64) -> Vec<(i64, i64)> {
    let mut rv = Vec::new();
    while end - start > 1 {
        let k = calc_k(end - start);
        if m < k {
            rv.push((start + k, end));
            end = start + k;
        } else {
            rv.push((start, start + k));
            m -= k;
            start += k;
        }
    }
    rv.reverse();
    rv
}

/// Ranges proving that the first `m` leaves of `[start, end)` are a prefix of
/// it. `trust_complete` lets a complete left subtree stand for itself, since
/// the verifier already holds its hash as the old root.
pub fn sub_proof(
    mut m: i64,
    mut start: i64,
    mut end: i64,
    mut trust_complete: bool,
) -> Vec<(i64, i64)> {
    let mut rv = Vec::new();
    loop {
        let n = end - start;
        if m == n {
            if !trust_complete {
                rv.push((start, end));
            }
            break;
        }
        let k = calc_k(n);
        if m <= k {
            rv.push((start + k, end));
            end = start + k;
        } else {
            rv.push((start, start + k));
            m -= k;
            start += k;
            trust_complete = false;
        }
    }
    rv.reverse();
    rv
}

/// Complete subtrees covering `[0, size)`, left to right. These are the
/// pending entries of the carry stack before leaf `size` is appended.
pub fn create_needed_stack(size: i64) -> Vec<(i64, i64)> {
    let mut rv = path(size, 0, size + 1);
    rv.reverse();
    rv
}

/// Split `[start, end)` into decreasing power-of-two chunks from the left.
pub fn power_of_two_chunks(mut start: i64, end: i64) -> Vec<(i64, i64)> {
    let mut rv = Vec::new();
    while start != end {
        let k = calc_k(end - start + 1);
        rv.push((start, start + k));
        start += k;
    }
    rv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_k() {
        assert_eq!(calc_k(1), 1);
        assert_eq!(calc_k(2), 1);
        assert_eq!(calc_k(3), 2);
        assert_eq!(calc_k(4), 2);
        assert_eq!(calc_k(5), 4);
        assert_eq!(calc_k(9), 8);
        assert_eq!(calc_k((1 << 62) + 1), 1 << 62);
        assert_eq!(calc_k(i64::MAX), 1 << 62);
    }

    #[test]
    fn test_is_pow2() {
        let pows: Vec<i64> = (0..40).filter(|&n| is_pow2(n)).collect();
        assert_eq!(pows, vec![1, 2, 4, 8, 16, 32]);
        assert!(is_pow2(1 << 62));
        assert!(!is_pow2((1 << 62) + 1));
        assert!(!is_pow2(i64::MAX));
        assert!(!is_pow2(-4));
    }

    #[test]
    fn test_path_rfc6962_example() {
        // Seven-leaf tree from RFC 6962 section 2.1.3.
        assert_eq!(path(0, 0, 7), vec![(1, 2), (2, 4), (4, 7)]);
        assert_eq!(path(3, 0, 7), vec![(2, 3), (0, 2), (4, 7)]);
        assert_eq!(path(4, 0, 7), vec![(5, 6), (6, 7), (0, 4)]);
        assert_eq!(path(6, 0, 7), vec![(4, 6), (0, 4)]);
        assert!(path(0, 0, 1).is_empty());
    }

    #[test]
    fn test_sub_proof_rfc6962_example() {
        assert_eq!(sub_proof(3, 0, 7, true), vec![(2, 3), (3, 4), (0, 2), (4, 7)]);
        assert_eq!(sub_proof(4, 0, 7, true), vec![(4, 7)]);
        assert_eq!(sub_proof(6, 0, 7, true), vec![(4, 6), (6, 7), (0, 4)]);
        assert_eq!(sub_proof(2, 0, 3, false), vec![(0, 2), (2, 3)]);
    }

    #[test]
    fn test_create_needed_stack() {
        assert!(create_needed_stack(0).is_empty());
        assert_eq!(create_needed_stack(1), vec![(0, 1)]);
        assert_eq!(create_needed_stack(5), vec![(0, 4), (4, 5)]);
        assert_eq!(create_needed_stack(7), vec![(0, 4), (4, 6), (6, 7)]);
        assert_eq!(create_needed_stack(8), vec![(0, 8)]);
    }

    #[test]
    fn test_power_of_two_chunks() {
        assert_eq!(power_of_two_chunks(4, 7), vec![(4, 6), (6, 7)]);
        assert_eq!(power_of_two_chunks(0, 8), vec![(0, 8)]);
        assert_eq!(power_of_two_chunks(8, 19), vec![(8, 16), (16, 18), (18, 19)]);
    }
}
