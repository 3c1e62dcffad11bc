//! Random Linear Network Coding over GF(2^8)
//!
//! A file is cut into a generation of `g = k * s` equally sized source symbols,
//! where `k` is the number of nodes needed to decode and `s` the number of
//! coded subfragments each node holds. Every coded subfragment is a random
//! linear combination of the source symbols and carries its coefficient vector
//! in front of the payload:
//!
//! ```text
//! ┌──────────────────────────┬────────────────────────────────┐
//! │ coefficients (g bytes)   │ payload (symbol_size bytes)    │
//! └──────────────────────────┴────────────────────────────────┘
//! ```
//!
//! Coefficients are re-drawn until every choice of `k` nodes spans the whole
//! generation, so any `k` surviving fragments always decode.

use rand::Rng;
use reed_solomon_erasure::galois_8;
use tracing::debug;

use crate::error::{Error, Result};

/// Attempts at drawing a coefficient set before giving up
pub const MAX_SAMPLING_ATTEMPTS: usize = 64;

/// Above this many node subsets, decodability is checked on a random sample
pub const MAX_EXHAUSTIVE_SUBSETS: usize = 4096;

// =============================================================================
// Coded Symbols
// =============================================================================

/// One coded subfragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedSymbol {
    pub coefficients: Vec<u8>,
    pub payload: Vec<u8>,
}

impl CodedSymbol {
    /// Serialize as `coefficients || payload`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.coefficients.len() + self.payload.len());
        out.extend_from_slice(&self.coefficients);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a subfragment for a generation of the given size.
    pub fn parse(bytes: &[u8], generation: usize) -> Result<Self> {
        if bytes.len() <= generation {
            return Err(Error::CorruptShard(format!(
                "coded subfragment of {} bytes cannot hold {} coefficients and a payload",
                bytes.len(),
                generation
            )));
        }
        let (coefficients, payload) = bytes.split_at(generation);
        Ok(Self {
            coefficients: coefficients.to_vec(),
            payload: payload.to_vec(),
        })
    }
}

// =============================================================================
// GF(2^8) Linear Algebra
// =============================================================================

/// Linear combination `sum(c_i * source_i)` of equally sized source symbols.
pub fn combine(coefficients: &[u8], sources: &[Vec<u8>]) -> Vec<u8> {
    let len = sources.first().map(Vec::len).unwrap_or(0);
    let mut out = vec![0u8; len];
    for (c, source) in coefficients.iter().zip(sources) {
        if *c == 0 {
            continue;
        }
        for (o, s) in out.iter_mut().zip(source) {
            *o = galois_8::add(*o, galois_8::mul(*c, *s));
        }
    }
    out
}

/// Row-reduce `matrix` in place, mirroring every operation on `augmented`.
///
/// Returns the rank. Pivot rows end up in the first `rank` positions, in
/// column order.
fn eliminate(matrix: &mut [Vec<u8>], mut augmented: Option<&mut [Vec<u8>]>) -> usize {
    let columns = matrix.first().map(Vec::len).unwrap_or(0);
    let mut row = 0;

    for col in 0..columns {
        if row == matrix.len() {
            break;
        }
        let Some(pivot) = (row..matrix.len()).find(|&r| matrix[r][col] != 0) else {
            continue;
        };
        matrix.swap(row, pivot);
        if let Some(aug) = augmented.as_deref_mut() {
            aug.swap(row, pivot);
        }

        let inv = galois_8::div(1, matrix[row][col]);
        for v in matrix[row].iter_mut() {
            *v = galois_8::mul(*v, inv);
        }
        if let Some(aug) = augmented.as_deref_mut() {
            for v in aug[row].iter_mut() {
                *v = galois_8::mul(*v, inv);
            }
        }

        for other in 0..matrix.len() {
            let factor = matrix[other][col];
            if other == row || factor == 0 {
                continue;
            }
            for j in 0..columns {
                let delta = galois_8::mul(factor, matrix[row][j]);
                matrix[other][j] = galois_8::add(matrix[other][j], delta);
            }
            if let Some(aug) = augmented.as_deref_mut() {
                let (pivot_row, other_row) = pick_two(aug, row, other);
                for (o, p) in other_row.iter_mut().zip(pivot_row.iter()) {
                    *o = galois_8::add(*o, galois_8::mul(factor, *p));
                }
            }
        }
        row += 1;
    }

    row
}

/// Borrow row `a` immutably and row `b` mutably.
fn pick_two(rows: &mut [Vec<u8>], a: usize, b: usize) -> (&Vec<u8>, &mut Vec<u8>) {
    if a < b {
        let (left, right) = rows.split_at_mut(b);
        (&left[a], &mut right[0])
    } else {
        let (left, right) = rows.split_at_mut(a);
        (&right[0], &mut left[b])
    }
}

/// Rank of a set of coefficient rows.
pub fn rank(rows: &[Vec<u8>]) -> usize {
    let mut matrix = rows.to_vec();
    eliminate(&mut matrix, None)
}

/// Recover the source symbols of a generation from coded subfragments.
///
/// The insufficiency error counts independent subfragments, not fragments.
pub fn solve(symbols: &[CodedSymbol], generation: usize) -> Result<Vec<Vec<u8>>> {
    let mut matrix: Vec<Vec<u8>> = symbols.iter().map(|s| s.coefficients.clone()).collect();
    let mut payloads: Vec<Vec<u8>> = symbols.iter().map(|s| s.payload.clone()).collect();

    let found = eliminate(&mut matrix, Some(&mut payloads));
    if found < generation {
        return Err(Error::InsufficientShards {
            available: found,
            required: generation,
        });
    }

    payloads.truncate(generation);
    Ok(payloads)
}

// =============================================================================
// Layout
// =============================================================================

/// Shape of an RLNC-coded file across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlncLayout {
    /// Fragment slots, one per node (N)
    pub nodes: usize,
    /// Slots needed to decode (k)
    pub required_nodes: usize,
    /// Coded subfragments per slot (s)
    pub per_node: usize,
}

impl RlncLayout {
    /// Number of source symbols in the generation
    pub fn generation(&self) -> usize {
        self.required_nodes * self.per_node
    }

    /// Source symbol length for a file of `data_len` bytes
    pub fn symbol_size(&self, data_len: usize) -> usize {
        data_len.div_ceil(self.generation())
    }

    /// Split (and zero-pad) a buffer into the generation's source symbols.
    pub fn split_sources(&self, data: &[u8]) -> Vec<Vec<u8>> {
        let size = self.symbol_size(data.len());
        (0..self.generation())
            .map(|i| {
                let start = std::cmp::min(i * size, data.len());
                let end = std::cmp::min(start + size, data.len());
                let mut symbol = data[start..end].to_vec();
                symbol.resize(size, 0);
                symbol
            })
            .collect()
    }

    /// Draw coefficient rows for every slot.
    ///
    /// Slots with `Some(rows)` in `fixed` keep their rows; the others get fresh
    /// random rows. Retries until any `required_nodes` slots are decodable.
    pub fn draw_rows<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        fixed: &[Option<Vec<Vec<u8>>>],
    ) -> Result<Vec<Vec<Vec<u8>>>> {
        let g = self.generation();

        for attempt in 1..=MAX_SAMPLING_ATTEMPTS {
            let rows: Vec<Vec<Vec<u8>>> = (0..self.nodes)
                .map(|slot| match fixed.get(slot) {
                    Some(Some(existing)) => existing.clone(),
                    _ => (0..self.per_node)
                        .map(|_| (0..g).map(|_| rng.gen::<u8>()).collect())
                        .collect(),
                })
                .collect();

            if self.any_subset_decodable(rng, &rows) {
                debug!(attempt, generation = g, "Drew decodable RLNC coefficients");
                return Ok(rows);
            }
        }

        Err(Error::EncodingError(format!(
            "no decodable coefficient set found after {} attempts",
            MAX_SAMPLING_ATTEMPTS
        )))
    }

    /// Whether every (or, for large clusters, a sample of) `required_nodes`
    /// slots spans the generation.
    pub fn any_subset_decodable<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        rows: &[Vec<Vec<u8>>],
    ) -> bool {
        let g = self.generation();
        let stacked = |subset: &[usize]| -> Vec<Vec<u8>> {
            subset
                .iter()
                .flat_map(|&slot| rows[slot].iter().cloned())
                .collect()
        };

        if binomial(self.nodes, self.required_nodes) <= MAX_EXHAUSTIVE_SUBSETS {
            return Combinations::new(self.nodes, self.required_nodes)
                .all(|subset| rank(&stacked(&subset)) == g);
        }

        (0..MAX_EXHAUSTIVE_SUBSETS).all(|_| {
            let subset = rand::seq::index::sample(rng, self.nodes, self.required_nodes).into_vec();
            rank(&stacked(&subset)) == g
        })
    }
}

/// `n choose k`, saturating.
fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = std::cmp::min(k, n - k);
    let mut acc: usize = 1;
    for i in 0..k {
        acc = acc.saturating_mul(n - i) / (i + 1);
    }
    acc
}

/// Lexicographic k-subsets of `0..n`.
struct Combinations {
    n: usize,
    current: Option<Vec<usize>>,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        let current = if k <= n { Some((0..k).collect()) } else { None };
        Self { n, current }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let out = self.current.take()?;
        let k = out.len();

        let mut next = out.clone();
        let mut i = k;
        while i > 0 {
            i -= 1;
            if next[i] < self.n - k + i {
                next[i] += 1;
                for j in i + 1..k {
                    next[j] = next[j - 1] + 1;
                }
                self.current = Some(next);
                break;
            }
        }

        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| (0..n).map(|j| u8::from(i == j)).collect())
            .collect()
    }

    #[test]
    fn test_rank_identity_and_dependent_rows() {
        assert_eq!(rank(&identity(4)), 4);

        let mut rows = identity(3);
        rows.push(vec![1, 1, 0]);
        assert_eq!(rank(&rows), 3);

        let dependent = vec![vec![2, 4, 6], vec![2, 4, 6]];
        assert_eq!(rank(&dependent), 1);
    }

    #[test]
    fn test_solve_recovers_sources() {
        let sources = vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ijkl".to_vec()];
        let rows = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 10]];
        assert_eq!(rank(&rows), 3);

        let symbols: Vec<CodedSymbol> = rows
            .iter()
            .map(|c| CodedSymbol {
                coefficients: c.clone(),
                payload: combine(c, &sources),
            })
            .collect();

        assert_eq!(solve(&symbols, 3).unwrap(), sources);
    }

    #[test]
    fn test_solve_rank_deficient() {
        let sources = vec![vec![1u8, 2], vec![3u8, 4]];
        let c = vec![5u8, 9];
        let symbol = CodedSymbol {
            coefficients: c.clone(),
            payload: combine(&c, &sources),
        };

        let result = solve(&[symbol.clone(), symbol], 2);
        assert!(matches!(
            result,
            Err(Error::InsufficientShards {
                available: 1,
                required: 2
            })
        ));
    }

    #[test]
    fn test_symbol_parse() {
        let symbol = CodedSymbol {
            coefficients: vec![1, 2, 3],
            payload: vec![9, 9],
        };
        let parsed = CodedSymbol::parse(&symbol.to_bytes(), 3).unwrap();
        assert_eq!(parsed, symbol);

        assert!(matches!(
            CodedSymbol::parse(&[1, 2, 3], 3),
            Err(Error::CorruptShard(_))
        ));
    }

    #[test]
    fn test_split_sources_pads() {
        let layout = RlncLayout {
            nodes: 4,
            required_nodes: 3,
            per_node: 2,
        };
        let sources = layout.split_sources(&[1u8; 13]);

        assert_eq!(layout.generation(), 6);
        assert_eq!(sources.len(), 6);
        assert!(sources.iter().all(|s| s.len() == 3));
        assert_eq!(sources[4], vec![1, 0, 0]);
        assert_eq!(sources[5], vec![0, 0, 0]);
    }

    #[test]
    fn test_draw_rows_keeps_fixed_slots() {
        let layout = RlncLayout {
            nodes: 4,
            required_nodes: 2,
            per_node: 1,
        };
        let mut rng = rand::thread_rng();
        let original = layout.draw_rows(&mut rng, &[]).unwrap();

        let fixed = vec![Some(original[0].clone()), None, Some(original[2].clone()), None];
        let redrawn = layout.draw_rows(&mut rng, &fixed).unwrap();

        assert_eq!(redrawn[0], original[0]);
        assert_eq!(redrawn[2], original[2]);
        assert!(layout.any_subset_decodable(&mut rng, &redrawn));
    }

    #[test]
    fn test_combinations() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(Combinations::new(3, 3).count(), 1);
        assert_eq!(binomial(4, 2), 6);
        assert_eq!(binomial(20, 10), 184_756);
    }
}
