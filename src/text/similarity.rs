use std::collections::HashMap;

/// Ratio at or above which two candidate lines count as the same line.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// A contiguous run of equal characters: `a[a_start..a_start + len]` equals
/// `b[b_start..b_start + len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub a_start: usize,
    pub b_start: usize,
    pub len: usize,
}

/// Longest-matching-blocks comparison of two strings, by characters.
///
/// Finds the longest common substring, then recurses into the unmatched
/// regions on either side of it. [`SequenceMatcher::ratio`] is
/// `2 * matched / (len(a) + len(b))`.
pub struct SequenceMatcher {
    a: Vec<char>,
    b: Vec<char>,
    b_index: HashMap<char, Vec<usize>>,
}

impl SequenceMatcher {
    pub fn new(a: &str, b: &str) -> Self {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let mut b_index: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, &ch) in b.iter().enumerate() {
            b_index.entry(ch).or_default().push(j);
        }
        Self { a, b, b_index }
    }

    /// Longest block inside `a[alo..ahi]` x `b[blo..bhi]`. Ties go to the
    /// block starting earliest in `a`, then earliest in `b`.
    fn longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Match {
        let mut best = Match {
            a_start: alo,
            b_start: blo,
            len: 0,
        };
        // run length of the match ending at b[j], for the previous row of a
        let mut prev: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut current: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b_index.get(&self.a[i]) {
                for &j in positions {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = j.checked_sub(1).and_then(|p| prev.get(&p)).copied().unwrap_or(0) + 1;
                    current.insert(j, k);
                    if k > best.len {
                        best = Match {
                            a_start: i + 1 - k,
                            b_start: j + 1 - k,
                            len: k,
                        };
                    }
                }
            }
            prev = current;
        }

        best
    }

    /// All matching blocks in increasing order, adjacent blocks merged.
    pub fn matching_blocks(&self) -> Vec<Match> {
        let mut pending = vec![(0, self.a.len(), 0, self.b.len())];
        let mut found = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = pending.pop() {
            let m = self.longest_match(alo, ahi, blo, bhi);
            if m.len == 0 {
                continue;
            }
            if alo < m.a_start && blo < m.b_start {
                pending.push((alo, m.a_start, blo, m.b_start));
            }
            if m.a_start + m.len < ahi && m.b_start + m.len < bhi {
                pending.push((m.a_start + m.len, ahi, m.b_start + m.len, bhi));
            }
            found.push(m);
        }
        found.sort_by_key(|m| (m.a_start, m.b_start));

        let mut merged: Vec<Match> = Vec::with_capacity(found.len());
        for m in found {
            match merged.last_mut() {
                Some(last)
                    if last.a_start + last.len == m.a_start
                        && last.b_start + last.len == m.b_start =>
                {
                    last.len += m.len;
                }
                _ => merged.push(m),
            }
        }
        merged
    }

    /// Similarity in `[0, 1]`. Two empty strings are identical.
    pub fn ratio(&self) -> f64 {
        let total = self.a.len() + self.b.len();
        if total == 0 {
            return 1.0;
        }
        let matched: usize = self.matching_blocks().iter().map(|m| m.len).sum();
        2.0 * matched as f64 / total as f64
    }
}

/// True when `a` and `b` are at least `threshold` similar.
pub fn is_similar(a: &str, b: &str, threshold: f64) -> bool {
    SequenceMatcher::new(a, b).ratio() >= threshold
}

/// Drop every candidate that is similar to one kept before it. Order of the
/// survivors is preserved.
pub fn dedup_similar<I, S>(candidates: I, threshold: f64) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut kept: Vec<String> = Vec::new();
    for candidate in candidates {
        let candidate = candidate.into();
        if kept.iter().any(|k| is_similar(k, &candidate, threshold)) {
            continue;
        }
        kept.push(candidate);
    }
    kept
}
