//! Exhaustive lexicographic enumeration.

use std::sync::Arc;

use crate::schema::{CandidatePool, DECK_SIZE, Strategy};

use super::{DeckGenerator, GeneratorError, GeneratorState, Issued, Ledger};

/// Combinations examined per `next_batch` call before handing control back.
pub const SCAN_LIMIT: u64 = 100_000;

/// Enumerates every valid deck in lexicographic order of card names.
///
/// Forced includes are fixed; only the remaining slots are enumerated over
/// the other cards. The cursor is the next combination to examine, so a
/// restored enumerator continues exactly where the snapshot left off.
///
/// Each call examines at most `scan_limit` combinations. Under tight
/// constraints a call can therefore return a short or empty batch while
/// combinations remain; [`DeckGenerator::is_exhausted`] tells the two apart.
pub struct ExhaustiveGenerator {
    pool: Arc<CandidatePool>,
    free: Vec<usize>,
    choose: usize,
    cursor: Option<Vec<usize>>,
    examined: u64,
    yielded: u64,
    scan_limit: u64,
    ledger: Ledger,
}

impl ExhaustiveGenerator {
    pub fn new(pool: Arc<CandidatePool>) -> Self {
        let includes = pool.includes();
        let free: Vec<usize> = (0..pool.len()).filter(|i| !includes.contains(i)).collect();
        let choose = DECK_SIZE - includes.len();
        let cursor = (choose <= free.len()).then(|| (0..choose).collect());
        Self {
            pool,
            free,
            choose,
            cursor,
            examined: 0,
            yielded: 0,
            scan_limit: SCAN_LIMIT,
            ledger: Ledger::default(),
        }
    }

    pub fn with_scan_limit(mut self, limit: u64) -> Self {
        self.scan_limit = limit.max(1);
        self
    }

    /// Combinations examined so far, valid or not.
    pub fn examined(&self) -> u64 {
        self.examined
    }

    fn selection(&self, positions: &[usize]) -> Vec<usize> {
        let mut sel: Vec<usize> = self.pool.includes().to_vec();
        sel.extend(positions.iter().map(|&p| self.free[p]));
        sel.sort_unstable();
        sel
    }

    /// Step the cursor to the next combination.
    fn advance(&mut self) {
        let n = self.free.len();
        let k = self.choose;
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        let mut i = k;
        while i > 0 {
            i -= 1;
            if cursor[i] < n - k + i {
                cursor[i] += 1;
                for j in i + 1..k {
                    cursor[j] = cursor[j - 1] + 1;
                }
                return;
            }
        }
        self.cursor = None;
    }
}

impl DeckGenerator for ExhaustiveGenerator {
    fn strategy(&self) -> Strategy {
        Strategy::Exhaustive
    }

    fn next_batch(&mut self, max: usize) -> Result<Vec<Issued>, GeneratorError> {
        let mut batch = self.ledger.reissue(&self.pool, max)?;
        let mut scanned = 0;

        while batch.len() < max && scanned < self.scan_limit {
            let Some(positions) = self.cursor.clone() else {
                break;
            };
            scanned += 1;
            let slot = self.examined;
            self.examined += 1;
            self.advance();

            let sel = self.selection(&positions);
            if self.pool.is_valid(&sel) {
                let deck = self.pool.deck(&sel)?;
                self.yielded += 1;
                self.ledger.issue(slot, sel);
                batch.push(Issued { slot, deck });
            }
        }

        Ok(batch)
    }

    fn complete(&mut self, slot: u64, _fitness: Option<f64>) {
        self.ledger.complete(slot);
    }

    fn is_exhausted(&self) -> bool {
        self.cursor.is_none() && !self.ledger.has_pending()
    }

    fn total(&self) -> Option<u64> {
        Some(binomial(self.free.len() as u64, self.choose as u64))
    }

    fn checkpoint(&self) -> GeneratorState {
        GeneratorState::Exhaustive {
            cursor: self.cursor.clone(),
            examined: self.examined,
            yielded: self.yielded,
            outstanding: self.ledger.snapshot(&self.pool),
        }
    }

    fn restore(&mut self, state: GeneratorState) -> Result<(), GeneratorError> {
        let GeneratorState::Exhaustive {
            cursor,
            examined,
            yielded,
            outstanding,
        } = state
        else {
            return Err(GeneratorError::StateMismatch {
                expected: "exhaustive",
                found: state.kind(),
            });
        };

        if let Some(c) = &cursor {
            let n = self.free.len();
            let ordered = c.windows(2).all(|w| w[0] < w[1]);
            if c.len() != self.choose || !ordered || c.last().is_some_and(|&p| p >= n) {
                return Err(GeneratorError::InvalidState(format!(
                    "cursor {:?} does not fit {} of {} cards",
                    c, self.choose, n
                )));
            }
        }

        self.ledger.restore(&self.pool, outstanding)?;
        self.cursor = cursor;
        self.examined = examined;
        self.yielded = yielded;
        Ok(())
    }
}

/// `n` choose `k`, saturating at `u64::MAX`.
pub fn binomial(n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        acc = acc * (n - i) as u128 / (i + 1) as u128;
        if acc > u64::MAX as u128 {
            return u64::MAX;
        }
    }
    acc as u64
}
