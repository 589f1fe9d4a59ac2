//! Deck manipulation utilities for evolutionary search.
//!
//! Provides random generation, crossover, mutation and repair of card
//! selections. Selections are pool indices; repair restores the invariants
//! (eight distinct cards, forced includes, required roles) but does not check
//! the elixir band, which is left to the caller.

use rand::prelude::*;

use crate::schema::{ArchetypeTemplate, CandidatePool, CardRole, DECK_SIZE, RoleComposition};

/// Random number generator wrapper for deck operations.
pub struct DeckRng {
    rng: StdRng,
}

impl DeckRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Bernoulli trial.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.r#gen::<f64>() < p
    }

    /// Uniform index in `0..n`.
    pub fn index(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Generate a random selection filling role quotas first.
    pub fn random_deck(
        &mut self,
        pool: &CandidatePool,
        composition: &RoleComposition,
        template: Option<&ArchetypeTemplate>,
    ) -> Vec<usize> {
        let mut cards: Vec<usize> = pool.includes().to_vec();

        let mut wants: Vec<(CardRole, usize)> = template
            .map(|t| t.required_roles.to_vec())
            .unwrap_or_default();
        wants.extend(CardRole::ALL.iter().map(|&r| (r, composition.count(r))));

        for (role, n) in wants {
            while cards.len() < DECK_SIZE && count_role(pool, &cards, role) < n {
                match self.pick_free(pool, Some(role), &cards) {
                    Some(idx) => cards.push(idx),
                    None => break,
                }
            }
        }

        self.fill(pool, &mut cards);
        cards
    }

    /// Recombine two parents with a randomly chosen operator, then repair.
    pub fn crossover(&mut self, pool: &CandidatePool, p1: &[usize], p2: &[usize]) -> Vec<usize> {
        let child = match self.index(3) {
            0 => self.uniform_crossover(p1, p2),
            1 => self.role_preserving_crossover(pool, p1, p2),
            _ => self.segment_crossover(p1, p2),
        };
        self.repair(pool, &child, &[p1, p2])
    }

    /// Each slot from either parent.
    fn uniform_crossover(&mut self, p1: &[usize], p2: &[usize]) -> Vec<usize> {
        p1.iter()
            .zip(p2.iter())
            .map(|(&a, &b)| if self.rng.gen_bool(0.5) { a } else { b })
            .collect()
    }

    /// Each role group inherited whole from one parent.
    fn role_preserving_crossover(
        &mut self,
        pool: &CandidatePool,
        p1: &[usize],
        p2: &[usize],
    ) -> Vec<usize> {
        let mut child = Vec::with_capacity(DECK_SIZE);
        for role in CardRole::ALL {
            let from = if self.rng.gen_bool(0.5) { p1 } else { p2 };
            child.extend(from.iter().copied().filter(|&i| pool.card(i).role == role));
        }
        child
    }

    /// Alternate segments between two random cut points.
    fn segment_crossover(&mut self, p1: &[usize], p2: &[usize]) -> Vec<usize> {
        let len = p1.len().min(p2.len());
        if len < 2 {
            return p1.to_vec();
        }
        let mut a = self.index(len);
        let mut b = self.index(len);
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        (0..len)
            .map(|i| if i >= a && i <= b { p2[i] } else { p1[i] })
            .collect()
    }

    /// Replace `slots` distinct positions with role-compatible cards.
    pub fn mutate(&mut self, pool: &CandidatePool, cards: &mut Vec<usize>, slots: usize) {
        let includes = pool.includes();
        let mut positions: Vec<usize> = (0..cards.len())
            .filter(|&p| !includes.contains(&cards[p]))
            .collect();
        positions.shuffle(&mut self.rng);
        positions.truncate(slots);

        for pos in positions {
            let old = cards[pos];
            let role = pool.card(old).role;
            let same_role = if self.rng.gen_bool(0.5) {
                self.pick_free(pool, Some(role), cards)
            } else {
                None
            };
            let replacement = match same_role {
                Some(idx) => Some(idx),
                None => self.pick_free(pool, None, cards),
            };
            if let Some(new) = replacement {
                cards[pos] = new;
            }
        }

        let repaired = self.repair(pool, cards, &[]);
        *cards = repaired;
    }

    /// Dedupe, force includes, refill from parents then the pool, and make
    /// sure every required role is present.
    pub fn repair(&mut self, pool: &CandidatePool, cards: &[usize], parents: &[&[usize]]) -> Vec<usize> {
        let mut out: Vec<usize> = Vec::with_capacity(DECK_SIZE);
        let sources = std::iter::once(pool.includes())
            .chain(std::iter::once(cards))
            .chain(parents.iter().copied());
        for source in sources {
            for &idx in source {
                if out.len() >= DECK_SIZE {
                    break;
                }
                if idx < pool.len() && !out.contains(&idx) {
                    out.push(idx);
                }
            }
        }

        self.fill(pool, &mut out);
        self.ensure_required(pool, &mut out);
        out
    }

    fn fill(&mut self, pool: &CandidatePool, cards: &mut Vec<usize>) {
        while cards.len() < DECK_SIZE {
            match self.pick_free(pool, None, cards) {
                Some(idx) => cards.push(idx),
                None => break,
            }
        }
    }

    fn ensure_required(&mut self, pool: &CandidatePool, cards: &mut [usize]) {
        let required = &pool.constraints().required_roles;
        for &role in required {
            if count_role(pool, cards, role) > 0 {
                continue;
            }
            let Some(new) = self.pick_free(pool, Some(role), cards) else {
                continue;
            };
            // Replace the last card whose removal keeps other requirements.
            let victim = (0..cards.len()).rev().find(|&p| {
                let idx = cards[p];
                let r = pool.card(idx).role;
                !pool.includes().contains(&idx)
                    && (!required.contains(&r) || count_role(pool, cards, r) > 1)
            });
            if let Some(p) = victim {
                cards[p] = new;
            }
        }
    }

    fn pick_free(
        &mut self,
        pool: &CandidatePool,
        role: Option<CardRole>,
        taken: &[usize],
    ) -> Option<usize> {
        let options: Vec<usize> = match role {
            Some(r) => pool
                .with_role(r)
                .iter()
                .copied()
                .filter(|i| !taken.contains(i))
                .collect(),
            None => (0..pool.len()).filter(|i| !taken.contains(i)).collect(),
        };
        options.choose(&mut self.rng).copied()
    }
}

fn count_role(pool: &CandidatePool, cards: &[usize], role: CardRole) -> usize {
    cards.iter().filter(|&&i| pool.card(i).role == role).count()
}

/// Cards in `a` that are not in `b`.
pub fn deck_distance(a: &[usize], b: &[usize]) -> usize {
    a.iter().filter(|i| !b.contains(i)).count()
}
