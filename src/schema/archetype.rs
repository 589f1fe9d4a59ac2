//! Named archetype templates: a role pattern plus an elixir band.

use serde::Serialize;

use super::card::{CardRole, Deck};

/// A named deck archetype.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArchetypeTemplate {
    pub name: &'static str,
    pub min_elixir: f64,
    pub max_elixir: f64,
    /// Minimum count per role.
    pub required_roles: &'static [(CardRole, usize)],
}

/// Built-in templates.
pub static ARCHETYPES: [ArchetypeTemplate; 8] = [
    ArchetypeTemplate {
        name: "beatdown",
        min_elixir: 4.0,
        max_elixir: 5.5,
        required_roles: &[(CardRole::WinCondition, 1), (CardRole::Support, 2)],
    },
    ArchetypeTemplate {
        name: "cycle",
        min_elixir: 2.5,
        max_elixir: 3.5,
        required_roles: &[
            (CardRole::WinCondition, 1),
            (CardRole::Cycle, 3),
            (CardRole::SmallSpell, 1),
        ],
    },
    ArchetypeTemplate {
        name: "control",
        min_elixir: 3.5,
        max_elixir: 4.5,
        required_roles: &[
            (CardRole::Building, 1),
            (CardRole::BigSpell, 1),
            (CardRole::SmallSpell, 1),
        ],
    },
    ArchetypeTemplate {
        name: "siege",
        min_elixir: 3.0,
        max_elixir: 4.0,
        required_roles: &[
            (CardRole::WinCondition, 1),
            (CardRole::Building, 1),
            (CardRole::Cycle, 2),
        ],
    },
    ArchetypeTemplate {
        name: "bridge_spam",
        min_elixir: 3.0,
        max_elixir: 4.0,
        required_roles: &[(CardRole::WinCondition, 1), (CardRole::Support, 2)],
    },
    ArchetypeTemplate {
        name: "midrange",
        min_elixir: 3.0,
        max_elixir: 4.0,
        required_roles: &[
            (CardRole::WinCondition, 1),
            (CardRole::BigSpell, 1),
            (CardRole::SmallSpell, 1),
        ],
    },
    ArchetypeTemplate {
        name: "spawndeck",
        min_elixir: 3.5,
        max_elixir: 5.0,
        required_roles: &[(CardRole::Building, 2)],
    },
    ArchetypeTemplate {
        name: "bait",
        min_elixir: 2.8,
        max_elixir: 3.8,
        required_roles: &[(CardRole::WinCondition, 1), (CardRole::SmallSpell, 1)],
    },
];

/// Look up a built-in template by name.
pub fn find_archetype(name: &str) -> Option<&'static ArchetypeTemplate> {
    ARCHETYPES.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

impl ArchetypeTemplate {
    /// Whether a selection with this average and role counts fits the template.
    pub fn matches_profile<F>(&self, avg_elixir: f64, count: F) -> bool
    where
        F: Fn(CardRole) -> usize,
    {
        avg_elixir >= self.min_elixir - 1e-9
            && avg_elixir <= self.max_elixir + 1e-9
            && self.required_roles.iter().all(|&(role, n)| count(role) >= n)
    }

    pub fn matches(&self, deck: &Deck) -> bool {
        self.matches_profile(deck.avg_elixir(), |role| deck.count_role(role))
    }

    /// Fit in [0, 1]: role coverage scaled by distance from the elixir band.
    pub fn confidence<F>(&self, avg_elixir: f64, count: F) -> f64
    where
        F: Fn(CardRole) -> usize,
    {
        let coverage = if self.required_roles.is_empty() {
            1.0
        } else {
            self.required_roles
                .iter()
                .map(|&(role, n)| (count(role).min(n) as f64) / n as f64)
                .sum::<f64>()
                / self.required_roles.len() as f64
        };

        let miss = if avg_elixir < self.min_elixir {
            self.min_elixir - avg_elixir
        } else if avg_elixir > self.max_elixir {
            avg_elixir - self.max_elixir
        } else {
            0.0
        };

        coverage * (1.0 - miss).max(0.0)
    }
}

/// Highest-confidence template for a deck, with its confidence.
pub fn best_archetype(deck: &Deck) -> (&'static ArchetypeTemplate, f64) {
    let avg = deck.avg_elixir();
    let mut best = (&ARCHETYPES[0], f64::NEG_INFINITY);
    for template in &ARCHETYPES {
        let c = template.confidence(avg, |role| deck.count_role(role));
        if c > best.1 {
            best = (template, c);
        }
    }
    best
}

/// Whether any built-in template matches.
pub fn matches_any<F>(avg_elixir: f64, count: F) -> bool
where
    F: Fn(CardRole) -> usize,
{
    ARCHETYPES
        .iter()
        .any(|t| t.matches_profile(avg_elixir, &count))
}
