// WHY: Single source of truth for term → pseudonym assignments across chunks and runs
// Minting is order dependent, so assignments are never reissued once made

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::term::{Category, Term};

/// Mapping file layout: category key → surface form → pseudonym
pub type PseudonymMapping = BTreeMap<String, BTreeMap<String, String>>;

/// Where an assignment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOrigin {
    /// Loaded from a previous run's mapping file
    Seeded,
    /// Minted during this document's detection pass
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudonymAssignment {
    pub term: Term,
    pub pseudonym: String,
    pub origin: AssignmentOrigin,
}

/// Persisted registry content, embedded in every checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub assignments: Vec<PseudonymAssignment>,
    pub counters: BTreeMap<Category, u32>,
}

/// Known given names used to pick a gendered pseudonym family for names.
/// Purely a convenience; anything unmatched gets the generic family.
#[derive(Debug, Clone, Default)]
pub struct NamePatterns {
    male: HashSet<String>,
    female: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameFamily {
    Male,
    Female,
    Generic,
}

impl NamePatterns {
    pub fn new<S: AsRef<str>>(male: &[S], female: &[S]) -> Self {
        Self {
            male: male.iter().map(|p| p.as_ref().to_lowercase()).collect(),
            female: female.iter().map(|p| p.as_ref().to_lowercase()).collect(),
        }
    }

    fn family(&self, surface_form: &str) -> NameFamily {
        let lowered = surface_form.to_lowercase();
        if self.male.contains(&lowered) {
            NameFamily::Male
        } else if self.female.contains(&lowered) {
            NameFamily::Female
        } else {
            NameFamily::Generic
        }
    }
}

/// Term → pseudonym table with category-scoped sequential minting
#[derive(Debug, Clone, Default)]
pub struct TermRegistry {
    assignments: Vec<PseudonymAssignment>,
    index: HashMap<Term, usize>,
    counters: BTreeMap<Category, u32>,
    name_patterns: NamePatterns,
    ignored: HashSet<String>,
}

impl TermRegistry {
    pub fn new(name_patterns: NamePatterns) -> Self {
        Self {
            name_patterns,
            ..Self::default()
        }
    }

    /// Surface forms (compared case-insensitively) that are never registered
    pub fn with_ignored<S: AsRef<str>>(mut self, ignored: &[S]) -> Self {
        self.ignored = ignored.iter().map(|s| s.as_ref().to_lowercase()).collect();
        self
    }

    /// Whether a detected term is eligible for registration at all
    pub fn accepts(&self, term: &Term) -> bool {
        let trimmed = term.surface_form.trim();
        !trimmed.is_empty() && !self.ignored.contains(&trimmed.to_lowercase())
    }

    /// Return the pseudonym for `term`, minting one if it is new.
    /// Repeated calls never consume another counter slot.
    pub fn assign(&mut self, term: Term) -> &str {
        if let Some(&idx) = self.index.get(&term) {
            return &self.assignments[idx].pseudonym;
        }

        let pseudonym = self.mint(&term);
        debug!(term = %term.surface_form, category = %term.category, %pseudonym, "Minted pseudonym");
        let idx = self.push(PseudonymAssignment {
            term,
            pseudonym,
            origin: AssignmentOrigin::Discovered,
        });
        &self.assignments[idx].pseudonym
    }

    fn mint(&mut self, term: &Term) -> String {
        let counter = self.counters.entry(term.category).or_insert(0);
        *counter += 1;
        let n = *counter;

        match term.category {
            Category::Name => match self.name_patterns.family(&term.surface_form) {
                NameFamily::Male => format!("[MaleName{n}]"),
                NameFamily::Female => format!("[FemaleName{n}]"),
                NameFamily::Generic => format!("[Name{n}]"),
            },
            other => format!("[{}{n}]", other.pseudonym_stem()),
        }
    }

    fn push(&mut self, assignment: PseudonymAssignment) -> usize {
        let idx = self.assignments.len();
        self.index.insert(assignment.term.clone(), idx);
        self.assignments.push(assignment);
        idx
    }

    pub fn get(&self, term: &Term) -> Option<&str> {
        self.index.get(term).map(|&idx| self.assignments[idx].pseudonym.as_str())
    }

    pub fn contains(&self, term: &Term) -> bool {
        self.index.contains_key(term)
    }

    /// Highest number minted or seeded so far for `category`
    pub fn counter(&self, category: Category) -> u32 {
        self.counters.get(&category).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Assignments in insertion order
    pub fn assignments(&self) -> &[PseudonymAssignment] {
        &self.assignments
    }

    /// Assignments ordered longest surface form first, ties by insertion order
    pub fn substitution_order(&self) -> Vec<&PseudonymAssignment> {
        let mut ordered: Vec<&PseudonymAssignment> = self.assignments.iter().collect();
        // sort_by_key is stable, which keeps insertion order for equal lengths
        ordered.sort_by_key(|a| std::cmp::Reverse(a.term.char_len()));
        ordered
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            assignments: self.assignments.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Replace the registry content with a persisted snapshot. Must run before
    /// any new assignment in a resumed run.
    pub fn load(&mut self, snapshot: RegistrySnapshot) {
        self.assignments.clear();
        self.index.clear();
        self.counters = snapshot.counters;

        for assignment in snapshot.assignments {
            if self.index.contains_key(&assignment.term) {
                warn!(term = %assignment.term, "Duplicate assignment in snapshot, keeping the first");
                continue;
            }
            self.bump_counter_past(assignment.term.category, &assignment.pseudonym);
            self.push(assignment);
        }
        info!(assignments = self.assignments.len(), "Restored term registry");
    }

    /// Load a previous run's mapping file as seeded assignments. Counters are
    /// raised past every seeded pseudonym so new ones never collide.
    pub fn seed_from_mapping(&mut self, mapping: &PseudonymMapping) -> usize {
        let mut seeded = 0;
        for (category_key, entries) in mapping {
            let Some(category) = Category::from_key(category_key) else {
                warn!(category = %category_key, "Unknown category in mapping file, skipping");
                continue;
            };
            for (surface_form, pseudonym) in entries {
                let term = Term::new(surface_form.clone(), category);
                if pseudonym.trim().is_empty() {
                    warn!(term = %term, "Blank pseudonym in mapping file, skipping");
                    continue;
                }
                if self.contains(&term) || !self.accepts(&term) {
                    continue;
                }
                self.bump_counter_past(category, pseudonym);
                self.push(PseudonymAssignment {
                    term,
                    pseudonym: pseudonym.clone(),
                    origin: AssignmentOrigin::Seeded,
                });
                seeded += 1;
            }
        }

        for category in Category::ALL {
            let in_category = self.assignments.iter().filter(|a| a.term.category == category).count() as u32;
            let counter = self.counters.entry(category).or_insert(0);
            *counter = (*counter).max(in_category);
        }
        info!(seeded, "Seeded term registry from mapping");
        seeded
    }

    fn bump_counter_past(&mut self, category: Category, pseudonym: &str) {
        if let Some(n) = numeric_suffix(pseudonym) {
            let counter = self.counters.entry(category).or_insert(0);
            *counter = (*counter).max(n);
        }
    }

    /// Export as category key → surface form → pseudonym
    pub fn to_mapping(&self) -> PseudonymMapping {
        let mut mapping = PseudonymMapping::new();
        for category in Category::ALL {
            mapping.insert(category.key().to_string(), BTreeMap::new());
        }
        for assignment in &self.assignments {
            mapping
                .entry(assignment.term.category.key().to_string())
                .or_default()
                .insert(assignment.term.surface_form.clone(), assignment.pseudonym.clone());
        }
        mapping
    }
}

/// Trailing number of a pseudonym such as `[Place12]` → 12
fn numeric_suffix(pseudonym: &str) -> Option<u32> {
    let body = pseudonym.trim_end_matches(']');
    let digits_start = body
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    body[digits_start..].parse().ok()
}
