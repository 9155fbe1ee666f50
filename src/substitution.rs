// WHY: Exact-match substitution with word boundaries, singular possessives and longest-first ordering
// Pure text transformation; performs no I/O

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::error::{RedactError, Result};
use crate::registry::{PseudonymAssignment, TermRegistry};
use crate::term::{Category, Term};

const POSSESSIVE: &str = "'s";

/// Replacement counts keyed by term. Persisted as a list because JSON
/// object keys cannot be structured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TermCount>", into = "Vec<TermCount>")]
pub struct TermCounts(HashMap<Term, u64>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCount {
    pub term: Term,
    pub count: u64,
}

impl From<Vec<TermCount>> for TermCounts {
    fn from(entries: Vec<TermCount>) -> Self {
        let mut counts = TermCounts::default();
        for entry in entries {
            counts.add(entry.term, entry.count);
        }
        counts
    }
}

impl From<TermCounts> for Vec<TermCount> {
    fn from(counts: TermCounts) -> Self {
        let mut entries: Vec<TermCount> = counts
            .0
            .into_iter()
            .map(|(term, count)| TermCount { term, count })
            .collect();
        // Stable file content across runs
        entries.sort_by(|a, b| a.term.cmp(&b.term));
        entries
    }
}

impl TermCounts {
    pub fn add(&mut self, term: Term, count: u64) {
        *self.0.entry(term).or_insert(0) += count;
    }

    pub fn get(&self, term: &Term) -> u64 {
        self.0.get(term).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &TermCounts) {
        for (term, count) in &other.0 {
            self.add(term.clone(), *count);
        }
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Output of substituting one piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionResult {
    pub text: String,
    /// Only terms that matched at least once
    pub counts: TermCounts,
}

/// A span of the input claimed by one term
#[derive(Debug, Clone, Copy)]
struct Claim {
    end: usize,
    plan_idx: usize,
    possessive: bool,
}

/// Applies a registry's assignments to text.
///
/// Terms are tried longest surface form first. Each accepted match claims
/// its span of the input; later (shorter) terms can neither overlap a
/// claimed span nor match inside inserted pseudonym text. Boundary checks
/// next to a claimed span look at the replacement text, exactly as if the
/// replacements had already been spliced in.
pub struct SubstitutionEngine<'r> {
    plan: Vec<&'r PseudonymAssignment>,
}

impl<'r> SubstitutionEngine<'r> {
    pub fn new(registry: &'r TermRegistry) -> Self {
        let plan = registry
            .substitution_order()
            .into_iter()
            .filter(|a| !a.term.surface_form.is_empty())
            .collect();
        Self { plan }
    }

    /// Number of terms the engine will try
    pub fn len(&self) -> usize {
        self.plan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }

    pub fn substitute(&self, text: &str) -> Result<SubstitutionResult> {
        let mut claims: BTreeMap<usize, Claim> = BTreeMap::new();

        for (plan_idx, assignment) in self.plan.iter().enumerate() {
            let needle = assignment.term.surface_form.as_str();
            let step = needle.chars().next().map_or(1, char::len_utf8);
            let mut cursor = 0;

            while let Some(found) = text[cursor..].find(needle) {
                let start = cursor + found;
                let end = start + needle.len();

                match self.try_claim(text, &claims, start, end) {
                    Some((span_end, possessive)) => {
                        claims.insert(
                            start,
                            Claim {
                                end: span_end,
                                plan_idx,
                                possessive,
                            },
                        );
                        cursor = span_end;
                    }
                    None => cursor = start + step,
                }
                if cursor >= text.len() {
                    break;
                }
            }
        }

        self.assemble(text, &claims)
    }

    /// Validate a candidate match at `start..end`; returns the span end
    /// (including a possessive suffix) when the match is accepted.
    fn try_claim(
        &self,
        text: &str,
        claims: &BTreeMap<usize, Claim>,
        start: usize,
        end: usize,
    ) -> Option<(usize, bool)> {
        if overlaps(claims, start, end) {
            return None;
        }

        let before = self.char_before(text, claims, start);
        let after = self.char_after(text, claims, end);
        if before.is_some_and(char::is_alphanumeric) || after.is_some_and(char::is_alphanumeric) {
            return None;
        }

        // A claim starting at `end` means the following text is a pseudonym
        let possessive = !claims.contains_key(&end)
            && text[end..].starts_with(POSSESSIVE)
            && !overlaps(claims, start, end + POSSESSIVE.len());
        if possessive {
            Some((end + POSSESSIVE.len(), true))
        } else {
            Some((end, false))
        }
    }

    /// Character immediately before `pos` in the text as it reads after
    /// already-claimed replacements
    fn char_before(&self, text: &str, claims: &BTreeMap<usize, Claim>, pos: usize) -> Option<char> {
        if let Some((_, claim)) = claims.range(..pos).next_back() {
            if claim.end == pos {
                return if claim.possessive {
                    POSSESSIVE.chars().next_back()
                } else {
                    self.plan[claim.plan_idx].pseudonym.chars().next_back()
                };
            }
        }
        text[..pos].chars().next_back()
    }

    /// Character immediately after `pos`, as above
    fn char_after(&self, text: &str, claims: &BTreeMap<usize, Claim>, pos: usize) -> Option<char> {
        if let Some(claim) = claims.get(&pos) {
            return self.plan[claim.plan_idx].pseudonym.chars().next();
        }
        text[pos..].chars().next()
    }

    fn assemble(&self, text: &str, claims: &BTreeMap<usize, Claim>) -> Result<SubstitutionResult> {
        let mut output = String::with_capacity(text.len());
        let mut counts = TermCounts::default();
        let mut copied_to = 0;

        for (&start, claim) in claims {
            if start < copied_to {
                return Err(RedactError::SubstitutionInvariantViolation { start, end: claim.end });
            }
            let assignment = self.plan[claim.plan_idx];
            output.push_str(&text[copied_to..start]);
            output.push_str(&assignment.pseudonym);
            if claim.possessive {
                output.push_str(POSSESSIVE);
            }
            counts.add(assignment.term.clone(), 1);
            copied_to = claim.end;
        }
        output.push_str(&text[copied_to..]);

        Ok(SubstitutionResult { text: output, counts })
    }
}

/// Whether `start..end` intersects any claimed span
fn overlaps(claims: &BTreeMap<usize, Claim>, start: usize, end: usize) -> bool {
    claims
        .range(..end)
        .next_back()
        .is_some_and(|(_, claim)| claim.end > start)
}

/// Substitute every registered term in `text`
pub fn substitute(text: &str, registry: &TermRegistry) -> Result<SubstitutionResult> {
    SubstitutionEngine::new(registry).substitute(text)
}

/// One line of the statistics report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementStat {
    pub term: Term,
    pub pseudonym: String,
    pub count: u64,
}

impl ReplacementStat {
    pub fn category(&self) -> Category {
        self.term.category
    }

    pub fn is_found(&self) -> bool {
        self.count > 0
    }
}

/// Whole-document replacement counts for every registered term, zero
/// counts included
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementStatistics {
    pub entries: Vec<ReplacementStat>,
}

impl ReplacementStatistics {
    pub fn collect(registry: &TermRegistry, counts: &TermCounts) -> Self {
        let entries = registry
            .assignments()
            .iter()
            .map(|a| ReplacementStat {
                term: a.term.clone(),
                pseudonym: a.pseudonym.clone(),
                count: counts.get(&a.term),
            })
            .collect();
        Self { entries }
    }

    pub fn count_for(&self, term: &Term) -> Option<u64> {
        self.entries.iter().find(|e| &e.term == term).map(|e| e.count)
    }

    pub fn total_replacements(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    pub fn not_found(&self) -> impl Iterator<Item = &ReplacementStat> {
        self.entries.iter().filter(|e| !e.is_found())
    }

    /// Entries grouped by category key, highest count first within a group
    pub fn by_category(&self) -> BTreeMap<&'static str, Vec<&ReplacementStat>> {
        let mut groups: BTreeMap<&'static str, Vec<&ReplacementStat>> = BTreeMap::new();
        for entry in &self.entries {
            groups.entry(entry.category().key()).or_default().push(entry);
        }
        for group in groups.values_mut() {
            group.sort_by_key(|e| std::cmp::Reverse(e.count));
        }
        groups
    }

    /// Plain-text report grouped by category with explicit NOT FOUND lines
    pub fn render_report(&self) -> String {
        let mut report = String::from("Replacement Statistics:\n\n");
        for (category, entries) in self.by_category() {
            let _ = write!(report, "\n{}:\n{}\n", category.to_uppercase(), "-".repeat(40));
            for entry in entries {
                let _ = if entry.is_found() {
                    writeln!(
                        report,
                        "{} -> {}: {} replacements",
                        entry.term.surface_form, entry.pseudonym, entry.count
                    )
                } else {
                    writeln!(report, "{} -> {}: NOT FOUND", entry.term.surface_form, entry.pseudonym)
                };
            }
        }
        report
    }
}
