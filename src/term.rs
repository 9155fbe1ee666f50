use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of identifying information a term carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Name,
    Place,
    Contact,
    Business,
    Relationship,
    Date,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Name,
        Category::Place,
        Category::Contact,
        Category::Business,
        Category::Relationship,
        Category::Date,
    ];

    /// Key used in detector payloads and the mapping file
    pub fn key(self) -> &'static str {
        match self {
            Category::Name => "names",
            Category::Place => "places",
            Category::Contact => "contacts",
            Category::Business => "businesses",
            Category::Relationship => "relationships",
            Category::Date => "dates",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Stem of the generic pseudonym family, e.g. `Place` in `[Place3]`
    pub fn pseudonym_stem(self) -> &'static str {
        match self {
            Category::Name => "Name",
            Category::Place => "Place",
            Category::Contact => "Contact",
            Category::Business => "Business",
            Category::Relationship => "Relationship",
            Category::Date => "Date",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Exact surface string plus its category. Identity is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term {
    pub surface_form: String,
    pub category: Category,
}

impl Term {
    pub fn new(surface_form: impl Into<String>, category: Category) -> Self {
        Self {
            surface_form: surface_form.into(),
            category,
        }
    }

    /// Length in characters, the sort key for longest-first substitution
    pub fn char_len(&self) -> usize {
        self.surface_form.chars().count()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.surface_form, self.category)
    }
}
