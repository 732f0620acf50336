//! # Exclusion Filters
//!
//! An [`Exclude`] is attached to an interest to tell the forwarding layer which
//! content variants must not satisfy it. Exclusion applies to the single
//! component immediately after the interest name: data named
//! `/prefix/data/seq=3/evil` answers the interest `/prefix/data/seq=3` only if
//! `evil` is not excluded.
//!
//! [`exclusion_for`] builds the filter a consumer sends when pursuing a
//! replacement for content it has judged forged.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::name::{Component, Name};

/// Position of the component that distinguishes a forged variant from the
/// genuine item (`/prefix/data/seq=N/<here>`).
pub const DEFAULT_EXCLUDE_OFFSET: usize = 3;

/// Failure to derive an exclusion entry from a forged name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcludeError {
    /// The forged name has no component at the requested offset.
    NameTooShort { name: String, offset: usize },
}

impl fmt::Display for ExcludeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExcludeError::NameTooShort { name, offset } => {
                write!(f, "name {name} has no component at offset {offset}")
            }
        }
    }
}

impl std::error::Error for ExcludeError {}

/// Set of components that must not appear after the interest name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclude {
    excluded: BTreeSet<Component>,
}

impl Exclude {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude_one(&mut self, component: Component) {
        self.excluded.insert(component);
    }

    pub fn is_excluded(&self, component: &Component) -> bool {
        self.excluded.contains(component)
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.excluded.iter()
    }
}

impl fmt::Display for Exclude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.excluded.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", rendered.join(","))
    }
}

/// Build the exclusion entry for a forged response: the component of
/// `forged` at `offset`.
pub fn exclusion_for(forged: &Name, offset: usize) -> Result<Exclude, ExcludeError> {
    let component = forged.get(offset).ok_or_else(|| ExcludeError::NameTooShort {
        name: forged.to_string(),
        offset,
    })?;
    let mut exclude = Exclude::new();
    exclude.exclude_one(component.clone());
    Ok(exclude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_component_at_offset() {
        let forged: Name = "/prefix/data/seq=1/evil".parse().unwrap();
        let exclude = exclusion_for(&forged, DEFAULT_EXCLUDE_OFFSET).unwrap();

        assert_eq!(exclude.len(), 1);
        assert!(exclude.is_excluded(&Component::generic("evil")));
        assert!(!exclude.is_excluded(&Component::generic("good")));
        assert_eq!(exclude.to_string(), "[evil]");
    }

    #[test]
    fn short_name_is_an_error_not_a_panic() {
        let genuine: Name = "/prefix/data/seq=1".parse().unwrap();
        let err = exclusion_for(&genuine, DEFAULT_EXCLUDE_OFFSET).unwrap_err();
        assert_eq!(
            err,
            ExcludeError::NameTooShort {
                name: "/prefix/data/seq=1".to_string(),
                offset: 3,
            }
        );
        assert!(err.to_string().contains("offset 3"));
    }

    #[test]
    fn empty_exclude_excludes_nothing() {
        let exclude = Exclude::new();
        assert!(exclude.is_empty());
        assert!(!exclude.is_excluded(&Component::sequence(0)));
        assert_eq!(exclude.to_string(), "[]");
    }
}
