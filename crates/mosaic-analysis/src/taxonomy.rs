use crate::traits::ModerationLabel;

/// Set of moderation categories that mark content as flagged.
///
/// A label matches when its own name or its parent category equals one of
/// the configured entries, ignoring case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationTaxonomy {
    categories: Vec<String>,
}

impl ModerationTaxonomy {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut categories: Vec<String> = categories
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        categories.sort();
        categories.dedup();
        Self { categories }
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        self.categories.iter().any(|c| *c == name)
    }

    pub fn is_flagged(&self, labels: &[ModerationLabel]) -> bool {
        labels.iter().any(|label| {
            self.matches(&label.name)
                || label
                    .parent_name
                    .as_deref()
                    .is_some_and(|parent| self.matches(parent))
        })
    }

    /// Same check over a flat list of label and parent names, as carried by
    /// job results.
    pub fn is_flagged_names<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|n| self.matches(n.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> ModerationTaxonomy {
        ModerationTaxonomy::new(["Explicit Nudity", "Violence", " violence "])
    }

    fn label(name: &str, parent: Option<&str>) -> ModerationLabel {
        ModerationLabel {
            name: name.to_string(),
            parent_name: parent.map(str::to_string),
            confidence: 90.0,
        }
    }

    #[test]
    fn test_matches_ignores_case_and_whitespace() {
        let t = taxonomy();
        assert!(t.matches("VIOLENCE"));
        assert!(t.matches("explicit nudity"));
        assert!(!t.matches("Suggestive"));
    }

    #[test]
    fn test_parent_category_flags_label() {
        let t = taxonomy();
        assert!(t.is_flagged(&[label("Graphic Violence Or Gore", Some("Violence"))]));
        assert!(!t.is_flagged(&[label("Female Swimwear Or Underwear", Some("Suggestive"))]));
        assert!(!t.is_flagged(&[]));
    }

    #[test]
    fn test_flat_names() {
        let t = taxonomy();
        assert!(t.is_flagged_names(&["Weapons", "Violence"]));
        assert!(!t.is_flagged_names::<&str>(&[]));
    }

    #[test]
    fn test_empty_entries_are_dropped() {
        let t = ModerationTaxonomy::new(["", "  "]);
        assert!(t.is_empty());
    }
}
