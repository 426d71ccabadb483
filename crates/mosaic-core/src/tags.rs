use std::collections::BTreeSet;

/// Case-fold, trim and deduplicate a tag list.
///
/// The result is sorted so that two tag sets with the same members compare
/// equal regardless of the order they were produced in.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Union of two tag lists, normalized.
pub fn merge_tags(existing: &[String], incoming: &[String]) -> Vec<String> {
    normalize_tags(existing.iter().chain(incoming.iter()))
}
