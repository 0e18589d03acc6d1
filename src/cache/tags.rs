//! Tag Index Module
//!
//! Secondary index from tag to the keys carrying it.

use std::collections::{BTreeSet, HashMap};

// == Tag Index ==
/// Maps each tag to the set of keys written with it.
///
/// Empty buckets are dropped as soon as their last key leaves, so a tag
/// that is present always has at least one member.
#[derive(Debug, Default)]
pub struct TagIndex {
    tags: HashMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `key` under every tag in `tags`.
    pub fn add<'a, I>(&mut self, key: &str, tags: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Removes `key` from every tag in `tags`.
    pub fn remove<'a, I>(&mut self, key: &str, tags: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for tag in tags {
            if let Some(members) = self.tags.get_mut(tag) {
                members.remove(key);
                if members.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }

    /// Members of `tag`, or None if the tag is not indexed.
    pub fn members(&self, tag: &str) -> Option<&BTreeSet<String>> {
        self.tags.get(tag)
    }

    /// Members of `tag` in key order. Unknown tags yield an empty list.
    pub fn keys_for(&self, tag: &str) -> Vec<String> {
        self.tags
            .get(tag)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.tags.get(tag).map_or(0, BTreeSet::len)
    }

    pub fn contains(&self, tag: &str, key: &str) -> bool {
        self.tags
            .get(tag)
            .is_some_and(|members| members.contains(key))
    }

    /// All indexed tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.tags.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }
}
