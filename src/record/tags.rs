//! Parallel tag name/value sequences.

use serde::Serialize;

/// Ordered tag names and values of one record.
///
/// Both sequences only grow through [`TagSet::push`], so they always have
/// the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagSet {
    #[serde(rename = "tag_names")]
    names: Vec<String>,
    #[serde(rename = "tag_values")]
    values: Vec<String>,
}

impl TagSet {
    /// Append one tag.
    #[inline]
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.names.push(name.into());
        self.values.push(value.into());
    }

    /// Append tags from `(name, value)` pairs.
    pub fn extend<I, N, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        for (name, value) in pairs {
            self.push(name, value);
        }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.names.len(), self.values.len());
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value of the first tag called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i].as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names
            .iter()
            .zip(self.values.iter())
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Truncate both sequences to zero length, keeping their capacity.
    #[inline]
    pub fn clear(&mut self) {
        self.names.clear();
        self.values.clear();
    }

    pub fn capacity(&self) -> usize {
        self.names.capacity().min(self.values.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_lengths_equal() {
        let mut tags = TagSet::default();
        tags.push("app_service", "checkout");
        tags.extend([("region", "eu"), ("zone", "a")]);

        assert_eq!(tags.len(), 3);
        assert_eq!(tags.names().len(), tags.values().len());
        assert_eq!(tags.get("zone"), Some("a"));
        assert_eq!(tags.get("missing"), None);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut tags = TagSet::default();
        tags.extend((0..16).map(|i| (format!("k{}", i), format!("v{}", i))));
        let capacity = tags.capacity();

        tags.clear();
        assert!(tags.is_empty());
        assert_eq!(tags.len(), 0);
        assert!(tags.capacity() >= capacity);
    }

    #[test]
    fn test_serialized_as_two_arrays() {
        let mut tags = TagSet::default();
        tags.push("a", "1");
        let json = serde_json::to_value(&tags).unwrap();
        assert_eq!(json["tag_names"], serde_json::json!(["a"]));
        assert_eq!(json["tag_values"], serde_json::json!(["1"]));
    }
}
