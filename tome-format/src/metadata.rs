use std::collections::BTreeMap;

/// Identifier prefix under which metadata values are stored as entries.
pub const METADATA_NAMESPACE: &str = "M/";

/// Keys that must be set before a writer can be closed.
pub const REQUIRED_KEYS: &[&str] = &[
    "Name",
    "Title",
    "Creator",
    "Publisher",
    "Date",
    "Description",
    "Language",
];

/// Well-known keys that are accepted but not required.
pub const OPTIONAL_KEYS: &[&str] = &[
    "Longdescription",
    "Licence",
    "Tags",
    "Flavour",
    "Source",
    "Counter",
    "Scraper",
];

/// Maps a snake_case key onto the stored PascalCase form.
///
/// All-lowercase keys lose their underscores and gain a leading capital, so
/// `name` becomes `Name` and `long_description` becomes `Longdescription`.
/// Keys containing any uppercase letter are kept verbatim.
pub fn normalize_key(key: &str) -> String {
    if key.chars().any(char::is_uppercase) {
        return key.to_string();
    }

    let mut chars = key.chars().filter(|c| *c != '_');
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => key.to_string(),
    }
}

/// Archive-level metadata. Keys are case-sensitive once normalized, values are
/// stored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TomeMetadata {
    values: BTreeMap<String, String>,
}

impl TomeMetadata {
    pub fn new() -> TomeMetadata {
        TomeMetadata::default()
    }

    /// Sets `key`, replacing any previous value. See [`normalize_key`].
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(normalize_key(&key.into()), value.into());
    }

    pub fn extend<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in pairs {
            self.insert(key, value);
        }
    }

    #[inline(always)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The first required key that has not been set, if any.
    pub fn missing_required(&self) -> Option<&'static str> {
        REQUIRED_KEYS
            .iter()
            .copied()
            .find(|key| !self.values.contains_key(*key))
    }

    /// The entry identifier a metadata key is stored under.
    pub fn entry_url(key: &str) -> String {
        format!("{}{}", METADATA_NAMESPACE, normalize_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut meta = TomeMetadata::new();
        meta.insert("Title", "First");
        meta.extend([("Title", "Second"), ("Tags", "a;b")]);
        assert_eq!(meta.get("Title"), Some("Second"));
        assert_eq!(meta.get("Tags"), Some("a;b"));
        assert_eq!(meta.len(), 2);
    }

    #[test]
    fn snake_case_keys_are_normalized() {
        assert_eq!(normalize_key("name"), "Name");
        assert_eq!(normalize_key("long_description"), "Longdescription");
        assert_eq!(normalize_key("Longdescription"), "Longdescription");
        assert_eq!(normalize_key("X-Custom"), "X-Custom");
        assert_eq!(normalize_key(""), "");

        let mut meta = TomeMetadata::new();
        meta.insert("title", "lower");
        assert_eq!(meta.get("Title"), Some("lower"));
        assert_eq!(meta.get("title"), Some("lower"));
        assert_eq!(TomeMetadata::entry_url("language"), "M/Language");
    }

    #[test]
    fn mixed_case_keys_are_case_sensitive() {
        let mut meta = TomeMetadata::new();
        meta.insert("TITLE", "upper");
        assert_eq!(meta.get("Title"), None);
        assert_eq!(meta.missing_required(), Some("Name"));
    }

    #[test]
    fn required_keys() {
        let mut meta = TomeMetadata::new();
        for key in REQUIRED_KEYS {
            assert_eq!(meta.missing_required(), Some(*key));
            meta.insert(*key, "x");
        }
        assert_eq!(meta.missing_required(), None);
        assert_eq!(TomeMetadata::entry_url("Language"), "M/Language");
    }
}
