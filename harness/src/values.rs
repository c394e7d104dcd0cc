use std::collections::BTreeMap;

/// `--set` style chart values. Keys use Helm's dotted path syntax, e.g. `zitadel.masterkey` or
/// `service.annotations.traefik\.ingress\.kubernetes\.io/service\.serversscheme`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelmValues(BTreeMap<String, String>);

impl HelmValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: ToString,
    {
        self.0.insert(key.into(), value.to_string());
        self
    }

    /// Builder flavour of [`HelmValues::set`].
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: ToString,
    {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Returns a copy of `self` overlaid with `overrides`. Keys in `overrides` win.
    pub fn merge(&self, overrides: &HelmValues) -> HelmValues {
        let mut merged = self.clone();
        merged.extend(overrides.clone());
        merged
    }

    /// `--set key=value` pairs in key order.
    pub fn to_set_args(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(key, value)| vec!["--set".to_string(), format!("{}={}", key, value)])
            .collect()
    }
}

impl Extend<(String, String)> for HelmValues {
    fn extend<I: IntoIterator<Item = (String, String)>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl IntoIterator for HelmValues {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<K, V> FromIterator<(K, V)> for HelmValues
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for HelmValues {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
