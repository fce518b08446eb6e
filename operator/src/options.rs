//! Untyped option layers and how they are merged.
//!
//! Options travel as TOML tables until a service variant validates them into its own
//! typed settings. Layers are merged shallowly: a key in a later layer replaces the
//! same key of every earlier layer.

pub type Options = toml::Table;

/// Merges option layers, later layers winning on conflicting keys.
#[must_use]
pub fn merge<'layer>(layers: impl IntoIterator<Item = &'layer Options>) -> Options {
    let mut merged = Options::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Canonical (lowercase, underscored) form of a service type name.
///
/// `ClusterIp`, `cluster-ip` and `cluster_ip` all become `cluster_ip`; `clusterip` stays as is.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len() + 2);
    let mut previous: Option<char> = None;
    for c in name.trim().chars() {
        if c == '-' || c == ' ' {
            canonical.push('_');
        } else if c.is_uppercase() {
            if previous.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                canonical.push('_');
            }
            canonical.extend(c.to_lowercase());
        } else {
            canonical.push(c);
        }
        previous = Some(c);
    }
    canonical
}

/// Parses a `key=value` command line assignment into an option.
///
/// The value is read as a TOML value when possible (`total_nodes=3` gives an integer),
/// and as a plain string otherwise (`interface=eth1`).
///
/// # Errors
///
/// Returns an error message when there is no `=` or the key is empty.
pub fn parse_assignment(assignment: &str) -> Result<(String, toml::Value), String> {
    let Some((key, raw)) = assignment.split_once('=') else {
        return Err(format!("expected key=value, got '{assignment}'"));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{assignment}'"));
    }
    let raw = raw.trim();
    let value = toml::from_str::<Options>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| toml::Value::String(raw.to_owned()));
    Ok((key.to_owned(), value))
}

/// Collects parsed assignments into one option layer.
#[must_use]
pub fn from_assignments(assignments: impl IntoIterator<Item = (String, toml::Value)>) -> Options {
    assignments.into_iter().collect()
}
