//! INI parsing and serialization.
//!
//! The configuration format is plain INI: `[section]` headers, `key=value`
//! entries, `#` comments. Sections keep their entries in file order.
//!
//! The section list itself is ordered by kind, not strictly by file
//! position: the `datalogger` section and plain (connection) sections come
//! first, the `dataarchiver` section and qualified (`::`) variable
//! sections last, each group in encounter order. Loading therefore always
//! sees a connection before the variables that reference it, and the
//! ordering is stable: parsing the serialized form of a parse yields the
//! same list.

/// One `[name]` section with its entries in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl IniSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// The value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets or replaces `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// Parses INI text into an ordered section list.
///
/// Lines outside any section, comments and lines without a `=` are
/// skipped. Never fails: garbage degrades to an empty or partial list.
pub fn parse(text: &str) -> Vec<IniSection> {
    let mut front: Vec<IniSection> = Vec::new();
    let mut back: Vec<IniSection> = Vec::new();
    // Index into front/back of the section under construction.
    let mut current: Option<(bool, usize)> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            let to_back = name == "dataarchiver" || name.contains("::");
            let bucket = if to_back { &mut back } else { &mut front };
            bucket.push(IniSection::new(name));
            current = Some((to_back, bucket.len() - 1));
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            if let Some((to_back, index)) = current {
                let bucket = if to_back { &mut back } else { &mut front };
                bucket[index]
                    .entries
                    .push((key.trim().to_string(), value.trim().to_string()));
            }
        }
    }

    front.extend(back);
    front
}

/// Serializes sections back to INI text, in list order.
pub fn serialize(sections: &[IniSection]) -> String {
    let mut out = String::new();
    for section in sections {
        out.push('[');
        out.push_str(&section.name);
        out.push_str("]\n");
        for (key, value) in &section.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
