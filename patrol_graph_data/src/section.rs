// Named data sections with typed field accessors.
//
// `DataSection` is a tree node: a name, a text value, and ordered children.
// Fields such as `position` or `userString` are simply children whose value
// holds the encoded text, so `read_vector3("position", ..)` looks up the first
// child named `position` and parses its value.
//
// Lookups by name always resolve to the first matching child. Use
// `open_sections` to see every child with a given name and `new_section` to
// append a duplicate.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One node of a structured document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<DataSection>,
}

impl DataSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw text value of this section.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    pub fn children(&self) -> &[DataSection] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [DataSection] {
        &mut self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&DataSection> {
        self.children.iter().find(|c| c.name == name)
    }

    /// First child with the given name, mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut DataSection> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// First child with the given name. When `create` is set and no such
    /// child exists, an empty one is appended and returned.
    pub fn open_section(&mut self, name: &str, create: bool) -> Option<&mut DataSection> {
        match self.children.iter().position(|c| c.name == name) {
            Some(idx) => Some(&mut self.children[idx]),
            None if create => Some(self.new_section(name)),
            None => None,
        }
    }

    /// Append a new empty child, even if one with the same name exists.
    pub fn new_section(&mut self, name: &str) -> &mut DataSection {
        self.children.push(DataSection::new(name));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// All children with the given name, in document order.
    pub fn open_sections<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DataSection> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Delete the first child with the given name. Returns whether one was
    /// found.
    pub fn delete_section(&mut self, name: &str) -> bool {
        match self.children.iter().position(|c| c.name == name) {
            Some(idx) => {
                self.children.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Keep only the children for which `keep` returns true.
    pub fn retain_children<F: FnMut(&DataSection) -> bool>(&mut self, keep: F) {
        self.children.retain(keep);
    }

    /// Remove every child (the section's own value is left alone).
    pub fn del_children(&mut self) {
        self.children.clear();
    }

    // -----------------------------------------------------------------------
    // Typed fields
    // -----------------------------------------------------------------------

    /// Read a string field, or `default` if the field is absent.
    pub fn read_string(&self, key: &str, default: &str) -> String {
        self.child(key)
            .map(|c| c.value.clone())
            .unwrap_or_else(|| default.to_string())
    }

    /// Read a bool field. Accepts `true`/`false` in any case as well as
    /// `1`/`0`; anything else yields `default`.
    pub fn read_bool(&self, key: &str, default: bool) -> bool {
        let Some(child) = self.child(key) else {
            return default;
        };
        match parse_bool(child.value.trim()) {
            Some(b) => b,
            None => {
                warn!(section = %self.name, key, value = %child.value, "malformed bool field");
                default
            }
        }
    }

    /// Read a 3-vector stored as three whitespace-separated numbers.
    pub fn read_vector3(&self, key: &str, default: [f32; 3]) -> [f32; 3] {
        let Some(child) = self.child(key) else {
            return default;
        };
        match parse_vector3(&child.value) {
            Some(v) => v,
            None => {
                warn!(section = %self.name, key, value = %child.value, "malformed vector field");
                default
            }
        }
    }

    pub fn write_string(&mut self, key: &str, value: &str) {
        if let Some(child) = self.open_section(key, true) {
            child.value = value.to_string();
        }
    }

    pub fn write_bool(&mut self, key: &str, value: bool) {
        self.write_string(key, if value { "true" } else { "false" });
    }

    pub fn write_vector3(&mut self, key: &str, value: [f32; 3]) {
        let text = format!("{} {} {}", value[0], value[1], value[2]);
        self.write_string(key, &text);
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") || text == "1" {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") || text == "0" {
        Some(false)
    } else {
        None
    }
}

fn parse_vector3(text: &str) -> Option<[f32; 3]> {
    let mut parts = text.split_whitespace().map(str::parse::<f32>);
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([x, y, z])
}
