//! Slash-delimited addresses into JSON trees
//!
//! An address such as `items/3/stats/@@dmg*` is compiled once into a list of
//! [`PathElement`]s and then applied to any number of documents. Each element
//! works on the set of nodes produced by the previous one, so ranges and
//! wildcards fan out.
//!
//! `get_or_create` auto-vivifies: a missing key or array slot is inserted so
//! the address becomes valid for a following write. This mutates the tree even
//! when the caller only reads from the result. Use `get_or_null` for lookups
//! that must leave the document untouched.

use std::fmt;
use std::str::FromStr;

use glob::Pattern;
use serde_json::{Map, Value};

use crate::error::PathError;

/// One `/`-separated element of an address
#[derive(Debug, Clone)]
pub enum PathElement {
    /// Bare key into an object
    Key(String),
    /// Integer index into an array
    Index(usize),
    /// `-`: a new slot at the end of an array
    Append,
    /// `start-end`: inclusive index range (read-only fan-out)
    Range { start: usize, end: usize },
    /// `@@pattern`: every object key matching a shell-style wildcard
    Wildcard(Pattern),
}

impl PathElement {
    fn parse(token: &str) -> Result<Self, PathError> {
        if token == "-" {
            return Ok(PathElement::Append);
        }

        if let Some(pattern) = token.strip_prefix("@@") {
            return Pattern::new(pattern)
                .map(PathElement::Wildcard)
                .map_err(|source| PathError::InvalidWildcard {
                    pattern: pattern.to_string(),
                    source,
                });
        }

        if is_digits(token)
            && let Ok(index) = token.parse()
        {
            return Ok(PathElement::Index(index));
        }

        if let Some((start, end)) = token.split_once('-')
            && is_digits(start)
            && is_digits(end)
        {
            let start: usize = start.parse().map_err(|_| PathError::InvalidRange(token.to_string()))?;
            let end: usize = end.parse().map_err(|_| PathError::InvalidRange(token.to_string()))?;
            if start > end {
                return Err(PathError::InvalidRange(token.to_string()));
            }
            return Ok(PathElement::Range { start, end });
        }

        Ok(PathElement::Key(token.to_string()))
    }

    /// Empty container a missing node gets when this element has to descend into it
    fn container(&self) -> Value {
        match self {
            PathElement::Key(_) | PathElement::Wildcard(_) => Value::Object(Map::new()),
            _ => Value::Array(Vec::new()),
        }
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// A compiled address
#[derive(Debug, Clone)]
pub struct JsonPath {
    source: String,
    elements: Vec<PathElement>,
}

impl JsonPath {
    /// Compile an address. Leading, trailing and doubled slashes are ignored;
    /// the empty address refers to the root itself.
    pub fn compile(address: &str) -> Result<Self, PathError> {
        let elements = address
            .split('/')
            .filter(|token| !token.is_empty())
            .map(PathElement::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: address.to_string(),
            elements,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    /// Collect every node the address resolves to without touching the tree.
    /// Unresolvable addresses yield an empty list.
    pub fn get_or_null<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut out = Vec::new();
        collect_ref(root, &self.elements, &mut out);
        out
    }

    /// Collect every node the address resolves to, inserting missing keys and
    /// array slots on the way. Intermediate nodes that are not containers of
    /// the expected shape end that branch silently.
    pub fn get_or_create<'a>(&self, root: &'a mut Value) -> Vec<&'a mut Value> {
        let mut out = Vec::new();
        collect_mut(root, &self.elements, &mut out);
        out
    }

    /// Overwrite every addressed node with `value`. Returns how many were written.
    pub fn set(&self, root: &mut Value, value: Value) -> usize {
        let targets = self.get_or_create(root);
        let count = targets.len();
        for slot in targets {
            *slot = value.clone();
        }
        count
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_ref<'a>(node: &'a Value, elements: &[PathElement], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = elements.split_first() else {
        out.push(node);
        return;
    };

    match (head, node) {
        (PathElement::Key(key), Value::Object(map)) => {
            if let Some(child) = map.get(key) {
                collect_ref(child, rest, out);
            }
        }
        (PathElement::Index(index), Value::Array(arr)) => {
            if let Some(child) = arr.get(*index) {
                collect_ref(child, rest, out);
            }
        }
        (PathElement::Range { start, end }, Value::Array(arr)) => {
            for child in arr.iter().skip(*start).take(end - start + 1) {
                collect_ref(child, rest, out);
            }
        }
        (PathElement::Wildcard(pattern), Value::Object(map)) => {
            for (key, child) in map {
                if pattern.matches(key) {
                    collect_ref(child, rest, out);
                }
            }
        }
        _ => {}
    }
}

fn collect_mut<'a>(node: &'a mut Value, elements: &[PathElement], out: &mut Vec<&'a mut Value>) {
    let Some((head, rest)) = elements.split_first() else {
        out.push(node);
        return;
    };

    // Leaf slots get a zero, intermediate ones the container the next element needs
    let placeholder = || rest.first().map(PathElement::container).unwrap_or_else(|| Value::from(0));

    match head {
        PathElement::Key(key) => {
            if let Value::Object(map) = node {
                let child = map.entry(key.clone()).or_insert_with(placeholder);
                collect_mut(child, rest, out);
            }
        }
        PathElement::Index(index) => {
            if let Value::Array(arr) = node {
                if *index >= arr.len() {
                    arr.push(placeholder());
                }
                let index = (*index).min(arr.len() - 1);
                if let Some(child) = arr.get_mut(index) {
                    collect_mut(child, rest, out);
                }
            }
        }
        PathElement::Append => {
            if let Value::Array(arr) = node {
                arr.push(placeholder());
                if let Some(child) = arr.last_mut() {
                    collect_mut(child, rest, out);
                }
            }
        }
        PathElement::Range { start, end } => {
            if let Value::Array(arr) = node {
                for child in arr.iter_mut().skip(*start).take(end - start + 1) {
                    collect_mut(child, rest, out);
                }
            }
        }
        PathElement::Wildcard(pattern) => {
            if let Value::Object(map) = node {
                for (key, child) in map.iter_mut() {
                    if pattern.matches(key) {
                        collect_mut(child, rest, out);
                    }
                }
            }
        }
    }
}
