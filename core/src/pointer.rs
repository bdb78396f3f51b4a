//! RFC 6901 JSON Pointer parsing, escaping and traversal.

use crate::error::{PatchError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A parsed, owned JSON Pointer: a sequence of decoded tokens.
///
/// The empty pointer (`PointerBuf::root()`) denotes the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerBuf(Vec<String>);

/// How a token on a sequence should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqIndex {
    /// `-`: one past the end.
    Append,
    At(usize),
}

impl PointerBuf {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_tokens(tokens: Vec<String>) -> Self {
        Self(tokens)
    }

    /// Parses an RFC 6901 pointer string (`""` or `/a/b/~0~1`).
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        if !s.starts_with('/') {
            return Err(PatchError::PathType(Self::root()));
        }
        let tokens = s[1..]
            .split('/')
            .map(decode_token)
            .collect::<Vec<_>>();
        Ok(Self(tokens))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(token.into());
        Self(tokens)
    }

    /// All but the last token.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// True if `self` is `other` or a descendant of `other`.
    pub fn starts_with(&self, other: &PointerBuf) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    /// True if `self` is a strict descendant of `other`.
    pub fn is_descendant_of(&self, other: &PointerBuf) -> bool {
        self.0.len() > other.0.len() && self.starts_with(other)
    }

    /// Prefixes every token of `rest` onto `self` (used by `atPath`).
    pub fn join(&self, rest: &PointerBuf) -> Self {
        let mut tokens = self.0.clone();
        tokens.extend(rest.0.iter().cloned());
        Self(tokens)
    }
}

impl fmt::Display for PointerBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.0 {
            write!(f, "/{}", encode_token(token))?;
        }
        Ok(())
    }
}

impl Serialize for PointerBuf {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PointerBuf {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PointerBuf::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn decode_token(raw: &str) -> String {
    if !raw.contains('~') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.peek() {
                Some('0') => {
                    out.push('~');
                    chars.next();
                }
                Some('1') => {
                    out.push('/');
                    chars.next();
                }
                _ => out.push('~'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn encode_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Parses a sequence token: a non-negative integer with no leading zeros, or `-`.
pub fn parse_seq_index(token: &str, len: usize) -> Result<SeqIndex> {
    if token == "-" {
        return Ok(SeqIndex::Append);
    }
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PatchError::PathType(PointerBuf::root()));
    }
    let index: usize = token.parse().map_err(|_| PatchError::PathType(PointerBuf::root()))?;
    let _ = len;
    Ok(SeqIndex::At(index))
}

/// Strict, read-only traversal: fails with `PathNotFound`/`PathType` on any miss.
pub fn traverse<'v>(value: &'v Value, ptr: &PointerBuf) -> Result<&'v Value> {
    let mut cur = value;
    for (i, token) in ptr.tokens().iter().enumerate() {
        cur = match cur {
            Value::Object(map) => map
                .get(token)
                .ok_or_else(|| PatchError::PathNotFound(ptr.clone()))?,
            Value::Array(arr) => match parse_seq_index(token, arr.len())? {
                SeqIndex::Append => return Err(PatchError::PathNotFound(ptr.clone())),
                SeqIndex::At(idx) => arr.get(idx).ok_or_else(|| PatchError::PathNotFound(ptr.clone()))?,
            },
            _ => {
                let _ = i;
                return Err(PatchError::PathType(ptr.clone()));
            }
        };
    }
    Ok(cur)
}

/// Auto-creation policy used while traversing to the parent of the final token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCreate {
    /// `replace`: missing intermediates become empty mappings, never sequences.
    MappingsOnly,
    /// `add`: an intermediate becomes a sequence only if the following token is `"0"`.
    FirstElementAware,
    /// No auto-creation; missing intermediates are `PathNotFound`.
    None,
}

/// Traverses to the parent container of the pointer's last token, creating
/// missing intermediates per `policy`. Returns the parent and the last token.
pub fn traverse_parent_mut<'v>(
    value: &'v mut Value,
    ptr: &PointerBuf,
    policy: AutoCreate,
) -> Result<(&'v mut Value, &'v str)> {
    let tokens = ptr.tokens();
    if tokens.is_empty() {
        // The root has no parent/key pair to return; a root `replace` is
        // assigned directly by the caller before reaching here. Any other op
        // kind addressing the root has no valid parent to traverse to.
        return Err(PatchError::PathNotFound(ptr.clone()));
    }
    let mut cur = value;
    for i in 0..tokens.len() - 1 {
        let token = &tokens[i];
        let next_token = &tokens[i + 1];
        let missing = match cur {
            Value::Object(map) => !map.contains_key(token),
            Value::Array(_) => false,
            _ => return Err(PatchError::PathType(ptr.clone())),
        };
        if missing {
            match policy {
                AutoCreate::None => return Err(PatchError::PathNotFound(ptr.clone())),
                AutoCreate::MappingsOnly => {
                    insert_missing(cur, token, Value::Object(Map::new()), ptr)?;
                }
                AutoCreate::FirstElementAware => {
                    let container = if next_token == "0" {
                        Value::Array(Vec::new())
                    } else {
                        Value::Object(Map::new())
                    };
                    insert_missing(cur, token, container, ptr)?;
                }
            }
        }
        cur = step_mut(cur, token, ptr)?;
    }
    Ok((cur, tokens.last().unwrap().as_str()))
}

fn insert_missing(cur: &mut Value, token: &str, container: Value, ptr: &PointerBuf) -> Result<()> {
    match cur {
        Value::Object(map) => {
            map.insert(token.to_string(), container);
            Ok(())
        }
        _ => Err(PatchError::PathType(ptr.clone())),
    }
}

fn step_mut<'v>(cur: &'v mut Value, token: &str, ptr: &PointerBuf) -> Result<&'v mut Value> {
    match cur {
        Value::Object(map) => map
            .get_mut(token)
            .ok_or_else(|| PatchError::PathNotFound(ptr.clone())),
        Value::Array(arr) => match parse_seq_index(token, arr.len())? {
            SeqIndex::Append => Err(PatchError::PathNotFound(ptr.clone())),
            SeqIndex::At(idx) => arr.get_mut(idx).ok_or_else(|| PatchError::PathNotFound(ptr.clone())),
        },
        _ => Err(PatchError::PathType(ptr.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_escapes() {
        let ptr = PointerBuf::parse("/a~1b/c~0d").unwrap();
        assert_eq!(ptr.tokens(), &["a/b".to_string(), "c~d".to_string()]);
        assert_eq!(ptr.to_string(), "/a~1b/c~0d");
    }

    #[test]
    fn empty_pointer_is_root() {
        let ptr = PointerBuf::parse("").unwrap();
        assert!(ptr.is_root());
    }

    #[test]
    fn rejects_leading_zero_index() {
        assert!(parse_seq_index("01", 5).is_err());
        assert!(parse_seq_index("0", 5).is_ok());
    }

    #[test]
    fn traverses_nested_object() {
        let v = serde_json::json!({"a": {"b": [1,2,3]}});
        let ptr = PointerBuf::parse("/a/b/1").unwrap();
        assert_eq!(traverse(&v, &ptr).unwrap(), &serde_json::json!(2));
    }

    #[test]
    fn descendant_check() {
        let a = PointerBuf::parse("/a/b").unwrap();
        let b = PointerBuf::parse("/a/b/c").unwrap();
        assert!(b.is_descendant_of(&a));
        assert!(!a.is_descendant_of(&b));
    }
}
