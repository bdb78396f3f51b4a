//! Bidirectional text deltas for the `@txt` operator; rich-text delta
//! composition beyond this narrow surface is out of scope. Wraps the
//! `operational-transform` crate behind a `compose`/`apply`/two-sided-
//! `transform` surface.

use operational_transform::{Operation as OtOp, OperationSeq};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TextDeltaError {
    #[error("text delta does not apply to the given base length")]
    LengthMismatch,
}

/// A composable, transformable text edit. Serializes as a flat op list so
/// it can ride inside an `Operation::Txt` the same way any other JSON value
/// does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextDelta(pub(crate) OperationSeq);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "lowercase")]
enum WireOp {
    Retain(u64),
    Insert(String),
    Delete(u64),
}

impl TextDelta {
    pub fn identity() -> Self {
        Self(OperationSeq::default())
    }

    pub fn retain(&mut self, n: u64) {
        self.0.retain(n);
    }

    pub fn insert(&mut self, s: &str) {
        self.0.insert(s);
    }

    pub fn delete(&mut self, n: u64) {
        self.0.delete(n);
    }

    pub fn is_identity(&self) -> bool {
        self.0.ops().is_empty()
    }

    pub fn apply(&self, base: &str) -> Result<String, TextDeltaError> {
        self.0.apply(base).map_err(|_| TextDeltaError::LengthMismatch)
    }

    /// Composes `self` followed by `other` into a single delta.
    pub fn compose(&self, other: &Self) -> Result<Self, TextDeltaError> {
        self.0
            .compose(&other.0)
            .map(Self)
            .map_err(|_| TextDeltaError::LengthMismatch)
    }

    /// Two-sided OT transform: returns `(self', other')` such that applying
    /// `self` then `other'` yields the same result as `other` then `self'`.
    pub fn transform(&self, other: &Self) -> Result<(Self, Self), TextDeltaError> {
        let (a, b) = self
            .0
            .transform(&other.0)
            .map_err(|_| TextDeltaError::LengthMismatch)?;
        Ok((Self(a), Self(b)))
    }

    fn to_wire(&self) -> Vec<WireOp> {
        self.0
            .ops()
            .iter()
            .map(|op| match op {
                OtOp::Retain(n) => WireOp::Retain(*n),
                OtOp::Insert(s) => WireOp::Insert(s.clone()),
                OtOp::Delete(n) => WireOp::Delete(*n),
            })
            .collect()
    }

    fn from_wire(ops: Vec<WireOp>) -> Self {
        let mut seq = OperationSeq::default();
        for op in ops {
            match op {
                WireOp::Retain(n) => seq.retain(n),
                WireOp::Insert(s) => seq.insert(&s),
                WireOp::Delete(n) => seq.delete(n),
            }
        }
        Self(seq)
    }
}

impl Serialize for TextDelta {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TextDelta {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let ops = Vec::<WireOp>::deserialize(deserializer)?;
        Ok(Self::from_wire(ops))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_then_apply() {
        let mut a = TextDelta::identity();
        a.insert("hello");
        let mut b = TextDelta::identity();
        b.retain(5);
        b.insert(" world");
        let composed = a.compose(&b).unwrap();
        assert_eq!(composed.apply("").unwrap(), "hello world");
    }

    #[test]
    fn transform_converges() {
        let mut a = TextDelta::identity();
        a.retain(5);
        a.insert("A");
        let mut b = TextDelta::identity();
        b.retain(5);
        b.insert("B");
        let (a_prime, b_prime) = a.transform(&b).unwrap();
        let base = "hello";
        let via_a = a.apply(base).unwrap();
        let via_a_then_b = b_prime.apply(&via_a).unwrap();
        let via_b = b.apply(base).unwrap();
        let via_b_then_a = a_prime.apply(&via_b).unwrap();
        assert_eq!(via_a_then_b, via_b_then_a);
    }
}
