use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of a structural path: a map key or an array position.
///
/// On the wire a JSON string is a key and a non-negative integer is an index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(u64),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        PathSegment::Key(value.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(value: String) -> Self {
        PathSegment::Key(value)
    }
}

impl From<u64> for PathSegment {
    fn from(value: u64) -> Self {
        PathSegment::Index(value)
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        PathSegment::Index(value as u64)
    }
}

/// Address of a node inside the state tree, root first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        Path(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the parent segments and the final segment.
    pub fn split_last(&self) -> Option<(&PathSegment, &[PathSegment])> {
        self.0.split_last()
    }
}

impl From<Vec<PathSegment>> for Path {
    fn from(value: Vec<PathSegment>) -> Self {
        Path(value)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_mixes_keys_and_indices() {
        let path: Path =
            serde_json::from_str(r#"["currentEncounter","tokens",0,"position","x"]"#).unwrap();
        assert_eq!(path.len(), 5);
        assert_eq!(path.segments()[2], PathSegment::Index(0));
        assert_eq!(path.to_string(), "/currentEncounter/tokens/0/position/x");
        assert_eq!(
            serde_json::to_string(&path).unwrap(),
            r#"["currentEncounter","tokens",0,"position","x"]"#
        );
    }

    #[test]
    fn negative_index_is_rejected() {
        assert!(serde_json::from_str::<Path>(r#"["tokens",-1]"#).is_err());
    }
}
