//! Locations inside a JSON artifact.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One step of an [`IssuePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Path from the artifact root to a value, rendered as `sections[0].title`.
///
/// The root renders as `$`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IssuePath(Vec<PathSegment>);

impl IssuePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Returns a new path extended by an object key.
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    /// Returns a new path extended by an array index.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Whether `self` lies strictly inside `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &IssuePath) -> bool {
        self.0.len() > ancestor.0.len() && self.0.starts_with(&ancestor.0)
    }

    /// The path up to and including its deepest array index, if any.
    pub fn enclosing_element(&self) -> Option<IssuePath> {
        let last_index = self
            .0
            .iter()
            .rposition(|segment| matches!(segment, PathSegment::Index(_)))?;
        Some(Self(self.0[..=last_index].to_vec()))
    }

    /// Resolves the path against `value`.
    pub fn get<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.0.iter().try_fold(value, |current, segment| match segment {
            PathSegment::Key(key) => current.get(key.as_str()),
            PathSegment::Index(index) => current.get(*index),
        })
    }

    /// Replaces the value at this path. Returns `false` when the path does not exist.
    pub fn set(&self, target: &mut Value, replacement: Value) -> bool {
        let mut current = target;
        for segment in &self.0 {
            let next = match segment {
                PathSegment::Key(key) => current.get_mut(key.as_str()),
                PathSegment::Index(index) => current.get_mut(*index),
            };
            match next {
                Some(next) => current = next,
                None => return false,
            }
        }
        *current = replacement;
        true
    }
}

impl fmt::Display for IssuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) if i == 0 => write!(f, "$[{}]", index)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl FromStr for IssuePath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s.strip_prefix('$').unwrap_or(s);
        let mut segments = Vec::new();

        for part in body.split('.').filter(|part| !part.is_empty()) {
            let (key, mut rest) = match part.find('[') {
                Some(idx) => (&part[..idx], &part[idx..]),
                None => (part, ""),
            };
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped
                    .find(']')
                    .ok_or_else(|| format!("unterminated index in path '{}'", s))?;
                let index = stripped[..close]
                    .parse()
                    .map_err(|_| format!("invalid index in path '{}'", s))?;
                segments.push(PathSegment::Index(index));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(format!("unexpected '{}' in path '{}'", rest, s));
            }
        }

        Ok(Self(segments))
    }
}

impl Serialize for IssuePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IssuePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display() {
        assert_eq!(IssuePath::root().to_string(), "$");
        assert_eq!(IssuePath::root().key("outcomes").index(2).to_string(), "outcomes[2]");
        assert_eq!(
            IssuePath::root().key("sections").index(0).key("title").to_string(),
            "sections[0].title"
        );
        assert_eq!(IssuePath::root().index(1).key("text").to_string(), "$[1].text");
    }

    #[test]
    fn test_parse_roundtrip_shapes() {
        for raw in ["$", "outcomes[2]", "sections[0].title", "$[1].text", "a[0][3].b"] {
            let path: IssuePath = raw.parse().unwrap();
            assert_eq!(path.to_string(), raw);
        }
        assert!("a[x]".parse::<IssuePath>().is_err());
    }

    #[test]
    fn test_get_and_set() {
        let mut value = json!({"modules": [{"title": "One"}, {"title": "Two"}]});
        let path = IssuePath::root().key("modules").index(1).key("title");
        assert_eq!(path.get(&value), Some(&json!("Two")));
        assert!(path.set(&mut value, json!("Second")));
        assert_eq!(value["modules"][1]["title"], "Second");
        assert!(!IssuePath::root().key("missing").set(&mut value, json!(1)));
    }

    #[test]
    fn test_enclosing_element() {
        let path = IssuePath::root().key("modules").index(3).key("lessons").index(1).key("title");
        assert_eq!(path.enclosing_element().unwrap().to_string(), "modules[3].lessons[1]");
        assert!(IssuePath::root().key("title").enclosing_element().is_none());
    }

    #[test]
    fn test_descendant() {
        let parent = IssuePath::root().key("modules").index(0);
        assert!(parent.key("title").is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&parent));
    }
}
