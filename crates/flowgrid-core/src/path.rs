//! Store paths and their 32-bit identifiers.
//!
//! A [`Path`] is an ordered sequence of string segments. Each path carries a
//! [`PathId`] derived by hashing `(parent_id, segment)` at construction, so
//! two equal paths always carry equal ids and map lookups never touch the
//! segment strings. Paths are the sole addressing scheme for stored values.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Unique 32-bit identifier for a [`Path`].
///
/// Derived by folding each segment into the parent's id with a 32-bit
/// FNV-1a round. Ids are stable across processes and runs, which is what
/// lets component ids double as persistent addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(pub(crate) u32);

impl PathId {
    /// The id of the root path.
    pub const ROOT: PathId = PathId(FNV_OFFSET);

    /// Returns the raw numeric identifier.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// One FNV-1a round over `(parent, segment)`.
fn derive_id(parent: PathId, segment: &str) -> PathId {
    let mut h = parent.0;
    for byte in segment.as_bytes() {
        h ^= u32::from(*byte);
        h = h.wrapping_mul(FNV_PRIME);
    }
    // Separator keeps "ab"/"c" distinct from "a"/"bc" chains.
    h ^= u32::from(b'/');
    h = h.wrapping_mul(FNV_PRIME);
    PathId(h)
}

/// An ordered sequence of segments addressing one stored value.
///
/// Cloning is cheap: segments live in a persistent vector. Equality and
/// hashing go through the interned [`PathId`]; ordering compares segments
/// lexicographically so serialized output is deterministic.
#[derive(Clone)]
pub struct Path {
    segments: im::Vector<String>,
    id: PathId,
}

impl Path {
    /// The root path (no segments).
    pub fn root() -> Self {
        Path {
            segments: im::Vector::new(),
            id: PathId::ROOT,
        }
    }

    /// Returns a new path extending `self` with one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let segment = segment.into();
        let id = derive_id(self.id, &segment);
        let mut segments = self.segments.clone();
        segments.push_back(segment);
        Path { segments, id }
    }

    /// Builds a path from root through the given segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        segments
            .into_iter()
            .fold(Path::root(), |p, s| p.child(s))
    }

    /// Parses a JSON-Pointer-style string (`"/audio/graph/sample-rate"`).
    ///
    /// The empty string and `"/"` both denote the root.
    pub fn parse(pointer: &str) -> Result<Self, CoreError> {
        if pointer.is_empty() || pointer == "/" {
            return Ok(Path::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(CoreError::MalformedPath(pointer.to_owned()));
        };
        if rest.split('/').any(str::is_empty) {
            return Err(CoreError::MalformedPath(pointer.to_owned()));
        }
        Ok(Path::from_segments(rest.split('/')))
    }

    /// The interned identifier.
    #[inline]
    pub fn id(&self) -> PathId {
        self.id
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop_back();
        Some(Path::from_segments(segments))
    }

    /// The final segment, or `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterates the segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// True if `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix
                .segments
                .iter()
                .zip(self.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Renders the JSON-Pointer form (`"/a/b"`, root renders as `"/"`).
    pub fn pointer(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_owned();
        }
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            out.push_str(segment);
        }
        out
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Path {}

impl std::hash::Hash for Path {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.pointer())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pointer())
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pointer())
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Path::parse(&s).map_err(serde::de::Error::custom)
    }
}
