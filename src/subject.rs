// subject id sets are kept as roaring bitmaps so that combining filters is cheap
use roaring::RoaringTreemap;
use serde::ser::{Serialize, SerializeSeq, Serializer};

use std::fmt;
use std::ops::{BitAnd, BitOr, Sub};

// ------------- Subject -------------
pub type SubjectId = u64;

/// Number of subjects a preview evaluation is capped to.
pub const PREVIEW_ROW_LIMIT: usize = 10;

/// An unordered collection of subject identities produced by evaluating a filter.
///
/// Iteration follows the underlying bitmap, which happens to be ascending. Callers
/// must not rely on that beyond "the order this set exposes".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubjectSet {
    members: RoaringTreemap,
}

impl SubjectSet {
    pub fn new() -> Self {
        Self {
            members: RoaringTreemap::new(),
        }
    }
    pub fn insert(&mut self, subject: SubjectId) -> bool {
        self.members.insert(subject)
    }
    pub fn contains(&self, subject: SubjectId) -> bool {
        self.members.contains(subject)
    }
    pub fn len(&self) -> usize {
        self.members.len() as usize
    }
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = SubjectId> + '_ {
        self.members.iter()
    }
    pub fn intersection(&self, other: &SubjectSet) -> SubjectSet {
        Self {
            members: &self.members & &other.members,
        }
    }
    pub fn union(&self, other: &SubjectSet) -> SubjectSet {
        Self {
            members: &self.members | &other.members,
        }
    }
    pub fn difference(&self, other: &SubjectSet) -> SubjectSet {
        Self {
            members: &self.members - &other.members,
        }
    }
    pub fn is_subset(&self, other: &SubjectSet) -> bool {
        self.members.is_subset(&other.members)
    }

    /// Takes the first `limit` members in iteration order, or all of them when
    /// fewer are available.
    pub fn capped(&self, limit: usize) -> SubjectSet {
        self.iter().take(limit).collect()
    }
}

impl FromIterator<SubjectId> for SubjectSet {
    fn from_iter<I: IntoIterator<Item = SubjectId>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

impl BitAnd for &SubjectSet {
    type Output = SubjectSet;
    fn bitand(self, rhs: Self) -> SubjectSet {
        self.intersection(rhs)
    }
}
impl BitOr for &SubjectSet {
    type Output = SubjectSet;
    fn bitor(self, rhs: Self) -> SubjectSet {
        self.union(rhs)
    }
}
impl Sub for &SubjectSet {
    type Output = SubjectSet;
    fn sub(self, rhs: Self) -> SubjectSet {
        self.difference(rhs)
    }
}

impl fmt::Display for SubjectSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ids: Vec<String> = self.iter().map(|id| id.to_string()).collect();
        write!(f, "{{{}}}", ids.join(","))
    }
}

impl Serialize for SubjectSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for id in self.iter() {
            seq.serialize_element(&id)?;
        }
        seq.end()
    }
}

// ------------- Preview -------------
/// Truncates a combined result to the preview sample size.
pub fn cap_population(combined: &SubjectSet, limit: usize) -> SubjectSet {
    combined.capped(limit)
}
