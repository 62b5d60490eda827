//! Choosing the segments that take a database from its current version to a
//! requested target.
//!
//! Resolution is a breadth-first search over the patch graph, so a path has
//! the fewest segments possible and ties go to declaration order. Downgrade
//! segments are only considered once a search over forward segments failed,
//! and only when allowed.
use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::{Error, RatchetResult};
use crate::upgrade::{PatchSegment, SegmentKind, UpgradeFile};

/// The version an upgrade should end at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Target {
    /// Follow forward segments until a choice would have to be made.
    #[default]
    Latest,
    /// Exactly this version.
    Exact(String),
    /// The deepest reachable version starting with this prefix (`"1.0.*"`).
    Prefix(String),
}

impl Target {
    pub fn parse(target: Option<&str>) -> Self {
        match target.map(str::trim) {
            None | Some("") => Self::Latest,
            Some(t) => match t.strip_suffix('*') {
                Some(prefix) => Self::Prefix(prefix.to_string()),
                None => Self::Exact(t.to_string()),
            },
        }
    }
}

impl FromStr for Target {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(Some(s)))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "<latest>"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Prefix(p) => write!(f, "{p}*"),
        }
    }
}

/// Path resolution over the graph of one [`UpgradeFile`].
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'f> {
    file: &'f UpgradeFile,
}

// The result of one breadth-first search: versions in discovery order and the
// segment each was first reached by.
struct Search<'a, 'f> {
    order: Vec<Option<&'a str>>,
    arrived_by: HashMap<Option<&'a str>, &'f PatchSegment>,
}

impl<'a, 'f: 'a> Search<'a, 'f> {
    fn contains(&self, version: &str) -> bool {
        self.arrived_by.contains_key(&Some(version))
    }

    fn path_to(&self, version: Option<&'a str>) -> Vec<&'f PatchSegment> {
        let mut path = Vec::new();
        let mut node = version;
        while let Some(segment) = self.arrived_by.get(&node) {
            path.push(*segment);
            node = segment.source();
        }
        path.reverse();
        path
    }

    // The last discovered match whose arriving segment is not open, or the
    // last open one when all are open.
    fn best_match(&self, prefix: &str) -> Option<Option<&'a str>> {
        let candidates: Vec<_> = self
            .order
            .iter()
            .copied()
            .filter(|v| v.is_some_and(|v| v.starts_with(prefix)))
            .collect();
        let closed = candidates
            .iter()
            .rev()
            .find(|v| self.arrived_by.get(*v).is_none_or(|s| !s.is_open()));
        closed.or(candidates.last()).copied()
    }
}

fn phases(downgrade_allowed: bool) -> &'static [bool] {
    if downgrade_allowed {
        &[false, true]
    } else {
        &[false]
    }
}

impl<'f> Resolver<'f> {
    pub fn new(file: &'f UpgradeFile) -> Self {
        Self { file }
    }

    // With `through_open` false, versions reached by an open segment are
    // found but not expanded.
    fn search<'a>(
        &self,
        current: Option<&'a str>,
        downgrade: bool,
        through_open: bool,
    ) -> Search<'a, 'f>
    where
        'f: 'a,
    {
        let mut order = vec![current];
        let mut arrived_by = HashMap::new();
        let mut queue = VecDeque::from([current]);

        while let Some(node) = queue.pop_front() {
            for segment in self.file.segments_from(node) {
                if segment.kind().is_downgrade() && !downgrade {
                    continue;
                }
                let next = Some(segment.target());
                if next == current || arrived_by.contains_key(&next) {
                    continue;
                }
                arrived_by.insert(next, segment);
                order.push(next);
                if through_open || !segment.is_open() {
                    queue.push_back(next);
                }
            }
        }

        Search { order, arrived_by }
    }

    /// The ordered segments that move `current` to `target`.
    pub fn resolve(
        &self,
        current: Option<&str>,
        target: &Target,
        downgrade_allowed: bool,
    ) -> RatchetResult<Vec<&'f PatchSegment>> {
        let path = match target {
            Target::Latest => self.latest(current),
            Target::Exact(version) => {
                if current == Some(version.as_str()) {
                    return Ok(Vec::new());
                }
                let found = phases(downgrade_allowed).iter().find_map(|&downgrade| {
                    let search = self.search(current, downgrade, true);
                    search
                        .contains(version)
                        .then(|| search.path_to(Some(version.as_str())))
                });
                found.ok_or_else(|| self.unreachable(current, target, downgrade_allowed))?
            }
            Target::Prefix(prefix) => {
                let found = phases(downgrade_allowed).iter().find_map(|&downgrade| {
                    let search = self.search(current, downgrade, true);
                    search.best_match(prefix).map(|v| search.path_to(v))
                });
                found.ok_or_else(|| self.unreachable(current, target, downgrade_allowed))?
            }
        };

        log::debug!(
            target: "ratchet",
            "resolved {} segments from {} to {target}",
            path.len(),
            crate::upgrade::display_version(current)
        );
        Ok(path)
    }

    // Forward segments while there is exactly one way to go.
    fn latest(&self, current: Option<&str>) -> Vec<&'f PatchSegment> {
        let mut path = Vec::new();
        let mut visited: HashSet<Option<&str>> = HashSet::from([current]);
        let mut node = current;

        loop {
            let forward: Vec<&'f PatchSegment> = self
                .file
                .segments_from(node)
                .filter(|s| !s.kind().is_downgrade() && !visited.contains(&Some(s.target())))
                .collect();
            let Some(next) = forward.first().copied() else {
                break;
            };
            if forward.iter().any(|s| s.target() != next.target()) {
                break;
            }
            visited.insert(Some(next.target()));
            path.push(next);
            node = Some(next.target());
        }

        path
    }

    /// Versions reachable from `current` in discovery order, `current` first.
    /// An open segment's target is listed but the versions beyond it are not.
    pub fn reachable(&self, current: Option<&str>, downgrade_allowed: bool) -> Vec<String> {
        self.search(current, downgrade_allowed, false)
            .order
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect()
    }

    /// Versions a caller could ask for from `current`, optionally filtered by
    /// `prefix`. With `tips`, versions that can still be upgraded to another
    /// matching version are left out.
    pub fn targets(
        &self,
        current: Option<&str>,
        tips: bool,
        prefix: Option<&str>,
        downgrade_allowed: bool,
    ) -> Vec<String> {
        let prefix = prefix.unwrap_or("");
        self.reachable(current, downgrade_allowed)
            .into_iter()
            .filter(|v| v.starts_with(prefix))
            .filter(|v| {
                !tips
                    || !self.file.segments_from(Some(v.as_str())).any(|s| {
                        s.kind() == SegmentKind::Upgrade && s.target().starts_with(prefix)
                    })
            })
            .collect()
    }

    fn unreachable(&self, current: Option<&str>, target: &Target, downgrade_allowed: bool) -> Error {
        let reachable = self
            .reachable(current, downgrade_allowed)
            .into_iter()
            .filter(|v| Some(v.as_str()) != current)
            .collect();
        Error::UnreachableTarget {
            current: current.map(str::to_string),
            target: target.to_string(),
            reachable,
        }
    }
}
