// ============================================================================
// Version Graph
// ============================================================================
//
// Versions are nodes, segments are directed edges. Paths are searched breadth
// first over (version, branch) states:
//
//   - fewest segments wins, ties go to the segment declared first
//   - untagged edges keep the branch of the path, tagged edges enter theirs
//   - a tagged edge is pruned once the path is on a different branch
//   - SWITCH edges are never pruned and set the branch to their own tag
//   - DOWNGRADE edges only take part when downgrades are allowed
//
// ============================================================================

use crate::core::{Branch, Result, SegmentKind, UpgradeError, Version, display_version};
use crate::script::Segment;
use std::collections::{HashMap, HashSet, VecDeque};

/// One segment of a resolved path plus the branch the database is on after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub segment: Segment,
    pub branch: Option<Branch>,
}

/// Ordered list of segments leading to a target version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.steps.iter().map(|step| &step.segment)
    }
}

type State = (Option<Version>, Option<Branch>);

#[derive(Debug, Clone, Default)]
pub struct VersionGraph {
    segments: Vec<Segment>,
    versions: HashSet<Version>,
}

impl VersionGraph {
    pub fn new(segments: &[Segment]) -> Result<Self> {
        let mut graph = Self::default();
        for segment in segments {
            graph.add_segment(segment.clone())?;
        }
        Ok(graph)
    }

    pub fn add_segment(&mut self, segment: Segment) -> Result<()> {
        if let Some(existing) = self.segments.iter().find(|s| {
            s.source() == segment.source()
                && s.target() == segment.target()
                && s.branch() == segment.branch()
        }) {
            return Err(UpgradeError::syntax(
                "version graph",
                segment.line(),
                "a unique source, target and branch",
                format!("duplicate segment {segment}, first declared as {existing}"),
            ));
        }
        if let Some(source) = segment.source() {
            self.versions.insert(source.clone());
        }
        self.versions.insert(segment.target().clone());
        self.segments.push(segment);
        Ok(())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.versions.contains(version)
    }

    fn check_from(&self, from: Option<&Version>) -> Result<()> {
        match from {
            Some(version) if !self.contains(version) => {
                Err(UpgradeError::VersionNotInScript(version.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn outgoing<'a>(&'a self, from: Option<&'a Version>) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |segment| segment.source() == from)
    }

    /// Branch after taking `edge` from a path on `branch`, or `None` when the edge is pruned.
    fn follow(edge: &Segment, branch: Option<&Branch>, allow_downgrade: bool) -> Option<Option<Branch>> {
        match (edge.kind(), edge.branch(), branch) {
            (SegmentKind::Downgrade, _, _) if !allow_downgrade => None,
            (SegmentKind::Switch, tag, _) => Some(tag.cloned()),
            (_, None, current) => Some(current.cloned()),
            (_, Some(tag), Some(current)) if tag != current => None,
            (_, Some(tag), _) => Some(Some(tag.clone())),
        }
    }

    /// Every version reachable from `from`, in discovery order.
    ///
    /// `from` itself comes first when it is a version.
    pub fn reachable_targets(
        &self,
        from: Option<&Version>,
        branch: Option<&Branch>,
        allow_downgrade: bool,
    ) -> Result<Vec<Version>> {
        self.check_from(from)?;

        let mut found: Vec<Version> = from.cloned().into_iter().collect();
        let start: State = (from.cloned(), branch.cloned());
        let mut visited: HashSet<State> = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start]);

        while let Some((version, branch)) = queue.pop_front() {
            for edge in self.outgoing(version.as_ref()) {
                let Some(next_branch) = Self::follow(edge, branch.as_ref(), allow_downgrade) else {
                    continue;
                };
                let next: State = (Some(edge.target().clone()), next_branch);
                if visited.insert(next.clone()) {
                    if !found.contains(edge.target()) {
                        found.push(edge.target().clone());
                    }
                    queue.push_back(next);
                }
            }
        }
        Ok(found)
    }

    /// Shortest path from `from` to `to`; empty when they are the same version.
    pub fn resolve_path(
        &self,
        from: Option<&Version>,
        branch: Option<&Branch>,
        to: &Version,
        allow_downgrade: bool,
    ) -> Result<Path> {
        self.check_from(from)?;
        if from == Some(to) {
            return Ok(Path::default());
        }

        let start: State = (from.cloned(), branch.cloned());
        let mut parents: HashMap<State, (State, usize)> = HashMap::new();
        let mut visited: HashSet<State> = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start]);

        while let Some(state) = queue.pop_front() {
            for (index, edge) in self.segments.iter().enumerate() {
                if edge.source() != state.0.as_ref() {
                    continue;
                }
                let Some(next_branch) = Self::follow(edge, state.1.as_ref(), allow_downgrade) else {
                    continue;
                };
                let next: State = (Some(edge.target().clone()), next_branch);
                if !visited.insert(next.clone()) {
                    continue;
                }
                parents.insert(next.clone(), (state.clone(), index));
                if edge.target() == to {
                    return Ok(self.unwind(&parents, next));
                }
                queue.push_back(next);
            }
        }

        Err(UpgradeError::NoPath {
            from: from.map(Version::to_string),
            to: to.to_string(),
        })
    }

    fn unwind(&self, parents: &HashMap<State, (State, usize)>, end: State) -> Path {
        let mut steps = Vec::new();
        let mut current = end;
        while let Some((previous, index)) = parents.get(&current) {
            steps.push(PathStep {
                segment: self.segments[*index].clone(),
                branch: current.1.clone(),
            });
            current = previous.clone();
        }
        steps.reverse();
        Path { steps }
    }

    /// Reachable versions, optionally limited to a prefix, that have no UPGRADE edge to another
    /// such version. These are the candidates for an open-ended target.
    pub fn tips(
        &self,
        from: Option<&Version>,
        branch: Option<&Branch>,
        allow_downgrade: bool,
        prefix: Option<&str>,
    ) -> Result<Vec<Version>> {
        let candidates: Vec<Version> = self
            .reachable_targets(from, branch, allow_downgrade)?
            .into_iter()
            .filter(|version| prefix.is_none_or(|prefix| version.as_str().starts_with(prefix)))
            .collect();

        let tips = candidates
            .iter()
            .filter(|version| {
                !self.segments.iter().any(|edge| {
                    edge.kind() == SegmentKind::Upgrade
                        && edge.source() == Some(*version)
                        && edge.target() != *version
                        && candidates.contains(edge.target())
                })
            })
            .cloned()
            .collect();
        Ok(tips)
    }

    /// `version` and every version reachable from it over UPGRADE edges.
    pub fn upgrade_closure(&self, version: &Version) -> HashSet<Version> {
        let mut closure = HashSet::from([version.clone()]);
        let mut queue = VecDeque::from([version.clone()]);
        while let Some(current) = queue.pop_front() {
            for edge in self.outgoing(Some(&current)) {
                if edge.kind() == SegmentKind::Upgrade && closure.insert(edge.target().clone()) {
                    queue.push_back(edge.target().clone());
                }
            }
        }
        closure
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for step in &self.steps {
            if first {
                write!(f, "{}", display_version(step.segment.source().map(Version::as_str)))?;
                first = false;
            }
            write!(f, " -> {}", step.segment.target())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(version: &str) -> Version {
        Version::from(version)
    }

    fn linear() -> VersionGraph {
        VersionGraph::new(&[
            Segment::upgrade(None, "1.0.1"),
            Segment::upgrade(Some("1.0.1"), "1.0.2"),
            Segment::upgrade(Some("1.0.2"), "1.0.3"),
            Segment::downgrade("1.0.3", "1.0.2"),
        ])
        .unwrap()
    }

    fn targets(path: &Path) -> Vec<String> {
        path.segments().map(|s| s.target().to_string()).collect()
    }

    #[test]
    fn test_path_from_nothing() {
        let graph = linear();
        let path = graph.resolve_path(None, None, &v("1.0.3"), false).unwrap();
        assert_eq!(targets(&path), vec!["1.0.1", "1.0.2", "1.0.3"]);
        assert_eq!(path.to_string(), "<no version> -> 1.0.1 -> 1.0.2 -> 1.0.3");
    }

    #[test]
    fn test_same_version_is_an_empty_path() {
        let graph = linear();
        let path = graph.resolve_path(Some(&v("1.0.2")), None, &v("1.0.2"), false).unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn test_downgrade_needs_permission() {
        let graph = linear();
        let err = graph
            .resolve_path(Some(&v("1.0.3")), None, &v("1.0.2"), false)
            .unwrap_err();
        assert!(matches!(err, UpgradeError::NoPath { .. }));
        assert_eq!(err.to_string(), "Target 1.0.2 is not reachable from version 1.0.3");

        let path = graph.resolve_path(Some(&v("1.0.3")), None, &v("1.0.2"), true).unwrap();
        assert_eq!(path.steps()[0].segment.kind(), SegmentKind::Downgrade);

        // Downgrades are never inferred
        assert!(graph.resolve_path(Some(&v("1.0.3")), None, &v("1.0.1"), true).is_err());
    }

    #[test]
    fn test_fewest_hops_then_declaration_order() {
        let graph = VersionGraph::new(&[
            Segment::upgrade(None, "1"),
            Segment::upgrade(Some("1"), "2"),
            Segment::upgrade(Some("2"), "3"),
            Segment::upgrade(Some("1"), "3").on_branch("fast"),
            Segment::upgrade(Some("1"), "3"),
        ])
        .unwrap();

        let path = graph.resolve_path(Some(&v("1")), None, &v("3"), false).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path.steps()[0].segment.branch(), Some(&Branch::from("fast")));
        assert_eq!(path.steps()[0].branch, Some(Branch::from("fast")));
    }

    #[test]
    fn test_branch_conflicting_edges_are_pruned() {
        let graph = VersionGraph::new(&[
            Segment::upgrade(None, "1"),
            Segment::upgrade(Some("1"), "2").on_branch("acme"),
            Segment::upgrade(Some("2"), "3").on_branch("globex"),
            Segment::upgrade(Some("2"), "2a").on_branch("acme"),
            Segment::upgrade(Some("2a"), "3"),
        ])
        .unwrap();

        let path = graph.resolve_path(Some(&v("1")), None, &v("3"), false).unwrap();
        assert_eq!(targets(&path), vec!["2", "2a", "3"]);
        // Untagged edges keep the branch of the path
        assert_eq!(path.steps()[2].branch, Some(Branch::from("acme")));

        let acme = Branch::from("acme");
        let reachable = graph.reachable_targets(Some(&v("2")), Some(&acme), false).unwrap();
        assert_eq!(reachable, vec![v("2"), v("2a"), v("3")]);

        let globex = Branch::from("globex");
        let err = graph.resolve_path(Some(&v("2")), Some(&globex), &v("2a"), false);
        assert!(err.is_err());
    }

    #[test]
    fn test_consecutive_steps_never_mix_branches() {
        let graph = VersionGraph::new(&[
            Segment::upgrade(None, "1"),
            Segment::upgrade(Some("1"), "2").on_branch("a"),
            Segment::upgrade(Some("1"), "2").on_branch("b"),
            Segment::upgrade(Some("2"), "3").on_branch("b"),
            Segment::upgrade(Some("2"), "3").on_branch("a"),
            Segment::upgrade(Some("3"), "4"),
        ])
        .unwrap();

        for from in [None, Some(v("1")), Some(v("2"))] {
            let path = graph.resolve_path(from.as_ref(), None, &v("4"), false).unwrap();
            let tags: Vec<&Branch> = path.segments().filter_map(Segment::branch).collect();
            assert!(tags.windows(2).all(|pair| pair[0] == pair[1]), "{path}: {tags:?}");
        }
    }

    #[test]
    fn test_path_follows_the_branch_that_reaches_the_target() {
        // The y edge is declared first but only x continues to C
        let graph = VersionGraph::new(&[
            Segment::upgrade(None, "A"),
            Segment::upgrade(Some("A"), "B").on_branch("y"),
            Segment::upgrade(Some("A"), "B").on_branch("x"),
            Segment::upgrade(Some("B"), "C").on_branch("x"),
        ])
        .unwrap();
        let x = Branch::from("x");
        let y = Branch::from("y");

        let path = graph.resolve_path(Some(&v("A")), None, &v("C"), false).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.steps()[0].segment.branch(), Some(&x));
        assert_eq!(path.steps()[1].segment.branch(), Some(&x));
        assert_eq!(path.steps()[1].branch, Some(x.clone()));

        let from_a = graph.reachable_targets(Some(&v("A")), None, false).unwrap();
        assert!(from_a.contains(&v("C")));
        for from in ["A", "B"] {
            let on_y = graph.reachable_targets(Some(&v(from)), Some(&y), false).unwrap();
            assert!(on_y.contains(&v("B")), "{from}: {on_y:?}");
            assert!(!on_y.contains(&v("C")), "{from}: {on_y:?}");
        }
        assert!(graph.resolve_path(Some(&v("B")), Some(&y), &v("C"), false).is_err());
    }

    #[test]
    fn test_switch_moves_between_branches() {
        let graph = VersionGraph::new(&[
            Segment::upgrade(None, "1"),
            Segment::upgrade(Some("1"), "2").on_branch("acme"),
            Segment::upgrade(Some("2"), "3").on_branch("globex"),
            Segment::switch("2", "2", Some("globex")),
            Segment::switch("3", "3", None),
        ])
        .unwrap();

        let acme = Branch::from("acme");
        let globex = Branch::from("globex");
        let path = graph.resolve_path(Some(&v("2")), Some(&acme), &v("3"), false).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.steps()[0].segment.kind(), SegmentKind::Switch);
        assert_eq!(path.steps()[0].branch, Some(globex.clone()));
        assert_eq!(path.steps()[1].branch, Some(globex));

        let states = graph.reachable_targets(Some(&v("2")), Some(&acme), false).unwrap();
        assert_eq!(states, vec![v("2"), v("3")]);

        // An untagged switch goes back to the main line
        let mut graph = graph;
        graph
            .add_segment(Segment::upgrade(Some("3"), "4").on_branch("acme"))
            .unwrap();
        let globex = Branch::from("globex");
        let path = graph.resolve_path(Some(&v("3")), Some(&globex), &v("4"), false).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.steps()[0].branch, None);
        assert_eq!(path.steps()[1].branch, Some(acme));
    }

    #[test]
    fn test_unknown_current_version() {
        let graph = linear();
        let err = graph.reachable_targets(Some(&v("0.9")), None, false).unwrap_err();
        assert!(matches!(err, UpgradeError::VersionNotInScript(version) if version == "0.9"));
    }

    #[test]
    fn test_tips_and_prefixes() {
        let graph = VersionGraph::new(&[
            Segment::upgrade(None, "1.0"),
            Segment::upgrade(Some("1.0"), "1.1"),
            Segment::upgrade(Some("1.1"), "2.0"),
            Segment::upgrade(None, "2.0"),
        ])
        .unwrap();

        assert_eq!(graph.tips(None, None, false, None).unwrap(), vec![v("2.0")]);
        assert_eq!(graph.tips(None, None, false, Some("1.")).unwrap(), vec![v("1.1")]);
        assert!(graph.tips(Some(&v("2.0")), None, false, Some("1.")).unwrap().is_empty());

        let path = graph.resolve_path(None, None, &v("2.0"), false).unwrap();
        assert_eq!(path.len(), 1);
    }

    #[test]
    fn test_upgrade_closure_ignores_downgrades() {
        let graph = linear();
        let closure = graph.upgrade_closure(&v("1.0.2"));
        assert_eq!(closure, HashSet::from([v("1.0.2"), v("1.0.3")]));
    }

    #[test]
    fn test_duplicate_segment_is_rejected() {
        let mut graph = linear();
        let err = graph.add_segment(Segment::upgrade(Some("1.0.1"), "1.0.2"));
        assert!(matches!(err, Err(UpgradeError::ScriptSyntax { .. })));
    }
}
