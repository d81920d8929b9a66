use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::types::{DependencyEdge, DependencyKind};

type Adjacency = HashMap<PathBuf, HashMap<PathBuf, usize>>;

/// Edges discovered while building pages.
///
/// Every edge is owned by the page whose composition discovered it, so one
/// page can be re-recorded without disturbing edges other pages share (two
/// pages that both pull in `header.html` each own a `header.html → nav.html`
/// edge). Adjacency entries are reference counted across owners.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    owners: HashMap<PathBuf, Vec<DependencyEdge>>,
    forward: Adjacency,
    reverse: Adjacency,
    pages: HashSet<PathBuf>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything previously recorded for `page`.
    pub fn record_page(&mut self, page: &Path, edges: Vec<DependencyEdge>) {
        self.remove_page(page);
        for edge in &edges {
            link(&mut self.forward, &edge.from, &edge.to);
            link(&mut self.reverse, &edge.to, &edge.from);
        }
        self.owners.insert(page.to_path_buf(), edges);
        self.pages.insert(page.to_path_buf());
    }

    /// Adds a single edge owned by `from`.
    pub fn add_edge(&mut self, from: &Path, to: &Path, kind: DependencyKind) {
        let edge = DependencyEdge::new(from, to, kind);
        if self
            .owners
            .get(from)
            .is_some_and(|edges| edges.contains(&edge))
        {
            return;
        }
        link(&mut self.forward, from, to);
        link(&mut self.reverse, to, from);
        self.owners.entry(from.to_path_buf()).or_default().push(edge);
    }

    pub fn remove_page(&mut self, page: &Path) {
        if let Some(edges) = self.owners.remove(page) {
            for edge in edges {
                unlink(&mut self.forward, &edge.from, &edge.to);
                unlink(&mut self.reverse, &edge.to, &edge.from);
            }
        }
        self.pages.remove(page);
    }

    pub fn is_page(&self, path: &Path) -> bool {
        self.pages.contains(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pages.contains(path) || self.forward.contains_key(path) || self.reverse.contains_key(path)
    }

    pub fn pages(&self) -> Vec<PathBuf> {
        let mut pages: Vec<PathBuf> = self.pages.iter().cloned().collect();
        pages.sort();
        pages
    }

    /// Edges recorded for `page` by its last composition.
    pub fn edges_of(&self, page: &Path) -> &[DependencyEdge] {
        self.owners.get(page).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Everything `page` transitively depends on, sorted.
    pub fn dependencies(&self, page: &Path) -> Vec<PathBuf> {
        traverse(&self.forward, page).into_iter().collect()
    }

    /// Pages whose output transitively depends on `path`, sorted. `path`
    /// itself is not part of the answer.
    pub fn affected_pages(&self, path: &Path) -> Vec<PathBuf> {
        traverse(&self.reverse, path)
            .into_iter()
            .filter(|node| self.pages.contains(node))
            .collect()
    }

    pub fn clear(&mut self) {
        self.owners.clear();
        self.forward.clear();
        self.reverse.clear();
        self.pages.clear();
    }
}

fn link(adjacency: &mut Adjacency, from: &Path, to: &Path) {
    *adjacency
        .entry(from.to_path_buf())
        .or_default()
        .entry(to.to_path_buf())
        .or_insert(0) += 1;
}

fn unlink(adjacency: &mut Adjacency, from: &Path, to: &Path) {
    let Some(targets) = adjacency.get_mut(from) else {
        return;
    };
    if let Some(count) = targets.get_mut(to) {
        *count -= 1;
        if *count == 0 {
            targets.remove(to);
        }
    }
    if targets.is_empty() {
        adjacency.remove(from);
    }
}

fn traverse(adjacency: &Adjacency, start: &Path) -> BTreeSet<PathBuf> {
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([start.to_path_buf()]);
    visited.insert(start.to_path_buf());

    while let Some(node) = queue.pop_front() {
        let Some(neighbours) = adjacency.get(&node) else {
            continue;
        };
        for neighbour in neighbours.keys() {
            if visited.insert(neighbour.clone()) {
                found.insert(neighbour.clone());
                queue.push_back(neighbour.clone());
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(value: &str) -> PathBuf {
        PathBuf::from(value)
    }

    fn include(from: &str, to: &str) -> DependencyEdge {
        DependencyEdge::new(from, to, DependencyKind::Include)
    }

    fn site_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.record_page(
            &path("index.html"),
            vec![
                include("index.html", ".components/header.html"),
                include(".components/header.html", ".components/nav.html"),
            ],
        );
        graph.record_page(
            &path("about.html"),
            vec![
                include("about.html", ".components/header.html"),
                include(".components/header.html", ".components/nav.html"),
                DependencyEdge::new("about.html", "style.css", DependencyKind::Asset),
            ],
        );
        graph.record_page(&path("contact.html"), vec![]);
        graph
    }

    #[test]
    fn test_affected_pages_is_transitive() {
        let graph = site_graph();
        assert_eq!(
            graph.affected_pages(&path(".components/nav.html")),
            vec![path("about.html"), path("index.html")]
        );
        assert_eq!(graph.affected_pages(&path("style.css")), vec![path("about.html")]);
        assert!(graph.affected_pages(&path("unrelated.html")).is_empty());
    }

    #[test]
    fn test_dependencies_are_transitive() {
        let graph = site_graph();
        assert_eq!(
            graph.dependencies(&path("index.html")),
            vec![
                path(".components/header.html"),
                path(".components/nav.html")
            ]
        );
    }

    #[test]
    fn test_shared_edges_survive_rerecording_one_owner() {
        let mut graph = site_graph();
        graph.record_page(&path("index.html"), vec![]);

        assert_eq!(
            graph.affected_pages(&path(".components/nav.html")),
            vec![path("about.html")]
        );
        assert!(graph.is_page(&path("index.html")));
    }

    #[test]
    fn test_remove_page_drops_its_edges() {
        let mut graph = site_graph();
        graph.remove_page(&path("about.html"));
        graph.remove_page(&path("index.html"));

        assert!(graph.affected_pages(&path(".components/nav.html")).is_empty());
        assert!(!graph.contains(&path(".components/header.html")));
        assert_eq!(graph.pages(), vec![path("contact.html")]);
    }

    #[test]
    fn test_reverse_query_terminates_on_cycles() {
        let mut graph = DependencyGraph::new();
        graph.record_page(
            &path("a.html"),
            vec![DependencyEdge::new(path("a.html"), path("b.html"), DependencyKind::Include)],
        );
        graph.add_edge(&path("b.html"), &path("a.html"), DependencyKind::Include);

        assert_eq!(graph.affected_pages(&path("b.html")), vec![path("a.html")]);
        assert_eq!(graph.dependencies(&path("a.html")), vec![path("b.html")]);
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&path("page.html"), &path("logo.png"), DependencyKind::Asset);
        graph.add_edge(&path("page.html"), &path("logo.png"), DependencyKind::Asset);
        assert_eq!(graph.edges_of(&path("page.html")).len(), 1);
    }
}
