//! Release dependency graph
//!
//! Each release depends on its source repository, transitively on the
//! repository's secret, and on every document its values references
//! name. The relation must be a DAG; a cycle would deadlock the
//! single-flight cache and is rejected up front.

use std::collections::HashMap;

use kiln_core::{
    HelmRelease, HelmRepository, ResourceDatabase, ResourceId, HELM_RELEASE_KIND,
    HELM_REPOSITORY_KIND, SOURCE_GROUP,
};

use crate::error::{BuildError, Result};

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<ResourceId, Vec<ResourceId>>,
}

impl DependencyGraph {
    /// Build the graph over every release in the database
    pub fn build(db: &ResourceDatabase) -> Result<Self> {
        let mut graph = Self::default();

        for (_, doc) in db.iter().filter(|(id, _)| id.kind == HELM_RELEASE_KIND) {
            let hr: HelmRelease = doc.decode()?;
            let release_id = hr.id();

            let source_id = hr.source_id(SOURCE_GROUP);
            graph.add_edge(release_id.clone(), source_id.clone());

            if let Some(source_doc) = db.get(&source_id) {
                if source_id.kind == HELM_REPOSITORY_KIND {
                    let repo: HelmRepository = source_doc.decode()?;
                    if let Some(secret_id) = repo.secret_id() {
                        graph.add_edge(source_id, secret_id);
                    }
                }
            }

            for reference in &hr.spec.values_from {
                let id =
                    ResourceId::core(&reference.kind, &hr.metadata.namespace, &reference.name);
                graph.add_edge(release_id.clone(), id);
            }
        }

        graph.check_cycles()?;
        Ok(graph)
    }

    fn add_edge(&mut self, from: ResourceId, to: ResourceId) {
        self.edges.entry(from).or_default().push(to);
    }

    pub fn dependencies(&self, id: &ResourceId) -> &[ResourceId] {
        self.edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Depth-first cycle detection; the error names the cycle path
    fn check_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: HashMap<&ResourceId, Color> =
            self.edges.keys().map(|k| (k, Color::White)).collect();

        fn visit<'a>(
            node: &'a ResourceId,
            edges: &'a HashMap<ResourceId, Vec<ResourceId>>,
            colors: &mut HashMap<&'a ResourceId, Color>,
            path: &mut Vec<&'a ResourceId>,
        ) -> Result<()> {
            colors.insert(node, Color::Gray);
            path.push(node);

            for next in edges.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
                match colors.get(next).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        let start = path.iter().position(|p| *p == next).unwrap_or(0);
                        let cycle = path[start..]
                            .iter()
                            .map(|p| p.to_string())
                            .chain(std::iter::once(next.to_string()))
                            .collect::<Vec<_>>()
                            .join(" -> ");
                        return Err(BuildError::CyclicDependency { cycle });
                    }
                    Color::White => {
                        if edges.contains_key(next) {
                            visit(next, edges, colors, path)?;
                        }
                    }
                    Color::Black => {}
                }
            }

            path.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        let nodes: Vec<&ResourceId> = self.edges.keys().collect();
        for node in nodes {
            if colors.get(node).copied().unwrap_or(Color::White) == Color::White {
                let mut path = Vec::new();
                visit(node, &self.edges, &mut colors, &mut path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Ingester;

    fn db(docs: &str) -> ResourceDatabase {
        let mut ingester = Ingester::new();
        ingester.ingest_str(docs, "fixture.yaml").unwrap();
        ingester.finish()
    }

    #[test]
    fn test_release_edges() {
        let db = db(r#"
apiVersion: helm.toolkit.fluxcd.io/v2
kind: HelmRelease
metadata:
  name: app
  namespace: team-a
spec:
  chart:
    spec:
      chart: podinfo
      sourceRef:
        kind: HelmRepository
        name: charts
  valuesFrom:
    - kind: ConfigMap
      name: overrides
---
apiVersion: source.toolkit.fluxcd.io/v1
kind: HelmRepository
metadata:
  name: charts
  namespace: team-a
spec:
  url: https://charts.example/
  secretRef:
    name: repo-auth
"#);

        let graph = DependencyGraph::build(&db).unwrap();

        let release = ResourceId::new("helm.toolkit.fluxcd.io", "HelmRelease", "team-a", "app");
        let deps = graph.dependencies(&release);
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&ResourceId::new(SOURCE_GROUP, "HelmRepository", "team-a", "charts")));
        assert!(deps.contains(&ResourceId::core("ConfigMap", "team-a", "overrides")));

        let repo = ResourceId::new(SOURCE_GROUP, "HelmRepository", "team-a", "charts");
        assert_eq!(
            graph.dependencies(&repo),
            &[ResourceId::core("Secret", "team-a", "repo-auth")]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = DependencyGraph::default();
        let a = ResourceId::core("ConfigMap", "ns", "a");
        let b = ResourceId::core("ConfigMap", "ns", "b");
        graph.add_edge(a.clone(), b.clone());
        graph.add_edge(b.clone(), a.clone());

        let err = graph.check_cycles().unwrap_err();
        match err {
            BuildError::CyclicDependency { cycle } => {
                assert!(cycle.contains("ConfigMap ns/a"));
                assert!(cycle.contains("ConfigMap ns/b"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_dag_passes() {
        let mut graph = DependencyGraph::default();
        let a = ResourceId::core("ConfigMap", "ns", "a");
        let b = ResourceId::core("ConfigMap", "ns", "b");
        let c = ResourceId::core("ConfigMap", "ns", "c");
        graph.add_edge(a.clone(), b.clone());
        graph.add_edge(a, c.clone());
        graph.add_edge(b, c);

        assert!(graph.check_cycles().is_ok());
    }
}
