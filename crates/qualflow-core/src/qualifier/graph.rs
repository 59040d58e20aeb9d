//! Finite qualifier posets declared as qualifier + direct supertypes

use super::{Qualifier, QualifierHierarchy};
use crate::error::ConfigError;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::HashMap;

/// Hierarchy over argument-free qualifiers, with precomputed LUB/GLB tables
#[derive(Debug, Clone)]
pub struct GraphQualifierHierarchy {
    name: String,
    qualifiers: Vec<String>,
    index: HashMap<String, usize>,
    /// `below[a][b]` holds when `a <: b` (reflexive, transitive)
    below: Vec<Vec<bool>>,
    lub: Vec<usize>,
    glb: Vec<usize>,
    top: usize,
    bottom: usize,
}

#[derive(Debug, Clone)]
pub struct GraphHierarchyBuilder {
    name: String,
    decls: Vec<(String, Vec<String>)>,
}

impl GraphHierarchyBuilder {
    pub fn qualifier(mut self, name: &str, direct_supertypes: &[&str]) -> Self {
        self.decls.push((
            name.to_string(),
            direct_supertypes.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    pub fn build(self) -> Result<GraphQualifierHierarchy, ConfigError> {
        let hierarchy = self.name;
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut index = HashMap::new();
        let mut qualifiers = Vec::new();

        for (i, (name, _)) in self.decls.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateQualifier {
                    hierarchy,
                    qualifier: name.clone(),
                });
            }
            qualifiers.push(name.clone());
            graph.add_node(i);
        }
        if qualifiers.is_empty() {
            return Err(ConfigError::MissingTop { hierarchy });
        }

        for (i, (_, supers)) in self.decls.iter().enumerate() {
            for sup in supers {
                let Some(&j) = index.get(sup) else {
                    return Err(ConfigError::UnknownQualifier {
                        hierarchy,
                        qualifier: sup.clone(),
                    });
                };
                graph.add_edge(NodeIndex::new(i), NodeIndex::new(j), ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(ConfigError::CyclicHierarchy {
                hierarchy,
                qualifier: qualifiers[cycle.node_id().index()].clone(),
            });
        }

        let tops: Vec<usize> = graph
            .node_indices()
            .filter(|n| graph.neighbors_directed(*n, Direction::Outgoing).next().is_none())
            .map(|n| n.index())
            .collect();
        let bottoms: Vec<usize> = graph
            .node_indices()
            .filter(|n| graph.neighbors_directed(*n, Direction::Incoming).next().is_none())
            .map(|n| n.index())
            .collect();
        let top = match tops.as_slice() {
            [t] => *t,
            [] => return Err(ConfigError::MissingTop { hierarchy }),
            many => {
                return Err(ConfigError::MultipleTops {
                    hierarchy,
                    tops: many.iter().map(|i| qualifiers[*i].clone()).collect(),
                })
            }
        };
        let bottom = match bottoms.as_slice() {
            [b] => *b,
            [] => return Err(ConfigError::MissingBottom { hierarchy }),
            many => {
                return Err(ConfigError::MultipleBottoms {
                    hierarchy,
                    bottoms: many.iter().map(|i| qualifiers[*i].clone()).collect(),
                })
            }
        };

        let n = qualifiers.len();
        let mut below = vec![vec![false; n]; n];
        for (i, row) in below.iter_mut().enumerate() {
            let mut dfs = Dfs::new(&graph, NodeIndex::new(i));
            while let Some(reached) = dfs.next(&graph) {
                row[reached.index()] = true;
            }
        }

        let mut lub = vec![0; n * n];
        let mut glb = vec![0; n * n];
        for a in 0..n {
            for b in 0..n {
                let uppers: Vec<usize> = (0..n).filter(|&c| below[a][c] && below[b][c]).collect();
                let least: Vec<usize> = uppers
                    .iter()
                    .copied()
                    .filter(|&c| !uppers.iter().any(|&d| d != c && below[d][c]))
                    .collect();
                let lowers: Vec<usize> = (0..n).filter(|&c| below[c][a] && below[c][b]).collect();
                let greatest: Vec<usize> = lowers
                    .iter()
                    .copied()
                    .filter(|&c| !lowers.iter().any(|&d| d != c && below[c][d]))
                    .collect();
                match (least.as_slice(), greatest.as_slice()) {
                    ([l], [g]) => {
                        lub[a * n + b] = *l;
                        glb[a * n + b] = *g;
                    }
                    ([_], _) => {
                        return Err(ConfigError::NotALattice {
                            hierarchy,
                            left: qualifiers[a].clone(),
                            right: qualifiers[b].clone(),
                            operation: "greatest lower bound",
                        })
                    }
                    _ => {
                        return Err(ConfigError::NotALattice {
                            hierarchy,
                            left: qualifiers[a].clone(),
                            right: qualifiers[b].clone(),
                            operation: "least upper bound",
                        })
                    }
                }
            }
        }

        Ok(GraphQualifierHierarchy {
            name: hierarchy,
            qualifiers,
            index,
            below,
            lub,
            glb,
            top,
            bottom,
        })
    }
}

impl GraphQualifierHierarchy {
    pub fn builder(name: &str) -> GraphHierarchyBuilder {
        GraphHierarchyBuilder {
            name: name.to_string(),
            decls: Vec::new(),
        }
    }

    fn position(&self, qualifier: &Qualifier) -> Option<usize> {
        if qualifier.has_args() {
            return None;
        }
        self.index.get(&qualifier.name).copied()
    }

    fn at(&self, i: usize) -> Qualifier {
        Qualifier::new(self.qualifiers[i].clone())
    }
}

impl QualifierHierarchy for GraphQualifierHierarchy {
    fn name(&self) -> &str {
        &self.name
    }

    fn top(&self) -> Qualifier {
        self.at(self.top)
    }

    fn bottom(&self) -> Qualifier {
        self.at(self.bottom)
    }

    fn owns(&self, qualifier: &Qualifier) -> bool {
        self.position(qualifier).is_some()
    }

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool {
        match (self.position(sub), self.position(sup)) {
            (Some(a), Some(b)) => self.below[a][b],
            _ => false,
        }
    }

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        match (self.position(a), self.position(b)) {
            (Some(i), Some(j)) => self.at(self.lub[i * self.qualifiers.len() + j]),
            _ => self.top(),
        }
    }

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        match (self.position(a), self.position(b)) {
            (Some(i), Some(j)) => self.at(self.glb[i * self.qualifiers.len() + j]),
            _ => self.bottom(),
        }
    }

    fn qualifier_names(&self) -> Vec<String> {
        self.qualifiers.clone()
    }
}
