//! Collection of graphs, one per agent type

use std::collections::BTreeMap;

use detour_tilecache::{ObstacleRef, ObstacleShape};
use log::{info, warn};
use recast_common::Result;

use crate::{GraphId, IdGenerator, InputGeometry, NavGraph, NavMeshSettings, UpdateReport};

/// Owns the graphs of a session and the generator naming them
#[derive(Debug, Default)]
pub struct NavWorld {
    ids: IdGenerator,
    graphs: BTreeMap<GraphId, NavGraph>,
}

impl NavWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph for one agent type and returns its id.
    pub fn add_graph(&mut self, settings: NavMeshSettings, geometry: InputGeometry) -> Result<GraphId> {
        let id = self.ids.next_id();
        let graph = NavGraph::build(id, settings, geometry)?;
        self.graphs.insert(id, graph);
        Ok(id)
    }

    pub fn graph(&self, id: GraphId) -> Option<&NavGraph> {
        self.graphs.get(&id)
    }

    pub fn graph_mut(&mut self, id: GraphId) -> Option<&mut NavGraph> {
        self.graphs.get_mut(&id)
    }

    pub fn remove_graph(&mut self, id: GraphId) -> Option<NavGraph> {
        let graph = self.graphs.remove(&id);
        if graph.is_some() {
            info!("removed {}", id);
        }
        graph
    }

    /// Graphs in id order
    pub fn graphs(&self) -> impl Iterator<Item = &NavGraph> {
        self.graphs.values()
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Adds the obstacle to every graph with a tile cache. If any graph
    /// refuses it, the graphs that accepted it drop it again.
    pub fn add_obstacle(&mut self, shape: ObstacleShape) -> detour::Result<Vec<(GraphId, ObstacleRef)>> {
        let mut added = Vec::new();
        let mut refused = None;
        for (&id, graph) in self.graphs.iter_mut().filter(|(_, g)| g.tile_cache().is_some()) {
            match graph.add_obstacle(shape.clone()) {
                Ok(r) => added.push((id, r)),
                Err(status) => {
                    warn!("{} refused obstacle: {}", id, status);
                    refused = Some(status);
                    break;
                }
            }
        }
        match refused {
            Some(status) => {
                self.remove_obstacles(&added);
                Err(status)
            }
            None => Ok(added),
        }
    }

    /// Removes obstacles returned by [`NavWorld::add_obstacle`]. Refs that are
    /// stale or name a removed graph are skipped.
    pub fn remove_obstacles(&mut self, refs: &[(GraphId, ObstacleRef)]) {
        for &(id, r) in refs {
            if let Some(graph) = self.graphs.get_mut(&id) {
                if graph.remove_obstacle(r).is_err() {
                    warn!("{}: obstacle {} already gone", id, r.id());
                }
            }
        }
    }

    /// Applies pending obstacle changes of every graph. Graphs with nothing
    /// to do are left out of the result.
    pub fn update(&mut self) -> Result<Vec<UpdateReport>> {
        let mut reports = Vec::new();
        for graph in self.graphs.values_mut() {
            let report = graph.update()?;
            if !report.is_empty() {
                reports.push(report);
            }
        }
        Ok(reports)
    }
}
