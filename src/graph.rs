use ordered_float::OrderedFloat;
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, PoisonError, RwLock},
};

use petgraph::algo::astar;
use petgraph::prelude::*;

use crate::{Identity, MathTransform, Result, SequenceBuilder, TransformError};

const DEFAULT_COST: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Edge {
    transform: Arc<dyn MathTransform>,
    cost: OrderedFloat<f64>,
}

impl Edge {
    pub fn new_cost(transform: Arc<dyn MathTransform>, cost: f64) -> Self {
        Self {
            transform,
            cost: OrderedFloat(cost),
        }
    }

    pub fn new(transform: Arc<dyn MathTransform>) -> Self {
        Self::new_cost(transform, DEFAULT_COST)
    }

    pub fn transform(&self) -> &Arc<dyn MathTransform> {
        &self.transform
    }

    pub fn cost(&self) -> f64 {
        self.cost.0
    }
}

type PathCache = HashMap<(NodeIndex, NodeIndex), Option<Arc<dyn MathTransform>>>;

/// Coordinate reference systems, identified by `C`, connected by transforms.
///
/// Paths between systems are resolved to a single transform and memoized
/// until the graph is next modified.
#[derive(Debug, Default)]
pub struct CrsGraph<C: Hash + Eq + Clone> {
    graph: StableDiGraph<C, Edge>,
    systems: HashMap<C, NodeInfo>,
    path_cache: RwLock<PathCache>,
}

#[derive(Debug, Copy, Clone)]
struct NodeInfo {
    idx: NodeIndex,
    ndim: usize,
}

impl<C: Hash + Eq + Clone + std::fmt::Debug> CrsGraph<C> {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::default(),
            systems: HashMap::default(),
            path_cache: RwLock::default(),
        }
    }

    fn ensure_system(&mut self, name: C, ndim: usize) -> Result<NodeIndex> {
        if let Some(n) = self.systems.get(&name) {
            if n.ndim != ndim {
                return Err(TransformError::DimensionMismatch {
                    expected: n.ndim,
                    actual: ndim,
                });
            }
            Ok(n.idx)
        } else {
            let idx = self.graph.add_node(name.clone());
            self.systems.insert(name, NodeInfo { idx, ndim });
            Ok(idx)
        }
    }

    /// Register a coordinate system with the given dimensionality.
    /// Fails if it is already registered with a different dimensionality.
    pub fn add_system(&mut self, name: impl Into<C>, ndim: usize) -> Result<()> {
        self.clear_cache();
        self.ensure_system(name.into(), ndim).map(|_| ())
    }

    /// Dimensionality of a registered coordinate system.
    pub fn ndim(&self, name: &C) -> Option<usize> {
        self.systems.get(name).map(|n| n.ndim)
    }

    /// Returns whether the inverse edge was added.
    /// Fails if the new edge's dimensionality is inconsistent with existing systems.
    pub fn add_edge(
        &mut self,
        src: impl Into<C>,
        tgt: impl Into<C>,
        transform: Arc<dyn MathTransform>,
        cost: f64,
        with_inverse: bool,
    ) -> Result<bool> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(TransformError::InvalidParameter(format!(
                "edge cost must be finite and non-negative, got {cost}"
            )));
        }
        self.clear_cache();

        let u = self.ensure_system(src.into(), transform.source_ndim())?;
        let v = self.ensure_system(tgt.into(), transform.target_ndim())?;

        let mut added_inverse = false;
        if with_inverse {
            match transform.inverse() {
                Ok(inverse) => {
                    self.graph.add_edge(v, u, Edge::new_cost(inverse, cost));
                    added_inverse = true;
                }
                Err(e) => log::debug!("Not adding inverse edge: {e}"),
            }
        }

        self.graph.add_edge(u, v, Edge::new_cost(transform, cost));
        Ok(added_inverse)
    }

    fn best_edge(&self, src: NodeIndex, tgt: NodeIndex) -> Option<&Edge> {
        self.graph
            .edges_connecting(src, tgt)
            .min_by_key(|e| e.weight().cost)
            .map(|e| e.weight())
    }

    fn cache_get(&self, src: NodeIndex, tgt: NodeIndex) -> Option<Option<Arc<dyn MathTransform>>> {
        let outer = self.path_cache.read().unwrap_or_else(PoisonError::into_inner);
        outer.get(&(src, tgt)).cloned()
    }

    fn cache_insert(&self, src: NodeIndex, tgt: NodeIndex, t: Option<Arc<dyn MathTransform>>) {
        self.path_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((src, tgt), t);
    }

    fn clear_cache(&mut self) {
        self.path_cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn build_path(&self, path: &[NodeIndex]) -> Result<Arc<dyn MathTransform>> {
        let edge = |a, b| {
            self.best_edge(a, b)
                .map(|e| e.transform.clone())
                .ok_or_else(|| TransformError::InvalidParameter("path has a missing edge".into()))
        };
        match path.len() {
            0 | 1 => Err(TransformError::InvalidParameter(
                "path must have at least 2 nodes".into(),
            )),
            2 => edge(path[0], path[1]),
            n => {
                let mut builder = SequenceBuilder::with_capacity(n - 1);
                for ab in path.windows(2) {
                    builder.add_arced(edge(ab[0], ab[1])?)?;
                }
                Ok(Arc::new(builder.build()?))
            }
        }
    }

    /// Find the cheapest transform from one coordinate system to another.
    ///
    /// Returns `None` if either system is unknown or no path exists.
    pub fn find_path(&self, from: &C, to: &C) -> Option<Arc<dyn MathTransform>> {
        let start = self.systems.get(from)?;

        if from == to {
            return Some(Arc::new(Identity::new(start.ndim)));
        }

        let u = start.idx;
        let v = self.systems.get(to)?.idx;

        if let Some(maybe) = self.cache_get(u, v) {
            log::trace!("Path cache hit for {from:?} -> {to:?}");
            return maybe;
        }

        let zero = OrderedFloat(0.0);
        let Some((cost, path)) = astar(&self.graph, u, |n| n == v, |e| e.weight().cost, |_| zero)
        else {
            log::debug!("No path from {from:?} to {to:?}");
            self.cache_insert(u, v, None);
            return None;
        };

        let t = match self.build_path(&path) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Could not build path from {from:?} to {to:?}: {e}");
                self.cache_insert(u, v, None);
                return None;
            }
        };
        log::debug!(
            "Resolved {from:?} -> {to:?} in {} steps with cost {}",
            path.len() - 1,
            cost.0
        );

        self.cache_insert(u, v, Some(t.clone()));
        Some(t)
    }
}
