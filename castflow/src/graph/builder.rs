//! Graph builder with compile-time validation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{CompiledGraph, Edge, Router, END};
use crate::errors::{GraphErrorInfo, GraphValidationError};
use crate::stages::Stage;

/// Default bound on stage transitions per run.
pub const DEFAULT_MAX_TRANSITIONS: usize = 256;

/// Builder for a pipeline graph.
///
/// Wiring mistakes are collected while building and reported by
/// [`GraphBuilder::compile`], which is the only fallible step.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    /// The pipeline name.
    name: String,
    /// Stages by name.
    stages: HashMap<String, Arc<dyn Stage>>,
    /// Insertion order for stages.
    stage_order: Vec<String>,
    /// The entry stage.
    entry: Option<String>,
    /// Outgoing edge per stage.
    edges: HashMap<String, Edge>,
    /// Problems found while wiring.
    deferred: Vec<GraphValidationError>,
    max_transitions: usize,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
            entry: None,
            edges: HashMap::new(),
            deferred: Vec::new(),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
        }
    }

    /// Adds a named stage.
    #[must_use]
    pub fn add_stage(mut self, name: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
        let name = name.into();
        if self.stages.contains_key(&name) {
            self.deferred.push(
                GraphValidationError::new(format!("Stage '{name}' is defined twice"))
                    .with_stages(vec![name.clone()])
                    .with_error_info(
                        GraphErrorInfo::new("GRAPH-DUPLICATE_STAGE", format!("Duplicate stage '{name}'"))
                            .with_fix_hint("Give every stage in a graph a unique name."),
                    ),
            );
            return self;
        }
        self.stage_order.push(name.clone());
        self.stages.insert(name, stage);
        self
    }

    /// Sets the entry stage.
    #[must_use]
    pub fn set_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Adds an unconditional edge. `to` may be [`END`].
    #[must_use]
    pub fn add_edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.insert_edge(from.into(), Edge::Static(to.into()))
    }

    /// Adds edges between consecutive stages of `names`.
    #[must_use]
    pub fn add_sequence(mut self, names: &[&str]) -> Self {
        for pair in names.windows(2) {
            self = self.add_edge(pair[0], pair[1]);
        }
        self
    }

    /// Adds a conditional edge routed by `router` through `outcomes`.
    #[must_use]
    pub fn add_conditional_edge<I, K, V>(
        self,
        from: impl Into<String>,
        router: Arc<dyn Router>,
        outcomes: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let targets: BTreeMap<String, String> = outcomes
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.insert_edge(from.into(), Edge::Conditional { router, targets })
    }

    /// Sets the bound on stage transitions per run.
    #[must_use]
    pub fn with_max_transitions(mut self, limit: usize) -> Self {
        self.max_transitions = limit;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn insert_edge(mut self, from: String, edge: Edge) -> Self {
        if self.edges.contains_key(&from) {
            self.deferred.push(
                GraphValidationError::new(format!("Stage '{from}' already has an outgoing edge"))
                    .with_stages(vec![from.clone()])
                    .with_error_info(
                        GraphErrorInfo::new("GRAPH-DUPLICATE_EDGE", format!("Second edge out of '{from}'"))
                            .with_fix_hint("Use a conditional edge to branch from one stage to several."),
                    ),
            );
            return self;
        }
        self.edges.insert(from, edge);
        self
    }

    /// Validates the wiring and freezes the graph.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: an empty graph, a missing or unknown
    /// entry, an edge naming an unknown stage, a stage without an outgoing
    /// edge, or a declared router outcome with no target.
    pub fn compile(self) -> Result<CompiledGraph, GraphValidationError> {
        if self.stages.is_empty() {
            return Err(GraphValidationError::new("Pipeline has no stages").with_error_info(
                GraphErrorInfo::new("GRAPH-EMPTY", "Cannot compile an empty graph")
                    .with_fix_hint("Add at least one stage before compiling."),
            ));
        }

        if let Some(err) = self.deferred.into_iter().next() {
            return Err(err);
        }

        let Some(entry) = self.entry else {
            return Err(GraphValidationError::new("Pipeline has no entry stage").with_error_info(
                GraphErrorInfo::new("GRAPH-MISSING_ENTRY", "No entry stage set")
                    .with_fix_hint("Call set_entry() with the first stage to run."),
            ));
        };
        check_known(&self.stages, &entry, "entry")?;

        for name in &self.stage_order {
            let Some(edge) = self.edges.get(name) else {
                return Err(GraphValidationError::new(format!("Stage '{name}' has no outgoing edge"))
                    .with_stages(vec![name.clone()])
                    .with_error_info(
                        GraphErrorInfo::new("GRAPH-NO_EXIT", format!("'{name}' is a dead end"))
                            .with_fix_hint(format!("Add an edge from '{name}', to END if it is the last stage.")),
                    ));
            };

            match edge {
                Edge::Static(to) => check_target(&self.stages, name, to)?,
                Edge::Conditional { router, targets } => {
                    for to in targets.values() {
                        check_target(&self.stages, name, to)?;
                    }
                    for outcome in router.outcomes().unwrap_or_default() {
                        if !targets.contains_key(&outcome) {
                            return Err(GraphValidationError::new(format!(
                                "Router on stage '{name}' can return '{outcome}', which has no target"
                            ))
                            .with_stages(vec![name.clone()])
                            .with_error_info(
                                GraphErrorInfo::new(
                                    "GRAPH-UNRESOLVED_OUTCOME",
                                    format!("Outcome '{outcome}' is unmapped"),
                                )
                                .with_context_entry("stage", name.clone())
                                .with_context_entry("outcome", outcome.clone())
                                .with_fix_hint("Map every declared router outcome to a stage or END."),
                            ));
                        }
                    }
                }
            }
        }

        for from in self.edges.keys() {
            check_known(&self.stages, from, "edge source")?;
        }

        Ok(CompiledGraph::new(
            self.name,
            self.stages,
            self.stage_order,
            entry,
            self.edges,
            self.max_transitions,
        ))
    }
}

fn check_target(
    stages: &HashMap<String, Arc<dyn Stage>>,
    from: &str,
    to: &str,
) -> Result<(), GraphValidationError> {
    if to == END {
        return Ok(());
    }
    check_known(stages, to, &format!("edge target from '{from}'"))
}

fn check_known(
    stages: &HashMap<String, Arc<dyn Stage>>,
    name: &str,
    role: &str,
) -> Result<(), GraphValidationError> {
    if stages.contains_key(name) {
        return Ok(());
    }
    let mut known: Vec<&String> = stages.keys().collect();
    known.sort();
    Err(GraphValidationError::new(format!("Unknown stage '{name}' used as {role}"))
        .with_stages(vec![name.to_string()])
        .with_error_info(
            GraphErrorInfo::new("GRAPH-UNKNOWN_STAGE", format!("Stage '{name}' not found"))
                .with_context_entry("role", role)
                .with_context_entry(
                    "known_stages",
                    known.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "),
                )
                .with_fix_hint("Add the stage with add_stage() before wiring it."),
        ))
}
