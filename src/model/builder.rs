//! Model builder.
//!
//! Owns the configuration, the shared trial data and the templates, and turns
//! them into a `ModelGraph`. Construction is checked eagerly: every
//! `depends_on` column must exist and group mode needs a `subj_idx` column,
//! both before any node is created.
//!
//! A build can fail because random starting values put some node at zero
//! probability. Such builds are retried from scratch with fresh draws; see
//! `run_with_retries`.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::data::TrialData;
use crate::domain::{KeyValue, ModelConfig, SUBJ_COL};
use crate::error::AppError;
use crate::graph::NodeArena;
use crate::knode::{InstanceMap, KnodeSet, expand};
use crate::model::factory::{FactoryContext, ModelFactory, ParamLayout, Templates};
use crate::registry::NodeRegistry;

/// Concrete nodes of one build plus the lookups into them.
#[derive(Debug, Clone, Default)]
pub struct ModelGraph {
    pub arena: NodeArena,
    /// Instance map per template, indexed by `KnodeId`.
    pub instances: Vec<InstanceMap>,
    pub registry: NodeRegistry,
}

/// Result of one guarded build attempt.
#[derive(Debug)]
pub enum BuildOutcome<T> {
    Built(T),
    /// Degenerate starting values; a fresh attempt may succeed.
    Retry(AppError),
    Fatal(AppError),
}

impl<T> From<Result<T, AppError>> for BuildOutcome<T> {
    fn from(result: Result<T, AppError>) -> Self {
        match result {
            Ok(value) => BuildOutcome::Built(value),
            Err(err) if err.is_retryable() => BuildOutcome::Retry(err),
            Err(err) => BuildOutcome::Fatal(err),
        }
    }
}

/// `max_retries` guarded attempts, then one final attempt whose failure is
/// returned as is.
pub fn run_with_retries<T>(
    max_retries: usize,
    mut attempt: impl FnMut() -> BuildOutcome<T>,
) -> Result<T, AppError> {
    for n in 1..=max_retries {
        match attempt() {
            BuildOutcome::Built(value) => return Ok(value),
            BuildOutcome::Fatal(err) => return Err(err),
            BuildOutcome::Retry(reason) => {
                warn!(attempt = n, max_retries, %reason, "degenerate build, retrying");
            }
        }
    }
    match attempt() {
        BuildOutcome::Built(value) => Ok(value),
        BuildOutcome::Retry(err) | BuildOutcome::Fatal(err) => Err(err),
    }
}

/// One complete expansion of `knodes` against `data`.
pub fn build_graph(
    knodes: &KnodeSet,
    data: &TrialData,
    rng: &mut StdRng,
) -> Result<ModelGraph, AppError> {
    let mut arena = NodeArena::new();
    let mut instances: Vec<InstanceMap> = Vec::with_capacity(knodes.len());
    let mut fragments = Vec::with_capacity(knodes.len());

    for (_, knode) in knodes.iter() {
        let expansion = expand(knode, knodes, data, &instances, &mut arena, rng)?;
        debug!(knode = knode.name(), nodes = expansion.instances.len(), "expanded template");
        instances.push(expansion.instances);
        fragments.push(expansion.registry);
    }

    let registry = NodeRegistry::concat(data.column_names(), fragments)?;
    Ok(ModelGraph {
        arena,
        instances,
        registry,
    })
}

/// Seed for a subject's single-subject model.
fn subject_seed(seed: u64, subj: i64) -> u64 {
    seed ^ (subj as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

pub struct HierarchicalModel {
    factory: Arc<dyn ModelFactory>,
    config: ModelConfig,
    data: Arc<TrialData>,
    is_group_model: bool,
    subjects: Vec<i64>,
    templates: Templates,
    rng: StdRng,
    graph: ModelGraph,
}

impl std::fmt::Debug for HierarchicalModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalModel")
            .field("factory", &self.factory.name())
            .field("is_group_model", &self.is_group_model)
            .field("subjects", &self.subjects)
            .field("nodes", &self.graph.arena.len())
            .finish_non_exhaustive()
    }
}

impl HierarchicalModel {
    /// Validate the configuration, create the templates and build once.
    pub fn new(
        factory: Arc<dyn ModelFactory>,
        data: Arc<TrialData>,
        config: ModelConfig,
    ) -> Result<Self, AppError> {
        if data.n_rows() == 0 {
            return Err(AppError::Data("Trial data is empty.".to_string()));
        }
        for (param, columns) in config.depends_on.iter() {
            for column in columns {
                if !data.has_column(column) {
                    return Err(AppError::MissingColumn {
                        param: param.clone(),
                        column: column.clone(),
                    });
                }
            }
        }

        let has_subj = data.has_column(SUBJ_COL);
        let is_group_model = match config.is_group_model {
            Some(true) if !has_subj => {
                return Err(AppError::Config(format!(
                    "Group model requested but the data has no `{SUBJ_COL}` column."
                )));
            }
            Some(explicit) => explicit,
            None => has_subj && data.unique(SUBJ_COL)?.len() > 1,
        };
        // Integer ids are only required once the model is hierarchical.
        let subjects = if is_group_model {
            data.subjects()?.unwrap_or_default()
        } else {
            data.subjects().ok().flatten().unwrap_or_default()
        };

        let ctx = FactoryContext {
            depends_on: &config.depends_on,
            include: &config.include,
        };
        let templates = if is_group_model {
            factory.create_knodes(&ctx)?
        } else {
            factory.create_knodes_single_subj(&ctx)?
        };

        let rng = StdRng::seed_from_u64(config.seed);
        let mut model = Self {
            factory,
            config,
            data,
            is_group_model,
            subjects,
            templates,
            rng,
            graph: ModelGraph::default(),
        };
        model.create_model()?;
        Ok(model)
    }

    /// Discard the current graph and build a fresh one.
    pub fn create_model(&mut self) -> Result<(), AppError> {
        let knodes = &self.templates.knodes;
        let data = self.data.as_ref();
        let rng = &mut self.rng;
        let graph = run_with_retries(self.config.max_retries, || {
            BuildOutcome::from(build_graph(knodes, data, rng))
        })?;

        info!(
            nodes = graph.arena.len(),
            templates = knodes.len(),
            group = self.is_group_model,
            "model built"
        );
        self.graph = graph;
        Ok(())
    }

    /// Flat model over one subject's rows, sharing factory and configuration.
    pub fn single_subject(&self, subj: i64) -> Result<HierarchicalModel, AppError> {
        let rows = self.data.filter_eq(SUBJ_COL, &KeyValue::Int(subj))?;
        let config = ModelConfig {
            is_group_model: Some(false),
            seed: subject_seed(self.config.seed, subj),
            ..self.config.clone()
        };
        HierarchicalModel::new(Arc::clone(&self.factory), Arc::new(rows), config)
    }

    pub fn is_group_model(&self) -> bool {
        self.is_group_model
    }

    /// Sorted distinct subject ids; empty without a `subj_idx` column.
    pub fn subjects(&self) -> &[i64] {
        &self.subjects
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn data(&self) -> &TrialData {
        &self.data
    }

    pub fn knodes(&self) -> &KnodeSet {
        &self.templates.knodes
    }

    pub fn params(&self) -> &[ParamLayout] {
        &self.templates.params
    }

    pub fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ModelGraph {
        &mut self.graph
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.graph.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.graph.registry
    }

    pub fn logp(&mut self) -> f64 {
        self.graph.arena.logp()
    }
}
