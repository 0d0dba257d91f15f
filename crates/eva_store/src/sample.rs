//! Sampled identifiers and a weighted generator of the benchmark query shapes.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sea_query::{Alias, Expr, Order, Query};

use eva_core::{
    Block, CompareOp, EntityKey, EntityReadApi, EvaError, EvaResult, Filter, NumericPredicate,
    OrderBy, QueryInput,
};

use crate::db::{Fact, Payloads, StringAttributes};
use crate::store::{EvaStore, entity_key, query_all};

pub const REGIONS: [&str; 3] = ["eu-west", "us-east", "asia-pac"];
pub const VM_TYPES: [&str; 3] = ["cpu", "gpu", "gpu_large"];
pub const NODE_ID_ATTRIBUTE: &str = "node_id";
pub const WORKLOAD_ID_ATTRIBUTE: &str = "workload_id";
pub const DEFAULT_SAMPLE_SIZE: u32 = 1_000;
pub const DEFAULT_NODE_LIMIT: u32 = 100;
pub const DEFAULT_WORKLOAD_LIMIT: u32 = 100;

/// Identifiers sampled once from a store at a fixed block. Generators
/// borrow it; nothing mutates it after load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleSnapshot {
    at_block: Block,
    node_ids: Vec<String>,
    workload_ids: Vec<String>,
    entity_keys: Vec<EntityKey>,
}

impl SampleSnapshot {
    pub fn load(store: &EvaStore, at_block: Block, sample_size: u32) -> EvaResult<Self> {
        Ok(Self {
            at_block,
            node_ids: store.sample_string_values(NODE_ID_ATTRIBUTE, at_block, sample_size)?,
            workload_ids: store.sample_string_values(
                WORKLOAD_ID_ATTRIBUTE,
                at_block,
                sample_size,
            )?,
            entity_keys: store.sample_entity_keys(at_block, sample_size)?,
        })
    }

    pub fn from_parts(
        at_block: Block,
        node_ids: Vec<String>,
        workload_ids: Vec<String>,
        entity_keys: Vec<EntityKey>,
    ) -> Self {
        Self {
            at_block,
            node_ids,
            workload_ids,
            entity_keys,
        }
    }

    pub fn at_block(&self) -> Block {
        self.at_block
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    pub fn workload_ids(&self) -> &[String] {
        &self.workload_ids
    }

    pub fn entity_keys(&self) -> &[EntityKey] {
        &self.entity_keys
    }
}

impl EvaStore {
    /// Distinct values of a string attribute visible at `at`, in random order.
    pub fn sample_string_values(
        &self,
        attribute: &str,
        at: Block,
        limit: u32,
    ) -> EvaResult<Vec<String>> {
        let table = Alias::new("s");
        let mut select = Query::select();
        select
            .distinct()
            .column((table.clone(), Fact::Value))
            .from_as(StringAttributes::Table, table.clone())
            .and_where(Expr::col((table.clone(), Fact::Key)).eq(attribute));
        if self.is_temporal() {
            select
                .and_where(Expr::col((table.clone(), Fact::FromBlock)).lte(at.as_i64()))
                .and_where(Expr::col((table, Fact::ToBlock)).gt(at.as_i64()));
        } else {
            select.and_where(Expr::col((table, Fact::Block)).lte(at.as_i64()));
        }
        select
            .order_by_expr(Expr::cust("RANDOM()"), Order::Asc)
            .limit(u64::from(limit));
        self.with_read_tx(|conn| query_all(conn, &select, |row| row.get::<_, String>(0)))
    }

    pub fn sample_entity_keys(&self, at: Block, limit: u32) -> EvaResult<Vec<EntityKey>> {
        let mut select = Query::select();
        select.distinct().column(Payloads::EntityKey).from(Payloads::Table);
        if self.is_temporal() {
            select
                .and_where(Expr::col(Payloads::FromBlock).lte(at.as_i64()))
                .and_where(Expr::col(Payloads::ToBlock).gt(at.as_i64()));
        } else {
            select.and_where(Expr::col(Payloads::Block).lte(at.as_i64()));
        }
        select
            .order_by_expr(Expr::cust("RANDOM()"), Order::Asc)
            .limit(u64::from(limit));
        self.with_read_tx(|conn| {
            query_all(conn, &select, |row| row.get::<_, Vec<u8>>(0))?
                .into_iter()
                .map(entity_key)
                .collect()
        })
    }
}

/// Relative weights of each query shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueryMix {
    pub point_by_id: f64,
    pub point_by_key: f64,
    pub point_miss: f64,
    pub node_filter: f64,
    pub workload_simple: f64,
    pub workload_specific: f64,
}

impl Default for QueryMix {
    fn default() -> Self {
        Self {
            point_by_id: 0.20,
            point_by_key: 0.15,
            point_miss: 0.10,
            node_filter: 0.25,
            workload_simple: 0.15,
            workload_specific: 0.15,
        }
    }
}

impl QueryMix {
    fn weights(&self) -> [f64; 6] {
        [
            self.point_by_id,
            self.point_by_key,
            self.point_miss,
            self.node_filter,
            self.workload_simple,
            self.workload_specific,
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryShape {
    PointById {
        attribute: &'static str,
        value: String,
    },
    PointByKey(EntityKey),
    PointMiss {
        value: String,
    },
    NodeFilter {
        region: &'static str,
        vm_type: &'static str,
        min_cpu: i64,
        min_ram_gb: i64,
        min_hours: i64,
        max_price: i64,
        limit: u32,
    },
    WorkloadSimple {
        limit: u32,
    },
    WorkloadSpecific {
        region: &'static str,
        vm_type: &'static str,
        limit: u32,
    },
}

impl QueryShape {
    pub fn name(&self) -> &'static str {
        match self {
            QueryShape::PointById { .. } => "point_by_id",
            QueryShape::PointByKey(_) => "point_by_key",
            QueryShape::PointMiss { .. } => "point_miss",
            QueryShape::NodeFilter { .. } => "node_filter",
            QueryShape::WorkloadSimple { .. } => "workload_simple",
            QueryShape::WorkloadSpecific { .. } => "workload_specific",
        }
    }

    /// Filter form of the multi-predicate shapes; point shapes return `None`.
    pub fn to_query_input(&self, at: Block) -> Option<QueryInput> {
        match self {
            QueryShape::NodeFilter {
                region,
                vm_type,
                min_cpu,
                min_ram_gb,
                min_hours,
                max_price,
                limit,
            } => {
                let filter = Filter::new()
                    .string_eq("status", "available")
                    .string_eq("region", *region)
                    .string_eq("vm_type", *vm_type)
                    .numeric("cpu_count", NumericPredicate::Compare(CompareOp::Gte, *min_cpu))
                    .numeric("ram_gb", NumericPredicate::Compare(CompareOp::Gte, *min_ram_gb))
                    .numeric(
                        "avail_hours",
                        NumericPredicate::Compare(CompareOp::Gte, *min_hours),
                    )
                    .numeric(
                        "price_hour",
                        NumericPredicate::Compare(CompareOp::Lte, *max_price),
                    );
                Some(
                    QueryInput::new(filter, at, *limit)
                        .order_by(OrderBy::numeric_asc("price_hour")),
                )
            }
            QueryShape::WorkloadSimple { limit } => {
                let filter = Filter::new()
                    .string_eq("status", "pending")
                    .with_tag("type", "workload");
                Some(QueryInput::new(filter, at, *limit))
            }
            QueryShape::WorkloadSpecific {
                region,
                vm_type,
                limit,
            } => {
                let filter = Filter::new()
                    .string_eq("status", "pending")
                    .string_eq("region", *region)
                    .string_eq("vm_type", *vm_type)
                    .with_tag("type", "workload");
                Some(QueryInput::new(filter, at, *limit))
            }
            QueryShape::PointById { .. }
            | QueryShape::PointByKey(_)
            | QueryShape::PointMiss { .. } => None,
        }
    }

    /// Runs the shape and returns the number of rows it produced.
    pub fn run<S: EntityReadApi + ?Sized>(&self, store: &S, at: Block) -> EvaResult<usize> {
        match self {
            QueryShape::PointById { attribute, value } => Ok(store
                .find_by_attribute(attribute, value, at)?
                .map_or(0, |_| 1)),
            QueryShape::PointByKey(key) => Ok(store.get_entity(*key, at)?.map_or(0, |_| 1)),
            QueryShape::PointMiss { value } => Ok(store
                .find_by_attribute(NODE_ID_ATTRIBUTE, value, at)?
                .map_or(0, |_| 1)),
            shape => {
                let input = shape.to_query_input(at).ok_or_else(|| {
                    EvaError::invalid_query(format!("{} has no filter form", shape.name()))
                })?;
                Ok(store.query(&input)?.len())
            }
        }
    }
}

/// Draws query shapes from a [`SampleSnapshot`] with a seeded RNG.
pub struct QueryGenerator<'a> {
    snapshot: &'a SampleSnapshot,
    rng: StdRng,
    weights: WeightedIndex<f64>,
    node_limit: u32,
    workload_limit: u32,
}

impl<'a> QueryGenerator<'a> {
    pub fn new(snapshot: &'a SampleSnapshot, mix: QueryMix, seed: u64) -> EvaResult<Self> {
        let weights = WeightedIndex::new(mix.weights())
            .map_err(|err| EvaError::invalid(format!("query mix: {err}")))?;
        Ok(Self {
            snapshot,
            rng: StdRng::seed_from_u64(seed),
            weights,
            node_limit: DEFAULT_NODE_LIMIT,
            workload_limit: DEFAULT_WORKLOAD_LIMIT,
        })
    }

    pub fn with_limits(mut self, node_limit: u32, workload_limit: u32) -> Self {
        self.node_limit = node_limit;
        self.workload_limit = workload_limit;
        self
    }

    pub fn snapshot(&self) -> &SampleSnapshot {
        self.snapshot
    }

    pub fn next_query(&mut self) -> QueryShape {
        match self.weights.sample(&mut self.rng) {
            0 => self.point_by_id(),
            1 => self.point_by_key(),
            2 => self.point_miss(),
            3 => self.node_filter(),
            4 => QueryShape::WorkloadSimple {
                limit: self.workload_limit,
            },
            _ => QueryShape::WorkloadSpecific {
                region: self.pick(&REGIONS),
                vm_type: self.pick(&VM_TYPES),
                limit: self.workload_limit,
            },
        }
    }

    fn pick(&mut self, options: &[&'static str]) -> &'static str {
        options.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn point_by_id(&mut self) -> QueryShape {
        let snapshot = self.snapshot;
        let use_nodes = self.rng.gen_bool(0.5) || snapshot.workload_ids.is_empty();
        let (attribute, pool) = if use_nodes && !snapshot.node_ids.is_empty() {
            (NODE_ID_ATTRIBUTE, &snapshot.node_ids)
        } else {
            (WORKLOAD_ID_ATTRIBUTE, &snapshot.workload_ids)
        };
        match pool.choose(&mut self.rng) {
            Some(value) => QueryShape::PointById {
                attribute,
                value: value.clone(),
            },
            None => self.point_miss(),
        }
    }

    fn point_by_key(&mut self) -> QueryShape {
        let snapshot = self.snapshot;
        match snapshot.entity_keys.choose(&mut self.rng) {
            Some(key) => QueryShape::PointByKey(*key),
            None => self.point_miss(),
        }
    }

    fn point_miss(&mut self) -> QueryShape {
        let suffix: u64 = self.rng.r#gen::<u64>() & 0xffff_ffff_ffff;
        QueryShape::PointMiss {
            value: format!("node_miss_{suffix:012x}"),
        }
    }

    fn node_filter(&mut self) -> QueryShape {
        let min_cpu = *[1, 2, 4, 8].choose(&mut self.rng).unwrap_or(&1);
        let min_ram_gb = *[4, 8, 16, 32].choose(&mut self.rng).unwrap_or(&4);
        let min_hours = *[1, 4, 8].choose(&mut self.rng).unwrap_or(&1);
        QueryShape::NodeFilter {
            region: self.pick(&REGIONS),
            vm_type: self.pick(&VM_TYPES),
            min_cpu,
            min_ram_gb,
            min_hours,
            max_price: self.rng.gen_range(100..=400),
            limit: self.node_limit,
        }
    }
}
