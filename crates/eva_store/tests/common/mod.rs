#![allow(dead_code)]

use eva_store::{Block, EntityKey, EvaStore, SchemaConfig, Ttl, WriteEntityInput};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub const REGIONS: [&str; 3] = ["eu-west", "us-east", "asia-pac"];
pub const VM_TYPES: [&str; 3] = ["cpu", "gpu", "gpu_large"];

pub fn key(n: u64) -> EntityKey {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    EntityKey::from_bytes(bytes)
}

pub fn temporal_store() -> EvaStore {
    EvaStore::open_in_memory(SchemaConfig::default()).expect("open store")
}

pub fn simple_store() -> EvaStore {
    EvaStore::open_in_memory(SchemaConfig {
        temporal: false,
        ..SchemaConfig::default()
    })
    .expect("open store")
}

/// Attribute values of one generated node, kept for brute-force checks.
#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub key: EntityKey,
    pub node_id: String,
    pub status: &'static str,
    pub region: &'static str,
    pub vm_type: &'static str,
    pub cpu_count: i64,
    pub ram_gb: i64,
    pub avail_hours: i64,
    pub price_hour: i64,
}

impl NodeSpec {
    pub fn to_input(&self, block: Block, ttl: Ttl) -> WriteEntityInput {
        WriteEntityInput::new(self.key, block, ttl)
            .with_payload(format!("{{\"node\":\"{}\"}}", self.node_id), "application/json")
            .with_string("type", "node")
            .with_string("node_id", self.node_id.clone())
            .with_string("status", self.status)
            .with_string("region", self.region)
            .with_string("vm_type", self.vm_type)
            .with_numeric("cpu_count", self.cpu_count)
            .with_numeric("ram_gb", self.ram_gb)
            .with_numeric("avail_hours", self.avail_hours)
            .with_numeric("price_hour", self.price_hour)
    }
}

pub fn generate_nodes(count: u64, seed: u64) -> Vec<NodeSpec> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|n| NodeSpec {
            key: key(n + 1),
            node_id: format!("node_{:012x}", n + 1),
            status: if rng.gen_bool(0.7) { "available" } else { "busy" },
            region: REGIONS.choose(&mut rng).copied().expect("region"),
            vm_type: VM_TYPES.choose(&mut rng).copied().expect("vm type"),
            cpu_count: *[1, 2, 4, 8, 16, 32].choose(&mut rng).expect("cpu"),
            ram_gb: *[4, 8, 16, 32, 64].choose(&mut rng).expect("ram"),
            avail_hours: rng.gen_range(1..=24),
            price_hour: rng.gen_range(50..=500),
        })
        .collect()
}

pub fn workload_input(
    n: u64,
    block: Block,
    status: &str,
    region: &str,
    vm_type: &str,
) -> WriteEntityInput {
    WriteEntityInput::new(key(10_000 + n), block, Ttl::Never)
        .with_payload(b"{}".to_vec(), "application/json")
        .with_string("type", "workload")
        .with_string("workload_id", format!("workload_{n:06}"))
        .with_string("status", status)
        .with_string("region", region)
        .with_string("vm_type", vm_type)
        .with_numeric("req_cpu", 2)
}
