use crate::{
    Block, BlockBatch, BlockReceipt, EntityKey, EntityRecord, EvaResult, FactRow, IntegrityFinding,
    QueryInput, SweepReport, WriteEntityInput,
};

pub trait EntityWriteApi {
    /// Atomic close-then-insert of every fact and the payload of one entity.
    fn write_entity(&self, input: WriteEntityInput) -> EvaResult<()>;
    fn write_block(&self, batch: BlockBatch) -> EvaResult<BlockReceipt>;
    fn delete_entity(&self, key: EntityKey, block: Block) -> EvaResult<bool>;
}

pub trait EntityReadApi {
    /// Point-by-key. Reads the payload row and its cached attributes only.
    fn get_entity(&self, key: EntityKey, at: Block) -> EvaResult<Option<EntityRecord>>;
    /// Point-by-id. Resolves the entity through a string fact, then reads its facts.
    fn find_by_attribute(
        &self,
        attribute: &str,
        value: &str,
        at: Block,
    ) -> EvaResult<Option<EntityRecord>>;
    fn query(&self, input: &QueryInput) -> EvaResult<Vec<EntityKey>>;
    fn query_entities(&self, input: &QueryInput) -> EvaResult<Vec<EntityRecord>>;
    fn count_entities(&self, at: Block) -> EvaResult<u64>;
    fn fact_history(&self, key: EntityKey) -> EvaResult<Vec<FactRow>>;
}

pub trait BlockClockApi {
    fn last_block(&self) -> EvaResult<Option<Block>>;
    fn advance_block(&self, block: Block) -> EvaResult<()>;
}

pub trait MaintenanceApi {
    fn sweep(&self, watermark: Block) -> EvaResult<SweepReport>;
    fn entities_expiring_at(&self, block: Block) -> EvaResult<Vec<EntityKey>>;
    fn integrity_report(&self, at: Block) -> EvaResult<Vec<IntegrityFinding>>;
}

pub trait EntityStore:
    EntityWriteApi + EntityReadApi + BlockClockApi + MaintenanceApi + Send + Sync
{
}

impl<T> EntityStore for T where
    T: EntityWriteApi + EntityReadApi + BlockClockApi + MaintenanceApi + Send + Sync
{
}
