mod common;

use common::{key, simple_store};
use eva_store::{
    Block, CompareOp, EntityReadApi, EntityWriteApi, EvaError, EvaResult, Filter, MaintenanceApi,
    NumericPredicate, QueryInput, Ttl, WriteEntityInput,
};

fn node(block: i64, status: &str, cpu: i64) -> WriteEntityInput {
    WriteEntityInput::new(key(1), Block(block), Ttl::Never)
        .with_payload(format!("node@{block}"), "text/plain")
        .with_string("node_id", "node_1")
        .with_string("status", status)
        .with_numeric("cpu_count", cpu)
}

#[test]
fn rewrites_replace_values_in_place() -> EvaResult<()> {
    let store = simple_store();
    store.write_entity(node(5, "available", 4).with_string("zone", "a"))?;
    assert!(store.get_entity(key(1), Block(4))?.is_none());

    store.write_entity(node(6, "busy", 8))?;
    let record = store.get_entity(key(1), Block(6))?.expect("record");
    assert_eq!(record.payload, b"node@6");
    assert_eq!(record.string_attributes["status"], "busy");
    assert!(!record.string_attributes.contains_key("zone"));
    assert_eq!(record.expires_at_block, None);

    let history = store.fact_history(key(1))?;
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|row| row.to_block.is_open()));

    let by_id = store
        .find_by_attribute("node_id", "node_1", Block(6))?
        .expect("by id");
    assert_eq!(by_id.numeric_attributes["cpu_count"], 8);
    Ok(())
}

#[test]
fn older_blocks_are_rejected_and_same_block_rewrites_are_allowed() -> EvaResult<()> {
    let store = simple_store();
    store.write_entity(node(5, "available", 4))?;
    store.write_entity(node(5, "busy", 4))?;
    assert!(matches!(
        store.write_entity(node(4, "available", 4)),
        Err(EvaError::ConstraintViolation { .. })
    ));
    let record = store.get_entity(key(1), Block(5))?.expect("record");
    assert_eq!(record.string_attributes["status"], "busy");
    Ok(())
}

#[test]
fn filters_and_deletes_work_without_history() -> EvaResult<()> {
    let store = simple_store();
    store.write_entity(node(5, "available", 16))?;
    let filter = Filter::new()
        .string_eq("status", "available")
        .numeric("cpu_count", NumericPredicate::Compare(CompareOp::Gte, 8));
    assert_eq!(
        store.query(&QueryInput::new(filter.clone(), Block(5), 10))?,
        vec![key(1)]
    );
    assert!(store.query(&QueryInput::new(filter.clone(), Block(4), 10))?.is_empty());

    assert!(store.delete_entity(key(1), Block(6))?);
    assert!(store.get_entity(key(1), Block(6))?.is_none());
    assert!(store.query(&QueryInput::new(filter, Block(6), 10))?.is_empty());
    assert!(store.fact_history(key(1))?.is_empty());
    Ok(())
}

#[test]
fn maintenance_is_a_no_op() -> EvaResult<()> {
    let store = simple_store();
    store.write_entity(node(5, "available", 4))?;
    assert_eq!(store.sweep(Block(100))?.total(), 0);
    assert!(store.entities_expiring_at(Block(5))?.is_empty());
    assert!(store.integrity_report(Block(5))?.is_empty());
    assert_eq!(store.count_entities(Block(5))?, 1);
    Ok(())
}
