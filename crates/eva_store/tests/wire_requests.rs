mod common;

use common::{key, temporal_store};
use eva_store::{
    Block, CreateEntityRequest, EntityReadApi, EntityResponse, EntityWriteApi, EvaError, EvaResult,
    QueryRequest,
};
use serde_json::json;

#[test]
fn create_request_round_trips_through_the_store() -> EvaResult<()> {
    let store = temporal_store();
    let request: CreateEntityRequest = serde_json::from_value(json!({
        "key": key(7).to_hex(),
        "expiresIn": 10,
        "payload": "aGVsbG8=",
        "contentType": "text/plain",
        "ownerAddress": "0xabc",
        "stringAnnotations": { "type": "node", "region": "eu-west" },
        "numericAnnotations": { "cpu_count": 8 }
    }))?;
    store.write_entity(request.into_write_input(Block(100))?)?;

    let record = store.get_entity(key(7), Block(105))?.expect("record");
    assert_eq!(record.payload, b"hello");
    assert_eq!(record.owner(), Some("0xabc"));
    assert_eq!(record.expires_at_block, Some(Block(110)));

    let response = EntityResponse::from(record);
    let encoded = serde_json::to_value(&response)?;
    assert_eq!(encoded["payload"], "aGVsbG8=");
    assert_eq!(encoded["stringAnnotations"]["region"], "eu-west");
    assert!(encoded["stringAnnotations"].get("$owner").is_none());
    Ok(())
}

#[test]
fn query_request_parses_numeric_operators() -> EvaResult<()> {
    let store = temporal_store();
    for (n, cpu) in [(1, 2), (2, 8), (3, 32)] {
        let request: CreateEntityRequest = serde_json::from_value(json!({
            "key": key(n).to_hex(),
            "expiresIn": 50,
            "payload": "",
            "contentType": "application/json",
            "ownerAddress": "0xabc",
            "stringAnnotations": { "type": "node" },
            "numericAnnotations": { "cpu_count": cpu }
        }))?;
        store.write_entity(request.into_write_input(Block(1))?)?;
    }
    let request: QueryRequest = serde_json::from_value(json!({
        "stringAnnotations": { "type": "node" },
        "numericAnnotations": { "cpu_count": ">=8" },
        "ownerAddress": "",
        "limit": 10
    }))?;
    let keys = store.query(&request.into_query_input(Block(1))?)?;
    assert_eq!(keys, vec![key(2), key(3)]);

    let malformed: QueryRequest = serde_json::from_value(json!({
        "numericAnnotations": { "cpu_count": "~8" }
    }))?;
    assert!(matches!(
        malformed.into_query_input(Block(1)),
        Err(EvaError::InvalidQuery { .. })
    ));
    Ok(())
}

#[test]
fn create_request_without_positive_expiry_never_reaches_the_store() -> EvaResult<()> {
    let store = temporal_store();
    for expires_in in [0, -1] {
        let request: CreateEntityRequest = serde_json::from_value(json!({
            "key": key(9).to_hex(),
            "expiresIn": expires_in,
            "contentType": "text/plain",
            "ownerAddress": "0xabc"
        }))?;
        assert!(matches!(
            request.into_write_input(Block(1)),
            Err(EvaError::Validation { .. })
        ));
    }
    assert!(store.get_entity(key(9), Block(1))?.is_none());
    Ok(())
}
