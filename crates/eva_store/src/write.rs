use log::debug;
use rusqlite::Connection;
use sea_query::{Expr, Func, IntoColumnRef, OnConflict, Query, SimpleExpr};

use eva_core::{
    AttributeKind, Block, BlockBatch, BlockReceipt, EntityKey, EntityWriteApi, EvaError, EvaResult,
    WriteEntityInput,
};

use crate::config::InsertMode;
use crate::db::{ATTRIBUTE_KINDS, Fact, Payloads, attribute_table};
use crate::store::{EvaStore, exec, query_opt, store_last_block};

#[derive(Clone, Copy, Debug, Default)]
struct WriteRows {
    string_rows: usize,
    numeric_rows: usize,
}

impl EntityWriteApi for EvaStore {
    fn write_entity(&self, input: WriteEntityInput) -> EvaResult<()> {
        let to_block = input.validate()?;
        let rows = self.with_write_tx(|conn| self.apply_write(conn, &input, to_block))?;
        debug!(
            "wrote {} at block {} ({} string, {} numeric facts)",
            input.key, input.block, rows.string_rows, rows.numeric_rows
        );
        Ok(())
    }

    fn write_block(&self, batch: BlockBatch) -> EvaResult<BlockReceipt> {
        let mut expiries = Vec::with_capacity(batch.writes.len());
        for write in &batch.writes {
            if write.block != batch.block {
                return Err(EvaError::invalid(format!(
                    "write for {} targets block {}, batch is block {}",
                    write.key, write.block, batch.block
                )));
            }
            expiries.push(write.validate()?);
        }
        let receipt = self.with_write_tx(|conn| {
            let mut receipt = BlockReceipt {
                block: batch.block,
                ..BlockReceipt::default()
            };
            for key in &batch.deletes {
                if self.close_entity(conn, *key, batch.block)? {
                    receipt.entities_deleted += 1;
                }
            }
            for (write, to_block) in batch.writes.iter().zip(expiries) {
                let rows = self.apply_write(conn, write, to_block)?;
                receipt.entities_written += 1;
                receipt.string_rows += rows.string_rows;
                receipt.numeric_rows += rows.numeric_rows;
            }
            store_last_block(conn, batch.block)?;
            Ok(receipt)
        })?;
        debug!(
            "committed block {}: {} written, {} deleted, {} fact rows",
            receipt.block,
            receipt.entities_written,
            receipt.entities_deleted,
            receipt.string_rows + receipt.numeric_rows
        );
        Ok(receipt)
    }

    fn delete_entity(&self, key: EntityKey, block: Block) -> EvaResult<bool> {
        self.with_write_tx(|conn| self.close_entity(conn, key, block))
    }
}

impl EvaStore {
    fn apply_write(
        &self,
        conn: &Connection,
        input: &WriteEntityInput,
        to_block: Block,
    ) -> EvaResult<WriteRows> {
        if self.settings.temporal {
            self.apply_temporal_write(conn, input, to_block)
        } else {
            self.apply_simple_write(conn, input)
        }
    }

    fn apply_temporal_write(
        &self,
        conn: &Connection,
        input: &WriteEntityInput,
        to_block: Block,
    ) -> EvaResult<WriteRows> {
        if let Some(latest) = latest_version_block(conn, input.key, Payloads::FromBlock)? {
            if input.block <= latest {
                return Err(EvaError::constraint(format!(
                    "{} already has a version at block {latest}; cannot write at {}",
                    input.key, input.block
                )));
            }
        }
        // Full replacement: every open version ends where the new one starts.
        close_open_rows(conn, input.key, input.block, false)?;

        let rows = WriteRows {
            string_rows: input.string_attributes.len(),
            numeric_rows: input.numeric_attributes.len(),
        };
        for kind in ATTRIBUTE_KINDS {
            let facts = fact_values(input, kind);
            self.insert_facts(conn, kind, input.key, input.block, Some(to_block), facts)?;
        }

        let insert_payload = Query::insert()
            .into_table(Payloads::Table)
            .columns([
                Payloads::EntityKey,
                Payloads::FromBlock,
                Payloads::ToBlock,
                Payloads::Payload,
                Payloads::ContentType,
                Payloads::StringAttributes,
                Payloads::NumericAttributes,
            ])
            .values_panic([
                input.key.as_vec().into(),
                input.block.as_i64().into(),
                to_block.as_i64().into(),
                input.payload.clone().into(),
                input.content_type.clone().into(),
                serde_json::to_string(&input.string_attributes)?.into(),
                serde_json::to_string(&input.numeric_attributes)?.into(),
            ])
            .on_conflict(
                OnConflict::columns([Payloads::EntityKey, Payloads::FromBlock])
                    .update_columns([
                        Payloads::ToBlock,
                        Payloads::Payload,
                        Payloads::ContentType,
                        Payloads::StringAttributes,
                        Payloads::NumericAttributes,
                    ])
                    .to_owned(),
            )
            .to_owned();
        exec(conn, &insert_payload)?;
        Ok(rows)
    }

    /// Simple EAV keeps only the latest value per `(entity_key, key)`.
    fn apply_simple_write(
        &self,
        conn: &Connection,
        input: &WriteEntityInput,
    ) -> EvaResult<WriteRows> {
        if let Some(latest) = latest_version_block(conn, input.key, Payloads::Block)? {
            if input.block < latest {
                return Err(EvaError::constraint(format!(
                    "{} was written at block {latest}; cannot rewrite at {}",
                    input.key, input.block
                )));
            }
        }
        for kind in ATTRIBUTE_KINDS {
            let kept: Vec<String> = match kind {
                AttributeKind::String => input.string_attributes.keys().cloned().collect(),
                AttributeKind::Numeric => input.numeric_attributes.keys().cloned().collect(),
            };
            let prune = Query::delete()
                .from_table(attribute_table(kind))
                .and_where(Expr::col(Fact::EntityKey).eq(input.key.as_vec()))
                .and_where(Expr::col(Fact::Key).is_not_in(kept))
                .to_owned();
            exec(conn, &prune)?;
            let facts = fact_values(input, kind);
            self.insert_facts(conn, kind, input.key, input.block, None, facts)?;
        }

        let upsert_payload = Query::insert()
            .into_table(Payloads::Table)
            .columns([
                Payloads::EntityKey,
                Payloads::Block,
                Payloads::Payload,
                Payloads::ContentType,
                Payloads::StringAttributes,
                Payloads::NumericAttributes,
            ])
            .values_panic([
                input.key.as_vec().into(),
                input.block.as_i64().into(),
                input.payload.clone().into(),
                input.content_type.clone().into(),
                serde_json::to_string(&input.string_attributes)?.into(),
                serde_json::to_string(&input.numeric_attributes)?.into(),
            ])
            .on_conflict(
                OnConflict::column(Payloads::EntityKey)
                    .update_columns([
                        Payloads::Block,
                        Payloads::Payload,
                        Payloads::ContentType,
                        Payloads::StringAttributes,
                        Payloads::NumericAttributes,
                    ])
                    .to_owned(),
            )
            .to_owned();
        exec(conn, &upsert_payload)?;
        Ok(WriteRows {
            string_rows: input.string_attributes.len(),
            numeric_rows: input.numeric_attributes.len(),
        })
    }

    /// `to_block` is `None` for the simple layout, which upserts in place.
    fn insert_facts(
        &self,
        conn: &Connection,
        kind: AttributeKind,
        key: EntityKey,
        block: Block,
        to_block: Option<Block>,
        facts: Vec<(String, SimpleExpr)>,
    ) -> EvaResult<()> {
        if facts.is_empty() {
            return Ok(());
        }
        let chunk_size = match self.settings.insert_mode {
            InsertMode::Individual => 1,
            InsertMode::Batched => self.settings.batch_rows,
        };
        let mut pending = facts.into_iter().peekable();
        while pending.peek().is_some() {
            let mut insert = Query::insert();
            insert.into_table(attribute_table(kind));
            match to_block {
                Some(_) => insert.columns([
                    Fact::EntityKey,
                    Fact::FromBlock,
                    Fact::ToBlock,
                    Fact::Key,
                    Fact::Value,
                ]),
                None => insert.columns([Fact::EntityKey, Fact::Block, Fact::Key, Fact::Value]),
            };
            for (name, value) in pending.by_ref().take(chunk_size) {
                let mut row: Vec<SimpleExpr> = vec![key.as_vec().into(), block.as_i64().into()];
                if let Some(to_block) = to_block {
                    row.push(to_block.as_i64().into());
                }
                row.push(name.into());
                row.push(value);
                insert.values_panic(row);
            }
            if to_block.is_none() {
                insert.on_conflict(
                    OnConflict::columns([Fact::EntityKey, Fact::Key])
                        .update_columns([Fact::Block, Fact::Value])
                        .to_owned(),
                );
            }
            exec(conn, &insert).map_err(|err| match err {
                EvaError::ConstraintViolation { message } => EvaError::constraint(format!(
                    "duplicate {} fact for {key} at block {block}: {message}",
                    kind.as_str()
                )),
                other => other,
            })?;
        }
        Ok(())
    }

    /// Ends every open row of the entity at `block`. Returns whether the
    /// entity had a live version.
    pub(crate) fn close_entity(
        &self,
        conn: &Connection,
        key: EntityKey,
        block: Block,
    ) -> EvaResult<bool> {
        if !self.settings.temporal {
            for kind in ATTRIBUTE_KINDS {
                let delete = Query::delete()
                    .from_table(attribute_table(kind))
                    .and_where(Expr::col(Fact::EntityKey).eq(key.as_vec()))
                    .to_owned();
                exec(conn, &delete)?;
            }
            let delete = Query::delete()
                .from_table(Payloads::Table)
                .and_where(Expr::col(Payloads::EntityKey).eq(key.as_vec()))
                .to_owned();
            return Ok(exec(conn, &delete)? > 0);
        }
        let closed = close_open_rows(conn, key, block, true)?;
        debug!("closed {closed} open payload rows of {key} at block {block}");
        Ok(closed > 0)
    }
}

fn fact_values(input: &WriteEntityInput, kind: AttributeKind) -> Vec<(String, SimpleExpr)> {
    match kind {
        AttributeKind::String => input
            .string_attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.clone().into()))
            .collect(),
        AttributeKind::Numeric => input
            .numeric_attributes
            .iter()
            .map(|(name, value)| (name.clone(), (*value).into()))
            .collect(),
    }
}

fn latest_version_block(
    conn: &Connection,
    key: EntityKey,
    column: Payloads,
) -> EvaResult<Option<Block>> {
    let select = Query::select()
        .expr(Func::max(Expr::col(column)))
        .from(Payloads::Table)
        .and_where(Expr::col(Payloads::EntityKey).eq(key.as_vec()))
        .to_owned();
    let latest = query_opt(conn, &select, |row| row.get::<_, Option<i64>>(0))?;
    Ok(latest.flatten().map(Block))
}

/// Sets `to_block = block` on rows live at `block`. With `inclusive`, rows
/// that start at `block` are closed too, leaving them empty.
fn close_open_rows(
    conn: &Connection,
    key: EntityKey,
    block: Block,
    inclusive: bool,
) -> EvaResult<usize> {
    for kind in ATTRIBUTE_KINDS {
        let update = Query::update()
            .table(attribute_table(kind))
            .value(Fact::ToBlock, block.as_i64())
            .and_where(Expr::col(Fact::EntityKey).eq(key.as_vec()))
            .and_where(opened_by(Fact::FromBlock, block, inclusive))
            .and_where(Expr::col(Fact::ToBlock).gt(block.as_i64()))
            .to_owned();
        exec(conn, &update)?;
    }
    let update = Query::update()
        .table(Payloads::Table)
        .value(Payloads::ToBlock, block.as_i64())
        .and_where(Expr::col(Payloads::EntityKey).eq(key.as_vec()))
        .and_where(opened_by(Payloads::FromBlock, block, inclusive))
        .and_where(Expr::col(Payloads::ToBlock).gt(block.as_i64()))
        .to_owned();
    exec(conn, &update)
}

fn opened_by(column: impl IntoColumnRef, block: Block, inclusive: bool) -> SimpleExpr {
    if inclusive {
        Expr::col(column).lte(block.as_i64())
    } else {
        Expr::col(column).lt(block.as_i64())
    }
}
