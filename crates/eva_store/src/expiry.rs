use log::{info, warn};
use sea_query::{Alias, DynIden, Expr, Func, Order, Query, SeaRc};

use eva_core::{
    AttributeKind, Block, EntityKey, EvaResult, IntegrityFinding, MaintenanceApi, SweepReport,
};

use crate::db::{ATTRIBUTE_KINDS, Fact, Payloads, attribute_table, attribute_table_name};
use crate::store::{EvaStore, entity_key, exec, query_all};

impl MaintenanceApi for EvaStore {
    /// Deletes rows whose window closed at or before `watermark`, never
    /// past the oldest pinned read. Open rows are never swept.
    fn sweep(&self, watermark: Block) -> EvaResult<SweepReport> {
        let mut report = SweepReport {
            watermark,
            ..SweepReport::default()
        };
        if !self.settings.temporal {
            return Ok(report);
        }
        let tables: [(DynIden, &mut u64); 3] = [
            (attribute_table(AttributeKind::String), &mut report.string_rows),
            (attribute_table(AttributeKind::Numeric), &mut report.numeric_rows),
            (SeaRc::new(Payloads::Table), &mut report.payload_rows),
        ];
        let mut horizon = watermark;
        for (table, removed) in tables {
            let (count, effective) = self.sweep_table(table, watermark)?;
            *removed = count;
            horizon = horizon.min(effective);
        }
        report.watermark = horizon;
        info!(
            "sweep to block {} removed {} rows ({} string, {} numeric, {} payload)",
            report.watermark,
            report.total(),
            report.string_rows,
            report.numeric_rows,
            report.payload_rows
        );
        Ok(report)
    }

    fn entities_expiring_at(&self, block: Block) -> EvaResult<Vec<EntityKey>> {
        if !self.settings.temporal {
            return Ok(Vec::new());
        }
        let current = Alias::new("p");
        let successor = Alias::new("n");
        let next_version = Query::select()
            .expr(Expr::val(1))
            .from_as(Payloads::Table, successor.clone())
            .and_where(
                Expr::col((successor.clone(), Payloads::EntityKey))
                    .equals((current.clone(), Payloads::EntityKey)),
            )
            .and_where(Expr::col((successor, Payloads::FromBlock)).gte(block.as_i64()))
            .to_owned();
        let select = Query::select()
            .distinct()
            .column((current.clone(), Payloads::EntityKey))
            .from_as(Payloads::Table, current.clone())
            .and_where(Expr::col((current.clone(), Payloads::ToBlock)).eq(block.as_i64()))
            .and_where(Expr::exists(next_version).not())
            .order_by((current, Payloads::EntityKey), Order::Asc)
            .to_owned();
        self.with_read_tx(|conn| {
            query_all(conn, &select, |row| row.get::<_, Vec<u8>>(0))?
                .into_iter()
                .map(entity_key)
                .collect()
        })
    }

    fn integrity_report(&self, at: Block) -> EvaResult<Vec<IntegrityFinding>> {
        if !self.settings.temporal {
            return Ok(Vec::new());
        }
        let _pin = self.pin_block(at)?;
        let findings = self.with_read_tx(|conn| {
            let mut findings = Vec::new();
            for kind in ATTRIBUTE_KINDS {
                let select = Query::select()
                    .columns([Fact::EntityKey, Fact::Key])
                    .expr(Func::count(Expr::col(Fact::EntityKey)))
                    .from(attribute_table(kind))
                    .and_where(Expr::col(Fact::FromBlock).lte(at.as_i64()))
                    .and_where(Expr::col(Fact::ToBlock).gt(at.as_i64()))
                    .group_by_columns([Fact::EntityKey, Fact::Key])
                    .and_having(Expr::expr(Func::count(Expr::col(Fact::EntityKey))).gt(1))
                    .order_by(Fact::EntityKey, Order::Asc)
                    .order_by(Fact::Key, Order::Asc)
                    .to_owned();
                let rows = query_all(conn, &select, |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?;
                for (raw, attribute, count) in rows {
                    findings.push(IntegrityFinding {
                        table: attribute_table_name(kind).to_string(),
                        key: entity_key(raw)?,
                        attribute: Some(attribute),
                        visible_rows: count.max(0) as u64,
                    });
                }
            }
            let select = Query::select()
                .column(Payloads::EntityKey)
                .expr(Func::count(Expr::col(Payloads::EntityKey)))
                .from(Payloads::Table)
                .and_where(Expr::col(Payloads::FromBlock).lte(at.as_i64()))
                .and_where(Expr::col(Payloads::ToBlock).gt(at.as_i64()))
                .group_by_col(Payloads::EntityKey)
                .and_having(Expr::expr(Func::count(Expr::col(Payloads::EntityKey))).gt(1))
                .order_by(Payloads::EntityKey, Order::Asc)
                .to_owned();
            let rows = query_all(conn, &select, |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
            })?;
            for (raw, count) in rows {
                findings.push(IntegrityFinding {
                    table: "payloads".to_string(),
                    key: entity_key(raw)?,
                    attribute: None,
                    visible_rows: count.max(0) as u64,
                });
            }
            Ok(findings)
        })?;
        for finding in &findings {
            warn!(
                "integrity: {} rows of {} {} visible at block {at}",
                finding.visible_rows,
                finding.table,
                finding.attribute.as_deref().unwrap_or("payload")
            );
        }
        Ok(findings)
    }
}

impl EvaStore {
    /// Removes closed rows of one table in rowid batches, one transaction
    /// per batch. Returns the count and the lowest horizon used.
    ///
    /// Each batch computes its horizon and commits under the pin lock, so a
    /// read pinned mid-sweep holds back every later batch.
    fn sweep_table(&self, table: DynIden, watermark: Block) -> EvaResult<(u64, Block)> {
        let batch_size = self.settings.sweep_batch_size;
        let mut removed_total = 0u64;
        let mut lowest = watermark;
        loop {
            let removed = self.with_horizon_held(|oldest| {
                let effective = sweep_horizon(watermark, oldest);
                lowest = lowest.min(effective);
                let candidates = Query::select()
                    .column(Alias::new("rowid"))
                    .from(table.clone())
                    .and_where(Expr::col(Fact::ToBlock).lte(effective.as_i64()))
                    .limit(u64::from(batch_size))
                    .to_owned();
                let delete = Query::delete()
                    .from_table(table.clone())
                    .and_where(Expr::col(Alias::new("rowid")).in_subquery(candidates))
                    .to_owned();
                self.with_write_tx(|conn| exec(conn, &delete))
            })? as u64;
            removed_total += removed;
            if removed < u64::from(batch_size) {
                return Ok((removed_total, lowest));
            }
        }
    }
}

/// Largest watermark that leaves every pinned read intact.
fn sweep_horizon(watermark: Block, oldest_pin: Option<Block>) -> Block {
    let capped = watermark.min(Block(Block::OPEN.as_i64() - 1));
    match oldest_pin {
        Some(oldest) if oldest < capped => oldest,
        _ => capped,
    }
}

#[cfg(test)]
mod tests {
    use eva_core::Block;

    use super::sweep_horizon;

    #[test]
    fn horizon_stops_at_the_oldest_pin() {
        assert_eq!(sweep_horizon(Block(50), None), Block(50));
        assert_eq!(sweep_horizon(Block(50), Some(Block(11))), Block(11));
        assert_eq!(sweep_horizon(Block(50), Some(Block(80))), Block(50));
        assert_eq!(sweep_horizon(Block::OPEN, None), Block(Block::OPEN.as_i64() - 1));
    }
}
