use std::collections::HashSet;

use log::{debug, warn};
use rusqlite::Connection;
use sea_query::{
    Alias, Expr, Func, JoinType, Order, Query, SelectStatement, SimpleExpr, SqliteQueryBuilder,
};

use eva_core::{
    AttributeKind, Block, Clause, CompareOp, EntityKey, EntityReadApi, EntityRecord, EvaError,
    EvaResult, FactRow, FactValue, NumericAttributes, NumericPredicate, OWNER_ATTRIBUTE, Predicate,
    QueryInput, SortDirection, StringAttributes, StringPredicate,
};

use crate::db::{ATTRIBUTE_KINDS, Fact, Payloads, StringAttributes as StringTable, attribute_table};
use crate::store::{EvaStore, entity_key, query_all, query_opt};

/// One self-join arm over an attribute table.
#[derive(Clone, Debug)]
struct Arm {
    name: String,
    alias: Alias,
    kind: AttributeKind,
    attribute: String,
    clause: Option<Clause>,
}

struct PayloadRow {
    from_block: i64,
    to_block: i64,
    payload: Vec<u8>,
    content_type: String,
    strings: String,
    numerics: String,
}

impl EntityReadApi for EvaStore {
    fn get_entity(&self, key: EntityKey, at: Block) -> EvaResult<Option<EntityRecord>> {
        let _pin = self.pin_block(at)?;
        self.with_read_tx(|conn| self.read_payload(conn, key, at))
    }

    fn find_by_attribute(
        &self,
        attribute: &str,
        value: &str,
        at: Block,
    ) -> EvaResult<Option<EntityRecord>> {
        if attribute.trim().is_empty() {
            return Err(EvaError::invalid_query("lookup attribute name is empty"));
        }
        let _pin = self.pin_block(at)?;
        self.with_read_tx(|conn| {
            let Some(key) = self.resolve_by_attribute(conn, attribute, value, at)? else {
                return Ok(None);
            };
            self.materialize_from_facts(conn, key, at).map(Some)
        })
    }

    fn query(&self, input: &QueryInput) -> EvaResult<Vec<EntityKey>> {
        input.validate()?;
        let _pin = self.pin_block(input.at_block)?;
        self.with_read_tx(|conn| self.run_filter(conn, input))
    }

    fn query_entities(&self, input: &QueryInput) -> EvaResult<Vec<EntityRecord>> {
        input.validate()?;
        let _pin = self.pin_block(input.at_block)?;
        self.with_read_tx(|conn| {
            let keys = self.run_filter(conn, input)?;
            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(record) = self.read_payload(conn, key, input.at_block)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
    }

    fn count_entities(&self, at: Block) -> EvaResult<u64> {
        let _pin = self.pin_block(at)?;
        let select = Query::select()
            .expr(Func::count(Expr::col(Payloads::EntityKey)))
            .from(Payloads::Table)
            .and_where(self.payload_visible(at))
            .to_owned();
        self.with_read_tx(|conn| {
            let count = query_opt(conn, &select, |row| row.get::<_, i64>(0))?;
            Ok(count.unwrap_or(0).max(0) as u64)
        })
    }

    fn fact_history(&self, key: EntityKey) -> EvaResult<Vec<FactRow>> {
        self.with_read_tx(|conn| {
            let mut history = Vec::new();
            for kind in ATTRIBUTE_KINDS {
                let mut select = Query::select();
                select
                    .from(attribute_table(kind))
                    .column(Fact::Key)
                    .and_where(Expr::col(Fact::EntityKey).eq(key.as_vec()))
                    .order_by(Fact::Key, Order::Asc);
                if self.settings.temporal {
                    select
                        .columns([Fact::Value, Fact::FromBlock, Fact::ToBlock])
                        .order_by(Fact::FromBlock, Order::Asc);
                } else {
                    select
                        .columns([Fact::Value, Fact::Block])
                        .expr(Expr::val(Block::OPEN.as_i64()));
                }
                let rows = query_all(conn, &select, |row| {
                    let value = match kind {
                        AttributeKind::String => FactValue::String(row.get(1)?),
                        AttributeKind::Numeric => FactValue::Numeric(row.get(1)?),
                    };
                    Ok(FactRow {
                        kind,
                        attribute: row.get(0)?,
                        value,
                        from_block: Block(row.get(2)?),
                        to_block: Block(row.get(3)?),
                    })
                })?;
                history.extend(rows);
            }
            Ok(history)
        })
    }
}

impl EvaStore {
    fn fact_visible(&self, table: Alias, at: Block) -> SimpleExpr {
        if self.settings.temporal {
            Expr::col((table.clone(), Fact::FromBlock))
                .lte(at.as_i64())
                .and(Expr::col((table, Fact::ToBlock)).gt(at.as_i64()))
        } else {
            Expr::col((table, Fact::Block)).lte(at.as_i64())
        }
    }

    fn payload_visible(&self, at: Block) -> SimpleExpr {
        if self.settings.temporal {
            Expr::col(Payloads::FromBlock)
                .lte(at.as_i64())
                .and(Expr::col(Payloads::ToBlock).gt(at.as_i64()))
        } else {
            Expr::col(Payloads::Block).lte(at.as_i64())
        }
    }

    /// Rejects a fact row when a newer row of the same attribute is also
    /// visible at `at`. The simple layout cannot hold two rows per attribute.
    fn newest_version(&self, kind: AttributeKind, alias: &str, at: Block) -> Option<SimpleExpr> {
        if !self.settings.temporal {
            return None;
        }
        let row = Alias::new(alias);
        let newer = Alias::new(format!("{alias}_newer"));
        let shadow = Query::select()
            .expr(Expr::val(1))
            .from_as(attribute_table(kind), newer.clone())
            .and_where(
                Expr::col((newer.clone(), Fact::EntityKey))
                    .equals((row.clone(), Fact::EntityKey)),
            )
            .and_where(Expr::col((newer.clone(), Fact::Key)).equals((row.clone(), Fact::Key)))
            .and_where(
                Expr::col((newer.clone(), Fact::FromBlock))
                    .gt(Expr::col((row, Fact::FromBlock))),
            )
            .and_where(self.fact_visible(newer, at))
            .to_owned();
        Some(Expr::exists(shadow).not())
    }

    fn version_column(&self) -> Fact {
        if self.settings.temporal {
            Fact::FromBlock
        } else {
            Fact::Block
        }
    }

    /// Point-by-key: the payload row and its cached attribute snapshot.
    fn read_payload(
        &self,
        conn: &Connection,
        key: EntityKey,
        at: Block,
    ) -> EvaResult<Option<EntityRecord>> {
        let mut select = Query::select();
        select.from(Payloads::Table);
        if self.settings.temporal {
            select
                .columns([Payloads::FromBlock, Payloads::ToBlock])
                .order_by(Payloads::FromBlock, Order::Desc);
        } else {
            select
                .column(Payloads::Block)
                .expr(Expr::val(Block::OPEN.as_i64()));
        }
        select
            .columns([
                Payloads::Payload,
                Payloads::ContentType,
                Payloads::StringAttributes,
                Payloads::NumericAttributes,
            ])
            .and_where(Expr::col(Payloads::EntityKey).eq(key.as_vec()))
            .and_where(self.payload_visible(at))
            .limit(2);
        let rows = query_all(conn, &select, |row| {
            Ok(PayloadRow {
                from_block: row.get(0)?,
                to_block: row.get(1)?,
                payload: row.get(2)?,
                content_type: row.get(3)?,
                strings: row.get(4)?,
                numerics: row.get(5)?,
            })
        })?;
        if rows.len() > 1 {
            self.report_overlap("payloads", key, None, at);
        }
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let strings: StringAttributes = serde_json::from_str(&row.strings)?;
        let numerics: NumericAttributes = serde_json::from_str(&row.numerics)?;
        Ok(Some(EntityRecord::from_parts(
            key,
            (Block(row.from_block), Block(row.to_block)),
            row.payload,
            row.content_type,
            strings,
            numerics,
        )))
    }

    /// Latest visible entity carrying `attribute = value`.
    fn resolve_by_attribute(
        &self,
        conn: &Connection,
        attribute: &str,
        value: &str,
        at: Block,
    ) -> EvaResult<Option<EntityKey>> {
        let table = Alias::new("sa");
        let mut select = Query::select();
        select
            .column((table.clone(), Fact::EntityKey))
            .from_as(StringTable::Table, table.clone())
            .and_where(Expr::col((table.clone(), Fact::Key)).eq(attribute))
            .and_where(Expr::col((table.clone(), Fact::Value)).eq(value))
            .and_where(self.fact_visible(table.clone(), at))
            .order_by((table, self.version_column()), Order::Desc)
            .limit(1);
        if let Some(newest) = self.newest_version(AttributeKind::String, "sa", at) {
            select.and_where(newest);
        }
        query_opt(conn, &select, |row| row.get::<_, Vec<u8>>(0))?
            .map(entity_key)
            .transpose()
    }

    /// Point-by-id materialisation: every visible fact, plus the payload row.
    fn materialize_from_facts(
        &self,
        conn: &Connection,
        key: EntityKey,
        at: Block,
    ) -> EvaResult<EntityRecord> {
        let mut strings = StringAttributes::new();
        let mut numerics = NumericAttributes::new();
        let mut newest_fact = i64::MIN;
        for kind in ATTRIBUTE_KINDS {
            let table = Alias::new("f");
            let select = Query::select()
                .columns([
                    (table.clone(), Fact::Key),
                    (table.clone(), Fact::Value),
                    (table.clone(), self.version_column()),
                ])
                .from_as(attribute_table(kind), table.clone())
                .and_where(Expr::col((table.clone(), Fact::EntityKey)).eq(key.as_vec()))
                .and_where(self.fact_visible(table.clone(), at))
                .order_by((table.clone(), Fact::Key), Order::Asc)
                .order_by((table, self.version_column()), Order::Desc)
                .to_owned();
            let mut previous: Option<String> = None;
            match kind {
                AttributeKind::String => {
                    let rows = query_all(conn, &select, |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    })?;
                    for (name, value, from_block) in rows {
                        newest_fact = newest_fact.max(from_block);
                        if previous.as_deref() == Some(name.as_str()) {
                            self.report_overlap("string_attributes", key, Some(&name), at);
                            continue;
                        }
                        previous = Some(name.clone());
                        strings.insert(name, value);
                    }
                }
                AttributeKind::Numeric => {
                    let rows = query_all(conn, &select, |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    })?;
                    for (name, value, from_block) in rows {
                        newest_fact = newest_fact.max(from_block);
                        if previous.as_deref() == Some(name.as_str()) {
                            self.report_overlap("numeric_attributes", key, Some(&name), at);
                            continue;
                        }
                        previous = Some(name.clone());
                        numerics.insert(name, value);
                    }
                }
            }
        }
        let (range, payload, content_type) = match self.read_payload(conn, key, at)? {
            Some(record) => (
                (
                    record.last_modified_at_block,
                    record.expires_at_block.unwrap_or(Block::OPEN),
                ),
                record.payload,
                record.content_type,
            ),
            None => {
                warn!("entity {key} has visible facts at block {at} but no payload row");
                ((Block(newest_fact), Block::OPEN), Vec::new(), String::new())
            }
        };
        Ok(EntityRecord::from_parts(
            key,
            range,
            payload,
            content_type,
            strings,
            numerics,
        ))
    }

    fn run_filter(&self, conn: &Connection, input: &QueryInput) -> EvaResult<Vec<EntityKey>> {
        let limit = self.effective_limit(input.limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let select = self.build_filter(input, limit)?;
        debug!("filter query: {}", select.to_string(SqliteQueryBuilder));
        let rows = query_all(conn, &select, |row| row.get::<_, Vec<u8>>(0))?;
        let mut seen = HashSet::with_capacity(rows.len());
        let mut keys = Vec::with_capacity(rows.len());
        for raw in rows {
            let key = entity_key(raw)?;
            if seen.insert(key) {
                keys.push(key);
            } else {
                self.report_overlap("query", key, None, input.at_block);
            }
        }
        Ok(keys)
    }

    fn build_filter(&self, input: &QueryInput, limit: u32) -> EvaResult<SelectStatement> {
        let at = input.at_block;
        let mut predicates: Vec<Predicate> = input.filter.predicates.clone();
        if let Some(owner) = &input.owner {
            predicates.push(Predicate {
                attribute: OWNER_ATTRIBUTE.to_string(),
                clause: Clause::String(StringPredicate::Equals(owner.clone())),
            });
        }
        let mut arms: Vec<Arm> = predicates
            .into_iter()
            .enumerate()
            .map(|(index, predicate)| Arm {
                name: format!("a{index}"),
                alias: Alias::new(format!("a{index}")),
                kind: predicate.clause.kind(),
                attribute: predicate.attribute,
                clause: Some(predicate.clause),
            })
            .collect();

        let sort_arm = match &input.order_by {
            Some(order_by) => {
                let existing = arms.iter().position(|arm| {
                    arm.attribute == order_by.attribute && arm.kind == order_by.kind
                });
                Some(match existing {
                    Some(position) => position,
                    None => {
                        let name = format!("a{}", arms.len());
                        arms.push(Arm {
                            alias: Alias::new(name.as_str()),
                            name,
                            kind: order_by.kind,
                            attribute: order_by.attribute.clone(),
                            clause: None,
                        });
                        arms.len() - 1
                    }
                })
            }
            None => None,
        };

        let mut select = Query::select();
        let driver = match arms.first() {
            Some(first) => {
                select.from_as(attribute_table(first.kind), first.alias.clone());
                first.alias.clone()
            }
            None => {
                let alias = Alias::new("p");
                select.from_as(Payloads::Table, alias.clone());
                if self.settings.temporal {
                    select
                        .and_where(Expr::col((alias.clone(), Payloads::FromBlock)).lte(at.as_i64()))
                        .and_where(Expr::col((alias.clone(), Payloads::ToBlock)).gt(at.as_i64()));
                } else {
                    select.and_where(Expr::col((alias.clone(), Payloads::Block)).lte(at.as_i64()));
                }
                alias
            }
        };
        select.distinct().column((driver.clone(), Fact::EntityKey));

        for (index, arm) in arms.iter().enumerate() {
            if index > 0 {
                select.join_as(
                    JoinType::InnerJoin,
                    attribute_table(arm.kind),
                    arm.alias.clone(),
                    Expr::col((arm.alias.clone(), Fact::EntityKey))
                        .equals((driver.clone(), Fact::EntityKey)),
                );
            }
            select
                .and_where(Expr::col((arm.alias.clone(), Fact::Key)).eq(arm.attribute.as_str()))
                .and_where(self.fact_visible(arm.alias.clone(), at));
            if let Some(clause) = &arm.clause {
                select.and_where(clause_condition(arm.alias.clone(), clause));
            }
            if let Some(newest) = self.newest_version(arm.kind, &arm.name, at) {
                select.and_where(newest);
            }
        }

        for (index, (attribute, value)) in input.filter.tags.iter().enumerate() {
            let name = format!("t{index}");
            let tag = Alias::new(name.as_str());
            let mut exists = Query::select();
            exists
                .expr(Expr::val(1))
                .from_as(StringTable::Table, tag.clone())
                .and_where(
                    Expr::col((tag.clone(), Fact::EntityKey))
                        .equals((driver.clone(), Fact::EntityKey)),
                )
                .and_where(Expr::col((tag.clone(), Fact::Key)).eq(attribute.as_str()))
                .and_where(Expr::col((tag.clone(), Fact::Value)).eq(value.as_str()))
                .and_where(self.fact_visible(tag, at));
            if let Some(newest) = self.newest_version(AttributeKind::String, &name, at) {
                exists.and_where(newest);
            }
            select.and_where(Expr::exists(exists));
        }

        if let (Some(position), Some(order_by)) = (sort_arm, &input.order_by) {
            let sort_value = Alias::new("sort_value");
            select.expr_as(
                Expr::col((arms[position].alias.clone(), Fact::Value)),
                sort_value.clone(),
            );
            let order = match order_by.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            select.order_by(sort_value, order);
        }
        select
            .order_by((driver, Fact::EntityKey), Order::Asc)
            .limit(u64::from(limit))
            .offset(u64::from(input.offset));
        Ok(select)
    }

    fn report_overlap(&self, table: &str, key: EntityKey, attribute: Option<&str>, at: Block) {
        if self.settings.warn_on_overlap {
            warn!(
                "integrity: {table} has more than one row visible at block {at} for {key}{}",
                attribute.map(|name| format!(" key {name}")).unwrap_or_default()
            );
        }
    }
}

fn clause_condition(alias: Alias, clause: &Clause) -> SimpleExpr {
    let value = Expr::col((alias, Fact::Value));
    match clause {
        Clause::String(StringPredicate::Equals(expected)) => value.eq(expected.as_str()),
        Clause::Numeric(predicate) => numeric_condition(value, *predicate),
    }
}

fn numeric_condition(value: Expr, predicate: NumericPredicate) -> SimpleExpr {
    let operand = predicate.operand();
    match predicate.op() {
        CompareOp::Eq => value.eq(operand),
        CompareOp::Ne => value.ne(operand),
        CompareOp::Lt => value.lt(operand),
        CompareOp::Lte => value.lte(operand),
        CompareOp::Gt => value.gt(operand),
        CompareOp::Gte => value.gte(operand),
    }
}
