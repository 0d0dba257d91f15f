//! One parameterized builder for the temporal and simple EAV layouts.

use log::info;
use rusqlite::Connection;
use sea_query::{
    Alias, ColumnDef, Expr, Index, IndexCreateStatement, IndexOrder, SqliteQueryBuilder, Table,
    TableCreateStatement,
};

use eva_core::{ColumnManifest, EvaResult, IndexManifest, SchemaManifest, TableManifest};

use crate::config::{IndexProfile, SchemaConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogicalType {
    Blob,
    Integer,
    Text,
}

impl LogicalType {
    fn as_str(self) -> &'static str {
        match self {
            LogicalType::Blob => "blob",
            LogicalType::Integer => "integer",
            LogicalType::Text => "text",
        }
    }
}

#[derive(Clone, Debug)]
struct ColumnSpec {
    name: &'static str,
    logical_type: LogicalType,
    default: Option<&'static str>,
}

const fn column(name: &'static str, logical_type: LogicalType) -> ColumnSpec {
    ColumnSpec {
        name,
        logical_type,
        default: None,
    }
}

const fn column_with_default(
    name: &'static str,
    logical_type: LogicalType,
    default: &'static str,
) -> ColumnSpec {
    ColumnSpec {
        name,
        logical_type,
        default: Some(default),
    }
}

#[derive(Clone, Debug)]
struct TableSpec {
    name: &'static str,
    columns: Vec<ColumnSpec>,
    primary_key: Vec<&'static str>,
}

#[derive(Clone, Debug)]
pub struct IndexSpec {
    pub name: String,
    pub table: &'static str,
    pub columns: Vec<(&'static str, IndexOrder)>,
}

impl IndexSpec {
    fn new(table: &'static str, suffix: &str, columns: &[(&'static str, IndexOrder)]) -> Self {
        Self {
            name: format!("{table}_{suffix}"),
            table,
            columns: columns.to_vec(),
        }
    }

    fn statement(&self) -> IndexCreateStatement {
        let mut index = Index::create();
        index
            .if_not_exists()
            .name(self.name.as_str())
            .table(Alias::new(self.table));
        for (column, order) in &self.columns {
            index.col((Alias::new(*column), order.clone()));
        }
        index
    }
}

const ATTRIBUTE_TABLES: [(&str, LogicalType); 2] = [
    ("string_attributes", LogicalType::Text),
    ("numeric_attributes", LogicalType::Integer),
];

const ASC: IndexOrder = IndexOrder::Asc;
const DESC: IndexOrder = IndexOrder::Desc;

#[derive(Clone, Copy, Debug)]
pub struct SchemaBuilder {
    config: SchemaConfig,
}

impl SchemaBuilder {
    pub fn new(config: SchemaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SchemaConfig {
        self.config
    }

    pub fn variant_name(&self) -> String {
        let layout = if self.config.temporal {
            "temporal"
        } else {
            "simple"
        };
        let profile = match self.config.index_profile {
            IndexProfile::Full => "full",
            IndexProfile::Minimal => "minimal",
        };
        format!("{layout}/{profile}")
    }

    fn tables(&self) -> Vec<TableSpec> {
        use LogicalType::{Blob, Integer, Text};
        let mut tables = Vec::new();
        for (name, value_type) in ATTRIBUTE_TABLES {
            let (columns, primary_key) = if self.config.temporal {
                (
                    vec![
                        column("entity_key", Blob),
                        column("from_block", Integer),
                        column("to_block", Integer),
                        column("key", Text),
                        column("value", value_type),
                    ],
                    vec!["entity_key", "key", "from_block"],
                )
            } else {
                (
                    vec![
                        column("entity_key", Blob),
                        column("block", Integer),
                        column("key", Text),
                        column("value", value_type),
                    ],
                    vec!["entity_key", "key"],
                )
            };
            tables.push(TableSpec {
                name,
                columns,
                primary_key,
            });
        }
        let mut payload_columns = vec![column("entity_key", Blob)];
        let payload_key = if self.config.temporal {
            payload_columns.push(column("from_block", Integer));
            payload_columns.push(column("to_block", Integer));
            vec!["entity_key", "from_block"]
        } else {
            payload_columns.push(column("block", Integer));
            vec!["entity_key"]
        };
        payload_columns.extend([
            column("payload", Blob),
            column_with_default("content_type", Text, ""),
            column_with_default("string_attributes", Text, "{}"),
            column_with_default("numeric_attributes", Text, "{}"),
        ]);
        tables.push(TableSpec {
            name: "payloads",
            columns: payload_columns,
            primary_key: payload_key,
        });
        tables
    }

    /// Secondary indexes of the configured profile.
    pub fn secondary_indexes(&self) -> Vec<IndexSpec> {
        match self.config.index_profile {
            IndexProfile::Full => self.full_indexes(),
            IndexProfile::Minimal => self
                .full_indexes()
                .into_iter()
                .filter(|index| index.name.ends_with("_delete_index"))
                .collect(),
        }
    }

    fn full_indexes(&self) -> Vec<IndexSpec> {
        let mut indexes = Vec::new();
        if !self.config.temporal {
            for (table, _) in ATTRIBUTE_TABLES {
                indexes.push(IndexSpec::new(table, "kv_idx", &[("key", ASC), ("value", ASC)]));
            }
            indexes.push(IndexSpec::new("payloads", "block_idx", &[("block", ASC)]));
            return indexes;
        }
        for (table, _) in ATTRIBUTE_TABLES {
            indexes.push(IndexSpec::new(
                table,
                "entity_key_value_index",
                &[("from_block", ASC), ("to_block", ASC), ("key", ASC), ("value", ASC)],
            ));
            indexes.push(IndexSpec::new(
                table,
                "kv_temporal_idx",
                &[("key", ASC), ("value", ASC), ("from_block", DESC), ("to_block", DESC)],
            ));
            indexes.push(IndexSpec::new(
                table,
                "entity_key_index",
                &[("from_block", ASC), ("to_block", ASC), ("key", ASC)],
            ));
            indexes.push(IndexSpec::new(table, "delete_index", &[("to_block", ASC)]));
        }
        // The numeric primary key already serves latest-version lookups.
        indexes.push(IndexSpec::new(
            "string_attributes",
            "entity_kv_idx",
            &[("entity_key", ASC), ("key", ASC), ("from_block", DESC)],
        ));
        indexes.push(IndexSpec::new(
            "payloads",
            "entity_key_index",
            &[("entity_key", ASC), ("from_block", ASC), ("to_block", ASC)],
        ));
        indexes.push(IndexSpec::new("payloads", "delete_index", &[("to_block", ASC)]));
        indexes
    }

    pub fn create_table_statements(&self) -> Vec<String> {
        let mut statements: Vec<String> = self
            .tables()
            .iter()
            .map(|table| table_statement(table).to_string(SqliteQueryBuilder))
            .collect();
        statements.push(last_block_statement().to_string(SqliteQueryBuilder));
        statements
    }

    pub fn create_index_statements(&self) -> Vec<String> {
        self.secondary_indexes()
            .iter()
            .map(|index| index.statement().to_string(SqliteQueryBuilder))
            .collect()
    }

    /// Drops every secondary index the layout can carry, whatever the profile.
    pub fn drop_index_statements(&self) -> Vec<String> {
        self.full_indexes()
            .iter()
            .map(|index| format!("DROP INDEX IF EXISTS \"{}\"", index.name))
            .collect()
    }

    pub fn apply(&self, conn: &Connection) -> EvaResult<()> {
        for statement in self
            .create_table_statements()
            .into_iter()
            .chain(self.create_index_statements())
        {
            conn.execute_batch(&statement)?;
        }
        info!("schema {} ready", self.variant_name());
        Ok(())
    }

    pub fn manifest(&self) -> SchemaManifest {
        let indexes = self.secondary_indexes();
        let mut tables: Vec<TableManifest> = self
            .tables()
            .into_iter()
            .map(|table| {
                let mut table_indexes = vec![IndexManifest {
                    name: format!("pk_{}", table.name),
                    columns: table.primary_key.iter().map(|c| c.to_string()).collect(),
                    primary: true,
                }];
                table_indexes.extend(
                    indexes
                        .iter()
                        .filter(|index| index.table == table.name)
                        .map(|index| IndexManifest {
                            name: index.name.clone(),
                            columns: index
                                .columns
                                .iter()
                                .map(|(column, order)| match order {
                                    IndexOrder::Desc => format!("{column} DESC"),
                                    _ => column.to_string(),
                                })
                                .collect(),
                            primary: false,
                        }),
                );
                TableManifest {
                    name: table.name.to_string(),
                    columns: table
                        .columns
                        .iter()
                        .map(|column| ColumnManifest {
                            name: column.name.to_string(),
                            logical_type: column.logical_type.as_str().to_string(),
                            nullable: false,
                        })
                        .collect(),
                    indexes: table_indexes,
                }
            })
            .collect();
        tables.push(TableManifest {
            name: "last_block".to_string(),
            columns: vec![
                ColumnManifest {
                    name: "id".to_string(),
                    logical_type: LogicalType::Integer.as_str().to_string(),
                    nullable: false,
                },
                ColumnManifest {
                    name: "block".to_string(),
                    logical_type: LogicalType::Integer.as_str().to_string(),
                    nullable: false,
                },
            ],
            indexes: vec![IndexManifest {
                name: "pk_last_block".to_string(),
                columns: vec!["id".to_string()],
                primary: true,
            }],
        });
        SchemaManifest {
            variant: self.variant_name(),
            tables,
        }
    }
}

fn table_statement(spec: &TableSpec) -> TableCreateStatement {
    let mut table = Table::create();
    table.table(Alias::new(spec.name)).if_not_exists();
    for column in &spec.columns {
        let mut def = ColumnDef::new(Alias::new(column.name));
        match column.logical_type {
            LogicalType::Blob => def.blob(),
            LogicalType::Integer => def.big_integer(),
            LogicalType::Text => def.text(),
        };
        def.not_null();
        if let Some(default) = column.default {
            def.default(default);
        }
        table.col(&mut def);
    }
    let mut primary = Index::create();
    primary.name(format!("pk_{}", spec.name));
    for column in &spec.primary_key {
        primary.col(Alias::new(*column));
    }
    table.primary_key(&mut primary);
    table
}

fn last_block_statement() -> TableCreateStatement {
    Table::create()
        .table(Alias::new("last_block"))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("id"))
                .big_integer()
                .not_null()
                .default(1)
                .check(Expr::col(Alias::new("id")).eq(1)),
        )
        .col(ColumnDef::new(Alias::new("block")).big_integer().not_null())
        .primary_key(Index::create().name("pk_last_block").col(Alias::new("id")))
        .to_owned()
}
