use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaManifest {
    pub variant: String,
    pub tables: Vec<TableManifest>,
}

impl SchemaManifest {
    pub fn table(&self, name: &str) -> Option<&TableManifest> {
        self.tables.iter().find(|table| table.name == name)
    }

    /// Counts every index in the manifest, primary keys included, the
    /// `last_block` key among them.
    pub fn index_count(&self) -> usize {
        self.tables.iter().map(|table| table.indexes.len()).sum()
    }

    pub fn secondary_index_count(&self) -> usize {
        self.tables
            .iter()
            .flat_map(|table| table.indexes.iter())
            .filter(|index| !index.primary)
            .count()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableManifest {
    pub name: String,
    pub columns: Vec<ColumnManifest>,
    pub indexes: Vec<IndexManifest>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnManifest {
    pub name: String,
    pub logical_type: String,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub name: String,
    pub columns: Vec<String>,
    pub primary: bool,
}
