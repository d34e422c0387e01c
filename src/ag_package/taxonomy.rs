use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::biom::BiomTable;

/// Feature-ID to taxonomy-string lookup, built once from a representative
/// annotated table and applied to every depth's rarefied table.
#[derive(Debug, Clone)]
pub struct TaxonomyMap(HashMap<String, String>);

impl TaxonomyMap {
    pub fn from_table(table: &BiomTable) -> Result<Self> {
        let taxonomy = table
            .taxonomy()
            .ok_or_else(|| anyhow!("table {} has no taxonomy metadata", table.table_id))?;
        let map = table
            .observation_ids()
            .iter()
            .cloned()
            .zip(taxonomy.iter().cloned())
            .collect();
        Ok(TaxonomyMap(map))
    }

    pub fn get(&self, feature_id: &str) -> Option<&str> {
        self.0.get(feature_id).map(|t| t.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Annotates every feature of `table`. A feature absent from the lookup
    /// is an error: the rarefied tables are all derived from the table the
    /// lookup was built from.
    pub fn attach(&self, table: &mut BiomTable) -> Result<()> {
        let taxonomy = table
            .observation_ids()
            .iter()
            .map(|id| {
                self.0
                    .get(id)
                    .cloned()
                    .ok_or_else(|| anyhow!("no taxonomy for feature {}", id))
            })
            .collect::<Result<Vec<_>>>()?;
        table.set_taxonomy(taxonomy)
    }
}
