use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use crate::biom::BiomTable;
use crate::config::{self, PackageConfig};

/// PICRUSt prediction tables annotate each feature with ordered lists of
/// pathway or category names. HDF5 observation metadata is flat vlen-string
/// storage, so each list is carried as one JSON-encoded string per feature.
pub fn format_list(values: &[String]) -> Result<String> {
    serde_json::to_string(values).context("encoding list metadata")
}

/// Inverse of [`format_list`]: decode one stored string back into the
/// original list. Round-trip identity is exact.
pub fn parse_list(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).with_context(|| format!("malformed list metadata {:?}", raw))
}

/// Subsets the unrarefied deblur table and every PICRUSt prediction table
/// to the retained sample IDs for one depth, writing the results into the
/// depth's package directory.
pub fn filter_tables(config: &PackageConfig, depth: u32, keep: &HashSet<String>) -> Result<()> {
    let depth_dir = config.depth_dir(depth);

    let raw = BiomTable::open(config.raw_table_path())?;
    let out_path = depth_dir.join(config::RAW_TABLE_NAME);
    raw.filter_samples(keep)
        .save(&out_path)
        .with_context(|| format!("writing filtered table {:?}", out_path))?;
    debug!("wrote {:?}", out_path);

    let picrust_dir = config.picrust_dir(depth);
    fs::create_dir_all(&picrust_dir)
        .with_context(|| format!("creating {:?}", picrust_dir))?;
    for name in config.picrust_tables() {
        let table = BiomTable::open(config.picrust_table_path(&name))?;
        let out_path = picrust_dir.join(&name);
        table
            .filter_samples(keep)
            .save(&out_path)
            .with_context(|| format!("writing filtered table {:?}", out_path))?;
        debug!("wrote {:?}", out_path);
    }

    Ok(())
}

/// Checks helper for tests and callers: every sample in the table must be
/// in the retained set and vice versa.
pub fn samples_match(table: &BiomTable, keep: &HashSet<String>) -> bool {
    let table_ids: HashSet<&str> = table.sample_ids().iter().map(|id| id.as_str()).collect();
    keep.len() == table_ids.len() && keep.iter().all(|id| table_ids.contains(id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_round_trip_identity() {
        let pathways = vec![
            "Metabolism".to_string(),
            "Xenobiotics Biodegradation and Metabolism".to_string(),
            "Drug metabolism - cytochrome P450".to_string(),
        ];
        let encoded = format_list(&pathways).unwrap();
        assert_eq!(parse_list(&encoded).unwrap(), pathways);

        assert_eq!(parse_list(&format_list(&[]).unwrap()).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn list_values_survive_separators() {
        // embedded quotes, semicolons, and tabs must not break the encoding
        let odd = vec!["a;b".to_string(), "c\"d".to_string(), "e\tf".to_string()];
        let encoded = format_list(&odd).unwrap();
        assert_eq!(parse_list(&encoded).unwrap(), odd);
    }

    #[test]
    fn malformed_list_is_an_error() {
        assert!(parse_list("not json").is_err());
        assert!(parse_list("{\"a\": 1}").is_err());
    }
}
