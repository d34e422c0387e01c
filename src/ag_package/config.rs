use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml;

/// Unrarefied deblur table filename, shared between the raw input tree and
/// the per-depth output directories.
pub const RAW_TABLE_NAME: &str = "deblur_125nt_no_blooms.biom";
/// Taxonomy-annotated rarefied table filename in each depth directory.
pub const RAREFIED_TABLE_NAME: &str = "deblur_125nt_no_blooms_rare.biom";
pub const MAP_WITH_ALPHA_NAME: &str = "ag_map_with_alpha.txt";
pub const COLLATED_ALPHA_NAME: &str = "collated_alpha.txt";
pub const SAMPLE_ID_NAME: &str = "sample_id.txt";

/// Run description for one package build, read from a TOML file. Every
/// input and output path is derived here so stage code never carries
/// path literals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageConfig {
    pub(crate) base_dir: Option<String>,
    pub(crate) raw_dir: Option<String>,
    pub(crate) out_dir: Option<String>,
    pub(crate) map_file: Option<String>,
    pub(crate) depths: Option<Vec<u32>>,
    pub(crate) metrics: Option<Vec<String>>,
    pub(crate) beta_metrics: Option<Vec<String>>,
    pub(crate) picrust_tables: Option<Vec<String>>,
    pub(crate) iterations: Option<u32>,
}

impl PackageConfig {
    const DEFAULT_BASE_DIR: &'static str = "02.build_package";
    const DEFAULT_RAW_DIR: &'static str = "02.raw_tables";
    const DEFAULT_OUT_DIR: &'static str = "03.packaged";
    const DEFAULT_MAP_FILE: &'static str = "ag_map.txt";
    const DEFAULT_DEPTHS: &'static [u32] = &[1250, 10000];
    const DEFAULT_METRICS: &'static [&'static str] =
        &["PD_whole_tree", "chao1", "shannon", "observed_otus"];
    const DEFAULT_BETA_METRICS: &'static [&'static str] =
        &["unweighted_unifrac", "weighted_unifrac", "braycurtis"];
    const DEFAULT_PICRUST_TABLES: &'static [&'static str] =
        &["ko_l1.biom", "ko_l2.biom", "ko_l3.biom", "ko_predictions.biom"];
    const DEFAULT_ITERATIONS: u32 = 10;

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = fs::File::open(path.as_ref())
            .with_context(|| format!("opening config file {:?}", path.as_ref()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("reading config file {:?}", path.as_ref()))?;
        let config: PackageConfig = toml::from_str(&contents).context("PackageConfig")?;
        Ok(config)
    }

    pub fn depths(&self) -> Vec<u32> {
        self.depths
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_DEPTHS.to_vec())
    }

    pub fn metrics(&self) -> Vec<String> {
        self.metrics
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_METRICS.iter().map(|s| s.to_string()).collect())
    }

    pub fn beta_metrics(&self) -> Vec<String> {
        self.beta_metrics.clone().unwrap_or_else(|| {
            Self::DEFAULT_BETA_METRICS
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }

    pub fn picrust_tables(&self) -> Vec<String> {
        self.picrust_tables.clone().unwrap_or_else(|| {
            Self::DEFAULT_PICRUST_TABLES
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations.unwrap_or(Self::DEFAULT_ITERATIONS)
    }

    fn base_dir(&self) -> PathBuf {
        PathBuf::from(self.base_dir.as_deref().unwrap_or(Self::DEFAULT_BASE_DIR))
    }

    fn raw_dir(&self) -> PathBuf {
        PathBuf::from(self.raw_dir.as_deref().unwrap_or(Self::DEFAULT_RAW_DIR))
    }

    fn out_dir(&self) -> PathBuf {
        PathBuf::from(self.out_dir.as_deref().unwrap_or(Self::DEFAULT_OUT_DIR))
    }

    /// Base sample metadata table, one row per collected sample.
    pub fn map_path(&self) -> PathBuf {
        self.base_dir()
            .join(self.map_file.as_deref().unwrap_or(Self::DEFAULT_MAP_FILE))
    }

    /// Rarefied feature-table artifact for one depth.
    pub fn rarefied_artifact(&self, depth: u32) -> PathBuf {
        self.base_dir()
            .join(depth.to_string())
            .join(format!("ag_{}_rare.qza", depth))
    }

    /// Alpha-diversity artifact for one (depth, metric, rarefaction iteration).
    pub fn alpha_artifact(&self, depth: u32, metric: &str, iteration: u32) -> PathBuf {
        self.base_dir()
            .join(depth.to_string())
            .join("alpha")
            .join(format!("{}_{}.qza", metric, iteration))
    }

    /// Beta-diversity distance-matrix artifact for one (depth, metric).
    pub fn beta_artifact(&self, depth: u32, metric: &str) -> PathBuf {
        self.base_dir()
            .join(depth.to_string())
            .join("beta")
            .join(format!("{}.qza", metric))
    }

    /// Unrarefied deblur table in the raw-table tree.
    pub fn raw_table_path(&self) -> PathBuf {
        self.raw_dir().join(RAW_TABLE_NAME)
    }

    /// Precomputed PICRUSt prediction table in the raw-table tree.
    pub fn picrust_table_path(&self, name: &str) -> PathBuf {
        self.raw_dir().join("picrust").join(name)
    }

    pub fn depth_dir(&self, depth: u32) -> PathBuf {
        self.out_dir().join(depth.to_string())
    }

    pub fn picrust_dir(&self, depth: u32) -> PathBuf {
        self.depth_dir(depth).join("picrust")
    }

    pub fn distance_dir(&self, depth: u32) -> PathBuf {
        self.depth_dir(depth).join("distance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: PackageConfig = toml::from_str("").unwrap();
        assert_eq!(config.depths(), vec![1250, 10000]);
        assert_eq!(config.iterations(), 10);
        assert_eq!(config.metrics().len(), 4);
        assert_eq!(config.beta_metrics().len(), 3);
        assert_eq!(config.picrust_tables().len(), 4);
        assert_eq!(
            config.map_path(),
            PathBuf::from("02.build_package/ag_map.txt")
        );
        assert_eq!(
            config.raw_table_path(),
            PathBuf::from("02.raw_tables/deblur_125nt_no_blooms.biom")
        );
    }

    #[test]
    fn parsed_values_override_defaults() {
        let config: PackageConfig = toml::from_str(
            r#"
            base_dir = "in"
            out_dir = "out"
            depths = [100]
            metrics = ["shannon"]
            iterations = 3
        "#,
        )
        .unwrap();
        assert_eq!(config.depths(), vec![100]);
        assert_eq!(config.metrics(), vec!["shannon".to_string()]);
        assert_eq!(config.iterations(), 3);
        assert_eq!(
            config.alpha_artifact(100, "shannon", 2),
            PathBuf::from("in/100/alpha/shannon_2.qza")
        );
        assert_eq!(
            config.beta_artifact(100, "braycurtis"),
            PathBuf::from("in/100/beta/braycurtis.qza")
        );
        assert_eq!(config.distance_dir(100), PathBuf::from("out/100/distance"));
    }
}
