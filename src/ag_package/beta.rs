use std::fs;

use anyhow::{Context, Result};
use log::debug;

use crate::artifact::{self, ArtifactStore};
use crate::config::PackageConfig;

/// Relocates each beta-diversity distance matrix into the depth's package
/// tree. The artifact is extracted into a temporary directory next to the
/// destination, the single data file is moved into place, and the
/// extraction directory is dropped.
pub fn relocate_distance_matrices<S: ArtifactStore>(
    config: &PackageConfig,
    depth: u32,
    store: &S,
) -> Result<()> {
    let dist_dir = config.distance_dir(depth);
    fs::create_dir_all(&dist_dir).with_context(|| format!("creating {:?}", dist_dir))?;

    for metric in config.beta_metrics() {
        let artifact = config.beta_artifact(depth, &metric);
        let workdir = tempfile::tempdir_in(&dist_dir)
            .with_context(|| format!("creating extraction directory in {:?}", dist_dir))?;

        let files = store.export_data(&artifact, workdir.path())?;
        let matrix = artifact::single_data_file(files, &artifact)?;

        let dest = dist_dir.join(format!("{}.txt", metric));
        fs::rename(&matrix, &dest)
            .with_context(|| format!("moving {:?} to {:?}", matrix, dest))?;
        debug!("relocated {} distance matrix for depth {}", metric, depth);
    }

    Ok(())
}

/// Stage entry point for running beta relocation on its own.
pub struct CLI {
    pub config_file: String,
    pub depth: u32,
}

impl CLI {
    pub fn run(&self) -> Result<()> {
        let config = PackageConfig::from_file(&self.config_file)?;
        relocate_distance_matrices(&config, self.depth, &crate::artifact::QzaStore)
    }
}
