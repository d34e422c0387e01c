use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use zip::ZipArchive;

/// Narrow collaborator over the upstream pipeline's artifact container
/// format: the only contract stage code relies on is "export the artifact's
/// data files into a directory".
pub trait ArtifactStore {
    fn export_data(&self, artifact: &Path, dest: &Path) -> Result<Vec<PathBuf>>;
}

/// Reads `.qza` containers directly: a zip archive whose payload lives
/// under `<uuid>/data/`. Provenance and metadata entries are skipped.
pub struct QzaStore;

impl ArtifactStore for QzaStore {
    fn export_data(&self, artifact: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        let file = fs::File::open(artifact)
            .with_context(|| format!("opening artifact {:?}", artifact))?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .with_context(|| format!("reading artifact {:?}", artifact))?;

        let mut exported = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut parts = name.split('/');
            let _uuid = parts.next();
            if parts.next() != Some("data") {
                continue;
            }
            let leaf = match name.rsplit('/').next() {
                Some(leaf) if !leaf.is_empty() => leaf.to_string(),
                _ => continue,
            };
            let out_path = dest.join(&leaf);
            let mut out = fs::File::create(&out_path)
                .with_context(|| format!("creating {:?}", out_path))?;
            std::io::copy(&mut entry, &mut out)
                .with_context(|| format!("extracting {} from {:?}", name, artifact))?;
            exported.push(out_path);
        }

        if exported.is_empty() {
            bail!("no data files in artifact {:?}", artifact);
        }
        Ok(exported)
    }
}

/// Store over artifacts that an earlier pipeline run already exported as
/// plain directories of data files.
pub struct DirStore;

impl ArtifactStore for DirStore {
    fn export_data(&self, artifact: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        let mut exported = Vec::new();
        let entries = fs::read_dir(artifact)
            .with_context(|| format!("listing exported artifact {:?}", artifact))?;
        for entry_res in entries {
            let entry = entry_res?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let out_path = dest.join(entry.file_name());
            fs::copy(entry.path(), &out_path)
                .with_context(|| format!("copying {:?} to {:?}", entry.path(), out_path))?;
            exported.push(out_path);
        }

        if exported.is_empty() {
            bail!("no data files in artifact {:?}", artifact);
        }
        Ok(exported)
    }
}

/// An export that must yield exactly one data file, e.g. an alpha-diversity
/// vector or a distance matrix.
pub fn single_data_file(mut files: Vec<PathBuf>, artifact: &Path) -> Result<PathBuf> {
    if files.len() != 1 {
        bail!(
            "expected one data file in artifact {:?}, found {}",
            artifact,
            files.len()
        );
    }
    Ok(files.remove(0))
}
