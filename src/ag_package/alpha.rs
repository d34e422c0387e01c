use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;
use log::{debug, info};

use crate::artifact::{self, ArtifactStore};
use crate::config::PackageConfig;
use crate::metadata::MetadataTable;

/// Collated alpha-diversity values: one column per (metric, rarefaction
/// iteration), rows keyed by sample ID. Columns joined on sample ID with
/// outer-join alignment; samples appear in first-seen order, new samples
/// from each column in sorted order.
#[derive(Debug, Clone, Default)]
pub struct AlphaFrame {
    columns: Vec<String>,
    order: Vec<String>,
    values: HashMap<String, HashMap<String, f64>>,
}

impl AlphaFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_column(&mut self, name: &str, column: HashMap<String, f64>) {
        self.columns.push(name.to_string());
        for sample in column.keys().sorted() {
            if !self.values.contains_key(sample) {
                self.order.push(sample.clone());
            }
        }
        for (sample, value) in column {
            self.values
                .entry(sample)
                .or_insert_with(HashMap::new)
                .insert(name.to_string(), value);
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.order
    }

    pub fn value(&self, sample: &str, column: &str) -> Option<f64> {
        self.values.get(sample).and_then(|row| row.get(column)).copied()
    }

    /// Row-wise arithmetic mean over the named columns; samples missing a
    /// column are averaged over the values they do have, and samples with
    /// none are left out.
    pub fn column_mean(&self, columns: &[String]) -> HashMap<String, f64> {
        let mut means = HashMap::new();
        for sample in self.order.iter() {
            let present: Vec<f64> = columns
                .iter()
                .filter_map(|col| self.value(sample, col))
                .collect();
            if !present.is_empty() {
                let mean = present.iter().sum::<f64>() / present.len() as f64;
                means.insert(sample.clone(), mean);
            }
        }
        means
    }

    /// Keeps only the given samples, preserving row order.
    pub fn retain(&mut self, keep: &HashSet<String>) {
        self.order.retain(|sample| keep.contains(sample));
        self.values.retain(|sample, _| keep.contains(sample));
    }

    pub fn to_file<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let file = fs::File::create(filename.as_ref())
            .with_context(|| format!("creating collated alpha file {:?}", filename.as_ref()))?;
        self.write(file)
    }

    pub fn write<W: Write>(&self, output: W) -> Result<()> {
        let mut out = std::io::BufWriter::new(output);

        write!(out, "#SampleID")?;
        for column in self.columns.iter() {
            write!(out, "\t{}", column)?;
        }
        write!(out, "\n")?;

        for sample in self.order.iter() {
            write!(out, "{}", sample)?;
            for column in self.columns.iter() {
                match self.value(sample, column) {
                    Some(value) => write!(out, "\t{}", value)?,
                    None => write!(out, "\t")?,
                }
            }
            write!(out, "\n")?;
        }
        out.flush()?;

        Ok(())
    }
}

/// Reads one exported alpha-diversity vector: a header line then one
/// `sample<TAB>value` row per sample.
pub fn read_alpha_export<R: Read>(input: R) -> Result<HashMap<String, f64>> {
    let mut lines = BufReader::new(input).lines();
    let header = lines
        .next()
        .ok_or_else(|| anyhow!("empty alpha diversity export"))??;
    if header.split('\t').count() < 2 {
        bail!("malformed alpha diversity header {:?}", header);
    }

    let mut values = HashMap::new();
    for (line_no, line_res) in lines.enumerate() {
        let line = line_res?;
        if line.is_empty() {
            continue;
        }
        let mut field_iter = line.split('\t');
        let sample = field_iter
            .next()
            .ok_or_else(|| anyhow!("missing sample id line {}", line_no))?;
        let value = field_iter
            .next()
            .ok_or_else(|| anyhow!("missing value line {} sample {}", line_no, sample))?
            .parse::<f64>()
            .with_context(|| format!("malformed value line {} sample {}", line_no, sample))?;
        if field_iter.next().is_some() {
            bail!("extra fields line {} sample {}", line_no, sample);
        }
        values.insert(sample.to_string(), value);
    }
    Ok(values)
}

pub fn load_alpha_export<P: AsRef<Path>>(filename: P) -> Result<HashMap<String, f64>> {
    let path = filename.as_ref();
    let file = fs::File::open(path)
        .with_context(|| format!("opening alpha diversity export {:?}", path))?;
    read_alpha_export(file)
        .with_context(|| format!("reading alpha diversity export {:?}", path))
}

/// Merges per-iteration alpha diversity into the sample metadata for one
/// depth. Takes the base metadata by value and returns the merged, filtered
/// table together with the collated per-iteration frame; nothing is carried
/// across depths.
pub fn merge_alpha<S: ArtifactStore>(
    config: &PackageConfig,
    depth: u32,
    mut map: MetadataTable,
    store: &S,
) -> Result<(MetadataTable, AlphaFrame)> {
    let mut frame = AlphaFrame::new();
    let workdir = tempfile::tempdir().context("creating alpha export directory")?;

    let metrics = config.metrics();
    info!(
        "merging alpha diversity at depth {}: {}",
        depth,
        metrics.iter().join(", ")
    );

    for metric in metrics.iter() {
        let mut iteration_columns = Vec::new();
        for iteration in 0..config.iterations() {
            let artifact = config.alpha_artifact(depth, metric, iteration);
            let dest = workdir.path().join(format!("{}_{}", metric, iteration));
            fs::create_dir_all(&dest).with_context(|| format!("creating {:?}", dest))?;
            let files = store.export_data(&artifact, &dest)?;
            let export = artifact::single_data_file(files, &artifact)?;
            let column = load_alpha_export(&export)?;

            let column_name = format!("{}_{}", metric, iteration);
            debug!("collated {} samples into {}", column.len(), column_name);
            frame.insert_column(&column_name, column);
            iteration_columns.push(column_name);
        }

        let means = frame.column_mean(&iteration_columns);
        map.add_column(&format!("{}_{}", metric, depth), &means);
    }

    let mean_columns: Vec<String> = metrics
        .iter()
        .map(|metric| format!("{}_{}", metric, depth))
        .collect();
    map.retain_complete(&mean_columns)?;

    let keep: HashSet<String> = map.sample_ids().iter().map(|id| id.to_string()).collect();
    frame.retain(&keep);

    Ok((map, frame))
}

/// Stage entry point for running the alpha merge on its own: writes the
/// merged metadata, collated matrix, and sample-ID list for one depth.
pub struct CLI {
    pub config_file: String,
    pub depth: u32,
}

impl CLI {
    pub fn run(&self) -> Result<()> {
        let config = PackageConfig::from_file(&self.config_file)?;
        fs::create_dir_all(config.depth_dir(self.depth))?;
        let base_map = MetadataTable::from_file(config.map_path())?;
        let (map, collated) = merge_alpha(
            &config,
            self.depth,
            base_map,
            &crate::artifact::QzaStore,
        )?;
        crate::package::write_alpha_outputs(&config, self.depth, &map, &collated)
    }
}
