use std::collections::{BTreeMap, HashSet};
use std::convert::TryFrom;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use hdf5::types::VarLenUnicode;
use ndarray::Array2;

use crate::picrust;

const FORMAT_URL: &str = "http://biom-format.org";
/// Greengenes-style lineages carry seven ranks; shorter lineages are padded
/// with empty ranks on disk.
const TAXONOMY_RANKS: usize = 7;

/// Sparse observation-by-sample count table in the BIOM 2.1 HDF5 layout.
///
/// Counts are held CSR over the observation axis. Observation metadata is
/// limited to what the package pipeline carries: one taxonomy string per
/// feature and list-valued PICRUSt annotation columns.
#[derive(Debug, Clone)]
pub struct BiomTable {
    pub table_id: String,
    observation_ids: Vec<String>,
    sample_ids: Vec<String>,
    data: Vec<f64>,
    indices: Vec<usize>,
    indptr: Vec<usize>,
    taxonomy: Option<Vec<String>>,
    list_metadata: BTreeMap<String, Vec<Vec<String>>>,
}

impl BiomTable {
    pub fn from_dense(
        table_id: &str,
        observation_ids: Vec<String>,
        sample_ids: Vec<String>,
        rows: &[Vec<f64>],
    ) -> Result<Self> {
        if rows.len() != observation_ids.len() {
            bail!(
                "{} rows for {} observations",
                rows.len(),
                observation_ids.len()
            );
        }

        let mut data = Vec::new();
        let mut indices = Vec::new();
        let mut indptr = vec![0];
        for row in rows.iter() {
            if row.len() != sample_ids.len() {
                bail!("{} values for {} samples", row.len(), sample_ids.len());
            }
            for (col, &value) in row.iter().enumerate() {
                if value != 0.0 {
                    data.push(value);
                    indices.push(col);
                }
            }
            indptr.push(data.len());
        }

        Ok(BiomTable {
            table_id: table_id.to_string(),
            observation_ids,
            sample_ids,
            data,
            indices,
            indptr,
            taxonomy: None,
            list_metadata: BTreeMap::new(),
        })
    }

    pub fn n_observations(&self) -> usize {
        self.observation_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn observation_ids(&self) -> &[String] {
        &self.observation_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn get(&self, observation: usize, sample: usize) -> f64 {
        for k in self.indptr[observation]..self.indptr[observation + 1] {
            if self.indices[k] == sample {
                return self.data[k];
            }
        }
        0.0
    }

    pub fn value(&self, observation_id: &str, sample_id: &str) -> Option<f64> {
        let obs = self.observation_ids.iter().position(|id| id == observation_id)?;
        let samp = self.sample_ids.iter().position(|id| id == sample_id)?;
        Some(self.get(obs, samp))
    }

    pub fn taxonomy(&self) -> Option<&[String]> {
        self.taxonomy.as_deref()
    }

    /// One taxonomy string per observation, in observation order.
    pub fn set_taxonomy(&mut self, taxonomy: Vec<String>) -> Result<()> {
        if taxonomy.len() != self.observation_ids.len() {
            bail!(
                "{} taxonomy strings for {} observations",
                taxonomy.len(),
                self.observation_ids.len()
            );
        }
        self.taxonomy = Some(taxonomy);
        Ok(())
    }

    pub fn list_metadata(&self, name: &str) -> Option<&[Vec<String>]> {
        self.list_metadata.get(name).map(|rows| rows.as_slice())
    }

    pub fn list_metadata_columns(&self) -> Vec<&str> {
        self.list_metadata.keys().map(|name| name.as_str()).collect()
    }

    /// One annotation list per observation, in observation order.
    pub fn set_list_metadata(&mut self, name: &str, rows: Vec<Vec<String>>) -> Result<()> {
        if rows.len() != self.observation_ids.len() {
            bail!(
                "{} {} rows for {} observations",
                rows.len(),
                name,
                self.observation_ids.len()
            );
        }
        self.list_metadata.insert(name.to_string(), rows);
        Ok(())
    }

    /// Subsets the sample axis to the given IDs, preserving the table's
    /// sample order. Observations are kept even when every retained count
    /// is zero, as the upstream tables do.
    pub fn filter_samples(&self, keep: &HashSet<String>) -> BiomTable {
        let kept: Vec<usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| keep.contains(*id))
            .map(|(i, _)| i)
            .collect();
        let mut col_map = vec![None; self.sample_ids.len()];
        for (new, &old) in kept.iter().enumerate() {
            col_map[old] = Some(new);
        }

        let mut data = Vec::new();
        let mut indices = Vec::new();
        let mut indptr = vec![0];
        for obs in 0..self.observation_ids.len() {
            for k in self.indptr[obs]..self.indptr[obs + 1] {
                if let Some(new_col) = col_map[self.indices[k]] {
                    data.push(self.data[k]);
                    indices.push(new_col);
                }
            }
            indptr.push(data.len());
        }

        BiomTable {
            table_id: self.table_id.clone(),
            observation_ids: self.observation_ids.clone(),
            sample_ids: kept.iter().map(|&i| self.sample_ids[i].clone()).collect(),
            data,
            indices,
            indptr,
            taxonomy: self.taxonomy.clone(),
            list_metadata: self.list_metadata.clone(),
        }
    }

    fn transposed(&self) -> (Vec<f64>, Vec<usize>, Vec<usize>) {
        let n_samples = self.sample_ids.len();
        let nnz = self.data.len();

        let mut indptr = vec![0; n_samples + 1];
        for &col in self.indices.iter() {
            indptr[col + 1] += 1;
        }
        for col in 0..n_samples {
            indptr[col + 1] += indptr[col];
        }

        let mut next = indptr.clone();
        let mut data = vec![0.0; nnz];
        let mut indices = vec![0; nnz];
        for obs in 0..self.observation_ids.len() {
            for k in self.indptr[obs]..self.indptr[obs + 1] {
                let col = self.indices[k];
                data[next[col]] = self.data[k];
                indices[next[col]] = obs;
                next[col] += 1;
            }
        }

        (data, indices, indptr)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            hdf5::File::open(path).with_context(|| format!("opening biom file {:?}", path))?;

        let table_id = read_str_attr(&file, "id").unwrap_or_default();
        let observation_ids = read_str_dataset(&file, "observation/ids")
            .with_context(|| format!("observation ids in {:?}", path))?;
        let sample_ids = read_str_dataset(&file, "sample/ids")
            .with_context(|| format!("sample ids in {:?}", path))?;

        let data: Vec<f64> = file.dataset("observation/matrix/data")?.read_raw()?;
        let indices: Vec<usize> = file
            .dataset("observation/matrix/indices")?
            .read_raw::<i32>()?
            .into_iter()
            .map(|i| i as usize)
            .collect();
        let indptr: Vec<usize> = file
            .dataset("observation/matrix/indptr")?
            .read_raw::<i32>()?
            .into_iter()
            .map(|i| i as usize)
            .collect();

        if indptr.len() != observation_ids.len() + 1 {
            bail!(
                "indptr length {} for {} observations in {:?}",
                indptr.len(),
                observation_ids.len(),
                path
            );
        }
        if indptr.last() != Some(&data.len()) || indices.len() != data.len() {
            bail!("inconsistent sparse matrix in {:?}", path);
        }
        if indices.iter().any(|&col| col >= sample_ids.len()) {
            bail!("sample index out of range in {:?}", path);
        }

        let mut taxonomy = None;
        let mut list_metadata = BTreeMap::new();
        let obs_group = file.group("observation")?;
        if obs_group.link_exists("metadata") {
            let md = obs_group.group("metadata")?;
            for name in md.member_names()? {
                if name == "taxonomy" {
                    let ranks: Array2<VarLenUnicode> = md.dataset("taxonomy")?.read_2d()?;
                    if ranks.nrows() != observation_ids.len() {
                        bail!("taxonomy length mismatch in {:?}", path);
                    }
                    let mut joined = Vec::with_capacity(ranks.nrows());
                    for row in ranks.rows() {
                        let lineage: Vec<&str> = row
                            .iter()
                            .map(|rank| rank.as_str())
                            .filter(|rank| !rank.is_empty())
                            .collect();
                        joined.push(lineage.join("; "));
                    }
                    taxonomy = Some(joined);
                } else {
                    let raw: Vec<VarLenUnicode> = md.dataset(&name)?.read_raw()?;
                    if raw.len() != observation_ids.len() {
                        bail!("metadata column {} length mismatch in {:?}", name, path);
                    }
                    let rows = raw
                        .iter()
                        .map(|value| picrust::parse_list(value.as_str()))
                        .collect::<Result<Vec<_>>>()
                        .with_context(|| format!("metadata column {} in {:?}", name, path))?;
                    list_metadata.insert(name, rows);
                }
            }
        }

        Ok(BiomTable {
            table_id,
            observation_ids,
            sample_ids,
            data,
            indices,
            indptr,
            taxonomy,
            list_metadata,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file =
            hdf5::File::create(path).with_context(|| format!("creating biom file {:?}", path))?;

        write_str_attr(&file, "id", &self.table_id)?;
        write_str_attr(&file, "type", "OTU table")?;
        write_str_attr(&file, "format-url", FORMAT_URL)?;
        write_str_attr(
            &file,
            "generated-by",
            concat!("ag-package ", env!("CARGO_PKG_VERSION")),
        )?;
        write_str_attr(&file, "creation-date", &Utc::now().to_rfc3339())?;
        file.new_attr::<i32>()
            .shape(2usize)
            .create("format-version")?
            .write_raw(&[2i32, 1])?;
        file.new_attr::<i32>()
            .shape(2usize)
            .create("shape")?
            .write_raw(&[
                index_i32(self.observation_ids.len())?,
                index_i32(self.sample_ids.len())?,
            ])?;
        file.new_attr::<i32>()
            .create("nnz")?
            .write_scalar(&index_i32(self.data.len())?)?;

        let obs = file.create_group("observation")?;
        write_str_dataset(&obs, "ids", &self.observation_ids)?;
        let obs_matrix = obs.create_group("matrix")?;
        obs_matrix
            .new_dataset_builder()
            .with_data(&self.data)
            .create("data")?;
        obs_matrix
            .new_dataset_builder()
            .with_data(&to_i32(&self.indices)?)
            .create("indices")?;
        obs_matrix
            .new_dataset_builder()
            .with_data(&to_i32(&self.indptr)?)
            .create("indptr")?;

        let samp = file.create_group("sample")?;
        write_str_dataset(&samp, "ids", &self.sample_ids)?;
        let (csc_data, csc_indices, csc_indptr) = self.transposed();
        let samp_matrix = samp.create_group("matrix")?;
        samp_matrix
            .new_dataset_builder()
            .with_data(&csc_data)
            .create("data")?;
        samp_matrix
            .new_dataset_builder()
            .with_data(&to_i32(&csc_indices)?)
            .create("indices")?;
        samp_matrix
            .new_dataset_builder()
            .with_data(&to_i32(&csc_indptr)?)
            .create("indptr")?;
        samp.create_group("metadata")?;

        let md = obs.create_group("metadata")?;
        if let Some(taxonomy) = &self.taxonomy {
            md.new_dataset_builder()
                .with_data(&taxonomy_ranks(taxonomy)?)
                .create("taxonomy")?;
        }
        for (name, rows) in self.list_metadata.iter() {
            let mut encoded = Vec::with_capacity(rows.len());
            for row in rows.iter() {
                encoded.push(vlen(&picrust::format_list(row)?)?);
            }
            md.new_dataset_builder()
                .with_data(&encoded)
                .create(name.as_str())?;
        }

        Ok(())
    }
}

fn vlen(s: &str) -> Result<VarLenUnicode> {
    s.parse::<VarLenUnicode>()
        .map_err(|e| anyhow!("string {:?} not storable: {}", s, e))
}

/// Rank-splits each lineage into the fixed-width on-disk array, padding
/// short lineages with empty ranks. A lineage with more ranks than the
/// array holds cannot round-trip and is an error.
fn taxonomy_ranks(taxonomy: &[String]) -> Result<Array2<VarLenUnicode>> {
    let mut ranks = Array2::from_elem((taxonomy.len(), TAXONOMY_RANKS), vlen("")?);
    for (i, lineage) in taxonomy.iter().enumerate() {
        let split: Vec<&str> = lineage.split(';').map(str::trim).collect();
        if split.len() > TAXONOMY_RANKS {
            bail!(
                "lineage {:?} has {} ranks, at most {} supported",
                lineage,
                split.len(),
                TAXONOMY_RANKS
            );
        }
        for (j, rank) in split.iter().enumerate() {
            ranks[[i, j]] = vlen(rank)?;
        }
    }
    Ok(ranks)
}

fn index_i32(value: usize) -> Result<i32> {
    i32::try_from(value).with_context(|| format!("index {} exceeds the biom i32 range", value))
}

fn to_i32(values: &[usize]) -> Result<Vec<i32>> {
    values.iter().map(|&v| index_i32(v)).collect()
}

fn write_str_attr(loc: &hdf5::Group, name: &str, value: &str) -> Result<()> {
    loc.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&vlen(value)?)?;
    Ok(())
}

fn read_str_attr(loc: &hdf5::Group, name: &str) -> Option<String> {
    let attr = loc.attr(name).ok()?;
    let value: VarLenUnicode = attr.read_scalar().ok()?;
    Some(value.as_str().to_string())
}

fn write_str_dataset(group: &hdf5::Group, name: &str, values: &[String]) -> Result<()> {
    let mut encoded = Vec::with_capacity(values.len());
    for value in values.iter() {
        encoded.push(vlen(value)?);
    }
    group
        .new_dataset_builder()
        .with_data(&encoded)
        .create(name)?;
    Ok(())
}

fn read_str_dataset(loc: &hdf5::Group, name: &str) -> Result<Vec<String>> {
    let raw: Vec<VarLenUnicode> = loc.dataset(name)?.read_raw()?;
    Ok(raw.iter().map(|v| v.as_str().to_string()).collect())
}
