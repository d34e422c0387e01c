use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

#[derive(Debug, Clone)]
struct Row {
    id: String,
    fields: Vec<String>,
}

/// Sample metadata table: rows keyed by sample identifier in file order,
/// columns = collected fields plus appended alpha-diversity means. Read and
/// written as tab-separated text with the sample ID in the first column.
#[derive(Debug, Clone)]
pub struct MetadataTable {
    id_column: String,
    columns: Vec<String>,
    rows: Vec<Row>,
    index: HashMap<String, usize>,
}

impl MetadataTable {
    pub fn from_file<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let path = filename.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening metadata file {:?}", path))?;
        Self::read(file).with_context(|| format!("reading metadata file {:?}", path))
    }

    pub fn read<R: Read>(input: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(input);

        let headers = rdr.headers().context("metadata header")?.clone();
        if headers.is_empty() {
            bail!("metadata table has no header");
        }
        let id_column = headers[0].to_string();
        let columns: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();

        let mut rows = Vec::new();
        let mut index = HashMap::new();
        for (recno, rec_res) in rdr.records().enumerate() {
            let rec = rec_res.with_context(|| format!("metadata record {}", recno))?;
            let id = rec
                .get(0)
                .ok_or_else(|| anyhow!("missing sample id record {}", recno))?
                .to_string();
            if index.contains_key(&id) {
                bail!("duplicate sample id {} record {}", id, recno);
            }
            // ragged rows are padded so every row covers every column
            let fields: Vec<String> = (1..headers.len())
                .map(|i| rec.get(i).unwrap_or("").to_string())
                .collect();
            index.insert(id.clone(), rows.len());
            rows.push(Row { id, fields });
        }

        Ok(MetadataTable {
            id_column,
            columns,
            rows,
            index,
        })
    }

    pub fn to_file<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let file = std::fs::File::create(filename.as_ref())
            .with_context(|| format!("creating metadata file {:?}", filename.as_ref()))?;
        self.write(file)
    }

    pub fn write<W: Write>(&self, output: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(output);

        let mut header = vec![self.id_column.as_str()];
        header.extend(self.columns.iter().map(|c| c.as_str()));
        wtr.write_record(&header)?;

        for row in self.rows.iter() {
            let mut record = vec![row.id.as_str()];
            record.extend(row.fields.iter().map(|f| f.as_str()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;

        Ok(())
    }

    /// Appends a numeric column, aligned on sample ID. Samples without a
    /// value get an empty field; values for unknown samples are dropped,
    /// matching an index-aligned join onto this table.
    pub fn add_column(&mut self, name: &str, values: &HashMap<String, f64>) {
        self.columns.push(name.to_string());
        for row in self.rows.iter_mut() {
            let field = values
                .get(&row.id)
                .map(|v| format!("{}", v))
                .unwrap_or_default();
            row.fields.push(field);
        }
    }

    /// Drops every row with an empty value in any of the named columns.
    pub fn retain_complete(&mut self, columns: &[String]) -> Result<()> {
        let mut col_idx = Vec::with_capacity(columns.len());
        for name in columns.iter() {
            let idx = self
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| anyhow!("no metadata column {}", name))?;
            col_idx.push(idx);
        }

        self.rows
            .retain(|row| col_idx.iter().all(|&i| row.fields.get(i).map_or(false, |f| !f.is_empty())));

        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.id.clone(), i))
            .collect();

        Ok(())
    }

    pub fn sample_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|row| row.id.as_str()).collect()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, sample: &str, column: &str) -> Option<&str> {
        let row = self.index.get(sample).and_then(|&i| self.rows.get(i))?;
        let col = self.columns.iter().position(|c| c == column)?;
        row.fields.get(col).map(|f| f.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "#SampleID\tage\tsite\n\
                       S1\t31\tfecal\n\
                       S2\t57\toral\n\
                       S3\t\tskin\n";

    #[test]
    fn read_write_round_trip() {
        let table = MetadataTable::read(MAP.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.sample_ids(), vec!["S1", "S2", "S3"]);
        assert_eq!(table.value("S2", "site"), Some("oral"));
        assert_eq!(table.value("S3", "age"), Some(""));

        let mut out = Vec::new();
        table.write(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), MAP);
    }

    #[test]
    fn add_column_aligns_on_sample_id() {
        let mut table = MetadataTable::read(MAP.as_bytes()).unwrap();

        let mut means = HashMap::new();
        means.insert("S1".to_string(), 4.25);
        means.insert("S3".to_string(), 2.0);
        means.insert("S9".to_string(), 9.0); // not in the table, dropped
        table.add_column("shannon_1250", &means);

        assert_eq!(table.value("S1", "shannon_1250"), Some("4.25"));
        assert_eq!(table.value("S2", "shannon_1250"), Some(""));
        assert_eq!(table.value("S3", "shannon_1250"), Some("2"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn retain_complete_drops_missing() {
        let mut table = MetadataTable::read(MAP.as_bytes()).unwrap();

        let mut means = HashMap::new();
        means.insert("S1".to_string(), 4.25);
        means.insert("S3".to_string(), 2.0);
        table.add_column("shannon_1250", &means);

        table
            .retain_complete(&["shannon_1250".to_string()])
            .unwrap();
        assert_eq!(table.sample_ids(), vec!["S1", "S3"]);
        assert_eq!(table.value("S3", "site"), Some("skin"));

        assert!(table
            .retain_complete(&["no_such_column".to_string()])
            .is_err());
    }
}
