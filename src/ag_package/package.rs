use std::collections::HashSet;
use std::fs;
use std::io::Write;

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::alpha;
use crate::artifact::{self, ArtifactStore, QzaStore};
use crate::beta;
use crate::biom::BiomTable;
use crate::config::{self, PackageConfig};
use crate::metadata::MetadataTable;
use crate::picrust;
use crate::taxonomy::TaxonomyMap;

#[derive(Debug)]
pub struct CLI {
    pub config_file: String,
    pub depth: Option<u32>,
}

impl CLI {
    pub fn run(&self) -> Result<()> {
        let config = PackageConfig::from_file(&self.config_file)?;
        let store = QzaStore;
        match self.depth {
            Some(depth) => {
                setup_depth_directories(&config, depth)?;
                let taxonomy = build_taxonomy_lookup(&config, &store)?;
                let base_map = MetadataTable::from_file(config.map_path())?;
                package_depth(&config, depth, &taxonomy, base_map, &store)
            }
            None => build_package(&config, &store),
        }
    }
}

/// Runs the full pipeline: one package directory per configured depth.
pub fn build_package<S: ArtifactStore>(config: &PackageConfig, store: &S) -> Result<()> {
    setup_directories(config)?;
    let taxonomy = build_taxonomy_lookup(config, store)?;
    let base_map = MetadataTable::from_file(config.map_path())?;

    for depth in config.depths() {
        package_depth(config, depth, &taxonomy, base_map.clone(), store)?;
    }

    Ok(())
}

pub fn setup_directories(config: &PackageConfig) -> Result<()> {
    for depth in config.depths() {
        setup_depth_directories(config, depth)?;
    }
    Ok(())
}

pub fn setup_depth_directories(config: &PackageConfig, depth: u32) -> Result<()> {
    for dir in [
        config.depth_dir(depth),
        config.picrust_dir(depth),
        config.distance_dir(depth),
    ]
    .iter()
    {
        fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
    }
    Ok(())
}

/// Builds the feature-ID to taxonomy lookup from one representative table,
/// the rarefied table at the first configured depth.
pub fn build_taxonomy_lookup<S: ArtifactStore>(
    config: &PackageConfig,
    store: &S,
) -> Result<TaxonomyMap> {
    let depth = config
        .depths()
        .first()
        .copied()
        .ok_or_else(|| anyhow!("no depths configured"))?;
    let table = open_rarefied_table(config, depth, store)?;
    let lookup = TaxonomyMap::from_table(&table)?;
    info!("taxonomy lookup covers {} features", lookup.len());
    Ok(lookup)
}

fn open_rarefied_table<S: ArtifactStore>(
    config: &PackageConfig,
    depth: u32,
    store: &S,
) -> Result<BiomTable> {
    let artifact = config.rarefied_artifact(depth);
    let workdir = tempfile::tempdir().context("creating table export directory")?;
    let files = store.export_data(&artifact, workdir.path())?;
    let table_path = artifact::single_data_file(files, &artifact)?;
    BiomTable::open(&table_path)
}

/// Builds one depth's package directory end to end. The base metadata is
/// taken by value so every depth starts from a fresh copy.
pub fn package_depth<S: ArtifactStore>(
    config: &PackageConfig,
    depth: u32,
    taxonomy: &TaxonomyMap,
    base_map: MetadataTable,
    store: &S,
) -> Result<()> {
    info!("packaging depth {}", depth);
    let depth_dir = config.depth_dir(depth);

    let mut rare = open_rarefied_table(config, depth, store)?;
    taxonomy.attach(&mut rare)?;
    rare.save(depth_dir.join(config::RAREFIED_TABLE_NAME))?;

    let (map, collated) = alpha::merge_alpha(config, depth, base_map, store)?;
    write_alpha_outputs(config, depth, &map, &collated)?;

    let keep: HashSet<String> = map.sample_ids().iter().map(|id| id.to_string()).collect();
    picrust::filter_tables(config, depth, &keep)?;

    beta::relocate_distance_matrices(config, depth, store)?;

    Ok(())
}

/// Writes the merged metadata, the collated per-iteration alpha matrix, and
/// the retained sample-ID list for one depth.
pub fn write_alpha_outputs(
    config: &PackageConfig,
    depth: u32,
    map: &MetadataTable,
    collated: &alpha::AlphaFrame,
) -> Result<()> {
    let depth_dir = config.depth_dir(depth);

    map.to_file(depth_dir.join(config::MAP_WITH_ALPHA_NAME))?;
    collated.to_file(depth_dir.join(config::COLLATED_ALPHA_NAME))?;

    let id_path = depth_dir.join(config::SAMPLE_ID_NAME);
    let mut id_out = fs::File::create(&id_path)
        .with_context(|| format!("creating sample id file {:?}", id_path))?;
    for sample in map.sample_ids() {
        write!(id_out, "{}\n", sample)?;
    }

    info!("depth {} retains {} samples", depth, map.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use crate::artifact::DirStore;

    fn write_tsv(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    fn annotated_table(id: &str) -> BiomTable {
        let mut table = BiomTable::from_dense(
            id,
            vec!["O1".to_string(), "O2".to_string()],
            vec!["S1".to_string(), "S2".to_string(), "S3".to_string()],
            &[vec![4.0, 2.0, 0.0], vec![0.0, 1.0, 6.0]],
        )
        .unwrap();
        table
            .set_taxonomy(vec![
                "k__Bacteria; p__Firmicutes".to_string(),
                "k__Bacteria; p__Proteobacteria".to_string(),
            ])
            .unwrap();
        table
    }

    fn picrust_table(id: &str) -> BiomTable {
        let mut table = BiomTable::from_dense(
            id,
            vec!["K00001".to_string()],
            vec!["S1".to_string(), "S2".to_string(), "S3".to_string()],
            &[vec![9.0, 8.0, 7.0]],
        )
        .unwrap();
        table
            .set_list_metadata(
                "KEGG_Pathways",
                vec![vec!["Metabolism".to_string(), "Enzyme Families".to_string()]],
            )
            .unwrap();
        table
    }

    // Full pipeline against a DirStore input tree: one depth, one alpha
    // metric with two rarefaction iterations, one distance matrix.
    #[test]
    fn end_to_end_package_tree() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("in");
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");

        let config = PackageConfig {
            base_dir: Some(base.to_string_lossy().into_owned()),
            raw_dir: Some(raw.to_string_lossy().into_owned()),
            out_dir: Some(out.to_string_lossy().into_owned()),
            depths: Some(vec![1250]),
            metrics: Some(vec!["shannon".to_string()]),
            beta_metrics: Some(vec!["braycurtis".to_string()]),
            picrust_tables: Some(vec!["ko_l1.biom".to_string()]),
            iterations: Some(2),
            ..Default::default()
        };

        // base metadata: S3 has no alpha values and must be dropped
        fs::create_dir_all(&base).unwrap();
        write_tsv(
            &config.map_path(),
            "#SampleID\tsite\nS1\tfecal\nS2\toral\nS3\tskin\n",
        );

        // rarefied table artifact
        let rare_artifact = config.rarefied_artifact(1250);
        fs::create_dir_all(&rare_artifact).unwrap();
        annotated_table("rare 1250")
            .save(rare_artifact.join("feature-table.biom"))
            .unwrap();

        // alpha artifacts, two iterations
        for (iteration, values) in [("0", ("2.0", "4.0")), ("1", ("3.0", "5.0"))].iter() {
            let artifact = config.alpha_artifact(1250, "shannon", iteration.parse().unwrap());
            fs::create_dir_all(&artifact).unwrap();
            write_tsv(
                &artifact.join("alpha-diversity.tsv"),
                &format!("#SampleID\tshannon\nS1\t{}\nS2\t{}\n", values.0, values.1),
            );
        }

        // beta artifact
        let beta_artifact = config.beta_artifact(1250, "braycurtis");
        fs::create_dir_all(&beta_artifact).unwrap();
        write_tsv(
            &beta_artifact.join("distance-matrix.tsv"),
            "\tS1\tS2\nS1\t0\t0.3\nS2\t0.3\t0\n",
        );

        // raw and picrust tables
        fs::create_dir_all(raw.join("picrust")).unwrap();
        annotated_table("raw deblur")
            .save(config.raw_table_path())
            .unwrap();
        picrust_table("ko_l1")
            .save(config.picrust_table_path("ko_l1.biom"))
            .unwrap();

        build_package(&config, &DirStore).unwrap();

        let depth_dir = config.depth_dir(1250);

        // sample_id.txt matches the collated alpha index exactly
        let ids: Vec<String> = fs::read_to_string(depth_dir.join(config::SAMPLE_ID_NAME))
            .unwrap()
            .lines()
            .map(|l| l.to_string())
            .collect();
        assert_eq!(ids, vec!["S1".to_string(), "S2".to_string()]);
        let collated = fs::read_to_string(depth_dir.join(config::COLLATED_ALPHA_NAME)).unwrap();
        let collated_ids: Vec<&str> = collated
            .lines()
            .skip(1)
            .map(|l| l.split('\t').next().unwrap())
            .collect();
        assert_eq!(collated_ids, ids);

        // merged map holds the mean alpha column and drops S3
        let map =
            MetadataTable::from_file(depth_dir.join(config::MAP_WITH_ALPHA_NAME)).unwrap();
        assert_eq!(map.sample_ids(), vec!["S1", "S2"]);
        assert_eq!(map.value("S1", "shannon_1250"), Some("2.5"));
        assert_eq!(map.value("S2", "shannon_1250"), Some("4.5"));

        // filtered tables carry exactly the retained samples
        let keep: HashSet<String> = ids.iter().cloned().collect();
        let filtered =
            BiomTable::open(depth_dir.join(config::RAW_TABLE_NAME)).unwrap();
        assert!(picrust::samples_match(&filtered, &keep));
        let ko = BiomTable::open(depth_dir.join("picrust").join("ko_l1.biom")).unwrap();
        assert!(picrust::samples_match(&ko, &keep));
        assert_eq!(
            ko.list_metadata("KEGG_Pathways").unwrap()[0],
            vec!["Metabolism".to_string(), "Enzyme Families".to_string()]
        );

        // rarefied table is annotated and intact
        let rare =
            BiomTable::open(depth_dir.join(config::RAREFIED_TABLE_NAME)).unwrap();
        assert_eq!(
            rare.taxonomy().unwrap(),
            &[
                "k__Bacteria; p__Firmicutes".to_string(),
                "k__Bacteria; p__Proteobacteria".to_string(),
            ]
        );
        assert_eq!(rare.value("O2", "S3"), Some(6.0));

        // distance matrix relocated
        let matrix =
            fs::read_to_string(config.distance_dir(1250).join("braycurtis.txt")).unwrap();
        assert!(matrix.starts_with("\tS1\tS2\n"));
    }

    #[test]
    fn single_depth_setup_leaves_other_depths_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = PackageConfig {
            out_dir: Some(dir.path().join("out").to_string_lossy().into_owned()),
            depths: Some(vec![1250, 10000]),
            ..Default::default()
        };

        setup_depth_directories(&config, 1250).unwrap();
        assert!(config.picrust_dir(1250).is_dir());
        assert!(config.distance_dir(1250).is_dir());
        assert!(!config.depth_dir(10000).exists());
    }

    #[test]
    fn alpha_stage_mean_map_collation(){
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("in");
        let config = PackageConfig {
            base_dir: Some(base.to_string_lossy().into_owned()),
            out_dir: Some(dir.path().join("out").to_string_lossy().into_owned()),
            depths: Some(vec![100]),
            metrics: Some(vec!["chao1".to_string()]),
            iterations: Some(2),
            ..Default::default()
        };

        fs::create_dir_all(&base).unwrap();
        write_tsv(&config.map_path(), "#SampleID\tsite\nS1\tfecal\n");
        for iteration in 0..2 {
            let artifact = config.alpha_artifact(100, "chao1", iteration);
            fs::create_dir_all(&artifact).unwrap();
            write_tsv(
                &artifact.join("alpha-diversity.tsv"),
                &format!("#SampleID\tchao1\nS1\t{}\n", 10 * (iteration + 1)),
            );
        }

        let base_map = MetadataTable::from_file(config.map_path()).unwrap();
        let (map, collated) = alpha::merge_alpha(&config, 100, base_map, &DirStore).unwrap();
        assert_eq!(map.value("S1", "chao1_100"), Some("15"));
        assert_eq!(collated.columns(), &["chao1_0".to_string(), "chao1_1".to_string()]);
        assert_eq!(collated.value("S1", "chao1_1"), Some(20.0));

        let expected = (collated.value("S1", "chao1_0").unwrap()
            + collated.value("S1", "chao1_1").unwrap())
            / 2.0;
        assert!((expected - 15.0).abs() < 1e-12);
    }
}
