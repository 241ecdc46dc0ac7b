//! End-to-end height enrichment: load footprints, resolve heights, report
//! and write every output.

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

use crate::collect::global_variables::{
    HEIGHT_BUILDINGS_GEOJSON, HEIGHT_BUILDINGS_GEOJSONSEQ, HEIGHT_HISTOGRAM_PNG,
    HEIGHT_QUALITY_CSV, RAW_BUILDINGS_GEOJSON,
};
use crate::geometric::building::BuildingCollection;
use crate::geometric::height::{Resolution, ResolverConfig};
use crate::report::{self, QualityReport};

pub const HISTOGRAM_TITLE: &str = "Dallas CBD 4km OSM Buildings: height_m distribution";

/// Input/output locations and resolver settings of one run
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub input: PathBuf,
    /// Source EPSG code, overriding the input's `crs` member
    pub set_crs: Option<i32>,
    pub output_geojson: PathBuf,
    pub output_geojsonseq: PathBuf,
    pub report_csv: PathBuf,
    /// None skips the plot
    pub histogram_png: Option<PathBuf>,
    pub resolver: ResolverConfig,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        EnrichOptions {
            input: PathBuf::from(RAW_BUILDINGS_GEOJSON),
            set_crs: None,
            output_geojson: PathBuf::from(HEIGHT_BUILDINGS_GEOJSON),
            output_geojsonseq: PathBuf::from(HEIGHT_BUILDINGS_GEOJSONSEQ),
            report_csv: PathBuf::from(HEIGHT_QUALITY_CSV),
            histogram_png: Some(PathBuf::from(HEIGHT_HISTOGRAM_PNG)),
            resolver: ResolverConfig::default(),
        }
    }
}

pub struct Enriched {
    pub collection: BuildingCollection,
    pub resolution: Resolution,
    pub report: QualityReport,
}

/// Resolve heights and build the quality report, without touching the disk
pub fn enrich_collection(
    mut collection: BuildingCollection,
    config: &ResolverConfig,
) -> Result<Enriched> {
    let resolution = collection.process_heights(config)?;
    let report = QualityReport::from_buildings(collection.buildings());
    Ok(Enriched {
        collection,
        resolution,
        report,
    })
}

/// Full run: read, enrich, then write GeoJSON, GeoJSONSeq, CSV and PNG
pub fn run(options: &EnrichOptions) -> Result<Enriched> {
    let collection = BuildingCollection::from_path(&options.input, options.set_crs)?;
    let enriched = enrich_collection(collection, &options.resolver)?;
    enriched.report.log();

    ensure_parent(&options.report_csv)?;
    enriched.report.to_csv(&options.report_csv)?;

    if let Some(png) = &options.histogram_png {
        ensure_parent(png)?;
        report::write_height_histogram(enriched.collection.buildings(), png, HISTOGRAM_TITLE)?;
    }

    ensure_parent(&options.output_geojson)?;
    enriched.collection.to_geojson(&options.output_geojson)?;

    ensure_parent(&options.output_geojsonseq)?;
    enriched.collection.to_geojsonseq(&options.output_geojsonseq)?;

    info!("DONE.");
    Ok(enriched)
}

/// Create the parent directory of an output file
pub fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display())),
        _ => Ok(()),
    }
}
