mod options;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;
use options::{Bbox, Clip, Cli, Enrich, LatLon, StudyAreas};
use osmheight::enrich::{self, EnrichOptions};
use osmheight::geo_core::EPSG_WEB_MERCATOR;
use osmheight::geometric::building::BuildingCollection;
use osmheight::geometric::height::ResolverConfig;
use osmheight::geometric::study_area::{self, CBD_LAT, CBD_LON, DOWNTOWN_BBOX};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli {
        Cli::Enrich(enrich) => enrich.run(),
        Cli::Clip(clip) => clip.run(),
        Cli::StudyAreas(study_areas) => study_areas.run(),
    }
}

impl Enrich {
    pub fn run(&self) -> Result<()> {
        let mut resolver = match &self.config {
            Some(path) => ResolverConfig::from_json_path(path)?,
            None => ResolverConfig::default(),
        };
        if let Some(seed) = self.seed {
            resolver.seed = seed;
        }
        if let Some(level_height) = self.level_height {
            resolver.level_height_m = level_height;
        }

        let options = EnrichOptions {
            input: self.input.clone(),
            set_crs: self.crs,
            output_geojson: self.out.clone(),
            output_geojsonseq: self.out_seq.clone(),
            report_csv: self.report.clone(),
            histogram_png: (!self.no_histogram).then(|| self.histogram.clone()),
            resolver,
        };
        enrich::run(&options)?;
        Ok(())
    }
}

impl Clip {
    pub fn run(&self) -> Result<()> {
        let collection = BuildingCollection::from_path(&self.input, self.crs)?;
        let clipped = match &self.boundary {
            Some(path) => {
                let filters: Vec<(&str, &str)> = self
                    .filter
                    .iter()
                    .map(|f| (f.key.as_str(), f.value.as_str()))
                    .collect();
                let boundary = study_area::load_boundary_path(path, self.boundary_crs, &filters)?;
                collection.clip_to_boundary(&boundary)
            }
            None => {
                let bbox = match &self.bbox {
                    Some(Bbox(bbox)) => bbox.transform(self.bbox_crs, EPSG_WEB_MERCATOR)?,
                    None => DOWNTOWN_BBOX,
                };
                collection.clip_to_bbox(&bbox)
            }
        };
        info!("Buildings kept: {} of {}", clipped.len(), collection.len());
        enrich::ensure_parent(&self.out)?;
        clipped.to_geojson(&self.out)
    }
}

impl StudyAreas {
    pub fn run(&self) -> Result<()> {
        let collection = BuildingCollection::from_path(&self.input, self.crs)?;
        let (lon, lat) = match &self.center {
            Some(LatLon(c)) => (c.x, c.y),
            None => (CBD_LON, CBD_LAT),
        };
        std::fs::create_dir_all(&self.out_dir)?;
        for (area, sub) in collection.study_areas(lon, lat, &self.sizes)? {
            let path = self
                .out_dir
                .join(format!("{}.geojson", area.file_stem(&self.prefix)));
            sub.to_geojson(&path)?;
        }
        Ok(())
    }
}
