use anyhow::{anyhow, Error as AnyError};
use clap::{ArgAction, Args, Parser};
use geo::geometry::Coord;
use osmheight::collect::global_variables::{
    DATA_PATH, HEIGHT_BUILDINGS_GEOJSON, HEIGHT_BUILDINGS_GEOJSONSEQ, HEIGHT_HISTOGRAM_PNG,
    HEIGHT_QUALITY_CSV, RAW_BUILDINGS_GEOJSON,
};
use osmheight::geo_core::BoundingBox;
use std::{path::PathBuf, str::FromStr};

/// Clip, enrich and report on building footprints for a downtown study area.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub enum Cli {
    /// Resolve a height for every footprint and write the enriched
    /// collection, a quality summary and a histogram.
    Enrich(Enrich),

    /// Keep footprints inside a box or an administrative boundary.
    Clip(Clip),

    /// Cut square study areas of several sizes around a centre point.
    StudyAreas(StudyAreas),
}

#[derive(Debug, Clone, Args)]
pub struct Enrich {
    /// Input GeoJSON footprints.
    #[arg(short, long, default_value = RAW_BUILDINGS_GEOJSON)]
    pub input: PathBuf,

    /// EPSG code of the input, when it carries no `crs` member.
    #[arg(long)]
    pub crs: Option<i32>,

    /// Enriched GeoJSON output.
    #[arg(short, long, default_value = HEIGHT_BUILDINGS_GEOJSON)]
    pub out: PathBuf,

    /// Enriched newline-delimited GeoJSON output.
    #[arg(long, default_value = HEIGHT_BUILDINGS_GEOJSONSEQ)]
    pub out_seq: PathBuf,

    /// Quality summary CSV.
    #[arg(long, default_value = HEIGHT_QUALITY_CSV)]
    pub report: PathBuf,

    /// Histogram PNG.
    #[arg(long, default_value = HEIGHT_HISTOGRAM_PNG)]
    pub histogram: PathBuf,

    /// Do not render the histogram.
    #[arg(long)]
    pub no_histogram: bool,

    /// JSON file with resolver settings.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Random seed, overrides the config file.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Storey height in meters, overrides the config file.
    #[arg(long)]
    pub level_height: Option<f64>,
}

#[derive(Debug, Clone, Args)]
pub struct Clip {
    /// Input GeoJSON footprints.
    pub input: PathBuf,

    /// Output GeoJSON.
    #[arg(short, long)]
    pub out: PathBuf,

    /// EPSG code of the input, when it carries no `crs` member.
    #[arg(long)]
    pub crs: Option<i32>,

    /// "min_x,min_y,max_x,max_y" in EPSG:3857. Defaults to the downtown box.
    #[arg(long, conflicts_with = "boundary")]
    pub bbox: Option<Bbox>,

    /// EPSG code of `--bbox`.
    #[arg(long, default_value_t = 3857)]
    pub bbox_crs: i32,

    /// Boundary GeoJSON to cut footprints with.
    #[arg(long)]
    pub boundary: Option<PathBuf>,

    /// EPSG code of the boundary, when it carries no `crs` member.
    #[arg(long)]
    pub boundary_crs: Option<i32>,

    /// Keep only boundary features with this "KEY=VALUE" property.
    /// Repeat to require several properties.
    #[arg(long, requires = "boundary", action = ArgAction::Append)]
    pub filter: Vec<PropertyFilter>,
}

#[derive(Debug, Clone, Args)]
pub struct StudyAreas {
    /// Input GeoJSON footprints.
    pub input: PathBuf,

    /// Output directory.
    #[arg(short, long, default_value = DATA_PATH)]
    pub out_dir: PathBuf,

    /// EPSG code of the input, when it carries no `crs` member.
    #[arg(long)]
    pub crs: Option<i32>,

    /// Centre "lat,lon". Defaults to the Dallas CBD.
    #[arg(long)]
    pub center: Option<LatLon>,

    /// Square sides in meters.
    #[arg(long, value_delimiter = ',', default_values_t = [2000.0, 4000.0, 6000.0])]
    pub sizes: Vec<f64>,

    /// Output file name prefix.
    #[arg(long, default_value = "dallas_cbd")]
    pub prefix: String,
}

#[derive(Clone, Debug)]
pub struct LatLon(pub Coord<f64>);

impl FromStr for LatLon {
    type Err = AnyError;
    fn from_str(s: &str) -> Result<Self, AnyError> {
        let (lat_str, lon_str) = s
            .split_once(',')
            .ok_or(anyhow!("not a valid lat,lon pair"))?;
        let lat = f64::from_str(lat_str.trim())?;
        let lon = f64::from_str(lon_str.trim())?;
        Ok(Self(Coord { y: lat, x: lon }))
    }
}

#[derive(Clone, Debug)]
pub struct Bbox(pub BoundingBox);

impl FromStr for Bbox {
    type Err = AnyError;
    fn from_str(s: &str) -> Result<Self, AnyError> {
        let parts = s
            .split(',')
            .map(|p| f64::from_str(p.trim()))
            .collect::<Result<Vec<f64>, _>>()?;
        match parts.as_slice() {
            &[min_x, min_y, max_x, max_y] if min_x < max_x && min_y < max_y => {
                Ok(Self(BoundingBox::new(min_x, min_y, max_x, max_y)))
            }
            _ => Err(anyhow!("not a valid min_x,min_y,max_x,max_y box")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PropertyFilter {
    pub key: String,
    pub value: String,
}

impl FromStr for PropertyFilter {
    type Err = AnyError;
    fn from_str(s: &str) -> Result<Self, AnyError> {
        let (key, value) = s
            .split_once('=')
            .ok_or(anyhow!("not a valid KEY=VALUE filter"))?;
        Ok(Self {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lat_lon() {
        let LatLon(c) = "32.7767, -96.7970".parse().unwrap();
        assert_eq!(c.y, 32.7767);
        assert_eq!(c.x, -96.7970);
        assert!("32.7767".parse::<LatLon>().is_err());
    }

    #[test]
    fn test_bbox() {
        let Bbox(b) = "-10718000,3843000,-10714000,3846500".parse().unwrap();
        assert_eq!(b.width(), 4000.0);
        assert!("1,2,3".parse::<Bbox>().is_err());
        assert!("3,0,1,1".parse::<Bbox>().is_err());
    }

    #[test]
    fn test_property_filter() {
        let f: PropertyFilter = "NAME=Dallas".parse().unwrap();
        assert_eq!(f.key, "NAME");
        assert_eq!(f.value, "Dallas");
        assert!("Dallas".parse::<PropertyFilter>().is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["osmheight", "enrich", "--seed", "7"]).unwrap();
        match cli {
            Cli::Enrich(e) => {
                assert_eq!(e.seed, Some(7));
                assert_eq!(e.input, PathBuf::from(RAW_BUILDINGS_GEOJSON));
            }
            _ => panic!("expected enrich"),
        }

        let args = ["osmheight", "study-areas", "in.geojson", "--sizes", "1000,3000"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli {
            Cli::StudyAreas(s) => assert_eq!(s.sizes, vec![1000.0, 3000.0]),
            _ => panic!("expected study-areas"),
        }
    }

    #[test]
    fn test_clip_repeated_filters() {
        let args = [
            "osmheight",
            "clip",
            "in.geojson",
            "--out",
            "out.geojson",
            "--boundary",
            "places.geojson",
            "--filter",
            "NAME=Dallas",
            "--filter",
            "STATEFP=48",
        ];
        match Cli::try_parse_from(args).unwrap() {
            Cli::Clip(c) => {
                let pairs: Vec<(&str, &str)> = c
                    .filter
                    .iter()
                    .map(|f| (f.key.as_str(), f.value.as_str()))
                    .collect();
                assert_eq!(pairs, vec![("NAME", "Dallas"), ("STATEFP", "48")]);
            }
            _ => panic!("expected clip"),
        }

        let no_boundary = ["osmheight", "clip", "in.geojson", "-o", "o.geojson", "--filter", "A=B"];
        assert!(Cli::try_parse_from(no_boundary).is_err());
    }
}
