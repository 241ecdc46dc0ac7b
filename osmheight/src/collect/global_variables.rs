pub const DATA_PATH: &str = "./data/processed";

/// Raw OSM building footprints for the 4 km CBD box
pub const RAW_BUILDINGS_GEOJSON: &str =
    "./data/processed/dallas_cbd_4000m_osm_buildings_raw.geojson";

pub const HEIGHT_BUILDINGS_GEOJSON: &str =
    "./data/processed/dallas_cbd_4000m_osm_buildings_height.geojson";
pub const HEIGHT_BUILDINGS_GEOJSONSEQ: &str =
    "./data/processed/dallas_cbd_4000m_osm_buildings_height.geojsonl";
pub const HEIGHT_QUALITY_CSV: &str =
    "./data/processed/dallas_cbd_4000m_osm_buildings_height_quality.csv";
pub const HEIGHT_HISTOGRAM_PNG: &str =
    "./data/processed/dallas_cbd_4000m_osm_buildings_height_hist.png";
