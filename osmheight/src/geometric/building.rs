use anyhow::{Context, Result};
use geo::{Area, Centroid, MultiPolygon, Polygon};
use geojson::{Feature as GeoJsonFeature, FeatureCollection, GeoJson, Geometry, JsonObject};
use log::{debug, info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::commons::tag_parser::{coalesce, parse_height_to_m, parse_levels};
use crate::error::OsmHeightError;
use crate::geo_core::{parse_crs_name, CrsTransform, GeoCore, EPSG_WEB_MERCATOR};
use crate::geometric::height::{HeightResolver, HeightSource, Resolution, ResolverConfig};

pub const HEIGHT_TAG: &str = "height";
pub const BUILDING_HEIGHT_TAG: &str = "building:height";
pub const LEVELS_TAG: &str = "building:levels";

pub const HEIGHT_M_COLUMN: &str = "height_m";
pub const HEIGHT_SRC_COLUMN: &str = "height_src";
pub const HEIGHT_LEVELS_M_COLUMN: &str = "height_levels_m";

/// Building structure representing a single footprint with its height attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Building {
    /// Footprint, in the collection's projected CRS
    pub footprint: MultiPolygon<f64>,
    /// Planar footprint area in square meters
    pub area_m2: f64,
    pub centroid: geo::Point<f64>,
    /// Explicit height from tags, meters
    pub height_osm_m: Option<f64>,
    /// Floor count from tags
    pub levels: Option<f64>,
    /// `levels` times the storey height, set by the resolver
    pub height_levels_m: Option<f64>,
    /// Final height, set by the resolver
    pub height_m: Option<f64>,
    pub height_src: Option<HeightSource>,
    /// Original feature properties, written back unchanged
    pub properties: JsonObject,
}

impl Building {
    /// Create a new Building from a footprint
    pub fn new(footprint: MultiPolygon<f64>) -> Self {
        let area_m2 = footprint.unsigned_area();
        let centroid = footprint
            .centroid()
            .unwrap_or_else(|| geo::Point::new(0.0, 0.0));

        Building {
            footprint,
            area_m2,
            centroid,
            height_osm_m: None,
            levels: None,
            height_levels_m: None,
            height_m: None,
            height_src: None,
            properties: JsonObject::new(),
        }
    }

    pub fn from_polygon(footprint: Polygon<f64>) -> Self {
        Self::new(MultiPolygon::new(vec![footprint]))
    }

    /// Create a Building and read its height tags from the feature properties.
    ///
    /// `building:height` takes priority over `height` when both parse.
    pub fn with_tags(footprint: MultiPolygon<f64>, properties: JsonObject) -> Self {
        let mut building = Self::new(footprint);
        building.height_osm_m = coalesce(
            parse_height_to_m(properties.get(BUILDING_HEIGHT_TAG)),
            parse_height_to_m(properties.get(HEIGHT_TAG)),
        );
        building.levels = parse_levels(properties.get(LEVELS_TAG));

        // Feature written by a previous resolution pass
        let source = properties
            .get(HEIGHT_SRC_COLUMN)
            .and_then(|v| serde_json::from_value::<HeightSource>(v.clone()).ok());
        if let Some(source) = source {
            building.height_src = Some(source);
            building.height_m = properties.get(HEIGHT_M_COLUMN).and_then(Value::as_f64);
            building.height_levels_m =
                properties.get(HEIGHT_LEVELS_M_COLUMN).and_then(Value::as_f64);
        }

        building.properties = properties;
        building
    }

    pub fn set_height_osm_m(&mut self, height: f64) {
        self.height_osm_m = Some(height);
    }

    pub fn set_levels(&mut self, levels: f64) {
        self.levels = Some(levels);
    }

    /// Replace the footprint, recomputing area and centroid
    pub fn set_footprint(&mut self, footprint: MultiPolygon<f64>) {
        self.area_m2 = footprint.unsigned_area();
        self.centroid = footprint
            .centroid()
            .unwrap_or_else(|| geo::Point::new(0.0, 0.0));
        self.footprint = footprint;
    }

    /// GeoJSON feature with the original properties plus the height columns
    pub fn to_feature(&self) -> GeoJsonFeature {
        let mut properties = self.properties.clone();
        properties.insert("area_m2".to_string(), json!(self.area_m2));
        // Unresolved buildings keep whatever height columns they came with
        if let Some(source) = self.height_src {
            properties.insert("height_osm_m".to_string(), json!(self.height_osm_m));
            properties.insert("levels".to_string(), json!(self.levels));
            properties.insert(HEIGHT_LEVELS_M_COLUMN.to_string(), json!(self.height_levels_m));
            properties.insert(HEIGHT_M_COLUMN.to_string(), json!(self.height_m));
            properties.insert(HEIGHT_SRC_COLUMN.to_string(), json!(source.as_str()));
        }

        GeoJsonFeature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&self.footprint))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Collection of buildings sharing one projected CRS
#[derive(Debug)]
pub struct BuildingCollection {
    pub buildings: Vec<Building>,
    pub geo_core: GeoCore,
}

impl BuildingCollection {
    /// Create an empty collection in Web Mercator
    pub fn new() -> Self {
        BuildingCollection {
            buildings: Vec::new(),
            geo_core: GeoCore::default(),
        }
    }

    pub fn with_geo_core(geo_core: GeoCore) -> Self {
        BuildingCollection {
            buildings: Vec::new(),
            geo_core,
        }
    }

    pub fn add_building(&mut self, building: Building) {
        self.buildings.push(building);
    }

    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }

    pub fn buildings(&self) -> &Vec<Building> {
        &self.buildings
    }

    /// Load buildings from a GeoJSON file
    pub fn from_path<P: AsRef<Path>>(path: P, set_crs: Option<i32>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading: {}", path.display());
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read GeoJSON file: {}", path.display()))?;
        Self::from_geojson(&data, set_crs)
    }

    /// Load buildings from GeoJSON bytes and project them to Web Mercator.
    ///
    /// The source CRS is `set_crs` when given, else the legacy `crs` member of
    /// the collection. A collection with neither is rejected before any
    /// feature is read.
    pub fn from_geojson(geojson_data: &[u8], set_crs: Option<i32>) -> Result<Self> {
        let geojson_str =
            std::str::from_utf8(geojson_data).context("GeoJSON data is not valid UTF-8")?;
        let geojson: GeoJson = geojson_str.parse().context("Failed to parse GeoJSON")?;

        let fc = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(OsmHeightError::NotAFeatureCollection.into()),
        };

        let source_epsg = match set_crs {
            Some(epsg) => epsg,
            None => crs_of(&fc)?,
        };
        let transform = CrsTransform::new(source_epsg, EPSG_WEB_MERCATOR)?;
        debug!("Projecting from EPSG:{} to EPSG:{}", source_epsg, EPSG_WEB_MERCATOR);

        let mut collection = Self::new();
        let mut skipped = 0usize;

        for feature in fc.features {
            match Self::geojson_feature_to_building(feature, &transform) {
                Ok(Some(building)) => collection.add_building(building),
                Ok(None) => skipped += 1,
                Err(e) => {
                    warn!("Failed to process feature: {:#}", e);
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!("Skipped {} non-polygon or invalid features", skipped);
        }
        info!("Buildings loaded: {}", collection.len());

        Ok(collection)
    }

    /// Convert GeoJSON feature to Building.
    /// Returns None for features without a polygonal geometry.
    fn geojson_feature_to_building(
        feature: GeoJsonFeature,
        transform: &CrsTransform,
    ) -> Result<Option<Building>> {
        let Some(geometry) = feature.geometry.as_ref() else {
            return Ok(None);
        };

        let footprint = match geojson_geometry_to_multipolygon(geometry)? {
            Some(mp) => transform.apply(&mp)?,
            None => return Ok(None),
        };

        let properties = feature.properties.unwrap_or_default();
        Ok(Some(Building::with_tags(footprint, properties)))
    }

    /// Resolve `height_m` and `height_src` for every building in one seeded pass
    pub fn process_heights(&mut self, config: &ResolverConfig) -> Result<Resolution> {
        let mut resolver = HeightResolver::new(config.clone())?;
        Ok(resolver.resolve(&mut self.buildings))
    }

    /// Resolved heights, in collection order
    pub fn heights(&self) -> Vec<f64> {
        self.buildings.iter().filter_map(|b| b.height_m).collect()
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let mut foreign_members = JsonObject::new();
        foreign_members.insert("crs".to_string(), crs_member(self.geo_core.get_epsg()));

        FeatureCollection {
            bbox: None,
            features: self.buildings.iter().map(Building::to_feature).collect(),
            foreign_members: Some(foreign_members),
        }
    }

    /// Write a GeoJSON FeatureCollection
    pub fn to_geojson<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("Writing: {}", path.display());
        let file = File::create(path)
            .with_context(|| format!("Failed to create GeoJSON file: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &self.to_feature_collection())
            .context("Failed to serialize GeoJSON")?;
        writer.flush()?;
        Ok(())
    }

    /// Write newline-delimited GeoJSON (one feature per line)
    pub fn to_geojsonseq<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("Writing: {}", path.display());
        let file = File::create(path)
            .with_context(|| format!("Failed to create GeoJSONSeq file: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for building in &self.buildings {
            serde_json::to_writer(&mut writer, &building.to_feature())
                .context("Failed to serialize feature")?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Attribute table of the collection (no geometry)
    pub fn to_polars_df(&self) -> Result<DataFrame> {
        let area: Vec<f64> = self.buildings.iter().map(|b| b.area_m2).collect();
        let centroid_x: Vec<f64> = self.buildings.iter().map(|b| b.centroid.x()).collect();
        let centroid_y: Vec<f64> = self.buildings.iter().map(|b| b.centroid.y()).collect();
        let height_osm: Vec<Option<f64>> = self.buildings.iter().map(|b| b.height_osm_m).collect();
        let levels: Vec<Option<f64>> = self.buildings.iter().map(|b| b.levels).collect();
        let height_levels: Vec<Option<f64>> =
            self.buildings.iter().map(|b| b.height_levels_m).collect();
        let height: Vec<Option<f64>> = self.buildings.iter().map(|b| b.height_m).collect();
        let source: Vec<Option<&str>> = self
            .buildings
            .iter()
            .map(|b| b.height_src.map(|s| s.as_str()))
            .collect();

        let df = df! [
            "area_m2" => area,
            "centroid_x" => centroid_x,
            "centroid_y" => centroid_y,
            "height_osm_m" => height_osm,
            "levels" => levels,
            "height_levels_m" => height_levels,
            "height_m" => height,
            "height_src" => source,
        ]
        .context("Failed to create DataFrame")?;

        Ok(df)
    }
}

impl Default for BuildingCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// Source CRS declared by a FeatureCollection's `crs` member
pub(crate) fn crs_of(fc: &FeatureCollection) -> Result<i32> {
    let name = fc
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(Value::as_str)
        .ok_or(OsmHeightError::MissingCrs)?;

    parse_crs_name(name).ok_or_else(|| OsmHeightError::UnsupportedCrs(name.to_string()).into())
}

pub(crate) fn crs_member(epsg: i32) -> Value {
    json!({
        "type": "name",
        "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", epsg) }
    })
}

/// Convert GeoJSON geometry to a MultiPolygon.
/// Returns None when the geometry is not polygonal.
pub(crate) fn geojson_geometry_to_multipolygon(
    geometry: &Geometry,
) -> Result<Option<MultiPolygon<f64>>> {
    let geo_geom: geo::Geometry<f64> = geometry
        .try_into()
        .context("Failed to convert GeoJSON geometry to geo::Geometry")?;

    match geo_geom {
        geo::Geometry::Polygon(poly) => Ok(Some(MultiPolygon::new(vec![poly]))),
        geo::Geometry::MultiPolygon(mp) if !mp.0.is_empty() => Ok(Some(mp)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use geo::polygon;

    fn unit_square() -> Polygon<f64> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]
    }

    const BUILDINGS_3857: &str = r#"
    {
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::3857" } },
        "features": [
            {
                "type": "Feature",
                "properties": { "height": "10.5 m", "name": "A" },
                "geometry": { "type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]] }
            },
            {
                "type": "Feature",
                "properties": { "height": "35ft", "building:height": "40" },
                "geometry": { "type": "Polygon", "coordinates": [[[20,0],[30,0],[30,10],[20,10],[20,0]]] }
            },
            {
                "type": "Feature",
                "properties": { "building:levels": "4" },
                "geometry": { "type": "MultiPolygon", "coordinates": [
                    [[[40,0],[50,0],[50,10],[40,10],[40,0]]],
                    [[[60,0],[65,0],[65,10],[60,10],[60,0]]]
                ] }
            },
            {
                "type": "Feature",
                "properties": { "amenity": "bench" },
                "geometry": { "type": "Point", "coordinates": [5, 5] }
            },
            {
                "type": "Feature",
                "properties": {},
                "geometry": { "type": "Polygon", "coordinates": [[[0,20],[12,20],[12,32],[0,32],[0,20]]] }
            }
        ]
    }
    "#;

    #[test]
    fn test_building_new() {
        let building = Building::from_polygon(unit_square());
        assert!(building.height_m.is_none());
        assert_approx_eq!(building.area_m2, 1.0);
        assert_approx_eq!(building.centroid.x(), 0.5);
    }

    #[test]
    fn test_with_tags_prefers_building_height() {
        let props = json!({ "height": "12", "building:height": "15 m", "building:levels": "3" });
        let props = props.as_object().unwrap().clone();
        let building = Building::with_tags(MultiPolygon::new(vec![unit_square()]), props);
        assert_eq!(building.height_osm_m, Some(15.0));
        assert_eq!(building.levels, Some(3.0));
    }

    #[test]
    fn test_with_tags_falls_back_to_height() {
        let props = json!({ "height": "12", "building:height": "unknown" });
        let props = props.as_object().unwrap().clone();
        let building = Building::with_tags(MultiPolygon::new(vec![unit_square()]), props);
        assert_eq!(building.height_osm_m, Some(12.0));
        assert_eq!(building.levels, None);
    }

    #[test]
    fn test_from_geojson() {
        let collection = BuildingCollection::from_geojson(BUILDINGS_3857.as_bytes(), None).unwrap();
        // the point feature is skipped
        assert_eq!(collection.len(), 4);

        let b = &collection.buildings()[0];
        assert_eq!(b.height_osm_m, Some(10.5));
        assert_approx_eq!(b.area_m2, 100.0);
        assert_eq!(b.properties.get("name"), Some(&json!("A")));

        assert_eq!(collection.buildings()[1].height_osm_m, Some(40.0));

        let multi = &collection.buildings()[2];
        assert_eq!(multi.footprint.0.len(), 2);
        assert_approx_eq!(multi.area_m2, 150.0);
        assert_eq!(multi.levels, Some(4.0));
    }

    #[test]
    fn test_from_geojson_missing_crs() {
        let data = r#"{ "type": "FeatureCollection", "features": [] }"#;
        let err = BuildingCollection::from_geojson(data.as_bytes(), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OsmHeightError>(),
            Some(OsmHeightError::MissingCrs)
        ));

        // an explicit CRS overrides the missing member
        let collection = BuildingCollection::from_geojson(data.as_bytes(), Some(3857)).unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn test_from_geojson_rejects_single_feature() {
        let data = r#"{ "type": "Feature", "properties": {}, "geometry": null }"#;
        let err = BuildingCollection::from_geojson(data.as_bytes(), Some(3857)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OsmHeightError>(),
            Some(OsmHeightError::NotAFeatureCollection)
        ));
    }

    #[test]
    fn test_from_geojson_projects_wgs84() {
        let data = r#"
        {
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": { "type": "Polygon", "coordinates": [[
                    [-96.7975, 32.7765], [-96.7965, 32.7765], [-96.7965, 32.7770],
                    [-96.7975, 32.7770], [-96.7975, 32.7765]
                ]] }
            }]
        }"#;
        let collection = BuildingCollection::from_geojson(data.as_bytes(), None).unwrap();
        let b = &collection.buildings()[0];
        // projected coordinates, so the area is in square meters
        assert!(b.centroid.x() < -10_000_000.0);
        assert!(b.area_m2 > 1_000.0 && b.area_m2 < 10_000.0);
    }

    #[test]
    fn test_process_heights() {
        let mut collection =
            BuildingCollection::from_geojson(BUILDINGS_3857.as_bytes(), None).unwrap();
        let resolution = collection.process_heights(&ResolverConfig::default()).unwrap();

        let b = collection.buildings();
        assert_eq!(b[0].height_src, Some(HeightSource::OsmHeight));
        assert_eq!(b[0].height_m, Some(10.5));
        assert_eq!(b[1].height_src, Some(HeightSource::OsmHeight));
        assert_eq!(b[1].height_m, Some(40.0));
        assert_eq!(b[2].height_src, Some(HeightSource::Levels));
        assert_approx_eq!(b[2].height_m.unwrap(), 12.8);
        assert_eq!(b[3].height_src, Some(HeightSource::Random));
        assert_eq!(resolution.random, vec![3]);
        assert_eq!(collection.heights().len(), 4);
    }

    #[test]
    fn test_to_feature() {
        let mut building = Building::from_polygon(unit_square());
        building.properties.insert("name".to_string(), json!("x"));
        building.height_m = Some(12.0);
        building.height_src = Some(HeightSource::Levels);

        let feature = building.to_feature();
        let props = feature.properties.unwrap();
        assert_eq!(props["name"], json!("x"));
        assert_eq!(props["height_m"], json!(12.0));
        assert_eq!(props["height_src"], json!("levels"));
        assert_eq!(props["height_osm_m"], Value::Null);
        assert!(feature.geometry.is_some());
    }

    #[test]
    fn test_to_feature_unresolved_keeps_properties() {
        let props = json!({ "height": "12", "height_m": 99.0, "height_src": "bogus" });
        let props = props.as_object().unwrap().clone();
        let building = Building::with_tags(MultiPolygon::new(vec![unit_square()]), props);
        // an unknown source is not read back
        assert!(building.height_src.is_none());

        let out = building.to_feature().properties.unwrap();
        assert_eq!(out["height_m"], json!(99.0));
        assert_eq!(out["height_src"], json!("bogus"));
        assert!(!out.contains_key("levels"));
        assert_approx_eq!(out["area_m2"].as_f64().unwrap(), 1.0);
    }

    #[test]
    fn test_with_tags_reads_resolved_columns() {
        let props = json!({
            "building:levels": "5",
            "height_levels_m": 16.0,
            "height_m": 16.0,
            "height_src": "levels"
        });
        let props = props.as_object().unwrap().clone();
        let building = Building::with_tags(MultiPolygon::new(vec![unit_square()]), props);
        assert_eq!(building.height_src, Some(HeightSource::Levels));
        assert_eq!(building.height_m, Some(16.0));
        assert_eq!(building.height_levels_m, Some(16.0));
        assert_eq!(building.levels, Some(5.0));
    }

    #[test]
    fn test_write_geojson_and_seq() {
        let mut collection =
            BuildingCollection::from_geojson(BUILDINGS_3857.as_bytes(), None).unwrap();
        collection.process_heights(&ResolverConfig::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let geojson_path = dir.path().join("out.geojson");
        let seq_path = dir.path().join("out.geojsonl");
        collection.to_geojson(&geojson_path).unwrap();
        collection.to_geojsonseq(&seq_path).unwrap();

        // written collection reads back with its CRS member
        let data = std::fs::read(&geojson_path).unwrap();
        let reread = BuildingCollection::from_geojson(&data, None).unwrap();
        assert_eq!(reread.len(), 4);
        assert_eq!(
            reread.buildings()[0].properties.get("height_src"),
            Some(&json!("osm_height"))
        );

        let seq = std::fs::read_to_string(&seq_path).unwrap();
        assert_eq!(seq.lines().count(), 4);
        for line in seq.lines() {
            let feature: GeoJsonFeature = line.parse().unwrap();
            assert!(feature.property("height_m").is_some());
        }
    }

    #[test]
    fn test_to_polars_df() {
        let mut collection = BuildingCollection::new();
        let mut building = Building::from_polygon(unit_square());
        building.set_levels(2.0);
        collection.add_building(building);
        collection.process_heights(&ResolverConfig::default()).unwrap();

        let df = collection.to_polars_df().unwrap();
        assert_eq!(df.height(), 1);
        assert_eq!(df.width(), 8);
        assert!(df.column("height_m").is_ok());
        assert!(df.column("height_src").is_ok());
    }
}
