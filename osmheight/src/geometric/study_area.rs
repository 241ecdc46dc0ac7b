//! Study-area extraction: square boxes around the CBD, the downtown box and
//! clipping to an administrative boundary.

use anyhow::{Context, Result};
use geo::{BooleanOps, Intersects, MultiPolygon};
use geojson::GeoJson;
use log::info;
use serde_json::Value;
use std::path::Path;

use crate::error::OsmHeightError;
use crate::geo_core::{BoundingBox, CrsTransform, GeoCore, EPSG_WEB_MERCATOR, EPSG_WGS84};
use crate::geometric::building::{crs_of, geojson_geometry_to_multipolygon, BuildingCollection};

/// Dallas central business district, WGS84
pub const CBD_LAT: f64 = 32.7767;
pub const CBD_LON: f64 = -96.7970;

/// Square study-area sides, meters
pub const STUDY_AREA_SIZES_M: [f64; 3] = [2000.0, 4000.0, 6000.0];

/// CBD plus surrounding core, EPSG:3857
pub const DOWNTOWN_BBOX: BoundingBox = BoundingBox {
    min_x: -10_718_000.0,
    min_y: 3_843_000.0,
    max_x: -10_714_000.0,
    max_y: 3_846_500.0,
};

/// A square study area in Web Mercator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudyArea {
    pub size_m: f64,
    pub bbox: BoundingBox,
}

impl StudyArea {
    /// Square of side `size_m` centred on a WGS84 point
    pub fn around(center_lon: f64, center_lat: f64, size_m: f64) -> Result<Self> {
        let (cx, cy) =
            GeoCore::transform_coords(EPSG_WGS84, EPSG_WEB_MERCATOR, center_lon, center_lat)?;
        Ok(StudyArea {
            size_m,
            bbox: BoundingBox::square(cx, cy, size_m),
        })
    }

    /// File stem such as `cbd_4000m_box_buildings`
    pub fn file_stem(&self, prefix: &str) -> String {
        format!("{}_{}m_box_buildings", prefix, self.size_m.round() as i64)
    }
}

impl BuildingCollection {
    /// Buildings whose footprint intersects the box; footprints are kept whole
    pub fn clip_to_bbox(&self, bbox: &BoundingBox) -> BuildingCollection {
        let rect = bbox.to_rect();
        let mut clipped = BuildingCollection::with_geo_core(self.geo_core.clone());
        clipped.geo_core.set_bbox(Some(*bbox));
        for building in &self.buildings {
            if building.footprint.intersects(&rect) {
                clipped.add_building(building.clone());
            }
        }
        clipped
    }

    /// Cut footprints to a boundary, dropping those left empty
    pub fn clip_to_boundary(&self, boundary: &MultiPolygon<f64>) -> BuildingCollection {
        let mut clipped = BuildingCollection::with_geo_core(self.geo_core.clone());
        for building in &self.buildings {
            if !building.footprint.intersects(boundary) {
                continue;
            }
            let cut = building.footprint.intersection(boundary);
            if cut.0.is_empty() {
                continue;
            }
            let mut building = building.clone();
            building.set_footprint(cut);
            clipped.add_building(building);
        }
        clipped
    }

    /// One clipped collection per square size around the centre
    pub fn study_areas(
        &self,
        center_lon: f64,
        center_lat: f64,
        sizes_m: &[f64],
    ) -> Result<Vec<(StudyArea, BuildingCollection)>> {
        sizes_m
            .iter()
            .map(|&size| {
                let area = StudyArea::around(center_lon, center_lat, size)?;
                let sub = self.clip_to_bbox(&area.bbox);
                info!("Size {}m: buildings = {}", size, sub.len());
                Ok((area, sub))
            })
            .collect()
    }
}

/// Load a boundary GeoJSON, projected to Web Mercator.
///
/// Only features matching every `(key, value)` filter are kept; an empty
/// filter list keeps all of them. Remaining (multi)polygons are unioned.
pub fn load_boundary(
    geojson_data: &[u8],
    set_crs: Option<i32>,
    filters: &[(&str, &str)],
) -> Result<MultiPolygon<f64>> {
    let geojson_str =
        std::str::from_utf8(geojson_data).context("GeoJSON data is not valid UTF-8")?;
    let geojson: GeoJson = geojson_str.parse().context("Failed to parse boundary GeoJSON")?;
    let fc = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(OsmHeightError::NotAFeatureCollection.into()),
    };

    let source_epsg = match set_crs {
        Some(epsg) => epsg,
        None => crs_of(&fc)?,
    };
    let transform = CrsTransform::new(source_epsg, EPSG_WEB_MERCATOR)?;

    let mut boundary: Option<MultiPolygon<f64>> = None;
    for feature in &fc.features {
        if !filters
            .iter()
            .all(|(key, value)| property_matches(feature.property(key), value))
        {
            continue;
        }
        let Some(geometry) = feature.geometry.as_ref() else {
            continue;
        };
        let Some(mp) = geojson_geometry_to_multipolygon(geometry)? else {
            continue;
        };
        let mp = transform.apply(&mp)?;
        boundary = Some(match boundary {
            Some(acc) => acc.union(&mp),
            None => mp,
        });
    }

    boundary.ok_or_else(|| OsmHeightError::EmptyBoundary.into())
}

pub fn load_boundary_path<P: AsRef<Path>>(
    path: P,
    set_crs: Option<i32>,
    filters: &[(&str, &str)],
) -> Result<MultiPolygon<f64>> {
    let path = path.as_ref();
    info!("Loading boundary: {}", path.display());
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read boundary file: {}", path.display()))?;
    load_boundary(&data, set_crs, filters)
}

// Attribute tables store codes as text or numbers; compare on the text form
fn property_matches(value: Option<&Value>, expected: &str) -> bool {
    match value {
        Some(Value::String(s)) => s == expected,
        Some(Value::Number(n)) => n.to_string() == expected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::building::Building;
    use crate::geometric::height::ResolverConfig;
    use assert_approx_eq::assert_approx_eq;
    use geo::polygon;

    fn square(x0: f64, y0: f64, side: f64) -> Building {
        Building::from_polygon(polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
            (x: x0, y: y0),
        ])
    }

    fn collection() -> BuildingCollection {
        let mut c = BuildingCollection::new();
        c.add_building(square(0.0, 0.0, 10.0));
        c.add_building(square(95.0, 95.0, 10.0));
        c.add_building(square(500.0, 500.0, 10.0));
        c
    }

    #[test]
    fn test_clip_to_bbox_keeps_intersecting() {
        let clipped = collection().clip_to_bbox(&BoundingBox::new(-1.0, -1.0, 100.0, 100.0));
        assert_eq!(clipped.len(), 2);
        // footprints are not cut
        assert_approx_eq!(clipped.buildings()[1].area_m2, 100.0);
        assert!(clipped.geo_core.get_bbox().is_some());
    }

    #[test]
    fn test_clip_to_boundary_cuts() {
        let boundary = MultiPolygon::new(vec![polygon![
            (x: -1.0, y: -1.0),
            (x: 100.0, y: -1.0),
            (x: 100.0, y: 100.0),
            (x: -1.0, y: 100.0),
            (x: -1.0, y: -1.0),
        ]]);
        let clipped = collection().clip_to_boundary(&boundary);
        assert_eq!(clipped.len(), 2);
        assert_approx_eq!(clipped.buildings()[0].area_m2, 100.0, 1e-6);
        // only the 5x5 corner inside the boundary survives
        assert_approx_eq!(clipped.buildings()[1].area_m2, 25.0, 1e-6);
    }

    #[test]
    fn test_study_area_around_cbd() {
        let area = StudyArea::around(CBD_LON, CBD_LAT, 4000.0).unwrap();
        assert_approx_eq!(area.bbox.width(), 4000.0, 1e-6);
        assert_approx_eq!(area.bbox.height(), 4000.0, 1e-6);
        assert_approx_eq!(area.bbox.min_x, -10_777_392.75, 0.01);
        assert_eq!(area.file_stem("dallas_cbd"), "dallas_cbd_4000m_box_buildings");
    }

    #[test]
    fn test_study_areas_nested() {
        let (cx, cy) =
            GeoCore::transform_coords(EPSG_WGS84, EPSG_WEB_MERCATOR, CBD_LON, CBD_LAT).unwrap();
        let mut c = BuildingCollection::new();
        c.add_building(square(cx, cy, 10.0));
        c.add_building(square(cx + 1500.0, cy, 10.0));
        c.add_building(square(cx + 2500.0, cy, 10.0));

        let areas = c.study_areas(CBD_LON, CBD_LAT, &STUDY_AREA_SIZES_M).unwrap();
        let counts: Vec<usize> = areas.iter().map(|(_, sub)| sub.len()).collect();
        assert_eq!(counts, vec![1, 2, 3]);
    }

    #[test]
    fn test_load_boundary_with_filter() {
        let data = r#"
        {
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "EPSG:3857" } },
            "features": [
                {
                    "type": "Feature",
                    "properties": { "NAME": "Dallas", "STATEFP": "48" },
                    "geometry": { "type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]] }
                },
                {
                    "type": "Feature",
                    "properties": { "NAME": "Plano", "STATEFP": "48" },
                    "geometry": { "type": "Polygon", "coordinates": [[[200,0],[300,0],[300,100],[200,100],[200,0]]] }
                },
                {
                    "type": "Feature",
                    "properties": { "NAME": "Dallas", "STATEFP": 13 },
                    "geometry": { "type": "Polygon", "coordinates": [[[400,0],[450,0],[450,100],[400,100],[400,0]]] }
                }
            ]
        }"#;

        // both Dallas features share the name
        let any_dallas = load_boundary(data.as_bytes(), None, &[("NAME", "Dallas")]).unwrap();
        assert_approx_eq!(geo::Area::unsigned_area(&any_dallas), 15_000.0, 1e-6);

        // filters are ANDed; numeric properties compare on their text form
        let dallas_tx =
            load_boundary(data.as_bytes(), None, &[("NAME", "Dallas"), ("STATEFP", "48")])
                .unwrap();
        assert_approx_eq!(geo::Area::unsigned_area(&dallas_tx), 10_000.0, 1e-6);

        let dallas_ga =
            load_boundary(data.as_bytes(), None, &[("NAME", "Dallas"), ("STATEFP", "13")])
                .unwrap();
        assert_approx_eq!(geo::Area::unsigned_area(&dallas_ga), 5_000.0, 1e-6);

        let all = load_boundary(data.as_bytes(), None, &[]).unwrap();
        assert_approx_eq!(geo::Area::unsigned_area(&all), 25_000.0, 1e-6);

        let err = load_boundary(data.as_bytes(), None, &[("NAME", "Dallas"), ("STATEFP", "06")])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OsmHeightError>(),
            Some(OsmHeightError::EmptyBoundary)
        ));
    }

    #[test]
    fn test_clip_keeps_enriched_heights() {
        let data = r#"
        {
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "EPSG:3857" } },
            "features": [{
                "type": "Feature",
                "properties": { "height": "40" },
                "geometry": { "type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]] }
            }]
        }"#;
        let mut enriched = BuildingCollection::from_geojson(data.as_bytes(), None).unwrap();
        enriched.process_heights(&ResolverConfig::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let enriched_path = dir.path().join("enriched.geojson");
        enriched.to_geojson(&enriched_path).unwrap();

        let reloaded = BuildingCollection::from_path(&enriched_path, None).unwrap();
        let clipped = reloaded.clip_to_bbox(&BoundingBox::new(-1.0, -1.0, 100.0, 100.0));
        let clipped_path = dir.path().join("clipped.geojson");
        clipped.to_geojson(&clipped_path).unwrap();

        let written = BuildingCollection::from_path(&clipped_path, None).unwrap();
        let props = &written.buildings()[0].properties;
        assert_eq!(props["height_m"], serde_json::json!(40.0));
        assert_eq!(props["height_src"], serde_json::json!("osm_height"));
        assert_eq!(written.buildings()[0].height_m, Some(40.0));
    }

    #[test]
    fn test_clip_raw_footprints_adds_no_height_columns() {
        let clipped = collection().clip_to_bbox(&BoundingBox::new(-1.0, -1.0, 100.0, 100.0));
        let props = clipped.buildings()[0].to_feature().properties.unwrap();
        assert!(!props.contains_key("height_m"));
        assert!(!props.contains_key("height_src"));
    }

    #[test]
    fn test_downtown_bbox() {
        assert_eq!(DOWNTOWN_BBOX.width(), 4000.0);
        assert_eq!(DOWNTOWN_BBOX.height(), 3500.0);
    }
}
