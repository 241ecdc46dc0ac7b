// Example: enrich a small set of OSM footprints with heights
// Footprints are given in WGS84 and projected to Web Mercator on load
use anyhow::Result;
use osmheight::enrich::enrich_collection;
use osmheight::geometric::building::BuildingCollection;
use osmheight::geometric::height::ResolverConfig;

fn main() -> Result<()> {
    println!("=== Example: Enriching buildings from GeoJSON ===\n");

    let geojson_data = r#"
    {
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },
        "features": [
            {
                "type": "Feature",
                "properties": { "building": "office", "height": "120 m", "name": "Tower A" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [-96.7980, 32.7760],
                        [-96.7975, 32.7760],
                        [-96.7975, 32.7765],
                        [-96.7980, 32.7765],
                        [-96.7980, 32.7760]
                    ]]
                }
            },
            {
                "type": "Feature",
                "properties": { "building": "apartments", "building:levels": "6" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [-96.7970, 32.7760],
                        [-96.7968, 32.7760],
                        [-96.7968, 32.7762],
                        [-96.7970, 32.7762],
                        [-96.7970, 32.7760]
                    ]]
                }
            },
            {
                "type": "Feature",
                "properties": { "building": "yes" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [-96.7960, 32.7760],
                        [-96.7959, 32.7760],
                        [-96.7959, 32.7761],
                        [-96.7960, 32.7761],
                        [-96.7960, 32.7760]
                    ]]
                }
            }
        ]
    }
    "#;

    let collection = BuildingCollection::from_geojson(geojson_data.as_bytes(), None)?;
    println!("Buildings loaded: {}", collection.len());

    let enriched = enrich_collection(collection, &ResolverConfig::default())?;

    println!("\nResolved heights:");
    for (idx, building) in enriched.collection.buildings().iter().enumerate() {
        println!(
            "  Building {}: area = {:.1} m², height = {:.1} m ({})",
            idx + 1,
            building.area_m2,
            building.height_m.unwrap_or(f64::NAN),
            building
                .height_src
                .map(|s| s.as_str())
                .unwrap_or("unresolved"),
        );
    }
    println!("Tall-tail overrides: {:?}", enriched.resolution.tall_tail);

    let report = &enriched.report;
    println!(
        "\n% osm height = {:.1}, % levels = {:.1}, % random = {:.1}",
        report.pct_osm_height, report.pct_levels, report.pct_random
    );

    let df = enriched.collection.to_polars_df()?;
    println!("\nDataFrame preview:");
    println!("{}", df);

    Ok(())
}
