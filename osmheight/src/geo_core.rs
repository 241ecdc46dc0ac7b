use anyhow::Result;
use geo::{Coord, MapCoords, MultiPolygon, Point, Rect};
#[cfg(feature = "proj")]
use proj::Proj;

#[cfg(not(feature = "proj"))]
use crate::error::OsmHeightError;

/// Geographic WGS84 (lon/lat degrees)
pub const EPSG_WGS84: i32 = 4326;
/// Spherical Web Mercator, the planar CRS every area is measured in
pub const EPSG_WEB_MERCATOR: i32 = 3857;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// CRS bookkeeping for a building collection
/// Handles the working EPSG code and an optional bounding box
#[derive(Debug, Clone)]
pub struct GeoCore {
    /// Working EPSG code
    pub epsg: i32,
    /// Bounding box of the area of interest, in `epsg` units
    pub bbox: Option<BoundingBox>,
}

impl GeoCore {
    pub fn new(epsg: i32) -> Self {
        GeoCore {
            epsg,
            bbox: None,
        }
    }

    pub fn get_epsg(&self) -> i32 {
        self.epsg
    }

    pub fn get_bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub fn set_bbox(&mut self, bbox: Option<BoundingBox>) {
        self.bbox = bbox;
    }

    /// Transform coordinates from one CRS to another
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
        CrsTransform::new(from_epsg, to_epsg)?.convert(x, y)
    }

    /// Transform a Point from one CRS to another
    pub fn transform_point(from_epsg: i32, to_epsg: i32, point: Point<f64>) -> Result<Point<f64>> {
        let (x, y) = Self::transform_coords(from_epsg, to_epsg, point.x(), point.y())?;
        Ok(Point::new(x, y))
    }
}

impl Default for GeoCore {
    fn default() -> Self {
        GeoCore::new(EPSG_WEB_MERCATOR)
    }
}

/// Parse a CRS name as found in the legacy GeoJSON `crs` member.
///
/// Accepts `EPSG:3857`, `urn:ogc:def:crs:EPSG::3857`,
/// `urn:ogc:def:crs:EPSG:6.6:3857` and the OGC CRS84 urn (mapped to 4326).
pub fn parse_crs_name(name: &str) -> Option<i32> {
    let name = name.trim();
    let upper = name.to_ascii_uppercase();
    if upper.ends_with("CRS84") {
        return Some(EPSG_WGS84);
    }
    if !upper.contains("EPSG") {
        return None;
    }
    upper
        .rsplit(':')
        .next()
        .and_then(|code| code.trim().parse::<i32>().ok())
}

/// A coordinate transform between two EPSG codes.
///
/// WGS84 <-> Web Mercator is closed form; anything else needs the `proj` feature.
pub enum CrsTransform {
    Identity,
    WgsToMercator,
    MercatorToWgs,
    #[cfg(feature = "proj")]
    Proj(Proj),
}

impl CrsTransform {
    pub fn new(from_epsg: i32, to_epsg: i32) -> Result<Self> {
        match (from_epsg, to_epsg) {
            (a, b) if a == b => Ok(CrsTransform::Identity),
            (EPSG_WGS84, EPSG_WEB_MERCATOR) => Ok(CrsTransform::WgsToMercator),
            (EPSG_WEB_MERCATOR, EPSG_WGS84) => Ok(CrsTransform::MercatorToWgs),
            _ => Self::with_proj(from_epsg, to_epsg),
        }
    }

    #[cfg(feature = "proj")]
    fn with_proj(from_epsg: i32, to_epsg: i32) -> Result<Self> {
        use anyhow::Context;

        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);
        let proj = Proj::new_known_crs(&from_crs, &to_crs, None)
            .context("Failed to create Proj transformation")?;
        Ok(CrsTransform::Proj(proj))
    }

    #[cfg(not(feature = "proj"))]
    fn with_proj(from_epsg: i32, to_epsg: i32) -> Result<Self> {
        Err(OsmHeightError::UnsupportedTransform(from_epsg, to_epsg).into())
    }

    pub fn convert(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match self {
            CrsTransform::Identity => Ok((x, y)),
            CrsTransform::WgsToMercator => {
                let mx = EARTH_RADIUS_M * x.to_radians();
                let my = EARTH_RADIUS_M
                    * (std::f64::consts::FRAC_PI_4 + y.to_radians() / 2.0)
                        .tan()
                        .ln();
                Ok((mx, my))
            }
            CrsTransform::MercatorToWgs => {
                let lon = (x / EARTH_RADIUS_M).to_degrees();
                let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                Ok((lon, lat))
            }
            #[cfg(feature = "proj")]
            CrsTransform::Proj(proj) => {
                use anyhow::Context;
                proj.convert((x, y))
                    .context("Failed to transform coordinates")
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, CrsTransform::Identity)
    }

    /// Reproject every vertex of a footprint
    pub fn apply(&self, footprint: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self.is_identity() {
            return Ok(footprint.clone());
        }
        footprint.try_map_coords(|c: Coord<f64>| {
            let (x, y) = self.convert(c.x, c.y)?;
            Ok(Coord { x, y })
        })
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Axis-aligned square of side `size` centred on (`cx`, `cy`)
    pub fn square(cx: f64, cy: f64, size: f64) -> Self {
        let half = size / 2.0;
        BoundingBox::new(cx - half, cy - half, cx + half, cy + half)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.min_x,
                y: self.min_y,
            },
            Coord {
                x: self.max_x,
                y: self.max_y,
            },
        )
    }

    /// Transform bounding box to another CRS
    pub fn transform(&self, from_epsg: i32, to_epsg: i32) -> Result<Self> {
        let (min_x, min_y) = GeoCore::transform_coords(from_epsg, to_epsg, self.min_x, self.min_y)?;
        let (max_x, max_y) = GeoCore::transform_coords(from_epsg, to_epsg, self.max_x, self.max_y)?;

        Ok(BoundingBox::new(min_x, min_y, max_x, max_y))
    }
}
