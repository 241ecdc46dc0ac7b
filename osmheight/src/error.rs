use thiserror::Error;

#[derive(Error, Debug)]
pub enum OsmHeightError {
    #[error("missing CRS in input")]
    MissingCrs,

    #[error("unsupported CRS name {0:?}")]
    UnsupportedCrs(String),

    #[error("no transform available from EPSG:{0} to EPSG:{1}")]
    UnsupportedTransform(i32, i32),

    #[error("GeoJSON must be a FeatureCollection")]
    NotAFeatureCollection,

    #[error("no polygon features in boundary")]
    EmptyBoundary,
}
