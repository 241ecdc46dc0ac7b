use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use plotters::prelude::*;
use polars::prelude::{CsvWriter, DataFrame, NamedFrom, SerWriter};
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::geometric::building::Building;
use crate::geometric::height::HeightSource;

pub const HISTOGRAM_BINS: usize = 50;

/// Descriptive statistics of the resolved heights
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeightStats {
    pub min_m: f64,
    pub p10_m: f64,
    pub p25_m: f64,
    pub median_m: f64,
    pub p75_m: f64,
    pub p90_m: f64,
    pub max_m: f64,
    pub mean_m: f64,
}

impl HeightStats {
    /// None for an empty sample
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        Some(HeightStats {
            min_m: sorted[0],
            p10_m: percentile(&sorted, 0.10),
            p25_m: percentile(&sorted, 0.25),
            median_m: percentile(&sorted, 0.50),
            p75_m: percentile(&sorted, 0.75),
            p90_m: percentile(&sorted, 0.90),
            max_m: sorted[sorted.len() - 1],
            mean_m: sorted.iter().sum::<f64>() / sorted.len() as f64,
        })
    }
}

/// Linear interpolation between closest ranks of an ascending sample
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// One-row summary of a resolution pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub n_buildings: usize,
    pub pct_osm_height: f64,
    pub pct_levels: f64,
    pub pct_random: f64,
    pub height: Option<HeightStats>,
}

impl QualityReport {
    pub fn from_buildings(buildings: &[Building]) -> Self {
        let n = buildings.len();
        let pct = |source: HeightSource| {
            if n == 0 {
                return 0.0;
            }
            let count = buildings
                .iter()
                .filter(|b| b.height_src == Some(source))
                .count();
            count as f64 * 100.0 / n as f64
        };
        let heights: Vec<f64> = buildings.iter().filter_map(|b| b.height_m).collect();

        let [pct_osm_height, pct_levels, pct_random] = HeightSource::ALL.map(pct);

        QualityReport {
            n_buildings: n,
            pct_osm_height,
            pct_levels,
            pct_random,
            height: HeightStats::from_values(&heights),
        }
    }

    pub fn log(&self) {
        info!("QUALITY REPORT:");
        info!("  n_buildings: {}", self.n_buildings);
        info!("  pct_osm_height: {:.2}", self.pct_osm_height);
        info!("  pct_levels: {:.2}", self.pct_levels);
        info!("  pct_random: {:.2}", self.pct_random);
        match &self.height {
            Some(s) => info!(
                "  height_m min {:.2} / p10 {:.2} / p25 {:.2} / median {:.2} / p75 {:.2} / p90 {:.2} / max {:.2} / mean {:.2}",
                s.min_m, s.p10_m, s.p25_m, s.median_m, s.p75_m, s.p90_m, s.max_m, s.mean_m
            ),
            None => info!("  height_m: no data"),
        }
    }

    /// The summary as a single-row DataFrame
    pub fn to_polars_df(&self) -> Result<DataFrame> {
        let stat = |f: fn(&HeightStats) -> f64| vec![self.height.as_ref().map(f)];

        let df = polars::df! [
            "n_buildings" => vec![self.n_buildings as u64],
            "pct_osm_height" => vec![self.pct_osm_height],
            "pct_levels" => vec![self.pct_levels],
            "pct_random" => vec![self.pct_random],
            "min_m" => stat(|s: &HeightStats| s.min_m),
            "p10_m" => stat(|s: &HeightStats| s.p10_m),
            "p25_m" => stat(|s: &HeightStats| s.p25_m),
            "median_m" => stat(|s: &HeightStats| s.median_m),
            "p75_m" => stat(|s: &HeightStats| s.p75_m),
            "p90_m" => stat(|s: &HeightStats| s.p90_m),
            "max_m" => stat(|s: &HeightStats| s.max_m),
            "mean_m" => stat(|s: &HeightStats| s.mean_m),
        ]
        .context("Failed to create summary DataFrame")?;

        Ok(df)
    }

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("Writing: {}", path.display());
        let mut df = self.to_polars_df()?;
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)
            .context("Failed to write summary CSV")?;
        Ok(())
    }
}

/// Equal-width frequency histogram
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// `bins + 1` ascending edges
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Bins span [min, max]; the last bin is closed. A zero-width range is
    /// widened by 0.5 on each side. None for an empty sample.
    pub fn from_values(values: &[f64], bins: usize) -> Option<Self> {
        if values.is_empty() || bins == 0 {
            return None;
        }
        let (mut lo, mut hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        let width = (hi - lo) / bins as f64;
        let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();
        let mut counts = vec![0usize; bins];
        for &v in values {
            let idx = (((v - lo) / width) as usize).min(bins - 1);
            counts[idx] += 1;
        }

        Some(Histogram { edges, counts })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Render the histogram as a PNG bar chart
    pub fn draw_png<P: AsRef<Path>>(&self, path: P, title: &str) -> Result<()> {
        let path = path.as_ref();
        info!("Writing: {}", path.display());

        let lo = self.edges[0];
        let hi = self.edges[self.edges.len() - 1];
        let max_count = self.counts.iter().copied().max().unwrap_or(0) as u32;

        let root = BitMapBackend::new(path, (1280, 960)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| anyhow!("{e}"))?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 28))
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(60)
            .build_cartesian_2d(lo..hi, 0u32..max_count + 1)
            .map_err(|e| anyhow!("{e}"))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc("Building height (m)")
            .y_desc("Count")
            .draw()
            .map_err(|e| anyhow!("{e}"))?;

        chart
            .draw_series(self.counts.iter().enumerate().map(|(i, &count)| {
                Rectangle::new(
                    [(self.edges[i], 0u32), (self.edges[i + 1], count as u32)],
                    BLUE.mix(0.7).filled(),
                )
            }))
            .map_err(|e| anyhow!("{e}"))?;

        root.present()
            .map_err(|e| anyhow!("Failed to write histogram {}: {e}", path.display()))?;
        Ok(())
    }
}

/// Histogram of the resolved heights, written to `path`
pub fn write_height_histogram<P: AsRef<Path>>(
    buildings: &[Building],
    path: P,
    title: &str,
) -> Result<()> {
    let heights: Vec<f64> = buildings.iter().filter_map(|b| b.height_m).collect();
    match Histogram::from_values(&heights, HISTOGRAM_BINS) {
        Some(hist) => hist.draw_png(path, title),
        None => {
            warn!("No heights to plot, histogram skipped");
            Ok(())
        }
    }
}
