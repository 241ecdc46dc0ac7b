use anyhow::{ensure, Context, Result};
use log::{debug, info};
use rand::{seq::index, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometric::building::Building;

/// Average floor-to-floor height for a downtown residential/office mix
pub const LEVEL_HEIGHT_M: f64 = 3.2;
pub const DEFAULT_SEED: u64 = 42;
pub const MIN_HEIGHT_M: f64 = 2.5;
pub const MAX_HEIGHT_M: f64 = 350.0;
/// Area assumed for footprints whose area is unknown or not positive
pub const FALLBACK_AREA_M2: f64 = 300.0;

/// Which rule of the cascade produced `height_m`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeightSource {
    OsmHeight,
    Levels,
    Random,
}

impl HeightSource {
    pub const ALL: [HeightSource; 3] = [
        HeightSource::OsmHeight,
        HeightSource::Levels,
        HeightSource::Random,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HeightSource::OsmHeight => "osm_height",
            HeightSource::Levels => "levels",
            HeightSource::Random => "random",
        }
    }
}

impl fmt::Display for HeightSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables of the resolution pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub seed: u64,
    pub level_height_m: f64,
    pub min_height_m: f64,
    pub max_height_m: f64,
    pub fallback_area_m2: f64,
    /// Share of randomly imputed buildings turned into towers
    pub tall_tail_fraction: f64,
    /// Candidate pool size, as a multiple of the tower count
    pub tall_tail_pool_factor: usize,
    pub tall_tail_min_m: f64,
    pub tall_tail_max_m: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            seed: DEFAULT_SEED,
            level_height_m: LEVEL_HEIGHT_M,
            min_height_m: MIN_HEIGHT_M,
            max_height_m: MAX_HEIGHT_M,
            fallback_area_m2: FALLBACK_AREA_M2,
            tall_tail_fraction: 0.005,
            tall_tail_pool_factor: 10,
            tall_tail_min_m: 120.0,
            tall_tail_max_m: 300.0,
        }
    }
}

impl ResolverConfig {
    /// Read settings from a JSON file; missing keys keep their defaults
    pub fn from_json_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ResolverConfig = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.level_height_m.is_finite() && self.level_height_m > 0.0,
            "level height must be positive, got {}",
            self.level_height_m
        );
        ensure!(
            self.min_height_m < self.max_height_m,
            "height clip range is empty: [{}, {}]",
            self.min_height_m,
            self.max_height_m
        );
        ensure!(
            self.tall_tail_fraction > 0.0 && self.tall_tail_fraction <= 1.0,
            "tall tail fraction must be in (0, 1], got {}",
            self.tall_tail_fraction
        );
        ensure!(
            self.tall_tail_min_m < self.tall_tail_max_m,
            "tall tail range is empty: [{}, {})",
            self.tall_tail_min_m,
            self.tall_tail_max_m
        );
        ensure!(self.fallback_area_m2 > 0.0, "fallback area must be positive");
        Ok(())
    }
}

/// Footprint-area classes used for imputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaBucket {
    /// < 200 m²
    Small,
    /// 200..1000 m²
    MidRise,
    /// 1000..5000 m²
    Large,
    /// >= 5000 m²
    Tower,
}

impl AreaBucket {
    pub fn for_area(area_m2: f64) -> Self {
        if area_m2 < 200.0 {
            AreaBucket::Small
        } else if area_m2 < 1000.0 {
            AreaBucket::MidRise
        } else if area_m2 < 5000.0 {
            AreaBucket::Large
        } else {
            AreaBucket::Tower
        }
    }

    /// Inclusive bounds of any height sampled for this bucket
    pub fn range(&self) -> (f64, f64) {
        match self {
            AreaBucket::Small => (3.0, 12.0),
            AreaBucket::MidRise => (6.0, 60.0),
            AreaBucket::Large => (12.0, 180.0),
            AreaBucket::Tower => (15.0, 300.0),
        }
    }
}

/// Piecewise height distribution conditioned on footprint area
pub struct AreaSampler {
    mid_rise: LogNormal<f64>,
    large: LogNormal<f64>,
    tower: LogNormal<f64>,
    fallback_area_m2: f64,
}

impl AreaSampler {
    pub fn new(fallback_area_m2: f64) -> Result<Self> {
        Ok(AreaSampler {
            mid_rise: log_normal(20.0, 0.5)?,
            large: log_normal(45.0, 0.6)?,
            tower: log_normal(80.0, 0.7)?,
            fallback_area_m2,
        })
    }

    /// Area actually used for bucketing
    pub fn effective_area(&self, area_m2: f64) -> f64 {
        if area_m2.is_finite() && area_m2 > 0.0 {
            area_m2
        } else {
            self.fallback_area_m2
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, area_m2: f64, rng: &mut R) -> f64 {
        let bucket = AreaBucket::for_area(self.effective_area(area_m2));
        let (lo, hi) = bucket.range();
        match bucket {
            AreaBucket::Small => rng.gen_range(lo..hi),
            AreaBucket::MidRise => self.mid_rise.sample(rng).clamp(lo, hi),
            AreaBucket::Large => self.large.sample(rng).clamp(lo, hi),
            AreaBucket::Tower => self.tower.sample(rng).clamp(lo, hi),
        }
    }
}

fn log_normal(median: f64, shape: f64) -> Result<LogNormal<f64>> {
    LogNormal::new(median.ln(), shape)
        .with_context(|| format!("invalid log-normal (median {median}, shape {shape})"))
}

/// Number of buildings promoted to towers among `n_random` imputed ones
pub fn tall_tail_count(n_random: usize, fraction: f64) -> usize {
    ((n_random as f64 * fraction).round() as usize).max(1)
}

/// Result of one resolution pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Indices of buildings whose height was imputed
    pub random: Vec<usize>,
    /// Indices of imputed buildings overwritten with a tower height
    pub tall_tail: Vec<usize>,
}

/// Resolves `height_m`/`height_src` for every building.
///
/// Owns its own seeded generator: two resolvers built from the same config
/// produce the same heights for the same input.
pub struct HeightResolver {
    config: ResolverConfig,
    sampler: AreaSampler,
    rng: ChaCha8Rng,
}

impl HeightResolver {
    pub fn new(config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        let sampler = AreaSampler::new(config.fallback_area_m2)?;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(HeightResolver {
            config,
            sampler,
            rng,
        })
    }

    pub fn resolve(&mut self, buildings: &mut [Building]) -> Resolution {
        let mut random = Vec::new();

        for (idx, building) in buildings.iter_mut().enumerate() {
            building.height_levels_m = building.levels.map(|l| l * self.config.level_height_m);

            let (height, source) = if let Some(h) = building.height_osm_m.filter(|h| *h > 0.0) {
                (h, HeightSource::OsmHeight)
            } else if let Some(h) = building.height_levels_m.filter(|h| *h > 0.0) {
                (h, HeightSource::Levels)
            } else {
                random.push(idx);
                (
                    self.sampler.sample(building.area_m2, &mut self.rng),
                    HeightSource::Random,
                )
            };

            building.height_m = Some(height);
            building.height_src = Some(source);
        }

        let tall_tail = self.inject_tall_tail(buildings, &random);

        let (min_h, max_h) = (self.config.min_height_m, self.config.max_height_m);
        for building in buildings.iter_mut() {
            building.height_m = building.height_m.map(|h| h.clamp(min_h, max_h));
        }

        info!(
            "Resolved {} buildings ({} imputed, {} promoted to towers)",
            buildings.len(),
            random.len(),
            tall_tail.len()
        );

        Resolution { random, tall_tail }
    }

    fn inject_tall_tail(&mut self, buildings: &mut [Building], random: &[usize]) -> Vec<usize> {
        if random.is_empty() {
            return Vec::new();
        }

        let k = tall_tail_count(random.len(), self.config.tall_tail_fraction);

        // Largest footprints first, ties kept in input order
        let mut pool = random.to_vec();
        pool.sort_by(|&a, &b| buildings[b].area_m2.total_cmp(&buildings[a].area_m2));
        pool.truncate((k * self.config.tall_tail_pool_factor).max(k));

        debug!("Tall tail: {} towers from a pool of {}", k, pool.len());

        let chosen: Vec<usize> = index::sample(&mut self.rng, pool.len(), k)
            .into_iter()
            .map(|j| pool[j])
            .collect();

        let (lo, hi) = (self.config.tall_tail_min_m, self.config.tall_tail_max_m);
        for &idx in &chosen {
            buildings[idx].height_m = Some(self.rng.gen_range(lo..hi));
        }

        chosen
    }
}
