//! Visual regression testing with screenshot comparison

use image::{GenericImageView, Pixel, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::scenario::FormTarget;

/// A page (and optionally one element of it) to snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualPage {
    pub name: String,
    pub form: FormTarget,
    /// Case-insensitive pattern the title must match before capture
    pub title_pattern: String,
    /// Element to capture instead of the full page
    #[serde(default)]
    pub selector: Option<String>,
}

impl VisualPage {
    pub fn key(&self) -> BaselineKey {
        BaselineKey {
            page: self.name.clone(),
            region: self.selector.as_ref().map(|s| {
                s.chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect::<String>()
                    .trim_matches('_')
                    .to_string()
            }),
        }
    }

    /// Name the capture is saved under
    pub fn capture_name(&self) -> String {
        self.key().stem()
    }
}

/// Configuration for visual testing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub diff_dir: PathBuf,
    /// Allowed differing pixels, in percent
    pub threshold: f64,
    /// Write missing baselines and replace mismatching ones
    pub update_baselines: bool,
    /// Per-channel difference below which pixels count as equal
    pub channel_tolerance: u8,
    pub pages: Vec<VisualPage>,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("baselines"),
            diff_dir: PathBuf::from("test-results/diffs"),
            threshold: 0.5,
            update_baselines: false,
            channel_tolerance: 5,
            pages: vec![VisualPage {
                name: "login".to_string(),
                form: FormTarget::Login,
                title_pattern: "Login".to_string(),
                selector: None,
            }],
        }
    }
}

/// Identifies a baseline: page id plus optional region
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaselineKey {
    pub page: String,
    pub region: Option<String>,
}

impl BaselineKey {
    pub fn page(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            region: None,
        }
    }

    fn stem(&self) -> String {
        match &self.region {
            Some(region) if !region.is_empty() => format!("{}--{}", self.page, region),
            _ => self.page.clone(),
        }
    }
}

impl fmt::Display for BaselineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// Bounding box of differing pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for DiffRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Result of a visual comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDiff {
    pub name: String,
    /// Whether the images match (within threshold)
    pub matches: bool,
    pub diff_percent: f64,
    pub threshold: f64,
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub region: Option<DiffRegion>,
    pub diff_image_path: Option<PathBuf>,
    pub actual_hash: String,
    pub baseline_hash: String,
    /// The baseline was written during this comparison
    pub baseline_written: bool,
}

impl VisualDiff {
    /// Turn a failed comparison into an error.
    pub fn ensure_matches(&self) -> HarnessResult<()> {
        if self.matches {
            return Ok(());
        }
        Err(HarnessError::ScreenshotMismatch {
            name: self.name.clone(),
            diff_percent: self.diff_percent,
            threshold: self.threshold,
            region: self
                .region
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".into()),
        })
    }
}

/// Visual regression testing utilities
pub struct VisualTester {
    config: VisualConfig,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> HarnessResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.diff_dir)?;
        Ok(Self { config })
    }

    pub fn baseline_path(&self, key: &BaselineKey) -> PathBuf {
        self.config.baseline_dir.join(format!("{}.png", key.stem()))
    }

    /// Compare a captured screenshot against its baseline
    pub fn compare(&self, key: &BaselineKey, actual_path: &Path) -> HarnessResult<VisualDiff> {
        let name = key.stem();
        let threshold = self.config.threshold;
        let baseline_path = self.baseline_path(key);

        if !actual_path.exists() {
            return Err(HarnessError::VisualRegression(format!(
                "Actual screenshot not found: {}",
                actual_path.display()
            )));
        }

        if !baseline_path.exists() {
            if !self.config.update_baselines {
                return Err(HarnessError::BaselineNotFound {
                    name,
                    path: baseline_path.to_string_lossy().to_string(),
                });
            }
            std::fs::copy(actual_path, &baseline_path)?;
            info!("Created baseline for '{}' at {}", name, baseline_path.display());

            let hash = hash_file(actual_path)?;
            return Ok(VisualDiff {
                name,
                matches: true,
                diff_percent: 0.0,
                threshold,
                diff_pixels: 0,
                total_pixels: 0,
                region: None,
                diff_image_path: None,
                actual_hash: hash.clone(),
                baseline_hash: hash,
                baseline_written: true,
            });
        }

        let actual_hash = hash_file(actual_path)?;
        let baseline_hash = hash_file(&baseline_path)?;
        let actual_img = image::open(actual_path)?;

        if actual_hash == baseline_hash {
            debug!("Screenshots match exactly (same hash)");
            return Ok(VisualDiff {
                name,
                matches: true,
                diff_percent: 0.0,
                threshold,
                diff_pixels: 0,
                total_pixels: u64::from(actual_img.width()) * u64::from(actual_img.height()),
                region: None,
                diff_image_path: None,
                actual_hash,
                baseline_hash,
                baseline_written: false,
            });
        }

        let baseline_img = image::open(&baseline_path)?;
        if actual_img.dimensions() != baseline_img.dimensions() {
            warn!(
                "Screenshot dimensions differ: actual {:?} vs baseline {:?}",
                actual_img.dimensions(),
                baseline_img.dimensions()
            );
        }

        let diff = pixel_diff(
            &actual_img.to_rgba8(),
            &baseline_img.to_rgba8(),
            self.config.channel_tolerance,
        );
        let diff_percent = if diff.total_pixels == 0 {
            0.0
        } else {
            diff.diff_pixels as f64 / diff.total_pixels as f64 * 100.0
        };
        let matches = diff_percent <= threshold;

        let diff_image_path = if diff.diff_pixels > 0 {
            let path = self.config.diff_dir.join(format!("{}-diff.png", name));
            diff.image.save(&path)?;
            Some(path)
        } else {
            None
        };

        let mut baseline_written = false;
        if !matches {
            warn!(
                "Visual regression detected in '{}': {:.2}% pixels differ (threshold: {:.2}%)",
                name, diff_percent, threshold
            );
            if self.config.update_baselines {
                std::fs::copy(actual_path, &baseline_path)?;
                warn!("Replaced baseline for '{}' (update mode)", name);
                baseline_written = true;
            }
        }

        Ok(VisualDiff {
            name,
            matches: matches || baseline_written,
            diff_percent,
            threshold,
            diff_pixels: diff.diff_pixels,
            total_pixels: diff.total_pixels,
            region: diff.region,
            diff_image_path,
            actual_hash,
            baseline_hash,
            baseline_written,
        })
    }

    /// Compare and fail on mismatch.
    pub fn check(&self, key: &BaselineKey, actual_path: &Path) -> HarnessResult<VisualDiff> {
        let diff = self.compare(key, actual_path)?;
        diff.ensure_matches()?;
        Ok(diff)
    }
}

struct PixelDiff {
    image: RgbaImage,
    diff_pixels: u64,
    total_pixels: u64,
    region: Option<DiffRegion>,
}

/// Compare over the union of both images. Pixels present in only one image
/// always differ.
fn pixel_diff(actual: &RgbaImage, baseline: &RgbaImage, tolerance: u8) -> PixelDiff {
    let width = actual.width().max(baseline.width());
    let height = actual.height().max(baseline.height());

    let mut image = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for y in 0..height {
        for x in 0..width {
            let a = (x < actual.width() && y < actual.height()).then(|| actual.get_pixel(x, y));
            let b = (x < baseline.width() && y < baseline.height()).then(|| baseline.get_pixel(x, y));

            let differs = match (a, b) {
                (Some(a), Some(b)) => pixels_differ(a, b, tolerance),
                _ => true,
            };

            if differs {
                diff_pixels += 1;
                image.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            } else if let Some(a) = a {
                let c = a.channels();
                image.put_pixel(x, y, Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
            }
        }
    }

    PixelDiff {
        image,
        diff_pixels,
        total_pixels: u64::from(width) * u64::from(height),
        region: bounds.map(|(x0, y0, x1, y1)| DiffRegion {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        }),
    }
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>, tolerance: u8) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| x.abs_diff(*y) > tolerance)
}

fn hash_file(path: &Path) -> HarnessResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}
