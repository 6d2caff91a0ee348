use log::debug;
use serde::Serialize;

/// Intensity threshold used when a region has no candidates at all.
pub const DEFAULT_THRESHOLD: f64 = 150.0;

/// How a region's fill threshold was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "method")]
pub enum ThresholdMethod {
    /// Midpoint of the largest jump between consecutive sorted intensities.
    #[serde(rename = "largestGap")]
    LargestGap { jump: f64 },
    /// No clear jump; a fixed offset below the mean intensity.
    #[serde(rename = "meanOffset")]
    MeanOffset,
    #[serde(rename = "default")]
    Default,
}

/// A per-region cut between filled (darker) and unfilled bubbles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkThreshold {
    pub value: f64,
    pub method: ThresholdMethod,
}

impl MarkThreshold {
    pub fn is_filled(&self, intensity: f64) -> bool {
        intensity < self.value
    }
}

/// Derives a fill threshold from the mean intensities of every candidate in a
/// region.
///
/// Filled bubbles are much darker than empty ones, so the sorted intensities
/// usually show one dominant jump. If that jump is larger than
/// `min_jump_intensity` the threshold sits halfway across it. Otherwise the
/// region is assumed to be uniformly filled or uniformly empty and the
/// threshold is `threshold_fallback_offset` below the mean.
pub fn derive_threshold(
    intensities: &[f64],
    min_jump_intensity: f64,
    threshold_fallback_offset: f64,
) -> MarkThreshold {
    if intensities.is_empty() {
        return MarkThreshold {
            value: DEFAULT_THRESHOLD,
            method: ThresholdMethod::Default,
        };
    }

    let mut sorted = intensities.to_vec();
    sorted.sort_by(f64::total_cmp);

    let largest_jump = sorted
        .windows(2)
        .map(|w| (w[1] - w[0], w[0], w[1]))
        .fold(None, |best: Option<(f64, f64, f64)>, jump| match best {
            Some(b) if b.0 >= jump.0 => Some(b),
            _ => Some(jump),
        });

    let threshold = match largest_jump {
        Some((jump, below, above)) if jump > min_jump_intensity => MarkThreshold {
            value: (below + above) / 2.0,
            method: ThresholdMethod::LargestGap { jump },
        },
        _ => {
            let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
            MarkThreshold {
                value: mean - threshold_fallback_offset,
                method: ThresholdMethod::MeanOffset,
            }
        }
    };
    debug!(
        "Threshold {:.1} from {} intensities ({:?})",
        threshold.value,
        sorted.len(),
        threshold.method
    );
    threshold
}
