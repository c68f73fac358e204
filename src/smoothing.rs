// src/smoothing.rs - Per-landmark temporal filtering (Savitzky-Golay and EMA)
use crate::config::{SmootherConfig, SmoothingMode};
use crate::error::{Result, RigError};
use crate::mediapipe_bridge::{Landmark, LandmarkStream, PoseFrame};
use nalgebra::DMatrix;
use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

// Closed-form quadratic fits evaluated at the window centre
const SG_5_2: [f64; 5] = [-3.0 / 35.0, 12.0 / 35.0, 17.0 / 35.0, 12.0 / 35.0, -3.0 / 35.0];
const SG_7_2: [f64; 7] = [
    -2.0 / 21.0,
    3.0 / 21.0,
    6.0 / 21.0,
    7.0 / 21.0,
    6.0 / 21.0,
    3.0 / 21.0,
    -2.0 / 21.0,
];

static COEFFICIENT_CACHE: Lazy<Mutex<HashMap<(usize, usize), Arc<[f64]>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Savitzky-Golay smoothing coefficients for `(window, order)`.
///
/// The two common quadratic windows come from tables; everything else is
/// solved once by least squares and cached for the life of the process.
pub fn savitzky_golay_coefficients(window: usize, order: usize) -> Result<Arc<[f64]>> {
    match (window, order) {
        (5, 2) => return Ok(Arc::from(&SG_5_2[..])),
        (7, 2) => return Ok(Arc::from(&SG_7_2[..])),
        _ => {}
    }

    let mut cache = COEFFICIENT_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(coefficients) = cache.get(&(window, order)) {
        return Ok(Arc::clone(coefficients));
    }

    let coefficients: Arc<[f64]> = solve_coefficients(window, order)?.into();
    debug!(window, order, "Computed Savitzky-Golay coefficients");
    cache.insert((window, order), Arc::clone(&coefficients));
    Ok(coefficients)
}

/// Fits a degree-`order` polynomial over the window by least squares
/// (normal equations on the Vandermonde matrix) and returns the weights that
/// evaluate the fit at the centre sample.
pub fn solve_coefficients(window: usize, order: usize) -> Result<Vec<f64>> {
    if window == 0 || window % 2 == 0 || order >= window {
        return Err(RigError::InvalidFilter { window, order });
    }

    let half = (window / 2) as f64;
    let vandermonde = DMatrix::from_fn(window, order + 1, |i, j| (i as f64 - half).powi(j as i32));
    let normal = vandermonde.transpose() * &vandermonde;
    let inverse = normal
        .try_inverse()
        .ok_or(RigError::InvalidFilter { window, order })?;

    // Row 0 of (AᵀA)⁻¹Aᵀ is the constant term of the fit, i.e. the value at 0
    let projection = inverse * vandermonde.transpose();
    Ok(projection.row(0).iter().copied().collect())
}

/// Bounded FIFO of the most recent samples for one landmark.
#[derive(Debug, Clone)]
pub struct LandmarkHistory {
    window: usize,
    samples: VecDeque<Landmark>,
}

impl LandmarkHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn push(&mut self, sample: Landmark) {
        self.samples.push_back(sample);
        if self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.window
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.samples.iter()
    }
}

#[derive(Debug, Clone)]
pub struct SavitzkyGolayFilter {
    coefficients: Arc<[f64]>,
    coefficient_sum: f64,
}

impl SavitzkyGolayFilter {
    pub fn new(window: usize, order: usize) -> Result<Self> {
        let coefficients = savitzky_golay_coefficients(window, order)?;
        let coefficient_sum = coefficients.iter().sum();
        Ok(Self {
            coefficients,
            coefficient_sum,
        })
    }

    pub fn window(&self) -> usize {
        self.coefficients.len()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Pushes `sample` and returns the filtered landmark. Until the history
    /// holds a full window the sample is returned untouched.
    pub fn smooth(&self, history: &mut LandmarkHistory, sample: Landmark) -> Landmark {
        history.push(sample);
        if history.len() < self.window() {
            return sample;
        }

        let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
        for (c, h) in self.coefficients.iter().zip(history.iter()) {
            x += c * h.x;
            y += c * h.y;
            z += c * h.z;
        }

        Landmark {
            x: x / self.coefficient_sum,
            y: y / self.coefficient_sum,
            z: z / self.coefficient_sum,
            visibility: sample.visibility,
        }
    }
}

/// `out = alpha * new + (1 - alpha) * previous`, no history needed.
#[derive(Debug, Clone)]
pub struct ExponentialFilter {
    alpha: f64,
    prev: Option<Landmark>,
}

impl ExponentialFilter {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, prev: None }
    }

    pub fn apply(&mut self, sample: Landmark) -> Landmark {
        let prev = match self.prev {
            Some(prev) => prev,
            None => {
                self.prev = Some(sample);
                return sample;
            }
        };

        let a = self.alpha;
        let result = Landmark {
            x: a * sample.x + (1.0 - a) * prev.x,
            y: a * sample.y + (1.0 - a) * prev.y,
            z: a * sample.z + (1.0 - a) * prev.z,
            visibility: sample.visibility,
        };
        self.prev = Some(result);
        result
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

enum StreamFilter {
    SavitzkyGolay {
        filter: SavitzkyGolayFilter,
        histories: Vec<LandmarkHistory>,
    },
    Exponential {
        alpha: f64,
        filters: Vec<ExponentialFilter>,
    },
}

/// Filters every landmark of one stream (body, a hand, or the face).
pub struct StreamSmoother {
    filter: StreamFilter,
}

impl StreamSmoother {
    pub fn new(config: &SmootherConfig) -> Result<Self> {
        let filter = match config.mode {
            SmoothingMode::SavitzkyGolay => StreamFilter::SavitzkyGolay {
                filter: SavitzkyGolayFilter::new(config.window_size, config.polynomial_order)?,
                histories: Vec::new(),
            },
            SmoothingMode::Exponential => StreamFilter::Exponential {
                alpha: config.alpha,
                filters: Vec::new(),
            },
        };
        Ok(Self { filter })
    }

    /// Smooths one frame of this stream. A change in landmark count (a hand
    /// appearing or dropping out) restarts the stream.
    pub fn smooth_frame(&mut self, landmarks: &[Landmark]) -> Vec<Landmark> {
        match &mut self.filter {
            StreamFilter::SavitzkyGolay { filter, histories } => {
                if histories.len() != landmarks.len() {
                    debug!(
                        from = histories.len(),
                        to = landmarks.len(),
                        "Landmark count changed, restarting stream history"
                    );
                    *histories = vec![LandmarkHistory::new(filter.window()); landmarks.len()];
                }
                landmarks
                    .iter()
                    .zip(histories.iter_mut())
                    .map(|(lm, history)| filter.smooth(history, *lm))
                    .collect()
            }
            StreamFilter::Exponential { alpha, filters } => {
                if filters.len() != landmarks.len() {
                    *filters = vec![ExponentialFilter::new(*alpha); landmarks.len()];
                }
                landmarks
                    .iter()
                    .zip(filters.iter_mut())
                    .map(|(lm, filter)| filter.apply(*lm))
                    .collect()
            }
        }
    }

    pub fn reset(&mut self) {
        match &mut self.filter {
            StreamFilter::SavitzkyGolay { histories, .. } => histories.iter_mut().for_each(LandmarkHistory::clear),
            StreamFilter::Exponential { filters, .. } => filters.iter_mut().for_each(ExponentialFilter::reset),
        }
    }
}

/// One [`StreamSmoother`] per landmark stream of a [`PoseFrame`].
pub struct TemporalSmoother {
    streams: HashMap<LandmarkStream, StreamSmoother>,
}

impl TemporalSmoother {
    pub fn new(config: &SmootherConfig) -> Result<Self> {
        let mut streams = HashMap::new();
        for stream in LandmarkStream::ALL {
            streams.insert(stream, StreamSmoother::new(config)?);
        }
        Ok(Self { streams })
    }

    /// Returns a frame of the same shape with every stream filtered.
    pub fn smooth_frame(&mut self, frame: &PoseFrame) -> PoseFrame {
        let mut smoothed = PoseFrame {
            sequence: frame.sequence,
            timestamp: frame.timestamp,
            ..Default::default()
        };

        for stream in LandmarkStream::ALL {
            let Some(smoother) = self.streams.get_mut(&stream) else {
                continue;
            };
            let out = smoother.smooth_frame(frame.stream(stream));
            match stream {
                LandmarkStream::Body => smoothed.body = out,
                LandmarkStream::LeftHand => smoothed.left_hand = out,
                LandmarkStream::RightHand => smoothed.right_hand = out,
                LandmarkStream::Face => smoothed.face = out,
            }
        }

        smoothed
    }

    pub fn reset(&mut self) {
        self.streams.values_mut().for_each(StreamSmoother::reset);
    }
}
