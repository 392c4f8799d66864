use image::GrayImage;
use rand::rngs::ThreadRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

use crate::block::Rect;

// Online-appearance tracking backends. Both model the target with
// Haar-like features over an integral image and update online with the
// configured learning rate; they differ in how features are scored and
// selected. Accuracy is whatever it is; the stage contract only needs a
// rectangle back.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Mil,
    Ada,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NegStrategy {
    /// Sample negatives from a ring around the target.
    #[default]
    Ring,
    /// Sample negatives uniformly over the frame.
    Uniform,
}

#[derive(Debug, Clone)]
pub struct BackendParams {
    pub min_rects: usize,
    pub max_rects: usize,
    pub num_feat: usize,
    pub num_sel: usize,
    pub learn_rate: f32,
    pub search_radius: u32,
    pub pos_radius: u32,
    pub init_pos_radius: u32,
    pub pos_max: usize,
    pub neg_count: usize,
    pub init_neg_count: usize,
    pub neg_strategy: NegStrategy,
}

pub trait TrackerBackend {
    /// First-frame training pass; distinct from steady-state tracking.
    fn train_first(&mut self, frame: &GrayImage, rect: Rect);

    /// One tracking update. Returns the new target window in the same
    /// (processing) coordinates.
    fn track(&mut self, frame: &GrayImage, rect: Rect) -> Rect;
}

pub fn create(kind: TrackKind, params: &BackendParams) -> Box<dyn TrackerBackend> {
    match kind {
        TrackKind::Mil => Box::new(MilBackend::new(params.clone())),
        TrackKind::Ada => Box::new(AdaBackend::new(params.clone())),
    }
}

// ---------------------------------------------------------------------
// Shared machinery

struct Integral {
    w: usize,
    h: usize,
    sums: Vec<u64>,
}

impl Integral {
    fn new(frame: &GrayImage) -> Self {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        let mut sums = vec![0u64; (w + 1) * (h + 1)];
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += frame.get_pixel(x as u32, y as u32).0[0] as u64;
                sums[(y + 1) * (w + 1) + (x + 1)] = sums[y * (w + 1) + (x + 1)] + row;
            }
        }
        Self { w, h, sums }
    }

    /// Mean intensity over the rect clipped to the frame; 0 for a rect
    /// entirely outside.
    fn rect_mean(&self, x: i32, y: i32, rw: u32, rh: u32) -> f32 {
        let x0 = x.clamp(0, self.w as i32) as usize;
        let y0 = y.clamp(0, self.h as i32) as usize;
        let x1 = (x + rw as i32).clamp(0, self.w as i32) as usize;
        let y1 = (y + rh as i32).clamp(0, self.h as i32) as usize;
        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }
        let s = |xx: usize, yy: usize| self.sums[yy * (self.w + 1) + xx];
        let total = s(x1, y1) + s(x0, y0) - s(x1, y0) - s(x0, y1);
        total as f32 / ((x1 - x0) * (y1 - y0)) as f32
    }
}

/// One weighted box of a Haar feature, positioned as fractions of the
/// target window so it survives window scale changes.
#[derive(Debug, Clone)]
struct HaarRect {
    fx: f32,
    fy: f32,
    fw: f32,
    fh: f32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<HaarRect>,
}

impl HaarFeature {
    fn random(rng: &mut ThreadRng, min_rects: usize, max_rects: usize) -> Self {
        let count = rng.random_range(min_rects.max(1)..=max_rects.max(min_rects.max(1)));
        let norm = 1.0 / (count as f32).sqrt();
        let rects = (0..count)
            .map(|_| HaarRect {
                fx: rng.random_range(0.0..0.7),
                fy: rng.random_range(0.0..0.7),
                fw: rng.random_range(0.1..0.3),
                fh: rng.random_range(0.1..0.3),
                weight: if rng.random_bool(0.5) { norm } else { -norm },
            })
            .collect();
        Self { rects }
    }

    fn eval(&self, integral: &Integral, window: Rect) -> f32 {
        self.rects
            .iter()
            .map(|r| {
                let x = window.x + (r.fx * window.width as f32) as i32;
                let y = window.y + (r.fy * window.height as f32) as i32;
                let w = ((r.fw * window.width as f32) as u32).max(1);
                let h = ((r.fh * window.height as f32) as u32).max(1);
                r.weight * integral.rect_mean(x, y, w, h)
            })
            .sum()
    }
}

/// Windows displaced from `rect` by at most `radius`, shuffled, at most
/// `max` of them. Always includes the undisplaced window.
fn positive_windows(
    rng: &mut ThreadRng,
    rect: Rect,
    radius: u32,
    max: usize,
) -> Vec<Rect> {
    let r = radius as i32;
    let mut windows = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r && !(dx == 0 && dy == 0) {
                windows.push(Rect::new(rect.x + dx, rect.y + dy, rect.width, rect.height));
            }
        }
    }
    windows.shuffle(rng);
    windows.truncate(max.saturating_sub(1));
    windows.insert(0, rect);
    windows
}

fn negative_windows(
    rng: &mut ThreadRng,
    rect: Rect,
    frame_w: u32,
    frame_h: u32,
    count: usize,
    strategy: NegStrategy,
    search_radius: u32,
) -> Vec<Rect> {
    let mut windows = Vec::with_capacity(count);
    let inner = search_radius.max(4) as f32;
    let mut attempts = 0;
    while windows.len() < count && attempts < count * 20 {
        attempts += 1;
        let (dx, dy) = match strategy {
            NegStrategy::Ring => {
                let dist = rng.random_range(inner..inner * 1.5 + 1.0);
                let angle = rng.random_range(0.0..std::f32::consts::TAU);
                ((dist * angle.cos()) as i32, (dist * angle.sin()) as i32)
            }
            NegStrategy::Uniform => (
                rng.random_range(-(frame_w as i32)..=frame_w as i32) / 2,
                rng.random_range(-(frame_h as i32)..=frame_h as i32) / 2,
            ),
        };
        if dx.abs() < 2 && dy.abs() < 2 {
            continue;
        }
        windows.push(Rect::new(rect.x + dx, rect.y + dy, rect.width, rect.height));
    }
    windows
}

#[derive(Debug, Clone, Copy)]
struct Gauss {
    mu: f32,
    sigma: f32,
}

impl Gauss {
    fn fit(samples: impl Iterator<Item = f32>) -> Self {
        let values: Vec<f32> = samples.collect();
        let n = values.len().max(1) as f32;
        let mu = values.iter().sum::<f32>() / n;
        let var = values.iter().map(|v| (v - mu) * (v - mu)).sum::<f32>() / n;
        Self {
            mu,
            sigma: var.sqrt().max(1e-2),
        }
    }

    fn blend(&mut self, fresh: Gauss, keep: f32) {
        self.mu = keep * self.mu + (1.0 - keep) * fresh.mu;
        self.sigma = (keep * self.sigma + (1.0 - keep) * fresh.sigma).max(1e-2);
    }

    fn log_likelihood(&self, v: f32) -> f32 {
        let d = (v - self.mu) / self.sigma;
        -0.5 * d * d - self.sigma.ln()
    }
}

fn search_windows(rect: Rect, radius: u32) -> Vec<Rect> {
    let r = radius as i32;
    let mut windows = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                windows.push(Rect::new(rect.x + dx, rect.y + dy, rect.width, rect.height));
            }
        }
    }
    windows
}

// ---------------------------------------------------------------------
// MIL-style backend: per-feature positive/negative gaussians, scored by
// log-likelihood ratio, strongest-separation features selected.

pub struct MilBackend {
    params: BackendParams,
    features: Vec<HaarFeature>,
    pos: Vec<Gauss>,
    neg: Vec<Gauss>,
    selected: Vec<usize>,
    rng: ThreadRng,
}

impl MilBackend {
    pub fn new(params: BackendParams) -> Self {
        Self {
            params,
            features: Vec::new(),
            pos: Vec::new(),
            neg: Vec::new(),
            selected: Vec::new(),
            rng: rand::rng(),
        }
    }

    fn fit_stats(
        &self,
        integral: &Integral,
        pos_windows: &[Rect],
        neg_windows: &[Rect],
    ) -> (Vec<Gauss>, Vec<Gauss>) {
        let pos = self
            .features
            .iter()
            .map(|f| Gauss::fit(pos_windows.iter().map(|w| f.eval(integral, *w))))
            .collect();
        let neg = self
            .features
            .iter()
            .map(|f| Gauss::fit(neg_windows.iter().map(|w| f.eval(integral, *w))))
            .collect();
        (pos, neg)
    }

    fn reselect(&mut self) {
        let mut separation: Vec<(usize, f32)> = self
            .pos
            .iter()
            .zip(&self.neg)
            .enumerate()
            .map(|(j, (p, n))| (j, (p.mu - n.mu).abs() / (p.sigma + n.sigma)))
            .collect();
        separation.sort_by(|a, b| b.1.total_cmp(&a.1));
        self.selected = separation
            .into_iter()
            .take(self.params.num_sel)
            .map(|(j, _)| j)
            .collect();
    }

    fn score(&self, integral: &Integral, window: Rect) -> f32 {
        self.selected
            .iter()
            .map(|&j| {
                let v = self.features[j].eval(integral, window);
                self.pos[j].log_likelihood(v) - self.neg[j].log_likelihood(v)
            })
            .sum()
    }
}

impl TrackerBackend for MilBackend {
    fn train_first(&mut self, frame: &GrayImage, rect: Rect) {
        self.features = (0..self.params.num_feat.max(1))
            .map(|_| HaarFeature::random(&mut self.rng, self.params.min_rects, self.params.max_rects))
            .collect();
        let integral = Integral::new(frame);
        let pos_windows = positive_windows(
            &mut self.rng,
            rect,
            self.params.init_pos_radius,
            self.params.pos_max,
        );
        let neg_windows = negative_windows(
            &mut self.rng,
            rect,
            frame.width(),
            frame.height(),
            self.params.init_neg_count,
            self.params.neg_strategy,
            self.params.search_radius,
        );
        let (pos, neg) = self.fit_stats(&integral, &pos_windows, &neg_windows);
        self.pos = pos;
        self.neg = neg;
        self.reselect();
    }

    fn track(&mut self, frame: &GrayImage, rect: Rect) -> Rect {
        let integral = Integral::new(frame);
        let best = search_windows(rect, self.params.search_radius)
            .into_iter()
            .map(|w| (self.score(&integral, w), w))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, w)| w)
            .unwrap_or(rect);

        // Online model update around the new position.
        let pos_windows =
            positive_windows(&mut self.rng, best, self.params.pos_radius, self.params.pos_max);
        let neg_windows = negative_windows(
            &mut self.rng,
            best,
            frame.width(),
            frame.height(),
            self.params.neg_count,
            self.params.neg_strategy,
            self.params.search_radius,
        );
        let (fresh_pos, fresh_neg) = self.fit_stats(&integral, &pos_windows, &neg_windows);
        let keep = self.params.learn_rate;
        for (g, fresh) in self.pos.iter_mut().zip(fresh_pos) {
            g.blend(fresh, keep);
        }
        for (g, fresh) in self.neg.iter_mut().zip(fresh_neg) {
            g.blend(fresh, keep);
        }
        self.reselect();
        best
    }
}

// ---------------------------------------------------------------------
// Online-boosting backend: threshold stumps with running error rates,
// lowest-error stumps voted with their log-odds weight.

struct Stump {
    feature: HaarFeature,
    threshold: f32,
    polarity: f32,
    error: f32,
}

impl Stump {
    fn classify(&self, v: f32) -> f32 {
        if (v - self.threshold) * self.polarity >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }

    fn alpha(&self) -> f32 {
        let e = self.error.clamp(0.01, 0.99);
        ((1.0 - e) / e).ln()
    }
}

pub struct AdaBackend {
    params: BackendParams,
    stumps: Vec<Stump>,
    selected: Vec<usize>,
    rng: ThreadRng,
}

impl AdaBackend {
    pub fn new(params: BackendParams) -> Self {
        Self {
            params,
            stumps: Vec::new(),
            selected: Vec::new(),
            rng: rand::rng(),
        }
    }

    fn retrain(
        &mut self,
        integral: &Integral,
        pos_windows: &[Rect],
        neg_windows: &[Rect],
        keep: f32,
    ) {
        for stump in self.stumps.iter_mut() {
            let pos = Gauss::fit(pos_windows.iter().map(|w| stump.feature.eval(integral, *w)));
            let neg = Gauss::fit(neg_windows.iter().map(|w| stump.feature.eval(integral, *w)));
            let threshold = (pos.mu + neg.mu) / 2.0;
            let polarity = if pos.mu >= neg.mu { 1.0 } else { -1.0 };
            stump.threshold = keep * stump.threshold + (1.0 - keep) * threshold;
            if keep == 0.0 {
                stump.polarity = polarity;
            }

            let mut wrong = 0usize;
            let total = pos_windows.len() + neg_windows.len();
            for w in pos_windows {
                if stump.classify(stump.feature.eval(integral, *w)) < 0.0 {
                    wrong += 1;
                }
            }
            for w in neg_windows {
                if stump.classify(stump.feature.eval(integral, *w)) > 0.0 {
                    wrong += 1;
                }
            }
            let fresh_error = wrong as f32 / total.max(1) as f32;
            stump.error = keep * stump.error + (1.0 - keep) * fresh_error;
        }
        let mut ranked: Vec<(usize, f32)> = self
            .stumps
            .iter()
            .enumerate()
            .map(|(j, s)| (j, s.error))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        self.selected = ranked
            .into_iter()
            .take(self.params.num_sel)
            .map(|(j, _)| j)
            .collect();
    }

    fn score(&self, integral: &Integral, window: Rect) -> f32 {
        self.selected
            .iter()
            .map(|&j| {
                let stump = &self.stumps[j];
                stump.alpha() * stump.classify(stump.feature.eval(integral, window))
            })
            .sum()
    }
}

impl TrackerBackend for AdaBackend {
    fn train_first(&mut self, frame: &GrayImage, rect: Rect) {
        self.stumps = (0..self.params.num_feat.max(1))
            .map(|_| Stump {
                feature: HaarFeature::random(
                    &mut self.rng,
                    self.params.min_rects,
                    self.params.max_rects,
                ),
                threshold: 0.0,
                polarity: 1.0,
                error: 0.5,
            })
            .collect();
        let integral = Integral::new(frame);
        let pos_windows = positive_windows(
            &mut self.rng,
            rect,
            self.params.init_pos_radius,
            self.params.pos_max,
        );
        let neg_windows = negative_windows(
            &mut self.rng,
            rect,
            frame.width(),
            frame.height(),
            self.params.init_neg_count,
            self.params.neg_strategy,
            self.params.search_radius,
        );
        self.retrain(&integral, &pos_windows, &neg_windows, 0.0);
    }

    fn track(&mut self, frame: &GrayImage, rect: Rect) -> Rect {
        let integral = Integral::new(frame);
        let best = search_windows(rect, self.params.search_radius)
            .into_iter()
            .map(|w| (self.score(&integral, w), w))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, w)| w)
            .unwrap_or(rect);

        let pos_windows =
            positive_windows(&mut self.rng, best, self.params.pos_radius, self.params.pos_max);
        let neg_windows = negative_windows(
            &mut self.rng,
            best,
            frame.width(),
            frame.height(),
            self.params.neg_count,
            self.params.neg_strategy,
            self.params.search_radius,
        );
        self.retrain(&integral, &pos_windows, &neg_windows, self.params.learn_rate);
        best
    }
}
