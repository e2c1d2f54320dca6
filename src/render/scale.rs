/// Linear map from a data domain onto a pixel range.
#[derive(Debug, Clone, Copy)]
pub struct LinearScale {
    d0: f64,
    d1: f64,
    r0: f64,
    r1: f64,
}

impl LinearScale {
    pub fn new(domain: (f64, f64), range: (f64, f64)) -> Self {
        Self {
            d0: domain.0,
            d1: domain.1,
            r0: range.0,
            r1: range.1,
        }
    }

    pub fn map(&self, v: f64) -> f64 {
        let span = self.d1 - self.d0;
        if span.abs() < f64::EPSILON {
            return (self.r0 + self.r1) / 2.0;
        }
        self.r0 + (v - self.d0) / span * (self.r1 - self.r0)
    }

    /// Like `map`, but pinned to the range ends.
    pub fn map_clamped(&self, v: f64) -> f64 {
        let (lo, hi) = if self.r0 <= self.r1 {
            (self.r0, self.r1)
        } else {
            (self.r1, self.r0)
        };
        self.map(v).clamp(lo, hi)
    }
}

/// Round axis bounds with evenly spaced tick values.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticks {
    pub lo: f64,
    pub hi: f64,
    pub step: f64,
    pub values: Vec<f64>,
}

impl Ticks {
    /// Decimals needed to print tick values without noise.
    pub fn decimals(&self) -> usize {
        if self.step >= 1.0 {
            0
        } else {
            (-self.step.log10() - 1e-9).ceil().max(0.0) as usize
        }
    }
}

fn nice_num(x: f64, round: bool) -> f64 {
    let exp = x.log10().floor() as i32;
    let f = x / 10f64.powi(exp);
    let nf = if round {
        if f < 1.5 {
            1.0
        } else if f < 3.0 {
            2.0
        } else if f < 7.0 {
            5.0
        } else {
            10.0
        }
    } else if f <= 1.0 {
        1.0
    } else if f <= 2.0 {
        2.0
    } else if f <= 5.0 {
        5.0
    } else {
        10.0
    };
    nf * 10f64.powi(exp)
}

/// Ticks covering `[lo, hi]` with roughly `target` labels.
pub fn nice_ticks(lo: f64, hi: f64, target: usize) -> Ticks {
    let (mut lo, mut hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if (hi - lo).abs() < f64::EPSILON {
        if lo == 0.0 {
            hi = 1.0;
        } else {
            let pad = lo.abs() * 0.1;
            lo -= pad;
            hi += pad;
        }
    }
    let range = nice_num(hi - lo, false);
    let step = nice_num(range / (target.max(2) - 1) as f64, true);
    let graph_lo = (lo / step).floor() * step;
    let graph_hi = (hi / step).ceil() * step;

    let mut values = Vec::new();
    let mut v = graph_lo;
    while v <= graph_hi + step / 2.0 {
        // Snap away float drift like 0.30000000000000004.
        values.push((v / step).round() * step);
        v += step;
    }
    Ticks {
        lo: graph_lo,
        hi: graph_hi,
        step,
        values,
    }
}

/// Ticks for a fixed `[0, max]` axis; values beyond `max` are dropped.
pub fn fixed_ticks(max: f64, target: usize) -> Ticks {
    let mut t = nice_ticks(0.0, max, target);
    t.values.retain(|v| *v <= max + t.step * 1e-9);
    t.lo = 0.0;
    t.hi = max;
    t
}
