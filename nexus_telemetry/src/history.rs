//! Bounded history buffer backing the throughput graph.

use std::collections::VecDeque;

use crate::config::TelemetryConfig;
use crate::types::{HistoryPoint, PlotPoint};

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if dq.len() == cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// Maps a rate onto the graph's inverted vertical axis: 0 KB/s sits at the
/// baseline and the capped rate rises towards 0.
pub fn graph_value(rate_kbps: f64, cfg: &TelemetryConfig) -> f64 {
    if rate_kbps.is_nan() {
        return cfg.graph_baseline;
    }
    cfg.graph_baseline - rate_kbps.clamp(0.0, cfg.graph_cap_kbps) / cfg.graph_scale
}

#[derive(Debug, Clone)]
pub struct HistoryRing {
    values: VecDeque<f64>,
    cap: usize,
    step: f64,
    floor: f64,
}

impl HistoryRing {
    pub fn new(cap: usize, step: f64, floor: f64) -> Self {
        let cap = cap.max(1);
        Self {
            values: VecDeque::with_capacity(cap),
            cap,
            step,
            floor,
        }
    }

    pub fn from_config(cfg: &TelemetryConfig) -> Self {
        Self::new(cfg.history_capacity, cfg.graph_step, cfg.graph_floor)
    }

    pub fn push(&mut self, value: f64) {
        push_capped(&mut self.values, value, self.cap);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    // Indices are positions in the current window, not stable identities.
    pub fn points(&self) -> Vec<HistoryPoint> {
        self.values
            .iter()
            .enumerate()
            .map(|(index, &value)| HistoryPoint { index, value })
            .collect()
    }

    /// Polyline coordinates followed by two points on the floor (right, then
    /// left) so the result can be filled as an area.
    pub fn snapshot(&self) -> Vec<PlotPoint> {
        let mut out: Vec<PlotPoint> = self
            .points()
            .into_iter()
            .map(|p| PlotPoint {
                x: p.index as f64 * self.step,
                y: p.value,
            })
            .collect();
        out.push(PlotPoint {
            x: self.values.len() as f64 * self.step,
            y: self.floor,
        });
        out.push(PlotPoint {
            x: 0.0,
            y: self.floor,
        });
        out
    }
}
