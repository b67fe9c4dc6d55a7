//! Download/upload rate from two consecutive cumulative byte counters.
//!
//! Samples are assumed to be exactly one tick apart; there is no elapsed-time
//! correction, so scheduler jitter shows up as rate noise. Upload is not
//! measured: it is reported as a fixed fraction of download.

use tracing::debug;

use crate::types::{RateBasis, RateSample, RawSample};

pub fn estimate(
    previous: Option<&RawSample>,
    current: &RawSample,
    upload_ratio: f64,
) -> RateSample {
    let Some(now) = current.net_bytes_received else {
        return RateSample::zero(RateBasis::Unavailable);
    };
    let Some(before) = previous.and_then(|p| p.net_bytes_received) else {
        return RateSample::zero(RateBasis::NoBaseline);
    };

    if now < before {
        debug!(before, now, "network counter went backwards; clamping rate to zero");
        return RateSample::zero(RateBasis::CounterReset);
    }

    let download_kbps = (now - before) as f64 / 1024.0;
    RateSample {
        download_kbps,
        upload_kbps: download_kbps * upload_ratio,
        basis: RateBasis::Measured,
    }
}
