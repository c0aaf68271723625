/// Estimated completion of a running job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub percent: f64,
    /// Running well past the estimate.
    pub overtime: bool,
}

/// `now` must already be corrected to the server's clock.
pub fn estimate(started: i64, etc: Option<i64>, now: i64) -> Option<Progress> {
    let etc = etc?;
    let elapsed = (now - started) as f64;
    let expected = (etc - started) as f64;
    let ratio = if expected > 0.0 {
        elapsed / expected
    } else {
        f64::INFINITY
    };
    Some(Progress {
        percent: if ratio >= 1.0 {
            99.0
        } else {
            (100.0 * ratio).max(0.0)
        },
        overtime: ratio > 1.2,
    })
}

pub fn describe(started: i64, etc: Option<i64>, now: i64) -> String {
    match estimate(started, etc, now) {
        Some(Progress {
            overtime: true, ..
        }) => "overtime".to_string(),
        Some(progress) => format!("{:.0}%", progress.percent),
        None => format!("{}s", (now - started).max(0)),
    }
}
