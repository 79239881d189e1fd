//! Node naming.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Wall-clock nanoseconds, strictly increasing across every caller in the
/// process.
pub fn next_stamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let prev = LAST_STAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        })
        .unwrap_or_else(|last| last);
    now.max(prev.saturating_add(1))
}

/// Reduce a label expression to characters safe in a node name.
///
/// Runs of anything outside `[A-Za-z0-9._]` collapse into a single `-`;
/// leading and trailing separators are dropped.
pub fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
            out.push(ch);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// `<label>-<stamp>`, or just the stamp when the label is absent or
/// sanitizes to nothing.
pub fn node_name(label: Option<&str>, stamp: u64) -> String {
    let prefix = label.map(sanitize_label).unwrap_or_default();
    if prefix.is_empty() {
        format!("{stamp:x}")
    } else {
        format!("{prefix}-{stamp:x}")
    }
}
