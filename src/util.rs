//! Display helpers for byte counts and long remote paths.

/// Formats a byte count into a human-readable string (`1.2 MB`, `340 B`).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64 / div as f64;
    let suffix = [b'K', b'M', b'G', b'T', b'P', b'E'][exp] as char;
    format!("{value:.1} {suffix}B")
}

/// Truncates a path from the left, keeping the rightmost part visible.
///
/// Useful for progress lines where the deepest directory matters most.
#[must_use]
pub fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let tail: String = path
        .chars()
        .rev()
        .take(keep)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}
