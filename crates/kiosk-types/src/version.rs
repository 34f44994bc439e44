use std::cmp::Ordering;

/// Compare two dotted version strings numerically, segment by segment.
///
/// `"1.10"` sorts after `"1.9"`, and missing trailing segments count as zero
/// (`"2"` equals `"2.0.0"`). Non-numeric segments fall back to a plain string
/// comparison for that segment.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.trim().split('.').collect();
    let right: Vec<&str> = b.trim().split('.').collect();
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or("0");
        let r = right.get(i).copied().unwrap_or("0");
        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => l.cmp(r),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
