//! Dotted version comparison for the `clientVersion` check.

use std::cmp::Ordering;

/// Compares two dotted version strings component by component.
///
/// Missing trailing components count as `0`, as do components that are not
/// numbers, so `"2.1"` is greater than `"2.0.0.0"` and `"2"` equals `"2.0"`.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left = components(left);
    let right = components(right);

    for i in 0..left.len().max(right.len()) {
        let a = left.get(i).copied().unwrap_or(0);
        let b = right.get(i).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn components(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn equal_versions() {
        assert_eq!(compare_versions("2.0.0.0", "2.0.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("2", "2.0.0.0"), Ordering::Equal);
    }

    #[test]
    fn older_and_newer() {
        assert_eq!(compare_versions("1.9.9.9", "2.0.0.0"), Ordering::Less);
        assert_eq!(compare_versions("2.1", "2.0.0.0"), Ordering::Greater);
        assert_eq!(compare_versions("2.1.0.30", "2.0.0.0"), Ordering::Greater);
        assert_eq!(compare_versions("2.0.10", "2.0.9"), Ordering::Greater);
    }

    #[test]
    fn garbage_components_count_as_zero() {
        assert_eq!(compare_versions("", "0.0"), Ordering::Equal);
        assert_eq!(compare_versions("x.1", "0.1"), Ordering::Equal);
    }

    proptest! {
        #[test]
        fn comparison_is_antisymmetric(
            a in prop::collection::vec(0u64..50, 1..5),
            b in prop::collection::vec(0u64..50, 1..5),
        ) {
            let a = a.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
            let b = b.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
            prop_assert_eq!(compare_versions(&a, &b), compare_versions(&b, &a).reverse());
        }
    }
}
