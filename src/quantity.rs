//! Parsing and formatting of Kubernetes resource quantities
//!
//! The mutator works on the string quantities found in pod specs: cpu values
//! are normalised to millicores and memory values to bytes, scaled by the
//! class ratio, then rounded half-to-even and formatted back.

/// Parse a cpu quantity into fractional millicores.
///
/// Accepts the `m` suffix (`"250m"`) and plain core counts (`"1"`, `"0.5"`).
pub fn parse_cpu_millicores(value: &str) -> Option<f64> {
    if let Some(millis) = value.strip_suffix('m') {
        millis.parse::<f64>().ok()
    } else {
        value.parse::<f64>().ok().map(|v| v * 1000.0)
    }
}

/// Parse a memory quantity into fractional bytes.
///
/// Accepts binary suffixes (`Ki`, `Mi`, `Gi`, `Ti`), decimal suffixes
/// (`k`, `M`, `G`, `T`) and plain byte counts.
pub fn parse_memory_bytes(value: &str) -> Option<f64> {
    const UNITS: [(&str, f64); 8] = [
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Ki", 1024.0),
        ("T", 1_000_000_000_000.0),
        ("G", 1_000_000_000.0),
        ("M", 1_000_000.0),
        ("k", 1_000.0),
    ];

    for (suffix, multiplier) in UNITS {
        if let Some(n) = value.strip_suffix(suffix) {
            return n.parse::<f64>().ok().map(|v| v * multiplier);
        }
    }
    value.parse::<f64>().ok()
}

/// Round half-to-even to the nearest non-negative integer.
pub fn round_half_even(value: f64) -> u64 {
    if value <= 0.0 {
        return 0;
    }
    let floor = value.floor();
    let frac = value - floor;
    let floor = floor as u64;
    if frac > 0.5 {
        floor + 1
    } else if frac < 0.5 {
        floor
    } else if floor % 2 == 0 {
        floor
    } else {
        floor + 1
    }
}

/// Format millicores as a cpu quantity (`"500m"`).
pub fn format_cpu_millicores(millicores: u64) -> String {
    format!("{millicores}m")
}

/// Format bytes as a memory quantity, using the largest binary unit that
/// divides evenly (`"800Mi"`, `"1Gi"`), falling back to plain bytes.
pub fn format_memory_bytes(bytes: u64) -> String {
    const KI: u64 = 1024;
    const MI: u64 = 1024 * 1024;
    const GI: u64 = 1024 * 1024 * 1024;

    if bytes > 0 && bytes % GI == 0 {
        format!("{}Gi", bytes / GI)
    } else if bytes > 0 && bytes % MI == 0 {
        format!("{}Mi", bytes / MI)
    } else if bytes > 0 && bytes % KI == 0 {
        format!("{}Ki", bytes / KI)
    } else {
        bytes.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cpu_values() {
        assert_eq!(parse_cpu_millicores("100m"), Some(100.0));
        assert_eq!(parse_cpu_millicores("1"), Some(1000.0));
        assert_eq!(parse_cpu_millicores("0.5"), Some(500.0));
        assert_eq!(parse_cpu_millicores("1.5"), Some(1500.0));
        assert_eq!(parse_cpu_millicores("garbage"), None);
    }

    #[test]
    fn parse_memory_values() {
        assert_eq!(parse_memory_bytes("128Mi"), Some(128.0 * 1024.0 * 1024.0));
        assert_eq!(parse_memory_bytes("1Gi"), Some(1024.0 * 1024.0 * 1024.0));
        assert_eq!(parse_memory_bytes("512Ki"), Some(512.0 * 1024.0));
        assert_eq!(parse_memory_bytes("1000"), Some(1000.0));
        assert_eq!(parse_memory_bytes("1G"), Some(1_000_000_000.0));
        assert_eq!(parse_memory_bytes("500M"), Some(500_000_000.0));
        assert_eq!(parse_memory_bytes("2Ti"), Some(2.0 * 1024f64.powi(4)));
        assert_eq!(parse_memory_bytes("x"), None);
    }

    #[test]
    fn rounding_is_half_to_even() {
        assert_eq!(round_half_even(2.5), 2);
        assert_eq!(round_half_even(3.5), 4);
        assert_eq!(round_half_even(2.4), 2);
        assert_eq!(round_half_even(2.6), 3);
        assert_eq!(round_half_even(0.0), 0);
        assert_eq!(round_half_even(-1.0), 0);
    }

    #[test]
    fn format_cpu() {
        assert_eq!(format_cpu_millicores(500), "500m");
        assert_eq!(format_cpu_millicores(0), "0m");
    }

    #[test]
    fn format_memory_prefers_largest_even_unit() {
        assert_eq!(format_memory_bytes(800 * 1024 * 1024), "800Mi");
        assert_eq!(format_memory_bytes(2 * 1024 * 1024 * 1024), "2Gi");
        assert_eq!(format_memory_bytes(1536), "1536"); // 1.5Ki stays in bytes
        assert_eq!(format_memory_bytes(999), "999");
    }

    #[test]
    fn format_memory_whole_kibibytes() {
        assert_eq!(format_memory_bytes(512 * 1024), "512Ki");
    }

    #[test]
    fn gold_class_ratios_round_trip() {
        // limits cpu=1000m * 0.5 -> 500m
        let cpu = parse_cpu_millicores("1000m").unwrap() * 0.5;
        assert_eq!(format_cpu_millicores(round_half_even(cpu)), "500m");

        // limits memory=1000Mi * 0.8 -> 800Mi
        let mem = parse_memory_bytes("1000Mi").unwrap() * 0.8;
        assert_eq!(format_memory_bytes(round_half_even(mem)), "800Mi");
    }
}
