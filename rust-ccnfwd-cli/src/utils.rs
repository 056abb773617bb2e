//! Output helpers for the ccnfwd CLI

use std::time::Duration;

/// Format a duration as a human-readable string
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs == 0 && duration.subsec_millis() == 0 {
        format!("{}us", duration.as_micros())
    } else if total_secs < 60 {
        format!("{}.{:03}s", total_secs, duration.subsec_millis())
    } else {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    }
}

/// Format a microsecond timestamp relative to the replay origin
pub fn format_offset_us(offset_us: u64) -> String {
    format!("{:>6}.{:03}ms", offset_us / 1_000, offset_us % 1_000)
}

/// Print a section header in the CLI output
pub fn print_header(title: &str) {
    let separator = "=".repeat(title.len());
    println!("\n{}", title);
    println!("{}", separator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_micros(250)), "250us");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.500s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn offsets() {
        assert_eq!(format_offset_us(12_345), "    12.345ms");
    }
}
