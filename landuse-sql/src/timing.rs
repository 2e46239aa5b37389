//! Durées lisibles pour les logs d'étapes

use std::time::Duration;

/// Formate une durée (`12.3 seconds`, `2 minutes and 5.0 seconds`...)
///
/// Les secondes gardent une décimale, les unités supérieures sont entières.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64();
    let days = (total / 86_400.0).floor();
    let mut rest = total - days * 86_400.0;
    let hours = (rest / 3_600.0).floor();
    rest -= hours * 3_600.0;
    let minutes = (rest / 60.0).floor();
    rest -= minutes * 60.0;
    let seconds = (rest * 10.0).round() / 10.0;

    if total < 60.0 {
        format!("{:.1} seconds", seconds)
    } else if total < 3_600.0 {
        format!("{} minutes and {:.1} seconds", minutes, seconds)
    } else if total < 86_400.0 {
        format!("{} hours and {} minutes and {:.1} seconds", hours, minutes, seconds)
    } else {
        format!(
            "{} days, {} hours and {} minutes and {:.1} seconds",
            days, hours, minutes, seconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds() {
        assert_eq!(format_elapsed(Duration::from_millis(12_340)), "12.3 seconds");
        assert_eq!(format_elapsed(Duration::ZERO), "0.0 seconds");
    }

    #[test]
    fn test_minutes() {
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2 minutes and 5.0 seconds");
    }

    #[test]
    fn test_hours_and_days() {
        assert_eq!(
            format_elapsed(Duration::from_secs(3_600 + 61)),
            "1 hours and 1 minutes and 1.0 seconds"
        );
        assert_eq!(
            format_elapsed(Duration::from_secs(86_400 + 7_200 + 180 + 4)),
            "1 days, 2 hours and 3 minutes and 4.0 seconds"
        );
    }
}
