use crate::normalization::NormalizedRow;

pub const DEFAULT_LOOK_BACK: usize = 24;

/// `look_back` consecutive hours of features and the following hour's scaled price.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingWindow {
    pub features: Vec<[f64; 8]>,
    pub target: f64,
}

/// Slides a `look_back`-row window over `rows`; windows touching a missing price are skipped.
pub fn build_windows(rows: &[NormalizedRow], look_back: usize) -> Vec<TrainingWindow> {
    if look_back == 0 || rows.len() <= look_back {
        return Vec::new();
    }

    (0..rows.len() - look_back)
        .filter_map(|start| {
            let target = rows[start + look_back].price?;
            let features = rows[start..start + look_back]
                .iter()
                .map(NormalizedRow::features)
                .collect::<Option<Vec<_>>>()?;
            Some(TrainingWindow { features, target })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(price: Option<f64>) -> NormalizedRow {
        NormalizedRow {
            price,
            hour_sin: 0.0,
            hour_cos: 1.0,
            day_of_week_sin: 0.0,
            day_of_week_cos: 1.0,
            day_of_month: 1,
            month: 1,
            year: 2024,
        }
    }

    #[test]
    fn counts_windows() {
        let rows: Vec<_> = (0..30).map(|i| row(Some(i as f64 / 30.0))).collect();
        let windows = build_windows(&rows, 24);
        assert_eq!(windows.len(), 6);
        assert_eq!(windows[0].features.len(), 24);
        assert_eq!(windows[0].target, 24.0 / 30.0);
        assert_eq!(windows[5].features[0][0], 5.0 / 30.0);
    }

    #[test]
    fn skips_windows_with_missing_prices() {
        let mut rows: Vec<_> = (0..5).map(|i| row(Some(i as f64))).collect();
        rows[0].price = None;
        let windows = build_windows(&rows, 2);
        // starts 0 (feature gap) dropped; starts 1 and 2 kept
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].target, 3.0);
    }

    #[test]
    fn too_short_input_yields_nothing() {
        let rows: Vec<_> = (0..24).map(|_| row(Some(0.5))).collect();
        assert!(build_windows(&rows, 24).is_empty());
        assert!(build_windows(&rows, 0).is_empty());
    }
}
