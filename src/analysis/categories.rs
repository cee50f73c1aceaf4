// CategoryMapper - static safety taxonomy over model class indices
//
// The sound-event model scores 521 AudioSet classes; only a handful matter
// for safety alerting. Three disjoint index sets map onto Critical, Warning
// and Info. Every other index maps to no category and is dropped before it
// reaches the pipeline.

use serde::{Deserialize, Serialize};

use crate::settings::SensitivityLevel;

/// Safety category of a detected sound.
///
/// "No category" is expressed as `Option::None` by the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCategory {
    /// Fire, smoke and siren classes
    Critical,
    /// Doorbell, knock and buzzer classes
    Warning,
    /// Baby cry and laughter classes
    Info,
}

impl SoundCategory {
    pub const ALL: [SoundCategory; 3] = [
        SoundCategory::Critical,
        SoundCategory::Warning,
        SoundCategory::Info,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SoundCategory::Critical => "critical",
            SoundCategory::Warning => "warning",
            SoundCategory::Info => "info",
        }
    }
}

const CRITICAL: &[(usize, &str)] = &[
    (394, "Fire alarm"),
    (390, "Siren"),
    (391, "Civil defense siren"),
    (317, "Police siren"),
    (318, "Ambulance siren"),
    (319, "Fire engine siren"),
    (393, "Smoke detector"),
    (382, "Alarm"),
];

const WARNING: &[(usize, &str)] = &[
    (349, "Doorbell"),
    (350, "Ding-dong"),
    (353, "Knock"),
    (392, "Buzzer"),
];

const INFO: &[(usize, &str)] = &[(20, "Baby cry"), (19, "Crying"), (14, "Baby laughter")];

/// Total mapping from class index to category, label and threshold.
pub struct CategoryMapper;

impl CategoryMapper {
    fn table(category: SoundCategory) -> &'static [(usize, &'static str)] {
        match category {
            SoundCategory::Critical => CRITICAL,
            SoundCategory::Warning => WARNING,
            SoundCategory::Info => INFO,
        }
    }

    fn lookup(index: usize) -> Option<(SoundCategory, &'static str)> {
        SoundCategory::ALL.iter().find_map(|&category| {
            Self::table(category)
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, label)| (category, *label))
        })
    }

    /// Category for a class index, `None` for indices outside all sets.
    pub fn category_for(index: usize) -> Option<SoundCategory> {
        Self::lookup(index).map(|(category, _)| category)
    }

    /// Human label for a class index.
    pub fn label_for(index: usize) -> String {
        match Self::lookup(index) {
            Some((_, label)) => label.to_string(),
            None => format!("Detected sound ({})", index),
        }
    }

    /// Every mapped index, Critical first.
    pub fn known_indices() -> Vec<usize> {
        SoundCategory::ALL
            .iter()
            .flat_map(|&category| Self::table(category).iter().map(|(i, _)| *i))
            .collect()
    }

    /// Indices belonging to one category.
    pub fn indices_for(category: SoundCategory) -> Vec<usize> {
        Self::table(category).iter().map(|(i, _)| *i).collect()
    }

    /// Detection threshold for a sensitivity level.
    pub fn detection_threshold(level: SensitivityLevel) -> f32 {
        match level {
            SensitivityLevel::VeryLow => 0.6,
            SensitivityLevel::Low => 0.5,
            SensitivityLevel::Medium => 0.4,
            SensitivityLevel::High => 0.3,
            SensitivityLevel::VeryHigh => 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_index_sets_are_disjoint() {
        let all = CategoryMapper::known_indices();
        let unique: HashSet<usize> = all.iter().copied().collect();
        assert_eq!(all.len(), 15);
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_known_categories() {
        assert_eq!(CategoryMapper::category_for(394), Some(SoundCategory::Critical));
        assert_eq!(CategoryMapper::category_for(382), Some(SoundCategory::Critical));
        assert_eq!(CategoryMapper::category_for(349), Some(SoundCategory::Warning));
        assert_eq!(CategoryMapper::category_for(392), Some(SoundCategory::Warning));
        assert_eq!(CategoryMapper::category_for(20), Some(SoundCategory::Info));
        assert_eq!(CategoryMapper::category_for(14), Some(SoundCategory::Info));
    }

    #[test]
    fn test_unknown_indices_have_no_category() {
        for index in [0usize, 1, 137, 395, 520, 10_000] {
            assert_eq!(CategoryMapper::category_for(index), None);
        }
        assert_eq!(CategoryMapper::label_for(0), "Detected sound (0)");
    }

    #[test]
    fn test_labels() {
        assert_eq!(CategoryMapper::label_for(394), "Fire alarm");
        assert_eq!(CategoryMapper::label_for(317), "Police siren");
        assert_eq!(CategoryMapper::label_for(353), "Knock");
        assert_eq!(CategoryMapper::label_for(20), "Baby cry");
    }

    #[test]
    fn test_indices_per_category() {
        assert_eq!(CategoryMapper::indices_for(SoundCategory::Critical).len(), 8);
        assert_eq!(CategoryMapper::indices_for(SoundCategory::Warning).len(), 4);
        assert_eq!(
            CategoryMapper::indices_for(SoundCategory::Info),
            vec![20, 19, 14]
        );
    }
}
