//! Quarter and yearly grade averaging.
//!
//! Marks are normalized to a 20-point scale, averaged per mark type with class
//! coefficients as weights, then combined into a single figure using the
//! configured assessment weight. Everything here is pure; loading rows and
//! persisting the aggregates is done by the API layer.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Scale every mark is normalized to before weighting.
pub const NORMALIZED_SCALE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkType {
    Assessment,
    Exam,
}

impl MarkType {
    pub const ALL: [MarkType; 2] = [MarkType::Assessment, MarkType::Exam];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkType::Assessment => "assessment",
            MarkType::Exam => "exam",
        }
    }
}

impl fmt::Display for MarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assessment" => Ok(MarkType::Assessment),
            "exam" => Ok(MarkType::Exam),
            other => Err(format!(
                "Unknown mark type '{}', expected 'assessment' or 'exam'",
                other
            )),
        }
    }
}

/// What a class without a usable mark contributes to a weighted mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MissingMarkPolicy {
    /// The class is left out of the weighted sum entirely.
    #[default]
    Exclude,
    /// The class counts as 0 with its full coefficient, once the quarter has any mark.
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragingPolicy {
    /// Share of the assessment average, the exam average gets `1 - assessment_weight`.
    pub assessment_weight: f64,
    pub missing_marks: MissingMarkPolicy,
}

impl Default for AveragingPolicy {
    fn default() -> Self {
        Self {
            assessment_weight: 0.5,
            missing_marks: MissingMarkPolicy::Exclude,
        }
    }
}

impl AveragingPolicy {
    pub fn new(assessment_weight: f64, missing_marks: MissingMarkPolicy) -> anyhow::Result<Self> {
        if !assessment_weight.is_finite() || !(0.0..=1.0).contains(&assessment_weight) {
            bail!(
                "Assessment weight must be within [0, 1], got {}",
                assessment_weight
            );
        }
        Ok(Self {
            assessment_weight,
            missing_marks,
        })
    }

    /// Combines the two per-type averages. A side without data is not zero-filled,
    /// the other side is used alone.
    pub fn combine(&self, assessment: Option<f64>, exam: Option<f64>) -> Option<f64> {
        match (assessment, exam) {
            (Some(a), Some(e)) => {
                Some(self.assessment_weight * a + (1.0 - self.assessment_weight) * e)
            }
            (Some(a), None) => Some(a),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        }
    }
}

/// One stored mark joined to its class coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkInput {
    pub mark_id: i64,
    pub class_id: i64,
    pub mark_type: MarkType,
    pub mark: Option<f64>,
    pub max_mark: f64,
    pub coefficient: f64,
}

/// A class taught in the student's grade. Only consulted under [`MissingMarkPolicy::Zero`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeClass {
    pub class_id: i64,
    pub coefficient: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuarterFigures {
    pub assessment_average: Option<f64>,
    pub exam_average: Option<f64>,
    pub quarter_average: Option<f64>,
    pub total_coefficient: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct YearlyFigures {
    pub assessment_yearly_average: Option<f64>,
    pub exam_yearly_average: Option<f64>,
    pub final_yearly_average: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Contribution {
    normalized: f64,
    coefficient: f64,
}

fn normalize(input: &MarkInput) -> Result<Option<f64>, &'static str> {
    let Some(mark) = input.mark else {
        return Ok(None);
    };
    if !input.max_mark.is_finite() || input.max_mark <= 0.0 {
        return Err("max_mark is not positive");
    }
    if !mark.is_finite() || mark < 0.0 || mark > input.max_mark {
        return Err("mark is outside [0, max_mark]");
    }
    if !input.coefficient.is_finite() || input.coefficient < 0.0 {
        return Err("class coefficient is negative");
    }
    Ok(Some(mark * NORMALIZED_SCALE / input.max_mark))
}

fn weighted_mean(contributions: &BTreeMap<i64, Contribution>) -> Option<f64> {
    let total_weight: f64 = contributions.values().map(|c| c.coefficient).sum();
    if total_weight <= 0.0 {
        if !contributions.is_empty() {
            warn!(
                "{} contributing classes all have a zero coefficient, average left empty",
                contributions.len()
            );
        }
        return None;
    }
    let weighted: f64 = contributions
        .values()
        .map(|c| c.normalized * c.coefficient)
        .sum();
    Some(weighted / total_weight)
}

/// Computes a student's quarter aggregate from their marks in that quarter.
///
/// Marks with a non-positive `max_mark`, an out-of-range value or a negative
/// coefficient are skipped with a warning. A quarter without any usable mark
/// yields empty averages and a zero total coefficient.
pub fn compute_quarter(
    marks: &[MarkInput],
    grade_classes: &[GradeClass],
    policy: &AveragingPolicy,
) -> QuarterFigures {
    let mut usable: BTreeMap<MarkType, BTreeMap<i64, Contribution>> = BTreeMap::new();
    let mut malformed: HashSet<(MarkType, i64)> = HashSet::new();

    for input in marks {
        match normalize(input) {
            Ok(Some(normalized)) => {
                let previous = usable.entry(input.mark_type).or_default().insert(
                    input.class_id,
                    Contribution {
                        normalized,
                        coefficient: input.coefficient,
                    },
                );
                if previous.is_some() {
                    warn!(
                        "Duplicate {} mark for class {}, keeping mark {}",
                        input.mark_type, input.class_id, input.mark_id
                    );
                }
            }
            Ok(None) => {
                debug!(
                    "Mark {} for class {} has no value, treated as missing",
                    input.mark_id, input.class_id
                );
            }
            Err(problem) => {
                warn!(
                    "Skipping malformed mark {} (class {}, {}): {}",
                    input.mark_id, input.class_id, input.mark_type, problem
                );
                malformed.insert((input.mark_type, input.class_id));
            }
        }
    }

    if usable.values().all(BTreeMap::is_empty) {
        debug!("No usable marks in quarter, aggregate left empty");
        return QuarterFigures::default();
    }

    if policy.missing_marks == MissingMarkPolicy::Zero {
        for mark_type in MarkType::ALL {
            let per_class = usable.entry(mark_type).or_default();
            for class in grade_classes {
                if per_class.contains_key(&class.class_id)
                    || malformed.contains(&(mark_type, class.class_id))
                {
                    continue;
                }
                debug!(
                    "Class {} has no {} mark, counted as zero",
                    class.class_id, mark_type
                );
                per_class.insert(
                    class.class_id,
                    Contribution {
                        normalized: 0.0,
                        coefficient: class.coefficient.max(0.0),
                    },
                );
            }
        }
    }

    let assessment_average = usable
        .get(&MarkType::Assessment)
        .and_then(weighted_mean);
    let exam_average = usable.get(&MarkType::Exam).and_then(weighted_mean);

    let mut coefficients: BTreeMap<i64, f64> = BTreeMap::new();
    for per_class in usable.values() {
        for (class_id, contribution) in per_class {
            coefficients.insert(*class_id, contribution.coefficient);
        }
    }

    QuarterFigures {
        assessment_average,
        exam_average,
        quarter_average: policy.combine(assessment_average, exam_average),
        total_coefficient: coefficients.values().sum(),
    }
}

fn mean_of_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let present: Vec<f64> = values.flatten().filter(|v| v.is_finite()).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// Folds a student's quarter aggregates of one academic year into the yearly figures.
/// Quarters without a value for a side are left out of that side's mean.
pub fn compute_yearly(quarters: &[QuarterFigures], policy: &AveragingPolicy) -> YearlyFigures {
    let assessment_yearly_average = mean_of_present(quarters.iter().map(|q| q.assessment_average));
    let exam_yearly_average = mean_of_present(quarters.iter().map(|q| q.exam_average));

    YearlyFigures {
        assessment_yearly_average,
        exam_yearly_average,
        final_yearly_average: policy.combine(assessment_yearly_average, exam_yearly_average),
    }
}
