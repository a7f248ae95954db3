use crate::engine::averaging::{QuarterFigures, YearlyFigures};
use crate::schema::{marks, quarter_averages, yearly_averages};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = marks)]
pub struct NewMark {
    pub student_id: i64,
    pub class_id: i64,
    pub academic_quarter_id: i64,
    pub mark_type: String,
    pub mark: Option<BigDecimal>,
    pub max_mark: BigDecimal,
    // updated_at has DB default
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = marks)]
pub struct MarkRow {
    pub id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub academic_quarter_id: i64,
    pub mark_type: String,
    pub mark: Option<BigDecimal>,
    pub max_mark: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = quarter_averages)]
pub struct NewQuarterAverage {
    pub student_id: i64,
    pub academic_quarter_id: i64,
    pub grade_id: i64,
    pub assessment_average: Option<f64>,
    pub exam_average: Option<f64>,
    pub quarter_average: Option<f64>,
    pub total_coefficient: f64,
    pub computed_at: DateTime<Utc>,
}

impl NewQuarterAverage {
    pub fn from_figures(
        student_id: i64,
        academic_quarter_id: i64,
        grade_id: i64,
        figures: QuarterFigures,
    ) -> Self {
        Self {
            student_id,
            academic_quarter_id,
            grade_id,
            assessment_average: figures.assessment_average,
            exam_average: figures.exam_average,
            quarter_average: figures.quarter_average,
            total_coefficient: figures.total_coefficient,
            computed_at: Utc::now(),
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = quarter_averages)]
pub struct QuarterAverageRow {
    pub student_id: i64,
    pub academic_quarter_id: i64,
    pub grade_id: i64,
    pub assessment_average: Option<f64>,
    pub exam_average: Option<f64>,
    pub quarter_average: Option<f64>,
    pub total_coefficient: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = yearly_averages)]
pub struct NewYearlyAverage {
    pub student_id: i64,
    pub academic_year_id: i64,
    pub grade_id: i64,
    pub assessment_yearly_average: Option<f64>,
    pub exam_yearly_average: Option<f64>,
    pub final_yearly_average: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

impl NewYearlyAverage {
    pub fn from_figures(
        student_id: i64,
        academic_year_id: i64,
        grade_id: i64,
        figures: YearlyFigures,
    ) -> Self {
        Self {
            student_id,
            academic_year_id,
            grade_id,
            assessment_yearly_average: figures.assessment_yearly_average,
            exam_yearly_average: figures.exam_yearly_average,
            final_yearly_average: figures.final_yearly_average,
            computed_at: Utc::now(),
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = yearly_averages)]
pub struct YearlyAverageRow {
    pub student_id: i64,
    pub academic_year_id: i64,
    pub grade_id: i64,
    pub assessment_yearly_average: Option<f64>,
    pub exam_yearly_average: Option<f64>,
    pub final_yearly_average: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MarkChangeResponse {
    /// The stored mark, `None` after a removal.
    pub mark: Option<MarkRow>,
    pub quarter_average: QuarterAverageRow,
    pub yearly_average: YearlyAverageRow,
}
