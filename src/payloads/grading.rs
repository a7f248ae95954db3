use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

fn default_max_mark() -> BigDecimal {
    BigDecimal::from(20)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpsertMarkPayload {
    pub requester_id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub academic_quarter_id: i64,
    pub mark_type: String,
    pub mark: Option<BigDecimal>,
    #[serde(default = "default_max_mark")]
    pub max_mark: BigDecimal,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RemoveMarkPayload {
    pub requester_id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub academic_quarter_id: i64,
    pub mark_type: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GetStudentMarksParams {
    pub requester_id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub academic_quarter_id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RecomputeQuarterAveragePayload {
    pub requester_id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub academic_quarter_id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RecomputeYearlyAveragePayload {
    pub requester_id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub academic_year_id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GetQuarterAverageParams {
    pub requester_id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub academic_quarter_id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GetYearlyAverageParams {
    pub requester_id: i64,
    pub school_id: i64,
    pub student_id: i64,
    pub academic_year_id: i64,
}
