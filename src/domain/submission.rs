use crate::domain::models::{
    HazardLevel, ImageRefs, ReportDetails, ReportItem, ReportKind, ReportStatus, UserProfile, ViolationSeverity,
};
use chrono::NaiveDate;
use serde::Deserialize;

const UNKNOWN_LOCATION: &str = "未提供";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("请填写{0}")]
    MissingField(&'static str),
    #[error("最多上传4张照片，当前{0}张")]
    TooManyImages(usize),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HazardForm {
    #[serde(default = "default_level")]
    pub level: HazardLevel,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    pub location: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub responsible_person: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

fn default_level() -> HazardLevel {
    HazardLevel::General
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViolationForm {
    #[serde(default = "default_severity")]
    pub severity: ViolationSeverity,
    #[serde(default)]
    pub violator: String,
    pub unit: Option<String>,
    #[serde(default)]
    pub description: String,
    pub location: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

fn default_severity() -> ViolationSeverity {
    ViolationSeverity::General
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackForm {
    #[serde(default)]
    pub hazard_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum SubmissionForm {
    Hazard(HazardForm),
    Violation(ViolationForm),
    Feedback(FeedbackForm),
}

/// A form that passed the local checks. Building prompts and items from
/// it has no side effects.
#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    description: String,
    unit: Option<String>,
    images: ImageRefs,
    details: ReportDetails,
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn images(raw: Vec<String>) -> Result<ImageRefs, ValidationError> {
    let count = raw.len();
    ImageRefs::try_from(raw).map_err(|_| ValidationError::TooManyImages(count))
}

impl SubmissionForm {
    pub fn kind(&self) -> ReportKind {
        match self {
            SubmissionForm::Hazard(_) => ReportKind::Hazard,
            SubmissionForm::Violation(_) => ReportKind::Violation,
            SubmissionForm::Feedback(_) => ReportKind::Feedback,
        }
    }

    pub fn validate(self) -> Result<ValidatedSubmission, ValidationError> {
        match self {
            SubmissionForm::Hazard(form) => {
                let description = required(&form.description, "隐患描述")?;
                let unit = required(&form.unit, "责任单位")?;
                Ok(ValidatedSubmission {
                    description,
                    unit: Some(unit),
                    images: images(form.images)?,
                    details: ReportDetails::Hazard {
                        level: form.level,
                        location: optional(form.location).unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
                        deadline: form.deadline,
                        responsible_person: optional(form.responsible_person),
                    },
                })
            }
            SubmissionForm::Violation(form) => {
                let description = required(&form.description, "行为描述")?;
                let violator = required(&form.violator, "违章人员")?;
                Ok(ValidatedSubmission {
                    description,
                    unit: optional(form.unit),
                    images: images(form.images)?,
                    details: ReportDetails::Violation {
                        violator,
                        severity: form.severity,
                        location: optional(form.location).unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
                    },
                })
            }
            SubmissionForm::Feedback(form) => {
                let hazard_id = required(&form.hazard_id, "隐患单编号")?;
                let description = required(&form.content, "反馈说明")?;
                Ok(ValidatedSubmission {
                    description,
                    unit: None,
                    images: images(form.images)?,
                    details: ReportDetails::Feedback { hazard_id },
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftPrompt {
    pub kind: ReportKind,
    pub system: &'static str,
    pub user: String,
}

const HAZARD_SYSTEM_PROMPT: &str = "你是一个专业的矿山安全专家，请根据描述撰写整改通知书。";

const VIOLATION_SYSTEM_PROMPT: &str = "你是一个矿山安全监察官员。请根据用户提供的违章行为描述，撰写一份正式的《违章行为处理建议书》。内容需包含：违章性质认定（依据矿山安全规程）、潜在安全威胁、建议处理意见（如警告、罚款、停工培训等）。语言要威严、公正。";

impl ValidatedSubmission {
    /// Hazard ids referenced by feedback items.
    pub fn referenced_hazard(&self) -> Option<&str> {
        match &self.details {
            ReportDetails::Feedback { hazard_id } => Some(hazard_id),
            _ => None,
        }
    }

    /// Natural-language prompt for the notice draft; feedback has none.
    pub fn prompt(&self, reporter: &UserProfile) -> Option<DraftPrompt> {
        let unit = self.unit.as_deref().unwrap_or(&reporter.unit);
        match &self.details {
            ReportDetails::Hazard { level, location, .. } => Some(DraftPrompt {
                kind: ReportKind::Hazard,
                system: HAZARD_SYSTEM_PROMPT,
                user: format!(
                    "隐患级别：{}\n责任单位：{}\n描述：{}\n地点：{}",
                    level.label(),
                    unit,
                    self.description,
                    location
                ),
            }),
            ReportDetails::Violation { violator, severity, location } => Some(DraftPrompt {
                kind: ReportKind::Violation,
                system: VIOLATION_SYSTEM_PROMPT,
                user: format!(
                    "违章类型：{}\n违章人员：{}\n所属单位：{}\n行为描述：{}\n地点：{}",
                    severity.label(),
                    violator,
                    unit,
                    self.description,
                    location
                ),
            }),
            ReportDetails::Feedback { .. } => None,
        }
    }

    pub fn into_item(self, id: String, created_at: i64, reporter: &UserProfile, draft: Option<String>) -> ReportItem {
        ReportItem {
            id,
            status: ReportStatus::Pending,
            created_at,
            reporter: reporter.display_name.clone(),
            unit: self.unit.unwrap_or_else(|| reporter.unit.clone()),
            description: self.description,
            images: self.images,
            draft,
            completed: false,
            details: self.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::UserRole;
    use uuid::Uuid;

    fn reporter() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            email: "worker@pakrut.com".into(),
            display_name: "赵六".into(),
            unit: "冶炼厂".into(),
            role: UserRole::Worker,
        }
    }

    fn hazard(unit: &str, description: &str) -> SubmissionForm {
        SubmissionForm::Hazard(HazardForm {
            level: HazardLevel::Major,
            unit: unit.into(),
            description: description.into(),
            location: None,
            deadline: None,
            responsible_person: Some("  ".into()),
            images: vec![],
        })
    }

    #[test]
    fn hazard_needs_description_and_unit() {
        assert_eq!(hazard("采矿厂", " ").validate().unwrap_err(), ValidationError::MissingField("隐患描述"));
        assert_eq!(hazard("", "电线裸露").validate().unwrap_err(), ValidationError::MissingField("责任单位"));
        assert!(hazard("采矿厂", "电线裸露").validate().is_ok());
    }

    #[test]
    fn violation_needs_violator() {
        let form = SubmissionForm::Violation(ViolationForm {
            severity: ViolationSeverity::General,
            violator: String::new(),
            unit: None,
            description: "未戴安全帽".into(),
            location: None,
            images: vec![],
        });
        assert_eq!(form.validate().unwrap_err(), ValidationError::MissingField("违章人员"));
    }

    #[test]
    fn too_many_images_is_a_validation_error() {
        let form = SubmissionForm::Feedback(FeedbackForm {
            hazard_id: "2026-001".into(),
            content: "已更换".into(),
            images: (0..5).map(|i| format!("blob:{i}")).collect(),
        });
        assert_eq!(form.validate().unwrap_err(), ValidationError::TooManyImages(5));
    }

    #[test]
    fn prompt_carries_structured_fields() {
        let validated = hazard("采矿厂", "灭火器过期").validate().unwrap();
        let prompt = validated.prompt(&reporter()).unwrap();
        assert_eq!(prompt.kind, ReportKind::Hazard);
        assert!(prompt.user.contains("隐患级别：重大"));
        assert!(prompt.user.contains("责任单位：采矿厂"));
        assert!(prompt.user.contains("地点：未提供"));
        // Pure: asking twice gives the same prompt.
        assert_eq!(validated.prompt(&reporter()), Some(prompt));
    }

    #[test]
    fn feedback_has_no_prompt_and_defaults_unit_to_reporter() {
        let validated = SubmissionForm::Feedback(FeedbackForm {
            hazard_id: "2026-001".into(),
            content: "已整改完毕".into(),
            images: vec![],
        })
        .validate()
        .unwrap();
        let who = reporter();
        assert!(validated.prompt(&who).is_none());
        assert_eq!(validated.referenced_hazard(), Some("2026-001"));

        let item = validated.into_item("2026-003".into(), 1_767_225_600_000, &who, None);
        assert_eq!(item.status, ReportStatus::Pending);
        assert_eq!(item.unit, "冶炼厂");
        assert_eq!(item.reporter, "赵六");
        assert_eq!(item.kind(), ReportKind::Feedback);
    }

    #[test]
    fn blank_optional_fields_are_dropped() {
        let item = hazard("采矿厂", "电线裸露")
            .validate()
            .unwrap()
            .into_item("2026-001".into(), 0, &reporter(), Some("通知书".into()));
        match item.details {
            ReportDetails::Hazard { responsible_person, .. } => assert!(responsible_person.is_none()),
            other => panic!("unexpected details {other:?}"),
        }
        assert_eq!(item.draft.as_deref(), Some("通知书"));
    }
}
