//! Request validation. Each field check returns the cleaned value or a
//! message; the per-request functions collect every failing field into one
//! `AppError::Validation`.

use mundap_crypto::keys::normalize_invite_code;
use mundap_crypto::normalize_phone;
use mundap_db::models::NewQuestion;
use mundap_types::api::{
    CreateQuestionRequest, FieldError, LoginRequest, RegisterRequest, UpdateProfileRequest,
    UpdateQuestionRequest,
};
use mundap_types::models::Role;

use crate::error::AppError;

pub const NAME_MAX: usize = 20;
pub const ANSWER_MAX: usize = 1000;
pub const QUESTION_MIN: usize = 5;
pub const QUESTION_MAX: usize = 500;
pub const CATEGORY_MAX: usize = 30;
pub const SEARCH_MAX: usize = 50;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

type Check<T> = Result<T, String>;

#[derive(Default)]
struct Collector {
    errors: Vec<FieldError>,
}

impl Collector {
    fn check<T>(&mut self, field: &str, result: Check<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(message) => {
                self.errors.push(FieldError {
                    field: field.to_string(),
                    message,
                });
                None
            }
        }
    }

    fn into_error(self) -> AppError {
        AppError::Validation {
            message: "Validation failed".to_string(),
            details: self.errors,
        }
    }
}

fn trimmed_len(raw: &str, field: &str, min: usize, max: usize) -> Check<String> {
    let value = raw.trim();
    let len = value.chars().count();
    if len < min {
        if min == 1 {
            return Err(format!("{field} is required"));
        }
        return Err(format!("{field} must be at least {min} characters"));
    }
    if len > max {
        return Err(format!("{field} must be at most {max} characters"));
    }
    Ok(value.to_string())
}

pub fn name(raw: &str) -> Check<String> {
    trimmed_len(raw, "Name", 1, NAME_MAX)
}

pub fn role(raw: &str) -> Check<Role> {
    raw.trim()
        .parse()
        .map_err(|_| "Role must be either parent or child".to_string())
}

/// Canonical phone number.
pub fn phone(raw: &str) -> Check<String> {
    normalize_phone(raw).map_err(|_| "Invalid phone number format".to_string())
}

pub fn invite_code(raw: &str) -> Check<String> {
    normalize_invite_code(raw).ok_or_else(|| "Invite code must be 8 characters".to_string())
}

pub fn answer_content(raw: &str) -> Check<String> {
    trimmed_len(raw, "Answer", 1, ANSWER_MAX)
}

pub fn question_content(raw: &str) -> Check<String> {
    trimmed_len(raw, "Question", QUESTION_MIN, QUESTION_MAX)
}

pub fn category(raw: &str) -> Check<String> {
    let value = raw.trim();
    if value.is_empty()
        || value.len() > CATEGORY_MAX
        || !value.bytes().all(|b| b.is_ascii_lowercase() || b == b'_')
    {
        return Err(format!(
            "Category must be 1-{CATEGORY_MAX} lowercase letters or underscores"
        ));
    }
    Ok(value.to_string())
}

pub fn search_term(raw: Option<&str>) -> Check<String> {
    trimmed_len(raw.unwrap_or_default(), "Search term", 1, SEARCH_MAX)
}

pub fn emoji(raw: &str) -> Check<String> {
    let value = raw.trim();
    match emojis::get(value) {
        Some(emoji) => Ok(emoji.as_str().to_string()),
        None => Err("Emoji must be a single valid emoji".to_string()),
    }
}

fn order_num(value: Option<i64>) -> Check<Option<i64>> {
    match value {
        Some(n) if n < 0 => Err("Order must not be negative".to_string()),
        other => Ok(other),
    }
}

#[derive(Debug)]
pub struct Registration {
    pub name: String,
    pub role: Role,
    pub phone: String,
    pub invite_code: Option<String>,
}

pub fn registration(req: &RegisterRequest) -> Result<Registration, AppError> {
    let mut c = Collector::default();
    let name = c.check("name", name(&req.name));
    let role = c.check("role", role(&req.role));
    let phone = c.check("phone", phone(&req.phone));
    let invite_code = match req.invite_code.as_deref().map(str::trim) {
        None | Some("") => Some(None),
        Some(code) => c.check("invite_code", invite_code(code)).map(Some),
    };

    match (name, role, phone, invite_code) {
        (Some(name), Some(role), Some(phone), Some(invite_code)) => Ok(Registration {
            name,
            role,
            phone,
            invite_code,
        }),
        _ => Err(c.into_error()),
    }
}

/// `(phone, name)`.
pub fn login(req: &LoginRequest) -> Result<(String, String), AppError> {
    let mut c = Collector::default();
    let phone = c.check("phone", phone(&req.phone));
    let name = c.check("name", name(&req.name));
    match (phone, name) {
        (Some(phone), Some(name)) => Ok((phone, name)),
        _ => Err(c.into_error()),
    }
}

#[derive(Debug)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
}

pub fn profile_update(req: &UpdateProfileRequest) -> Result<ProfileUpdate, AppError> {
    if req.name.is_none() && req.phone.is_none() {
        return Err(AppError::bad_request("Nothing to update"));
    }

    let mut c = Collector::default();
    let name = req.name.as_deref().map(|raw| c.check("name", name(raw)));
    let phone = req.phone.as_deref().map(|raw| c.check("phone", phone(raw)));
    if !c.errors.is_empty() {
        return Err(c.into_error());
    }

    Ok(ProfileUpdate {
        name: name.flatten(),
        phone: phone.flatten(),
    })
}

pub fn new_question(req: &CreateQuestionRequest) -> Result<NewQuestion, AppError> {
    let mut c = Collector::default();
    let content = c.check("content", question_content(&req.content));
    let category = c.check("category", category(&req.category));
    let order_num = c.check("order_num", order_num(req.order_num));

    match (content, category, order_num) {
        (Some(content), Some(category), Some(order_num)) => Ok(NewQuestion {
            content,
            category,
            order_num,
        }),
        _ => Err(c.into_error()),
    }
}

#[derive(Debug)]
pub struct QuestionChanges {
    pub content: Option<String>,
    pub category: Option<String>,
    pub order_num: Option<i64>,
    pub is_active: Option<bool>,
}

pub fn question_update(req: &UpdateQuestionRequest) -> Result<QuestionChanges, AppError> {
    let mut c = Collector::default();
    let content = req.content.as_deref().map(|raw| c.check("content", question_content(raw)));
    let category = req.category.as_deref().map(|raw| c.check("category", category(raw)));
    let order_num = c.check("order_num", order_num(req.order_num));
    if !c.errors.is_empty() {
        return Err(c.into_error());
    }

    Ok(QuestionChanges {
        content: content.flatten(),
        category: category.flatten(),
        order_num: order_num.flatten(),
        is_active: req.is_active,
    })
}

/// `(page, limit)` with defaults applied.
pub fn pagination(page: Option<u32>, limit: Option<u32>) -> Result<(u32, u32), AppError> {
    let mut c = Collector::default();
    let page = c.check(
        "page",
        match page.unwrap_or(1) {
            0 => Err("Page must be at least 1".to_string()),
            n => Ok(n),
        },
    );
    let limit = c.check(
        "limit",
        match limit.unwrap_or(DEFAULT_LIMIT) {
            n if (1..=MAX_LIMIT).contains(&n) => Ok(n),
            _ => Err(format!("Limit must be between 1 and {MAX_LIMIT}")),
        },
    );

    match (page, limit) {
        (Some(page), Some(limit)) => Ok((page, limit)),
        _ => Err(c.into_error()),
    }
}

/// SQL `(limit, offset)` for a validated page.
pub fn window(page: u32, limit: u32) -> (i64, i64) {
    let limit = i64::from(limit);
    (limit, (i64::from(page) - 1) * limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(err: AppError) -> Vec<String> {
        match err {
            AppError::Validation { details, .. } => details.into_iter().map(|d| d.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn name_is_trimmed_and_bounded() {
        assert_eq!(name("  김엄마 ").unwrap(), "김엄마");
        assert!(name("   ").is_err());
        assert!(name(&"가".repeat(20)).is_ok());
        assert!(name(&"가".repeat(21)).is_err());
    }

    #[test]
    fn registration_reports_every_bad_field() {
        let req = RegisterRequest {
            name: String::new(),
            role: "grandparent".into(),
            phone: "12345".into(),
            invite_code: Some("bad".into()),
        };
        let fields = details(registration(&req).unwrap_err());
        assert_eq!(fields, vec!["name", "role", "phone", "invite_code"]);
    }

    #[test]
    fn registration_accepts_lowercase_code() {
        let req = RegisterRequest {
            name: "민지".into(),
            role: "child".into(),
            phone: "010-1234-5678".into(),
            invite_code: Some("abcd2345".into()),
        };
        let reg = registration(&req).unwrap();
        assert_eq!(reg.role, Role::Child);
        assert_eq!(reg.phone, "+821012345678");
        assert_eq!(reg.invite_code.as_deref(), Some("ABCD2345"));
    }

    #[test]
    fn blank_invite_code_means_none() {
        let req = RegisterRequest {
            name: "민지".into(),
            role: "child".into(),
            phone: "01012345678".into(),
            invite_code: Some("  ".into()),
        };
        assert!(registration(&req).unwrap().invite_code.is_none());
    }

    #[test]
    fn answer_length_limits() {
        assert!(answer_content("").is_err());
        assert!(answer_content(&"a".repeat(1000)).is_ok());
        assert!(answer_content(&"a".repeat(1001)).is_err());
    }

    #[test]
    fn category_slug() {
        assert!(category("family_time").is_ok());
        assert!(category("Family").is_err());
        assert!(category("a-b").is_err());
        assert!(category(&"a".repeat(31)).is_err());
    }

    #[test]
    fn emoji_must_be_known() {
        assert_eq!(emoji("❤️").unwrap(), "❤️");
        assert!(emoji("😂").is_ok());
        assert!(emoji("ok").is_err());
        assert!(emoji("😂😂").is_err());
    }

    #[test]
    fn pagination_defaults_and_bounds() {
        assert_eq!(pagination(None, None).unwrap(), (1, 20));
        assert_eq!(window(3, 20), (20, 40));
        assert_eq!(details(pagination(Some(0), Some(101)).unwrap_err()), vec!["page", "limit"]);
    }

    #[test]
    fn profile_update_needs_a_field() {
        let req = UpdateProfileRequest {
            name: None,
            phone: None,
        };
        assert!(profile_update(&req).is_err());

        let req = UpdateProfileRequest {
            name: Some("  ".into()),
            phone: Some("010-1234-5678".into()),
        };
        assert_eq!(details(profile_update(&req).unwrap_err()), vec!["name"]);
    }

    #[test]
    fn question_update_checks_only_given_fields() {
        let req = UpdateQuestionRequest {
            content: Some("짧".into()),
            category: None,
            order_num: Some(-1),
            is_active: None,
        };
        assert_eq!(details(question_update(&req).unwrap_err()), vec!["content", "order_num"]);

        let req = UpdateQuestionRequest {
            content: None,
            category: Some("memories".into()),
            order_num: None,
            is_active: Some(false),
        };
        let changes = question_update(&req).unwrap();
        assert_eq!(changes.category.as_deref(), Some("memories"));
        assert_eq!(changes.is_active, Some(false));
    }
}
