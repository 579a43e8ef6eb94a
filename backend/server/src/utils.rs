use posts::{FeedbackAction, FeedbackError, FeedbackKind, normalize_email};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;

/// `action` arrives either as `"Add"` / `"Remove"` or as `1` / `-1`.
/// Anything else is kept so it can be reported as an invalid action.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawAction {
    Number(i64),
    Text(String),
    Other(Value),
}

/// `feedbackType` and `action` are optional at the serde level so that a
/// missing or mistyped value is reported with its own error code.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPayload {
    pub id: u64,
    #[serde(default)]
    pub feedback_type: Option<Value>,
    pub email: String,
    #[serde(default)]
    pub action: Option<RawAction>,
}

impl FeedbackPayload {
    pub fn parse(&self) -> Result<(FeedbackKind, FeedbackAction), FeedbackError> {
        let kind = match &self.feedback_type {
            Some(Value::String(text)) => text.parse::<FeedbackKind>()?,
            Some(other) => return Err(FeedbackError::InvalidFeedbackType(other.to_string())),
            None => return Err(FeedbackError::InvalidFeedbackType("missing".to_string())),
        };

        let action = match &self.action {
            Some(RawAction::Number(n)) => n.to_string().parse::<FeedbackAction>()?,
            Some(RawAction::Text(text)) => text.parse::<FeedbackAction>()?,
            Some(RawAction::Other(other)) => {
                return Err(FeedbackError::InvalidAction(other.to_string()));
            }
            None => return Err(FeedbackError::InvalidAction("missing".to_string())),
        };

        Ok((kind, action))
    }
}

/// Every handler keys users through this, so `A@B.C` and `a@b.c` are one user.
pub fn require_email(email: &str) -> Result<String, AppError> {
    let email = normalize_email(email);

    if email.is_empty() || !email.contains('@') {
        return Err(AppError::MalformedPayload(format!(
            "not an email address: {email:?}"
        )));
    }

    Ok(email)
}
