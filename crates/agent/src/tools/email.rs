use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use callsight_core::domain::tool::{ToolClass, ToolError};

use super::{typed_input, Tool};

/// Suggests a follow-up email. The core only acknowledges it; delivery is
/// left to whoever renders the activity feed.
#[derive(Debug, Default)]
pub struct SendEmailTool;

#[derive(Deserialize)]
struct EmailDraft {
    subject: String,
    body: String,
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &'static str {
        "send_email"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Mutation
    }

    fn description(&self) -> &'static str {
        "Draft a follow-up email when the agent promises to send details after the call."
    }

    fn input_hint(&self) -> Value {
        json!({"subject": "Your password reset", "body": "Here are the steps we discussed"})
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        let draft: EmailDraft = typed_input(self.name(), input)?;
        if draft.subject.trim().is_empty() || draft.body.trim().is_empty() {
            return Err(ToolError::Validation(
                "send_email: subject and body are required".to_string(),
            ));
        }

        Ok(json!({
            "status": "queued",
            "subject": draft.subject.trim(),
            "message": "Email will be sent shortly",
        }))
    }
}
