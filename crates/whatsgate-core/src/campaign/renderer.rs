//! Message Renderer - Personalises campaign content per recipient

use regex::{Captures, Regex};
use serde_json::Value;
use whatsgate_common::types::VariableMode;
use whatsgate_common::{Error, Result};
use whatsgate_storage::models::{CampaignRecipient, Template};

/// Renders template parameters and free text for campaign recipients
pub struct MessageRenderer {
    placeholder: Regex,
}

impl MessageRenderer {
    /// Create a new renderer
    pub fn new() -> Result<Self> {
        let placeholder = Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}")
            .map_err(|e| Error::Internal(format!("Invalid placeholder pattern: {}", e)))?;
        Ok(Self { placeholder })
    }

    /// Positional body parameters for a template send.
    ///
    /// Common mode uses the campaign's variables for everyone. Unique mode
    /// reads the recipient's data: a JSON array is taken as is, an object is
    /// read in the template's declared variable order (or by `"1"`, `"2"`, ...
    /// when the template declares none). A placeholder the recipient has no
    /// value for is a validation error.
    pub fn template_params(
        &self,
        mode: VariableMode,
        common: &[String],
        template: &Template,
        recipient: &CampaignRecipient,
    ) -> Result<Vec<String>> {
        if mode == VariableMode::Common {
            return Ok(common.to_vec());
        }

        let expected = template.placeholder_count();
        match &recipient.data {
            Value::Array(values) => {
                if values.len() < expected {
                    return Err(Error::Validation(format!(
                        "recipient data has {} values, template `{}` needs {}",
                        values.len(),
                        template.name,
                        expected
                    )));
                }
                Ok(values.iter().map(value_text).collect())
            }
            data => {
                let mut names = template.variables_vec();
                if names.is_empty() {
                    names = (1..=expected).map(|n| n.to_string()).collect();
                }
                names
                    .iter()
                    .map(|name| {
                        lookup(data, name, recipient).ok_or_else(|| {
                            Error::Validation(format!(
                                "recipient data has no value for template variable `{}`",
                                name
                            ))
                        })
                    })
                    .collect()
            }
        }
    }

    /// Substitute `{{key}}` from the recipient's data plus `{{name}}` and
    /// `{{phone}}`; placeholders with no value are removed
    pub fn render_text(&self, body: &str, recipient: &CampaignRecipient) -> String {
        self.placeholder
            .replace_all(body, |caps: &Captures| {
                lookup(&recipient.data, &caps[1], recipient).unwrap_or_default()
            })
            .into_owned()
    }
}

/// A recipient's value for `key`, falling back to the `name` and `phone` columns
fn lookup(data: &Value, key: &str, recipient: &CampaignRecipient) -> Option<String> {
    match data.get(key) {
        Some(Value::Null) | None => match key {
            "name" => recipient.name.clone(),
            "phone" => Some(recipient.phone.clone()),
            _ => None,
        },
        Some(value) => Some(value_text(value)),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    fn recipient(data: Value) -> CampaignRecipient {
        CampaignRecipient {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            phone: "573001234567".to_string(),
            name: Some("Ana".to_string()),
            data,
            state: "queued".to_string(),
            attempts: 0,
            last_error: None,
            retryable: false,
            message_id: None,
            updated_at: Utc::now(),
        }
    }

    fn template(body: &str, variables: Value) -> Template {
        Template {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            name: "order_update".to_string(),
            language: "en_US".to_string(),
            category: None,
            body: body.to_string(),
            variables,
            sample_values: json!(["Ana", "A-1"]),
            header_type: "none".to_string(),
            header_text: None,
            footer: None,
            buttons: Value::Null,
            status: "approved".to_string(),
            remote_id: None,
            rejection_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_common_variables_are_shared() {
        let renderer = MessageRenderer::new().unwrap();
        let params = renderer.template_params(
            VariableMode::Common,
            &["Ana".to_string(), "42".to_string()],
            &template("Hi {{1}}, order {{2}}", json!([])),
            &recipient(json!({"customer": "ignored"})),
        )
        .unwrap();
        assert_eq!(params, vec!["Ana", "42"]);
    }

    #[test]
    fn test_unique_variables_follow_declared_order() {
        let renderer = MessageRenderer::new().unwrap();
        let params = renderer.template_params(
            VariableMode::Unique,
            &[],
            &template("Hi {{1}}, order {{2}}", json!(["customer", "order"])),
            &recipient(json!({"order": 1001, "customer": "Ana"})),
        )
        .unwrap();
        assert_eq!(params, vec!["Ana", "1001"]);
    }

    #[test]
    fn test_unique_variables_from_array_or_positions() {
        let renderer = MessageRenderer::new().unwrap();
        let tpl = template("Hi {{1}}, order {{2}}", json!([]));

        let from_array = renderer.template_params(
            VariableMode::Unique,
            &[],
            &tpl,
            &recipient(json!(["Ana", "A-7"])),
        )
        .unwrap();
        assert_eq!(from_array, vec!["Ana", "A-7"]);

        let by_position = renderer.template_params(
            VariableMode::Unique,
            &[],
            &tpl,
            &recipient(json!({"1": "Ana", "2": "A-7"})),
        )
        .unwrap();
        assert_eq!(by_position, vec!["Ana", "A-7"]);
    }

    #[test]
    fn test_missing_variable_is_a_validation_error() {
        let renderer = MessageRenderer::new().unwrap();
        let tpl = template("Hi {{1}}, order {{2}}", json!(["name", "order"]));

        // `name` falls back to the recipient column, `order` has nothing
        let err = renderer
            .template_params(VariableMode::Unique, &[], &tpl, &recipient(json!({"plan": "x"})))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("`order`")));

        let err = renderer
            .template_params(VariableMode::Unique, &[], &tpl, &recipient(json!(["Ana"])))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let params = renderer
            .template_params(VariableMode::Unique, &[], &tpl, &recipient(json!({"order": "A-9"})))
            .unwrap();
        assert_eq!(params, vec!["Ana", "A-9"]);
    }

    #[test]
    fn test_render_text_substitutes_and_strips() {
        let renderer = MessageRenderer::new().unwrap();
        let text = renderer.render_text(
            "Hola {{name}} ({{ phone }}), your plan is {{plan}}.{{missing}}",
            &recipient(json!({"plan": "premium"})),
        );
        assert_eq!(text, "Hola Ana (573001234567), your plan is premium.");
    }

    #[test]
    fn test_recipient_data_overrides_builtin_name() {
        let renderer = MessageRenderer::new().unwrap();
        let text = renderer.render_text("Hi {{name}}", &recipient(json!({"name": "Ana María"})));
        assert_eq!(text, "Hi Ana María");
    }
}
