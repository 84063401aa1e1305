use std::collections::BTreeMap;
use std::error::Error as _;
use std::sync::Arc;

use leviathan_core::errors::GatewayError;
use leviathan_core::prompts::{PromptBook, TemplateId};
use tera::{Context, Tera};
use tracing::debug;

use crate::llm::LlmClient;

pub type TemplateVariables = BTreeMap<String, String>;

pub fn template_variables<const N: usize>(pairs: [(&str, String); N]) -> TemplateVariables {
    pairs.into_iter().map(|(name, value)| (name.to_string(), value)).collect()
}

/// Renders named prompt templates and sends them to the configured model.
pub struct LanguageModelGateway {
    templates: Tera,
    client: Arc<dyn LlmClient>,
}

impl LanguageModelGateway {
    pub fn new(book: &PromptBook, client: Arc<dyn LlmClient>) -> Result<Self, GatewayError> {
        let mut templates = Tera::default();
        for template in TemplateId::ALL {
            templates.add_raw_template(template.name(), book.template(template)).map_err(
                |error| GatewayError::Render {
                    template: template.name().to_string(),
                    message: describe(&error),
                },
            )?;
            let text = book.template(template);
            if let Some(missing) =
                template.required_variables().iter().find(|name| !references(text, name))
            {
                return Err(GatewayError::TemplateVariable {
                    template: template.name().to_string(),
                    variable: (*missing).to_string(),
                });
            }
        }
        Ok(Self { templates, client })
    }

    /// Fails with [`GatewayError::TemplateVariable`] before rendering when a
    /// required variable is absent.
    pub fn render(
        &self,
        template: TemplateId,
        variables: &TemplateVariables,
    ) -> Result<String, GatewayError> {
        if let Some(missing) =
            template.required_variables().iter().find(|name| !variables.contains_key(**name))
        {
            return Err(GatewayError::TemplateVariable {
                template: template.name().to_string(),
                variable: (*missing).to_string(),
            });
        }

        let mut context = Context::new();
        for (name, value) in variables {
            context.insert(name.as_str(), value);
        }

        self.templates.render(template.name(), &context).map_err(|error| GatewayError::Render {
            template: template.name().to_string(),
            message: describe(&error),
        })
    }

    pub async fn complete(
        &self,
        template: TemplateId,
        variables: &TemplateVariables,
    ) -> Result<String, GatewayError> {
        let prompt = self.render(template, variables)?;
        debug!(template = template.name(), prompt_chars = prompt.len(), "prompt rendered");
        self.client.complete(&prompt).await
    }
}

/// True when some `{{ ... }}` expression in `text` starts with `name`.
/// Single-brace `{name}` placeholders do not count.
fn references(text: &str, name: &str) -> bool {
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            return false;
        };
        let expression = after[..close].trim_start_matches('-').trim_start();
        let head = expression
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .next()
            .unwrap_or_default();
        if head == name {
            return true;
        }
        rest = &after[close + 2..];
    }
    false
}

fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use leviathan_core::errors::GatewayError;
    use leviathan_core::prompts::{PromptBook, TemplateId};

    use super::{references, template_variables, LanguageModelGateway};
    use crate::llm::LlmClient;

    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for CountingClient {
        async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("echo: {prompt}"))
        }
    }

    fn book() -> PromptBook {
        PromptBook::from_json(
            r#"{"leviathan": {"sentiment_prompt": "Translate {{ input }} into {{ language }}."}}"#,
        )
        .expect("book")
    }

    #[tokio::test]
    async fn renders_and_sends_the_prompt() {
        let client = Arc::new(CountingClient::default());
        let gateway = LanguageModelGateway::new(&book(), client.clone()).expect("gateway");

        let output = gateway
            .complete(
                TemplateId::SentimentAnalysis,
                &template_variables([
                    ("input", "hola".to_string()),
                    ("language", "english".to_string()),
                ]),
            )
            .await
            .expect("completion");

        assert_eq!(output, "echo: Translate hola into english.");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_variable_fails_before_calling_the_model() {
        let client = Arc::new(CountingClient::default());
        let gateway = LanguageModelGateway::new(&book(), client.clone()).expect("gateway");

        let error = gateway
            .complete(
                TemplateId::SentimentAnalysis,
                &template_variables([("input", "hola".to_string())]),
            )
            .await
            .expect_err("should fail");

        assert_eq!(
            error,
            GatewayError::TemplateVariable {
                template: "sentiment_analysis".into(),
                variable: "language".into()
            }
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn values_are_not_html_escaped() {
        let gateway =
            LanguageModelGateway::new(&PromptBook::default(), Arc::new(CountingClient::default()))
                .expect("gateway");
        let rendered = gateway
            .render(
                TemplateId::EntityContextualization,
                &template_variables([
                    ("conversation_history", "user: <b>\"hi\"</b>".to_string()),
                    ("question", "a & b".to_string()),
                    ("entities", "PRODUCT_TYPE: shirt".to_string()),
                ]),
            )
            .expect("render");
        assert!(rendered.contains("user: <b>\"hi\"</b>"));
        assert!(rendered.contains("a & b"));
    }

    #[test]
    fn broken_templates_are_reported_at_construction() {
        let book = PromptBook::from_json(r#"{"leviathan": {"thinking_prompt": "{{ input"}}"#)
            .expect("book");
        let error = LanguageModelGateway::new(&book, Arc::new(CountingClient::default()))
            .err()
            .expect("should fail");
        assert!(matches!(
            error,
            GatewayError::Render { ref template, .. } if template == "intent_reasoning"
        ));
    }

    #[test]
    fn single_brace_placeholders_are_rejected_at_construction() {
        let book = PromptBook::from_json(
            r#"{"leviathan": {"sentiment_prompt": "Detect the language of {input} and translate it to {language}."}}"#,
        )
        .expect("book");
        let client = Arc::new(CountingClient::default());

        let error = LanguageModelGateway::new(&book, client.clone()).err().expect("should fail");

        assert_eq!(
            error,
            GatewayError::TemplateVariable {
                template: "sentiment_analysis".into(),
                variable: "input".into()
            }
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn variable_references_tolerate_whitespace_control_and_filters() {
        assert!(references("{{input}}", "input"));
        assert!(references("{{- input | trim -}}", "input"));
        assert!(!references("{{ input_text }}", "input"));
        assert!(!references("{input}", "input"));
        assert!(!references("{{ input", "input"));
    }
}
