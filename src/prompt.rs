//! Prompt assembly from retrieved context, the user question, and hints.
//!
//! Templates use `{context}`, `{question}`, `{company_name}` and
//! `{company_type}` placeholders. Substitution is a single left-to-right
//! pass, so placeholder-like text inside retrieved chunks or the question
//! is never expanded again.

use crate::config::{FallbackPolicy, PromptConfig};
use crate::error::{RagError, Result};
use crate::models::Hints;

pub const DEFAULT_GROUNDED_TEMPLATE: &str = "Com base nas informações abaixo, responda à pergunta.\n\n\
### Contexto:\n{context}\n\n\
### Pergunta:\n{question}";

pub const DEFAULT_FALLBACK_TEMPLATE: &str = "Nenhum contexto de documento foi encontrado para esta pergunta. \
Responda com base no seu conhecimento geral.\n\n\
### Pergunta:\n{question}";

/// Chunk separator inside the context block.
const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    fallback: FallbackPolicy,
    grounded_template: String,
    fallback_template: String,
    hints_template: Option<String>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::default(),
            grounded_template: DEFAULT_GROUNDED_TEMPLATE.to_string(),
            fallback_template: DEFAULT_FALLBACK_TEMPLATE.to_string(),
            hints_template: None,
        }
    }
}

impl PromptBuilder {
    pub fn new(fallback: FallbackPolicy) -> Self {
        Self {
            fallback,
            ..Self::default()
        }
    }

    /// Build from `[prompt]` configuration, rejecting templates that
    /// cannot carry the question (or, for the grounded one, the context).
    pub fn from_config(config: &PromptConfig) -> Result<Self> {
        let mut builder = Self::new(config.fallback);
        if let Some(t) = &config.grounded_template {
            require_placeholders(t, &["context", "question"], "grounded_template")?;
            builder.grounded_template = t.clone();
        }
        if let Some(t) = &config.fallback_template {
            require_placeholders(t, &["question"], "fallback_template")?;
            builder.fallback_template = t.clone();
        }
        builder.hints_template = config.hints_template.clone();
        Ok(builder)
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    /// Compose the prompt for `query`.
    ///
    /// With chunks: the grounded template over the blank-line-joined
    /// chunks. Without: the fallback policy decides, and
    /// [`FallbackPolicy::RawQuery`] returns `query` untouched.
    pub fn build(&self, query: &str, chunks: &[String], hints: &Hints) -> String {
        let body = if chunks.is_empty() {
            match self.fallback {
                FallbackPolicy::RawQuery => return query.to_string(),
                FallbackPolicy::GeneralKnowledge => {
                    render(&self.fallback_template, &vars(query, "", hints))
                }
            }
        } else {
            let context = chunks.join(CONTEXT_SEPARATOR);
            render(&self.grounded_template, &vars(query, &context, hints))
        };

        match self.hint_instruction(hints) {
            Some(instruction) => format!("{}\n\n{}", instruction, body),
            None => body,
        }
    }

    fn hint_instruction(&self, hints: &Hints) -> Option<String> {
        if hints.is_empty() {
            return None;
        }
        if let Some(template) = &self.hints_template {
            return Some(render(template, &vars("", "", hints)));
        }
        let name = trimmed(&hints.company_name);
        let kind = trimmed(&hints.company_type);
        Some(match (name, kind) {
            (Some(n), Some(k)) => format!(
                "Responda considerando a empresa {}, do segmento {}.",
                n, k
            ),
            (Some(n), None) => format!("Responda considerando a empresa {}.", n),
            (None, Some(k)) => format!(
                "Responda considerando uma empresa do segmento {}.",
                k
            ),
            (None, None) => return None,
        })
    }
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn vars<'a>(question: &'a str, context: &'a str, hints: &'a Hints) -> [(&'static str, &'a str); 4] {
    [
        ("context", context),
        ("question", question),
        ("company_name", trimmed(&hints.company_name).unwrap_or("")),
        ("company_type", trimmed(&hints.company_type).unwrap_or("")),
    ]
}

fn require_placeholders(template: &str, names: &[&str], field: &str) -> Result<()> {
    for name in names {
        if !template.contains(&format!("{{{}}}", name)) {
            return Err(RagError::InvalidArgument(format!(
                "prompt.{} must contain {{{}}}",
                field, name
            )));
        }
    }
    Ok(())
}

/// Replace known `{name}` placeholders; anything else is copied verbatim.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn grounded_prompt_joins_chunks_with_blank_line() {
        let prompt = PromptBuilder::default().build(
            "Qual o preço?",
            &chunks(&["Plano básico: 10", "Plano pro: 20"]),
            &Hints::default(),
        );
        assert!(prompt.contains("Plano básico: 10\n\nPlano pro: 20"));
        assert!(prompt.contains("### Contexto:"));
        assert!(prompt.ends_with("### Pergunta:\nQual o preço?"));
    }

    #[test]
    fn general_knowledge_fallback() {
        let prompt = PromptBuilder::default().build("Oi?", &[], &Hints::default());
        assert!(prompt.starts_with("Nenhum contexto de documento foi encontrado"));
        assert!(prompt.ends_with("Oi?"));
    }

    #[test]
    fn raw_query_fallback_is_unmodified() {
        let builder = PromptBuilder::new(FallbackPolicy::RawQuery);
        let hints = Hints {
            company_name: Some("Acme".to_string()),
            company_type: None,
        };
        assert_eq!(builder.build("  just this  ", &[], &hints), "  just this  ");
    }

    #[test]
    fn hints_lead_the_prompt() {
        let hints = Hints {
            company_name: Some("Acme".to_string()),
            company_type: Some("varejo".to_string()),
        };
        let prompt = PromptBuilder::default().build("q", &chunks(&["c"]), &hints);
        assert!(prompt.starts_with("Responda considerando a empresa Acme, do segmento varejo.\n\n"));

        let blank = Hints {
            company_name: Some("  ".to_string()),
            company_type: None,
        };
        let prompt = PromptBuilder::default().build("q", &chunks(&["c"]), &blank);
        assert!(prompt.starts_with("Com base"));
    }

    #[test]
    fn placeholders_in_values_are_not_expanded() {
        let prompt = PromptBuilder::default().build(
            "what is {context}?",
            &chunks(&["literal {question} here"]),
            &Hints::default(),
        );
        assert!(prompt.contains("literal {question} here"));
        assert!(prompt.contains("what is {context}?"));
    }

    #[test]
    fn custom_templates_from_config() {
        let config = PromptConfig {
            fallback: FallbackPolicy::GeneralKnowledge,
            grounded_template: Some("C={context} Q={question} {unknown}".to_string()),
            fallback_template: None,
            hints_template: Some("For {company_name}:".to_string()),
        };
        let builder = PromptBuilder::from_config(&config).unwrap();
        let hints = Hints {
            company_name: Some("Acme".to_string()),
            company_type: None,
        };
        assert_eq!(
            builder.build("why", &chunks(&["a", "b"]), &hints),
            "For Acme:\n\nC=a\n\nb Q=why {unknown}"
        );
    }

    #[test]
    fn template_missing_question_is_rejected() {
        let config = PromptConfig {
            grounded_template: Some("only {context}".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            PromptBuilder::from_config(&config),
            Err(RagError::InvalidArgument(_))
        ));

        let config = PromptConfig {
            fallback_template: Some("nothing".to_string()),
            ..Default::default()
        };
        assert!(PromptBuilder::from_config(&config).is_err());
    }
}
