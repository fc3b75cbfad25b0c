//! Email template rendering.
//!
//! Templates are handlebars. The Go-style field reference `{{ .Name }}`, its
//! trimming form `{{- .Name -}}` and `{{/* comment */}}` are accepted as well
//! and rewritten to handlebars before compiling.

use std::sync::LazyLock;

use handlebars::{no_escape, Handlebars};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EmailTemplateSpec, EmailVariable};

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(-\s+|\s*)\.([A-Za-z_][A-Za-z0-9_]*)(\s+-|\s*)\}\}")
        .expect("field pattern compiles")
});

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{-?\s*/\*.*?\*/\s*-?\}\}").expect("comment pattern compiles")
});

/// Rendered subject and bodies of one email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Renders email templates against their variables.
///
/// Variables are resolved by name with the last duplicate winning. Unknown
/// names render empty. The HTML body escapes substituted values; subject and
/// text body insert them verbatim.
#[derive(Clone)]
pub struct TemplateRenderer {
    html: Handlebars<'static>,
    plain: Handlebars<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut plain = Handlebars::new();
        plain.register_escape_fn(no_escape);
        Self {
            html: Handlebars::new(),
            plain,
        }
    }

    pub fn render_subject(
        &self,
        variables: &[EmailVariable],
        template: &EmailTemplateSpec,
    ) -> DomainResult<String> {
        render(&self.plain, variables, &template.subject)
    }

    pub fn render_html(
        &self,
        variables: &[EmailVariable],
        template: &EmailTemplateSpec,
    ) -> DomainResult<String> {
        render(&self.html, variables, &template.html_body)
    }

    pub fn render_text(
        &self,
        variables: &[EmailVariable],
        template: &EmailTemplateSpec,
    ) -> DomainResult<String> {
        render(&self.plain, variables, &template.text_body)
    }

    /// Render all three parts, failing on the first malformed one.
    pub fn render_email(
        &self,
        variables: &[EmailVariable],
        template: &EmailTemplateSpec,
    ) -> DomainResult<RenderedEmail> {
        Ok(RenderedEmail {
            subject: self.render_subject(variables, template)?,
            html_body: self.render_html(variables, template)?,
            text_body: self.render_text(variables, template)?,
        })
    }
}

fn render(
    registry: &Handlebars<'static>,
    variables: &[EmailVariable],
    source: &str,
) -> DomainResult<String> {
    if source.is_empty() {
        return Ok(String::new());
    }

    let data: Map<String, Value> = variables
        .iter()
        .map(|v| (v.name.clone(), Value::String(v.value.clone())))
        .collect();

    registry
        .render_template(&to_handlebars(source), &data)
        .map_err(|e| DomainError::Template(e.to_string()))
}

/// Rewrite Go-style field references and comments to handlebars.
fn to_handlebars(source: &str) -> String {
    let source = COMMENT_RE.replace_all(source, "");
    FIELD_RE
        .replace_all(&source, |caps: &Captures<'_>| {
            let open = if caps[1].starts_with('-') { "~" } else { "" };
            let close = if caps[3].ends_with('-') { "~" } else { "" };
            format!("{{{{{open}{}{close}}}}}", &caps[2])
        })
        .into_owned()
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn plain_text_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z0-9 .,!?;:<>&'\"-]{0,200}").expect("Valid regex")
    }

    proptest! {
        /// Text without actions passes through unchanged.
        #[test]
        fn proptest_plain_text_is_identity(text in plain_text_strategy()) {
            let renderer = TemplateRenderer::new();
            let spec = EmailTemplateSpec {
                html_body: text.clone(),
                ..EmailTemplateSpec::default()
            };
            prop_assert_eq!(renderer.render_html(&[], &spec).unwrap(), text);
        }

        /// Escaped substitutions never introduce markup.
        #[test]
        fn proptest_html_values_are_inert(value in plain_text_strategy()) {
            let vars = vec![EmailVariable::new("V", value)];
            let spec = EmailTemplateSpec {
                html_body: "{{ .V }}".into(),
                ..EmailTemplateSpec::default()
            };
            let out = TemplateRenderer::new().render_html(&vars, &spec).unwrap();
            prop_assert!(!out.contains('<'));
            prop_assert!(!out.contains('>'));
            prop_assert!(!out.contains('"'));
        }
    }
}
