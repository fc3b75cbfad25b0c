//! Implementation of the `herald render` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::adapters::memory::Manifest;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{EmailTemplateSpec, EmailVariable};
use crate::services::TemplateRenderer;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// YAML file holding an EmailTemplate manifest
    #[arg(short, long)]
    pub template: PathBuf,

    /// Template variable, `name=value`; repeatable
    #[arg(long = "var", value_parser = parse_var)]
    pub vars: Vec<EmailVariable>,
}

fn parse_var(raw: &str) -> Result<EmailVariable, String> {
    raw.split_once('=')
        .map(|(name, value)| EmailVariable::new(name.trim(), value))
        .filter(|var| !var.name.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

#[derive(Debug, Serialize)]
pub struct RenderOutput {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

impl CommandOutput for RenderOutput {
    fn to_human(&self) -> String {
        format!(
            "Subject: {}\n\n--- HTML ---\n{}\n\n--- Text ---\n{}",
            self.subject, self.html_body, self.text_body
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// First EmailTemplate document in `source`.
fn find_template(source: &str) -> Result<EmailTemplateSpec> {
    Manifest::parse_all(source)?
        .into_iter()
        .find_map(|manifest| match manifest {
            Manifest::EmailTemplate(doc) => Some(doc.spec),
            _ => None,
        })
        .context("No EmailTemplate document found")
}

pub fn render(source: &str, vars: &[EmailVariable]) -> Result<RenderOutput> {
    let template = find_template(source)?;
    let rendered = TemplateRenderer::new().render_email(vars, &template)?;
    Ok(RenderOutput {
        subject: rendered.subject,
        html_body: rendered.html_body,
        text_body: rendered.text_body,
    })
}

pub async fn execute(args: RenderArgs, json_mode: bool) -> Result<()> {
    let source = tokio::fs::read_to_string(&args.template)
        .await
        .with_context(|| format!("Failed to read {}", args.template.display()))?;
    let rendered = render(&source, &args.vars)?;
    output(&rendered, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
kind: EmailTemplate
metadata:
  name: welcome
spec:
  subject: "Welcome {{ .Name }}"
  html_body: "<p>Hi {{ .Name }}</p>"
  text_body: "Hi {{ .Name }}"
"#;

    #[test]
    fn test_render_manifest() {
        let out = render(MANIFEST, &[EmailVariable::new("Name", "<Jane>")]).unwrap();
        assert_eq!(out.subject, "Welcome <Jane>");
        assert_eq!(out.html_body, "<p>Hi &lt;Jane&gt;</p>");
        assert!(out.to_human().starts_with("Subject: Welcome <Jane>"));
    }

    #[test]
    fn test_render_without_template_document() {
        let source = "kind: User\nmetadata:\n  name: jane\nspec:\n  email: jane@example.com\n";
        assert!(render(source, &[]).is_err());
    }

    #[test]
    fn test_parse_var() {
        let var = parse_var("Link=a=b").unwrap();
        assert_eq!(var.name, "Link");
        assert_eq!(var.value, "a=b");
        assert!(parse_var("=x").is_err());
    }
}
