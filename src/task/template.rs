//! Command template parsing and rendering
//!
//! Shell tasks are declared as a single template string with typed
//! placeholders:
//!
//! - `<name[:type][?][=default]>` — input placeholder (`?` marks the
//!   field optional, `=default` supplies a default value)
//! - `<out|name[:type][$path_template]>` — output placeholder; with a
//!   `$path_template` the output is a file materialized in the unit's
//!   scratch directory, without one it captures trimmed stdout
//!
//! Types: `int`, `float`, `str`, `bool`, `file`; any other tag is a
//! file-format tag. Placeholder fields become the task's input/output
//! field specs, so a command task is fully described by its template.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{BraidError, Result};
use crate::types::TypeSpec;
use crate::value::Bindings;

/// Placeholder pattern, compiled once
// Path templates may themselves reference inputs (`<out|f$<src>.out>`),
// so the path capture admits one level of nested placeholders
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"<(?P<out>out\|)?(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?::(?P<ty>[A-Za-z0-9_]+))?(?P<opt>\?)?(?:=(?P<default>[^>$]*))?(?:\$(?P<path>(?:[^<>]|<[A-Za-z_][A-Za-z0-9_]*>)+))?>",
    )
    .expect("placeholder regex is valid")
});

/// One parsed segment of the command line
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Input(String),
    Output(String),
}

/// Input field declared by a template placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateInput {
    pub name: String,
    pub ty: TypeSpec,
    pub optional: bool,
    pub default: Option<Value>,
}

/// Output field declared by a template placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOutput {
    pub name: String,
    pub ty: TypeSpec,
    /// Relative path template; `<name>` references resolve against inputs.
    /// `None` means the output captures trimmed stdout.
    pub path_template: Option<String>,
}

/// Parsed command template for a shell task
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    raw: String,
    segments: Vec<Segment>,
    inputs: Vec<TemplateInput>,
    outputs: Vec<TemplateOutput>,
}

impl CommandTemplate {
    /// Parse a template string into segments and field declarations
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut inputs: Vec<TemplateInput> = Vec::new();
        let mut outputs: Vec<TemplateOutput> = Vec::new();
        let mut last_end = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let whole = caps.get(0).expect("capture 0 always present");
            if whole.start() > last_end {
                segments.push(Segment::Literal(template[last_end..whole.start()].into()));
            }
            last_end = whole.end();

            let name = caps["name"].to_string();
            let ty = caps.name("ty").map_or(TypeSpec::Str, |m| parse_type(m.as_str()));
            let is_output = caps.name("out").is_some();

            if is_output {
                if caps.name("default").is_some() || caps.name("opt").is_some() {
                    return Err(BraidError::TemplateParse {
                        reason: format!("output placeholder '{name}' cannot take '?' or a default"),
                    });
                }
                if outputs.iter().any(|o| o.name == name) {
                    return Err(BraidError::TemplateParse {
                        reason: format!("duplicate output placeholder '{name}'"),
                    });
                }
                let path_template = caps.name("path").map(|m| m.as_str().to_string());
                let ty = match (&path_template, ty) {
                    // A path-producing output is a file even when untyped
                    (Some(_), TypeSpec::Str) => TypeSpec::file("file"),
                    (_, ty) => ty,
                };
                outputs.push(TemplateOutput {
                    name: name.clone(),
                    ty,
                    path_template,
                });
                segments.push(Segment::Output(name));
            } else {
                if caps.name("path").is_some() {
                    return Err(BraidError::TemplateParse {
                        reason: format!("input placeholder '{name}' cannot carry a path template"),
                    });
                }
                let default = match caps.name("default") {
                    Some(m) => Some(parse_default(m.as_str())),
                    None => None,
                };
                let optional = caps.name("opt").is_some() || default.is_some();
                // Repeated input placeholders render the same field twice
                if !inputs.iter().any(|i| i.name == name) {
                    inputs.push(TemplateInput {
                        name: name.clone(),
                        ty,
                        optional,
                        default,
                    });
                }
                segments.push(Segment::Input(name));
            }
        }

        if last_end < template.len() {
            segments.push(Segment::Literal(template[last_end..].into()));
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
            inputs,
            outputs,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn inputs(&self) -> &[TemplateInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TemplateOutput] {
        &self.outputs
    }

    /// Resolve declared file-output paths against the bound inputs.
    ///
    /// Returns `output name → relative path` for every path-template
    /// output; stdout-captured outputs are absent.
    pub fn resolve_output_paths(&self, bindings: &Bindings) -> Result<BTreeMap<String, String>> {
        let mut paths = BTreeMap::new();
        for out in &self.outputs {
            if let Some(template) = &out.path_template {
                let mut rendered = String::new();
                let mut last_end = 0;
                for caps in PLACEHOLDER.captures_iter(template) {
                    let whole = caps.get(0).expect("capture 0 always present");
                    rendered.push_str(&template[last_end..whole.start()]);
                    last_end = whole.end();
                    let name = &caps["name"];
                    let value = bindings.get(name).ok_or_else(|| BraidError::TemplateParse {
                        reason: format!(
                            "path template for output '{}' references unbound input '{name}'",
                            out.name
                        ),
                    })?;
                    rendered.push_str(&render_value(value));
                }
                rendered.push_str(&template[last_end..]);
                paths.insert(out.name.clone(), rendered);
            }
        }
        Ok(paths)
    }

    /// Render the command line with inputs substituted and file outputs
    /// replaced by their resolved paths.
    pub fn render(&self, bindings: &Bindings, out_paths: &BTreeMap<String, String>) -> String {
        let mut cmd = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => cmd.push_str(text),
                Segment::Input(name) => {
                    if let Some(value) = bindings.get(name) {
                        cmd.push_str(&render_value(value));
                    }
                }
                Segment::Output(name) => {
                    if let Some(path) = out_paths.get(name) {
                        cmd.push_str(path);
                    }
                }
            }
        }
        cmd
    }
}

fn parse_type(tag: &str) -> TypeSpec {
    match tag {
        "int" => TypeSpec::Int,
        "float" => TypeSpec::Float,
        "str" => TypeSpec::Str,
        "bool" => TypeSpec::Bool,
        other => TypeSpec::file(other),
    }
}

fn parse_default(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_simple_inputs() {
        let tpl = CommandTemplate::parse("echo <msg:str>").unwrap();
        assert_eq!(tpl.inputs().len(), 1);
        assert_eq!(tpl.inputs()[0].name, "msg");
        assert_eq!(tpl.inputs()[0].ty, TypeSpec::Str);
        assert!(!tpl.inputs()[0].optional);
    }

    #[test]
    fn parse_typed_and_defaulted() {
        let tpl = CommandTemplate::parse("head -n <count:int=10> <src:file>").unwrap();
        assert_eq!(tpl.inputs()[0].default, Some(json!(10)));
        assert!(tpl.inputs()[0].optional);
        assert_eq!(tpl.inputs()[1].ty, TypeSpec::file("file"));
    }

    #[test]
    fn parse_output_with_path_template() {
        let tpl = CommandTemplate::parse("sort <src:file> > <out|sorted$sorted.txt>").unwrap();
        assert_eq!(tpl.outputs().len(), 1);
        assert_eq!(tpl.outputs()[0].name, "sorted");
        assert_eq!(tpl.outputs()[0].ty, TypeSpec::file("file"));
        assert_eq!(tpl.outputs()[0].path_template.as_deref(), Some("sorted.txt"));
    }

    #[test]
    fn parse_rejects_output_default() {
        let err = CommandTemplate::parse("x <out|y=3>").unwrap_err();
        assert_eq!(err.code(), "BRAID-015");
    }

    #[test]
    fn render_substitutes_inputs() {
        let tpl = CommandTemplate::parse("echo <a:int> <b:str>").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("a".into(), json!(5));
        bindings.insert("b".into(), json!("hi"));
        assert_eq!(tpl.render(&bindings, &BTreeMap::new()), "echo 5 hi");
    }

    #[test]
    fn render_substitutes_output_paths() {
        let tpl = CommandTemplate::parse("sort <src> > <out|sorted$<src>.sorted>").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("src".into(), json!("data.txt"));
        let paths = tpl.resolve_output_paths(&bindings).unwrap();
        assert_eq!(paths["sorted"], "data.txt.sorted");
        assert_eq!(tpl.render(&bindings, &paths), "sort data.txt > data.txt.sorted");
    }

    #[test]
    fn stdout_output_has_no_path() {
        let tpl = CommandTemplate::parse("wc -l <src> <out|count:int>").unwrap();
        assert!(tpl.outputs()[0].path_template.is_none());
        assert_eq!(tpl.outputs()[0].ty, TypeSpec::Int);
        let paths = tpl.resolve_output_paths(&Bindings::new()).unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn repeated_input_placeholder_declares_once() {
        let tpl = CommandTemplate::parse("cp <src> <src>.bak").unwrap();
        assert_eq!(tpl.inputs().len(), 1);
    }
}
