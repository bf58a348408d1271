//! Shell-command invocation step.

use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::element::{Data, DataStream, Element};

#[derive(Deserialize)]
pub struct RunShellParams {
    /// Command template; `{key}` placeholders are filled from the keys of
    /// an object item.
    pub cmd: String,
}

/// Run a shell command for every incoming item and yield its captured
/// stdout. A non-utf8-safe or failing command fails the chain.
pub fn run_shell(p: RunShellParams) -> Element {
    let cmd = p.cmd;
    Element::Stage(Box::new(move |source: DataStream| {
        source
            .then(move |item| {
                let cmd = cmd.clone();
                async move {
                    let data = item?;
                    let rendered = render(&cmd, &data);
                    debug!(command = %rendered, "running shell command");
                    let output = tokio::process::Command::new("sh")
                        .arg("-c")
                        .arg(&rendered)
                        .output()
                        .await?;
                    if !output.stderr.is_empty() {
                        warn!(
                            command = %rendered,
                            stderr = %String::from_utf8_lossy(&output.stderr),
                            "command wrote to stderr"
                        );
                    }
                    Ok(Value::String(
                        String::from_utf8_lossy(&output.stdout).into_owned(),
                    ))
                }
            })
            .boxed()
    }))
}

/// Fill `{key}` placeholders from an object item; other item kinds leave
/// the template untouched.
fn render(template: &str, data: &Data) -> String {
    let Some(map) = data.as_object() else {
        return template.to_string();
    };
    let mut out = template.to_string();
    for (key, value) in map {
        let placeholder = format!("{{{key}}}");
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out = out.replace(&placeholder, &text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::wrap;
    use futures::stream;
    use serde_json::json;

    #[test]
    fn render_fills_placeholders_from_objects() {
        let data = json!({ "who": "world", "n": 3 });
        assert_eq!(render("echo {who} {n}", &data), "echo world 3");
        assert_eq!(render("echo static", &json!(42)), "echo static");
    }

    #[tokio::test]
    async fn captures_stdout_per_item() {
        let el = run_shell(RunShellParams {
            cmd: "echo {word}".into(),
        });
        let stage = wrap("run_shell", el).unwrap();
        let source = stream::iter(
            [json!({ "word": "one" }), json!({ "word": "two" })].map(Ok),
        )
        .boxed();
        let out: Vec<String> = stage(source)
            .map(|r| r.unwrap().as_str().unwrap().to_string())
            .collect()
            .await;
        assert_eq!(out, vec!["one\n", "two\n"]);
    }
}
