//! Standalone HTML preview of a record's model

use super::open_store;
use anyhow::{Context, Result};
use base64::Engine;
use protoform_core::{GenerationRecord, RecordId};
use protoform_gen::assets::load_model;
use protoform_gen::ProtoformConfig;
use std::path::PathBuf;

const MODEL_VIEWER_SCRIPT: &str =
    "https://ajax.googleapis.com/ajax/libs/model-viewer/3.5.0/model-viewer.min.js";

pub fn run(config: &ProtoformConfig, id: RecordId, output: Option<PathBuf>) -> Result<()> {
    let store = open_store(config)?;
    let record = store.get(id)?;
    let Some(model_path) = record.model_path.as_deref() else {
        anyhow::bail!(
            "Record #{} has no 3D model yet; run `protoform resume {}` first",
            id,
            id
        );
    };

    let model = load_model(model_path)
        .with_context(|| format!("Failed to read model file {}", model_path))?;
    if !model.is_glb() {
        tracing::warn!(path = model_path, "Model is not a GLB container; the viewer may not load it");
    }

    let output = output.unwrap_or_else(|| PathBuf::from(format!("viewer_{}.html", id)));
    std::fs::write(&output, render_viewer_html(&record, &model.bytes))
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Viewer written to {}", output.display());
    println!("  Model: {} ({} bytes)", model_path, model.bytes.len());
    Ok(())
}

/// A self-contained page: the GLB travels inline as a data URI
pub fn render_viewer_html(record: &GenerationRecord, glb: &[u8]) -> String {
    let data = base64::engine::general_purpose::STANDARD.encode(glb);
    let title = escape_html(&record.prompt);
    let caption = escape_html(record.effective_prompt());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Protoform #{id}: {title}</title>
<script type="module" src="{script}"></script>
<style>
  body {{ margin: 0; font-family: sans-serif; background: #1e1e24; color: #eee; }}
  model-viewer {{ width: 100vw; height: 85vh; background: #2a2a33; }}
  p {{ padding: 0 1em; }}
</style>
</head>
<body>
<model-viewer src="data:model/gltf-binary;base64,{data}" alt="{title}" camera-controls auto-rotate shadow-intensity="1"></model-viewer>
<p><strong>#{id}</strong> {caption}</p>
</body>
</html>
"#,
        id = record.id,
        title = title,
        caption = caption,
        script = MODEL_VIEWER_SCRIPT,
        data = data,
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use protoform_core::NewRecord;
    use protoform_gen::providers::mock::minimal_glb;

    #[test]
    fn test_viewer_embeds_model() {
        let mut new = NewRecord::new("a <small> \"red\" boat");
        new.enhanced_prompt = Some("a small red boat, studio lighting".into());
        let record = GenerationRecord::from_new(RecordId(12), new);
        let glb = minimal_glb().unwrap();

        let html = render_viewer_html(&record, &glb);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&glb);
        assert!(html.contains(&format!("src=\"data:model/gltf-binary;base64,{}\"", encoded)));
        assert!(html.contains("Protoform #12: a &lt;small&gt; &quot;red&quot; boat"));
        assert!(html.contains("a small red boat, studio lighting"));
        assert!(html.contains("<model-viewer"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a & b"), "a &amp; b");
        assert_eq!(escape_html("it's"), "it&#39;s");
    }
}
