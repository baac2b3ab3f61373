//! Response shaping

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::images::{embed_markdown_images, encode_images, referenced_images};
use super::options::ParseOptions;
use crate::backend::{Backend, EffectiveBackend, ParseMethod};
use crate::engine::{Chunk, OutputFormat};
use crate::pool::JobOutcome;

/// Successful parse response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResponse {
    pub success: bool,
    pub request_id: String,
    pub backend: Backend,
    pub parse_method: ParseMethod,
    pub filename: String,
    pub pages: usize,
    pub output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<Chunk>>,
    /// Image file name to data URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_list: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub processing_time_ms: u64,
}

/// Request facts the response echoes back
pub struct ResponseContext<'a> {
    pub request_id: &'a str,
    pub filename: &'a str,
    pub options: &'a ParseOptions,
    pub effective: &'a EffectiveBackend,
    pub elapsed: Duration,
}

/// Shape an engine result into the requested representation
pub fn shape(ctx: ResponseContext<'_>, outcome: JobOutcome) -> ParseResponse {
    let JobOutcome {
        output,
        worker,
        cache_hit,
        elapsed: engine_elapsed,
    } = outcome;
    let options = ctx.options;

    let referenced = match (options.embed_images, output.markdown.as_deref()) {
        (true, Some(md)) => referenced_images(md),
        _ => BTreeSet::new(),
    };
    let encoded = encode_images(&output.images, |name| {
        options.return_images || referenced.contains(name)
    });

    let markdown = output.markdown.as_deref().map(|md| {
        if options.embed_images && !encoded.is_empty() {
            embed_markdown_images(md, &encoded)
        } else {
            md.to_string()
        }
    });

    let mut response = ParseResponse {
        success: true,
        request_id: ctx.request_id.to_string(),
        backend: ctx.effective.backend,
        parse_method: ctx.effective.parse_method,
        filename: ctx.filename.to_string(),
        pages: output.pages,
        output_format: options.output_format,
        markdown: None,
        data: None,
        html: None,
        chunks: None,
        images: None,
        content_list: None,
        middle_json: None,
        model_output: None,
        metadata: None,
        warning: ctx.effective.warning.clone(),
        processing_time_ms: ctx.elapsed.as_millis() as u64,
    };

    match options.output_format {
        OutputFormat::Markdown => {
            if options.return_md {
                response.markdown = markdown;
            }
        }
        OutputFormat::Json => {
            response.data = output
                .json
                .clone()
                .or_else(|| output.middle_json.clone())
                .or_else(|| output.content_list.clone());
        }
        OutputFormat::Html => {
            response.html = output
                .html
                .clone()
                .or_else(|| markdown.as_deref().map(markdown_to_html));
        }
        OutputFormat::Chunks => {
            response.chunks = output.chunks.clone().or_else(|| {
                output
                    .content_list
                    .as_ref()
                    .map(chunks_from_content_list)
                    .or_else(|| markdown.as_deref().map(chunks_from_markdown))
            });
        }
    }

    if options.return_images && !encoded.is_empty() {
        response.images = Some(encoded);
    }
    if options.return_content_list {
        response.content_list = output.content_list;
    }
    if options.return_middle_json {
        response.middle_json = output.middle_json;
    }
    if options.return_model_output {
        response.model_output = output.model_output;
    }

    let mut metadata = output.metadata;
    metadata.insert(
        "worker".to_string(),
        json!({
            "ordinal": worker.ordinal,
            "device": worker.device,
            "cacheHit": cache_hit,
            "engineMs": engine_elapsed.as_millis() as u64,
        }),
    );
    response.metadata = Some(metadata);

    response
}

/// Minimal HTML rendering for engines that only produce markdown
pub fn markdown_to_html(markdown: &str) -> String {
    let mut html = String::new();
    for block in markdown.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
        let level = block.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&level) && block[level..].starts_with(' ') {
            html.push_str(&format!(
                "<h{level}>{}</h{level}>\n",
                html_escape::encode_text(block[level..].trim())
            ));
        } else if let Some(src) = block.strip_prefix("![](").and_then(|b| b.strip_suffix(')')) {
            html.push_str(&format!(
                "<img src=\"{}\"/>\n",
                html_escape::encode_double_quoted_attribute(src)
            ));
        } else {
            html.push_str(&format!("<p>{}</p>\n", html_escape::encode_text(block)));
        }
    }
    html
}

/// Chunks from a content list (`type`, `text`, `page_idx`, `bbox`)
pub fn chunks_from_content_list(content_list: &Value) -> Vec<Chunk> {
    let Some(items) = content_list.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let block_type = item.get("type").and_then(Value::as_str).unwrap_or("text");
            let text = item
                .get("text")
                .or_else(|| item.get("table_body"))
                .or_else(|| item.get("img_path"))
                .and_then(Value::as_str)?;
            let page = item.get("page_idx").and_then(Value::as_u64).unwrap_or(0) as usize;
            let bbox = item.get("bbox").and_then(Value::as_array).and_then(|b| {
                let coords: Vec<f32> = b.iter().filter_map(Value::as_f64).map(|v| v as f32).collect();
                <[f32; 4]>::try_from(coords).ok()
            });

            Some(Chunk {
                id: format!("/page/{}/block/{}", page, index),
                page,
                block_type: block_type.to_string(),
                text: text.to_string(),
                bbox,
            })
        })
        .collect()
}

/// One chunk per markdown paragraph, all on page 0
pub fn chunks_from_markdown(markdown: &str) -> Vec<Chunk> {
    markdown
        .split("\n\n")
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .enumerate()
        .map(|(index, block)| Chunk {
            id: format!("/page/0/block/{}", index),
            page: 0,
            block_type: if block.starts_with('#') { "heading" } else { "text" }.to_string(),
            text: block.to_string(),
            bbox: None,
        })
        .collect()
}
