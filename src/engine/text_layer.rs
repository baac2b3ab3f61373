//! Text-Layer Engine
//!
//! Converts documents by reading the embedded text layer through MuPDF.
//! Pages without a text layer are rendered to PNG; when a refinement service
//! is configured those renders are transcribed by the model.
//!
//! Shapes:
//! - `standard`: headings, paragraphs, tables and page images as markdown
//! - `table`: only tabular regions
//! - `ocr`: line-level text with bounding boxes
//! - `extraction`: schema-driven JSON extracted by the refinement service

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use mupdf::{Colorspace, Document, Matrix, MetadataName, TextPageOptions};
use serde_json::{json, Map, Value};

use super::refine::RefinementService;
use super::settings::ConvertSettings;
use super::types::{Chunk, ConverterKind, EngineError, EngineOutput, OutputFormat};
use super::{write_artifacts, Converter, ConverterFactory};
use crate::converter::ConverterConfig;
use crate::pool::Device;

/// Gap between characters (in ems) that starts a new table cell
const CELL_GAP_EM: f32 = 1.5;
/// Render scale for pages without a text layer
const RENDER_SCALE: f32 = 1.5;
const PAGE_SEPARATOR: &str = "------------------------------------------------";
const DEFAULT_CORRECTION_PROMPT: &str = "Fix text extraction errors in the following markdown (broken words, hyphenation, reading order). Keep the structure and return only the corrected markdown.";
const TABLE_PROMPT: &str = "Reformat every table in the following page text as a markdown table. Return only the markdown tables.";

// ============================================================================
// Factory
// ============================================================================

/// Builds MuPDF-backed converters
#[derive(Debug, Default, Clone)]
pub struct TextLayerFactory;

impl TextLayerFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ConverterFactory for TextLayerFactory {
    fn name(&self) -> &'static str {
        "text-layer"
    }

    fn build(&self, config: &ConverterConfig, device: &Device) -> Result<Arc<dyn Converter>, EngineError> {
        let settings = ConvertSettings::from_config(config)?;

        if settings.kind == ConverterKind::Table && !settings.table_enable {
            return Err(EngineError::construction(
                "Table converter cannot run with table_enable=false",
            ));
        }

        tracing::debug!(
            converter = %settings.kind,
            format = %settings.output_format,
            device = %device,
            llm = settings.refiner.as_ref().map(|r| r.name()),
            "Built text-layer converter"
        );

        Ok(Arc::new(TextLayerConverter {
            settings,
            device: *device,
        }))
    }
}

// ============================================================================
// Converter
// ============================================================================

pub struct TextLayerConverter {
    settings: ConvertSettings,
    device: Device,
}

impl Converter for TextLayerConverter {
    fn kind(&self) -> ConverterKind {
        self.settings.kind
    }

    fn convert(&self, source: &Path, output_dir: &Path) -> Result<EngineOutput, EngineError> {
        let path = source
            .to_str()
            .ok_or_else(|| EngineError::execution("Source path is not valid UTF-8"))?;
        let doc = Document::open(path)?;
        let total_pages = doc.page_count()?.max(0) as usize;

        let selected: Vec<usize> = match &self.settings.pages {
            Some(pages) => pages.pages_within(total_pages).collect(),
            None => (0..total_pages).collect(),
        };

        let mut pages = Vec::with_capacity(selected.len());
        let mut images = BTreeMap::new();
        for index in selected {
            pages.push(self.read_page(&doc, index, &mut images)?);
        }

        let body_size = body_font_size(&pages);
        for page in &mut pages {
            classify_blocks(page, body_size, self.settings.table_enable);
        }

        let mut output = EngineOutput {
            pages: pages.len(),
            images,
            ..Default::default()
        };

        let page_markdown = self.render_markdown(&pages)?;
        let markdown = join_pages(&pages, &page_markdown, self.settings.paginate_output);
        output.content_list = Some(content_list(&pages));

        match self.settings.kind {
            ConverterKind::Ocr => output.json = Some(ocr_json(&pages)),
            ConverterKind::Extraction => {
                let (Some(refiner), Some(schema)) =
                    (&self.settings.refiner, &self.settings.page_schema)
                else {
                    return Err(EngineError::execution("Extraction converter is missing its schema or service"));
                };
                output.json = Some(refiner.extract(schema, &markdown)?);
            }
            _ => {}
        }

        match self.settings.output_format {
            OutputFormat::Html => output.html = Some(render_html(&pages)),
            OutputFormat::Json if output.json.is_none() => output.json = Some(document_json(&pages)),
            OutputFormat::Chunks => output.chunks = Some(chunks(&pages)),
            _ => {}
        }

        output.metadata = self.metadata(&doc, total_pages);
        output.markdown = Some(markdown);

        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        write_artifacts(output_dir, stem, &output)?;

        Ok(output)
    }
}

impl TextLayerConverter {
    fn read_page(
        &self,
        doc: &Document,
        index: usize,
        images: &mut BTreeMap<String, Vec<u8>>,
    ) -> Result<PageText, EngineError> {
        let page = doc.load_page(index as i32)?;
        let bounds = page.bounds()?;
        let mut text = PageText {
            index,
            width: bounds.x1 - bounds.x0,
            height: bounds.y1 - bounds.y0,
            blocks: Vec::new(),
        };

        if !self.settings.force_ocr {
            let text_page = page.to_text_page(TextPageOptions::PRESERVE_WHITESPACE)?;
            for block in text_page.blocks() {
                let lines: Vec<Line> = block.lines().filter_map(read_line).collect();
                if let Some(block) = Block::from_lines(lines) {
                    text.blocks.push(block);
                }
            }
        }

        if !text.blocks.is_empty() {
            return Ok(text);
        }

        // No usable text layer
        let needs_render = self.settings.extract_images || self.settings.refiner.is_some();
        if !needs_render {
            return Ok(text);
        }

        let matrix = Matrix::new_scale(RENDER_SCALE, RENDER_SCALE);
        let pixmap = page.to_pixmap(&matrix, &Colorspace::device_rgb(), false, false)?;
        let png = encode_png(&pixmap)?;
        let bbox = [0.0, 0.0, text.width, text.height];

        if let Some(refiner) = &self.settings.refiner {
            let recognized = refiner.recognize(&png, Some(&self.settings.lang))?;
            if !recognized.is_empty() {
                text.blocks.push(Block::recognized(recognized, bbox));
                return Ok(text);
            }
        }

        if self.settings.extract_images {
            let name = format!("page_{}.png", index + 1);
            text.blocks.push(Block {
                kind: BlockKind::Image(format!("images/{}", name)),
                text: String::new(),
                bbox,
                size: 0.0,
                lines: Vec::new(),
            });
            images.insert(name, png);
        }

        Ok(text)
    }

    fn render_markdown(&self, pages: &[PageText]) -> Result<Vec<String>, EngineError> {
        let refiner = self.settings.refiner.as_ref();
        let mut rendered = Vec::with_capacity(pages.len());

        for page in pages {
            let markdown = match self.settings.kind {
                ConverterKind::Table => {
                    let tables = page_markdown(page, |b| matches!(b.kind, BlockKind::Table));
                    match refiner {
                        Some(service) if tables.is_empty() => {
                            let all = page_markdown(page, |_| true);
                            if all.is_empty() {
                                all
                            } else {
                                service.complete(TABLE_PROMPT, &all)?
                            }
                        }
                        _ => tables,
                    }
                }
                ConverterKind::Ocr => page
                    .blocks
                    .iter()
                    .flat_map(|b| b.lines.iter().map(|l| l.text.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n"),
                ConverterKind::Standard | ConverterKind::Extraction => {
                    let markdown = page_markdown(page, |_| true);
                    match refiner {
                        Some(service)
                            if self.settings.kind == ConverterKind::Standard && !markdown.is_empty() =>
                        {
                            let prompt = self
                                .settings
                                .block_correction_prompt
                                .as_deref()
                                .unwrap_or(DEFAULT_CORRECTION_PROMPT);
                            refine_or_keep(service, prompt, markdown)
                        }
                        _ => markdown,
                    }
                }
            };
            rendered.push(markdown);
        }

        Ok(rendered)
    }

    fn metadata(&self, doc: &Document, total_pages: usize) -> Map<String, Value> {
        let get_meta = |name: MetadataName| -> Option<String> {
            doc.metadata(name).ok().filter(|s| !s.is_empty())
        };

        let mut meta = Map::new();
        meta.insert("engine".into(), json!("text-layer"));
        meta.insert("converter".into(), json!(self.settings.kind));
        meta.insert("device".into(), json!(self.device.to_string()));
        meta.insert("pageCount".into(), json!(total_pages));
        if let Some(title) = get_meta(MetadataName::Title) {
            meta.insert("title".into(), json!(title));
        }
        if let Some(author) = get_meta(MetadataName::Author) {
            meta.insert("author".into(), json!(author));
        }
        if let Some(refiner) = &self.settings.refiner {
            meta.insert(
                "llm".into(),
                json!({"service": refiner.name(), "model": refiner.model()}),
            );
        }
        meta
    }
}

fn refine_or_keep(service: &RefinementService, prompt: &str, markdown: String) -> String {
    match service.complete(prompt, &markdown) {
        Ok(refined) if !refined.is_empty() => refined,
        Ok(_) => markdown,
        Err(e) => {
            tracing::warn!(service = service.name(), "Refinement failed, keeping extracted text: {}", e);
            markdown
        }
    }
}

// ============================================================================
// Page model
// ============================================================================

struct PageText {
    index: usize,
    width: f32,
    height: f32,
    blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
enum BlockKind {
    Heading(u8),
    Text,
    Table,
    Image(String),
}

struct Block {
    kind: BlockKind,
    text: String,
    bbox: [f32; 4],
    size: f32,
    lines: Vec<Line>,
}

struct Line {
    text: String,
    cells: Vec<String>,
    bbox: [f32; 4],
    size: f32,
}

impl Block {
    fn from_lines(lines: Vec<Line>) -> Option<Self> {
        if lines.is_empty() {
            return None;
        }
        let mut bbox = lines[0].bbox;
        let mut size = 0.0f32;
        for line in &lines {
            bbox = union(bbox, line.bbox);
            size = size.max(line.size);
        }
        let text = lines
            .iter()
            .map(|l| l.text.trim())
            .collect::<Vec<_>>()
            .join(" ");
        Some(Self {
            kind: BlockKind::Text,
            text,
            bbox,
            size,
            lines,
        })
    }

    fn recognized(text: String, bbox: [f32; 4]) -> Self {
        let lines = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Line {
                text: l.to_string(),
                cells: vec![l.to_string()],
                bbox,
                size: 0.0,
            })
            .collect();
        Self {
            kind: BlockKind::Text,
            text,
            bbox,
            size: 0.0,
            lines,
        }
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            BlockKind::Heading(_) => "heading",
            BlockKind::Text => "text",
            BlockKind::Table => "table",
            BlockKind::Image(_) => "image",
        }
    }
}

fn read_line(line: mupdf::TextLine<'_>) -> Option<Line> {
    let mut text = String::new();
    let mut cells = vec![String::new()];
    let mut bbox = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
    let mut size = 0.0f32;
    let mut last_x1: Option<f32> = None;

    for ch in line.chars() {
        let Some(c) = ch.char() else { continue };
        let quad = ch.quad();
        let x0 = quad.ul.x.min(quad.ll.x);
        let x1 = quad.ur.x.max(quad.lr.x);
        let y0 = quad.ul.y.min(quad.ur.y);
        let y1 = quad.ll.y.max(quad.lr.y);
        let char_size = ch.size();
        size = size.max(char_size);

        if let Some(prev) = last_x1 {
            let current_filled = cells.last().map(|c| !c.trim().is_empty()).unwrap_or(false);
            if x0 - prev > char_size * CELL_GAP_EM && current_filled {
                cells.push(String::new());
                text.push(' ');
            }
        }

        text.push(c);
        if let Some(cell) = cells.last_mut() {
            cell.push(c);
        }
        bbox = union(bbox, [x0, y0, x1, y1]);
        last_x1 = Some(x1);
    }

    if text.trim().is_empty() {
        return None;
    }

    let cells = cells
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    Some(Line {
        text: text.trim().to_string(),
        cells,
        bbox,
        size,
    })
}

fn union(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])]
}

/// Median line font size across the document
fn body_font_size(pages: &[PageText]) -> f32 {
    let mut sizes: Vec<f32> = pages
        .iter()
        .flat_map(|p| p.blocks.iter().flat_map(|b| b.lines.iter().map(|l| l.size)))
        .filter(|s| *s > 0.0)
        .collect();
    if sizes.is_empty() {
        return 0.0;
    }
    sizes.sort_by(|a, b| a.total_cmp(b));
    sizes[sizes.len() / 2]
}

fn classify_blocks(page: &mut PageText, body_size: f32, detect_tables: bool) {
    for block in &mut page.blocks {
        if !matches!(block.kind, BlockKind::Text) {
            continue;
        }

        let tabular = detect_tables
            && block.lines.len() >= 2
            && block.lines.iter().all(|l| l.cells.len() >= 2 && l.cells.len() == block.lines[0].cells.len());
        if tabular {
            block.kind = BlockKind::Table;
            continue;
        }

        if body_size > 0.0 && block.lines.len() <= 2 && block.text.chars().count() < 200 {
            if block.size >= body_size * 1.5 {
                block.kind = BlockKind::Heading(1);
            } else if block.size >= body_size * 1.2 {
                block.kind = BlockKind::Heading(2);
            }
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn block_markdown(block: &Block) -> String {
    match &block.kind {
        BlockKind::Heading(level) => format!("{} {}", "#".repeat(*level as usize), block.text),
        BlockKind::Text => block.text.clone(),
        BlockKind::Table => {
            let mut rows = block.lines.iter().map(|l| format!("| {} |", l.cells.join(" | ")));
            let mut out = Vec::with_capacity(block.lines.len() + 1);
            if let Some(header) = rows.next() {
                out.push(header);
                out.push(format!("|{}", " --- |".repeat(block.lines[0].cells.len())));
            }
            out.extend(rows);
            out.join("\n")
        }
        BlockKind::Image(path) => format!("![]({})", path),
    }
}

fn page_markdown(page: &PageText, include: impl Fn(&Block) -> bool) -> String {
    page.blocks
        .iter()
        .filter(|b| include(b))
        .map(block_markdown)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn join_pages(pages: &[PageText], rendered: &[String], paginate: bool) -> String {
    if !paginate {
        return rendered
            .iter()
            .filter(|m| !m.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    pages
        .iter()
        .zip(rendered)
        .map(|(page, markdown)| format!("\n\n{}{}\n\n{}", page.index, PAGE_SEPARATOR, markdown))
        .collect::<String>()
        .trim_start()
        .to_string()
}

fn render_html(pages: &[PageText]) -> String {
    let mut html = String::new();
    for page in pages {
        html.push_str(&format!("<div class=\"page\" data-page-id=\"{}\">\n", page.index));
        for block in &page.blocks {
            let escaped = html_escape::encode_text(&block.text);
            match &block.kind {
                BlockKind::Heading(level) => {
                    html.push_str(&format!("<h{l}>{}</h{l}>\n", escaped, l = level));
                }
                BlockKind::Text => html.push_str(&format!("<p>{}</p>\n", escaped)),
                BlockKind::Table => {
                    html.push_str("<table>\n");
                    for line in &block.lines {
                        html.push_str("<tr>");
                        for cell in &line.cells {
                            html.push_str(&format!("<td>{}</td>", html_escape::encode_text(cell)));
                        }
                        html.push_str("</tr>\n");
                    }
                    html.push_str("</table>\n");
                }
                BlockKind::Image(path) => html.push_str(&format!(
                    "<img src=\"{}\"/>\n",
                    html_escape::encode_double_quoted_attribute(path)
                )),
            }
        }
        html.push_str("</div>\n");
    }
    html
}

fn content_list(pages: &[PageText]) -> Value {
    let items: Vec<Value> = pages
        .iter()
        .flat_map(|page| {
            page.blocks.iter().map(move |block| match &block.kind {
                BlockKind::Heading(level) => json!({
                    "type": "text",
                    "text": block.text,
                    "text_level": level,
                    "page_idx": page.index,
                    "bbox": block.bbox,
                }),
                BlockKind::Text => json!({
                    "type": "text",
                    "text": block.text,
                    "page_idx": page.index,
                    "bbox": block.bbox,
                }),
                BlockKind::Table => json!({
                    "type": "table",
                    "table_body": block_markdown(block),
                    "page_idx": page.index,
                    "bbox": block.bbox,
                }),
                BlockKind::Image(path) => json!({
                    "type": "image",
                    "img_path": path,
                    "page_idx": page.index,
                    "bbox": block.bbox,
                }),
            })
        })
        .collect();
    Value::Array(items)
}

fn document_json(pages: &[PageText]) -> Value {
    let pages: Vec<Value> = pages
        .iter()
        .map(|page| {
            json!({
                "page": page.index,
                "width": page.width,
                "height": page.height,
                "blocks": page.blocks.iter().map(|b| json!({
                    "type": b.type_name(),
                    "text": b.text,
                    "markdown": block_markdown(b),
                    "bbox": b.bbox,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "pages": pages })
}

fn ocr_json(pages: &[PageText]) -> Value {
    let pages: Vec<Value> = pages
        .iter()
        .map(|page| {
            json!({
                "page": page.index,
                "width": page.width,
                "height": page.height,
                "lines": page.blocks.iter().flat_map(|b| b.lines.iter().map(|l| json!({
                    "text": l.text,
                    "bbox": l.bbox,
                    "fontSize": l.size,
                }))).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "pages": pages })
}

fn chunks(pages: &[PageText]) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            page.blocks.iter().enumerate().map(move |(i, block)| Chunk {
                id: format!("/page/{}/block/{}", page.index, i),
                page: page.index,
                block_type: block.type_name().to_string(),
                text: block_markdown(block),
                bbox: Some(block.bbox),
            })
        })
        .collect()
}

/// Encode a MuPDF pixmap as PNG bytes
fn encode_png(pixmap: &mupdf::Pixmap) -> Result<Vec<u8>, EngineError> {
    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let samples = pixmap.samples();
    let n = pixmap.n() as usize;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let offset = (y * width as usize + x) * n;
            let r = samples.get(offset).copied().unwrap_or(0);
            let g = samples.get(offset + 1).copied().unwrap_or(r);
            let b = samples.get(offset + 2).copied().unwrap_or(r);
            rgb.extend_from_slice(&[r, g, b]);
        }
    }

    let img = image::RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| EngineError::execution("Failed to create image buffer"))?;

    let mut output = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut output), image::ImageFormat::Png)
        .map_err(|e| EngineError::execution(format!("Failed to encode page image: {}", e)))?;
    Ok(output)
}
