//! Line-box layout and pagination.
//!
//! Elements are flattened into [`Fragment`]s: unbreakable horizontal bands
//! whose drawing operations are relative to the band's top-left corner. The
//! paginator stacks fragments onto pages and repeats the header and footer.

use std::collections::HashMap;

use serde_json::Value;

use crate::application::render::{Element, RenderedDocument};
use crate::domain::document::{Orientation, PageFormat, PageSettings};
use crate::domain::theme::StyleMap;

use super::OutputError;
use super::fonts::{DEFAULT_FAMILY, FontCache, FontFace, StandardFont};

const MM_TO_PT: f32 = 72.0 / 25.4;
const DEFAULT_FONT_SIZE: f32 = 11.0;
const DEFAULT_LINE_HEIGHT: f32 = 1.3;
const DEFAULT_PARAGRAPH_SPACING: f32 = 4.0;
const DEFAULT_CELL_PADDING: f32 = 4.0;
const DEFAULT_BORDER_WIDTH: f32 = 0.5;
const RUNNING_CONTENT_GAP: f32 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb(pub f32, pub f32, pub f32);

impl Rgb {
    const BLACK: Rgb = Rgb(0.0, 0.0, 0.0);
    const GREY: Rgb = Rgb(0.6, 0.6, 0.6);

    /// `#rgb` or `#rrggbb`.
    fn parse(value: &Value) -> Option<Self> {
        let hex = value.as_str()?.strip_prefix('#')?;
        let channel = |digits: &str| u8::from_str_radix(digits, 16).ok().map(|v| f32::from(v) / 255.0);
        match hex.len() {
            3 => {
                let mut parts = hex.chars().map(|c| channel(&format!("{c}{c}")));
                Some(Rgb(parts.next()??, parts.next()??, parts.next()??))
            }
            6 => Some(Rgb(
                channel(hex.get(0..2)?)?,
                channel(hex.get(2..4)?)?,
                channel(hex.get(4..6)?)?,
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Text {
        x: f32,
        y: f32,
        font: usize,
        size: f32,
        color: Rgb,
        text: String,
    },
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Rgb,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        width: f32,
        color: Rgb,
    },
}

impl DrawOp {
    fn shift(&mut self, dx: f32, dy: f32) {
        match self {
            DrawOp::Text { x, y, .. } | DrawOp::Rect { x, y, .. } => {
                *x += dx;
                *y += dy;
            }
            DrawOp::Line { x1, y1, x2, y2, .. } => {
                *x1 += dx;
                *x2 += dx;
                *y1 += dy;
                *y2 += dy;
            }
        }
    }

    /// Convert from top-down band coordinates to PDF user space.
    fn place(mut self, left: f32, top: f32) -> Self {
        match &mut self {
            DrawOp::Text { x, y, .. } => {
                *x += left;
                *y = top - *y;
            }
            DrawOp::Rect { x, y, height, .. } => {
                *x += left;
                *y = top - *y - *height;
            }
            DrawOp::Line { x1, y1, x2, y2, .. } => {
                *x1 += left;
                *x2 += left;
                *y1 = top - *y1;
                *y2 = top - *y2;
            }
        }
        self
    }
}

/// One unbreakable band of content.
#[derive(Debug, Clone, Default)]
struct Fragment {
    height: f32,
    ops: Vec<DrawOp>,
    page_break: bool,
}

impl Fragment {
    fn spacer(height: f32) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    fn shifted(mut self, dx: f32, dy: f32) -> Self {
        for op in &mut self.ops {
            op.shift(dx, dy);
        }
        self
    }
}

#[derive(Debug, Default)]
pub struct Page {
    pub ops: Vec<DrawOp>,
}

/// Fonts referenced by a document, in resource order.
pub struct FontSet<'c> {
    cache: &'c FontCache,
    archival: bool,
    faces: Vec<FontFace>,
    index: HashMap<(String, bool), usize>,
}

impl<'c> FontSet<'c> {
    pub fn new(cache: &'c FontCache, archival: bool) -> Self {
        Self {
            cache,
            archival,
            faces: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn faces(&self) -> &[FontFace] {
        &self.faces
    }

    fn face(&self, font: usize) -> &FontFace {
        &self.faces[font]
    }

    /// Index of the face for `family`. Without an embeddable file this is a
    /// standard Helvetica face, which archival output does not allow.
    fn resolve(&mut self, family: &str, bold: bool) -> Result<usize, OutputError> {
        if let Some(index) = self.index.get(&(family.to_string(), bold)) {
            return Ok(*index);
        }
        let embedded = self
            .cache
            .face(family, bold)?
            .filter(|font| font.embeddable);
        let face = match embedded {
            Some(font) => FontFace::Embedded(font),
            None if self.archival => {
                return Err(OutputError::ArchivalFontUnavailable {
                    family: family.to_string(),
                });
            }
            None if bold => FontFace::Standard(StandardFont::HelveticaBold),
            None => FontFace::Standard(StandardFont::Helvetica),
        };
        self.faces.push(face);
        let index = self.faces.len() - 1;
        self.index.insert((family.to_string(), bold), index);
        Ok(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Center,
    Right,
}

struct TextStyle {
    font: usize,
    size: f32,
    color: Rgb,
    align: Align,
    line_height: f32,
    margin_top: f32,
    margin_bottom: f32,
}

fn number(styles: &StyleMap, key: &str) -> Option<f32> {
    styles
        .get(key)
        .and_then(Value::as_f64)
        .map(|value| value as f32)
        .filter(|value| value.is_finite() && *value >= 0.0)
}

fn is_bold(styles: &StyleMap) -> bool {
    match styles.get("fontWeight") {
        Some(Value::String(weight)) => weight == "bold" || weight.parse::<u16>().is_ok_and(|w| w >= 600),
        Some(Value::Number(weight)) => weight.as_f64().is_some_and(|w| w >= 600.0),
        _ => false,
    }
}

struct Layouter<'s, 'c> {
    fonts: &'s mut FontSet<'c>,
}

impl Layouter<'_, '_> {
    fn text_style(&mut self, styles: &StyleMap) -> Result<TextStyle, OutputError> {
        let family = styles
            .get("fontFamily")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_FAMILY);
        let align = match styles.get("textAlign").and_then(Value::as_str) {
            Some("center") => Align::Center,
            Some("right") => Align::Right,
            _ => Align::Left,
        };
        Ok(TextStyle {
            font: self.fonts.resolve(family, is_bold(styles))?,
            size: number(styles, "fontSize")
                .filter(|size| *size > 0.0)
                .unwrap_or(DEFAULT_FONT_SIZE),
            color: styles.get("color").and_then(Rgb::parse).unwrap_or(Rgb::BLACK),
            align,
            line_height: number(styles, "lineHeight")
                .filter(|height| *height > 0.0)
                .unwrap_or(DEFAULT_LINE_HEIGHT),
            margin_top: number(styles, "marginTop").unwrap_or(0.0),
            margin_bottom: number(styles, "marginBottom").unwrap_or(DEFAULT_PARAGRAPH_SPACING),
        })
    }

    fn flow(&mut self, elements: &[Element], width: f32) -> Result<Vec<Fragment>, OutputError> {
        let mut out = Vec::new();
        for element in elements {
            match element {
                Element::Paragraph { text, styles } => {
                    out.extend(self.paragraph(text, styles, width)?)
                }
                Element::Block { styles, children } => {
                    out.extend(self.block(styles, children, width)?)
                }
                Element::Columns {
                    gap,
                    ratios,
                    columns,
                } => out.extend(self.columns(*gap, ratios, columns, width)?),
                Element::Table {
                    header_rows,
                    rows,
                    styles,
                } => out.extend(self.table(*header_rows, rows, styles, width)?),
                Element::PageBreak => out.push(Fragment {
                    page_break: true,
                    ..Fragment::default()
                }),
                // Running content is lifted out before layout.
                Element::Header(_) | Element::Footer(_) => {}
            }
        }
        Ok(out)
    }

    fn paragraph(
        &mut self,
        text: &str,
        styles: &StyleMap,
        width: f32,
    ) -> Result<Vec<Fragment>, OutputError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let style = self.text_style(styles)?;
        let face = self.fonts.face(style.font);
        let line_height = style.size * style.line_height;
        let baseline = (line_height - style.size) / 2.0 + style.size * face.ascent() / 1000.0;

        let mut out = Vec::new();
        if style.margin_top > 0.0 {
            out.push(Fragment::spacer(style.margin_top));
        }
        for line in wrap(text, face, style.size, width) {
            let line_width = face.text_width(&line, style.size);
            let x = match style.align {
                Align::Left => 0.0,
                Align::Center => ((width - line_width) / 2.0).max(0.0),
                Align::Right => (width - line_width).max(0.0),
            };
            out.push(Fragment {
                height: line_height,
                ops: vec![DrawOp::Text {
                    x,
                    y: baseline,
                    font: style.font,
                    size: style.size,
                    color: style.color,
                    text: line,
                }],
                page_break: false,
            });
        }
        if style.margin_bottom > 0.0 {
            out.push(Fragment::spacer(style.margin_bottom));
        }
        Ok(out)
    }

    /// Children inset by `padding`; a background is painted behind every band
    /// so it stays continuous across page breaks.
    fn block(
        &mut self,
        styles: &StyleMap,
        children: &[Element],
        width: f32,
    ) -> Result<Vec<Fragment>, OutputError> {
        let padding = number(styles, "padding").unwrap_or(0.0);
        let background = styles.get("backgroundColor").and_then(Rgb::parse);
        let inner = (width - 2.0 * padding).max(1.0);

        let mut bands = Vec::new();
        if padding > 0.0 {
            bands.push(Fragment::spacer(padding));
        }
        bands.extend(
            self.flow(children, inner)?
                .into_iter()
                .map(|fragment| fragment.shifted(padding, 0.0)),
        );
        if padding > 0.0 {
            bands.push(Fragment::spacer(padding));
        }

        if let Some(color) = background {
            for band in bands.iter_mut().filter(|band| !band.page_break) {
                band.ops.insert(
                    0,
                    DrawOp::Rect {
                        x: 0.0,
                        y: 0.0,
                        width,
                        height: band.height,
                        color,
                    },
                );
            }
        }

        let mut out = Vec::with_capacity(bands.len() + 2);
        if let Some(margin) = number(styles, "marginTop").filter(|m| *m > 0.0) {
            out.push(Fragment::spacer(margin));
        }
        out.extend(bands);
        if let Some(margin) = number(styles, "marginBottom").filter(|m| *m > 0.0) {
            out.push(Fragment::spacer(margin));
        }
        Ok(out)
    }

    /// Lay out every column, then join the n-th band of each column into one band.
    fn columns(
        &mut self,
        gap: f32,
        ratios: &[f32],
        columns: &[Vec<Element>],
        width: f32,
    ) -> Result<Vec<Fragment>, OutputError> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let available = (width - gap * (columns.len() - 1) as f32).max(1.0);
        let total: f32 = ratios.iter().sum();

        let mut laid_out = Vec::with_capacity(columns.len());
        let mut x = 0.0;
        for (index, column) in columns.iter().enumerate() {
            let share = ratios.get(index).copied().unwrap_or(1.0);
            let column_width = if total > 0.0 {
                available * share / total
            } else {
                available / columns.len() as f32
            };
            let bands: Vec<Fragment> = self
                .flow(column, column_width)?
                .into_iter()
                .filter(|band| !band.page_break)
                .collect();
            laid_out.push((x, bands));
            x += column_width + gap;
        }

        let rows = laid_out.iter().map(|(_, bands)| bands.len()).max().unwrap_or(0);
        let mut out = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut band = Fragment::default();
            for (x, bands) in &laid_out {
                if let Some(part) = bands.get(row) {
                    band.height = band.height.max(part.height);
                    band.ops
                        .extend(part.clone().shifted(*x, 0.0).ops);
                }
            }
            out.push(band);
        }
        Ok(out)
    }

    /// One band per row; cells stack their content and share the row height.
    fn table(
        &mut self,
        header_rows: usize,
        rows: &[Vec<Vec<Element>>],
        styles: &StyleMap,
        width: f32,
    ) -> Result<Vec<Fragment>, OutputError> {
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        if columns == 0 {
            return Ok(Vec::new());
        }
        let padding = number(styles, "cellPadding").unwrap_or(DEFAULT_CELL_PADDING);
        let border = number(styles, "borderWidth").unwrap_or(DEFAULT_BORDER_WIDTH);
        let border_color = styles.get("borderColor").and_then(Rgb::parse).unwrap_or(Rgb::GREY);
        let header_background = styles.get("headerBackgroundColor").and_then(Rgb::parse);
        let cell_width = width / columns as f32;
        let content_width = (cell_width - 2.0 * padding).max(1.0);

        let mut out = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let mut band = Fragment::default();
            let mut row_height: f32 = 0.0;
            for (column, cell) in row.iter().enumerate() {
                let mut y = padding;
                for part in self.flow(cell, content_width)? {
                    if part.page_break {
                        continue;
                    }
                    let height = part.height;
                    band.ops.extend(
                        part.shifted(column as f32 * cell_width + padding, y).ops,
                    );
                    y += height;
                }
                row_height = row_height.max(y + padding);
            }
            band.height = row_height;

            if row_index < header_rows
                && let Some(color) = header_background
            {
                band.ops.insert(
                    0,
                    DrawOp::Rect {
                        x: 0.0,
                        y: 0.0,
                        width,
                        height: row_height,
                        color,
                    },
                );
            }
            if border > 0.0 {
                let line = |x1, y1, x2, y2| DrawOp::Line {
                    x1,
                    y1,
                    x2,
                    y2,
                    width: border,
                    color: border_color,
                };
                band.ops.push(line(0.0, 0.0, width, 0.0));
                band.ops.push(line(0.0, row_height, width, row_height));
                for column in 0..=columns {
                    let x = column as f32 * cell_width;
                    band.ops.push(line(x, 0.0, x, row_height));
                }
            }
            out.push(band);
        }
        Ok(out)
    }
}

/// Greedy word wrap. Words wider than `width` are split between characters.
fn wrap(text: &str, face: &FontFace, size: f32, width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if face.text_width(&candidate, size) <= width {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            for c in word.chars() {
                line.push(c);
                if face.text_width(&line, size) > width && line.chars().count() > 1 {
                    line.pop();
                    lines.push(std::mem::take(&mut line));
                    line.push(c);
                }
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Page size in points.
pub fn page_size(settings: &PageSettings) -> (f32, f32) {
    let (width, height) = match settings.format {
        PageFormat::A4 => (595.28, 841.89),
        PageFormat::Letter => (612.0, 792.0),
    };
    match settings.orientation {
        Orientation::Portrait => (width, height),
        Orientation::Landscape => (height, width),
    }
}

/// Lay out `document` onto pages. There is always at least one page.
pub fn paginate(document: &RenderedDocument, fonts: &mut FontSet<'_>) -> Result<Vec<Page>, OutputError> {
    let (page_width, page_height) = page_size(&document.page_settings);
    let margins = document.page_settings.margins;
    let left = margins.left * MM_TO_PT;
    let content_width = (page_width - left - margins.right * MM_TO_PT).max(1.0);

    let mut layouter = Layouter { fonts };
    let header = layouter.flow(&document.header, content_width)?;
    let footer = layouter.flow(&document.footer, content_width)?;
    let body = layouter.flow(&document.body, content_width)?;

    let header_height: f32 = header.iter().map(|band| band.height).sum();
    let footer_height: f32 = footer.iter().map(|band| band.height).sum();
    let page_top = page_height - margins.top * MM_TO_PT;
    let page_bottom = margins.bottom * MM_TO_PT;
    let body_top = if header.is_empty() {
        page_top
    } else {
        page_top - header_height - RUNNING_CONTENT_GAP
    };
    let body_bottom = if footer.is_empty() {
        page_bottom
    } else {
        page_bottom + footer_height + RUNNING_CONTENT_GAP
    };

    let mut pages = vec![Page::default()];
    let mut cursor = body_top;
    let mut has_content = false;
    for band in body {
        if band.page_break {
            if has_content {
                pages.push(Page::default());
                cursor = body_top;
                has_content = false;
            }
            continue;
        }
        if !has_content && band.ops.is_empty() {
            continue;
        }
        if has_content && cursor - band.height < body_bottom {
            pages.push(Page::default());
            cursor = body_top;
            has_content = false;
            if band.ops.is_empty() {
                continue;
            }
        }
        if let Some(page) = pages.last_mut() {
            page.ops
                .extend(band.ops.into_iter().map(|op| op.place(left, cursor)));
        }
        cursor -= band.height;
        has_content = true;
    }

    for page in &mut pages {
        let mut top = page_top;
        for band in &header {
            page.ops.extend(band.ops.iter().cloned().map(|op| op.place(left, top)));
            top -= band.height;
        }
        let mut top = page_bottom + footer_height;
        for band in &footer {
            page.ops.extend(band.ops.iter().cloned().map(|op| op.place(left, top)));
            top -= band.height;
        }
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn paragraph(text: &str) -> Element {
        Element::Paragraph {
            text: text.to_string(),
            styles: StyleMap::new(),
        }
    }

    fn texts(page: &Page) -> Vec<&str> {
        page.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn parses_hex_colours() {
        assert_eq!(Rgb::parse(&json!("#ffffff")), Some(Rgb(1.0, 1.0, 1.0)));
        assert_eq!(Rgb::parse(&json!("#000")), Some(Rgb(0.0, 0.0, 0.0)));
        assert_eq!(Rgb::parse(&json!("red")), None);
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let face = FontFace::Standard(StandardFont::Helvetica);
        let width = face.text_width("alpha beta", 10.0);
        let lines = wrap("alpha beta gamma", &face, 10.0, width);
        assert_eq!(lines, vec!["alpha beta", "gamma"]);

        let narrow = wrap("abcdef", &face, 10.0, face.text_width("abc", 10.0));
        assert_eq!(narrow, vec!["abc", "def"]);
    }

    #[test]
    fn page_breaks_and_overflow_start_new_pages() {
        let cache = FontCache::new(None, 1);
        let mut fonts = FontSet::new(&cache, false);
        let mut body: Vec<Element> = (0..80).map(|i| paragraph(&format!("line {i}"))).collect();
        body.insert(1, Element::PageBreak);
        let document = RenderedDocument {
            body,
            header: vec![paragraph("HEAD")],
            footer: vec![paragraph("FOOT")],
            page_settings: PageSettings::default(),
        };

        let pages = paginate(&document, &mut fonts).unwrap();
        assert!(pages.len() >= 3);
        assert_eq!(texts(&pages[0]), vec!["line 0", "HEAD", "FOOT"]);
        for page in &pages {
            assert!(texts(page).contains(&"HEAD"));
            assert!(texts(page).contains(&"FOOT"));
        }
        assert_eq!(fonts.faces().len(), 1);
    }

    #[test]
    fn empty_documents_still_have_a_page() {
        let cache = FontCache::new(None, 1);
        let mut fonts = FontSet::new(&cache, false);
        let pages = paginate(&RenderedDocument::default(), &mut fonts).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].ops.is_empty());
    }

    #[test]
    fn archival_layout_requires_embeddable_fonts() {
        let cache = FontCache::new(None, 1);
        let mut fonts = FontSet::new(&cache, true);
        let document = RenderedDocument {
            body: vec![paragraph("text")],
            ..RenderedDocument::default()
        };
        assert!(matches!(
            paginate(&document, &mut fonts),
            Err(OutputError::ArchivalFontUnavailable { .. })
        ));
    }

    #[test]
    fn tables_draw_cells_side_by_side() {
        let cache = FontCache::new(None, 1);
        let mut fonts = FontSet::new(&cache, false);
        let document = RenderedDocument {
            body: vec![Element::Table {
                header_rows: 1,
                rows: vec![vec![vec![paragraph("a")], vec![paragraph("b")]]],
                styles: StyleMap::from([("headerBackgroundColor".to_string(), json!("#eee"))]),
            }],
            ..RenderedDocument::default()
        };
        let pages = paginate(&document, &mut fonts).unwrap();
        let positions: Vec<(f32, f32)> = pages[0]
            .ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { x, y, .. } => Some((*x, *y)),
                _ => None,
            })
            .collect();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].1, positions[1].1);
        assert!(positions[1].0 > positions[0].0);
        assert!(matches!(pages[0].ops[0], DrawOp::Rect { .. }));
    }
}
