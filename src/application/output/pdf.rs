//! PDF 1.7 serialisation of laid-out pages.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use time::{OffsetDateTime, UtcOffset};

use super::fonts::{FontFace, StandardFont, TrueTypeFont, win_ansi};
use super::layout::{DrawOp, Page, Rgb};

const PRODUCER: &str = concat!("quire ", env!("CARGO_PKG_VERSION"));

pub(super) struct PdfOptions {
    pub page_size: (f32, f32),
    pub created: OffsetDateTime,
    pub archival: bool,
}

/// Byte buffer that remembers where each object starts.
struct ObjectWriter {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl ObjectWriter {
    fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n");
        Self {
            buf,
            offsets: Vec::new(),
        }
    }

    fn reserve(&mut self) -> usize {
        self.offsets.push(0);
        self.offsets.len()
    }

    fn object(&mut self, id: usize, body: &str) {
        self.offsets[id - 1] = self.buf.len();
        self.buf
            .extend_from_slice(format!("{id} 0 obj\n{body}\nendobj\n").as_bytes());
    }

    fn stream(&mut self, id: usize, dict: &str, data: &[u8]) {
        self.offsets[id - 1] = self.buf.len();
        self.buf.extend_from_slice(
            format!("{id} 0 obj\n<< {dict} /Length {} >>\nstream\n", data.len()).as_bytes(),
        );
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
    }

    fn finish(mut self, root: usize, info: usize) -> Vec<u8> {
        let file_id = hex::encode(&Sha256::digest(&self.buf)[..16]);
        let xref = self.buf.len();
        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", self.offsets.len() + 1);
        for offset in &self.offsets {
            let _ = writeln!(table, "{offset:010} 00000 n ");
        }
        let _ = write!(
            table,
            "trailer\n<< /Size {} /Root {root} 0 R /Info {info} 0 R /ID [<{file_id}> <{file_id}>] >>\nstartxref\n{xref}\n%%EOF\n",
            self.offsets.len() + 1,
        );
        self.buf.extend_from_slice(table.as_bytes());
        self.buf
    }
}

/// Compact decimal form used in content streams.
fn num(value: f32) -> String {
    let text = format!("{value:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" { "0".to_string() } else { text.to_string() }
}

fn colour(Rgb(r, g, b): Rgb) -> String {
    format!("{} {} {}", num(r), num(g), num(b))
}

/// Literal string in WinAnsiEncoding. Unmappable characters become `?`.
fn ansi_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for c in text.chars() {
        let byte = win_ansi(c).unwrap_or(b'?');
        match byte {
            b'(' | b')' | b'\\' => {
                out.push('\\');
                out.push(char::from(byte));
            }
            0x20..=0x7E => out.push(char::from(byte)),
            _ => {
                let _ = write!(out, "\\{byte:03o}");
            }
        }
    }
    out.push(')');
    out
}

fn glyph_string(font: &TrueTypeFont, text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 4 + 2);
    out.push('<');
    for c in text.chars() {
        let _ = write!(out, "{:04X}", font.glyph_id(c));
    }
    out.push('>');
    out
}

/// PDF name token: everything outside `[A-Za-z0-9-]` is dropped.
fn pdf_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if cleaned.is_empty() { "Embedded".to_string() } else { cleaned }
}

fn content_stream(page: &Page, faces: &[FontFace]) -> Vec<u8> {
    let mut out = String::new();
    for op in &page.ops {
        match op {
            DrawOp::Text {
                x,
                y,
                font,
                size,
                color,
                text,
            } => {
                let encoded = match faces.get(*font) {
                    Some(FontFace::Embedded(ttf)) => glyph_string(ttf, text),
                    _ => ansi_string(text),
                };
                let _ = writeln!(
                    out,
                    "BT /F{font} {} Tf {} rg {} {} Td {encoded} Tj ET",
                    num(*size),
                    colour(*color),
                    num(*x),
                    num(*y),
                );
            }
            DrawOp::Rect {
                x,
                y,
                width,
                height,
                color,
            } => {
                let _ = writeln!(
                    out,
                    "{} rg {} {} {} {} re f",
                    colour(*color),
                    num(*x),
                    num(*y),
                    num(*width),
                    num(*height),
                );
            }
            DrawOp::Line {
                x1,
                y1,
                x2,
                y2,
                width,
                color,
            } => {
                let _ = writeln!(
                    out,
                    "{} w {} RG {} {} m {} {} l S",
                    num(*width),
                    colour(*color),
                    num(*x1),
                    num(*y1),
                    num(*x2),
                    num(*y2),
                );
            }
        }
    }
    out.into_bytes()
}

/// Characters each face is used for, keyed by face index.
fn used_chars(pages: &[Page]) -> BTreeMap<usize, BTreeSet<char>> {
    let mut used: BTreeMap<usize, BTreeSet<char>> = BTreeMap::new();
    for op in pages.iter().flat_map(|page| &page.ops) {
        if let DrawOp::Text { font, text, .. } = op {
            used.entry(*font).or_default().extend(text.chars());
        }
    }
    used
}

fn standard_font(font: StandardFont) -> String {
    format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
        font.base_font()
    )
}

fn to_unicode_cmap(glyphs: &BTreeMap<u16, char>) -> Vec<u8> {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let entries: Vec<_> = glyphs.iter().collect();
    for chunk in entries.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (glyph, c) in chunk {
            let mut units = [0u16; 2];
            let hex: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|unit| format!("{unit:04X}"))
                .collect();
            let _ = writeln!(cmap, "<{glyph:04X}> <{hex}>");
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend");
    cmap.into_bytes()
}

/// Type0 font with an Identity-H CIDFontType2 descendant and the whole
/// TrueType file embedded. Returns the id of the Type0 object.
fn embed_truetype(
    writer: &mut ObjectWriter,
    font: &TrueTypeFont,
    chars: Option<&BTreeSet<char>>,
) -> usize {
    let type0 = writer.reserve();
    let cid_font = writer.reserve();
    let descriptor = writer.reserve();
    let file = writer.reserve();
    let to_unicode = writer.reserve();
    let name = pdf_name(&font.name);

    let glyphs: BTreeMap<u16, char> = chars
        .into_iter()
        .flatten()
        .map(|c| (font.glyph_id(*c), *c))
        .filter(|(glyph, _)| *glyph != 0)
        .collect();
    let mut widths = String::new();
    for glyph in glyphs.keys() {
        let _ = write!(widths, "{glyph} [{}] ", num(font.advance(*glyph)));
    }

    writer.object(
        type0,
        &format!(
            "<< /Type /Font /Subtype /Type0 /BaseFont /{name} /Encoding /Identity-H \
             /DescendantFonts [{cid_font} 0 R] /ToUnicode {to_unicode} 0 R >>"
        ),
    );
    writer.object(
        cid_font,
        &format!(
            "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /{name} \
             /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> \
             /FontDescriptor {descriptor} 0 R /CIDToGIDMap /Identity /DW 1000 /W [{widths}] >>"
        ),
    );
    let [x_min, y_min, x_max, y_max] = font.bbox.map(|v| num(font.scale(i32::from(v))));
    let ascent = num(font.scale(i32::from(font.ascent)));
    writer.object(
        descriptor,
        &format!(
            "<< /Type /FontDescriptor /FontName /{name} /Flags 32 \
             /FontBBox [{x_min} {y_min} {x_max} {y_max}] /ItalicAngle 0 \
             /Ascent {ascent} /Descent {} /CapHeight {ascent} /StemV 80 \
             /FontFile2 {file} 0 R >>",
            num(font.scale(i32::from(font.descent))),
        ),
    );
    writer.stream(file, &format!("/Length1 {}", font.data.len()), &font.data);
    writer.stream(to_unicode, "", &to_unicode_cmap(&glyphs));
    type0
}

fn pdf_date(created: OffsetDateTime) -> String {
    let utc = created.to_offset(UtcOffset::UTC);
    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}Z",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
    )
}

fn xmp_metadata(created: OffsetDateTime) -> Vec<u8> {
    let utc = created.to_offset(UtcOffset::UTC);
    let date = format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
    );
    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description rdf:about="" xmlns:pdfaid="http://www.aiim.org/pdfa/ns/id/">
<pdfaid:part>2</pdfaid:part>
<pdfaid:conformance>B</pdfaid:conformance>
</rdf:Description>
<rdf:Description rdf:about="" xmlns:xmp="http://ns.adobe.com/xap/1.0/">
<xmp:CreateDate>{date}</xmp:CreateDate>
<xmp:ModifyDate>{date}</xmp:ModifyDate>
<xmp:CreatorTool>{PRODUCER}</xmp:CreatorTool>
</rdf:Description>
<rdf:Description rdf:about="" xmlns:pdf="http://ns.adobe.com/pdf/1.3/">
<pdf:Producer>{PRODUCER}</pdf:Producer>
</rdf:Description>
</rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#
    )
    .into_bytes()
}

pub(super) fn write_pdf(pages: &[Page], faces: &[FontFace], options: &PdfOptions) -> Vec<u8> {
    let mut writer = ObjectWriter::new();
    let catalog = writer.reserve();
    let page_tree = writer.reserve();

    let used = used_chars(pages);
    let mut font_refs = String::new();
    for (index, face) in faces.iter().enumerate() {
        let id = match face {
            FontFace::Standard(font) => {
                let id = writer.reserve();
                writer.object(id, &standard_font(*font));
                id
            }
            FontFace::Embedded(font) => embed_truetype(&mut writer, font, used.get(&index)),
        };
        let _ = write!(font_refs, "/F{index} {id} 0 R ");
    }

    let (width, height) = options.page_size;
    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let page_id = writer.reserve();
        let content_id = writer.reserve();
        writer.stream(content_id, "", &content_stream(page, faces));
        writer.object(
            page_id,
            &format!(
                "<< /Type /Page /Parent {page_tree} 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << {font_refs}>> >> /Contents {content_id} 0 R >>",
                num(width),
                num(height),
            ),
        );
        kids.push(format!("{page_id} 0 R"));
    }
    writer.object(
        page_tree,
        &format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            kids.len()
        ),
    );

    let metadata = if options.archival {
        let id = writer.reserve();
        writer.stream(id, "/Type /Metadata /Subtype /XML", &xmp_metadata(options.created));
        format!(" /Metadata {id} 0 R")
    } else {
        String::new()
    };
    writer.object(
        catalog,
        &format!("<< /Type /Catalog /Pages {page_tree} 0 R{metadata} >>"),
    );

    let info = writer.reserve();
    writer.object(
        info,
        &format!(
            "<< /Producer ({PRODUCER}) /CreationDate ({}) >>",
            pdf_date(options.created)
        ),
    );
    writer.finish(catalog, info)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::application::output::fonts::tests::sample_font;

    fn text_op(font: usize, text: &str) -> DrawOp {
        DrawOp::Text {
            x: 10.0,
            y: 20.0,
            font,
            size: 12.0,
            color: Rgb(0.0, 0.0, 0.0),
            text: text.to_string(),
        }
    }

    fn options(archival: bool) -> PdfOptions {
        PdfOptions {
            page_size: (595.28, 841.89),
            created: datetime!(2026-03-01 12:30:00 UTC),
            archival,
        }
    }

    #[test]
    fn numbers_are_compact() {
        assert_eq!(num(12.0), "12");
        assert_eq!(num(0.5), "0.5");
        assert_eq!(num(595.28), "595.28");
        assert_eq!(num(-0.001), "0");
    }

    #[test]
    fn ansi_strings_escape_delimiters_and_high_bytes() {
        assert_eq!(ansi_string(r"a(b)\c"), r"(a\(b\)\\c)");
        assert_eq!(ansi_string("é"), r"(\351)");
        assert_eq!(ansi_string("\u{4E16}"), "(?)");
    }

    #[test]
    fn writes_a_well_formed_file() {
        let faces = vec![FontFace::Standard(StandardFont::Helvetica)];
        let pages = vec![
            Page {
                ops: vec![text_op(0, "Hello")],
            },
            Page::default(),
        ];
        let bytes = write_pdf(&pages, &faces, &options(false));
        let text = String::from_utf8_lossy(&bytes);

        assert!(bytes.starts_with(b"%PDF-1.7\n"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert!(text.contains("/Count 2"));
        assert!(text.contains("/BaseFont /Helvetica"));
        assert!(text.contains("BT /F0 12 Tf 0 0 0 rg 10 20 Td (Hello) Tj ET"));
        assert!(text.contains("/CreationDate (D:20260301123000Z)"));
        assert!(!text.contains("/Metadata"));

        let startxref = text.rfind("startxref\n").unwrap() + "startxref\n".len();
        let offset: usize = text[startxref..].lines().next().unwrap().parse().unwrap();
        assert!(bytes[offset..].starts_with(b"xref\n"));
    }

    #[test]
    fn output_is_deterministic_for_a_fixed_timestamp() {
        let faces = vec![FontFace::Standard(StandardFont::HelveticaBold)];
        let pages = vec![Page {
            ops: vec![text_op(0, "same")],
        }];
        assert_eq!(
            write_pdf(&pages, &faces, &options(false)),
            write_pdf(&pages, &faces, &options(false))
        );
    }

    #[test]
    fn archival_files_embed_fonts_and_metadata() {
        let font = TrueTypeFont::parse("Body Sans", sample_font(0)).unwrap();
        let faces = vec![FontFace::Embedded(Arc::new(font))];
        let pages = vec![Page {
            ops: vec![text_op(0, "AB")],
        }];
        let bytes = write_pdf(&pages, &faces, &options(true));
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.contains("/Subtype /Type0 /BaseFont /BodySans /Encoding /Identity-H"));
        assert!(text.contains("/CIDToGIDMap /Identity"));
        assert!(text.contains("/W [1 [600] 2 [700] ]"));
        assert!(text.contains("/FontFile2"));
        assert!(text.contains("<00010002> Tj"));
        assert!(text.contains("<0001> <0041>"));
        assert!(text.contains("<pdfaid:part>2</pdfaid:part>"));
        assert!(text.contains("<xmp:CreateDate>2026-03-01T12:30:00Z</xmp:CreateDate>"));
        assert!(text.contains("/Metadata"));
    }
}
