//! Font metrics: the two standard Helvetica faces and TrueType files from the
//! configured font directory, cached across jobs.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use lru::LruCache;

use crate::util::lock::mutex_lock;

use super::OutputError;

const SOURCE: &str = "application::output::fonts";

/// Family used when a style does not name one.
pub const DEFAULT_FAMILY: &str = "default";

/// Glyph widths in 1/1000 em for WinAnsi codes 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, 1015, 667, 667, 722, 722, 667,
    611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667,
    667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500,
    222, 833, 556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, 975, 722, 722, 722, 722, 667,
    611, 778, 722, 278, 556, 722, 611, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667,
    667, 611, 333, 278, 333, 584, 556, 333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556,
    278, 889, 611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

/// Width used for WinAnsi codes outside the printable ASCII range.
const HELVETICA_FALLBACK_WIDTH: u16 = 556;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
}

impl StandardFont {
    pub fn base_font(self) -> &'static str {
        match self {
            StandardFont::Helvetica => "Helvetica",
            StandardFont::HelveticaBold => "Helvetica-Bold",
        }
    }

    fn width(self, c: char) -> u16 {
        let table = match self {
            StandardFont::Helvetica => &HELVETICA_WIDTHS,
            StandardFont::HelveticaBold => &HELVETICA_BOLD_WIDTHS,
        };
        match win_ansi(c) {
            Some(code @ 32..=126) => table[usize::from(code - 32)],
            _ => HELVETICA_FALLBACK_WIDTH,
        }
    }
}

/// WinAnsi (cp1252) code for `c`, if it has one.
pub fn win_ansi(c: char) -> Option<u8> {
    let code = match c {
        ' '..='~' | '\u{a0}'..='\u{ff}' => return u8::try_from(u32::from(c)).ok(),
        '€' => 0x80,
        '‚' => 0x82,
        '„' => 0x84,
        '…' => 0x85,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '™' => 0x99,
        _ => return None,
    };
    Some(code)
}

/// The subset of a TrueType file needed to measure and embed text.
#[derive(Debug)]
pub struct TrueTypeFont {
    pub name: String,
    pub data: Vec<u8>,
    units_per_em: u16,
    pub ascent: i16,
    pub descent: i16,
    pub bbox: [i16; 4],
    advances: Vec<u16>,
    cmap: HashMap<char, u16>,
    /// False when the OS/2 table forbids embedding.
    pub embeddable: bool,
}

impl TrueTypeFont {
    pub fn parse(name: impl Into<String>, data: Vec<u8>) -> Result<Self, OutputError> {
        let name = name.into();
        let invalid = |reason: &str| OutputError::InvalidFont {
            name: name.clone(),
            reason: reason.to_string(),
        };

        let tables = table_directory(&data).ok_or_else(|| invalid("truncated table directory"))?;
        let table = |tag: &[u8; 4]| tables.get(tag).copied();

        let head = table(b"head").ok_or_else(|| invalid("missing head table"))?;
        let hhea = table(b"hhea").ok_or_else(|| invalid("missing hhea table"))?;
        let hmtx = table(b"hmtx").ok_or_else(|| invalid("missing hmtx table"))?;
        let cmap = table(b"cmap").ok_or_else(|| invalid("missing cmap table"))?;

        let units_per_em = read_u16(&data, head + 18)
            .filter(|units| *units > 0)
            .ok_or_else(|| invalid("bad unitsPerEm"))?;
        let bbox = [
            read_i16(&data, head + 36).unwrap_or(0),
            read_i16(&data, head + 38).unwrap_or(0),
            read_i16(&data, head + 40).unwrap_or(0),
            read_i16(&data, head + 42).unwrap_or(0),
        ];
        let ascent = read_i16(&data, hhea + 4).ok_or_else(|| invalid("bad hhea"))?;
        let descent = read_i16(&data, hhea + 6).ok_or_else(|| invalid("bad hhea"))?;
        let metrics = read_u16(&data, hhea + 34).ok_or_else(|| invalid("bad hhea"))?;

        let advances = (0..usize::from(metrics))
            .map(|glyph| read_u16(&data, hmtx + glyph * 4))
            .collect::<Option<Vec<u16>>>()
            .ok_or_else(|| invalid("truncated hmtx table"))?;
        if advances.is_empty() {
            return Err(invalid("no horizontal metrics"));
        }

        let cmap = parse_cmap(&data, cmap).ok_or_else(|| invalid("no usable cmap subtable"))?;

        // OS/2 fsType bit 1: restricted license embedding.
        let embeddable = table(b"OS/2")
            .and_then(|os2| read_u16(&data, os2 + 8))
            .is_none_or(|fs_type| fs_type & 0x0002 == 0);

        Ok(Self {
            name,
            data,
            units_per_em,
            ascent,
            descent,
            bbox,
            advances,
            cmap,
            embeddable,
        })
    }

    pub fn glyph_id(&self, c: char) -> u16 {
        self.cmap.get(&c).copied().unwrap_or(0)
    }

    /// Advance of `glyph` in 1/1000 em.
    pub fn advance(&self, glyph: u16) -> f32 {
        let units = self
            .advances
            .get(usize::from(glyph))
            .or_else(|| self.advances.last())
            .copied()
            .unwrap_or(0);
        self.scale(i32::from(units))
    }

    /// Convert font units to 1/1000 em.
    pub fn scale(&self, units: i32) -> f32 {
        units as f32 * 1000.0 / f32::from(self.units_per_em)
    }
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_i16(data: &[u8], offset: usize) -> Option<i16> {
    read_u16(data, offset).map(|value| value as i16)
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn table_directory(data: &[u8]) -> Option<HashMap<[u8; 4], usize>> {
    let count = usize::from(read_u16(data, 4)?);
    let mut tables = HashMap::with_capacity(count);
    for index in 0..count {
        let record = 12 + index * 16;
        let tag: [u8; 4] = data.get(record..record + 4)?.try_into().ok()?;
        let offset = usize::try_from(read_u32(data, record + 8)?).ok()?;
        tables.insert(tag, offset);
    }
    Some(tables)
}

/// Character to glyph map from the first Unicode format 4 subtable.
fn parse_cmap(data: &[u8], cmap: usize) -> Option<HashMap<char, u16>> {
    let count = usize::from(read_u16(data, cmap + 2)?);
    let subtable = (0..count).find_map(|index| {
        let record = cmap + 4 + index * 8;
        let platform = read_u16(data, record)?;
        let encoding = read_u16(data, record + 2)?;
        let offset = cmap + usize::try_from(read_u32(data, record + 4)?).ok()?;
        let unicode = platform == 0 || (platform == 3 && encoding == 1);
        (unicode && read_u16(data, offset)? == 4).then_some(offset)
    })?;

    let segments = usize::from(read_u16(data, subtable + 6)? / 2);
    let ends = subtable + 14;
    let starts = ends + segments * 2 + 2;
    let deltas = starts + segments * 2;
    let range_offsets = deltas + segments * 2;

    let mut map = HashMap::new();
    for segment in 0..segments {
        let end = read_u16(data, ends + segment * 2)?;
        let start = read_u16(data, starts + segment * 2)?;
        let delta = read_u16(data, deltas + segment * 2)?;
        let range_offset_at = range_offsets + segment * 2;
        let range_offset = usize::from(read_u16(data, range_offset_at)?);
        if start > end {
            continue;
        }
        for code in start..=end {
            if code == 0xFFFF {
                break;
            }
            let glyph = if range_offset == 0 {
                code.wrapping_add(delta)
            } else {
                let at = range_offset_at + range_offset + usize::from(code - start) * 2;
                match read_u16(data, at) {
                    Some(0) | None => 0,
                    Some(glyph) => glyph.wrapping_add(delta),
                }
            };
            if glyph != 0
                && let Some(c) = char::from_u32(u32::from(code))
            {
                map.insert(c, glyph);
            }
        }
    }
    Some(map)
}

/// A face text can be set in.
#[derive(Debug, Clone)]
pub enum FontFace {
    Standard(StandardFont),
    Embedded(Arc<TrueTypeFont>),
}

impl FontFace {
    /// Width of `text` at `size` points.
    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let units: f32 = match self {
            FontFace::Standard(font) => text.chars().map(|c| f32::from(font.width(c))).sum(),
            FontFace::Embedded(font) => text
                .chars()
                .map(|c| font.advance(font.glyph_id(c)))
                .sum(),
        };
        units * size / 1000.0
    }

    /// Ascender in 1/1000 em.
    pub fn ascent(&self) -> f32 {
        match self {
            FontFace::Standard(_) => 718.0,
            FontFace::Embedded(font) => font.scale(i32::from(font.ascent)),
        }
    }
}

/// TrueType files from one directory, kept in an LRU keyed by path.
///
/// `<family>.ttf` is the regular face and `<family>-Bold.ttf` the bold face.
pub struct FontCache {
    dir: Option<PathBuf>,
    fonts: Mutex<LruCache<PathBuf, Arc<TrueTypeFont>>>,
}

impl FontCache {
    pub fn new(dir: Option<PathBuf>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir,
            fonts: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The TrueType face for `family`, or `None` when no file provides it.
    /// A missing bold file falls back to the regular one.
    pub fn face(&self, family: &str, bold: bool) -> Result<Option<Arc<TrueTypeFont>>, OutputError> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let mut candidates = Vec::with_capacity(2);
        if bold {
            candidates.push(dir.join(format!("{family}-Bold.ttf")));
        }
        candidates.push(dir.join(format!("{family}.ttf")));

        for path in candidates {
            if let Some(font) = mutex_lock(&self.fonts, SOURCE, "get").get(&path) {
                return Ok(Some(Arc::clone(font)));
            }
            let data = match std::fs::read(&path) {
                Ok(data) => data,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(OutputError::FontLoad { path, source }),
            };
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| family.to_string());
            let font = Arc::new(TrueTypeFont::parse(name, data)?);
            mutex_lock(&self.fonts, SOURCE, "put").put(path, Arc::clone(&font));
            return Ok(Some(font));
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.fonts, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A tiny but well-formed TrueType file mapping `A` and `B` to glyphs 1 and 2.
    pub(crate) fn sample_font(fs_type: u16) -> Vec<u8> {
        fn be16(out: &mut Vec<u8>, value: u16) {
            out.extend_from_slice(&value.to_be_bytes());
        }

        let mut head = vec![0u8; 54];
        head[18..20].copy_from_slice(&1000u16.to_be_bytes());
        head[36..44].copy_from_slice(&[0, 0, 0, 0, 3, 232, 3, 232]);

        let mut hhea = vec![0u8; 36];
        hhea[4..6].copy_from_slice(&800i16.to_be_bytes());
        hhea[6..8].copy_from_slice(&(-200i16).to_be_bytes());
        hhea[34..36].copy_from_slice(&3u16.to_be_bytes());

        let mut hmtx = Vec::new();
        for advance in [500u16, 600, 700] {
            be16(&mut hmtx, advance);
            be16(&mut hmtx, 0);
        }

        // cmap with one (3,1) format 4 subtable: segment 'A'..='B' plus the 0xFFFF terminator.
        let mut cmap = Vec::new();
        be16(&mut cmap, 0);
        be16(&mut cmap, 1);
        be16(&mut cmap, 3);
        be16(&mut cmap, 1);
        cmap.extend_from_slice(&12u32.to_be_bytes());
        let delta = 1u16.wrapping_sub(u16::from(b'A'));
        for value in [4u16, 32, 0, 4, 4, 1, 0, u16::from(b'B'), 0xFFFF, 0] {
            be16(&mut cmap, value);
        }
        for value in [u16::from(b'A'), 0xFFFF, delta, 1, 0, 0] {
            be16(&mut cmap, value);
        }

        let mut os2 = vec![0u8; 10];
        os2[8..10].copy_from_slice(&fs_type.to_be_bytes());

        let tables: [(&[u8; 4], Vec<u8>); 5] = [
            (b"OS/2", os2),
            (b"cmap", cmap),
            (b"head", head),
            (b"hhea", hhea),
            (b"hmtx", hmtx),
        ];
        let mut out = Vec::new();
        out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        be16(&mut out, tables.len() as u16);
        out.extend_from_slice(&[0; 6]);
        let mut offset = 12 + tables.len() * 16;
        let mut body = Vec::new();
        for (tag, data) in &tables {
            out.extend_from_slice(*tag);
            out.extend_from_slice(&[0; 4]);
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            offset += data.len();
            body.extend_from_slice(data);
        }
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn helvetica_widths_follow_the_afm() {
        let regular = FontFace::Standard(StandardFont::Helvetica);
        let bold = FontFace::Standard(StandardFont::HelveticaBold);
        assert_eq!(regular.text_width("W", 1000.0), 944.0);
        assert_eq!(regular.text_width("il", 10.0), 4.44);
        assert!(bold.text_width("bold", 12.0) > regular.text_width("bold", 12.0));
    }

    #[test]
    fn win_ansi_covers_latin1_and_typographic_quotes() {
        assert_eq!(win_ansi('A'), Some(65));
        assert_eq!(win_ansi('é'), Some(0xE9));
        assert_eq!(win_ansi('’'), Some(0x92));
        assert_eq!(win_ansi('漢'), None);
    }

    #[test]
    fn parses_truetype_metrics() {
        let font = TrueTypeFont::parse("Sample", sample_font(0)).unwrap();
        assert_eq!(font.glyph_id('A'), 1);
        assert_eq!(font.glyph_id('B'), 2);
        assert_eq!(font.glyph_id('C'), 0);
        assert_eq!(font.advance(2), 700.0);
        assert_eq!(font.ascent, 800);
        assert!(font.embeddable);

        let restricted = TrueTypeFont::parse("Locked", sample_font(0x0002)).unwrap();
        assert!(!restricted.embeddable);

        assert!(TrueTypeFont::parse("Broken", vec![0; 8]).is_err());
    }

    #[test]
    fn cache_loads_once_and_falls_back_to_regular() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Body.ttf"), sample_font(0)).unwrap();
        let cache = FontCache::new(Some(dir.path().to_path_buf()), 4);

        let regular = cache.face("Body", false).unwrap().unwrap();
        let bold = cache.face("Body", true).unwrap().unwrap();
        assert!(Arc::ptr_eq(&regular, &bold));
        assert_eq!(cache.len(), 1);
        assert!(cache.face("Missing", false).unwrap().is_none());

        let no_dir = FontCache::new(None, 4);
        assert!(no_dir.face("Body", false).unwrap().is_none());
    }
}
