// Pairs of ISO 639-2 bibliographic and terminology codes.
const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("dut", "nld"),
    ("fre", "fra"),
    ("geo", "kat"),
    ("ger", "deu"),
    ("gre", "ell"),
    ("ice", "isl"),
    ("mac", "mkd"),
    ("mao", "mri"),
    ("may", "msa"),
    ("per", "fas"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("tib", "bod"),
    ("wel", "cym"),
];

/// Decodes a DVB string (EN 300 468 Annex A).
///
/// Only UTF-8 is decoded as such, every other character table is read as
/// ISO 8859-1.  Emphasis control codes are dropped and the CR/LF control
/// code becomes a line break.
pub fn decode_text(data: &[u8]) -> String {
    let (utf8, data) = match data.first() {
        None => return String::new(),
        Some(0x15) => (true, &data[1..]),
        Some(0x10) => (false, data.get(3..).unwrap_or_default()),
        Some(0x1F) => (false, data.get(2..).unwrap_or_default()),
        Some(&b) if b < 0x20 => (false, &data[1..]),
        Some(_) => (false, data),
    };
    if utf8 {
        String::from_utf8_lossy(data)
            .chars()
            .filter_map(|c| match c as u32 {
                // Control codes are mapped into the private use area.
                0xE08A => Some('\n'),
                0xE080..=0xE09F => None,
                _ => Some(c),
            })
            .collect()
    } else {
        data.iter()
            .filter_map(|&b| match b {
                0x8A => Some('\n'),
                0x80..=0x9F => None,
                _ => Some(b as char),
            })
            .collect()
    }
}

/// Some broadcasters send upper case or garbage in language codes.
pub fn normalize_language_code(code: &[u8]) -> String {
    code.iter()
        .map(|&b| {
            if b.is_ascii_alphabetic() {
                b.to_ascii_lowercase() as char
            } else {
                '?'
            }
        })
        .collect()
}

/// Compares language codes, treating bibliographic and terminology codes as
/// the same language.
pub fn same_language(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    let (a, b) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
    LANGUAGE_ALIASES
        .iter()
        .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
}
