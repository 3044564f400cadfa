//! Text normalization: invisible-character filtering, NFKC, homoglyph folding.
//!
//! Runs before any pattern engine call so that obfuscated attacks
//! ("i\u{200B}gnore", Cyrillic lookalikes, full-width text) are matched in
//! their canonical ASCII-ish form. Pure and side-effect-free; each step is
//! independently toggleable.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Which normalization steps run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    pub strip_invisible: bool,
    pub nfkc: bool,
    pub fold_homoglyphs: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            strip_invisible: true,
            nfkc: true,
            fold_homoglyphs: true,
        }
    }
}

/// A single character-level transformation applied during normalization.
///
/// `position` is the character index at the point the transformation was
/// applied: original text for invisible drops, post-NFKC text for homoglyph
/// folds. `replacement` is `None` for dropped characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    pub original: char,
    pub replacement: Option<char>,
    pub position: usize,
}

/// Outcome of a normalization pass.
///
/// The invisible and homoglyph counts are exposed separately because the
/// encoding-bypass detector treats them as independent threat signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub text: String,
    pub invisible_dropped: usize,
    pub homoglyphs_folded: usize,
    pub transformations: Vec<Transformation>,
}

impl NormalizationReport {
    /// Report for text that needed no changes.
    pub fn untouched(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            invisible_dropped: 0,
            homoglyphs_folded: 0,
            transformations: Vec::new(),
        }
    }
}

/// Unicode canonicalizer and obfuscation folder.
#[derive(Debug, Clone, Default)]
pub struct TextNormalizer {
    cfg: NormalizerConfig,
}

impl TextNormalizer {
    pub fn new(cfg: NormalizerConfig) -> Self {
        Self { cfg }
    }

    /// Normalize `text`, returning the canonical form plus transformation
    /// metadata. O(n) in input length; idempotent.
    pub fn normalize(&self, text: &str) -> NormalizationReport {
        let mut transformations = Vec::new();
        let mut invisible_dropped = 0;

        // Step 1: drop invisible code points.
        let filtered: String = if self.cfg.strip_invisible {
            let mut out = String::with_capacity(text.len());
            for (pos, c) in text.chars().enumerate() {
                if is_invisible(c) {
                    invisible_dropped += 1;
                    transformations.push(Transformation {
                        original: c,
                        replacement: None,
                        position: pos,
                    });
                } else {
                    out.push(c);
                }
            }
            out
        } else {
            text.to_string()
        };

        // Step 2: NFKC compatibility composition. Folds full-width forms,
        // mathematical alphanumerics, sub/superscripts, ligatures.
        let composed: String = if self.cfg.nfkc {
            filtered.nfkc().collect()
        } else {
            filtered
        };

        // Step 3: homoglyph folding to ASCII.
        let mut homoglyphs_folded = 0;
        let text = if self.cfg.fold_homoglyphs {
            let mut out = String::with_capacity(composed.len());
            for (pos, c) in composed.chars().enumerate() {
                match fold_homoglyph(c) {
                    Some(ascii) => {
                        homoglyphs_folded += 1;
                        transformations.push(Transformation {
                            original: c,
                            replacement: Some(ascii),
                            position: pos,
                        });
                        out.push(ascii);
                    }
                    None => out.push(c),
                }
            }
            out
        } else {
            composed
        };

        NormalizationReport {
            text,
            invisible_dropped,
            homoglyphs_folded,
            transformations,
        }
    }

    /// Transformation metadata only, without keeping the normalized text.
    pub fn transformations(&self, text: &str) -> Vec<Transformation> {
        self.normalize(text).transformations
    }
}

/// Invisible and formatting code points used to smuggle instructions past
/// pattern matching.
pub fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | // zero width space
        '\u{200C}' | // zero width non-joiner
        '\u{200D}' | // zero width joiner
        '\u{200E}' | // left-to-right mark
        '\u{200F}' | // right-to-left mark
        '\u{2060}' | // word joiner
        '\u{FEFF}' | // zero width no-break space / BOM
        '\u{00AD}' | // soft hyphen
        '\u{180E}' | // Mongolian vowel separator
        '\u{202A}'..='\u{202E}' | // bidi embedding/override controls
        '\u{2066}'..='\u{2069}' | // bidi isolate controls
        '\u{FE00}'..='\u{FE0F}' | // variation selectors
        '\u{E0000}'..='\u{E007F}' // tag characters
    )
}

/// Fold a single visually confusable glyph to its ASCII lookalike.
///
/// Covers Cyrillic and Greek confusables plus full-width forms and
/// mathematical alphanumerics (so the fold still works when NFKC is
/// disabled) and a few punctuation lookalikes. One replacement per source
/// glyph.
pub fn fold_homoglyph(c: char) -> Option<char> {
    // Full-width ASCII block maps by fixed offset.
    if ('\u{FF01}'..='\u{FF5E}').contains(&c) {
        return char::from_u32(c as u32 - 0xFEE0);
    }

    // Mathematical alphanumeric letters: 52-glyph A-Z/a-z blocks.
    let cp = c as u32;
    if (0x1D400..=0x1D6A3).contains(&cp) {
        let offset = (cp - 0x1D400) % 52;
        return if offset < 26 {
            char::from_u32('A' as u32 + offset)
        } else {
            char::from_u32('a' as u32 + offset - 26)
        };
    }
    // Mathematical digits: 10-glyph 0-9 blocks.
    if (0x1D7CE..=0x1D7FF).contains(&cp) {
        return char::from_u32('0' as u32 + (cp - 0x1D7CE) % 10);
    }

    let folded = match c {
        // Cyrillic lowercase
        'а' => 'a',
        'е' => 'e',
        'о' => 'o',
        'р' => 'p',
        'с' => 'c',
        'у' => 'y',
        'х' => 'x',
        'і' => 'i',
        'ј' => 'j',
        'ѕ' => 's',
        'ԁ' => 'd',
        'ԛ' => 'q',
        'ԝ' => 'w',
        'ь' => 'b',
        // Cyrillic uppercase
        'А' => 'A',
        'В' => 'B',
        'Е' => 'E',
        'К' => 'K',
        'М' => 'M',
        'Н' => 'H',
        'О' => 'O',
        'Р' => 'P',
        'С' => 'C',
        'Т' => 'T',
        'У' => 'Y',
        'Х' => 'X',
        'Ѕ' => 'S',
        'І' => 'I',
        'Ј' => 'J',
        'З' => '3',
        // Greek lowercase
        'α' => 'a',
        'ο' => 'o',
        'ν' => 'v',
        'ι' => 'i',
        'κ' => 'k',
        'ρ' => 'p',
        'υ' => 'u',
        'χ' => 'x',
        'τ' => 't',
        'η' => 'n',
        // Greek uppercase
        'Α' => 'A',
        'Β' => 'B',
        'Ε' => 'E',
        'Ζ' => 'Z',
        'Η' => 'H',
        'Ι' => 'I',
        'Κ' => 'K',
        'Μ' => 'M',
        'Ν' => 'N',
        'Ο' => 'O',
        'Ρ' => 'P',
        'Τ' => 'T',
        'Υ' => 'Y',
        'Χ' => 'X',
        // Punctuation lookalikes
        '\u{2018}' | '\u{2019}' => '\'',
        '\u{201C}' | '\u{201D}' => '"',
        '\u{2010}' | '\u{2011}' | '\u{2212}' => '-',
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TextNormalizer {
        TextNormalizer::default()
    }

    #[test]
    fn clean_ascii_is_untouched() {
        let report = normalizer().normalize("What is the capital of France?");
        assert_eq!(report.text, "What is the capital of France?");
        assert_eq!(report.invisible_dropped, 0);
        assert_eq!(report.homoglyphs_folded, 0);
        assert!(report.transformations.is_empty());
    }

    #[test]
    fn strips_zero_width_characters() {
        let report = normalizer().normalize("ig\u{200B}no\u{200D}re");
        assert_eq!(report.text, "ignore");
        assert_eq!(report.invisible_dropped, 2);
    }

    #[test]
    fn strips_tag_characters_and_bom() {
        let report = normalizer().normalize("\u{FEFF}Hello\u{E0041}World");
        assert_eq!(report.text, "HelloWorld");
        assert_eq!(report.invisible_dropped, 2);
    }

    #[test]
    fn nfkc_folds_fullwidth() {
        let report = normalizer().normalize("ｉｇｎｏｒｅ");
        assert_eq!(report.text, "ignore");
    }

    #[test]
    fn folds_cyrillic_lookalikes() {
        // "ignore" with Cyrillic о and е
        let report = normalizer().normalize("ign\u{043E}r\u{0435}");
        assert_eq!(report.text, "ignore");
        assert_eq!(report.homoglyphs_folded, 2);
    }

    #[test]
    fn fold_handles_fullwidth_without_nfkc() {
        let normalizer = TextNormalizer::new(NormalizerConfig {
            strip_invisible: true,
            nfkc: false,
            fold_homoglyphs: true,
        });
        assert_eq!(normalizer.normalize("Ａｂｃ１").text, "Abc1");
    }

    #[test]
    fn mathematical_bold_maps_to_ascii() {
        assert_eq!(fold_homoglyph('\u{1D400}'), Some('A'));
        assert_eq!(fold_homoglyph('\u{1D41A}'), Some('a'));
        assert_eq!(fold_homoglyph('\u{1D7CE}'), Some('0'));
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = normalizer();
        let inputs = [
            "ig\u{200B}nore аll previous",
            "ｆｕｌｌｗｉｄｔｈ ０１２",
            "plain text stays plain",
            "curly \u{201C}quotes\u{201D} fold",
        ];
        for input in inputs {
            let once = n.normalize(input).text;
            let twice = n.normalize(&once).text;
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn filtered_output_contains_no_invisible_chars() {
        let n = normalizer();
        let input = "a\u{200B}b\u{202E}c\u{FE0F}d\u{2066}e";
        let report = n.normalize(input);
        assert!(report.text.chars().all(|c| !is_invisible(c)));
        assert_eq!(report.invisible_dropped, 4);
    }

    #[test]
    fn toggles_disable_individual_steps() {
        let n = TextNormalizer::new(NormalizerConfig {
            strip_invisible: false,
            nfkc: false,
            fold_homoglyphs: false,
        });
        let input = "а\u{200B}ｂ";
        let report = n.normalize(input);
        assert_eq!(report.text, input);
        assert!(report.transformations.is_empty());
    }

    #[test]
    fn transformations_record_positions() {
        let report = normalizer().normalize("x\u{200B}у");
        // One drop at char 1, one fold (Cyrillic у) at post-NFKC char 1.
        assert_eq!(report.transformations.len(), 2);
        assert_eq!(report.transformations[0].replacement, None);
        assert_eq!(report.transformations[0].position, 1);
        assert_eq!(report.transformations[1].replacement, Some('y'));
    }
}
