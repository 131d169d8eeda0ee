use unicode_normalization::UnicodeNormalization;

/// Fold text into a comparison key: NFKC, lower-case, and only
/// alphanumerics or Japanese script kept.
pub fn normalize_text(s: &str) -> String {
    s.nfkc()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || is_japanese(*c))
        .collect()
}

fn is_japanese(c: char) -> bool {
    matches!(c,
        '\u{3005}'                  // 々
        | '\u{3040}'..='\u{309F}'   // hiragana
        | '\u{30A0}'..='\u{30FF}'   // katakana
        | '\u{3400}'..='\u{4DBF}'   // CJK extension A
        | '\u{4E00}'..='\u{9FFF}'   // CJK unified
    )
}

/// Fuzzy vendor agreement: equal, either side blank, or one contains the other.
pub fn vendors_compatible(a: &str, b: &str) -> bool {
    a.is_empty() || b.is_empty() || a == b || a.contains(b) || b.contains(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_width_and_case() {
        assert_eq!(normalize_text("ＳＥＶＥＮ－ＥＬＥＶＥＮ"), "seveneleven");
        assert_eq!(normalize_text("Seven Eleven Japan"), "sevenelevenjapan");
    }

    #[test]
    fn keeps_japanese_script() {
        assert_eq!(normalize_text("セブン‐イレブン 渋谷店"), "セブンイレブン渋谷店");
        assert_eq!(normalize_text("ファミリーマート"), "ファミリーマート");
    }

    #[test]
    fn strips_punctuation() {
        assert_eq!(normalize_text("㈱ タクシー代!"), "株タクシー代");
        assert_eq!(normalize_text("  "), "");
    }

    #[test]
    fn vendor_containment() {
        assert!(vendors_compatible("seveneleven", "seveneleven"));
        assert!(vendors_compatible("seveneleven", "sevenelevenjapan"));
        assert!(vendors_compatible("", "lawson"));
        assert!(!vendors_compatible("lawson", "familymart"));
    }
}
