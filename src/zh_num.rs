//! Ideographic numeral parsing for the constrained 1–99 grammar that shows up
//! in Taiwanese street names (三民街, 二十一巷). Deliberately not a general
//! Chinese-number parser: section/lane/alley ordinals never exceed 99.

/// Single-digit value, including the 〇/零 zero forms and the 兩 variant of 2.
fn digit(c: char) -> Option<u32> {
    match c {
        '零' | '〇' => Some(0),
        '一' => Some(1),
        '二' | '兩' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    }
}

/// Parses an ideographic numeral in the range 1–99 (plus the bare zero
/// forms). Returns `None` for anything outside that grammar.
pub fn parse_1_to_99(s: &str) -> Option<u32> {
    let chars: Vec<char> = s.trim().chars().collect();
    match chars.as_slice() {
        [] => None,
        ['十'] => Some(10),
        [c] => digit(*c),
        ['十', ones] => digit(*ones).map(|o| 10 + o),
        [tens, '十'] => digit(*tens).filter(|t| *t > 0).map(|t| t * 10),
        [tens, '十', ones] => match (digit(*tens), digit(*ones)) {
            (Some(t), Some(o)) if t > 0 => Some(t * 10 + o),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_digits() {
        assert_eq!(parse_1_to_99("一"), Some(1));
        assert_eq!(parse_1_to_99("兩"), Some(2));
        assert_eq!(parse_1_to_99("九"), Some(9));
        assert_eq!(parse_1_to_99("〇"), Some(0));
    }

    #[test]
    fn parses_tens() {
        assert_eq!(parse_1_to_99("十"), Some(10));
        assert_eq!(parse_1_to_99("十一"), Some(11));
        assert_eq!(parse_1_to_99("二十"), Some(20));
        assert_eq!(parse_1_to_99("二十一"), Some(21));
        assert_eq!(parse_1_to_99("九十九"), Some(99));
    }

    #[test]
    fn rejects_out_of_grammar() {
        assert_eq!(parse_1_to_99(""), None);
        assert_eq!(parse_1_to_99("百"), None);
        assert_eq!(parse_1_to_99("一百"), None);
        assert_eq!(parse_1_to_99("十十"), None);
        assert_eq!(parse_1_to_99("零十"), None);
        assert_eq!(parse_1_to_99("abc"), None);
    }
}
