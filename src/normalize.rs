//! Pure string cleanup for raw Taiwanese addresses. Every function is total:
//! garbage in, smaller garbage out, never an error.

use once_cell::sync::Lazy;
use regex::Regex;

static POSTAL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{3,5}[\s,，、-]?").expect("postal prefix pattern"));

static PARENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"（[^）]*）|\([^)]*\)").expect("paren pattern"));

// Floor, basement and unit suffixes never help geocoding and frequently
// break provider matching. Everything after the first one is discarded.
static FLOOR_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(地下\d*|地下一|B\d+|[一二三四五六七八九十\d]+樓(之\d+)?|之\d+室|室\d+).*")
        .expect("floor suffix pattern")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

static COUNTRY_ARTIFACTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)台灣|臺灣|Republic\s*of\s*China").expect("country pattern"));

/// Strips a leading postal-code prefix: 3 to 5 ASCII digits plus an optional
/// separator. Must run before region extraction, which anchors at the start
/// of the string.
pub fn strip_postal_prefix(s: &str) -> String {
    POSTAL_PREFIX.replace(s.trim(), "").into_owned()
}

/// Removes parenthetical asides, full-width and half-width.
pub fn strip_parens(s: &str) -> String {
    PARENS.replace_all(s, "").into_owned()
}

/// Keeps only the text before the first semicolon. Whatever follows a
/// semicolon is annotation, not a deliverable address.
pub fn before_semicolon(s: &str) -> &str {
    s.split([';', '；']).next().unwrap_or(s)
}

/// Cuts the string at (and including) the house-number marker 號. Floor and
/// unit suffixes are dropped first. A string with no 號 passes through with
/// only the suffix cleanup applied.
pub fn trim_to_house_number(s: &str) -> String {
    let cleaned = strip_parens(s);
    let cleaned = FLOOR_SUFFIX.replace(&cleaned, "").into_owned();
    match cleaned.find('號') {
        Some(idx) => cleaned[..idx + '號'.len_utf8()].to_string(),
        None => cleaned,
    }
}

/// Collapses whitespace and strips country-name artifacts.
pub fn strip_noise(s: &str) -> String {
    let s = COUNTRY_ARTIFACTS.replace_all(s, "");
    WHITESPACE.replace_all(&s, "").into_owned()
}

/// Full normalization pipeline, applied in fixed order: postal prefix,
/// parentheses, semicolon truncation, floor suffixes, house-number cut,
/// whitespace and country artifacts.
pub fn normalize(address: &str) -> String {
    let s = strip_postal_prefix(address);
    let s = strip_parens(&s);
    let s = before_semicolon(&s);
    let s = trim_to_house_number(s);
    strip_noise(&s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_postal_prefix() {
        assert_eq!(normalize("710 臺南市永康區中華路100號"), "臺南市永康區中華路100號");
        assert_eq!(normalize("10048台北市中正區忠孝東路1號"), "台北市中正區忠孝東路1號");
    }

    #[test]
    fn removes_parentheticals() {
        assert_eq!(
            normalize("臺南市永康區中華路100號（東側入口）"),
            "臺南市永康區中華路100號"
        );
        assert_eq!(normalize("高雄市左營區博愛二路(近巨蛋)777號"), "高雄市左營區博愛二路777號");
    }

    #[test]
    fn truncates_at_semicolon() {
        assert_eq!(
            normalize("桃園市中壢區中山路100號；週三休診"),
            "桃園市中壢區中山路100號"
        );
        assert_eq!(normalize("台中市西區民生路1號;備註"), "台中市西區民生路1號");
    }

    #[test]
    fn drops_floor_and_unit_suffixes() {
        assert_eq!(normalize("台北市大安區復興南路一段100號3樓"), "台北市大安區復興南路一段100號");
        assert_eq!(
            normalize("新北市板橋區文化路二段88號12樓之3"),
            "新北市板橋區文化路二段88號"
        );
        assert_eq!(normalize("台中市北區三民路50號B1"), "台中市北區三民路50號");
        // Floor marker before the house number loses the tail entirely.
        assert_eq!(normalize("高雄市苓雅區中正一路2樓"), "高雄市苓雅區中正一路");
    }

    #[test]
    fn cuts_after_house_number() {
        assert_eq!(normalize("台南市東區東門路一段100號之5室"), "台南市東區東門路一段100號");
    }

    #[test]
    fn no_house_number_is_passthrough() {
        assert_eq!(normalize("南投縣埔里鎮中山路"), "南投縣埔里鎮中山路");
    }

    #[test]
    fn strips_country_artifacts_and_whitespace() {
        assert_eq!(normalize("台灣 台北市 信義區 市府路 1 號"), "台北市信義區市府路1號");
        assert_eq!(normalize("臺南市中西區民權路 Republic of China"), "臺南市中西區民權路");
    }
}
