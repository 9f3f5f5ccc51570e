//! Administrative-prefix parsing and the fixed geography used for proximity
//! bias, result validation and the terminal centroid fallback.
//!
//! Region parsing is pattern-based on the administrative suffix characters
//! (縣市 / 區鄉鎮市): suffixes are the only stable structure across the input,
//! a name table is not.

use once_cell::sync::Lazy;
use regex::Regex;

static REGION_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\p{Han}{2,3}[縣市])(\p{Han}{1,3}[區鄉鎮市])?").expect("region prefix pattern")
});

static HAS_COUNTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\p{Han}{2,3}[縣市]").expect("county pattern"));

static HAS_COUNTY_AND_DISTRICT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[縣市].*[區鄉鎮市]").expect("county+district pattern"));

// Representative coordinates for the 22 top-level divisions, keyed in the
// 臺 form. Terminal fallback when nothing finer resolves.
const COUNTY_CENTROIDS: &[(&str, f64, f64)] = &[
    ("臺北市", 25.0375, 121.5637),
    ("新北市", 25.0120, 121.4657),
    ("桃園市", 24.9937, 121.3010),
    ("臺中市", 24.1477, 120.6736),
    ("臺南市", 22.9999, 120.2270),
    ("高雄市", 22.6273, 120.3014),
    ("基隆市", 25.1276, 121.7392),
    ("新竹市", 24.8138, 120.9675),
    ("嘉義市", 23.4801, 120.4491),
    ("新竹縣", 24.8387, 121.0178),
    ("苗栗縣", 24.5602, 120.8214),
    ("彰化縣", 24.0518, 120.5161),
    ("南投縣", 23.9610, 120.9719),
    ("雲林縣", 23.7092, 120.4313),
    ("嘉義縣", 23.4518, 120.2555),
    ("屏東縣", 22.5519, 120.5487),
    ("宜蘭縣", 24.7021, 121.7378),
    ("花蓮縣", 23.9872, 121.6016),
    ("臺東縣", 22.7583, 121.1444),
    ("澎湖縣", 23.5712, 119.5793),
    ("金門縣", 24.4493, 118.3767),
    ("連江縣", 26.1608, 119.9489),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionParts {
    pub county: String,
    pub district: String,
}

impl RegionParts {
    pub fn is_empty(&self) -> bool {
        self.county.is_empty() && self.district.is_empty()
    }
}

/// Parses the leading top-level unit (縣/市) and optional second-level unit
/// (區/鄉/鎮/市). Unmatched levels come back as empty strings, never an error.
pub fn extract(address: &str) -> RegionParts {
    match REGION_PREFIX.captures(address.trim()) {
        Some(caps) => RegionParts {
            county: caps.get(1).map_or(String::new(), |m| m.as_str().to_string()),
            district: caps.get(2).map_or(String::new(), |m| m.as_str().to_string()),
        },
        None => RegionParts::default(),
    }
}

/// Whether the segment already carries its own region information.
pub fn has_region_token(segment: &str) -> bool {
    HAS_COUNTY_AND_DISTRICT.is_match(segment) || HAS_COUNTY.is_match(segment)
}

/// Canonical 臺 form, for comparisons and centroid lookups.
pub fn to_tai_canonical(s: &str) -> String {
    s.replace('台', "臺")
}

/// Both ideograph renderings of a string containing the Tai- character
/// family. Provider indexes disagree about which form they store, so every
/// query goes out in both.
pub fn tai_variants(s: &str) -> Vec<String> {
    let a = s.replace('台', "臺");
    let b = s.replace('臺', "台");
    let mut out = vec![a];
    if !out.contains(&b) {
        out.push(b);
    }
    out
}

/// Containment check that is indifferent to the 臺/台 split.
pub fn contains_tai_equivalent(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    to_tai_canonical(haystack).contains(&to_tai_canonical(needle))
}

/// Representative coordinate for a top-level division, in either 臺/台 form.
pub fn county_centroid(county: &str) -> Option<(f64, f64)> {
    let canonical = to_tai_canonical(county.trim());
    COUNTY_CENTROIDS
        .iter()
        .find(|(name, _, _)| *name == canonical)
        .map(|(_, lat, lng)| (*lat, *lng))
}

/// Loose sanity box around Taiwan proper plus the outlying islands
/// (金門 sits west of the main-island box).
pub fn within_taiwan(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (21.0..=26.5).contains(&lat) && (117.0..=123.5).contains(&lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_county_and_district() {
        let parts = extract("臺南市永康區中華路100號");
        assert_eq!(parts.county, "臺南市");
        assert_eq!(parts.district, "永康區");
    }

    #[test]
    fn extracts_county_alone() {
        let parts = extract("金門縣金城鎮民生路1號");
        assert_eq!(parts.county, "金門縣");
        assert_eq!(parts.district, "金城鎮");

        let parts = extract("澎湖縣某路2號");
        assert_eq!(parts.county, "澎湖縣");
        assert_eq!(parts.district, "");
    }

    #[test]
    fn unmatched_levels_are_empty() {
        assert!(extract("中山路100號").is_empty());
        assert!(extract("").is_empty());
    }

    #[test]
    fn tai_forms_are_equivalent() {
        assert!(contains_tai_equivalent("臺南市永康區", "台南市"));
        assert!(contains_tai_equivalent("台南市永康區", "臺南市"));
        assert!(!contains_tai_equivalent("高雄市", "台南市"));
    }

    #[test]
    fn variant_generation() {
        let variants = tai_variants("台南市中西區");
        assert!(variants.contains(&"臺南市中西區".to_string()));
        assert!(variants.contains(&"台南市中西區".to_string()));
        assert_eq!(tai_variants("高雄市").len(), 1);
    }

    #[test]
    fn centroid_lookup_accepts_both_forms() {
        let a = county_centroid("臺南市").unwrap();
        let b = county_centroid("台南市").unwrap();
        assert_eq!(a, b);
        assert!(within_taiwan(a.0, a.1));
        assert!(county_centroid("外縣市").is_none());
    }

    #[test]
    fn bounding_box_covers_outlying_islands() {
        assert!(within_taiwan(24.4493, 118.3767)); // 金門
        assert!(within_taiwan(26.1608, 119.9489)); // 連江
        assert!(!within_taiwan(35.0, 139.0));
        assert!(!within_taiwan(f64::NAN, 121.0));
    }
}
