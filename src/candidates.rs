//! Candidate-query generation: one noisy address becomes an ordered,
//! de-duplicated list of query renderings, most specific first. The ladder
//! tries them in order, so generation order is acceptance priority.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::normalize::{
    before_semicolon, strip_noise, strip_parens, strip_postal_prefix, trim_to_house_number,
};
use crate::region::{self, RegionParts};
use crate::zh_num;

/// Queries longer than this (in UTF-8 bytes) get truncated, not discarded:
/// even a pathological input must keep moving through the ladder.
const MAX_QUERY_BYTES: usize = 512;
const CLAMP_CHARS: usize = 120;

static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[，,。.]|及|和|與").expect("separator pattern"));

static ROAD_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"路|街|巷|弄|道|大道").expect("road token pattern"));

static SECTION_ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([一二三四五六七八九十])段").expect("section pattern"));

static STREET_ORDINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([零〇一二兩三四五六七八九十]{1,3})(街|巷|弄)").expect("street ordinal pattern")
});

static HYPHEN_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)-(\d+)號").expect("hyphen number pattern"));

static ALLEY_WITH_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"弄\d+(-\d+)?號").expect("alley pattern"));

static LANE_BEFORE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"巷\d+(?:-\d+)?((?:弄\d+(?:-\d+)?)?號)").expect("lane pattern"));

static LANE_ANY: Lazy<Regex> = Lazy::new(|| Regex::new(r"巷\d+(-\d+)?").expect("lane any"));
static ALLEY_ANY: Lazy<Regex> = Lazy::new(|| Regex::new(r"弄\d+(-\d+)?").expect("alley any"));

static HOUSE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(-\d+)?號").expect("house number pattern"));

static ROAD_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?(?:大道|道|路|街))(\d+段)?(?:\d+(?:-\d+)?巷)?(?:\d+(?:-\d+)?弄)?(\d+(?:-\d+)?)號$")
        .expect("road only pattern")
});

static ROAD_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?(?:大道|道|路|街))(\d+段)?").expect("road prefix pattern"));

/// One query rendering. Degraded candidates lack house-number precision and
/// are only used by the street/admin fallback tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub query: String,
    pub degraded: bool,
}

/// Address-shaped: at least one road-class token and a house-number token.
pub fn looks_like_address(s: &str) -> bool {
    ROAD_TOKEN.is_match(s) && s.contains('號')
}

/// Splits a composite address field into independent segments. Text after
/// the first semicolon is dropped entirely; the remaining separator
/// punctuation and connective words (及/和/與) all split.
pub fn split_segments(address: &str) -> Vec<String> {
    let s = strip_parens(address);
    let s = before_semicolon(&s);
    let s = SEPARATORS.replace_all(s, "、");
    s.split('、')
        .map(str::trim)
        .filter(|seg| !seg.is_empty())
        .map(str::to_string)
        .collect()
}

/// 一段..十段 rendered with arabic numerals. The original is kept alongside
/// by the caller; providers index both inconsistently.
pub fn section_arabic(s: &str) -> String {
    SECTION_ORDINAL
        .replace_all(s, |caps: &regex::Captures<'_>| {
            match zh_num::parse_1_to_99(&caps[1]) {
                Some(n) => format!("{n}段"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Ideographic numerals immediately preceding 街/巷/弄 converted to arabic
/// (三十五巷 → 35巷). Returns `None` when nothing converted.
pub fn street_ordinal_arabic(s: &str) -> Option<String> {
    let replaced = STREET_ORDINAL
        .replace_all(s, |caps: &regex::Captures<'_>| {
            match zh_num::parse_1_to_99(&caps[1]) {
                Some(n) => format!("{n}{}", &caps[2]),
                None => caps[0].to_string(),
            }
        })
        .into_owned();
    if replaced == s {
        None
    } else {
        Some(replaced)
    }
}

/// 35-1號 is ambiguous across providers: also try 35之1號 and plain 35號.
pub fn hyphen_number_variants(s: &str) -> Vec<String> {
    let Some(caps) = HYPHEN_NUMBER.captures(s) else {
        return vec![s.to_string()];
    };
    let a = &caps[1];
    let b = &caps[2];
    vec![
        s.to_string(),
        HYPHEN_NUMBER.replace(s, format!("{a}之{b}號")).into_owned(),
        HYPHEN_NUMBER.replace(s, format!("{a}號")).into_owned(),
    ]
}

/// Progressive lane/alley widening: original, without 弄, without 巷, and
/// without both, always keeping a house number anchored.
pub fn alley_degrade_variants(s: &str) -> Vec<String> {
    let mut out = vec![s.to_string()];
    let mut push = |v: String| {
        if !out.contains(&v) {
            out.push(v);
        }
    };

    push(ALLEY_WITH_NUMBER.replace(s, "號").into_owned());
    push(LANE_BEFORE_NUMBER.replace(s, "$1").into_owned());

    let mut no_both = LANE_ANY.replace_all(s, "").into_owned();
    no_both = ALLEY_ANY.replace_all(&no_both, "").into_owned();
    if !no_both.contains('號') {
        if let Some(m) = HOUSE_NUMBER.find(s) {
            no_both.push_str(m.as_str());
        }
    }
    push(no_both);

    out
}

/// Minimal road(+section)+number rendering, the most reliably indexed shape.
pub fn road_only(s: &str) -> Option<String> {
    let t = section_arabic(s);
    let caps = ROAD_ONLY.captures(&t)?;
    let road = &caps[1];
    let section = caps.get(2).map_or("", |m| m.as_str());
    let number = &caps[3];
    Some(format!("{road}{section}{number}號"))
}

fn clamp_query(q: &str) -> String {
    if q.len() <= MAX_QUERY_BYTES {
        q.to_string()
    } else {
        q.chars().take(CLAMP_CHARS).collect()
    }
}

/// All address-shaped query variants for one segment, ordered most-specific
/// first. The region prefix comes from the *full* original address because a
/// split segment often dropped its leading county.
fn segment_variants(segment: &str, org_name: &str, full_address: &str) -> Vec<String> {
    let RegionParts { county, district } = region::extract(full_address);
    let seg_with_region = if region::has_region_token(segment) || (county.is_empty() && district.is_empty()) {
        segment.to_string()
    } else {
        format!("{county}{district}{segment}")
    };
    let base = trim_to_house_number(&seg_with_region);

    let mut bases: Vec<String> = Vec::new();
    for b in [base.clone(), section_arabic(&base)] {
        if !bases.contains(&b) {
            bases.push(b.clone());
        }
        if let Some(converted) = street_ordinal_arabic(&b) {
            if !bases.contains(&converted) {
                bases.push(converted);
            }
        }
    }

    let mut raw: Vec<String> = Vec::new();
    let mut add = |v: String| {
        if !v.is_empty() && !raw.contains(&v) {
            raw.push(v);
        }
    };

    for b in &bases {
        for h in hyphen_number_variants(b) {
            for a in alley_degrade_variants(&h) {
                add(a.clone());
                if !org_name.is_empty() {
                    add(format!("{org_name}{a}"));
                }

                if let Some(ro) = road_only(&a) {
                    add(ro.clone());
                    if !org_name.is_empty() {
                        add(format!("{org_name}{ro}"));
                    }
                    // The reduced form keeps any leading region, so only
                    // recombine when it genuinely lost one.
                    if !region::has_region_token(&ro) {
                        if !county.is_empty() {
                            add(format!("{county}{ro}"));
                            if !org_name.is_empty() {
                                add(format!("{org_name}{county}{ro}"));
                            }
                        }
                        if !district.is_empty() {
                            add(format!("{district}{ro}"));
                            if !org_name.is_empty() {
                                add(format!("{org_name}{district}{ro}"));
                            }
                        }
                        if !county.is_empty() || !district.is_empty() {
                            add(format!("{county}{district}{ro}"));
                        }
                    }
                }
            }
        }
    }

    // Shape-check before clamping: a truncated pathological candidate is
    // still worth sending, dropping it would stall the ladder.
    let mut out: Vec<String> = Vec::new();
    for candidate in raw {
        for form in region::tai_variants(&candidate) {
            let q = strip_noise(&form);
            if !looks_like_address(&q) {
                continue;
            }
            let q = clamp_query(&q);
            if !out.contains(&q) {
                out.push(q);
            }
        }
    }
    out
}

/// Full candidate set for a record: segments of a composite address expanded
/// into every variant, deterministic and de-duplicated.
pub fn generate(address: &str, org_name: &str) -> Vec<Candidate> {
    let address = strip_postal_prefix(address);
    let mut queries: Vec<String> = Vec::new();
    for segment in split_segments(&address) {
        for q in segment_variants(&segment, org_name, &address) {
            if !queries.contains(&q) {
                queries.push(q);
            }
        }
    }
    queries
        .into_iter()
        .map(|query| Candidate {
            query,
            degraded: false,
        })
        .collect()
}

/// Street-only queries for the centroid fallback: region + road name, no
/// house number, ordered longest-to-shortest so the most specific shape is
/// tried first.
pub fn street_candidates(address: &str) -> Vec<Candidate> {
    let address = strip_postal_prefix(address);
    let RegionParts { county, district } = region::extract(&address);
    let mut queries: Vec<String> = Vec::new();
    let mut add = |v: String| {
        if !v.is_empty() && !queries.contains(&v) {
            queries.push(v);
        }
    };

    for segment in split_segments(&address) {
        let seg_with_region = if region::has_region_token(&segment) || county.is_empty() {
            segment.clone()
        } else {
            format!("{county}{district}{segment}")
        };
        let base = section_arabic(&trim_to_house_number(&seg_with_region));
        let stripped = strip_noise(&base);
        let without_region = stripped
            .strip_prefix(&county)
            .map(|rest| rest.strip_prefix(district.as_str()).unwrap_or(rest))
            .unwrap_or(&stripped)
            .to_string();
        let Some(caps) = ROAD_PREFIX.captures(&without_region) else {
            continue;
        };
        let road = format!("{}{}", &caps[1], caps.get(2).map_or("", |m| m.as_str()));
        if ROAD_TOKEN.is_match(&road) {
            for form in region::tai_variants(&format!("{county}{district}{road}")) {
                add(clamp_query(&form));
            }
            for form in region::tai_variants(&format!("{county}{road}")) {
                add(clamp_query(&form));
            }
        }
    }

    queries.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    queries
        .into_iter()
        .map(|query| Candidate {
            query,
            degraded: true,
        })
        .collect()
}

/// Administrative queries for the centroid fallback: county+district, then
/// county alone.
pub fn admin_candidates(parts: &RegionParts) -> Vec<Candidate> {
    let mut queries: Vec<String> = Vec::new();
    let mut add = |v: String| {
        if !v.is_empty() && !queries.contains(&v) {
            queries.push(v);
        }
    };
    if !parts.county.is_empty() && !parts.district.is_empty() {
        for form in region::tai_variants(&format!("{}{}", parts.county, parts.district)) {
            add(form);
        }
    }
    if !parts.county.is_empty() {
        for form in region::tai_variants(&parts.county) {
            add(form);
        }
    }
    queries
        .into_iter()
        .map(|query| Candidate {
            query,
            degraded: true,
        })
        .collect()
}
