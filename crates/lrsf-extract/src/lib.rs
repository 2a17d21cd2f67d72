//! Metadata normalization: raw collector fields into clean, confidence-scored
//! values. Every function here recovers from unparseable input by returning a
//! zero-confidence result; nothing in this crate returns an error.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use lrsf_core::{Extracted, ExtractedDate, ExtractedPermalink, NormalizedPost, RawPost};
use regex::Regex;
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "lrsf-extract";

static JUST_NOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(?:à|a)\s*l.instant|just now|maintenant|now)\b").unwrap()
});

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+)\s*(années|année|ans|an|years|year|yrs|yr|mois|months|month|mo|semaines|semaine|sem|weeks|week|w|jours|jour|j|days|day|d|heures|heure|hours|hour|hrs|hr|h|minutes|minute|min|m)\b",
    )
    .unwrap()
});

static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{4})\b").unwrap());

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());

static TEXT_DATE_FR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:er)?\s+([a-zà-ÿ]+)\.?\s+(\d{4})\b").unwrap()
});

static TEXT_DATE_EN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z]+)\.?\s+(\d{1,2}),?\s+(\d{4})\b").unwrap()
});

static PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").unwrap());

static CONNECTION_DEGREE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[•·|]\s*\d+\s*(?:st|nd|rd|th|er|ème|e)?\+?\s*$").unwrap()
});

static FOLLOWER_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[|•·]?\s*[\d\s.,]+\s*[km]?\s*(?:followers|abonné(?:e)?s?)\s*$").unwrap()
});

static COMPANY_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/company/([^/?#]+)").unwrap());

static ACTIVITY_URN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)urn:li:activity:(\d+)").unwrap());

static UGC_URN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)urn:li:ugcPost:(\d+)").unwrap());

static POST_SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)activity-(\d+)").unwrap());

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_for_hash(text: &str) -> String {
    collapse_whitespace(&text.to_lowercase())
}

/// Parse a relative ("il y a 2 j", "3 days ago") or absolute ("12 janvier
/// 2025", "12/01/2025") date expression. `now` is injected so parsing stays
/// deterministic and testable.
pub fn parse_post_date(raw: &str, now: DateTime<Utc>) -> ExtractedDate {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return ExtractedDate::missing();
    }

    if let Some(captures) = RELATIVE_RE.captures(&text) {
        let quantity: i64 = captures[1].parse().unwrap_or(0);
        let minutes = quantity * relative_unit_minutes(&captures[2]);
        let age_hours = minutes as f64 / 60.0;
        return ExtractedDate {
            parsed_at: Some(now - Duration::minutes(minutes)),
            age_hours: Some(age_hours),
            confidence: 0.9,
        };
    }

    if JUST_NOW_RE.is_match(&text) {
        return ExtractedDate {
            parsed_at: Some(now),
            age_hours: Some(0.0),
            confidence: 0.95,
        };
    }

    if let Some(date) = parse_absolute_date(&text) {
        let instant = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default());
        let age_hours = ((now - instant).num_minutes() as f64 / 60.0).max(0.0);
        return ExtractedDate {
            parsed_at: Some(instant),
            age_hours: Some(age_hours),
            confidence: 0.8,
        };
    }

    ExtractedDate::missing()
}

fn relative_unit_minutes(unit: &str) -> i64 {
    let unit = unit.to_lowercase();
    if unit.starts_with("an") || unit.starts_with("année") || unit.starts_with('y') {
        525_600
    } else if unit.starts_with("mo") {
        43_200
    } else if unit.starts_with("sem") || unit.starts_with('w') {
        10_080
    } else if unit.starts_with('j') || unit.starts_with('d') {
        1_440
    } else if unit.starts_with('h') {
        60
    } else {
        1
    }
}

fn parse_absolute_date(text: &str) -> Option<NaiveDate> {
    if let Some(captures) = ISO_DATE_RE.captures(text) {
        let year: i32 = captures[1].parse().ok()?;
        let month: u32 = captures[2].parse().ok()?;
        let day: u32 = captures[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    if let Some(captures) = NUMERIC_DATE_RE.captures(text) {
        let day: u32 = captures[1].parse().ok()?;
        let month: u32 = captures[2].parse().ok()?;
        let year: i32 = captures[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    if let Some(captures) = TEXT_DATE_FR_RE.captures(text) {
        if let Some(month) = month_number(&captures[2]) {
            let day: u32 = captures[1].parse().ok()?;
            let year: i32 = captures[3].parse().ok()?;
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
        }
    }
    if let Some(captures) = TEXT_DATE_EN_RE.captures(text) {
        if let Some(month) = month_number(&captures[1]) {
            let day: u32 = captures[2].parse().ok()?;
            let year: i32 = captures[3].parse().ok()?;
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
        }
    }
    None
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.trim_end_matches('.').to_lowercase();
    let month = if name.starts_with("jan") {
        1
    } else if name.starts_with("fév") || name.starts_with("fev") || name.starts_with("feb") {
        2
    } else if name.starts_with("mar") {
        3
    } else if name.starts_with("avr") || name.starts_with("apr") {
        4
    } else if name.starts_with("mai") || name.starts_with("may") {
        5
    } else if name.starts_with("juil") || name.starts_with("jul") {
        7
    } else if name.starts_with("juin") || name.starts_with("jun") {
        6
    } else if name.starts_with("aoû") || name.starts_with("aou") || name.starts_with("aug") {
        8
    } else if name.starts_with("sep") {
        9
    } else if name.starts_with("oct") {
        10
    } else if name.starts_with("nov") {
        11
    } else if name.starts_with("déc") || name.starts_with("dec") {
        12
    } else {
        return None;
    };
    Some(month)
}

/// Strip pronoun annotations, connection-degree markers and symbol noise,
/// leaving a plausible human name.
pub fn clean_author_name(raw: &str) -> Extracted<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Extracted::missing();
    }
    let without_parens = PAREN_RE.replace_all(trimmed, " ");
    let without_degree = CONNECTION_DEGREE_RE.replace_all(&without_parens, "");
    let cleaned: String = without_degree
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace() || matches!(c, '-' | '\'' | '’' | '.'))
        .collect();
    let name = collapse_whitespace(&cleaned);
    if name.chars().filter(|c| c.is_alphabetic()).count() < 2 {
        return Extracted::missing();
    }
    let confidence = if name.split_whitespace().count() >= 2 {
        0.9
    } else {
        0.7
    };
    Extracted::with(name, confidence)
}

const TITLE_BOILERPLATE: &[&str] = &[
    "voir le profil",
    "profil de",
    "view profile",
    "'s profile",
    "’s profile",
    "see profile",
];

/// Job-title cleanup. Navigation boilerplate ("voir le profil de …") carries
/// no information and collapses to an empty result.
pub fn clean_author_title(raw: &str) -> Extracted<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Extracted::missing();
    }
    let lower = trimmed.to_lowercase();
    if TITLE_BOILERPLATE.iter().any(|b| lower.contains(b)) {
        return Extracted::missing();
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| {
            c.is_alphanumeric()
                || c.is_whitespace()
                || matches!(c, '&' | '/' | '|' | ',' | '.' | '\'' | '’' | '-' | '(' | ')' | '@' | '+')
        })
        .collect();
    let title = collapse_whitespace(&cleaned);
    if title.is_empty() {
        Extracted::missing()
    } else {
        Extracted::with(title, 0.8)
    }
}

/// Strip follower-count and pipe-delimited decorations from a company name.
pub fn clean_company_name(raw: &str) -> Extracted<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Extracted::missing();
    }
    let without_followers = FOLLOWER_SUFFIX_RE.replace(trimmed, "");
    let first_segment = without_followers.split('|').next().unwrap_or("").trim();
    let company = collapse_whitespace(first_segment);
    if company.is_empty() {
        Extracted::missing()
    } else {
        Extracted::with(company, 0.85)
    }
}

/// Derive a company name from a company-profile URL slug.
pub fn company_from_url(url: &str) -> Extracted<String> {
    let Some(captures) = COMPANY_URL_RE.captures(url) else {
        return Extracted::missing();
    };
    let slug = captures[1].replace("%20", " ").replace('-', " ");
    let name = slug
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        Extracted::missing()
    } else {
        Extracted::with(name, 0.7)
    }
}

static TITLE_COMPANY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s(?:chez|at|@)\s+(.+)$").unwrap());

/// Parse an employer out of an author title ("Juriste fiscal chez Acme").
pub fn company_from_title(title: &str) -> Extracted<String> {
    let Some(captures) = TITLE_COMPANY_RE.captures(title) else {
        return Extracted::missing();
    };
    let cut = captures[1]
        .split(['|', '•', '·'])
        .next()
        .unwrap_or("")
        .trim()
        .trim_end_matches(['.', ',']);
    let company = collapse_whitespace(cut);
    if company.is_empty() {
        Extracted::missing()
    } else {
        Extracted::with(company, 0.6)
    }
}

/// Recover a post identifier from permalink/URN forms; fall back to a
/// content-derived pseudo-id at low confidence when nothing is recognizable.
pub fn extract_permalink(
    permalink_url: Option<&str>,
    urn_or_id: Option<&str>,
    text: Option<&str>,
    author: Option<&str>,
) -> ExtractedPermalink {
    for candidate in [urn_or_id, permalink_url].into_iter().flatten() {
        if let Some(captures) = ACTIVITY_URN_RE.captures(candidate) {
            return ExtractedPermalink {
                post_id: Some(captures[1].to_string()),
                is_activity: true,
                confidence: 0.95,
            };
        }
        if let Some(captures) = UGC_URN_RE.captures(candidate) {
            return ExtractedPermalink {
                post_id: Some(captures[1].to_string()),
                is_activity: false,
                confidence: 0.95,
            };
        }
        if let Some(captures) = POST_SLUG_RE.captures(candidate) {
            return ExtractedPermalink {
                post_id: Some(captures[1].to_string()),
                is_activity: true,
                confidence: 0.9,
            };
        }
    }

    // A bare numeric id is accepted as-is.
    if let Some(id) = urn_or_id.map(str::trim).filter(|id| {
        id.len() >= 8 && id.chars().all(|c| c.is_ascii_digit())
    }) {
        return ExtractedPermalink {
            post_id: Some(id.to_string()),
            is_activity: false,
            confidence: 0.9,
        };
    }

    let text = text.unwrap_or("").trim();
    let author = author.unwrap_or("").trim();
    if text.is_empty() && author.is_empty() {
        return ExtractedPermalink::missing();
    }
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_hash(text).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_for_hash(author).as_bytes());
    let digest = hex::encode(hasher.finalize());
    ExtractedPermalink {
        post_id: Some(digest[..16].to_string()),
        is_activity: false,
        confidence: 0.5,
    }
}

/// Normalize a raw post. Aggregate confidence averages only the fields whose
/// raw input was present; untouched fields are excluded, not counted as zero.
pub fn normalize_post(raw: &RawPost, now: DateTime<Utc>) -> NormalizedPost {
    let present = |field: &Option<String>| {
        field
            .as_deref()
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    };

    let mut attempted_confidences = Vec::new();

    let author = if present(&raw.author_name) {
        let extracted = clean_author_name(raw.author_name.as_deref().unwrap_or(""));
        attempted_confidences.push(extracted.confidence);
        extracted
    } else {
        Extracted::missing()
    };

    let author_title = if present(&raw.author_title) {
        let extracted = clean_author_title(raw.author_title.as_deref().unwrap_or(""));
        attempted_confidences.push(extracted.confidence);
        extracted
    } else {
        Extracted::missing()
    };

    let company = if present(&raw.company_name) {
        let extracted = clean_company_name(raw.company_name.as_deref().unwrap_or(""));
        attempted_confidences.push(extracted.confidence);
        extracted
    } else if present(&raw.company_url) {
        let extracted = company_from_url(raw.company_url.as_deref().unwrap_or(""));
        attempted_confidences.push(extracted.confidence);
        extracted
    } else if present(&raw.author_title) {
        let extracted = company_from_title(raw.author_title.as_deref().unwrap_or(""));
        if extracted.is_valid() {
            attempted_confidences.push(extracted.confidence);
        }
        extracted
    } else {
        Extracted::missing()
    };

    let date = if present(&raw.date_text) {
        let extracted = parse_post_date(raw.date_text.as_deref().unwrap_or(""), now);
        attempted_confidences.push(extracted.confidence);
        extracted
    } else {
        ExtractedDate::missing()
    };

    let permalink = extract_permalink(
        raw.permalink_url.as_deref(),
        raw.post_urn_or_id.as_deref(),
        raw.text.as_deref(),
        raw.author_name.as_deref(),
    );
    if present(&raw.permalink_url) || present(&raw.post_urn_or_id) {
        attempted_confidences.push(permalink.confidence);
    }

    let confidence = if attempted_confidences.is_empty() {
        0.0
    } else {
        attempted_confidences.iter().sum::<f64>() / attempted_confidences.len() as f64
    };

    NormalizedPost {
        text: raw
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string),
        author,
        author_title,
        company,
        date,
        permalink,
        declared_language: raw.declared_language.clone(),
        confidence,
    }
}
