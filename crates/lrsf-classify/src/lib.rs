//! Rule-based relevance classification and unified filtering for LRSF.
//!
//! The classifier is a transparent scoring engine over curated French/English
//! term dictionaries: every decision carries the matched evidence, and the
//! whole path is pure so calls are safe to run concurrently and trivial to
//! unit-test. A pluggable [`Classifier`] trait lets callers swap in another
//! engine behind the same contract.

use std::collections::BTreeSet;
use std::path::Path;

use lrsf_core::{ClassificationResult, IntentLabel};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "lrsf-classify";

/// Width of the borderline band just above the intent threshold in which an
/// under-evidenced match is still suppressed.
const BORDERLINE_BAND: f64 = 0.05;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid filter config: {0}")]
    Invalid(String),
}

/// Versioned, immutable-once-loaded filter configuration: weighted term
/// dictionaries, exclusion categories, location lists and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub version: u32,
    pub target_language: String,
    pub role_term_weight: f64,
    pub recruitment_term_weight: f64,
    pub intent_threshold: f64,
    pub min_score_threshold: f64,
    pub role_saturation: u32,
    pub recruitment_saturation: u32,
    pub generic_penalty: f64,
    pub negative_context_penalty: f64,
    pub inclusion_bonus: f64,
    pub exclude_agency: bool,
    pub exclude_stage: bool,
    pub role_terms: Vec<String>,
    pub generic_role_stems: Vec<String>,
    pub recruitment_phrases: Vec<String>,
    pub negative_context_phrases: Vec<String>,
    pub agency_phrases: Vec<String>,
    pub stage_phrases: Vec<String>,
    pub location_allow: Vec<String>,
    pub location_deny: Vec<String>,
    pub custom_inclusion_terms: BTreeSet<String>,
    pub custom_exclusion_terms: BTreeSet<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            version: 1,
            target_language: "fr".to_string(),
            role_term_weight: 0.6,
            recruitment_term_weight: 0.4,
            intent_threshold: 0.35,
            min_score_threshold: 0.3,
            role_saturation: 6,
            recruitment_saturation: 5,
            generic_penalty: 0.55,
            negative_context_penalty: 0.25,
            inclusion_bonus: 0.1,
            exclude_agency: true,
            exclude_stage: true,
            role_terms: strings(&[
                "juriste droit des affaires",
                "juriste droit des sociétés",
                "juriste droit social",
                "juriste droit du travail",
                "juriste droit public",
                "juriste droit immobilier",
                "juriste propriété intellectuelle",
                "juriste protection des données",
                "juriste contrats",
                "juriste contentieux",
                "juriste fiscal",
                "juriste fiscaliste",
                "juriste d'entreprise",
                "juriste corporate",
                "juriste compliance",
                "juriste conformité",
                "directeur juridique",
                "directrice juridique",
                "responsable juridique",
                "responsable fiscal",
                "conseiller juridique",
                "conseillère juridique",
                "assistant juridique",
                "assistante juridique",
                "secrétaire juridique",
                "collaborateur juridique",
                "avocat fiscaliste",
                "avocat collaborateur",
                "tax lawyer",
                "legal counsel",
                "general counsel",
                "head of legal",
                "legal officer",
                "legal manager",
                "contract manager",
                "paralegal",
                "juriste",
                "fiscaliste",
                "avocat",
                "avocate",
                "notaire",
            ]),
            generic_role_stems: strings(&[
                "juridique",
                "droit",
                "legal",
                "fiscal",
                "fiscalité",
                "law",
            ]),
            recruitment_phrases: strings(&[
                "nous recrutons",
                "nous recherchons",
                "recrute un",
                "recrute une",
                "recrutement d'un",
                "recrutement d'une",
                "recherche son",
                "recherche sa",
                "cherchons un",
                "cherchons une",
                "poste à pourvoir",
                "offre d'emploi",
                "rejoignez notre équipe",
                "rejoindre notre équipe",
                "rejoignez-nous",
                "envoyez votre candidature",
                "adressez votre candidature",
                "postulez",
                "postuler",
                "cdi",
                "cdd",
                "temps plein",
                "temps partiel",
                "we are hiring",
                "we're hiring",
                "is hiring",
                "join our team",
                "apply now",
                "job opening",
                "open position",
            ]),
            negative_context_phrases: strings(&[
                "sans offre d'emploi",
                "pas d'offre d'emploi",
                "aucune offre",
                "article d'opinion",
                "article de blog",
                "billet de blog",
                "nouvel article",
                "tribune",
                "point de vue",
                "retour d'expérience",
                "webinaire",
                "podcast",
                "newsletter",
                "veille juridique",
                "commentaire d'arrêt",
                "jurisprudence commentée",
            ]),
            agency_phrases: strings(&[
                "notre client",
                "pour notre client",
                "pour le compte de notre client",
                "cabinet de recrutement",
                "cabinet de chasse",
                "chasseur de têtes",
                "agence de recrutement",
                "agence d'intérim",
                "société d'intérim",
                "recrutement spécialisé",
                "our client is looking for",
                "on behalf of our client",
                "recruitment firm",
                "recruitment agency",
                "staffing agency",
                "executive search",
                "headhunter",
            ]),
            stage_phrases: strings(&[
                "stage",
                "stagiaire",
                "offre de stage",
                "alternance",
                "alternant",
                "alternante",
                "apprentissage",
                "apprenti",
                "contrat d'apprentissage",
                "contrat de professionnalisation",
                "internship",
                "intern",
                "trainee",
            ]),
            location_allow: strings(&[
                "paris",
                "île-de-france",
                "ile-de-france",
                "région parisienne",
                "la défense",
                "lyon",
                "marseille",
                "bordeaux",
                "lille",
                "nantes",
                "toulouse",
                "strasbourg",
                "france",
                "télétravail",
                "remote france",
            ]),
            location_deny: strings(&[
                "london",
                "londres",
                "bruxelles",
                "brussels",
                "genève",
                "geneva",
                "zurich",
                "luxembourg",
                "montréal",
                "montreal",
                "new york",
                "dubai",
                "casablanca",
            ]),
            custom_inclusion_terms: BTreeSet::new(),
            custom_exclusion_terms: BTreeSet::new(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl FilterConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Malformed numeric config is rejected here so the classifier can assume
    /// well-formed values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, value: f64| {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                Err(ConfigError::Invalid(format!(
                    "{name} must be in [0, 1], got {value}"
                )))
            } else {
                Ok(())
            }
        };
        unit("role_term_weight", self.role_term_weight)?;
        unit("recruitment_term_weight", self.recruitment_term_weight)?;
        unit("intent_threshold", self.intent_threshold)?;
        unit("min_score_threshold", self.min_score_threshold)?;
        unit("generic_penalty", self.generic_penalty)?;
        unit("negative_context_penalty", self.negative_context_penalty)?;
        unit("inclusion_bonus", self.inclusion_bonus)?;
        if self.version == 0 {
            return Err(ConfigError::Invalid("version must be >= 1".to_string()));
        }
        if self.role_saturation < 1 || self.recruitment_saturation < 1 {
            return Err(ConfigError::Invalid(
                "saturation constants must be >= 1".to_string(),
            ));
        }
        if self.target_language.trim().is_empty() {
            return Err(ConfigError::Invalid("target_language is empty".to_string()));
        }
        if self.role_terms.is_empty() || self.recruitment_phrases.is_empty() {
            return Err(ConfigError::Invalid(
                "role_terms and recruitment_phrases must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Stable digest over the full config; any weight, threshold or term-list
    /// change produces a different hash so consumers can detect drift.
    pub fn config_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Lowercased, punctuation-free, single-spaced rendering of `text`, padded
/// with one leading/trailing space so single-token dictionary entries match
/// on word boundaries only.
fn pad_for_match(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", mapped.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn normalize_term(term: &str) -> String {
    let padded = pad_for_match(term);
    padded.trim().to_string()
}

/// Longest-first matching with removal: each matched term is cut out of the
/// working text so shorter overlapping terms cannot double-count.
fn match_and_consume(working: &mut String, terms: &[String]) -> Vec<String> {
    let mut ordered: Vec<&String> = terms.iter().collect();
    ordered.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));

    let mut matched = Vec::new();
    for term in ordered {
        let normalized = normalize_term(term);
        if normalized.is_empty() {
            continue;
        }
        let needle = format!(" {normalized} ");
        if working.contains(&needle) {
            matched.push(term.clone());
            while let Some(position) = working.find(&needle) {
                working.replace_range(position..position + needle.len(), " ");
            }
        }
    }
    matched
}

/// Detection without removal, for category checks over the full text.
fn match_any(padded: &str, terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .filter(|term| {
            let normalized = normalize_term(term);
            !normalized.is_empty() && padded.contains(&format!(" {normalized} "))
        })
        .cloned()
        .collect()
}

const FR_STOPWORDS: &[&str] = &[
    "le", "la", "les", "un", "une", "des", "et", "est", "nous", "vous", "pour", "dans", "chez",
    "sur", "avec", "du", "de", "au", "aux", "à", "ce", "cette", "son", "sa", "ses",
];

const EN_STOPWORDS: &[&str] = &[
    "the", "an", "and", "is", "are", "we", "you", "for", "in", "at", "on", "with", "of", "to",
    "this", "that", "our", "your",
];

/// Crude but deterministic stopword-count language guess, used only when the
/// collector declared no language. Returns None when neither side wins.
fn detect_language(padded: &str) -> Option<&'static str> {
    let mut fr = 0usize;
    let mut en = 0usize;
    for token in padded.split_whitespace() {
        if FR_STOPWORDS.contains(&token) {
            fr += 1;
        }
        if EN_STOPWORDS.contains(&token) {
            en += 1;
        }
    }
    if fr >= 2 && fr > en {
        Some("fr")
    } else if en >= 2 && en > fr {
        Some("en")
    } else {
        None
    }
}

fn saturating_log_score(count: usize, saturation: u32) -> f64 {
    if count == 0 {
        return 0.0;
    }
    let score = ((1 + count) as f64).ln() / ((1 + saturation) as f64).ln();
    score.min(1.0)
}

/// Full evidence of one relevance evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceOutcome {
    pub relevant: bool,
    pub combined_score: f64,
    pub confidence: f64,
    pub matched_role_terms: Vec<String>,
    pub matched_recruitment_phrases: Vec<String>,
    pub matched_negative_phrases: Vec<String>,
    pub location_ok: bool,
    pub language_ok: bool,
    pub generic_only: bool,
}

/// Pure relevance scoring over one post text. Conservative by construction:
/// explicit recruitment language is required for a positive intent, and the
/// borderline band just above the threshold needs a second role term too.
pub fn classify_relevance(
    text: &str,
    declared_language: Option<&str>,
    config: &FilterConfig,
) -> RelevanceOutcome {
    let padded = pad_for_match(text);

    let language = declared_language
        .map(|lang| lang.trim().to_lowercase())
        .filter(|lang| !lang.is_empty())
        .or_else(|| detect_language(&padded).map(ToString::to_string));
    let language_ok = match language {
        Some(lang) => lang == config.target_language.to_lowercase(),
        None => true,
    };

    let allow_hits = match_any(&padded, &config.location_allow);
    let deny_hits = match_any(&padded, &config.location_deny);
    let location_ok = !allow_hits.is_empty() || deny_hits.is_empty();

    let mut working = padded.clone();
    let mut matched_role_terms = match_and_consume(&mut working, &config.role_terms);
    let mut generic_only = false;
    if matched_role_terms.is_empty() {
        matched_role_terms = match_and_consume(&mut working, &config.generic_role_stems);
        generic_only = !matched_role_terms.is_empty();
    }
    let distinct_roles = matched_role_terms.len();

    // Negative-context phrases are consumed before recruitment matching so
    // that "sans offre d'emploi" never feeds its "offre d'emploi" substring
    // into the recruitment evidence.
    let matched_negative_phrases =
        match_and_consume(&mut working, &config.negative_context_phrases);
    let matched_recruitment_phrases =
        match_and_consume(&mut working, &config.recruitment_phrases);

    let has_recruitment = !matched_recruitment_phrases.is_empty();
    let has_negative = !matched_negative_phrases.is_empty();

    let mut role_score = saturating_log_score(distinct_roles, config.role_saturation);
    if generic_only && distinct_roles > 0 {
        role_score *= config.generic_penalty;
    }
    let recruitment_score = saturating_log_score(
        matched_recruitment_phrases.len(),
        config.recruitment_saturation,
    );

    let mut combined = (config.role_term_weight * role_score
        + config.recruitment_term_weight * recruitment_score)
        .clamp(0.0, 1.0);
    if has_negative && !has_recruitment {
        combined *= config.negative_context_penalty;
    }

    let threshold = config.intent_threshold;
    let borderline = combined >= threshold && combined < threshold + BORDERLINE_BAND;
    let suppressed = (has_negative && !has_recruitment)
        || (generic_only && distinct_roles < 2 && !has_recruitment)
        || (borderline && !has_recruitment && distinct_roles < 2)
        || !has_recruitment;

    let relevant = !suppressed
        && combined >= threshold
        && language_ok
        && location_ok
        && distinct_roles >= 1
        && has_recruitment;

    let signals = [
        distinct_roles >= 1,
        has_recruitment,
        language_ok,
        location_ok,
    ];
    let confidence = signals.iter().filter(|s| **s).count() as f64 / signals.len() as f64;

    RelevanceOutcome {
        relevant,
        combined_score: combined,
        confidence,
        matched_role_terms,
        matched_recruitment_phrases,
        matched_negative_phrases,
        location_ok,
        language_ok,
        generic_only,
    }
}

/// Pluggable classification seam; the rule-based [`UnifiedFilter`] is the
/// fixed default implementation.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        text: &str,
        author: Option<&str>,
        company: Option<&str>,
        declared_language: Option<&str>,
    ) -> ClassificationResult;
}

/// Policy layer over the relevance classifier: categorical exclusions first
/// (agency, stage, custom terms), then score-based resolution.
#[derive(Debug, Clone)]
pub struct UnifiedFilter {
    config: FilterConfig,
    config_hash: String,
}

impl UnifiedFilter {
    pub fn new(config: FilterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let config_hash = config.config_hash();
        Ok(Self {
            config,
            config_hash,
        })
    }

    pub fn with_defaults() -> Self {
        Self::new(FilterConfig::default()).expect("default config is valid")
    }

    /// Load `rules/filter.yaml` under the workspace root, falling back to the
    /// built-in dictionaries when the file does not exist.
    pub fn from_workspace_root(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = root.as_ref().join("rules").join("filter.yaml");
        if path.exists() {
            Self::new(FilterConfig::from_yaml_file(&path)?)
        } else {
            Ok(Self::with_defaults())
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn get_config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Single public classification entry point. Side-effect-free; the result
    /// lists every matched pattern so operators can audit the decision.
    pub fn classify_post(
        &self,
        text: &str,
        author: Option<&str>,
        company: Option<&str>,
        declared_language: Option<&str>,
    ) -> ClassificationResult {
        let config = &self.config;
        let padded_text = pad_for_match(text);
        let context = format!(
            "{} {} {}",
            text,
            author.unwrap_or(""),
            company.unwrap_or("")
        );
        let padded_context = pad_for_match(&context);

        let outcome = classify_relevance(text, declared_language, config);

        let mut matched_patterns = outcome.matched_role_terms.clone();
        matched_patterns.extend(outcome.matched_recruitment_phrases.iter().cloned());

        let inclusion_terms: Vec<String> = config.custom_inclusion_terms.iter().cloned().collect();
        let inclusion_hits = match_any(&padded_context, &inclusion_terms);
        for term in &inclusion_hits {
            matched_patterns.push(format!("+{term}"));
        }
        let bonus = if inclusion_hits.is_empty() {
            0.0
        } else {
            config.inclusion_bonus
        };
        let score = (outcome.combined_score + bonus).clamp(0.0, 1.0);

        // Exclusion categories outrank positive evidence, inclusion bonus
        // included.
        if config.exclude_agency {
            let agency_hits = match_any(&padded_text, &config.agency_phrases);
            if !agency_hits.is_empty() {
                return self.rejection(IntentLabel::Agency, score, &outcome, agency_hits, matched_patterns);
            }
        }
        if config.exclude_stage {
            let stage_hits = match_any(&padded_text, &config.stage_phrases);
            if !stage_hits.is_empty() {
                return self.rejection(
                    IntentLabel::StageOrInternship,
                    score,
                    &outcome,
                    stage_hits,
                    matched_patterns,
                );
            }
        }
        let exclusion_terms: Vec<String> = config.custom_exclusion_terms.iter().cloned().collect();
        let exclusion_hits = match_any(&padded_context, &exclusion_terms);
        if !exclusion_hits.is_empty() {
            let hits = exclusion_hits.iter().map(|t| format!("-{t}")).collect();
            return self.rejection(IntentLabel::Other, score, &outcome, hits, matched_patterns);
        }

        let has_recruitment = !outcome.matched_recruitment_phrases.is_empty();
        let has_roles = !outcome.matched_role_terms.is_empty();
        let accepted = outcome.language_ok
            && outcome.location_ok
            && has_roles
            && has_recruitment
            && score >= config.intent_threshold;

        let intent = if accepted {
            IntentLabel::Relevant
        } else if !outcome.matched_negative_phrases.is_empty() && !has_recruitment {
            IntentLabel::Other
        } else if score < config.min_score_threshold {
            IntentLabel::LowScore
        } else if !has_recruitment || !has_roles {
            IntentLabel::NonRecruitment
        } else {
            IntentLabel::Other
        };

        ClassificationResult {
            intent,
            score,
            confidence: outcome.confidence,
            matched_patterns,
            location_ok: outcome.location_ok,
        }
    }

    fn rejection(
        &self,
        intent: IntentLabel,
        score: f64,
        outcome: &RelevanceOutcome,
        category_hits: Vec<String>,
        mut matched_patterns: Vec<String>,
    ) -> ClassificationResult {
        let mut patterns = category_hits;
        patterns.append(&mut matched_patterns);
        ClassificationResult {
            intent,
            score,
            confidence: outcome.confidence,
            matched_patterns: patterns,
            location_ok: outcome.location_ok,
        }
    }
}

impl Classifier for UnifiedFilter {
    fn classify(
        &self,
        text: &str,
        author: Option<&str>,
        company: Option<&str>,
        declared_language: Option<&str>,
    ) -> ClassificationResult {
        self.classify_post(text, author, company, declared_language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn filter() -> UnifiedFilter {
        UnifiedFilter::with_defaults()
    }

    #[test]
    fn positive_french_post_is_relevant() {
        let result = filter().classify_post(
            "Nous recrutons un juriste fiscal pour un poste à pourvoir en CDI à Paris",
            None,
            None,
            None,
        );
        assert_eq!(result.intent, IntentLabel::Relevant);
        assert!(result.location_ok);
        assert!(result.score >= 0.35);
        assert!(result
            .matched_patterns
            .iter()
            .any(|p| p == "juriste fiscal"));
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn opinion_piece_without_offer_is_suppressed() {
        let text = "Article d'opinion sur le droit fiscal international sans offre d'emploi";
        let outcome = classify_relevance(text, None, &FilterConfig::default());
        assert!(!outcome.relevant);
        assert!(outcome.matched_recruitment_phrases.is_empty());
        assert!(!outcome.matched_negative_phrases.is_empty());

        let result = filter().classify_post(text, None, None, None);
        assert_eq!(result.intent, IntentLabel::Other);
    }

    #[test]
    fn recruitment_language_is_required_even_with_strong_roles() {
        let text = "Le juriste fiscal et le directeur juridique analysent la loi de finances";
        let outcome = classify_relevance(text, None, &FilterConfig::default());
        assert!(!outcome.relevant);
        assert_eq!(outcome.matched_role_terms.len(), 2);

        let result = filter().classify_post(text, None, None, None);
        assert_eq!(result.intent, IntentLabel::NonRecruitment);
    }

    #[test]
    fn agency_category_outranks_recruitment_signals() {
        let result = filter().classify_post(
            "Pour notre client, nous recrutons un juriste fiscal en CDI à Paris",
            None,
            None,
            None,
        );
        assert_eq!(result.intent, IntentLabel::Agency);
        assert!(result
            .matched_patterns
            .iter()
            .any(|p| p.contains("notre client")));
    }

    #[test]
    fn internship_is_rejected_despite_positive_scoring() {
        let result = filter().classify_post(
            "Nous recrutons un stagiaire juriste pour un stage de six mois à Paris",
            None,
            None,
            None,
        );
        assert_eq!(result.intent, IntentLabel::StageOrInternship);
    }

    #[test]
    fn wrong_language_cannot_be_relevant() {
        let result = filter().classify_post(
            "We are hiring a legal counsel to join our team in Paris",
            None,
            None,
            Some("en"),
        );
        assert_ne!(result.intent, IntentLabel::Relevant);
    }

    #[test]
    fn denied_location_without_positive_term_blocks_acceptance() {
        let outcome = classify_relevance(
            "Nous recrutons un juriste fiscal en CDI, poste basé à Londres",
            None,
            &FilterConfig::default(),
        );
        assert!(!outcome.location_ok);
        assert!(!outcome.relevant);
    }

    #[test]
    fn longest_role_term_wins_and_consumes_its_text() {
        let outcome = classify_relevance(
            "Nous recrutons un juriste fiscal (CDI, Paris)",
            None,
            &FilterConfig::default(),
        );
        assert!(outcome
            .matched_role_terms
            .contains(&"juriste fiscal".to_string()));
        assert!(!outcome.matched_role_terms.contains(&"juriste".to_string()));
    }

    #[test]
    fn generic_stems_alone_are_penalized_and_suppressed() {
        let outcome = classify_relevance(
            "Une analyse du droit européen",
            None,
            &FilterConfig::default(),
        );
        assert!(outcome.generic_only);
        assert!(!outcome.relevant);
    }

    #[test]
    fn custom_exclusion_term_rejects() {
        let mut config = FilterConfig::default();
        config
            .custom_exclusion_terms
            .insert("formation".to_string());
        let filter = UnifiedFilter::new(config).expect("valid config");
        let result = filter.classify_post(
            "Nous recrutons un juriste fiscal, formation assurée, CDI à Paris",
            None,
            None,
            None,
        );
        assert_eq!(result.intent, IntentLabel::Other);
        assert!(result.matched_patterns.iter().any(|p| p == "-formation"));
    }

    #[test]
    fn inclusion_term_adds_audit_entry_and_bonus() {
        let mut config = FilterConfig::default();
        config
            .custom_inclusion_terms
            .insert("acme legal".to_string());
        let filter = UnifiedFilter::new(config).expect("valid config");
        let result = filter.classify_post(
            "Nous recrutons un juriste fiscal en CDI à Paris",
            None,
            Some("Acme Legal"),
            None,
        );
        assert_eq!(result.intent, IntentLabel::Relevant);
        assert!(result.matched_patterns.iter().any(|p| p == "+acme legal"));
    }

    #[test]
    fn config_hash_changes_with_any_field() {
        let base = FilterConfig::default();
        let same = FilterConfig::default();
        assert_eq!(base.config_hash(), same.config_hash());

        let mut threshold_changed = FilterConfig::default();
        threshold_changed.intent_threshold = 0.36;
        assert_ne!(base.config_hash(), threshold_changed.config_hash());

        let mut term_added = FilterConfig::default();
        term_added.role_terms.push("juriste énergie".to_string());
        assert_ne!(base.config_hash(), term_added.config_hash());
    }

    #[test]
    fn malformed_weights_are_rejected_at_load() {
        let mut config = FilterConfig::default();
        config.role_term_weight = 1.4;
        assert!(config.validate().is_err());

        let mut config = FilterConfig::default();
        config.intent_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_override_keeps_default_dictionaries() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "version: 3\nintent_threshold: 0.5").expect("write");
        let config = FilterConfig::from_yaml_file(file.path()).expect("load");
        assert_eq!(config.version, 3);
        assert!((config.intent_threshold - 0.5).abs() < f64::EPSILON);
        assert!(!config.role_terms.is_empty());
        assert_ne!(config.config_hash(), FilterConfig::default().config_hash());
    }

    #[test]
    fn borderline_score_without_second_signal_is_suppressed() {
        // One specific role term, no recruitment phrase: combined sits below
        // the acceptance threshold band, and rule (d) suppresses regardless.
        let outcome = classify_relevance(
            "Le directeur juridique présente la réforme",
            None,
            &FilterConfig::default(),
        );
        assert!(!outcome.relevant);
    }
}
