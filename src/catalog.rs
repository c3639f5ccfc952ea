//! Built-in remote locations of the published MeloTTS base speakers.
//!
//! The hub table and the URL tables are independent: `EN_NEWEST` only exists
//! on the hub, and a language missing from the table a resolver is configured
//! for is simply unresolvable remotely.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::language::{ArtifactKind, LanguageCode};

const S3_BASE: &str = "https://myshell-public-repo-host.s3.amazonaws.com/openvoice/basespeakers";

/// HuggingFace repository per language.
static HUB_REPOS: &[(&str, &str)] = &[
    ("EN", "myshell-ai/MeloTTS-English"),
    ("EN_V2", "myshell-ai/MeloTTS-English-v2"),
    ("EN_NEWEST", "myshell-ai/MeloTTS-English-v3"),
    ("FR", "myshell-ai/MeloTTS-French"),
    ("JP", "myshell-ai/MeloTTS-Japanese"),
    ("ES", "myshell-ai/MeloTTS-Spanish"),
    ("ZH", "myshell-ai/MeloTTS-Chinese"),
    ("KR", "myshell-ai/MeloTTS-Korean"),
];

/// Languages with direct config/checkpoint downloads.
static URL_LANGUAGES: &[&str] = &["EN", "EN_V2", "FR", "JP", "ES", "ZH", "KR"];

/// Text-encoder (BERT) repository per language, loaded by the model process
/// on first synthesis.
static BERT_REPOS: &[(&str, &str)] = &[
    ("EN", "bert-base-uncased"),
    ("EN_V2", "bert-base-uncased"),
    ("EN_NEWEST", "bert-base-uncased"),
    ("ZH", "bert-base-multilingual-uncased"),
    ("FR", "dbmdz/bert-base-french-europeana-cased"),
    ("ES", "dccuchile/bert-base-spanish-wwm-uncased"),
    ("KR", "kykim/bert-kor-base"),
    ("JP", "tohoku-nlp/bert-base-japanese-v3"),
];

/// Files every text-encoder repository must provide.
pub static BERT_FILES: &[&str] = &["config.json", "vocab.txt", "pytorch_model.bin"];

/// Fetched when present; not every repository publishes them.
pub static BERT_OPTIONAL_FILES: &[&str] = &["tokenizer_config.json", "special_tokens_map.json"];

/// Shared pretrained components (generator, discriminator, duration discriminator).
pub static PRETRAINED_FILES: &[&str] = &["G.pth", "D.pth", "DUR.pth"];

static SAMPLE_TEXT: &[(&str, &str)] = &[
    ("EN", "The field of text-to-speech has seen rapid development recently."),
    ("ES", "El campo de la conversión de texto a voz ha experimentado un rápido desarrollo recientemente."),
    ("FR", "Le domaine de la synthèse vocale a connu un développement rapide récemment"),
    ("ZH", "text-to-speech 领域近年来发展迅速"),
    ("JP", "テキスト読み上げの分野は最近急速な発展を遂げています"),
    ("KR", "최근 텍스트 음성 변환 분야가 급속도로 발전하고 있습니다."),
];

// ─────────────────────────────────────────────────────────────────────────────
// RemoteCatalog
// ─────────────────────────────────────────────────────────────────────────────

/// Language → remote location tables consulted by the resolver.
#[derive(Debug, Clone, Default)]
pub struct RemoteCatalog {
    hub_repos: HashMap<LanguageCode, String>,
    bert_repos: HashMap<LanguageCode, String>,
    urls: HashMap<(LanguageCode, ArtifactKind), String>,
    pretrained: Vec<(String, String)>,
}

static BUILTIN: Lazy<RemoteCatalog> = Lazy::new(|| {
    let mut catalog = RemoteCatalog::default();
    for &(lang, repo) in HUB_REPOS {
        catalog = catalog.with_hub_repo(code(lang), repo);
    }
    for &(lang, repo) in BERT_REPOS {
        catalog = catalog.with_bert_repo(code(lang), repo);
    }
    for &lang in URL_LANGUAGES {
        for kind in [ArtifactKind::Config, ArtifactKind::Checkpoint] {
            let url = format!("{S3_BASE}/{lang}/{}", kind.file_name());
            catalog = catalog.with_url(code(lang), kind, url);
        }
    }
    catalog.pretrained = PRETRAINED_FILES
        .iter()
        .map(|f| (f.to_string(), format!("{S3_BASE}/pretrained/{f}")))
        .collect();
    catalog
});

fn code(lang: &str) -> LanguageCode {
    LanguageCode::parse(lang).expect("built-in language codes are valid")
}

impl RemoteCatalog {
    /// The published MeloTTS locations.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    pub fn with_hub_repo(mut self, language: LanguageCode, repo_id: impl Into<String>) -> Self {
        self.hub_repos.insert(language, repo_id.into());
        self
    }

    pub fn with_bert_repo(mut self, language: LanguageCode, repo_id: impl Into<String>) -> Self {
        self.bert_repos.insert(language, repo_id.into());
        self
    }

    pub fn with_url(
        mut self,
        language: LanguageCode,
        kind: ArtifactKind,
        url: impl Into<String>,
    ) -> Self {
        self.urls.insert((language, kind), url.into());
        self
    }

    pub fn hub_repo(&self, language: &LanguageCode) -> Option<&str> {
        self.hub_repos.get(language).map(String::as_str)
    }

    pub fn bert_repo(&self, language: &LanguageCode) -> Option<&str> {
        self.bert_repos.get(language).map(String::as_str)
    }

    pub fn url(&self, language: &LanguageCode, kind: ArtifactKind) -> Option<&str> {
        self.urls.get(&(language.clone(), kind)).map(String::as_str)
    }

    /// `(file name, url)` pairs of the shared pretrained components.
    pub fn pretrained(&self) -> &[(String, String)] {
        &self.pretrained
    }
}

/// Default prompt text shown for a language, if one is known.
pub fn sample_text(language: &LanguageCode) -> Option<&'static str> {
    SAMPLE_TEXT
        .iter()
        .find(|(lang, _)| *lang == language.as_str())
        .map(|(_, text)| *text)
}
