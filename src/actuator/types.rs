//! Tipos de dados trocados com o atuador.
//!
//! Todas as structs derivam `Serialize` e `Deserialize`, pois são também o
//! formato JSON do serviço HTTP de automação.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Preferences;
use crate::state_machine::{JobCandidate, Posting};

/// Filtros enviados para a busca de uma página de resultados.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub salary_min: Option<u32>,
    pub salary_max: Option<u32>,
    pub max_posting_age_days: Option<u32>,
    /// Página 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl SearchCriteria {
    pub fn from_preferences(prefs: &Preferences, page: u32, page_size: u32) -> Self {
        Self {
            keywords: prefs.keywords.clone(),
            locations: prefs.locations.clone(),
            salary_min: prefs.salary_min,
            salary_max: prefs.salary_max,
            max_posting_age_days: prefs.max_posting_age_days,
            page,
            page_size,
        }
    }
}

/// Documentos anexados a cada candidatura.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub resume_path: PathBuf,
    #[serde(default)]
    pub cover_letter_path: Option<PathBuf>,
}

/// Resultado de uma candidatura que chegou ao fim sem erro.
///
/// Serializado com a tag `status` (`"submitted"` ou `"skipped"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplicationOutcome {
    Submitted {
        #[serde(default)]
        confirmation: Option<String>,
    },
    /// O atuador decidiu não enviar (ex.: formulário externo, pergunta obrigatória).
    Skipped {
        #[serde(default)]
        reason: String,
    },
}

/// Corpo da resposta de `POST /discover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverResponse {
    #[serde(default)]
    pub postings: Vec<Posting>,
}

/// Corpo da requisição de `POST /apply`.
#[derive(Debug, Serialize)]
pub struct ApplyRequest<'a> {
    pub candidate: &'a JobCandidate,
    pub profile: &'a ApplicantProfile,
}
