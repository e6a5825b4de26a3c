//! Tipos de erro da fronteira com o atuador.
//!
//! Define [`ActuatorError`] com uma variante por modo de falha observável e
//! [`ActuatorError::class`], que decide se o loop de execução aborta, tenta
//! de novo ou desiste do candidato.

use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorClass;

/// Erros que o atuador pode reportar ao descobrir vagas ou se candidatar.
///
/// As mensagens carregam texto em vez do erro original do `reqwest`, para
/// que dublês de teste possam construir qualquer variante.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    /// Sessão inválida ou expirada. Aborta a execução inteira.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A página de resultados não pôde ser lida.
    #[error("scraping failed: {0}")]
    Scraping(String),

    /// O formulário foi rejeitado para este candidato.
    #[error("application rejected: {0}")]
    Application(String),

    /// A fonte pediu para desacelerar (HTTP 429 ou equivalente).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Falha de transporte (DNS, conexão recusada, resposta 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// A chamada excedeu o tempo limite configurado.
    #[error("timed out after {0}ms")]
    Timeout(u64),
}

impl ActuatorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ActuatorError::Auth(_) => ErrorClass::Fatal,
            ActuatorError::Scraping(_) | ActuatorError::Network(_) => ErrorClass::Transient,
            ActuatorError::Application(_) | ActuatorError::Timeout(_) => ErrorClass::Permanent,
            ActuatorError::RateLimited { .. } => ErrorClass::RateLimited,
        }
    }

    /// Discovery retries timeouts too; applying does not.
    pub fn is_retryable_discovery(&self) -> bool {
        matches!(
            self,
            ActuatorError::Scraping(_) | ActuatorError::Network(_) | ActuatorError::Timeout(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ActuatorError::RateLimited { retry_after_ms } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ActuatorError {
    fn from(err: reqwest::Error) -> Self {
        ActuatorError::Network(err.to_string())
    }
}
