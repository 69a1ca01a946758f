/// Taxonomie des erreurs du provider
///
/// ARCHITECTURE:
/// Enum fermé: chaque variante a une politique de propagation précise.
/// - InvalidRequest / InvalidTime: rejetées à l'entrée, n'atteignent jamais le pipeline
/// - TransientFetch: retentée à la frontière du chunk (backoff exponentiel)
/// - RateExhausted: fatale pour le chunk, remontée au coordinateur
/// - Storage: fatale pour la collecte, les chunks déjà persistés restent durables
/// - GapFill: violation de contrat (bug), jamais contournée
/// - Cancelled: arrêt propre entre deux phases, état partiel joint
use crate::collection::CollectionState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Combinaison de paramètres invalide, entrée non alignée ou date future
    #[error("requête invalide: {0}")]
    InvalidRequest(String),

    /// Timestamp non aligné là où l'alignement est requis, ou plage inversée
    #[error("temps invalide: {0}")]
    InvalidTime(String),

    /// Erreur réseau, throttling ou 5xx, retentable à la frontière du chunk
    #[error("erreur de récupération transitoire: {0}")]
    TransientFetch(String),

    /// Budget de retries du client épuisé, fatale pour le chunk
    #[error("rate limit épuisé: {0}")]
    RateExhausted(String),

    /// Disque, connexion ou corruption SQLite, fatale pour la collecte
    #[error("erreur de stockage: {0}")]
    Storage(#[from] rusqlite::Error),

    /// La réponse de l'exchange viole l'ordre ou l'alignement: bug, pas une donnée
    #[error("réponse invalide de l'exchange: {0}")]
    GapFill(String),

    /// Annulation externe ou timeout; la phase en cours a été terminée proprement
    #[error("collecte annulée après {} chunk(s)", .state.completed.len())]
    Cancelled { state: Box<CollectionState> },
}

impl ProviderError {
    /// Une erreur transitoire peut être retentée au niveau du chunk
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::TransientFetch(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::TransientFetch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
