/// État d'un chunk de collecte (au plus `chunk_max` bougies)
///
/// Les champs sont groupés par phase du pipeline et remplis au fil de
/// l'exécution. Aucun champ n'est recalculé ni mis en cache ailleurs: les
/// décisions de continuité passent par les accesseurs dérivés
/// `effective_oldest` / `effective_newest`, seule source du "où en
/// sommes-nous", y compris pour un chunk entièrement couvert par la base
/// qui n'a produit aucune réponse API.
use crate::candle::AlignedRange;
use crate::overlap::OverlapStatus;

#[derive(Debug, Clone)]
pub struct ChunkInfo {
    // --- Planification ---
    pub chunk_id: String,
    pub index: usize,
    /// Frontière la plus récente du chunk
    pub planned_to: i64,
    /// Frontière la plus ancienne du chunk
    pub planned_oldest: i64,
    pub planned_count: i64,

    // --- Analyse de recouvrement ---
    /// None si l'analyse a été sautée (premier chunk borné à maintenant)
    pub overlap_status: Option<OverlapStatus>,
    pub db_newest: Option<i64>,
    pub db_oldest: Option<i64>,
    pub api_required: Option<AlignedRange>,

    // --- Exécution API ---
    pub api_request_count: Option<i64>,
    pub api_response_count: Option<i64>,
    pub api_response_newest: Option<i64>,
    pub api_response_oldest: Option<i64>,

    // --- Final ---
    pub final_count: Option<i64>,
    pub final_newest: Option<i64>,
    pub final_oldest: Option<i64>,
}

impl ChunkInfo {
    pub fn new(chunk_id: String, index: usize, planned_to: i64, planned_oldest: i64, planned_count: i64) -> ChunkInfo {
        ChunkInfo {
            chunk_id,
            index,
            planned_to,
            planned_oldest,
            planned_count,
            overlap_status: None,
            db_newest: None,
            db_oldest: None,
            api_required: None,
            api_request_count: None,
            api_response_count: None,
            api_response_newest: None,
            api_response_oldest: None,
            final_count: None,
            final_newest: None,
            final_oldest: None,
        }
    }

    /// Dernière frontière alignée couverte par ce chunk (côté ancien)
    ///
    /// Première valeur renseignée parmi: final, base, réponse API, plan.
    /// Le chunk suivant démarre une frontière sous cette valeur; un chunk
    /// en recouvrement complet (aucun appel API) répond via `db_oldest`.
    pub fn effective_oldest(&self) -> i64 {
        self.final_oldest
            .or(self.db_oldest)
            .or(self.api_response_oldest)
            .unwrap_or(self.planned_oldest)
    }

    /// Frontière la plus récente couverte par ce chunk
    ///
    /// Diffère de `planned_to` uniquement pour un premier chunk sans
    /// référence quand l'exchange n'a rien de plus récent
    pub fn effective_newest(&self) -> i64 {
        self.final_newest
            .or(self.db_newest)
            .or(self.api_response_newest)
            .unwrap_or(self.planned_to)
    }
}

/// Résultat d'un chunk, remonté au coordinateur
#[derive(Debug, Clone, Copy)]
pub struct ChunkResult {
    /// Lignes réellement insérées (hors doublons ignorés)
    pub saved_count: i64,
    pub effective_oldest: i64,
    /// La réponse était plus courte que demandé: limite historique atteinte
    pub reached_upstream_end: bool,
}
