/// État agrégé d'une collecte en cours
///
/// DESIGN:
/// L'état n'enregistre AUCUN "dernier timestamp traité": cette valeur est
/// dérivée à la demande du dernier chunk terminé. Une copie stockée finit
/// toujours par dériver de ce qui a réellement été persisté; la version
/// dérivée ne peut pas.
use crate::chunk::ChunkInfo;
use crate::request::RequestInfo;
use crate::timeframe::Timeframe;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CollectionState {
    pub request_info: RequestInfo,
    /// Chunks terminés, dans l'ordre d'exécution (vecteur en append seul)
    pub completed: Vec<ChunkInfo>,
    pub total_requested: i64,
    /// Frontières couvertes par les chunks terminés (persistées ou déjà en base)
    pub total_collected: i64,
    pub started_at: Instant,
    pub is_completed: bool,
    pub reached_upstream_end: bool,
    pub error: Option<String>,
}

impl CollectionState {
    pub fn new(request_info: RequestInfo) -> CollectionState {
        let total_requested = request_info.target_count;
        CollectionState {
            request_info,
            completed: Vec::new(),
            total_requested,
            total_collected: 0,
            started_at: Instant::now(),
            is_completed: false,
            reached_upstream_end: false,
            error: None,
        }
    }

    /// Frontière la plus ancienne traitée, dérivée du dernier chunk terminé
    pub fn last_processed_time(&self) -> Option<i64> {
        self.completed.last().map(|c| c.effective_oldest())
    }

    /// Borne ancienne visée par la requête, si elle en a une
    pub fn target_end_time(&self) -> Option<i64> {
        self.request_info.aligned_end
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Phase exposée dans les instantanés de progression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionPhase {
    Collecting,
    Completed,
    Aborted,
}

/// Instantané de progression, émis après chaque chunk
///
/// Lecture seule: le consommateur ne peut rien muter. Le callback est
/// invoqué de manière synchrone sur le contexte d'exécution du
/// coordinateur: un callback lent ralentit la collecte.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub request_id: u64,
    pub chunk_index: usize,
    pub total_chunks_estimate: i64,
    pub collected: i64,
    pub requested: i64,
    pub elapsed: Duration,
    pub phase: CollectionPhase,
}

pub type ProgressCallback = Box<dyn Fn(&ProgressSnapshot) + Send + Sync>;
