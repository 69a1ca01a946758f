/// Pilotage d'une collecte multi-chunks
///
/// ARCHITECTURE:
/// Les chunks sont générés UN PAR UN, jamais pré-calculés: le point de
/// départ du chunk N+1 est `effective_oldest` du chunk N moins une
/// frontière. Un plan pré-calculé ne peut pas savoir où repartir après un
/// chunk en recouvrement complet (aucune réponse API); l'accesseur dérivé
/// reconstruit la bonne réponse depuis la base.
///
/// Au sein d'une collecte les chunks sont strictement séquentiels: le
/// raccord anti-trou entre chunks dépend de l'ordre d'écriture.
use crate::chunk::ChunkInfo;
use crate::collection::{CollectionPhase, CollectionState, ProgressCallback, ProgressSnapshot};
use crate::error::{ProviderError, Result};
use crate::exchange::ExchangeClient;
use crate::processor::ChunkProcessor;
use crate::repository::CandleRepository;
use crate::request::{RequestInfo, RequestType};
use crate::time_grid::TimeGrid;
use rusqlite::Connection;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Signal d'annulation, honoré entre deux chunks
///
/// Une annulation en plein chunk laisse la phase en cours (appel ou
/// persistance) se terminer pour ne pas laisser le stockage dans un état
/// incohérent, puis la collecte s'arrête avec l'état partiel.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Coordinateur d'une collecte
pub struct CollectionCoordinator<'a> {
    conn: &'a mut Connection,
    client: &'a dyn ExchangeClient,
    chunk_max: usize,
    max_chunk_retries: u32,
    request_id: u64,
}

impl<'a> CollectionCoordinator<'a> {
    pub fn new(
        conn: &'a mut Connection,
        client: &'a dyn ExchangeClient,
        chunk_max: usize,
        max_chunk_retries: u32,
        request_id: u64,
    ) -> Self {
        CollectionCoordinator {
            conn,
            client,
            chunk_max,
            max_chunk_retries,
            request_id,
        }
    }

    /// Exécute la collecte jusqu'à une condition d'arrêt
    ///
    /// Conditions, évaluées après chaque chunk:
    /// - compte cible couvert
    /// - borne ancienne de la requête atteinte
    /// - limite historique de l'exchange atteinte
    pub async fn run(
        &mut self,
        request_info: RequestInfo,
        progress: Option<&ProgressCallback>,
        cancel: Option<&CancelFlag>,
    ) -> Result<CollectionState> {
        let symbol = request_info.symbol.clone();
        let tf = request_info.timeframe;
        let first_chunk_unbounded = matches!(
            request_info.request_type,
            RequestType::CountOnly | RequestType::EndOnly
        );

        CandleRepository::ensure_partition(self.conn, &symbol, tf)?;

        let mut state = CollectionState::new(request_info);
        let mut next_to = state.request_info.aligned_to;
        let mut index = 0usize;

        info!(
            symbol = %symbol,
            timeframe = %tf,
            request_id = self.request_id,
            target = state.total_requested,
            "démarrage de la collecte"
        );

        loop {
            if state.total_collected >= state.total_requested {
                break;
            }
            if let (Some(end), Some(last)) = (state.target_end_time(), state.last_processed_time())
            {
                if last <= end {
                    break;
                }
            }
            if state.reached_upstream_end {
                break;
            }

            // Plancher persisté lors d'une collecte précédente: au-dessous,
            // l'exchange n'a plus rien et la base contient déjà tout ce qui
            // a été matérialisé: redescendre fabriquerait des lignes
            let known_floor = if CandleRepository::reached_upstream_end(self.conn, &symbol, tf) {
                CandleRepository::partition_oldest(self.conn, &symbol, tf)
            } else {
                None
            };
            if let Some(floor) = known_floor {
                if next_to < floor {
                    state.reached_upstream_end = true;
                    break;
                }
            }

            // Annulation honorée immédiatement entre deux chunks
            if cancel.is_some_and(|c| c.is_cancelled()) {
                state.error = Some("collecte annulée".to_string());
                self.emit_progress(progress, &state, index, CollectionPhase::Aborted);
                return Err(ProviderError::Cancelled {
                    state: Box::new(state),
                });
            }

            let remaining = state.total_requested - state.total_collected;
            let planned_count = remaining.min(self.chunk_max as i64);
            let mut planned_oldest = TimeGrid::advance(next_to, tf, -(planned_count - 1))?;
            // Un chunk à cheval sur le plancher est tronqué au plancher
            if let Some(floor) = known_floor {
                if planned_oldest < floor {
                    planned_oldest = floor;
                }
            }
            let planned_count = TimeGrid::count_between(planned_oldest, next_to, tf)?;
            let skip_analysis = index == 0 && first_chunk_unbounded;

            // Retry à la granularité du chunk: jamais en cours de phase.
            // Le chunk est reconstruit à chaque tentative.
            let mut attempt = 0u32;
            let (chunk, result) = loop {
                let mut chunk = ChunkInfo::new(
                    format!("r{}-c{}", self.request_id, index),
                    index,
                    next_to,
                    planned_oldest,
                    planned_count,
                );

                let mut processor = ChunkProcessor::new(self.conn, self.client, &symbol, tf);
                match processor.process(&mut chunk, skip_analysis).await {
                    Ok(result) => break (chunk, result),
                    Err(e) if e.is_retryable() && attempt + 1 < self.max_chunk_retries => {
                        let pause = Duration::from_secs(1u64 << attempt);
                        warn!(
                            chunk = %chunk.chunk_id,
                            attempt,
                            error = %e,
                            "échec transitoire, nouvelle tentative dans {pause:?}"
                        );
                        tokio::time::sleep(pause).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        state.error = Some(e.to_string());
                        self.emit_progress(progress, &state, index, CollectionPhase::Aborted);
                        return Err(e);
                    }
                }
            };

            // Couverture du chunk: zéro si rien n'a été posé (premier chunk
            // sur un historique vide)
            let has_coverage = chunk.final_newest.is_some() || chunk.db_newest.is_some();
            let covered = if has_coverage {
                TimeGrid::count_between(chunk.effective_oldest(), chunk.effective_newest(), tf)?
            } else {
                0
            };

            state.total_collected += covered;
            state.reached_upstream_end |= result.reached_upstream_end;
            next_to = TimeGrid::advance(result.effective_oldest, tf, -1)?;
            state.completed.push(chunk);

            self.emit_progress(progress, &state, index, CollectionPhase::Collecting);

            if !has_coverage {
                // Rien d'ancrable et rien de stocké: inutile d'insister
                break;
            }

            index += 1;
        }

        state.is_completed = true;
        self.emit_progress(progress, &state, index, CollectionPhase::Completed);

        info!(
            symbol = %symbol,
            timeframe = %tf,
            request_id = self.request_id,
            chunks = state.completed.len(),
            collected = state.total_collected,
            reached_upstream_end = state.reached_upstream_end,
            "collecte terminée"
        );

        Ok(state)
    }

    fn emit_progress(
        &self,
        progress: Option<&ProgressCallback>,
        state: &CollectionState,
        chunk_index: usize,
        phase: CollectionPhase,
    ) {
        let Some(callback) = progress else {
            return;
        };

        let chunk_max = self.chunk_max as i64;
        let snapshot = ProgressSnapshot {
            symbol: state.request_info.symbol.clone(),
            timeframe: state.request_info.timeframe,
            request_id: self.request_id,
            chunk_index,
            total_chunks_estimate: (state.total_requested + chunk_max - 1) / chunk_max,
            collected: state.total_collected,
            requested: state.total_requested,
            elapsed: state.elapsed(),
            phase,
        };
        callback(&snapshot);
    }
}
