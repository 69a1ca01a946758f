/// Exécution d'un chunk de collecte
///
/// ARCHITECTURE SIMPLIFIÉE:
/// - Traite UN chunk à la fois
/// - Retourne le nombre d'insertions réelles et si la limite historique
///   est atteinte; la boucle est dans le coordinateur
///
/// Le pipeline a quatre phases avec sorties anticipées explicites:
/// 1. Analyse de recouvrement (sautée pour le premier chunk borné à
///    maintenant: rien d'utile ne peut être en base au-dessus)
/// 2. Traduction de frontière et appel API
/// 3. Densification (EmptyCopy) avec référence de raccord
/// 4. Persistance transactionnelle
use crate::candle::AlignedRange;
use crate::chunk::{ChunkInfo, ChunkResult};
use crate::error::Result;
use crate::exchange::ExchangeClient;
use crate::gap_filler::{FallbackReference, GapFiller};
use crate::overlap::{OverlapAnalyzer, OverlapStatus};
use crate::repository::CandleRepository;
use crate::time_grid::TimeGrid;
use crate::timeframe::Timeframe;
use rusqlite::Connection;
use tracing::debug;

/// Processeur d'un chunk
pub struct ChunkProcessor<'a> {
    conn: &'a mut Connection,
    client: &'a dyn ExchangeClient,
    symbol: &'a str,
    tf: Timeframe,
}

impl<'a> ChunkProcessor<'a> {
    pub fn new(
        conn: &'a mut Connection,
        client: &'a dyn ExchangeClient,
        symbol: &'a str,
        tf: Timeframe,
    ) -> Self {
        ChunkProcessor {
            conn,
            client,
            symbol,
            tf,
        }
    }

    /// Exécute le pipeline complet sur `chunk`
    ///
    /// `skip_analysis` vaut true pour le premier chunk des requêtes bornées
    /// à maintenant (CountOnly / EndOnly): l'appel part alors sans borne
    /// supérieure et l'exchange répond depuis sa bougie la plus récente.
    pub async fn process(&mut self, chunk: &mut ChunkInfo, skip_analysis: bool) -> Result<ChunkResult> {
        let target = AlignedRange::new(chunk.planned_oldest, chunk.planned_to);

        // --- Phase 1: plan et analyse ---
        if skip_analysis {
            chunk.api_required = Some(target);
        } else {
            let analysis = OverlapAnalyzer::classify(self.conn, self.symbol, self.tf, target)?;
            chunk.overlap_status = Some(analysis.status);
            chunk.db_newest = analysis.db_newest;
            chunk.db_oldest = analysis.db_oldest;
            chunk.api_required = analysis.api_required;

            if analysis.status == OverlapStatus::CompleteOverlap {
                // Tout est déjà en base: pas d'appel, pas d'écriture
                debug!(
                    chunk = %chunk.chunk_id,
                    "recouvrement complet, chunk servi depuis la base"
                );
                return Ok(ChunkResult {
                    saved_count: 0,
                    effective_oldest: chunk.effective_oldest(),
                    reached_upstream_end: false,
                });
            }
        }

        let api = chunk.api_required.expect("plage API posée ci-dessus");

        // --- Phase 2: traduction de frontière et appel API ---
        // Seul endroit du système où l'inclusif interne devient l'exclusif
        // de l'exchange: une frontière alignée en avant
        let to_exclusive = if skip_analysis {
            None
        } else {
            Some(TimeGrid::advance(api.newest, self.tf, 1)?)
        };

        let request_count = TimeGrid::count_between(api.oldest, api.newest, self.tf)? as usize;
        chunk.api_request_count = Some(request_count as i64);

        let response = self
            .client
            .fetch(self.symbol, self.tf, request_count, to_exclusive)
            .await?;

        chunk.api_response_count = Some(response.len() as i64);
        chunk.api_response_newest = response.first().map(|c| c.utc_boundary);
        chunk.api_response_oldest = response.last().map(|c| c.utc_boundary);

        let reached_upstream_end = response.len() < request_count;

        // Un appel par compte peut déborder sous la plage sur données
        // éparses; ces lignes appartiennent aux chunks suivants
        let in_range: Vec<_> = response
            .into_iter()
            .filter(|c| api.contains(c.utc_boundary))
            .collect();

        debug!(
            chunk = %chunk.chunk_id,
            requested = request_count,
            in_range = in_range.len(),
            reached_upstream_end,
            "réponse exchange reçue"
        );

        // --- Phase 3: densification ---
        // La référence de raccord est la ligne une frontière au-dessus de la
        // plage API: la dernière ligne du chunk précédent, ou la couverture
        // base en cas de recouvrement partiel. Absente seulement en tout
        // premier chunk.
        let reference_boundary = TimeGrid::advance(api.newest, self.tf, 1)?;
        let fallback = CandleRepository::get_row(self.conn, self.symbol, self.tf, reference_boundary)?
            .map(|row| FallbackReference::from_candle(&row));

        let filled = GapFiller::fill(&in_range, api, self.tf, fallback.as_ref())?;

        // --- Phase 4: persistance ---
        let saved_count = CandleRepository::insert_chunk(self.conn, self.symbol, self.tf, &filled)?;

        let filled_newest = filled.first().map(|c| c.utc_boundary);
        let filled_oldest = filled.last().map(|c| c.utc_boundary);
        chunk.final_newest = max_present(filled_newest, chunk.db_newest);
        chunk.final_oldest = min_present(filled_oldest, chunk.db_oldest);
        chunk.final_count = match (chunk.final_oldest, chunk.final_newest) {
            (Some(oldest), Some(newest)) => Some(TimeGrid::count_between(oldest, newest, self.tf)?),
            _ => None,
        };

        let effective_oldest = chunk.effective_oldest();
        CandleRepository::update_progress(self.conn, self.symbol, self.tf, effective_oldest)?;
        if reached_upstream_end {
            CandleRepository::mark_upstream_end(self.conn, self.symbol, self.tf, filled_oldest)?;
        }

        debug!(
            chunk = %chunk.chunk_id,
            saved_count,
            effective_oldest,
            "chunk persisté"
        );

        Ok(ChunkResult {
            saved_count,
            effective_oldest,
            reached_upstream_end,
        })
    }
}

fn max_present(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn min_present(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}
