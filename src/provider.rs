/// Façade publique du provider de bougies
///
/// Une opération: `get_candles`. La requête est normalisée, la collecte
/// pilotée chunk par chunk, puis la séquence finale est assemblée depuis
/// la base: dense, strictement décroissante, sans doublon.
///
/// Chaque requête ouvre sa propre connexion SQLite (WAL: lecteurs
/// concurrents, écrivains sérialisés); des requêtes indépendantes peuvent
/// donc tourner en parallèle sur des tâches séparées.
use crate::candle::{AlignedRange, Candle};
use crate::collection::{CollectionState, ProgressCallback};
use crate::coordinator::{CancelFlag, CollectionCoordinator};
use crate::database::DatabaseManager;
use crate::error::{ProviderError, Result};
use crate::exchange::{CHUNK_MAX, ExchangeClient};
use crate::repository::CandleRepository;
use crate::request::{CandleRequest, RequestInfo};
use futures_util::future;
use rusqlite::Connection;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_MAX_CHUNK_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct CandleProvider {
    db_file: String,
    client: Arc<dyn ExchangeClient>,
    chunk_max: usize,
    max_chunk_retries: u32,
    next_request_id: Arc<AtomicU64>,
}

impl CandleProvider {
    pub fn new(db_file: &str, client: Arc<dyn ExchangeClient>) -> Self {
        CandleProvider {
            db_file: db_file.to_string(),
            client,
            chunk_max: CHUNK_MAX,
            max_chunk_retries: DEFAULT_MAX_CHUNK_RETRIES,
            next_request_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Taille de chunk réduite (les tests de raccord utilisent 4)
    pub fn with_chunk_max(mut self, chunk_max: usize) -> Self {
        self.chunk_max = chunk_max.clamp(1, CHUNK_MAX);
        self
    }

    pub fn with_max_chunk_retries(mut self, retries: u32) -> Self {
        self.max_chunk_retries = retries.max(1);
        self
    }

    /// Récupère une séquence dense de bougies, de la plus récente à la
    /// plus ancienne
    ///
    /// RETOUR: exactement `target_count` lignes, ou moins si la limite
    /// historique de l'exchange a été atteinte
    pub async fn get_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>> {
        self.get_candles_with(request, None, None).await
    }

    /// Variante avec callback de progression et signal d'annulation
    pub async fn get_candles_with(
        &self,
        request: &CandleRequest,
        progress: Option<ProgressCallback>,
        cancel: Option<CancelFlag>,
    ) -> Result<Vec<Candle>> {
        let info = RequestInfo::normalize(request)?;
        let mut db = DatabaseManager::new(&self.db_file)?;
        let state = self.run_collection(&mut db, info, progress, cancel).await?;
        Self::assemble(db.connection(), &state)
    }

    /// Exécute la collecte et retourne l'état agrégé (sans assemblage)
    pub async fn collect(
        &self,
        request: &CandleRequest,
        progress: Option<ProgressCallback>,
        cancel: Option<CancelFlag>,
    ) -> Result<CollectionState> {
        let info = RequestInfo::normalize(request)?;
        let mut db = DatabaseManager::new(&self.db_file)?;
        self.run_collection(&mut db, info, progress, cancel).await
    }

    async fn run_collection(
        &self,
        db: &mut DatabaseManager,
        info: RequestInfo,
        progress: Option<ProgressCallback>,
        cancel: Option<CancelFlag>,
    ) -> Result<CollectionState> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut coordinator = CollectionCoordinator::new(
            db.connection_mut(),
            self.client.as_ref(),
            self.chunk_max,
            self.max_chunk_retries,
            request_id,
        );
        coordinator.run(info, progress.as_ref(), cancel.as_ref()).await
    }

    /// Assemble la réponse finale depuis la base
    ///
    /// La plage lue va de la frontière la plus récente couverte par le
    /// premier chunk à la plus ancienne traitée; la troncature au compte
    /// cible absorbe un dernier chunk qui aurait couvert au-delà.
    fn assemble(conn: &Connection, state: &CollectionState) -> Result<Vec<Candle>> {
        let Some(first) = state.completed.first() else {
            return Ok(Vec::new());
        };
        if first.final_newest.is_none() && first.db_newest.is_none() {
            // Premier chunk sans aucune couverture: historique vide
            return Ok(Vec::new());
        }

        let newest = first.effective_newest();
        let oldest = state.last_processed_time().unwrap_or(newest);

        let mut rows = CandleRepository::get_range(
            conn,
            &state.request_info.symbol,
            state.request_info.timeframe,
            AlignedRange::new(oldest, newest),
        )?;
        rows.truncate(state.total_requested as usize);
        Ok(rows)
    }

    /// Exécute plusieurs requêtes indépendantes en parallèle, une tâche
    /// chacune, et retourne les résultats dans l'ordre d'entrée
    pub async fn collect_many(
        &self,
        requests: Vec<CandleRequest>,
    ) -> Vec<Result<Vec<Candle>>> {
        let mut tasks = Vec::with_capacity(requests.len());

        for request in requests {
            let provider = self.clone();
            tasks.push(tokio::spawn(async move {
                provider.get_candles(&request).await
            }));
        }

        let joined = future::join_all(tasks).await;
        joined
            .into_iter()
            .map(|j| match j {
                Ok(result) => result,
                Err(e) => Err(ProviderError::TransientFetch(format!(
                    "tâche de collecte interrompue: {e}"
                ))),
            })
            .collect()
    }
}
